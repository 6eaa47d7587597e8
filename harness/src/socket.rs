use std::time::Duration;

use dkvs::message::{Command, Request};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Client connection to one server.
pub struct Connection(Framed<TcpStream, LinesCodec>);

impl Connection {
    pub async fn connect(address: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(address).await?;
        Ok(Connection(Framed::new(stream, LinesCodec::new())))
    }

    /// Sends `command` and waits up to `timeout` for the reply line.
    pub async fn request(
        &mut self,
        command: Command,
        timeout: Duration,
    ) -> Result<Option<String>, LinesCodecError> {
        self.0.send(Request::Command(command).to_string()).await?;
        match tokio::time::timeout(timeout, self.0.next()).await {
        | Ok(Some(Ok(line))) => Ok(Some(line)),
        | Ok(Some(Err(error))) => Err(error),
        | Ok(None) | Err(_) => Ok(None),
        }
    }
}

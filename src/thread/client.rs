use futures::{SinkExt, StreamExt};

use crate::error::ParseError;
use crate::internal::{self, Rx};
use crate::message::{Request, Response};
use crate::node::Event;
use crate::shared::Shared;
use crate::thread::Socket;

/// Parses one request line. Only a trailing carriage return is dropped,
/// so `set` values keep their spaces.
fn parse(line: &str) -> Result<Request, ParseError> {
    line.strip_suffix('\r').unwrap_or(line).parse()
}

/// One connected client. Requests go to the event loop, responses come
/// back through the hub under this client's ID.
pub struct Client {
    c_id: usize,
    socket: Socket,
    rx: Rx<Response>,
    shared_tx: Shared,
}

impl Client {
    pub fn new(socket: Socket, shared_tx: Shared) -> Self {
        let (rx, tx) = internal::new();
        let c_id = shared_tx.write().connect_client(tx);
        info!("client {} connected", c_id);
        Client { c_id, socket, rx, shared_tx }
    }

    /// Serves the client, starting with a line already read off the socket.
    pub async fn run(mut self, first: String) {
        let mut line = Some(first);
        loop {
            if let Some(line) = line.take() {
                if !self.respond_line(&line).await {
                    break
                }
            }
            tokio::select! {
                next = self.socket.next() => match next {
                | Some(Ok(next)) => line = Some(next),
                | Some(Err(error)) => {
                    error!("failed to read from client {}: {}", self.c_id, error);
                    break
                }
                | None => break,
                },
                response = self.rx.recv() => match response {
                | Some(response) => if !self.write(response).await { break },
                | None => break,
                },
            }
        }
        self.shared_tx.write().disconnect_client(self.c_id);
        info!("client {} disconnected", self.c_id);
    }

    async fn respond_line(&mut self, line: &str) -> bool {
        match parse(line) {
        | Ok(Request::Ping) => self.write(Response::Pong).await,
        | Ok(Request::Command(command)) => {
            trace!("client {} sent {}", self.c_id, command);
            self.shared_tx.read().send_event(Event::Request { c_id: self.c_id, command });
            true
        }
        | Err(error) => {
            warn!("ignoring malformed request from client {}: {}", self.c_id, error);
            true
        }
        }
    }

    async fn write(&mut self, response: Response) -> bool {
        match self.socket.send(response.to_string()).await {
        | Ok(()) => true,
        | Err(error) => {
            error!("failed to write to client {}: {}", self.c_id, error);
            false
        }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    #[test]
    fn trailing_spaces_belong_to_the_value() {
        let expected = Request::Command(Command::Set { key: "k".into(), value: "v  ".into() });
        assert_eq!(parse("set k v  "), Ok(expected.clone()));
        assert_eq!(parse("set k v  \r"), Ok(expected));
        assert_eq!(parse("ping\r"), Ok(Request::Ping));
    }
}

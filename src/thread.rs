//! # Summary
//!
//! Transport tasks. None of these touch consensus state: they only move
//! lines between sockets and the node's queues.
//!
//! Peers and clients share a single listening address. The first line on
//! an incoming connection tells them apart: peers open with `node <id>`.

pub(crate) mod client;
pub(crate) mod peer;
pub(crate) mod timer;

use futures::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};

use crate::message::Message;
use crate::shared::Shared;

/// Line-delimited socket.
pub type Socket = Framed<TcpStream, LinesCodec>;

pub fn socket(stream: TcpStream) -> Socket {
    Framed::new(stream, LinesCodec::new())
}

/// Accepts connections forever, handing each to its own task.
pub async fn listen(listener: TcpListener, shared_tx: Shared) {
    loop {
        match listener.accept().await {
        | Ok((stream, address)) => {
            trace!("accepted connection from {}", address);
            tokio::spawn(accept(stream, shared_tx.clone()));
        }
        | Err(error) => error!("failed to accept connection: {}", error),
        }
    }
}

async fn accept(stream: TcpStream, shared_tx: Shared) {
    let mut socket = socket(stream);
    let first = match socket.next().await {
    | Some(Ok(line)) => line,
    | Some(Err(error)) => {
        error!("failed to read from new connection: {}", error);
        return
    }
    | None => return,
    };
    match first.parse::<Message>() {
    | Ok(Message::Node(peer_id)) => {
        peer::Inbound::new(peer_id, socket, shared_tx).run().await
    }
    | _ => {
        client::Client::new(socket, shared_tx).run(first).await
    }
    }
}

//! # Summary
//!
//! Both halves of a link between two nodes. Each node dials every peer
//! and only ever writes on the connection it dialed, so a link is really
//! two one-way connections.
//!
//! - `Connector` owns the outbound queue for one peer. It keeps
//!   reconnecting until the node stops, and never loses a queued message
//!   to a failed write.
//! - `Inbound` reads whatever a peer sends us on the connection it dialed.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio_util::codec::LinesCodecError;

use crate::internal::Rx;
use crate::message::Message;
use crate::node::Event;
use crate::shared::Shared;
use crate::thread::{self, Socket};

/// Random delay in `[timeout / 2, timeout)`, so that nodes restarting
/// together do not keep dialing in lockstep.
fn jitter(timeout: Duration) -> Duration {
    let millis = std::cmp::max(timeout.as_millis() as u64, 2);
    Duration::from_millis(rand::thread_rng().gen_range(millis / 2..millis))
}

pub struct Connector {
    self_id: usize,
    peer_id: usize,
    address: String,
    rx: Rx<Message>,

    /// Messages taken off the queue but not yet written
    pending: VecDeque<Message>,
    timeout: Duration,
}

impl Connector {
    pub fn new(
        self_id: usize,
        peer_id: usize,
        address: String,
        rx: Rx<Message>,
        timeout: Duration,
    ) -> Self {
        Connector {
            self_id,
            peer_id,
            address,
            rx,
            pending: VecDeque::new(),
            timeout,
        }
    }

    pub async fn run(mut self) {
        loop {
            match TcpStream::connect(&self.address).await {
            | Ok(stream) => {
                info!("connected to {} at {}", self.peer_id, self.address);
                match self.drain(thread::socket(stream)).await {
                | Ok(()) => return,
                | Err(error) => warn!("lost connection to {}: {}", self.peer_id, error),
                }
                // Stale probes say nothing about the next connection
                self.pending.retain(|message| *message != Message::Ping);
            }
            | Err(error) => trace!("failed to connect to {}: {}", self.peer_id, error),
            }
            tokio::time::sleep(jitter(self.timeout)).await;
        }
    }

    /// Writes queued messages until the connection fails, or returns
    /// `Ok` once the queue is closed.
    async fn drain(&mut self, mut socket: Socket) -> Result<(), LinesCodecError> {
        socket.send(Message::Node(self.self_id).to_string()).await?;
        let mut ping = tokio::time::interval(self.timeout / 4);
        let mut idle = true;
        loop {
            while let Some(message) = self.pending.pop_front() {
                if message.is_heartbeat() {
                    trace!("sending {} to {}", message, self.peer_id);
                } else {
                    debug!("sending {} to {}", message, self.peer_id);
                }
                if let Err(error) = socket.send(message.to_string()).await {
                    self.pending.push_front(message);
                    return Err(error)
                }
                idle = false;
            }
            tokio::select! {
                message = self.rx.recv() => match message {
                | Some(message) => self.pending.push_back(message),
                | None => return Ok(()),
                },
                _ = ping.tick() => {
                    if idle {
                        self.pending.push_back(Message::Ping);
                    }
                    idle = true;
                }
                // Peers never write on a connection we dialed, so anything
                // coming back means the link is gone.
                line = socket.next() => match line {
                | Some(Ok(_)) => (),
                | Some(Err(error)) => return Err(error),
                | None => {
                    return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "closed by peer").into())
                }
                },
            }
        }
    }
}

pub struct Inbound {
    peer_id: usize,
    socket: Socket,
    shared_tx: Shared,
}

impl Inbound {
    pub fn new(peer_id: usize, socket: Socket, shared_tx: Shared) -> Self {
        info!("accepted link from {}", peer_id);
        shared_tx.write().mark_alive(peer_id);
        Inbound { peer_id, socket, shared_tx }
    }

    pub async fn run(mut self) {
        while let Some(line) = self.socket.next().await {
            let line = match line {
            | Ok(line) => line,
            | Err(error) => {
                error!("failed to read from {}: {}", self.peer_id, error);
                break
            }
            };
            self.shared_tx.write().mark_alive(self.peer_id);
            match line.parse::<Message>() {
            | Ok(Message::Ping) => self.shared_tx.read().send(self.peer_id, Message::Pong),
            | Ok(Message::Pong) => (),
            | Ok(message) => {
                trace!("received {} from {}", message, self.peer_id);
                self.shared_tx.read().send_event(Event::Message(message));
            }
            | Err(error) => {
                error!("closing link from {}: cannot parse `{}`: {}", self.peer_id, line, error);
                break
            }
            }
        }
        info!("link from {} closed", self.peer_id);
    }
}

//! # Summary
//!
//! A `Node` owns one replica, one leader, one acceptor and the log they
//! share. Every state transition happens inside `Node::handle`, which is
//! only ever called from a single event loop, so none of the roles need
//! any locking of their own.

use hashbrown::HashSet as Set;

use crate::acceptor::Acceptor;
use crate::error::Result;
use crate::internal::Rx;
use crate::leader::Leader;
use crate::message::{Ballot, Command, Message};
use crate::replica::Replica;
use crate::shared::Shared;
use crate::storage::{Recovered, Storage};

/// Anything the event loop reacts to.
#[derive(Debug)]
pub enum Event {
    /// Message from another node, or from this node to itself
    Message(Message),

    /// Command from a connected client
    Request { c_id: usize, command: Command },

    /// Peers not heard from during the last timeout period
    Faulty(Set<usize>),

    /// Replica heartbeat
    Tick,
}

pub struct Node {
    id: usize,
    storage: Storage,
    replica: Replica,
    leader: Leader,
    acceptor: Acceptor,
}

impl Node {

    /// Builds every role for node `id` of a cluster made up of `nodes`,
    /// resuming from whatever was recovered out of `storage`.
    pub fn new(
        id: usize,
        nodes: &[usize],
        storage: Storage,
        recovered: Recovered,
        shared_tx: Shared,
    ) -> Self {
        let min = nodes.iter().cloned().min().unwrap_or(id);
        let acceptor = Acceptor::new(
            id,
            nodes,
            Ballot::new(recovered.ballot, min),
            shared_tx.clone(),
        );
        let leader = Leader::new(
            id,
            nodes.to_vec(),
            nodes.to_vec(),
            recovered.ballot,
            shared_tx.clone(),
        );
        let replica = Replica::new(id, nodes.to_vec(), recovered, shared_tx);
        Node { id, storage, replica, leader, acceptor }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }

    pub fn leader(&self) -> &Leader {
        &self.leader
    }

    pub fn acceptor(&self) -> &Acceptor {
        &self.acceptor
    }

    /// Kicks off leader election.
    pub fn start(&mut self) {
        self.leader.start();
    }

    pub fn handle(&mut self, event: Event) -> Result<()> {
        match event {
        | Event::Message(message) => self.respond_message(message)?,
        | Event::Request { c_id, command } => self.replica.respond_request(c_id, command),
        | Event::Faulty(faulty) => {
            if !faulty.is_empty() {
                debug!("suspected faulty: {:?}", faulty);
            }
            self.leader.respond_faulty(&faulty);
        }
        | Event::Tick => self.replica.tick(),
        }
        Ok(())
    }

    fn respond_message(&mut self, message: Message) -> Result<()> {
        if message.is_heartbeat() {
            trace!("received {}", message);
        } else {
            debug!("received {}", message);
        }
        match message {
        | Message::Propose { proposal, .. } => self.leader.respond_propose(proposal),
        | Message::P1A(p1a) => self.acceptor.respond_p1a(p1a),
        | Message::P1B(p1b) => self.leader.respond_p1b(p1b, &mut self.storage)?,
        | Message::P2A(p2a) => self.acceptor.respond_p2a(p2a),
        | Message::P2B(p2b) => self.leader.respond_p2b(p2b, &mut self.storage)?,
        | Message::Decision(proposal) => self.replica.respond_decision(proposal, &mut self.storage)?,
        | Message::SlotOut { r_id, s_id } => {
            self.leader.respond_slot_out(r_id, s_id);
            self.acceptor.respond_slot_out(r_id, s_id);
        }
        // Link-level chatter is consumed by the transport
        | Message::Node(_) | Message::Ping | Message::Pong => (),
        }
        Ok(())
    }

    /// Drives the node until every event sender is gone or the log fails.
    pub async fn run(mut self, mut event_rx: Rx<Event>) -> Result<()> {
        self.start();
        while let Some(event) = event_rx.recv().await {
            if let Err(error) = self.handle(event) {
                error!("node {} stopping: {}", self.id, error);
                return Err(error)
            }
        }
        Ok(())
    }
}

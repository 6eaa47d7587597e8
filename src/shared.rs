//! # Summary
//!
//! This module implements a central hub for message forwarding. We wrap
//! the central `State` type with Arc<RwLock<T>> to share the connections
//! between the event loop and the concurrently running transport tasks.
//!
//! Every peer gets an outbound queue when the hub is built, before any
//! connection exists. Messages sent to a disconnected peer wait in its
//! queue until the connector task reaches it again.

use std::sync::Arc;

use hashbrown::{HashMap as Map, HashSet as Set};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::internal::{self, Rx, Tx};
use crate::message::{Message, Response};
use crate::node::Event;

/// Thread-safe wrapper around `State` forwarding hub.
#[derive(Clone)]
pub struct Shared(Arc<RwLock<State>>);

impl Shared {

    /// Initializes a message hub for node `id`. Messages addressed to `id`
    /// itself are delivered straight into `event_tx`.
    pub fn new(id: usize, event_tx: Tx<Event>) -> Self {
        Shared(Arc::new(RwLock::new(State::new(id, event_tx))))
    }

    /// Acquires a read lock on the underlying state.
    pub fn read(&self) -> RwLockReadGuard<State> {
        self.0.read()
    }

    /// Acquires a write lock on the underlying state.
    pub fn write(&self) -> RwLockWriteGuard<State> {
        self.0.write()
    }
}

/// Collection of transmitting channels.
pub struct State {
    id: usize,
    event_tx: Tx<Event>,
    peer_txs: Map<usize, Tx<Message>>,
    client_txs: Map<usize, Tx<Response>>,
    next_client: usize,
    alive: Map<usize, bool>,
}

impl State {

    fn new(id: usize, event_tx: Tx<Event>) -> Self {
        State {
            id,
            event_tx,
            peer_txs: Map::default(),
            client_txs: Map::default(),
            next_client: 0,
            alive: Map::default(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Creates the outbound queue for peer `id` and returns its receiving end.
    pub fn register_peer(&mut self, id: usize) -> Rx<Message> {
        let (rx, tx) = internal::new();
        self.peer_txs.insert(id, tx);
        self.alive.insert(id, false);
        rx
    }

    /// Registers a client response channel, returning its node-local id.
    pub fn connect_client(&mut self, tx: Tx<Response>) -> usize {
        self.next_client += 1;
        self.client_txs.insert(self.next_client, tx);
        self.next_client
    }

    /// Disconnects the provided client from this hub.
    pub fn disconnect_client(&mut self, id: usize) {
        self.client_txs.remove(&id);
    }

    /// Records that peer `id` was heard from.
    pub fn mark_alive(&mut self, id: usize) {
        if let Some(alive) = self.alive.get_mut(&id) {
            *alive = true;
        }
    }

    /// Returns every peer not heard from since the previous call, and
    /// resets all peers to unheard.
    pub fn take_faulty(&mut self) -> Set<usize> {
        let faulty = self.alive.iter()
            .filter(|(_, alive)| !**alive)
            .map(|(id, _)| *id)
            .collect();
        for alive in self.alive.values_mut() {
            *alive = false;
        }
        faulty
    }

    /// Forwards an event into this node's own event loop.
    pub fn send_event(&self, event: Event) {
        // Event loop only drops its receiver when the node is stopping
        self.event_tx.try_send(event);
    }

    /// Forwards a message to an external client, if it is still connected.
    pub fn send_client(&self, id: usize, response: Response) {
        if let Some(tx) = self.client_txs.get(&id) {
            tx.try_send(response);
        }
    }

    /// Forwards a message to node `id`, which may be this node.
    pub fn send(&self, id: usize, message: Message) {
        if id == self.id {
            self.send_event(Event::Message(message));
        } else if let Some(tx) = self.peer_txs.get(&id) {
            tx.try_send(message);
        } else {
            warn!("dropping {} for unknown node {}", message, id);
        }
    }

    /// Forwards a message to the provided list of nodes.
    pub fn narrowcast<'a, T>(&self, ids: T, message: Message)
        where T: IntoIterator<Item = &'a usize>
    {
        for id in ids.into_iter() {
            self.send(*id, message.clone());
        }
    }
}

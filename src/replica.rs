//! # Summary
//!
//! The replica is the client-facing state machine. Writes are wrapped in
//! uniquely identified operations and proposed to every leader for the
//! lowest free slot. Decisions are applied strictly in slot order, and
//! clients get their response once the operation hits the log.
//!
//! Reads never go through consensus. They are answered from local state
//! as soon as they arrive.

use std::collections::VecDeque;

use hashbrown::{HashMap as Map, HashSet as Set};

use crate::error::Result;
use crate::message::{self, Command, Message, Operation, Response};
use crate::shared::Shared;
use crate::storage::{Recovered, Storage};

pub struct Replica {
    /// Unique ID of replica
    id: usize,

    /// Every node in the cluster, each of which is a leader
    leaders: Vec<usize>,

    /// Shared transmitting channels
    shared_tx: Shared,

    /// Next slot to propose to
    slot_in: usize,

    /// First slot without an applied decision
    slot_out: usize,

    /// Source of operation ids
    counter: usize,

    /// Largest node ID, spacing out ids minted by different replicas
    stride: usize,

    /// Operations not yet proposed
    requests: VecDeque<Operation>,

    /// Slots proposed to but not yet decided
    proposals: Map<usize, Operation>,

    /// Decided slots, possibly out of order
    decisions: Map<usize, Operation>,

    /// Ids of operations already applied
    performed: Set<usize>,

    /// Clients waiting on an operation, keyed by operation id
    awaiting: Map<usize, usize>,

    /// Key-value map
    state: Map<String, String>,
}

impl Replica {
    pub fn new(id: usize, leaders: Vec<usize>, recovered: Recovered, shared_tx: Shared) -> Self {
        let slot_out = recovered.slot + 1;
        let stride = leaders.iter().cloned().chain(Some(id)).max().unwrap_or(id);
        let counter = recovered.operation
            .map(|o_id| o_id / stride + 1)
            .unwrap_or(0);
        Replica {
            id,
            leaders,
            shared_tx,
            slot_in: slot_out,
            slot_out,
            counter,
            stride,
            requests: VecDeque::new(),
            proposals: Map::default(),
            decisions: Map::default(),
            performed: Set::default(),
            awaiting: Map::default(),
            state: recovered.state,
        }
    }

    pub fn slot_in(&self) -> usize {
        self.slot_in
    }

    pub fn slot_out(&self) -> usize {
        self.slot_out
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.state.get(key).map(String::as_str)
    }

    pub fn state(&self) -> &Map<String, String> {
        &self.state
    }

    pub fn respond_request(&mut self, c_id: usize, command: Command) {
        if let Command::Get { key } = &command {
            let response = match self.state.get(key) {
            | Some(value) => Response::Value { key: key.clone(), value: value.clone() },
            | None => Response::NotFound,
            };
            self.shared_tx.read().send_client(c_id, response);
            return
        }
        let op = Operation::new(self.counter, self.stride, self.id, command);
        self.counter += 1;
        debug!("client {} issued {}", c_id, op);
        self.awaiting.insert(op.o_id, c_id);
        self.requests.push_back(op);
        self.propose();
    }

    pub fn respond_decision(&mut self, decision: message::Proposal, storage: &mut Storage) -> Result<()> {
        if decision.s_id < self.slot_out {
            return Ok(())
        }
        self.decisions.insert(decision.s_id, decision.op);

        while let Some(op) = self.decisions.remove(&self.slot_out) {
            if let Some(proposed) = self.proposals.remove(&self.slot_out) {
                if proposed != op && !self.performed.contains(&proposed.o_id) {
                    debug!("{} lost slot {} to {}", proposed, self.slot_out, op);
                    self.requests.push_back(proposed);
                }
            }
            self.perform(op, storage)?;
            self.slot_out += 1;
        }

        self.propose();
        Ok(())
    }

    /// Broadcasts the first undecided slot so other nodes can collect garbage.
    pub fn tick(&self) {
        let slot_out = Message::SlotOut { r_id: self.id, s_id: self.slot_out };
        self.shared_tx.read().narrowcast(&self.leaders, slot_out);
    }

    /// Assigns every pending request to the next slot without a decision.
    fn propose(&mut self) {
        while let Some(op) = self.requests.pop_front() {
            while self.decisions.contains_key(&self.slot_in) {
                self.slot_in += 1;
            }
            let proposal = message::Proposal { s_id: self.slot_in, op };
            debug!("proposing {} to slot {}", proposal.op, proposal.s_id);
            self.proposals.insert(self.slot_in, proposal.op.clone());
            self.shared_tx.read().narrowcast(&self.leaders, Message::Propose {
                r_id: self.id,
                proposal,
            });
            self.slot_in += 1;
        }
    }

    fn perform(&mut self, op: Operation, storage: &mut Storage) -> Result<()> {
        if !self.performed.insert(op.o_id) {
            // Recorded anyway so a restart resumes past this slot
            trace!("{} already performed", op);
            return storage.save_slot(self.slot_out, &op)
        }
        debug!("performing {} at slot {}", op, self.slot_out);
        let response = match &op.command {
        | Command::Get { .. } => return Ok(()),
        | Command::Set { key, value } => {
            self.state.insert(key.clone(), value.clone());
            Response::Stored
        }
        | Command::Delete { key } => match self.state.remove(key) {
            | Some(_) => Response::Deleted,
            | None => Response::NotFound,
        },
        };
        storage.save_slot(self.slot_out, &op)?;
        if let Some(c_id) = self.awaiting.remove(&op.o_id) {
            self.shared_tx.read().send_client(c_id, response);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::{self, Rx};
    use crate::message::Ballot;
    use crate::node::Event;

    struct Fixture {
        replica: Replica,
        storage: Storage,
        client: Rx<Response>,
        c_id: usize,
        two: Rx<Message>,
        events: Rx<Event>,
        _three: Rx<Message>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (storage, recovered) = Storage::open(dir.path(), 1).unwrap();
        let (events, event_tx) = internal::new();
        let shared = Shared::new(1, event_tx);
        let two = shared.write().register_peer(2);
        let three = shared.write().register_peer(3);
        let (client, client_tx) = internal::new();
        let c_id = shared.write().connect_client(client_tx);
        let replica = Replica::new(1, vec![1, 2, 3], recovered, shared);
        Fixture { replica, storage, client, c_id, two, events, _three: three, _dir: dir }
    }

    fn set(key: &str, value: &str) -> Command {
        Command::Set { key: key.into(), value: value.into() }
    }

    fn proposals(rx: &mut Rx<Message>) -> Vec<message::Proposal> {
        std::iter::from_fn(|| rx.try_recv())
            .filter_map(|message| match message {
                | Message::Propose { proposal, .. } => Some(proposal),
                | _ => None,
            })
            .collect()
    }

    #[test]
    fn reads_are_answered_locally() {
        let mut f = fixture();
        f.replica.respond_request(f.c_id, Command::Get { key: "x".into() });
        assert_eq!(f.client.try_recv(), Some(Response::NotFound));
        assert!(proposals(&mut f.two).is_empty());
    }

    #[test]
    fn writes_are_proposed_then_applied_on_decision() {
        let mut f = fixture();
        f.replica.respond_request(f.c_id, set("x", "10"));
        let proposed = proposals(&mut f.two);
        assert_eq!(proposed.len(), 1);
        assert_eq!(proposed[0].s_id, 1);
        assert_eq!(f.replica.slot_in(), 2);
        assert_eq!(f.client.try_recv(), None);

        f.replica.respond_decision(proposed[0].clone(), &mut f.storage).unwrap();
        assert_eq!(f.client.try_recv(), Some(Response::Stored));
        assert_eq!(f.replica.get("x"), Some("10"));
        assert_eq!(f.replica.slot_out(), 2);

        let log = std::fs::read_to_string(f.storage.path()).unwrap();
        assert_eq!(log, format!("slot 1 {}\n", proposed[0].op));

        f.replica.respond_request(f.c_id, Command::Get { key: "x".into() });
        assert_eq!(f.client.try_recv(), Some(Response::Value { key: "x".into(), value: "10".into() }));
    }

    #[test]
    fn decisions_apply_in_slot_order() {
        let mut f = fixture();
        let first = Operation { o_id: 2, command: set("k", "first") };
        let second = Operation { o_id: 5, command: set("k", "second") };
        f.replica.respond_decision(message::Proposal { s_id: 2, op: second }, &mut f.storage).unwrap();
        assert_eq!(f.replica.get("k"), None);
        assert_eq!(f.replica.slot_out(), 1);
        f.replica.respond_decision(message::Proposal { s_id: 1, op: first }, &mut f.storage).unwrap();
        assert_eq!(f.replica.get("k"), Some("second"));
        assert_eq!(f.replica.slot_out(), 3);
    }

    #[test]
    fn lost_proposals_are_retried_in_a_later_slot() {
        let mut f = fixture();
        f.replica.respond_request(f.c_id, set("mine", "1"));
        let mine = proposals(&mut f.two).remove(0);

        let theirs = Operation { o_id: 2, command: set("theirs", "2") };
        f.replica.respond_decision(message::Proposal { s_id: 1, op: theirs }, &mut f.storage).unwrap();
        assert_eq!(f.client.try_recv(), None);

        let retried = proposals(&mut f.two);
        assert_eq!(retried, vec![message::Proposal { s_id: 2, op: mine.op.clone() }]);

        f.replica.respond_decision(retried[0].clone(), &mut f.storage).unwrap();
        assert_eq!(f.client.try_recv(), Some(Response::Stored));
        assert_eq!(f.replica.get("theirs"), Some("2"));
        assert_eq!(f.replica.get("mine"), Some("1"));
    }

    #[test]
    fn proposals_skip_decided_slots() {
        let mut f = fixture();
        let other = Operation { o_id: 3, command: set("a", "1") };
        f.replica.respond_decision(message::Proposal { s_id: 2, op: other }, &mut f.storage).unwrap();
        f.replica.respond_request(f.c_id, set("b", "1"));
        f.replica.respond_request(f.c_id, set("c", "1"));
        let slots = proposals(&mut f.two).into_iter().map(|p| p.s_id).collect::<Vec<_>>();
        assert_eq!(slots, vec![1, 3]);
    }

    #[test]
    fn replayed_decisions_change_nothing() {
        let mut f = fixture();
        f.replica.respond_request(f.c_id, Command::Delete { key: "gone".into() });
        let delete = proposals(&mut f.two).remove(0);
        f.replica.respond_decision(delete.clone(), &mut f.storage).unwrap();
        assert_eq!(f.client.try_recv(), Some(Response::NotFound));

        // Same slot again is below slot out, same operation in a new slot is a duplicate
        f.replica.respond_decision(delete.clone(), &mut f.storage).unwrap();
        let replay = message::Proposal { s_id: 2, op: delete.op.clone() };
        f.replica.respond_decision(replay, &mut f.storage).unwrap();
        assert_eq!(f.client.try_recv(), None);
        assert_eq!(f.replica.slot_out(), 3);

        let log = std::fs::read_to_string(f.storage.path()).unwrap();
        assert_eq!(log.lines().count(), 2);
    }

    #[test]
    fn restart_after_duplicate_resumes_past_it() {
        let mut f = fixture();
        f.replica.respond_request(f.c_id, set("a", "1"));
        let first = proposals(&mut f.two).remove(0);
        f.replica.respond_decision(first.clone(), &mut f.storage).unwrap();
        let second = Operation { o_id: 2, command: set("a", "2") };
        f.replica.respond_decision(message::Proposal { s_id: 2, op: second }, &mut f.storage).unwrap();
        let again = message::Proposal { s_id: 3, op: first.op.clone() };
        f.replica.respond_decision(again, &mut f.storage).unwrap();
        assert_eq!(f.replica.get("a"), Some("2"));

        let (_storage, recovered) = Storage::open(f._dir.path(), 1).unwrap();
        let (_events, event_tx) = internal::new();
        let replica = Replica::new(1, vec![1, 2, 3], recovered, Shared::new(1, event_tx));
        assert_eq!(replica.slot_out(), 4);
        assert_eq!(replica.get("a"), Some("2"));
    }

    #[test]
    fn operation_ids_stay_unique_with_sparse_node_ids() {
        let mut minted = Vec::new();
        for id in &[1, 3] {
            let dir = tempfile::tempdir().unwrap();
            let (_storage, recovered) = Storage::open(dir.path(), *id).unwrap();
            let (_events, event_tx) = internal::new();
            let shared = Shared::new(*id, event_tx);
            let other = if *id == 1 { 3 } else { 1 };
            let mut peer = shared.write().register_peer(other);
            let mut replica = Replica::new(*id, vec![1, 3], recovered, shared);
            for value in &["x", "y", "z"] {
                replica.respond_request(0, set("k", value));
            }
            minted.extend(proposals(&mut peer).into_iter().map(|p| p.op.o_id));
        }
        let unique = minted.iter().collect::<Set<_>>();
        assert_eq!(minted.len(), 6);
        assert_eq!(unique.len(), 6);
    }

    #[test]
    fn recovers_slot_state_and_operation_ids() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (mut storage, _) = Storage::open(dir.path(), 2).unwrap();
            storage.save_ballot(Ballot::new(3, 2)).unwrap();
            storage.save_slot(1, &Operation { o_id: 5, command: set("a", "1") }).unwrap();
            storage.save_slot(2, &Operation { o_id: 13, command: set("b", "2") }).unwrap();
        }
        let (_storage, recovered) = Storage::open(dir.path(), 2).unwrap();
        let (_events, event_tx) = internal::new();
        let shared = Shared::new(2, event_tx);
        let mut one = shared.write().register_peer(1);
        let _three = shared.write().register_peer(3);
        let mut replica = Replica::new(2, vec![1, 2, 3], recovered, shared);
        assert_eq!(replica.slot_out(), 3);
        assert_eq!(replica.slot_in(), 3);
        assert_eq!(replica.get("a"), Some("1"));

        replica.respond_request(7, set("c", "3"));
        let proposed = proposals(&mut one).remove(0);
        assert_eq!(proposed.s_id, 3);
        assert!(proposed.op.o_id > 13);
        assert_eq!(proposed.op.o_id % 3, 2);
    }

    #[test]
    fn tick_reports_slot_out_everywhere() {
        let mut f = fixture();
        f.replica.tick();
        assert_eq!(f.two.try_recv(), Some(Message::SlotOut { r_id: 1, s_id: 1 }));
        match f.events.try_recv() {
        | Some(Event::Message(Message::SlotOut { r_id: 1, s_id: 1 })) => (),
        | other => panic!("unexpected {:?}", other),
        }
    }
}

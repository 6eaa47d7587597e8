//! # Summary
//!
//! This module defines the `Acceptor` struct, which acts as Paxos's
//! distributed memory. Acceptors keep track of the highest ballot they
//! have promised and the most recently accepted pvalue per slot.

use hashbrown::HashMap as Map;

use crate::message::{self, Ballot, Message};
use crate::shared::Shared;

/// Functions as distributed memory.
pub struct Acceptor {
    /// Unique ID of acceptor
    id: usize,

    /// Shared transmitting channels
    shared_tx: Shared,

    /// Highest ballot seen
    ballot: Ballot,

    /// Most recently accepted PValue per slot
    accepted: Map<usize, message::PValue>,

    /// Latest reported slot out per replica
    slot_outs: Map<usize, usize>,
}

impl Acceptor {
    pub fn new(id: usize, replicas: &[usize], ballot: Ballot, shared_tx: Shared) -> Self {
        Acceptor {
            id,
            shared_tx,
            ballot,
            accepted: Map::default(),
            slot_outs: replicas.iter().map(|r_id| (*r_id, 0)).collect(),
        }
    }

    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    pub fn accepted(&self) -> impl Iterator<Item = &message::PValue> {
        self.accepted.values()
    }

    /// Adopts strictly higher ballots, and responds to the sending scout
    /// with every pvalue accepted so far.
    pub fn respond_p1a(&mut self, p1a: message::P1A) {
        if p1a.b_id > self.ballot {
            debug!("adopted {}", p1a.b_id);
            self.ballot = p1a.b_id;
        }
        let p1b = Message::P1B(message::P1B {
            a_id: self.id,
            original: p1a.b_id,
            b_id: self.ballot,
            pvalues: self.accepted.values().cloned().collect(),
        });
        trace!("sending {} to {}", p1b, p1a.l_id);
        self.shared_tx.read().send(p1a.l_id, p1b);
    }

    /// Accepts pvalues carrying the reigning ballot, and responds to the
    /// sending commander with the current ballot either way.
    pub fn respond_p2a(&mut self, p2a: message::P2A) {
        let pvalue = p2a.pvalue;
        if pvalue.b_id > self.ballot {
            debug!("adopted {}", pvalue.b_id);
            self.ballot = pvalue.b_id;
        }
        if pvalue.b_id == self.ballot {
            self.accepted.insert(pvalue.s_id, pvalue.clone());
        }
        let p2b = Message::P2B(message::P2B {
            a_id: self.id,
            b_id: self.ballot,
            pvalue,
        });
        trace!("sending {} to {}", p2b, p2a.l_id);
        self.shared_tx.read().send(p2a.l_id, p2b);
    }

    /// Forgets every slot that all replicas have moved past.
    pub fn respond_slot_out(&mut self, r_id: usize, s_id: usize) {
        let before = self.low_water_mark();
        match self.slot_outs.get_mut(&r_id) {
        | Some(slot_out) => *slot_out = std::cmp::max(*slot_out, s_id),
        | None => return,
        }
        let after = self.low_water_mark();
        if after > before {
            debug!("cleaning up slots below {}", after);
            self.accepted.retain(|s_id, _| *s_id >= after);
        }
    }

    fn low_water_mark(&self) -> usize {
        self.slot_outs.values().cloned().min().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::{self, Rx};
    use crate::message::{Command, Operation, PValue};
    use crate::node::Event;

    fn acceptor() -> (Acceptor, Rx<Message>, Rx<Event>) {
        let (event_rx, event_tx) = internal::new();
        let shared = Shared::new(1, event_tx);
        let leader_rx = shared.write().register_peer(2);
        shared.write().register_peer(3);
        (Acceptor::new(1, &[1, 2, 3], Ballot::new(0, 1), shared), leader_rx, event_rx)
    }

    fn pvalue(round: usize, l_id: usize, s_id: usize) -> PValue {
        PValue {
            b_id: Ballot::new(round, l_id),
            s_id,
            op: Operation { o_id: s_id, command: Command::Get { key: "k".into() } },
        }
    }

    #[test]
    fn promises_only_higher_ballots() {
        let (mut acceptor, mut leader_rx, _) = acceptor();
        acceptor.respond_p1a(message::P1A { l_id: 2, b_id: Ballot::new(3, 2) });
        acceptor.respond_p1a(message::P1A { l_id: 2, b_id: Ballot::new(2, 2) });
        assert_eq!(acceptor.ballot(), Ballot::new(3, 2));

        match leader_rx.try_recv() {
        | Some(Message::P1B(p1b)) => assert_eq!(p1b.b_id, p1b.original),
        | other => panic!("unexpected {:?}", other),
        }
        match leader_rx.try_recv() {
        | Some(Message::P1B(p1b)) => {
            assert_eq!(p1b.original, Ballot::new(2, 2));
            assert_eq!(p1b.b_id, Ballot::new(3, 2));
        }
        | other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn accepts_reigning_ballot_and_rejects_stale_ones() {
        let (mut acceptor, mut leader_rx, _) = acceptor();
        acceptor.respond_p2a(message::P2A { l_id: 2, pvalue: pvalue(1, 2, 1) });
        acceptor.respond_p1a(message::P1A { l_id: 2, b_id: Ballot::new(4, 2) });
        acceptor.respond_p2a(message::P2A { l_id: 2, pvalue: pvalue(1, 2, 2) });
        acceptor.respond_p2a(message::P2A { l_id: 2, pvalue: pvalue(4, 2, 1) });

        let accepted = acceptor.accepted().cloned().collect::<Vec<_>>();
        assert_eq!(accepted, vec![pvalue(4, 2, 1)]);

        let responses = std::iter::from_fn(|| leader_rx.try_recv()).collect::<Vec<_>>();
        assert_eq!(responses.len(), 4);
        match &responses[2] {
        | Message::P2B(p2b) => {
            assert_eq!(p2b.b_id, Ballot::new(4, 2));
            assert_ne!(p2b.b_id, p2b.pvalue.b_id);
        }
        | other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn responses_to_self_stay_local() {
        let (mut acceptor, _, mut event_rx) = acceptor();
        acceptor.respond_p1a(message::P1A { l_id: 1, b_id: Ballot::new(1, 1) });
        match event_rx.try_recv() {
        | Some(Event::Message(Message::P1B(p1b))) => assert_eq!(p1b.a_id, 1),
        | other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn collects_garbage_only_once_every_replica_has_moved_on() {
        let (mut acceptor, _, _) = acceptor();
        for s_id in 1..=4 {
            acceptor.respond_p2a(message::P2A { l_id: 2, pvalue: pvalue(1, 2, s_id) });
        }
        acceptor.respond_slot_out(1, 4);
        acceptor.respond_slot_out(2, 4);
        assert_eq!(acceptor.accepted().count(), 4);
        acceptor.respond_slot_out(3, 3);
        let mut slots = acceptor.accepted().map(|pvalue| pvalue.s_id).collect::<Vec<_>>();
        slots.sort();
        assert_eq!(slots, vec![3, 4]);
    }
}

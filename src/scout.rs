//! # Summary
//!
//! A `Scout` runs phase one of Paxos for a single ballot. The leader keeps
//! one per ballot it is championing, feeds it every `P1B` addressed to that
//! ballot, and discards it as soon as it reports anything but `Pending`.

use hashbrown::{HashMap as Map, HashSet as Set};

use crate::message::{self, Ballot, Message, PValue};
use crate::shared::Shared;

/// Result of feeding a response to a scout.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Still waiting on a majority.
    Pending,

    /// A majority promised this ballot. Carries the highest-ballot pvalue
    /// reported for each slot.
    Adopted(Map<usize, PValue>),

    /// Some acceptor already promised the carried, different ballot.
    Preempted(Ballot),
}

pub struct Scout {
    b_id: Ballot,
    waiting: Set<usize>,
    minority: usize,
    pvalues: Map<usize, PValue>,
}

impl Scout {
    pub fn new(b_id: Ballot, acceptors: &[usize]) -> Self {
        debug!("starting for {}", b_id);
        Scout {
            b_id,
            waiting: acceptors.iter().cloned().collect(),
            minority: (acceptors.len() - 1) / 2,
            pvalues: Map::default(),
        }
    }

    pub fn ballot(&self) -> Ballot {
        self.b_id
    }

    /// Narrowcasts P1A to acceptors who haven't responded.
    pub fn send_p1a(&self, shared_tx: &Shared) {
        let p1a = Message::P1A(message::P1A {
            l_id: self.b_id.l_id,
            b_id: self.b_id,
        });
        shared_tx.read().narrowcast(&self.waiting, p1a);
    }

    pub fn respond_p1b(&mut self, p1b: message::P1B) -> Outcome {
        if p1b.b_id != self.b_id {
            debug!("{} preempted by {}", self.b_id, p1b.b_id);
            return Outcome::Preempted(p1b.b_id)
        }

        for pvalue in p1b.pvalues {
            match self.pvalues.get(&pvalue.s_id) {
            | Some(known) if known.b_id >= pvalue.b_id => (),
            | _ => { self.pvalues.insert(pvalue.s_id, pvalue); }
            }
        }

        self.waiting.remove(&p1b.a_id);
        if self.waiting.len() <= self.minority {
            debug!("{} adopted", self.b_id);
            Outcome::Adopted(std::mem::replace(&mut self.pvalues, Map::default()))
        } else {
            Outcome::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, Operation};

    fn pvalue(round: usize, s_id: usize, key: &str) -> PValue {
        PValue {
            b_id: Ballot::new(round, 9),
            s_id,
            op: Operation { o_id: round, command: Command::Delete { key: key.into() } },
        }
    }

    fn p1b(a_id: usize, b_id: Ballot, pvalues: Vec<PValue>) -> message::P1B {
        message::P1B { a_id, original: Ballot::new(5, 1), b_id, pvalues }
    }

    #[test]
    fn adopted_by_two_of_three() {
        let ballot = Ballot::new(5, 1);
        let mut scout = Scout::new(ballot, &[1, 2, 3]);
        assert_eq!(scout.respond_p1b(p1b(2, ballot, vec![pvalue(1, 1, "a")])), Outcome::Pending);
        // Duplicates from the same acceptor do not count twice
        assert_eq!(scout.respond_p1b(p1b(2, ballot, vec![])), Outcome::Pending);
        match scout.respond_p1b(p1b(3, ballot, vec![pvalue(3, 1, "b"), pvalue(2, 2, "c")])) {
        | Outcome::Adopted(pvalues) => {
            assert_eq!(pvalues.len(), 2);
            assert_eq!(pvalues[&1], pvalue(3, 1, "b"));
            assert_eq!(pvalues[&2], pvalue(2, 2, "c"));
        }
        | other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn keeps_highest_ballot_per_slot() {
        let ballot = Ballot::new(5, 1);
        let mut scout = Scout::new(ballot, &[1, 2, 3, 4, 5]);
        scout.respond_p1b(p1b(1, ballot, vec![pvalue(4, 7, "new")]));
        scout.respond_p1b(p1b(2, ballot, vec![pvalue(2, 7, "old")]));
        match scout.respond_p1b(p1b(3, ballot, vec![])) {
        | Outcome::Adopted(pvalues) => assert_eq!(pvalues[&7], pvalue(4, 7, "new")),
        | other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn preempted_by_different_ballot() {
        let ballot = Ballot::new(5, 1);
        let mut scout = Scout::new(ballot, &[1, 2, 3]);
        assert_eq!(
            scout.respond_p1b(p1b(2, Ballot::new(5, 3), vec![])),
            Outcome::Preempted(Ballot::new(5, 3)),
        );
    }

    #[test]
    fn single_acceptor_is_a_majority() {
        let ballot = Ballot::new(1, 1);
        let mut scout = Scout::new(ballot, &[1]);
        assert_eq!(scout.respond_p1b(p1b(1, ballot, vec![])), Outcome::Adopted(Map::default()));
    }
}

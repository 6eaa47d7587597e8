//! # Summary
//!
//! A `Commander` runs phase two of Paxos for a single pvalue. The leader
//! keys its commanders by pvalue, so a late `P2B` for a commander that has
//! already finished finds nothing to update.

use hashbrown::HashSet as Set;

use crate::message::{self, Ballot, Message, PValue};
use crate::shared::Shared;

/// Result of feeding a response to a commander.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Pending,

    /// A majority accepted; the decision has been broadcast.
    Decided,

    /// An acceptor rejected the pvalue in favor of the carried ballot.
    Preempted(Ballot),
}

pub struct Commander {
    pvalue: PValue,
    waiting: Set<usize>,
    minority: usize,
}

impl Commander {
    pub fn new(pvalue: PValue, acceptors: &[usize]) -> Self {
        debug!("starting for {}", pvalue);
        Commander {
            pvalue,
            waiting: acceptors.iter().cloned().collect(),
            minority: (acceptors.len() - 1) / 2,
        }
    }

    pub fn pvalue(&self) -> &PValue {
        &self.pvalue
    }

    /// Narrowcasts P2A to acceptors who haven't responded.
    pub fn send_p2a(&self, shared_tx: &Shared) {
        let p2a = Message::P2A(message::P2A {
            l_id: self.pvalue.b_id.l_id,
            pvalue: self.pvalue.clone(),
        });
        shared_tx.read().narrowcast(&self.waiting, p2a);
    }

    /// Tells every replica the outcome for this slot.
    fn send_decision(&self, replicas: &[usize], shared_tx: &Shared) {
        let decision = Message::Decision(message::Proposal {
            s_id: self.pvalue.s_id,
            op: self.pvalue.op.clone(),
        });
        shared_tx.read().narrowcast(replicas, decision);
    }

    pub fn respond_p2b(&mut self, p2b: message::P2B, replicas: &[usize], shared_tx: &Shared) -> Outcome {
        if p2b.b_id != self.pvalue.b_id {
            debug!("{} preempted by {}", self.pvalue, p2b.b_id);
            return Outcome::Preempted(p2b.b_id)
        }
        self.waiting.remove(&p2b.a_id);
        if self.waiting.len() <= self.minority {
            debug!("{} decided", self.pvalue);
            self.send_decision(replicas, shared_tx);
            Outcome::Decided
        } else {
            Outcome::Pending
        }
    }
}

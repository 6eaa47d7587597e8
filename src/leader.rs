//! # Summary
//!
//! The leader sits between replicas and acceptors. While passive it owns at
//! most a scout trying to get its ballot adopted; once active it turns every
//! proposal into a commander under that ballot.
//!
//! A preempted leader does not fight back immediately. It mints a higher
//! ballot, persists it, and waits until the fault detector reports the
//! owner of the preempting ballot as failed before scouting again.

use hashbrown::{HashMap as Map, HashSet as Set};

use crate::commander::{self, Commander};
use crate::error::Result;
use crate::message::{self, Ballot, Operation, PValue};
use crate::scout::{self, Scout};
use crate::shared::Shared;
use crate::storage::Storage;

pub struct Leader {
    id: usize,
    acceptors: Vec<usize>,
    replicas: Vec<usize>,
    shared_tx: Shared,
    active: bool,
    ballot: Ballot,
    proposals: Map<usize, Operation>,
    scouts: Map<Ballot, Scout>,
    commanders: Map<PValue, Commander>,

    /// Leader whose failure we are waiting on before scouting again
    awaiting: Option<usize>,

    /// Latest reported slot out per replica
    slot_outs: Map<usize, usize>,

    /// Slots below this have been decided everywhere and forgotten
    collected: usize,
}

impl Leader {

    pub fn new(
        id: usize,
        acceptors: Vec<usize>,
        replicas: Vec<usize>,
        round: usize,
        shared_tx: Shared,
    ) -> Self {
        let slot_outs = replicas.iter().map(|r_id| (*r_id, 0)).collect();
        Leader {
            id,
            acceptors,
            replicas,
            shared_tx,
            active: false,
            ballot: Ballot::new(round, id),
            proposals: Map::default(),
            scouts: Map::default(),
            commanders: Map::default(),
            awaiting: None,
            slot_outs,
            collected: 0,
        }
    }

    /// Begins the first election. Called once the node is ready to send.
    pub fn start(&mut self) {
        self.spawn_scout();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn ballot(&self) -> Ballot {
        self.ballot
    }

    pub fn proposals(&self) -> &Map<usize, Operation> {
        &self.proposals
    }

    pub fn commanders(&self) -> impl Iterator<Item = &PValue> {
        self.commanders.keys()
    }

    pub fn respond_propose(&mut self, proposal: message::Proposal) {
        if proposal.s_id < self.collected || self.proposals.contains_key(&proposal.s_id) {
            return
        }
        self.proposals.insert(proposal.s_id, proposal.op.clone());
        if self.active {
            self.spawn_commander(proposal.s_id, proposal.op);
        }
    }

    pub fn respond_p1b(&mut self, p1b: message::P1B, storage: &mut Storage) -> Result<()> {
        let b_id = p1b.original;
        let outcome = match self.scouts.get_mut(&b_id) {
        | Some(scout) => scout.respond_p1b(p1b),
        | None => return Ok(()),
        };
        match outcome {
        | scout::Outcome::Pending => Ok(()),
        | scout::Outcome::Adopted(pvalues) => {
            self.scouts.remove(&b_id);
            self.respond_adopt(b_id, pvalues);
            Ok(())
        }
        | scout::Outcome::Preempted(preempting) => {
            self.scouts.remove(&b_id);
            self.respond_preempt(preempting, storage)
        }
        }
    }

    pub fn respond_p2b(&mut self, p2b: message::P2B, storage: &mut Storage) -> Result<()> {
        let pvalue = p2b.pvalue.clone();
        let outcome = match self.commanders.get_mut(&pvalue) {
        | Some(commander) => commander.respond_p2b(p2b, &self.replicas, &self.shared_tx),
        | None => return Ok(()),
        };
        match outcome {
        | commander::Outcome::Pending => Ok(()),
        | commander::Outcome::Decided => {
            self.commanders.remove(&pvalue);
            Ok(())
        }
        | commander::Outcome::Preempted(preempting) => {
            self.commanders.remove(&pvalue);
            self.respond_preempt(preempting, storage)
        }
        }
    }

    /// Resumes scouting once the leader we deferred to is reported faulty.
    pub fn respond_faulty(&mut self, faulty: &Set<usize>) {
        match self.awaiting {
        | Some(l_id) if faulty.contains(&l_id) => {
            info!("leader {} failed, scouting with {}", l_id, self.ballot);
            self.awaiting = None;
            self.spawn_scout();
        }
        | _ => (),
        }
    }

    /// Forgets every slot that all replicas have moved past.
    pub fn respond_slot_out(&mut self, r_id: usize, s_id: usize) {
        match self.slot_outs.get_mut(&r_id) {
        | Some(slot_out) => *slot_out = std::cmp::max(*slot_out, s_id),
        | None => return,
        }
        let low = self.slot_outs.values().cloned().min().unwrap_or(0);
        if low > self.collected {
            debug!("cleaning up slots below {}", low);
            self.collected = low;
            self.proposals.retain(|s_id, _| *s_id >= low);
            self.commanders.retain(|pvalue, _| pvalue.s_id >= low);
        }
    }

    fn respond_preempt(&mut self, b_id: Ballot, storage: &mut Storage) -> Result<()> {
        if b_id <= self.ballot {
            return Ok(())
        }
        info!("preempted by {}", b_id);
        self.active = false;
        let round = storage.next_ballot(b_id.round);
        self.ballot = Ballot::new(round, self.id);
        storage.save_ballot(self.ballot)?;
        if b_id.l_id == self.id {
            // Only a stale incarnation of ourselves to wait for
            self.spawn_scout();
        } else {
            info!("waiting for {} to fail", b_id.l_id);
            self.awaiting = Some(b_id.l_id);
        }
        Ok(())
    }

    fn respond_adopt(&mut self, b_id: Ballot, pvalues: Map<usize, PValue>) {
        if b_id != self.ballot {
            return
        }
        info!("adopted with {}", b_id);

        // Pvalues may already be decided under an earlier ballot, so
        // they take priority over our own proposals.
        for (s_id, pvalue) in pvalues {
            if s_id >= self.collected {
                self.proposals.insert(s_id, pvalue.op);
            }
        }
        self.active = true;

        let proposals = self.proposals.iter()
            .map(|(s_id, op)| (*s_id, op.clone()))
            .collect::<Vec<_>>();
        for (s_id, op) in proposals {
            self.spawn_commander(s_id, op);
        }
    }

    fn spawn_commander(&mut self, s_id: usize, op: Operation) {
        let pvalue = PValue { b_id: self.ballot, s_id, op };
        if self.commanders.contains_key(&pvalue) {
            return
        }
        let commander = Commander::new(pvalue.clone(), &self.acceptors);
        commander.send_p2a(&self.shared_tx);
        self.commanders.insert(pvalue, commander);
    }

    fn spawn_scout(&mut self) {
        let scout = Scout::new(self.ballot, &self.acceptors);
        scout.send_p1a(&self.shared_tx);
        self.scouts.insert(self.ballot, scout);
    }
}

//! # Summary
//!
//! This module abstracts over stable storage. To perform failure recovery,
//! each node keeps an append-only log with two kinds of records:
//!
//! - `ballot <ballot>`, written by the leader before it uses a new ballot
//! - `slot <slot> <operation>`, written by the replica after applying a write
//!
//! Records are never rewritten. On startup the log is scanned back to front,
//! so the newest write to each key is the first one seen and older history
//! never has to be re-executed.

use std::fmt;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use hashbrown::{HashMap as Map, HashSet as Set};

use crate::error::{number, ParseError, Result};
use crate::message::{Ballot, Command, Operation};

/// Single line of the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Ballot(Ballot),
    Slot(usize, Operation),
}

impl fmt::Display for Record {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Record::Ballot(ballot) => write!(fmt, "ballot {}", ballot),
        | Record::Slot(slot, op) => write!(fmt, "slot {} {}", slot, op),
        }
    }
}

impl FromStr for Record {
    type Err = ParseError;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ' ');
        match parts.next() {
        | Some("ballot") => {
            let ballot = parts.next().ok_or(ParseError::MissingField("ballot"))?;
            Ok(Record::Ballot(ballot.parse()?))
        }
        | Some("slot") => {
            let slot = number("slot", parts.next())?;
            let op = parts.next().ok_or(ParseError::MissingField("operation"))?;
            Ok(Record::Slot(slot, op.parse()?))
        }
        | Some(other) => Err(ParseError::UnknownMessage(other.to_string())),
        | None => Err(ParseError::Empty),
        }
    }
}

/// State reconstructed from an existing log.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recovered {
    /// Highest ballot round ever persisted
    pub ballot: usize,

    /// Highest slot applied before the crash, 0 if none
    pub slot: usize,

    /// Highest operation id found in a slot record
    pub operation: Option<usize>,

    /// Key-value map as of the last applied slot
    pub state: Map<String, String>,
}

impl Recovered {
    /// Replays log lines, newest last, into the state they describe.
    ///
    /// An operation decided in more than one slot is logged at each of them
    /// but only takes effect at the first.
    pub fn replay<'a, I>(lines: I) -> Self
        where I: DoubleEndedIterator<Item = &'a str>
    {
        let records = lines
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match line.parse::<Record>() {
                | Ok(record) => Some(record),
                | Err(error) => {
                    warn!("skipping log line `{}`: {}", line, error);
                    None
                }
            })
            .collect::<Vec<_>>();

        let mut first: Map<usize, usize> = Map::default();
        for record in &records {
            if let Record::Slot(slot, op) = record {
                let entry = first.entry(op.o_id).or_insert(*slot);
                *entry = std::cmp::min(*entry, *slot);
            }
        }

        let mut recovered = Recovered::default();
        let mut removed: Set<String> = Set::default();
        for record in records.into_iter().rev() {
            match record {
            | Record::Ballot(ballot) => {
                // Rounds persisted by one node only ever grow, so the
                // largest is also the most recent.
                recovered.ballot = std::cmp::max(recovered.ballot, ballot.round);
            }
            | Record::Slot(slot, op) => {
                recovered.slot = std::cmp::max(recovered.slot, slot);
                recovered.operation = std::cmp::max(recovered.operation, Some(op.o_id));
                if first.get(&op.o_id) != Some(&slot) {
                    continue
                }
                let key = op.command.key();
                if recovered.state.contains_key(key) || removed.contains(key) {
                    continue
                }
                match op.command {
                | Command::Set { key, value } => { recovered.state.insert(key, value); }
                | Command::Delete { key } => { removed.insert(key); }
                | Command::Get { .. } => (),
                }
            }
            }
        }
        recovered
    }
}

/// Append-only log backing one node.
#[derive(Debug)]
pub struct Storage {
    path: PathBuf,
    writer: BufWriter<fs::File>,
    ballot: usize,
}

impl Storage {
    /// Opens (or creates) `dkvs_<id>.log` under `dir` and recovers its contents.
    pub fn open<P: AsRef<Path>>(dir: P, id: usize) -> Result<(Self, Recovered)> {
        let path = dir.as_ref().join(format!("dkvs_{}.log", id));
        let contents = match fs::read_to_string(&path) {
        | Ok(contents) => contents,
        | Err(ref error) if error.kind() == io::ErrorKind::NotFound => String::new(),
        | Err(error) => return Err(error.into()),
        };
        let recovered = Recovered::replay(contents.lines());
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        info!(
            "recovered {:?}: ballot round {}, slot {}, {} keys",
            path, recovered.ballot, recovered.slot, recovered.state.len(),
        );
        let storage = Storage {
            path,
            writer: BufWriter::new(file),
            ballot: recovered.ballot,
        };
        Ok((storage, recovered))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest ballot round handed out or recovered.
    pub fn ballot(&self) -> usize {
        self.ballot
    }

    /// Mints a ballot round strictly greater than both `observed` and every
    /// round this node has used before. The caller must persist it.
    pub fn next_ballot(&mut self, observed: usize) -> usize {
        self.ballot = std::cmp::max(self.ballot, observed) + 1;
        self.ballot
    }

    pub fn save_ballot(&mut self, ballot: Ballot) -> Result<()> {
        self.ballot = std::cmp::max(self.ballot, ballot.round);
        self.append(&Record::Ballot(ballot))
    }

    pub fn save_slot(&mut self, slot: usize, op: &Operation) -> Result<()> {
        self.append(&Record::Slot(slot, op.clone()))
    }

    /// Appends one record and forces it to disk before returning.
    fn append(&mut self, record: &Record) -> Result<()> {
        trace!("persisting `{}`", record);
        writeln!(self.writer, "{}", record)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }
}

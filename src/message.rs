//! # Summary
//!
//! Value types exchanged between nodes and clients, along with their
//! line-oriented text encoding. Every type here implements `Display` for
//! encoding and `FromStr` for decoding, and the two are inverses of each
//! other for well-formed input.

use std::fmt;
use std::str::FromStr;

use crate::error::{number, ParseError};

/// Separates pvalues inside a `p1b` message.
pub const PVALUE_SEPARATOR: &str = " ### ";

/// Totally ordered (round, leader) pair. Derived ordering compares `round`
/// first and breaks ties on `l_id`.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ballot {
    pub round: usize,
    pub l_id: usize,
}

impl Ballot {
    pub fn new(round: usize, l_id: usize) -> Self {
        Ballot { round, l_id }
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}_{}", self.round, self.l_id)
    }
}

impl FromStr for Ballot {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '_');
        match (parts.next(), parts.next()) {
        | (Some(round), Some(l_id)) => Ok(Ballot {
            round: round.parse().map_err(|_| ParseError::InvalidBallot(s.to_string()))?,
            l_id: l_id.parse().map_err(|_| ParseError::InvalidBallot(s.to_string()))?,
        }),
        | _ => Err(ParseError::InvalidBallot(s.to_string())),
        }
    }
}

/// Key-value command issued by a client.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Get { key: String },
    Set { key: String, value: String },
    Delete { key: String },
}

impl Command {
    /// Reads never mutate state, so they are never written to the log.
    pub fn is_read(&self) -> bool {
        match self {
        | Command::Get { .. } => true,
        | _ => false,
        }
    }

    pub fn key(&self) -> &str {
        match self {
        | Command::Get { key }
        | Command::Set { key, .. }
        | Command::Delete { key } => key,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Command::Get { key } => write!(fmt, "get {}", key),
        | Command::Set { key, value } => write!(fmt, "set {} {}", key, value),
        | Command::Delete { key } => write!(fmt, "delete {}", key),
        }
    }
}

impl FromStr for Command {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidRequest(s.to_string());
        let mut parts = s.splitn(3, ' ');
        let verb = parts.next().ok_or_else(invalid)?;
        let key = parts.next()
            .filter(|key| !key.is_empty())
            .map(String::from)
            .ok_or_else(invalid)?;
        match verb {
        | "get" => Ok(Command::Get { key }),
        | "delete" => Ok(Command::Delete { key }),
        | "set" => {
            // Values are the rest of the line, spaces included
            let value = parts.next().ok_or_else(invalid)?.to_string();
            Ok(Command::Set { key, value })
        }
        | _ => Err(invalid()),
        }
    }
}

/// Anything a client may send on its connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Ping,
    Command(Command),
}

impl FromStr for Request {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "ping" {
            Ok(Request::Ping)
        } else {
            s.parse().map(Request::Command)
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Request::Ping => write!(fmt, "ping"),
        | Request::Command(command) => write!(fmt, "{}", command),
        }
    }
}

/// Client-visible result of a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Value { key: String, value: String },
    NotFound,
    Stored,
    Deleted,
    Pong,
}

impl fmt::Display for Response {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Response::Value { key, value } => write!(fmt, "VALUE {} {}", key, value),
        | Response::NotFound => write!(fmt, "NOT_FOUND"),
        | Response::Stored => write!(fmt, "STORED"),
        | Response::Deleted => write!(fmt, "DELETED"),
        | Response::Pong => write!(fmt, "PONG"),
        }
    }
}

impl FromStr for Response {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ' ');
        match (parts.next(), parts.next(), parts.next()) {
        | (Some("VALUE"), Some(key), Some(value)) => Ok(Response::Value {
            key: key.to_string(),
            value: value.to_string(),
        }),
        | (Some("NOT_FOUND"), None, None) => Ok(Response::NotFound),
        | (Some("STORED"), None, None) => Ok(Response::Stored),
        | (Some("DELETED"), None, None) => Ok(Response::Deleted),
        | (Some("PONG"), None, None) => Ok(Response::Pong),
        | _ => Err(ParseError::UnknownMessage(s.to_string())),
        }
    }
}

/// Uniquely identified client command (operation descriptor).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Operation {
    pub o_id: usize,
    pub command: Command,
}

impl Operation {
    /// Builds an operation whose id cannot collide with one minted by any
    /// other node. Ids are `node` modulo `stride`, so `stride` must be at
    /// least the largest node ID in the cluster.
    pub fn new(counter: usize, stride: usize, node: usize, command: Command) -> Self {
        Operation {
            o_id: counter * stride + node,
            command,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "<{}> {}", self.o_id, self.command)
    }
}

impl FromStr for Operation {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ' ');
        let o_id = parts.next()
            .and_then(|id| id.strip_prefix('<'))
            .and_then(|id| id.strip_suffix('>'))
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ParseError::InvalidOperation(s.to_string()))?;
        let command = parts.next()
            .ok_or(ParseError::MissingField("command"))?
            .parse()?;
        Ok(Operation { o_id, command })
    }
}

/// Accepted proposal `(ballot, slot, command)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PValue {
    pub b_id: Ballot,
    pub s_id: usize,
    pub op: Operation,
}

impl fmt::Display for PValue {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{} {} {}", self.b_id, self.s_id, self.op)
    }
}

impl FromStr for PValue {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ' ');
        let b_id = parts.next().ok_or(ParseError::MissingField("ballot"))?.parse()?;
        let s_id = number("slot", parts.next())?;
        let op = parts.next().ok_or(ParseError::MissingField("operation"))?.parse()?;
        Ok(PValue { b_id, s_id, op })
    }
}

/// Slot assignment, sent replica to leader (`propose`) and leader to
/// replica (`decision`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Proposal {
    pub s_id: usize,
    pub op: Operation,
}

/// Phase one request from a scout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P1A {
    pub l_id: usize,
    pub b_id: Ballot,
}

/// Phase one response from an acceptor. `original` echoes the requested
/// ballot so the response can be routed to its scout; `b_id` is the
/// acceptor's current ballot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P1B {
    pub a_id: usize,
    pub original: Ballot,
    pub b_id: Ballot,
    pub pvalues: Vec<PValue>,
}

/// Phase two request from a commander.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P2A {
    pub l_id: usize,
    pub pvalue: PValue,
}

/// Phase two response from an acceptor. The proposal was accepted iff
/// `b_id == pvalue.b_id`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P2B {
    pub a_id: usize,
    pub b_id: Ballot,
    pub pvalue: PValue,
}

/// Node-to-node message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Node(usize),
    Ping,
    Pong,
    Propose { r_id: usize, proposal: Proposal },
    P1A(P1A),
    P1B(P1B),
    P2A(P2A),
    P2B(P2B),
    Decision(Proposal),
    SlotOut { r_id: usize, s_id: usize },
}

impl Message {
    /// Liveness and GC chatter, too frequent to log above trace level.
    pub fn is_heartbeat(&self) -> bool {
        match self {
        | Message::Ping | Message::Pong | Message::SlotOut { .. } => true,
        | _ => false,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
        | Message::Node(id) => write!(fmt, "node {}", id),
        | Message::Ping => write!(fmt, "ping"),
        | Message::Pong => write!(fmt, "pong"),
        | Message::Propose { r_id, proposal } => {
            write!(fmt, "propose {} {} {}", r_id, proposal.s_id, proposal.op)
        }
        | Message::P1A(p1a) => write!(fmt, "p1a {} {}", p1a.l_id, p1a.b_id),
        | Message::P1B(p1b) => {
            write!(fmt, "p1b {} {} {} ", p1b.a_id, p1b.original, p1b.b_id)?;
            for (i, pvalue) in p1b.pvalues.iter().enumerate() {
                if i > 0 { fmt.write_str(PVALUE_SEPARATOR)?; }
                write!(fmt, "{}", pvalue)?;
            }
            Ok(())
        }
        | Message::P2A(p2a) => write!(fmt, "p2a {} {}", p2a.l_id, p2a.pvalue),
        | Message::P2B(p2b) => write!(fmt, "p2b {} {} {}", p2b.a_id, p2b.b_id, p2b.pvalue),
        | Message::Decision(proposal) => write!(fmt, "decision {} {}", proposal.s_id, proposal.op),
        | Message::SlotOut { r_id, s_id } => write!(fmt, "slotOut {} {}", r_id, s_id),
        }
    }
}

impl FromStr for Message {
    type Err = ParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, ' ');
        let kind = parts.next().filter(|kind| !kind.is_empty()).ok_or(ParseError::Empty)?;
        let rest = parts.next().unwrap_or("");
        match kind {
        | "node" => Ok(Message::Node(number("id", Some(rest))?)),
        | "ping" => Ok(Message::Ping),
        | "pong" => Ok(Message::Pong),
        | "propose" => {
            let mut fields = rest.splitn(3, ' ');
            let r_id = number("from", fields.next())?;
            let s_id = number("slot", fields.next())?;
            let op = fields.next().ok_or(ParseError::MissingField("operation"))?.parse()?;
            Ok(Message::Propose { r_id, proposal: Proposal { s_id, op } })
        }
        | "p1a" => {
            let mut fields = rest.splitn(2, ' ');
            let l_id = number("from", fields.next())?;
            let b_id = fields.next().ok_or(ParseError::MissingField("ballot"))?.parse()?;
            Ok(Message::P1A(P1A { l_id, b_id }))
        }
        | "p1b" => {
            let mut fields = rest.splitn(4, ' ');
            let a_id = number("from", fields.next())?;
            let original = fields.next().ok_or(ParseError::MissingField("original"))?.parse()?;
            let b_id = fields.next().ok_or(ParseError::MissingField("ballot"))?.parse()?;
            let pvalues = fields.next()
                .unwrap_or("")
                .split(PVALUE_SEPARATOR)
                .filter(|pvalue| !pvalue.is_empty())
                .map(str::parse)
                .collect::<Result<_, _>>()?;
            Ok(Message::P1B(P1B { a_id, original, b_id, pvalues }))
        }
        | "p2a" => {
            let mut fields = rest.splitn(2, ' ');
            let l_id = number("from", fields.next())?;
            let pvalue = fields.next().ok_or(ParseError::MissingField("pvalue"))?.parse()?;
            Ok(Message::P2A(P2A { l_id, pvalue }))
        }
        | "p2b" => {
            let mut fields = rest.splitn(3, ' ');
            let a_id = number("from", fields.next())?;
            let b_id = fields.next().ok_or(ParseError::MissingField("ballot"))?.parse()?;
            let pvalue = fields.next().ok_or(ParseError::MissingField("pvalue"))?.parse()?;
            Ok(Message::P2B(P2B { a_id, b_id, pvalue }))
        }
        | "decision" => {
            let mut fields = rest.splitn(2, ' ');
            let s_id = number("slot", fields.next())?;
            let op = fields.next().ok_or(ParseError::MissingField("operation"))?.parse()?;
            Ok(Message::Decision(Proposal { s_id, op }))
        }
        | "slotOut" => {
            let mut fields = rest.splitn(2, ' ');
            let r_id = number("from", fields.next())?;
            let s_id = number("slot", fields.next())?;
            Ok(Message::SlotOut { r_id, s_id })
        }
        | other => Err(ParseError::UnknownMessage(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reencode(line: &str) -> String {
        line.parse::<Message>().unwrap().to_string()
    }

    #[test]
    fn ballots_order_by_round_then_leader() {
        assert!(Ballot::new(1, 5) < Ballot::new(2, 1));
        assert!(Ballot::new(2, 1) < Ballot::new(2, 3));
        assert_eq!(Ballot::new(4, 2), "4_2".parse().unwrap());
        assert!("4-2".parse::<Ballot>().is_err());
    }

    #[test]
    fn values_keep_their_spacing() {
        let line = "propose 12 34 <3> set aaa aaaaa  aa  aa";
        assert_eq!(reencode(line), line);
        match line.parse::<Message>().unwrap() {
        | Message::Propose { proposal, .. } => assert_eq!(
            proposal.op.command,
            Command::Set { key: "aaa".into(), value: "aaaaa  aa  aa".into() },
        ),
        | other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn p1b_carries_every_pvalue() {
        let line = format!(
            "p1b 345 333_15 23_4 1_2 2 <1> get a!!b{sep}3_123 4 <5> set a b c{sep}5_555 6 <33> delete a",
            sep = PVALUE_SEPARATOR,
        );
        assert_eq!(reencode(&line), line);
        match line.parse::<Message>().unwrap() {
        | Message::P1B(p1b) => {
            assert_eq!(p1b.original, Ballot::new(333, 15));
            assert_eq!(p1b.b_id, Ballot::new(23, 4));
            assert_eq!(p1b.pvalues.len(), 3);
            assert_eq!(p1b.pvalues[1].s_id, 4);
            assert_eq!(p1b.pvalues[1].op.command, Command::Set { key: "a".into(), value: "b c".into() });
        }
        | other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_p1b() {
        let message = Message::P1B(P1B {
            a_id: 1,
            original: Ballot::new(1, 1),
            b_id: Ballot::new(1, 1),
            pvalues: Vec::new(),
        });
        assert_eq!(message.to_string().parse::<Message>().unwrap(), message);
        assert_eq!("p1b 1 1_1 1_1".parse::<Message>().unwrap(), message);
    }

    #[test]
    fn other_messages() {
        for line in &[
            "node 5",
            "ping",
            "pong",
            "decision 5 <3> get abcAbc",
            "p1a 4 5_555",
            "p2a 3 4_123 5 <3333> delete abccc",
            "p2b 1 3_333 1_1 1 <24> get a",
            "slotOut 2 17",
        ] {
            assert_eq!(reencode(line), *line);
        }
    }

    #[test]
    fn unknown_messages_are_errors() {
        assert_eq!("".parse::<Message>(), Err(ParseError::Empty));
        assert_eq!(
            "hello 1".parse::<Message>(),
            Err(ParseError::UnknownMessage("hello".into())),
        );
        assert!("p1a 1".parse::<Message>().is_err());
        assert!("decision x <1> get a".parse::<Message>().is_err());
    }

    #[test]
    fn client_requests() {
        assert_eq!("ping".parse::<Request>().unwrap(), Request::Ping);
        assert_eq!(
            "get x".parse::<Request>().unwrap(),
            Request::Command(Command::Get { key: "x".into() }),
        );
        assert!("set x".parse::<Request>().is_err());
        assert!("get".parse::<Request>().is_err());
        assert!("put x 1".parse::<Request>().is_err());
    }

    #[test]
    fn operation_ids_are_disjoint_across_nodes() {
        let get = Command::Get { key: "k".into() };
        let ids = (1..=3)
            .flat_map(|node| (0..10).map(move |counter| (counter, node)))
            .map(|(counter, node)| Operation::new(counter, 3, node, get.clone()).o_id)
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(ids.len(), 30);
    }

    #[test]
    fn responses() {
        let value = Response::Value { key: "a".into(), value: "1 2".into() };
        assert_eq!(value.to_string(), "VALUE a 1 2");
        assert_eq!("VALUE a 1 2".parse::<Response>().unwrap(), value);
        assert_eq!("NOT_FOUND".parse::<Response>().unwrap(), Response::NotFound);
    }
}

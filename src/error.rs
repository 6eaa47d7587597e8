//! # Summary
//!
//! Error types shared across the crate. Parsing failures on the wire and in
//! the write-ahead log are reported as `ParseError`; everything a node can
//! fail on at runtime is folded into `Error`.

/// Failure to decode a line of the text protocol or the log.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,

    #[error("unknown message kind `{0}`")]
    UnknownMessage(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("invalid number in field `{field}`: {source}")]
    InvalidNumber {
        field: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid ballot `{0}`")]
    InvalidBallot(String),

    #[error("invalid operation descriptor `{0}`")]
    InvalidOperation(String),

    #[error("invalid client request `{0}`")]
    InvalidRequest(String),
}

/// Runtime errors surfaced by a node.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("malformed cluster file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parses an integer field, tagging failures with the field name.
pub(crate) fn number<T>(field: &'static str, s: Option<&str>) -> std::result::Result<T, ParseError>
where T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    s.ok_or(ParseError::MissingField(field))?
        .parse()
        .map_err(|source| ParseError::InvalidNumber { field, source })
}

use std::collections::TryReserveError;
use std::fmt;
use std::io;

use thiserror::Error;

use super::VertexToken;

/// Errors produced while building or synchronising a partitioned graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Reading an input or config file failed.
    #[error("IO: {0}")]
    Io(#[from] io::Error),
    /// A CSV record could not be read.
    #[error("CSV: {0}")]
    Csv(#[from] csv::Error),
    /// A config file did not decode.
    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
    /// Growing a container failed.
    #[error("allocation of {requested} slots failed")]
    BadAlloc {
        /// Slots the failed allocation asked for.
        requested: usize,
    },
    /// A record tag the format does not define.
    #[error("unrecognized record type {tag:?}")]
    UnknownRecordType {
        /// The tag as read.
        tag: String,
    },
    /// A record with the wrong shape or an unparsable field.
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    /// An edge endpoint without a vertex record under the reject policy.
    #[error("edge references undeclared vertex {0}")]
    UndeclaredVertex(VertexToken),
    /// A record-level failure with its position.
    #[error("{0}")]
    Line(Box<LineError>),
    /// An argument or option out of range.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The log subscriber could not be installed.
    #[error("logging: {0}")]
    Logging(String),
    /// A runtime task panicked.
    #[error("task {task} panicked")]
    TaskPanicked {
        /// Name of the task.
        task: String,
    },
    /// An internal invariant did not hold.
    #[error("corruption: {0}")]
    Corruption(&'static str),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, GraphError>;

/// A record-level failure tagged with where it was read from.
///
/// Workers read byte-striped segments, so the position is the byte offset of
/// the line start rather than a line number.
#[derive(Debug)]
pub struct LineError {
    /// Input the record came from.
    pub source_name: String,
    /// Byte offset of the line start.
    pub offset: u64,
    /// The failure itself.
    pub error: GraphError,
}

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}: {}", self.source_name, self.offset, self.error)
    }
}

impl GraphError {
    pub(crate) fn at_offset(self, source_name: &str, offset: u64) -> Self {
        GraphError::Line(Box::new(LineError {
            source_name: source_name.to_owned(),
            offset,
            error: self,
        }))
    }

    pub(crate) fn bad_alloc(requested: usize) -> impl FnOnce(TryReserveError) -> GraphError {
        move |_| GraphError::BadAlloc { requested }
    }

    /// True for failures scoped to a single input record.
    pub fn is_record_level(&self) -> bool {
        match self {
            GraphError::UnknownRecordType { .. }
            | GraphError::MalformedRecord(_)
            | GraphError::Csv(_) => true,
            GraphError::Line(inner) => inner.error.is_record_level(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_errors_keep_record_classification() {
        let err = GraphError::UnknownRecordType { tag: "Nope".into() }.at_offset("input.csv", 4);
        assert!(err.is_record_level());
        assert_eq!(
            err.to_string(),
            "input.csv@4: unrecognized record type \"Nope\""
        );
        assert!(!GraphError::Invalid("x").is_record_level());
    }

    #[test]
    fn csv_failures_are_record_level() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader("not-a-number\n".as_bytes());
        let failure = reader
            .deserialize::<u64>()
            .next()
            .and_then(|row| row.err())
            .expect("deserialize error");
        let err: GraphError = failure.into();
        assert!(matches!(err, GraphError::Csv(_)));
        assert!(err.at_offset("data.csv", 0).is_record_level());
    }
}

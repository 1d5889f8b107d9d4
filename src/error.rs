use thiserror::Error;

/// Errors that can cross the boundary of the consensus core.
///
/// Protocol and transport errors (malformed RPC payloads, connection
/// failures) never reach this type: per the error taxonomy, those are
/// logged and dropped inside the orchestrator. Everything that does
/// surface here is either a durability failure or a programming-error
/// invariant violation, both of which are fatal for the node process.
#[derive(Error, Debug)]
pub enum RaftError {
    #[error("failed to read persisted state from {path}: {source}")]
    PersistenceRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write persisted state to {path}: {source}")]
    PersistenceWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode/decode persisted state: {0}")]
    Codec(#[from] bincode::Error),

    #[error("raft invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, RaftError>;

//! The verifiable-log backend the hub delegates storage and proofs to.
//!
//! The hub never builds Merkle trees itself. Every operation it serves is
//! forwarded to a [`LogBackend`], which is trusted to sequence leaves and to
//! compute proofs. The hub only checks that responses respect the contract
//! described on each method.

use async_trait::async_trait;
use std::fmt;

pub mod memory;

pub use memory::MemoryBackend;

/// RPC failure category reported by a backend.
///
/// These mirror the canonical gRPC status codes so that a network backend can
/// pass its status through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Code::Ok => "OK",
            Code::Cancelled => "Canceled",
            Code::Unknown => "Unknown",
            Code::InvalidArgument => "InvalidArgument",
            Code::DeadlineExceeded => "DeadlineExceeded",
            Code::NotFound => "NotFound",
            Code::AlreadyExists => "AlreadyExists",
            Code::PermissionDenied => "PermissionDenied",
            Code::ResourceExhausted => "ResourceExhausted",
            Code::FailedPrecondition => "FailedPrecondition",
            Code::Aborted => "Aborted",
            Code::OutOfRange => "OutOfRange",
            Code::Unimplemented => "Unimplemented",
            Code::Internal => "Internal",
            Code::Unavailable => "Unavailable",
            Code::DataLoss => "DataLoss",
            Code::Unauthenticated => "Unauthenticated",
        };
        f.write_str(name)
    }
}

/// Failure returned by a backend call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// The backend answered with an RPC status.
    #[error("rpc error: code = {code} desc = {message}")]
    Status {
        /// Failure category
        code: Code,
        /// Backend supplied detail
        message: String,
    },
    /// The call failed without any RPC status, e.g. a broken connection.
    #[error("{0}")]
    Transport(String),
}

impl BackendError {
    /// Creates a status error with the given category.
    pub fn status(code: Code, message: impl Into<String>) -> Self {
        Self::Status {
            code,
            message: message.into(),
        }
    }

    /// Returns the RPC failure category, if the error carries one.
    #[must_use]
    pub const fn code(&self) -> Option<Code> {
        match self {
            Self::Status { code, .. } => Some(*code),
            Self::Transport(_) => None,
        }
    }
}

/// A backend-issued commitment to its own log state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedLogRoot {
    /// Opaque serialized log root
    pub log_root: Vec<u8>,
    /// Backend signature over `log_root`
    pub log_root_signature: Vec<u8>,
    /// Tree size the root commits to
    pub tree_size: u64,
}

/// A leaf as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLeaf {
    /// Index assigned by the backend when the leaf was sequenced
    pub leaf_index: u64,
    /// Opaque leaf payload (the canonical hub leaf encoding)
    pub leaf_value: Vec<u8>,
    /// Identity hash used for deduplication
    pub leaf_identity_hash: Vec<u8>,
    /// RFC 6962 leaf hash of `leaf_value`
    pub merkle_leaf_hash: Vec<u8>,
}

/// Result of queueing a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The leaf was new and has been queued for sequencing
    Accepted,
    /// A leaf with the same identity hash already exists
    Duplicate,
}

/// An ordered hash path, optionally anchored at a leaf index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proof {
    /// Leaf index the proof is for (zero for consistency proofs)
    pub leaf_index: u64,
    /// Hash nodes in proof order
    pub hashes: Vec<Vec<u8>>,
}

/// Response to [`LogBackend::get_consistency_proof`].
#[derive(Debug, Clone, Default)]
pub struct ConsistencyProofResponse {
    pub proof: Option<Proof>,
    pub signed_log_root: Option<SignedLogRoot>,
}

/// Response to [`LogBackend::get_inclusion_proof_by_hash`].
#[derive(Debug, Clone, Default)]
pub struct InclusionProofResponse {
    /// One proof per occurrence of the leaf hash, ordered by leaf index
    pub proofs: Vec<Proof>,
    pub signed_log_root: Option<SignedLogRoot>,
}

/// Response to [`LogBackend::get_leaves_by_range`].
#[derive(Debug, Clone, Default)]
pub struct LeavesByRangeResponse {
    /// Leaves in index order. A `None` slot is a leaf the backend failed to
    /// materialise.
    pub leaves: Vec<Option<LogLeaf>>,
    pub signed_log_root: Option<SignedLogRoot>,
    /// Set when the backend revised its tree size while serving the read
    pub revised_tree_size: Option<u64>,
}

/// The five operations the hub needs from a verifiable-log backend.
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Queues a leaf for sequencing. Leaves are deduplicated on
    /// `identity_hash`; a duplicate is not an error.
    async fn append_leaf(
        &self,
        log_id: i64,
        leaf_value: Vec<u8>,
        identity_hash: Vec<u8>,
    ) -> Result<AppendOutcome, BackendError>;

    /// Returns the latest signed head of the log.
    async fn get_latest_signed_log_root(
        &self,
        log_id: i64,
    ) -> Result<Option<SignedLogRoot>, BackendError>;

    /// Proves that `second` is an append-only extension of `first`.
    async fn get_consistency_proof(
        &self,
        log_id: i64,
        first: u64,
        second: u64,
    ) -> Result<ConsistencyProofResponse, BackendError>;

    /// Proves inclusion of the leaf with Merkle hash `leaf_hash` in the tree of
    /// size `tree_size`.
    async fn get_inclusion_proof_by_hash(
        &self,
        log_id: i64,
        leaf_hash: &[u8],
        tree_size: u64,
        order_by_sequence: bool,
    ) -> Result<InclusionProofResponse, BackendError>;

    /// Reads up to `count` leaves starting at `start`.
    async fn get_leaves_by_range(
        &self,
        log_id: i64,
        start: u64,
        count: u64,
    ) -> Result<LeavesByRangeResponse, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_exposes_code() {
        let err = BackendError::status(Code::Unavailable, "backend down");
        assert_eq!(err.code(), Some(Code::Unavailable));
        assert_eq!(err.to_string(), "rpc error: code = Unavailable desc = backend down");
    }

    #[test]
    fn test_transport_error_has_no_code() {
        let err = BackendError::Transport("connection reset".to_string());
        assert_eq!(err.code(), None);
    }
}

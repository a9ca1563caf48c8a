use plateau_primitives::{NodeId, SubnetId};
use thiserror::Error;

use crate::kv::KvError;

/// Errors surfaced by the staker store.
///
/// Every variant is returned to the caller without logging or retries; only
/// the caller knows whether the block being processed is still worth the
/// effort. `Backend` can only come out of `commit` and the rebuild path,
/// everything else is deterministic and in-memory.
#[derive(Debug, Error)]
pub enum StateError {
    /// Point lookup, update or delete against an identity the effective
    /// view does not contain.
    #[error("staker not found")]
    NotFound,

    /// Put of an identity already present in the effective view.
    #[error("staker already present")]
    Duplicate,

    /// Schema violation on the record itself.
    #[error("invalid staker: {0}")]
    InvalidStaker(String),

    /// A delegator references a validator that does not exist in its
    /// category (current or pending).
    #[error("no validator for subnet {subnet} node {node}")]
    MissingValidator { subnet: SubnetId, node: NodeId },

    /// Persisted data failed to deserialize or broke a stored invariant.
    #[error("corrupted state: {0}")]
    Corruption(String),

    /// Underlying key-value store failure. Transient vs. permanent is
    /// conveyed by the nested cause.
    #[error("backend error")]
    Backend(#[from] KvError),

    /// Commit or rebuild was cancelled before the batch was handed to the
    /// backend; in-memory state is untouched.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, StateError>;

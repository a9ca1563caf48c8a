//! Signed transaction payloads stored alongside the stakers.
//!
//! The store treats the payload as opaque bytes; only the id (a digest of
//! the payload) and the acceptance status matter to it.

use serde::{Deserialize, Serialize};

use plateau_primitives::TxId;

/// Acceptance status of a stored transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Committed,
    Aborted,
    Processing,
}

/// A signed submission payload keyed by the digest of its bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTx {
    tx_id: TxId,
    payload: Vec<u8>,
}

impl SignedTx {
    pub fn from_payload(payload: Vec<u8>) -> Self {
        Self {
            tx_id: TxId::digest(&payload),
            payload,
        }
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// A transaction together with its status, the unit the base state persists.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTx {
    pub tx: SignedTx,
    pub status: TxStatus,
}

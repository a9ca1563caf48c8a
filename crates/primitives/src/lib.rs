//! # Plateau Primitives
//!
//! Fixed-size opaque identifiers used across the platform chain:
//! transaction ids, node ids, subnet ids and block ids. All of them render
//! as hex strings, parse back from hex, and serialize as hex through serde
//! so persisted records and JSON surfaces agree on one representation.

pub mod ids;

pub use ids::{BlockId, NodeId, SubnetId, TxId};

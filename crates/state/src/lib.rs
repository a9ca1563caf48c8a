//! # Plateau State
//!
//! Layered staker state store for the platform chain. The store records
//! the validators and delegators that are active now ("current") or
//! scheduled to activate ("pending"), on the primary network and on
//! subnets.
//!
//! Block processing builds speculative state on top of the accepted base
//! without persisting anything until the block is accepted: an
//! arbitrary-depth stack of [`diff::Diff`] layers sits over the durable
//! [`BaseState`], so block production and verification can fork, update,
//! discard and commit staker views cheaply.
//!
//! | Module | What it holds |
//! |--------|---------------|
//! | `staker` | The staker record, priorities, ordering, in-place transforms |
//! | `indexes` | Ordered and associative containers behind one category |
//! | `model` | In-memory reference model, the oracle of the property tests |
//! | `kv` | KV trait, in-memory and LMDB backends, versioned batch overlay |
//! | `base` | Durable base state: persisted layout, commit protocol |
//! | `diff` | Pending-change overlay with tombstones and shadowing |
//! | `iterator` | Ordered merge over a stack of staker streams |
//! | `versions` | Layer handles and the diff-stack controller |
//! | `tx` | Opaque signed transactions and their status |
//! | `config` / `reward` | Static construction parameters, reward credentials |
//!
//! Mutations enter through the topmost diff (or the base when no diff
//! exists); reads walk diffs top-down until a record or a tombstone is
//! found, falling through to the base; commit collapses the bottommost
//! diff into the base and persists it atomically.

pub mod base;
pub mod cancel;
pub mod config;
pub mod diff;
pub mod errors;
mod indexes;
pub mod iterator;
pub mod kv;
pub mod model;
pub mod reward;
pub mod staker;
pub mod tx;
pub mod versions;

pub use base::BaseState;
pub use cancel::CancelToken;
pub use config::{RewardConfig, StakingConfig};
pub use errors::{Result, StateError};
pub use iterator::StakerIterator;
pub use kv::{KvStore, LmdbKv, MemoryKv};
pub use model::StakersModel;
pub use reward::{ConsumptionRateCalculator, RewardCalculator};
pub use staker::{Priority, Staker, StakerKey};
pub use tx::{SignedTx, StoredTx, TxStatus};
pub use versions::{Layer, LayeredState};

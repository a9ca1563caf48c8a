use std::fmt;
use std::str::FromStr;

use hex::{decode as hex_decode, encode as hex_encode};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Sha3_256};

/// Error returned when an identifier cannot be parsed from hex.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdParseError {
    kind: &'static str,
    detail: String,
}

impl IdParseError {
    fn new(kind: &'static str, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for IdParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for IdParseError {}

macro_rules! impl_id_common {
    ($name:ident, $len:expr, $label:expr) => {
        impl $name {
            pub const LEN: usize = $len;

            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                $name(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex_encode(self.0)
            }

            pub fn from_hex(s: &str) -> Result<Self, IdParseError> {
                let s = s.strip_prefix("0x").unwrap_or(s);
                let bytes =
                    hex_decode(s).map_err(|e| IdParseError::new($label, e.to_string()))?;
                if bytes.len() != $len {
                    return Err(IdParseError::new(
                        $label,
                        format!("expected {} bytes, got {}", $len, bytes.len()),
                    ));
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&bytes);
                Ok($name(arr))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.to_hex()).finish()
            }
        }

        impl FromStr for $name {
            type Err = IdParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::from_hex(s)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                $name::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

/// Transaction identifier, the primary key of every staker record.
///
/// Derived as the SHA3-256 digest of the signed transaction payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxId(pub [u8; 32]);

impl_id_common!(TxId, 32, "transaction id");

impl TxId {
    /// Digest arbitrary payload bytes into a transaction id.
    pub fn digest(payload: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(payload);
        TxId(hasher.finalize().into())
    }
}

/// Node identifier (160-bit), naming the machine a validator runs on.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(pub [u8; 20]);

impl_id_common!(NodeId, 20, "node id");

/// Subnet identifier. The all-zero value names the primary network.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SubnetId(pub [u8; 32]);

impl_id_common!(SubnetId, 32, "subnet id");

impl SubnetId {
    /// The distinguished subnet every validator of the platform belongs to.
    pub const PRIMARY_NETWORK: SubnetId = SubnetId([0u8; 32]);

    pub fn is_primary_network(&self) -> bool {
        *self == Self::PRIMARY_NETWORK
    }
}

/// Block identifier used to name diff layers and the last accepted block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockId(pub [u8; 32]);

impl_id_common!(BlockId, 32, "block id");

impl BlockId {
    /// Sentinel id of the empty chain, before any block was accepted.
    pub const EMPTY: BlockId = BlockId([0u8; 32]);

    /// Deterministically derive a fresh block id from a seed counter.
    pub fn derived(seed: u64) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(b"plateau/block");
        hasher.update(seed.to_be_bytes());
        BlockId(hasher.finalize().into())
    }
}

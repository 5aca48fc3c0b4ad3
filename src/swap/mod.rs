//! Swap data model
//!
//! Defines:
//! - Swap and order identifiers
//! - The swap request blob (with its in-memory-only password)
//! - Settlement receipts and their incremental updates
//! - Verified order matches

mod receipt;
mod token;

pub use receipt::{Cost, ReceiptUpdate, SwapReceipt, SwapStatus};
pub use token::Token;

use crate::error::{SwapResult, SwapdError};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Identifier of one swap, carried as its base64 encoding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapId(String);

impl SwapId {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    /// Encode raw id bytes
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(STANDARD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode to the raw bytes used as the storage key suffix
    pub fn to_bytes(&self) -> SwapResult<Vec<u8>> {
        let bytes = STANDARD
            .decode(&self.0)
            .map_err(|e| SwapdError::InvalidSwapId {
                id: self.0.clone(),
                reason: e.to_string(),
            })?;

        if bytes.is_empty() {
            return Err(SwapdError::InvalidSwapId {
                id: self.0.clone(),
                reason: "empty id".to_string(),
            });
        }

        Ok(bytes)
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Order identifier on the matching ledger
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OrderId(pub [u8; 32]);

impl OrderId {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OrderId({})", self)
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for OrderId {
    type Err = SwapdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stripped = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(stripped).map_err(|e| SwapdError::InvalidOrderId {
            id: s.to_string(),
            reason: e.to_string(),
        })?;
        let id: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| SwapdError::InvalidOrderId {
            id: s.to_string(),
            reason: format!("expected 32 bytes, got {}", b.len()),
        })?;
        Ok(Self(id))
    }
}

impl Serialize for OrderId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ephemeral password unlocking signing material; only ever held in memory
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("Password(<empty>)")
        } else {
            f.write_str("Password(<redacted>)")
        }
    }
}

/// Execution discipline a swap is dispatched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Delayed,
    Immediate,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Delayed => "delayed",
            StrategyKind::Immediate => "immediate",
        }
    }
}

/// Full request for one swap
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapBlob {
    pub id: SwapId,
    pub send_token: Token,
    pub receive_token: Token,
    /// Exact decimal amount in the send token's smallest unit
    pub send_amount: String,
    /// Exact decimal amount in the receive token's smallest unit
    pub receive_amount: String,
    /// Counter-party address receiving the sent funds
    pub send_to: String,
    /// Counter-party address the received funds come from
    pub receive_from: String,
    /// Unix timestamp after which the swap is refunded
    pub time_lock: i64,
    pub secret_hash: String,
    pub should_initiate_first: bool,
    /// Classification fixed at submission: delayed swaps wait on the matching ledger
    #[serde(default)]
    pub delay: bool,
    /// Own order on the matching ledger, if the swap came from a match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub password: Password,
}

impl SwapBlob {
    pub fn strategy(&self) -> StrategyKind {
        if self.delay {
            StrategyKind::Delayed
        } else {
            StrategyKind::Immediate
        }
    }

    /// Copy of the blob safe to persist
    pub fn redacted(&self) -> SwapBlob {
        let mut blob = self.clone();
        blob.password.clear();
        blob
    }
}

/// Verified, settled pairing of the local order with a counter-party order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub personal_order_id: OrderId,
    pub foreign_order_id: OrderId,
    pub send_token: Token,
    pub receive_token: Token,
    pub send_value: String,
    pub receive_value: String,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_id_decodes_deterministically() {
        let id = SwapId::from_bytes(&[7u8; 32]);
        assert_eq!(id.to_bytes().unwrap(), vec![7u8; 32]);
        assert_eq!(id.to_bytes().unwrap(), id.to_bytes().unwrap());
        assert_ne!(
            SwapId::from_bytes(&[1, 2]).to_bytes().unwrap(),
            SwapId::from_bytes(&[1, 2, 0]).to_bytes().unwrap()
        );
    }

    #[test]
    fn test_swap_id_rejects_bad_encoding() {
        assert!(SwapId::new("not base64!").to_bytes().is_err());
        assert!(SwapId::new("").to_bytes().is_err());
    }

    #[test]
    fn test_order_id_hex_serde() {
        let id = OrderId([0xab; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"0x{}\"", "ab".repeat(32)));
        assert_eq!(serde_json::from_str::<OrderId>(&json).unwrap(), id);
        assert!("0x1234".parse::<OrderId>().is_err());
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let blob = fixtures::blob(3, false);
        let debug = format!("{:?}", blob);
        assert!(!debug.contains("hunter3"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_redacted_blob_drops_only_password() {
        let blob = fixtures::blob(4, true);
        let redacted = blob.redacted();
        assert!(redacted.password.is_empty());
        assert_eq!(
            SwapBlob {
                password: blob.password.clone(),
                ..redacted
            },
            blob
        );
    }

    #[test]
    fn test_strategy_follows_delay_flag() {
        assert_eq!(fixtures::blob(1, true).strategy(), StrategyKind::Delayed);
        assert_eq!(fixtures::blob(1, false).strategy(), StrategyKind::Immediate);
    }
}

//! Persistent swap storage
//!
//! Handles:
//! - Full swap records (permanent history)
//! - The in-flight index of swaps awaiting completion
//! - Settlement receipts
//!
//! All three share one ordered key space. Every key is a fixed-width namespace
//! prefix followed by the decoded swap id, so a namespace is one contiguous key
//! range.

pub(crate) mod sqlite;

pub use sqlite::SqliteSwapStore;

use crate::error::SwapResult;
use crate::swap::{Cost, ReceiptUpdate, SwapBlob, SwapId, SwapReceipt};

use async_trait::async_trait;

/// Storage interface consumed by the orchestrator and the outer layers.
///
/// Every call is atomic on its own; nothing spans two calls.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapStore: Send + Sync {
    /// Persist a swap without its password, both as history and as in-flight
    async fn put_swap(&self, blob: &SwapBlob) -> SwapResult<()>;

    /// Full record from the permanent history
    async fn swap(&self, id: &SwapId) -> SwapResult<SwapBlob>;

    async fn swaps(&self) -> SwapResult<Vec<SwapBlob>>;

    /// Drop a swap from the in-flight index, keeping its history
    async fn delete_pending_swap(&self, id: &SwapId) -> SwapResult<()>;

    async fn pending_swap(&self, id: &SwapId) -> SwapResult<SwapBlob>;

    /// Every in-flight swap in key order; one malformed record fails the scan
    async fn pending_swaps(&self) -> SwapResult<Vec<SwapBlob>>;

    async fn put_receipt(&self, receipt: &SwapReceipt) -> SwapResult<()>;

    /// Apply a partial delta to an existing receipt
    async fn update_receipt(&self, update: &ReceiptUpdate) -> SwapResult<()>;

    async fn receipt(&self, id: &SwapId) -> SwapResult<SwapReceipt>;

    async fn receipts(&self) -> SwapResult<Vec<SwapReceipt>>;

    /// Accumulated (send, receive) costs; zero when the swap has no receipt
    async fn load_costs(&self, id: &SwapId) -> SwapResult<(Cost, Cost)>;
}

/// Key namespaces of the swap store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Swaps,
    PendingSwaps,
    Receipts,
}

impl Namespace {
    pub const PREFIX_LEN: usize = 8;

    pub fn prefix(&self) -> [u8; Self::PREFIX_LEN] {
        let tag = match self {
            Namespace::Swaps => 0x00,
            Namespace::PendingSwaps => 0x01,
            Namespace::Receipts => 0x02,
        };
        let mut prefix = [0u8; Self::PREFIX_LEN];
        prefix[Self::PREFIX_LEN - 1] = tag;
        prefix
    }

    pub fn name(&self) -> &'static str {
        match self {
            Namespace::Swaps => "swap",
            Namespace::PendingSwaps => "pending swap",
            Namespace::Receipts => "receipt",
        }
    }

    /// Storage key of a swap in this namespace
    pub fn key(&self, id: &SwapId) -> SwapResult<Vec<u8>> {
        let mut key = self.prefix().to_vec();
        key.extend_from_slice(&id.to_bytes()?);
        Ok(key)
    }

    /// Half-open key range `[prefix, successor(prefix))` covering the namespace
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        let start = self.prefix();
        let mut end = start;
        for byte in end.iter_mut().rev() {
            if *byte == 0xFF {
                *byte = 0x00;
            } else {
                *byte += 1;
                break;
            }
        }
        (start.to_vec(), end.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_ranges_are_disjoint_and_ordered() {
        let namespaces = [Namespace::Swaps, Namespace::PendingSwaps, Namespace::Receipts];
        for pair in namespaces.windows(2) {
            let (_, end) = pair[0].range();
            let (start, _) = pair[1].range();
            assert!(end <= start);
        }
    }

    #[test]
    fn test_keys_fall_inside_their_range() {
        let ids = [
            SwapId::from_bytes(&[0x00; 32]),
            SwapId::from_bytes(&[0xFF; 32]),
            SwapId::from_bytes(&[0xFF; 64]),
        ];
        for namespace in [Namespace::Swaps, Namespace::PendingSwaps, Namespace::Receipts] {
            let (start, end) = namespace.range();
            for id in &ids {
                let key = namespace.key(id).unwrap();
                assert!(key >= start && key < end, "{:?} key escapes range", namespace);
            }
        }
    }

    #[test]
    fn test_key_layout() {
        let key = Namespace::Receipts.key(&SwapId::from_bytes(&[9, 9])).unwrap();
        assert_eq!(key, vec![0, 0, 0, 0, 0, 0, 0, 2, 9, 9]);
    }
}

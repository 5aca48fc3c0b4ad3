//! Settlement receipts and their incremental updates

use super::{Match, SwapBlob, SwapId, Token};
use crate::error::{SwapResult, SwapdError};

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a swap as recorded on its receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    #[default]
    Inactive,
    Matched,
    Initiated,
    Audited,
    AuditFailed,
    Redeemed,
    Refunded,
    Expired,
    Cancelled,
}

impl SwapStatus {
    /// Whether the swap has concluded on both chains
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Redeemed | SwapStatus::Refunded | SwapStatus::Expired | SwapStatus::Cancelled
        )
    }
}

/// Fees paid per token, in each token's smallest unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cost(BTreeMap<Token, U256>);

impl Cost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, token: Token, amount: U256) -> Self {
        self.0.insert(token, amount);
        self
    }

    pub fn get(&self, token: Token) -> U256 {
        self.0.get(&token).copied().unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Token, &U256)> {
        self.0.iter()
    }

    /// Accumulate another cost into this one
    pub fn add(&mut self, other: &Cost) -> SwapResult<()> {
        for (token, amount) in other.iter() {
            let entry = self.0.entry(*token).or_default();
            *entry = entry
                .checked_add(*amount)
                .ok_or(SwapdError::AmountOverflow("swap cost"))?;
        }
        Ok(())
    }
}

/// Mutable record of a swap's execution progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapReceipt {
    pub id: SwapId,
    pub send_token: Token,
    pub receive_token: Token,
    pub send_amount: String,
    pub receive_amount: String,
    pub send_cost: Cost,
    pub receive_cost: Cost,
    pub delay: bool,
    pub status: SwapStatus,
    pub time_lock: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_match: Option<Match>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapReceipt {
    /// Fresh receipt for a newly submitted swap
    pub fn new(blob: &SwapBlob, now: DateTime<Utc>) -> Self {
        Self {
            id: blob.id.clone(),
            send_token: blob.send_token,
            receive_token: blob.receive_token,
            send_amount: blob.send_amount.clone(),
            receive_amount: blob.receive_amount.clone(),
            send_cost: Cost::new(),
            receive_cost: Cost::new(),
            delay: blob.delay,
            status: SwapStatus::Inactive,
            time_lock: blob.time_lock,
            order_match: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update applied to one receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptUpdate {
    pub id: SwapId,
    pub status: Option<SwapStatus>,
    /// Added to the running send-side total
    pub send_cost: Option<Cost>,
    /// Added to the running receive-side total
    pub receive_cost: Option<Cost>,
    pub order_match: Option<Match>,
}

impl ReceiptUpdate {
    pub fn new(id: SwapId) -> Self {
        Self {
            id,
            status: None,
            send_cost: None,
            receive_cost: None,
            order_match: None,
        }
    }

    pub fn with_status(mut self, status: SwapStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_match(mut self, order_match: Match) -> Self {
        self.order_match = Some(order_match);
        self
    }

    /// Apply the delta; fields left unset are untouched
    pub fn apply(&self, receipt: &mut SwapReceipt, now: DateTime<Utc>) -> SwapResult<()> {
        if let Some(status) = self.status {
            receipt.status = status;
        }
        if let Some(cost) = &self.send_cost {
            receipt.send_cost.add(cost)?;
        }
        if let Some(cost) = &self.receive_cost {
            receipt.receive_cost.add(cost)?;
        }
        if let Some(order_match) = &self.order_match {
            receipt.order_match = Some(order_match.clone());
        }
        receipt.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swap::fixtures;

    #[test]
    fn test_update_touches_only_set_fields() {
        let blob = fixtures::blob(1, false);
        let created = Utc::now();
        let mut receipt = SwapReceipt::new(&blob, created);
        let before = receipt.clone();

        let later = created + chrono::Duration::seconds(5);
        ReceiptUpdate::new(blob.id.clone())
            .with_status(SwapStatus::Initiated)
            .apply(&mut receipt, later)
            .unwrap();

        assert_eq!(receipt.status, SwapStatus::Initiated);
        assert_eq!(receipt.send_cost, before.send_cost);
        assert_eq!(receipt.send_amount, before.send_amount);
        assert_eq!(receipt.created_at, created);
        assert_eq!(receipt.updated_at, later);
    }

    #[test]
    fn test_costs_accumulate() {
        let blob = fixtures::blob(2, false);
        let mut receipt = SwapReceipt::new(&blob, Utc::now());

        let fee = Cost::new().with(Token::Eth, U256::from(21_000u64));
        for _ in 0..3 {
            ReceiptUpdate {
                send_cost: Some(fee.clone()),
                ..ReceiptUpdate::new(blob.id.clone())
            }
            .apply(&mut receipt, Utc::now())
            .unwrap();
        }
        ReceiptUpdate {
            receive_cost: Some(Cost::new().with(Token::Btc, U256::from(3_000u64))),
            ..ReceiptUpdate::new(blob.id.clone())
        }
        .apply(&mut receipt, Utc::now())
        .unwrap();

        assert_eq!(receipt.send_cost.get(Token::Eth), U256::from(63_000u64));
        assert_eq!(receipt.receive_cost.get(Token::Btc), U256::from(3_000u64));
        assert_eq!(receipt.receive_cost.get(Token::Eth), U256::zero());
    }

    #[test]
    fn test_cost_overflow_is_an_error() {
        let mut cost = Cost::new().with(Token::Eth, U256::MAX);
        let err = cost.add(&Cost::new().with(Token::Eth, U256::one()));
        assert!(matches!(err, Err(SwapdError::AmountOverflow(_))));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SwapStatus::Refunded.is_terminal());
        assert!(SwapStatus::Expired.is_terminal());
        assert!(!SwapStatus::Matched.is_terminal());
    }
}

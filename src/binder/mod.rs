//! Match verification
//!
//! The binder confirms, against the order-matching ledger, that an order was
//! submitted by an authorized trader and has settled against a counter-party.
//! Both checks poll until they succeed or the caller's deadline passes.

mod ledger;

pub use ledger::EthLedger;

use crate::error::{SwapResult, SwapdError};
use crate::swap::{Match, OrderId, Token};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Default backoff between ledger polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Match state of one order as reported by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchDetails {
    pub settled: bool,
    /// Whether the local order sits on the priority side of the match
    pub order_is_buy: bool,
    pub matched_id: OrderId,
    pub priority_volume: U256,
    pub secondary_volume: U256,
    pub priority_fee: U256,
    pub secondary_fee: U256,
    pub priority_token: u32,
    pub secondary_token: u32,
}

/// Read access to the order-matching ledger
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Address that submitted the order; zero while unknown
    async fn order_trader(&self, order_id: OrderId) -> SwapResult<Address>;

    async fn match_details(&self, order_id: OrderId) -> SwapResult<MatchDetails>;
}

/// Stateless retry wrapper around a [`Ledger`]
pub struct Binder {
    ledger: Arc<dyn Ledger>,
    authorized: HashSet<Address>,
    poll_interval: Duration,
}

impl Binder {
    /// Create a new binder. Authorized addresses are hex, compared case-insensitively.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        authorized: &[String],
        poll_interval: Duration,
    ) -> SwapResult<Self> {
        let authorized = authorized
            .iter()
            .map(|addr| {
                Address::from_str(addr.trim()).map_err(|e| {
                    SwapdError::Config(format!("Invalid authorized address {}: {}", addr, e))
                })
            })
            .collect::<SwapResult<HashSet<_>>>()?;

        Ok(Self {
            ledger,
            authorized,
            poll_interval,
        })
    }

    /// Wait until `order_id` is authorized and settled, then derive its match
    pub async fn get_order_match(
        &self,
        order_id: OrderId,
        deadline: DateTime<Utc>,
    ) -> SwapResult<Match> {
        let trader = self.wait_for_authorization(order_id, deadline).await?;
        debug!("Order {} authorized for trader {:?}", order_id, trader);

        let details = self.wait_for_settlement(order_id, deadline).await?;
        let order_match = derive_match(order_id, &details)?;

        info!(
            "Order {} matched with {}",
            order_id.to_base64(),
            details.matched_id.to_base64()
        );
        Ok(order_match)
    }

    async fn wait_for_authorization(
        &self,
        order_id: OrderId,
        deadline: DateTime<Utc>,
    ) -> SwapResult<Address> {
        loop {
            check_deadline(order_id, deadline)?;
            crate::metrics::record_binder_poll("authorization");

            match self.ledger.order_trader(order_id).await {
                Ok(trader) if trader == Address::zero() => {
                    debug!("Order {} has no trader yet", order_id);
                }
                Ok(trader) if self.authorized.contains(&trader) => return Ok(trader),
                Ok(trader) => {
                    // Not fatal: keep polling until the deadline
                    info!("Order {} submitted by unauthorized trader {:?}", order_id, trader);
                }
                Err(e) => debug!("Trader lookup for order {} failed: {}", order_id, e),
            }

            self.backoff(deadline).await;
        }
    }

    async fn wait_for_settlement(
        &self,
        order_id: OrderId,
        deadline: DateTime<Utc>,
    ) -> SwapResult<MatchDetails> {
        loop {
            check_deadline(order_id, deadline)?;
            crate::metrics::record_binder_poll("match");

            match self.ledger.match_details(order_id).await {
                Ok(details) if details.settled => return Ok(details),
                Ok(_) => debug!("Order {} not settled yet", order_id),
                Err(e) => debug!("Match lookup for order {} failed: {}", order_id, e),
            }

            self.backoff(deadline).await;
        }
    }

    /// Sleep one poll interval, never past the deadline
    async fn backoff(&self, deadline: DateTime<Utc>) {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(self.poll_interval.min(remaining)).await;
    }
}

fn check_deadline(order_id: OrderId, deadline: DateTime<Utc>) -> SwapResult<()> {
    if Utc::now() > deadline {
        crate::metrics::record_binder_timeout();
        return Err(SwapdError::Timeout {
            operation: format!("match of order {}", order_id),
        });
    }
    Ok(())
}

/// Send and receive legs of a settled match, seen from the local order
fn derive_match(order_id: OrderId, details: &MatchDetails) -> SwapResult<Match> {
    let priority_token = Token::from_code(details.priority_token)?;
    let secondary_token = Token::from_code(details.secondary_token)?;

    let priority_value = details
        .priority_volume
        .checked_add(details.priority_fee)
        .ok_or(SwapdError::AmountOverflow("priority leg"))?;
    let secondary_value = details
        .secondary_volume
        .checked_add(details.secondary_fee)
        .ok_or(SwapdError::AmountOverflow("secondary leg"))?;

    let (send_token, send_value, receive_token, receive_value) = if details.order_is_buy {
        (priority_token, priority_value, secondary_token, secondary_value)
    } else {
        (secondary_token, secondary_value, priority_token, priority_value)
    };

    Ok(Match {
        personal_order_id: order_id,
        foreign_order_id: details.matched_id,
        send_token,
        receive_token,
        send_value: send_value.to_string(),
        receive_value: receive_value.to_string(),
    })
}

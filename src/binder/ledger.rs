//! Ethereum-backed order-matching ledger

use super::{Ledger, MatchDetails};
use crate::config::BinderConfig;
use crate::error::{SwapResult, SwapdError};
use crate::swap::OrderId;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Http, Provider};
use ethers::types::Address;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

abigen!(
    Orderbook,
    r#"[
        function orderTrader(bytes32 _orderID) external view returns (address)
    ]"#
);

abigen!(
    Settlement,
    r#"[
        function getMatchDetails(bytes32 _orderID) external view returns (bool settled, bool orderIsBuy, bytes32 matchedID, uint256 priorityVolume, uint256 secondaryVolume, uint256 priorityFee, uint256 secondaryFee, uint32 priorityToken, uint32 secondaryToken)
    ]"#
);

/// Ledger reading the orderbook and settlement contracts over JSON-RPC
pub struct EthLedger {
    orderbook: Orderbook<Provider<Http>>,
    settlement: Settlement<Provider<Http>>,
}

impl EthLedger {
    /// Create a new ledger client from the binder configuration
    pub fn new(config: &BinderConfig) -> SwapResult<Self> {
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .map_err(|e| SwapdError::Config(format!("Invalid RPC url {}: {}", config.rpc_url, e)))?
            .interval(Duration::from_millis(100));
        let provider = Arc::new(provider);

        let orderbook = parse_address("orderbook", &config.orderbook_address)?;
        let settlement = parse_address("settlement", &config.settlement_address)?;

        info!(
            "Ledger client using orderbook {:?} and settlement {:?} via {}",
            orderbook, settlement, config.rpc_url
        );

        Ok(Self {
            orderbook: Orderbook::new(orderbook, provider.clone()),
            settlement: Settlement::new(settlement, provider),
        })
    }
}

fn parse_address(contract: &str, value: &str) -> SwapResult<Address> {
    Address::from_str(value.trim())
        .map_err(|e| SwapdError::Config(format!("Invalid {} address {}: {}", contract, value, e)))
}

#[async_trait]
impl Ledger for EthLedger {
    async fn order_trader(&self, order_id: OrderId) -> SwapResult<Address> {
        self.orderbook
            .order_trader(order_id.0)
            .call()
            .await
            .map_err(|e| SwapdError::Ledger(format!("orderTrader({}): {}", order_id, e)))
    }

    async fn match_details(&self, order_id: OrderId) -> SwapResult<MatchDetails> {
        let (
            settled,
            order_is_buy,
            matched_id,
            priority_volume,
            secondary_volume,
            priority_fee,
            secondary_fee,
            priority_token,
            secondary_token,
        ) = self
            .settlement
            .get_match_details(order_id.0)
            .call()
            .await
            .map_err(|e| SwapdError::Ledger(format!("getMatchDetails({}): {}", order_id, e)))?;

        Ok(MatchDetails {
            settled,
            order_is_buy,
            matched_id: OrderId(matched_id),
            priority_volume,
            secondary_volume,
            priority_fee,
            secondary_fee,
            priority_token,
            secondary_token,
        })
    }
}

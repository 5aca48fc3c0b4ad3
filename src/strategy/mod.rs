//! Execution strategies
//!
//! Each strategy is a child task of the orchestrator. It accepts the request
//! kind it was built for, runs every swap on its own tokio task through a
//! [`SwapExecutor`], and reports results upward on the next tick.

use crate::binder::Binder;
use crate::error::{SwapResult, SwapdError};
use crate::orchestrator::Message;
use crate::swap::{ReceiptUpdate, StrategyKind, SwapBlob, SwapId, SwapStatus};
use crate::task::Reducer;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Outcome of running one swap
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Execution {
    /// Receipt deltas to persist, in order
    pub updates: Vec<ReceiptUpdate>,
    /// Whether the swap left the in-flight set
    pub concluded: bool,
}

impl Execution {
    /// A single receipt delta; a terminal status concludes the swap
    pub fn reporting(update: ReceiptUpdate) -> Self {
        let concluded = update.status.map_or(false, |status| status.is_terminal());
        Self {
            updates: vec![update],
            concluded,
        }
    }
}

/// Runs the protocol for one swap
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapExecutor: Send + Sync {
    async fn execute(&self, blob: SwapBlob) -> SwapResult<Execution>;
}

/// Child reducer for one strategy kind
pub struct ExecutionStrategy {
    kind: StrategyKind,
    executor: Arc<dyn SwapExecutor>,
    /// Swaps running or handed off; concluded and failed runs are removed
    in_flight: Arc<DashSet<SwapId>>,
    results_tx: mpsc::UnboundedSender<Message>,
    results_rx: mpsc::UnboundedReceiver<Message>,
}

impl ExecutionStrategy {
    /// Create a new strategy
    pub fn new(kind: StrategyKind, executor: Arc<dyn SwapExecutor>) -> Self {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        Self {
            kind,
            executor,
            in_flight: Arc::new(DashSet::new()),
            results_tx,
            results_rx,
        }
    }

    fn accepts(&self, message: &Message) -> bool {
        matches!(
            (self.kind, message),
            (StrategyKind::Delayed, Message::DelayedSwapRequest(_))
                | (StrategyKind::Immediate, Message::ImmediateSwapRequest(_))
        )
    }

    fn start(&self, blob: SwapBlob) {
        if !self.in_flight.insert(blob.id.clone()) {
            debug!("Swap {} already dispatched to {} strategy", blob.id, self.kind.name());
            return;
        }

        let kind = self.kind;
        let executor = self.executor.clone();
        let in_flight = self.in_flight.clone();
        let results = self.results_tx.clone();

        tokio::spawn(async move {
            let id = blob.id.clone();
            debug!("Executing swap {} ({})", id, kind.name());

            match executor.execute(blob).await {
                Ok(execution) => {
                    let outcome = if execution.concluded { "concluded" } else { "handed_off" };
                    crate::metrics::record_execution(outcome);

                    for update in execution.updates {
                        let _ = results.send(Message::ReceiptUpdate(update));
                    }
                    if execution.concluded {
                        in_flight.remove(&id);
                        let _ = results.send(Message::SwapCompleted(id));
                    }
                }
                Err(e) => {
                    if e.is_retryable() {
                        info!("Swap {} interrupted in {} strategy: {}", id, kind.name(), e);
                        crate::metrics::record_execution("retryable");
                    } else {
                        warn!("Swap {} failed in {} strategy: {}", id, kind.name(), e);
                        crate::metrics::record_execution("failed");
                    }
                    in_flight.remove(&id);
                    let _ = results.send(Message::error(format!("Swap {} failed: {}", id, e)));
                }
            }
        });
    }

    /// Everything reported since the previous tick
    fn drain(&mut self) -> Option<Message> {
        let mut batch = Vec::new();
        while let Ok(message) = self.results_rx.try_recv() {
            batch.push(message);
        }

        if batch.is_empty() {
            None
        } else {
            Some(Message::MessageBatch(batch))
        }
    }
}

#[async_trait]
impl Reducer<Message> for ExecutionStrategy {
    async fn reduce(&mut self, message: Message) -> Option<Message> {
        if self.accepts(&message) {
            if let Message::DelayedSwapRequest(blob) | Message::ImmediateSwapRequest(blob) = message {
                self.start(blob);
            }
            return None;
        }

        match message {
            Message::Tick => self.drain(),
            other => Some(Message::error(SwapdError::UnrecognizedMessage(format!(
                "{} in {} strategy",
                other.kind(),
                self.kind.name()
            )))),
        }
    }
}

/// Executor confirming the counter-party match before the on-chain protocol
pub struct MatchExecutor {
    binder: Option<Arc<Binder>>,
    match_timeout: Duration,
}

impl MatchExecutor {
    pub fn new(binder: Option<Arc<Binder>>, match_timeout: Duration) -> Self {
        Self {
            binder,
            match_timeout,
        }
    }

    /// Match deadline: the configured timeout, capped by the swap's time lock
    fn deadline(&self, blob: &SwapBlob) -> SwapResult<DateTime<Utc>> {
        let timeout = chrono::Duration::from_std(self.match_timeout)
            .map_err(|e| SwapdError::Internal(format!("Invalid match timeout: {}", e)))?;
        let deadline = Utc::now() + timeout;

        Ok(match Utc.timestamp_opt(blob.time_lock, 0).single() {
            Some(time_lock) => deadline.min(time_lock),
            None => deadline,
        })
    }
}

#[async_trait]
impl SwapExecutor for MatchExecutor {
    async fn execute(&self, blob: SwapBlob) -> SwapResult<Execution> {
        let (Some(binder), Some(order_id)) = (&self.binder, blob.order_id) else {
            debug!("Swap {} has no order to verify", blob.id);
            return Ok(Execution::default());
        };

        let deadline = self.deadline(&blob)?;
        match binder.get_order_match(order_id, deadline).await {
            Ok(order_match) => {
                info!(
                    "Swap {} matched: send {} {}, receive {} {}",
                    blob.id,
                    order_match.send_value,
                    order_match.send_token,
                    order_match.receive_value,
                    order_match.receive_token
                );
                Ok(Execution::reporting(
                    ReceiptUpdate::new(blob.id)
                        .with_status(SwapStatus::Matched)
                        .with_match(order_match),
                ))
            }
            Err(e) if e.is_timeout() => {
                warn!("Swap {} expired before its order matched", blob.id);
                Ok(Execution::reporting(
                    ReceiptUpdate::new(blob.id).with_status(SwapStatus::Expired),
                ))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::{MatchDetails, MockLedger};
    use crate::swap::{fixtures, Token};
    use ethers::types::{Address, U256};
    use std::str::FromStr;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);
    const TRADER: &str = "0x5B38Da6a701c568545dCfcB03FcB875f56beddC4";

    /// Tick until `count` results have been reported
    async fn collect(strategy: &mut ExecutionStrategy, count: usize) -> Vec<Message> {
        timeout(WAIT, async {
            let mut seen = Vec::new();
            while seen.len() < count {
                match strategy.reduce(Message::Tick).await {
                    Some(batch) => seen.extend(batch.flatten()),
                    None => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            }
            seen
        })
        .await
        .expect("strategy never reported")
    }

    fn concluding(blob: SwapBlob) -> SwapResult<Execution> {
        Ok(Execution::reporting(
            ReceiptUpdate::new(blob.id).with_status(SwapStatus::Redeemed),
        ))
    }

    #[tokio::test]
    async fn test_results_are_batched_on_tick() {
        let mut executor = MockSwapExecutor::new();
        executor.expect_execute().times(1).returning(concluding);
        let mut strategy = ExecutionStrategy::new(StrategyKind::Immediate, Arc::new(executor));
        let blob = fixtures::blob(1, false);

        assert_eq!(strategy.reduce(Message::ImmediateSwapRequest(blob.clone())).await, None);

        assert_eq!(
            collect(&mut strategy, 2).await,
            vec![
                Message::ReceiptUpdate(
                    ReceiptUpdate::new(blob.id.clone()).with_status(SwapStatus::Redeemed)
                ),
                Message::SwapCompleted(blob.id),
            ]
        );
        assert_eq!(strategy.reduce(Message::Tick).await, None);
    }

    #[tokio::test]
    async fn test_duplicate_dispatch_runs_once() {
        let mut executor = MockSwapExecutor::new();
        executor
            .expect_execute()
            .times(1)
            .returning(|_| Ok(Execution::default()));
        let mut strategy = ExecutionStrategy::new(StrategyKind::Delayed, Arc::new(executor));
        let blob = fixtures::blob(2, true);

        strategy.reduce(Message::DelayedSwapRequest(blob.clone())).await;
        strategy.reduce(Message::DelayedSwapRequest(blob)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(strategy.reduce(Message::Tick).await, None);
    }

    #[tokio::test]
    async fn test_failed_swap_can_be_retried() {
        let mut executor = MockSwapExecutor::new();
        let mut calls = 0;
        executor.expect_execute().times(2).returning(move |blob| {
            calls += 1;
            if calls == 1 {
                Err(SwapdError::Ledger("node unreachable".to_string()))
            } else {
                concluding(blob)
            }
        });
        let mut strategy = ExecutionStrategy::new(StrategyKind::Immediate, Arc::new(executor));
        let blob = fixtures::blob(3, false);

        strategy.reduce(Message::ImmediateSwapRequest(blob.clone())).await;
        let first = collect(&mut strategy, 1).await;
        assert!(matches!(&first[0], Message::Error(text) if text.contains("node unreachable")));

        strategy.reduce(Message::ImmediateSwapRequest(blob.clone())).await;
        let second = collect(&mut strategy, 2).await;
        assert_eq!(second[1], Message::SwapCompleted(blob.id));
    }

    #[tokio::test]
    async fn test_concluded_swaps_leave_in_flight_set() {
        let mut executor = MockSwapExecutor::new();
        executor.expect_execute().times(50).returning(concluding);
        let mut strategy = ExecutionStrategy::new(StrategyKind::Immediate, Arc::new(executor));

        for seed in 0..50 {
            strategy
                .reduce(Message::ImmediateSwapRequest(fixtures::blob(seed, false)))
                .await;
        }
        let results = collect(&mut strategy, 100).await;

        assert_eq!(
            results
                .iter()
                .filter(|m| matches!(m, Message::SwapCompleted(_)))
                .count(),
            50
        );
        assert!(strategy.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_handed_off_swap_stays_in_flight() {
        let mut executor = MockSwapExecutor::new();
        executor.expect_execute().times(1).returning(|blob| {
            Ok(Execution::reporting(
                ReceiptUpdate::new(blob.id).with_status(SwapStatus::Matched),
            ))
        });
        let mut strategy = ExecutionStrategy::new(StrategyKind::Delayed, Arc::new(executor));
        let blob = fixtures::blob(9, true);

        strategy.reduce(Message::DelayedSwapRequest(blob.clone())).await;
        let results = collect(&mut strategy, 1).await;

        assert!(matches!(&results[0], Message::ReceiptUpdate(update) if update.id == blob.id));
        assert!(strategy.in_flight.contains(&blob.id));
    }

    #[tokio::test]
    async fn test_rejects_other_requests() {
        let mut executor = MockSwapExecutor::new();
        executor.expect_execute().never();
        let mut strategy = ExecutionStrategy::new(StrategyKind::Delayed, Arc::new(executor));

        for message in [
            Message::ImmediateSwapRequest(fixtures::blob(4, false)),
            Message::Bootload,
            Message::error("stray"),
        ] {
            match strategy.reduce(message).await {
                Some(Message::Error(text)) => assert!(text.contains("delayed strategy")),
                other => panic!("expected error, got {:?}", other),
            }
        }
    }

    fn ledger(trader: Address, details: MatchDetails) -> MockLedger {
        let mut ledger = MockLedger::new();
        ledger.expect_order_trader().returning(move |_| Ok(trader));
        ledger
            .expect_match_details()
            .returning(move |_| Ok(details.clone()));
        ledger
    }

    fn match_executor(ledger: MockLedger, match_timeout: Duration) -> MatchExecutor {
        let binder = Binder::new(
            Arc::new(ledger),
            &[TRADER.to_string()],
            Duration::from_millis(10),
        )
        .unwrap();
        MatchExecutor::new(Some(Arc::new(binder)), match_timeout)
    }

    #[tokio::test]
    async fn test_match_executor_records_match() {
        let details = MatchDetails {
            settled: true,
            order_is_buy: true,
            matched_id: crate::swap::OrderId([9; 32]),
            priority_volume: U256::from(100u64),
            secondary_volume: U256::from(200u64),
            priority_fee: U256::from(1u64),
            secondary_fee: U256::from(2u64),
            priority_token: Token::Eth.code(),
            secondary_token: Token::Btc.code(),
        };
        let executor = match_executor(
            ledger(Address::from_str(TRADER).unwrap(), details),
            Duration::from_secs(5),
        );
        let blob = fixtures::blob(5, true);

        let execution = executor.execute(blob.clone()).await.unwrap();

        assert!(!execution.concluded);
        assert_eq!(execution.updates.len(), 1);
        let update = &execution.updates[0];
        assert_eq!(update.id, blob.id);
        assert_eq!(update.status, Some(SwapStatus::Matched));
        let order_match = update.order_match.as_ref().unwrap();
        assert_eq!(order_match.send_value, "101");
        assert_eq!(order_match.receive_value, "202");
    }

    #[tokio::test]
    async fn test_match_executor_expires_swap_on_timeout() {
        let executor = match_executor(
            ledger(Address::repeat_byte(0x77), MatchDetails::default()),
            Duration::from_millis(50),
        );
        let blob = fixtures::blob(6, true);

        let execution = executor.execute(blob.clone()).await.unwrap();

        assert!(execution.concluded);
        assert_eq!(
            execution.updates,
            vec![ReceiptUpdate::new(blob.id).with_status(SwapStatus::Expired)]
        );
    }

    #[tokio::test]
    async fn test_match_executor_respects_time_lock() {
        let executor = match_executor(
            ledger(Address::repeat_byte(0x77), MatchDetails::default()),
            Duration::from_secs(3_600),
        );
        let mut blob = fixtures::blob(7, true);
        blob.time_lock = Utc::now().timestamp() - 1;

        let execution = timeout(WAIT, executor.execute(blob)).await.unwrap().unwrap();
        assert!(execution.concluded);
    }

    #[tokio::test]
    async fn test_swaps_without_order_are_left_alone() {
        let mut ledger = MockLedger::new();
        ledger.expect_order_trader().never();
        let executor = match_executor(ledger, Duration::from_secs(5));

        let execution = executor.execute(fixtures::blob(8, false)).await.unwrap();
        assert_eq!(execution, Execution::default());

        let unbound = MatchExecutor::new(None, Duration::from_secs(5));
        let execution = unbound.execute(fixtures::blob(8, true)).await.unwrap();
        assert_eq!(execution, Execution::default());
    }
}

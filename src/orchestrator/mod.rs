//! Swap orchestration
//!
//! The orchestrator is the reducer mounted on the root task. It:
//! 1. Reconciles in-flight swaps from storage on bootload
//! 2. Routes each swap to the delayed or the immediate strategy
//! 3. Persists new submissions, receipt updates and swap conclusions
//! 4. Broadcasts heartbeats to the strategies
//!
//! It keeps no durable state of its own; everything it knows is rebuilt from
//! the store after a restart.

mod message;

pub use message::Message;

use crate::error::{SwapResult, SwapdError};
use crate::store::SwapStore;
use crate::swap::{SwapBlob, SwapId, SwapReceipt, StrategyKind};
use crate::task::Reducer;

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Root reducer driving the swap lifecycle
pub struct Orchestrator {
    /// Durable swap state
    store: Arc<dyn SwapStore>,
    /// Input queue of the delayed strategy
    delayed: mpsc::Sender<Message>,
    /// Input queue of the immediate strategy
    immediate: mpsc::Sender<Message>,
}

impl Orchestrator {
    /// Create a new orchestrator
    pub fn new(
        store: Arc<dyn SwapStore>,
        delayed: mpsc::Sender<Message>,
        immediate: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            store,
            delayed,
            immediate,
        }
    }

    /// Dispatch every in-flight swap and return the dispatched requests
    async fn bootload(&self) -> SwapResult<Message> {
        let pending = self.store.pending_swaps().await?;
        crate::metrics::set_pending_swaps(pending.len());

        let mut dispatched = Vec::with_capacity(pending.len());
        for blob in pending {
            // Dispatch before recording: a crash in between re-dispatches, never loses
            let request = self.dispatch(blob).await?;
            dispatched.push(request);
        }

        info!("Bootload dispatched {} in-flight swaps", dispatched.len());
        Ok(Message::MessageBatch(dispatched))
    }

    /// Persist a new swap and hand it to its strategy
    async fn submit(&self, blob: SwapBlob) -> SwapResult<()> {
        // Receipt first: every in-flight swap must have one to update
        self.store
            .put_receipt(&SwapReceipt::new(&blob, Utc::now()))
            .await?;
        self.store.put_swap(&blob).await?;

        info!(
            "Accepted swap {} ({} {} -> {} {}, {})",
            blob.id,
            blob.send_amount,
            blob.send_token,
            blob.receive_amount,
            blob.receive_token,
            blob.strategy().name()
        );

        self.dispatch(blob).await?;
        Ok(())
    }

    /// Forward a swap to the strategy its classification names
    async fn dispatch(&self, blob: SwapBlob) -> SwapResult<Message> {
        let kind = blob.strategy();
        let (request, child) = match kind {
            StrategyKind::Delayed => (Message::DelayedSwapRequest(blob), &self.delayed),
            StrategyKind::Immediate => (Message::ImmediateSwapRequest(blob), &self.immediate),
        };

        child
            .send(request.clone())
            .await
            .map_err(|_| SwapdError::Dispatch(format!("{} strategy stopped", kind.name())))?;

        crate::metrics::record_swap_dispatched(kind.name());
        Ok(request)
    }

    async fn tick(&self) -> SwapResult<()> {
        for (kind, child) in [
            (StrategyKind::Delayed, &self.delayed),
            (StrategyKind::Immediate, &self.immediate),
        ] {
            child
                .send(Message::Tick)
                .await
                .map_err(|_| SwapdError::Dispatch(format!("{} strategy stopped", kind.name())))?;
        }
        Ok(())
    }

    async fn complete(&self, id: &SwapId) -> SwapResult<()> {
        self.store.delete_pending_swap(id).await?;
        info!("Swap {} concluded", id);
        Ok(())
    }
}

#[async_trait]
impl Reducer<Message> for Orchestrator {
    async fn reduce(&mut self, message: Message) -> Option<Message> {
        debug!("Orchestrator received {}", message.kind());
        crate::metrics::record_message(message.kind());

        let result = match message {
            Message::Bootload => self.bootload().await.map(Some),
            Message::Tick => self.tick().await.map(|_| None),
            Message::Error(err) => Ok(Some(Message::Error(err))),
            Message::SwapRequest(blob) => self.submit(blob).await.map(|_| None),
            Message::ReceiptUpdate(update) => {
                crate::metrics::record_receipt_update();
                self.store.update_receipt(&update).await.map(|_| None)
            }
            Message::SwapCompleted(id) => self.complete(&id).await.map(|_| None),
            other => Err(SwapdError::UnrecognizedMessage(other.kind().to_string())),
        };

        match result {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Orchestrator error: {}", e);
                crate::metrics::record_orchestrator_error();
                Some(Message::error(e))
            }
        }
    }
}

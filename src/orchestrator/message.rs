//! Messages exchanged inside the swap task tree

use crate::swap::{ReceiptUpdate, SwapBlob, SwapId};

use std::fmt::Display;

/// Unit of communication between the orchestrator, its strategies and its owner
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Cold-start trigger: reconcile every in-flight swap from storage
    Bootload,
    /// Periodic heartbeat broadcast to the strategies
    Tick,
    /// A failure, carried as a value for the owner to log or act on
    Error(String),
    /// Fresh swap submitted by the outer layer
    SwapRequest(SwapBlob),
    DelayedSwapRequest(SwapBlob),
    ImmediateSwapRequest(SwapBlob),
    ReceiptUpdate(ReceiptUpdate),
    /// The swap concluded (redeemed, refunded or expired)
    SwapCompleted(SwapId),
    /// Ordered envelope of messages; also an audit trail of dispatches
    MessageBatch(Vec<Message>),
}

impl Message {
    pub fn error(err: impl Display) -> Self {
        Message::Error(err.to_string())
    }

    /// Message kind for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Bootload => "bootload",
            Message::Tick => "tick",
            Message::Error(_) => "error",
            Message::SwapRequest(_) => "swap_request",
            Message::DelayedSwapRequest(_) => "delayed_swap_request",
            Message::ImmediateSwapRequest(_) => "immediate_swap_request",
            Message::ReceiptUpdate(_) => "receipt_update",
            Message::SwapCompleted(_) => "swap_completed",
            Message::MessageBatch(_) => "message_batch",
        }
    }

    /// Flatten nested batches into a single ordered list
    pub fn flatten(self) -> Vec<Message> {
        match self {
            Message::MessageBatch(batch) => batch.into_iter().flat_map(Message::flatten).collect(),
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_preserves_order() {
        let batch = Message::MessageBatch(vec![
            Message::Tick,
            Message::MessageBatch(vec![Message::error("a"), Message::Bootload]),
            Message::error("b"),
        ]);

        assert_eq!(
            batch.flatten(),
            vec![
                Message::Tick,
                Message::Error("a".to_string()),
                Message::Bootload,
                Message::Error("b".to_string()),
            ]
        );
        assert!(Message::MessageBatch(vec![]).flatten().is_empty());
    }
}

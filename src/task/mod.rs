//! Reactive task runtime
//!
//! A task owns:
//! - A bounded input queue and a bounded output queue
//! - A reducer turning each input message into at most one output message
//! - Child tasks whose outputs are merged into its own output
//!
//! Every node loop and every fan-in forwarder runs on its own tokio task, so a
//! slow reducer in one node never stalls its siblings or its parent. Full queues
//! apply backpressure: producers wait until space frees up.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default queue capacity per node
pub const DEFAULT_CAPACITY: usize = 2048;

/// Reduction step of a task node
#[async_trait]
pub trait Reducer<M>: Send {
    /// Process one input message. `None` means the step was effect-only.
    async fn reduce(&mut self, message: M) -> Option<M>;
}

#[async_trait]
impl<M, F> Reducer<M> for F
where
    M: Send + 'static,
    F: FnMut(M) -> Option<M> + Send,
{
    async fn reduce(&mut self, message: M) -> Option<M> {
        (self)(message)
    }
}

/// A task node that has not been started yet
pub struct Task<M> {
    name: String,
    input_tx: mpsc::Sender<M>,
    input_rx: mpsc::Receiver<M>,
    output_tx: mpsc::Sender<M>,
    output_rx: mpsc::Receiver<M>,
    reducer: Box<dyn Reducer<M>>,
    children: Vec<Task<M>>,
}

impl<M: Send + 'static> Task<M> {
    /// Create a new task node
    pub fn new<R>(name: impl Into<String>, capacity: usize, reducer: R, children: Vec<Task<M>>) -> Self
    where
        R: Reducer<M> + 'static,
    {
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);

        Self {
            name: name.into(),
            input_tx,
            input_rx,
            output_tx,
            output_rx,
            reducer: Box::new(reducer),
            children,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writer for this node's input queue, usable before and after spawning
    pub fn input(&self) -> mpsc::Sender<M> {
        self.input_tx.clone()
    }

    /// Start this node and all of its descendants. Cancelling `shutdown` stops the whole tree.
    pub fn spawn(self, shutdown: &CancellationToken) -> TaskHandle<M> {
        let Task {
            name,
            input_tx,
            input_rx,
            output_tx,
            output_rx,
            reducer,
            children,
        } = self;

        let shutdown = shutdown.child_token();
        let mut workers = Vec::new();

        for child in children {
            let child_name = child.name().to_string();
            let TaskHandle {
                output: child_output,
                workers: child_workers,
                ..
            } = child.spawn(&shutdown);

            workers.extend(child_workers);
            workers.push(tokio::spawn(fan_in(
                format!("{}<-{}", name, child_name),
                child_output,
                output_tx.clone(),
                shutdown.clone(),
            )));
        }

        workers.push(tokio::spawn(run_node(
            name.clone(),
            input_rx,
            output_tx,
            reducer,
            shutdown.clone(),
        )));

        debug!("Task {} started with {} workers", name, workers.len());

        TaskHandle {
            name,
            input: input_tx,
            output: output_rx,
            workers,
        }
    }
}

/// A running task tree
pub struct TaskHandle<M> {
    name: String,
    input: mpsc::Sender<M>,
    output: mpsc::Receiver<M>,
    workers: Vec<JoinHandle<()>>,
}

impl<M: Send + 'static> TaskHandle<M> {
    pub fn input(&self) -> mpsc::Sender<M> {
        self.input.clone()
    }

    /// Submit a message, waiting for queue space
    pub async fn send(&self, message: M) -> bool {
        self.input.send(message).await.is_ok()
    }

    /// Next message from the root output queue
    #[cfg(test)]
    pub async fn recv(&mut self) -> Option<M> {
        self.output.recv().await
    }

    /// Take the output queue to drain it elsewhere
    pub fn into_output(self) -> (mpsc::Receiver<M>, TaskJoin) {
        (
            self.output,
            TaskJoin {
                name: self.name,
                workers: self.workers,
            },
        )
    }

    /// Wait for every worker of the tree to stop
    #[cfg(test)]
    pub async fn join(self) {
        self.into_output().1.join().await;
    }
}

/// Join side of a running task tree
pub struct TaskJoin {
    name: String,
    workers: Vec<JoinHandle<()>>,
}

impl TaskJoin {
    pub async fn join(self) {
        for result in futures::future::join_all(self.workers).await {
            if let Err(e) = result {
                warn!("Task {} worker ended abnormally: {}", self.name, e);
            }
        }
    }

    /// Join, aborting any worker still running after the grace period
    pub async fn join_timeout(self, grace: Duration) {
        let aborts: Vec<_> = self.workers.iter().map(|w| w.abort_handle()).collect();
        let name = self.name.clone();
        if tokio::time::timeout(grace, self.join()).await.is_err() {
            warn!("Task {} did not stop within {:?}, aborting", name, grace);
            for abort in aborts {
                abort.abort();
            }
        }
    }
}

/// Node processing loop
async fn run_node<M: Send + 'static>(
    name: String,
    mut input: mpsc::Receiver<M>,
    output: mpsc::Sender<M>,
    mut reducer: Box<dyn Reducer<M>>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = input.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        // A dequeued message always finishes reducing
        let Some(reply) = reducer.reduce(message).await else {
            continue;
        };

        // The reply belongs to the dequeued message; only a full queue races shutdown
        let reply = match output.try_send(reply) {
            Ok(()) => continue,
            Err(TrySendError::Full(reply)) => reply,
            Err(TrySendError::Closed(_)) => {
                debug!("Task {} output closed", name);
                break;
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                warn!("Task {} dropped a reply at shutdown, output full", name);
                break;
            }
            sent = output.send(reply) => {
                if sent.is_err() {
                    debug!("Task {} output closed", name);
                    break;
                }
            }
        }
    }

    input.close();
    debug!("Task {} stopped", name);
}

/// Forward a child's output into its parent's output, preserving order
async fn fan_in<M: Send + 'static>(
    name: String,
    mut child: mpsc::Receiver<M>,
    parent: mpsc::Sender<M>,
    shutdown: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            message = child.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            sent = parent.send(message) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }

    debug!("Fan-in {} stopped", name);
}

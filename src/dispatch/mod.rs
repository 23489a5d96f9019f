//! Rate-limited dispatcher for outbound provider calls.
//!
//! A fixed pool of worker tasks consumes a bounded queue. Concurrency is
//! bounded by the worker count, call starts are spaced by the pacing gate,
//! and each attempt is bounded by the per-attempt timeout regardless of
//! what the transport does. When the queue is full, [`Dispatcher::enqueue`]
//! fails fast with `Backpressure` instead of growing unbounded; the
//! orchestrator treats that as retryable with backoff.
//!
//! ```text
//! enqueue ──► [bounded queue] ──► worker 1 ─┐
//!                              ─► worker 2 ─┼─► pacing gate ─► transport
//!                              ─► worker N ─┘      │
//!                                                  └─ timeout + cancel
//! ```

mod pacing;

pub use pacing::PacingGate;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::OrchestratorConfig;
use crate::error::GenerationError;
use crate::transport::{ProviderRequest, RawResponse, Transport};

/// One queued HTTP attempt.
struct WorkItem {
    request: ProviderRequest,
    timeout: Duration,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<RawResponse, GenerationError>>,
}

/// Gauges for monitoring dispatcher load.
#[derive(Debug, Default)]
struct DispatchGauges {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    dispatched: AtomicUsize,
    rejected: AtomicUsize,
}

/// Snapshot of dispatcher activity.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DispatcherStats {
    /// Calls currently running on workers
    pub in_flight: usize,
    /// Highest simultaneous call count observed
    pub peak_in_flight: usize,
    /// Attempts accepted onto the queue
    pub dispatched: usize,
    /// Attempts rejected with Backpressure
    pub rejected: usize,
}

/// Bounded worker pool issuing provider calls.
pub struct Dispatcher {
    queue: mpsc::Sender<WorkItem>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    closed: AtomicBool,
    gauges: Arc<DispatchGauges>,
}

impl Dispatcher {
    /// Starts `config.max_concurrent` workers against the given transport.
    ///
    /// Workers live until [`Dispatcher::shutdown`]. The transport is shared;
    /// implementations must be safe to call from multiple workers at once.
    pub fn new<T>(transport: Arc<T>, config: &OrchestratorConfig) -> Self
    where
        T: Transport + 'static,
    {
        let (queue_tx, queue_rx) = mpsc::channel::<WorkItem>(config.queue_capacity);
        let queue_rx = Arc::new(Mutex::new(queue_rx));
        let pacing = Arc::new(PacingGate::new(config.min_interval));
        let shutdown = CancellationToken::new();
        let gauges = Arc::new(DispatchGauges::default());

        let workers = (0..config.max_concurrent)
            .map(|worker_id| {
                let transport = Arc::clone(&transport);
                let queue_rx = Arc::clone(&queue_rx);
                let pacing = Arc::clone(&pacing);
                let shutdown = shutdown.clone();
                let gauges = Arc::clone(&gauges);
                tokio::spawn(async move {
                    worker_loop(worker_id, transport, queue_rx, pacing, shutdown, gauges).await;
                })
            })
            .collect();

        debug!(
            workers = config.max_concurrent,
            queue_capacity = config.queue_capacity,
            min_interval_ms = config.min_interval.as_millis() as u64,
            "Dispatcher started"
        );

        Self {
            queue: queue_tx,
            workers: std::sync::Mutex::new(workers),
            shutdown,
            closed: AtomicBool::new(false),
            gauges,
        }
    }

    /// Queues one HTTP attempt.
    ///
    /// Returns a receiver resolving to the attempt's outcome, or
    /// `Backpressure` immediately if the queue is full.
    pub fn enqueue(
        &self,
        request: ProviderRequest,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Result<oneshot::Receiver<Result<RawResponse, GenerationError>>, GenerationError> {
        if self.closed.load(Ordering::Acquire) {
            warn!("Enqueue after dispatcher shutdown");
            return Err(GenerationError::Internal(
                "dispatcher is shut down".to_string(),
            ));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let item = WorkItem {
            request,
            timeout,
            cancel,
            reply: reply_tx,
        };

        match self.queue.try_send(item) {
            Ok(()) => {
                self.gauges.dispatched.fetch_add(1, Ordering::Relaxed);
                Ok(reply_rx)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.gauges.rejected.fetch_add(1, Ordering::Relaxed);
                trace!("Dispatcher queue full, rejecting with backpressure");
                Err(GenerationError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Enqueue after dispatcher shutdown");
                Err(GenerationError::Internal(
                    "dispatcher is shut down".to_string(),
                ))
            }
        }
    }

    /// Returns a snapshot of dispatcher gauges.
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            in_flight: self.gauges.in_flight.load(Ordering::Relaxed),
            peak_in_flight: self.gauges.peak_in_flight.load(Ordering::Relaxed),
            dispatched: self.gauges.dispatched.load(Ordering::Relaxed),
            rejected: self.gauges.rejected.load(Ordering::Relaxed),
        }
    }

    /// Stops accepting work and waits for workers to exit.
    ///
    /// In-flight calls are aborted; queued items that have not started are
    /// dropped, and their reply channels close, which surfaces as an
    /// internal error to any waiting driver. Idempotent.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.shutdown.cancel();
        let workers: Vec<JoinHandle<()>> = {
            let mut guard = self.workers.lock().expect("worker list lock poisoned");
            guard.drain(..).collect()
        };
        for worker in workers {
            let _ = worker.await;
        }
        debug!("Dispatcher stopped");
    }
}

async fn worker_loop<T: Transport>(
    worker_id: usize,
    transport: Arc<T>,
    queue_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    pacing: Arc<PacingGate>,
    shutdown: CancellationToken,
    gauges: Arc<DispatchGauges>,
) {
    trace!(worker_id, "Dispatch worker started");
    loop {
        // Workers share one receiver; the lock is held only while waiting
        // for the next item, which serializes at most one idle worker.
        let item = {
            let mut rx = queue_rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(item) = item else { break };

        if item.cancel.is_cancelled() {
            let _ = item.reply.send(Err(GenerationError::Cancelled));
            continue;
        }

        // Respect inter-call spacing, but bail if cancelled while waiting
        tokio::select! {
            biased;
            _ = item.cancel.cancelled() => {
                let _ = item.reply.send(Err(GenerationError::Cancelled));
                continue;
            }
            _ = pacing.wait_turn() => {}
        }

        let in_flight = gauges.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        gauges.peak_in_flight.fetch_max(in_flight, Ordering::Relaxed);

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(GenerationError::Cancelled),
            _ = item.cancel.cancelled() => Err(GenerationError::Cancelled),
            outcome = tokio::time::timeout(
                item.timeout,
                transport.send(&item.request, item.timeout, &item.cancel),
            ) => match outcome {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout(item.timeout)),
            },
        };

        gauges.in_flight.fetch_sub(1, Ordering::Relaxed);

        if let Err(error) = &result {
            trace!(worker_id, %error, "Attempt finished with error");
        }
        // Receiver may have given up; nothing to do if so
        let _ = item.reply.send(result);
    }
    trace!(worker_id, "Dispatch worker stopped");
}

//! Orchestrator facade.
//!
//! The public entry point used by the editor UI. `submit` registers a
//! subscription and returns immediately; exactly one terminal result per
//! subscription is later posted through the [`ResultSink`]. Internally the
//! facade composes the dedup store, the rate-limited dispatcher, the retry
//! policy and the decoder:
//!
//! ```text
//! UI ─► submit ─► store (dedup fast path) ─► dispatcher ─► transport
//!                     │                           │
//!                     ◄── complete ◄── decode ◄───┘
//!                     │
//!                     └─► broadcast ─► waiter tasks ─► ResultSink ─► UI
//! ```
//!
//! Cancellation contract: cancelling one subscription among several on the
//! same fingerprint detaches only that subscriber (it receives Cancelled,
//! the shared call continues); cancelling the last one aborts the in-flight
//! call and marks the entry Cancelled. A late transport response for a
//! cancelled entry is discarded by the store's single-terminal-transition
//! invariant.

mod sink;

pub use sink::{ChannelSink, Delivery, ResultSink};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::OrchestratorConfig;
use crate::decode::{decode_response, ImageDecoder};
use crate::dispatch::Dispatcher;
use crate::error::GenerationError;
use crate::request::{Fingerprint, GenerationKind, GenerationRequest, GenerationResult};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::store::{Attach, ResultStore};
use crate::transport::{ProviderRequest, Transport};

/// Handle to one submitted request.
///
/// Dropped handles stay subscribed; call [`Orchestrator::cancel`] to
/// detach. The handle carries no result - results arrive via the sink.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    fingerprint: Fingerprint,
    detach: CancellationToken,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

/// The generation orchestrator. One instance per editor session.
pub struct Orchestrator<D: ImageDecoder + 'static> {
    store: Arc<ResultStore>,
    dispatcher: Arc<Dispatcher>,
    retry: RetryPolicy,
    decoder: Arc<D>,
    sink: Arc<dyn ResultSink>,
    config: OrchestratorConfig,
    next_subscription_id: AtomicU64,
}

impl<D: ImageDecoder + 'static> Orchestrator<D> {
    /// Builds an orchestrator over the given collaborators.
    ///
    /// The config is validated (out-of-range values clamped) before use.
    pub fn new<T>(
        config: OrchestratorConfig,
        transport: Arc<T>,
        decoder: Arc<D>,
        sink: Arc<dyn ResultSink>,
    ) -> Self
    where
        T: Transport + 'static,
    {
        let config = config.validated();
        let dispatcher = Arc::new(Dispatcher::new(transport, &config));
        let retry = RetryPolicy::from_config(&config);

        Self {
            store: Arc::new(ResultStore::new()),
            dispatcher,
            retry,
            decoder,
            sink,
            config,
            next_subscription_id: AtomicU64::new(1),
        }
    }

    /// Submits a generation request.
    ///
    /// Returns a subscription that will receive exactly one terminal
    /// result through the sink. Identical fingerprints share one outbound
    /// call; a cached terminal result is delivered without any call.
    #[instrument(skip_all, fields(fingerprint = request.fingerprint().short(), kind = request.kind().as_str()))]
    pub async fn submit(&self, request: GenerationRequest) -> Subscription {
        let fingerprint = request.fingerprint().clone();
        let subscription = Subscription {
            id: self.next_subscription_id.fetch_add(1, Ordering::Relaxed),
            fingerprint: fingerprint.clone(),
            detach: CancellationToken::new(),
        };

        match self.store.begin_or_attach(&fingerprint).await {
            Attach::Cached(result) => {
                debug!(subscription = subscription.id, "Delivering cached result");
                self.sink.post(Delivery {
                    subscription_id: subscription.id,
                    fingerprint,
                    target_asset_id: request.target_asset_id().to_string(),
                    result,
                });
            }
            Attach::InFlight { rx } => {
                self.spawn_waiter(&subscription, &request, rx);
            }
            Attach::New { rx, cancel } => {
                self.spawn_waiter(&subscription, &request, rx);
                self.spawn_driver(request, cancel);
            }
        }

        subscription
    }

    /// Cancels a subscription.
    ///
    /// The subscriber receives a Cancelled result. The shared call is
    /// aborted only if no other subscribers remain attached. Idempotent:
    /// cancelling the same subscription again is a no-op, so a repeated
    /// cancel never detaches someone else's interest.
    pub async fn cancel(&self, subscription: &Subscription) {
        if subscription.detach.is_cancelled() {
            return;
        }
        subscription.detach.cancel();
        let outcome = self.store.detach(&subscription.fingerprint).await;
        debug!(
            subscription = subscription.id,
            fingerprint = subscription.fingerprint.short(),
            ?outcome,
            "Subscription cancelled"
        );
    }

    /// Returns dedup/cache statistics for the session.
    pub async fn store_stats(&self) -> crate::store::StoreStats {
        self.store.stats().await
    }

    /// Returns dispatcher load statistics for the session.
    pub fn dispatcher_stats(&self) -> crate::dispatch::DispatcherStats {
        self.dispatcher.stats()
    }

    /// Removes terminal results older than the configured cache age.
    ///
    /// Call periodically (e.g., from the editor's idle tick).
    pub async fn evict_stale(&self) -> usize {
        self.store.evict(self.config.cache_max_age).await
    }

    /// Tears the session down: cancels all outstanding work, evicts the
    /// store, and stops the dispatcher workers.
    ///
    /// Waiters still deliver Cancelled results for outstanding
    /// subscriptions before the sink goes quiet.
    pub async fn shutdown(&self) {
        debug!("Orchestrator shutting down");
        self.store.cancel_all().await;
        self.store.evict(self.config.cache_max_age).await;
        self.dispatcher.shutdown().await;
    }

    /// Spawns the task that forwards this subscriber's copy of the shared
    /// result to the sink.
    fn spawn_waiter(
        &self,
        subscription: &Subscription,
        request: &GenerationRequest,
        mut rx: tokio::sync::broadcast::Receiver<GenerationResult>,
    ) {
        let store = Arc::clone(&self.store);
        let sink = Arc::clone(&self.sink);
        let detach = subscription.detach.clone();
        let subscription_id = subscription.id;
        let fingerprint = subscription.fingerprint.clone();
        let target_asset_id = request.target_asset_id().to_string();

        tokio::spawn(async move {
            let result = tokio::select! {
                // Prefer a ready result over a simultaneous detach
                biased;
                received = rx.recv() => match received {
                    Ok(result) => result,
                    Err(_) => GenerationResult::failed(
                        GenerationError::Internal("result channel closed".to_string()),
                        0,
                    ),
                },
                _ = detach.cancelled() => {
                    // Local detach; report the attempts made so far, same as
                    // the store-broadcast Cancelled would
                    let attempts = store.attempts(&fingerprint).await;
                    GenerationResult::cancelled(attempts)
                }
            };
            sink.post(Delivery {
                subscription_id,
                fingerprint,
                target_asset_id,
                result,
            });
        });
    }

    /// Spawns the task that owns driving one fingerprint's work to a
    /// terminal state.
    fn spawn_driver(&self, request: GenerationRequest, cancel: CancellationToken) {
        let store = Arc::clone(&self.store);
        let dispatcher = Arc::clone(&self.dispatcher);
        let decoder = Arc::clone(&self.decoder);
        let retry = self.retry.clone();
        let timeout = self.config.request_timeout;

        tokio::spawn(async move {
            let fingerprint = request.fingerprint().clone();
            let kind = request.kind();
            let provider_request = ProviderRequest::from(&request);

            let Some(outcome) = drive(
                &fingerprint,
                kind,
                provider_request,
                store.as_ref(),
                dispatcher.as_ref(),
                decoder.as_ref(),
                &retry,
                timeout,
                &cancel,
            )
            .await
            else {
                // Cancelled mid-flight; the detach path already completed
                // the entry, so there is nothing to record.
                return;
            };

            store.complete(&fingerprint, outcome).await;
        });
    }
}

/// Runs attempts for one request until a terminal outcome or cancellation.
///
/// Returns `None` when cancelled (the store entry is completed by whoever
/// cancelled it), `Some(result)` otherwise.
#[allow(clippy::too_many_arguments)]
async fn drive<D: ImageDecoder>(
    fingerprint: &Fingerprint,
    kind: GenerationKind,
    provider_request: ProviderRequest,
    store: &ResultStore,
    dispatcher: &Dispatcher,
    decoder: &D,
    retry: &RetryPolicy,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Option<GenerationResult> {
    let mut attempts: u32 = 0;
    let mut retries_used: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return None;
        }

        // Enqueue; queue-full is a retryable condition like any other
        // transient failure, but does not count as an HTTP attempt.
        let reply = match dispatcher.enqueue(
            provider_request.clone(),
            timeout,
            cancel.child_token(),
        ) {
            Ok(reply) => reply,
            Err(error) => match retry.decide(&error, retries_used) {
                RetryDecision::RetryAfter(delay) => {
                    retries_used += 1;
                    debug!(
                        fingerprint = fingerprint.short(),
                        delay_ms = delay.as_millis() as u64,
                        "Dispatcher backpressure, backing off"
                    );
                    if sleep_or_cancelled(delay, cancel).await {
                        return None;
                    }
                    continue;
                }
                RetryDecision::GiveUp => {
                    return Some(GenerationResult::failed(error, attempts));
                }
            },
        };

        attempts += 1;
        store.record_attempt(fingerprint).await;

        let attempt_outcome = match reply.await {
            Ok(outcome) => outcome,
            Err(_) => Err(GenerationError::Internal(
                "dispatcher dropped reply channel".to_string(),
            )),
        };

        // The entry may have been cancelled while the call was in flight
        // (last subscriber detached, or session shutdown). Whoever cancelled
        // it completed the entry; a late outcome here must not.
        if cancel.is_cancelled() {
            return None;
        }

        let error = match attempt_outcome {
            Ok(response) => match decode_response(kind, &response, decoder) {
                Ok(payload) => {
                    return Some(GenerationResult::succeeded(payload, attempts));
                }
                Err(error) => error,
            },
            Err(GenerationError::Cancelled) => return None,
            Err(error) => error,
        };

        match retry.decide(&error, retries_used) {
            RetryDecision::RetryAfter(delay) => {
                retries_used += 1;
                debug!(
                    fingerprint = fingerprint.short(),
                    attempt = attempts,
                    %error,
                    delay_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying"
                );
                if sleep_or_cancelled(delay, cancel).await {
                    return None;
                }
            }
            RetryDecision::GiveUp => {
                warn!(
                    fingerprint = fingerprint.short(),
                    attempts,
                    %error,
                    "Generation failed"
                );
                return Some(GenerationResult::failed(error, attempts));
            }
        }
    }
}

/// Sleeps for `delay`, returning true if cancelled first.
async fn sleep_or_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::ImageRsDecoder;
    use crate::request::GenerationStatus;
    use crate::transport::{ok_response, MockTransport};
    use tokio::sync::mpsc;

    fn text_request(prompt: &str, target: &str) -> GenerationRequest {
        GenerationRequest::new(GenerationKind::Text, prompt, vec![], target, None).unwrap()
    }

    fn fast_config() -> OrchestratorConfig {
        OrchestratorConfig {
            min_interval: Duration::ZERO,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn recv_delivery(rx: &mut mpsc::UnboundedReceiver<Delivery>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("sink channel closed")
    }

    #[tokio::test]
    async fn test_submit_delivers_text_result() {
        let transport = Arc::new(MockTransport::always(ok_response(
            br#"{"text":"A gleaming blade."}"#,
        )));
        let (sink, mut rx) = ChannelSink::new();
        let orchestrator = Orchestrator::new(
            fast_config(),
            transport,
            Arc::new(ImageRsDecoder),
            Arc::new(sink),
        );

        let subscription = orchestrator
            .submit(text_request("describe a sword", "quest.1"))
            .await;

        let delivery = recv_delivery(&mut rx).await;
        assert_eq!(delivery.subscription_id, subscription.id());
        assert_eq!(delivery.target_asset_id, "quest.1");
        assert_eq!(delivery.result.status, GenerationStatus::Succeeded);
        assert_eq!(delivery.result.attempts, 1);
        assert_eq!(
            delivery.result.payload.unwrap().as_text(),
            Some("A gleaming blade.")
        );

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_cached_result_skips_dispatch() {
        let transport = Arc::new(MockTransport::always(ok_response(br#"{"text":"hi"}"#)));
        let (sink, mut rx) = ChannelSink::new();
        let orchestrator = Orchestrator::new(
            fast_config(),
            Arc::clone(&transport),
            Arc::new(ImageRsDecoder),
            Arc::new(sink),
        );

        let _first = orchestrator
            .submit(text_request("describe a sword", "quest.1"))
            .await;
        recv_delivery(&mut rx).await;

        let _second = orchestrator
            .submit(text_request("describe a sword", "quest.1"))
            .await;
        let cached = recv_delivery(&mut rx).await;
        assert_eq!(cached.result.status, GenerationStatus::Succeeded);
        assert_eq!(transport.calls(), 1, "cached result must not re-dispatch");

        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_outstanding_work() {
        let transport =
            Arc::new(MockTransport::always(ok_response(b"{}")).with_delay(Duration::from_secs(60)));
        let (sink, mut rx) = ChannelSink::new();
        let orchestrator = Orchestrator::new(
            fast_config(),
            transport,
            Arc::new(ImageRsDecoder),
            Arc::new(sink),
        );

        let _subscription = orchestrator
            .submit(text_request("describe a sword", "quest.1"))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        orchestrator.shutdown().await;

        let delivery = recv_delivery(&mut rx).await;
        assert_eq!(delivery.result.status, GenerationStatus::Cancelled);
    }
}

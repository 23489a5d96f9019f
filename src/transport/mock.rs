//! Scripted transport for tests.
//!
//! Plays back a queue of canned outcomes, one per call, and records how
//! many calls were made and how many ran at once. Public (not `cfg(test)`)
//! so integration tests can drive the full orchestrator against it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{ProviderRequest, RawResponse, Transport};
use crate::error::GenerationError;

/// Test double that returns pre-scripted responses in order.
///
/// When the script runs dry the last scripted outcome is repeated, so a
/// single `ok` response covers any number of deduplicated callers.
pub struct MockTransport {
    script: Mutex<VecDeque<Result<RawResponse, GenerationError>>>,
    last: Mutex<Option<Result<RawResponse, GenerationError>>>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockTransport {
    /// Creates a transport that answers every call with `outcome`.
    pub fn always(outcome: Result<RawResponse, GenerationError>) -> Self {
        Self::scripted(vec![outcome])
    }

    /// Creates a transport that plays `outcomes` back in order, repeating
    /// the last one once exhausted.
    pub fn scripted(outcomes: Vec<Result<RawResponse, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            last: Mutex::new(None),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Adds an artificial per-call delay, for cancellation and concurrency
    /// tests that need calls to stay in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously in-flight calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> Result<RawResponse, GenerationError> {
        let mut script = self.script.lock().expect("mock script lock poisoned");
        match script.pop_front() {
            Some(outcome) => {
                let mut last = self.last.lock().expect("mock last lock poisoned");
                *last = Some(outcome.clone());
                outcome
            }
            None => {
                let last = self.last.lock().expect("mock last lock poisoned");
                last.clone().unwrap_or_else(|| {
                    Err(GenerationError::Internal("mock script empty".to_string()))
                })
            }
        }
    }
}

impl Transport for MockTransport {
    async fn send(
        &self,
        _request: &ProviderRequest,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RawResponse, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight
            .fetch_max(now_in_flight, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.in_flight.fetch_sub(1, Ordering::SeqCst);
                    return Err(GenerationError::Cancelled);
                }
                _ = tokio::time::sleep(self.delay) => {}
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.next_outcome()
    }
}

/// Shorthand for an HTTP 200 response with the given body.
pub fn ok_response(body: &[u8]) -> Result<RawResponse, GenerationError> {
    Ok(RawResponse::new(200, body.to_vec()))
}

/// Shorthand for an HTTP response with the given status and empty body.
pub fn status_response(status: u16) -> Result<RawResponse, GenerationError> {
    Ok(RawResponse::new(status, Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::GenerationKind;

    fn request() -> ProviderRequest {
        ProviderRequest {
            kind: GenerationKind::Text,
            prompt: "p".to_string(),
            parameters: vec![],
            source_image: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_playback_in_order() {
        let transport = MockTransport::scripted(vec![
            status_response(429),
            ok_response(br#"{"text":"hi"}"#),
        ]);
        let cancel = CancellationToken::new();

        let first = transport
            .send(&request(), Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(first.status, 429);

        let second = transport
            .send(&request(), Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(second.status, 200);

        // Script exhausted - last outcome repeats
        let third = transport
            .send(&request(), Duration::from_secs(1), &cancel)
            .await
            .unwrap();
        assert_eq!(third.status, 200);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_delay_respects_cancellation() {
        let transport =
            MockTransport::always(ok_response(b"{}")).with_delay(Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = transport
            .send(&request(), Duration::from_secs(1), &cancel)
            .await;
        assert_eq!(result, Err(GenerationError::Cancelled));
    }
}

//! UI-safe result delivery.
//!
//! Workers must never call into the editor UI directly. Results are posted
//! to a [`ResultSink`], and the UI drains them on its own thread - an
//! explicit message queue rather than a cross-thread callback invocation.

use tokio::sync::mpsc;

use crate::request::{Fingerprint, GenerationResult};

/// One delivered result, correlated back to the widget that asked for it.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// The subscription this result answers
    pub subscription_id: u64,
    /// Dedup key of the underlying request
    pub fingerprint: Fingerprint,
    /// Quest-data slot the UI should write the result into
    pub target_asset_id: String,
    /// The terminal result
    pub result: GenerationResult,
}

/// Destination for terminal results.
///
/// `post` is called from worker-side tasks and must not block; queue the
/// delivery and return.
pub trait ResultSink: Send + Sync {
    fn post(&self, delivery: Delivery);
}

/// Sink backed by an unbounded channel.
///
/// The editor holds the receiving end and drains it on the UI thread
/// (e.g., once per editor tick). Unbounded is safe here: each subscription
/// produces exactly one delivery.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl ChannelSink {
    /// Creates a sink and the receiver the UI thread drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ResultSink for ChannelSink {
    fn post(&self, delivery: Delivery) {
        // UI gone (session closing): deliveries are moot
        let _ = self.tx.send(delivery);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{GenerationKind, GenerationPayload, GenerationStatus};

    #[tokio::test]
    async fn test_posted_deliveries_arrive_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        let fingerprint = Fingerprint::compute(GenerationKind::Text, "p", &[], "t", None);

        for i in 0..3u64 {
            sink.post(Delivery {
                subscription_id: i,
                fingerprint: fingerprint.clone(),
                target_asset_id: format!("slot.{i}"),
                result: GenerationResult::succeeded(GenerationPayload::Text("x".into()), 1),
            });
        }

        for i in 0..3u64 {
            let delivery = rx.recv().await.unwrap();
            assert_eq!(delivery.subscription_id, i);
            assert_eq!(delivery.result.status, GenerationStatus::Succeeded);
        }
    }

    #[test]
    fn test_post_with_receiver_dropped_is_silent() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        let fingerprint = Fingerprint::compute(GenerationKind::Text, "p", &[], "t", None);
        sink.post(Delivery {
            subscription_id: 1,
            fingerprint,
            target_asset_id: "slot".into(),
            result: GenerationResult::cancelled(0),
        });
    }
}

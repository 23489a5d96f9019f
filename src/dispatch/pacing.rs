//! Minimum-interval pacing between call starts.
//!
//! Providers rate limit on request frequency as well as concurrency; this
//! gate spaces out call starts across all workers. Each caller claims the
//! next free slot under a short lock, then sleeps outside it, so waiting
//! for a slot never blocks other workers from claiming theirs.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared gate enforcing a minimum spacing between call starts.
#[derive(Debug)]
pub struct PacingGate {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl PacingGate {
    /// Creates a gate with the given minimum interval between call starts.
    ///
    /// A zero interval disables pacing entirely.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Waits until this caller's turn to start a call.
    ///
    /// Slots are handed out in claim order; a caller that claims a slot in
    /// the future sleeps until it arrives.
    pub async fn wait_turn(&self) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next_slot).max(now);
            *next_slot = slot + self.interval;
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

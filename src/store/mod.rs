//! Dedup/cache store for generation results.
//!
//! Maps a request fingerprint to either an in-flight entry or a terminal
//! result, guaranteeing at most one outstanding provider call per
//! fingerprint. When multiple widgets submit the same request, only the
//! first starts work - the rest attach to the existing entry and receive
//! the same result through a broadcast channel.
//!
//! State machine per entry:
//!
//! ```text
//! Pending --succeeds-----------------> Succeeded (terminal)
//! Pending --retries exhausted--------> Failed    (terminal)
//! Pending --last subscriber detaches-> Cancelled (terminal)
//! ```
//!
//! Terminal entries never transition again; a duplicate `complete` is a
//! no-op. Terminal entries remain as a result cache until `evict` removes
//! those older than the configured age. Eviction never touches a Pending
//! entry.
//!
//! All mutation goes through one async mutex: submissions race on the same
//! fingerprint from the UI and worker sides, and the map is the only state
//! shared between them.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::request::{Fingerprint, GenerationResult, GenerationStatus};

/// Broadcast capacity per entry. Each subscriber receives exactly one
/// message, so this only needs to cover simultaneous attach bursts.
const RESULT_CHANNEL_CAPACITY: usize = 16;

/// Outcome of [`ResultStore::begin_or_attach`].
pub enum Attach {
    /// No entry existed. The caller owns driving the work and must call
    /// `complete` when it resolves. The token cancels the in-flight work.
    New {
        rx: broadcast::Receiver<GenerationResult>,
        cancel: CancellationToken,
    },
    /// An entry is already in flight; wait on the receiver for its result.
    InFlight {
        rx: broadcast::Receiver<GenerationResult>,
    },
    /// A terminal result is already cached.
    Cached(GenerationResult),
}

/// Outcome of [`ResultStore::detach`].
#[derive(Debug, PartialEq, Eq)]
pub enum Detach {
    /// Other subscribers remain; the shared work continues.
    Remaining(usize),
    /// This was the last subscriber of a pending entry; the work was
    /// cancelled and the entry marked Cancelled.
    CancelledWork,
    /// The entry was already terminal (or absent); nothing to cancel.
    AlreadyTerminal,
}

enum EntryState {
    Pending {
        tx: broadcast::Sender<GenerationResult>,
        cancel: CancellationToken,
        subscribers: usize,
        attempts: u32,
    },
    Terminal {
        result: GenerationResult,
    },
}

/// One fingerprint's record: a live in-flight handle or a terminal result,
/// plus a last-access timestamp for eviction.
struct CacheEntry {
    state: EntryState,
    last_access: Instant,
}

/// Statistics for monitoring dedup effectiveness.
///
/// Serializable so the editor can export diagnostics.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct StoreStats {
    /// Total begin_or_attach calls
    pub total_requests: u64,
    /// Calls that attached to in-flight work
    pub attached_requests: u64,
    /// Calls answered from the terminal-result cache
    pub cache_hits: u64,
    /// Calls that started new work
    pub new_requests: u64,
}

/// The dedup/cache store. One instance per editor session.
pub struct ResultStore {
    entries: Mutex<HashMap<Fingerprint, CacheEntry>>,
    stats: Mutex<StoreStats>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            stats: Mutex::new(StoreStats::default()),
        }
    }

    /// Looks up the current status of a fingerprint without attaching.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<GenerationStatus> {
        let entries = self.entries.lock().await;
        entries.get(fingerprint).map(|entry| match &entry.state {
            EntryState::Pending { .. } => GenerationStatus::Pending,
            EntryState::Terminal { result } => result.status,
        })
    }

    /// Registers interest in a fingerprint.
    ///
    /// If no entry exists, creates a Pending one and returns [`Attach::New`];
    /// the caller must drive the work and `complete` it. If an entry exists,
    /// attaches to it instead - this is the at-most-one-call guarantee.
    pub async fn begin_or_attach(&self, fingerprint: &Fingerprint) -> Attach {
        let mut entries = self.entries.lock().await;
        let mut stats = self.stats.lock().await;
        stats.total_requests += 1;

        if let Some(entry) = entries.get_mut(fingerprint) {
            entry.last_access = Instant::now();
            match &mut entry.state {
                EntryState::Pending {
                    tx, subscribers, ..
                } => {
                    *subscribers += 1;
                    stats.attached_requests += 1;
                    debug!(
                        fingerprint = fingerprint.short(),
                        subscribers = *subscribers,
                        "Attaching to in-flight generation"
                    );
                    Attach::InFlight { rx: tx.subscribe() }
                }
                EntryState::Terminal { result } => {
                    stats.cache_hits += 1;
                    debug!(
                        fingerprint = fingerprint.short(),
                        status = ?result.status,
                        "Serving cached generation result"
                    );
                    Attach::Cached(result.clone())
                }
            }
        } else {
            let (tx, rx) = broadcast::channel(RESULT_CHANNEL_CAPACITY);
            let cancel = CancellationToken::new();
            entries.insert(
                fingerprint.clone(),
                CacheEntry {
                    state: EntryState::Pending {
                        tx,
                        cancel: cancel.clone(),
                        subscribers: 1,
                        attempts: 0,
                    },
                    last_access: Instant::now(),
                },
            );
            stats.new_requests += 1;
            debug!(
                fingerprint = fingerprint.short(),
                in_flight = entries.len(),
                "New generation request - starting work"
            );
            Attach::New { rx, cancel }
        }
    }

    /// Records one HTTP attempt against a pending entry.
    ///
    /// The running attempt count is stamped onto the Cancelled result if
    /// the entry is cancelled mid-flight.
    pub async fn record_attempt(&self, fingerprint: &Fingerprint) {
        let mut entries = self.entries.lock().await;
        if let Some(CacheEntry {
            state: EntryState::Pending { attempts, .. },
            ..
        }) = entries.get_mut(fingerprint)
        {
            *attempts += 1;
        }
    }

    /// Returns the HTTP attempt count recorded for a fingerprint.
    ///
    /// For a Pending entry this is the running count; for a terminal entry,
    /// the count frozen into its result. Zero if the entry is absent.
    pub async fn attempts(&self, fingerprint: &Fingerprint) -> u32 {
        let entries = self.entries.lock().await;
        match entries.get(fingerprint).map(|entry| &entry.state) {
            Some(EntryState::Pending { attempts, .. }) => *attempts,
            Some(EntryState::Terminal { result }) => result.attempts,
            None => 0,
        }
    }

    /// Transitions a Pending entry to its terminal state, broadcasting the
    /// result to every attached subscriber.
    ///
    /// Idempotent: completing an already-terminal entry is a no-op. A late
    /// outcome for a Cancelled entry is an expected race (the in-flight call
    /// may finish after the last subscriber detached) and is silently
    /// discarded. Any other second completion with a differing status
    /// signals a logic error upstream and trips a debug assertion, but
    /// never surfaces to the user.
    pub async fn complete(&self, fingerprint: &Fingerprint, result: GenerationResult) {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(fingerprint) else {
            warn!(
                fingerprint = fingerprint.short(),
                "Completion for unknown fingerprint dropped"
            );
            return;
        };

        match &entry.state {
            EntryState::Pending { tx, .. } => {
                let waiters = tx.receiver_count();
                // Ignore send errors - every receiver may already be gone
                let _ = tx.send(result.clone());
                debug!(
                    fingerprint = fingerprint.short(),
                    status = ?result.status,
                    attempts = result.attempts,
                    waiters,
                    "Generation complete"
                );
                entry.state = EntryState::Terminal { result };
                entry.last_access = Instant::now();
            }
            EntryState::Terminal { result: existing } => {
                if existing.status == GenerationStatus::Cancelled {
                    debug!(
                        fingerprint = fingerprint.short(),
                        discarded = ?result.status,
                        "Discarding late completion for cancelled entry"
                    );
                } else if existing.status != result.status {
                    debug_assert!(
                        false,
                        "terminal entry completed twice with differing status: {:?} then {:?}",
                        existing.status, result.status
                    );
                    warn!(
                        fingerprint = fingerprint.short(),
                        existing = ?existing.status,
                        ignored = ?result.status,
                        "Ignoring conflicting completion for terminal entry"
                    );
                }
            }
        }
    }

    /// Detaches one subscriber from a fingerprint.
    ///
    /// If the entry is Pending and this was its last subscriber, the
    /// in-flight work is cancelled and the entry transitions to Cancelled.
    /// Otherwise the shared work continues for the remaining subscribers.
    pub async fn detach(&self, fingerprint: &Fingerprint) -> Detach {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(fingerprint) else {
            return Detach::AlreadyTerminal;
        };

        match &mut entry.state {
            EntryState::Pending {
                tx,
                cancel,
                subscribers,
                attempts,
            } => {
                *subscribers = subscribers.saturating_sub(1);
                if *subscribers > 0 {
                    debug!(
                        fingerprint = fingerprint.short(),
                        remaining = *subscribers,
                        "Subscriber detached, work continues"
                    );
                    return Detach::Remaining(*subscribers);
                }

                cancel.cancel();
                let result = GenerationResult::cancelled(*attempts);
                let _ = tx.send(result.clone());
                debug!(
                    fingerprint = fingerprint.short(),
                    attempts = result.attempts,
                    "Last subscriber detached, cancelling in-flight work"
                );
                entry.state = EntryState::Terminal { result };
                entry.last_access = Instant::now();
                Detach::CancelledWork
            }
            EntryState::Terminal { .. } => Detach::AlreadyTerminal,
        }
    }

    /// Cancels every Pending entry. Used at session teardown.
    pub async fn cancel_all(&self) {
        let mut entries = self.entries.lock().await;
        let mut cancelled = 0usize;
        for entry in entries.values_mut() {
            if let EntryState::Pending {
                tx,
                cancel,
                attempts,
                ..
            } = &entry.state
            {
                cancel.cancel();
                let result = GenerationResult::cancelled(*attempts);
                let _ = tx.send(result.clone());
                entry.state = EntryState::Terminal { result };
                entry.last_access = Instant::now();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "Cancelled all pending generations");
        }
    }

    /// Removes terminal entries not accessed within `max_age`.
    ///
    /// Pending entries are never evicted, whatever their age.
    pub async fn evict(&self, max_age: Duration) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| match entry.state {
            EntryState::Pending { .. } => true,
            EntryState::Terminal { .. } => entry.last_access.elapsed() <= max_age,
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "Evicted stale results");
        }
        evicted
    }

    /// Returns the number of entries currently held (any state).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Returns a snapshot of store statistics.
    pub async fn stats(&self) -> StoreStats {
        self.stats.lock().await.clone()
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

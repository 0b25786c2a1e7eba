//! # Correlation Store
//!
//! Maps correlation keys to either a buffered value or the pollers parked on
//! that key. `store` hands a value straight to the oldest live poller or
//! buffers it; `find` takes a buffered value or parks until a matching
//! `store` or its deadline.
//!
//! ## Locking
//!
//! Entries live in a sharded map. A shard lock is held only while an entry is
//! inspected or changed, never across the wait itself, so pollers on
//! unrelated keys never block each other. Same-key `store`/`find`/timeout
//! handling is serialized by the shard lock, which is what rules out lost
//! updates: a poller whose deadline fires re-takes the lock, closes its
//! receiver and drains anything handed to it before the close.
//!
//! ## Late arrivals
//!
//! A key whose poller timed out keeps a tombstone for `tombstone_ttl`. A value
//! stored against a tombstoned key is a late arrival and is handled per
//! [`LateArrivalPolicy`].

use crate::config::{BridgeConfig, DuplicatePolicy, LateArrivalPolicy};
use crate::deadline_after;
use bridge_types::{BridgeError, CallContext};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a [`CorrelationStore::store`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Handed directly to a parked poller.
    HandedOff,
    /// Buffered for a poller that has not arrived yet.
    Buffered,
    /// Replaced an unconsumed value (`DuplicatePolicy::Overwrite`).
    Replaced,
    /// Kept the unconsumed value, dropped the new one (`DuplicatePolicy::Reject`).
    Rejected,
    /// Late arrival kept for the grace period.
    LateBuffered,
    /// Late arrival dropped.
    LateDropped,
}

/// Statistics for the correlation store
#[derive(Debug, Default)]
pub struct StoreStats {
    /// Total `store` calls
    pub total_stored: AtomicU64,
    /// Values handed directly to a parked poller
    pub total_handed_off: AtomicU64,
    /// Values buffered for a future poller
    pub total_buffered: AtomicU64,
    /// Values returned by `find`
    pub total_found: AtomicU64,
    /// `find` calls that returned nothing
    pub total_timeouts: AtomicU64,
    /// Late arrivals dropped
    pub total_late_dropped: AtomicU64,
    /// Late arrivals buffered for the grace period
    pub total_late_buffered: AtomicU64,
    /// Duplicate stores rejected
    pub total_rejected: AtomicU64,
    /// Entries removed by eviction
    pub total_evicted: AtomicU64,
}

struct Waiter<T> {
    id: u64,
    sender: oneshot::Sender<T>,
}

enum Slot<T> {
    /// Pollers parked on the key, oldest first.
    Waiting(VecDeque<Waiter<T>>),
    /// Value waiting for a poller.
    Stored { value: T, expires_at: Instant },
    /// The last poller on this key timed out or was cancelled.
    TimedOut { at: Instant },
}

impl<T> Slot<T> {
    fn into_value(self) -> Option<T> {
        match self {
            Slot::Stored { value, .. } => Some(value),
            _ => None,
        }
    }
}

/// What an occupied slot means for an incoming value.
enum Existing {
    Unconsumed,
    StaleTombstone,
    Late,
}

/// Concurrent correlation key → value store.
///
/// One store per endpoint, shared by every call going through it.
pub struct CorrelationStore<T> {
    /// Store name (for logging)
    name: String,
    entries: DashMap<String, Slot<T>>,
    late_arrival_policy: LateArrivalPolicy,
    duplicate_policy: DuplicatePolicy,
    entry_ttl: Duration,
    tombstone_ttl: Duration,
    gc_interval: Duration,
    last_gc: Mutex<Instant>,
    next_waiter_id: AtomicU64,
    stats: StoreStats,
}

impl<T> CorrelationStore<T> {
    /// Create a store using the eviction and policy settings of `config`.
    pub fn new(name: impl Into<String>, config: &BridgeConfig) -> Self {
        Self {
            name: name.into(),
            entries: DashMap::new(),
            late_arrival_policy: config.late_arrival_policy,
            duplicate_policy: config.duplicate_policy,
            entry_ttl: config.entry_ttl,
            tombstone_ttl: config.tombstone_ttl,
            gc_interval: config.gc_interval,
            last_gc: Mutex::new(Instant::now()),
            next_waiter_id: AtomicU64::new(0),
            stats: StoreStats::default(),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Associate `key` with the current call under `key_name`.
    pub fn save_key(&self, key_name: &str, key: &str, ctx: &mut CallContext) {
        debug!(
            store = %self.name,
            call = %ctx.id(),
            key_name = key_name,
            key = key,
            "Saving correlation key"
        );
        ctx.set_variable(key_name, key);
    }

    /// Key previously saved for `key_name` in this call.
    ///
    /// # Errors
    ///
    /// - `BridgeError::CorrelationNotInitialized` - nothing saved under `key_name`
    pub fn get_key(&self, key_name: &str, ctx: &CallContext) -> Result<String, BridgeError> {
        ctx.variable(key_name)
            .map(str::to_string)
            .ok_or_else(|| BridgeError::CorrelationNotInitialized {
                key_name: key_name.to_string(),
            })
    }

    /// Hand `value` to a poller parked on `key`, or buffer it.
    ///
    /// Never blocks.
    pub fn store(&self, key: &str, value: T) -> StoreOutcome {
        self.stats.total_stored.fetch_add(1, Ordering::Relaxed);
        self.collect_garbage_if_due();

        let now = Instant::now();
        let mut occupied = match self.entries.entry(key.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Stored {
                    value,
                    expires_at: deadline_after(now, self.entry_ttl),
                });
                self.stats.total_buffered.fetch_add(1, Ordering::Relaxed);
                debug!(store = %self.name, key = key, "Buffered value for future poller");
                return StoreOutcome::Buffered;
            }
            Entry::Occupied(occupied) => occupied,
        };

        let mut value = value;
        if let Slot::Waiting(waiters) = occupied.get_mut() {
            match hand_off(waiters, value) {
                Ok(()) => {
                    let drained = waiters.is_empty();
                    if drained {
                        occupied.remove();
                    }
                    self.stats.total_handed_off.fetch_add(1, Ordering::Relaxed);
                    debug!(store = %self.name, key = key, "Handed value to parked poller");
                    return StoreOutcome::HandedOff;
                }
                // Every parked poller was cancelled
                Err(returned) => value = returned,
            }
        }

        let existing = match occupied.get() {
            Slot::Stored { .. } => Existing::Unconsumed,
            Slot::TimedOut { at } if now.duration_since(*at) > self.tombstone_ttl => {
                Existing::StaleTombstone
            }
            Slot::TimedOut { .. } | Slot::Waiting(_) => Existing::Late,
        };

        match existing {
            Existing::Unconsumed => match self.duplicate_policy {
                DuplicatePolicy::Overwrite => {
                    occupied.insert(Slot::Stored {
                        value,
                        expires_at: deadline_after(now, self.entry_ttl),
                    });
                    debug!(store = %self.name, key = key, "Replaced unconsumed value");
                    StoreOutcome::Replaced
                }
                DuplicatePolicy::Reject => {
                    self.stats.total_rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        store = %self.name,
                        key = key,
                        "Rejected duplicate value for unconsumed correlation key"
                    );
                    StoreOutcome::Rejected
                }
            },
            Existing::StaleTombstone => {
                occupied.insert(Slot::Stored {
                    value,
                    expires_at: deadline_after(now, self.entry_ttl),
                });
                self.stats.total_buffered.fetch_add(1, Ordering::Relaxed);
                debug!(store = %self.name, key = key, "Buffered value for future poller");
                StoreOutcome::Buffered
            }
            Existing::Late => match self.late_arrival_policy {
                LateArrivalPolicy::Drop => {
                    occupied.insert(Slot::TimedOut { at: now });
                    self.stats.total_late_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        store = %self.name,
                        key = key,
                        "Dropping late arrival - poller for this correlation key already gave up"
                    );
                    StoreOutcome::LateDropped
                }
                LateArrivalPolicy::BufferWithGracePeriod { grace } => {
                    occupied.insert(Slot::Stored {
                        value,
                        expires_at: deadline_after(now, grace),
                    });
                    self.stats.total_late_buffered.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        store = %self.name,
                        key = key,
                        grace_ms = grace.as_millis(),
                        "Buffering late arrival for grace period"
                    );
                    StoreOutcome::LateBuffered
                }
            },
        }
    }

    /// Remove and return the value for `key`, waiting up to `timeout`.
    ///
    /// Returns `None` when the deadline passes without a matching `store`, or
    /// when the key is evicted while waiting. A value is returned to at most
    /// one caller. Dropping the returned future cancels the wait and removes
    /// the parked poller.
    pub async fn find(&self, key: &str, timeout: Duration) -> Option<T> {
        let now = Instant::now();
        let deadline = deadline_after(now, timeout);
        let id = self.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        let waiter = Waiter { id, sender };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let live = matches!(
                    occupied.get(),
                    Slot::Stored { expires_at, .. } if *expires_at > now
                );
                if live {
                    self.stats.total_found.fetch_add(1, Ordering::Relaxed);
                    return occupied.remove().into_value();
                }

                if let Slot::Waiting(waiters) = occupied.get_mut() {
                    waiters.push_back(waiter);
                } else {
                    occupied.insert(Slot::Waiting(VecDeque::from([waiter])));
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::Waiting(VecDeque::from([waiter])));
            }
        }

        debug!(
            store = %self.name,
            key = key,
            timeout_ms = timeout.as_millis(),
            "Value did not arrive yet - waiting"
        );

        let mut parked = ParkedPoller {
            store: self,
            key,
            id,
            receiver,
            settled: false,
        };

        match tokio::time::timeout_at(deadline, &mut parked.receiver).await {
            Ok(Ok(value)) => {
                parked.settled = true;
                self.stats.total_found.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Ok(Err(_)) => {
                // Sender dropped: the entry was evicted
                parked.settled = true;
                self.stats.total_timeouts.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(_) => parked.expire(),
        }
    }

    /// Remove `key` regardless of its state.
    ///
    /// Pollers parked on the key return `None` immediately.
    pub fn evict(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.stats.total_evicted.fetch_add(1, Ordering::Relaxed);
            debug!(store = %self.name, key = key, "Evicted correlation entry");
        }
        removed
    }

    /// Remove expired values, expired tombstones and abandoned waiter lists.
    ///
    /// Returns the number of entries removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|key, slot| {
            let keep = match slot {
                Slot::Stored { expires_at, .. } => *expires_at > now,
                Slot::TimedOut { at } => now.duration_since(*at) <= self.tombstone_ttl,
                Slot::Waiting(waiters) => {
                    waiters.retain(|w| !w.sender.is_closed());
                    !waiters.is_empty()
                }
            };
            if !keep {
                debug!(store = %self.name, key = %key, "Removing expired correlation entry");
                removed += 1;
            }
            keep
        });

        self.stats
            .total_evicted
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of keys currently tracked (values, waiters and tombstones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true if an unconsumed value is buffered for `key`.
    pub fn has_value(&self, key: &str) -> bool {
        matches!(
            self.entries.get(key).as_deref(),
            Some(Slot::Stored { expires_at, .. }) if *expires_at > Instant::now()
        )
    }

    /// Number of pollers currently parked across all keys.
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| match entry.value() {
                Slot::Waiting(waiters) => waiters.len(),
                _ => 0,
            })
            .sum()
    }

    /// Get statistics
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    fn collect_garbage_if_due(&self) {
        let now = Instant::now();
        {
            let mut last_gc = self.last_gc.lock();
            if now.duration_since(*last_gc) <= self.gc_interval {
                return;
            }
            *last_gc = now;
        }

        let removed = self.evict_expired();
        if removed > 0 {
            debug!(store = %self.name, removed = removed, "Garbage collected correlation entries");
        }
    }

    /// Settle a waiter whose deadline fired. Runs under the shard lock so a
    /// concurrent `store` either completed its hand-off or sees the tombstone.
    fn settle_timeout(&self, key: &str, id: u64, receiver: &mut oneshot::Receiver<T>) -> Option<T> {
        let now = Instant::now();

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                receiver.close();
                if let Ok(value) = receiver.try_recv() {
                    return Some(value);
                }
                if let Slot::Waiting(waiters) = occupied.get_mut() {
                    waiters.retain(|w| w.id != id);
                    if waiters.is_empty() {
                        occupied.insert(Slot::TimedOut { at: now });
                    }
                }
                None
            }
            Entry::Vacant(vacant) => {
                receiver.close();
                if let Ok(value) = receiver.try_recv() {
                    return Some(value);
                }
                vacant.insert(Slot::TimedOut { at: now });
                None
            }
        }
    }
}

/// Background task to clean up expired entries
pub async fn cleanup_task<T: Send + Sync + 'static>(
    store: Arc<CorrelationStore<T>>,
    interval: Duration,
) {
    let mut cleanup_interval = tokio::time::interval(interval);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        cleanup_interval.tick().await;
        let removed = store.evict_expired();
        if removed > 0 {
            debug!(store = %store.name, removed = removed, "Cleaned up expired correlation entries");
        }
    }
}

fn hand_off<T>(waiters: &mut VecDeque<Waiter<T>>, mut value: T) -> Result<(), T> {
    while let Some(waiter) = waiters.pop_front() {
        match waiter.sender.send(value) {
            Ok(()) => return Ok(()),
            Err(returned) => value = returned,
        }
    }
    Err(value)
}

/// A poller parked on a key. Dropping it before it settles (cancellation)
/// removes the waiter and leaves a tombstone.
struct ParkedPoller<'a, T> {
    store: &'a CorrelationStore<T>,
    key: &'a str,
    id: u64,
    receiver: oneshot::Receiver<T>,
    settled: bool,
}

impl<T> ParkedPoller<'_, T> {
    fn expire(&mut self) -> Option<T> {
        self.settled = true;
        let found = self
            .store
            .settle_timeout(self.key, self.id, &mut self.receiver);

        match found {
            Some(value) => {
                self.store.stats.total_found.fetch_add(1, Ordering::Relaxed);
                debug!(store = %self.store.name, key = self.key, "Value arrived at the deadline");
                Some(value)
            }
            None => {
                self.store
                    .stats
                    .total_timeouts
                    .fetch_add(1, Ordering::Relaxed);
                debug!(store = %self.store.name, key = self.key, "Timed out waiting for value");
                None
            }
        }
    }
}

impl<T> Drop for ParkedPoller<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        if self
            .store
            .settle_timeout(self.key, self.id, &mut self.receiver)
            .is_some()
        {
            debug!(
                store = %self.store.name,
                key = self.key,
                "Discarding value handed to a cancelled poller"
            );
        } else {
            debug!(store = %self.store.name, key = self.key, "Poller cancelled");
        }
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Per-controller work queue.
//!
//! The queue keeps three views of pending work: `ready` (FIFO of keys to
//! hand out), `dirty` (keys needing processing, collapsing duplicate
//! enqueues) and `processing` (keys currently held by a worker — a key is
//! never re-delivered while in flight; a re-add during processing parks in
//! `dirty` and is queued again on `done`). Delayed re-adds and the per-key
//! exponential backoff feed the same discipline.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::runtime::ObjectKey;

/// Exponential backoff: `base * 2^(failures-1)`, capped.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(20);
        self.base.saturating_mul(1u32 << exponent).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(300),
        }
    }
}

#[derive(Default)]
struct QueueState {
    ready: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    failures: HashMap<ObjectKey, u32>,
    sequence: u64,
    shutdown: bool,
}

#[derive(PartialEq, Eq)]
struct DelayedEntry {
    at: Instant,
    sequence: u64,
    key: ObjectKey,
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at
            .cmp(&other.at)
            .then(self.sequence.cmp(&other.sequence))
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: Backoff,
}

impl WorkQueue {
    pub fn new(backoff: Backoff) -> Self {
        WorkQueue {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }

    /// Enqueues a key. Duplicate enqueues collapse; a key currently being
    /// processed is parked and re-queued once its reconcile returns.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state.lock().expect("queue lock");
        Self::add_locked(&mut state, key);
        drop(state);
        self.notify.notify_one();
    }

    fn add_locked(state: &mut QueueState, key: ObjectKey) {
        if state.shutdown || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if !state.processing.contains(&key) {
            state.ready.push_back(key);
        }
    }

    /// Enqueues a key after a delay.
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            return self.add(key);
        }
        let mut state = self.state.lock().expect("queue lock");
        if state.shutdown {
            return;
        }
        state.sequence += 1;
        let entry = DelayedEntry {
            at: Instant::now() + delay,
            sequence: state.sequence,
            key,
        };
        state.delayed.push(Reverse(entry));
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueues a key after its failure backoff, growing the per-key
    /// failure count.
    pub fn add_rate_limited(&self, key: ObjectKey) {
        let delay = {
            let mut state = self.state.lock().expect("queue lock");
            let failures = state.failures.entry(key.clone()).or_insert(0);
            *failures += 1;
            self.backoff.delay(*failures)
        };
        self.add_after(key, delay);
    }

    /// Resets the failure count after a successful reconcile.
    pub fn forget(&self, key: &ObjectKey) {
        self.state
            .lock()
            .expect("queue lock")
            .failures
            .remove(key);
    }

    /// Marks a key as no longer in flight, re-queueing it if it went dirty
    /// while being processed.
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state.lock().expect("queue lock");
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.ready.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    pub fn shut_down(&self) {
        self.state.lock().expect("queue lock").shutdown = true;
        self.notify.notify_waiters();
    }

    /// Hands out the next key, waiting for work or a due delayed entry.
    /// Returns `None` once the queue is shut down and drained of ready
    /// work.
    pub async fn next(&self) -> Option<ObjectKey> {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("queue lock");
                let now = Instant::now();
                while let Some(Reverse(entry)) = state.delayed.peek() {
                    if entry.at > now {
                        break;
                    }
                    let Reverse(entry) = state.delayed.pop().expect("peeked entry");
                    Self::add_locked(&mut state, entry.key);
                }
                if let Some(key) = state.ready.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutdown {
                    return None;
                }
                state.delayed.peek().map(|Reverse(e)| e.at - now)
            };
            match wait {
                Some(delay) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ObjectKey {
        ObjectKey {
            namespace: "default".to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = Backoff {
            base: Duration::from_millis(500),
            cap: Duration::from_secs(4),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(2), Duration::from_secs(1));
        assert_eq!(backoff.delay(3), Duration::from_secs(2));
        assert_eq!(backoff.delay(4), Duration::from_secs(4));
        assert_eq!(backoff.delay(10), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn duplicate_enqueues_collapse() {
        let queue = WorkQueue::new(Backoff::default());
        queue.add(key("a"));
        queue.add(key("a"));
        queue.add(key("b"));

        assert_eq!(queue.next().await.unwrap(), key("a"));
        assert_eq!(queue.next().await.unwrap(), key("b"));
        queue.shut_down();
        assert_eq!(queue.next().await, None);
    }

    #[tokio::test]
    async fn in_flight_keys_are_not_redelivered() {
        let queue = WorkQueue::new(Backoff::default());
        queue.add(key("a"));
        let held = queue.next().await.unwrap();

        // Re-adding while in flight parks the key.
        queue.add(key("a"));
        queue.shut_down();
        // Nothing ready: the key is parked in dirty until done().
        assert_eq!(queue.next().await, None);

        queue.done(&held);
        assert_eq!(queue.next().await.unwrap(), key("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_keys_surface_when_due() {
        let queue = WorkQueue::new(Backoff::default());
        queue.add_after(key("a"), Duration::from_secs(5));

        let next = tokio::time::timeout(Duration::from_secs(60), queue.next())
            .await
            .expect("delayed key delivered");
        assert_eq!(next.unwrap(), key("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_adds_back_off() {
        let queue = WorkQueue::new(Backoff {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(8),
        });
        queue.add_rate_limited(key("a"));
        let started = Instant::now();
        let delivered = queue.next().await.unwrap();
        assert_eq!(delivered, key("a"));
        assert!(started.elapsed() >= Duration::from_secs(1));
        queue.done(&delivered);

        queue.add_rate_limited(key("a"));
        let started = Instant::now();
        let delivered = queue.next().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(2));
        queue.done(&delivered);

        // Success resets the failure count.
        queue.forget(&delivered);
        queue.add_rate_limited(key("a"));
        let started = Instant::now();
        queue.next().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

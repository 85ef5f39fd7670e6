/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! The reconciliation runtime shared by every controller.
//!
//! Controllers register a [`Reconciler`] plus the watches that feed its
//! queue. The runtime subscribes to the store's watch stream, fans each
//! event out to the registered queues (directly for the controller's own
//! kind, through mapping functions for secondary kinds) and runs a worker
//! pool per controller. Within one (kind, key) reconciliation is strictly
//! serial; everything else proceeds in parallel.

use std::fmt;
use std::sync::Arc;

use store::{Store, StoredObject};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub mod queue;

pub use queue::{Backoff, WorkQueue};

/// Namespace and name of the object a reconcile acts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        ObjectKey {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(meta: &model::Metadata) -> Self {
        ObjectKey {
            namespace: meta.namespace.clone(),
            name: meta.name.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What a reconcile asks the runtime to do next.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<std::time::Duration>,
}

impl ReconcileOutcome {
    /// Nothing further to do; the next watch event re-triggers.
    pub fn done() -> Self {
        ReconcileOutcome::default()
    }

    /// Check back after the given delay even without a watch event.
    pub fn requeue_after(delay: std::time::Duration) -> Self {
        ReconcileOutcome {
            requeue_after: Some(delay),
        }
    }

    /// Run another step right away.
    pub fn immediate() -> Self {
        ReconcileOutcome {
            requeue_after: Some(std::time::Duration::ZERO),
        }
    }
}

/// Recoverable reconcile failures. The runtime requeues the key with
/// backoff; fatal conditions never surface here — controllers record them
/// in status and return an outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] store::StoreError),

    #[error(transparent)]
    Bmc(#[from] bmc::BmcError),

    #[error(transparent)]
    Internal(#[from] eyre::Report),
}

pub type ReconcileResult = Result<ReconcileOutcome, ReconcileError>;

#[async_trait::async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// The kind this controller reconciles; change events of this kind
    /// enqueue the changed object's own key.
    fn kind(&self) -> &'static str;

    /// Executes one step of the state machine for one object.
    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult;
}

/// Maps a changed secondary object to the primary keys to re-reconcile.
pub type WatchMapper = Arc<dyn Fn(&StoredObject) -> Vec<ObjectKey> + Send + Sync>;

pub struct Watch {
    pub kind: &'static str,
    pub mapper: WatchMapper,
}

impl Watch {
    pub fn mapped<F>(kind: &'static str, mapper: F) -> Self
    where
        F: Fn(&StoredObject) -> Vec<ObjectKey> + Send + Sync + 'static,
    {
        Watch {
            kind,
            mapper: Arc::new(mapper),
        }
    }
}

struct Entry {
    reconciler: Arc<dyn Reconciler>,
    watches: Vec<Watch>,
    workers: usize,
    queue: Arc<WorkQueue>,
}

/// Controller registry and scheduler.
pub struct Runtime {
    store: Store,
    backoff: Backoff,
    resync_interval: std::time::Duration,
    entries: Vec<Entry>,
}

impl Runtime {
    pub fn new(store: Store, backoff: Backoff, resync_interval: std::time::Duration) -> Self {
        Runtime {
            store,
            backoff,
            resync_interval,
            entries: Vec::new(),
        }
    }

    pub fn register(
        &mut self,
        reconciler: Arc<dyn Reconciler>,
        watches: Vec<Watch>,
        workers: usize,
    ) {
        self.entries.push(Entry {
            reconciler,
            watches,
            workers: workers.max(1),
            queue: Arc::new(WorkQueue::new(self.backoff)),
        });
    }

    /// Runs all controllers until the token is cancelled, then drains
    /// in-flight reconciles and returns.
    pub async fn start(self, shutdown: CancellationToken) {
        // Subscribe before the initial sync so no event can fall between
        // the list and the stream.
        let watch_rx = self.store.watch();

        let entries: Vec<Arc<Entry>> = self.entries.into_iter().map(Arc::new).collect();
        for entry in &entries {
            seed(&self.store, entry);
        }

        let mut tasks = JoinSet::new();

        {
            let entries = entries.clone();
            let store = self.store.clone();
            let shutdown = shutdown.clone();
            let mut watch_rx = watch_rx;
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        event = watch_rx.recv() => match event {
                            Ok(event) => dispatch(&entries, &event),
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                                tracing::warn!(missed, "watch stream lagged, resynchronising");
                                for entry in &entries {
                                    seed(&store, entry);
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        },
                    }
                }
            });
        }

        // Periodic full resync: re-list everything and enqueue it, so a
        // change whose event was never observed still converges.
        {
            let entries = entries.clone();
            let store = self.store.clone();
            let shutdown = shutdown.clone();
            let resync_interval = self.resync_interval;
            tasks.spawn(async move {
                let mut ticker = tokio::time::interval(resync_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            for entry in &entries {
                                seed(&store, entry);
                            }
                        }
                    }
                }
            });
        }

        for entry in &entries {
            for worker in 0..entry.workers {
                let entry = entry.clone();
                tasks.spawn(async move {
                    worker_loop(entry, worker).await;
                });
            }
        }

        shutdown.cancelled().await;
        for entry in &entries {
            entry.queue.shut_down();
        }
        while tasks.join_next().await.is_some() {}
        tracing::info!("runtime drained");
    }
}

fn seed(store: &Store, entry: &Entry) {
    for stored in store.list_stored_all(entry.reconciler.kind()) {
        let meta = stored.metadata();
        entry.queue.add(ObjectKey::of(&meta));
    }
}

fn dispatch(entries: &[Arc<Entry>], event: &store::WatchEvent) {
    let kind = event.object.kind.as_str();
    let meta = event.object.metadata();
    for entry in entries {
        if entry.reconciler.kind() == kind {
            entry.queue.add(ObjectKey::of(&meta));
        }
        for watch in &entry.watches {
            if watch.kind != kind {
                continue;
            }
            for key in (watch.mapper)(&event.object) {
                entry.queue.add(key);
            }
        }
    }
}

async fn worker_loop(entry: Arc<Entry>, worker: usize) {
    let kind = entry.reconciler.kind();
    tracing::debug!(kind, worker, "worker started");
    while let Some(key) = entry.queue.next().await {
        match entry.reconciler.reconcile(&key).await {
            Ok(outcome) => {
                entry.queue.forget(&key);
                if let Some(delay) = outcome.requeue_after {
                    entry.queue.add_after(key.clone(), delay);
                }
            }
            Err(error) => {
                tracing::warn!(kind, object = %key, %error, "reconcile failed, backing off");
                entry.queue.add_rate_limited(key.clone());
            }
        }
        entry.queue.done(&key);
    }
    tracing::debug!(kind, worker, "worker stopped");
}

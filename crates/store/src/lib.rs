/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Object store client of the ferrite control plane.
//!
//! The store is a strongly-consistent key/value store keyed by
//! (kind, namespace, name). It provides optimistic concurrency via
//! monotonically increasing resource versions, JSON-merge patches with the
//! status section as a separate subresource, label-selector lists, watch
//! streams, finalizer semantics and owner-reference cascading deletion.
//!
//! This crate ships the in-process reference implementation the controllers
//! and the test harness run against. Controllers only ever take deep copies:
//! every read hands out an owned value, every write is a merge patch guarded
//! by the resource version of the copy the caller read.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use model::selector::LabelSelector;
use model::{Metadata, Resource};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

mod error;
mod patch;

pub use error::{StoreError, StoreResult};
pub use patch::merge_patch;

const WATCH_CAPACITY: usize = 16384;

/// A dynamically-typed object as kept in the store.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub kind: String,
    pub value: Value,
}

impl StoredObject {
    pub fn metadata(&self) -> Metadata {
        self.value
            .get("metadata")
            .cloned()
            .and_then(|m| serde_json::from_value(m).ok())
            .unwrap_or_default()
    }

    /// Decodes into a typed resource when the kind matches.
    pub fn decode<R: Resource>(&self) -> Option<R> {
        if self.kind != R::KIND {
            return None;
        }
        serde_json::from_value(self.value.clone()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

/// One change notification. Delivered with the full object as of the
/// change; deletions carry the last observed content.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event: EventKind,
    pub object: StoredObject,
}

type Key = (String, String, String);

#[derive(Default)]
struct Shelves {
    objects: BTreeMap<Key, StoredObject>,
    revision: u64,
}

/// Handle to the store. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Shelves>>,
    watch_tx: broadcast::Sender<WatchEvent>,
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (watch_tx, _) = broadcast::channel(WATCH_CAPACITY);
        Store {
            inner: Arc::new(Mutex::new(Shelves::default())),
            watch_tx,
        }
    }

    /// Subscribes to all future change notifications. A receiver that falls
    /// behind observes a lag error and must resynchronise by listing.
    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.watch_tx.subscribe()
    }

    /// Persists a new object. The store assigns UID, resource version,
    /// generation and creation timestamp.
    pub fn create<R: Resource>(&self, mut obj: R) -> StoreResult<R> {
        let mut shelves = self.inner.lock().expect("store lock");
        {
            let meta = obj.metadata_mut();
            if meta.name.is_empty() || meta.namespace.is_empty() {
                return Err(StoreError::InvalidObject(format!(
                    "{} requires name and namespace",
                    R::KIND
                )));
            }
            meta.uid = Uuid::new_v4();
            meta.generation = 1;
            meta.creation_timestamp = Some(Utc::now());
            meta.deletion_timestamp = None;
        }
        let key = key_of::<R>(obj.metadata());
        if shelves.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: R::KIND.to_string(),
                name: obj.metadata().name.clone(),
            });
        }
        shelves.revision += 1;
        obj.metadata_mut().resource_version = shelves.revision;

        let stored = StoredObject {
            kind: R::KIND.to_string(),
            value: serde_json::to_value(&obj)?,
        };
        shelves.objects.insert(key, stored.clone());
        let _ = self.watch_tx.send(WatchEvent {
            event: EventKind::Added,
            object: stored,
        });
        Ok(obj)
    }

    pub fn get<R: Resource>(&self, namespace: &str, name: &str) -> StoreResult<R> {
        self.try_get(namespace, name)?
            .ok_or_else(|| StoreError::not_found(R::KIND, name))
    }

    pub fn try_get<R: Resource>(&self, namespace: &str, name: &str) -> StoreResult<Option<R>> {
        let shelves = self.inner.lock().expect("store lock");
        let key = (
            R::KIND.to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        match shelves.objects.get(&key) {
            Some(stored) => Ok(Some(serde_json::from_value(stored.value.clone())?)),
            None => Ok(None),
        }
    }

    /// Lists objects of one kind in a namespace, optionally filtered by a
    /// label selector. Ordered by name.
    pub fn list<R: Resource>(
        &self,
        namespace: &str,
        selector: Option<&LabelSelector>,
    ) -> StoreResult<Vec<R>> {
        let shelves = self.inner.lock().expect("store lock");
        let mut result = Vec::new();
        for ((kind, ns, _), stored) in shelves.objects.iter() {
            if kind != R::KIND || ns != namespace {
                continue;
            }
            let obj: R = serde_json::from_value(stored.value.clone())?;
            if let Some(selector) = selector
                && !selector.matches(&obj.metadata().labels)
            {
                continue;
            }
            result.push(obj);
        }
        Ok(result)
    }

    /// Dynamically-typed list used by watch mappers.
    pub fn list_stored(&self, kind: &str, namespace: &str) -> Vec<StoredObject> {
        let shelves = self.inner.lock().expect("store lock");
        shelves
            .objects
            .iter()
            .filter(|((k, ns, _), _)| k == kind && ns == namespace)
            .map(|(_, stored)| stored.clone())
            .collect()
    }

    /// Lists one kind across all namespaces; used for the initial sync
    /// when a watch stream is (re)established.
    pub fn list_stored_all(&self, kind: &str) -> Vec<StoredObject> {
        let shelves = self.inner.lock().expect("store lock");
        shelves
            .objects
            .iter()
            .filter(|((k, _, _), _)| k == kind)
            .map(|(_, stored)| stored.clone())
            .collect()
    }

    /// Applies a JSON-merge patch to everything but the status section,
    /// guarded by the resource version of the copy the caller read.
    pub fn patch<R: Resource>(&self, read: &R, patch: Value) -> StoreResult<R> {
        if patch.get("status").is_some() {
            return Err(StoreError::InvalidObject(
                "status is a subresource; use patch_status".to_string(),
            ));
        }
        self.commit::<R>(read, patch, false)
    }

    /// Writes the status section through its dedicated subresource path.
    /// The status subtree is replaced wholesale: callers hand in the full
    /// status computed on their deep copy, so fields they cleared actually
    /// clear.
    pub fn patch_status<R: Resource>(&self, read: &R, status: Value) -> StoreResult<R> {
        let patch = serde_json::json!({ "status": status });
        self.commit::<R>(read, patch, true)
    }

    fn commit<R: Resource>(&self, read: &R, patch: Value, status_only: bool) -> StoreResult<R> {
        let mut shelves = self.inner.lock().expect("store lock");
        let read_meta = read.metadata();
        let key = key_of::<R>(read_meta);
        let stored = shelves
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(R::KIND, &read_meta.name))?;
        let stored_meta = stored.metadata();
        if stored_meta.resource_version != read_meta.resource_version {
            return Err(StoreError::Conflict {
                kind: R::KIND.to_string(),
                name: read_meta.name.clone(),
                expected: read_meta.resource_version,
            });
        }

        let mut new_value = stored.value.clone();
        if status_only {
            new_value["status"] = patch
                .get("status")
                .cloned()
                .unwrap_or(Value::Object(serde_json::Map::new()));
        } else {
            merge_patch(&mut new_value, &patch);
        }

        // Identity and lifecycle fields are store-owned; restore whatever
        // the patch may have touched.
        let mut new_meta: Metadata = new_value
            .get("metadata")
            .cloned()
            .and_then(|m| serde_json::from_value(m).ok())
            .unwrap_or_default();
        new_meta.name = stored_meta.name.clone();
        new_meta.namespace = stored_meta.namespace.clone();
        new_meta.uid = stored_meta.uid;
        new_meta.creation_timestamp = stored_meta.creation_timestamp;
        new_meta.deletion_timestamp = stored_meta.deletion_timestamp;
        if status_only {
            new_meta.generation = stored_meta.generation;
        } else {
            let spec_changed = stored.value.get("spec") != new_value.get("spec");
            new_meta.generation = stored_meta.generation + i64::from(spec_changed);
        }
        shelves.revision += 1;
        new_meta.resource_version = shelves.revision;
        new_value["metadata"] = serde_json::to_value(&new_meta)?;

        let obj: R = serde_json::from_value(new_value.clone())?;
        let stored = StoredObject {
            kind: R::KIND.to_string(),
            value: new_value,
        };
        shelves.objects.insert(key, stored.clone());
        let _ = self.watch_tx.send(WatchEvent {
            event: EventKind::Modified,
            object: stored,
        });

        if !status_only {
            // A patch may have cleared the last finalizer.
            self.collect_garbage(&mut shelves);
        }
        Ok(obj)
    }

    /// Requests deletion. With finalizers present the object is only marked
    /// (deletion timestamp set); it is removed once every finalizer is gone
    /// and no child blocks the removal via `block_owner_deletion`.
    pub fn delete<R: Resource>(&self, namespace: &str, name: &str) -> StoreResult<()> {
        let mut shelves = self.inner.lock().expect("store lock");
        let key = (
            R::KIND.to_string(),
            namespace.to_string(),
            name.to_string(),
        );
        let Some(stored) = shelves.objects.get(&key).cloned() else {
            return Err(StoreError::not_found(R::KIND, name));
        };
        let mut meta = stored.metadata();
        if meta.deletion_timestamp.is_none() {
            meta.deletion_timestamp = Some(Utc::now());
            shelves.revision += 1;
            meta.resource_version = shelves.revision;
            let mut value = stored.value;
            value["metadata"] = serde_json::to_value(&meta)?;
            let stored = StoredObject {
                kind: R::KIND.to_string(),
                value,
            };
            shelves.objects.insert(key, stored.clone());
            let _ = self.watch_tx.send(WatchEvent {
                event: EventKind::Modified,
                object: stored,
            });
        }
        self.collect_garbage(&mut shelves);
        Ok(())
    }

    /// Deletes if present; absence is not an error.
    pub fn delete_if_present<R: Resource>(&self, namespace: &str, name: &str) -> StoreResult<()> {
        match self.delete::<R>(namespace, name) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Removes every object marked for deletion whose finalizers are gone
    /// and that no child blocks, cascading along controller owner
    /// references, until a fixpoint is reached.
    fn collect_garbage(&self, shelves: &mut Shelves) {
        loop {
            let deleting: Vec<(Key, Metadata)> = shelves
                .objects
                .iter()
                .filter(|(_, stored)| StoredObject::metadata(stored).is_marked_for_deletion())
                .map(|(key, stored)| (key.clone(), StoredObject::metadata(stored)))
                .collect();

            let mut removed_any = false;
            for (key, meta) in deleting {
                if !meta.finalizers.is_empty() {
                    continue;
                }
                let blocked = shelves.objects.values().any(|candidate| {
                    StoredObject::metadata(candidate)
                        .owner_references
                        .iter()
                        .any(|r| r.uid == meta.uid && r.block_owner_deletion)
                });
                if blocked {
                    continue;
                }

                let removed = shelves.objects.remove(&key).expect("object present");
                removed_any = true;
                let _ = self.watch_tx.send(WatchEvent {
                    event: EventKind::Deleted,
                    object: removed,
                });
                self.cascade(shelves, meta.uid);
            }
            if !removed_any {
                break;
            }
        }
    }

    /// Strips owner references to a removed object and marks
    /// controller-owned children for deletion.
    fn cascade(&self, shelves: &mut Shelves, owner_uid: Uuid) {
        let child_keys: Vec<Key> = shelves
            .objects
            .iter()
            .filter(|(_, stored)| {
                StoredObject::metadata(stored)
                    .owner_references
                    .iter()
                    .any(|r| r.uid == owner_uid)
            })
            .map(|(key, _)| key.clone())
            .collect();

        for key in child_keys {
            let stored = shelves.objects.get(&key).cloned().expect("child present");
            let mut meta = stored.metadata();
            let was_controlled = meta
                .owner_references
                .iter()
                .any(|r| r.uid == owner_uid && r.controller);
            meta.owner_references.retain(|r| r.uid != owner_uid);
            if was_controlled && meta.deletion_timestamp.is_none() {
                meta.deletion_timestamp = Some(Utc::now());
            }
            shelves.revision += 1;
            meta.resource_version = shelves.revision;
            let mut value = stored.value;
            if let Ok(m) = serde_json::to_value(&meta) {
                value["metadata"] = m;
            }
            let stored = StoredObject {
                kind: stored.kind,
                value,
            };
            shelves.objects.insert(key, stored.clone());
            let _ = self.watch_tx.send(WatchEvent {
                event: EventKind::Modified,
                object: stored,
            });
        }
    }
}

fn key_of<R: Resource>(meta: &Metadata) -> Key {
    (
        R::KIND.to_string(),
        meta.namespace.clone(),
        meta.name.clone(),
    )
}

#[cfg(test)]
mod tests {
    use model::bmc::Bmc;
    use model::maintenance::ServerMaintenance;
    use model::server::Server;
    use model::{Metadata, OwnerReference};
    use serde_json::json;

    use super::*;

    fn bmc(name: &str) -> Bmc {
        Bmc {
            metadata: Metadata::named(name, "default"),
            ..Default::default()
        }
    }

    fn server(name: &str) -> Server {
        Server {
            metadata: Metadata::named(name, "default"),
            ..Default::default()
        }
    }

    #[test]
    fn create_assigns_identity() {
        let store = Store::new();
        let created = store.create(bmc("bmc-0")).unwrap();
        assert_ne!(created.metadata.uid, Uuid::nil());
        assert!(created.metadata.resource_version > 0);
        assert_eq!(created.metadata.generation, 1);

        let fetched: Bmc = store.get("default", "bmc-0").unwrap();
        assert_eq!(fetched, created);
        assert!(store.create(bmc("bmc-0")).is_err());
    }

    #[test]
    fn patch_is_guarded_by_resource_version() {
        let store = Store::new();
        let created = store.create(bmc("bmc-0")).unwrap();

        let patched = store
            .patch(
                &created,
                json!({"metadata": {"labels": {"rack": "r1"}}}),
            )
            .unwrap();
        assert_eq!(patched.metadata.labels["rack"], "r1");

        // The stale copy no longer commits.
        let err = store
            .patch(&created, json!({"metadata": {"labels": {"rack": "r2"}}}))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn status_is_a_separate_subresource() {
        let store = Store::new();
        let created = store.create(server("server-0")).unwrap();

        let err = store
            .patch(&created, json!({"status": {"state": "available"}}))
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidObject(_)));

        let patched = store
            .patch_status(&created, json!({"state": "available"}))
            .unwrap();
        assert_eq!(patched.status.state, model::server::ServerState::Available);
        // Status writes do not bump the generation.
        assert_eq!(patched.metadata.generation, created.metadata.generation);
    }

    #[test]
    fn spec_changes_bump_generation() {
        let store = Store::new();
        let created = store.create(server("server-0")).unwrap();
        let patched = store
            .patch(&created, json!({"spec": {"systemUuid": "abc"}}))
            .unwrap();
        assert_eq!(patched.metadata.generation, 2);
    }

    #[test]
    fn finalizers_defer_removal() {
        let store = Store::new();
        let created = store.create(server("server-0")).unwrap();
        let held = store
            .patch(
                &created,
                json!({"metadata": {"finalizers": ["server.metal"]}}),
            )
            .unwrap();

        store.delete::<Server>("default", "server-0").unwrap();
        let marked: Server = store.get("default", "server-0").unwrap();
        assert!(marked.metadata.is_marked_for_deletion());

        // Clearing the finalizer lets the store remove the object.
        let _ = held;
        store
            .patch(&marked, json!({"metadata": {"finalizers": []}}))
            .unwrap();
        assert!(store.try_get::<Server>("default", "server-0").unwrap().is_none());
    }

    #[test]
    fn controller_children_are_cascaded() {
        let store = Store::new();
        let owner = store.create(bmc("bmc-0")).unwrap();
        let mut child = server("bmc-0-system-0");
        child.metadata.owner_references.push(OwnerReference::controller_of(
            Bmc::KIND,
            "bmc-0",
            owner.metadata.uid,
        ));
        store.create(child).unwrap();

        store.delete::<Bmc>("default", "bmc-0").unwrap();
        assert!(store.try_get::<Bmc>("default", "bmc-0").unwrap().is_none());
        assert!(
            store
                .try_get::<Server>("default", "bmc-0-system-0")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn blocking_children_hold_up_the_owner() {
        let store = Store::new();
        let owner = store.create(bmc("bmc-0")).unwrap();
        let mut child = ServerMaintenance {
            metadata: Metadata::named("lease-0", "default"),
            ..Default::default()
        };
        child.metadata.owner_references.push(
            OwnerReference::controller_of(Bmc::KIND, "bmc-0", owner.metadata.uid).blocking(),
        );
        // A finalizer keeps the child alive until its controller finishes.
        child.metadata.finalizers.push("servermaintenance.metal".to_string());
        let child = store.create(child).unwrap();

        store.delete::<Bmc>("default", "bmc-0").unwrap();
        // The owner is marked but still present.
        let marked: Bmc = store.get("default", "bmc-0").unwrap();
        assert!(marked.metadata.is_marked_for_deletion());

        // Once the child goes away, the owner follows.
        let child: ServerMaintenance = store.get("default", "lease-0").unwrap();
        store
            .patch(&child, json!({"metadata": {"finalizers": []}}))
            .unwrap();
        store
            .delete_if_present::<ServerMaintenance>("default", "lease-0")
            .unwrap();
        assert!(store.try_get::<Bmc>("default", "bmc-0").unwrap().is_none());
        let _ = child;
    }

    #[test]
    fn watch_delivers_lifecycle_events() {
        let store = Store::new();
        let mut watch = store.watch();
        let created = store.create(bmc("bmc-0")).unwrap();
        store
            .patch(&created, json!({"metadata": {"labels": {"a": "b"}}}))
            .unwrap();
        store.delete::<Bmc>("default", "bmc-0").unwrap();

        let added = watch.try_recv().unwrap();
        assert_eq!(added.event, EventKind::Added);
        assert_eq!(added.object.metadata().name, "bmc-0");
        // Label patch, then the deletion mark, then the removal itself.
        assert_eq!(watch.try_recv().unwrap().event, EventKind::Modified);
        assert_eq!(watch.try_recv().unwrap().event, EventKind::Modified);
        assert_eq!(watch.try_recv().unwrap().event, EventKind::Deleted);
        assert!(watch.try_recv().is_err());
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Object metadata shared by every resource kind.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name, identity, labels, ownership and lifecycle bookkeeping of one
/// stored object. The store fills in `uid`, `resource_version`,
/// `generation` and the timestamps; users supply the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Metadata {
    pub name: String,
    pub namespace: String,
    pub uid: Uuid,
    /// Monotonic write counter used for optimistic concurrency. Zero means
    /// "not yet persisted".
    pub resource_version: u64,
    /// Bumped whenever the spec section changes.
    pub generation: i64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    pub creation_timestamp: Option<DateTime<Utc>>,
    /// Set when deletion has been requested but finalizers are still
    /// present. Controllers treat this as "begin teardown".
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn named(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Metadata {
            name: name.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    pub fn is_marked_for_deletion(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// The controller owner reference, if any. At most one owner reference
    /// may have `controller` set.
    pub fn controller_owner(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    pub fn is_controlled_by(&self, uid: Uuid) -> bool {
        self.controller_owner().is_some_and(|r| r.uid == uid)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }
}

/// Link from an owned object back to its owner. The store cascades
/// deletion along controller edges; `block_owner_deletion` holds up the
/// owner's removal while the child still exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
    pub controller: bool,
    pub block_owner_deletion: bool,
}

impl OwnerReference {
    /// Builds the controller owner reference for a child created by
    /// `owner`'s controller.
    pub fn controller_of(kind: &str, name: &str, uid: Uuid) -> Self {
        OwnerReference {
            kind: kind.to_string(),
            name: name.to_string(),
            uid,
            controller: true,
            block_owner_deletion: false,
        }
    }

    pub fn blocking(mut self) -> Self {
        self.block_owner_deletion = true;
        self
    }
}

/// Reference to another object in the same namespace. The UID is recorded
/// where an invariant requires detecting replacement of the target (a
/// deleted and recreated object keeps its name but not its UID).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectReference {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<Uuid>,
}

impl ObjectReference {
    pub fn named(name: impl Into<String>) -> Self {
        ObjectReference {
            name: name.into(),
            uid: None,
        }
    }

    pub fn with_uid(name: impl Into<String>, uid: Uuid) -> Self {
        ObjectReference {
            name: name.into(),
            uid: Some(uid),
        }
    }
}

/// Reference to a credential secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretReference {
    pub name: String,
}

impl SecretReference {
    pub fn named(name: impl Into<String>) -> Self {
        SecretReference { name: name.into() }
    }
}

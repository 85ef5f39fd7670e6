/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
/// Errors surfaced by the object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: String, name: String },

    /// The object was modified since the caller read it. Callers re-read
    /// and recompute.
    #[error("{kind} {name} was modified concurrently (expected version {expected})")]
    Conflict {
        kind: String,
        name: String,
        expected: u64,
    },

    #[error("invalid object: {0}")]
    InvalidObject(String),

    #[error("object (de)serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(kind: &str, name: &str) -> Self {
        StoreError::NotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

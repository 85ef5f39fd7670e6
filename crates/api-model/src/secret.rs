/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Credential secrets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Metadata, Resource};

pub const USERNAME_KEY: &str = "username";
pub const PASSWORD_KEY: &str = "password";

/// An opaque credential record. Secrets written by controllers are marked
/// immutable; rotation always creates a new record instead of mutating an
/// existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Secret {
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
    pub immutable: bool,
}

impl Secret {
    pub fn credentials(
        name: impl Into<String>,
        namespace: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut data = BTreeMap::new();
        data.insert(USERNAME_KEY.to_string(), username.into());
        data.insert(PASSWORD_KEY.to_string(), password.into());
        Secret {
            metadata: Metadata::named(name, namespace),
            data,
            immutable: false,
        }
    }

    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }

    pub fn username(&self) -> Option<&str> {
        self.data.get(USERNAME_KEY).map(String::as_str)
    }

    pub fn password(&self) -> Option<&str> {
        self.data.get(PASSWORD_KEY).map(String::as_str)
    }
}

impl Resource for Secret {
    const KIND: &'static str = "Secret";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

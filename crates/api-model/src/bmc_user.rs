/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BMCUser: lifecycle and rotation of one account on a BMC, plus its Set
//! variant.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::condition::Condition;
use crate::selector::LabelSelector;
use crate::set::SetStatus;
use crate::{Metadata, ObjectReference, Resource, SecretReference};

pub const CONDITION_READY: &str = "Ready";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcUser {
    pub metadata: Metadata,
    pub spec: BmcUserSpec,
    pub status: BmcUserStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcUserSpec {
    pub username: String,
    pub role: BmcUserRole,
    pub bmc_ref: ObjectReference,
    /// The intended credential. Left unset to have the controller generate
    /// one; the controller then patches the reference in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bmc_secret_ref: Option<SecretReference>,
    /// Rotate the password this long after the last rotation.
    #[serde(
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub rotation_period: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "camelCase")]
pub enum BmcUserRole {
    #[default]
    #[strum(serialize = "Administrator")]
    Administrator,
    #[strum(serialize = "Operator")]
    Operator,
    #[strum(serialize = "ReadOnly")]
    ReadOnly,
}

impl BmcUserRole {
    /// Role string as the wire protocol spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            BmcUserRole::Administrator => "Administrator",
            BmcUserRole::Operator => "Operator",
            BmcUserRole::ReadOnly => "ReadOnly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcUserStatus {
    /// Vendor-assigned account id on the BMC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_rotation: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_expiration: Option<DateTime<Utc>>,
    /// The credential last successfully authenticated against the BMC.
    /// Trails the spec reference during a rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_bmc_secret_ref: Option<SecretReference>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for BmcUser {
    const KIND: &'static str = "BMCUser";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcUserSet {
    pub metadata: Metadata,
    pub spec: BmcUserSetSpec,
    pub status: SetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcUserSetSpec {
    /// Selects the target BMCs by label.
    pub selector: LabelSelector,
    pub template: BmcUserTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcUserTemplate {
    pub username: String,
    pub role: BmcUserRole,
    #[serde(
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub rotation_period: Option<Duration>,
}

impl Resource for BmcUserSet {
    const KIND: &'static str = "BMCUserSet";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! ServerMaintenance: the cooperative lease granting one controller the
//! right to disrupt a server, plus its Set variant.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::condition::Condition;
use crate::selector::LabelSelector;
use crate::server::Power;
use crate::set::SetStatus;
use crate::{Metadata, ObjectReference, Resource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMaintenance {
    pub metadata: Metadata,
    pub spec: ServerMaintenanceSpec,
    pub status: ServerMaintenanceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMaintenanceSpec {
    pub server_ref: ObjectReference,
    pub policy: MaintenancePolicy,
    /// Desired power of the server while the lease is held. Patched by the
    /// holder to drive reboot cycles.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_power: Option<Power>,
}

/// Who gets a say before a server is taken into maintenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum MaintenancePolicy {
    /// Grant as soon as the server is free.
    #[default]
    Enforced,
    /// Grant only once the owning claim approves.
    OwnerApproval,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMaintenanceStatus {
    pub state: MaintenanceState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
pub enum MaintenanceState {
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    Unspecified,
    #[serde(rename = "pending")]
    #[strum(serialize = "pending")]
    Pending,
    #[serde(rename = "inMaintenance")]
    #[strum(serialize = "inMaintenance")]
    InMaintenance,
    #[serde(rename = "completed")]
    #[strum(serialize = "completed")]
    Completed,
    #[serde(rename = "failed")]
    #[strum(serialize = "failed")]
    Failed,
}

impl MaintenanceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MaintenanceState::Completed | MaintenanceState::Failed)
    }
}

impl Resource for ServerMaintenance {
    const KIND: &'static str = "ServerMaintenance";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMaintenanceSet {
    pub metadata: Metadata,
    pub spec: ServerMaintenanceSetSpec,
    pub status: SetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMaintenanceSetSpec {
    /// Selects the target servers by label.
    pub selector: LabelSelector,
    pub template: ServerMaintenanceTemplate,
}

/// Per-server lease settings stamped onto every child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerMaintenanceTemplate {
    pub policy: MaintenancePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_power: Option<Power>,
}

impl Resource for ServerMaintenanceSet {
    const KIND: &'static str = "ServerMaintenanceSet";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

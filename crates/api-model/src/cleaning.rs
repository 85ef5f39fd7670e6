/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! ServerCleaning: multi-task sanitisation of one or more servers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::selector::LabelSelector;
use crate::{Metadata, ObjectReference, Resource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerCleaning {
    pub metadata: Metadata,
    pub spec: ServerCleaningSpec,
    pub status: ServerCleaningStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerCleaningSpec {
    /// A single server to clean. Mutually exclusive with `selector`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_ref: Option<ObjectReference>,
    /// Selects servers to clean by label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_wipe: Option<DiskWipe>,
    pub bios_reset: bool,
    /// Accepted for forward compatibility; a manager reset is not executed
    /// as a cleaning step because no lease-respecting path exists for it.
    pub bmc_reset: bool,
    pub network_cleanup: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskWipe {
    pub method: bmc::EraseMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerCleaningStatus {
    pub state: CleaningState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub server_cleaning_statuses: Vec<ServerCleaningServerStatus>,
}

/// Per-server progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerCleaningServerStatus {
    pub server: String,
    pub state: CleaningState,
    pub percent_complete: u8,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleaning_tasks: Vec<CleaningTaskStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
pub enum CleaningState {
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    Unspecified,
    #[serde(rename = "inProgress")]
    #[strum(serialize = "inProgress")]
    InProgress,
    #[serde(rename = "completed")]
    #[strum(serialize = "completed")]
    Completed,
    #[serde(rename = "failed")]
    #[strum(serialize = "failed")]
    Failed,
}

impl CleaningState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CleaningState::Completed | CleaningState::Failed)
    }
}

/// One sanitisation task submitted to a BMC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct CleaningTaskStatus {
    /// Poll handle on the BMC. Opaque and not portable across BMC
    /// replacement.
    pub task_uri: String,
    #[serde(rename = "type")]
    pub kind: CleaningTaskKind,
    /// The entity the task acts on (drive, BIOS, NIC).
    #[serde(skip_serializing_if = "String::is_empty")]
    pub target_id: String,
    pub state: bmc::TaskState,
    pub percent_complete: u8,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "camelCase")]
pub enum CleaningTaskKind {
    #[default]
    #[strum(serialize = "diskWipe")]
    DiskWipe,
    #[strum(serialize = "biosReset")]
    BiosReset,
    #[strum(serialize = "networkCleanup")]
    NetworkCleanup,
}

impl Resource for ServerCleaning {
    const KIND: &'static str = "ServerCleaning";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

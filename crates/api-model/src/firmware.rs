/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Types shared by the firmware upgrade resources (BMCVersion, BIOSVersion,
//! ServerBIOS).

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::SecretReference;

/// Where to fetch a firmware image from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ImageSpec {
    pub uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_protocol: Option<String>,
    /// Credentials for the image server, if it requires any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretReference>,
}

/// Whether an upgrade may be pushed when the BMC claims the version is
/// already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum UpdatePolicy {
    #[default]
    Normal,
    Force,
}

/// Lifecycle of one firmware upgrade record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
pub enum FirmwareUpdateState {
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    Unspecified,
    #[serde(rename = "pending")]
    #[strum(serialize = "pending")]
    Pending,
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

impl FirmwareUpdateState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FirmwareUpdateState::Completed | FirmwareUpdateState::Failed
        )
    }
}

/// Persisted poll handle of a long-running upgrade on the BMC. Written
/// before the issuing reconcile returns so a crash never orphans the
/// vendor task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct UpgradeTask {
    pub uri: String,
    pub state: bmc::TaskState,
    pub status: bmc::TaskHealth,
    pub percent_complete: u8,
}

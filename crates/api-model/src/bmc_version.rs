/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BMCVersion: desired BMC firmware for a single BMC, and its Set variant.

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::firmware::{FirmwareUpdateState, ImageSpec, UpdatePolicy, UpgradeTask};
use crate::maintenance::MaintenancePolicy;
use crate::selector::LabelSelector;
use crate::set::SetStatus;
use crate::{Metadata, ObjectReference, Resource};

/// Condition types journaling the upgrade state machine while the record
/// is `inProgress`.
pub const CONDITION_MAINTENANCE_CREATED: &str = "ServerMaintenanceCreated";
pub const CONDITION_MAINTENANCE_WAITING: &str = "ServerMaintenanceWaiting";
pub const CONDITION_BMC_RESET: &str = "BMCConditionReset";
pub const CONDITION_UPGRADE_ISSUED: &str = "VersionUpgradeIssued";
pub const CONDITION_UPGRADE_COMPLETED: &str = "VersionUpgradeCompleted";
pub const CONDITION_UPGRADE_REBOOT: &str = "VersionUpgradeReboot";
pub const CONDITION_UPGRADE_VERIFICATION: &str = "VersionUpgradeVerification";
/// Checkpoint of the last observable task transition; its reason holds a
/// fingerprint of the task state so the timestamp moves exactly when the
/// task does. Stalled tasks are polled with growing backoff.
pub const CONDITION_UPGRADE_CHECKPOINT: &str = "VersionUpgradeCheckpoint";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcVersion {
    pub metadata: Metadata,
    pub spec: BmcVersionSpec,
    pub status: BmcVersionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcVersionSpec {
    pub bmc_ref: ObjectReference,
    /// Target firmware version string, compared against what the BMC
    /// reports.
    pub version: String,
    pub image: ImageSpec,
    pub server_maintenance_policy: MaintenancePolicy,
    pub update_policy: UpdatePolicy,
    /// Maintenance leases protecting the servers behind the BMC. Populated
    /// by the user to bring their own leases, otherwise created and owned
    /// by the controller.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub server_maintenance_refs: Vec<ObjectReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcVersionStatus {
    pub state: FirmwareUpdateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_task: Option<UpgradeTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for BmcVersion {
    const KIND: &'static str = "BMCVersion";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcVersionSet {
    pub metadata: Metadata,
    pub spec: BmcVersionSetSpec,
    pub status: SetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcVersionSetSpec {
    /// Selects the target BMCs by label.
    pub selector: LabelSelector,
    pub template: BmcVersionTemplate,
}

/// Upgrade settings stamped onto every child BMCVersion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcVersionTemplate {
    pub version: String,
    pub image: ImageSpec,
    pub server_maintenance_policy: MaintenancePolicy,
    pub update_policy: UpdatePolicy,
}

impl Resource for BmcVersionSet {
    const KIND: &'static str = "BMCVersionSet";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

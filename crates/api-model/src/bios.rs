/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BIOS resources: BIOSVersion (firmware target for one server, plus Set
//! variant) and ServerBIOS (firmware and settings target with the
//! power-cycle substates).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::condition::Condition;
use crate::firmware::{FirmwareUpdateState, ImageSpec, UpdatePolicy, UpgradeTask};
use crate::maintenance::MaintenancePolicy;
use crate::selector::LabelSelector;
use crate::set::SetStatus;
use crate::{Metadata, ObjectReference, Resource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BiosVersion {
    pub metadata: Metadata,
    pub spec: BiosVersionSpec,
    pub status: BiosVersionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BiosVersionSpec {
    pub server_ref: ObjectReference,
    pub version: String,
    pub image: ImageSpec,
    pub server_maintenance_policy: MaintenancePolicy,
    pub update_policy: UpdatePolicy,
    /// Lease protecting the server during the upgrade. User-provided or
    /// controller-owned, same rules as on BMCVersion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_maintenance_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BiosVersionStatus {
    pub state: FirmwareUpdateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_task: Option<UpgradeTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Resource for BiosVersion {
    const KIND: &'static str = "BIOSVersion";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BiosVersionSet {
    pub metadata: Metadata,
    pub spec: BiosVersionSetSpec,
    pub status: SetStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BiosVersionSetSpec {
    /// Selects the target servers by label.
    pub selector: LabelSelector,
    pub template: BiosVersionTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BiosVersionTemplate {
    pub version: String,
    pub image: ImageSpec,
    pub server_maintenance_policy: MaintenancePolicy,
    pub update_policy: UpdatePolicy,
}

impl Resource for BiosVersionSet {
    const KIND: &'static str = "BIOSVersionSet";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/// Condition types used by the ServerBIOS version-upgrade path. The same
/// grant/issue/poll/reboot/verify journal as BMCVersion.
pub use crate::bmc_version::{
    CONDITION_BMC_RESET, CONDITION_MAINTENANCE_CREATED, CONDITION_MAINTENANCE_WAITING,
    CONDITION_UPGRADE_CHECKPOINT, CONDITION_UPGRADE_COMPLETED, CONDITION_UPGRADE_ISSUED,
    CONDITION_UPGRADE_REBOOT, CONDITION_UPGRADE_VERIFICATION,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerBios {
    pub metadata: Metadata,
    pub spec: ServerBiosSpec,
    pub status: ServerBiosStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerBiosSpec {
    pub server_ref: ObjectReference,
    pub bios: BiosConfig,
    pub server_maintenance_policy: MaintenancePolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_maintenance_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BiosConfig {
    /// Firmware version the settings below are valid for.
    pub version: String,
    pub image: ImageSpec,
    /// Desired BIOS attribute values. Only the listed keys are managed;
    /// everything else on the system is left alone.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub settings: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerBiosStatus {
    pub state: ServerBiosState,
    /// Substate while `state` is `inSettingUpdate`.
    pub update_setting_state: SettingUpdateState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upgrade_task: Option<UpgradeTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
pub enum ServerBiosState {
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    Unspecified,
    #[serde(rename = "inVersionUpgrade")]
    #[strum(serialize = "inVersionUpgrade")]
    InVersionUpgrade,
    #[serde(rename = "inSettingUpdate")]
    #[strum(serialize = "inSettingUpdate")]
    InSettingUpdate,
    #[serde(rename = "synced")]
    #[strum(serialize = "synced")]
    Synced,
    #[serde(rename = "failed")]
    #[strum(serialize = "failed")]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
pub enum SettingUpdateState {
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    Unspecified,
    #[serde(rename = "issue")]
    #[strum(serialize = "issue")]
    Issue,
    #[serde(rename = "waitRebootPowerOff")]
    #[strum(serialize = "waitRebootPowerOff")]
    WaitRebootPowerOff,
    #[serde(rename = "waitRebootPowerOn")]
    #[strum(serialize = "waitRebootPowerOn")]
    WaitRebootPowerOn,
    #[serde(rename = "verification")]
    #[strum(serialize = "verification")]
    Verification,
}

impl Resource for ServerBios {
    const KIND: &'static str = "ServerBIOS";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Mutable state of one mock BMC.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bmc::{PowerState, TaskHealth, TaskInfo, TaskState};
use chrono::{DateTime, Utc};

/// Firmware upgrades always report this task URI, matching what the
/// simulated vendor returns.
pub const UPGRADE_TASK_URI: &str = "dummyTask";

/// How many polls a freshly-created task needs before completing.
pub const DEFAULT_TASK_POLLS: u32 = 2;

#[derive(Debug, Clone)]
pub struct MockAccount {
    pub id: String,
    pub username: String,
    pub password: String,
    pub role: String,
    pub password_expiration: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct MockSystem {
    pub uuid: String,
    pub uri: String,
    pub model: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub power: PowerState,
    pub bios_version: String,
    /// Applied to `bios_version` on the next power-on.
    pub staged_bios_version: Option<String>,
    pub attributes: BTreeMap<String, String>,
    /// Staged attribute changes, applied on the next power-on.
    pub pending_attributes: BTreeMap<String, String>,
    pub drives: Vec<String>,
    pub pxe_boot_once: bool,
}

impl MockSystem {
    pub fn new(uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        MockSystem {
            uri: format!("/redfish/v1/Systems/{uuid}"),
            uuid,
            model: "MegaServer".to_string(),
            manufacturer: "Contoso".to_string(),
            serial_number: "0000-0000".to_string(),
            power: PowerState::On,
            bios_version: "U30".to_string(),
            staged_bios_version: None,
            attributes: BTreeMap::new(),
            pending_attributes: BTreeMap::new(),
            drives: vec!["disk-0".to_string()],
            pxe_boot_once: false,
        }
    }

    pub fn with_bios_version(mut self, version: impl Into<String>) -> Self {
        self.bios_version = version.into();
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_drives(mut self, drives: &[&str]) -> Self {
        self.drives = drives.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Boot: staged BIOS firmware and attributes take effect.
    pub fn power_on(&mut self) {
        self.power = PowerState::On;
        if let Some(version) = self.staged_bios_version.take() {
            self.bios_version = version;
        }
        let pending = std::mem::take(&mut self.pending_attributes);
        self.attributes.extend(pending);
    }
}

/// What happens when a task completes.
#[derive(Debug, Clone)]
pub enum TaskEffect {
    None,
    StageBmcVersion(String),
    StageBiosVersion { system_uuid: String, version: String },
}

#[derive(Debug, Clone)]
pub struct MockTask {
    pub info: TaskInfo,
    pub total_polls: u32,
    pub remaining_polls: u32,
    pub effect: TaskEffect,
}

#[derive(Debug)]
pub struct MockBmcState {
    pub unreachable: bool,
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub mac_address: String,
    pub power: PowerState,
    pub bmc_version: String,
    /// Applied to `bmc_version` on the next manager reset.
    pub staged_bmc_version: Option<String>,
    pub accounts: Vec<MockAccount>,
    pub next_account_id: u32,
    pub systems: Vec<MockSystem>,
    pub tasks: HashMap<String, MockTask>,
    pub next_task_id: u32,
    /// Injected vendor rejection for the next upgrade request.
    pub reject_next_upgrade: Option<String>,
    /// Polls a new task needs before completing.
    pub task_polls: u32,
    /// When set, BIOS attribute changes apply without a reset.
    pub immediate_bios_attributes: bool,
    /// Lifetime stamped onto passwords set via the account service.
    pub password_validity: Option<Duration>,
    pub manager_resets: u32,
}

impl Default for MockBmcState {
    fn default() -> Self {
        MockBmcState {
            unreachable: false,
            manufacturer: "Contoso".to_string(),
            model: "BMC-9000".to_string(),
            serial_number: "0000-0000".to_string(),
            mac_address: "23:11:8A:33:CF:EA".to_string(),
            power: PowerState::On,
            bmc_version: "1.45.455b66-rev4".to_string(),
            staged_bmc_version: None,
            accounts: Vec::new(),
            next_account_id: 1,
            systems: Vec::new(),
            tasks: HashMap::new(),
            next_task_id: 1,
            reject_next_upgrade: None,
            task_polls: DEFAULT_TASK_POLLS,
            immediate_bios_attributes: false,
            password_validity: None,
            manager_resets: 0,
        }
    }
}

impl MockBmcState {
    pub fn system(&self, uuid: &str) -> Option<&MockSystem> {
        self.systems.iter().find(|s| s.uuid == uuid)
    }

    pub fn system_mut(&mut self, uuid: &str) -> Option<&mut MockSystem> {
        self.systems.iter_mut().find(|s| s.uuid == uuid)
    }

    pub fn account_by_name(&self, username: &str) -> Option<&MockAccount> {
        self.accounts.iter().find(|a| a.username == username)
    }

    pub fn add_account(&mut self, username: &str, password: &str, role: &str) -> &MockAccount {
        let id = self.next_account_id.to_string();
        self.next_account_id += 1;
        let password_expiration = self
            .password_validity
            .map(|validity| Utc::now() + chrono::Duration::from_std(validity).unwrap_or_default());
        self.accounts.push(MockAccount {
            id,
            username: username.to_string(),
            password: password.to_string(),
            role: role.to_string(),
            password_expiration,
        });
        self.accounts.last().expect("just pushed")
    }

    /// Creates a task that completes after `task_polls` polls.
    pub fn spawn_task(&mut self, uri: String, effect: TaskEffect) -> TaskInfo {
        let info = TaskInfo {
            uri: uri.clone(),
            state: TaskState::New,
            status: TaskHealth::Ok,
            percent_complete: 0,
            messages: Vec::new(),
        };
        self.tasks.insert(
            uri,
            MockTask {
                info: info.clone(),
                total_polls: self.task_polls.max(1),
                remaining_polls: self.task_polls.max(1),
                effect,
            },
        );
        info
    }

    pub fn next_task_uri(&mut self) -> String {
        let id = self.next_task_id;
        self.next_task_id += 1;
        format!("/redfish/v1/TaskService/Tasks/{id}")
    }

    /// Advances a task by one poll and returns its current view. Effects
    /// run exactly once, when the task reaches `Completed`.
    pub fn poll_task(&mut self, uri: &str) -> Option<TaskInfo> {
        let task = self.tasks.get_mut(uri)?;
        if !task.info.state.is_terminal() {
            if task.remaining_polls > 1 {
                task.remaining_polls -= 1;
                task.info.state = TaskState::Running;
                let done = task.total_polls - task.remaining_polls;
                task.info.percent_complete = (done.saturating_mul(100) / task.total_polls) as u8;
            } else {
                task.info.state = TaskState::Completed;
                task.info.percent_complete = 100;
                let effect = std::mem::replace(&mut task.effect, TaskEffect::None);
                let info = task.info.clone();
                match effect {
                    TaskEffect::None => {}
                    TaskEffect::StageBmcVersion(version) => {
                        self.staged_bmc_version = Some(version);
                    }
                    TaskEffect::StageBiosVersion {
                        system_uuid,
                        version,
                    } => {
                        if let Some(system) = self.system_mut(&system_uuid) {
                            system.staged_bios_version = Some(version);
                        }
                    }
                }
                return Some(info);
            }
        }
        Some(task.info.clone())
    }
}

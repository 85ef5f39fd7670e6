/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! `BmcSession` implementation backed by a mock BMC.

use std::collections::BTreeMap;

use bmc::{
    AccountInfo, BmcError, EraseMethod, ManagerInfo, PowerState, Result, SanitizeTask,
    SystemInfo, TaskInfo, UpgradeRequest,
};

use crate::state::{TaskEffect, UPGRADE_TASK_URI};
use crate::MockBmc;

pub struct MockSession {
    pub(crate) bmc: std::sync::Arc<MockBmc>,
}

impl MockSession {
    /// Every call observes the reachability flag, so a BMC can drop out
    /// mid-session in tests.
    fn guard(&self) -> Result<()> {
        if self.bmc.state().unreachable {
            return Err(BmcError::Transport("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl bmc::BmcSession for MockSession {
    async fn logout(&self) {}

    async fn manager_info(&self) -> Result<ManagerInfo> {
        self.guard()?;
        let state = self.bmc.state();
        Ok(ManagerInfo {
            model: state.model.clone(),
            manufacturer: state.manufacturer.clone(),
            serial_number: state.serial_number.clone(),
            firmware_version: state.bmc_version.clone(),
            mac_address: Some(state.mac_address.clone()),
            power_state: state.power,
            enabled: true,
        })
    }

    async fn systems(&self) -> Result<Vec<SystemInfo>> {
        self.guard()?;
        let state = self.bmc.state();
        Ok(state
            .systems
            .iter()
            .map(|s| SystemInfo {
                uuid: s.uuid.clone(),
                uri: s.uri.clone(),
                model: s.model.clone(),
                manufacturer: s.manufacturer.clone(),
                serial_number: s.serial_number.clone(),
                power_state: s.power,
            })
            .collect())
    }

    async fn bmc_version(&self) -> Result<String> {
        self.guard()?;
        Ok(self.bmc.state().bmc_version.clone())
    }

    async fn bios_version(&self, system_uuid: &str) -> Result<String> {
        self.guard()?;
        let state = self.bmc.state();
        state
            .system(system_uuid)
            .map(|s| s.bios_version.clone())
            .ok_or_else(|| BmcError::NotFound(format!("system {system_uuid}")))
    }

    async fn upgrade_bmc_version(&self, request: &UpgradeRequest) -> Result<String> {
        self.guard()?;
        let mut state = self.bmc.state();
        if let Some(reason) = state.reject_next_upgrade.take() {
            return Err(BmcError::VendorRejected(reason));
        }
        if request.image_uri.is_empty() {
            return Err(BmcError::InvalidRequest("image URI is empty".to_string()));
        }
        state.spawn_task(
            UPGRADE_TASK_URI.to_string(),
            TaskEffect::StageBmcVersion(request.version.clone()),
        );
        Ok(UPGRADE_TASK_URI.to_string())
    }

    async fn upgrade_bios_version(
        &self,
        system_uuid: &str,
        request: &UpgradeRequest,
    ) -> Result<String> {
        self.guard()?;
        let mut state = self.bmc.state();
        if let Some(reason) = state.reject_next_upgrade.take() {
            return Err(BmcError::VendorRejected(reason));
        }
        if state.system(system_uuid).is_none() {
            return Err(BmcError::NotFound(format!("system {system_uuid}")));
        }
        state.spawn_task(
            UPGRADE_TASK_URI.to_string(),
            TaskEffect::StageBiosVersion {
                system_uuid: system_uuid.to_string(),
                version: request.version.clone(),
            },
        );
        Ok(UPGRADE_TASK_URI.to_string())
    }

    async fn upgrade_task(&self, task_uri: &str) -> Result<TaskInfo> {
        self.task_status(task_uri).await
    }

    async fn task_status(&self, task_uri: &str) -> Result<TaskInfo> {
        self.guard()?;
        let mut state = self.bmc.state();
        state
            .poll_task(task_uri)
            .ok_or_else(|| BmcError::TaskNotFound(task_uri.to_string()))
    }

    async fn create_or_update_account(
        &self,
        username: &str,
        role: &str,
        password: &str,
    ) -> Result<()> {
        self.guard()?;
        let mut state = self.bmc.state();
        let expiration = state.password_validity.map(|validity| {
            chrono::Utc::now() + chrono::Duration::from_std(validity).unwrap_or_default()
        });
        match state.accounts.iter_mut().find(|a| a.username == username) {
            Some(account) => {
                account.password = password.to_string();
                account.role = role.to_string();
                account.password_expiration = expiration;
            }
            None => {
                state.add_account(username, password, role);
            }
        }
        Ok(())
    }

    async fn accounts(&self) -> Result<Vec<AccountInfo>> {
        self.guard()?;
        let state = self.bmc.state();
        Ok(state
            .accounts
            .iter()
            .map(|a| AccountInfo {
                id: a.id.clone(),
                username: a.username.clone(),
                role: a.role.clone(),
                password_expiration: a.password_expiration,
            })
            .collect())
    }

    async fn delete_account(&self, id: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.bmc.state();
        let before = state.accounts.len();
        state.accounts.retain(|a| a.id != id);
        if state.accounts.len() == before {
            return Err(BmcError::NotFound(format!("account {id}")));
        }
        Ok(())
    }

    async fn bios_attribute_values(
        &self,
        system_uuid: &str,
        keys: &[String],
    ) -> Result<BTreeMap<String, String>> {
        self.guard()?;
        let state = self.bmc.state();
        let system = state
            .system(system_uuid)
            .ok_or_else(|| BmcError::NotFound(format!("system {system_uuid}")))?;
        Ok(keys
            .iter()
            .filter_map(|k| system.attributes.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set_bios_attributes_on_reset(
        &self,
        system_uuid: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.guard()?;
        let mut state = self.bmc.state();
        let immediate = state.immediate_bios_attributes;
        let system = state
            .system_mut(system_uuid)
            .ok_or_else(|| BmcError::NotFound(format!("system {system_uuid}")))?;
        if immediate {
            system.attributes.extend(attributes.clone());
        } else {
            system.pending_attributes.extend(attributes.clone());
        }
        Ok(())
    }

    async fn check_bios_attributes(
        &self,
        _attributes: &BTreeMap<String, String>,
    ) -> Result<bool> {
        self.guard()?;
        Ok(!self.bmc.state().immediate_bios_attributes)
    }

    async fn erase_disks(
        &self,
        system_uuid: &str,
        _method: EraseMethod,
    ) -> Result<Vec<SanitizeTask>> {
        self.guard()?;
        let mut state = self.bmc.state();
        let drives = state
            .system(system_uuid)
            .ok_or_else(|| BmcError::NotFound(format!("system {system_uuid}")))?
            .drives
            .clone();
        let mut tasks = Vec::with_capacity(drives.len());
        for drive in drives {
            let uri = state.next_task_uri();
            state.spawn_task(uri.clone(), TaskEffect::None);
            tasks.push(SanitizeTask {
                uri,
                target_id: drive,
            });
        }
        Ok(tasks)
    }

    async fn reset_bios_to_defaults(&self, system_uuid: &str) -> Result<SanitizeTask> {
        self.guard()?;
        let mut state = self.bmc.state();
        if state.system(system_uuid).is_none() {
            return Err(BmcError::NotFound(format!("system {system_uuid}")));
        }
        let uri = state.next_task_uri();
        state.spawn_task(uri.clone(), TaskEffect::None);
        Ok(SanitizeTask {
            uri,
            target_id: "BIOS".to_string(),
        })
    }

    async fn clear_network_configuration(&self, system_uuid: &str) -> Result<SanitizeTask> {
        self.guard()?;
        let mut state = self.bmc.state();
        if state.system(system_uuid).is_none() {
            return Err(BmcError::NotFound(format!("system {system_uuid}")));
        }
        let uri = state.next_task_uri();
        state.spawn_task(uri.clone(), TaskEffect::None);
        Ok(SanitizeTask {
            uri,
            target_id: "NIC-0".to_string(),
        })
    }

    async fn set_pxe_boot_once(&self, system_uuid: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.bmc.state();
        let system = state
            .system_mut(system_uuid)
            .ok_or_else(|| BmcError::NotFound(format!("system {system_uuid}")))?;
        system.pxe_boot_once = true;
        Ok(())
    }

    async fn power_state(&self) -> Result<PowerState> {
        self.guard()?;
        Ok(self.bmc.state().power)
    }

    async fn system_power_state(&self, system_uuid: &str) -> Result<PowerState> {
        self.guard()?;
        let state = self.bmc.state();
        state
            .system(system_uuid)
            .map(|s| s.power)
            .ok_or_else(|| BmcError::NotFound(format!("system {system_uuid}")))
    }

    async fn power_on(&self, system_uuid: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.bmc.state();
        let system = state
            .system_mut(system_uuid)
            .ok_or_else(|| BmcError::NotFound(format!("system {system_uuid}")))?;
        system.power_on();
        Ok(())
    }

    async fn power_off(&self, system_uuid: &str) -> Result<()> {
        self.guard()?;
        let mut state = self.bmc.state();
        let system = state
            .system_mut(system_uuid)
            .ok_or_else(|| BmcError::NotFound(format!("system {system_uuid}")))?;
        system.power = PowerState::Off;
        Ok(())
    }

    async fn reset_manager(&self) -> Result<()> {
        self.guard()?;
        let mut state = self.bmc.state();
        state.manager_resets += 1;
        if let Some(version) = state.staged_bmc_version.take() {
            state.bmc_version = version;
        }
        Ok(())
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Driver interface to a BMC.
//!
//! The controllers never speak a wire protocol themselves; everything they
//! need from a baseboard controller is expressed as the [`BmcDriver`] /
//! [`BmcSession`] capability pair. The production implementation talks
//! Redfish over HTTP(S); the `bmc-mock` crate provides an in-process
//! implementation for tests and the local emulator harness.

use std::collections::BTreeMap;

mod error;
mod types;

pub use error::BmcError;
pub use types::{
    AccountInfo, Credentials, Endpoint, EraseMethod, ManagerInfo, PowerState, SanitizeTask,
    Scheme, SystemInfo, TaskHealth, TaskInfo, TaskState, UpgradeRequest,
};

pub type Result<T> = std::result::Result<T, BmcError>;

/// Factory for authenticated BMC sessions.
///
/// A driver is shared by every controller; sessions are not. Controllers
/// acquire a session at the start of a reconcile and release it before
/// returning.
#[async_trait::async_trait]
pub trait BmcDriver: Send + Sync + 'static {
    /// Opens an authenticated session against the given endpoint.
    ///
    /// Credential problems are reported as [`BmcError::Unauthorized`] so
    /// callers can distinguish a bad password from an unreachable BMC.
    async fn session(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn BmcSession>>;
}

/// One authenticated session against one BMC. All calls may perform network
/// I/O and can fail with transport errors at any time.
#[async_trait::async_trait]
pub trait BmcSession: Send + Sync {
    /// Releases the session. Errors are not interesting to callers.
    async fn logout(&self);

    /// Identity and health of the manager itself.
    async fn manager_info(&self) -> Result<ManagerInfo>;

    /// Enumerates the computer systems behind this BMC.
    async fn systems(&self) -> Result<Vec<SystemInfo>>;

    /// Current firmware version string of the manager.
    async fn bmc_version(&self) -> Result<String>;

    /// Current BIOS firmware version of one system.
    async fn bios_version(&self, system_uuid: &str) -> Result<String>;

    /// Starts a BMC firmware upgrade and returns the task URI to poll.
    ///
    /// A non-recoverable vendor rejection is reported as
    /// [`BmcError::VendorRejected`]; every other error is retriable.
    async fn upgrade_bmc_version(&self, request: &UpgradeRequest) -> Result<String>;

    /// Starts a BIOS firmware upgrade on one system, returns the task URI.
    async fn upgrade_bios_version(
        &self,
        system_uuid: &str,
        request: &UpgradeRequest,
    ) -> Result<String>;

    /// Polls a firmware upgrade task. Returns [`BmcError::TaskNotFound`]
    /// once the BMC has forgotten the task (some vendors drop completed
    /// tasks on reboot).
    async fn upgrade_task(&self, task_uri: &str) -> Result<TaskInfo>;

    /// Polls a generic long-running task (sanitisation, settings apply).
    async fn task_status(&self, task_uri: &str) -> Result<TaskInfo>;

    /// Creates the account if the username is unknown, otherwise updates
    /// role and password in place.
    async fn create_or_update_account(
        &self,
        username: &str,
        role: &str,
        password: &str,
    ) -> Result<()>;

    /// Lists the accounts configured on the BMC.
    async fn accounts(&self) -> Result<Vec<AccountInfo>>;

    /// Deletes the account with the given vendor-assigned id.
    async fn delete_account(&self, id: &str) -> Result<()>;

    /// Reads the current values of the given BIOS attributes.
    async fn bios_attribute_values(
        &self,
        system_uuid: &str,
        keys: &[String],
    ) -> Result<BTreeMap<String, String>>;

    /// Stages BIOS attribute changes to be applied on the next reset.
    async fn set_bios_attributes_on_reset(
        &self,
        system_uuid: &str,
        attributes: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Whether applying the given attributes requires a system reset.
    async fn check_bios_attributes(
        &self,
        attributes: &BTreeMap<String, String>,
    ) -> Result<bool>;

    /// Starts a disk erase over every drive of the system. One task per
    /// affected drive.
    async fn erase_disks(&self, system_uuid: &str, method: EraseMethod)
    -> Result<Vec<SanitizeTask>>;

    /// Resets the system BIOS to factory defaults.
    async fn reset_bios_to_defaults(&self, system_uuid: &str) -> Result<SanitizeTask>;

    /// Clears persistent network configuration of the system.
    async fn clear_network_configuration(&self, system_uuid: &str) -> Result<SanitizeTask>;

    /// One-shot PXE boot override for the next boot.
    async fn set_pxe_boot_once(&self, system_uuid: &str) -> Result<()>;

    /// Manager power state.
    async fn power_state(&self) -> Result<PowerState>;

    /// Power state of one system.
    async fn system_power_state(&self, system_uuid: &str) -> Result<PowerState>;

    /// Powers one system on.
    async fn power_on(&self, system_uuid: &str) -> Result<()>;

    /// Powers one system off.
    async fn power_off(&self, system_uuid: &str) -> Result<()>;

    /// Graceful restart of the manager itself (not of any system).
    async fn reset_manager(&self) -> Result<()>;
}

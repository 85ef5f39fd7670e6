/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where to reach a BMC.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub address: IpAddr,
    pub port: u16,
    pub scheme: Scheme,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.address, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scheme {
    Http,
    #[default]
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Http => write!(f, "http"),
            Scheme::Https => write!(f, "https"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Power state as reported by the BMC. `Unknown` covers transitional and
/// vendor-specific values the controllers do not act upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    On,
    Off,
    PoweringOn,
    PoweringOff,
    #[default]
    Unknown,
}

/// Identity and health of the manager.
#[derive(Debug, Clone, Default)]
pub struct ManagerInfo {
    pub model: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub mac_address: Option<String>,
    pub power_state: PowerState,
    pub enabled: bool,
}

/// One computer system exposed by a BMC.
#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub uuid: String,
    pub uri: String,
    pub model: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub power_state: PowerState,
}

/// Parameters for a firmware upgrade.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub version: String,
    pub image_uri: String,
    pub transfer_protocol: Option<String>,
    pub image_credentials: Option<Credentials>,
    /// Push the image even if the BMC believes it is already running it.
    pub force: bool,
}

/// Progress of a long-running BMC task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub uri: String,
    pub state: TaskState,
    pub status: TaskHealth,
    pub percent_complete: u8,
    pub messages: Vec<String>,
}

impl TaskInfo {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// DMTF task states. The wire protocol has more; everything the controllers
/// do not branch on collapses into the in-progress handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TaskState {
    #[default]
    New,
    Starting,
    Running,
    Suspended,
    Pending,
    Stopping,
    Completed,
    Killed,
    Exception,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Killed | TaskState::Exception | TaskState::Cancelled
        )
    }

    /// Terminal and unsuccessful.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TaskState::Killed | TaskState::Exception | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Health rollup reported alongside the task state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskHealth {
    #[default]
    Ok,
    Warning,
    Critical,
}

impl TaskHealth {
    pub fn is_ok(&self) -> bool {
        matches!(self, TaskHealth::Ok)
    }
}

/// An account on the BMC.
#[derive(Debug, Clone)]
pub struct AccountInfo {
    pub id: String,
    pub username: String,
    pub role: String,
    pub password_expiration: Option<DateTime<Utc>>,
}

/// How a disk erase is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EraseMethod {
    #[default]
    Overwrite,
    CryptographicErase,
}

/// A task spawned by a sanitisation request, together with the entity it
/// acts on (a drive id, a BIOS id, a NIC id).
#[derive(Debug, Clone)]
pub struct SanitizeTask {
    pub uri: String,
    pub target_id: String,
}

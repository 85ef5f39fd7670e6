/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! The Server resource: one computer system behind a BMC.

use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::condition::Condition;
use crate::{Metadata, ObjectReference, Resource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Server {
    pub metadata: Metadata,
    pub spec: ServerSpec,
    pub status: ServerStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSpec {
    /// UUID the BMC reports for this system.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_uuid: Option<String>,
    /// Resource path of the system on its BMC.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bmc_ref: Option<ObjectReference>,
    /// The maintenance lease currently holding this server, if any.
    /// Binding is exclusive; the UID pins the exact lease object.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_maintenance_ref: Option<ObjectReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_configuration_ref: Option<ObjectReference>,
    /// The ServerBIOS record whose settings this server follows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bios_settings_ref: Option<ObjectReference>,
    /// Desired power while outside maintenance. Inside maintenance the
    /// lease's desired power wins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<Power>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum Power {
    On,
    Off,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerStatus {
    pub state: ServerState,
    pub power_state: bmc::PowerState,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum ServerState {
    #[default]
    Initial,
    Discovery,
    Available,
    Reserved,
    Tainted,
    Maintenance,
    Error,
}

impl Server {
    /// Whether a maintenance lease with the given UID holds this server.
    pub fn is_held_by(&self, uid: uuid::Uuid) -> bool {
        self.status.state == ServerState::Maintenance
            && self
                .spec
                .server_maintenance_ref
                .as_ref()
                .is_some_and(|r| r.uid == Some(uid))
    }
}

impl Resource for Server {
    const KIND: &'static str = "Server";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! The BMC resource: identity and address of one baseboard controller.

use std::fmt;
use std::net::IpAddr;

use mac_address::MacAddress;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::{Metadata, ObjectReference, Resource, SecretReference};

/// Condition type: the BMC is reachable and its status is current.
pub const CONDITION_READY: &str = "Ready";
/// Condition type: a user-requested manager reset is in flight.
pub const CONDITION_RESET: &str = "Reset";

pub const REASON_BMC_UNAVAILABLE: &str = "BMCUnavailable";
pub const REASON_UNAUTHORIZED: &str = "Unauthorized";
pub const REASON_USER_RESET: &str = "UserReset";
pub const REASON_RESET_COMPLETE: &str = "ResetComplete";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Bmc {
    pub metadata: Metadata,
    pub spec: BmcSpec,
    pub status: BmcStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcSpec {
    /// Reference to a discovered Endpoint record. Mutually exclusive with
    /// `endpoint`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_ref: Option<ObjectReference>,
    /// Inline endpoint for BMCs registered without the discoverer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<InlineEndpoint>,
    pub protocol: Protocol,
    /// Credential secret used to authenticate against the BMC.
    pub bmc_secret_ref: SecretReference,
    /// The BMCUser that is the administrative account of this BMC, when it
    /// is managed as a record of its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_user_ref: Option<ObjectReference>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BmcSpecError {
    #[error("exactly one of endpointRef and endpoint must be set")]
    AmbiguousEndpoint,
}

impl BmcSpec {
    /// Admission invariant: exactly one endpoint source.
    pub fn validate(&self) -> Result<(), BmcSpecError> {
        match (&self.endpoint_ref, &self.endpoint) {
            (Some(_), None) | (None, Some(_)) => Ok(()),
            _ => Err(BmcSpecError::AmbiguousEndpoint),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineEndpoint {
    pub ip: IpAddr,
    pub mac_address: MacAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Protocol {
    pub name: ProtocolName,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheme: Option<ProtocolScheme>,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol {
            name: ProtocolName::Redfish,
            port: 443,
            scheme: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ProtocolName {
    #[default]
    #[serde(rename = "redfish")]
    Redfish,
    /// Addresses an emulator on a chosen port; used by test harnesses.
    #[serde(rename = "redfishLocal")]
    RedfishLocal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProtocolScheme {
    Http,
    Https,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BmcStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serial_number: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub firmware_version: String,
    pub power_state: bmc::PowerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<BmcState>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BmcState {
    Enabled,
    Disabled,
}

impl fmt::Display for BmcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BmcState::Enabled => write!(f, "enabled"),
            BmcState::Disabled => write!(f, "disabled"),
        }
    }
}

impl Resource for Bmc {
    const KIND: &'static str = "BMC";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_sources_are_mutually_exclusive() {
        let mut spec = BmcSpec::default();
        assert_eq!(spec.validate(), Err(BmcSpecError::AmbiguousEndpoint));

        spec.endpoint = Some(InlineEndpoint {
            ip: "127.0.0.1".parse().unwrap(),
            mac_address: "23:11:8A:33:CF:EA".parse().unwrap(),
        });
        assert!(spec.validate().is_ok());

        spec.endpoint_ref = Some(ObjectReference::named("endpoint-0"));
        assert_eq!(spec.validate(), Err(BmcSpecError::AmbiguousEndpoint));
    }
}

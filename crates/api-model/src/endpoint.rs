/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Endpoint records emitted by the out-of-band network discoverer.

use std::net::IpAddr;

use mac_address::MacAddress;
use serde::{Deserialize, Serialize};

use crate::{Metadata, Resource};

/// A discovered out-of-band endpoint a BMC can be reached at. Produced by
/// the endpoint discoverer; consumed by BMC records via `endpoint_ref`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoint {
    pub metadata: Metadata,
    pub spec: EndpointSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    pub ip: IpAddr,
    pub mac_address: MacAddress,
}

impl Default for EndpointSpec {
    fn default() -> Self {
        EndpointSpec {
            ip: IpAddr::from([0, 0, 0, 0]),
            mac_address: MacAddress::new([0; 6]),
        }
    }
}

impl Resource for Endpoint {
    const KIND: &'static str = "Endpoint";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! ServerClaim: ownership of a reserved server.
//!
//! Only the shape the maintenance arbitration needs is modelled here; the
//! claim lifecycle itself is driven elsewhere. The
//! `serverMaintenanceApproval` annotation on a claim approves pending
//! `ownerApproval` leases for the claimed server.

use serde::{Deserialize, Serialize};

use crate::{Metadata, ObjectReference, Resource};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerClaim {
    pub metadata: Metadata,
    pub spec: ServerClaimSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerClaimSpec {
    pub server_ref: ObjectReference,
}

impl ServerClaim {
    pub fn approves_maintenance(&self) -> bool {
        self.metadata
            .annotation(crate::annotations::SERVER_MAINTENANCE_APPROVAL)
            .is_some_and(|v| v == "true")
    }
}

impl Resource for ServerClaim {
    const KIND: &'static str = "ServerClaim";

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

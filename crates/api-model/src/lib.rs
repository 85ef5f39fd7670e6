/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Data model of the ferrite control plane.
//!
//! Every record users or controllers persist in the object store is defined
//! here: metadata, spec and status sections, state enums, and the small
//! helpers that belong next to them. The module should only contain data
//! definitions and associated helper functions, but no actual business
//! logic.

use serde::Serialize;
use serde::de::DeserializeOwned;

pub mod annotations;
pub mod bios;
pub mod bmc;
pub mod bmc_user;
pub mod bmc_version;
pub mod cleaning;
pub mod condition;
pub mod endpoint;
pub mod firmware;
pub mod maintenance;
pub mod metadata;
pub mod secret;
pub mod selector;
pub mod server;
pub mod server_claim;
pub mod set;

pub use metadata::{Metadata, ObjectReference, OwnerReference, SecretReference};

/// Implemented by every record kind stored in the object store.
pub trait Resource:
    Serialize + DeserializeOwned + Clone + Send + Sync + std::fmt::Debug + 'static
{
    /// The kind string under which objects of this type are keyed.
    const KIND: &'static str;

    fn metadata(&self) -> &Metadata;
    fn metadata_mut(&mut self) -> &mut Metadata;

    /// The finalizer every controller of this kind installs on resources it
    /// owns.
    fn finalizer() -> String {
        format!("{}.metal", Self::KIND.to_lowercase())
    }
}

/// Compares two firmware version strings, treating unparseable versions as
/// plain unequal strings.
///
/// Returns `true` when `desired` is strictly older than `current`.
pub fn is_downgrade(current: &str, desired: &str) -> bool {
    match (
        version_compare::Version::from(current),
        version_compare::Version::from(desired),
    ) {
        (Some(current), Some(desired)) => desired < current,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downgrade_detection() {
        assert!(is_downgrade("1.46.455b66-rev4", "1.45.455b66-rev4"));
        assert!(!is_downgrade("1.45.455b66-rev4", "1.46.455b66-rev4"));
        assert!(!is_downgrade("1.45", "1.45"));
        // Unparseable versions never count as downgrades.
        assert!(!is_downgrade("weird", "also-weird"));
    }
}

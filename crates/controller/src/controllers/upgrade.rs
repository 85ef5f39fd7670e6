/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Helpers shared by the firmware upgrade controllers (BMCVersion,
//! BIOSVersion, ServerBIOS): maintenance lease bookkeeping, upgrade-task
//! assessment and the stalled-task checkpoint backoff.

use std::time::Duration;

use bmc::{BmcError, TaskInfo, TaskState};
use chrono::Utc;
use model::condition::{self, Condition};
use model::maintenance::{MaintenancePolicy, ServerMaintenance};
use model::server::Server;
use model::{Metadata, ObjectReference, OwnerReference, Resource};
use rand::Rng;
use rand::distr::Alphanumeric;
use store::{Store, StoreError};

/// Object names are capped; longer child names fall back to a truncated
/// prefix plus a random suffix.
const MAX_NAME_LEN: usize = 253;

/// `{parent}-{suffix}`, shortened with a random tail when over the name
/// length limit.
pub fn child_name(parent: &str, suffix: &str) -> String {
    let name = format!("{parent}-{suffix}");
    if name.len() <= MAX_NAME_LEN {
        return name;
    }
    let tail: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    let keep = MAX_NAME_LEN - tail.len() - 1;
    format!("{}-{}", &parent[..keep], tail)
}

/// Creates (or adopts, by name) one maintenance lease for a server,
/// controller-owned by `owner`. Idempotent.
pub fn ensure_lease(
    store: &Store,
    owner_kind: &str,
    owner: &Metadata,
    server_name: &str,
    policy: MaintenancePolicy,
) -> Result<ObjectReference, StoreError> {
    let name = child_name(&owner.name, server_name);
    if let Some(existing) = store.try_get::<ServerMaintenance>(&owner.namespace, &name)? {
        return Ok(ObjectReference::with_uid(name, existing.metadata.uid));
    }
    let mut lease = ServerMaintenance {
        metadata: Metadata::named(&name, &owner.namespace),
        ..Default::default()
    };
    lease
        .metadata
        .owner_references
        .push(OwnerReference::controller_of(owner_kind, &owner.name, owner.uid).blocking());
    lease.spec.server_ref = ObjectReference::named(server_name);
    lease.spec.policy = policy;
    let lease = store.create(lease)?;
    Ok(ObjectReference::with_uid(
        lease.metadata.name,
        lease.metadata.uid,
    ))
}

/// Whether every referenced lease is granted: the lease exists (and was
/// not replaced under the same name), its server is in `maintenance` and
/// the server's binding UID matches the lease.
pub fn grant_held(
    store: &Store,
    namespace: &str,
    refs: &[ObjectReference],
) -> Result<bool, StoreError> {
    for lease_ref in refs {
        let Some(lease) = store.try_get::<ServerMaintenance>(namespace, &lease_ref.name)? else {
            return Ok(false);
        };
        if let Some(expected_uid) = lease_ref.uid
            && expected_uid != lease.metadata.uid
        {
            return Ok(false);
        }
        let Some(server) = store.try_get::<Server>(namespace, &lease.spec.server_ref.name)?
        else {
            return Ok(false);
        };
        if !server.is_held_by(lease.metadata.uid) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Deletes the leases this owner created and drops every reference.
/// User-provided leases are only unreferenced, never deleted.
pub fn release_leases<R: Resource>(
    store: &Store,
    owner: &R,
    refs: &[ObjectReference],
) -> Result<(), StoreError> {
    let namespace = &owner.metadata().namespace;
    for lease_ref in refs {
        let Some(lease) = store.try_get::<ServerMaintenance>(namespace, &lease_ref.name)? else {
            continue;
        };
        if lease.metadata.is_controlled_by(owner.metadata().uid) {
            tracing::debug!(lease = %lease.metadata.name, "deleting owned maintenance lease");
            store.delete_if_present::<ServerMaintenance>(namespace, &lease.metadata.name)?;
        }
    }
    Ok(())
}

/// Outcome of polling an upgrade task.
#[derive(Debug)]
pub enum TaskAssessment {
    /// Task finished successfully.
    Completed(TaskInfo),
    /// Task reached a terminal failure state or an unhealthy status.
    Failed(TaskInfo, String),
    /// Task is still running.
    InProgress(TaskInfo),
    /// The BMC no longer knows the task; verify by version.
    Vanished,
}

pub fn assess_task(poll: Result<TaskInfo, BmcError>) -> Result<TaskAssessment, BmcError> {
    match poll {
        Ok(info) if info.state == TaskState::Completed && info.status.is_ok() => {
            Ok(TaskAssessment::Completed(info))
        }
        Ok(info) if info.state.is_failure() || !info.status.is_ok() => {
            let message = format!(
                "task {} ended in state {} ({:?})",
                info.uri, info.state, info.status
            );
            Ok(TaskAssessment::Failed(info, message))
        }
        Ok(info) => Ok(TaskAssessment::InProgress(info)),
        Err(e) if e.is_task_not_found() => Ok(TaskAssessment::Vanished),
        Err(e) => Err(e),
    }
}

/// Fingerprint of the observable task state, recorded as the checkpoint
/// condition's reason so the transition timestamp moves exactly when the
/// task does.
pub fn task_fingerprint(info: &TaskInfo) -> String {
    format!("{}-{}", info.state, info.percent_complete)
}

/// Backoff for a stalled task: the longer the checkpoint condition has
/// been still, the longer the wait until the next poll.
pub fn checkpoint_backoff(
    conditions: &[Condition],
    kind: &str,
    base: Duration,
    cap: Duration,
) -> Duration {
    let Some(checkpoint) = condition::get(conditions, kind) else {
        return base;
    };
    let stalled = (Utc::now() - checkpoint.last_transition_time)
        .to_std()
        .unwrap_or(Duration::ZERO);
    stalled.clamp(base, cap)
}

#[cfg(test)]
mod tests {
    use bmc::TaskHealth;

    use super::*;

    fn task(state: TaskState, status: TaskHealth) -> TaskInfo {
        TaskInfo {
            uri: "dummyTask".to_string(),
            state,
            status,
            percent_complete: 50,
            messages: Vec::new(),
        }
    }

    #[test]
    fn task_assessment_covers_the_terminal_states() {
        assert!(matches!(
            assess_task(Ok(task(TaskState::Completed, TaskHealth::Ok))),
            Ok(TaskAssessment::Completed(_))
        ));
        assert!(matches!(
            assess_task(Ok(task(TaskState::Killed, TaskHealth::Ok))),
            Ok(TaskAssessment::Failed(..))
        ));
        assert!(matches!(
            assess_task(Ok(task(TaskState::Completed, TaskHealth::Critical))),
            Ok(TaskAssessment::Failed(..))
        ));
        assert!(matches!(
            assess_task(Ok(task(TaskState::Running, TaskHealth::Ok))),
            Ok(TaskAssessment::InProgress(_))
        ));
        assert!(matches!(
            assess_task(Err(BmcError::TaskNotFound("dummyTask".to_string()))),
            Ok(TaskAssessment::Vanished)
        ));
        assert!(assess_task(Err(BmcError::Unauthorized)).is_err());
    }

    #[test]
    fn child_names_respect_the_length_limit() {
        assert_eq!(child_name("set", "bmc-0"), "set-bmc-0");
        let long = "x".repeat(260);
        let name = child_name(&long, "server-1");
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.starts_with("xxx"));
    }
}

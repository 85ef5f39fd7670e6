/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BMCVersion upgrade machine: the happy path, short-circuits, approval
//! gating, failure handling and the deletion/backpressure boundaries.

use bmc_mock::UPGRADE_TASK_URI;
use model::bmc::{Bmc, CONDITION_READY};
use model::bmc_version::{
    BmcVersion, CONDITION_MAINTENANCE_WAITING, CONDITION_UPGRADE_COMPLETED,
};
use model::condition;
use model::firmware::FirmwareUpdateState;
use model::maintenance::{MaintenancePolicy, ServerMaintenance};
use model::server::{Server, ServerState};
use model::server_claim::{ServerClaim, ServerClaimSpec};
use model::{Metadata, ObjectReference, annotations};

use crate::tests::common::{CURRENT_BMC_VERSION, Harness, NS, TARGET_BMC_VERSION};

fn upgrade(name: &str, bmc_name: &str, version: &str, policy: MaintenancePolicy) -> BmcVersion {
    let mut record = BmcVersion {
        metadata: Metadata::named(name, NS),
        ..Default::default()
    };
    record.spec.bmc_ref = ObjectReference::named(bmc_name);
    record.spec.version = version.to_string();
    record.spec.image.uri = format!("http://images.local/bmc-{version}.bin");
    record.spec.server_maintenance_policy = policy;
    record
}

fn state_of(harness: &Harness, name: &str) -> Option<BmcVersion> {
    harness.store.try_get(NS, name).ok().flatten()
}

#[tokio::test(flavor = "multi_thread")]
async fn happy_path_upgrade() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);

    harness
        .store
        .create(upgrade(
            "upgrade-0",
            "bmc-0",
            TARGET_BMC_VERSION,
            MaintenancePolicy::Enforced,
        ))
        .unwrap();

    let done = harness
        .wait_for("upgrade completed", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::Completed).then_some(record)
        })
        .await;
    assert_eq!(
        done.status.upgrade_task.as_ref().map(|t| t.uri.as_str()),
        Some(UPGRADE_TASK_URI)
    );
    assert_eq!(mock.bmc_version(), TARGET_BMC_VERSION);
    // Both resets happened: one before the upgrade, one to activate it.
    assert!(mock.manager_resets() >= 2);

    // The lease the controller created is gone again and the reference
    // list is empty.
    harness
        .wait_for("lease released", || {
            let leases = harness.store.list::<ServerMaintenance>(NS, None).ok()?;
            leases.is_empty().then_some(())
        })
        .await;
    let record: BmcVersion = harness.store.get(NS, "upgrade-0").unwrap();
    assert!(record.spec.server_maintenance_refs.is_empty());
    let server: Server = harness.store.get(NS, "bmc-0-system-0").unwrap();
    assert!(server.spec.server_maintenance_ref.is_none());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn version_already_matching_completes_without_conditions() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;

    harness
        .store
        .create(upgrade(
            "upgrade-0",
            "bmc-0",
            CURRENT_BMC_VERSION,
            MaintenancePolicy::Enforced,
        ))
        .unwrap();

    let done = harness
        .wait_for("immediate completion", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::Completed).then_some(record)
        })
        .await;
    assert!(done.status.conditions.is_empty());
    assert!(done.status.upgrade_task.is_none());
    assert!(
        harness
            .store
            .list::<ServerMaintenance>(NS, None)
            .unwrap()
            .is_empty(),
        "no maintenance lease may ever be created"
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn owner_approval_gates_the_upgrade() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Reserved);

    let claim = ServerClaim {
        metadata: Metadata::named("claim-0", NS),
        spec: ServerClaimSpec {
            server_ref: ObjectReference::named("bmc-0-system-0"),
        },
    };
    harness.store.create(claim).unwrap();

    harness
        .store
        .create(upgrade(
            "upgrade-0",
            "bmc-0",
            TARGET_BMC_VERSION,
            MaintenancePolicy::OwnerApproval,
        ))
        .unwrap();

    // Without approval the machine parks on the waiting condition.
    harness
        .wait_for("waiting on approval", || {
            let record = state_of(&harness, "upgrade-0")?;
            let waiting =
                condition::get(&record.status.conditions, CONDITION_MAINTENANCE_WAITING)?;
            (record.status.state == FirmwareUpdateState::InProgress && waiting.is_true())
                .then_some(())
        })
        .await;
    tokio::time::sleep(harness.opts.resync_interval * 4).await;
    let parked: BmcVersion = harness.store.get(NS, "upgrade-0").unwrap();
    assert_eq!(parked.status.state, FirmwareUpdateState::InProgress);

    harness.annotate::<ServerClaim>(
        "claim-0",
        annotations::SERVER_MAINTENANCE_APPROVAL,
        "true",
    );

    harness
        .wait_for("upgrade completed after approval", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::Completed).then_some(())
        })
        .await;
    // The claimed server returns to reserved once the lease is released.
    harness
        .wait_for("server reserved again", || {
            let server: Server = harness.store.try_get(NS, "bmc-0-system-0").ok().flatten()?;
            (server.status.state == ServerState::Reserved
                && server.spec.server_maintenance_ref.is_none())
            .then_some(())
        })
        .await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_bmc_keeps_upgrade_in_progress() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);
    // A long task keeps the machine in the poll stage.
    mock.set_task_polls(1_000_000);

    harness
        .store
        .create(upgrade(
            "upgrade-0",
            "bmc-0",
            TARGET_BMC_VERSION,
            MaintenancePolicy::Enforced,
        ))
        .unwrap();
    harness
        .wait_for("upgrade issued", || {
            let record = state_of(&harness, "upgrade-0")?;
            record.status.upgrade_task.clone()
        })
        .await;

    mock.set_unreachable(true);
    harness
        .wait_for("BMC Ready=False", || {
            let bmc_obj: Bmc = harness.store.try_get(NS, "bmc-0").ok().flatten()?;
            let ready = condition::get(&bmc_obj.status.conditions, CONDITION_READY)?;
            (!ready.is_true()).then_some(())
        })
        .await;
    tokio::time::sleep(harness.opts.resync_interval * 4).await;
    let record: BmcVersion = harness.store.get(NS, "upgrade-0").unwrap();
    assert_eq!(
        record.status.state,
        FirmwareUpdateState::InProgress,
        "transport loss must not fail the upgrade"
    );

    // Connectivity returns, the task finishes, the machine completes.
    mock.set_unreachable(false);
    if let Some(task) = mock.state().tasks.get_mut(UPGRADE_TASK_URI) {
        task.remaining_polls = 1;
    }
    harness
        .wait_for("upgrade completed after recovery", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::Completed).then_some(())
        })
        .await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn vanished_task_is_verified_by_version() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);
    mock.set_task_polls(1_000_000);

    harness
        .store
        .create(upgrade(
            "upgrade-0",
            "bmc-0",
            TARGET_BMC_VERSION,
            MaintenancePolicy::Enforced,
        ))
        .unwrap();
    harness
        .wait_for("upgrade issued", || {
            let record = state_of(&harness, "upgrade-0")?;
            record.status.upgrade_task.clone()
        })
        .await;

    // The BMC reboots behind our back: the task evaporates but the new
    // firmware is live.
    mock.forget_task(UPGRADE_TASK_URI);
    mock.set_bmc_version(TARGET_BMC_VERSION);

    let done = harness
        .wait_for("completed via version verification", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::Completed).then_some(record)
        })
        .await;
    let completed =
        condition::get(&done.status.conditions, CONDITION_UPGRADE_COMPLETED).unwrap();
    assert!(completed.is_true());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deletion_is_postponed_until_terminal() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);
    mock.set_task_polls(1_000_000);

    harness
        .store
        .create(upgrade(
            "upgrade-0",
            "bmc-0",
            TARGET_BMC_VERSION,
            MaintenancePolicy::Enforced,
        ))
        .unwrap();
    harness
        .wait_for("upgrade in progress", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::InProgress).then_some(())
        })
        .await;

    harness.store.delete::<BmcVersion>(NS, "upgrade-0").unwrap();
    tokio::time::sleep(harness.opts.resync_interval * 4).await;
    let record: BmcVersion = harness
        .store
        .get(NS, "upgrade-0")
        .expect("record must survive while in progress");
    assert!(record.metadata.is_marked_for_deletion());
    assert_eq!(record.status.state, FirmwareUpdateState::InProgress);

    // Let the task finish; the machine reaches a terminal state and only
    // then releases its finalizer.
    if let Some(task) = mock.state().tasks.get_mut(UPGRADE_TASK_URI) {
        task.remaining_polls = 1;
    }
    harness
        .wait_for("record removed after completion", || {
            harness
                .store
                .try_get::<BmcVersion>(NS, "upgrade-0")
                .ok()
                .flatten()
                .is_none()
                .then_some(())
        })
        .await;
    // No lease survives the teardown.
    harness
        .wait_for("leases cleaned up", || {
            let leases = harness.store.list::<ServerMaintenance>(NS, None).ok()?;
            leases.is_empty().then_some(())
        })
        .await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn vendor_rejection_fails_and_retry_annotation_recovers() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);
    mock.reject_next_upgrade("unsupported image format");

    harness
        .store
        .create(upgrade(
            "upgrade-0",
            "bmc-0",
            TARGET_BMC_VERSION,
            MaintenancePolicy::Enforced,
        ))
        .unwrap();

    harness
        .wait_for("vendor rejection is terminal", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::Failed).then_some(())
        })
        .await;
    tokio::time::sleep(harness.opts.resync_interval * 4).await;
    let record: BmcVersion = harness.store.get(NS, "upgrade-0").unwrap();
    assert_eq!(record.status.state, FirmwareUpdateState::Failed, "no self-recovery");

    harness.annotate::<BmcVersion>(
        "upgrade-0",
        annotations::OPERATION,
        annotations::OPERATION_RETRY_FAILED,
    );
    harness
        .wait_for("retry completes the upgrade", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::Completed).then_some(())
        })
        .await;
    assert_eq!(mock.bmc_version(), TARGET_BMC_VERSION);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn downgrade_is_refused() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;

    harness
        .store
        .create(upgrade(
            "upgrade-0",
            "bmc-0",
            "1.44.455b66-rev4",
            MaintenancePolicy::Enforced,
        ))
        .unwrap();

    let record = harness
        .wait_for("downgrade refused", || {
            let record = state_of(&harness, "upgrade-0")?;
            (record.status.state == FirmwareUpdateState::Failed).then_some(record)
        })
        .await;
    let issued = condition::get(
        &record.status.conditions,
        model::bmc_version::CONDITION_UPGRADE_ISSUED,
    )
    .unwrap();
    assert_eq!(issued.reason, "DowngradeRejected");
    assert!(
        harness
            .store
            .list::<ServerMaintenance>(NS, None)
            .unwrap()
            .is_empty()
    );

    harness.stop().await;
}

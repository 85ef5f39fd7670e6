/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Maintenance arbitration: exclusive binding, queueing, and release
//! semantics.

use model::maintenance::{MaintenanceState, ServerMaintenance};
use model::server::{Server, ServerState};
use model::server_claim::{ServerClaim, ServerClaimSpec};
use model::{Metadata, ObjectReference};

use crate::tests::common::{Harness, NS};

fn lease(name: &str, server_name: &str) -> ServerMaintenance {
    let mut lease = ServerMaintenance {
        metadata: Metadata::named(name, NS),
        ..Default::default()
    };
    lease.spec.server_ref = ObjectReference::named(server_name);
    lease
}

#[tokio::test(flavor = "multi_thread")]
async fn one_lease_at_a_time_and_queueing() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    // Claimed, so the server returns to reserved between leases.
    harness
        .store
        .create(ServerClaim {
            metadata: Metadata::named("claim-0", NS),
            spec: ServerClaimSpec {
                server_ref: ObjectReference::named("bmc-0-system-0"),
            },
        })
        .unwrap();
    harness.set_server_state("bmc-0-system-0", ServerState::Reserved);

    let first = harness.store.create(lease("lease-a", "bmc-0-system-0")).unwrap();
    harness
        .wait_for("first lease granted", || {
            let lease: ServerMaintenance = harness.store.try_get(NS, "lease-a").ok().flatten()?;
            (lease.status.state == MaintenanceState::InMaintenance).then_some(())
        })
        .await;

    let second = harness.store.create(lease("lease-b", "bmc-0-system-0")).unwrap();
    harness
        .wait_for("second lease pending", || {
            let lease: ServerMaintenance = harness.store.try_get(NS, "lease-b").ok().flatten()?;
            (lease.status.state == MaintenanceState::Pending).then_some(())
        })
        .await;

    // Exactly one lease holds the server and the binding pins its UID.
    let server: Server = harness.store.get(NS, "bmc-0-system-0").unwrap();
    assert_eq!(server.status.state, ServerState::Maintenance);
    assert_eq!(
        server.spec.server_maintenance_ref.as_ref().and_then(|r| r.uid),
        Some(first.metadata.uid)
    );
    let holding: Vec<ServerMaintenance> = harness
        .store
        .list::<ServerMaintenance>(NS, None)
        .unwrap()
        .into_iter()
        .filter(|l| l.status.state == MaintenanceState::InMaintenance)
        .collect();
    assert_eq!(holding.len(), 1);

    // Releasing the first hands the server to the queued lease.
    harness
        .store
        .delete::<ServerMaintenance>(NS, "lease-a")
        .unwrap();
    harness
        .wait_for("second lease granted", || {
            let server: Server = harness.store.try_get(NS, "bmc-0-system-0").ok().flatten()?;
            (server.spec.server_maintenance_ref.as_ref().and_then(|r| r.uid)
                == Some(second.metadata.uid))
            .then_some(())
        })
        .await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn release_restores_unclaimed_server() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);

    harness.store.create(lease("lease-a", "bmc-0-system-0")).unwrap();
    harness
        .wait_for("lease granted", || {
            let server: Server = harness.store.try_get(NS, "bmc-0-system-0").ok().flatten()?;
            (server.status.state == ServerState::Maintenance).then_some(())
        })
        .await;

    harness
        .store
        .delete::<ServerMaintenance>(NS, "lease-a")
        .unwrap();
    harness
        .wait_for("server released", || {
            let server: Server = harness.store.try_get(NS, "bmc-0-system-0").ok().flatten()?;
            (server.status.state == ServerState::Initial
                && server.spec.server_maintenance_ref.is_none())
            .then_some(())
        })
        .await;
    // The lease is fully gone, finalizer included.
    assert!(
        harness
            .store
            .try_get::<ServerMaintenance>(NS, "lease-a")
            .unwrap()
            .is_none()
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn owner_approval_lease_waits_for_the_claim() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;
    harness
        .store
        .create(ServerClaim {
            metadata: Metadata::named("claim-0", NS),
            spec: ServerClaimSpec {
                server_ref: ObjectReference::named("bmc-0-system-0"),
            },
        })
        .unwrap();
    harness.set_server_state("bmc-0-system-0", ServerState::Reserved);

    let mut gated = lease("lease-a", "bmc-0-system-0");
    gated.spec.policy = model::maintenance::MaintenancePolicy::OwnerApproval;
    harness.store.create(gated).unwrap();

    harness
        .wait_for("lease pending", || {
            let lease: ServerMaintenance = harness.store.try_get(NS, "lease-a").ok().flatten()?;
            (lease.status.state == MaintenanceState::Pending).then_some(())
        })
        .await;
    tokio::time::sleep(harness.opts.resync_interval * 4).await;
    let lease_obj: ServerMaintenance = harness.store.get(NS, "lease-a").unwrap();
    assert_eq!(lease_obj.status.state, MaintenanceState::Pending);

    harness.annotate::<ServerClaim>(
        "claim-0",
        model::annotations::SERVER_MAINTENANCE_APPROVAL,
        "true",
    );
    harness
        .wait_for("lease granted after approval", || {
            let lease: ServerMaintenance = harness.store.try_get(NS, "lease-a").ok().flatten()?;
            (lease.status.state == MaintenanceState::InMaintenance).then_some(())
        })
        .await;

    harness.stop().await;
}

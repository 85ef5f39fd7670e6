/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BMC controller behaviour: status refresh, child servers, the reset
//! handshake and the unreachable path.

use model::bmc::{Bmc, CONDITION_READY, CONDITION_RESET, REASON_BMC_UNAVAILABLE};
use model::condition;
use model::server::Server;
use model::{Resource, annotations};

use crate::tests::common::{CURRENT_BMC_VERSION, Harness, NS};

#[tokio::test(flavor = "multi_thread")]
async fn bmc_status_and_child_servers() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");

    let ready = harness
        .wait_for("BMC ready", || {
            let bmc_obj: Bmc = harness.store.try_get(NS, "bmc-0").ok().flatten()?;
            condition::is_true(&bmc_obj.status.conditions, CONDITION_READY).then_some(bmc_obj)
        })
        .await;
    assert_eq!(ready.status.firmware_version, CURRENT_BMC_VERSION);
    assert_eq!(ready.status.mac_address.as_deref(), Some("23:11:8A:33:CF:EA"));
    assert_eq!(ready.status.power_state, bmc::PowerState::On);
    assert_eq!(ready.status.ip.map(|ip| ip.to_string()).as_deref(), Some("127.0.0.1"));

    let server = harness.wait_server("bmc-0-system-0").await;
    assert_eq!(server.spec.system_uuid.as_deref(), Some("bmc-0-uuid"));
    assert_eq!(
        server.spec.bmc_ref.as_ref().map(|r| r.name.as_str()),
        Some("bmc-0")
    );
    assert!(server.metadata.is_controlled_by(ready.metadata.uid));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn quiescent_bmc_stops_writing() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");

    let bmc_obj = harness
        .wait_for("BMC ready", || {
            let bmc_obj: Bmc = harness.store.try_get(NS, "bmc-0").ok().flatten()?;
            condition::is_true(&bmc_obj.status.conditions, CONDITION_READY).then_some(bmc_obj)
        })
        .await;

    // Give every controller several resync rounds; with nothing changing,
    // nothing may be written.
    tokio::time::sleep(harness.opts.resync_interval * 6).await;
    let after: Bmc = harness.store.get(NS, "bmc-0").unwrap();
    assert_eq!(
        after.metadata.resource_version, bmc_obj.metadata.resource_version,
        "reconciles without external change must not patch"
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_bmc_flips_ready() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");

    harness
        .wait_for("BMC ready", || {
            let bmc_obj: Bmc = harness.store.try_get(NS, "bmc-0").ok().flatten()?;
            condition::is_true(&bmc_obj.status.conditions, CONDITION_READY).then_some(())
        })
        .await;

    mock.set_unreachable(true);
    let bmc_obj = harness
        .wait_for("Ready=False", || {
            let bmc_obj: Bmc = harness.store.try_get(NS, "bmc-0").ok().flatten()?;
            let ready = condition::get(&bmc_obj.status.conditions, CONDITION_READY)?;
            (!ready.is_true()).then_some(bmc_obj)
        })
        .await;
    let ready = condition::get(&bmc_obj.status.conditions, CONDITION_READY).unwrap();
    assert_eq!(ready.reason, REASON_BMC_UNAVAILABLE);

    // Back on the network, the condition recovers.
    mock.set_unreachable(false);
    harness
        .wait_for("Ready=True again", || {
            let bmc_obj: Bmc = harness.store.try_get(NS, "bmc-0").ok().flatten()?;
            condition::is_true(&bmc_obj.status.conditions, CONDITION_READY).then_some(())
        })
        .await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_restart_handshake() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");

    harness
        .wait_for("BMC ready", || {
            let bmc_obj: Bmc = harness.store.try_get(NS, "bmc-0").ok().flatten()?;
            condition::is_true(&bmc_obj.status.conditions, CONDITION_READY).then_some(())
        })
        .await;

    harness.annotate::<Bmc>(
        "bmc-0",
        annotations::OPERATION,
        annotations::OPERATION_GRACEFUL_RESTART_BMC,
    );

    let bmc_obj = harness
        .wait_for("reset completed", || {
            let bmc_obj: Bmc = harness.store.try_get(NS, "bmc-0").ok().flatten()?;
            let reset = condition::get(&bmc_obj.status.conditions, CONDITION_RESET)?;
            (!reset.is_true() && bmc_obj.metadata.annotation(annotations::OPERATION).is_none())
                .then_some(bmc_obj)
        })
        .await;
    assert!(mock.manager_resets() >= 1);
    let reset = condition::get(&bmc_obj.status.conditions, CONDITION_RESET).unwrap();
    assert_eq!(reset.reason, model::bmc::REASON_RESET_COMPLETE);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bmc_label_changes_propagate_to_servers() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");
    harness.wait_server("bmc-0-system-0").await;

    let bmc_obj: Bmc = harness.store.get(NS, "bmc-0").unwrap();
    harness
        .store
        .patch(
            &bmc_obj,
            serde_json::json!({"metadata": {"labels": {"rack": "r1"}}}),
        )
        .unwrap();

    harness
        .wait_for("server label copied", || {
            let server: Server = harness.store.try_get(NS, "bmc-0-system-0").ok().flatten()?;
            (server.metadata.labels.get("rack").map(String::as_str) == Some("r1")).then_some(())
        })
        .await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn ignore_reconcile_annotation_suspends() {
    let harness = Harness::start().await;
    let mock = harness.mock_bmc("bmc-0", "127.0.0.1");

    // Annotated from the start: the controller must not touch it.
    let secret = harness
        .store
        .create(model::secret::Secret::credentials(
            "bmc-0-credentials",
            NS,
            crate::tests::common::BMC_USERNAME,
            crate::tests::common::BMC_PASSWORD,
        ))
        .unwrap();
    let mut bmc_obj = Bmc {
        metadata: model::Metadata::named("bmc-0", NS),
        ..Default::default()
    };
    bmc_obj.metadata.annotations.insert(
        annotations::OPERATION.to_string(),
        annotations::OPERATION_IGNORE_RECONCILE.to_string(),
    );
    bmc_obj.spec.endpoint = Some(model::bmc::InlineEndpoint {
        ip: "127.0.0.1".parse().unwrap(),
        mac_address: "23:11:8A:33:CF:EA".parse().unwrap(),
    });
    bmc_obj.spec.bmc_secret_ref = model::SecretReference::named(secret.metadata.name);
    let created = harness.store.create(bmc_obj).unwrap();

    tokio::time::sleep(harness.opts.resync_interval * 6).await;
    let after: Bmc = harness.store.get(NS, "bmc-0").unwrap();
    assert_eq!(after.metadata.resource_version, created.metadata.resource_version);
    assert!(after.status.conditions.is_empty());
    assert!(!after.metadata.has_finalizer(&Bmc::finalizer()));
    let _ = mock;

    harness.stop().await;
}

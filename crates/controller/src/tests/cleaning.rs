/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! ServerCleaning: multi-task sanitisation with per-task progress.

use bmc_mock::{MockBmc, MockSystem};
use model::cleaning::{
    CleaningState, CleaningTaskKind, DiskWipe, ServerCleaning, ServerCleaningSpec,
};
use model::selector::LabelSelector;
use model::server::ServerState;
use model::{Metadata, ObjectReference};

use crate::tests::common::{BMC_PASSWORD, BMC_USERNAME, Harness, NS};

fn two_disk_fixture(harness: &Harness) -> std::sync::Arc<MockBmc> {
    let mock = MockBmc::new()
        .with_account(BMC_USERNAME, BMC_PASSWORD, "Administrator")
        .with_system(MockSystem::new("bmc-0-uuid").with_drives(&["disk-0", "disk-1"]));
    let mock = harness.registry.register("127.0.0.1".parse().unwrap(), mock);
    harness.create_bmc("bmc-0", "127.0.0.1");
    mock
}

#[tokio::test(flavor = "multi_thread")]
async fn full_sanitisation_of_a_tainted_server() {
    let harness = Harness::start().await;
    two_disk_fixture(&harness);
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Tainted);

    let cleaning = ServerCleaning {
        metadata: Metadata::named("clean-0", NS),
        spec: ServerCleaningSpec {
            server_ref: Some(ObjectReference::named("bmc-0-system-0")),
            selector: None,
            disk_wipe: Some(DiskWipe {
                method: bmc::EraseMethod::Overwrite,
            }),
            bios_reset: true,
            bmc_reset: false,
            network_cleanup: true,
        },
        ..Default::default()
    };
    harness.store.create(cleaning).unwrap();

    let done = harness
        .wait_for("cleaning completed", || {
            let cleaning: ServerCleaning = harness.store.try_get(NS, "clean-0").ok().flatten()?;
            (cleaning.status.state == CleaningState::Completed).then_some(cleaning)
        })
        .await;

    assert_eq!(done.status.server_cleaning_statuses.len(), 1);
    let entry = &done.status.server_cleaning_statuses[0];
    assert_eq!(entry.server, "bmc-0-system-0");
    assert_eq!(entry.state, CleaningState::Completed);
    assert_eq!(entry.percent_complete, 100);
    // Two disks + BIOS reset + network cleanup.
    assert_eq!(entry.cleaning_tasks.len(), 4);
    assert_eq!(entry.message, "4/4 tasks completed");
    assert_eq!(
        entry
            .cleaning_tasks
            .iter()
            .filter(|t| t.kind == CleaningTaskKind::DiskWipe)
            .count(),
        2
    );
    for task in &entry.cleaning_tasks {
        assert_eq!(task.state, bmc::TaskState::Completed);
        assert_eq!(task.percent_complete, 100);
        assert!(task.task_uri.starts_with("/redfish/v1/TaskService/Tasks/"));
        assert!(task.last_update.is_some());
    }

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn untainted_servers_are_not_touched() {
    let harness = Harness::start().await;
    two_disk_fixture(&harness);
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);

    let cleaning = ServerCleaning {
        metadata: Metadata::named("clean-0", NS),
        spec: ServerCleaningSpec {
            server_ref: Some(ObjectReference::named("bmc-0-system-0")),
            selector: None,
            disk_wipe: Some(DiskWipe {
                method: bmc::EraseMethod::Overwrite,
            }),
            bios_reset: false,
            bmc_reset: false,
            network_cleanup: false,
        },
        ..Default::default()
    };
    harness.store.create(cleaning).unwrap();

    tokio::time::sleep(harness.opts.resync_interval * 6).await;
    let cleaning: ServerCleaning = harness.store.get(NS, "clean-0").unwrap();
    assert_eq!(cleaning.status.state, CleaningState::Unspecified);
    assert!(cleaning.status.server_cleaning_statuses.is_empty());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn selector_cleaning_picks_only_tainted_matches() {
    let harness = Harness::start().await;
    // Two BMCs; both servers labeled, only one tainted.
    for (name, address) in [("bmc-a", "127.0.0.2"), ("bmc-b", "127.0.0.3")] {
        let mock = MockBmc::new()
            .with_account(BMC_USERNAME, BMC_PASSWORD, "Administrator")
            .with_system(MockSystem::new(format!("{name}-uuid")));
        harness.registry.register(address.parse().unwrap(), mock);
        let bmc_obj = harness.create_bmc(name, address);
        harness
            .store
            .patch(
                &bmc_obj,
                serde_json::json!({"metadata": {"labels": {"pool": "scrap"}}}),
            )
            .unwrap();
        harness.wait_server(&format!("{name}-system-0")).await;
    }
    harness.set_server_state("bmc-a-system-0", ServerState::Tainted);
    harness.set_server_state("bmc-b-system-0", ServerState::Available);

    // Wait for the label propagation onto the servers.
    harness
        .wait_for("labels on servers", || {
            let server: model::server::Server =
                harness.store.try_get(NS, "bmc-a-system-0").ok().flatten()?;
            (server.metadata.labels.get("pool").map(String::as_str) == Some("scrap")).then_some(())
        })
        .await;

    let cleaning = ServerCleaning {
        metadata: Metadata::named("clean-0", NS),
        spec: ServerCleaningSpec {
            server_ref: None,
            selector: Some(LabelSelector::matching("pool", "scrap")),
            disk_wipe: Some(DiskWipe {
                method: bmc::EraseMethod::CryptographicErase,
            }),
            bios_reset: false,
            bmc_reset: false,
            network_cleanup: false,
        },
        ..Default::default()
    };
    harness.store.create(cleaning).unwrap();

    let done = harness
        .wait_for("cleaning completed", || {
            let cleaning: ServerCleaning = harness.store.try_get(NS, "clean-0").ok().flatten()?;
            (cleaning.status.state == CleaningState::Completed).then_some(cleaning)
        })
        .await;
    assert_eq!(done.status.server_cleaning_statuses.len(), 1);
    assert_eq!(done.status.server_cleaning_statuses[0].server, "bmc-a-system-0");

    harness.stop().await;
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BIOS controllers: the settings power-cycle machine and the firmware
//! upgrade path.

use bmc_mock::MockSystem;
use model::bios::{BiosVersion, ServerBios, ServerBiosState};
use model::firmware::FirmwareUpdateState;
use model::maintenance::ServerMaintenance;
use model::server::{Server, ServerState};
use model::{Metadata, ObjectReference};

use crate::tests::common::{BMC_PASSWORD, BMC_USERNAME, Harness, NS};

const CURRENT_BIOS: &str = "2.10.0";

/// A mock BMC whose system carries a configurable BIOS.
fn bios_fixture(harness: &Harness) -> std::sync::Arc<bmc_mock::MockBmc> {
    let mock = bmc_mock::MockBmc::new()
        .with_account(BMC_USERNAME, BMC_PASSWORD, "Administrator")
        .with_system(
            MockSystem::new("bmc-0-uuid")
                .with_bios_version(CURRENT_BIOS)
                .with_attribute("abc", "old"),
        );
    let mock = harness.registry.register("127.0.0.1".parse().unwrap(), mock);
    harness.create_bmc("bmc-0", "127.0.0.1");
    mock
}

#[tokio::test(flavor = "multi_thread")]
async fn settings_update_walks_the_power_cycle() {
    let harness = Harness::start().await;
    let mock = bios_fixture(&harness);
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);

    let mut settings = ServerBios {
        metadata: Metadata::named("bios-0", NS),
        ..Default::default()
    };
    settings.spec.server_ref = ObjectReference::named("bmc-0-system-0");
    settings.spec.bios.version = CURRENT_BIOS.to_string();
    settings
        .spec
        .bios
        .settings
        .insert("abc".to_string(), "new".to_string());
    harness.store.create(settings).unwrap();

    let synced = harness
        .wait_for("settings synced", || {
            let settings: ServerBios = harness.store.try_get(NS, "bios-0").ok().flatten()?;
            (settings.status.state == ServerBiosState::Synced).then_some(settings)
        })
        .await;
    assert_eq!(
        synced.status.update_setting_state,
        model::bios::SettingUpdateState::Unspecified
    );
    // The attribute only applies across a power cycle, so reaching "new"
    // proves the off/on walk happened.
    assert_eq!(mock.attribute("bmc-0-uuid", "abc").as_deref(), Some("new"));
    assert_eq!(
        mock.system_power("bmc-0-uuid"),
        Some(bmc::PowerState::On),
        "server ends powered on"
    );

    // The server holds a biosSettingsRef to the record and the lease is
    // gone.
    let server: Server = harness.store.get(NS, "bmc-0-system-0").unwrap();
    assert_eq!(
        server.spec.bios_settings_ref.as_ref().map(|r| r.name.as_str()),
        Some("bios-0")
    );
    harness
        .wait_for("lease released", || {
            let leases = harness.store.list::<ServerMaintenance>(NS, None).ok()?;
            leases.is_empty().then_some(())
        })
        .await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn matching_settings_sync_without_leases() {
    let harness = Harness::start().await;
    bios_fixture(&harness);
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);

    let mut settings = ServerBios {
        metadata: Metadata::named("bios-0", NS),
        ..Default::default()
    };
    settings.spec.server_ref = ObjectReference::named("bmc-0-system-0");
    settings.spec.bios.version = CURRENT_BIOS.to_string();
    settings
        .spec
        .bios
        .settings
        .insert("abc".to_string(), "old".to_string());
    harness.store.create(settings).unwrap();

    harness
        .wait_for("synced without work", || {
            let settings: ServerBios = harness.store.try_get(NS, "bios-0").ok().flatten()?;
            (settings.status.state == ServerBiosState::Synced).then_some(())
        })
        .await;
    assert!(
        harness
            .store
            .list::<ServerMaintenance>(NS, None)
            .unwrap()
            .is_empty()
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bios_version_upgrade_completes() {
    let harness = Harness::start().await;
    let mock = bios_fixture(&harness);
    harness.wait_server("bmc-0-system-0").await;
    harness.set_server_state("bmc-0-system-0", ServerState::Available);

    let mut version = BiosVersion {
        metadata: Metadata::named("biosversion-0", NS),
        ..Default::default()
    };
    version.spec.server_ref = ObjectReference::named("bmc-0-system-0");
    version.spec.version = "2.11.0".to_string();
    version.spec.image.uri = "http://images.local/bios-2.11.0.bin".to_string();
    harness.store.create(version).unwrap();

    harness
        .wait_for("BIOS upgrade completed", || {
            let version: BiosVersion =
                harness.store.try_get(NS, "biosversion-0").ok().flatten()?;
            (version.status.state == FirmwareUpdateState::Completed).then_some(())
        })
        .await;
    // The staged firmware applied across the activating power cycle.
    assert_eq!(
        mock.state().system("bmc-0-uuid").unwrap().bios_version,
        "2.11.0"
    );
    harness
        .wait_for("lease released", || {
            let leases = harness.store.list::<ServerMaintenance>(NS, None).ok()?;
            leases.is_empty().then_some(())
        })
        .await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bios_downgrade_is_refused() {
    let harness = Harness::start().await;
    bios_fixture(&harness);
    harness.wait_server("bmc-0-system-0").await;

    let mut version = BiosVersion {
        metadata: Metadata::named("biosversion-0", NS),
        ..Default::default()
    };
    version.spec.server_ref = ObjectReference::named("bmc-0-system-0");
    version.spec.version = "2.9.0".to_string();
    version.spec.image.uri = "http://images.local/bios-2.9.0.bin".to_string();
    harness.store.create(version).unwrap();

    harness
        .wait_for("downgrade refused", || {
            let version: BiosVersion =
                harness.store.try_get(NS, "biosversion-0").ok().flatten()?;
            (version.status.state == FirmwareUpdateState::Failed).then_some(())
        })
        .await;

    harness.stop().await;
}

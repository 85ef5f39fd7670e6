/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Shared fixtures: a full in-process control plane over the mock BMC
//! fleet.

use std::sync::Arc;
use std::time::Duration;

use bmc_mock::{MockBmc, MockDriver, MockRegistry, MockSystem};
use model::bmc::{Bmc, InlineEndpoint, Protocol, ProtocolName};
use model::secret::Secret;
use model::server::{Server, ServerState};
use model::{Metadata, Resource, SecretReference};
use store::Store;
use tokio_util::sync::CancellationToken;

use crate::cfg::Options;

pub const NS: &str = "default";
pub const BMC_USERNAME: &str = "admin";
pub const BMC_PASSWORD: &str = "password";
pub const CURRENT_BMC_VERSION: &str = "1.45.455b66-rev4";
pub const TARGET_BMC_VERSION: &str = "1.46.455b66-rev4";

/// A running control plane: store, mock fleet and all controllers.
pub struct Harness {
    pub store: Store,
    pub registry: Arc<MockRegistry>,
    pub opts: Options,
    shutdown: CancellationToken,
    runtime: tokio::task::JoinHandle<()>,
}

impl Harness {
    pub async fn start() -> Harness {
        let opts = Options {
            namespace: NS.to_string(),
            resync_interval: Duration::from_millis(50),
            redfish_timeout: Duration::from_secs(2),
            workers: 2,
            backoff_base: Duration::from_millis(20),
            backoff_cap: Duration::from_millis(500),
        };
        let store = Store::new();
        let registry = MockRegistry::new();
        let driver = Arc::new(MockDriver::new(registry.clone()));
        let shutdown = CancellationToken::new();
        let runtime = tokio::spawn(crate::run(
            opts.clone(),
            store.clone(),
            driver,
            shutdown.clone(),
        ));
        Harness {
            store,
            registry,
            opts,
            shutdown,
            runtime,
        }
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.runtime.await;
    }

    /// Registers a mock BMC with one system and the standard admin
    /// account.
    pub fn mock_bmc(&self, name: &str, address: &str) -> Arc<MockBmc> {
        let mock = MockBmc::new()
            .with_account(BMC_USERNAME, BMC_PASSWORD, "Administrator")
            .with_bmc_version(CURRENT_BMC_VERSION)
            .with_system(MockSystem::new(format!("{name}-uuid")));
        self.registry.register(address.parse().expect("test address"), mock)
    }

    /// Creates the BMC record (with its credential secret) for an already
    /// registered mock.
    pub fn create_bmc(&self, name: &str, address: &str) -> Bmc {
        let secret = self
            .store
            .create(Secret::credentials(
                format!("{name}-credentials"),
                NS,
                BMC_USERNAME,
                BMC_PASSWORD,
            ))
            .expect("create credential secret");
        let mut bmc_obj = Bmc {
            metadata: Metadata::named(name, NS),
            ..Default::default()
        };
        bmc_obj.spec.endpoint = Some(InlineEndpoint {
            ip: address.parse().expect("test address"),
            mac_address: "23:11:8A:33:CF:EA".parse().expect("test mac"),
        });
        bmc_obj.spec.protocol = Protocol {
            name: ProtocolName::RedfishLocal,
            port: 8000,
            scheme: None,
        };
        bmc_obj.spec.bmc_secret_ref = SecretReference::named(secret.metadata.name);
        self.store.create(bmc_obj).expect("create BMC")
    }

    /// Mock plus record in one go.
    pub fn bmc_fixture(&self, name: &str, address: &str) -> Arc<MockBmc> {
        let mock = self.mock_bmc(name, address);
        self.create_bmc(name, address);
        mock
    }

    /// Polls until the probe yields a value. Panics after 15 seconds.
    pub async fn wait_for<T>(&self, what: &str, probe: impl Fn() -> Option<T>) -> T {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
        loop {
            if let Some(value) = probe() {
                return value;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for {what}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Waits for the child Server the BMC controller registers.
    pub async fn wait_server(&self, name: &str) -> Server {
        let store = self.store.clone();
        let name_owned = name.to_string();
        self.wait_for(&format!("server {name}"), move || {
            store.try_get::<Server>(NS, &name_owned).ok().flatten()
        })
        .await
    }

    /// Stands in for the provisioning pipeline: forces a server's state.
    pub fn set_server_state(&self, name: &str, state: ServerState) {
        for _ in 0..20 {
            let server: Server = self.store.get(NS, name).expect("server present");
            let mut updated = server.clone();
            updated.status.state = state;
            let status = serde_json::to_value(&updated)
                .expect("serialize server")
                .get("status")
                .cloned()
                .expect("status section");
            match self.store.patch_status(&server, status) {
                Ok(_) => return,
                Err(e) if e.is_conflict() => continue,
                Err(e) => panic!("failed to set server state: {e}"),
            }
        }
        panic!("kept conflicting while setting server state");
    }

    /// Merge-patches an object's metadata annotations.
    pub fn annotate<R: Resource>(&self, name: &str, key: &str, value: &str) {
        for _ in 0..20 {
            let obj: R = self.store.get(NS, name).expect("object present");
            match self.store.patch(
                &obj,
                serde_json::json!({"metadata": {"annotations": {key: value}}}),
            ) {
                Ok(_) => return,
                Err(e) if e.is_conflict() => continue,
                Err(e) => panic!("failed to annotate: {e}"),
            }
        }
        panic!("kept conflicting while annotating");
    }
}

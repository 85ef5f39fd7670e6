/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Mock BMC fleet for tests and the local emulator harness.
//!
//! A [`MockRegistry`] holds one [`MockBmc`] per endpoint address. The
//! [`MockDriver`] implements the driver interface against the registry:
//! sessions authenticate against the mock's account table, long-running
//! tasks advance one step per poll, and firmware versions stage until the
//! matching reset, the way real BMCs behave. Tests mutate and inspect mock
//! state directly through [`MockBmc`] handles.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use bmc::{BmcError, Credentials, Endpoint, Result};

mod session;
mod state;

pub use state::{MockAccount, MockBmcState, MockSystem, MockTask, TaskEffect, UPGRADE_TASK_URI};

use session::MockSession;

/// One simulated BMC. Handles are shared between the driver and the test
/// that configures and inspects the mock.
#[derive(Debug, Default)]
pub struct MockBmc {
    state: Mutex<MockBmcState>,
}

impl MockBmc {
    pub fn new() -> Self {
        MockBmc::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockBmcState> {
        self.state.lock().expect("mock BMC lock")
    }

    pub fn with_account(self, username: &str, password: &str, role: &str) -> Self {
        self.state().add_account(username, password, role);
        self
    }

    pub fn with_bmc_version(self, version: &str) -> Self {
        self.state().bmc_version = version.to_string();
        self
    }

    pub fn with_system(self, system: MockSystem) -> Self {
        self.state().systems.push(system);
        self
    }

    pub fn with_password_validity(self, validity: std::time::Duration) -> Self {
        self.state().password_validity = Some(validity);
        self
    }

    // Inspection and fault-injection helpers used by tests.

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn reject_next_upgrade(&self, reason: &str) {
        self.state().reject_next_upgrade = Some(reason.to_string());
    }

    pub fn bmc_version(&self) -> String {
        self.state().bmc_version.clone()
    }

    pub fn set_bmc_version(&self, version: &str) {
        self.state().bmc_version = version.to_string();
    }

    pub fn set_task_polls(&self, polls: u32) {
        self.state().task_polls = polls;
    }

    pub fn manager_resets(&self) -> u32 {
        self.state().manager_resets
    }

    pub fn account_password(&self, username: &str) -> Option<String> {
        self.state()
            .account_by_name(username)
            .map(|a| a.password.clone())
    }

    pub fn has_account(&self, username: &str) -> bool {
        self.state().account_by_name(username).is_some()
    }

    pub fn attribute(&self, system_uuid: &str, key: &str) -> Option<String> {
        self.state()
            .system(system_uuid)
            .and_then(|s| s.attributes.get(key).cloned())
    }

    pub fn system_power(&self, system_uuid: &str) -> Option<bmc::PowerState> {
        self.state().system(system_uuid).map(|s| s.power)
    }

    /// Drops a task, simulating a BMC that forgets tasks across reboots.
    pub fn forget_task(&self, uri: &str) {
        self.state().tasks.remove(uri);
    }
}

/// The mock fleet: endpoint address to mock BMC.
#[derive(Debug, Default)]
pub struct MockRegistry {
    bmcs: Mutex<Vec<(IpAddr, Arc<MockBmc>)>>,
}

impl MockRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(MockRegistry::default())
    }

    pub fn register(&self, address: IpAddr, mock: MockBmc) -> Arc<MockBmc> {
        let mock = Arc::new(mock);
        let mut bmcs = self.bmcs.lock().expect("registry lock");
        bmcs.retain(|(a, _)| *a != address);
        bmcs.push((address, mock.clone()));
        mock
    }

    pub fn lookup(&self, address: &IpAddr) -> Option<Arc<MockBmc>> {
        self.bmcs
            .lock()
            .expect("registry lock")
            .iter()
            .find(|(a, _)| a == address)
            .map(|(_, m)| m.clone())
    }

    /// Clears every registered mock. Test harnesses call this between
    /// tests that share a registry.
    pub fn reset(&self) {
        self.bmcs.lock().expect("registry lock").clear();
    }
}

/// Driver implementation over the registry.
pub struct MockDriver {
    registry: Arc<MockRegistry>,
}

impl MockDriver {
    pub fn new(registry: Arc<MockRegistry>) -> Self {
        MockDriver { registry }
    }
}

#[async_trait::async_trait]
impl bmc::BmcDriver for MockDriver {
    async fn session(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn bmc::BmcSession>> {
        let Some(mock) = self.registry.lookup(&endpoint.address) else {
            return Err(BmcError::Transport(format!(
                "connection refused: {endpoint}"
            )));
        };
        {
            let state = mock.state();
            if state.unreachable {
                return Err(BmcError::Transport(format!("connection timed out: {endpoint}")));
            }
            let authorized = state.accounts.iter().any(|a| {
                a.username == credentials.username && a.password == credentials.password
            });
            if !authorized {
                return Err(BmcError::Unauthorized);
            }
        }
        Ok(Box::new(MockSession { bmc: mock }))
    }
}

#[cfg(test)]
mod tests {
    use bmc::{BmcDriver, Scheme, TaskState};

    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint {
            address: "127.0.0.1".parse().unwrap(),
            port: 443,
            scheme: Scheme::Https,
        }
    }

    fn creds() -> Credentials {
        Credentials {
            username: "admin".to_string(),
            password: "password".to_string(),
        }
    }

    #[tokio::test]
    async fn session_authenticates_against_accounts() {
        let registry = MockRegistry::new();
        registry.register(
            "127.0.0.1".parse().unwrap(),
            MockBmc::new().with_account("admin", "password", "Administrator"),
        );
        let driver = MockDriver::new(registry);

        assert!(driver.session(&endpoint(), &creds()).await.is_ok());

        let wrong = Credentials {
            username: "admin".to_string(),
            password: "nope".to_string(),
        };
        let err = driver.session(&endpoint(), &wrong).await.err().unwrap();
        assert!(err.is_unauthorized());
    }

    #[tokio::test]
    async fn upgrade_stages_version_until_reset() {
        let registry = MockRegistry::new();
        let mock = registry.register(
            "127.0.0.1".parse().unwrap(),
            MockBmc::new()
                .with_account("admin", "password", "Administrator")
                .with_bmc_version("1.45.455b66-rev4"),
        );
        let driver = MockDriver::new(registry);
        let session = driver.session(&endpoint(), &creds()).await.unwrap();

        let task_uri = session
            .upgrade_bmc_version(&bmc::UpgradeRequest {
                version: "1.46.455b66-rev4".to_string(),
                image_uri: "http://images/bmc.bin".to_string(),
                transfer_protocol: None,
                image_credentials: None,
                force: false,
            })
            .await
            .unwrap();
        assert_eq!(task_uri, UPGRADE_TASK_URI);

        // The task needs a couple of polls, then the new version stages.
        let mut last = session.upgrade_task(&task_uri).await.unwrap();
        while !last.state.is_terminal() {
            last = session.upgrade_task(&task_uri).await.unwrap();
        }
        assert_eq!(last.state, TaskState::Completed);
        assert_eq!(mock.bmc_version(), "1.45.455b66-rev4");

        session.reset_manager().await.unwrap();
        assert_eq!(mock.bmc_version(), "1.46.455b66-rev4");
    }

    #[tokio::test]
    async fn bios_attributes_stage_until_power_cycle() {
        let registry = MockRegistry::new();
        let mock = registry.register(
            "127.0.0.1".parse().unwrap(),
            MockBmc::new()
                .with_account("admin", "password", "Administrator")
                .with_system(MockSystem::new("system-uuid-0").with_attribute("abc", "old")),
        );
        let driver = MockDriver::new(registry);
        let session = driver.session(&endpoint(), &creds()).await.unwrap();

        let mut attrs = std::collections::BTreeMap::new();
        attrs.insert("abc".to_string(), "new".to_string());
        session
            .set_bios_attributes_on_reset("system-uuid-0", &attrs)
            .await
            .unwrap();
        assert_eq!(mock.attribute("system-uuid-0", "abc").unwrap(), "old");

        session.power_off("system-uuid-0").await.unwrap();
        session.power_on("system-uuid-0").await.unwrap();
        assert_eq!(mock.attribute("system-uuid-0", "abc").unwrap(), "new");
    }
}

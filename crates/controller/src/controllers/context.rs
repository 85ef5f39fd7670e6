/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Services and helpers shared by every controller.

use std::future::Future;
use std::sync::Arc;

use bmc::{BmcDriver, BmcError, BmcSession, Credentials};
use model::bmc::{Bmc, ProtocolName, ProtocolScheme};
use model::secret::Secret;
use model::{Resource, SecretReference};
use serde_json::json;
use store::{Store, StoreError};

use crate::cfg::Options;
use crate::runtime::{ObjectKey, ReconcileError};

/// Everything a reconcile needs besides its key: the store, the BMC
/// driver and the process configuration.
#[derive(Clone)]
pub struct Context {
    pub store: Store,
    pub driver: Arc<dyn BmcDriver>,
    pub opts: Options,
}

/// Failure to open a BMC session, kept apart from [`ReconcileError`] so
/// controllers can branch on the cause when choosing a condition.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// A referenced object (secret, endpoint) does not exist yet. The
    /// user must act; requeue until resolved.
    #[error("prerequisite missing: {0}")]
    Prerequisite(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bmc(#[from] BmcError),
}

impl ConnectError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ConnectError::Bmc(e) if e.is_unauthorized())
    }
}

impl From<ConnectError> for ReconcileError {
    fn from(error: ConnectError) -> Self {
        match error {
            ConnectError::Prerequisite(what) => {
                ReconcileError::Internal(eyre::eyre!("prerequisite missing: {what}"))
            }
            ConnectError::Store(e) => ReconcileError::Store(e),
            ConnectError::Bmc(e) => ReconcileError::Bmc(e),
        }
    }
}

impl Context {
    /// Resolves where the BMC is reachable, from the inline endpoint or
    /// the referenced Endpoint record.
    pub fn endpoint_of(&self, bmc_obj: &Bmc) -> Result<bmc::Endpoint, ConnectError> {
        let namespace = &bmc_obj.metadata.namespace;
        let address = if let Some(inline) = &bmc_obj.spec.endpoint {
            inline.ip
        } else if let Some(endpoint_ref) = &bmc_obj.spec.endpoint_ref {
            let endpoint: model::endpoint::Endpoint = self
                .store
                .try_get(namespace, &endpoint_ref.name)?
                .ok_or_else(|| {
                    ConnectError::Prerequisite(format!("Endpoint {}", endpoint_ref.name))
                })?;
            endpoint.spec.ip
        } else {
            return Err(ConnectError::Prerequisite(format!(
                "BMC {} has no endpoint",
                bmc_obj.metadata.name
            )));
        };
        let scheme = match bmc_obj.spec.protocol.scheme {
            Some(ProtocolScheme::Http) => bmc::Scheme::Http,
            Some(ProtocolScheme::Https) => bmc::Scheme::Https,
            None => match bmc_obj.spec.protocol.name {
                ProtocolName::Redfish => bmc::Scheme::Https,
                ProtocolName::RedfishLocal => bmc::Scheme::Http,
            },
        };
        Ok(bmc::Endpoint {
            address,
            port: bmc_obj.spec.protocol.port,
            scheme,
        })
    }

    /// Reads username and password out of a credential secret.
    pub fn credentials(
        &self,
        namespace: &str,
        secret_ref: &SecretReference,
    ) -> Result<Credentials, ConnectError> {
        let secret: Secret = self
            .store
            .try_get(namespace, &secret_ref.name)?
            .ok_or_else(|| ConnectError::Prerequisite(format!("Secret {}", secret_ref.name)))?;
        let username = secret.username().ok_or_else(|| {
            ConnectError::Prerequisite(format!("Secret {} has no username", secret_ref.name))
        })?;
        let password = secret.password().ok_or_else(|| {
            ConnectError::Prerequisite(format!("Secret {} has no password", secret_ref.name))
        })?;
        Ok(Credentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Opens a session using the BMC's declared credential secret.
    pub async fn connect(&self, bmc_obj: &Bmc) -> Result<Box<dyn BmcSession>, ConnectError> {
        let credentials =
            self.credentials(&bmc_obj.metadata.namespace, &bmc_obj.spec.bmc_secret_ref)?;
        self.connect_with(bmc_obj, &credentials).await
    }

    /// Opens a session with explicit credentials (connect tests, account
    /// bootstrap).
    pub async fn connect_with(
        &self,
        bmc_obj: &Bmc,
        credentials: &Credentials,
    ) -> Result<Box<dyn BmcSession>, ConnectError> {
        let endpoint = self.endpoint_of(bmc_obj)?;
        let session = self
            .with_timeout(self.driver.session(&endpoint, credentials))
            .await?;
        Ok(session)
    }

    /// Applies the per-call deadline to a driver future.
    pub async fn with_timeout<T>(
        &self,
        call: impl Future<Output = Result<T, BmcError>>,
    ) -> Result<T, BmcError> {
        match tokio::time::timeout(self.opts.redfish_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BmcError::Transport("deadline exceeded".to_string())),
        }
    }

    /// Read-mutate-write on the status subresource with a bounded retry
    /// loop on optimistic-concurrency conflicts. Returns `None` when the
    /// object is gone.
    pub fn save_status<R, F>(&self, key: &ObjectKey, mut mutate: F) -> Result<Option<R>, ReconcileError>
    where
        R: Resource,
        F: FnMut(&mut R),
    {
        for _ in 0..3 {
            let Some(mut obj) = self.store.try_get::<R>(&key.namespace, &key.name)? else {
                return Ok(None);
            };
            let before = status_value(&obj)?;
            mutate(&mut obj);
            let after = status_value(&obj)?;
            if before == after {
                // Quiesced reconciles must not produce writes.
                return Ok(Some(obj));
            }
            match self.store.patch_status(&obj, after) {
                Ok(obj) => return Ok(Some(obj)),
                Err(e) if e.is_conflict() => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcileError::Internal(eyre::eyre!(
            "status update of {} kept conflicting",
            key
        )))
    }

    /// Installs the controller finalizer if absent.
    pub fn ensure_finalizer<R: Resource>(&self, obj: &R) -> Result<R, StoreError> {
        let finalizer = R::finalizer();
        if obj.metadata().has_finalizer(&finalizer) {
            return Ok(obj.clone());
        }
        let mut finalizers = obj.metadata().finalizers.clone();
        finalizers.push(finalizer);
        self.store
            .patch(obj, json!({"metadata": {"finalizers": finalizers}}))
    }

    /// Removes the controller finalizer; the store then completes the
    /// deletion.
    pub fn remove_finalizer<R: Resource>(&self, obj: &R) -> Result<R, StoreError> {
        let finalizer = R::finalizer();
        if !obj.metadata().has_finalizer(&finalizer) {
            return Ok(obj.clone());
        }
        let finalizers: Vec<String> = obj
            .metadata()
            .finalizers
            .iter()
            .filter(|f| **f != finalizer)
            .cloned()
            .collect();
        self.store
            .patch(obj, json!({"metadata": {"finalizers": finalizers}}))
    }

    pub fn set_annotation<R: Resource>(
        &self,
        obj: &R,
        key: &str,
        value: &str,
    ) -> Result<R, StoreError> {
        self.store
            .patch(obj, json!({"metadata": {"annotations": {key: value}}}))
    }

    pub fn clear_annotation<R: Resource>(&self, obj: &R, key: &str) -> Result<R, StoreError> {
        self.store
            .patch(obj, json!({"metadata": {"annotations": {key: null}}}))
    }
}

/// Serializes the status section of a resource.
pub fn status_value<R: Resource>(obj: &R) -> Result<serde_json::Value, StoreError> {
    let value = serde_json::to_value(obj)?;
    Ok(value.get("status").cloned().unwrap_or(json!({})))
}

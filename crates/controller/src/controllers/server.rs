/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Server controller: maintenance-grant arbitration and power
//! reconciliation for one system behind a BMC.
//!
//! ServerMaintenance is the lock on a server. This controller is the only
//! writer of `server.spec.server_maintenance_ref` and of the server's
//! `maintenance` state: operational controllers request leases, the
//! arbitration here decides when one is granted.

use std::sync::Arc;

use model::annotations;
use model::bmc::Bmc;
use model::maintenance::{MaintenancePolicy, MaintenanceState, ServerMaintenance};
use model::server::{Power, Server, ServerState};
use model::server_claim::ServerClaim;
use model::{ObjectReference, Resource};
use serde_json::json;
use store::Store;

use crate::controllers::context::Context;
use crate::runtime::{ObjectKey, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

pub struct ServerController {
    ctx: Context,
}

impl ServerController {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(ServerController { ctx })
    }

    pub fn watches(store: &Store) -> Vec<Watch> {
        let bmcs = store.clone();
        vec![
            // A lease addresses its server directly.
            Watch::mapped(ServerMaintenance::KIND, |obj| {
                obj.decode::<ServerMaintenance>()
                    .map(|lease| {
                        vec![ObjectKey::new(
                            lease.metadata.namespace,
                            lease.spec.server_ref.name,
                        )]
                    })
                    .unwrap_or_default()
            }),
            // Claim annotations gate ownerApproval leases.
            Watch::mapped(ServerClaim::KIND, |obj| {
                obj.decode::<ServerClaim>()
                    .map(|claim| {
                        vec![ObjectKey::new(
                            claim.metadata.namespace,
                            claim.spec.server_ref.name,
                        )]
                    })
                    .unwrap_or_default()
            }),
            // BMC changes (labels, availability) touch all its servers.
            Watch::mapped(Bmc::KIND, move |obj| {
                let meta = obj.metadata();
                bmcs.list_stored(Server::KIND, &meta.namespace)
                    .into_iter()
                    .filter_map(|stored| stored.decode::<Server>())
                    .filter(|server| {
                        server
                            .spec
                            .bmc_ref
                            .as_ref()
                            .is_some_and(|r| r.name == meta.name)
                    })
                    .map(|server| ObjectKey::of(&server.metadata))
                    .collect()
            }),
        ]
    }

    /// Grant, track or release the maintenance binding.
    fn arbitrate(&self, key: &ObjectKey, server: &Server) -> Result<(), crate::runtime::ReconcileError> {
        let leases: Vec<ServerMaintenance> = self
            .ctx
            .store
            .list::<ServerMaintenance>(&key.namespace, None)?
            .into_iter()
            .filter(|lease| lease.spec.server_ref.name == server.metadata.name)
            .collect();

        if let Some(bound_ref) = &server.spec.server_maintenance_ref {
            let bound = leases
                .iter()
                .find(|lease| Some(lease.metadata.uid) == bound_ref.uid);
            match bound {
                Some(lease) => {
                    // Re-assert both sides of the binding; either patch may
                    // have been interrupted.
                    if server.status.state != ServerState::Maintenance {
                        self.ctx.save_status::<Server, _>(key, |current| {
                            current.status.state = ServerState::Maintenance;
                        })?;
                    }
                    if lease.status.state != MaintenanceState::InMaintenance {
                        let lease_key = ObjectKey::of(&lease.metadata);
                        self.ctx.save_status::<ServerMaintenance, _>(&lease_key, |current| {
                            current.status.state = MaintenanceState::InMaintenance;
                        })?;
                    }
                }
                None => {
                    // The lease is gone: unbind and restore the
                    // pre-maintenance state.
                    let restored = if self.is_claimed(key, server)? {
                        ServerState::Reserved
                    } else {
                        ServerState::Initial
                    };
                    tracing::info!(
                        server = %key,
                        state = %restored,
                        "maintenance lease released"
                    );
                    self.ctx
                        .store
                        .patch(server, json!({"spec": {"serverMaintenanceRef": null}}))?;
                    self.ctx.save_status::<Server, _>(key, |current| {
                        current.status.state = restored;
                    })?;
                }
            }
            return Ok(());
        }

        // No binding: grant the oldest admissible pending lease, one at a
        // time. Servers outside available/reserved are not disrupted.
        if !matches!(
            server.status.state,
            ServerState::Available | ServerState::Reserved
        ) {
            return Ok(());
        }
        let mut pending: Vec<&ServerMaintenance> = leases
            .iter()
            .filter(|lease| !lease.status.state.is_terminal())
            .filter(|lease| !lease.metadata.is_marked_for_deletion())
            .collect();
        pending.sort_by(|a, b| {
            a.metadata
                .creation_timestamp
                .cmp(&b.metadata.creation_timestamp)
                .then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });
        let admissible = pending.into_iter().find(|lease| match lease.spec.policy {
            MaintenancePolicy::Enforced => true,
            MaintenancePolicy::OwnerApproval => self
                .approving_claim(key, server)
                .unwrap_or(false),
        });
        if let Some(lease) = admissible {
            tracing::info!(server = %key, lease = %lease.metadata.name, "granting maintenance");
            self.ctx.store.patch(
                server,
                json!({
                    "spec": {
                        "serverMaintenanceRef": ObjectReference::with_uid(
                            lease.metadata.name.clone(),
                            lease.metadata.uid,
                        )
                    }
                }),
            )?;
            self.ctx.save_status::<Server, _>(key, |current| {
                current.status.state = ServerState::Maintenance;
            })?;
            let lease_key = ObjectKey::of(&lease.metadata);
            self.ctx.save_status::<ServerMaintenance, _>(&lease_key, |current| {
                current.status.state = MaintenanceState::InMaintenance;
            })?;
        }
        Ok(())
    }

    fn is_claimed(&self, key: &ObjectKey, server: &Server) -> Result<bool, store::StoreError> {
        Ok(self
            .ctx
            .store
            .list::<ServerClaim>(&key.namespace, None)?
            .iter()
            .any(|claim| claim.spec.server_ref.name == server.metadata.name))
    }

    fn approving_claim(&self, key: &ObjectKey, server: &Server) -> Result<bool, store::StoreError> {
        Ok(self
            .ctx
            .store
            .list::<ServerClaim>(&key.namespace, None)?
            .iter()
            .any(|claim| {
                claim.spec.server_ref.name == server.metadata.name && claim.approves_maintenance()
            }))
    }

    /// Drives the system's power towards what the bound lease (or, outside
    /// maintenance, the server spec) asks for, and refreshes the observed
    /// power state. Best effort: an unreachable BMC leaves arbitration
    /// intact.
    async fn reconcile_power(&self, key: &ObjectKey, server: &Server) -> Result<(), crate::runtime::ReconcileError> {
        let Some(bmc_ref) = &server.spec.bmc_ref else {
            return Ok(());
        };
        let Some(system_uuid) = server.spec.system_uuid.clone() else {
            return Ok(());
        };
        let Some(bmc_obj) = self
            .ctx
            .store
            .try_get::<Bmc>(&key.namespace, &bmc_ref.name)?
        else {
            return Ok(());
        };

        let desired = if server.status.state == ServerState::Maintenance {
            server
                .spec
                .server_maintenance_ref
                .as_ref()
                .and_then(|lease_ref| {
                    self.ctx
                        .store
                        .try_get::<ServerMaintenance>(&key.namespace, &lease_ref.name)
                        .ok()
                        .flatten()
                })
                .and_then(|lease| lease.spec.server_power)
        } else {
            server.spec.power
        };

        let session = match self.ctx.connect(&bmc_obj).await {
            Ok(session) => session,
            Err(error) => {
                tracing::warn!(server = %key, %error, "skipping power reconciliation");
                return Ok(());
            }
        };
        let result = async {
            let mut observed = self
                .ctx
                .with_timeout(session.system_power_state(&system_uuid))
                .await?;
            match (desired, observed) {
                (Some(Power::On), bmc::PowerState::Off) => {
                    tracing::info!(server = %key, "powering on");
                    self.ctx.with_timeout(session.power_on(&system_uuid)).await?;
                    observed = self
                        .ctx
                        .with_timeout(session.system_power_state(&system_uuid))
                        .await?;
                }
                (Some(Power::Off), bmc::PowerState::On) => {
                    tracing::info!(server = %key, "powering off");
                    self.ctx.with_timeout(session.power_off(&system_uuid)).await?;
                    observed = self
                        .ctx
                        .with_timeout(session.system_power_state(&system_uuid))
                        .await?;
                }
                _ => {}
            }
            Ok::<_, crate::runtime::ReconcileError>(observed)
        }
        .await;
        session.logout().await;
        let observed = result?;

        if server.status.power_state != observed {
            self.ctx.save_status::<Server, _>(key, |current| {
                current.status.power_state = observed;
            })?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconciler for ServerController {
    fn kind(&self) -> &'static str {
        Server::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(server) = self.ctx.store.try_get::<Server>(&key.namespace, &key.name)? else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&server.metadata.annotations) {
            return Ok(ReconcileOutcome::done());
        }
        if server.metadata.is_marked_for_deletion() {
            self.ctx.remove_finalizer(&server)?;
            return Ok(ReconcileOutcome::done());
        }
        let server = self.ctx.ensure_finalizer(&server)?;

        self.arbitrate(key, &server)?;

        // Power acts on the post-arbitration view.
        if let Some(server) = self.ctx.store.try_get::<Server>(&key.namespace, &key.name)? {
            self.reconcile_power(key, &server).await?;
        }
        Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval))
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! ServerMaintenance controller: lease lifecycle bookkeeping.
//!
//! Granting is the server controller's job; this controller moves fresh
//! leases into `pending` and, on deletion, releases the server binding
//! before letting go of the finalizer so a vanished lease can never leave
//! a server stuck in maintenance.

use std::sync::Arc;

use model::annotations;
use model::maintenance::{MaintenanceState, ServerMaintenance};
use model::server::{Server, ServerState};
use model::server_claim::ServerClaim;
use model::Resource;
use serde_json::json;
use store::Store;

use crate::controllers::context::Context;
use crate::runtime::{ObjectKey, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

pub struct ServerMaintenanceController {
    ctx: Context,
}

impl ServerMaintenanceController {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(ServerMaintenanceController { ctx })
    }

    pub fn watches(store: &Store) -> Vec<Watch> {
        let servers = store.clone();
        vec![Watch::mapped(Server::KIND, move |obj| {
            let meta = obj.metadata();
            servers
                .list_stored(ServerMaintenance::KIND, &meta.namespace)
                .into_iter()
                .filter_map(|stored| stored.decode::<ServerMaintenance>())
                .filter(|lease| lease.spec.server_ref.name == meta.name)
                .map(|lease| ObjectKey::of(&lease.metadata))
                .collect()
        })]
    }

    fn finalize(&self, key: &ObjectKey, lease: &ServerMaintenance) -> Result<(), crate::runtime::ReconcileError> {
        let server_name = &lease.spec.server_ref.name;
        if let Some(server) = self
            .ctx
            .store
            .try_get::<Server>(&key.namespace, server_name)?
            && server
                .spec
                .server_maintenance_ref
                .as_ref()
                .is_some_and(|r| r.uid == Some(lease.metadata.uid))
        {
            let claimed = self
                .ctx
                .store
                .list::<ServerClaim>(&key.namespace, None)?
                .iter()
                .any(|claim| claim.spec.server_ref.name == *server_name);
            let restored = if claimed {
                ServerState::Reserved
            } else {
                ServerState::Initial
            };
            self.ctx
                .store
                .patch(&server, json!({"spec": {"serverMaintenanceRef": null}}))?;
            let server_key = ObjectKey::new(&key.namespace, server_name.as_str());
            self.ctx.save_status::<Server, _>(&server_key, |current| {
                current.status.state = restored;
            })?;
        }
        self.ctx.remove_finalizer(lease)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconciler for ServerMaintenanceController {
    fn kind(&self) -> &'static str {
        ServerMaintenance::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(lease) = self
            .ctx
            .store
            .try_get::<ServerMaintenance>(&key.namespace, &key.name)?
        else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&lease.metadata.annotations) {
            return Ok(ReconcileOutcome::done());
        }
        if lease.metadata.is_marked_for_deletion() {
            self.finalize(key, &lease)?;
            return Ok(ReconcileOutcome::done());
        }
        let lease = self.ctx.ensure_finalizer(&lease)?;

        if lease.status.state == MaintenanceState::Unspecified {
            self.ctx.save_status::<ServerMaintenance, _>(key, |current| {
                current.status.state = MaintenanceState::Pending;
            })?;
        }
        Ok(ReconcileOutcome::done())
    }
}

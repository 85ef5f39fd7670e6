/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BMC controller: keeps `bmc.status` aligned with the hardware, emits one
//! child Server per enumerated system and drives the user-requested
//! manager reset handshake.

use std::collections::BTreeMap;
use std::sync::Arc;

use bmc::BmcSession;
use model::annotations;
use model::bmc::{
    Bmc, BmcState, CONDITION_READY, CONDITION_RESET, REASON_BMC_UNAVAILABLE, REASON_RESET_COMPLETE,
    REASON_UNAUTHORIZED, REASON_USER_RESET,
};
use model::condition::{self, Condition, ConditionStatus};
use model::secret::Secret;
use model::server::Server;
use model::{ObjectReference, OwnerReference, Resource};
use serde_json::{Value, json};
use store::Store;

use crate::controllers::context::Context;
use crate::runtime::{ObjectKey, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

pub struct BmcController {
    ctx: Context,
}

impl BmcController {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(BmcController { ctx })
    }

    /// Secondary watches: endpoint and credential changes re-probe the
    /// BMCs referencing them.
    pub fn watches(store: &Store) -> Vec<Watch> {
        let endpoints = store.clone();
        let secrets = store.clone();
        vec![
            Watch::mapped(model::endpoint::Endpoint::KIND, move |obj| {
                let meta = obj.metadata();
                bmcs_where(&endpoints, &meta.namespace, |bmc_obj| {
                    bmc_obj
                        .spec
                        .endpoint_ref
                        .as_ref()
                        .is_some_and(|r| r.name == meta.name)
                })
            }),
            Watch::mapped(Secret::KIND, move |obj| {
                let meta = obj.metadata();
                bmcs_where(&secrets, &meta.namespace, |bmc_obj| {
                    bmc_obj.spec.bmc_secret_ref.name == meta.name
                })
            }),
        ]
    }

    async fn observe(
        &self,
        key: &ObjectKey,
        bmc_obj: &Bmc,
        session: &dyn BmcSession,
    ) -> ReconcileResult {
        let info = self.ctx.with_timeout(session.manager_info()).await?;
        let systems = self.ctx.with_timeout(session.systems()).await?;
        let ip = self.ctx.endpoint_of(bmc_obj).ok().map(|e| e.address);

        if bmc_obj.status.power_state == bmc::PowerState::Unknown {
            tracing::debug!(bmc = %key, "power state unknown, proceeding");
        }

        self.ctx.save_status::<Bmc, _>(key, |current| {
            current.status.ip = ip;
            current.status.mac_address = info.mac_address.clone();
            current.status.model = info.model.clone();
            current.status.manufacturer = info.manufacturer.clone();
            current.status.serial_number = info.serial_number.clone();
            current.status.firmware_version = info.firmware_version.clone();
            current.status.power_state = info.power_state;
            current.status.state = Some(if info.enabled {
                BmcState::Enabled
            } else {
                BmcState::Disabled
            });
            condition::set(
                &mut current.status.conditions,
                Condition::new(CONDITION_READY, ConditionStatus::True, "Connected"),
            );
        })?;

        // One child Server per enumerated system. Children of systems that
        // disappeared are kept; removing them is an operator decision.
        for (index, system) in systems.iter().enumerate() {
            let name = format!("{}-system-{}", bmc_obj.metadata.name, index);
            match self.ctx.store.try_get::<Server>(&key.namespace, &name)? {
                None => {
                    let mut server = Server {
                        metadata: model::Metadata::named(&name, &key.namespace),
                        ..Default::default()
                    };
                    server.metadata.labels = bmc_obj.metadata.labels.clone();
                    server.metadata.owner_references.push(OwnerReference::controller_of(
                        Bmc::KIND,
                        &bmc_obj.metadata.name,
                        bmc_obj.metadata.uid,
                    ));
                    server.spec.system_uuid = Some(system.uuid.clone());
                    server.spec.system_uri = Some(system.uri.clone());
                    server.spec.bmc_ref = Some(ObjectReference::named(&bmc_obj.metadata.name));
                    tracing::info!(bmc = %key, server = name, "registering server");
                    self.ctx.store.create(server)?;
                }
                Some(existing) => {
                    let labels = labels_patch(&existing.metadata.labels, &bmc_obj.metadata.labels);
                    let uuid_current = existing.spec.system_uuid.as_deref();
                    let uri_current = existing.spec.system_uri.as_deref();
                    if labels.is_some()
                        || uuid_current != Some(system.uuid.as_str())
                        || uri_current != Some(system.uri.as_str())
                    {
                        let mut patch = json!({
                            "spec": {
                                "systemUuid": system.uuid,
                                "systemUri": system.uri,
                            }
                        });
                        if let Some(labels) = labels {
                            patch["metadata"] = json!({ "labels": labels });
                        }
                        self.ctx.store.patch(&existing, patch)?;
                    }
                }
            }
        }

        self.handle_reset_operation(key, session).await?;
        Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval))
    }

    /// The `GracefulRestartBMC` handshake: issue the manager reset and
    /// publish `Reset=True`; on a later pass, with the BMC reachable
    /// again, clear the annotation and flip the condition back.
    async fn handle_reset_operation(
        &self,
        key: &ObjectKey,
        session: &dyn BmcSession,
    ) -> Result<(), crate::runtime::ReconcileError> {
        let Some(current) = self.ctx.store.try_get::<Bmc>(&key.namespace, &key.name)? else {
            return Ok(());
        };
        if current.metadata.annotation(annotations::OPERATION)
            != Some(annotations::OPERATION_GRACEFUL_RESTART_BMC)
        {
            return Ok(());
        }
        if !condition::is_true(&current.status.conditions, CONDITION_RESET) {
            tracing::info!(bmc = %key, "resetting manager on user request");
            self.ctx.with_timeout(session.reset_manager()).await?;
            self.ctx.save_status::<Bmc, _>(key, |bmc_obj| {
                condition::set(
                    &mut bmc_obj.status.conditions,
                    Condition::new(CONDITION_RESET, ConditionStatus::True, REASON_USER_RESET),
                );
            })?;
        } else {
            // Reached the BMC again after the reset: the operation is
            // complete.
            self.ctx.clear_annotation(&current, annotations::OPERATION)?;
            self.ctx.save_status::<Bmc, _>(key, |bmc_obj| {
                condition::set(
                    &mut bmc_obj.status.conditions,
                    Condition::new(CONDITION_RESET, ConditionStatus::False, REASON_RESET_COMPLETE),
                );
            })?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Reconciler for BmcController {
    fn kind(&self) -> &'static str {
        Bmc::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(bmc_obj) = self.ctx.store.try_get::<Bmc>(&key.namespace, &key.name)? else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&bmc_obj.metadata.annotations) {
            return Ok(ReconcileOutcome::done());
        }
        if bmc_obj.metadata.is_marked_for_deletion() {
            // Child servers are cascaded by their owner reference; nothing
            // else to unwind.
            self.ctx.remove_finalizer(&bmc_obj)?;
            return Ok(ReconcileOutcome::done());
        }
        let bmc_obj = self.ctx.ensure_finalizer(&bmc_obj)?;

        let session = match self.ctx.connect(&bmc_obj).await {
            Ok(session) => session,
            Err(error) => {
                let reason = if error.is_unauthorized() {
                    REASON_UNAUTHORIZED
                } else {
                    REASON_BMC_UNAVAILABLE
                };
                tracing::warn!(bmc = %key, %error, "cannot reach BMC");
                let message = error.to_string();
                self.ctx.save_status::<Bmc, _>(key, |current| {
                    condition::set(
                        &mut current.status.conditions,
                        Condition::new(CONDITION_READY, ConditionStatus::False, reason)
                            .with_message(message.clone()),
                    );
                })?;
                return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
            }
        };

        let result = self.observe(key, &bmc_obj, session.as_ref()).await;
        session.logout().await;
        result
    }
}

fn bmcs_where(
    store: &Store,
    namespace: &str,
    predicate: impl Fn(&Bmc) -> bool,
) -> Vec<ObjectKey> {
    store
        .list_stored(Bmc::KIND, namespace)
        .into_iter()
        .filter_map(|stored| stored.decode::<Bmc>())
        .filter(|bmc_obj| predicate(bmc_obj))
        .map(|bmc_obj| ObjectKey::of(&bmc_obj.metadata))
        .collect()
}

/// Label propagation onto child servers: additive only, so labels other
/// actors put on a server survive. Returns `None` when nothing to copy.
fn labels_patch(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> Option<serde_json::Map<String, Value>> {
    let mut patch = serde_json::Map::new();
    for (k, v) in desired {
        if current.get(k) != Some(v) {
            patch.insert(k.clone(), Value::String(v.clone()));
        }
    }
    if patch.is_empty() {
        return None;
    }
    Some(patch)
}

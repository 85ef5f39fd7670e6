/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! ServerBIOS controller: BIOS firmware and settings for one server.
//!
//! The outer machine drains a version mismatch first (same
//! grant/issue/poll/reboot/verify pattern as the version controllers),
//! then walks the settings update through its power-cycle substates:
//! issue → waitRebootPowerOff → waitRebootPowerOn → verification. Changing
//! settings while a version upgrade is in flight is not possible by
//! construction: the settings machine only starts once versions match.

use std::collections::BTreeMap;
use std::sync::Arc;

use model::annotations;
use model::bios::{
    CONDITION_MAINTENANCE_CREATED, CONDITION_MAINTENANCE_WAITING, CONDITION_UPGRADE_CHECKPOINT,
    CONDITION_UPGRADE_COMPLETED, CONDITION_UPGRADE_ISSUED, CONDITION_UPGRADE_REBOOT,
    CONDITION_UPGRADE_VERIFICATION, ServerBios, ServerBiosState, SettingUpdateState,
};
use model::bmc::Bmc;
use model::condition::{self, Condition, ConditionStatus};
use model::firmware::UpgradeTask;
use model::maintenance::ServerMaintenance;
use model::server::{Power, Server};
use model::{ObjectReference, Resource, is_downgrade};
use serde_json::json;
use store::Store;

use crate::controllers::context::Context;
use crate::controllers::upgrade::{
    TaskAssessment, assess_task, checkpoint_backoff, ensure_lease, grant_held, release_leases,
    task_fingerprint,
};
use crate::runtime::{ObjectKey, ReconcileError, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

const REASON_LEASE_CREATED: &str = "LeaseCreated";
const REASON_WAITING: &str = "WaitingForMaintenance";
const REASON_APPROVED: &str = "Approved";
const REASON_ISSUED: &str = "UpgradeIssued";
const REASON_VENDOR_REJECTED: &str = "VendorRejected";
const REASON_TASK_COMPLETED: &str = "TaskCompleted";
const REASON_TASK_FAILED: &str = "TaskFailed";
const REASON_VERIFIED: &str = "VersionVerified";
const REASON_DOWNGRADE: &str = "DowngradeRejected";
const REASON_POWER_OFF_REQUESTED: &str = "PowerOffRequested";
const REASON_POWER_ON_REQUESTED: &str = "PowerOnRequested";
const REASON_REBOOT_COMPLETE: &str = "RebootComplete";

pub struct ServerBiosController {
    ctx: Context,
}

impl ServerBiosController {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(ServerBiosController { ctx })
    }

    pub fn watches(store: &Store) -> Vec<Watch> {
        let on_server = store.clone();
        let on_lease = store.clone();
        vec![
            Watch::mapped(Server::KIND, move |obj| {
                let meta = obj.metadata();
                settings_where(&on_server, &meta.namespace, |s| {
                    s.spec.server_ref.name == meta.name
                })
            }),
            Watch::mapped(ServerMaintenance::KIND, move |obj| {
                let meta = obj.metadata();
                if let Some(owner) = meta.controller_owner()
                    && owner.kind == ServerBios::KIND
                {
                    return vec![ObjectKey::new(&meta.namespace, &owner.name)];
                }
                settings_where(&on_lease, &meta.namespace, |s| {
                    s.spec
                        .server_maintenance_ref
                        .as_ref()
                        .is_some_and(|r| r.name == meta.name)
                })
            }),
        ]
    }

    fn target(
        &self,
        key: &ObjectKey,
        settings: &ServerBios,
    ) -> Result<Option<(Server, Bmc, String)>, ReconcileError> {
        let Some(server) = self
            .ctx
            .store
            .try_get::<Server>(&key.namespace, &settings.spec.server_ref.name)?
        else {
            return Ok(None);
        };
        let Some(bmc_ref) = &server.spec.bmc_ref else {
            return Ok(None);
        };
        let Some(bmc_obj) = self.ctx.store.try_get::<Bmc>(&key.namespace, &bmc_ref.name)? else {
            return Ok(None);
        };
        let Some(uuid) = server.spec.system_uuid.clone() else {
            return Ok(None);
        };
        Ok(Some((server, bmc_obj, uuid)))
    }

    /// Exactly one ServerBIOS is a server's active `biosSettingsRef`; on
    /// contention the higher desired version wins and patches the
    /// reference over.
    fn claim_settings_ref(
        &self,
        settings: &ServerBios,
        server: &Server,
    ) -> Result<bool, ReconcileError> {
        match &server.spec.bios_settings_ref {
            Some(current) if current.name == settings.metadata.name => Ok(true),
            Some(current) => {
                let rival = self
                    .ctx
                    .store
                    .try_get::<ServerBios>(&server.metadata.namespace, &current.name)?;
                let wins = match rival {
                    None => true,
                    // Higher desired version takes the reference.
                    Some(rival) => is_downgrade(&settings.spec.bios.version, &rival.spec.bios.version),
                };
                if wins {
                    tracing::info!(
                        serverbios = settings.metadata.name,
                        server = server.metadata.name,
                        "taking over biosSettingsRef"
                    );
                    self.ctx.store.patch(
                        server,
                        json!({"spec": {"biosSettingsRef": ObjectReference::with_uid(
                            settings.metadata.name.clone(),
                            settings.metadata.uid,
                        )}}),
                    )?;
                }
                Ok(wins)
            }
            None => {
                self.ctx.store.patch(
                    server,
                    json!({"spec": {"biosSettingsRef": ObjectReference::with_uid(
                        settings.metadata.name.clone(),
                        settings.metadata.uid,
                    )}}),
                )?;
                Ok(true)
            }
        }
    }

    async fn read_bios_version(
        &self,
        bmc_obj: &Bmc,
        system_uuid: &str,
    ) -> Result<String, ReconcileError> {
        let session = self.ctx.connect(bmc_obj).await?;
        let result = self.ctx.with_timeout(session.bios_version(system_uuid)).await;
        session.logout().await;
        Ok(result?)
    }

    /// Desired minus observed, over the managed keys only.
    async fn settings_diff(
        &self,
        bmc_obj: &Bmc,
        system_uuid: &str,
        desired: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>, ReconcileError> {
        if desired.is_empty() {
            return Ok(BTreeMap::new());
        }
        let keys: Vec<String> = desired.keys().cloned().collect();
        let session = self.ctx.connect(bmc_obj).await?;
        let observed = self
            .ctx
            .with_timeout(session.bios_attribute_values(system_uuid, &keys))
            .await;
        session.logout().await;
        let observed = observed?;
        Ok(desired
            .iter()
            .filter(|(k, v)| observed.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    /// "": figure out which dimension is out of date.
    async fn decide(&self, key: &ObjectKey, settings: &ServerBios) -> ReconcileResult {
        let Some((server, bmc_obj, uuid)) = self.target(key, settings)? else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };
        if !self.claim_settings_ref(settings, &server)? {
            tracing::debug!(serverbios = %key, "another settings record holds this server");
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        }

        let current = self.read_bios_version(&bmc_obj, &uuid).await?;
        let desired = &settings.spec.bios.version;
        if is_downgrade(&current, desired) {
            tracing::warn!(serverbios = %key, current, desired, "refusing BIOS downgrade");
            let (current, desired) = (current.clone(), desired.clone());
            self.ctx.save_status::<ServerBios, _>(key, |s| {
                s.status.state = ServerBiosState::Failed;
                condition::set(
                    &mut s.status.conditions,
                    Condition::new(
                        CONDITION_UPGRADE_ISSUED,
                        ConditionStatus::False,
                        REASON_DOWNGRADE,
                    )
                    .with_message(format!("current {current} is newer than desired {desired}")),
                );
            })?;
            return Ok(ReconcileOutcome::done());
        }
        if current != *desired {
            // Version drains before settings.
            self.ctx.save_status::<ServerBios, _>(key, |s| {
                s.status.state = ServerBiosState::InVersionUpgrade;
                s.status.conditions.clear();
                s.status.upgrade_task = None;
            })?;
            return Ok(ReconcileOutcome::immediate());
        }

        let diff = self
            .settings_diff(&bmc_obj, &uuid, &settings.spec.bios.settings)
            .await?;
        if diff.is_empty() {
            return self.finish_synced(key);
        }
        tracing::info!(serverbios = %key, pending = diff.len(), "settings out of date");
        self.ctx.save_status::<ServerBios, _>(key, |s| {
            s.status.state = ServerBiosState::InSettingUpdate;
            s.status.update_setting_state = SettingUpdateState::Unspecified;
        })?;
        Ok(ReconcileOutcome::immediate())
    }

    /// Maintenance lease shared by the version and settings phases.
    fn maintenance_step(
        &self,
        key: &ObjectKey,
        settings: &ServerBios,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        let Some(lease_ref) = settings.spec.server_maintenance_ref.clone() else {
            let lease_ref = ensure_lease(
                &self.ctx.store,
                ServerBios::KIND,
                &settings.metadata,
                &settings.spec.server_ref.name,
                settings.spec.server_maintenance_policy,
            )?;
            self.ctx
                .store
                .patch(settings, json!({"spec": {"serverMaintenanceRef": lease_ref}}))?;
            self.ctx.save_status::<ServerBios, _>(key, |s| {
                condition::set(
                    &mut s.status.conditions,
                    Condition::new(
                        CONDITION_MAINTENANCE_CREATED,
                        ConditionStatus::True,
                        REASON_LEASE_CREATED,
                    ),
                );
                condition::set(
                    &mut s.status.conditions,
                    Condition::new(
                        CONDITION_MAINTENANCE_WAITING,
                        ConditionStatus::True,
                        REASON_WAITING,
                    ),
                );
            })?;
            return Ok(Some(ReconcileOutcome::immediate()));
        };

        if !grant_held(&self.ctx.store, &key.namespace, &[lease_ref])? {
            self.ctx.save_status::<ServerBios, _>(key, |s| {
                condition::set(
                    &mut s.status.conditions,
                    Condition::new(
                        CONDITION_MAINTENANCE_WAITING,
                        ConditionStatus::True,
                        REASON_WAITING,
                    ),
                );
            })?;
            return Ok(Some(ReconcileOutcome::requeue_after(
                self.ctx.opts.resync_interval,
            )));
        }
        self.ctx.save_status::<ServerBios, _>(key, |s| {
            condition::set(
                &mut s.status.conditions,
                Condition::new(
                    CONDITION_MAINTENANCE_WAITING,
                    ConditionStatus::False,
                    REASON_APPROVED,
                ),
            );
        })?;
        Ok(None)
    }

    async fn version_upgrade(&self, key: &ObjectKey, settings: &ServerBios) -> ReconcileResult {
        let Some((server, bmc_obj, uuid)) = self.target(key, settings)? else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };
        if let Some(outcome) = self.maintenance_step(key, settings)? {
            return Ok(outcome);
        }

        // Issue.
        if !condition::is_true(&settings.status.conditions, CONDITION_UPGRADE_ISSUED) {
            let request = bmc::UpgradeRequest {
                version: settings.spec.bios.version.clone(),
                image_uri: settings.spec.bios.image.uri.clone(),
                transfer_protocol: settings.spec.bios.image.transfer_protocol.clone(),
                image_credentials: match &settings.spec.bios.image.secret_ref {
                    Some(secret_ref) => Some(self.ctx.credentials(&key.namespace, secret_ref)?),
                    None => None,
                },
                force: false,
            };
            let session = self.ctx.connect(&bmc_obj).await?;
            let result = self
                .ctx
                .with_timeout(session.upgrade_bios_version(&uuid, &request))
                .await;
            session.logout().await;
            return match result {
                Ok(task_uri) => {
                    self.ctx.save_status::<ServerBios, _>(key, |s| {
                        s.status.upgrade_task = Some(UpgradeTask {
                            uri: task_uri.clone(),
                            ..Default::default()
                        });
                        condition::set(
                            &mut s.status.conditions,
                            Condition::new(CONDITION_UPGRADE_ISSUED, ConditionStatus::True, REASON_ISSUED),
                        );
                    })?;
                    Ok(ReconcileOutcome::immediate())
                }
                Err(e) if e.is_fatal() => {
                    let message = e.to_string();
                    self.ctx.save_status::<ServerBios, _>(key, |s| {
                        s.status.state = ServerBiosState::Failed;
                        condition::set(
                            &mut s.status.conditions,
                            Condition::new(
                                CONDITION_UPGRADE_ISSUED,
                                ConditionStatus::False,
                                REASON_VENDOR_REJECTED,
                            )
                            .with_message(message.clone()),
                        );
                    })?;
                    Ok(ReconcileOutcome::done())
                }
                Err(e) => Err(e.into()),
            };
        }

        // Poll.
        if !condition::is_true(&settings.status.conditions, CONDITION_UPGRADE_COMPLETED) {
            let Some(task) = settings.status.upgrade_task.clone() else {
                return Err(ReconcileError::Internal(eyre::eyre!(
                    "{key}: upgrade issued but no task recorded"
                )));
            };
            let session = self.ctx.connect(&bmc_obj).await?;
            let poll = self.ctx.with_timeout(session.upgrade_task(&task.uri)).await;
            session.logout().await;
            return match assess_task(poll)? {
                TaskAssessment::Completed(info) => {
                    self.ctx.save_status::<ServerBios, _>(key, |s| {
                        record_task(s, &info);
                        condition::set(
                            &mut s.status.conditions,
                            Condition::new(
                                CONDITION_UPGRADE_COMPLETED,
                                ConditionStatus::True,
                                REASON_TASK_COMPLETED,
                            ),
                        );
                    })?;
                    Ok(ReconcileOutcome::immediate())
                }
                TaskAssessment::Failed(info, message) => {
                    self.ctx.save_status::<ServerBios, _>(key, |s| {
                        record_task(s, &info);
                        s.status.state = ServerBiosState::Failed;
                        condition::set(
                            &mut s.status.conditions,
                            Condition::new(
                                CONDITION_UPGRADE_COMPLETED,
                                ConditionStatus::False,
                                REASON_TASK_FAILED,
                            )
                            .with_message(message.clone()),
                        );
                    })?;
                    Ok(ReconcileOutcome::done())
                }
                TaskAssessment::Vanished => {
                    // Verification below settles it either way.
                    self.ctx.save_status::<ServerBios, _>(key, |s| {
                        condition::set(
                            &mut s.status.conditions,
                            Condition::new(
                                CONDITION_UPGRADE_COMPLETED,
                                ConditionStatus::True,
                                REASON_TASK_COMPLETED,
                            )
                            .with_message("task gone, verifying by version".to_string()),
                        );
                    })?;
                    Ok(ReconcileOutcome::immediate())
                }
                TaskAssessment::InProgress(info) => {
                    let fingerprint = task_fingerprint(&info);
                    let updated = self.ctx.save_status::<ServerBios, _>(key, |s| {
                        record_task(s, &info);
                        condition::set(
                            &mut s.status.conditions,
                            Condition::new(
                                CONDITION_UPGRADE_CHECKPOINT,
                                ConditionStatus::False,
                                fingerprint.clone(),
                            ),
                        );
                    })?;
                    let conditions = updated.map(|s| s.status.conditions).unwrap_or_default();
                    Ok(ReconcileOutcome::requeue_after(checkpoint_backoff(
                        &conditions,
                        CONDITION_UPGRADE_CHECKPOINT,
                        self.ctx.opts.backoff_base,
                        self.ctx.opts.backoff_cap,
                    )))
                }
            };
        }

        // Reboot through the lease, then verify.
        if let Some(outcome) = self.reboot_step(key, settings, &server)? {
            return Ok(outcome);
        }
        let current = self.read_bios_version(&bmc_obj, &uuid).await?;
        if current != settings.spec.bios.version {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        }
        self.ctx.save_status::<ServerBios, _>(key, |s| {
            condition::set(
                &mut s.status.conditions,
                Condition::new(
                    CONDITION_UPGRADE_VERIFICATION,
                    ConditionStatus::True,
                    REASON_VERIFIED,
                ),
            );
            // Version settled; hand over to the settings dimension.
            s.status.state = ServerBiosState::Unspecified;
        })?;
        Ok(ReconcileOutcome::immediate())
    }

    fn reboot_step(
        &self,
        key: &ObjectKey,
        settings: &ServerBios,
        server: &Server,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        if condition::is_true(&settings.status.conditions, CONDITION_UPGRADE_REBOOT) {
            return Ok(None);
        }
        let Some(lease_ref) = settings.spec.server_maintenance_ref.clone() else {
            return Ok(None);
        };
        let Some(lease) = self
            .ctx
            .store
            .try_get::<ServerMaintenance>(&key.namespace, &lease_ref.name)?
        else {
            return Ok(Some(ReconcileOutcome::requeue_after(
                self.ctx.opts.resync_interval,
            )));
        };
        let reason = condition::get(&settings.status.conditions, CONDITION_UPGRADE_REBOOT)
            .map(|c| c.reason.clone());
        match reason.as_deref() {
            None => {
                self.ctx
                    .store
                    .patch(&lease, json!({"spec": {"serverPower": Power::Off}}))?;
                self.ctx.save_status::<ServerBios, _>(key, |s| {
                    condition::set(
                        &mut s.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_REBOOT,
                            ConditionStatus::False,
                            REASON_POWER_OFF_REQUESTED,
                        ),
                    );
                })?;
                Ok(Some(ReconcileOutcome::requeue_after(
                    self.ctx.opts.resync_interval,
                )))
            }
            Some(REASON_POWER_OFF_REQUESTED) => {
                if server.status.power_state != bmc::PowerState::Off {
                    return Ok(Some(ReconcileOutcome::requeue_after(
                        self.ctx.opts.resync_interval,
                    )));
                }
                self.ctx
                    .store
                    .patch(&lease, json!({"spec": {"serverPower": Power::On}}))?;
                self.ctx.save_status::<ServerBios, _>(key, |s| {
                    condition::set(
                        &mut s.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_REBOOT,
                            ConditionStatus::False,
                            REASON_POWER_ON_REQUESTED,
                        ),
                    );
                })?;
                Ok(Some(ReconcileOutcome::requeue_after(
                    self.ctx.opts.resync_interval,
                )))
            }
            Some(REASON_POWER_ON_REQUESTED) => {
                if server.status.power_state != bmc::PowerState::On {
                    return Ok(Some(ReconcileOutcome::requeue_after(
                        self.ctx.opts.resync_interval,
                    )));
                }
                self.ctx.save_status::<ServerBios, _>(key, |s| {
                    condition::set(
                        &mut s.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_REBOOT,
                            ConditionStatus::True,
                            REASON_REBOOT_COMPLETE,
                        ),
                    );
                })?;
                Ok(Some(ReconcileOutcome::immediate()))
            }
            Some(_) => Ok(Some(ReconcileOutcome::requeue_after(
                self.ctx.opts.resync_interval,
            ))),
        }
    }

    /// The inner settings machine.
    async fn setting_update(&self, key: &ObjectKey, settings: &ServerBios) -> ReconcileResult {
        let Some((server, bmc_obj, uuid)) = self.target(key, settings)? else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };

        match settings.status.update_setting_state {
            SettingUpdateState::Unspecified => {
                // Hold the server and make sure it is powered on before
                // touching attributes.
                if let Some(outcome) = self.maintenance_step(key, settings)? {
                    return Ok(outcome);
                }
                if let Some(lease_ref) = &settings.spec.server_maintenance_ref {
                    if let Some(lease) = self
                        .ctx
                        .store
                        .try_get::<ServerMaintenance>(&key.namespace, &lease_ref.name)?
                        && lease.spec.server_power != Some(Power::On)
                    {
                        self.ctx
                            .store
                            .patch(&lease, json!({"spec": {"serverPower": Power::On}}))?;
                    }
                    if server.status.power_state != bmc::PowerState::On {
                        return Ok(ReconcileOutcome::requeue_after(
                            self.ctx.opts.resync_interval,
                        ));
                    }
                }
                self.ctx.save_status::<ServerBios, _>(key, |s| {
                    s.status.update_setting_state = SettingUpdateState::Issue;
                })?;
                Ok(ReconcileOutcome::immediate())
            }

            SettingUpdateState::Issue => {
                let diff = self
                    .settings_diff(&bmc_obj, &uuid, &settings.spec.bios.settings)
                    .await?;
                if diff.is_empty() {
                    return self.finish_synced(key);
                }
                let session = self.ctx.connect(&bmc_obj).await?;
                let needs_reset = self.ctx.with_timeout(session.check_bios_attributes(&diff)).await;
                let applied = match &needs_reset {
                    Ok(_) => {
                        self.ctx
                            .with_timeout(session.set_bios_attributes_on_reset(&uuid, &diff))
                            .await
                    }
                    Err(_) => Ok(()),
                };
                session.logout().await;
                let needs_reset = needs_reset?;
                applied?;

                tracing::info!(serverbios = %key, pending = diff.len(), needs_reset, "settings issued");
                let next = if needs_reset {
                    SettingUpdateState::WaitRebootPowerOff
                } else {
                    SettingUpdateState::Verification
                };
                self.ctx.save_status::<ServerBios, _>(key, |s| {
                    s.status.update_setting_state = next;
                })?;
                Ok(ReconcileOutcome::immediate())
            }

            SettingUpdateState::WaitRebootPowerOff => {
                if let Some(lease_ref) = &settings.spec.server_maintenance_ref
                    && let Some(lease) = self
                        .ctx
                        .store
                        .try_get::<ServerMaintenance>(&key.namespace, &lease_ref.name)?
                    && lease.spec.server_power != Some(Power::Off)
                {
                    self.ctx
                        .store
                        .patch(&lease, json!({"spec": {"serverPower": Power::Off}}))?;
                }
                if server.status.power_state != bmc::PowerState::Off {
                    return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
                }
                self.ctx.save_status::<ServerBios, _>(key, |s| {
                    s.status.update_setting_state = SettingUpdateState::WaitRebootPowerOn;
                })?;
                Ok(ReconcileOutcome::immediate())
            }

            SettingUpdateState::WaitRebootPowerOn => {
                if let Some(lease_ref) = &settings.spec.server_maintenance_ref
                    && let Some(lease) = self
                        .ctx
                        .store
                        .try_get::<ServerMaintenance>(&key.namespace, &lease_ref.name)?
                    && lease.spec.server_power != Some(Power::On)
                {
                    self.ctx
                        .store
                        .patch(&lease, json!({"spec": {"serverPower": Power::On}}))?;
                }
                if server.status.power_state != bmc::PowerState::On {
                    return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
                }
                self.ctx.save_status::<ServerBios, _>(key, |s| {
                    s.status.update_setting_state = SettingUpdateState::Verification;
                })?;
                Ok(ReconcileOutcome::immediate())
            }

            SettingUpdateState::Verification => {
                let diff = self
                    .settings_diff(&bmc_obj, &uuid, &settings.spec.bios.settings)
                    .await?;
                if diff.is_empty() {
                    return self.finish_synced(key);
                }
                tracing::debug!(serverbios = %key, pending = diff.len(), "waiting for settings to take effect");
                Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval))
            }
        }
    }

    fn finish_synced(&self, key: &ObjectKey) -> ReconcileResult {
        self.release(key)?;
        self.ctx.save_status::<ServerBios, _>(key, |s| {
            s.status.state = ServerBiosState::Synced;
            s.status.update_setting_state = SettingUpdateState::Unspecified;
        })?;
        tracing::info!(serverbios = %key, "settings in sync");
        Ok(ReconcileOutcome::done())
    }

    fn release(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let Some(settings) = self
            .ctx
            .store
            .try_get::<ServerBios>(&key.namespace, &key.name)?
        else {
            return Ok(());
        };
        let Some(lease_ref) = settings.spec.server_maintenance_ref.clone() else {
            return Ok(());
        };
        release_leases(&self.ctx.store, &settings, &[lease_ref])?;
        self.ctx
            .store
            .patch(&settings, json!({"spec": {"serverMaintenanceRef": null}}))?;
        Ok(())
    }

    /// Synced records watch for spec drift; any mismatch re-enters the
    /// decision state.
    async fn check_drift(&self, key: &ObjectKey, settings: &ServerBios) -> ReconcileResult {
        let Some((_, bmc_obj, uuid)) = self.target(key, settings)? else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };
        let current = self.read_bios_version(&bmc_obj, &uuid).await?;
        let diff = self
            .settings_diff(&bmc_obj, &uuid, &settings.spec.bios.settings)
            .await?;
        if current == settings.spec.bios.version && diff.is_empty() {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        }
        self.ctx.save_status::<ServerBios, _>(key, |s| {
            s.status.state = ServerBiosState::Unspecified;
        })?;
        Ok(ReconcileOutcome::immediate())
    }

    fn finalize(&self, key: &ObjectKey, settings: &ServerBios) -> Result<(), ReconcileError> {
        self.release(key)?;
        // Drop the server's reference if it points at us.
        if let Some(server) = self
            .ctx
            .store
            .try_get::<Server>(&key.namespace, &settings.spec.server_ref.name)?
            && server
                .spec
                .bios_settings_ref
                .as_ref()
                .is_some_and(|r| r.name == settings.metadata.name)
        {
            self.ctx
                .store
                .patch(&server, json!({"spec": {"biosSettingsRef": null}}))?;
        }
        if let Some(settings) = self
            .ctx
            .store
            .try_get::<ServerBios>(&key.namespace, &key.name)?
        {
            self.ctx.remove_finalizer(&settings)?;
        }
        Ok(())
    }
}

fn record_task(settings: &mut ServerBios, info: &bmc::TaskInfo) {
    settings.status.upgrade_task = Some(UpgradeTask {
        uri: info.uri.clone(),
        state: info.state,
        status: info.status,
        percent_complete: info.percent_complete,
    });
}

fn settings_where(
    store: &Store,
    namespace: &str,
    predicate: impl Fn(&ServerBios) -> bool,
) -> Vec<ObjectKey> {
    store
        .list_stored(ServerBios::KIND, namespace)
        .into_iter()
        .filter_map(|stored| stored.decode::<ServerBios>())
        .filter(|settings| predicate(settings))
        .map(|settings| ObjectKey::of(&settings.metadata))
        .collect()
}

#[async_trait::async_trait]
impl Reconciler for ServerBiosController {
    fn kind(&self) -> &'static str {
        ServerBios::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(settings) = self
            .ctx
            .store
            .try_get::<ServerBios>(&key.namespace, &key.name)?
        else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&settings.metadata.annotations) {
            return Ok(ReconcileOutcome::done());
        }

        if settings.metadata.is_marked_for_deletion() {
            // A firmware task in flight finishes first; a settings change
            // can be abandoned.
            if settings.status.state != ServerBiosState::InVersionUpgrade {
                self.finalize(key, &settings)?;
                return Ok(ReconcileOutcome::done());
            }
        } else {
            self.ctx.ensure_finalizer(&settings)?;
        }
        let settings = self
            .ctx
            .store
            .try_get::<ServerBios>(&key.namespace, &key.name)?
            .unwrap_or(settings);

        match settings.status.state {
            ServerBiosState::Unspecified => self.decide(key, &settings).await,
            ServerBiosState::InVersionUpgrade => self.version_upgrade(key, &settings).await,
            ServerBiosState::InSettingUpdate => self.setting_update(key, &settings).await,
            ServerBiosState::Synced => self.check_drift(key, &settings).await,
            ServerBiosState::Failed => {
                if settings.metadata.annotation(annotations::OPERATION)
                    == Some(annotations::OPERATION_RETRY_FAILED)
                {
                    self.ctx.clear_annotation(&settings, annotations::OPERATION)?;
                    self.ctx.save_status::<ServerBios, _>(key, |s| {
                        s.status.state = ServerBiosState::Unspecified;
                        s.status.update_setting_state = SettingUpdateState::Unspecified;
                        s.status.conditions.clear();
                        s.status.upgrade_task = None;
                    })?;
                    return Ok(ReconcileOutcome::immediate());
                }
                Ok(ReconcileOutcome::done())
            }
        }
    }
}

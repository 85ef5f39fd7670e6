/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BIOSVersion controller: drives one server's BIOS firmware to the
//! desired version.
//!
//! Same grant → issue → poll → reboot → verify machine as BMCVersion, with
//! two differences: the maintenance lease protects exactly one server, and
//! the activating reboot is a power cycle of the system driven through the
//! lease instead of a manager reset.

use std::sync::Arc;

use model::annotations;
use model::bios::{
    BiosVersion, CONDITION_MAINTENANCE_CREATED, CONDITION_MAINTENANCE_WAITING,
    CONDITION_UPGRADE_CHECKPOINT, CONDITION_UPGRADE_COMPLETED, CONDITION_UPGRADE_ISSUED,
    CONDITION_UPGRADE_REBOOT, CONDITION_UPGRADE_VERIFICATION,
};
use model::bmc::Bmc;
use model::condition::{self, Condition, ConditionStatus};
use model::firmware::{FirmwareUpdateState, UpdatePolicy, UpgradeTask};
use model::maintenance::ServerMaintenance;
use model::server::{Power, Server};
use model::{Resource, is_downgrade};
use serde_json::json;
use store::Store;

use crate::controllers::context::Context;
use crate::controllers::upgrade::{
    TaskAssessment, assess_task, checkpoint_backoff, ensure_lease, grant_held, release_leases,
    task_fingerprint,
};
use crate::runtime::{ObjectKey, ReconcileError, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

const REASON_LEASES_CREATED: &str = "LeaseCreated";
const REASON_WAITING: &str = "WaitingForMaintenance";
const REASON_APPROVED: &str = "Approved";
const REASON_ISSUED: &str = "UpgradeIssued";
const REASON_VENDOR_REJECTED: &str = "VendorRejected";
const REASON_TASK_COMPLETED: &str = "TaskCompleted";
const REASON_TASK_FAILED: &str = "TaskFailed";
const REASON_TASK_VANISHED: &str = "TaskVanished";
const REASON_VERIFIED: &str = "VersionVerified";
const REASON_DOWNGRADE: &str = "DowngradeRejected";
const REASON_POWER_OFF_REQUESTED: &str = "PowerOffRequested";
const REASON_POWER_ON_REQUESTED: &str = "PowerOnRequested";
const REASON_REBOOT_COMPLETE: &str = "RebootComplete";

pub struct BiosVersionController {
    ctx: Context,
}

impl BiosVersionController {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(BiosVersionController { ctx })
    }

    pub fn watches(store: &Store) -> Vec<Watch> {
        let on_server = store.clone();
        let on_lease = store.clone();
        vec![
            Watch::mapped(Server::KIND, move |obj| {
                let meta = obj.metadata();
                versions_where(&on_server, &meta.namespace, |v| {
                    v.spec.server_ref.name == meta.name
                })
            }),
            Watch::mapped(ServerMaintenance::KIND, move |obj| {
                let meta = obj.metadata();
                if let Some(owner) = meta.controller_owner()
                    && owner.kind == BiosVersion::KIND
                {
                    return vec![ObjectKey::new(&meta.namespace, &owner.name)];
                }
                versions_where(&on_lease, &meta.namespace, |v| {
                    v.spec
                        .server_maintenance_ref
                        .as_ref()
                        .is_some_and(|r| r.name == meta.name)
                })
            }),
        ]
    }

    /// The server under upgrade, its BMC and its system UUID. `None`
    /// while prerequisites are missing.
    fn target(
        &self,
        key: &ObjectKey,
        version: &BiosVersion,
    ) -> Result<Option<(Server, Bmc, String)>, ReconcileError> {
        let Some(server) = self
            .ctx
            .store
            .try_get::<Server>(&key.namespace, &version.spec.server_ref.name)?
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

    async fn read_current_version(
        &self,
        bmc_obj: &Bmc,
        system_uuid: &str,
    ) -> Result<String, ReconcileError> {
        let session = self.ctx.connect(bmc_obj).await?;
        let result = self.ctx.with_timeout(session.bios_version(system_uuid)).await;
        session.logout().await;
        Ok(result?)
    }

    async fn begin(&self, key: &ObjectKey, version: &BiosVersion) -> ReconcileResult {
        let Some((_, bmc_obj, uuid)) = self.target(key, version)? else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };
        let current = self.read_current_version(&bmc_obj, &uuid).await?;
        if current == version.spec.version {
            self.ctx.save_status::<BiosVersion, _>(key, |v| {
                v.status.state = FirmwareUpdateState::Completed;
            })?;
            return Ok(ReconcileOutcome::done());
        }
        if is_downgrade(&current, &version.spec.version) {
            tracing::warn!(biosversion = %key, current, desired = version.spec.version, "refusing downgrade");
            let desired = version.spec.version.clone();
            self.ctx.save_status::<BiosVersion, _>(key, |v| {
                v.status.state = FirmwareUpdateState::Failed;
                condition::set(
                    &mut v.status.conditions,
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
        self.ctx.save_status::<BiosVersion, _>(key, |v| {
            v.status.state = FirmwareUpdateState::InProgress;
            v.status.conditions.clear();
            v.status.upgrade_task = None;
        })?;
        Ok(ReconcileOutcome::immediate())
    }

    async fn advance(&self, key: &ObjectKey, version: &BiosVersion) -> ReconcileResult {
        let Some((server, bmc_obj, uuid)) = self.target(key, version)? else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };

        if let Some(outcome) = self.maintenance_step(key, version)? {
            return Ok(outcome);
        }
        if let Some(outcome) = self.issue_step(key, version, &bmc_obj, &uuid).await? {
            return Ok(outcome);
        }
        if let Some(outcome) = self.poll_step(key, version, &bmc_obj, &uuid).await? {
            return Ok(outcome);
        }
        if let Some(outcome) = self.reboot_step(key, version, &server)? {
            return Ok(outcome);
        }
        self.verify_step(key, version, &bmc_obj, &uuid).await
    }

    fn maintenance_step(
        &self,
        key: &ObjectKey,
        version: &BiosVersion,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        let Some(lease_ref) = version.spec.server_maintenance_ref.clone() else {
            let lease_ref = ensure_lease(
                &self.ctx.store,
                BiosVersion::KIND,
                &version.metadata,
                &version.spec.server_ref.name,
                version.spec.server_maintenance_policy,
            )?;
            tracing::info!(biosversion = %key, lease = lease_ref.name, "created maintenance lease");
            self.ctx
                .store
                .patch(version, json!({"spec": {"serverMaintenanceRef": lease_ref}}))?;
            self.ctx.save_status::<BiosVersion, _>(key, |v| {
                condition::set(
                    &mut v.status.conditions,
                    Condition::new(
                        CONDITION_MAINTENANCE_CREATED,
                        ConditionStatus::True,
                        REASON_LEASES_CREATED,
                    ),
                );
                condition::set(
                    &mut v.status.conditions,
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
            self.ctx.save_status::<BiosVersion, _>(key, |v| {
                condition::set(
                    &mut v.status.conditions,
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
        self.ctx.save_status::<BiosVersion, _>(key, |v| {
            condition::set(
                &mut v.status.conditions,
                Condition::new(
                    CONDITION_MAINTENANCE_WAITING,
                    ConditionStatus::False,
                    REASON_APPROVED,
                ),
            );
        })?;
        Ok(None)
    }

    async fn issue_step(
        &self,
        key: &ObjectKey,
        version: &BiosVersion,
        bmc_obj: &Bmc,
        system_uuid: &str,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        if condition::is_true(&version.status.conditions, CONDITION_UPGRADE_ISSUED) {
            return Ok(None);
        }
        let image_credentials = match &version.spec.image.secret_ref {
            Some(secret_ref) => Some(self.ctx.credentials(&key.namespace, secret_ref)?),
            None => None,
        };
        let request = bmc::UpgradeRequest {
            version: version.spec.version.clone(),
            image_uri: version.spec.image.uri.clone(),
            transfer_protocol: version.spec.image.transfer_protocol.clone(),
            image_credentials,
            force: version.spec.update_policy == UpdatePolicy::Force,
        };

        let session = self.ctx.connect(bmc_obj).await?;
        let result = self
            .ctx
            .with_timeout(session.upgrade_bios_version(system_uuid, &request))
            .await;
        session.logout().await;

        match result {
            Ok(task_uri) => {
                tracing::info!(biosversion = %key, task = task_uri, "BIOS upgrade issued");
                self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    v.status.upgrade_task = Some(UpgradeTask {
                        uri: task_uri.clone(),
                        ..Default::default()
                    });
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(CONDITION_UPGRADE_ISSUED, ConditionStatus::True, REASON_ISSUED),
                    );
                })?;
                Ok(Some(ReconcileOutcome::immediate()))
            }
            Err(e) if e.is_fatal() => {
                tracing::warn!(biosversion = %key, error = %e, "vendor rejected BIOS upgrade");
                let message = e.to_string();
                self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    v.status.state = FirmwareUpdateState::Failed;
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_ISSUED,
                            ConditionStatus::False,
                            REASON_VENDOR_REJECTED,
                        )
                        .with_message(message.clone()),
                    );
                })?;
                Ok(Some(ReconcileOutcome::done()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn poll_step(
        &self,
        key: &ObjectKey,
        version: &BiosVersion,
        bmc_obj: &Bmc,
        system_uuid: &str,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        if condition::is_true(&version.status.conditions, CONDITION_UPGRADE_COMPLETED) {
            return Ok(None);
        }
        let Some(task) = version.status.upgrade_task.clone() else {
            return Err(ReconcileError::Internal(eyre::eyre!(
                "{key}: BIOS upgrade issued but no task recorded"
            )));
        };

        let session = self.ctx.connect(bmc_obj).await?;
        let poll = self.ctx.with_timeout(session.upgrade_task(&task.uri)).await;
        let assessment = match assess_task(poll) {
            Ok(TaskAssessment::Vanished) => {
                let current = self
                    .ctx
                    .with_timeout(session.bios_version(system_uuid))
                    .await;
                session.logout().await;
                let current = current?;
                if current == version.spec.version {
                    self.ctx.save_status::<BiosVersion, _>(key, |v| {
                        condition::set(
                            &mut v.status.conditions,
                            Condition::new(
                                CONDITION_UPGRADE_COMPLETED,
                                ConditionStatus::True,
                                REASON_TASK_COMPLETED,
                            )
                            .with_message("task gone, version verified".to_string()),
                        );
                    })?;
                    return Ok(Some(ReconcileOutcome::immediate()));
                }
                let uri = task.uri.clone();
                self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    v.status.state = FirmwareUpdateState::Failed;
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_COMPLETED,
                            ConditionStatus::False,
                            REASON_TASK_VANISHED,
                        )
                        .with_message(format!("task {uri} vanished before the upgrade applied")),
                    );
                })?;
                return Ok(Some(ReconcileOutcome::done()));
            }
            other => {
                session.logout().await;
                other?
            }
        };

        match assessment {
            TaskAssessment::Completed(info) => {
                self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    record_task(v, &info);
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_COMPLETED,
                            ConditionStatus::True,
                            REASON_TASK_COMPLETED,
                        ),
                    );
                })?;
                Ok(Some(ReconcileOutcome::immediate()))
            }
            TaskAssessment::Failed(info, message) => {
                tracing::warn!(biosversion = %key, message, "BIOS upgrade task failed");
                self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    record_task(v, &info);
                    v.status.state = FirmwareUpdateState::Failed;
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_COMPLETED,
                            ConditionStatus::False,
                            REASON_TASK_FAILED,
                        )
                        .with_message(message.clone()),
                    );
                })?;
                Ok(Some(ReconcileOutcome::done()))
            }
            TaskAssessment::InProgress(info) => {
                let fingerprint = task_fingerprint(&info);
                let updated = self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    record_task(v, &info);
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_CHECKPOINT,
                            ConditionStatus::False,
                            fingerprint.clone(),
                        )
                        .with_message(format!("task {} at {}%", info.state, info.percent_complete)),
                    );
                })?;
                let conditions = updated.map(|v| v.status.conditions).unwrap_or_default();
                let delay = checkpoint_backoff(
                    &conditions,
                    CONDITION_UPGRADE_CHECKPOINT,
                    self.ctx.opts.backoff_base,
                    self.ctx.opts.backoff_cap,
                );
                Ok(Some(ReconcileOutcome::requeue_after(delay)))
            }
            TaskAssessment::Vanished => unreachable!("handled above"),
        }
    }

    /// Activating power cycle, driven through the lease. The server
    /// controller does the actual power calls; this journal only requests
    /// and observes.
    fn reboot_step(
        &self,
        key: &ObjectKey,
        version: &BiosVersion,
        server: &Server,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        if condition::is_true(&version.status.conditions, CONDITION_UPGRADE_REBOOT) {
            return Ok(None);
        }
        let Some(lease_ref) = version.spec.server_maintenance_ref.clone() else {
            // No lease means no reboot partner; verification decides.
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

        let reason = condition::get(&version.status.conditions, CONDITION_UPGRADE_REBOOT)
            .map(|c| c.reason.clone());
        match reason.as_deref() {
            None => {
                self.ctx
                    .store
                    .patch(&lease, json!({"spec": {"serverPower": Power::Off}}))?;
                self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    condition::set(
                        &mut v.status.conditions,
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
                self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    condition::set(
                        &mut v.status.conditions,
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
                self.ctx.save_status::<BiosVersion, _>(key, |v| {
                    condition::set(
                        &mut v.status.conditions,
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

    async fn verify_step(
        &self,
        key: &ObjectKey,
        version: &BiosVersion,
        bmc_obj: &Bmc,
        system_uuid: &str,
    ) -> ReconcileResult {
        let current = self.read_current_version(bmc_obj, system_uuid).await?;
        if current != version.spec.version {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        }
        self.ctx.save_status::<BiosVersion, _>(key, |v| {
            condition::set(
                &mut v.status.conditions,
                Condition::new(
                    CONDITION_UPGRADE_VERIFICATION,
                    ConditionStatus::True,
                    REASON_VERIFIED,
                ),
            );
            v.status.state = FirmwareUpdateState::Completed;
        })?;
        tracing::info!(biosversion = %key, version = version.spec.version, "BIOS upgrade completed");
        self.release(key)?;
        Ok(ReconcileOutcome::done())
    }

    fn release(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let Some(version) = self
            .ctx
            .store
            .try_get::<BiosVersion>(&key.namespace, &key.name)?
        else {
            return Ok(());
        };
        let Some(lease_ref) = version.spec.server_maintenance_ref.clone() else {
            return Ok(());
        };
        release_leases(&self.ctx.store, &version, &[lease_ref])?;
        self.ctx
            .store
            .patch(&version, json!({"spec": {"serverMaintenanceRef": null}}))?;
        Ok(())
    }

    fn maybe_retry(&self, key: &ObjectKey, version: &BiosVersion) -> ReconcileResult {
        if version.metadata.annotation(annotations::OPERATION)
            != Some(annotations::OPERATION_RETRY_FAILED)
        {
            return Ok(ReconcileOutcome::done());
        }
        tracing::info!(biosversion = %key, "retrying failed BIOS upgrade");
        self.ctx.clear_annotation(version, annotations::OPERATION)?;
        self.ctx.save_status::<BiosVersion, _>(key, |v| {
            v.status.state = FirmwareUpdateState::Pending;
            v.status.conditions.clear();
            v.status.upgrade_task = None;
        })?;
        Ok(ReconcileOutcome::immediate())
    }
}

fn record_task(version: &mut BiosVersion, info: &bmc::TaskInfo) {
    version.status.upgrade_task = Some(UpgradeTask {
        uri: info.uri.clone(),
        state: info.state,
        status: info.status,
        percent_complete: info.percent_complete,
    });
}

fn versions_where(
    store: &Store,
    namespace: &str,
    predicate: impl Fn(&BiosVersion) -> bool,
) -> Vec<ObjectKey> {
    store
        .list_stored(BiosVersion::KIND, namespace)
        .into_iter()
        .filter_map(|stored| stored.decode::<BiosVersion>())
        .filter(|version| predicate(version))
        .map(|version| ObjectKey::of(&version.metadata))
        .collect()
}

#[async_trait::async_trait]
impl Reconciler for BiosVersionController {
    fn kind(&self) -> &'static str {
        BiosVersion::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(version) = self
            .ctx
            .store
            .try_get::<BiosVersion>(&key.namespace, &key.name)?
        else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&version.metadata.annotations) {
            return Ok(ReconcileOutcome::done());
        }

        if version.metadata.is_marked_for_deletion() {
            if version.status.state != FirmwareUpdateState::InProgress {
                self.release(key)?;
                if let Some(version) = self
                    .ctx
                    .store
                    .try_get::<BiosVersion>(&key.namespace, &key.name)?
                {
                    self.ctx.remove_finalizer(&version)?;
                }
                return Ok(ReconcileOutcome::done());
            }
        } else {
            self.ctx.ensure_finalizer(&version)?;
        }
        let version = self
            .ctx
            .store
            .try_get::<BiosVersion>(&key.namespace, &key.name)?
            .unwrap_or(version);

        match version.status.state {
            FirmwareUpdateState::Unspecified | FirmwareUpdateState::Pending => {
                self.begin(key, &version).await
            }
            FirmwareUpdateState::InProgress => self.advance(key, &version).await,
            FirmwareUpdateState::Completed => {
                self.release(key)?;
                Ok(ReconcileOutcome::done())
            }
            FirmwareUpdateState::Failed => self.maybe_retry(key, &version),
        }
    }
}

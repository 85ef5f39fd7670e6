/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BMCVersion controller: drives one BMC's firmware to the desired
//! version.
//!
//! The machine runs pending → inProgress → completed/failed, journaled
//! entirely in status conditions: maintenance leases for every server
//! behind the BMC, a manager reset, the vendor upgrade task, a second
//! reset to activate the image, and a final version verification. A
//! reconcile that finds the record mid-flight picks up from the conditions
//! alone.

use std::sync::Arc;

use model::annotations;
use model::bmc::Bmc;
use model::bmc_version::{
    BmcVersion, CONDITION_BMC_RESET, CONDITION_MAINTENANCE_CREATED, CONDITION_MAINTENANCE_WAITING,
    CONDITION_UPGRADE_CHECKPOINT, CONDITION_UPGRADE_COMPLETED, CONDITION_UPGRADE_ISSUED,
    CONDITION_UPGRADE_REBOOT, CONDITION_UPGRADE_VERIFICATION,
};
use model::condition::{self, Condition, ConditionStatus};
use model::firmware::{FirmwareUpdateState, UpdatePolicy, UpgradeTask};
use model::maintenance::ServerMaintenance;
use model::server::Server;
use model::{Resource, is_downgrade};
use serde_json::json;
use store::Store;

use crate::controllers::context::Context;
use crate::controllers::upgrade::{
    TaskAssessment, assess_task, checkpoint_backoff, ensure_lease, grant_held, release_leases,
    task_fingerprint,
};
use crate::runtime::{ObjectKey, ReconcileError, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

const REASON_LEASES_CREATED: &str = "LeasesCreated";
const REASON_WAITING: &str = "WaitingForMaintenance";
const REASON_APPROVED: &str = "Approved";
const REASON_RESET_REQUESTED: &str = "ResetRequested";
const REASON_RESET_COMPLETE: &str = "ResetComplete";
const REASON_ISSUED: &str = "UpgradeIssued";
const REASON_VENDOR_REJECTED: &str = "VendorRejected";
const REASON_TASK_COMPLETED: &str = "TaskCompleted";
const REASON_TASK_FAILED: &str = "TaskFailed";
const REASON_TASK_VANISHED: &str = "TaskVanished";
const REASON_VERIFIED: &str = "VersionVerified";
const REASON_DOWNGRADE: &str = "DowngradeRejected";

pub struct BmcVersionController {
    ctx: Context,
}

impl BmcVersionController {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(BmcVersionController { ctx })
    }

    pub fn watches(store: &Store) -> Vec<Watch> {
        let on_bmc = store.clone();
        let on_server = store.clone();
        let on_lease = store.clone();
        vec![
            Watch::mapped(Bmc::KIND, move |obj| {
                let meta = obj.metadata();
                versions_where(&on_bmc, &meta.namespace, |v| v.spec.bmc_ref.name == meta.name)
            }),
            // Server state changes feed the maintenance-grant check.
            Watch::mapped(Server::KIND, move |obj| {
                let Some(server) = obj.decode::<Server>() else {
                    return Vec::new();
                };
                let Some(bmc_ref) = server.spec.bmc_ref else {
                    return Vec::new();
                };
                versions_where(&on_server, &server.metadata.namespace, |v| {
                    v.spec.bmc_ref.name == bmc_ref.name
                })
            }),
            Watch::mapped(ServerMaintenance::KIND, move |obj| {
                let meta = obj.metadata();
                if let Some(owner) = meta.controller_owner()
                    && owner.kind == BmcVersion::KIND
                {
                    return vec![ObjectKey::new(&meta.namespace, &owner.name)];
                }
                versions_where(&on_lease, &meta.namespace, |v| {
                    v.spec
                        .server_maintenance_refs
                        .iter()
                        .any(|r| r.name == meta.name)
                })
            }),
        ]
    }

    async fn read_current_version(&self, bmc_obj: &Bmc) -> Result<String, ReconcileError> {
        let session = self.ctx.connect(bmc_obj).await?;
        let version = self.ctx.with_timeout(session.bmc_version()).await;
        session.logout().await;
        Ok(version?)
    }

    /// pending: decide whether there is anything to do.
    async fn begin(&self, key: &ObjectKey, version: &BmcVersion) -> ReconcileResult {
        // One non-terminal record per BMC; later arrivals wait their turn.
        let conflicting = self
            .ctx
            .store
            .list::<BmcVersion>(&key.namespace, None)?
            .into_iter()
            .any(|other| {
                other.metadata.name != version.metadata.name
                    && other.spec.bmc_ref.name == version.spec.bmc_ref.name
                    && !other.status.state.is_terminal()
                    && other.metadata.creation_timestamp < version.metadata.creation_timestamp
            });
        if conflicting {
            tracing::info!(bmcversion = %key, "another upgrade holds this BMC, waiting");
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        }

        let Some(bmc_obj) = self
            .ctx
            .store
            .try_get::<Bmc>(&key.namespace, &version.spec.bmc_ref.name)?
        else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };
        let current = self.read_current_version(&bmc_obj).await?;

        if current == version.spec.version {
            self.ctx.save_status::<BmcVersion, _>(key, |v| {
                v.status.state = FirmwareUpdateState::Completed;
            })?;
            return Ok(ReconcileOutcome::done());
        }
        if is_downgrade(&current, &version.spec.version) {
            tracing::warn!(bmcversion = %key, current, desired = version.spec.version, "refusing downgrade");
            let desired = version.spec.version.clone();
            self.ctx.save_status::<BmcVersion, _>(key, |v| {
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

        self.ctx.save_status::<BmcVersion, _>(key, |v| {
            v.status.state = FirmwareUpdateState::InProgress;
            v.status.conditions.clear();
            v.status.upgrade_task = None;
        })?;
        Ok(ReconcileOutcome::immediate())
    }

    /// inProgress: one step per reconcile, short-circuiting at the first
    /// stage that still has work.
    async fn advance(&self, key: &ObjectKey, version: &BmcVersion) -> ReconcileResult {
        let Some(bmc_obj) = self
            .ctx
            .store
            .try_get::<Bmc>(&key.namespace, &version.spec.bmc_ref.name)?
        else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };

        if let Some(outcome) = self.maintenance_step(key, version)? {
            return Ok(outcome);
        }
        if let Some(outcome) = self.reset_step(key, version, &bmc_obj, CONDITION_BMC_RESET)? {
            return Ok(outcome);
        }
        if let Some(outcome) = self.issue_step(key, version, &bmc_obj).await? {
            return Ok(outcome);
        }
        if let Some(outcome) = self.poll_step(key, version, &bmc_obj).await? {
            return Ok(outcome);
        }
        if let Some(outcome) = self.reset_step(key, version, &bmc_obj, CONDITION_UPGRADE_REBOOT)? {
            return Ok(outcome);
        }
        self.verify_step(key, version, &bmc_obj).await
    }

    /// Create (or adopt user-provided) leases, then wait for the grant.
    fn maintenance_step(
        &self,
        key: &ObjectKey,
        version: &BmcVersion,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        if version.spec.server_maintenance_refs.is_empty()
            && !condition::is_true(&version.status.conditions, CONDITION_MAINTENANCE_CREATED)
        {
            let servers: Vec<Server> = self
                .ctx
                .store
                .list::<Server>(&key.namespace, None)?
                .into_iter()
                .filter(|server| {
                    server
                        .spec
                        .bmc_ref
                        .as_ref()
                        .is_some_and(|r| r.name == version.spec.bmc_ref.name)
                })
                .collect();
            if servers.is_empty() {
                // Nothing behind this BMC to protect.
                return Ok(None);
            }
            let mut refs = Vec::with_capacity(servers.len());
            for server in &servers {
                refs.push(ensure_lease(
                    &self.ctx.store,
                    BmcVersion::KIND,
                    &version.metadata,
                    &server.metadata.name,
                    version.spec.server_maintenance_policy,
                )?);
            }
            tracing::info!(bmcversion = %key, leases = refs.len(), "created maintenance leases");
            self.ctx
                .store
                .patch(version, json!({"spec": {"serverMaintenanceRefs": refs}}))?;
            self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
        }

        if version.spec.server_maintenance_refs.is_empty() {
            return Ok(None);
        }
        if !grant_held(
            &self.ctx.store,
            &key.namespace,
            &version.spec.server_maintenance_refs,
        )? {
            self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
        let updated = self.ctx.save_status::<BmcVersion, _>(key, |v| {
            condition::set(
                &mut v.status.conditions,
                Condition::new(
                    CONDITION_MAINTENANCE_WAITING,
                    ConditionStatus::False,
                    REASON_APPROVED,
                ),
            );
        })?;
        // A fresh approval is worth an immediate next step; an already
        // approved grant just falls through.
        let _ = updated;
        Ok(None)
    }

    /// Two-phase manager reset via the BMC controller: request with the
    /// operation annotation, observe its removal.
    fn reset_step(
        &self,
        key: &ObjectKey,
        version: &BmcVersion,
        bmc_obj: &Bmc,
        condition_kind: &str,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        if condition::is_true(&version.status.conditions, condition_kind) {
            return Ok(None);
        }
        let annotation = bmc_obj.metadata.annotation(annotations::OPERATION);
        match condition::get(&version.status.conditions, condition_kind) {
            None => {
                if annotation.is_none() {
                    self.ctx.set_annotation(
                        bmc_obj,
                        annotations::OPERATION,
                        annotations::OPERATION_GRACEFUL_RESTART_BMC,
                    )?;
                    tracing::info!(bmcversion = %key, bmc = bmc_obj.metadata.name, "requested manager reset");
                }
                self.ctx.save_status::<BmcVersion, _>(key, |v| {
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(
                            condition_kind,
                            ConditionStatus::False,
                            REASON_RESET_REQUESTED,
                        ),
                    );
                })?;
                Ok(Some(ReconcileOutcome::requeue_after(
                    self.ctx.opts.resync_interval,
                )))
            }
            Some(_) if annotation == Some(annotations::OPERATION_GRACEFUL_RESTART_BMC) => Ok(
                Some(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval)),
            ),
            Some(_) => {
                self.ctx.save_status::<BmcVersion, _>(key, |v| {
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(condition_kind, ConditionStatus::True, REASON_RESET_COMPLETE),
                    );
                })?;
                Ok(Some(ReconcileOutcome::immediate()))
            }
        }
    }

    async fn issue_step(
        &self,
        key: &ObjectKey,
        version: &BmcVersion,
        bmc_obj: &Bmc,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        if condition::is_true(&version.status.conditions, CONDITION_UPGRADE_ISSUED) {
            return Ok(None);
        }
        if !matches!(
            bmc_obj.status.power_state,
            bmc::PowerState::On | bmc::PowerState::Unknown
        ) {
            return Ok(Some(ReconcileOutcome::requeue_after(
                self.ctx.opts.resync_interval,
            )));
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
            .with_timeout(session.upgrade_bmc_version(&request))
            .await;
        session.logout().await;

        match result {
            Ok(task_uri) => {
                tracing::info!(bmcversion = %key, task = task_uri, "upgrade issued");
                // The poll handle is persisted in the same write that
                // records issuance; a crash after the driver call but
                // before this patch retries the issue, never orphans a
                // persisted-but-unissued task.
                self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
                tracing::warn!(bmcversion = %key, error = %e, "vendor rejected upgrade");
                let message = e.to_string();
                self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
        version: &BmcVersion,
        bmc_obj: &Bmc,
    ) -> Result<Option<ReconcileOutcome>, ReconcileError> {
        if condition::is_true(&version.status.conditions, CONDITION_UPGRADE_COMPLETED) {
            return Ok(None);
        }
        let Some(task) = version.status.upgrade_task.clone() else {
            return Err(ReconcileError::Internal(eyre::eyre!(
                "{key}: upgrade issued but no task recorded"
            )));
        };

        let session = self.ctx.connect(bmc_obj).await?;
        let poll = self.ctx.with_timeout(session.upgrade_task(&task.uri)).await;
        let assessment = match assess_task(poll) {
            Ok(TaskAssessment::Vanished) => {
                // The BMC forgot the task; fall back to comparing versions.
                let current = self.ctx.with_timeout(session.bmc_version()).await;
                session.logout().await;
                let current = current?;
                if current == version.spec.version {
                    self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
                self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
                self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
                tracing::warn!(bmcversion = %key, message, "upgrade task failed");
                self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
                let updated = self.ctx.save_status::<BmcVersion, _>(key, |v| {
                    record_task(v, &info);
                    condition::set(
                        &mut v.status.conditions,
                        Condition::new(
                            CONDITION_UPGRADE_CHECKPOINT,
                            ConditionStatus::False,
                            fingerprint.clone(),
                        )
                        .with_message(format!(
                            "task {} at {}%",
                            info.state, info.percent_complete
                        )),
                    );
                })?;
                let conditions = updated
                    .map(|v| v.status.conditions)
                    .unwrap_or_default();
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

    async fn verify_step(
        &self,
        key: &ObjectKey,
        version: &BmcVersion,
        bmc_obj: &Bmc,
    ) -> ReconcileResult {
        let current = self.read_current_version(bmc_obj).await?;
        if current != version.spec.version {
            tracing::debug!(bmcversion = %key, current, "waiting for BMC to report the new version");
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        }
        self.ctx.save_status::<BmcVersion, _>(key, |v| {
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
        tracing::info!(bmcversion = %key, version = version.spec.version, "upgrade completed");
        self.release(key)?;
        Ok(ReconcileOutcome::done())
    }

    /// Deletes owned leases and drops every maintenance reference.
    fn release(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let Some(version) = self
            .ctx
            .store
            .try_get::<BmcVersion>(&key.namespace, &key.name)?
        else {
            return Ok(());
        };
        if version.spec.server_maintenance_refs.is_empty() {
            return Ok(());
        }
        release_leases(&self.ctx.store, &version, &version.spec.server_maintenance_refs)?;
        self.ctx
            .store
            .patch(&version, json!({"spec": {"serverMaintenanceRefs": []}}))?;
        Ok(())
    }

    fn maybe_retry(&self, key: &ObjectKey, version: &BmcVersion) -> ReconcileResult {
        if version.metadata.annotation(annotations::OPERATION)
            != Some(annotations::OPERATION_RETRY_FAILED)
        {
            return Ok(ReconcileOutcome::done());
        }
        tracing::info!(bmcversion = %key, "retrying failed upgrade");
        let version = self.ctx.clear_annotation(version, annotations::OPERATION)?;
        let _ = version;
        self.ctx.save_status::<BmcVersion, _>(key, |v| {
            v.status.state = FirmwareUpdateState::Pending;
            v.status.conditions.clear();
            v.status.upgrade_task = None;
        })?;
        Ok(ReconcileOutcome::immediate())
    }
}

fn record_task(version: &mut BmcVersion, info: &bmc::TaskInfo) {
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
    predicate: impl Fn(&BmcVersion) -> bool,
) -> Vec<ObjectKey> {
    store
        .list_stored(BmcVersion::KIND, namespace)
        .into_iter()
        .filter_map(|stored| stored.decode::<BmcVersion>())
        .filter(|version| predicate(version))
        .map(|version| ObjectKey::of(&version.metadata))
        .collect()
}

#[async_trait::async_trait]
impl Reconciler for BmcVersionController {
    fn kind(&self) -> &'static str {
        BmcVersion::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(version) = self
            .ctx
            .store
            .try_get::<BmcVersion>(&key.namespace, &key.name)?
        else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&version.metadata.annotations) {
            return Ok(ReconcileOutcome::done());
        }

        if version.metadata.is_marked_for_deletion() {
            // Deletion is postponed while the upgrade is in flight: the
            // finalizer stays until the machine reaches a terminal state.
            if version.status.state != FirmwareUpdateState::InProgress {
                self.release(key)?;
                if let Some(version) = self
                    .ctx
                    .store
                    .try_get::<BmcVersion>(&key.namespace, &key.name)?
                {
                    self.ctx.remove_finalizer(&version)?;
                }
                return Ok(ReconcileOutcome::done());
            }
        } else {
            let _ = self.ctx.ensure_finalizer(&version)?;
        }
        let version = self
            .ctx
            .store
            .try_get::<BmcVersion>(&key.namespace, &key.name)?
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

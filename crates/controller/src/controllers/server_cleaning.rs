/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! ServerCleaning controller: multi-task sanitisation of tainted servers.
//!
//! Every requested operation is submitted to the BMC and its task handles
//! are persisted before anything else happens; subsequent reconciles only
//! poll. Per-server progress is the arithmetic mean of per-task percents,
//! the record completes once every selected server is terminal.

use std::sync::Arc;

use chrono::Utc;
use model::annotations;
use model::bmc::Bmc;
use model::cleaning::{
    CleaningState, CleaningTaskKind, CleaningTaskStatus, ServerCleaning,
    ServerCleaningServerStatus,
};
use model::server::{Server, ServerState};
use model::Resource;
use store::Store;

use crate::controllers::context::Context;
use crate::controllers::upgrade::{TaskAssessment, assess_task};
use crate::runtime::{ObjectKey, ReconcileError, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

pub struct ServerCleaningController {
    ctx: Context,
}

impl ServerCleaningController {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(ServerCleaningController { ctx })
    }

    pub fn watches(store: &Store) -> Vec<Watch> {
        let on_server = store.clone();
        vec![Watch::mapped(Server::KIND, move |obj| {
            let Some(server) = obj.decode::<Server>() else {
                return Vec::new();
            };
            on_server
                .list_stored(ServerCleaning::KIND, &server.metadata.namespace)
                .into_iter()
                .filter_map(|stored| stored.decode::<ServerCleaning>())
                .filter(|cleaning| selects(cleaning, &server))
                .map(|cleaning| ObjectKey::of(&cleaning.metadata))
                .collect()
        })]
    }

    fn selected_servers(
        &self,
        key: &ObjectKey,
        cleaning: &ServerCleaning,
    ) -> Result<Vec<Server>, ReconcileError> {
        let mut servers = Vec::new();
        if let Some(server_ref) = &cleaning.spec.server_ref {
            if let Some(server) = self
                .ctx
                .store
                .try_get::<Server>(&key.namespace, &server_ref.name)?
            {
                servers.push(server);
            }
        } else if let Some(selector) = &cleaning.spec.selector {
            servers = self.ctx.store.list::<Server>(&key.namespace, Some(selector))?;
        }
        // Sanitisation only touches servers already pulled from service.
        servers.retain(|s| s.status.state == ServerState::Tainted);
        Ok(servers)
    }

    /// Submits every requested operation for one server and returns the
    /// task records to persist.
    async fn submit(
        &self,
        key: &ObjectKey,
        cleaning: &ServerCleaning,
        server: &Server,
    ) -> Result<Vec<CleaningTaskStatus>, ReconcileError> {
        let Some(bmc_ref) = &server.spec.bmc_ref else {
            return Ok(Vec::new());
        };
        let Some(uuid) = server.spec.system_uuid.clone() else {
            return Ok(Vec::new());
        };
        let Some(bmc_obj) = self.ctx.store.try_get::<Bmc>(&key.namespace, &bmc_ref.name)? else {
            return Ok(Vec::new());
        };

        let session = self.ctx.connect(&bmc_obj).await?;
        let result = async {
            let mut tasks = Vec::new();
            if let Some(disk_wipe) = &cleaning.spec.disk_wipe {
                for task in self
                    .ctx
                    .with_timeout(session.erase_disks(&uuid, disk_wipe.method))
                    .await?
                {
                    tasks.push(new_task(task, CleaningTaskKind::DiskWipe));
                }
            }
            if cleaning.spec.bios_reset {
                let task = self
                    .ctx
                    .with_timeout(session.reset_bios_to_defaults(&uuid))
                    .await?;
                tasks.push(new_task(task, CleaningTaskKind::BiosReset));
            }
            if cleaning.spec.network_cleanup {
                let task = self
                    .ctx
                    .with_timeout(session.clear_network_configuration(&uuid))
                    .await?;
                tasks.push(new_task(task, CleaningTaskKind::NetworkCleanup));
            }
            Ok::<_, ReconcileError>(tasks)
        }
        .await;
        session.logout().await;
        let tasks = result?;
        if cleaning.spec.bmc_reset {
            tracing::warn!(
                cleaning = %key,
                server = server.metadata.name,
                "bmcReset requested but not executed: no lease-respecting reset path"
            );
        }
        tracing::info!(cleaning = %key, server = server.metadata.name, tasks = tasks.len(), "sanitisation submitted");
        Ok(tasks)
    }

    /// Polls every non-terminal task of one server entry in place.
    async fn poll(
        &self,
        key: &ObjectKey,
        server: &Server,
        entry: &mut ServerCleaningServerStatus,
    ) -> Result<(), ReconcileError> {
        let Some(bmc_ref) = &server.spec.bmc_ref else {
            return Ok(());
        };
        let Some(bmc_obj) = self.ctx.store.try_get::<Bmc>(&key.namespace, &bmc_ref.name)? else {
            return Ok(());
        };
        let session = self.ctx.connect(&bmc_obj).await?;
        for task in entry
            .cleaning_tasks
            .iter_mut()
            .filter(|t| !t.state.is_terminal())
        {
            let poll = self.ctx.with_timeout(session.task_status(&task.task_uri)).await;
            match assess_task(poll) {
                Ok(TaskAssessment::Completed(info)) => {
                    task.state = info.state;
                    task.percent_complete = 100;
                    task.message = info.messages.join("; ");
                    task.last_update = Some(Utc::now());
                }
                Ok(TaskAssessment::Failed(info, message)) => {
                    task.state = info.state;
                    task.percent_complete = info.percent_complete;
                    task.message = message;
                    task.last_update = Some(Utc::now());
                }
                Ok(TaskAssessment::InProgress(info)) => {
                    task.state = info.state;
                    task.percent_complete = info.percent_complete;
                    task.message = info.messages.join("; ");
                    task.last_update = Some(Utc::now());
                }
                Ok(TaskAssessment::Vanished) => {
                    task.state = bmc::TaskState::Exception;
                    task.message = format!("task {} vanished from the BMC", task.task_uri);
                    task.last_update = Some(Utc::now());
                }
                Err(e) => {
                    session.logout().await;
                    return Err(e.into());
                }
            }
        }
        session.logout().await;

        let total = entry.cleaning_tasks.len();
        if total > 0 {
            let done = entry
                .cleaning_tasks
                .iter()
                .filter(|t| t.state.is_terminal())
                .count();
            let percent_sum: u32 = entry
                .cleaning_tasks
                .iter()
                .map(|t| u32::from(t.percent_complete))
                .sum();
            entry.percent_complete = (percent_sum / total as u32) as u8;
            entry.message = format!("{done}/{total} tasks completed");
            if done == total {
                let failed = entry
                    .cleaning_tasks
                    .iter()
                    .any(|t| t.state.is_failure());
                entry.state = if failed {
                    CleaningState::Failed
                } else {
                    CleaningState::Completed
                };
            } else {
                entry.state = CleaningState::InProgress;
            }
        }
        Ok(())
    }
}

fn new_task(task: bmc::SanitizeTask, kind: CleaningTaskKind) -> CleaningTaskStatus {
    CleaningTaskStatus {
        task_uri: task.uri,
        kind,
        target_id: task.target_id,
        state: bmc::TaskState::New,
        percent_complete: 0,
        message: String::new(),
        last_update: Some(Utc::now()),
    }
}

fn selects(cleaning: &ServerCleaning, server: &Server) -> bool {
    if let Some(server_ref) = &cleaning.spec.server_ref {
        return server_ref.name == server.metadata.name;
    }
    cleaning
        .spec
        .selector
        .as_ref()
        .is_some_and(|s| s.matches(&server.metadata.labels))
}

#[async_trait::async_trait]
impl Reconciler for ServerCleaningController {
    fn kind(&self) -> &'static str {
        ServerCleaning::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(cleaning) = self
            .ctx
            .store
            .try_get::<ServerCleaning>(&key.namespace, &key.name)?
        else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&cleaning.metadata.annotations) {
            return Ok(ReconcileOutcome::done());
        }
        if cleaning.metadata.is_marked_for_deletion() {
            // Tasks already on the BMC run to completion on their own.
            self.ctx.remove_finalizer(&cleaning)?;
            return Ok(ReconcileOutcome::done());
        }
        let cleaning = self.ctx.ensure_finalizer(&cleaning)?;

        if cleaning.status.state.is_terminal() {
            return Ok(ReconcileOutcome::done());
        }

        let servers = self.selected_servers(key, &cleaning)?;
        let mut statuses = cleaning.status.server_cleaning_statuses.clone();

        for server in &servers {
            let name = server.metadata.name.clone();
            if !statuses.iter().any(|s| s.server == name) {
                // Submit, then persist the handles before polling anything.
                let tasks = self.submit(key, &cleaning, server).await?;
                statuses.push(ServerCleaningServerStatus {
                    server: name,
                    state: if tasks.is_empty() {
                        CleaningState::Completed
                    } else {
                        CleaningState::InProgress
                    },
                    percent_complete: if tasks.is_empty() { 100 } else { 0 },
                    message: if tasks.is_empty() {
                        "nothing to do".to_string()
                    } else {
                        format!("0/{} tasks completed", tasks.len())
                    },
                    cleaning_tasks: tasks,
                });
                let snapshot = statuses.clone();
                self.ctx.save_status::<ServerCleaning, _>(key, |c| {
                    c.status.server_cleaning_statuses = snapshot.clone();
                    c.status.state = CleaningState::InProgress;
                })?;
            }
        }

        let mut changed = false;
        for entry in statuses.iter_mut().filter(|e| !e.state.is_terminal()) {
            let Some(server) = servers.iter().find(|s| s.metadata.name == entry.server) else {
                continue;
            };
            let before = entry.clone();
            self.poll(key, server, entry).await?;
            changed |= *entry != before;
        }

        let all_terminal = !statuses.is_empty() && statuses.iter().all(|e| e.state.is_terminal());
        let any_failed = statuses.iter().any(|e| e.state == CleaningState::Failed);
        let overall = if statuses.is_empty() {
            CleaningState::Unspecified
        } else if all_terminal {
            if any_failed {
                CleaningState::Failed
            } else {
                CleaningState::Completed
            }
        } else {
            CleaningState::InProgress
        };

        if changed || overall != cleaning.status.state {
            let snapshot = statuses.clone();
            self.ctx.save_status::<ServerCleaning, _>(key, |c| {
                c.status.server_cleaning_statuses = snapshot.clone();
                c.status.state = overall;
            })?;
        }

        if overall.is_terminal() {
            tracing::info!(cleaning = %key, state = %overall, "sanitisation finished");
            Ok(ReconcileOutcome::done())
        } else {
            Ok(ReconcileOutcome::requeue_after(self.ctx.opts.backoff_base.max(
                std::time::Duration::from_millis(50),
            )))
        }
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! Set controllers: label-selector fan-out of a template to per-target
//! child resources.
//!
//! One algorithm serves every Set kind, parameterised over (set, target,
//! child) by the [`FanOut`] trait: list targets by selector, list owned
//! children, create or patch one child per target, delete children whose
//! target left the selection, and aggregate child states into the Set
//! status.

use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::Arc;

use model::annotations;
use model::bios::{BiosVersion, BiosVersionSet};
use model::bmc::{self as bmc_model, Bmc};
use model::bmc_user::{BmcUser, BmcUserSet};
use model::bmc_version::{BmcVersion, BmcVersionSet};
use model::condition;
use model::firmware::FirmwareUpdateState;
use model::maintenance::{MaintenanceState, ServerMaintenance, ServerMaintenanceSet};
use model::selector::LabelSelector;
use model::server::{Server, ServerState};
use model::set::SetStatus;
use model::{ObjectReference, OwnerReference, Resource};
use serde_json::{Value, json};
use store::Store;

use crate::controllers::context::Context;
use crate::controllers::upgrade::child_name;
use crate::runtime::{ObjectKey, ReconcileError, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

/// Where a child (or target) lands in the aggregate counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildPhase {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// The per-kind parameterisation of the fan-out algorithm.
pub trait FanOut: Send + Sync + 'static {
    type Set: Resource;
    type Target: Resource;
    type Child: Resource;

    fn selector(set: &Self::Set) -> &LabelSelector;

    /// A new child for the target: template spec plus the target
    /// reference. Metadata besides the name is filled in by the generic
    /// controller.
    fn make_child(set: &Self::Set, target: &Self::Target, name: &str) -> Self::Child;

    /// The name of the target a child was created for.
    fn child_target_name(child: &Self::Child) -> String;

    /// Merge patch re-aligning a child's spec with the template, `None`
    /// when aligned. Template changes propagate through this.
    fn child_spec_patch(set: &Self::Set, child: &Self::Child) -> Option<Value>;

    fn child_phase(child: &Self::Child) -> ChildPhase;

    /// Whether the target is currently usable (feeds the `available`
    /// count).
    fn target_available(target: &Self::Target) -> bool;

    /// Children that outlive their Set on deletion.
    fn keep_on_finalize(_child: &Self::Child) -> bool {
        false
    }

    fn with_status(set: &mut Self::Set, status: SetStatus);
}

pub struct SetController<F: FanOut> {
    ctx: Context,
    _kind: PhantomData<fn() -> F>,
}

impl<F: FanOut> SetController<F> {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(SetController {
            ctx,
            _kind: PhantomData,
        })
    }

    /// Targets re-evaluate every Set of the kind; children map to their
    /// owning Set.
    pub fn watches(store: &Store) -> Vec<Watch> {
        let on_target = store.clone();
        vec![
            Watch::mapped(F::Target::KIND, move |obj| {
                let meta = obj.metadata();
                on_target
                    .list_stored(F::Set::KIND, &meta.namespace)
                    .into_iter()
                    .map(|stored| ObjectKey::of(&stored.metadata()))
                    .collect()
            }),
            Watch::mapped(F::Child::KIND, |obj| {
                let meta = obj.metadata();
                match meta.controller_owner() {
                    Some(owner) if owner.kind == F::Set::KIND => {
                        vec![ObjectKey::new(&meta.namespace, &owner.name)]
                    }
                    _ => Vec::new(),
                }
            }),
        ]
    }

    fn owned_children(&self, set: &F::Set) -> Result<Vec<F::Child>, store::StoreError> {
        Ok(self
            .ctx
            .store
            .list::<F::Child>(&set.metadata().namespace, None)?
            .into_iter()
            .filter(|child| child.metadata().is_controlled_by(set.metadata().uid))
            .collect())
    }

    fn finalize(&self, set: &F::Set) -> Result<(), ReconcileError> {
        let namespace = set.metadata().namespace.clone();
        for child in self.owned_children(set)? {
            if F::keep_on_finalize(&child) {
                // Orphan the child so cascade deletion leaves it alone.
                let owner_references: Vec<OwnerReference> = child
                    .metadata()
                    .owner_references
                    .iter()
                    .filter(|r| r.uid != set.metadata().uid)
                    .cloned()
                    .collect();
                tracing::info!(
                    set = set.metadata().name,
                    child = child.metadata().name,
                    "orphaning child on set deletion"
                );
                self.ctx.store.patch(
                    &child,
                    json!({"metadata": {"ownerReferences": owner_references}}),
                )?;
            } else {
                self.ctx
                    .store
                    .delete_if_present::<F::Child>(&namespace, &child.metadata().name)?;
            }
        }
        self.ctx.remove_finalizer(set)?;
        Ok(())
    }

    fn fan_out(&self, key: &ObjectKey, set: &F::Set) -> Result<(), ReconcileError> {
        let selector = F::selector(set).clone();
        let targets = self
            .ctx
            .store
            .list::<F::Target>(&key.namespace, Some(&selector))?;
        let children = self.owned_children(set)?;

        // Create or align one child per matching target.
        for target in &targets {
            let name = child_name(&set.metadata().name, &target.metadata().name);
            match self.ctx.store.try_get::<F::Child>(&key.namespace, &name)? {
                None => {
                    let mut child = F::make_child(set, target, &name);
                    child.metadata_mut().namespace = key.namespace.clone();
                    child.metadata_mut().owner_references.push(
                        OwnerReference::controller_of(
                            F::Set::KIND,
                            &set.metadata().name,
                            set.metadata().uid,
                        )
                        .blocking(),
                    );
                    tracing::info!(set = %key, child = name, "creating child");
                    match self.ctx.store.create(child) {
                        Ok(_) => {}
                        // Another worker observed the same gap; the
                        // existing child is aligned on the next pass.
                        Err(e) if matches!(e, store::StoreError::AlreadyExists { .. }) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Some(existing) => {
                    if !existing.metadata().is_controlled_by(set.metadata().uid) {
                        tracing::warn!(set = %key, child = name, "name taken by a foreign object, skipping");
                        continue;
                    }
                    if let Some(patch) = F::child_spec_patch(set, &existing) {
                        self.ctx.store.patch(&existing, json!({"spec": patch}))?;
                    }
                }
            }
        }

        // Delete children whose target no longer matches the selector.
        let target_names: BTreeSet<String> = targets
            .iter()
            .map(|t| t.metadata().name.clone())
            .collect();
        for child in &children {
            if !target_names.contains(&F::child_target_name(child)) {
                tracing::info!(set = %key, child = child.metadata().name, "target unselected, deleting child");
                self.ctx
                    .store
                    .delete_if_present::<F::Child>(&key.namespace, &child.metadata().name)?;
            }
        }

        // Aggregate.
        let children = self.owned_children(set)?;
        let mut status = SetStatus {
            fully_labeled: targets.len() as i32,
            available: targets.iter().filter(|t| F::target_available(t)).count() as i32,
            ..Default::default()
        };
        for child in &children {
            match F::child_phase(child) {
                ChildPhase::Pending => status.pending += 1,
                ChildPhase::InProgress => status.in_progress += 1,
                ChildPhase::Completed => status.completed += 1,
                ChildPhase::Failed => status.failed += 1,
            }
        }
        self.ctx.save_status::<F::Set, _>(key, |current| {
            F::with_status(current, status);
        })?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<F: FanOut> Reconciler for SetController<F> {
    fn kind(&self) -> &'static str {
        F::Set::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(set) = self.ctx.store.try_get::<F::Set>(&key.namespace, &key.name)? else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&set.metadata().annotations) {
            return Ok(ReconcileOutcome::done());
        }
        if set.metadata().is_marked_for_deletion() {
            self.finalize(&set)?;
            return Ok(ReconcileOutcome::done());
        }
        let set = self.ctx.ensure_finalizer(&set)?;

        self.fan_out(key, &set)?;
        Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval))
    }
}

// MARK: - concrete fan-outs

fn firmware_phase(state: FirmwareUpdateState) -> ChildPhase {
    match state {
        FirmwareUpdateState::Unspecified | FirmwareUpdateState::Pending => ChildPhase::Pending,
        FirmwareUpdateState::InProgress => ChildPhase::InProgress,
        FirmwareUpdateState::Completed => ChildPhase::Completed,
        FirmwareUpdateState::Failed => ChildPhase::Failed,
    }
}

pub struct BmcVersionFanOut;

impl FanOut for BmcVersionFanOut {
    type Set = BmcVersionSet;
    type Target = Bmc;
    type Child = BmcVersion;

    fn selector(set: &BmcVersionSet) -> &LabelSelector {
        &set.spec.selector
    }

    fn make_child(set: &BmcVersionSet, target: &Bmc, name: &str) -> BmcVersion {
        let mut child = BmcVersion {
            metadata: model::Metadata::named(name, &set.metadata.namespace),
            ..Default::default()
        };
        child.spec.bmc_ref = ObjectReference::named(&target.metadata.name);
        child.spec.version = set.spec.template.version.clone();
        child.spec.image = set.spec.template.image.clone();
        child.spec.server_maintenance_policy = set.spec.template.server_maintenance_policy;
        child.spec.update_policy = set.spec.template.update_policy;
        child
    }

    fn child_target_name(child: &BmcVersion) -> String {
        child.spec.bmc_ref.name.clone()
    }

    fn child_spec_patch(set: &BmcVersionSet, child: &BmcVersion) -> Option<Value> {
        let template = &set.spec.template;
        if child.spec.version == template.version
            && child.spec.image == template.image
            && child.spec.server_maintenance_policy == template.server_maintenance_policy
            && child.spec.update_policy == template.update_policy
        {
            return None;
        }
        Some(json!({
            "version": template.version,
            "image": template.image,
            "serverMaintenancePolicy": template.server_maintenance_policy,
            "updatePolicy": template.update_policy,
        }))
    }

    fn child_phase(child: &BmcVersion) -> ChildPhase {
        firmware_phase(child.status.state)
    }

    fn target_available(target: &Bmc) -> bool {
        condition::is_true(&target.status.conditions, bmc_model::CONDITION_READY)
    }

    fn with_status(set: &mut BmcVersionSet, status: SetStatus) {
        set.status = status;
    }
}

pub struct BiosVersionFanOut;

impl FanOut for BiosVersionFanOut {
    type Set = BiosVersionSet;
    type Target = Server;
    type Child = BiosVersion;

    fn selector(set: &BiosVersionSet) -> &LabelSelector {
        &set.spec.selector
    }

    fn make_child(set: &BiosVersionSet, target: &Server, name: &str) -> BiosVersion {
        let mut child = BiosVersion {
            metadata: model::Metadata::named(name, &set.metadata.namespace),
            ..Default::default()
        };
        child.spec.server_ref = ObjectReference::named(&target.metadata.name);
        child.spec.version = set.spec.template.version.clone();
        child.spec.image = set.spec.template.image.clone();
        child.spec.server_maintenance_policy = set.spec.template.server_maintenance_policy;
        child.spec.update_policy = set.spec.template.update_policy;
        child
    }

    fn child_target_name(child: &BiosVersion) -> String {
        child.spec.server_ref.name.clone()
    }

    fn child_spec_patch(set: &BiosVersionSet, child: &BiosVersion) -> Option<Value> {
        let template = &set.spec.template;
        if child.spec.version == template.version
            && child.spec.image == template.image
            && child.spec.server_maintenance_policy == template.server_maintenance_policy
            && child.spec.update_policy == template.update_policy
        {
            return None;
        }
        Some(json!({
            "version": template.version,
            "image": template.image,
            "serverMaintenancePolicy": template.server_maintenance_policy,
            "updatePolicy": template.update_policy,
        }))
    }

    fn child_phase(child: &BiosVersion) -> ChildPhase {
        firmware_phase(child.status.state)
    }

    fn target_available(target: &Server) -> bool {
        matches!(
            target.status.state,
            ServerState::Available | ServerState::Reserved
        )
    }

    fn with_status(set: &mut BiosVersionSet, status: SetStatus) {
        set.status = status;
    }
}

pub struct BmcUserFanOut;

impl FanOut for BmcUserFanOut {
    type Set = BmcUserSet;
    type Target = Bmc;
    type Child = BmcUser;

    fn selector(set: &BmcUserSet) -> &LabelSelector {
        &set.spec.selector
    }

    fn make_child(set: &BmcUserSet, target: &Bmc, name: &str) -> BmcUser {
        let mut child = BmcUser {
            metadata: model::Metadata::named(name, &set.metadata.namespace),
            ..Default::default()
        };
        child.spec.bmc_ref = ObjectReference::named(&target.metadata.name);
        child.spec.username = set.spec.template.username.clone();
        child.spec.role = set.spec.template.role;
        child.spec.rotation_period = set.spec.template.rotation_period;
        child
    }

    fn child_target_name(child: &BmcUser) -> String {
        child.spec.bmc_ref.name.clone()
    }

    fn child_spec_patch(set: &BmcUserSet, child: &BmcUser) -> Option<Value> {
        let template = &set.spec.template;
        if child.spec.username == template.username
            && child.spec.role == template.role
            && child.spec.rotation_period == template.rotation_period
        {
            return None;
        }
        Some(json!({
            "username": template.username,
            "role": template.role,
            "rotationPeriod": serde_json::to_value(humantime_serde::Serde::from(template.rotation_period)).unwrap_or(Value::Null),
        }))
    }

    fn child_phase(child: &BmcUser) -> ChildPhase {
        if condition::is_true(&child.status.conditions, model::bmc_user::CONDITION_READY) {
            ChildPhase::Completed
        } else if child.status.effective_bmc_secret_ref.is_some() {
            ChildPhase::InProgress
        } else {
            ChildPhase::Pending
        }
    }

    fn target_available(target: &Bmc) -> bool {
        condition::is_true(&target.status.conditions, bmc_model::CONDITION_READY)
    }

    fn with_status(set: &mut BmcUserSet, status: SetStatus) {
        set.status = status;
    }
}

pub struct ServerMaintenanceFanOut;

impl FanOut for ServerMaintenanceFanOut {
    type Set = ServerMaintenanceSet;
    type Target = Server;
    type Child = ServerMaintenance;

    fn selector(set: &ServerMaintenanceSet) -> &LabelSelector {
        &set.spec.selector
    }

    fn make_child(set: &ServerMaintenanceSet, target: &Server, name: &str) -> ServerMaintenance {
        let mut child = ServerMaintenance {
            metadata: model::Metadata::named(name, &set.metadata.namespace),
            ..Default::default()
        };
        child.spec.server_ref = ObjectReference::named(&target.metadata.name);
        child.spec.policy = set.spec.template.policy;
        child.spec.server_power = set.spec.template.server_power;
        child
    }

    fn child_target_name(child: &ServerMaintenance) -> String {
        child.spec.server_ref.name.clone()
    }

    fn child_spec_patch(set: &ServerMaintenanceSet, child: &ServerMaintenance) -> Option<Value> {
        let template = &set.spec.template;
        if child.spec.policy == template.policy && child.spec.server_power == template.server_power
        {
            return None;
        }
        Some(json!({
            "policy": template.policy,
            "serverPower": template.server_power,
        }))
    }

    fn child_phase(child: &ServerMaintenance) -> ChildPhase {
        match child.status.state {
            MaintenanceState::Unspecified | MaintenanceState::Pending => ChildPhase::Pending,
            MaintenanceState::InMaintenance => ChildPhase::InProgress,
            MaintenanceState::Completed => ChildPhase::Completed,
            MaintenanceState::Failed => ChildPhase::Failed,
        }
    }

    fn target_available(target: &Server) -> bool {
        matches!(
            target.status.state,
            ServerState::Available | ServerState::Reserved
        )
    }

    /// Leases mid-maintenance (and completed ones awaiting operator
    /// review) survive set deletion.
    fn keep_on_finalize(child: &ServerMaintenance) -> bool {
        matches!(
            child.status.state,
            MaintenanceState::InMaintenance | MaintenanceState::Completed
        )
    }

    fn with_status(set: &mut ServerMaintenanceSet, status: SetStatus) {
        set.status = status;
    }
}

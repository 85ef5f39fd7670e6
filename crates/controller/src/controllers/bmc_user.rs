/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BMCUser controller: account lifecycle and password rotation on a BMC.
//!
//! Two credentials are tracked: the intended one (`spec.bmc_secret_ref`,
//! user-provided or generated) and the effective one
//! (`status.effective_bmc_secret_ref`), which is only ever advanced after
//! a successful connect test. A bad intended secret therefore never
//! clobbers working credentials. Rotation always mints a new secret
//! record; existing secrets are immutable.

use std::sync::Arc;
use std::time::Duration;

use bmc::{BmcSession, Credentials};
use chrono::Utc;
use model::annotations;
use model::bmc::Bmc;
use model::bmc_user::{BmcUser, CONDITION_READY};
use model::condition::{self, Condition, ConditionStatus};
use model::secret::Secret;
use model::{OwnerReference, Resource, SecretReference};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::json;
use store::Store;

use crate::controllers::context::Context;
use crate::runtime::{ObjectKey, ReconcileError, ReconcileOutcome, ReconcileResult, Reconciler, Watch};

const REASON_READY: &str = "AccountInSync";
const REASON_NO_EFFECTIVE: &str = "NoEffectiveCredential";

const GENERATED_PASSWORD_LEN: usize = 16;

pub fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

fn secret_suffix() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect()
}

pub struct BmcUserController {
    ctx: Context,
}

impl BmcUserController {
    pub fn new(ctx: Context) -> Arc<Self> {
        Arc::new(BmcUserController { ctx })
    }

    pub fn watches(store: &Store) -> Vec<Watch> {
        let on_bmc = store.clone();
        let on_secret = store.clone();
        vec![
            Watch::mapped(Bmc::KIND, move |obj| {
                let meta = obj.metadata();
                users_where(&on_bmc, &meta.namespace, |u| u.spec.bmc_ref.name == meta.name)
            }),
            Watch::mapped(Secret::KIND, move |obj| {
                let meta = obj.metadata();
                users_where(&on_secret, &meta.namespace, |u| {
                    u.spec
                        .bmc_secret_ref
                        .as_ref()
                        .is_some_and(|r| r.name == meta.name)
                        || u.status
                            .effective_bmc_secret_ref
                            .as_ref()
                            .is_some_and(|r| r.name == meta.name)
                })
            }),
        ]
    }

    /// Creates an immutable, controller-owned credential secret.
    fn mint_secret(&self, user: &BmcUser, password: &str) -> Result<Secret, store::StoreError> {
        let name = format!("{}-credentials-{}", user.metadata.name, secret_suffix());
        let mut secret = Secret::credentials(
            &name,
            &user.metadata.namespace,
            &user.spec.username,
            password,
        )
        .immutable();
        secret.metadata.owner_references.push(OwnerReference::controller_of(
            BmcUser::KIND,
            &user.metadata.name,
            user.metadata.uid,
        ));
        self.ctx.store.create(secret)
    }

    fn rotation_due(&self, user: &BmcUser) -> bool {
        if user.metadata.annotation(annotations::OPERATION)
            == Some(annotations::OPERATION_ROTATE_CREDENTIALS)
        {
            return true;
        }
        if let Some(period) = user.spec.rotation_period
            && let Some(last) = user.status.last_rotation
            && let Ok(period) = chrono::Duration::from_std(period)
            && Utc::now() >= last + period
        {
            return true;
        }
        if let Some(expiration) = user.status.password_expiration
            && Utc::now() >= expiration
        {
            return true;
        }
        false
    }

    /// Delay until the next scheduled rotation, bounded by the resync
    /// interval.
    fn next_check(&self, user: &BmcUser) -> Duration {
        let mut delay = self.ctx.opts.resync_interval;
        if let Some(period) = user.spec.rotation_period
            && let Some(last) = user.status.last_rotation
            && let Ok(period) = chrono::Duration::from_std(period)
        {
            let due = (last + period - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            delay = delay.min(due.max(Duration::from_millis(10)));
        }
        delay
    }

    /// Intended credentials authenticated; converge account state and
    /// rotate when due.
    async fn converge(
        &self,
        key: &ObjectKey,
        user: &BmcUser,
        intended_ref: &SecretReference,
        session: &dyn BmcSession,
    ) -> ReconcileResult {
        if user.status.effective_bmc_secret_ref.as_ref() != Some(intended_ref) {
            tracing::info!(bmcuser = %key, secret = intended_ref.name, "credential effective");
            let intended_ref = intended_ref.clone();
            self.ctx.save_status::<BmcUser, _>(key, |u| {
                u.status.effective_bmc_secret_ref = Some(intended_ref.clone());
                if u.status.last_rotation.is_none() {
                    u.status.last_rotation = Some(Utc::now());
                }
            })?;
        }

        // Record the vendor-assigned account id and password expiry.
        let accounts = self.ctx.with_timeout(session.accounts()).await?;
        if let Some(account) = accounts.iter().find(|a| a.username == user.spec.username) {
            let (id, expiration) = (account.id.clone(), account.password_expiration);
            self.ctx.save_status::<BmcUser, _>(key, |u| {
                u.status.id = Some(id.clone());
                u.status.password_expiration = expiration;
            })?;
        }

        let Some(user) = self.ctx.store.try_get::<BmcUser>(&key.namespace, &key.name)? else {
            return Ok(ReconcileOutcome::done());
        };
        if self.rotation_due(&user) {
            return self.rotate(key, &user, session).await;
        }

        self.ctx.save_status::<BmcUser, _>(key, |u| {
            condition::set(
                &mut u.status.conditions,
                Condition::new(CONDITION_READY, ConditionStatus::True, REASON_READY),
            );
        })?;
        Ok(ReconcileOutcome::requeue_after(self.next_check(&user)))
    }

    async fn rotate(
        &self,
        key: &ObjectKey,
        user: &BmcUser,
        session: &dyn BmcSession,
    ) -> ReconcileResult {
        tracing::info!(bmcuser = %key, "rotating credentials");
        let password = generate_password();
        let secret = self.mint_secret(user, &password)?;

        // Update the account first; the references only move once the BMC
        // accepted the new password.
        self.ctx
            .with_timeout(session.create_or_update_account(
                &user.spec.username,
                user.spec.role.as_str(),
                &password,
            ))
            .await?;

        let secret_ref = SecretReference::named(&secret.metadata.name);
        self.ctx
            .store
            .patch(user, json!({"spec": {"bmcSecretRef": secret_ref}}))?;
        let secret_ref = SecretReference::named(&secret.metadata.name);
        self.ctx.save_status::<BmcUser, _>(key, |u| {
            u.status.effective_bmc_secret_ref = Some(secret_ref.clone());
            u.status.last_rotation = Some(Utc::now());
            condition::set(
                &mut u.status.conditions,
                Condition::new(CONDITION_READY, ConditionStatus::True, REASON_READY),
            );
        })?;

        if let Some(user) = self.ctx.store.try_get::<BmcUser>(&key.namespace, &key.name)?
            && user.metadata.annotation(annotations::OPERATION)
                == Some(annotations::OPERATION_ROTATE_CREDENTIALS)
        {
            self.ctx.clear_annotation(&user, annotations::OPERATION)?;
        }
        Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval))
    }

    /// The intended credential was rejected: install the account through
    /// an administrative session. The effective credential is left
    /// untouched.
    async fn install_account(
        &self,
        key: &ObjectKey,
        user: &BmcUser,
        bmc_obj: &Bmc,
        intended: &Credentials,
    ) -> ReconcileResult {
        let is_self_admin = bmc_obj
            .spec
            .admin_user_ref
            .as_ref()
            .is_some_and(|r| r.name == user.metadata.name);

        let admin_session = if is_self_admin {
            // Bootstrap: this user IS the BMC's administrative account, so
            // authenticate with its own last working credential.
            let Some(effective_ref) = &user.status.effective_bmc_secret_ref else {
                tracing::warn!(bmcuser = %key, "no effective credential to bootstrap from");
                self.ctx.save_status::<BmcUser, _>(key, |u| {
                    condition::set(
                        &mut u.status.conditions,
                        Condition::new(CONDITION_READY, ConditionStatus::False, REASON_NO_EFFECTIVE)
                            .with_message(
                                "intended secret rejected and no effective secret recorded",
                            ),
                    );
                })?;
                return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
            };
            let effective = self.ctx.credentials(&key.namespace, effective_ref)?;
            self.ctx.connect_with(bmc_obj, &effective).await?
        } else {
            self.ctx.connect(bmc_obj).await?
        };

        let result = self
            .ctx
            .with_timeout(admin_session.create_or_update_account(
                &user.spec.username,
                user.spec.role.as_str(),
                &intended.password,
            ))
            .await;
        admin_session.logout().await;
        result?;
        tracing::info!(bmcuser = %key, username = user.spec.username, "account installed");
        // The connect test on the next pass promotes intended to
        // effective.
        Ok(ReconcileOutcome::immediate())
    }

    async fn finalize(&self, key: &ObjectKey, user: &BmcUser) -> Result<(), ReconcileError> {
        let Some(id) = user.status.id.clone() else {
            self.ctx.remove_finalizer(user)?;
            return Ok(());
        };
        if let Some(bmc_obj) = self
            .ctx
            .store
            .try_get::<Bmc>(&key.namespace, &user.spec.bmc_ref.name)?
        {
            let session = self.ctx.connect(&bmc_obj).await?;
            let result = self.ctx.with_timeout(session.delete_account(&id)).await;
            session.logout().await;
            match result {
                Ok(()) => {}
                Err(e) if matches!(e, bmc::BmcError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            tracing::info!(bmcuser = %key, id, "account removed from BMC");
        }
        self.ctx.remove_finalizer(user)?;
        Ok(())
    }
}

fn users_where(
    store: &Store,
    namespace: &str,
    predicate: impl Fn(&BmcUser) -> bool,
) -> Vec<ObjectKey> {
    store
        .list_stored(BmcUser::KIND, namespace)
        .into_iter()
        .filter_map(|stored| stored.decode::<BmcUser>())
        .filter(|user| predicate(user))
        .map(|user| ObjectKey::of(&user.metadata))
        .collect()
}

#[async_trait::async_trait]
impl Reconciler for BmcUserController {
    fn kind(&self) -> &'static str {
        BmcUser::KIND
    }

    async fn reconcile(&self, key: &ObjectKey) -> ReconcileResult {
        let Some(user) = self.ctx.store.try_get::<BmcUser>(&key.namespace, &key.name)? else {
            return Ok(ReconcileOutcome::done());
        };
        if annotations::ignore_reconcile(&user.metadata.annotations) {
            return Ok(ReconcileOutcome::done());
        }
        if user.metadata.is_marked_for_deletion() {
            self.finalize(key, &user).await?;
            return Ok(ReconcileOutcome::done());
        }
        let user = self.ctx.ensure_finalizer(&user)?;

        let Some(bmc_obj) = self
            .ctx
            .store
            .try_get::<Bmc>(&key.namespace, &user.spec.bmc_ref.name)?
        else {
            return Ok(ReconcileOutcome::requeue_after(self.ctx.opts.resync_interval));
        };

        // A missing intended secret is generated, never guessed.
        let Some(intended_ref) = user.spec.bmc_secret_ref.clone() else {
            let password = generate_password();
            let secret = self.mint_secret(&user, &password)?;
            tracing::info!(bmcuser = %key, secret = secret.metadata.name, "generated credential secret");
            self.ctx.store.patch(
                &user,
                json!({"spec": {"bmcSecretRef": SecretReference::named(&secret.metadata.name)}}),
            )?;
            return Ok(ReconcileOutcome::immediate());
        };
        let intended = self.ctx.credentials(&key.namespace, &intended_ref)?;

        match self.ctx.connect_with(&bmc_obj, &intended).await {
            Ok(session) => {
                let result = self.converge(key, &user, &intended_ref, session.as_ref()).await;
                session.logout().await;
                result
            }
            Err(e) if e.is_unauthorized() => {
                self.install_account(key, &user, &bmc_obj, &intended).await
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_passwords_are_long_and_distinct() {
        let a = generate_password();
        let b = generate_password();
        assert_eq!(a.len(), GENERATED_PASSWORD_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}

/*
 * SPDX-FileCopyrightText: Copyright (c) 2026 Ferrite Project Contributors
 * SPDX-License-Identifier: Apache-2.0
 */
//! BMCUser lifecycle: generated credentials, the effective-secret
//! invariant, rotation and account removal.

use std::time::Duration;

use model::bmc::Bmc;
use model::bmc_user::{BmcUser, BmcUserRole};
use model::secret::Secret;
use model::{Metadata, ObjectReference, SecretReference};

use crate::tests::common::{Harness, NS};

fn user(name: &str, username: &str, bmc_name: &str) -> BmcUser {
    let mut user = BmcUser {
        metadata: Metadata::named(name, NS),
        ..Default::default()
    };
    user.spec.username = username.to_string();
    user.spec.role = BmcUserRole::Administrator;
    user.spec.bmc_ref = ObjectReference::named(bmc_name);
    user
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_secret_is_generated_and_account_installed() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");

    harness
        .store
        .create(user("user-0", "operator1", "bmc-0"))
        .unwrap();

    let effective = harness
        .wait_for("credential effective", || {
            let user: BmcUser = harness.store.try_get(NS, "user-0").ok().flatten()?;
            user.status.effective_bmc_secret_ref.clone()
        })
        .await;
    // The generated secret is immutable, owned, and installed on the BMC.
    let secret: Secret = harness.store.get(NS, &effective.name).unwrap();
    assert!(secret.immutable);
    assert_eq!(secret.username(), Some("operator1"));
    let password = secret.password().unwrap().to_string();
    assert_eq!(password.len(), 16);
    assert_eq!(mock.account_password("operator1"), Some(password));

    // The vendor-assigned account id was scraped back.
    let user: BmcUser = harness.store.get(NS, "user-0").unwrap();
    assert!(user.status.id.is_some());
    assert_eq!(
        user.spec.bmc_secret_ref.as_ref().map(|r| r.name.as_str()),
        Some(effective.name.as_str())
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rotation_mints_a_new_secret() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");
    mock.state().add_account("svc", "bar", "Administrator");

    harness
        .store
        .create(Secret::credentials("svc-initial", NS, "svc", "bar"))
        .unwrap();
    let mut record = user("user-0", "svc", "bmc-0");
    record.spec.bmc_secret_ref = Some(SecretReference::named("svc-initial"));
    record.spec.rotation_period = Some(Duration::from_secs(1));
    harness.store.create(record).unwrap();

    // Within a few seconds the credential has rotated onto a fresh secret.
    let rotated = harness
        .wait_for("rotation", || {
            let user: BmcUser = harness.store.try_get(NS, "user-0").ok().flatten()?;
            let effective = user.status.effective_bmc_secret_ref.clone()?;
            (effective.name != "svc-initial" && user.status.last_rotation.is_some())
                .then_some(user)
        })
        .await;

    let effective = rotated.status.effective_bmc_secret_ref.unwrap();
    let new_secret: Secret = harness.store.get(NS, &effective.name).unwrap();
    assert_ne!(new_secret.password(), Some("bar"));
    assert_eq!(mock.account_password("svc"), new_secret.password().map(String::from));
    // Rotation replaces the reference, never the original record.
    let original: Secret = harness.store.get(NS, "svc-initial").unwrap();
    assert_eq!(original.password(), Some("bar"));
    assert_eq!(
        rotated.spec.bmc_secret_ref.map(|r| r.name),
        Some(effective.name)
    );

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_intended_secret_leaves_effective_untouched() {
    let harness = Harness::start().await;
    harness.bmc_fixture("bmc-0", "127.0.0.1");
    let mock = harness.registry.lookup(&"127.0.0.1".parse().unwrap()).unwrap();
    mock.state().add_account("svc", "good", "Administrator");

    harness
        .store
        .create(Secret::credentials("svc-good", NS, "svc", "good"))
        .unwrap();
    let mut record = user("user-0", "svc", "bmc-0");
    record.spec.bmc_secret_ref = Some(SecretReference::named("svc-good"));
    harness.store.create(record).unwrap();

    harness
        .wait_for("effective = good", || {
            let user: BmcUser = harness.store.try_get(NS, "user-0").ok().flatten()?;
            (user.status.effective_bmc_secret_ref.as_ref().map(|r| r.name.as_str())
                == Some("svc-good"))
            .then_some(())
        })
        .await;

    // Break the BMC's own admin credential AND point the spec at a bad
    // secret: the connect test fails and there is no admin path either.
    {
        let admin_secret: Secret = harness.store.get(NS, "bmc-0-credentials").unwrap();
        harness
            .store
            .patch(
                &admin_secret,
                serde_json::json!({"data": {"password": "broken"}}),
            )
            .unwrap();
    }
    harness
        .store
        .create(Secret::credentials("svc-bad", NS, "svc", "wrong"))
        .unwrap();
    let record: BmcUser = harness.store.get(NS, "user-0").unwrap();
    harness
        .store
        .patch(
            &record,
            serde_json::json!({"spec": {"bmcSecretRef": {"name": "svc-bad"}}}),
        )
        .unwrap();

    tokio::time::sleep(harness.opts.resync_interval * 6).await;
    let user: BmcUser = harness.store.get(NS, "user-0").unwrap();
    assert_eq!(
        user.status.effective_bmc_secret_ref.map(|r| r.name),
        Some("svc-good".to_string()),
        "a rejected intended secret must not clobber the effective one"
    );
    assert_eq!(mock.account_password("svc"), Some("good".to_string()));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn deletion_removes_the_account() {
    let harness = Harness::start().await;
    let mock = harness.bmc_fixture("bmc-0", "127.0.0.1");

    harness
        .store
        .create(user("user-0", "shortlived", "bmc-0"))
        .unwrap();
    harness
        .wait_for("account installed", || {
            mock.has_account("shortlived").then_some(())
        })
        .await;
    harness
        .wait_for("id recorded", || {
            let user: BmcUser = harness.store.try_get(NS, "user-0").ok().flatten()?;
            user.status.id.clone()
        })
        .await;

    harness.store.delete::<BmcUser>(NS, "user-0").unwrap();
    harness
        .wait_for("account deleted with the record", || {
            let gone = harness
                .store
                .try_get::<BmcUser>(NS, "user-0")
                .ok()
                .flatten()
                .is_none();
            (gone && !mock.has_account("shortlived")).then_some(())
        })
        .await;

    harness.stop().await;
}

use std::sync::Arc;
use std::time::Duration;

use crm_cache::{Cache, Ttl};
use crm_cache_memory::MemoryCache;
use crm_storage::{DatabaseName, Store};

use super::common::*;
use crate::deadline::Deadline;
use crate::error::{CrmError, ErrorKind};
use crate::fingerprint::register_key;
use crate::provisioner;

/// Tenant database files on disk, ignoring WAL side files.
fn tenant_files(env: &TestEnv) -> usize {
    let any = DatabaseName::parse("Anytenant").unwrap();
    let dir = env.sqlite.tenant_path(&any);
    std::fs::read_dir(dir.parent().unwrap())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "db"))
        .count()
}

async fn assert_single_tenant_rows(env: &TestEnv, db_name: &DatabaseName) {
    assert_eq!(env.directory_rows("companies").await, 1);
    assert_eq!(env.directory_rows("auth_users").await, 1);
    assert_eq!(env.tenant_rows(db_name, "users").await, 1);
    assert_eq!(env.tenant_rows(db_name, "rights").await, 1);
    assert_eq!(env.tenant_rows(db_name, "available_actions").await, 1);
}

#[tokio::test]
async fn register_creates_company_tenant_and_admin() {
    let env = TestEnv::new().await;

    let registration = env.register(acme()).await.unwrap();
    assert!(!registration.replayed);
    assert_eq!(registration.db_name.as_str().len(), 25);
    assert!(registration
        .db_name
        .as_str()
        .bytes()
        .all(|b| b.is_ascii_alphabetic()));
    assert!(!registration.tenant_user_id.to_string().is_empty());

    assert_single_tenant_rows(&env, &registration.db_name).await;

    let admin = env
        .sqlite
        .find_auth_users(Some("a@acme.test"), None)
        .await
        .unwrap()
        .remove(0);
    assert!(admin.password_hash.starts_with("$argon2id$"));
    assert_eq!(admin.phone.as_deref(), Some("1234567890"));
    assert_eq!(
        env.sqlite
            .find_tenant_user(&registration.db_name, &admin.id)
            .await
            .unwrap(),
        Some(registration.tenant_user_id)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_all_commit() {
    let env = TestEnv::new().await;

    let (a, b, c, d, e, f) = tokio::join!(
        env.register(intent("Acme", "a@acme.test", "1000000001")),
        env.register(intent("Globex", "a@globex.test", "1000000002")),
        env.register(intent("Initech", "a@initech.test", "1000000003")),
        env.register(intent("Umbrella", "a@umbrella.test", "1000000004")),
        env.register(intent("Hooli", "a@hooli.test", "1000000005")),
        env.register(intent("Soylent", "a@soylent.test", "1000000006")),
    );
    let registrations = [a, b, c, d, e, f]
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    assert_eq!(env.directory_rows("companies").await, 6);
    assert_eq!(env.directory_rows("auth_users").await, 6);
    assert_eq!(tenant_files(&env), 6);
    for registration in &registrations {
        assert!(!registration.replayed);
        assert_eq!(env.tenant_rows(&registration.db_name, "users").await, 1);
    }
}

#[tokio::test]
async fn empty_phone_is_stored_as_null() {
    let env = TestEnv::new().await;
    env.register(intent("Acme", "a@acme.test", "")).await.unwrap();
    env.register(intent("Beta", "b@beta.test", "")).await.unwrap();

    let users = env
        .sqlite
        .find_auth_users(Some("a@acme.test"), None)
        .await
        .unwrap();
    assert_eq!(users[0].phone, None);
    assert_eq!(env.directory_rows("auth_users").await, 2);
}

#[tokio::test]
async fn duplicate_register_replays_first_outcome() {
    let env = TestEnv::new().await;

    let first = env.register(acme()).await.unwrap();
    let second = env.register(acme()).await.unwrap();

    assert!(second.replayed);
    assert_eq!(second.db_name, first.db_name);
    assert_eq!(second.tenant_user_id, first.tenant_user_id);
    assert_single_tenant_rows(&env, &first.db_name).await;
    assert_eq!(tenant_files(&env), 1);
}

#[tokio::test]
async fn colliding_company_is_rejected() {
    let env = TestEnv::new().await;
    env.register(acme()).await.unwrap();

    let err = env
        .register(intent("Acme", "b@acme.test", "1234567891"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert_eq!(err.status(), 409);
    assert!(err.public_message().contains("already"));

    assert_eq!(env.directory_rows("companies").await, 1);
    assert_eq!(env.directory_rows("auth_users").await, 1);
}

#[tokio::test]
async fn same_name_at_another_address_is_another_company() {
    let env = TestEnv::new().await;
    let first = env.register(acme()).await.unwrap();

    let mut elsewhere = intent("Acme", "b@acme.test", "");
    elsewhere.address = "2 Road".to_string();
    let second = env.register(elsewhere).await.unwrap();

    assert!(!second.replayed);
    assert_ne!(second.db_name, first.db_name);
    assert_eq!(env.directory_rows("companies").await, 2);
}

#[tokio::test]
async fn taken_email_rolls_back_the_company() {
    let env = TestEnv::new().await;
    env.register(acme()).await.unwrap();

    let err = env
        .register(intent("Beta", "a@acme.test", ""))
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::AlreadyExists("user")));
    assert_eq!(env.directory_rows("companies").await, 1);
    assert_eq!(env.directory_rows("auth_users").await, 1);
}

#[tokio::test]
async fn invalid_input_touches_nothing() {
    let env = TestEnv::new().await;

    let cases = [
        intent("", "a@acme.test", ""),
        intent("Acme", "not-an-email", ""),
        intent("Acme", "a@acme.test", "12345"),
        intent("Acme", "a@acme.test", "12345abcde"),
    ];
    for case in cases {
        let err = env.register(case).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    let mut no_password = acme();
    no_password.password = zeroize::Zeroizing::new(String::new());
    assert_eq!(
        env.register(no_password).await.unwrap_err().status(),
        400
    );

    assert_eq!(env.directory_rows("companies").await, 0);
    assert_eq!(tenant_files(&env), 0);
}

#[tokio::test]
async fn tenant_failure_compensates_directory() {
    let env = TestEnv::faulty(Faults {
        fail_tenant_commit: true,
        ..Default::default()
    })
    .await;

    let err = env.register(acme()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Dependency);

    assert_eq!(env.directory_rows("companies").await, 0);
    assert_eq!(env.directory_rows("auth_users").await, 0);
    // The tenant database stays behind for reconciliation.
    assert_eq!(tenant_files(&env), 1);
    assert!(env
        .cache
        .get(&register_key("Acme"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn failed_compensation_is_reported() {
    let env = TestEnv::faulty(Faults {
        fail_tenant_commit: true,
        directory_down_after_tenant_fault: true,
        ..Default::default()
    })
    .await;

    let err = env.register(acme()).await.unwrap_err();
    match &err {
        CrmError::CompensationFailed { original, .. } => {
            assert_eq!(original.kind(), ErrorKind::Dependency);
        }
        other => panic!("expected compensation failure, got {other:?}"),
    }
    assert_eq!(err.status(), 500);
    assert_eq!(err.public_message(), "internal error");

    // Left for reconciliation.
    assert_eq!(env.directory_rows("companies").await, 1);
    assert_eq!(env.directory_rows("auth_users").await, 1);
}

#[tokio::test]
async fn expired_deadline_stops_before_directory() {
    let env = TestEnv::faulty(Faults {
        slow_migrate: Some(Duration::from_secs(2)),
        ..Default::default()
    })
    .await;

    let deadline = Deadline::after(Duration::from_millis(200));
    let err = provisioner::register(&env.server, acme(), &deadline)
        .await
        .unwrap_err();
    assert!(matches!(err, CrmError::Timeout("migrate tenant")));
    assert_eq!(err.status(), 504);
    assert_eq!(env.directory_rows("companies").await, 0);
}

#[tokio::test]
async fn undecodable_fingerprint_is_a_miss() {
    let cache = Arc::new(MemoryCache::new());
    cache
        .set_if_absent(&register_key("Acme"), "{garbage", Ttl::from_secs(600).unwrap())
        .await
        .unwrap();
    let env = TestEnv::with_cache(cache.clone()).await;

    let registration = env.register(acme()).await.unwrap();
    assert!(!registration.replayed);
    assert_eq!(env.directory_rows("companies").await, 1);
    // First writer keeps the key.
    assert_eq!(
        cache.get(&register_key("Acme")).await.unwrap().as_deref(),
        Some("{garbage")
    );
}

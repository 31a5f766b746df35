use crm_mesh::CredentialMint;
use crm_proto::enrollment_service_server::EnrollmentService;
use crm_proto::login_service_server::LoginService;
use crm_proto::provisioning_service_server::ProvisioningService;
use crm_proto::{
    LoginRequest, RegisterCompanyRequest, RegisterUsersRequest, UserOutcome, UserToEnroll,
};
use ed25519_dalek::SigningKey;
use tonic::Request;

use super::common::*;

fn acme_request() -> RegisterCompanyRequest {
    RegisterCompanyRequest {
        name: "Acme".into(),
        address: "1 Road".into(),
        email: "a@acme.test".into(),
        phone: "1234567890".into(),
        password: PASSWORD.into(),
    }
}

fn login_request(password: &str) -> LoginRequest {
    LoginRequest {
        email: "a@acme.test".into(),
        phone: String::new(),
        password: password.into(),
    }
}

#[tokio::test]
async fn register_company_response() {
    let env = TestEnv::new().await;

    let response = env
        .server
        .register_company(env.authorized(acme_request()))
        .await
        .unwrap();
    let database = response.metadata().get("database").cloned().unwrap();
    let user_id = response.metadata().get("user-id").cloned().unwrap();
    let body = response.into_inner();

    assert_eq!(body.status, 200);
    assert_eq!(body.message, "company registered");
    assert_eq!(body.db_name.len(), 25);
    assert!(!body.user_company_id.is_empty());
    assert_eq!(database.to_str().unwrap(), body.db_name);
    assert_eq!(user_id.to_str().unwrap(), body.user_company_id);

    let replay = env
        .server
        .register_company(env.authorized(acme_request()))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(replay.status, 200);
    assert_eq!(replay.message, "company already registered");
    assert_eq!(replay.db_name, body.db_name);
    assert_eq!(replay.user_company_id, body.user_company_id);
}

#[tokio::test]
async fn domain_errors_travel_in_the_body() {
    let env = TestEnv::new().await;
    env.server
        .register_company(env.authorized(acme_request()))
        .await
        .unwrap();

    let mut colliding = acme_request();
    colliding.email = "b@acme.test".into();
    colliding.phone = "1234567891".into();
    let response = env
        .server
        .register_company(env.authorized(colliding))
        .await
        .unwrap();
    assert!(response.metadata().get("database").is_none());
    let body = response.into_inner();
    assert_eq!(body.status, 409);
    assert!(body.message.contains("already"));
    assert!(body.db_name.is_empty());

    let body = env
        .server
        .login_db(env.authorized(login_request("x")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(body.status, 404);
    assert!(body.db_name.is_empty());
}

#[tokio::test]
async fn login_db_response() {
    let env = TestEnv::new().await;
    let registered = env
        .server
        .register_company(env.authorized(acme_request()))
        .await
        .unwrap()
        .into_inner();

    let response = env
        .server
        .login_db(env.authorized(login_request(PASSWORD)))
        .await
        .unwrap();
    assert_eq!(
        response.metadata().get("database").unwrap().to_str().unwrap(),
        registered.db_name
    );
    let body = response.into_inner();
    assert_eq!(body.status, 200);
    assert_eq!(body.db_name, registered.db_name);
    assert_eq!(body.user_company_id, registered.user_company_id);
}

#[tokio::test]
async fn register_users_response() {
    let env = TestEnv::new().await;
    let registered = env
        .server
        .register_company(env.authorized(acme_request()))
        .await
        .unwrap()
        .into_inner();
    let db = crm_storage::DatabaseName::parse(&registered.db_name).unwrap();
    let company = env.acme_company(&db).await;
    let role = env.add_role(&db, "sales").await;

    let request = |email: &str| RegisterUsersRequest {
        company_id: company.to_string(),
        db_name: registered.db_name.clone(),
        users: vec![UserToEnroll {
            email: email.into(),
            phone: String::new(),
            role_id: role.to_string(),
        }],
    };

    let body = env
        .server
        .register_users_in_company(env.authorized(request("u1@acme.test")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(body.status, 200);
    assert_eq!(body.users.len(), 1);
    assert_eq!(body.users[0].outcome, UserOutcome::Created as i32);
    assert_eq!(body.users[0].password.len(), 16);

    let body = env
        .server
        .register_users_in_company(env.authorized(request("u1@acme.test")))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(body.users[0].outcome, UserOutcome::AlreadyEnrolled as i32);
    assert!(body.users[0].password.is_empty());

    let mut empty = request("u1@acme.test");
    empty.users.clear();
    let body = env
        .server
        .register_users_in_company(env.authorized(empty))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(body.status, 400);
    assert!(body.users.is_empty());
}

#[tokio::test]
async fn calls_without_a_valid_bearer_are_refused() {
    let env = TestEnv::new().await;

    let body = env
        .server
        .register_company(Request::new(acme_request()))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(body.status, 401);
    assert_eq!(env.directory_rows("companies").await, 0);

    let mut forged = Request::new(login_request(PASSWORD));
    forged
        .metadata_mut()
        .insert("authorization", "Bearer not.a.token".parse().unwrap());
    assert_eq!(
        env.server.login_db(forged).await.unwrap().into_inner().status,
        401
    );

    // Signed by a key this server does not trust.
    let stranger = CredentialMint::from_signing_key(&SigningKey::generate(&mut rand_core::OsRng))
        .unwrap();
    let mut request = Request::new(acme_request());
    request.metadata_mut().insert(
        "authorization",
        format!("Bearer {}", stranger.mint().unwrap()).parse().unwrap(),
    );
    let body = env.server.register_company(request).await.unwrap().into_inner();
    assert_eq!(body.status, 401);
    assert_eq!(env.directory_rows("companies").await, 0);

    let body = env
        .server
        .register_company(env.authorized(acme_request()))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(body.status, 200);
}

#[tokio::test]
async fn caller_deadline_is_honoured() {
    let env = TestEnv::faulty(Faults {
        slow_migrate: Some(std::time::Duration::from_secs(2)),
        ..Default::default()
    })
    .await;

    let mut request = env.authorized(acme_request());
    request
        .metadata_mut()
        .insert("grpc-timeout", "200m".parse().unwrap());
    let body = env.server.register_company(request).await.unwrap().into_inner();
    assert_eq!(body.status, 504);
    assert_eq!(body.message, "request timed out");
}

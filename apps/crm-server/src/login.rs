//! Resolves credentials to the caller's tenant database and tenant user.

use crm_crypto::{verify_password, CryptoError};
use crm_storage::{DatabaseName, StoreError, TenantUserId};
use zeroize::Zeroizing;

use crate::deadline::Deadline;
use crate::error::CrmError;
use crate::fingerprint::{login_identity, login_key, Envelope};
use crate::server::CrmServer;
use crate::validation;

pub struct Credentials {
    pub email: String,
    pub phone: String,
    pub password: Zeroizing<String>,
}

#[derive(Debug)]
pub struct Session {
    pub db_name: DatabaseName,
    pub tenant_user_id: TenantUserId,
    pub cached: bool,
}

pub async fn login(
    server: &CrmServer,
    credentials: Credentials,
    deadline: &Deadline,
) -> Result<Session, CrmError> {
    if credentials.email.is_empty() && credentials.phone.is_empty() {
        return Err(CrmError::InvalidRequest(
            "email or phone is required".to_string(),
        ));
    }
    validation::required("password", &credentials.password)?;

    let key = login_key(login_identity(&credentials.email, &credentials.phone));
    let proof = server.fingerprints.login_proof(&key, &credentials.password)?;
    if let Some(session) = cached(server, &key, &proof, deadline).await {
        return Ok(session);
    }

    let email = Some(credentials.email.as_str()).filter(|e| !e.is_empty());
    let phone = Some(credentials.phone.as_str()).filter(|p| !p.is_empty());
    let candidates = deadline
        .store(
            "auth user lookup",
            "user",
            server.store.find_auth_users(email, phone),
        )
        .await?;

    let mut matched = None;
    for candidate in candidates {
        let verified = deadline
            .run(
                "password verification",
                verify_password(&credentials.password, &candidate.password_hash),
            )
            .await?;
        match verified {
            Ok(true) => {
                matched = Some(candidate);
                break;
            }
            Ok(false) => {}
            Err(CryptoError::MalformedHash(err)) => {
                tracing::warn!(
                    auth_id = %candidate.id,
                    error = %err,
                    "skipping malformed password hash"
                );
            }
            Err(err) => return Err(err.into()),
        }
    }
    let user = matched.ok_or(CrmError::NotFound("user"))?;

    let db_name = deadline
        .store(
            "company lookup",
            "company",
            server.store.company_database(&user.company_id),
        )
        .await?
        .ok_or_else(|| {
            CrmError::Inconsistent(format!(
                "company {} of user {} missing",
                user.company_id, user.id
            ))
        })?;

    let tenant_user_id = match deadline
        .run(
            "tenant user lookup",
            server.store.find_tenant_user(&db_name, &user.id),
        )
        .await?
    {
        Ok(Some(id)) => id,
        Ok(None) | Err(StoreError::NotFound) => {
            return Err(CrmError::Inconsistent(format!(
                "user {} not enrolled in {db_name}",
                user.id
            )));
        }
        Err(err) => return Err(CrmError::store("tenant user", err)),
    };

    tracing::info!(auth_id = %user.id, db_name = %db_name, "login resolved");

    let envelope = Envelope::Login {
        db_name: db_name.to_string(),
        tenant_user_id: tenant_user_id.to_string(),
        proof,
    };
    server.fingerprints.publish(&key, &envelope, deadline).await;

    Ok(Session {
        db_name,
        tenant_user_id,
        cached: false,
    })
}

async fn cached(
    server: &CrmServer,
    key: &str,
    proof: &str,
    deadline: &Deadline,
) -> Option<Session> {
    let Envelope::Login {
        db_name,
        tenant_user_id,
        proof: cached_proof,
    } = server.fingerprints.lookup(key, deadline).await?
    else {
        return None;
    };
    if cached_proof != proof {
        return None;
    }
    match (DatabaseName::parse(&db_name), tenant_user_id.parse()) {
        (Ok(db_name), Ok(tenant_user_id)) => Some(Session {
            db_name,
            tenant_user_id,
            cached: true,
        }),
        _ => {
            tracing::warn!(key, "ignoring login fingerprint with malformed ids");
            None
        }
    }
}

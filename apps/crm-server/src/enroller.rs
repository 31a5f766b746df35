//! Batch enrollment of users into an existing tenant.
//!
//! The whole batch is staged in one directory transaction and one tenant transaction.
//! Directory commits first. If the tenant commit then fails, the logins this batch created
//! are deleted again, so callers never observe a partial batch.

use crm_crypto::{generate_temporary_password, hash_password};
use crm_storage::{
    AuthUserId, CompanyId, DatabaseName, DirectoryTxn, NewAuthUser, NewTenantUser, RightId,
    StoreError, TenantTxn,
};
use zeroize::Zeroizing;

use crate::compensation::DirectoryUndo;
use crate::deadline::Deadline;
use crate::error::CrmError;
use crate::server::CrmServer;
use crate::validation;

#[derive(Clone, Debug)]
pub struct Enrollee {
    pub email: String,
    pub phone: String,
    pub role_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// New login with a temporary password.
    Created,
    /// Existing login of this company added to the tenant.
    Linked,
    AlreadyEnrolled,
}

#[derive(Debug)]
pub struct Enrolled {
    pub email: String,
    pub phone: String,
    pub role_id: String,
    /// Plaintext temporary password, only for [`EnrollOutcome::Created`].
    pub password: Option<Zeroizing<String>>,
    pub outcome: EnrollOutcome,
}

pub async fn enroll(
    server: &CrmServer,
    company_id: &str,
    db_name: &str,
    users: Vec<Enrollee>,
    deadline: &Deadline,
) -> Result<Vec<Enrolled>, CrmError> {
    if users.is_empty() {
        return Err(CrmError::InvalidRequest("no users to enroll".to_string()));
    }
    let company_id: CompanyId = company_id
        .parse()
        .map_err(|_| CrmError::InvalidRequest("company_id is malformed".to_string()))?;
    let db_name = DatabaseName::parse(db_name)
        .map_err(|e| CrmError::InvalidRequest(format!("db_name: {e}")))?;
    let roles = users
        .iter()
        .map(|user| {
            validation::email(&user.email)?;
            validation::phone(&user.phone)?;
            user.role_id
                .parse::<RightId>()
                .map_err(|_| CrmError::InvalidRequest("role_id is malformed".to_string()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    // Hashed before the directory transaction so the write lock is not held through Argon2.
    let mut credentials = Vec::with_capacity(users.len());
    for _ in &users {
        credentials.push(TemporaryCredential::generate(deadline).await?);
    }

    let mut directory = deadline
        .store("begin directory", "directory", server.store.begin_directory())
        .await?;
    let company = deadline
        .store("company lookup", "company", directory.get_company(&company_id))
        .await?;
    if company.db_name != db_name {
        return Err(CrmError::NotFound("company"));
    }
    let mut tenant = deadline
        .store(
            "begin tenant",
            "tenant database",
            server.store.begin_tenant(&db_name),
        )
        .await?;

    let mut created = Vec::new();
    let mut results = Vec::with_capacity(users.len());
    for ((user, role_id), credential) in users.into_iter().zip(roles).zip(credentials) {
        let staged = stage(
            directory.as_mut(),
            tenant.as_mut(),
            company_id,
            &user,
            role_id,
            credential,
            deadline,
        )
        .await?;
        if let Some(auth_id) = staged.created {
            created.push(auth_id);
        }
        results.push(Enrolled {
            email: user.email,
            phone: user.phone,
            role_id: user.role_id,
            password: staged.password,
            outcome: staged.outcome,
        });
    }

    // Dropping `tenant` on failure rolls it back.
    deadline
        .store("commit directory", "directory", directory.commit())
        .await?;

    if let Err(err) = deadline
        .store("commit tenant", "tenant database", tenant.commit())
        .await
    {
        if created.is_empty() {
            return Err(err);
        }
        let undo = DirectoryUndo {
            auth_users: created,
            company: None,
        };
        return Err(undo
            .run(server.store.as_ref(), server.call_timeout, err)
            .await);
    }

    tracing::info!(
        company_id = %company_id,
        db_name = %db_name,
        enrolled = results.len(),
        created = created.len(),
        "users enrolled"
    );
    Ok(results)
}

/// Password for a login this batch may create, with its hash.
struct TemporaryCredential {
    password: Zeroizing<String>,
    hash: String,
}

impl TemporaryCredential {
    async fn generate(deadline: &Deadline) -> Result<Self, CrmError> {
        let password = Zeroizing::new(generate_temporary_password());
        let hash = deadline
            .run("password hashing", hash_password(&password))
            .await??;
        Ok(Self { password, hash })
    }
}

struct Staged {
    outcome: EnrollOutcome,
    created: Option<AuthUserId>,
    password: Option<Zeroizing<String>>,
}

async fn stage(
    directory: &mut dyn DirectoryTxn,
    tenant: &mut dyn TenantTxn,
    company_id: CompanyId,
    user: &Enrollee,
    rights_id: RightId,
    credential: TemporaryCredential,
    deadline: &Deadline,
) -> Result<Staged, CrmError> {
    let phone = validation::phone(&user.phone)?;
    let existing = deadline
        .store(
            "auth user lookup",
            "user",
            directory.find_auth_user(&user.email, phone),
        )
        .await?;

    if let Some(existing) = existing {
        if existing.company_id != company_id {
            return Err(CrmError::AlreadyExists("user"));
        }
        if existing.email != user.email {
            return Err(CrmError::AlreadyExists("phone"));
        }

        let enrolled = deadline
            .store(
                "tenant user lookup",
                "tenant user",
                tenant.find_user(&existing.id, &company_id),
            )
            .await?;
        if enrolled.is_some() {
            return Ok(Staged {
                outcome: EnrollOutcome::AlreadyEnrolled,
                created: None,
                password: None,
            });
        }

        insert_tenant_user(tenant, company_id, rights_id, existing.id, deadline).await?;
        return Ok(Staged {
            outcome: EnrollOutcome::Linked,
            created: None,
            password: None,
        });
    }

    let auth_id = deadline
        .store(
            "insert auth user",
            "user",
            directory.insert_auth_user(&NewAuthUser {
                email: user.email.clone(),
                phone: phone.map(str::to_string),
                password_hash: credential.hash,
                company_id,
            }),
        )
        .await?;
    insert_tenant_user(tenant, company_id, rights_id, auth_id, deadline).await?;

    Ok(Staged {
        outcome: EnrollOutcome::Created,
        created: Some(auth_id),
        password: Some(credential.password),
    })
}

async fn insert_tenant_user(
    tenant: &mut dyn TenantTxn,
    company_id: CompanyId,
    rights_id: RightId,
    auth_id: AuthUserId,
    deadline: &Deadline,
) -> Result<(), CrmError> {
    deadline
        .run(
            "insert tenant user",
            tenant.insert_user(&NewTenantUser {
                company_id,
                rights_id,
                auth_id,
            }),
        )
        .await?
        .map_err(|err| match err {
            StoreError::MissingReference => {
                CrmError::InvalidRequest("role_id is not a role of this tenant".to_string())
            }
            other => CrmError::store("tenant user", other),
        })?;
    Ok(())
}

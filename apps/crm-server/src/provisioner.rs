//! Tenant provisioning: a company, its own database and its first administrator.
//!
//! Steps run strictly in order:
//!
//! 1. fingerprint lookup (a matching replay returns the earlier result)
//! 2. random tenant database name
//! 3. create the database
//! 4. migrate it
//! 5. directory transaction: company + administrator login
//! 6. tenant transaction: administrator role, tenant user, capabilities
//! 7. publish the fingerprint
//!
//! A failure in steps 3–5 leaves no directory rows behind; the tenant database is never
//! dropped and is logged as orphaned instead. A failure in step 6 deletes the directory
//! rows written in step 5 (see [`DirectoryUndo`]).

use crm_crypto::{generate_database_name, hash_password};
use crm_storage::{
    AuthUserId, Capabilities, CompanyId, DatabaseCreation, DatabaseName, NewAuthUser,
    NewCompany, NewTenantUser, TenantUserId,
};
use zeroize::Zeroizing;

use crate::compensation::DirectoryUndo;
use crate::deadline::Deadline;
use crate::error::CrmError;
use crate::fingerprint::{intent_digest, register_key, Envelope};
use crate::server::CrmServer;
use crate::validation;

pub struct RegistrationIntent {
    pub company_name: String,
    pub address: String,
    pub email: String,
    pub phone: String,
    pub password: Zeroizing<String>,
}

impl RegistrationIntent {
    fn validate(&self) -> Result<(), CrmError> {
        validation::required("name", &self.company_name)?;
        validation::required("address", &self.address)?;
        validation::email(&self.email)?;
        validation::phone(&self.phone)?;
        validation::required("password", &self.password)?;
        Ok(())
    }

    fn digest(&self) -> String {
        intent_digest(&self.company_name, &self.address, &self.email, &self.phone)
    }
}

#[derive(Debug)]
pub struct Registration {
    pub db_name: DatabaseName,
    pub tenant_user_id: TenantUserId,
    /// Served from the fingerprint cache.
    pub replayed: bool,
}

pub async fn register(
    server: &CrmServer,
    intent: RegistrationIntent,
    deadline: &Deadline,
) -> Result<Registration, CrmError> {
    intent.validate()?;

    let key = register_key(&intent.company_name);
    let digest = intent.digest();
    if let Some(replay) = replay(server, &key, &digest, deadline).await {
        tracing::info!(
            company = %intent.company_name,
            db_name = %replay.db_name,
            "registration replayed"
        );
        return Ok(replay);
    }

    let db_name = DatabaseName::parse(&generate_database_name())
        .map_err(|e| CrmError::Inconsistent(format!("generated database name: {e}")))?;

    if let Err(err) = prepare_tenant(server, &db_name, deadline).await {
        tracing::warn!(db_name = %db_name, error = %err, "tenant database orphaned");
        return Err(err);
    }

    let password_hash = deadline
        .run("password hashing", hash_password(&intent.password))
        .await??;

    let (company_id, auth_id) =
        match write_directory(server, &intent, &db_name, password_hash, deadline).await {
            Ok(ids) => ids,
            Err(err) => {
                tracing::warn!(db_name = %db_name, error = %err, "tenant database orphaned");
                return Err(err);
            }
        };

    let tenant_user_id = match write_tenant(server, &db_name, company_id, auth_id, deadline).await
    {
        Ok(id) => id,
        Err(err) => {
            let undo = DirectoryUndo {
                auth_users: vec![auth_id],
                company: Some(company_id),
            };
            return Err(undo
                .run(server.store.as_ref(), server.call_timeout, err)
                .await);
        }
    };

    tracing::info!(
        company_id = %company_id,
        auth_id = %auth_id,
        db_name = %db_name,
        "company registered"
    );

    let envelope = Envelope::Registration {
        company_name: intent.company_name.clone(),
        db_name: db_name.to_string(),
        tenant_user_id: tenant_user_id.to_string(),
        intent_digest: digest,
    };
    server.fingerprints.publish(&key, &envelope, deadline).await;

    Ok(Registration {
        db_name,
        tenant_user_id,
        replayed: false,
    })
}

/// A cached registration counts only when it was made for the same intent.
async fn replay(
    server: &CrmServer,
    key: &str,
    digest: &str,
    deadline: &Deadline,
) -> Option<Registration> {
    let Envelope::Registration {
        db_name,
        tenant_user_id,
        intent_digest,
        ..
    } = server.fingerprints.lookup(key, deadline).await?
    else {
        tracing::warn!(key, "fingerprint of another kind under registration key");
        return None;
    };

    if intent_digest != digest {
        tracing::debug!(key, "fingerprint belongs to a different registration");
        return None;
    }

    match (DatabaseName::parse(&db_name), tenant_user_id.parse()) {
        (Ok(db_name), Ok(tenant_user_id)) => Some(Registration {
            db_name,
            tenant_user_id,
            replayed: true,
        }),
        _ => {
            tracing::warn!(key, "ignoring fingerprint with malformed ids");
            None
        }
    }
}

async fn prepare_tenant(
    server: &CrmServer,
    db_name: &DatabaseName,
    deadline: &Deadline,
) -> Result<(), CrmError> {
    let creation = deadline
        .store(
            "create database",
            "tenant database",
            server.store.create_database(db_name),
        )
        .await?;
    if creation == DatabaseCreation::AlreadyPresent {
        tracing::warn!(db_name = %db_name, "tenant database already present");
    }

    let outcome = deadline
        .store(
            "migrate tenant",
            "tenant database",
            server.store.migrate_tenant(db_name),
        )
        .await?;
    tracing::debug!(db_name = %db_name, changed = outcome.changed(), "tenant migrated");
    Ok(())
}

async fn write_directory(
    server: &CrmServer,
    intent: &RegistrationIntent,
    db_name: &DatabaseName,
    password_hash: String,
    deadline: &Deadline,
) -> Result<(CompanyId, AuthUserId), CrmError> {
    let mut txn = deadline
        .store("begin directory", "directory", server.store.begin_directory())
        .await?;

    let existing = deadline
        .store(
            "company lookup",
            "company",
            txn.find_company(&intent.company_name, &intent.address),
        )
        .await?;
    if existing.is_some() {
        if let Err(err) = txn.rollback().await {
            tracing::warn!(error = %err, "directory rollback failed");
        }
        return Err(CrmError::AlreadyExists("company"));
    }

    let company_id = deadline
        .store(
            "insert company",
            "company",
            txn.insert_company(&NewCompany {
                name: intent.company_name.clone(),
                address: intent.address.clone(),
                db_name: db_name.clone(),
            }),
        )
        .await?;

    let auth_id = deadline
        .store(
            "insert auth user",
            "user",
            txn.insert_auth_user(&NewAuthUser {
                email: intent.email.clone(),
                phone: validation::phone(&intent.phone)?.map(str::to_string),
                password_hash,
                company_id,
            }),
        )
        .await?;

    deadline
        .store("commit directory", "directory", txn.commit())
        .await?;
    Ok((company_id, auth_id))
}

async fn write_tenant(
    server: &CrmServer,
    db_name: &DatabaseName,
    company_id: CompanyId,
    auth_id: AuthUserId,
    deadline: &Deadline,
) -> Result<TenantUserId, CrmError> {
    let mut txn = deadline
        .store("begin tenant", "tenant database", server.store.begin_tenant(db_name))
        .await?;

    let rights_id = deadline
        .store("insert right", "role", txn.insert_right(&server.first_role))
        .await?;
    let tenant_user_id = deadline
        .store(
            "insert tenant user",
            "tenant user",
            txn.insert_user(&NewTenantUser {
                company_id,
                rights_id,
                auth_id,
            }),
        )
        .await?;
    deadline
        .store(
            "insert actions",
            "role",
            txn.insert_available_actions(&rights_id, Capabilities::all()),
        )
        .await?;

    deadline
        .store("commit tenant", "tenant database", txn.commit())
        .await?;
    Ok(tenant_user_id)
}

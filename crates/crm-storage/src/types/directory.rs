//! Directory database records.

use super::ids::{AuthUserId, CompanyId, DatabaseName};

/// Parameters for inserting a company.
#[derive(Clone, Debug)]
pub struct NewCompany {
    pub name: String,
    pub address: String,
    pub db_name: DatabaseName,
}

/// Parameters for inserting a directory user.
#[derive(Clone, Debug)]
pub struct NewAuthUser {
    pub email: String,
    pub phone: Option<String>, // None when the caller supplied no phone
    pub password_hash: String, // PHC string, never plaintext
    pub company_id: CompanyId,
}

/// Directory user record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub id: AuthUserId,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub company_id: CompanyId,
}

/// Company record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub address: String,
    pub db_name: DatabaseName,
}

//! Tenant database records.

use super::ids::{AuthUserId, CompanyId, RightId};

/// Parameters for inserting a tenant user.
#[derive(Clone, Debug)]
pub struct NewTenantUser {
    pub company_id: CompanyId,
    pub rights_id: RightId,
    pub auth_id: AuthUserId,
}

/// Capability flags granted to a role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub create_tasks: bool,
    pub create_chats: bool,
    pub add_workers: bool,
}

impl Capabilities {
    /// Every capability switched on (tenant administrator).
    pub fn all() -> Self {
        Self {
            create_tasks: true,
            create_chats: true,
            add_workers: true,
        }
    }
}

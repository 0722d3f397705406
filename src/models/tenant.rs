//! Tenant and user models
//!
//! The engines take the target tenant and the initiating user as explicit
//! parameters; these are the shapes they are passed around in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TenantId, UserId};

/// A tenant of the multi-tenant ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Storage-assigned row id
    pub row_id: i64,
    /// Stable public identifier
    pub public_id: TenantId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A user belonging to a tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Storage-assigned row id
    pub row_id: i64,
    /// Stable public identifier
    pub public_id: UserId,
    pub tenant_row_id: i64,
    pub email: String,
    pub name: String,
}

impl User {
    /// Whether a portable user record describes this user
    ///
    /// Matches on public id first, then on a case-insensitive email, so the
    /// initiator is recognised in archives produced by another tenant.
    pub fn matches_record(&self, public_id: Option<&str>, email: Option<&str>) -> bool {
        if public_id == Some(self.public_id.to_uuid_string().as_str()) {
            return true;
        }
        email.is_some_and(|e| e.eq_ignore_ascii_case(&self.email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        User {
            row_id: 7,
            public_id: UserId::new(),
            tenant_row_id: 1,
            email: "Owner@Example.com".into(),
            name: "Owner".into(),
        }
    }

    #[test]
    fn test_matches_by_public_id() {
        let user = user();
        let id = user.public_id.to_uuid_string();
        assert!(user.matches_record(Some(&id), None));
    }

    #[test]
    fn test_matches_by_email_case_insensitive() {
        let user = user();
        assert!(user.matches_record(Some("other"), Some("owner@example.com")));
        assert!(!user.matches_record(Some("other"), Some("someone@example.com")));
        assert!(!user.matches_record(None, None));
    }
}

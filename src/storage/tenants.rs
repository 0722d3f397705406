//! Tenant and user directory
//!
//! Lookups the engines and the CLI need to turn identifiers into the
//! explicit tenant/user context passed to every engine call.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{VaultError, VaultResult};
use crate::models::{Tenant, TenantId, User, UserId};

/// Repository for tenants
pub struct TenantRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TenantRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a tenant with a fresh public id
    pub fn create(&self, name: &str) -> VaultResult<Tenant> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VaultError::Config("Tenant name cannot be empty".into()));
        }
        let public_id = TenantId::new();
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO tenants (public_id, name, created_at) VALUES (?1, ?2, ?3)",
            params![public_id.to_uuid_string(), name, created_at.to_rfc3339()],
        )?;

        Ok(Tenant {
            row_id: self.conn.last_insert_rowid(),
            public_id,
            name: name.to_string(),
            created_at,
        })
    }

    pub fn get(&self, row_id: i64) -> VaultResult<Option<Tenant>> {
        self.query_one("id = ?1", &row_id)
    }

    pub fn get_by_public_id(&self, public_id: TenantId) -> VaultResult<Option<Tenant>> {
        self.query_one("public_id = ?1", &public_id.to_uuid_string())
    }

    /// Resolve a tenant by public id (full or prefixed) or exact name
    pub fn find(&self, identifier: &str) -> VaultResult<Tenant> {
        if let Ok(id) = identifier.parse::<TenantId>() {
            if let Some(tenant) = self.get_by_public_id(id)? {
                return Ok(tenant);
            }
        }
        self.query_one("name = ?1", &identifier)?
            .ok_or_else(|| VaultError::tenant_not_found(identifier))
    }

    pub fn list(&self) -> VaultResult<Vec<Tenant>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, public_id, name, created_at FROM tenants ORDER BY name")?;
        let rows = stmt
            .query_map([], raw_tenant)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_tenant).collect()
    }

    fn query_one(&self, predicate: &str, value: &dyn rusqlite::ToSql) -> VaultResult<Option<Tenant>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT id, public_id, name, created_at FROM tenants WHERE {predicate}"),
                [value],
                raw_tenant,
            )
            .optional()?;
        raw.map(into_tenant).transpose()
    }
}

type RawTenant = (i64, String, String, String);

fn raw_tenant(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTenant> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_tenant((row_id, public_id, name, created_at): RawTenant) -> VaultResult<Tenant> {
    Ok(Tenant {
        row_id,
        public_id: TenantId::parse(&public_id)
            .map_err(|e| VaultError::Database(format!("Invalid tenant id: {}", e)))?,
        name,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| VaultError::Database(format!("Invalid tenant timestamp: {}", e)))?,
    })
}

/// Repository for users
pub struct UserRepository<'a> {
    conn: &'a Connection,
}

impl<'a> UserRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Create a user in a tenant with a fresh public id
    pub fn create(&self, tenant: &Tenant, email: &str, name: &str) -> VaultResult<User> {
        let public_id = UserId::new();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO users (public_id, tenant_id, email, name, role, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, 'owner', ?5, ?5)",
                params![public_id.to_uuid_string(), tenant.row_id, email, name, now],
            )
            .map_err(|e| VaultError::Database(format!("Failed to create user {}: {}", email, e)))?;

        Ok(User {
            row_id: self.conn.last_insert_rowid(),
            public_id,
            tenant_row_id: tenant.row_id,
            email: email.to_string(),
            name: name.to_string(),
        })
    }

    pub fn get(&self, row_id: i64) -> VaultResult<Option<User>> {
        self.query_one("id = ?1", &row_id)
    }

    /// Look a user up by email within one tenant
    pub fn get_by_email(&self, tenant: &Tenant, email: &str) -> VaultResult<Option<User>> {
        let raw = self
            .conn
            .query_row(
                "SELECT id, public_id, tenant_id, email, name FROM users \
                 WHERE tenant_id = ?1 AND email = ?2 COLLATE NOCASE AND deleted_at IS NULL",
                params![tenant.row_id, email],
                raw_user,
            )
            .optional()?;
        raw.map(into_user).transpose()
    }

    /// Resolve a user by email within a tenant, failing if absent
    pub fn find(&self, tenant: &Tenant, email: &str) -> VaultResult<User> {
        self.get_by_email(tenant, email)?
            .ok_or_else(|| VaultError::user_not_found(email))
    }

    fn query_one(&self, predicate: &str, value: &dyn rusqlite::ToSql) -> VaultResult<Option<User>> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT id, public_id, tenant_id, email, name FROM users WHERE {predicate}"),
                [value],
                raw_user,
            )
            .optional()?;
        raw.map(into_user).transpose()
    }
}

type RawUser = (i64, String, i64, String, String);

fn raw_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawUser> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_user((row_id, public_id, tenant_row_id, email, name): RawUser) -> VaultResult<User> {
    Ok(User {
        row_id,
        public_id: UserId::parse(&public_id)
            .map_err(|e| VaultError::Database(format!("Invalid user id: {}", e)))?,
        tenant_row_id,
        email,
        name,
    })
}

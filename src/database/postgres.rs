// ABOUTME: PostgreSQL store backing the directory, feature flag and audit writer traits
// ABOUTME: Owns only the audit_logs DDL; every other table is managed by the API server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Nixopus

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{AccessDirectory, AuditWriter, FeatureFlagStore, UserDirectory};
use crate::errors::{AppError, AppResult};
use nixopus_core::constants::limits::BACKEND_CALL_TIMEOUT_SECS;
use nixopus_core::models::{Action, AuditRecord, Membership, PermissionSet, Principal};

/// Maximum pooled connections
const MAX_CONNECTIONS: u32 = 16;

/// `PostgreSQL` store
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

fn db_error(operation: &str, e: &sqlx::Error) -> AppError {
    AppError::database(format!("{operation} failed: {e}"))
}

fn principal_from_row(row: &PgRow) -> Result<Principal, sqlx::Error> {
    let email: String = row.try_get("email")?;
    let username: Option<String> = row.try_get("username")?;
    Ok(Principal {
        user_id: row.try_get("id")?,
        display_name: display_name(username, &email),
        email,
        primary_org_id: row.try_get("primary_org_id")?,
    })
}

/// Users created through invitations may have no username yet
fn display_name(username: Option<String>, email: &str) -> String {
    username
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| email.to_owned())
}

impl PostgresStore {
    /// Connect a pool to `database_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(BACKEND_CALL_TIMEOUT_SECS))
            .connect(database_url)
            .await
            .map_err(|e| db_error("connect", &e))?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create `audit_logs` and its indexes if absent
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails
    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS audit_logs (
                id UUID PRIMARY KEY,
                user_id UUID NOT NULL,
                organization_id UUID,
                action TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id UUID,
                old_values JSONB,
                new_values JSONB,
                metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
                ip_address TEXT,
                user_agent TEXT,
                request_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create audit_logs", &e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_org_created ON audit_logs(organization_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create audit_logs org index", &e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_request_id ON audit_logs(request_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("create audit_logs request index", &e))?;

        debug!("audit_logs schema verified");
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for PostgresStore {
    async fn find_by_email(&self, email: &str) -> AppResult<Option<Principal>> {
        let row = sqlx::query(
            r"
            SELECT u.id, u.email, u.username,
                   (SELECT ou.organization_id
                      FROM organization_users ou
                     WHERE ou.user_id = u.id AND ou.deleted_at IS NULL
                     ORDER BY ou.created_at ASC
                     LIMIT 1) AS primary_org_id
            FROM users u
            WHERE LOWER(u.email) = LOWER($1)
            ",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("find user by email", &e))?;

        row.map(|row| principal_from_row(&row))
            .transpose()
            .map_err(|e| db_error("decode user", &e))
    }
}

#[async_trait]
impl AccessDirectory for PostgresStore {
    async fn membership(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> AppResult<Option<Membership>> {
        let row = sqlx::query(
            r"
            SELECT role_id, created_at
            FROM organization_users
            WHERE user_id = $1 AND organization_id = $2 AND deleted_at IS NULL
            ",
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("load membership", &e))?;

        row.map(|row| -> Result<Membership, sqlx::Error> {
            let joined_at: DateTime<Utc> = row.try_get("created_at")?;
            Ok(Membership {
                user_id,
                organization_id,
                role_id: row.try_get("role_id")?,
                joined_at,
            })
        })
        .transpose()
        .map_err(|e| db_error("decode membership", &e))
    }

    async fn permissions(&self, user_id: Uuid, organization_id: Uuid) -> AppResult<PermissionSet> {
        let rows = sqlx::query(
            r"
            SELECT p.resource, p.name AS action
            FROM organization_users ou
            JOIN role_permissions rp ON rp.role_id = ou.role_id
            JOIN permissions p ON p.id = rp.permission_id
            WHERE ou.user_id = $1 AND ou.organization_id = $2 AND ou.deleted_at IS NULL
            ",
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("load permissions", &e))?;

        let mut permissions = PermissionSet::new();
        for row in rows {
            let resource: String = row
                .try_get("resource")
                .map_err(|e| db_error("decode permission", &e))?;
            let action: String = row
                .try_get("action")
                .map_err(|e| db_error("decode permission", &e))?;
            match Action::from_str(&action) {
                Ok(action) => permissions.grant(resource.to_lowercase(), action),
                Err(e) => warn!(%resource, error = %e, "Ignoring unknown permission action"),
            }
        }
        Ok(permissions)
    }
}

#[async_trait]
impl FeatureFlagStore for PostgresStore {
    async fn is_enabled(&self, organization_id: Uuid, feature: &str) -> AppResult<bool> {
        let enabled: Option<bool> = sqlx::query_scalar(
            r"
            SELECT is_enabled
            FROM feature_flags
            WHERE organization_id = $1 AND feature_name = $2
            ",
        )
        .bind(organization_id)
        .bind(feature)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("load feature flag", &e))?;

        Ok(enabled.unwrap_or(true))
    }
}

#[async_trait]
impl AuditWriter for PostgresStore {
    async fn write_batch(&self, records: &[AuditRecord]) -> AppResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO audit_logs (id, user_id, organization_id, action, resource_type, \
             resource_id, old_values, new_values, metadata, ip_address, user_agent, \
             request_id, created_at) ",
        );

        builder.push_values(records, |mut row, record| {
            row.push_bind(record.id)
                .push_bind(record.user_id)
                .push_bind(record.organization_id)
                .push_bind(record.action.as_str())
                .push_bind(&record.resource_type)
                .push_bind(record.resource_id)
                .push_bind(&record.old_values)
                .push_bind(&record.new_values)
                .push_bind(record.persisted_metadata())
                .push_bind(&record.ip_address)
                .push_bind(&record.user_agent)
                .push_bind(record.request_id)
                .push_bind(record.created_at);
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("insert audit batch", &e))?;

        Ok(())
    }
}

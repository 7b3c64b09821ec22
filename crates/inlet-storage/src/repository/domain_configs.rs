//! Inbound domain configuration repository

use crate::db::{db_error, DatabasePool};
use crate::models::InboundDomainConfig;
use async_trait::async_trait;
use inlet_common::types::DomainId;
use inlet_common::{Error, Result};

/// Inbound domain configuration repository trait
#[async_trait]
pub trait InboundDomainConfigRepository: Send + Sync {
    async fn get(&self, domain_id: DomainId) -> Result<Option<InboundDomainConfig>>;

    /// Create the config or update its expected MX target. Changing the
    /// target resets the verification state.
    async fn upsert(&self, domain_id: DomainId, mx_target: &str) -> Result<InboundDomainConfig>;

    /// Record the outcome of an MX check
    async fn record_verification(
        &self,
        domain_id: DomainId,
        mx_verified: bool,
        last_error: &str,
    ) -> Result<()>;

    /// Configs whose MX has not been verified yet, least recently checked first
    async fn list_unverified(&self, limit: i64) -> Result<Vec<InboundDomainConfig>>;
}

/// Database inbound domain configuration repository
pub struct DbInboundDomainConfigRepository {
    pool: DatabasePool,
}

impl DbInboundDomainConfigRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InboundDomainConfigRepository for DbInboundDomainConfigRepository {
    async fn get(&self, domain_id: DomainId) -> Result<Option<InboundDomainConfig>> {
        sqlx::query_as::<_, InboundDomainConfig>(
            "SELECT * FROM inbound_domain_configs WHERE domain_id = $1",
        )
        .bind(domain_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn upsert(&self, domain_id: DomainId, mx_target: &str) -> Result<InboundDomainConfig> {
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO inbound_domain_configs
                (domain_id, mx_target, mx_verified, last_error, checked_at, created_at, updated_at)
            VALUES ($1, $2, false, '', NULL, $3, $3)
            ON CONFLICT (domain_id) DO UPDATE SET
                mx_verified = CASE
                    WHEN inbound_domain_configs.mx_target = EXCLUDED.mx_target
                    THEN inbound_domain_configs.mx_verified
                    ELSE false
                END,
                mx_target = EXCLUDED.mx_target,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(domain_id)
        .bind(mx_target)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        self.get(domain_id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to upsert inbound domain config".to_string()))
    }

    async fn record_verification(
        &self,
        domain_id: DomainId,
        mx_verified: bool,
        last_error: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE inbound_domain_configs
            SET mx_verified = $2, last_error = $3, checked_at = $4, updated_at = $4
            WHERE domain_id = $1
            "#,
        )
        .bind(domain_id)
        .bind(mx_verified)
        .bind(last_error)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "inbound config for domain {}",
                domain_id
            )));
        }
        Ok(())
    }

    async fn list_unverified(&self, limit: i64) -> Result<Vec<InboundDomainConfig>> {
        sqlx::query_as::<_, InboundDomainConfig>(
            r#"
            SELECT * FROM inbound_domain_configs
            WHERE mx_verified = false
            ORDER BY checked_at ASC NULLS FIRST, domain_id ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }
}

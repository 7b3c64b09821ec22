//! Domain repository

use crate::db::{db_error, DatabasePool};
use crate::models::{CreateDomain, Domain};
use async_trait::async_trait;
use inlet_common::types::{normalize_host, DomainId};
use inlet_common::{Error, Result};
use uuid::Uuid;

/// Domain repository trait
#[async_trait]
pub trait DomainRepository: Send + Sync {
    async fn create(&self, input: CreateDomain) -> Result<Domain>;
    async fn get(&self, id: DomainId) -> Result<Option<Domain>>;
    /// Look up a domain by its normalized name (cross-owner, used for mail routing)
    async fn get_by_name(&self, name: &str) -> Result<Option<Domain>>;
}

/// Database domain repository
pub struct DbDomainRepository {
    pool: DatabasePool,
}

impl DbDomainRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DomainRepository for DbDomainRepository {
    async fn create(&self, input: CreateDomain) -> Result<Domain> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO domains (id, user_id, name, verified, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(input.user_id)
        .bind(normalize_host(&input.name))
        .bind(input.verified)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to create domain".to_string()))
    }

    async fn get(&self, id: DomainId) -> Result<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Domain>> {
        sqlx::query_as::<_, Domain>("SELECT * FROM domains WHERE name = $1")
            .bind(normalize_host(name))
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }
}

//! Recipient rule repository

use crate::db::{db_error, DatabasePool};
use crate::models::{CreateRecipientRule, InboundRecipientRule};
use async_trait::async_trait;
use inlet_common::types::{normalize_local_part, DomainId};
use inlet_common::{Error, Result};
use uuid::Uuid;

/// Recipient rule repository trait
#[async_trait]
pub trait RecipientRuleRepository: Send + Sync {
    async fn create(&self, input: CreateRecipientRule) -> Result<InboundRecipientRule>;

    /// Active rules of a domain: exact rules first, then by creation time
    async fn list_active(&self, domain_id: DomainId) -> Result<Vec<InboundRecipientRule>>;
}

/// Database recipient rule repository
pub struct DbRecipientRuleRepository {
    pool: DatabasePool,
}

impl DbRecipientRuleRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientRuleRepository for DbRecipientRuleRepository {
    async fn create(&self, input: CreateRecipientRule) -> Result<InboundRecipientRule> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query_as::<_, InboundRecipientRule>(
            r#"
            INSERT INTO inbound_recipient_rules
                (id, domain_id, rule_type, pattern, action, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.domain_id)
        .bind(input.rule_type.as_str())
        .bind(normalize_local_part(&input.pattern))
        .bind(input.action.as_str())
        .bind(input.is_active)
        .bind(now)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)?
        .ok_or_else(|| Error::Internal("Failed to create recipient rule".to_string()))
    }

    async fn list_active(&self, domain_id: DomainId) -> Result<Vec<InboundRecipientRule>> {
        sqlx::query_as::<_, InboundRecipientRule>(
            r#"
            SELECT * FROM inbound_recipient_rules
            WHERE domain_id = $1 AND is_active = true
            ORDER BY CASE WHEN rule_type = 'exact' THEN 0 ELSE 1 END, created_at ASC, id ASC
            "#,
        )
        .bind(domain_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }
}

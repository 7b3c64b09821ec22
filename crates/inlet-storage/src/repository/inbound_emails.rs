//! Inbound email repository

use crate::db::{db_error, DatabasePool};
use crate::models::{InboundEmail, NewInboundEmail};
use async_trait::async_trait;
use inlet_common::types::InboundEmailId;
use inlet_common::Result;

/// Inbound email repository trait
#[async_trait]
pub trait InboundEmailRepository: Send + Sync {
    /// Write the email row, its raw source and its attachments atomically.
    ///
    /// A duplicate delivery surfaces as [`inlet_common::Error::Conflict`] and
    /// leaves nothing behind.
    async fn create(&self, input: NewInboundEmail) -> Result<InboundEmail>;

    async fn get(&self, id: InboundEmailId) -> Result<Option<InboundEmail>>;
}

/// Database inbound email repository
pub struct DbInboundEmailRepository {
    pool: DatabasePool,
}

impl DbInboundEmailRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InboundEmailRepository for DbInboundEmailRepository {
    async fn create(&self, input: NewInboundEmail) -> Result<InboundEmail> {
        let (email, raw, attachments) = input.into_rows(chrono::Utc::now());
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO inbound_emails (
                id, user_id, domain_id, recipient, sender, subject,
                text_body, html_body, message_id, is_read, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, false, $10)
            "#,
        )
        .bind(email.id)
        .bind(email.user_id)
        .bind(email.domain_id)
        .bind(&email.recipient)
        .bind(&email.sender)
        .bind(&email.subject)
        .bind(&email.text_body)
        .bind(&email.html_body)
        .bind(&email.message_id)
        .bind(email.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        if let Some(raw) = &raw {
            sqlx::query(
                r#"
                INSERT INTO inbound_email_raws (inbound_email_id, raw_source, blob_key, created_at)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(raw.inbound_email_id)
            .bind(&raw.raw_source)
            .bind(&raw.blob_key)
            .bind(raw.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        for attachment in &attachments {
            sqlx::query(
                r#"
                INSERT INTO inbound_email_attachments (
                    id, inbound_email_id, file_name, content_type,
                    size_bytes, content, blob_key, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(attachment.id)
            .bind(attachment.inbound_email_id)
            .bind(&attachment.file_name)
            .bind(&attachment.content_type)
            .bind(attachment.size_bytes)
            .bind(&attachment.content)
            .bind(&attachment.blob_key)
            .bind(attachment.created_at)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(email)
    }

    async fn get(&self, id: InboundEmailId) -> Result<Option<InboundEmail>> {
        sqlx::query_as::<_, InboundEmail>("SELECT * FROM inbound_emails WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }
}

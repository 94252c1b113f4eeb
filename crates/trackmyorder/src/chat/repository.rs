//! SQLite-backed conversation repository.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, instrument};
use trackmyorder_protocol::{Conversation, ConversationStatus, Message, TrackingId};

use super::models::{ConversationFilter, ConversationRow, MessageRow};
use super::store::{ConversationStore, StoreError, StoreResult, now_millis};

const CONVERSATION_COLUMNS: &str = r#"
    tracking_id, customer_name, customer_email, status, is_unread_by_admin,
    last_message_at, created_at, updated_at
"#;

/// Repository for conversation database operations.
#[derive(Debug, Clone)]
pub struct ConversationRepository {
    pool: SqlitePool,
}

impl ConversationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Row and messages read in one transaction, so the snapshot is consistent.
    async fn load(&self, id: &TrackingId) -> StoreResult<Option<Conversation>> {
        let mut tx = self.pool.begin().await?;
        let conversation = load_in(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(conversation)
    }
}

async fn fetch_row(
    conn: &mut SqliteConnection,
    id: &TrackingId,
) -> StoreResult<Option<ConversationRow>> {
    let sql = format!(
        "SELECT {} FROM conversations WHERE tracking_id = ?",
        CONVERSATION_COLUMNS
    );
    let row = sqlx::query_as::<_, ConversationRow>(&sql)
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

async fn fetch_messages(conn: &mut SqliteConnection, id: &TrackingId) -> StoreResult<Vec<Message>> {
    let rows = sqlx::query_as::<_, MessageRow>(
        r#"
        SELECT tracking_id, sender, message, timestamp, admin_id, admin_name
        FROM conversation_messages
        WHERE tracking_id = ?
        ORDER BY seq ASC
        "#,
    )
    .bind(id.as_str())
    .fetch_all(&mut *conn)
    .await?;

    rows.into_iter().map(MessageRow::into_message).collect()
}

async fn load_in(conn: &mut SqliteConnection, id: &TrackingId) -> StoreResult<Option<Conversation>> {
    let Some(row) = fetch_row(conn, id).await? else {
        return Ok(None);
    };
    let messages = fetch_messages(conn, id).await?;
    row.into_conversation(messages).map(Some)
}

async fn load_existing_in(conn: &mut SqliteConnection, id: &TrackingId) -> StoreResult<Conversation> {
    load_in(conn, id)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.clone()))
}

#[async_trait]
impl ConversationStore for ConversationRepository {
    #[instrument(skip(self))]
    async fn find_by_tracking_id(&self, id: &TrackingId) -> StoreResult<Option<Conversation>> {
        self.load(id).await
    }

    #[instrument(skip(self, customer_email))]
    async fn find_or_create(
        &self,
        id: &TrackingId,
        customer_name: &str,
        customer_email: Option<&str>,
    ) -> StoreResult<Conversation> {
        let now = now_millis().timestamp_millis();
        let email = customer_email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty());

        let mut tx = self.pool.begin().await?;

        // The primary key makes concurrent creates collapse into one row.
        let result = sqlx::query(
            r#"
            INSERT INTO conversations
                (tracking_id, customer_name, customer_email, status, is_unread_by_admin,
                 last_message_at, created_at, updated_at)
            VALUES (?, ?, ?, 'active', 0, ?, ?, ?)
            ON CONFLICT(tracking_id) DO NOTHING
            "#,
        )
        .bind(id.as_str())
        .bind(customer_name.trim())
        .bind(&email)
        .bind(now)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() > 0 {
            debug!("Created conversation {}", id);
        }

        let conversation = load_existing_in(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(conversation)
    }

    #[instrument(skip(self, message), fields(sender = %message.sender))]
    async fn append_message(
        &self,
        id: &TrackingId,
        message: &Message,
        unread_by_admin: bool,
    ) -> StoreResult<Conversation> {
        let timestamp = message.timestamp.timestamp_millis();

        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE conversations
            SET last_message_at = ?, is_unread_by_admin = ?, updated_at = ?
            WHERE tracking_id = ?
            "#,
        )
        .bind(timestamp)
        .bind(unread_by_admin)
        .bind(timestamp)
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(id.clone()));
        }

        sqlx::query(
            r#"
            INSERT INTO conversation_messages
                (tracking_id, sender, message, timestamp, admin_id, admin_name)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.as_str())
        .bind(message.sender.as_str())
        .bind(&message.message)
        .bind(timestamp)
        .bind(&message.admin_id)
        .bind(&message.admin_name)
        .execute(&mut *tx)
        .await?;

        let conversation = load_existing_in(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(conversation)
    }

    #[instrument(skip(self))]
    async fn list_all(&self, filter: ConversationFilter) -> StoreResult<Vec<Conversation>> {
        let status = filter.status.map(|s| s.as_str());

        let sql = format!(
            r#"
            SELECT {}
            FROM conversations
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY last_message_at DESC, tracking_id ASC
            "#,
            CONVERSATION_COLUMNS
        );
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query_as::<_, ConversationRow>(&sql)
            .bind(status)
            .fetch_all(&mut *tx)
            .await?;

        let message_rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT m.tracking_id, m.sender, m.message, m.timestamp, m.admin_id, m.admin_name
            FROM conversation_messages m
            JOIN conversations c ON c.tracking_id = m.tracking_id
            WHERE (?1 IS NULL OR c.status = ?1)
            ORDER BY m.seq ASC
            "#,
        )
        .bind(status)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut by_conversation: HashMap<String, Vec<Message>> = HashMap::new();
        for row in message_rows {
            let key = row.tracking_id.clone();
            by_conversation
                .entry(key)
                .or_default()
                .push(row.into_message()?);
        }

        rows.into_iter()
            .map(|row| {
                let messages = by_conversation.remove(&row.tracking_id).unwrap_or_default();
                row.into_conversation(messages)
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: &TrackingId,
        status: ConversationStatus,
    ) -> StoreResult<Conversation> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET status = ?, is_unread_by_admin = 0, updated_at = ?
            WHERE tracking_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(now_millis().timestamp_millis())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(id.clone()));
        }

        let conversation = load_existing_in(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(conversation)
    }

    #[instrument(skip(self))]
    async fn mark_read(&self, id: &TrackingId) -> StoreResult<Conversation> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET is_unread_by_admin = 0, updated_at = ?
            WHERE tracking_id = ?
            "#,
        )
        .bind(now_millis().timestamp_millis())
        .bind(id.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(id.clone()));
        }

        let conversation = load_existing_in(&mut *tx, id).await?;
        tx.commit().await?;
        Ok(conversation)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &TrackingId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM conversation_messages WHERE tracking_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM conversations WHERE tracking_id = ?")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::NotFound(id.clone()));
        }

        tx.commit().await?;
        debug!("Deleted conversation {}", id);
        Ok(())
    }
}

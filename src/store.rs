//! Relational email store.
//!
//! [`EmailStore`] wraps a SQLite pool and owns every query against the
//! `emails` table: idempotent insertion, exact lookups, directed
//! conversation history, reference-chain and subject-variant retrieval.
//!
//! Ordering is deterministic everywhere: recency ordering puts records
//! without a timestamp last (they are treated as oldest) and breaks ties
//! on the surrogate key.

use anyhow::Result;
use chrono::DateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{EmailRecord, ParsedEmail};
use crate::thread::subject_variants;

/// Result of an insert attempt. A duplicate `message_id` is a skip, not
/// an error, and reports the already-stored record's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    Duplicate(i64),
}

pub struct EmailStore {
    pool: SqlitePool,
}

impl EmailStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a normalized email. Inserting the same `message_id` twice
    /// is a no-op that reports the existing surrogate key.
    pub async fn insert(&self, email: &ParsedEmail) -> Result<InsertOutcome> {
        let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM emails WHERE message_id = ?")
            .bind(&email.message_id)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(id) = existing {
            return Ok(InsertOutcome::Duplicate(id));
        }

        let references_json = serde_json::to_string(&email.references)?;
        let result = sqlx::query(
            r#"
            INSERT INTO emails (message_id, parent_message_id, references_json,
                                sender, receiver, subject, content, sent_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&email.message_id)
        .bind(&email.parent_message_id)
        .bind(&references_json)
        .bind(&email.sender)
        .bind(&email.receiver)
        .bind(&email.subject)
        .bind(&email.content)
        .bind(email.sent_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;

        Ok(InsertOutcome::Inserted(result.last_insert_rowid()))
    }

    pub async fn find_by_message_id(&self, message_id: &str) -> Result<Option<EmailRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM emails WHERE message_id = ?",
            COLUMNS
        ))
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    pub async fn find_by_internal_id(&self, id: i64) -> Result<Option<EmailRecord>> {
        let row = sqlx::query(&format!("SELECT {} FROM emails WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(row_to_record))
    }

    /// Prior mails of a correspondent pair, most recent first.
    ///
    /// Directed (`sender` → `receiver`) by default; `bidirectional`
    /// widens the match to both directions.
    pub async fn find_conversation(
        &self,
        sender: &str,
        receiver: &str,
        limit: i64,
        bidirectional: bool,
    ) -> Result<Vec<EmailRecord>> {
        let sql = if bidirectional {
            format!(
                "SELECT {} FROM emails \
                 WHERE (sender = ? AND receiver = ?) OR (sender = ? AND receiver = ?) \
                 ORDER BY (sent_at IS NULL) ASC, sent_at DESC, id DESC LIMIT ?",
                COLUMNS
            )
        } else {
            format!(
                "SELECT {} FROM emails WHERE sender = ? AND receiver = ? \
                 ORDER BY (sent_at IS NULL) ASC, sent_at DESC, id DESC LIMIT ?",
                COLUMNS
            )
        };

        let mut query = sqlx::query(&sql).bind(sender).bind(receiver);
        if bidirectional {
            query = query.bind(receiver).bind(sender);
        }
        let rows = query.bind(limit).fetch_all(&self.pool).await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Fetch every stored record whose `message_id` appears in `ids`.
    /// Order is unspecified; callers impose their own.
    pub async fn find_by_references(&self, ids: &[String]) -> Result<Vec<EmailRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM emails WHERE message_id IN ({})",
            COLUMNS, placeholders
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Records whose subject equals the normalized subject or any
    /// conventional reply-prefixed variant of it (case-insensitive),
    /// oldest first.
    pub async fn find_by_subject_variants(&self, normalized: &str) -> Result<Vec<EmailRecord>> {
        let variants = subject_variants(normalized);
        let clause = vec!["subject = ? COLLATE NOCASE"; variants.len()].join(" OR ");
        let sql = format!(
            "SELECT {} FROM emails WHERE {} ORDER BY sent_at ASC, id ASC",
            COLUMNS, clause
        );

        let mut query = sqlx::query(&sql);
        for variant in &variants {
            query = query.bind(variant);
        }
        let rows = query.fetch_all(&self.pool).await?;

        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Replace a record's body under the same identity. Returns false
    /// when the message id is unknown. Callers re-embed on success.
    pub async fn update_content(&self, message_id: &str, content: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE emails SET content = ? WHERE message_id = ?")
            .bind(content)
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a record. Returns false when the message id is unknown.
    pub async fn delete(&self, message_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM emails WHERE message_id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// All distinct sender addresses, sorted.
    pub async fn senders(&self) -> Result<Vec<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT sender FROM emails ORDER BY sender ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows)
    }
}

const COLUMNS: &str =
    "id, message_id, parent_message_id, references_json, sender, receiver, subject, content, sent_at";

fn row_to_record(row: &SqliteRow) -> EmailRecord {
    let references_json: String = row.get("references_json");
    let references: Vec<String> = serde_json::from_str(&references_json).unwrap_or_default();
    let sent_at: Option<i64> = row.get("sent_at");

    EmailRecord {
        id: row.get("id"),
        message_id: row.get("message_id"),
        parent_message_id: row.get("parent_message_id"),
        references,
        sender: row.get("sender"),
        receiver: row.get("receiver"),
        subject: row.get("subject"),
        content: row.get("content"),
        sent_at: sent_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{email, mem_store};
    use super::*;

    #[tokio::test]
    async fn insert_is_idempotent() {
        let store = mem_store().await;
        let a = email("<a@x>", "x@corp", "y@corp", "Budget", 100);

        let first = store.insert(&a).await.unwrap();
        let InsertOutcome::Inserted(id) = first else {
            panic!("expected insert, got {:?}", first);
        };

        let second = store.insert(&a).await.unwrap();
        assert_eq!(second, InsertOutcome::Duplicate(id));

        assert_eq!(store.senders().await.unwrap(), vec!["x@corp"]);
    }

    #[tokio::test]
    async fn roundtrip_preserves_fields() {
        let store = mem_store().await;
        let mut a = email("<a@x>", "x@corp", "y@corp", "Budget", 100);
        a.references = vec!["<r1@x>".to_string(), "<r2@x>".to_string()];
        a.parent_message_id = Some("<r2@x>".to_string());

        store.insert(&a).await.unwrap();
        let found = store.find_by_message_id("<a@x>").await.unwrap().unwrap();

        assert_eq!(found.sender, "x@corp");
        assert_eq!(found.receiver, "y@corp");
        assert_eq!(found.content, a.content);
        assert_eq!(found.references, a.references);
        assert_eq!(found.parent_message_id, a.parent_message_id);
        assert_eq!(found.sent_at.unwrap().timestamp(), 100);

        let by_id = store.find_by_internal_id(found.id).await.unwrap().unwrap();
        assert_eq!(by_id.message_id, "<a@x>");
    }

    #[tokio::test]
    async fn conversation_is_directed_unless_asked() {
        let store = mem_store().await;
        store
            .insert(&email("<a@x>", "x@corp", "y@corp", "Budget", 1))
            .await
            .unwrap();
        store
            .insert(&email("<b@x>", "y@corp", "x@corp", "Re: Budget", 2))
            .await
            .unwrap();

        let directed = store
            .find_conversation("x@corp", "y@corp", 10, false)
            .await
            .unwrap();
        assert_eq!(directed.len(), 1);
        assert_eq!(directed[0].message_id, "<a@x>");

        let both = store
            .find_conversation("x@corp", "y@corp", 10, true)
            .await
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[tokio::test]
    async fn recency_ordering_puts_nulls_last() {
        let store = mem_store().await;
        store
            .insert(&email("<old@x>", "x@corp", "y@corp", "s", 10))
            .await
            .unwrap();
        store
            .insert(&email("<new@x>", "x@corp", "y@corp", "s", 20))
            .await
            .unwrap();
        store
            .insert(&email("<undated@x>", "x@corp", "y@corp", "s", -1))
            .await
            .unwrap();

        let ordered = store
            .find_conversation("x@corp", "y@corp", 10, false)
            .await
            .unwrap();
        let ids: Vec<&str> = ordered.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["<new@x>", "<old@x>", "<undated@x>"]);
    }

    #[tokio::test]
    async fn recency_tie_breaks_on_internal_id() {
        let store = mem_store().await;
        store
            .insert(&email("<first@x>", "x@corp", "y@corp", "s", 50))
            .await
            .unwrap();
        store
            .insert(&email("<second@x>", "x@corp", "y@corp", "s", 50))
            .await
            .unwrap();

        let ordered = store
            .find_conversation("x@corp", "y@corp", 10, false)
            .await
            .unwrap();
        // Equal timestamps: higher surrogate key (inserted later) first.
        assert_eq!(ordered[0].message_id, "<second@x>");
        assert_eq!(ordered[1].message_id, "<first@x>");
    }

    #[tokio::test]
    async fn subject_variants_match_reply_forms() {
        let store = mem_store().await;
        store
            .insert(&email("<a@x>", "x@corp", "y@corp", "Budget", 1))
            .await
            .unwrap();
        store
            .insert(&email("<b@x>", "y@corp", "x@corp", "Re: Budget", 2))
            .await
            .unwrap();
        store
            .insert(&email("<c@x>", "y@corp", "x@corp", "re: budget", 3))
            .await
            .unwrap();
        store
            .insert(&email("<d@x>", "x@corp", "y@corp", "Roadmap", 4))
            .await
            .unwrap();

        let matched = store.find_by_subject_variants("Budget").await.unwrap();
        let ids: Vec<&str> = matched.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["<a@x>", "<b@x>", "<c@x>"]);
    }

    #[tokio::test]
    async fn references_lookup_handles_empty_and_missing() {
        let store = mem_store().await;
        store
            .insert(&email("<a@x>", "x@corp", "y@corp", "s", 1))
            .await
            .unwrap();

        assert!(store.find_by_references(&[]).await.unwrap().is_empty());

        let found = store
            .find_by_references(&["<a@x>".to_string(), "<missing@x>".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].message_id, "<a@x>");
    }

    #[tokio::test]
    async fn update_and_delete_by_identity() {
        let store = mem_store().await;
        store
            .insert(&email("<a@x>", "x@corp", "y@corp", "s", 1))
            .await
            .unwrap();

        assert!(store.update_content("<a@x>", "revised body").await.unwrap());
        let found = store.find_by_message_id("<a@x>").await.unwrap().unwrap();
        assert_eq!(found.content, "revised body");

        assert!(!store.update_content("<nope@x>", "x").await.unwrap());

        assert!(store.delete("<a@x>").await.unwrap());
        assert!(store.find_by_message_id("<a@x>").await.unwrap().is_none());
        assert!(!store.delete("<a@x>").await.unwrap());
    }
}

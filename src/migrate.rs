use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an existing pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Canonical email records. `id` is the store-assigned surrogate key;
    // `message_id` carries the uniqueness invariant.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS emails (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id TEXT NOT NULL UNIQUE,
            parent_message_id TEXT,
            references_json TEXT NOT NULL DEFAULT '[]',
            sender TEXT NOT NULL,
            receiver TEXT NOT NULL,
            subject TEXT NOT NULL DEFAULT '',
            content TEXT NOT NULL,
            sent_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector collection keyed by the same identifier space, with the
    // sender metadata projection used for filtered search.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS email_vectors (
            email_key TEXT PRIMARY KEY,
            sender TEXT NOT NULL,
            content TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Embedding bookkeeping: which model produced each vector and the
    // content hash it was computed from, so stale or missing vectors can
    // be found and re-embedded.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            email_key TEXT PRIMARY KEY,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_emails_sender_receiver ON emails(sender, receiver)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_emails_subject ON emails(subject)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_emails_sent_at ON emails(sent_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_email_vectors_sender ON email_vectors(sender)")
        .execute(pool)
        .await?;

    Ok(())
}

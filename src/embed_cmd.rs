//! Embedding reconciliation commands.
//!
//! The relational store and the vector index commit independently, so an
//! index write can fail after its email row is already stored. `embed
//! pending` finds every mail whose vector is missing or was computed from
//! stale content (or another model) and re-embeds it; `embed rebuild`
//! clears the index and regenerates everything.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::index::{hash_text, EmailIndex, IndexEntry};

/// Find and embed mails that are missing or have stale embeddings.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let mut embedding_config = config.embedding.clone();
    if let Some(batch_size) = batch_size_override {
        embedding_config.batch_size = batch_size;
    }

    let embedder = Embedder::from_config(&embedding_config)?;
    let model_name = embedder.model_name().to_string();
    let pool = db::connect(config).await?;

    let pending = find_pending(&pool, &model_name, limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  mails needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all mails up to date");
        pool.close().await;
        return Ok(());
    }

    let total = pending.len();
    let index = EmailIndex::new(pool.clone(), embedder);
    let (embedded, failed) = index.upsert_batch(&pending).await;

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Delete all embeddings and regenerate for every stored mail.
pub async fn run_embed_rebuild(config: &Config, batch_size_override: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let mut embedding_config = config.embedding.clone();
    if let Some(batch_size) = batch_size_override {
        embedding_config.batch_size = batch_size;
    }

    let embedder = Embedder::from_config(&embedding_config)?;
    let model_name = embedder.model_name().to_string();
    let pool = db::connect(config).await?;

    sqlx::query("DELETE FROM email_vectors")
        .execute(&pool)
        .await?;
    sqlx::query("DELETE FROM embeddings").execute(&pool).await?;

    println!("embed rebuild — cleared existing embeddings");

    let all = find_pending(&pool, &model_name, None).await?;

    if all.is_empty() {
        println!("  no mails to embed");
        pool.close().await;
        return Ok(());
    }

    let total = all.len();
    let index = EmailIndex::new(pool.clone(), embedder);
    let (embedded, failed) = index.upsert_batch(&all).await;

    println!("embed rebuild");
    println!("  total mails: {}", total);
    println!("  embedded: {}", embedded);
    println!("  failed: {}", failed);

    pool.close().await;
    Ok(())
}

/// Mails whose vector is missing, or whose bookkeeping hash no longer
/// matches the stored content for this model.
async fn find_pending(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<IndexEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT e.message_id, e.sender, e.content,
               b.hash AS book_hash, v.email_key AS vector_key
        FROM emails e
        LEFT JOIN embeddings b ON b.email_key = e.message_id AND b.model = ?
        LEFT JOIN email_vectors v ON v.email_key = e.message_id
        ORDER BY e.id ASC
        "#,
    )
    .bind(model)
    .fetch_all(pool)
    .await?;

    let mut pending = Vec::new();
    for row in &rows {
        let content: String = row.get("content");
        let book_hash: Option<String> = row.get("book_hash");
        let vector_key: Option<String> = row.get("vector_key");

        let stale = match (&vector_key, &book_hash) {
            (None, _) | (_, None) => true,
            (Some(_), Some(hash)) => hash != &hash_text(&content),
        };
        if !stale {
            continue;
        }

        pending.push(IndexEntry {
            key: row.get("message_id"),
            sender: row.get("sender"),
            content,
        });

        if let Some(limit) = limit {
            if pending.len() >= limit {
                break;
            }
        }
    }

    Ok(pending)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{email, mem_store};

    #[tokio::test]
    async fn pending_reports_unembedded_mails() {
        let store = mem_store().await;
        store
            .insert(&email("<a@x>", "x@corp", "y@corp", "s", 1))
            .await
            .unwrap();
        store
            .insert(&email("<b@x>", "x@corp", "y@corp", "s", 2))
            .await
            .unwrap();

        let pending = find_pending(store.pool(), "all-minilm-l6-v2", None)
            .await
            .unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].key, "<a@x>");

        let limited = find_pending(store.pool(), "all-minilm-l6-v2", Some(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }
}

//! Embedding index over email content.
//!
//! One vector per email, keyed by the message id, with the sender kept
//! alongside as the metadata projection used for filtered search. The
//! vector row stores the passage text so search results carry content
//! without a second lookup, mirroring how the canonical store and the
//! index share an identifier space.
//!
//! The index and the relational store commit independently; a failed
//! index write never rolls back a committed email row. The `embeddings`
//! bookkeeping table records the model and content hash behind every
//! vector so missing or stale entries can be found and re-embedded.

use anyhow::Result;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::models::SimilarEmail;

/// One email's worth of index input.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub key: String,
    pub sender: String,
    pub content: String,
}

pub struct EmailIndex {
    pool: SqlitePool,
    embedder: Embedder,
}

impl EmailIndex {
    /// The embedding handle is injected, never created internally.
    pub fn new(pool: SqlitePool, embedder: Embedder) -> Self {
        Self { pool, embedder }
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Embed `content` and store it under `key`, replacing any prior
    /// vector for that key.
    pub async fn upsert(&self, key: &str, sender: &str, content: &str) -> Result<()> {
        let vectors = self.embedder.embed_passages(&[content.to_string()]).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))?;
        self.write_entry(key, sender, content, &vector).await
    }

    /// Embed and store entries in fixed-size batches. Each batch commits
    /// independently: a failed batch is counted and skipped without
    /// touching previously committed ones.
    ///
    /// Returns `(written, failed)`.
    pub async fn upsert_batch(&self, entries: &[IndexEntry]) -> (u64, u64) {
        let mut written = 0u64;
        let mut failed = 0u64;

        for batch in entries.chunks(self.embedder.batch_size()) {
            let texts: Vec<String> = batch.iter().map(|e| e.content.clone()).collect();

            match self.embedder.embed_passages(&texts).await {
                Ok(vectors) => {
                    for (entry, vector) in batch.iter().zip(vectors.iter()) {
                        match self
                            .write_entry(&entry.key, &entry.sender, &entry.content, vector)
                            .await
                        {
                            Ok(()) => written += 1,
                            Err(e) => {
                                eprintln!(
                                    "Warning: failed to store embedding for {}: {}",
                                    entry.key, e
                                );
                                failed += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    eprintln!("Warning: embedding batch failed: {}", e);
                    failed += batch.len() as u64;
                }
            }
        }

        (written, failed)
    }

    /// Remove the vector stored under `key`, if any.
    pub async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM email_vectors WHERE email_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM embeddings WHERE email_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Top-`k` nearest entries to `query`, ascending by distance
    /// (1 − cosine similarity). `sender_filter` restricts results to
    /// entries whose stored sender matches exactly.
    ///
    /// An empty index yields an empty result without touching the
    /// embedding service.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        sender_filter: Option<&str>,
    ) -> Result<Vec<SimilarEmail>> {
        let rows = match sender_filter {
            Some(sender) => {
                sqlx::query(
                    "SELECT email_key, sender, content, embedding FROM email_vectors WHERE sender = ?",
                )
                .bind(sender)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT email_key, sender, content, embedding FROM email_vectors")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed_query(query).await?;

        let mut results: Vec<SimilarEmail> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let similarity = cosine_similarity(&query_vec, &vector);
                SimilarEmail {
                    key: row.get("email_key"),
                    sender: row.get("sender"),
                    content: row.get("content"),
                    distance: 1.0 - similarity,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        results.truncate(k);

        Ok(results)
    }

    async fn write_entry(
        &self,
        key: &str,
        sender: &str,
        content: &str,
        vector: &[f32],
    ) -> Result<()> {
        let blob = vec_to_blob(vector);
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO email_vectors (email_key, sender, content, embedding)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(email_key) DO UPDATE SET
                sender = excluded.sender,
                content = excluded.content,
                embedding = excluded.embedding
            "#,
        )
        .bind(key)
        .bind(sender)
        .bind(content)
        .bind(&blob)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO embeddings (email_key, model, dims, hash, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(email_key) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                hash = excluded.hash,
                created_at = excluded.created_at
            "#,
        )
        .bind(key)
        .bind(self.embedder.model_name())
        .bind(self.embedder.dims() as i64)
        .bind(hash_text(content))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Content hash used for embedding staleness checks.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// CLI entry point: semantic search over indexed mails.
pub async fn run_search(
    config: &crate::config::Config,
    query: &str,
    sender: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        anyhow::bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let pool = crate::db::connect(config).await?;
    let embedder = Embedder::from_config(&config.embedding)?;
    let index = EmailIndex::new(pool.clone(), embedder);

    let k = limit.unwrap_or(config.retrieval.similar_limit);
    let results = index.search(query, k, sender.as_deref()).await?;

    if results.is_empty() {
        println!("No results.");
        pool.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let excerpt: String = result.content.chars().take(240).collect();
        println!("{}. [{:.3}] {}", i + 1, result.distance, result.sender);
        println!("    id: {}", result.key);
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " "));
        println!();
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn mem_index() -> EmailIndex {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory pool");
        crate::migrate::apply(&pool).await.expect("schema");
        let embedder = Embedder::from_config(&EmbeddingConfig::default()).unwrap();
        EmailIndex::new(pool, embedder)
    }

    #[tokio::test]
    async fn search_on_empty_index_returns_empty() {
        // Provider is disabled, so this would error if the query were
        // embedded; an empty index must short-circuit first.
        let index = mem_index().await;
        let results = index.search("anything", 5, None).await.unwrap();
        assert!(results.is_empty());

        let filtered = index.search("anything", 5, Some("x@corp")).await.unwrap();
        assert!(filtered.is_empty());
    }

    #[tokio::test]
    async fn upsert_with_disabled_provider_errors() {
        let index = mem_index().await;
        assert!(index.upsert("<a@x>", "x@corp", "hello").await.is_err());
    }

    #[tokio::test]
    async fn batch_with_disabled_provider_reports_failures() {
        let index = mem_index().await;
        let entries = vec![
            IndexEntry {
                key: "<a@x>".to_string(),
                sender: "x@corp".to_string(),
                content: "one".to_string(),
            },
            IndexEntry {
                key: "<b@x>".to_string(),
                sender: "x@corp".to_string(),
                content: "two".to_string(),
            },
        ];
        let (written, failed) = index.upsert_batch(&entries).await;
        assert_eq!(written, 0);
        assert_eq!(failed, 2);
    }

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash_text("abc"), hash_text("abc"));
        assert_ne!(hash_text("abc"), hash_text("abd"));
    }
}

//! Batch email ingestion.
//!
//! Coordinates the full flow: scan → normalize → store → embed. Every
//! file gets its own outcome — inserted, skipped (duplicate), or failed
//! with a reason — and one file's failure never aborts the batch. The
//! relational insert commits first; a failed index write is warned and
//! counted as pending (`rpl embed pending` reconciles later).
//!
//! The batch is sorted by sent time before insertion so replies usually
//! land after the mails they reference; a reference to a mail that never
//! arrives is tolerated, not an error.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::embedding::Embedder;
use crate::index::EmailIndex;
use crate::models::{IngestReport, ParsedEmail, RowFailure};
use crate::normalize::{normalize_eml, normalize_headered};
use crate::store::{EmailStore, InsertOutcome};

/// Input shape of an ingest batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestFormat {
    /// MIME messages; only `.eml` files are accepted.
    Eml,
    /// Flat key/value-headered text, as produced by bulk corpus dumps.
    Flat,
}

pub async fn run_ingest(
    config: &Config,
    path: &Path,
    format: IngestFormat,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = EmailStore::new(pool.clone());
    let embedder = Embedder::from_config(&config.embedding)?;
    let index = EmailIndex::new(pool.clone(), embedder);

    let report = ingest_path(&store, &index, path, format, limit, dry_run).await?;

    if dry_run {
        println!("ingest {} (dry-run)", path.display());
        println!("  files found: {}", report.files_found);
        println!("  parseable: {}", report.parsed);
        println!("  rejected: {}", report.failed);
    } else {
        println!("ingest {}", path.display());
        println!("  files found: {}", report.files_found);
        println!("  parsed: {}", report.parsed);
        println!("  inserted: {}", report.inserted);
        println!("  skipped (duplicate): {}", report.skipped);
        println!("  failed: {}", report.failed);
        if config.embedding.is_enabled() {
            println!("  embeddings written: {}", report.embedded);
            println!("  embeddings pending: {}", report.embeddings_pending);
        }
    }
    if !report.failures.is_empty() {
        println!("  failures:");
        for failure in &report.failures {
            println!("    {}: {}", failure.file, failure.reason);
        }
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Ingest a mail file or a folder of them. Returns the per-batch tally;
/// only a wholly unusable input path is an error.
pub async fn ingest_path(
    store: &EmailStore,
    index: &EmailIndex,
    path: &Path,
    format: IngestFormat,
    limit: Option<usize>,
    dry_run: bool,
) -> Result<IngestReport> {
    let files = collect_files(path, format)?;

    let mut report = IngestReport {
        files_found: files.len(),
        ..Default::default()
    };

    // Parse everything first; rejects are recorded per file.
    let mut parsed: Vec<(String, ParsedEmail)> = Vec::new();
    for file in &files {
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file.display().to_string());

        let bytes = match std::fs::read(file) {
            Ok(bytes) => bytes,
            Err(e) => {
                report.failures.push(RowFailure {
                    file: name,
                    reason: format!("read failed: {}", e),
                });
                continue;
            }
        };

        let normalized = match format {
            IngestFormat::Eml => normalize_eml(&bytes),
            IngestFormat::Flat => normalize_headered(&String::from_utf8_lossy(&bytes)),
        };
        match normalized {
            Ok(email) => parsed.push((name, email)),
            Err(e) => report.failures.push(RowFailure {
                file: name,
                reason: e.to_string(),
            }),
        }
    }

    // Oldest first, undated first: parents go in before their replies.
    parsed.sort_by_key(|(_, email)| email.sent_at);
    if let Some(limit) = limit {
        parsed.truncate(limit);
    }

    report.parsed = parsed.len();
    report.failed = report.failures.len() as u64;

    if dry_run {
        return Ok(report);
    }

    let embed_enabled = index.embedder().is_enabled();

    for (file, email) in &parsed {
        match store.insert(email).await {
            Ok(InsertOutcome::Inserted(_)) => {
                report.inserted += 1;

                // Best-effort: the email row is already committed and
                // stays committed if indexing fails.
                if embed_enabled {
                    match index
                        .upsert(&email.message_id, &email.sender, &email.content)
                        .await
                    {
                        Ok(()) => report.embedded += 1,
                        Err(e) => {
                            eprintln!(
                                "Warning: failed to index {}: {}",
                                email.message_id, e
                            );
                            report.embeddings_pending += 1;
                        }
                    }
                }
            }
            Ok(InsertOutcome::Duplicate(_)) => {
                report.skipped += 1;
            }
            Err(e) => {
                report.failed += 1;
                report.failures.push(RowFailure {
                    file: file.clone(),
                    reason: format!("store insert failed: {}", e),
                });
            }
        }
    }

    Ok(report)
}

/// Collect the batch's input files.
///
/// For `.eml` input this is the upload boundary: a single file with
/// another extension is rejected before parsing, and a folder scan never
/// picks such files up. Flat corpus dumps carry no extension convention,
/// so every regular file is taken and bad ones fail per-row.
fn collect_files(path: &Path, format: IngestFormat) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("ingest path does not exist: {}", path.display());
    }

    if path.is_file() {
        if format == IngestFormat::Eml && !is_eml(path) {
            bail!("unsupported file type (expected .eml): {}", path.display());
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| format == IngestFormat::Flat || is_eml(p))
        .collect();

    // Deterministic scan order.
    files.sort();
    Ok(files)
}

fn is_eml(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("eml"))
        .unwrap_or(false)
}

/// CLI entry point: replace a stored mail's body and re-embed it.
pub async fn run_update(config: &Config, message_id: &str, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)?;

    let pool = db::connect(config).await?;
    let store = EmailStore::new(pool.clone());

    if !store.update_content(message_id, &content).await? {
        pool.close().await;
        bail!("no email found with message id: {}", message_id);
    }
    println!("updated {}", message_id);

    if config.embedding.is_enabled() {
        let embedder = Embedder::from_config(&config.embedding)?;
        let index = EmailIndex::new(pool.clone(), embedder);
        // Re-embed under the same identity.
        let record = store.find_by_message_id(message_id).await?;
        if let Some(record) = record {
            match index.upsert(&record.message_id, &record.sender, &record.content).await {
                Ok(()) => println!("re-embedded {}", message_id),
                Err(e) => eprintln!("Warning: failed to re-embed {}: {}", message_id, e),
            }
        }
    }

    pool.close().await;
    Ok(())
}

/// CLI entry point: delete a mail from the store and the index.
pub async fn run_remove(config: &Config, message_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = EmailStore::new(pool.clone());

    if !store.delete(message_id).await? {
        pool.close().await;
        bail!("no email found with message id: {}", message_id);
    }

    let embedder = Embedder::from_config(&config.embedding)?;
    let index = EmailIndex::new(pool.clone(), embedder);
    index.delete(message_id).await?;

    println!("removed {}", message_id);
    pool.close().await;
    Ok(())
}

//! Core data models used throughout Reply Harness.
//!
//! These types represent the emails, retrieval results, and assembled
//! contexts that flow through the ingestion and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical email produced by the normalizer, before the store has
/// assigned a surrogate key.
#[derive(Debug, Clone)]
pub struct ParsedEmail {
    pub message_id: String,
    pub parent_message_id: Option<String>,
    /// Ancestor chain, oldest first. Empty when the mail starts a thread.
    pub references: Vec<String>,
    /// Normalized address: lowercase, display name stripped. Empty when
    /// extraction failed (not fatal).
    pub sender: String,
    pub receiver: String,
    /// Raw subject line, reply/forward prefixes included.
    pub subject: String,
    pub content: String,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Stored email record.
///
/// `id` is the store-assigned surrogate key, stable for the lifetime of
/// the record. Records are immutable after ingestion; content updates
/// replace the body under the same identity and re-embed.
#[derive(Debug, Clone, Serialize)]
pub struct EmailRecord {
    pub id: i64,
    pub message_id: String,
    pub parent_message_id: Option<String>,
    pub references: Vec<String>,
    pub sender: String,
    pub receiver: String,
    pub subject: String,
    pub content: String,
    pub sent_at: Option<DateTime<Utc>>,
}

/// A semantic-search hit from the embedding index, ascending by distance
/// (lower = more similar).
#[derive(Debug, Clone, Serialize)]
pub struct SimilarEmail {
    pub key: String,
    pub sender: String,
    pub content: String,
    pub distance: f32,
}

/// Ranked most-frequent words per grammatical category, lemmatized and
/// case-folded by the tagging service.
///
/// Doubles as the wire shape returned by the HTTP POS tagger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StylometricProfile {
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default)]
    pub adverbs: Vec<String>,
    #[serde(default)]
    pub adjectives: Vec<String>,
}

impl StylometricProfile {
    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty() && self.adverbs.is_empty() && self.adjectives.is_empty()
    }

    /// Keep only the `top` highest-ranked words in each category.
    pub fn truncate(&mut self, top: usize) {
        self.verbs.truncate(top);
        self.adverbs.truncate(top);
        self.adjectives.truncate(top);
    }
}

/// Assembled context for drafting a reply, ready to be rendered into a
/// generation prompt.
///
/// `sender` is the address the reply will be sent from (the author whose
/// style is mimicked); `receiver` is the correspondent being replied to;
/// `content` is the incoming mail. The three context blocks degrade to
/// empty when no data is available.
#[derive(Debug, Clone, Serialize)]
pub struct ReplyContext {
    pub sender: String,
    pub receiver: String,
    pub content: String,
    /// Prior messages of the conversation thread, oldest first.
    pub thread: Vec<String>,
    /// Most recent mails from `sender` to `receiver`, newest first.
    pub recent_emails: Vec<String>,
    /// Semantically similar past mails written by `sender`.
    pub similar_emails: Vec<SimilarEmail>,
    pub profile: StylometricProfile,
}

/// Per-file failure recorded during a batch ingest.
#[derive(Debug, Clone, Serialize)]
pub struct RowFailure {
    pub file: String,
    pub reason: String,
}

/// Structured tally returned by a batch ingest. Partial failures are
/// reported here, never as a bare error for the whole batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files_found: usize,
    pub parsed: usize,
    pub inserted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub embedded: u64,
    pub embeddings_pending: u64,
    pub failures: Vec<RowFailure>,
}

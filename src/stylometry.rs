//! Stylometric feature extraction.
//!
//! Part-of-speech tagging and lemmatization are an external collaborator:
//! the [`PosTagger`] trait takes text and returns ranked word lists per
//! grammatical category, and the `http` provider forwards to a tagging
//! service. Profiles are computed on demand over a bounded window of a
//! correspondent pair's history and cached per (sender, receiver).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::config::StylometryConfig;
use crate::models::{EmailRecord, StylometricProfile};

/// Separator between mails when a window is concatenated for tagging.
const MAIL_SEPARATOR: &str = "\n\n---\n\n";

/// Black-box text → ranked {verbs, adverbs, adjectives} extractor.
/// Pure: no side effects, same text yields the same ranking.
#[async_trait]
pub trait PosTagger: Send + Sync {
    async fn tag(&self, text: &str) -> Result<StylometricProfile>;
}

/// A no-op tagger that always returns errors. Used when
/// `stylometry.provider = "disabled"`; callers degrade to an empty profile.
pub struct DisabledTagger;

#[async_trait]
impl PosTagger for DisabledTagger {
    async fn tag(&self, _text: &str) -> Result<StylometricProfile> {
        bail!("POS tagger is disabled")
    }
}

/// Tagger backed by an HTTP tagging service.
///
/// Sends `POST <url>` with `{"text": ...}` and expects a JSON body with
/// `verbs`, `adverbs`, and `adjectives` arrays ranked by frequency.
/// A single attempt; failures surface to the caller.
pub struct HttpTagger {
    url: String,
    timeout_secs: u64,
}

impl HttpTagger {
    pub fn new(config: &StylometryConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("stylometry.url required for http provider"))?;
        Ok(Self {
            url,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl PosTagger for HttpTagger {
    async fn tag(&self, text: &str) -> Result<StylometricProfile> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let response = client
            .post(&self.url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Tagger connection error ({}): {}", self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Tagger error {}: {}", status, body);
        }

        let profile: StylometricProfile = response.json().await?;
        Ok(profile)
    }
}

/// Create the appropriate [`PosTagger`] based on configuration.
pub fn create_tagger(config: &StylometryConfig) -> Result<Box<dyn PosTagger>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledTagger)),
        "http" => Ok(Box::new(HttpTagger::new(config)?)),
        other => bail!("Unknown stylometry provider: {}", other),
    }
}

/// Compute a profile over a window of prior mails.
///
/// The window's bodies are concatenated and tagged in one call; the
/// ranked lists are trimmed to `top` entries per category. An empty
/// window yields an empty profile without calling the tagger.
pub async fn build_profile(
    tagger: &dyn PosTagger,
    emails: &[EmailRecord],
    top: usize,
) -> Result<StylometricProfile> {
    let corpus = emails
        .iter()
        .map(|e| e.content.as_str())
        .filter(|c| !c.trim().is_empty())
        .collect::<Vec<_>>()
        .join(MAIL_SEPARATOR);

    if corpus.trim().is_empty() {
        return Ok(StylometricProfile::default());
    }

    let mut profile = tagger.tag(&corpus).await?;
    profile.truncate(top);
    Ok(profile)
}

/// Per-process cache of computed profiles, keyed by (sender, receiver).
/// Profiles are derived data; dropping the cache is always safe.
#[derive(Default)]
pub struct ProfileCache {
    inner: HashMap<(String, String), StylometricProfile>,
}

impl ProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, sender: &str, receiver: &str) -> Option<&StylometricProfile> {
        self.inner
            .get(&(sender.to_string(), receiver.to_string()))
    }

    pub fn put(&mut self, sender: &str, receiver: &str, profile: StylometricProfile) {
        self.inner
            .insert((sender.to_string(), receiver.to_string()), profile);
    }
}

/// CLI entry point: print the stylometric profile of a correspondent pair.
pub async fn run_profile(
    config: &crate::config::Config,
    sender: &str,
    receiver: &str,
) -> Result<()> {
    if !config.stylometry.is_enabled() {
        bail!("Profile requires a tagger. Set [stylometry] provider in config.");
    }

    let pool = crate::db::connect(config).await?;
    let store = crate::store::EmailStore::new(pool.clone());
    let tagger = create_tagger(&config.stylometry)?;

    let window = store
        .find_conversation(sender, receiver, config.retrieval.profile_window, false)
        .await?;
    let profile = build_profile(tagger.as_ref(), &window, config.retrieval.profile_top).await?;

    println!("profile {} -> {}", sender, receiver);
    println!("  window: {} mails", window.len());
    println!("  verbs:      {}", profile.verbs.join(", "));
    println!("  adverbs:    {}", profile.adverbs.join(", "));
    println!("  adjectives: {}", profile.adjectives.join(", "));

    pool.close().await;
    Ok(())
}

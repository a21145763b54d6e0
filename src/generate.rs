//! Reply generation boundary.
//!
//! The language model is an external collaborator behind the
//! [`Generator`] trait: prompt in, text out, one attempt, no internal
//! retry — a failed call surfaces as an error for the caller to handle.
//! [`build_prompt`] renders an assembled [`ReplyContext`] into the
//! generation prompt.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::time::Duration;

use crate::config::GeneratorConfig;
use crate::models::ReplyContext;

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Used when `generator.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String> {
        bail!("Generator is disabled")
    }
}

/// Generator backed by a local Ollama instance (`POST /api/generate`).
pub struct OllamaGenerator {
    model: String,
    url: String,
    timeout_secs: u64,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generator.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response = client
            .post(format!("{}/api/generate", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url,
                    e
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Ollama API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))?;

        Ok(text.trim().to_string())
    }
}

/// Create the appropriate [`Generator`] based on configuration.
pub fn create_generator(config: &GeneratorConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "ollama" => Ok(Box::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generator provider: {}", other),
    }
}

/// Render an assembled context into the generation prompt.
///
/// The prompt asks the model to answer the incoming mail in the author's
/// voice, using the recent mails as tone examples, the thread as factual
/// grounding, and the stylometric word lists as style hints.
pub fn build_prompt(context: &ReplyContext, extra: Option<&str>) -> String {
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are an email assistant that drafts replies in the author's own voice."
    );
    let _ = writeln!(prompt, "I am {}.", context.sender);
    let _ = writeln!(
        prompt,
        "I need to reply to this mail from {}:",
        context.receiver
    );
    let _ = writeln!(prompt, "---\n{}\n---", context.content);

    if !context.thread.is_empty() {
        let _ = writeln!(
            prompt,
            "\nEarlier messages in this conversation, oldest first:"
        );
        for message in &context.thread {
            let _ = writeln!(prompt, "---\n{}", message);
        }
    }

    if !context.recent_emails.is_empty() {
        let _ = writeln!(
            prompt,
            "\nRecent mails I sent to {} (use their greetings and sign-offs):",
            context.receiver
        );
        for mail in &context.recent_emails {
            let _ = writeln!(prompt, "---\n{}", mail);
        }
    }

    if !context.similar_emails.is_empty() {
        let _ = writeln!(prompt, "\nOther mails I wrote on similar topics:");
        for similar in &context.similar_emails {
            let _ = writeln!(prompt, "---\n{}", similar.content);
        }
    }

    if !context.profile.is_empty() {
        let _ = writeln!(
            prompt,
            "\nMy most frequent words, in decreasing order of use:"
        );
        let _ = writeln!(prompt, "verbs: {}", context.profile.verbs.join(", "));
        let _ = writeln!(prompt, "adverbs: {}", context.profile.adverbs.join(", "));
        let _ = writeln!(
            prompt,
            "adjectives: {}",
            context.profile.adjectives.join(", ")
        );
    }

    if let Some(extra) = extra {
        if !extra.trim().is_empty() {
            let _ = writeln!(prompt, "\nExtra instructions: {}", extra);
        }
    }

    let _ = writeln!(
        prompt,
        "\nDraft the reply in my voice, matching the tone and formality of my \
         previous mails. Return only the email body."
    );

    prompt
}

/// CLI entry point: assemble a context, build the prompt, and generate
/// a draft reply.
pub async fn run_draft(
    config: &crate::config::Config,
    sender: &str,
    receiver: &str,
    content: &str,
    reply_to: Option<String>,
    extra: Option<String>,
) -> Result<()> {
    if !config.generator.is_enabled() {
        bail!("Draft requires a generator. Set [generator] provider in config.");
    }

    let pool = crate::db::connect(config).await?;
    let store = crate::store::EmailStore::new(pool.clone());
    let embedder = crate::embedding::Embedder::from_config(&config.embedding)?;
    let index = crate::index::EmailIndex::new(pool.clone(), embedder);
    let tagger = crate::stylometry::create_tagger(&config.stylometry)?;
    let generator = create_generator(&config.generator)?;

    let hint = match reply_to {
        Some(ref message_id) => store.find_by_message_id(message_id).await?,
        None => None,
    };

    let assembler =
        crate::assemble::Assembler::new(&store, &index, tagger.as_ref(), &config.retrieval);
    let context = assembler
        .assemble(sender, receiver, content, hint.as_ref())
        .await?;

    let prompt = build_prompt(&context, extra.as_deref());
    let draft = generator.generate(&prompt).await?;

    println!("{}", draft);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SimilarEmail, StylometricProfile};

    fn context() -> ReplyContext {
        ReplyContext {
            sender: "me@corp".to_string(),
            receiver: "them@corp".to_string(),
            content: "When can we meet?".to_string(),
            thread: Vec::new(),
            recent_emails: Vec::new(),
            similar_emails: Vec::new(),
            profile: StylometricProfile::default(),
        }
    }

    #[test]
    fn prompt_includes_identities_and_mail() {
        let prompt = build_prompt(&context(), None);
        assert!(prompt.contains("me@corp"));
        assert!(prompt.contains("them@corp"));
        assert!(prompt.contains("When can we meet?"));
        // Empty blocks leave no headings behind.
        assert!(!prompt.contains("Recent mails"));
        assert!(!prompt.contains("similar topics"));
        assert!(!prompt.contains("most frequent words"));
    }

    #[test]
    fn prompt_renders_populated_blocks() {
        let mut ctx = context();
        ctx.thread = vec!["first message".to_string()];
        ctx.recent_emails = vec!["Hi John, ...".to_string()];
        ctx.similar_emails = vec![SimilarEmail {
            key: "<a@x>".to_string(),
            sender: "me@corp".to_string(),
            content: "similar mail body".to_string(),
            distance: 0.1,
        }];
        ctx.profile = StylometricProfile {
            verbs: vec!["send".to_string(), "review".to_string()],
            adverbs: vec!["quickly".to_string()],
            adjectives: vec!["brief".to_string()],
        };

        let prompt = build_prompt(&ctx, Some("keep it short"));
        assert!(prompt.contains("first message"));
        assert!(prompt.contains("Hi John"));
        assert!(prompt.contains("similar mail body"));
        assert!(prompt.contains("send, review"));
        assert!(prompt.contains("keep it short"));
    }

    #[tokio::test]
    async fn disabled_generator_errors() {
        assert!(DisabledGenerator.generate("prompt").await.is_err());
    }
}

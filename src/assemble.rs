//! Context assembly for reply drafting.
//!
//! [`Assembler`] pulls the three context blocks together: recent directed
//! history (tone examples), semantically similar past mails from the same
//! author, and the author's stylometric profile. Missing data degrades to
//! empty blocks — assembly only fails when a store query fails, never
//! because there is nothing to find.

use anyhow::Result;
use std::sync::Mutex;

use crate::config::RetrievalConfig;
use crate::index::EmailIndex;
use crate::models::{EmailRecord, ReplyContext, StylometricProfile};
use crate::store::EmailStore;
use crate::stylometry::{build_profile, PosTagger, ProfileCache};
use crate::thread::resolve_thread;

/// How much of the latest thread message feeds the similarity query.
const THREAD_TAIL_CHARS: usize = 500;

pub struct Assembler<'a> {
    store: &'a EmailStore,
    index: &'a EmailIndex,
    tagger: &'a dyn PosTagger,
    retrieval: &'a RetrievalConfig,
    cache: Mutex<ProfileCache>,
}

impl<'a> Assembler<'a> {
    pub fn new(
        store: &'a EmailStore,
        index: &'a EmailIndex,
        tagger: &'a dyn PosTagger,
        retrieval: &'a RetrievalConfig,
    ) -> Self {
        Self {
            store,
            index,
            tagger,
            retrieval,
            cache: Mutex::new(ProfileCache::new()),
        }
    }

    /// Assemble the context for a reply written by `sender` to `receiver`,
    /// answering the incoming mail `new_content`. `thread_hint` is the
    /// stored record being replied to, when known.
    pub async fn assemble(
        &self,
        sender: &str,
        receiver: &str,
        new_content: &str,
        thread_hint: Option<&EmailRecord>,
    ) -> Result<ReplyContext> {
        // (a) Most recent prior mails in the directed sender → receiver
        // conversation, as tone examples.
        let recent = self
            .store
            .find_conversation(sender, receiver, self.retrieval.recent_limit, false)
            .await?;
        let recent_emails: Vec<String> = recent
            .iter()
            .map(|r| r.content.clone())
            .filter(|c| !c.trim().is_empty())
            .collect();

        // Thread history, oldest first, when a reply target is known.
        let thread = match thread_hint {
            Some(record) => resolve_thread(record, self.store).await?,
            None => Vec::new(),
        };
        let thread_block: Vec<String> = thread
            .iter()
            .map(|r| r.content.clone())
            .filter(|c| !c.trim().is_empty())
            .collect();

        // (b) Semantically similar mails written by the same author.
        let query = similarity_query(new_content, &thread);
        let similar_emails = match self
            .index
            .search(&query, self.retrieval.similar_limit, Some(sender))
            .await
        {
            Ok(results) => results,
            Err(e) => {
                eprintln!("Warning: similarity search unavailable: {}", e);
                Vec::new()
            }
        };

        // (c) Stylometric profile over a bounded recent window, cached
        // per correspondent pair.
        let profile = self.profile_for(sender, receiver).await?;

        Ok(ReplyContext {
            sender: sender.to_string(),
            receiver: receiver.to_string(),
            content: new_content.to_string(),
            thread: thread_block,
            recent_emails,
            similar_emails,
            profile,
        })
    }

    async fn profile_for(&self, sender: &str, receiver: &str) -> Result<StylometricProfile> {
        if let Ok(cache) = self.cache.lock() {
            if let Some(profile) = cache.get(sender, receiver) {
                return Ok(profile.clone());
            }
        }

        let window = self
            .store
            .find_conversation(sender, receiver, self.retrieval.profile_window, false)
            .await?;

        let profile = match build_profile(self.tagger, &window, self.retrieval.profile_top).await {
            Ok(profile) => profile,
            Err(e) => {
                eprintln!("Warning: stylometric profile unavailable: {}", e);
                StylometricProfile::default()
            }
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(sender, receiver, profile.clone());
        }
        Ok(profile)
    }
}

/// Derive the similarity query from the incoming mail and, when a thread
/// resolved, the tail of its most recent message.
fn similarity_query(new_content: &str, thread: &[EmailRecord]) -> String {
    match thread.last() {
        Some(last) if !last.content.trim().is_empty() => {
            let tail: String = last
                .content
                .chars()
                .rev()
                .take(THREAD_TAIL_CHARS)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("{}\n\n{}", new_content, tail)
        }
        _ => new_content.to_string(),
    }
}

/// CLI entry point: assemble a context and print it as JSON.
pub async fn run_assemble(
    config: &crate::config::Config,
    sender: &str,
    receiver: &str,
    content: &str,
    reply_to: Option<String>,
) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let store = EmailStore::new(pool.clone());
    let embedder = crate::embedding::Embedder::from_config(&config.embedding)?;
    let index = EmailIndex::new(pool.clone(), embedder);
    let tagger = crate::stylometry::create_tagger(&config.stylometry)?;

    let hint = match reply_to {
        Some(ref message_id) => store.find_by_message_id(message_id).await?,
        None => None,
    };

    let assembler = Assembler::new(&store, &index, tagger.as_ref(), &config.retrieval);
    let context = assembler
        .assemble(sender, receiver, content, hint.as_ref())
        .await?;

    println!("{}", serde_json::to_string_pretty(&context)?);

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingConfig;
    use crate::embedding::Embedder;
    use crate::store::test_support::{email, mem_store};
    use crate::stylometry::DisabledTagger;

    fn index_for(store: &EmailStore) -> EmailIndex {
        let embedder = Embedder::from_config(&EmbeddingConfig::default()).unwrap();
        EmailIndex::new(store.pool().clone(), embedder)
    }

    #[tokio::test]
    async fn assemble_with_no_history_yields_empty_blocks() {
        let store = mem_store().await;
        let index = index_for(&store);
        let retrieval = RetrievalConfig::default();
        let assembler = Assembler::new(&store, &index, &DisabledTagger, &retrieval);

        let context = assembler
            .assemble("x@corp", "y@corp", "Any update on the budget?", None)
            .await
            .unwrap();

        assert!(context.thread.is_empty());
        assert!(context.recent_emails.is_empty());
        assert!(context.similar_emails.is_empty());
        assert!(context.profile.is_empty());
        assert_eq!(context.sender, "x@corp");
        assert_eq!(context.receiver, "y@corp");
    }

    #[tokio::test]
    async fn assemble_collects_directed_recent_history() {
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
            .insert(&email("<c@x>", "x@corp", "y@corp", "Re: Budget", 3))
            .await
            .unwrap();

        let index = index_for(&store);
        let retrieval = RetrievalConfig::default();
        let assembler = Assembler::new(&store, &index, &DisabledTagger, &retrieval);

        let context = assembler
            .assemble("x@corp", "y@corp", "ping", None)
            .await
            .unwrap();

        // Only x → y mails, newest first.
        assert_eq!(
            context.recent_emails,
            vec!["body of <c@x>".to_string(), "body of <a@x>".to_string()]
        );
    }

    #[tokio::test]
    async fn assemble_resolves_thread_from_hint() {
        let store = mem_store().await;
        store
            .insert(&email("<a@x>", "x@corp", "y@corp", "Budget", 1))
            .await
            .unwrap();
        let mut b = email("<b@x>", "y@corp", "x@corp", "Re: Budget", 2);
        b.references = vec!["<a@x>".to_string()];
        store.insert(&b).await.unwrap();

        let index = index_for(&store);
        let retrieval = RetrievalConfig::default();
        let assembler = Assembler::new(&store, &index, &DisabledTagger, &retrieval);

        let hint = store.find_by_message_id("<b@x>").await.unwrap().unwrap();
        let context = assembler
            .assemble("x@corp", "y@corp", "reply body", Some(&hint))
            .await
            .unwrap();

        assert_eq!(context.thread, vec!["body of <a@x>".to_string()]);
    }

    #[test]
    fn similarity_query_includes_thread_tail() {
        let records = vec![EmailRecord {
            id: 1,
            message_id: "<a@x>".to_string(),
            parent_message_id: None,
            references: Vec::new(),
            sender: "x@corp".to_string(),
            receiver: "y@corp".to_string(),
            subject: "s".to_string(),
            content: "thread tail text".to_string(),
            sent_at: None,
        }];

        let query = similarity_query("new mail", &records);
        assert!(query.starts_with("new mail"));
        assert!(query.contains("thread tail text"));

        assert_eq!(similarity_query("new mail", &[]), "new mail");
    }
}

//! Conversation thread reconstruction.
//!
//! Two strategies, tried in order:
//!
//! 1. **Structural** — the record's `References` chain is looked up in the
//!    store and ordered chronologically (stable, so messages without a
//!    timestamp keep their chain position).
//! 2. **Subject fallback** — the subject is normalized by stripping reply
//!    prefixes, and every record with a matching normalized subject sent
//!    strictly before the seed record forms the thread, oldest first.
//!
//! A record with no references and no subject yields an empty thread.

use anyhow::Result;
use std::collections::HashMap;

use crate::models::EmailRecord;
use crate::store::EmailStore;

/// Reply/forward prefixes stripped during subject normalization.
const REPLY_PREFIXES: &[&str] = &["re:", "fw:", "fwd:"];

/// Strip reply/forward prefixes from a subject, case-insensitively and
/// repeatedly ("Re: Fwd: Re: X" → "X"). Idempotent.
pub fn normalize_subject(subject: &str) -> String {
    let mut s = subject.trim();
    loop {
        let lower = s.to_lowercase();
        let mut stripped = false;
        for prefix in REPLY_PREFIXES {
            if lower.starts_with(prefix) {
                s = s[prefix.len()..].trim_start();
                stripped = true;
                break;
            }
        }
        if !stripped {
            break;
        }
    }
    s.trim().to_string()
}

/// The conventional reply-prefixed spellings of a normalized subject,
/// used for exact-match store lookups.
pub fn subject_variants(normalized: &str) -> Vec<String> {
    let mut variants = vec![normalized.to_string()];
    for prefix in ["Re: ", "Fw: ", "Fwd: "] {
        variants.push(format!("{}{}", prefix, normalized));
    }
    variants
}

/// Reconstruct the conversation leading up to `record`, oldest first,
/// excluding `record` itself.
pub async fn resolve_thread(
    record: &EmailRecord,
    store: &EmailStore,
) -> Result<Vec<EmailRecord>> {
    if !record.references.is_empty() {
        let mut found = store.find_by_references(&record.references).await?;

        // Chain position first, then a stable chronological sort: records
        // without timestamps (or with equal ones) keep reference order.
        let positions: HashMap<&str, usize> = record
            .references
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        found.sort_by_key(|r| {
            positions
                .get(r.message_id.as_str())
                .copied()
                .unwrap_or(usize::MAX)
        });
        found.sort_by_key(|r| r.sent_at);

        found.retain(|r| r.message_id != record.message_id);
        return Ok(found);
    }

    let base = normalize_subject(&record.subject);
    if base.is_empty() {
        return Ok(Vec::new());
    }
    // "Sent strictly before" is undefined without a timestamp.
    let Some(cutoff) = record.sent_at else {
        return Ok(Vec::new());
    };

    let candidates = store.find_by_subject_variants(&base).await?;
    let mut thread: Vec<EmailRecord> = candidates
        .into_iter()
        .filter(|r| r.id != record.id)
        .filter(|r| normalize_subject(&r.subject) == base)
        .filter(|r| r.sent_at.map(|t| t < cutoff).unwrap_or(false))
        .collect();

    thread.sort_by_key(|r| (r.sent_at, r.id));
    Ok(thread)
}

/// CLI entry point: print the thread leading up to a stored message.
/// Accepts a message id or a numeric surrogate key.
pub async fn run_thread(config: &crate::config::Config, message_id: &str) -> Result<()> {
    let pool = crate::db::connect(config).await?;
    let store = EmailStore::new(pool.clone());

    let mut record = store.find_by_message_id(message_id).await?;
    if record.is_none() {
        if let Ok(id) = message_id.parse::<i64>() {
            record = store.find_by_internal_id(id).await?;
        }
    }
    let Some(record) = record else {
        anyhow::bail!("no email found with id: {}", message_id);
    };

    let thread = resolve_thread(&record, &store).await?;

    println!("thread for {}", record.message_id);
    println!("  subject: {}", record.subject);
    println!("  normalized: {}", normalize_subject(&record.subject));
    println!("  prior messages: {}", thread.len());
    for (i, email) in thread.iter().enumerate() {
        let sent = email
            .sent_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!();
        println!("{}. {} -> {}", i + 1, email.sender, email.receiver);
        println!("   sent: {}", sent);
        println!("   subject: {}", email.subject);
        let preview: String = email.content.chars().take(100).collect();
        println!("   preview: {}", preview.replace('\n', " "));
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_single_prefix() {
        assert_eq!(normalize_subject("Re: Budget"), "Budget");
        assert_eq!(normalize_subject("RE: Budget"), "Budget");
        assert_eq!(normalize_subject("fwd: Budget"), "Budget");
    }

    #[test]
    fn normalize_strips_stacked_prefixes() {
        assert_eq!(normalize_subject("Re: Fwd: RE: Budget"), "Budget");
    }

    #[test]
    fn normalize_is_idempotent() {
        for s in ["Re: Budget", "Budget", "  Fw: Re: Q3 numbers ", "", "Re:"] {
            let once = normalize_subject(s);
            assert_eq!(normalize_subject(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn normalize_keeps_interior_prefix_words() {
        // "re" inside the subject is not a prefix.
        assert_eq!(normalize_subject("Regarding the budget"), "Regarding the budget");
        assert_eq!(normalize_subject("Budget re: review"), "Budget re: review");
    }

    #[test]
    fn variants_cover_reply_forms() {
        let v = subject_variants("Budget");
        assert!(v.contains(&"Budget".to_string()));
        assert!(v.contains(&"Re: Budget".to_string()));
        assert!(v.contains(&"Fwd: Budget".to_string()));
    }

    use crate::store::test_support::{email, mem_store};

    #[tokio::test]
    async fn references_resolve_and_exclude_seed() {
        let store = mem_store().await;
        store
            .insert(&email("<a@x>", "x@corp", "y@corp", "Budget", 1))
            .await
            .unwrap();
        let mut b = email("<b@x>", "y@corp", "x@corp", "Re: Budget", 2);
        b.references = vec!["<a@x>".to_string()];
        store.insert(&b).await.unwrap();

        let seed = store.find_by_message_id("<b@x>").await.unwrap().unwrap();
        let thread = resolve_thread(&seed, &store).await.unwrap();
        assert_eq!(thread.len(), 1);
        assert_eq!(thread[0].message_id, "<a@x>");
    }

    #[tokio::test]
    async fn references_order_chronologically() {
        let store = mem_store().await;
        // Stored timestamps contradict the chain order: time wins.
        let mut one = email("<one@x>", "x@corp", "y@corp", "Plan", 20);
        one.references = Vec::new();
        store.insert(&one).await.unwrap();
        store
            .insert(&email("<two@x>", "y@corp", "x@corp", "Re: Plan", 10))
            .await
            .unwrap();

        let mut seed = email("<three@x>", "x@corp", "y@corp", "Re: Plan", 30);
        seed.references = vec!["<one@x>".to_string(), "<two@x>".to_string()];
        store.insert(&seed).await.unwrap();

        let seed = store.find_by_message_id("<three@x>").await.unwrap().unwrap();
        let thread = resolve_thread(&seed, &store).await.unwrap();
        let ids: Vec<&str> = thread.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["<two@x>", "<one@x>"]);
    }

    #[tokio::test]
    async fn subject_fallback_orders_oldest_first() {
        let store = mem_store().await;
        store
            .insert(&email("<t1@x>", "x@corp", "y@corp", "Budget", 1))
            .await
            .unwrap();
        store
            .insert(&email("<t2@x>", "y@corp", "x@corp", "Re: Budget", 2))
            .await
            .unwrap();
        store
            .insert(&email("<t3@x>", "x@corp", "y@corp", "Re: Budget", 3))
            .await
            .unwrap();
        // Same subject but sent later: not part of the history.
        store
            .insert(&email("<t4@x>", "y@corp", "x@corp", "Re: Budget", 4))
            .await
            .unwrap();

        let seed = store.find_by_message_id("<t3@x>").await.unwrap().unwrap();
        let thread = resolve_thread(&seed, &store).await.unwrap();
        let ids: Vec<&str> = thread.iter().map(|r| r.message_id.as_str()).collect();
        assert_eq!(ids, vec!["<t1@x>", "<t2@x>"]);
    }

    #[tokio::test]
    async fn no_subject_and_no_references_is_empty() {
        let store = mem_store().await;
        store
            .insert(&email("<bare@x>", "x@corp", "y@corp", "", 5))
            .await
            .unwrap();

        let seed = store.find_by_message_id("<bare@x>").await.unwrap().unwrap();
        let thread = resolve_thread(&seed, &store).await.unwrap();
        assert!(thread.is_empty());
    }

    #[tokio::test]
    async fn undated_seed_yields_empty_subject_fallback() {
        let store = mem_store().await;
        store
            .insert(&email("<t1@x>", "x@corp", "y@corp", "Budget", 1))
            .await
            .unwrap();
        store
            .insert(&email("<undated@x>", "y@corp", "x@corp", "Re: Budget", -1))
            .await
            .unwrap();

        let seed = store
            .find_by_message_id("<undated@x>")
            .await
            .unwrap()
            .unwrap();
        let thread = resolve_thread(&seed, &store).await.unwrap();
        assert!(thread.is_empty());
    }
}

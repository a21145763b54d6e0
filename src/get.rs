//! Record inspection commands.
//!
//! Read-side CLI entry points over the relational store: fetch a single
//! canonical record, list a correspondent pair's conversation, and list
//! the distinct senders in the corpus.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::EmailRecord;
use crate::store::EmailStore;

/// Print a full canonical record by message id.
pub async fn run_get(config: &Config, message_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = EmailStore::new(pool.clone());

    let record = store.find_by_message_id(message_id).await?;
    let Some(record) = record else {
        pool.close().await;
        bail!("no email found with message id: {}", message_id);
    };

    println!("--- Email ---");
    println!("id:           {}", record.id);
    println!("message_id:   {}", record.message_id);
    if let Some(ref parent) = record.parent_message_id {
        println!("parent:       {}", parent);
    }
    if !record.references.is_empty() {
        println!("references:   {}", record.references.join(" "));
    }
    println!("sender:       {}", record.sender);
    println!("receiver:     {}", record.receiver);
    println!("subject:      {}", record.subject);
    println!("sent_at:      {}", format_sent_at(&record));
    println!();
    println!("--- Body ---");
    println!("{}", record.content);

    pool.close().await;
    Ok(())
}

/// Print a correspondent pair's conversation, most recent first.
pub async fn run_conversation(
    config: &Config,
    sender: &str,
    receiver: &str,
    limit: i64,
    bidirectional: bool,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = EmailStore::new(pool.clone());

    let records = store
        .find_conversation(sender, receiver, limit, bidirectional)
        .await?;

    if records.is_empty() {
        println!("No emails found.");
        pool.close().await;
        return Ok(());
    }

    let direction = if bidirectional { "<->" } else { "->" };
    println!("conversation {} {} {}", sender, direction, receiver);
    println!("  mails: {}", records.len());
    for (i, record) in records.iter().enumerate() {
        let preview: String = record.content.chars().take(100).collect();
        println!();
        println!("{}. {} -> {}", i + 1, record.sender, record.receiver);
        println!("   id: {}", record.message_id);
        println!("   sent: {}", format_sent_at(record));
        println!("   subject: {}", record.subject);
        println!("   preview: {}", preview.replace('\n', " "));
    }

    pool.close().await;
    Ok(())
}

/// List every distinct sender address in the corpus.
pub async fn run_senders(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = EmailStore::new(pool.clone());

    let senders = store.senders().await?;
    if senders.is_empty() {
        println!("No senders found.");
    } else {
        for sender in &senders {
            println!("{}", sender);
        }
    }

    pool.close().await;
    Ok(())
}

fn format_sent_at(record: &EmailRecord) -> String {
    record
        .sent_at
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| "(unknown)".to_string())
}

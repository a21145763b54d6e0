//! Email normalization.
//!
//! Turns raw email payloads into canonical [`ParsedEmail`] records. Two
//! input shapes are supported: standard MIME messages (`.eml`, parsed with
//! `mail-parser`) and the flat headered format used by bulk corpus dumps
//! (parsed with a plain key/value header parser — header position is never
//! assumed).
//!
//! Normalization is a pure parse: no I/O, no store access.

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use std::collections::HashMap;
use std::fmt;

use crate::models::ParsedEmail;

/// Permanent rejection reasons. A rejected payload is not stored and not
/// embedded; batch ingestion records the reason and moves on.
#[derive(Debug)]
pub enum NormalizeError {
    /// The payload is not a parseable message at all.
    Unparseable(String),
    /// No Message-ID could be extracted — the record has no identity.
    MissingMessageId,
}

impl fmt::Display for NormalizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeError::Unparseable(reason) => write!(f, "unparseable message: {}", reason),
            NormalizeError::MissingMessageId => write!(f, "no parseable Message-ID"),
        }
    }
}

impl std::error::Error for NormalizeError {}

/// Parse a MIME message into a canonical record.
///
/// Sender/receiver are reduced to bare lowercase addresses; a missing or
/// unparseable address becomes an empty string rather than an error. The
/// body prefers the plain-text part and falls back to the HTML part
/// verbatim. A missing Message-ID is a permanent reject.
pub fn normalize_eml(raw: &[u8]) -> Result<ParsedEmail, NormalizeError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| NormalizeError::Unparseable("not a MIME message".to_string()))?;

    let message_id = message
        .message_id()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeError::MissingMessageId)?;

    let sender = message
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(clean_address)
        .unwrap_or_default();

    let receiver = message
        .to()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(clean_address)
        .unwrap_or_default();

    let subject = message.subject().unwrap_or_default().to_string();

    let sent_at = message
        .date()
        .and_then(|dt| DateTime::from_timestamp(dt.to_timestamp(), 0));

    let references = match message.references() {
        mail_parser::HeaderValue::Text(s) => vec![s.trim().to_string()],
        mail_parser::HeaderValue::TextList(list) => {
            list.iter().map(|s| s.trim().to_string()).collect()
        }
        _ => Vec::new(),
    };

    let in_reply_to = match message.in_reply_to() {
        mail_parser::HeaderValue::Text(s) => Some(s.trim().to_string()),
        mail_parser::HeaderValue::TextList(list) => list.first().map(|s| s.trim().to_string()),
        _ => None,
    };
    // Fall back to the end of the ancestor chain when In-Reply-To is absent.
    let parent_message_id = in_reply_to.or_else(|| references.last().cloned());

    let content = message
        .body_text(0)
        .map(|s| s.to_string())
        .or_else(|| message.body_html(0).map(|s| s.to_string()))
        .unwrap_or_default();

    Ok(ParsedEmail {
        message_id,
        parent_message_id,
        references,
        sender,
        receiver,
        subject,
        content,
        sent_at,
    })
}

/// Parse the flat headered corpus format: a `Key: value` header block,
/// a blank line, then the body.
///
/// Headers are matched by name, case-insensitively, wherever they appear;
/// continuation lines (leading whitespace) fold into the previous header.
pub fn normalize_headered(raw: &str) -> Result<ParsedEmail, NormalizeError> {
    let (headers, body) = split_headers(raw)?;

    let message_id = headers
        .get("message-id")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(NormalizeError::MissingMessageId)?;

    let sender = headers.get("from").map(|s| clean_address(s)).unwrap_or_default();
    let receiver = headers.get("to").map(|s| clean_address(s)).unwrap_or_default();
    let subject = headers.get("subject").cloned().unwrap_or_default();
    let sent_at = headers.get("date").and_then(|s| parse_date(s));

    let references: Vec<String> = headers
        .get("references")
        .map(|s| s.split_whitespace().map(|id| id.to_string()).collect())
        .unwrap_or_default();

    let parent_message_id = headers
        .get("in-reply-to")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| references.last().cloned());

    Ok(ParsedEmail {
        message_id,
        parent_message_id,
        references,
        sender,
        receiver,
        subject,
        content: body,
        sent_at,
    })
}

/// Split a flat message into a folded header map and the body text.
fn split_headers(raw: &str) -> Result<(HashMap<String, String>, String), NormalizeError> {
    let mut headers: HashMap<String, String> = HashMap::new();
    let mut last_key: Option<String> = None;
    let mut lines = raw.lines();
    let mut saw_header = false;

    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            // Continuation of the previous header.
            if let Some(ref key) = last_key {
                if let Some(value) = headers.get_mut(key) {
                    value.push(' ');
                    value.push_str(line.trim());
                }
            }
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            return Err(NormalizeError::Unparseable(format!(
                "malformed header line: {:?}",
                line
            )));
        };
        let key = key.trim().to_lowercase();
        // First occurrence wins for repeated headers.
        headers
            .entry(key.clone())
            .or_insert_with(|| value.trim().to_string());
        last_key = Some(key);
        saw_header = true;
    }

    if !saw_header {
        return Err(NormalizeError::Unparseable("no header block".to_string()));
    }

    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    Ok((headers, body))
}

/// Reduce an address header to a bare lowercase address.
///
/// Handles `"Display Name" <addr>` forms and comma-separated lists (first
/// entry wins). Returns an empty string when nothing usable remains.
pub fn clean_address(raw: &str) -> String {
    let first = raw.split(',').next().unwrap_or("").trim();

    let addr = match (first.find('<'), first.rfind('>')) {
        (Some(start), Some(end)) if start < end => &first[start + 1..end],
        _ => first,
    };

    addr.trim().trim_matches('"').trim().to_lowercase()
}

/// Parse an RFC 2822 date, tolerating a trailing comment like `(PST)`.
/// Unparseable dates become `None`, never a fabricated timestamp.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let mut s = raw.trim();
    if s.ends_with(')') {
        if let Some(open) = s.rfind('(') {
            s = s[..open].trim();
        }
    }
    DateTime::parse_from_rfc2822(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE_EML: &str = "\
From: Alice Smith <Alice@Example.com>\r\n\
To: Bob <bob@example.com>\r\n\
Subject: Budget review\r\n\
Message-ID: <msg-001@example.com>\r\n\
Date: Sat, 20 Nov 2021 14:22:01 -0800\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hi Bob, numbers attached.\r\n";

    #[test]
    fn eml_simple() {
        let parsed = normalize_eml(SIMPLE_EML.as_bytes()).unwrap();
        assert_eq!(parsed.message_id, "msg-001@example.com");
        assert_eq!(parsed.sender, "alice@example.com");
        assert_eq!(parsed.receiver, "bob@example.com");
        assert_eq!(parsed.subject, "Budget review");
        assert!(parsed.sent_at.is_some());
        assert!(parsed.parent_message_id.is_none());
        assert!(parsed.references.is_empty());
        assert!(parsed.content.contains("numbers attached"));
    }

    #[test]
    fn eml_reply_threading_headers() {
        let eml = "\
From: Bob <bob@example.com>\r\n\
To: Alice <alice@example.com>\r\n\
Subject: Re: Budget review\r\n\
Message-ID: <msg-002@example.com>\r\n\
In-Reply-To: <msg-001@example.com>\r\n\
References: <msg-000@example.com> <msg-001@example.com>\r\n\
Date: Sun, 21 Nov 2021 10:00:00 -0800\r\n\
Content-Type: text/plain\r\n\
\r\n\
Looks good to me.\r\n";

        let parsed = normalize_eml(eml.as_bytes()).unwrap();
        assert_eq!(
            parsed.parent_message_id.as_deref(),
            Some("msg-001@example.com")
        );
        assert_eq!(
            parsed.references,
            vec!["msg-000@example.com", "msg-001@example.com"]
        );
    }

    #[test]
    fn eml_parent_falls_back_to_references() {
        let eml = "\
From: bob@example.com\r\n\
To: alice@example.com\r\n\
Subject: Re: Budget review\r\n\
Message-ID: <msg-003@example.com>\r\n\
References: <msg-001@example.com> <msg-002@example.com>\r\n\
Content-Type: text/plain\r\n\
\r\n\
Replying without In-Reply-To.\r\n";

        let parsed = normalize_eml(eml.as_bytes()).unwrap();
        assert_eq!(
            parsed.parent_message_id.as_deref(),
            Some("msg-002@example.com")
        );
    }

    #[test]
    fn eml_missing_message_id_rejected() {
        let eml = "\
From: bob@example.com\r\n\
To: alice@example.com\r\n\
Subject: No identity\r\n\
Content-Type: text/plain\r\n\
\r\n\
Body.\r\n";

        let err = normalize_eml(eml.as_bytes()).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingMessageId));
    }

    #[test]
    fn eml_html_only_body() {
        let eml = "\
From: bob@example.com\r\n\
To: alice@example.com\r\n\
Subject: HTML only\r\n\
Message-ID: <msg-004@example.com>\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>Rich text body</p>\r\n";

        let parsed = normalize_eml(eml.as_bytes()).unwrap();
        assert!(parsed.content.contains("Rich text body"));
    }

    #[test]
    fn headered_basic() {
        let raw = "\
Message-ID: <18782981.1075855378110.JavaMail.evans@thyme>\n\
Date: Mon, 14 May 2001 16:39:00 -0700 (PDT)\n\
From: Kay Mann <kay.mann@enron.com>\n\
To: vince.kaminski@enron.com\n\
Subject: Re: Turbine deal\n\
\n\
Here's the latest draft.\n\
Let me know.\n";

        let parsed = normalize_headered(raw).unwrap();
        assert_eq!(
            parsed.message_id,
            "<18782981.1075855378110.JavaMail.evans@thyme>"
        );
        assert_eq!(parsed.sender, "kay.mann@enron.com");
        assert_eq!(parsed.receiver, "vince.kaminski@enron.com");
        assert_eq!(parsed.subject, "Re: Turbine deal");
        assert!(parsed.sent_at.is_some());
        assert_eq!(parsed.content, "Here's the latest draft.\nLet me know.");
    }

    #[test]
    fn headered_continuation_and_first_recipient() {
        let raw = "\
Message-ID: <m1@corp>\n\
From: a@corp\n\
To: b@corp,\n\
\tc@corp\n\
Subject: Fan-out\n\
\n\
Body\n";

        let parsed = normalize_headered(raw).unwrap();
        assert_eq!(parsed.receiver, "b@corp");
    }

    #[test]
    fn headered_bad_date_is_none() {
        let raw = "\
Message-ID: <m2@corp>\n\
From: a@corp\n\
To: b@corp\n\
Date: not a date\n\
Subject: x\n\
\n\
Body\n";

        let parsed = normalize_headered(raw).unwrap();
        assert!(parsed.sent_at.is_none());
    }

    #[test]
    fn headered_garbage_rejected() {
        assert!(matches!(
            normalize_headered("no colons here\njust text\n"),
            Err(NormalizeError::Unparseable(_))
        ));
        assert!(matches!(
            normalize_headered("From: a@corp\nTo: b@corp\n\nBody\n"),
            Err(NormalizeError::MissingMessageId)
        ));
    }

    #[test]
    fn clean_address_forms() {
        assert_eq!(clean_address("Kay Mann <Kay.Mann@ENRON.com>"), "kay.mann@enron.com");
        assert_eq!(clean_address("plain@example.com"), "plain@example.com");
        assert_eq!(clean_address("\"Quoted\" <Q@e.com>"), "q@e.com");
        assert_eq!(clean_address("first@e.com, second@e.com"), "first@e.com");
        assert_eq!(clean_address(""), "");
    }
}

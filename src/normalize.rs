//! Message normalizer — raw transport bytes to a canonical `InboundMessage`.
//!
//! Total: malformed headers degrade to empty strings, malformed dates to the
//! fetch time, unparseable bytes to a lossy-UTF-8 body. Never errors, never
//! panics, never reads attachment content.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders};
use sha2::{Digest, Sha256};

use crate::pipeline::types::{AttachmentMeta, InboundMessage};
use crate::source::RawMessage;

/// Bytes of body hashed into a synthesized message id.
const SYNTH_ID_BODY_PREFIX: usize = 256;

/// Normalize a raw transport message.
pub fn normalize(raw: &RawMessage) -> InboundMessage {
    let parsed = MessageParser::default().parse(&raw.bytes);

    let Some(msg) = parsed else {
        // Unparseable: degrade to a bare-body message so the pipeline can
        // still classify and dedup it.
        let body_text = String::from_utf8_lossy(&raw.bytes).into_owned();
        let message_id = synthesize_message_id("", "", raw.fetched_at, &body_text);
        return InboundMessage {
            message_id,
            sender_name: String::new(),
            sender_email: String::new(),
            subject: String::new(),
            body_text,
            body_html: None,
            received_at: raw.fetched_at,
            attachments: Vec::new(),
            headers: BTreeMap::new(),
        };
    };

    let (sender_name, sender_email) = extract_sender(&msg);
    let subject = msg.subject().unwrap_or_default().to_string();
    let received_at = extract_date(&msg).unwrap_or(raw.fetched_at);

    // Prefer text/plain; fall back to markup-stripped HTML. The original
    // HTML part is retained either way.
    let body_html = msg.body_html(0).map(|s| s.into_owned());
    let body_text = msg
        .body_text(0)
        .map(|s| s.into_owned())
        .or_else(|| body_html.as_deref().map(strip_html))
        .unwrap_or_default();

    let message_id = msg
        .message_id()
        .map(str::to_string)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| {
            synthesize_message_id(&sender_email, &subject, received_at, &body_text)
        });

    InboundMessage {
        message_id,
        sender_name,
        sender_email,
        subject,
        body_text,
        body_html,
        received_at,
        attachments: extract_attachments(&msg),
        headers: extract_headers(&raw.bytes),
    }
}

/// Stable identity for messages whose transport supplies no Message-ID:
/// sha256 over (sender, subject, received timestamp, body prefix).
fn synthesize_message_id(
    sender_email: &str,
    subject: &str,
    received_at: DateTime<Utc>,
    body: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender_email.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(subject.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(received_at.timestamp().to_be_bytes());
    hasher.update(b"\x1f");
    let mut prefix_end = body.len().min(SYNTH_ID_BODY_PREFIX);
    while !body.is_char_boundary(prefix_end) {
        prefix_end -= 1;
    }
    hasher.update(body[..prefix_end].as_bytes());

    let digest = hasher.finalize();
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("synth-{hex}")
}

/// Extract the sender display name and address.
fn extract_sender(msg: &mail_parser::Message) -> (String, String) {
    let addr = msg.from().and_then(|a| a.first());
    let name = addr
        .and_then(|a| a.name())
        .map(|s| s.to_string())
        .unwrap_or_default();
    let email = addr
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_default();
    (name, email)
}

/// Extract the Date header as UTC, if parseable.
fn extract_date(msg: &mail_parser::Message) -> Option<DateTime<Utc>> {
    msg.date().and_then(|d| {
        chrono::NaiveDate::from_ymd_opt(d.year as i32, u32::from(d.month), u32::from(d.day))
            .and_then(|date| {
                date.and_hms_opt(
                    u32::from(d.hour),
                    u32::from(d.minute),
                    u32::from(d.second),
                )
            })
            .map(|naive| naive.and_utc())
    })
}

/// Collect attachment metadata without decoding content beyond what the
/// parser already holds in memory.
fn extract_attachments(msg: &mail_parser::Message) -> Vec<AttachmentMeta> {
    msg.attachments()
        .enumerate()
        .map(|(idx, part)| {
            let filename = part
                .attachment_name()
                .map(String::from)
                .unwrap_or_else(|| format!("attachment_{idx}"));
            let content_type = part
                .content_type()
                .map(|ct| match ct.subtype() {
                    Some(sub) => format!("{}/{sub}", ct.ctype()),
                    None => ct.ctype().to_string(),
                })
                .unwrap_or_else(|| "application/octet-stream".to_string());
            AttachmentMeta {
                filename,
                content_type,
                size: part.contents().len(),
            }
        })
        .collect()
}

/// Parse the raw header block (everything before the first blank line) into
/// a map, unfolding continuation lines. First value wins on duplicates.
fn extract_headers(data: &[u8]) -> BTreeMap<String, String> {
    let text = String::from_utf8_lossy(data);
    let header_block = text
        .find("\r\n\r\n")
        .map(|pos| &text[..pos])
        .or_else(|| text.find("\n\n").map(|pos| &text[..pos]))
        .unwrap_or(&text);

    let mut headers = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in header_block.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            // Folded continuation of the previous header.
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = current.take() {
            headers.entry(name).or_insert(value);
        }
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.trim().to_string(), value.trim().to_string()));
        }
    }
    if let Some((name, value)) = current {
        headers.entry(name).or_insert(value);
    }

    headers
}

/// Strip markup from an HTML body for classification purposes.
fn strip_html(html: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result = result.replace("&amp;", "&");
    result = result.replace("&lt;", "<");
    result = result.replace("&gt;", ">");
    result = result.replace("&quot;", "\"");
    result = result.replace("&nbsp;", " ");
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bytes: &[u8]) -> RawMessage {
        RawMessage {
            id: "spool-1".into(),
            bytes: bytes.to_vec(),
            fetched_at: Utc::now(),
        }
    }

    const PLAIN_EMAIL: &[u8] = b"Message-ID: <abc@mail.example.com>\r\n\
From: Alice Martin <alice@example.com>\r\n\
To: support@example.com\r\n\
Subject: Probleme de connexion\r\n\
Date: Mon, 6 Jan 2025 10:30:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Bonjour, je ne peux plus me connecter depuis ce matin.\r\n";

    #[test]
    fn normalizes_plain_email() {
        let msg = normalize(&raw(PLAIN_EMAIL));
        assert_eq!(msg.message_id, "abc@mail.example.com");
        assert_eq!(msg.sender_name, "Alice Martin");
        assert_eq!(msg.sender_email, "alice@example.com");
        assert_eq!(msg.subject, "Probleme de connexion");
        assert!(msg.body_text.contains("me connecter"));
        assert!(msg.body_html.is_none());
        assert_eq!(msg.received_at.format("%Y-%m-%d").to_string(), "2025-01-06");
    }

    #[test]
    fn header_map_extracted() {
        let msg = normalize(&raw(PLAIN_EMAIL));
        assert_eq!(msg.headers.get("To").map(String::as_str), Some("support@example.com"));
        assert!(msg.headers.contains_key("Message-ID"));
    }

    #[test]
    fn html_only_body_is_stripped() {
        let email = b"From: bob@example.com\r\n\
Subject: Devis\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<html><body><p>Bonjour, je souhaite un <b>devis</b>.</p></body></html>\r\n";
        let msg = normalize(&raw(email));
        assert!(msg.body_text.contains("je souhaite un devis"));
        assert!(!msg.body_text.contains('<'));
        assert!(msg.body_html.is_some());
    }

    #[test]
    fn missing_message_id_is_synthesized_and_stable() {
        let email = b"From: carol@example.com\r\n\
Subject: Question\r\n\
Date: Mon, 6 Jan 2025 10:30:00 +0000\r\n\
\r\n\
Comment ca marche ?\r\n";
        let first = normalize(&raw(email));
        let second = normalize(&raw(email));
        assert!(first.message_id.starts_with("synth-"));
        // Stable across fetches: the date header pins received_at.
        assert_eq!(first.message_id, second.message_id);
    }

    #[test]
    fn missing_date_degrades_to_fetch_time() {
        let email = b"From: dan@example.com\r\nSubject: Hi\r\n\r\nBody\r\n";
        let input = raw(email);
        let msg = normalize(&input);
        assert_eq!(msg.received_at, input.fetched_at);
    }

    #[test]
    fn garbage_bytes_still_normalize() {
        // Total: no panic, no error, and a usable dedup key.
        let msg = normalize(&raw(b"\xff\xfe not really an email"));
        assert!(!msg.message_id.is_empty());
        assert!(msg.subject.is_empty());
        assert!(msg.attachments.is_empty());
    }

    #[test]
    fn attachment_metadata_extracted_without_content() {
        let email = b"From: eve@example.com\r\n\
Subject: Rapport\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: text/plain\r\n\
\r\n\
Voir le rapport joint.\r\n\
--b1\r\n\
Content-Type: application/pdf; name=\"rapport.pdf\"\r\n\
Content-Disposition: attachment; filename=\"rapport.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQ=\r\n\
--b1--\r\n";
        let msg = normalize(&raw(email));
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].filename, "rapport.pdf");
        assert_eq!(msg.attachments[0].content_type, "application/pdf");
        assert!(msg.attachments[0].size > 0);
        assert!(msg.body_text.contains("rapport joint"));
    }

    #[test]
    fn folded_headers_unfold() {
        let email = b"From: frank@example.com\r\n\
Subject: Une ligne\r\n tres longue\r\n\
\r\n\
Body\r\n";
        let msg = normalize(&raw(email));
        assert_eq!(
            msg.headers.get("Subject").map(String::as_str),
            Some("Une ligne tres longue")
        );
    }

    #[test]
    fn synthesized_ids_differ_across_content() {
        let a = normalize(&raw(b"From: x@y.z\r\nSubject: A\r\nDate: Mon, 6 Jan 2025 10:00:00 +0000\r\n\r\nun\r\n"));
        let b = normalize(&raw(b"From: x@y.z\r\nSubject: B\r\nDate: Mon, 6 Jan 2025 10:00:00 +0000\r\n\r\ndeux\r\n"));
        assert_ne!(a.message_id, b.message_id);
    }
}

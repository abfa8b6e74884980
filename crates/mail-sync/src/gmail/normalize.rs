//! Gmail API response normalization
//!
//! Converts raw Gmail messages to [`CanonicalMessage`].

use anyhow::{Context, Result};
use base64::prelude::*;
use chrono::{TimeZone, Utc};

use super::api::{GmailMessage, MessagePart};
use crate::models::{AttachmentPart, AttachmentSource, CanonicalMessage, split_address_list};
use crate::sanitize::sanitize_text;

const HTML_MIME: &str = "text/html";
const PLAIN_MIME: &str = "text/plain";

/// Normalize a Gmail API message
///
/// `self_address` is the connected account's own address; a message is
/// incoming unless that address appears in its `From` header.
pub fn normalize_message(gmail_msg: &GmailMessage, self_address: &str) -> Result<CanonicalMessage> {
    let payload = gmail_msg
        .payload
        .as_ref()
        .with_context(|| format!("Message {} has no payload", gmail_msg.id))?;

    let from = extract_header(payload, "From").unwrap_or_default();
    let to = extract_header(payload, "To")
        .map(|s| split_address_list(&s))
        .unwrap_or_default();
    let cc = extract_header(payload, "Cc")
        .map(|s| split_address_list(&s))
        .unwrap_or_default();
    let subject = extract_header(payload, "Subject").unwrap_or_default();
    let reply_to_id = extract_header(payload, "In-Reply-To").filter(|s| !s.trim().is_empty());

    // Message-ID survives re-delivery and copies between mailboxes; the Gmail id does not
    let provider_message_id = extract_header(payload, "Message-ID")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| gmail_msg.id.clone());

    // Parse internal date (milliseconds since epoch)
    let internal_date: i64 = gmail_msg
        .internal_date
        .as_deref()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0);
    let sent_at = Utc
        .timestamp_millis_opt(internal_date)
        .single()
        .unwrap_or_else(Utc::now);

    let html_content = sanitize_text(&part_content(payload, HTML_MIME));
    let plain_text_content = sanitize_text(&part_content(payload, PLAIN_MIME));

    let incoming = !from
        .to_lowercase()
        .contains(&self_address.trim().to_lowercase());

    let mut attachments = Vec::new();
    collect_attachments(payload, &mut attachments);

    Ok(CanonicalMessage::builder(&gmail_msg.id)
        .provider_message_id(provider_message_id)
        .history_id(gmail_msg.history_id())
        .from(from)
        .to(to)
        .cc(cc)
        .subject(subject)
        .reply_to_id(reply_to_id)
        .sent_at(sent_at)
        .html_content(html_content)
        .plain_text_content(plain_text_content)
        .incoming(incoming)
        .label_ids(gmail_msg.label_ids.clone().unwrap_or_default())
        .attachments(attachments)
        .build())
}

/// Extract a header value by name
fn extract_header(part: &MessagePart, name: &str) -> Option<String> {
    part.headers.as_ref()?.iter().find_map(|h| {
        if h.name.eq_ignore_ascii_case(name) {
            Some(h.value.clone())
        } else {
            None
        }
    })
}

fn is_attachment(part: &MessagePart) -> bool {
    part.filename.as_deref().is_some_and(|f| !f.is_empty())
}

fn has_mime(part: &MessagePart, mime: &str) -> bool {
    part.mime_type
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case(mime))
}

/// Text content of `part` for one MIME alternative
///
/// A part with inline text data yields that data. Otherwise, if any child
/// has exactly the wanted type only those children are used, else all
/// children; their content is concatenated depth-first. Attachments never
/// contribute.
pub fn part_content(part: &MessagePart, mime: &str) -> String {
    if is_attachment(part) {
        return String::new();
    }

    if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref())
        && !data.is_empty()
    {
        let is_text = part
            .mime_type
            .as_deref()
            .is_none_or(|m| m.to_ascii_lowercase().starts_with("text/"));
        return if is_text {
            decode_base64_text(data).unwrap_or_default()
        } else {
            String::new()
        };
    }

    let Some(children) = &part.parts else {
        return String::new();
    };

    let matching: Vec<&MessagePart> = children.iter().filter(|p| has_mime(p, mime)).collect();
    let chosen: Vec<&MessagePart> = if matching.is_empty() {
        children.iter().collect()
    } else {
        matching
    };

    chosen.into_iter().map(|p| part_content(p, mime)).collect()
}

/// Walk the part tree and collect every named attachment
fn collect_attachments(part: &MessagePart, out: &mut Vec<AttachmentPart>) {
    if is_attachment(part) {
        let body = part.body.as_ref();
        let source = body
            .and_then(|b| b.attachment_id.clone())
            .map(AttachmentSource::Remote)
            .or_else(|| {
                body.and_then(|b| b.data.clone())
                    .filter(|d| !d.is_empty())
                    .map(AttachmentSource::Inline)
            });

        match source {
            Some(source) => out.push(AttachmentPart {
                name: part.filename.clone().unwrap_or_default(),
                mime_type: part
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
                size_bytes: body.and_then(|b| b.size).unwrap_or(0),
                source,
            }),
            None => log::debug!(
                "Attachment part {:?} has neither data nor attachment id",
                part.part_id
            ),
        }
    }

    if let Some(children) = &part.parts {
        for child in children {
            collect_attachments(child, out);
        }
    }
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
pub fn decode_base64_bytes(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    decoders.iter().find_map(|decoder| decoder.decode(data).ok())
}

/// Decode base64 body data as text, replacing invalid UTF-8
pub fn decode_base64_text(data: &str) -> Option<String> {
    decode_base64_bytes(data).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

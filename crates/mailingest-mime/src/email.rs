//! Structured email records extracted from raw messages.

use chrono::{DateTime, Utc};

use crate::address::extract_address;
use crate::content_type::DispositionKind;
use crate::encoding::decode_text;
use crate::header::{Headers, parse_date};
use crate::message::Entity;

/// Envelope information of a parsed email.
///
/// Header values are RFC 2047 decoded but otherwise kept as written, so
/// `from` may still carry a display name. Use [`EmailInfo::sender_address`]
/// and [`EmailInfo::receiver_address`] for bare addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmailInfo {
    /// `From` header.
    pub from: String,
    /// `To` header (all occurrences joined).
    pub to: String,
    /// `Cc` header (all occurrences joined).
    pub cc: String,
    /// `Subject` header.
    pub subject: String,
    /// Raw `Date` header.
    pub date: String,
    /// `Message-ID` header.
    pub message_id: String,
    /// `X-Forwarded-For` header, if present.
    pub forwarded_from: Option<String>,
    /// `X-Forwarded-To` header, if present.
    pub forwarded_to: Option<String>,
}

impl EmailInfo {
    /// Builds the envelope from a parsed header block.
    #[must_use]
    pub fn from_headers(headers: &Headers) -> Self {
        let text = |name: &str| headers.decoded(name).unwrap_or_default();
        let joined = |name: &str| headers.decoded_joined(name).unwrap_or_default();

        Self {
            from: text("from"),
            to: joined("to"),
            cc: joined("cc"),
            subject: text("subject"),
            date: headers.get("date").unwrap_or_default().to_string(),
            message_id: headers.get("message-id").unwrap_or_default().to_string(),
            forwarded_from: headers.decoded("x-forwarded-for"),
            forwarded_to: headers.decoded("x-forwarded-to"),
        }
    }

    /// Bare sender address.
    #[must_use]
    pub fn sender_address(&self) -> String {
        extract_address(&self.from)
    }

    /// Bare address of the first `To` recipient.
    #[must_use]
    pub fn receiver_address(&self) -> String {
        let first = self.to.split(',').next().unwrap_or_default();
        extract_address(first)
    }

    /// The `Date` header parsed to UTC, if it is readable.
    #[must_use]
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        parse_date(&self.date)
    }
}

/// A file attached to an email, with its payload already transfer-decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name as declared by the sender (or synthesised for images).
    pub filename: String,
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// Payload size in bytes.
    pub size_bytes: usize,
    /// Decoded payload.
    pub payload: Vec<u8>,
}

/// An image referenced from the HTML body through `cid:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    /// File name, if declared.
    pub filename: Option<String>,
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// Payload size in bytes.
    pub size_bytes: usize,
    /// Decoded payload.
    pub payload: Vec<u8>,
    /// `Content-ID` without angle brackets. Inline images may lack one.
    pub content_id: Option<String>,
}

/// Body content of a parsed email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmailContent {
    /// Concatenated `text/plain` parts.
    pub text: String,
    /// Concatenated `text/html` parts.
    pub html: String,
    /// Attachments in document order.
    pub attachments: Vec<Attachment>,
    /// Inline images in document order.
    pub embedded_images: Vec<EmbeddedImage>,
}

/// A fully parsed email.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedEmail {
    /// Envelope.
    pub info: EmailInfo,
    /// Body content.
    pub content: EmailContent,
}

/// Parses a raw RFC 5322 message.
///
/// Never fails. Parts that cannot be decoded are logged and skipped, and
/// unreadable header values fall back to their raw form.
#[must_use]
pub fn parse(raw: &[u8]) -> ParsedEmail {
    let root = Entity::parse(raw);
    let info = EmailInfo::from_headers(&root.headers);
    let mut content = EmailContent::default();
    let mut image_index = 0usize;

    for (index, part) in root.leaves().into_iter().enumerate() {
        let payload = match part.decode_body() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(part = index, error = %e, "Skipping undecodable MIME part");
                continue;
            }
        };

        let ct = &part.content_type;
        let disposition = part.disposition();
        let filename = disposition.filename.clone().or_else(|| ct.name());

        if ct.is_image() {
            let content_id = part.content_id();
            if disposition.kind == DispositionKind::Inline || content_id.is_some() {
                if !payload.is_empty() {
                    content.embedded_images.push(EmbeddedImage {
                        filename,
                        content_type: ct.mime_type(),
                        size_bytes: payload.len(),
                        payload,
                        content_id,
                    });
                }
            } else {
                image_index += 1;
                let filename = filename.unwrap_or_else(|| {
                    format!("image_{image_index}.{}", image_extension(&ct.sub_type))
                });
                push_attachment(&mut content, filename, ct.mime_type(), payload);
            }
            continue;
        }

        if disposition.kind == DispositionKind::Attachment
            && let Some(filename) = disposition.filename
        {
            push_attachment(&mut content, filename, ct.mime_type(), payload);
            continue;
        }

        match (ct.main_type.as_str(), ct.sub_type.as_str()) {
            ("text", "plain") => {
                let (text, stage) = decode_text(&payload, ct.charset());
                tracing::trace!(part = index, ?stage, "Decoded text/plain part");
                content.text.push_str(&text);
            }
            ("text", "html") => {
                let (html, stage) = decode_text(&payload, ct.charset());
                tracing::trace!(part = index, ?stage, "Decoded text/html part");
                content.html.push_str(&html);
            }
            _ => {
                if let Some(filename) = filename {
                    push_attachment(&mut content, filename, ct.mime_type(), payload);
                } else {
                    tracing::debug!(part = index, content_type = %ct, "Ignoring unnamed MIME part");
                }
            }
        }
    }

    ParsedEmail { info, content }
}

fn push_attachment(
    content: &mut EmailContent,
    filename: String,
    content_type: String,
    payload: Vec<u8>,
) {
    if payload.is_empty() {
        tracing::debug!(%filename, "Skipping empty attachment");
        return;
    }
    content.attachments.push(Attachment {
        filename,
        content_type,
        size_bytes: payload.len(),
        payload,
    });
}

fn image_extension(sub_type: &str) -> &str {
    match sub_type {
        "jpeg" | "pjpeg" => "jpg",
        "svg+xml" => "svg",
        "x-icon" | "vnd.microsoft.icon" => "ico",
        "" => "bin",
        other => other,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MIXED: &str = concat!(
        "From: \"=?utf-8?B?5byg5LiJ?=\" <zhang@sender.example>\r\n",
        "To: Team <team@corp.example>, other@else.example\r\n",
        "Cc: audit@corp.example\r\n",
        "Subject: =?utf-8?Q?Quarterly_report?=\r\n",
        "Date: Mon, 4 Mar 2024 10:00:00 +0000\r\n",
        "Message-ID: <abc@sender.example>\r\n",
        "X-Forwarded-To: inbox@corp.example\r\n",
        "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
        "\r\n",
        "--outer\r\n",
        "Content-Type: multipart/related; boundary=\"rel\"\r\n",
        "\r\n",
        "--rel\r\n",
        "Content-Type: text/html; charset=utf-8\r\n",
        "Content-Transfer-Encoding: quoted-printable\r\n",
        "\r\n",
        "<p>Hi =E4=B8=AD</p><img src=3D\"cid:img1\">\r\n",
        "--rel\r\n",
        "Content-Type: image/png\r\n",
        "Content-ID: <img1>\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "iVBORw0KGgo=\r\n",
        "--rel--\r\n",
        "--outer\r\n",
        "Content-Type: text/csv; name=\"data.csv\"\r\n",
        "Content-Disposition: attachment; filename=\"data.csv\"\r\n",
        "\r\n",
        "a,b\r\n1,2\r\n",
        "--outer\r\n",
        "Content-Type: image/gif\r\n",
        "Content-Transfer-Encoding: base64\r\n",
        "\r\n",
        "R0lGODlh\r\n",
        "--outer--\r\n",
    );

    #[test]
    fn test_parse_info() {
        let parsed = parse(MIXED.as_bytes());
        let info = &parsed.info;
        assert_eq!(info.from, "\"张三\" <zhang@sender.example>");
        assert_eq!(info.sender_address(), "zhang@sender.example");
        assert_eq!(info.receiver_address(), "team@corp.example");
        assert_eq!(info.cc, "audit@corp.example");
        assert_eq!(info.subject, "Quarterly report");
        assert_eq!(info.message_id, "<abc@sender.example>");
        assert_eq!(info.forwarded_to.as_deref(), Some("inbox@corp.example"));
        assert!(info.forwarded_from.is_none());
        assert_eq!(
            info.sent_at(),
            Some(Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_parse_classifies_parts() {
        let content = parse(MIXED.as_bytes()).content;
        assert_eq!(content.html, "<p>Hi 中</p><img src=\"cid:img1\">");
        assert!(content.text.is_empty());

        assert_eq!(content.embedded_images.len(), 1);
        let image = &content.embedded_images[0];
        assert_eq!(image.content_id.as_deref(), Some("img1"));
        assert_eq!(image.content_type, "image/png");
        assert_eq!(&image.payload[..4], b"\x89PNG");

        assert_eq!(content.attachments.len(), 2);
        assert_eq!(content.attachments[0].filename, "data.csv");
        assert_eq!(content.attachments[0].payload, b"a,b\r\n1,2");
        assert_eq!(content.attachments[0].size_bytes, 8);
        assert_eq!(content.attachments[1].filename, "image_1.gif");
        assert_eq!(content.attachments[1].payload, b"GIF89a");
    }

    #[test]
    fn test_parse_image_with_cid_and_attachment_disposition_is_embedded() {
        let raw = concat!(
            "Content-Type: multipart/related; boundary=rel\r\n",
            "\r\n",
            "--rel\r\n",
            "Content-Type: text/html; charset=utf-8\r\n",
            "\r\n",
            "<p>Logo</p><img src=\"cid:logo\">\r\n",
            "--rel\r\n",
            "Content-Type: image/png; name=logo.png\r\n",
            "Content-ID: <logo>\r\n",
            "Content-Disposition: attachment; filename=logo.png\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "iVBORw0KGgo=\r\n",
            "--rel\r\n",
            "Content-Type: image/jpeg\r\n",
            "Content-Disposition: attachment; filename=photo.jpg\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "/9j/4A==\r\n",
            "--rel--\r\n",
        );
        let content = parse(raw.as_bytes()).content;

        assert_eq!(content.embedded_images.len(), 1);
        assert_eq!(content.embedded_images[0].content_id.as_deref(), Some("logo"));
        assert_eq!(content.attachments.len(), 1);
        assert_eq!(content.attachments[0].filename, "photo.jpg");

        let html = crate::reconstruct(&content);
        assert!(!html.contains("cid:logo"));
        assert!(html.contains("data:image/png;base64,"));
    }

    #[test]
    fn test_parse_iso_2022_jp_body() {
        let mut raw =
            b"Subject: =?ISO-2022-JP?B?GyRCJUYlOSVIGyhC?=\r\nContent-Type: text/plain; charset=ISO-2022-JP\r\n\r\n"
                .to_vec();
        raw.extend_from_slice(b"\x1b$B%F%9%H\x1b(B");
        let parsed = parse(&raw);
        assert_eq!(parsed.info.subject, "テスト");
        assert_eq!(parsed.content.text, "テスト");
    }

    #[test]
    fn test_parse_flat_gbk_text() {
        let mut raw = b"Subject: hi\r\nContent-Type: text/plain; charset=gbk\r\n\r\n".to_vec();
        raw.extend_from_slice(&[0xD6, 0xD0, 0xCE, 0xC4]);
        let parsed = parse(&raw);
        assert_eq!(parsed.content.text, "中文");
        assert!(parsed.content.html.is_empty());
    }

    #[test]
    fn test_parse_concatenates_text_parts() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=b\n\n",
            "--b\nContent-Type: text/plain\n\nfirst\n",
            "--b\nContent-Type: text/plain\n\nsecond\n",
            "--b--\n"
        );
        assert_eq!(parse(raw.as_bytes()).content.text, "firstsecond");
    }

    #[test]
    fn test_parse_skips_broken_part() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=b\n\n",
            "--b\nContent-Type: application/pdf\nContent-Transfer-Encoding: base64\n",
            "Content-Disposition: attachment; filename=x.pdf\n\n",
            "@@@not base64@@@\n",
            "--b\nContent-Type: text/plain\n\nstill here\n",
            "--b--\n"
        );
        let content = parse(raw.as_bytes()).content;
        assert!(content.attachments.is_empty());
        assert_eq!(content.text, "still here");
    }

    #[test]
    fn test_parse_garbage_does_not_panic() {
        let parsed = parse(b"\xff\xfe\x00garbage without headers");
        assert!(parsed.info.subject.is_empty());
    }

    #[test]
    fn test_forwarded_from() {
        let parsed = parse(b"X-Forwarded-For: relay@corp.example\r\n\r\nbody");
        assert_eq!(
            parsed.info.forwarded_from.as_deref(),
            Some("relay@corp.example")
        );
    }
}

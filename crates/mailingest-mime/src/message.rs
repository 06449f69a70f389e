//! MIME entity tree.
//!
//! [`Entity::parse`] never fails: malformed structure degrades to a leaf so
//! that the caller can still extract whatever is readable.

use std::fmt;

use crate::content_type::{ContentType, Disposition};
use crate::encoding::{decode_base64, decode_quoted_printable};
use crate::error::Result;
use crate::header::{Headers, split_header_body};

/// Nesting limit for multipart and embedded messages.
const MAX_DEPTH: usize = 32;

/// Transfer encoding types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// 8-bit binary.
    EightBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
    /// Binary (no encoding).
    Binary,
}

impl TransferEncoding {
    /// Parses transfer encoding from string. Unknown values are 7bit.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "8bit" => Self::EightBit,
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "binary" => Self::Binary,
            _ => Self::SevenBit,
        }
    }

    /// Decodes a body encoded with this transfer encoding.
    ///
    /// # Errors
    ///
    /// Returns an error if a Base64 body contains invalid characters.
    pub fn decode(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            Self::Base64 => decode_base64(body),
            Self::QuotedPrintable => Ok(decode_quoted_printable(body)),
            Self::SevenBit | Self::EightBit | Self::Binary => Ok(body.to_vec()),
        }
    }
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::EightBit => write!(f, "8bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
            Self::Binary => write!(f, "binary"),
        }
    }
}

/// Body of a MIME entity.
#[derive(Debug, Clone)]
pub enum Body {
    /// Single part with its still-encoded bytes.
    Leaf(Vec<u8>),
    /// Child entities of a multipart container.
    Multipart(Vec<Entity>),
    /// An embedded `message/rfc822`.
    Message(Box<Entity>),
}

/// A MIME entity: headers plus body.
#[derive(Debug, Clone)]
pub struct Entity {
    /// Entity headers.
    pub headers: Headers,
    /// Parsed content type (defaults to `text/plain`).
    pub content_type: ContentType,
    /// Entity body.
    pub body: Body,
}

impl Entity {
    /// Parses raw bytes into an entity tree.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        Self::parse_at_depth(raw, 0)
    }

    fn parse_at_depth(raw: &[u8], depth: usize) -> Self {
        let (header_bytes, body) = split_header_body(raw);
        let headers = Headers::parse(header_bytes);
        let content_type = ContentType::parse_or_default(headers.get("content-type"));

        let body = if depth >= MAX_DEPTH {
            tracing::debug!(depth, "MIME nesting limit reached, keeping part as leaf");
            Body::Leaf(body.to_vec())
        } else if content_type.is_multipart() {
            match content_type.boundary() {
                Some(boundary) => {
                    let parts = split_multipart(body, boundary);
                    if parts.is_empty() {
                        Body::Leaf(body.to_vec())
                    } else {
                        Body::Multipart(
                            parts
                                .into_iter()
                                .map(|p| Self::parse_at_depth(p, depth + 1))
                                .collect(),
                        )
                    }
                }
                None => Body::Leaf(body.to_vec()),
            }
        } else if content_type.is_message() {
            Body::Message(Box::new(Self::parse_at_depth(body, depth + 1)))
        } else {
            Body::Leaf(body.to_vec())
        };

        Self {
            headers,
            content_type,
            body,
        }
    }

    /// Gets the transfer encoding.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        self.headers
            .get("content-transfer-encoding")
            .map_or(TransferEncoding::SevenBit, TransferEncoding::parse)
    }

    /// Gets the parsed `Content-Disposition`.
    #[must_use]
    pub fn disposition(&self) -> Disposition {
        self.headers
            .get("content-disposition")
            .map_or_else(Disposition::none, Disposition::parse)
    }

    /// Returns the `Content-ID` without surrounding angle brackets.
    #[must_use]
    pub fn content_id(&self) -> Option<String> {
        self.headers
            .get("content-id")
            .map(|id| id.trim().trim_start_matches('<').trim_end_matches('>').trim().to_string())
            .filter(|id| !id.is_empty())
    }

    /// Decodes a leaf body according to its transfer encoding.
    ///
    /// Containers decode to an empty vector.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer encoding cannot be reversed.
    pub fn decode_body(&self) -> Result<Vec<u8>> {
        match &self.body {
            Body::Leaf(bytes) => self.transfer_encoding().decode(bytes),
            Body::Multipart(_) | Body::Message(_) => Ok(Vec::new()),
        }
    }

    /// Returns all leaf entities in document order.
    #[must_use]
    pub fn leaves(&self) -> Vec<&Self> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Self>) {
        match &self.body {
            Body::Leaf(_) => out.push(self),
            Body::Multipart(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            Body::Message(inner) => inner.collect_leaves(out),
        }
    }
}

/// Splits a multipart body into its raw parts.
///
/// Delimiters must start a line. The preamble and epilogue are discarded,
/// and the line break preceding each delimiter belongs to the delimiter.
/// A missing close delimiter ends the last part at end of input.
#[must_use]
pub fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let mut part_start: Option<usize> = None;
    let mut line_start = 0;

    while line_start < body.len() {
        let line_end = body[line_start..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(body.len(), |i| line_start + i);
        let next_line = (line_end + 1).min(body.len());
        let line = trim_line_end(&body[line_start..line_end]);

        if let Some(rest) = line.strip_prefix(delimiter) {
            let is_close = rest.starts_with(b"--");
            if rest.is_empty() || is_close {
                if let Some(start) = part_start.take() {
                    parts.push(strip_trailing_newline(&body[start..line_start]));
                }
                if is_close {
                    return parts;
                }
                part_start = Some(next_line);
            }
        }

        line_start = next_line;
        if line_end == body.len() {
            break;
        }
    }

    if let Some(start) = part_start
        && start < body.len()
    {
        parts.push(&body[start..]);
    }

    parts
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|&b| !matches!(b, b' ' | b'\t' | b'\r'))
        .map_or(0, |i| i + 1);
    &line[..end]
}

fn strip_trailing_newline(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
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

    #[test]
    fn test_transfer_encoding_parse() {
        assert_eq!(TransferEncoding::parse("BASE64"), TransferEncoding::Base64);
        assert_eq!(
            TransferEncoding::parse("quoted-printable"),
            TransferEncoding::QuotedPrintable
        );
        assert_eq!(TransferEncoding::parse("x-weird"), TransferEncoding::SevenBit);
    }

    #[test]
    fn test_parse_single_part() {
        let raw = b"Content-Type: text/plain; charset=utf-8\r\n\r\nHello";
        let entity = Entity::parse(raw);
        assert!(entity.content_type.is_text());
        assert_eq!(entity.decode_body().unwrap(), b"Hello");
        assert_eq!(entity.leaves().len(), 1);
    }

    #[test]
    fn test_split_multipart() {
        let body = b"preamble\r\n--b1\r\nA: 1\r\n\r\none\r\n--b1\r\n\r\ntwo\r\n--b1--\r\nepilogue";
        let parts = split_multipart(body, "b1");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], b"A: 1\r\n\r\none");
        assert_eq!(parts[1], b"\r\ntwo");
    }

    #[test]
    fn test_split_multipart_ignores_mid_line_boundary() {
        let body = b"--b1\n\nsee --b1 here\n--b1--\n";
        let parts = split_multipart(body, "b1");
        assert_eq!(parts, vec![&b"\nsee --b1 here"[..]]);
    }

    #[test]
    fn test_split_multipart_missing_close() {
        let body = b"--b1\n\nonly part\n";
        let parts = split_multipart(body, "b1");
        assert_eq!(parts, vec![&b"\nonly part\n"[..]]);
    }

    #[test]
    fn test_nested_multipart_leaves() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=outer\r\n\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=inner\r\n\r\n",
            "--inner\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "plain\r\n",
            "--inner\r\n",
            "Content-Type: text/html\r\n\r\n",
            "<p>html</p>\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: application/pdf\r\n",
            "Content-Transfer-Encoding: base64\r\n\r\n",
            "JVBERi0=\r\n",
            "--outer--\r\n"
        );
        let entity = Entity::parse(raw.as_bytes());
        let leaves = entity.leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[0].content_type.sub_type, "plain");
        assert_eq!(leaves[1].content_type.sub_type, "html");
        assert_eq!(leaves[2].decode_body().unwrap(), b"%PDF-");
    }

    #[test]
    fn test_multipart_without_boundary_is_leaf() {
        let raw = b"Content-Type: multipart/mixed\r\n\r\nbody";
        let entity = Entity::parse(raw);
        assert!(matches!(entity.body, Body::Leaf(_)));
    }

    #[test]
    fn test_content_id_stripped() {
        let raw = b"Content-Type: image/png\r\nContent-ID: <logo@x>\r\n\r\n";
        assert_eq!(Entity::parse(raw).content_id().as_deref(), Some("logo@x"));
    }
}

//! MIME content type and disposition handling.

use std::collections::HashMap;
use std::fmt;

use crate::encoding::{decode_rfc2047, decode_rfc2231};
use crate::error::{Error, Result};

/// MIME content type with parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    /// Main type (e.g., "text", "image", "multipart").
    pub main_type: String,
    /// Subtype (e.g., "plain", "html", "jpeg").
    pub sub_type: String,
    /// Parameters with lowercase keys (e.g., charset=utf-8, boundary=xxx).
    pub parameters: HashMap<String, String>,
}

impl Default for ContentType {
    /// `text/plain`, the RFC 2045 default for parts without a header.
    fn default() -> Self {
        Self::new("text", "plain")
    }
}

impl ContentType {
    /// Creates a new content type.
    #[must_use]
    pub fn new(main_type: impl Into<String>, sub_type: impl Into<String>) -> Self {
        Self {
            main_type: main_type.into(),
            sub_type: sub_type.into(),
            parameters: HashMap::new(),
        }
    }

    /// Returns the lowercase `type/subtype` string.
    #[must_use]
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.main_type, self.sub_type)
    }

    /// Returns the charset parameter if present.
    #[must_use]
    pub fn charset(&self) -> Option<&str> {
        self.parameters.get("charset").map(String::as_str)
    }

    /// Returns the boundary parameter if present.
    #[must_use]
    pub fn boundary(&self) -> Option<&str> {
        self.parameters
            .get("boundary")
            .map(String::as_str)
            .filter(|b| !b.is_empty())
    }

    /// Returns the `name` parameter, decoded.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        extended_param(&self.parameters, "name")
    }

    /// Checks if this is a multipart content type.
    #[must_use]
    pub fn is_multipart(&self) -> bool {
        self.main_type == "multipart"
    }

    /// Checks if this is a `message/rfc822` content type.
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.main_type == "message" && self.sub_type == "rfc822"
    }

    /// Checks if this is a text content type.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.main_type == "text"
    }

    /// Checks if this is an image content type.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.main_type == "image"
    }

    /// Parses a content type string.
    ///
    /// Format: `type/subtype; param1=value1; param2="value 2"`
    ///
    /// # Errors
    ///
    /// Returns an error if the `type/subtype` token is missing or malformed.
    pub fn parse(s: &str) -> Result<Self> {
        let (type_str, params) = s.split_once(';').unwrap_or((s, ""));

        let (main_type, sub_type) = type_str
            .trim()
            .split_once('/')
            .ok_or_else(|| Error::InvalidContentType(s.trim().to_string()))?;

        let main_type = main_type.trim().to_lowercase();
        let sub_type = sub_type.trim().to_lowercase();
        if main_type.is_empty() || sub_type.is_empty() {
            return Err(Error::InvalidContentType(s.trim().to_string()));
        }

        Ok(Self {
            main_type,
            sub_type,
            parameters: parse_parameters(params),
        })
    }

    /// Parses a content type, falling back to `text/plain` when malformed.
    #[must_use]
    pub fn parse_or_default(s: Option<&str>) -> Self {
        s.and_then(|s| Self::parse(s).ok()).unwrap_or_default()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.main_type, self.sub_type)
    }
}

/// Disposition type of a MIME part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionKind {
    /// `inline`
    Inline,
    /// `attachment`
    Attachment,
    /// Anything else, or no header at all.
    Other,
}

/// Parsed `Content-Disposition` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    /// Disposition type.
    pub kind: DispositionKind,
    /// Decoded `filename` parameter, if any.
    pub filename: Option<String>,
}

impl Disposition {
    /// Parses a `Content-Disposition` header value.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        let (kind, params) = s.split_once(';').unwrap_or((s, ""));
        let kind = match kind.trim().to_lowercase().as_str() {
            "inline" => DispositionKind::Inline,
            "attachment" => DispositionKind::Attachment,
            _ => DispositionKind::Other,
        };
        let parameters = parse_parameters(params);

        Self {
            kind,
            filename: extended_param(&parameters, "filename"),
        }
    }

    /// Disposition used when the header is absent.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            kind: DispositionKind::Other,
            filename: None,
        }
    }
}

/// Splits a parameter list on `;`, honouring quoted strings.
fn parse_parameters(s: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut raw = Vec::new();

    for c in s.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ';' if !in_quotes => raw.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    raw.push(current);

    for param in raw {
        if let Some((key, value)) = param.split_once('=') {
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            params.insert(key, value.to_string());
        }
    }

    params
}

/// Reads a parameter that may use RFC 2231 (`name*`, `name*0*`, ...) or
/// RFC 2047 encoding.
fn extended_param(params: &HashMap<String, String>, name: &str) -> Option<String> {
    if let Some(value) = params.get(&format!("{name}*")) {
        return Some(decode_rfc2231(value));
    }

    // Continuations: name*0*, name*1*, ... or name*0, name*1, ...
    let mut joined = String::new();
    let mut extended = false;
    for index in 0.. {
        if let Some(v) = params.get(&format!("{name}*{index}*")) {
            extended = true;
            joined.push_str(v);
        } else if let Some(v) = params.get(&format!("{name}*{index}")) {
            joined.push_str(v);
        } else {
            break;
        }
    }
    if !joined.is_empty() {
        return Some(if extended {
            decode_rfc2231(&joined)
        } else {
            decode_rfc2047(&joined)
        });
    }

    params
        .get(name)
        .map(|v| decode_rfc2047(v))
        .filter(|v| !v.trim().is_empty())
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
    fn test_content_type_parse() {
        let ct = ContentType::parse("Text/HTML; charset=\"GB2312\"").unwrap();
        assert_eq!(ct.main_type, "text");
        assert_eq!(ct.sub_type, "html");
        assert_eq!(ct.charset(), Some("GB2312"));
        assert_eq!(ct.mime_type(), "text/html");
    }

    #[test]
    fn test_content_type_parse_quoted_semicolon() {
        let ct =
            ContentType::parse("multipart/mixed; boundary=\"----=_Part;123\"; x=1").unwrap();
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("----=_Part;123"));
        assert_eq!(ct.parameters.get("x").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_content_type_invalid() {
        assert!(ContentType::parse("garbage").is_err());
        assert!(ContentType::parse("/plain").is_err());
        assert_eq!(
            ContentType::parse_or_default(Some("garbage")),
            ContentType::default()
        );
    }

    #[test]
    fn test_content_type_encoded_name() {
        let ct = ContentType::parse("image/png; name=\"=?utf-8?B?5Zu+LnBuZw==?=\"").unwrap();
        assert_eq!(ct.name().as_deref(), Some("图.png"));
    }

    #[test]
    fn test_disposition_attachment() {
        let d = Disposition::parse("attachment; filename=\"report.pdf\"");
        assert_eq!(d.kind, DispositionKind::Attachment);
        assert_eq!(d.filename.as_deref(), Some("report.pdf"));
    }

    #[test]
    fn test_disposition_rfc2231() {
        let d = Disposition::parse("ATTACHMENT; filename*=utf-8''%E6%8A%A5%E5%91%8A.pdf");
        assert_eq!(d.kind, DispositionKind::Attachment);
        assert_eq!(d.filename.as_deref(), Some("报告.pdf"));
    }

    #[test]
    fn test_disposition_continuations() {
        let d = Disposition::parse("attachment; filename*0=\"long\"; filename*1=\"name.txt\"");
        assert_eq!(d.filename.as_deref(), Some("longname.txt"));
    }

    #[test]
    fn test_disposition_inline_without_filename() {
        let d = Disposition::parse("inline");
        assert_eq!(d.kind, DispositionKind::Inline);
        assert!(d.filename.is_none());
    }
}

//! MIME header handling.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::encoding::{decode_header_bytes, decode_rfc2047};

/// Collection of email headers.
///
/// Names are matched case-insensitively; values keep their raw
/// (still RFC 2047 encoded) form. Use [`Headers::decoded`] for display text.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    headers: HashMap<String, Vec<String>>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into().to_lowercase();
        self.headers.entry(name).or_default().push(value.into());
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_lowercase())
            .and_then(|v| v.first().map(String::as_str))
    }

    /// Gets all values for a header.
    #[must_use]
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .get(&name.to_lowercase())
            .map(|v| v.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Gets the first value for a header with encoded words decoded.
    #[must_use]
    pub fn decoded(&self, name: &str) -> Option<String> {
        self.get(name).map(decode_rfc2047)
    }

    /// Joins all values of a header with `", "` and decodes them.
    ///
    /// Used for address headers that may legally repeat.
    #[must_use]
    pub fn decoded_joined(&self, name: &str) -> Option<String> {
        let values = self.get_all(name);
        if values.is_empty() {
            return None;
        }
        Some(decode_rfc2047(&values.join(", ")))
    }

    /// Returns true if no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Returns an iterator over all headers.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    /// Parses a header block from raw bytes.
    ///
    /// Parsing stops at the first empty line. Folded continuation lines are
    /// joined with a single space. Lines without a colon are ignored.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Self {
        let text = decode_header_bytes(raw);
        let mut headers = Self::new();
        let mut current: Option<(String, String)> = None;

        for line in text.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }

            if line.starts_with([' ', '\t']) {
                if let Some((_, value)) = current.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }

            if let Some((name, value)) = current.take() {
                headers.add(name, value);
            }

            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim();
                if !name.is_empty() && !name.contains(char::is_whitespace) {
                    current = Some((name.to_string(), value.trim().to_string()));
                }
            }
        }

        if let Some((name, value)) = current {
            headers.add(name, value);
        }

        headers
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sorted: Vec<_> = self.headers.iter().collect();
        sorted.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (name, values) in sorted {
            for value in values {
                writeln!(f, "{name}: {value}")?;
            }
        }

        Ok(())
    }
}

/// Splits raw message bytes into the header block and the body.
///
/// The separator is the first blank line (`\r\n\r\n` or `\n\n`). Without a
/// separator the whole input is treated as headers.
#[must_use]
pub fn split_header_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }

    let crlf = find(raw, b"\r\n\r\n").map(|i| (i, 4));
    let lf = find(raw, b"\n\n").map(|i| (i, 2));

    let split = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };

    match split {
        Some((pos, len)) => (&raw[..pos], &raw[pos + len..]),
        None => (raw, &[]),
    }
}

pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

const ZONED_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
    "%Y-%m-%d %H:%M:%S %z",
];

const NAIVE_FORMATS: &[&str] = &["%a, %d %b %Y %H:%M:%S", "%d %b %Y %H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Parses an email `Date` header into UTC.
///
/// Accepts RFC 2822 (with or without a trailing `(TZ)` comment), RFC 3339 and
/// a few common malformed variants. Returns `None` if nothing matches.
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    let without_comment = value
        .find('(')
        .map_or(value, |idx| value[..idx].trim_end());

    for candidate in [value, without_comment] {
        if let Ok(dt) = DateTime::parse_from_rfc2822(candidate) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(without_comment, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    // Zone names like "GMT"/"UTC" that chrono's rfc2822 parser rejects in
    // some positions; treat them as UTC.
    let stripped = without_comment
        .trim_end_matches("GMT")
        .trim_end_matches("UTC")
        .trim_end();
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(stripped, fmt) {
            return Some(naive.and_utc());
        }
    }

    None
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

    #[test]
    fn test_headers_add_get() {
        let mut headers = Headers::new();
        headers.add("Content-Type", "text/plain");
        assert_eq!(headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(headers.get("content-type"), Some("text/plain"));
    }

    #[test]
    fn test_headers_parse_folded() {
        let raw = concat!(
            "From: sender@example.com\r\n",
            "To: recipient@example.com\r\n",
            "Subject: Test\r\n",
            "\tMessage\r\n",
            "Content-Type: text/plain;\r\n",
            " charset=utf-8\r\n",
            "\r\n",
            "Ignored: body\r\n"
        );

        let headers = Headers::parse(raw.as_bytes());
        assert_eq!(headers.get("From"), Some("sender@example.com"));
        assert_eq!(headers.get("Subject"), Some("Test Message"));
        assert_eq!(
            headers.get("Content-Type"),
            Some("text/plain; charset=utf-8")
        );
        assert!(headers.get("Ignored").is_none());
    }

    #[test]
    fn test_headers_parse_skips_garbage_lines() {
        let headers = Headers::parse(b"not a header\nX-Ok: 1\n");
        assert_eq!(headers.get("X-Ok"), Some("1"));
        assert_eq!(headers.iter().count(), 1);
    }

    #[test]
    fn test_headers_repeated_values() {
        let headers = Headers::parse(b"Cc: a@x.com\nCc: b@y.com\n\n");
        assert_eq!(headers.get_all("cc"), vec!["a@x.com", "b@y.com"]);
        assert_eq!(
            headers.decoded_joined("Cc").as_deref(),
            Some("a@x.com, b@y.com")
        );
    }

    #[test]
    fn test_headers_decoded() {
        let headers = Headers::parse(b"Subject: =?utf-8?B?5Lit5paH?=\n\n");
        assert_eq!(headers.decoded("subject").as_deref(), Some("中文"));
    }

    #[test]
    fn test_split_header_body() {
        let (h, b) = split_header_body(b"A: 1\r\nB: 2\r\n\r\nbody\r\n");
        assert_eq!(h, b"A: 1\r\nB: 2");
        assert_eq!(b, b"body\r\n");

        let (h, b) = split_header_body(b"A: 1\n\nbody");
        assert_eq!(h, b"A: 1");
        assert_eq!(b, b"body");

        let (h, b) = split_header_body(b"A: 1");
        assert_eq!(h, b"A: 1");
        assert!(b.is_empty());
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(
            parse_date("Fri, 01 Mar 2024 16:30:00 +0800"),
            Some(expected)
        );
        assert_eq!(
            parse_date("Fri, 1 Mar 2024 16:30:00 +0800 (CST)"),
            Some(expected)
        );
    }

    #[test]
    fn test_parse_date_gmt_suffix() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 0).unwrap();
        assert_eq!(parse_date("Fri, 01 Mar 2024 08:30:00 GMT"), Some(expected));
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date("").is_none());
        assert!(parse_date("yesterday-ish").is_none());
    }
}

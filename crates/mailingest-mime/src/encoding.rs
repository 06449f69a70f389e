//! Transfer and charset decoding.
//!
//! Supports Base64, Quoted-Printable, RFC 2047 encoded words and charset
//! conversion. Text decoding is a chain of independent steps, tried in order:
//!
//! 1. [`decode_declared_charset`], when a charset is declared
//! 2. [`decode_utf8_strict`]
//! 3. [`decode_utf8_lossy`]
//!
//! [`decode_text`] runs the chain and reports which step produced the result.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use encoding_rs::Encoding;

use crate::error::{Error, Result};

/// Base64 engine that tolerates missing padding and trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data, ignoring whitespace, line breaks and padding.
///
/// # Errors
///
/// Returns an error if the input contains characters outside the Base64
/// alphabet.
pub fn decode_base64(data: &[u8]) -> Result<Vec<u8>> {
    let mut cleaned: Vec<u8> = data
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace() && *b != b'=')
        .collect();

    // A single dangling sextet carries no full byte.
    if cleaned.len() % 4 == 1 {
        cleaned.pop();
    }

    LENIENT.decode(&cleaned).map_err(Into::into)
}

/// Decodes Quoted-Printable data (RFC 2045).
///
/// Soft line breaks are removed. Malformed escape sequences are kept
/// verbatim rather than rejected.
#[must_use]
pub fn decode_quoted_printable(data: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(data.len());
    let mut i = 0;

    while i < data.len() {
        let byte = data[i];
        if byte != b'=' {
            result.push(byte);
            i += 1;
            continue;
        }

        match (data.get(i + 1), data.get(i + 2)) {
            (Some(b'\r'), Some(b'\n')) => i += 3,
            (Some(b'\n'), _) => i += 2,
            (Some(&hi), Some(&lo)) => match (hex_value(hi), hex_value(lo)) {
                (Some(hi), Some(lo)) => {
                    result.push(hi << 4 | lo);
                    i += 3;
                }
                _ => {
                    result.push(b'=');
                    i += 1;
                }
            },
            _ => {
                // Trailing '=' or truncated escape at end of input.
                if data[i + 1..].iter().all(u8::is_ascii_whitespace) {
                    break;
                }
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}

const fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Which step of the text decoding chain produced a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// The bytes were valid in the declared charset.
    DeclaredCharset,
    /// The bytes were valid UTF-8.
    Utf8Strict,
    /// UTF-8 with invalid sequences replaced.
    Utf8Lossy,
}

/// Decodes bytes as strict UTF-8.
///
/// # Errors
///
/// Returns [`Error::Charset`] if the bytes are not valid UTF-8.
pub fn decode_utf8_strict(bytes: &[u8]) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| Error::Charset("utf-8".to_string()))
}

/// Decodes bytes with the named charset, rejecting malformed input.
///
/// # Errors
///
/// Returns [`Error::Charset`] if the label is unknown or the bytes contain
/// sequences that are invalid in that charset.
pub fn decode_declared_charset(bytes: &[u8], charset: &str) -> Result<String> {
    let label = charset.trim().trim_matches('"');
    let encoding = Encoding::for_label(label.as_bytes())
        .ok_or_else(|| Error::Charset(label.to_string()))?;

    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(std::borrow::Cow::into_owned)
        .ok_or_else(|| Error::Charset(label.to_string()))
}

/// Decodes bytes as UTF-8, replacing invalid sequences.
#[must_use]
pub fn decode_utf8_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Decodes text using the fallback chain. Never fails.
///
/// A declared charset wins over UTF-8 detection: 7-bit charsets such as
/// ISO-2022-JP are always valid UTF-8 and would otherwise keep their escape
/// sequences.
#[must_use]
pub fn decode_text(bytes: &[u8], charset: Option<&str>) -> (String, DecodeStage) {
    if let Some(charset) = charset
        && let Ok(text) = decode_declared_charset(bytes, charset)
    {
        return (text, DecodeStage::DeclaredCharset);
    }

    if let Ok(text) = decode_utf8_strict(bytes) {
        return (text, DecodeStage::Utf8Strict);
    }

    (decode_utf8_lossy(bytes), DecodeStage::Utf8Lossy)
}

/// Decodes raw header bytes.
///
/// Tries UTF-8 first, then Windows-1252, which accepts every byte.
#[must_use]
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    decode_utf8_strict(bytes).unwrap_or_else(|_| {
        let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
        decoded.into_owned()
    })
}

/// Decodes all RFC 2047 encoded words in a header value.
///
/// Format: `=?charset?encoding?encoded-text?=`. Whitespace between two
/// adjacent encoded words is dropped. Words that cannot be decoded are kept
/// in their raw form.
#[must_use]
pub fn decode_rfc2047(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    let mut after_encoded_word = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);

        if let Some((decoded, consumed)) = decode_encoded_word(candidate) {
            if !(after_encoded_word && before.trim().is_empty()) {
                out.push_str(before);
            }
            out.push_str(&decoded);
            rest = &candidate[consumed..];
            after_encoded_word = true;
        } else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            after_encoded_word = false;
        }
    }

    out.push_str(rest);
    out
}

/// Decodes a single encoded word at the start of `s`.
///
/// Returns the decoded text and the number of bytes consumed.
fn decode_encoded_word(s: &str) -> Option<(String, usize)> {
    let body = s.strip_prefix("=?")?;
    let (charset, rest) = body.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    let text = &rest[..end];

    if charset.is_empty() || text.contains(char::is_whitespace) {
        return None;
    }

    let bytes = match encoding {
        "B" | "b" => decode_base64(text.as_bytes()).ok()?,
        "Q" | "q" => decode_q(text.as_bytes()),
        _ => return None,
    };

    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);
    let (decoded, _) = decode_text(&bytes, Some(charset));
    let consumed = s.len() - rest.len() + end + 2;

    Some((decoded, consumed))
}

/// Decodes the RFC 2047 "Q" encoding (Quoted-Printable with `_` for space).
fn decode_q(text: &[u8]) -> Vec<u8> {
    let spaced: Vec<u8> = text
        .iter()
        .map(|&b| if b == b'_' { b' ' } else { b })
        .collect();
    decode_quoted_printable(&spaced)
}

/// Decodes an RFC 2231 extended parameter value (`charset'lang'%XX...`).
#[must_use]
pub fn decode_rfc2231(value: &str) -> String {
    let mut pieces = value.splitn(3, '\'');
    let (charset, encoded) = match (pieces.next(), pieces.next(), pieces.next()) {
        (Some(charset), Some(_lang), Some(encoded)) => (Some(charset), encoded),
        _ => (None, value),
    };

    let bytes = percent_decode(encoded.as_bytes());
    decode_text(&bytes, charset.filter(|c| !c.is_empty())).0
}

fn percent_decode(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == b'%'
            && let (Some(&hi), Some(&lo)) = (data.get(i + 1), data.get(i + 2))
            && let (Some(hi), Some(lo)) = (hex_value(hi), hex_value(lo))
        {
            out.push(hi << 4 | lo);
            i += 3;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
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
    use proptest::prelude::*;

    #[test]
    fn test_base64_round_trip_with_line_breaks() {
        let encoded = "SGVs\r\nbG8s\r\nIFdvcmxkIQ==";
        assert_eq!(decode_base64(encoded.as_bytes()).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_base64_missing_padding() {
        assert_eq!(decode_base64(b"SGk").unwrap(), b"Hi");
    }

    #[test]
    fn test_base64_rejects_garbage() {
        assert!(decode_base64(b"!!!!****").is_err());
    }

    #[test]
    fn test_quoted_printable_decode() {
        assert_eq!(decode_quoted_printable(b"H=C3=A9llo"), "Héllo".as_bytes());
        assert_eq!(decode_quoted_printable(b"Hello=\r\nWorld"), b"HelloWorld");
        assert_eq!(decode_quoted_printable(b"Hello=\nWorld"), b"HelloWorld");
    }

    #[test]
    fn test_quoted_printable_keeps_malformed_escape() {
        assert_eq!(decode_quoted_printable(b"100=ZZ"), b"100=ZZ");
        assert_eq!(decode_quoted_printable(b"end="), b"end");
    }

    #[test]
    fn test_decode_text_stages() {
        let (text, stage) = decode_text("Grüße".as_bytes(), None);
        assert_eq!(text, "Grüße");
        assert_eq!(stage, DecodeStage::Utf8Strict);

        let (text, stage) = decode_text(b"Gr\xFC\xDFe", Some("iso-8859-1"));
        assert_eq!(text, "Grüße");
        assert_eq!(stage, DecodeStage::DeclaredCharset);

        // Invalid in the declared charset, valid UTF-8.
        let (text, stage) = decode_text("中".as_bytes(), Some("iso-2022-jp"));
        assert_eq!(text, "中");
        assert_eq!(stage, DecodeStage::Utf8Strict);

        // "中文" in GBK
        let gbk = [0xD6, 0xD0, 0xCE, 0xC4];
        let (text, stage) = decode_text(&gbk, Some("gbk"));
        assert_eq!(text, "中文");
        assert_eq!(stage, DecodeStage::DeclaredCharset);

        let (text, stage) = decode_text(&[0x66, 0xFF, 0x6F], Some("x-unknown"));
        assert_eq!(text, "f\u{FFFD}o");
        assert_eq!(stage, DecodeStage::Utf8Lossy);
    }

    #[test]
    fn test_declared_charset_unknown_label() {
        assert!(decode_declared_charset(b"abc", "no-such-charset").is_err());
    }

    #[test]
    fn test_rfc2047_plain_value_untouched() {
        assert_eq!(decode_rfc2047("Hello World"), "Hello World");
    }

    #[test]
    fn test_rfc2047_base64_word() {
        assert_eq!(decode_rfc2047("=?utf-8?B?SMOpbGxv?="), "Héllo");
    }

    #[test]
    fn test_decode_text_iso_2022_jp() {
        let (text, stage) = decode_text(b"\x1b$B%F%9%H\x1b(B", Some("ISO-2022-JP"));
        assert_eq!(text, "テスト");
        assert_eq!(stage, DecodeStage::DeclaredCharset);
    }

    #[test]
    fn test_rfc2047_iso_2022_jp_word() {
        assert_eq!(decode_rfc2047("=?ISO-2022-JP?B?GyRCJUYlOSVIGyhC?="), "テスト");
    }

    #[test]
    fn test_rfc2047_q_word_with_underscores() {
        assert_eq!(decode_rfc2047("=?UTF-8?Q?H=C3=A9llo_World?="), "Héllo World");
    }

    #[test]
    fn test_rfc2047_adjacent_words_join() {
        let value = "=?utf-8?B?5Lit?= =?utf-8?B?5paH?=";
        assert_eq!(decode_rfc2047(value), "中文");
    }

    #[test]
    fn test_rfc2047_mixed_with_plain_text() {
        let value = "Re: =?gb2312?B?1tDOxA==?= report";
        assert_eq!(decode_rfc2047(value), "Re: 中文 report");
    }

    #[test]
    fn test_rfc2047_broken_word_kept_raw() {
        let value = "=?utf-8?X?abc?= tail";
        assert_eq!(decode_rfc2047(value), value);
    }

    #[test]
    fn test_rfc2231_value() {
        assert_eq!(decode_rfc2231("utf-8''%E4%B8%AD.txt"), "中.txt");
        assert_eq!(decode_rfc2231("plain.txt"), "plain.txt");
    }

    #[test]
    fn test_header_bytes_windows_1252_fallback() {
        assert_eq!(decode_header_bytes(&[0x63, 0x61, 0x66, 0xE9]), "café");
    }

    proptest! {
        #[test]
        fn prop_decode_rfc2047_never_panics(s in ".*") {
            let _ = decode_rfc2047(&s);
        }

        #[test]
        fn prop_base64_round_trip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let encoded = encode_base64(&data);
            prop_assert_eq!(decode_base64(encoded.as_bytes()).unwrap(), data);
        }
    }
}

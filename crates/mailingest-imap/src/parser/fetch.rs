//! FETCH response parsing.

use crate::Result;
use crate::parser::lexer::{Lexer, Token};
use crate::types::Uid;

/// A data item returned in a FETCH response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchItem {
    /// `UID n`
    Uid(Uid),
    /// `BODY[section] data`; `None` data means the server sent NIL.
    Body {
        /// Section specifier, e.g. `HEADER`. Empty for the whole message.
        section: String,
        /// Raw bytes.
        data: Option<Vec<u8>>,
    },
}

/// Parses the parenthesised item list of a FETCH response.
pub fn parse_fetch_items(lexer: &mut Lexer<'_>) -> Result<Vec<FetchItem>> {
    lexer.expect(Token::LParen)?;
    let mut items = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::RParen | Token::Eof => break,
            Token::Atom(name) => match name.to_ascii_uppercase().as_str() {
                "UID" => {
                    lexer.expect_space()?;
                    let n = lexer.read_number()?;
                    let uid = Uid::new(n).ok_or_else(|| lexer.error("UID cannot be 0"))?;
                    items.push(FetchItem::Uid(uid));
                }
                "BODY" | "BODY.PEEK" | "RFC822" | "RFC822.HEADER" => {
                    let section = read_section(lexer, name);
                    lexer.expect_space()?;
                    let data = match lexer.next_token()? {
                        Token::Literal(d) => Some(d),
                        Token::QuotedString(s) => Some(s.into_bytes()),
                        _ => None,
                    };
                    items.push(FetchItem::Body { section, data });
                }
                _ => skip_value(lexer)?,
            },
            _ => {}
        }
    }

    Ok(items)
}

/// Reads `[section]<origin>` after a BODY item name.
///
/// `RFC822` and `RFC822.HEADER` are mapped to their `BODY[...]` sections.
fn read_section(lexer: &mut Lexer<'_>, name: &str) -> String {
    let mut section = match name.to_ascii_uppercase().as_str() {
        "RFC822.HEADER" => "HEADER".to_string(),
        _ => String::new(),
    };

    if lexer.peek() == Some(b'[') {
        lexer.advance();
        while let Some(b) = lexer.advance() {
            if b == b']' {
                break;
            }
            section.push(char::from(b));
        }
    }

    // Partial fetch origin, e.g. <0>; not used.
    if lexer.peek() == Some(b'<') {
        while let Some(b) = lexer.advance() {
            if b == b'>' {
                break;
            }
        }
    }

    section.to_ascii_uppercase()
}

/// Skips the value of an item this client does not interpret.
fn skip_value(lexer: &mut Lexer<'_>) -> Result<()> {
    if lexer.peek() == Some(b'[') {
        read_section(lexer, "");
    }
    if lexer.peek() == Some(b' ') {
        lexer.advance();
    }

    let mut depth = 0usize;
    loop {
        match lexer.peek() {
            None => break,
            Some(b' ' | b')') if depth == 0 => break,
            Some(b'(') => {
                depth += 1;
                lexer.advance();
            }
            Some(b')') => {
                depth -= 1;
                lexer.advance();
            }
            Some(b'{' | b'"') => {
                lexer.next_token()?;
            }
            Some(_) => {
                lexer.advance();
            }
        }
    }

    Ok(())
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

    fn parse(input: &[u8]) -> Vec<FetchItem> {
        parse_fetch_items(&mut Lexer::new(input)).unwrap()
    }

    #[test]
    fn test_parse_header_literal() {
        let items = parse(b"(UID 42 BODY[HEADER] {13}\r\nSubject: hi\r\n)");
        assert_eq!(items[0], FetchItem::Uid(Uid::new(42).unwrap()));
        assert_eq!(
            items[1],
            FetchItem::Body {
                section: "HEADER".to_string(),
                data: Some(b"Subject: hi\r\n".to_vec()),
            }
        );
    }

    #[test]
    fn test_parse_full_body_before_uid() {
        let items = parse(b"(BODY[] {3}\r\nabc UID 7)");
        assert_eq!(
            items[0],
            FetchItem::Body {
                section: String::new(),
                data: Some(b"abc".to_vec()),
            }
        );
        assert_eq!(items[1], FetchItem::Uid(Uid::new(7).unwrap()));
    }

    #[test]
    fn test_parse_nil_body() {
        let items = parse(b"(UID 3 BODY[] NIL)");
        assert_eq!(
            items[1],
            FetchItem::Body {
                section: String::new(),
                data: None,
            }
        );
    }

    #[test]
    fn test_parse_skips_uninterpreted_items() {
        let items = parse(
            b"(UID 5 FLAGS (\\Seen $Junk) X-GM-LABELS (\"a b\") INTERNALDATE \"04-Mar-2024 10:00:00 +0000\" RFC822.SIZE 2048 BODY[HEADER] {2}\r\nX\n)",
        );
        assert_eq!(
            items,
            vec![
                FetchItem::Uid(Uid::new(5).unwrap()),
                FetchItem::Body {
                    section: "HEADER".to_string(),
                    data: Some(b"X\n".to_vec()),
                },
            ]
        );
    }

    #[test]
    fn test_parse_rfc822_header_alias() {
        let items = parse(b"(RFC822.HEADER {2}\r\nX\n UID 1)");
        assert!(matches!(&items[0], FetchItem::Body { section, .. } if section == "HEADER"));
    }

    #[test]
    fn test_uid_zero_rejected() {
        assert!(parse_fetch_items(&mut Lexer::new(b"(UID 0)")).is_err());
    }
}

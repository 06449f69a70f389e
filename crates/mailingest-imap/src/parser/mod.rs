//! Sans-I/O parser for IMAP server responses.
//!
//! Only the responses a polling client needs are modelled; anything else
//! parses to [`UntaggedResponse::Other`] so that unexpected server chatter
//! never aborts a command.
//!
//! ```
//! use mailingest_imap::parser::{Response, ResponseParser, UntaggedResponse};
//!
//! let response = ResponseParser::parse(b"* 3 EXISTS\r\n").unwrap();
//! assert_eq!(response, Response::Untagged(UntaggedResponse::Exists(3)));
//! ```

#![allow(clippy::missing_errors_doc)]

mod fetch;
pub mod lexer;

pub use fetch::FetchItem;
pub use lexer::{Lexer, Token};

use crate::Result;
use crate::types::{ResponseCode, Status, Tag, Uid, UidValidity};

/// A parsed IMAP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Tagged response (command completion).
    Tagged {
        /// The command tag.
        tag: Tag,
        /// Response status.
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// Untagged response (server data).
    Untagged(UntaggedResponse),
    /// Continuation request.
    Continuation(String),
}

/// Untagged server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UntaggedResponse {
    /// `* OK`, `* NO`, `* BAD`, `* PREAUTH` or `* BYE`.
    Condition {
        /// Condition status.
        status: Status,
        /// Optional response code.
        code: Option<ResponseCode>,
        /// Human-readable text.
        text: String,
    },
    /// `* CAPABILITY ...`
    Capability(Vec<String>),
    /// `* n EXISTS`
    Exists(u32),
    /// `* n RECENT`
    Recent(u32),
    /// `* n EXPUNGE`
    Expunge(u32),
    /// `* SEARCH ...` (UIDs when answering `UID SEARCH`).
    Search(Vec<u32>),
    /// `* n FETCH (...)`
    Fetch {
        /// Message sequence number.
        seq: u32,
        /// Returned data items.
        items: Vec<FetchItem>,
    },
    /// Any response this client does not interpret.
    Other(String),
}

/// Response parser.
pub struct ResponseParser;

impl ResponseParser {
    /// Parses one complete response, including any embedded literals.
    pub fn parse(input: &[u8]) -> Result<Response> {
        let mut lexer = Lexer::new(input);

        match lexer.next_token()? {
            Token::Asterisk => Self::parse_untagged(&mut lexer).map(Response::Untagged),
            Token::Plus => {
                if lexer.peek() == Some(b' ') {
                    lexer.advance();
                }
                Ok(Response::Continuation(lexer.read_text_until_crlf()))
            }
            Token::Atom(tag) => Self::parse_tagged(&mut lexer, tag),
            token => Err(lexer.error(&format!("Expected *, +, or tag, got {token:?}"))),
        }
    }

    fn parse_tagged(lexer: &mut Lexer<'_>, tag: &str) -> Result<Response> {
        lexer.expect_space()?;
        let status = parse_status(lexer.read_atom_string()?)
            .ok_or_else(|| lexer.error("Invalid status in tagged response"))?;
        let (code, text) = parse_resp_text(lexer)?;

        Ok(Response::Tagged {
            tag: Tag::new(tag),
            status,
            code,
            text,
        })
    }

    fn parse_untagged(lexer: &mut Lexer<'_>) -> Result<UntaggedResponse> {
        lexer.expect_space()?;

        match lexer.next_token()? {
            Token::Atom(keyword) => {
                if let Some(status) = parse_status(keyword) {
                    let (code, text) = parse_resp_text(lexer)?;
                    return Ok(UntaggedResponse::Condition { status, code, text });
                }

                match keyword.to_ascii_uppercase().as_str() {
                    "CAPABILITY" => Ok(UntaggedResponse::Capability(parse_capabilities(lexer))),
                    "SEARCH" => parse_search(lexer).map(UntaggedResponse::Search),
                    _ => Ok(UntaggedResponse::Other(format!(
                        "{keyword}{}",
                        lexer.read_text_until_crlf()
                    ))),
                }
            }
            Token::Number(n) => {
                lexer.expect_space()?;
                let keyword = lexer.read_atom_string()?;

                match keyword.to_ascii_uppercase().as_str() {
                    "EXISTS" => Ok(UntaggedResponse::Exists(n)),
                    "RECENT" => Ok(UntaggedResponse::Recent(n)),
                    "EXPUNGE" => Ok(UntaggedResponse::Expunge(n)),
                    "FETCH" => {
                        lexer.expect_space()?;
                        let items = fetch::parse_fetch_items(lexer)?;
                        Ok(UntaggedResponse::Fetch { seq: n, items })
                    }
                    _ => Ok(UntaggedResponse::Other(format!(
                        "{n} {keyword}{}",
                        lexer.read_text_until_crlf()
                    ))),
                }
            }
            token => Err(lexer.error(&format!("Unexpected token in untagged response: {token:?}"))),
        }
    }
}

fn parse_status(s: &str) -> Option<Status> {
    match s.to_ascii_uppercase().as_str() {
        "OK" => Some(Status::Ok),
        "NO" => Some(Status::No),
        "BAD" => Some(Status::Bad),
        "PREAUTH" => Some(Status::PreAuth),
        "BYE" => Some(Status::Bye),
        _ => None,
    }
}

/// Parses `[code] text` after a status keyword. Both parts are optional.
fn parse_resp_text(lexer: &mut Lexer<'_>) -> Result<(Option<ResponseCode>, String)> {
    if lexer.peek() == Some(b' ') {
        lexer.advance();
    }

    let code = if lexer.peek() == Some(b'[') {
        Some(parse_response_code(lexer)?)
    } else {
        None
    };

    if lexer.peek() == Some(b' ') {
        lexer.advance();
    }

    Ok((code, lexer.read_text_until_crlf()))
}

fn parse_response_code(lexer: &mut Lexer<'_>) -> Result<ResponseCode> {
    lexer.expect(Token::LBracket)?;
    let name = lexer.read_atom_string()?;

    let code = match name.to_ascii_uppercase().as_str() {
        "UIDVALIDITY" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            UidValidity::new(n)
                .map(ResponseCode::UidValidity)
                .ok_or_else(|| lexer.error("Invalid UIDVALIDITY 0"))?
        }
        "UIDNEXT" => {
            lexer.expect_space()?;
            let n = lexer.read_number()?;
            Uid::new(n)
                .map(ResponseCode::UidNext)
                .ok_or_else(|| lexer.error("Invalid UIDNEXT 0"))?
        }
        "CAPABILITY" => ResponseCode::Capability(parse_capabilities(lexer)),
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "ALERT" => ResponseCode::Alert,
        _ => ResponseCode::Other(name.to_string()),
    };

    // Skip any arguments we do not model (e.g. PERMANENTFLAGS lists).
    while lexer.peek().is_some_and(|b| b != b']' && b != b'\r') {
        lexer.advance();
    }
    lexer.expect(Token::RBracket)?;

    Ok(code)
}

fn parse_capabilities(lexer: &mut Lexer<'_>) -> Vec<String> {
    let mut caps = Vec::new();
    while lexer.peek() == Some(b' ') {
        lexer.advance();
        match lexer.next_token() {
            Ok(Token::Atom(s)) => caps.push(s.to_string()),
            _ => break,
        }
    }
    caps
}

fn parse_search(lexer: &mut Lexer<'_>) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    while lexer.peek() == Some(b' ') {
        lexer.advance();
        match lexer.next_token()? {
            Token::Number(n) if n > 0 => ids.push(n),
            // ESEARCH-style trailing data such as (MODSEQ n) ends the list.
            Token::Number(_) => {}
            _ => break,
        }
    }
    Ok(ids)
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
    fn test_parse_greeting_with_capabilities() {
        let response =
            ResponseParser::parse(b"* OK [CAPABILITY IMAP4rev1 IDLE] Server ready\r\n").unwrap();
        match response {
            Response::Untagged(UntaggedResponse::Condition { status, code, text }) => {
                assert_eq!(status, Status::Ok);
                assert_eq!(
                    code,
                    Some(ResponseCode::Capability(vec![
                        "IMAP4rev1".to_string(),
                        "IDLE".to_string()
                    ]))
                );
                assert_eq!(text, "Server ready");
            }
            other => panic!("Expected untagged OK, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_tagged_no() {
        let response = ResponseParser::parse(b"A0001 NO [AUTHENTICATIONFAILED] bad creds\r\n")
            .unwrap();
        assert_eq!(
            response,
            Response::Tagged {
                tag: Tag::new("A0001"),
                status: Status::No,
                code: Some(ResponseCode::Other("AUTHENTICATIONFAILED".to_string())),
                text: "bad creds".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_tagged_without_text() {
        let response = ResponseParser::parse(b"A0002 OK\r\n").unwrap();
        assert!(matches!(
            response,
            Response::Tagged { status: Status::Ok, .. }
        ));
    }

    #[test]
    fn test_parse_uidvalidity() {
        let response = ResponseParser::parse(b"* OK [UIDVALIDITY 1700000000] UIDs valid\r\n")
            .unwrap();
        match response {
            Response::Untagged(UntaggedResponse::Condition {
                code: Some(ResponseCode::UidValidity(v)),
                ..
            }) => assert_eq!(v.get(), 1_700_000_000),
            other => panic!("Expected UIDVALIDITY, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_permanentflags_is_skipped() {
        let response =
            ResponseParser::parse(b"* OK [PERMANENTFLAGS (\\Seen \\*)] Limited\r\n").unwrap();
        match response {
            Response::Untagged(UntaggedResponse::Condition { code, text, .. }) => {
                assert_eq!(code, Some(ResponseCode::Other("PERMANENTFLAGS".to_string())));
                assert_eq!(text, "Limited");
            }
            other => panic!("Expected condition, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_exists_and_search() {
        assert_eq!(
            ResponseParser::parse(b"* 23 EXISTS\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Exists(23))
        );
        assert_eq!(
            ResponseParser::parse(b"* SEARCH 4 8 15\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Search(vec![4, 8, 15]))
        );
        assert_eq!(
            ResponseParser::parse(b"* SEARCH\r\n").unwrap(),
            Response::Untagged(UntaggedResponse::Search(vec![]))
        );
    }

    #[test]
    fn test_parse_unknown_untagged_is_other() {
        let response =
            ResponseParser::parse(b"* FLAGS (\\Answered \\Flagged \\Seen)\r\n").unwrap();
        assert!(matches!(
            response,
            Response::Untagged(UntaggedResponse::Other(s)) if s.starts_with("FLAGS")
        ));
    }

    #[test]
    fn test_parse_continuation() {
        assert_eq!(
            ResponseParser::parse(b"+ go ahead\r\n").unwrap(),
            Response::Continuation("go ahead".to_string())
        );
    }
}

//! Tokenizer for IMAP server responses.

#![allow(clippy::missing_errors_doc)]

use crate::{Error, Result};

/// Token types produced by the lexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// Atom (unquoted string without special characters).
    Atom(&'a str),
    /// Quoted string.
    QuotedString(String),
    /// Literal with size prefix `{n}`.
    Literal(Vec<u8>),
    /// Number.
    Number(u32),
    /// `(`
    LParen,
    /// `)`
    RParen,
    /// `[`
    LBracket,
    /// `]`
    RBracket,
    /// Space character.
    Space,
    /// `*` (untagged response prefix).
    Asterisk,
    /// `+` (continuation response prefix).
    Plus,
    /// `NIL`
    Nil,
    /// CRLF line ending.
    Crlf,
    /// End of input.
    Eof,
}

/// IMAP lexer state.
pub struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    /// Creates a new lexer for the given input.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the current position in the input.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Returns the remaining input.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos..]
    }

    /// Returns true if at end of input.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    /// Peeks at the current byte without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Advances by one byte and returns it.
    pub fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    /// Skips n bytes.
    pub fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.input.len());
    }

    /// Reads the next token.
    pub fn next_token(&mut self) -> Result<Token<'a>> {
        let Some(byte) = self.peek() else {
            return Ok(Token::Eof);
        };

        let single = match byte {
            b' ' => Some(Token::Space),
            b'(' => Some(Token::LParen),
            b')' => Some(Token::RParen),
            b'[' => Some(Token::LBracket),
            b']' => Some(Token::RBracket),
            b'*' => Some(Token::Asterisk),
            b'+' => Some(Token::Plus),
            _ => None,
        };
        if let Some(token) = single {
            self.advance();
            return Ok(token);
        }

        match byte {
            b'\r' if self.input.get(self.pos + 1) == Some(&b'\n') => {
                self.skip(2);
                Ok(Token::Crlf)
            }
            b'"' => self.read_quoted_string(),
            b'{' => self.read_literal(),
            b'0'..=b'9' => self.read_number_or_atom(),
            _ if is_atom_char(byte) => self.read_atom(),
            _ => Err(self.error(&format!("Unexpected character: {byte:#04x}"))),
        }
    }

    fn read_quoted_string(&mut self) -> Result<Token<'a>> {
        self.advance();
        let mut result = Vec::new();

        loop {
            match self.advance() {
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(c @ (b'"' | b'\\')) => result.push(c),
                    Some(c) => return Err(self.error(&format!("Invalid escape: \\{c}"))),
                    None => return Err(self.error("Unexpected EOF in quoted string")),
                },
                Some(c) => result.push(c),
                None => return Err(self.error("Unexpected EOF in quoted string")),
            }
        }

        // Servers occasionally send 8-bit data in quoted strings.
        Ok(Token::QuotedString(
            String::from_utf8_lossy(&result).into_owned(),
        ))
    }

    /// Reads `{n}\r\n` followed by n bytes, or `{n+}` (LITERAL+).
    fn read_literal(&mut self) -> Result<Token<'a>> {
        self.advance();
        let start = self.pos;

        while let Some(b) = self.peek() {
            if b.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        let size: usize = std::str::from_utf8(&self.input[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| self.error("Invalid literal size"))?;

        if self.peek() == Some(b'+') {
            self.advance();
        }
        if self.advance() != Some(b'}') {
            return Err(self.error("Expected } after literal size"));
        }
        if self.advance() != Some(b'\r') || self.advance() != Some(b'\n') {
            return Err(self.error("Expected CRLF after literal size"));
        }

        let end = self
            .pos
            .checked_add(size)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| self.error("Incomplete literal data"))?;

        let data = self.input[self.pos..end].to_vec();
        self.pos = end;

        Ok(Token::Literal(data))
    }

    fn read_number_or_atom(&mut self) -> Result<Token<'a>> {
        let s = self.take_atom()?;
        if s.bytes().all(|b| b.is_ascii_digit()) {
            let n: u32 = s.parse().map_err(|_| self.error("Number too large"))?;
            Ok(Token::Number(n))
        } else {
            Ok(Token::Atom(s))
        }
    }

    fn read_atom(&mut self) -> Result<Token<'a>> {
        let s = self.take_atom()?;
        if s.eq_ignore_ascii_case("NIL") {
            Ok(Token::Nil)
        } else {
            Ok(Token::Atom(s))
        }
    }

    fn take_atom(&mut self) -> Result<&'a str> {
        let start = self.pos;
        while self.peek().is_some_and(is_atom_char) {
            self.advance();
        }
        std::str::from_utf8(&self.input[start..self.pos])
            .map_err(|_| self.error("Invalid UTF-8 in atom"))
    }

    /// Creates a parse error at the current position.
    pub(crate) fn error(&self, message: &str) -> Error {
        Error::Parse {
            position: self.pos,
            message: message.to_string(),
        }
    }

    /// Expects and consumes a specific token kind.
    #[allow(clippy::needless_pass_by_value)]
    pub fn expect(&mut self, expected: Token<'_>) -> Result<()> {
        let token = self.next_token()?;
        if std::mem::discriminant(&token) == std::mem::discriminant(&expected) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {expected:?}, got {token:?}")))
        }
    }

    /// Expects and consumes a space.
    pub fn expect_space(&mut self) -> Result<()> {
        self.expect(Token::Space)
    }

    /// Reads a number.
    pub fn read_number(&mut self) -> Result<u32> {
        match self.next_token()? {
            Token::Number(n) => Ok(n),
            token => Err(self.error(&format!("Expected number, got {token:?}"))),
        }
    }

    /// Reads an atom.
    pub fn read_atom_string(&mut self) -> Result<&'a str> {
        match self.next_token()? {
            Token::Atom(s) => Ok(s),
            token => Err(self.error(&format!("Expected atom, got {token:?}"))),
        }
    }

    /// Reads the rest of the line as text, consuming the CRLF.
    pub fn read_text_until_crlf(&mut self) -> String {
        let remaining = self.remaining();
        let end = remaining
            .windows(2)
            .position(|w| w == b"\r\n")
            .unwrap_or(remaining.len());

        self.skip(end + 2);
        String::from_utf8_lossy(&remaining[..end]).into_owned()
    }
}

/// Returns true if the byte is a valid atom character.
///
/// Includes `\` so that flags like `\Seen` lex as single atoms.
#[must_use]
pub const fn is_atom_char(b: u8) -> bool {
    matches!(b,
        0x21 | 0x23..=0x24 | 0x26..=0x27 |
        0x2B..=0x5A |
        0x5C |
        0x5E..=0x7A |
        0x7C |
        0x7E
    )
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
    fn test_tagged_line() {
        let mut lexer = Lexer::new(b"A0001 OK done\r\n");
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("A0001"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("OK"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("done"));
        assert_eq!(lexer.next_token().unwrap(), Token::Crlf);
        assert_eq!(lexer.next_token().unwrap(), Token::Eof);
    }

    #[test]
    fn test_numbers_and_brackets() {
        let mut lexer = Lexer::new(b"[UIDNEXT 100]");
        assert_eq!(lexer.next_token().unwrap(), Token::LBracket);
        assert_eq!(lexer.next_token().unwrap(), Token::Atom("UIDNEXT"));
        assert_eq!(lexer.next_token().unwrap(), Token::Space);
        assert_eq!(lexer.next_token().unwrap(), Token::Number(100));
        assert_eq!(lexer.next_token().unwrap(), Token::RBracket);
    }

    #[test]
    fn test_quoted_string_escaped() {
        let mut lexer = Lexer::new(b"\"a \\\"b\\\"\"");
        assert_eq!(
            lexer.next_token().unwrap(),
            Token::QuotedString("a \"b\"".to_string())
        );
    }

    #[test]
    fn test_nil_case_insensitive() {
        let mut lexer = Lexer::new(b"nil");
        assert_eq!(lexer.next_token().unwrap(), Token::Nil);
    }

    #[test]
    fn test_literal() {
        let mut lexer = Lexer::new(b"{5}\r\nhello)");
        assert_eq!(lexer.next_token().unwrap(), Token::Literal(b"hello".to_vec()));
        assert_eq!(lexer.next_token().unwrap(), Token::RParen);
    }

    #[test]
    fn test_literal_truncated() {
        let mut lexer = Lexer::new(b"{10}\r\nshort");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_atom_chars() {
        assert!(is_atom_char(b'A'));
        assert!(is_atom_char(b'\\'));
        assert!(is_atom_char(b'.'));
        assert!(!is_atom_char(b' '));
        assert!(!is_atom_char(b'('));
        assert!(!is_atom_char(b'"'));
        assert!(!is_atom_char(b'%'));
        assert!(!is_atom_char(b'['));
        assert!(!is_atom_char(b']'));
    }

    proptest! {
        #[test]
        fn prop_lexer_never_panics(input in proptest::collection::vec(any::<u8>(), 0..128)) {
            let mut lexer = Lexer::new(&input);
            for _ in 0..256 {
                match lexer.next_token() {
                    Ok(Token::Eof) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }
    }
}

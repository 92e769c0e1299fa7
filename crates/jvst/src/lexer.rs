//! Incremental SAX tokenizer.
//!
//! Bytes arrive in arbitrary chunks through [`Lexer::feed`]. [`Lexer::next_token`]
//! yields a token as soon as its bytes are complete and reports
//! [`Lexed::NeedMore`] otherwise. A number at the very end of the buffered input
//! is only emitted once more bytes or [`Lexer::close`] prove it has ended.
//!
//! Structure is checked as tokens are produced: separators, nesting and the
//! single top-level value. Object member names come out as ordinary string
//! tokens; the colon that follows is consumed silently.

use std::fmt;

use smallvec::SmallVec;

use crate::token::{Token, TokenKind};

/// Consumed bytes are dropped once this many have accumulated.
const COMPACT_THRESHOLD: usize = 4096;

/// Outcome of one [`Lexer::next_token`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Lexed {
    Token(Token),
    /// The buffered bytes do not contain a complete token.
    NeedMore,
    /// The input is closed and the document is complete.
    Eof,
}

/// Malformed input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexerError {
    pub message: String,
    /// Offset of the offending byte from the start of the input.
    pub offset: usize,
}

impl fmt::Display for LexerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid JSON at byte {}: {}", self.offset, self.message)
    }
}

impl std::error::Error for LexerError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Object,
    Array,
}

/// What the grammar allows next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Value,
    /// Right after `[`.
    ItemOrEnd,
    /// Right after `{`.
    KeyOrEnd,
    /// After a `,` inside an object.
    Key,
    Colon,
    CommaOrEnd,
    /// The top-level value is complete.
    Done,
}

/// Byte-fed JSON tokenizer.
#[derive(Debug)]
pub struct Lexer {
    buf: Vec<u8>,
    pos: usize,
    /// Absolute offset of `buf[0]`.
    consumed: usize,
    /// Resume point while scanning an unterminated string.
    scan: usize,
    stack: SmallVec<[Container; 32]>,
    expect: Expect,
    closed: bool,
    failed: Option<LexerError>,
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            pos: 0,
            consumed: 0,
            scan: 0,
            stack: SmallVec::new(),
            expect: Expect::Value,
            closed: false,
            failed: None,
        }
    }

    /// Appends input bytes. Bytes fed after [`close`](Self::close) are ignored.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.closed {
            return;
        }
        if self.pos >= COMPACT_THRESHOLD {
            self.buf.drain(..self.pos);
            self.consumed += self.pos;
            self.scan = self.scan.saturating_sub(self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Marks the end of input.
    pub fn close(&mut self) {
        self.closed = true;
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The error that stopped tokenizing, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&LexerError> {
        self.failed.as_ref()
    }

    /// Produces the next token. Once an error is returned every later call
    /// returns the same error.
    pub fn next_token(&mut self) -> Result<Lexed, LexerError> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        let result = self.lex();
        if let Err(err) = &result {
            self.failed = Some(err.clone());
        }
        result
    }

    fn lex(&mut self) -> Result<Lexed, LexerError> {
        loop {
            self.skip_whitespace();
            let Some(&b) = self.buf.get(self.pos) else {
                return self.at_end();
            };
            match self.expect {
                Expect::Done => return Err(self.error("trailing characters after the document")),
                Expect::Colon => {
                    if b != b':' {
                        return Err(self.error("expected ':' after member name"));
                    }
                    self.pos += 1;
                    self.expect = Expect::Value;
                }
                Expect::CommaOrEnd => match b {
                    b',' => {
                        self.pos += 1;
                        self.expect = match self.stack.last() {
                            Some(Container::Object) => Expect::Key,
                            _ => Expect::Value,
                        };
                    }
                    b'}' | b']' => return self.close_container(b),
                    _ => return Err(self.error("expected ',' or a closing bracket")),
                },
                Expect::ItemOrEnd if b == b']' => return self.close_container(b),
                Expect::KeyOrEnd if b == b'}' => return self.close_container(b),
                Expect::KeyOrEnd | Expect::Key => {
                    if b != b'"' {
                        return Err(self.error("expected a member name"));
                    }
                    let lexed = self.read_string()?;
                    if matches!(lexed, Lexed::Token(_)) {
                        self.expect = Expect::Colon;
                    }
                    return Ok(lexed);
                }
                Expect::Value | Expect::ItemOrEnd => return self.read_value(b),
            }
        }
    }

    fn at_end(&mut self) -> Result<Lexed, LexerError> {
        if !self.closed {
            return Ok(Lexed::NeedMore);
        }
        if self.expect == Expect::Done {
            Ok(Lexed::Eof)
        } else if self.stack.is_empty() && self.expect == Expect::Value {
            Err(self.error("empty document"))
        } else {
            Err(self.error("unexpected end of input"))
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.buf.get(self.pos) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl Into<String>) -> LexerError {
        LexerError {
            message: message.into(),
            offset: self.consumed + self.pos,
        }
    }

    /// Records that a complete value was produced.
    fn value_done(&mut self) {
        self.expect = if self.stack.is_empty() {
            Expect::Done
        } else {
            Expect::CommaOrEnd
        };
    }

    fn close_container(&mut self, b: u8) -> Result<Lexed, LexerError> {
        let (want, kind) = if b == b'}' {
            (Container::Object, TokenKind::ObjectEnd)
        } else {
            (Container::Array, TokenKind::ArrayEnd)
        };
        if self.stack.last() != Some(&want) {
            return Err(self.error("mismatched closing bracket"));
        }
        self.stack.pop();
        self.pos += 1;
        self.value_done();
        Ok(Lexed::Token(Token::simple(kind)))
    }

    fn read_value(&mut self, b: u8) -> Result<Lexed, LexerError> {
        match b {
            b'{' | b'[' => {
                let (container, kind, expect) = if b == b'{' {
                    (Container::Object, TokenKind::ObjectBeg, Expect::KeyOrEnd)
                } else {
                    (Container::Array, TokenKind::ArrayBeg, Expect::ItemOrEnd)
                };
                self.stack.push(container);
                self.pos += 1;
                self.expect = expect;
                Ok(Lexed::Token(Token::simple(kind)))
            }
            b'"' => {
                let lexed = self.read_string()?;
                if matches!(lexed, Lexed::Token(_)) {
                    self.value_done();
                }
                Ok(lexed)
            }
            b't' => self.read_keyword(b"true", TokenKind::True),
            b'f' => self.read_keyword(b"false", TokenKind::False),
            b'n' => self.read_keyword(b"null", TokenKind::Null),
            b'-' | b'0'..=b'9' => self.read_number(),
            _ => Err(self.error(format!("unexpected character {:?}", char::from(b)))),
        }
    }

    fn read_keyword(&mut self, word: &'static [u8], kind: TokenKind) -> Result<Lexed, LexerError> {
        let rest = &self.buf[self.pos..];
        let n = rest.len().min(word.len());
        if rest[..n] != word[..n] {
            return Err(self.error("invalid literal"));
        }
        if n < word.len() {
            return if self.closed {
                Err(self.error("truncated literal"))
            } else {
                Ok(Lexed::NeedMore)
            };
        }
        self.pos += word.len();
        self.value_done();
        Ok(Lexed::Token(Token::simple(kind)))
    }

    fn read_number(&mut self) -> Result<Lexed, LexerError> {
        let start = self.pos;
        let mut end = start;
        while let Some(b'0'..=b'9' | b'-' | b'+' | b'.' | b'e' | b'E') = self.buf.get(end) {
            end += 1;
        }
        if end == self.buf.len() && !self.closed {
            return Ok(Lexed::NeedMore);
        }
        let text = &self.buf[start..end];
        if !is_json_number(text) {
            return Err(self.error("malformed number"));
        }
        let value = std::str::from_utf8(text)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| self.error("malformed number"))?;
        self.pos = end;
        self.value_done();
        Ok(Lexed::Token(Token::number(value)))
    }

    /// Reads a string starting at the opening quote under `pos`.
    fn read_string(&mut self) -> Result<Lexed, LexerError> {
        let start = self.pos + 1;
        let mut i = self.scan.max(start);
        let end = loop {
            match self.buf.get(i) {
                Some(b'"') => break i,
                Some(b'\\') => {
                    if i + 1 >= self.buf.len() {
                        break usize::MAX;
                    }
                    i += 2;
                }
                Some(_) => i += 1,
                None => break usize::MAX,
            }
        };
        if end == usize::MAX {
            if self.closed {
                return Err(self.error("unterminated string"));
            }
            self.scan = i;
            return Ok(Lexed::NeedMore);
        }
        let text = self.read_string_content(start, end)?;
        self.pos = end + 1;
        self.scan = 0;
        Ok(Lexed::Token(Token::string(text)))
    }

    fn read_string_content(&self, start: usize, end: usize) -> Result<String, LexerError> {
        let raw = &self.buf[start..end];
        let fail = |at: usize, message: &str| LexerError {
            message: message.to_owned(),
            offset: self.consumed + start + at,
        };
        let mut out = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            let b = raw[i];
            if b < 0x20 {
                return Err(fail(i, "control character in string"));
            }
            if b != b'\\' {
                out.push(b);
                i += 1;
                continue;
            }
            let escaped = match raw[i + 1] {
                b'"' => '"',
                b'\\' => '\\',
                b'/' => '/',
                b'b' => '\u{8}',
                b'f' => '\u{c}',
                b'n' => '\n',
                b'r' => '\r',
                b't' => '\t',
                b'u' => {
                    let (c, used) = read_unicode_escape(&raw[i..]).map_err(|m| fail(i, m))?;
                    i += used;
                    let mut utf8 = [0u8; 4];
                    out.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                    continue;
                }
                _ => return Err(fail(i, "unknown escape sequence")),
            };
            out.push(escaped as u8);
            i += 2;
        }
        String::from_utf8(out).map_err(|e| fail(e.utf8_error().valid_up_to(), "invalid UTF-8 in string"))
    }
}

/// Decodes `\uXXXX`, joining a surrogate pair when one follows. Returns the
/// character and the number of bytes used.
fn read_unicode_escape(raw: &[u8]) -> Result<(char, usize), &'static str> {
    let high = hex4(raw.get(2..6)).ok_or("invalid unicode escape")?;
    if !(0xD800..0xE000).contains(&high) {
        return char::from_u32(high).map(|c| (c, 6)).ok_or("invalid unicode escape");
    }
    if high >= 0xDC00 {
        return Err("unpaired low surrogate");
    }
    if raw.get(6..8) != Some(b"\\u".as_slice()) {
        return Err("unpaired high surrogate");
    }
    let low = hex4(raw.get(8..12)).ok_or("invalid unicode escape")?;
    if !(0xDC00..0xE000).contains(&low) {
        return Err("unpaired high surrogate");
    }
    let code = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
    char::from_u32(code).map(|c| (c, 12)).ok_or("invalid unicode escape")
}

fn hex4(digits: Option<&[u8]>) -> Option<u32> {
    let digits = std::str::from_utf8(digits?).ok()?;
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

/// `-?(0|[1-9][0-9]*)(\.[0-9]+)?([eE][+-]?[0-9]+)?`
fn is_json_number(text: &[u8]) -> bool {
    let mut i = 0;
    let digits = |i: &mut usize| {
        let start = *i;
        while text.get(*i).is_some_and(u8::is_ascii_digit) {
            *i += 1;
        }
        *i > start
    };
    if text.get(i) == Some(&b'-') {
        i += 1;
    }
    match text.get(i) {
        Some(b'0') => i += 1,
        Some(b'1'..=b'9') => {
            digits(&mut i);
        }
        _ => return false,
    }
    if text.get(i) == Some(&b'.') {
        i += 1;
        if !digits(&mut i) {
            return false;
        }
    }
    if let Some(b'e' | b'E') = text.get(i) {
        i += 1;
        if let Some(b'+' | b'-') = text.get(i) {
            i += 1;
        }
        if !digits(&mut i) {
            return false;
        }
    }
    i == text.len()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn lex_all(input: &str) -> Result<Vec<Token>, LexerError> {
        let mut lexer = Lexer::new();
        lexer.feed(input.as_bytes());
        lexer.close();
        let mut tokens = Vec::new();
        loop {
            match lexer.next_token()? {
                Lexed::Token(t) => tokens.push(t),
                Lexed::Eof => return Ok(tokens),
                Lexed::NeedMore => panic!("closed lexer asked for more input"),
            }
        }
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex_all(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn object_members_become_string_tokens() {
        use TokenKind::*;
        assert_eq!(
            kinds(r#" {"a": [1, true, null], "b": {}} "#),
            vec![
                ObjectBeg, String, ArrayBeg, Number, True, Null, ArrayEnd, String, ObjectBeg, ObjectEnd, ObjectEnd
            ]
        );
    }

    #[test]
    fn strings_are_decoded_and_measured_in_code_points() {
        let tokens = lex_all(r#""a\n\u00e9\ud83d\ude00""#).unwrap();
        assert_eq!(tokens[0].text, "a\né\u{1F600}");
        assert_eq!(tokens[0].len, 4);
    }

    #[test]
    fn numbers_wait_for_a_delimiter() {
        let mut lexer = Lexer::new();
        lexer.feed(b"[12");
        assert_eq!(lexer.next_token().unwrap(), Lexed::Token(Token::simple(TokenKind::ArrayBeg)));
        assert_eq!(lexer.next_token().unwrap(), Lexed::NeedMore);
        lexer.feed(b".5e1]");
        assert_eq!(lexer.next_token().unwrap(), Lexed::Token(Token::number(125.0)));
        assert_eq!(lexer.next_token().unwrap(), Lexed::Token(Token::simple(TokenKind::ArrayEnd)));
        assert_eq!(lexer.next_token().unwrap(), Lexed::NeedMore);
        lexer.close();
        assert_eq!(lexer.next_token().unwrap(), Lexed::Eof);
    }

    #[test]
    fn strings_split_across_chunks() {
        let mut lexer = Lexer::new();
        lexer.feed(br#""ab\"#);
        assert_eq!(lexer.next_token().unwrap(), Lexed::NeedMore);
        lexer.feed(br#""cd""#);
        assert_eq!(
            lexer.next_token().unwrap(),
            Lexed::Token(Token::string("ab\"cd".to_owned()))
        );
    }

    #[test]
    fn structural_errors_are_reported() {
        for bad in ["", "[1,]", "{\"a\" 1}", "[1 2]", "{]", "01", "1.", "\"\\x\"", "tru", "1 2", "\"\\ud800\""] {
            assert!(lex_all(bad).is_err(), "{bad:?} should not tokenize");
        }
    }

    #[test]
    fn errors_are_sticky() {
        let mut lexer = Lexer::new();
        lexer.feed(b"[}");
        lexer.next_token().unwrap();
        let first = lexer.next_token().unwrap_err();
        assert_eq!(first.offset, 1);
        assert_eq!(lexer.next_token().unwrap_err(), first);
        assert_eq!(lexer.last_error(), Some(&first));
    }
}

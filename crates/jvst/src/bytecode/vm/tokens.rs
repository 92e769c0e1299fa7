//! Token buffer, value skipping and canonical forms for unique items.
//!
//! Tokens pulled from the lexer stay in `buffer` while a split might replay
//! them. Outside of splits everything before the last token read is dropped,
//! so `UNTOKEN` always has its token available.

use super::Vm;
use crate::{
    error::VmError,
    lexer::{Lexed, Lexer},
    resource::ResourceTracker,
    token::{Token, TokenKind},
    tracer::VmTracer,
};

/// Outcome of asking for a buffered token.
pub(super) enum Fetch {
    Ready,
    NeedMore,
    /// The lexer rejected the input.
    BadJson,
}

/// Outcome of scanning the upcoming value.
pub(super) enum Scan {
    Value(String),
    NeedMore,
    BadJson,
}

/// Partially built canonical container.
enum Partial {
    Array(Vec<String>),
    Object {
        members: Vec<(String, String)>,
        key: Option<String>,
    },
}

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    /// Makes sure `buffer[index]` exists. Past the end of the document the
    /// buffer is padded with `NONE` tokens.
    fn ensure(&mut self, lexer: &mut Lexer, index: usize) -> Result<Fetch, VmError> {
        while self.buffer.len() <= index {
            let token = match lexer.next_token() {
                Ok(Lexed::Token(t)) => t,
                Ok(Lexed::Eof) => Token::simple(TokenKind::None),
                Ok(Lexed::NeedMore) => return Ok(Fetch::NeedMore),
                Err(_) => return Ok(Fetch::BadJson),
            };
            self.buffer.push_back(token);
            self.tracker.check_buffer(self.buffer.len())?;
        }
        Ok(Fetch::Ready)
    }

    /// `TOKEN`: loads the next token into the token registers.
    pub(super) fn read_token(&mut self, lexer: &mut Lexer) -> Result<Fetch, VmError> {
        let fetch = self.ensure(lexer, self.cursor)?;
        if let Fetch::Ready = fetch {
            self.current = self.buffer[self.cursor].clone();
            self.cursor += 1;
            self.tracer.on_token(self.current.kind);
            self.compact();
        }
        Ok(fetch)
    }

    /// `CONSUME`: skips to the end of the current value.
    pub(super) fn consume(&mut self, lexer: &mut Lexer) -> Result<Fetch, VmError> {
        if self.consume_depth == 0 {
            if !matches!(self.current.kind, TokenKind::ObjectBeg | TokenKind::ArrayBeg) {
                return Ok(Fetch::Ready);
            }
            self.consume_depth = 1;
        }
        while self.consume_depth > 0 {
            match self.ensure(lexer, self.cursor)? {
                Fetch::Ready => {}
                other => return Ok(other),
            }
            match self.buffer[self.cursor].kind {
                TokenKind::ObjectBeg | TokenKind::ArrayBeg => self.consume_depth += 1,
                TokenKind::ObjectEnd | TokenKind::ArrayEnd => self.consume_depth -= 1,
                TokenKind::None => self.consume_depth = 0,
                _ => {}
            }
            self.cursor += 1;
        }
        self.compact();
        Ok(Fetch::Ready)
    }

    /// Drops tokens no split or `UNTOKEN` can reach any more.
    fn compact(&mut self) {
        if self.splits.is_empty() && self.cursor > 1 {
            self.buffer.drain(..self.cursor - 1);
            self.cursor = 1;
        }
    }

    /// Canonical form of the value starting at the cursor, without moving it.
    ///
    /// Object members are sorted by key and numbers are compared by value, so
    /// `{"a":1,"b":[2.0]}` and `{"b":[2],"a":1}` produce the same string.
    pub(super) fn scan_value(&mut self, lexer: &mut Lexer) -> Result<Scan, VmError> {
        let mut stack: Vec<Partial> = Vec::new();
        let mut i = self.cursor;
        loop {
            match self.ensure(lexer, i)? {
                Fetch::Ready => {}
                Fetch::NeedMore => return Ok(Scan::NeedMore),
                Fetch::BadJson => return Ok(Scan::BadJson),
            }
            let token = &self.buffer[i];
            i += 1;
            let leaf = match token.kind {
                TokenKind::ObjectBeg => {
                    stack.push(Partial::Object {
                        members: Vec::new(),
                        key: None,
                    });
                    continue;
                }
                TokenKind::ArrayBeg => {
                    stack.push(Partial::Array(Vec::new()));
                    continue;
                }
                TokenKind::ObjectEnd => match stack.pop() {
                    Some(Partial::Object { mut members, .. }) => {
                        members.sort_unstable();
                        let mut out = String::from("{");
                        for (n, (k, v)) in members.iter().enumerate() {
                            if n > 0 {
                                out.push(',');
                            }
                            out.push_str(k);
                            out.push(':');
                            out.push_str(v);
                        }
                        out.push('}');
                        out
                    }
                    _ => return Ok(Scan::BadJson),
                },
                TokenKind::ArrayEnd => match stack.pop() {
                    Some(Partial::Array(items)) => format!("[{}]", items.join(",")),
                    _ => return Ok(Scan::BadJson),
                },
                TokenKind::String => {
                    let text = format!("{:?}", token.text);
                    if let Some(Partial::Object { key: key @ None, .. }) = stack.last_mut() {
                        *key = Some(text);
                        continue;
                    }
                    text
                }
                TokenKind::Number => canonical_number(token.number),
                TokenKind::Null => "null".to_owned(),
                TokenKind::True => "true".to_owned(),
                TokenKind::False => "false".to_owned(),
                TokenKind::None => return Ok(Scan::BadJson),
            };
            match stack.last_mut() {
                None => return Ok(Scan::Value(leaf)),
                Some(Partial::Array(items)) => items.push(leaf),
                Some(Partial::Object { members, key }) => match key.take() {
                    Some(k) => members.push((k, leaf)),
                    None => return Ok(Scan::BadJson),
                },
            }
        }
    }
}

fn canonical_number(v: f64) -> String {
    if v == 0.0 {
        // folds -0.0
        "0".to_owned()
    } else {
        ryu::Buffer::new().format(v).to_owned()
    }
}

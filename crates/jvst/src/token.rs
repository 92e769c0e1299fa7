//! SAX-style token model shared by the tokenizer, the IR and the VM.

use serde::{Deserialize, Serialize};

/// Kind of a streaming JSON token.
///
/// The discriminant is what the VM stores in its token-type register and what
/// compiled programs compare against, so the numbering is part of the bytecode
/// format.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, strum::IntoStaticStr, strum::FromRepr, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum TokenKind {
    /// No token: the input ended.
    #[default]
    None = 0,
    Null = 1,
    True = 2,
    False = 3,
    String = 4,
    Number = 5,
    ObjectBeg = 6,
    ObjectEnd = 7,
    ArrayBeg = 8,
    ArrayEnd = 9,
}

impl TokenKind {
    /// Name as shown in listings, e.g. `OBJECT_BEG`.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Integer value of the kind in the token-type register.
    #[must_use]
    pub const fn code(self) -> i64 {
        self as i64
    }
}

/// One token of the document.
///
/// Strings carry their decoded text; `len` is the length in code points for
/// strings and zero otherwise. Numbers carry their value as an `f64`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Token {
    pub kind: TokenKind,
    pub number: f64,
    pub len: usize,
    pub text: String,
}

impl Token {
    /// A token with no payload.
    #[must_use]
    pub fn simple(kind: TokenKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// A string token (also used for object member names).
    #[must_use]
    pub fn string(text: String) -> Self {
        Self {
            kind: TokenKind::String,
            number: 0.0,
            len: text.chars().count(),
            text,
        }
    }

    /// A number token.
    #[must_use]
    pub fn number(value: f64) -> Self {
        Self {
            kind: TokenKind::Number,
            number: value,
            ..Self::default()
        }
    }
}

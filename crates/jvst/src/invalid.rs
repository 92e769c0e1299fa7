//! Validation failure codes.
//!
//! A document that does not satisfy its schema is reported through one of these
//! codes. Codes are small stable integers so the VM can return them directly from
//! `RETURN` instructions; `0` is reserved for "valid" and never appears here.

use std::fmt;

/// Reason a document failed validation.
///
/// The discriminant is the value the VM returns for the failing path, so the
/// numbering must never change once published.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::IntoStaticStr,
    strum::EnumIter,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum InvalidCode {
    UnexpectedToken = 1,
    NotInteger = 2,
    NumberOutOfRange = 3,
    TooFewProperties = 4,
    TooManyProperties = 5,
    MissingRequiredProperties = 6,
    InvalidSplitCondition = 7,
    BadPropertyName = 8,
    InvalidMatchCase = 9,
    NotMultiple = 10,
    LengthTooShort = 11,
    LengthTooLong = 12,
    TooFewItems = 13,
    TooManyItems = 14,
    ArrayNotUnique = 15,
    ContainsUnsatisfied = 16,
    PatternMismatch = 17,
    InvalidJson = 18,
}

impl InvalidCode {
    /// Fixed diagnostic string for this code.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::UnexpectedToken => "unexpected token",
            Self::NotInteger => "number is not an integer",
            Self::NumberOutOfRange => "number is out of range",
            Self::TooFewProperties => "too few properties",
            Self::TooManyProperties => "too many properties",
            Self::MissingRequiredProperties => "missing required properties",
            Self::InvalidSplitCondition => "invalid split condition",
            Self::BadPropertyName => "bad property name",
            Self::InvalidMatchCase => "invalid match case",
            Self::NotMultiple => "number is not a multiple of divisor",
            Self::LengthTooShort => "length is too short",
            Self::LengthTooLong => "length is too long",
            Self::TooFewItems => "too few items",
            Self::TooManyItems => "too many items",
            Self::ArrayNotUnique => "array elements are not unique",
            Self::ContainsUnsatisfied => "array does not contain a required item",
            Self::PatternMismatch => "string does not match pattern",
            Self::InvalidJson => "document is not well-formed JSON",
        }
    }

    /// The integer the VM returns for this code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Maps a VM return value back to its code. `0` and unknown values yield `None`.
    #[must_use]
    pub fn from_return(code: i64) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|c| i64::from(c.as_u8()) == code)
    }

    /// Name of the code as used in IR and op listings, e.g. `TOO_FEW_ITEMS`.
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for InvalidCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

//! Canonical constraint tree consumed by the translator.
//!
//! The tree is produced by a schema canonicalizer (not part of this crate) and is
//! treated as read-only input. It is a boolean combination of per-type leaves:
//! a leaf constrains one JSON type and accepts every value of another type, which
//! is how JSON Schema keywords behave (`minimum` says nothing about strings).
//!
//! The serde representation lets test fixtures and callers express trees as JSON,
//! e.g. `{"Switch": {"number": "Valid", "null": "Invalid", ...}}`.

use serde::{Deserialize, Serialize};

/// A node of the constraint tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constraint {
    /// Accepts any value.
    Valid,
    /// Rejects any value.
    Invalid,
    /// Every child must accept the value.
    And(Vec<Constraint>),
    /// At least one child must accept the value.
    Or(Vec<Constraint>),
    /// Exactly one child must accept the value.
    Xor(Vec<Constraint>),
    /// The child must reject the value.
    Not(Box<Constraint>),
    /// Dispatches on the JSON type of the value.
    Switch(TypeSwitch),

    /// Numeric bounds.
    NumRange(NumRange),
    /// The number must be integral.
    Integer,
    /// The number must be an integer multiple of the divisor.
    MultipleOf(f64),

    /// String length bounds, counted in code points.
    Length(CountRange),
    /// The string must match the (unanchored) regular expression.
    Pattern(String),

    /// Per-property value constraints selected by property name.
    Properties(PropertyMatch),
    /// Bounds on the number of object members.
    PropertyCount(CountRange),
    /// The object must contain all of these names.
    Required(Vec<String>),

    /// Positional and additional item constraints.
    Items(Items),
    /// Bounds on the number of array items.
    ItemCount(CountRange),
    /// No two array items may be equal.
    UniqueItems,
    /// At least one array item must satisfy the constraint.
    Contains(Box<Constraint>),
}

/// Per-type constraint table for [`Constraint::Switch`].
///
/// Every JSON type has an entry. `Invalid` rejects the type, `Valid` accepts it
/// without further checks. Arms left out of the serialized form are `Invalid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeSwitch {
    #[serde(default = "rejected")]
    pub null: Box<Constraint>,
    #[serde(default = "rejected")]
    pub boolean: Box<Constraint>,
    #[serde(default = "rejected")]
    pub number: Box<Constraint>,
    #[serde(default = "rejected")]
    pub string: Box<Constraint>,
    #[serde(default = "rejected")]
    pub object: Box<Constraint>,
    #[serde(default = "rejected")]
    pub array: Box<Constraint>,
}

fn rejected() -> Box<Constraint> {
    Box::new(Constraint::Invalid)
}

/// JSON value type, as used by [`TypeSwitch`] and by leaf classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Null,
    Boolean,
    Number,
    String,
    Object,
    Array,
}

impl ValueType {
    /// All types in switch order.
    pub const ALL: [Self; 6] = [
        Self::Null,
        Self::Boolean,
        Self::Number,
        Self::String,
        Self::Object,
        Self::Array,
    ];

    /// True for object and array, whose values span more than one token.
    #[must_use]
    pub fn is_container(self) -> bool {
        matches!(self, Self::Object | Self::Array)
    }
}

/// Inclusive lower/upper count bounds (`max: None` is unbounded).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CountRange {
    #[serde(default)]
    pub min: usize,
    #[serde(default)]
    pub max: Option<usize>,
}

/// Numeric bounds. Absent bounds are unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NumRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub exclusive_min: bool,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub exclusive_max: bool,
}

/// A property-name pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Pattern {
    /// Matches exactly this name.
    Literal(String),
    /// Matches any name the (unanchored) regular expression finds a match in.
    Regex(String),
}

/// Value constraint for the properties whose name matches `pattern`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRule {
    pub pattern: Pattern,
    pub constraint: Constraint,
}

/// `properties` / `patternProperties` / `additionalProperties` in one node.
///
/// Every rule whose pattern matches a name applies to that member's value; if no
/// rule matches, `additional` applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMatch {
    pub rules: Vec<PropertyRule>,
    pub additional: Box<Constraint>,
}

/// `items` / `additionalItems` in one node.
///
/// Item `i` is checked against `tuple[i]` when present and against `additional`
/// otherwise. A single-schema `items` keyword is an empty tuple plus `additional`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Items {
    #[serde(default)]
    pub tuple: Vec<Constraint>,
    pub additional: Box<Constraint>,
}

impl Constraint {
    /// A switch whose arms are all `Valid`.
    #[must_use]
    pub fn any_type() -> TypeSwitch {
        TypeSwitch {
            null: Box::new(Self::Valid),
            boolean: Box::new(Self::Valid),
            number: Box::new(Self::Valid),
            string: Box::new(Self::Valid),
            object: Box::new(Self::Valid),
            array: Box::new(Self::Valid),
        }
    }

    /// A switch accepting only `ty`, whose arm is `arm`.
    #[must_use]
    pub fn only(ty: ValueType, arm: Self) -> Self {
        let mut sw = TypeSwitch {
            null: Box::new(Self::Invalid),
            boolean: Box::new(Self::Invalid),
            number: Box::new(Self::Invalid),
            string: Box::new(Self::Invalid),
            object: Box::new(Self::Invalid),
            array: Box::new(Self::Invalid),
        };
        *sw.arm_mut(ty) = arm;
        Self::Switch(sw)
    }

    /// The JSON type a leaf constrains, or `None` for combinators and `Valid`/`Invalid`.
    #[must_use]
    pub fn leaf_type(&self) -> Option<ValueType> {
        match self {
            Self::NumRange(_) | Self::Integer | Self::MultipleOf(_) => Some(ValueType::Number),
            Self::Length(_) | Self::Pattern(_) => Some(ValueType::String),
            Self::Properties(_) | Self::PropertyCount(_) | Self::Required(_) => Some(ValueType::Object),
            Self::Items(_) | Self::ItemCount(_) | Self::UniqueItems | Self::Contains(_) => Some(ValueType::Array),
            Self::Valid
            | Self::Invalid
            | Self::And(_)
            | Self::Or(_)
            | Self::Xor(_)
            | Self::Not(_)
            | Self::Switch(_) => None,
        }
    }
}

impl TypeSwitch {
    /// The arm for `ty`.
    #[must_use]
    pub fn arm(&self, ty: ValueType) -> &Constraint {
        match ty {
            ValueType::Null => &self.null,
            ValueType::Boolean => &self.boolean,
            ValueType::Number => &self.number,
            ValueType::String => &self.string,
            ValueType::Object => &self.object,
            ValueType::Array => &self.array,
        }
    }

    /// Mutable access to the arm for `ty`.
    pub fn arm_mut(&mut self, ty: ValueType) -> &mut Constraint {
        match ty {
            ValueType::Null => &mut self.null,
            ValueType::Boolean => &mut self.boolean,
            ValueType::Number => &mut self.number,
            ValueType::String => &mut self.string,
            ValueType::Object => &mut self.object,
            ValueType::Array => &mut self.array,
        }
    }
}

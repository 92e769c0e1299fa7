//! Compiler and interpreter errors.
//!
//! Neither type ever describes a document that fails validation; that is an
//! [`InvalidCode`](crate::InvalidCode) returned as a normal value. These errors
//! report unusable input to the compiler, broken compiler invariants, malformed
//! bytecode, or exhausted resource limits.

use std::fmt;

use crate::resource::ResourceError;

/// Compiler stage that detected an internal inconsistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    Translate,
    Linearize,
    Flatten,
    Liveness,
    Assemble,
    Encode,
}

/// Error returned by the compilation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// A regular expression in the constraint tree does not compile.
    BadPattern { pattern: String, message: String },
    /// A stage received input that violates an invariant of an earlier stage.
    ///
    /// This always indicates a compiler bug (or a hand-built malformed IR) and is
    /// never turned into a validation failure.
    Internal { stage: Stage, message: String },
}

impl CompileError {
    pub(crate) fn internal(stage: Stage, message: impl Into<String>) -> Self {
        Self::Internal {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadPattern { pattern, message } => {
                write!(f, "invalid pattern {pattern:?}: {message}")
            }
            Self::Internal { stage, message } => {
                write!(f, "internal compiler error in {stage}: {message}")
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Fatal error raised while executing bytecode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    /// The bytecode is inconsistent (bad opcode, operand or table reference).
    Malformed { pc: usize, message: String },
    /// A DFA in the program's table could not be compiled.
    BadMatcher { index: usize, message: String },
    /// A configured resource limit was exceeded.
    Resource(ResourceError),
    /// `validate_more` was called after the input was closed.
    Closed,
}

impl VmError {
    pub(crate) fn malformed(pc: usize, message: impl Into<String>) -> Self {
        Self::Malformed {
            pc,
            message: message.into(),
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed { pc, message } => write!(f, "malformed bytecode at {pc}: {message}"),
            Self::BadMatcher { index, message } => write!(f, "cannot compile dfa {index}: {message}"),
            Self::Resource(err) => write!(f, "{err}"),
            Self::Closed => f.write_str("input already closed"),
        }
    }
}

impl std::error::Error for VmError {}

impl From<ResourceError> for VmError {
    fn from(err: ResourceError) -> Self {
        Self::Resource(err)
    }
}

/// Error returned by [`CompiledSchema::load`](crate::CompiledSchema::load).
#[derive(Debug)]
pub enum LoadError {
    /// The bytes are not a serialized program.
    Decode(postcard::Error),
    /// The program decodes but fails its consistency checks.
    Program(VmError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode(err) => write!(f, "cannot decode program: {err}"),
            Self::Program(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for LoadError {}

impl From<postcard::Error> for LoadError {
    fn from(err: postcard::Error) -> Self {
        Self::Decode(err)
    }
}

impl From<VmError> for LoadError {
    fn from(err: VmError) -> Self {
        Self::Program(err)
    }
}

#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "table indices are bounded by u32 ids")]

pub mod bytecode;
pub mod cnode;
mod error;
mod invalid;
pub mod ir;
pub mod lexer;
pub mod matcher;
pub mod op;
mod resource;
pub mod token;
pub mod tracer;
mod validator;

pub use crate::{
    bytecode::{Status, Verdict, VmProgram},
    cnode::{Constraint, CountRange, Items, NumRange, Pattern, PropertyMatch, PropertyRule, TypeSwitch, ValueType},
    error::{CompileError, LoadError, Stage, VmError},
    invalid::InvalidCode,
    resource::{DEFAULT_MAX_CALL_DEPTH, LimitedTracker, NoLimitTracker, ResourceError, ResourceLimits, ResourceTracker},
    tracer::{
        CoverageTracer, NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent,
        VmTracer,
    },
    validator::{CompileOptions, CompiledSchema, Validator, compile_program},
};

/// Compiles `constraint` with the default options.
///
/// Shorthand for [`CompiledSchema::compile`].
pub fn compile(constraint: &Constraint) -> Result<CompiledSchema, CompileError> {
    CompiledSchema::compile(constraint)
}

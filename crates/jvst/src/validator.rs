//! Public interface for compiling schemas and validating documents.

use std::fmt;

use crate::{
    bytecode::{Executable, Status, Verdict, Vm, VmProgram, encode},
    cnode::Constraint,
    error::{CompileError, LoadError, Stage, VmError},
    invalid::InvalidCode,
    ir::{flatten, linearize, liveness, translate},
    lexer::{Lexed, Lexer, LexerError},
    op::assemble,
    resource::{NoLimitTracker, ResourceTracker},
    tracer::{NoopTracer, VmTracer},
};

/// Compiler configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    /// Run liveness analysis and let temporaries with disjoint live ranges share
    /// a slot. Without it every temporary gets its own slot.
    pub reuse_slots: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { reuse_slots: true }
    }
}

/// A constraint tree compiled to bytecode.
///
/// Compile once and validate any number of documents; every validator borrows
/// the schema and keeps its own state.
///
/// # Example
/// ```
/// use jvst::{CompiledSchema, Constraint, Verdict};
///
/// let schema = CompiledSchema::compile(&Constraint::Integer).unwrap();
/// assert_eq!(schema.validate(b"42").unwrap(), Verdict::Valid);
/// assert!(!schema.validate(b"4.2").unwrap().is_valid());
/// ```
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    exe: Executable,
}

impl CompiledSchema {
    /// Compiles `constraint` with the default options.
    pub fn compile(constraint: &Constraint) -> Result<Self, CompileError> {
        Self::compile_with(constraint, CompileOptions::default())
    }

    /// Runs the whole pipeline: translate, linearize, flatten, optional
    /// liveness, assemble, encode.
    pub fn compile_with(constraint: &Constraint, options: CompileOptions) -> Result<Self, CompileError> {
        let program = compile_program(constraint, options)?;
        let exe = Executable::new(program)
            .map_err(|err| CompileError::internal(Stage::Encode, format!("encoded program rejected: {err}")))?;
        Ok(Self { exe })
    }

    /// The encoded program.
    #[must_use]
    pub fn program(&self) -> &VmProgram {
        self.exe.program()
    }

    /// Starts validating a document with no resource limits or tracing.
    #[must_use]
    pub fn validator(&self) -> Validator<'_> {
        self.validator_with(NoLimitTracker, NoopTracer)
    }

    /// Starts validating a document with a custom tracker and tracer.
    #[must_use]
    pub fn validator_with<T: ResourceTracker, Tr: VmTracer>(&self, tracker: T, tracer: Tr) -> Validator<'_, T, Tr> {
        Validator {
            lexer: Lexer::new(),
            vm: Vm::new(&self.exe, tracker, tracer),
            closed: false,
            trailing: None,
        }
    }

    /// Validates a complete document.
    pub fn validate(&self, document: &[u8]) -> Result<Verdict, VmError> {
        let mut validator = self.validator();
        validator.validate_more(document)?;
        validator.validate_close()
    }

    /// Serializes the compiled program.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        self.exe.program().dump()
    }

    /// Restores a schema from [`dump`](Self::dump) output.
    ///
    /// The program is checked the same way a freshly compiled one is; the
    /// bytes are otherwise trusted.
    pub fn load(bytes: &[u8]) -> Result<Self, LoadError> {
        let program = VmProgram::load(bytes)?;
        Ok(Self {
            exe: Executable::new(program)?,
        })
    }
}

/// Disassembly of the compiled program.
impl fmt::Display for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.exe.program().fmt(f)
    }
}

/// Runs every compiler stage over `constraint`.
pub fn compile_program(constraint: &Constraint, options: CompileOptions) -> Result<VmProgram, CompileError> {
    let tree = translate(constraint)?;
    let cfg = linearize(&tree)?;
    let flat = flatten(cfg)?;
    let live = if options.reuse_slots {
        Some(liveness(&flat)?)
    } else {
        None
    };
    let ops = assemble(&flat, live.as_ref())?;
    encode(&ops)
}

/// Validation state for one document.
///
/// Feed bytes with [`validate_more`](Self::validate_more) in chunks of any size,
/// then call [`validate_close`](Self::validate_close) for the verdict.
/// `validate_more` may already report [`Status::Invalid`]; [`Status::Valid`]
/// means the top-level value is complete and accepted, and only whitespace may
/// follow.
#[derive(Debug)]
pub struct Validator<'s, T: ResourceTracker = NoLimitTracker, Tr: VmTracer = NoopTracer> {
    lexer: Lexer,
    vm: Vm<'s, T, Tr>,
    closed: bool,
    /// Malformed input found after the program accepted the document.
    trailing: Option<InvalidCode>,
}

impl<T: ResourceTracker, Tr: VmTracer> Validator<'_, T, Tr> {
    /// Feeds the next chunk of the document.
    pub fn validate_more(&mut self, bytes: &[u8]) -> Result<Status, VmError> {
        if self.closed {
            return Err(VmError::Closed);
        }
        self.lexer.feed(bytes);
        self.step()
    }

    /// Marks the end of the document and returns the verdict. Calling it again
    /// returns the same verdict.
    pub fn validate_close(&mut self) -> Result<Verdict, VmError> {
        self.closed = true;
        self.lexer.close();
        match self.step()? {
            Status::Valid => Ok(Verdict::Valid),
            Status::Invalid(code) => Ok(Verdict::Invalid(code)),
            Status::NeedMore => Err(VmError::malformed(0, "program still waiting for input after close")),
        }
    }

    fn step(&mut self) -> Result<Status, VmError> {
        if let Some(code) = self.trailing {
            return Ok(Status::Invalid(code));
        }
        let status = self.vm.run(&mut self.lexer)?;
        if status != Status::Valid {
            return Ok(status);
        }
        loop {
            match self.lexer.next_token() {
                Ok(Lexed::Token(_)) => {}
                Ok(Lexed::NeedMore | Lexed::Eof) => return Ok(Status::Valid),
                Err(_) => {
                    self.trailing = Some(InvalidCode::InvalidJson);
                    return Ok(Status::Invalid(InvalidCode::InvalidJson));
                }
            }
        }
    }

    /// Why the input was rejected as malformed JSON, if it was.
    #[must_use]
    pub fn lexer_error(&self) -> Option<&LexerError> {
        self.lexer.last_error()
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        self.vm.tracer()
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        self.vm.tracker()
    }

    /// Consumes the validator, returning its tracer.
    #[must_use]
    pub fn into_tracer(self) -> Tr {
        self.vm.into_tracer()
    }
}

//! Resumable bytecode interpreter.
//!
//! The VM keeps an explicit activation stack, so suspending for input is just
//! returning [`Status::NeedMore`] with every instruction pointer left in place.
//! `TOKEN`, `CONSUME` and `UNIQUE` are the only instructions that can suspend;
//! each of them is re-executed from scratch on resume, which is safe because
//! none of them changes state before it has all the tokens it needs (`CONSUME`
//! keeps its nesting depth across suspensions).

mod call;
mod compare;
mod tokens;

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

use tokens::{Fetch, Scan};
use super::VmProgram;
use crate::{
    error::VmError,
    invalid::InvalidCode,
    lexer::Lexer,
    matcher::CompiledMatcher,
    op::{Arg, Op, Opcode},
    resource::{NoLimitTracker, ResourceTracker},
    token::{Token, TokenKind},
    tracer::{NoopTracer, VmTracer},
};

/// Result of running the VM over the input available so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The program is waiting for more input.
    NeedMore,
    Valid,
    Invalid(InvalidCode),
}

/// Final outcome of validating one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(InvalidCode),
}

impl Verdict {
    #[must_use]
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }

    /// The failure code, if the document was rejected.
    #[must_use]
    pub fn code(self) -> Option<InvalidCode> {
        match self {
            Self::Valid => None,
            Self::Invalid(code) => Some(code),
        }
    }
}

impl From<Verdict> for Status {
    fn from(v: Verdict) -> Self {
        match v {
            Verdict::Valid => Self::Valid,
            Verdict::Invalid(code) => Self::Invalid(code),
        }
    }
}

/// A decoded, checked program ready for execution.
///
/// Decoding and regex compilation happen once here; every [`Vm`] borrows the
/// result.
#[derive(Debug, Clone)]
pub struct Executable {
    program: VmProgram,
    ops: Vec<Op>,
    matchers: Vec<CompiledMatcher>,
}

impl Executable {
    /// Decodes `program` and checks every table reference and branch target.
    pub fn new(program: VmProgram) -> Result<Self, VmError> {
        let ops = program.decode()?;
        if ops.last().map(|op| op.code) != Some(Opcode::End) {
            return Err(VmError::malformed(ops.len(), "missing END sentinel"));
        }
        if program.procs.is_empty() {
            return Err(VmError::malformed(0, "empty procedure table"));
        }
        for (i, proc) in program.procs.iter().enumerate() {
            if proc.entry as usize >= ops.len() - 1 {
                return Err(VmError::malformed(0, format!("proc{i} entry @{} out of range", proc.entry)));
            }
        }
        for (i, list) in program.splits.iter().enumerate() {
            if list.iter().any(|&p| p as usize >= program.procs.len()) {
                return Err(VmError::malformed(0, format!("split list {i} names a missing procedure")));
            }
        }
        for (pc, op) in ops.iter().enumerate() {
            for arg in [op.a, op.b] {
                let ok = match arg {
                    Arg::Addr(a) => (a as usize) < ops.len(),
                    Arg::Proc(p) => (p as usize) < program.procs.len(),
                    Arg::Split(s) => (s as usize) < program.splits.len(),
                    Arg::Dfa(d) => (d as usize) < program.dfas.len(),
                    Arg::Float(f) => (f as usize) < program.floats.len(),
                    Arg::Label(_) => false,
                    Arg::None | Arg::Slot(_) | Arg::Int(_) | Arg::Reg(_) => true,
                };
                if !ok {
                    return Err(VmError::malformed(pc, format!("bad operand {arg}")));
                }
            }
        }
        let matchers = program
            .dfas
            .iter()
            .enumerate()
            .map(|(index, m)| {
                m.compile().map_err(|err| VmError::BadMatcher {
                    index,
                    message: err.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { program, ops, matchers })
    }

    #[must_use]
    pub fn program(&self) -> &VmProgram {
        &self.program
    }

    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }
}

/// One procedure activation.
#[derive(Debug)]
struct Activation {
    proc: u32,
    pc: usize,
    slots: SmallVec<[i64; 8]>,
    /// Canonical forms seen by each unique set, keyed by slot.
    uniqs: AHashMap<u32, AHashSet<String>>,
}

/// A split in progress: its branches run one after another from the same cursor.
#[derive(Debug)]
struct SplitState {
    split: u32,
    /// Branch currently running.
    branch: usize,
    /// `SPLITV` collects a pass bitmask instead of a pass count.
    mask: bool,
    dst: u32,
    /// Activation depth of the instruction that started the split.
    depth: usize,
    cursor: usize,
    saved: Token,
    saved_m: i64,
    result: i64,
}

/// The interpreter.
///
/// Generic over the resource tracker and the tracer; with the defaults every
/// limit check and trace hook compiles to nothing except the call depth guard.
#[derive(Debug)]
pub struct Vm<'p, T: ResourceTracker = NoLimitTracker, Tr: VmTracer = NoopTracer> {
    exe: &'p Executable,
    tracker: T,
    tracer: Tr,
    frames: Vec<Activation>,
    splits: Vec<SplitState>,
    /// Tokens read from the lexer that may still be needed.
    buffer: VecDeque<Token>,
    /// Index in `buffer` of the next token `TOKEN` returns.
    cursor: usize,
    current: Token,
    m: i64,
    flag: bool,
    /// Open containers still to skip by a suspended `CONSUME`.
    consume_depth: usize,
    started: bool,
    done: Option<Verdict>,
}

/// What the dispatch loop does after one instruction.
enum Step {
    Next,
    Jump(usize),
    /// Re-execute the same instruction once more input arrives.
    Suspend,
    /// The current instruction already updated the activation stack.
    Stay,
    Finish(Verdict),
}

impl<'p, T: ResourceTracker, Tr: VmTracer> Vm<'p, T, Tr> {
    #[must_use]
    pub fn new(exe: &'p Executable, tracker: T, tracer: Tr) -> Self {
        Self {
            exe,
            tracker,
            tracer,
            frames: Vec::new(),
            splits: Vec::new(),
            buffer: VecDeque::new(),
            cursor: 0,
            current: Token::default(),
            m: 0,
            flag: false,
            consume_depth: 0,
            started: false,
            done: None,
        }
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    #[must_use]
    pub fn into_tracer(self) -> Tr {
        self.tracer
    }

    #[must_use]
    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    /// The verdict, once the entry procedure has returned.
    #[must_use]
    pub fn verdict(&self) -> Option<Verdict> {
        self.done
    }

    /// Runs until the program finishes or needs input `lexer` does not have yet.
    pub fn run(&mut self, lexer: &mut Lexer) -> Result<Status, VmError> {
        if let Some(done) = self.done {
            return Ok(done.into());
        }
        if !self.started {
            self.started = true;
            self.push_activation(0, 0)?;
        }
        let exe = self.exe;
        loop {
            let pc = self.frame()?.pc;
            let op = *exe.ops.get(pc).ok_or_else(|| VmError::malformed(pc, "pc past the end of the stream"))?;
            self.tracker.on_instruction()?;
            self.tracer.on_instruction(pc, op.code, self.frames.len());

            let step = match op.code {
                Opcode::Nop => Step::Next,
                Opcode::ILt | Opcode::ILe | Opcode::IEq | Opcode::IGe | Opcode::IGt | Opcode::INeq => {
                    self.flag = self.int_compare(pc, op)?;
                    Step::Next
                }
                Opcode::FLt | Opcode::FLe | Opcode::FEq | Opcode::FGe | Opcode::FGt | Opcode::FNeq | Opcode::FInt => {
                    self.flag = self.float_compare(pc, op)?;
                    Step::Next
                }
                Opcode::Br => Step::Jump(target(pc, op.a)?),
                Opcode::Cbt if self.flag => Step::Jump(target(pc, op.a)?),
                Opcode::Cbf if !self.flag => Step::Jump(target(pc, op.a)?),
                Opcode::Cbt | Opcode::Cbf => Step::Next,
                Opcode::Call => {
                    let Arg::Proc(proc) = op.a else {
                        return Err(VmError::malformed(pc, "CALL needs a procedure operand"));
                    };
                    self.frame_mut()?.pc += 1;
                    self.push_activation(proc, pc)?;
                    Step::Stay
                }
                Opcode::Return => {
                    let code = self.int_operand(pc, op.a)?;
                    match self.ret(pc, code)? {
                        Some(verdict) => Step::Finish(verdict),
                        None => Step::Stay,
                    }
                }
                Opcode::Split | Opcode::SplitV => {
                    self.start_split(pc, op)?;
                    Step::Stay
                }
                Opcode::Token => fetched(self.read_token(lexer)?),
                Opcode::Consume => fetched(self.consume(lexer)?),
                Opcode::Untoken => {
                    self.cursor = self
                        .cursor
                        .checked_sub(1)
                        .ok_or_else(|| VmError::malformed(pc, "UNTOKEN with no token to push back"))?;
                    Step::Next
                }
                Opcode::Unique => {
                    let Arg::Slot(slot) = op.a else {
                        return Err(VmError::malformed(pc, "UNIQUE needs a slot operand"));
                    };
                    match self.scan_value(lexer)? {
                        Scan::Value(canon) => {
                            self.slot(pc, slot)?;
                            let set = self.frame_mut()?.uniqs.entry(slot).or_default();
                            self.flag = set.insert(canon);
                            Step::Next
                        }
                        Scan::NeedMore => Step::Suspend,
                        Scan::BadJson => Step::Finish(Verdict::Invalid(InvalidCode::InvalidJson)),
                    }
                }
                Opcode::Match => {
                    let Arg::Dfa(dfa) = op.a else {
                        return Err(VmError::malformed(pc, "MATCH needs a dfa operand"));
                    };
                    let matcher = &exe.matchers[dfa as usize];
                    self.m = if self.current.kind == TokenKind::String {
                        i64::from(matcher.case_of(&self.current.text))
                    } else {
                        0
                    };
                    Step::Next
                }
                Opcode::Move => {
                    let value = self.int_operand(pc, op.b)?;
                    *self.slot_mut(pc, op.a)? = value;
                    Step::Next
                }
                Opcode::Incr | Opcode::Decr => {
                    let delta = if op.code == Opcode::Incr { 1 } else { -1 };
                    let slot = self.slot_mut(pc, op.a)?;
                    *slot = slot.wrapping_add(delta);
                    Step::Next
                }
                Opcode::BSet | Opcode::BClear => {
                    let bit = bit_index(pc, self.int_operand(pc, op.b)?)?;
                    let slot = self.slot_mut(pc, op.a)?;
                    if op.code == Opcode::BSet {
                        *slot |= 1i64 << bit;
                    } else {
                        *slot &= !(1i64 << bit);
                    }
                    Step::Next
                }
                Opcode::BTest => {
                    let bit = bit_index(pc, self.int_operand(pc, op.b)?)?;
                    self.flag = (self.int_operand(pc, op.a)? >> bit) & 1 == 1;
                    Step::Next
                }
                Opcode::BCnt => {
                    let bits = self.int_operand(pc, op.b)?;
                    *self.slot_mut(pc, op.a)? = i64::from(bits.count_ones());
                    Step::Next
                }
                Opcode::End => return Err(VmError::malformed(pc, "executed END sentinel")),
            };

            match step {
                Step::Next => self.frame_mut()?.pc += 1,
                Step::Jump(to) => self.frame_mut()?.pc = to,
                Step::Stay => {}
                Step::Suspend => {
                    self.tracer.on_suspend(pc);
                    return Ok(Status::NeedMore);
                }
                Step::Finish(verdict) => {
                    self.done = Some(verdict);
                    self.frames.clear();
                    self.splits.clear();
                    return Ok(verdict.into());
                }
            }
        }
    }

    fn frame(&self) -> Result<&Activation, VmError> {
        self.frames
            .last()
            .ok_or_else(|| VmError::malformed(0, "no active procedure"))
    }

    fn frame_mut(&mut self) -> Result<&mut Activation, VmError> {
        self.frames
            .last_mut()
            .ok_or_else(|| VmError::malformed(0, "no active procedure"))
    }
}

fn fetched(fetch: Fetch) -> Step {
    match fetch {
        Fetch::Ready => Step::Next,
        Fetch::NeedMore => Step::Suspend,
        Fetch::BadJson => Step::Finish(Verdict::Invalid(InvalidCode::InvalidJson)),
    }
}

fn target(pc: usize, arg: Arg) -> Result<usize, VmError> {
    match arg {
        Arg::Addr(a) => Ok(a as usize),
        other => Err(VmError::malformed(pc, format!("branch to {other}"))),
    }
}

fn bit_index(pc: usize, bit: i64) -> Result<u32, VmError> {
    u32::try_from(bit)
        .ok()
        .filter(|&b| b < 64)
        .ok_or_else(|| VmError::malformed(pc, format!("bit index {bit} out of range")))
}

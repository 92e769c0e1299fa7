//! Op-level program: one procedure per frame, concrete slots, symbolic labels.
//!
//! Ops are the same instruction set the VM executes; the only difference with
//! encoded bytecode is that branch targets are still per-procedure block
//! labels ([`Arg::Label`]) instead of absolute addresses ([`Arg::Addr`]).

mod assemble;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use assemble::assemble;

use crate::matcher::Matcher;

/// VM instruction.
///
/// Compare ops set the condition flag from their two operands; `CBT`/`CBF`
/// branch on it. The discriminant is the opcode byte in encoded bytecode.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::IntoStaticStr,
    strum::FromRepr,
    strum::EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,

    ILt,
    ILe,
    IEq,
    IGe,
    IGt,
    INeq,

    FLt,
    FLe,
    FEq,
    FGe,
    FGt,
    FNeq,
    /// flag ← `a / b` is integral.
    FInt,

    Br,
    /// Branch when the flag is set.
    Cbt,
    /// Branch when the flag is clear.
    Cbf,

    Call,
    Return,
    /// `b` ← number of procedures in split list `a` that accept the upcoming value.
    Split,
    /// `b` ← bitmask of the procedures in split list `a` that accept the upcoming value.
    SplitV,

    Token,
    Consume,
    Untoken,

    /// `M` ← case of the current string token in DFA `a`.
    Match,
    Move,
    Incr,
    Decr,
    BSet,
    BClear,
    /// flag ← bit `b` of slot `a`.
    BTest,
    /// `a` ← number of set bits in `b`.
    BCnt,
    /// flag ← upcoming value not yet seen in unique set `a`.
    Unique,

    /// End-of-stream sentinel; executing it is an error.
    End,
}

impl Opcode {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// VM registers readable as operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr, strum::FromRepr, Serialize, Deserialize)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
pub enum Reg {
    /// Current token kind.
    Tt = 0,
    /// Current token number.
    Tnum,
    /// Current token length.
    Tlen,
    /// Current token completeness.
    Tcompl,
    /// Last match case.
    M,
}

/// Operand kind tag, as stored in encoded bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::FromRepr)]
#[repr(u8)]
pub enum ArgKind {
    None = 0,
    Slot,
    Int,
    Float,
    Dfa,
    Split,
    Proc,
    Label,
    Addr,
    Reg,
}

/// Instruction operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Arg {
    #[default]
    None,
    Slot(u32),
    Int(i64),
    /// Index into the float table.
    Float(u32),
    Dfa(u32),
    Split(u32),
    Proc(u32),
    /// Block label within the current procedure (op programs only).
    Label(u32),
    /// Absolute instruction index (encoded programs only).
    Addr(u32),
    Reg(Reg),
}

impl Arg {
    #[must_use]
    pub fn kind(self) -> ArgKind {
        match self {
            Self::None => ArgKind::None,
            Self::Slot(_) => ArgKind::Slot,
            Self::Int(_) => ArgKind::Int,
            Self::Float(_) => ArgKind::Float,
            Self::Dfa(_) => ArgKind::Dfa,
            Self::Split(_) => ArgKind::Split,
            Self::Proc(_) => ArgKind::Proc,
            Self::Label(_) => ArgKind::Label,
            Self::Addr(_) => ArgKind::Addr,
            Self::Reg(_) => ArgKind::Reg,
        }
    }

    /// The operand payload as stored in encoded bytecode.
    #[must_use]
    pub fn payload(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Int(v) => v,
            Self::Slot(v) | Self::Float(v) | Self::Dfa(v) | Self::Split(v) | Self::Proc(v) | Self::Label(v) | Self::Addr(v) => {
                i64::from(v)
            }
            Self::Reg(r) => i64::from(r as u8),
        }
    }

    /// Rebuilds an operand from its kind tag and payload.
    #[must_use]
    pub fn from_parts(kind: ArgKind, payload: i64) -> Option<Self> {
        let index = || u32::try_from(payload).ok();
        Some(match kind {
            ArgKind::None => Self::None,
            ArgKind::Int => Self::Int(payload),
            ArgKind::Slot => Self::Slot(index()?),
            ArgKind::Float => Self::Float(index()?),
            ArgKind::Dfa => Self::Dfa(index()?),
            ArgKind::Split => Self::Split(index()?),
            ArgKind::Proc => Self::Proc(index()?),
            ArgKind::Label => Self::Label(index()?),
            ArgKind::Addr => Self::Addr(index()?),
            ArgKind::Reg => Self::Reg(Reg::from_repr(u8::try_from(payload).ok()?)?),
        })
    }
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Slot(v) => write!(f, "slot({v})"),
            Self::Int(v) => write!(f, "${v}"),
            Self::Float(v) => write!(f, "float({v})"),
            Self::Dfa(v) => write!(f, "dfa({v})"),
            Self::Split(v) => write!(f, "split({v})"),
            Self::Proc(v) => write!(f, "proc({v})"),
            Self::Label(v) => write!(f, "b{v}"),
            Self::Addr(v) => write!(f, "@{v}"),
            Self::Reg(r) => write!(f, "%{}", <&str>::from(*r)),
        }
    }
}

/// One instruction with up to two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Op {
    pub code: Opcode,
    pub a: Arg,
    pub b: Arg,
}

impl Op {
    #[must_use]
    pub fn new(code: Opcode) -> Self {
        Self {
            code,
            a: Arg::None,
            b: Arg::None,
        }
    }

    #[must_use]
    pub fn a(code: Opcode, a: Arg) -> Self {
        Self { code, a, b: Arg::None }
    }

    #[must_use]
    pub fn ab(code: Opcode, a: Arg, b: Arg) -> Self {
        Self { code, a, b }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code.name())?;
        match (self.a, self.b) {
            (Arg::None, Arg::None) => Ok(()),
            (a, Arg::None) => write!(f, " {a}"),
            (a, b) => write!(f, " {a}, {b}"),
        }
    }
}

/// One assembled frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpProc {
    pub nslots: u32,
    pub ops: Vec<Op>,
    /// `labels[b]` is the index in `ops` where block `b` starts.
    pub labels: Vec<usize>,
}

/// Assembled program: procedures plus the shared tables they index.
#[derive(Debug, Clone, PartialEq)]
pub struct OpProgram {
    pub procs: Vec<OpProc>,
    pub floats: Vec<f64>,
    pub dfas: Vec<Matcher>,
    /// Procedure indices of every split list.
    pub splits: Vec<Vec<u32>>,
}

impl fmt::Display for OpProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.floats.is_empty() {
            writeln!(f, ".FLOATS")?;
            for (i, v) in self.floats.iter().enumerate() {
                writeln!(f, "  {i}: {v}")?;
            }
        }
        if !self.dfas.is_empty() {
            writeln!(f, ".DFA")?;
            for (i, m) in self.dfas.iter().enumerate() {
                writeln!(f, "  {i}: {} patterns, {} cases", m.patterns().len(), m.cases().len())?;
            }
        }
        if !self.splits.is_empty() {
            writeln!(f, ".SPLITS")?;
            for (i, procs) in self.splits.iter().enumerate() {
                let ids: Vec<String> = procs.iter().map(ToString::to_string).collect();
                writeln!(f, "  {i}: [{}]", ids.join(", "))?;
            }
        }
        for (pi, proc) in self.procs.iter().enumerate() {
            writeln!(f, ".PROC {pi} slots={}", proc.nslots)?;
            for (i, op) in proc.ops.iter().enumerate() {
                for (b, _) in proc.labels.iter().enumerate().filter(|&(_, &start)| start == i) {
                    writeln!(f, "  b{b}:")?;
                }
                writeln!(f, "    {op}")?;
            }
        }
        Ok(())
    }
}

//! Encoded VM programs.
//!
//! The instruction stream is a flat byte vector of fixed-width instructions:
//! one opcode byte followed by two operands, each a kind byte and a
//! little-endian `i64` payload. Branch operands are absolute instruction
//! indices. The stream ends with an `END` sentinel.
//!
//! # Module Structure
//!
//! - `encode` - two-pass encoder from [`OpProgram`](crate::op::OpProgram)
//! - `vm` - the resumable interpreter

mod encode;
pub(crate) mod vm;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use encode::encode;
pub use vm::{Executable, Status, Verdict, Vm};

use crate::{
    error::VmError,
    matcher::Matcher,
    op::{Arg, ArgKind, Op, Opcode},
};

/// Bytes per operand: kind tag plus `i64` payload.
const OPERAND_LEN: usize = 9;

/// Bytes per encoded instruction.
pub const INSTR_LEN: usize = 1 + 2 * OPERAND_LEN;

/// Procedure table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcEntry {
    pub nslots: u32,
    /// Index of the procedure's first instruction.
    pub entry: u32,
}

/// A complete encoded program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmProgram {
    pub procs: Vec<ProcEntry>,
    pub floats: Vec<f64>,
    pub dfas: Vec<Matcher>,
    pub splits: Vec<Vec<u32>>,
    pub code: Vec<u8>,
}

impl VmProgram {
    /// Number of encoded instructions, including the sentinel.
    #[must_use]
    pub fn len(&self) -> usize {
        self.code.len() / INSTR_LEN
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Decodes instruction `pc`.
    pub fn instr(&self, pc: usize) -> Result<Op, VmError> {
        let bytes = self
            .code
            .get(pc * INSTR_LEN..(pc + 1) * INSTR_LEN)
            .ok_or_else(|| VmError::malformed(pc, "instruction index past the end of the stream"))?;
        let code = Opcode::from_repr(bytes[0]).ok_or_else(|| VmError::malformed(pc, format!("bad opcode {}", bytes[0])))?;
        Ok(Op {
            code,
            a: decode_operand(pc, &bytes[1..=OPERAND_LEN])?,
            b: decode_operand(pc, &bytes[1 + OPERAND_LEN..])?,
        })
    }

    /// Decodes the whole stream.
    pub fn decode(&self) -> Result<Vec<Op>, VmError> {
        if self.code.len() % INSTR_LEN != 0 {
            return Err(VmError::malformed(self.len(), "truncated instruction"));
        }
        (0..self.len()).map(|pc| self.instr(pc)).collect()
    }

    /// Serializes the program to postcard bytes.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn dump(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Deserializes a program produced by [`dump`](Self::dump).
    ///
    /// # Errors
    /// Returns an error if deserialization fails.
    pub fn load(bytes: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}

pub(crate) fn encode_operand(out: &mut Vec<u8>, arg: Arg) {
    out.push(arg.kind() as u8);
    out.extend_from_slice(&arg.payload().to_le_bytes());
}

fn decode_operand(pc: usize, bytes: &[u8]) -> Result<Arg, VmError> {
    let kind = ArgKind::from_repr(bytes[0]).ok_or_else(|| VmError::malformed(pc, format!("bad operand kind {}", bytes[0])))?;
    let mut payload = [0u8; 8];
    payload.copy_from_slice(&bytes[1..OPERAND_LEN]);
    let payload = i64::from_le_bytes(payload);
    Arg::from_parts(kind, payload).ok_or_else(|| VmError::malformed(pc, format!("operand payload {payload} out of range")))
}

/// Disassembly listing: tables, then one instruction per line with procedure
/// entry points marked.
impl fmt::Display for VmProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, ".PROCS {}", self.procs.len())?;
        for (i, p) in self.procs.iter().enumerate() {
            writeln!(f, "  {i}: slots={} entry=@{}", p.nslots, p.entry)?;
        }
        if !self.floats.is_empty() {
            writeln!(f, ".FLOATS")?;
            for (i, v) in self.floats.iter().enumerate() {
                writeln!(f, "  {i}: {v}")?;
            }
        }
        if !self.dfas.is_empty() {
            writeln!(f, ".DFA {}", self.dfas.len())?;
        }
        if !self.splits.is_empty() {
            writeln!(f, ".SPLITS")?;
            for (i, procs) in self.splits.iter().enumerate() {
                let ids: Vec<String> = procs.iter().map(ToString::to_string).collect();
                writeln!(f, "  {i}: [{}]", ids.join(", "))?;
            }
        }
        writeln!(f, ".CODE")?;
        for pc in 0..self.len() {
            if let Some(pi) = self.procs.iter().position(|p| p.entry as usize == pc) {
                writeln!(f, "proc{pi}:")?;
            }
            match self.instr(pc) {
                Ok(op) => writeln!(f, "  {pc:>5}  {op}")?,
                Err(err) => writeln!(f, "  {pc:>5}  <{err}>")?,
            }
        }
        Ok(())
    }
}

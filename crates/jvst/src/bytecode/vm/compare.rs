//! Operand access and compare instructions.

use super::Vm;
use crate::{
    error::VmError,
    op::{Arg, Op, Opcode, Reg},
    resource::ResourceTracker,
    tracer::VmTracer,
};

impl<T: ResourceTracker, Tr: VmTracer> Vm<'_, T, Tr> {
    pub(super) fn slot(&self, pc: usize, index: u32) -> Result<i64, VmError> {
        let frame = self.frame()?;
        frame
            .slots
            .get(index as usize)
            .copied()
            .ok_or_else(|| VmError::malformed(pc, format!("slot {index} out of range in proc{}", frame.proc)))
    }

    pub(super) fn slot_mut(&mut self, pc: usize, arg: Arg) -> Result<&mut i64, VmError> {
        let Arg::Slot(index) = arg else {
            return Err(VmError::malformed(pc, format!("{arg} is not a slot")));
        };
        let frame = self.frame_mut()?;
        let proc = frame.proc;
        frame
            .slots
            .get_mut(index as usize)
            .ok_or_else(|| VmError::malformed(pc, format!("slot {index} out of range in proc{proc}")))
    }

    fn reg(&self, reg: Reg) -> i64 {
        match reg {
            Reg::Tt => self.current.kind.code(),
            Reg::Tnum => self.current.number as i64,
            Reg::Tlen => i64::try_from(self.current.len).unwrap_or(i64::MAX),
            // the lexer only hands out complete tokens
            Reg::Tcompl => 1,
            Reg::M => self.m,
        }
    }

    pub(super) fn int_operand(&self, pc: usize, arg: Arg) -> Result<i64, VmError> {
        match arg {
            Arg::Int(v) => Ok(v),
            Arg::Slot(s) => self.slot(pc, s),
            Arg::Reg(r) => Ok(self.reg(r)),
            other => Err(VmError::malformed(pc, format!("{other} is not an integer operand"))),
        }
    }

    fn float_operand(&self, pc: usize, arg: Arg) -> Result<f64, VmError> {
        match arg {
            Arg::Float(i) => self
                .exe
                .program
                .floats
                .get(i as usize)
                .copied()
                .ok_or_else(|| VmError::malformed(pc, format!("missing float {i}"))),
            Arg::Reg(Reg::Tnum) => Ok(self.current.number),
            other => self.int_operand(pc, other).map(|v| v as f64),
        }
    }

    pub(super) fn int_compare(&self, pc: usize, op: Op) -> Result<bool, VmError> {
        let a = self.int_operand(pc, op.a)?;
        let b = self.int_operand(pc, op.b)?;
        Ok(match op.code {
            Opcode::ILt => a < b,
            Opcode::ILe => a <= b,
            Opcode::IEq => a == b,
            Opcode::IGe => a >= b,
            Opcode::IGt => a > b,
            Opcode::INeq => a != b,
            other => return Err(VmError::malformed(pc, format!("{} is not an integer compare", other.name()))),
        })
    }

    pub(super) fn float_compare(&self, pc: usize, op: Op) -> Result<bool, VmError> {
        let a = self.float_operand(pc, op.a)?;
        let b = self.float_operand(pc, op.b)?;
        Ok(match op.code {
            Opcode::FLt => a < b,
            Opcode::FLe => a <= b,
            Opcode::FEq => a == b,
            Opcode::FGe => a >= b,
            Opcode::FGt => a > b,
            Opcode::FNeq => a != b,
            Opcode::FInt => is_integral(a / b),
            other => return Err(VmError::malformed(pc, format!("{} is not a float compare", other.name()))),
        })
    }
}

fn is_integral(q: f64) -> bool {
    q.is_finite() && q.fract() == 0.0
}

#[cfg(test)]
mod tests {
    use super::is_integral;

    #[test]
    fn integral_quotients() {
        assert!(is_integral(4.0 / 2.0));
        assert!(is_integral(-3.0 / 1.0));
        assert!(!is_integral(1.5 / 1.0));
        assert!(!is_integral(1.0 / 0.0));
        assert!(!is_integral(f64::NAN));
    }
}

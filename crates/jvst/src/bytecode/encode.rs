//! Op program → encoded bytecode.
//!
//! Procedures are laid out back to back in table order. The first pass records
//! each procedure's entry offset; the second emits instructions with every
//! block label rewritten to an absolute instruction index.

use super::{INSTR_LEN, ProcEntry, VmProgram, encode_operand};
use crate::{
    error::{CompileError, Stage},
    op::{Arg, Op, OpProgram, Opcode},
};

/// Encodes `program`. The output depends only on the input.
pub fn encode(program: &OpProgram) -> Result<VmProgram, CompileError> {
    let mut procs = Vec::with_capacity(program.procs.len());
    let mut offset = 0usize;
    for proc in &program.procs {
        procs.push(ProcEntry {
            nslots: proc.nslots,
            entry: index_u32(offset)?,
        });
        offset += proc.ops.len();
    }

    let mut code = Vec::with_capacity((offset + 1) * INSTR_LEN);
    for (pi, proc) in program.procs.iter().enumerate() {
        let base = procs[pi].entry as usize;
        for op in &proc.ops {
            let resolve = |arg: Arg| -> Result<Arg, CompileError> {
                match arg {
                    Arg::Label(b) => {
                        let local = proc.labels.get(b as usize).copied().filter(|&l| l < proc.ops.len());
                        let local = local.ok_or_else(|| error(pi, format!("unresolved label b{b}")))?;
                        Ok(Arg::Addr(index_u32(base + local)?))
                    }
                    Arg::Addr(_) => Err(error(pi, "absolute address in op program")),
                    Arg::Proc(p) if p as usize >= program.procs.len() => Err(error(pi, format!("call to missing proc {p}"))),
                    Arg::Split(s) if s as usize >= program.splits.len() => Err(error(pi, format!("missing split list {s}"))),
                    Arg::Dfa(d) if d as usize >= program.dfas.len() => Err(error(pi, format!("missing dfa {d}"))),
                    Arg::Float(x) if x as usize >= program.floats.len() => Err(error(pi, format!("missing float {x}"))),
                    other => Ok(other),
                }
            };
            emit(&mut code, Op::ab(op.code, resolve(op.a)?, resolve(op.b)?));
        }
    }
    emit(&mut code, Op::new(Opcode::End));

    Ok(VmProgram {
        procs,
        floats: program.floats.clone(),
        dfas: program.dfas.clone(),
        splits: program.splits.clone(),
        code,
    })
}

fn emit(code: &mut Vec<u8>, op: Op) {
    code.push(op.code as u8);
    encode_operand(code, op.a);
    encode_operand(code, op.b);
}

fn error(proc: usize, message: impl Into<String>) -> CompileError {
    CompileError::internal(Stage::Encode, format!("proc{proc}: {}", message.into()))
}

fn index_u32(v: usize) -> Result<u32, CompileError> {
    u32::try_from(v).map_err(|_| CompileError::internal(Stage::Encode, "instruction stream exceeds u32 addressing"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{OpProc, Reg};

    fn program(procs: Vec<OpProc>) -> OpProgram {
        OpProgram {
            procs,
            floats: Vec::new(),
            dfas: Vec::new(),
            splits: Vec::new(),
        }
    }

    #[test]
    fn encodes_fixed_width_instructions() {
        let p = program(vec![OpProc {
            nslots: 0,
            ops: vec![Op::new(Opcode::Token), Op::a(Opcode::Return, Arg::Int(0))],
            labels: vec![0],
        }]);
        let vm = encode(&p).unwrap();
        assert_eq!(vm.code.len(), 3 * INSTR_LEN);
        assert_eq!(vm.code[0], Opcode::Token as u8);
        assert_eq!(vm.code[INSTR_LEN], Opcode::Return as u8);
        assert_eq!(vm.instr(2).unwrap(), Op::new(Opcode::End));
    }

    #[test]
    fn labels_become_absolute_addresses() {
        let first = OpProc {
            nslots: 0,
            ops: vec![Op::a(Opcode::Call, Arg::Proc(1)), Op::a(Opcode::Return, Arg::Int(0))],
            labels: vec![0],
        };
        let second = OpProc {
            nslots: 1,
            ops: vec![
                Op::ab(Opcode::IEq, Arg::Reg(Reg::Tt), Arg::Int(1)),
                Op::a(Opcode::Cbt, Arg::Label(1)),
                Op::a(Opcode::Return, Arg::Int(1)),
                Op::a(Opcode::Return, Arg::Int(0)),
            ],
            labels: vec![0, 3],
        };
        let vm = encode(&program(vec![first, second])).unwrap();
        assert_eq!(vm.procs[1], ProcEntry { nslots: 1, entry: 2 });
        assert_eq!(vm.instr(3).unwrap(), Op::a(Opcode::Cbt, Arg::Addr(5)));
    }

    #[test]
    fn encoding_is_deterministic() {
        let p = program(vec![OpProc {
            nslots: 2,
            ops: vec![Op::ab(Opcode::Move, Arg::Slot(1), Arg::Int(-7)), Op::a(Opcode::Return, Arg::Int(0))],
            labels: vec![0],
        }]);
        assert_eq!(encode(&p).unwrap(), encode(&p).unwrap());
        assert_eq!(encode(&p).unwrap().instr(0).unwrap().b, Arg::Int(-7));
    }

    #[test]
    fn dangling_label_is_an_internal_error() {
        let p = program(vec![OpProc {
            nslots: 0,
            ops: vec![Op::a(Opcode::Br, Arg::Label(4))],
            labels: vec![0],
        }]);
        let err = encode(&p).unwrap_err();
        assert!(matches!(err, CompileError::Internal { stage: Stage::Encode, .. }));
    }

    #[test]
    fn dump_and_load_round_trip() {
        let p = program(vec![OpProc {
            nslots: 0,
            ops: vec![Op::a(Opcode::Return, Arg::Int(0))],
            labels: vec![0],
        }]);
        let vm = encode(&p).unwrap();
        let loaded = VmProgram::load(&vm.dump().unwrap()).unwrap();
        assert_eq!(loaded, vm);
    }
}

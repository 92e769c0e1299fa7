//! Flat IR → op program.

use indexmap::IndexSet;

use super::{Arg, Op, OpProc, OpProgram, Opcode, Reg};
use crate::{
    error::{CompileError, Stage},
    invalid::InvalidCode,
    ir::{BitvecId, BlockId, CmpOp, CounterId, Decls, Expr, Flat, FlatProgram, Frame, FrameLiveness, Liveness, Stmt, TempId, UniqId},
};

/// Assembles every frame of `program` into a procedure with the same index.
///
/// With `liveness`, temporaries whose live ranges never overlap share a slot;
/// without it every temporary gets its own slot.
pub fn assemble(program: &FlatProgram, liveness: Option<&Liveness>) -> Result<OpProgram, CompileError> {
    if let Some(live) = liveness
        && live.frames.len() != program.frames.len()
    {
        return Err(CompileError::internal(
            Stage::Assemble,
            format!(
                "liveness covers {} frames, program has {}",
                live.frames.len(),
                program.frames.len()
            ),
        ));
    }
    let mut tables = Tables::default();
    let mut procs = Vec::with_capacity(program.frames.len());
    for (fi, frame) in program.frames.iter().enumerate() {
        let live = liveness.map(|l| &l.frames[fi]);
        procs.push(assemble_frame(&mut tables, program.frames.len(), fi, frame, live)?);
    }
    Ok(OpProgram {
        procs,
        floats: tables.floats.into_iter().map(f64::from_bits).collect(),
        dfas: tables.dfas,
        splits: tables.splits,
    })
}

/// Program-level tables shared by all procedures.
#[derive(Default)]
struct Tables {
    /// Float literals by bit pattern, in first-use order.
    floats: IndexSet<u64>,
    dfas: Vec<crate::matcher::Matcher>,
    splits: Vec<Vec<u32>>,
}

impl Tables {
    fn float(&mut self, v: f64) -> Arg {
        let (index, _) = self.floats.insert_full(v.to_bits());
        Arg::Float(to_u32(index))
    }
}

fn to_u32(v: usize) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}

fn internal(fi: usize, message: impl std::fmt::Display) -> CompileError {
    CompileError::internal(Stage::Assemble, format!("frame{fi}: {message}"))
}

/// Slot layout of one procedure: counters, bitvectors, unique sets, temporaries.
struct Layout<'a> {
    decls: &'a Decls,
    colors: Vec<u32>,
    nslots: u32,
}

impl Layout<'_> {
    fn bitvec_base(&self) -> usize {
        self.decls.counters.len()
    }

    fn uniq_base(&self) -> usize {
        self.bitvec_base() + self.decls.bitvecs.len()
    }

    fn temp_base(&self) -> usize {
        self.uniq_base() + self.decls.uniqs as usize
    }
}

struct ProcAsm<'a> {
    fi: usize,
    nprocs: usize,
    tables: &'a mut Tables,
    layout: Layout<'a>,
    dfa_base: usize,
    split_base: usize,
    ops: Vec<Op>,
}

fn assemble_frame(
    tables: &mut Tables,
    nprocs: usize,
    fi: usize,
    frame: &Frame<Flat>,
    live: Option<&FrameLiveness>,
) -> Result<OpProc, CompileError> {
    let decls = &frame.decls;
    let colors = match live {
        Some(live) => live.color_temps(decls.temps),
        None => (0..decls.temps).collect(),
    };
    let ntemp_slots = colors.iter().max().map_or(0, |&c| c as usize + 1);
    let nslots = decls.counters.len() + decls.bitvecs.len() + decls.uniqs as usize + ntemp_slots;

    let dfa_base = tables.dfas.len();
    tables.dfas.extend(decls.matchers.iter().cloned());
    let split_base = tables.splits.len();
    for split in &decls.splits {
        if let Some(id) = split.iter().find(|id| id.index() >= nprocs) {
            return Err(internal(fi, format!("split list names missing {id}")));
        }
        tables.splits.push(split.iter().map(|id| id.0).collect());
    }

    let mut asm = ProcAsm {
        fi,
        nprocs,
        tables,
        layout: Layout {
            decls,
            colors,
            nslots: to_u32(nslots),
        },
        dfa_base,
        split_base,
        ops: Vec::new(),
    };

    // Block that follows each block in list order, for fall-through branches.
    let order: Vec<BlockId> = frame
        .body
        .stmts
        .iter()
        .filter_map(|s| match s {
            Stmt::Block(id) => Some(*id),
            _ => None,
        })
        .collect();
    let mut labels = vec![usize::MAX; frame.body.labels.len().max(order.len())];
    let mut next_block = None;
    for stmt in &frame.body.stmts {
        if let Stmt::Block(id) = stmt {
            let slot = labels
                .get_mut(id.index())
                .ok_or_else(|| internal(fi, format!("{id} has no label")))?;
            *slot = asm.ops.len();
            let pos = order.iter().position(|b| b == id).unwrap_or(order.len());
            next_block = order.get(pos + 1).copied();
            continue;
        }
        asm.stmt(stmt, next_block)?;
    }
    if let Some(b) = labels.iter().position(|&l| l == usize::MAX) {
        return Err(internal(fi, format!("label b{b} never placed")));
    }

    Ok(OpProc {
        nslots: asm.layout.nslots,
        ops: asm.ops,
        labels,
    })
}

impl ProcAsm<'_> {
    fn emit(&mut self, op: Op) {
        self.ops.push(op);
    }

    fn counter(&self, c: CounterId) -> Result<Arg, CompileError> {
        if c.index() < self.layout.decls.counters.len() {
            Ok(Arg::Slot(c.0))
        } else {
            Err(internal(self.fi, format!("undeclared {c}")))
        }
    }

    fn bitvec(&self, bv: BitvecId) -> Result<Arg, CompileError> {
        if bv.index() < self.layout.decls.bitvecs.len() {
            Ok(Arg::Slot(to_u32(self.layout.bitvec_base() + bv.index())))
        } else {
            Err(internal(self.fi, format!("undeclared {bv}")))
        }
    }

    fn uniq(&self, u: UniqId) -> Result<Arg, CompileError> {
        if u.0 < self.layout.decls.uniqs {
            Ok(Arg::Slot(to_u32(self.layout.uniq_base() + u.index())))
        } else {
            Err(internal(self.fi, format!("undeclared {u}")))
        }
    }

    fn temp(&self, t: TempId) -> Result<Arg, CompileError> {
        let color = self
            .layout
            .colors
            .get(t.index())
            .ok_or_else(|| internal(self.fi, format!("undeclared {t}")))?;
        Ok(Arg::Slot(to_u32(self.layout.temp_base() + *color as usize)))
    }

    fn bit_mask(&self, bv: BitvecId) -> Result<i64, CompileError> {
        let decl = self
            .layout
            .decls
            .bitvecs
            .get(bv.index())
            .ok_or_else(|| internal(self.fi, format!("undeclared {bv}")))?;
        Ok(if decl.size >= 64 { -1 } else { (1i64 << decl.size) - 1 })
    }

    fn size(&self, v: usize) -> Result<Arg, CompileError> {
        i64::try_from(v)
            .map(Arg::Int)
            .map_err(|_| internal(self.fi, format!("size literal {v} out of range")))
    }

    fn stmt(&mut self, stmt: &Stmt, next: Option<BlockId>) -> Result<(), CompileError> {
        match stmt {
            Stmt::Nop => {}
            Stmt::Valid => self.emit(Op::a(Opcode::Return, Arg::Int(0))),
            Stmt::Invalid(code) => self.emit(Op::a(Opcode::Return, Arg::Int(i64::from(code.as_u8())))),
            Stmt::Token => self.emit(Op::new(Opcode::Token)),
            Stmt::Consume => self.emit(Op::new(Opcode::Consume)),
            Stmt::Untoken => self.emit(Op::new(Opcode::Untoken)),
            Stmt::Incr(c) => {
                let slot = self.counter(*c)?;
                self.emit(Op::a(Opcode::Incr, slot));
            }
            Stmt::Decr(c) => {
                let slot = self.counter(*c)?;
                self.emit(Op::a(Opcode::Decr, slot));
            }
            Stmt::BSet(bv, bit) => {
                let slot = self.bitvec(*bv)?;
                self.emit(Op::ab(Opcode::BSet, slot, Arg::Int(i64::from(*bit))));
            }
            Stmt::BClear(bv, bit) => {
                let slot = self.bitvec(*bv)?;
                self.emit(Op::ab(Opcode::BClear, slot, Arg::Int(i64::from(*bit))));
            }
            Stmt::SplitVec { bitvec, split } => {
                let list = self.split(split.index())?;
                let slot = self.bitvec(*bitvec)?;
                self.emit(Op::ab(Opcode::SplitV, list, slot));
            }
            Stmt::Call(id) => {
                if id.index() >= self.nprocs {
                    return Err(internal(self.fi, format!("call to missing {id}")));
                }
                self.emit(Op::a(Opcode::Call, Arg::Proc(id.0)));
            }
            Stmt::Branch(target) => self.emit(Op::a(Opcode::Br, Arg::Label(target.0))),
            Stmt::Move { dst, src } => self.move_into(*dst, src)?,
            Stmt::CBranch { cond, then, els } => {
                let sense = self.cond(cond)?;
                let (on_set, on_clear) = if sense { (*then, *els) } else { (*els, *then) };
                if Some(on_clear) == next {
                    self.emit(Op::a(Opcode::Cbt, Arg::Label(on_set.0)));
                } else if Some(on_set) == next {
                    self.emit(Op::a(Opcode::Cbf, Arg::Label(on_clear.0)));
                } else {
                    self.emit(Op::a(Opcode::Cbt, Arg::Label(on_set.0)));
                    self.emit(Op::a(Opcode::Br, Arg::Label(on_clear.0)));
                }
            }
            Stmt::MatchBranch { temp, cases, default } => {
                let slot = self.temp(*temp)?;
                let mut sorted = cases.clone();
                sorted.sort_by_key(|&(case, _)| case);
                for (case, block) in sorted {
                    self.emit(Op::ab(Opcode::IEq, slot, Arg::Int(i64::from(case))));
                    self.emit(Op::a(Opcode::Cbt, Arg::Label(block.0)));
                }
                match default {
                    Some(block) => self.emit(Op::a(Opcode::Br, Arg::Label(block.0))),
                    None => self.emit(Op::a(
                        Opcode::Return,
                        Arg::Int(i64::from(InvalidCode::InvalidMatchCase.as_u8())),
                    )),
                }
            }
            Stmt::Block(_) => return Err(internal(self.fi, "nested block marker")),
            Stmt::If { .. }
            | Stmt::Loop { .. }
            | Stmt::Break(_)
            | Stmt::Seq(_)
            | Stmt::Frame(_)
            | Stmt::Counter { .. }
            | Stmt::Matcher { .. }
            | Stmt::Bitvec { .. }
            | Stmt::SplitList { .. }
            | Stmt::UniqSet(_)
            | Stmt::Match { .. } => {
                return Err(internal(
                    self.fi,
                    format!("tree statement in flat input: {}", stmt.to_string().trim_end()),
                ));
            }
        }
        Ok(())
    }

    fn split(&self, local: usize) -> Result<Arg, CompileError> {
        if local < self.layout.decls.splits.len() {
            Ok(Arg::Split(to_u32(self.split_base + local)))
        } else {
            Err(internal(self.fi, format!("undeclared split{local}")))
        }
    }

    fn move_into(&mut self, dst: TempId, src: &Expr) -> Result<(), CompileError> {
        let slot = self.temp(dst)?;
        match src {
            Expr::Split(s) => {
                let list = self.split(s.index())?;
                self.emit(Op::ab(Opcode::Split, list, slot));
            }
            Expr::Match(m) => {
                if m.index() >= self.layout.decls.matchers.len() {
                    return Err(internal(self.fi, format!("undeclared {m}")));
                }
                self.emit(Op::a(Opcode::Match, Arg::Dfa(to_u32(self.dfa_base + m.index()))));
                self.emit(Op::ab(Opcode::Move, slot, Arg::Reg(Reg::M)));
            }
            Expr::BCount(bv) => {
                let src = self.bitvec(*bv)?;
                self.emit(Op::ab(Opcode::BCnt, slot, src));
            }
            other => {
                let src = self.int_arg(other)?;
                self.emit(Op::ab(Opcode::Move, slot, src));
            }
        }
        Ok(())
    }

    /// Integer-valued operand.
    fn int_arg(&self, e: &Expr) -> Result<Arg, CompileError> {
        match e {
            Expr::Size(v) => self.size(*v),
            Expr::Int(v) => Ok(Arg::Int(*v)),
            Expr::Bool(b) => Ok(Arg::Int(i64::from(*b))),
            Expr::Count(c) => self.counter(*c),
            Expr::Temp(t) => self.temp(*t),
            Expr::TokType => Ok(Arg::Reg(Reg::Tt)),
            Expr::TokLen => Ok(Arg::Reg(Reg::Tlen)),
            Expr::TokComplete => Ok(Arg::Reg(Reg::Tcompl)),
            other => Err(internal(self.fi, format!("not an integer operand: {other}"))),
        }
    }

    /// Numeric operand for float compares.
    fn num_arg(&mut self, e: &Expr) -> Result<Arg, CompileError> {
        match e {
            Expr::Num(v) => Ok(self.tables.float(*v)),
            Expr::TokNum => Ok(Arg::Reg(Reg::Tnum)),
            other => self.int_arg(other),
        }
    }

    /// Emits ops that set the flag for `cond`; returns whether the flag equals
    /// the condition (`false` means it holds the negation).
    fn cond(&mut self, cond: &Expr) -> Result<bool, CompileError> {
        match cond {
            Expr::Not(inner) => Ok(!self.cond(inner)?),
            Expr::Cmp(op, a, b) => {
                let float = [a.as_ref(), b.as_ref()]
                    .iter()
                    .any(|e| matches!(e, Expr::Num(_) | Expr::TokNum));
                let (a, b) = if float {
                    (self.num_arg(a)?, self.num_arg(b)?)
                } else {
                    (self.int_arg(a)?, self.int_arg(b)?)
                };
                self.emit(Op::ab(compare_opcode(*op, float), a, b));
                Ok(true)
            }
            Expr::IsTok(kind) => {
                self.emit(Op::ab(Opcode::IEq, Arg::Reg(Reg::Tt), Arg::Int(kind.code())));
                Ok(true)
            }
            Expr::IsInt(e) => {
                let a = self.num_arg(e)?;
                let one = self.tables.float(1.0);
                self.emit(Op::ab(Opcode::FInt, a, one));
                Ok(true)
            }
            Expr::MultipleOf(e, d) => {
                let a = self.num_arg(e)?;
                let d = self.tables.float(*d);
                self.emit(Op::ab(Opcode::FInt, a, d));
                Ok(true)
            }
            Expr::BTest(bv, bit) => {
                let slot = self.bitvec(*bv)?;
                self.emit(Op::ab(Opcode::BTest, slot, Arg::Int(i64::from(*bit))));
                Ok(true)
            }
            Expr::BTestAll(bv) => {
                let slot = self.bitvec(*bv)?;
                let mask = self.bit_mask(*bv)?;
                self.emit(Op::ab(Opcode::IEq, slot, Arg::Int(mask)));
                Ok(true)
            }
            Expr::BTestAny(bv) => {
                let slot = self.bitvec(*bv)?;
                self.emit(Op::ab(Opcode::INeq, slot, Arg::Int(0)));
                Ok(true)
            }
            Expr::Unique(u) => {
                let slot = self.uniq(*u)?;
                self.emit(Op::a(Opcode::Unique, slot));
                Ok(true)
            }
            Expr::Bool(_) | Expr::Temp(_) | Expr::TokComplete => {
                let a = self.int_arg(cond)?;
                self.emit(Op::ab(Opcode::INeq, a, Arg::Int(0)));
                Ok(true)
            }
            other => Err(internal(self.fi, format!("unsupported branch condition {other}"))),
        }
    }
}

fn compare_opcode(op: CmpOp, float: bool) -> Opcode {
    match (op, float) {
        (CmpOp::Lt, false) => Opcode::ILt,
        (CmpOp::Le, false) => Opcode::ILe,
        (CmpOp::Eq, false) => Opcode::IEq,
        (CmpOp::Ge, false) => Opcode::IGe,
        (CmpOp::Gt, false) => Opcode::IGt,
        (CmpOp::Ne, false) => Opcode::INeq,
        (CmpOp::Lt, true) => Opcode::FLt,
        (CmpOp::Le, true) => Opcode::FLe,
        (CmpOp::Eq, true) => Opcode::FEq,
        (CmpOp::Ge, true) => Opcode::FGe,
        (CmpOp::Gt, true) => Opcode::FGt,
        (CmpOp::Ne, true) => Opcode::FNeq,
    }
}

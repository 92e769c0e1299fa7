//! Backward liveness dataflow over flattened frames.
//!
//! Variables are temporaries, counters, bitvectors and the token register.
//! The result drives slot sharing for temporaries in the assembler and the
//! structural checks in the test suite.

use std::collections::{BTreeMap, BTreeSet};

use super::{BitvecId, BlockId, CounterId, Expr, Flat, FlatProgram, Frame, Stmt, TempId};
use crate::error::{CompileError, Stage};

/// A variable tracked by the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Var {
    /// The current-token registers, as one pseudo-register.
    Token,
    Temp(TempId),
    Counter(CounterId),
    Bitvec(BitvecId),
}

/// Dataflow facts for one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockLiveness {
    pub preds: Vec<BlockId>,
    pub succs: Vec<BlockId>,
    /// Variables read before any write in the block.
    pub uses: BTreeSet<Var>,
    /// Variables written in the block.
    pub defs: BTreeSet<Var>,
    pub live_in: BTreeSet<Var>,
    pub live_out: BTreeSet<Var>,
}

/// Liveness of one frame plus the temporary interference graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameLiveness {
    pub blocks: Vec<BlockLiveness>,
    /// `interference[t]` holds the temporaries live at some definition of `t`.
    pub interference: BTreeMap<TempId, BTreeSet<TempId>>,
}

/// Per-frame liveness, indexed like the program's frame table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Liveness {
    pub frames: Vec<FrameLiveness>,
}

impl FrameLiveness {
    /// True when `a` and `b` cannot share a slot.
    #[must_use]
    pub fn interferes(&self, a: TempId, b: TempId) -> bool {
        self.interference.get(&a).is_some_and(|set| set.contains(&b))
    }

    /// Greedy coloring of `temps` temporaries; returns each temp's color.
    ///
    /// Temps are colored in id order with the lowest color no interfering,
    /// already colored temp uses.
    #[must_use]
    pub fn color_temps(&self, temps: u32) -> Vec<u32> {
        let mut colors: Vec<u32> = Vec::with_capacity(temps as usize);
        for t in 0..temps {
            let taken: BTreeSet<u32> = (0..t)
                .filter(|&u| self.interferes(TempId(t), TempId(u)))
                .map(|u| colors[u as usize])
                .collect();
            let color = (0..).find(|c| !taken.contains(c)).unwrap_or(0);
            colors.push(color);
        }
        colors
    }
}

/// Runs liveness over every frame of `program`.
pub fn liveness(program: &FlatProgram) -> Result<Liveness, CompileError> {
    let frames = program
        .frames
        .iter()
        .enumerate()
        .map(|(fi, frame)| frame_liveness(fi, frame))
        .collect::<Result<_, _>>()?;
    Ok(Liveness { frames })
}

/// A block of a flat body: its id and the statements after its marker.
struct FlatBlock<'a> {
    id: BlockId,
    stmts: &'a [Stmt],
}

/// Splits a flat body at its block markers.
fn split_blocks(fi: usize, flat: &Flat) -> Result<Vec<FlatBlock<'_>>, CompileError> {
    let mut starts = Vec::new();
    for (i, stmt) in flat.stmts.iter().enumerate() {
        if let Stmt::Block(id) = stmt {
            if id.index() != starts.len() {
                return Err(CompileError::internal(
                    Stage::Liveness,
                    format!("frame{fi}: {id} out of order"),
                ));
            }
            starts.push((*id, i));
        }
    }
    if starts.first().is_none_or(|&(_, pos)| pos != 0) {
        return Err(CompileError::internal(
            Stage::Liveness,
            format!("frame{fi}: body does not open with a block marker"),
        ));
    }
    Ok(starts
        .iter()
        .enumerate()
        .map(|(k, &(id, pos))| {
            let end = starts.get(k + 1).map_or(flat.stmts.len(), |&(_, next)| next);
            FlatBlock {
                id,
                stmts: &flat.stmts[pos + 1..end],
            }
        })
        .collect())
}

fn frame_liveness(fi: usize, frame: &Frame<Flat>) -> Result<FrameLiveness, CompileError> {
    let blocks = split_blocks(fi, &frame.body)?;
    let mut facts: Vec<BlockLiveness> = vec![BlockLiveness::default(); blocks.len()];

    for (bi, block) in blocks.iter().enumerate() {
        let succs = block.stmts.last().map(Stmt::successors).unwrap_or_default();
        for s in &succs {
            let Some(target) = facts.get_mut(s.index()) else {
                return Err(CompileError::internal(
                    Stage::Liveness,
                    format!("frame{fi}: {} branches to missing {s}", block.id),
                ));
            };
            target.preds.push(block.id);
        }
        let fact = &mut facts[bi];
        fact.succs = succs;
        for stmt in block.stmts {
            let (uses, defs) = stmt_vars(stmt);
            for u in uses {
                if !fact.defs.contains(&u) {
                    fact.uses.insert(u);
                }
            }
            fact.defs.extend(defs);
        }
    }

    // live_in = uses ∪ (live_out − defs), iterated to a fixed point.
    let mut changed = true;
    while changed {
        changed = false;
        for bi in (0..blocks.len()).rev() {
            let live_out: BTreeSet<Var> = facts[bi]
                .succs
                .iter()
                .flat_map(|s| facts[s.index()].live_in.iter().copied())
                .collect();
            let mut live_in = facts[bi].uses.clone();
            live_in.extend(live_out.difference(&facts[bi].defs).copied());
            if live_in != facts[bi].live_in || live_out != facts[bi].live_out {
                facts[bi].live_in = live_in;
                facts[bi].live_out = live_out;
                changed = true;
            }
        }
    }

    let mut interference: BTreeMap<TempId, BTreeSet<TempId>> = BTreeMap::new();
    for (bi, block) in blocks.iter().enumerate() {
        let mut live = facts[bi].live_out.clone();
        for stmt in block.stmts.iter().rev() {
            let (uses, defs) = stmt_vars(stmt);
            for d in &defs {
                let Var::Temp(t) = *d else { continue };
                interference.entry(t).or_default();
                for v in &live {
                    if let Var::Temp(u) = *v
                        && u != t
                    {
                        interference.entry(t).or_default().insert(u);
                        interference.entry(u).or_default().insert(t);
                    }
                }
            }
            for d in defs {
                live.remove(&d);
            }
            live.extend(uses);
        }
    }

    Ok(FrameLiveness {
        blocks: facts,
        interference,
    })
}

/// Variables read and written by one statement.
fn stmt_vars(stmt: &Stmt) -> (Vec<Var>, Vec<Var>) {
    let mut uses = Vec::new();
    let mut defs = Vec::new();
    match stmt {
        Stmt::Token => defs.push(Var::Token),
        Stmt::Consume | Stmt::Untoken => {
            uses.push(Var::Token);
            defs.push(Var::Token);
        }
        Stmt::Incr(c) | Stmt::Decr(c) => {
            uses.push(Var::Counter(*c));
            defs.push(Var::Counter(*c));
        }
        Stmt::BSet(bv, _) | Stmt::BClear(bv, _) => {
            uses.push(Var::Bitvec(*bv));
            defs.push(Var::Bitvec(*bv));
        }
        Stmt::SplitVec { bitvec, .. } => {
            uses.push(Var::Token);
            defs.push(Var::Bitvec(*bitvec));
        }
        Stmt::Move { dst, src } => {
            expr_uses(src, &mut uses);
            defs.push(Var::Temp(*dst));
        }
        Stmt::CBranch { cond, .. } => expr_uses(cond, &mut uses),
        Stmt::MatchBranch { temp, .. } => uses.push(Var::Temp(*temp)),
        Stmt::Call(_) => {
            uses.push(Var::Token);
            defs.push(Var::Token);
        }
        _ => {}
    }
    (uses, defs)
}

fn expr_uses(expr: &Expr, out: &mut Vec<Var>) {
    match expr {
        Expr::TokType
        | Expr::TokNum
        | Expr::TokComplete
        | Expr::TokLen
        | Expr::IsTok(_)
        | Expr::Split(_)
        | Expr::Match(_)
        | Expr::Unique(_) => out.push(Var::Token),
        Expr::Count(c) => out.push(Var::Counter(*c)),
        Expr::BTest(bv, _) | Expr::BTestAll(bv) | Expr::BTestAny(bv) | Expr::BCount(bv) => out.push(Var::Bitvec(*bv)),
        Expr::Temp(t) => out.push(Var::Temp(*t)),
        Expr::IsInt(e) | Expr::MultipleOf(e, _) | Expr::Not(e) => expr_uses(e, out),
        Expr::And(a, b) | Expr::Or(a, b) | Expr::Cmp(_, a, b) => {
            expr_uses(a, out);
            expr_uses(b, out);
        }
        Expr::Seq(_, e) => expr_uses(e, out),
        Expr::Num(_) | Expr::Int(_) | Expr::Size(_) | Expr::Bool(_) => {}
    }
}

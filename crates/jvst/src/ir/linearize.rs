//! Tree IR → control-flow graph.
//!
//! Structured statements become basic blocks joined by explicit branches.
//! Nested frames are hoisted into the program table in first-come order and
//! replaced by `CALL`. Expressions that run lookahead or read a matcher are
//! moved into temporaries so conditions only compare registers.

use std::collections::VecDeque;

use super::{
    BitvecDecl, Block, BlockId, Cfg, CfgProgram, Decls, Expr, Frame, FrameId, LoopId, Program, Stmt, TempId,
    TreeProgram,
};
use crate::error::{CompileError, Stage};

/// Linearizes every frame of `tree`, hoisting nested frames as they appear.
pub fn linearize(tree: &TreeProgram) -> Result<CfgProgram, CompileError> {
    let mut queue: VecDeque<Frame<Stmt>> = tree.frames.iter().cloned().collect();
    let mut next_frame = tree.frames.len();
    let mut frames = Vec::new();
    while let Some(frame) = queue.pop_front() {
        let mut lz = FrameLinearizer {
            queue: &mut queue,
            next_frame: &mut next_frame,
            decls: Decls::default(),
            blocks: Vec::new(),
            current: None,
            loops: Vec::new(),
        };
        let entry = lz.new_block("entry");
        lz.current = Some(entry);
        lz.stmt(frame.body)?;
        if lz.current.is_some() {
            return Err(CompileError::internal(
                Stage::Linearize,
                "frame body falls through without VALID or INVALID",
            ));
        }
        frames.push(Frame {
            decls: lz.decls,
            body: Cfg { blocks: lz.blocks },
        });
    }
    let program = Program { frames };
    check_cfg(&program)?;
    Ok(program)
}

struct LoopScope {
    id: LoopId,
    name: String,
    header: BlockId,
    exit: Option<BlockId>,
}

struct FrameLinearizer<'a> {
    queue: &'a mut VecDeque<Frame<Stmt>>,
    next_frame: &'a mut usize,
    decls: Decls,
    blocks: Vec<Block>,
    /// Block receiving statements; `None` once control flow has terminated.
    current: Option<BlockId>,
    loops: Vec<LoopScope>,
}

impl FrameLinearizer<'_> {
    fn new_block(&mut self, name: &str) -> BlockId {
        let id = BlockId(u32::try_from(self.blocks.len()).unwrap_or(u32::MAX));
        self.blocks.push(Block {
            id,
            name: name.to_owned(),
            stmts: Vec::new(),
        });
        id
    }

    fn emit(&mut self, stmt: Stmt) -> Result<(), CompileError> {
        let Some(current) = self.current else {
            return Err(CompileError::internal(
                Stage::Linearize,
                format!("statement after a terminator: {}", stmt.to_string().trim_end()),
            ));
        };
        let terminates = stmt.is_terminator();
        self.blocks[current.index()].stmts.push(stmt);
        if terminates {
            self.current = None;
        }
        Ok(())
    }

    fn temp(&mut self) -> TempId {
        let id = TempId(self.decls.temps);
        self.decls.temps += 1;
        id
    }

    /// Assigns the next frame id to `frame` and queues it for linearization.
    fn hoist(&mut self, frame: Frame<Stmt>) -> FrameId {
        let id = FrameId(u32::try_from(*self.next_frame).unwrap_or(u32::MAX));
        *self.next_frame += 1;
        self.queue.push_back(frame);
        id
    }

    fn declare<T>(list: &mut Vec<T>, index: usize, item: T, what: &str) -> Result<(), CompileError> {
        if index != list.len() {
            return Err(CompileError::internal(
                Stage::Linearize,
                format!("{what} declared out of order"),
            ));
        }
        list.push(item);
        Ok(())
    }

    /// Starts `body` in `block` and returns the block control reaches afterwards.
    fn branch_body(&mut self, block: BlockId, body: Stmt) -> Result<Option<BlockId>, CompileError> {
        self.current = Some(block);
        self.stmt(body)?;
        Ok(self.current)
    }

    /// Makes a join block for the live ends, or leaves control terminated.
    fn join(&mut self, ends: &[Option<BlockId>], name: &str) -> Result<(), CompileError> {
        let live: Vec<BlockId> = ends.iter().flatten().copied().collect();
        if live.is_empty() {
            self.current = None;
            return Ok(());
        }
        let join = self.new_block(name);
        for end in live {
            self.current = Some(end);
            self.emit(Stmt::Branch(join))?;
        }
        self.current = Some(join);
        Ok(())
    }

    fn stmt(&mut self, stmt: Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Nop => Ok(()),
            Stmt::Seq(stmts) => stmts.into_iter().try_for_each(|s| self.stmt(s)),

            Stmt::Counter { id, name } => Self::declare(&mut self.decls.counters, id.index(), name, "counter"),
            Stmt::Matcher { id, matcher } => Self::declare(&mut self.decls.matchers, id.index(), matcher, "matcher"),
            Stmt::Bitvec { id, name, size } => {
                Self::declare(&mut self.decls.bitvecs, id.index(), BitvecDecl { name, size }, "bitvector")
            }
            Stmt::SplitList { id, frames } => {
                let ids = frames.into_iter().map(|frame| self.hoist(frame)).collect();
                Self::declare(&mut self.decls.splits, id.index(), ids, "split list")
            }
            Stmt::UniqSet(id) => {
                if id.0 != self.decls.uniqs {
                    return Err(CompileError::internal(Stage::Linearize, "unique set declared out of order"));
                }
                self.decls.uniqs += 1;
                Ok(())
            }

            Stmt::Frame(frame) => {
                let id = self.hoist(*frame);
                self.emit(Stmt::Call(id))
            }

            Stmt::If { cond, then, els } => match fold(cond) {
                Expr::Bool(true) => self.stmt(*then),
                Expr::Bool(false) => self.stmt(*els),
                cond if matches!(*els, Stmt::Nop) => {
                    let t = self.new_block("then");
                    let join = self.new_block("join");
                    self.cond(cond, t, join)?;
                    if self.branch_body(t, *then)?.is_some() {
                        self.emit(Stmt::Branch(join))?;
                    }
                    self.current = Some(join);
                    Ok(())
                }
                cond => {
                    let t = self.new_block("then");
                    let e = self.new_block("else");
                    self.cond(cond, t, e)?;
                    let t_end = self.branch_body(t, *then)?;
                    let e_end = self.branch_body(e, *els)?;
                    self.join(&[t_end, e_end], "join")
                }
            },

            Stmt::Loop { id, name, body } => {
                let header = self.new_block(&name);
                self.emit(Stmt::Branch(header))?;
                self.loops.push(LoopScope {
                    id,
                    name,
                    header,
                    exit: None,
                });
                if self.branch_body(header, *body)?.is_some() {
                    self.emit(Stmt::Branch(header))?;
                }
                let scope = self
                    .loops
                    .pop()
                    .ok_or_else(|| CompileError::internal(Stage::Linearize, "loop stack underflow"))?;
                self.current = scope.exit;
                Ok(())
            }
            Stmt::Break(id) => {
                let Some(pos) = self.loops.iter().rposition(|scope| scope.id == id) else {
                    return Err(CompileError::internal(Stage::Linearize, format!("BREAK of unknown {id}")));
                };
                let exit = match self.loops[pos].exit {
                    Some(exit) => exit,
                    None => {
                        let name = format!("{}_exit", self.loops[pos].name);
                        let exit = self.new_block(&name);
                        self.loops[pos].exit = Some(exit);
                        exit
                    }
                };
                self.emit(Stmt::Branch(exit))
            }

            Stmt::Match {
                matcher,
                cases,
                default,
            } => {
                let temp = self.temp();
                self.emit(Stmt::Move {
                    dst: temp,
                    src: Expr::Match(matcher),
                })?;
                let targets: Vec<(u32, BlockId)> = cases.iter().map(|c| (c.case, self.new_block("case"))).collect();
                let default_block = self.new_block("default");
                self.emit(Stmt::MatchBranch {
                    temp,
                    cases: targets.clone(),
                    default: Some(default_block),
                })?;
                let mut ends = Vec::with_capacity(cases.len() + 1);
                for (case, (_, block)) in cases.into_iter().zip(targets) {
                    ends.push(self.branch_body(block, case.body)?);
                }
                ends.push(self.branch_body(default_block, *default)?);
                self.join(&ends, "match_join")
            }

            Stmt::Valid
            | Stmt::Invalid(_)
            | Stmt::Token
            | Stmt::Consume
            | Stmt::Untoken
            | Stmt::BSet(..)
            | Stmt::BClear(..)
            | Stmt::Incr(_)
            | Stmt::Decr(_)
            | Stmt::SplitVec { .. } => self.emit(stmt),

            Stmt::Block(_)
            | Stmt::Branch(_)
            | Stmt::CBranch { .. }
            | Stmt::Move { .. }
            | Stmt::Call(_)
            | Stmt::MatchBranch { .. } => Err(CompileError::internal(
                Stage::Linearize,
                format!("control-flow statement in tree input: {}", stmt.to_string().trim_end()),
            )),
        }
    }

    /// Emits the branch structure for `cond`, ending in `then` or `els`.
    fn cond(&mut self, cond: Expr, then: BlockId, els: BlockId) -> Result<(), CompileError> {
        match cond {
            Expr::Bool(true) => self.emit(Stmt::Branch(then)),
            Expr::Bool(false) => self.emit(Stmt::Branch(els)),
            Expr::Not(inner) => self.cond(*inner, els, then),
            Expr::And(a, b) => {
                let mid = self.new_block("and");
                self.cond(*a, mid, els)?;
                self.current = Some(mid);
                self.cond(*b, then, els)
            }
            Expr::Or(a, b) => {
                let mid = self.new_block("or");
                self.cond(*a, then, mid)?;
                self.current = Some(mid);
                self.cond(*b, then, els)
            }
            other => {
                let cond = self.hoist_expr(other)?;
                self.emit(Stmt::CBranch { cond, then, els })
            }
        }
    }

    /// Moves split counts, matcher results and bit counts into temporaries.
    fn hoist_expr(&mut self, expr: Expr) -> Result<Expr, CompileError> {
        Ok(match expr {
            Expr::Split(_) | Expr::Match(_) | Expr::BCount(_) => {
                let dst = self.temp();
                self.emit(Stmt::Move { dst, src: expr })?;
                Expr::Temp(dst)
            }
            Expr::Seq(stmt, e) => {
                self.stmt(*stmt)?;
                self.hoist_expr(*e)?
            }
            Expr::Cmp(op, a, b) => Expr::cmp(op, self.hoist_expr(*a)?, self.hoist_expr(*b)?),
            Expr::IsInt(e) => Expr::IsInt(Box::new(self.hoist_expr(*e)?)),
            Expr::MultipleOf(e, d) => Expr::MultipleOf(Box::new(self.hoist_expr(*e)?), d),
            Expr::And(a, b) => Expr::and(self.hoist_expr(*a)?, self.hoist_expr(*b)?),
            Expr::Or(a, b) => Expr::or(self.hoist_expr(*a)?, self.hoist_expr(*b)?),
            Expr::Not(e) => Expr::negate(self.hoist_expr(*e)?),
            other => other,
        })
    }
}

/// Constant-folds boolean structure and literal comparisons.
fn fold(expr: Expr) -> Expr {
    match expr {
        Expr::And(a, b) => match (fold(*a), fold(*b)) {
            (Expr::Bool(false), _) | (_, Expr::Bool(false)) => Expr::Bool(false),
            (Expr::Bool(true), x) | (x, Expr::Bool(true)) => x,
            (x, y) => Expr::and(x, y),
        },
        Expr::Or(a, b) => match (fold(*a), fold(*b)) {
            (Expr::Bool(true), _) | (_, Expr::Bool(true)) => Expr::Bool(true),
            (Expr::Bool(false), x) | (x, Expr::Bool(false)) => x,
            (x, y) => Expr::or(x, y),
        },
        Expr::Not(e) => match fold(*e) {
            Expr::Bool(b) => Expr::Bool(!b),
            Expr::Not(inner) => *inner,
            other => Expr::negate(other),
        },
        Expr::Cmp(op, a, b) => match (fold(*a), fold(*b)) {
            (Expr::Size(x), Expr::Size(y)) => Expr::Bool(op.eval(x, y)),
            (Expr::Int(x), Expr::Int(y)) => Expr::Bool(op.eval(x, y)),
            (Expr::Num(x), Expr::Num(y)) => Expr::Bool(op.eval(x, y)),
            (x, y) => Expr::cmp(op, x, y),
        },
        Expr::IsInt(e) => match fold(*e) {
            Expr::Num(v) => Expr::Bool(v.fract() == 0.0),
            other => Expr::IsInt(Box::new(other)),
        },
        other => other,
    }
}

/// Checks the structural invariants of a linearized program.
///
/// Every block ends in exactly one terminator, every branch target and call
/// target exists, temporaries are declared, and every block is reachable from
/// the entry block.
pub fn check_cfg(program: &CfgProgram) -> Result<(), CompileError> {
    let err = |frame: usize, message: String| CompileError::internal(Stage::Linearize, format!("frame{frame}: {message}"));
    let nframes = program.frames.len();
    for (fi, frame) in program.frames.iter().enumerate() {
        let blocks = &frame.body.blocks;
        if blocks.is_empty() {
            return Err(err(fi, "no blocks".to_owned()));
        }
        for (bi, block) in blocks.iter().enumerate() {
            if block.id.index() != bi {
                return Err(err(fi, format!("{} stored at position {bi}", block.id)));
            }
            let Some((last, body)) = block.stmts.split_last() else {
                return Err(err(fi, format!("{} is empty", block.id)));
            };
            if !last.is_terminator() {
                return Err(err(fi, format!("{} does not end in a terminator", block.id)));
            }
            if body.iter().any(Stmt::is_terminator) {
                return Err(err(fi, format!("{} has a terminator before its end", block.id)));
            }
            for target in last.successors() {
                if target.index() >= blocks.len() {
                    return Err(err(fi, format!("{} branches to missing {target}", block.id)));
                }
            }
            for stmt in &block.stmts {
                match stmt {
                    Stmt::Call(id) if id.index() >= nframes => {
                        return Err(err(fi, format!("call to missing {id}")));
                    }
                    Stmt::Move { dst, .. } | Stmt::MatchBranch { temp: dst, .. } if dst.0 >= frame.decls.temps => {
                        return Err(err(fi, format!("undeclared {dst}")));
                    }
                    _ => {}
                }
            }
        }
        for split in &frame.decls.splits {
            if let Some(id) = split.iter().find(|id| id.index() >= nframes) {
                return Err(err(fi, format!("split list names missing {id}")));
            }
        }

        let mut seen = vec![false; blocks.len()];
        let mut stack = vec![BlockId::ENTRY];
        while let Some(b) = stack.pop() {
            if std::mem::replace(&mut seen[b.index()], true) {
                continue;
            }
            if let Some(last) = blocks[b.index()].stmts.last() {
                stack.extend(last.successors());
            }
        }
        if let Some(b) = seen.iter().position(|s| !s) {
            return Err(err(fi, format!("{} is unreachable", blocks[b].id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        invalid::InvalidCode,
        ir::{CmpOp, CounterId},
        token::TokenKind,
    };

    fn single(body: Stmt) -> TreeProgram {
        Program {
            frames: vec![Frame {
                decls: Decls::default(),
                body,
            }],
        }
    }

    #[test]
    fn if_with_nop_else_branches_to_join() {
        let tree = single(Stmt::seq([
            Stmt::Token,
            Stmt::invalid_if(Expr::IsTok(TokenKind::Null), InvalidCode::UnexpectedToken),
            Stmt::Valid,
        ]));
        let cfg = linearize(&tree).unwrap();
        let blocks = &cfg.frames[0].body.blocks;
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[0].stmts,
            vec![
                Stmt::Token,
                Stmt::CBranch {
                    cond: Expr::IsTok(TokenKind::Null),
                    then: BlockId(1),
                    els: BlockId(2),
                }
            ]
        );
        assert_eq!(blocks[1].stmts, vec![Stmt::Invalid(InvalidCode::UnexpectedToken)]);
        assert_eq!(blocks[2].stmts, vec![Stmt::Valid]);
    }

    #[test]
    fn constant_conditions_fold_away() {
        let tree = single(Stmt::if_else(
            Expr::cmp(CmpOp::Lt, Expr::Size(1), Expr::Size(2)),
            Stmt::Valid,
            Stmt::Invalid(InvalidCode::UnexpectedToken),
        ));
        let cfg = linearize(&tree).unwrap();
        assert_eq!(cfg.frames[0].body.blocks.len(), 1);
        assert_eq!(cfg.frames[0].body.blocks[0].stmts, vec![Stmt::Valid]);
    }

    #[test]
    fn nested_frames_are_hoisted_in_order() {
        let inner = |code| Frame {
            decls: Decls::default(),
            body: Stmt::Invalid(code),
        };
        let tree = single(Stmt::seq([
            Stmt::Frame(Box::new(inner(InvalidCode::NotInteger))),
            Stmt::Frame(Box::new(inner(InvalidCode::NotMultiple))),
            Stmt::Valid,
        ]));
        let cfg = linearize(&tree).unwrap();
        assert_eq!(cfg.frames.len(), 3);
        assert_eq!(
            cfg.frames[0].body.blocks[0].stmts,
            vec![Stmt::Call(FrameId(1)), Stmt::Call(FrameId(2)), Stmt::Valid]
        );
        assert_eq!(
            cfg.frames[2].body.blocks[0].stmts,
            vec![Stmt::Invalid(InvalidCode::NotMultiple)]
        );
    }

    #[test]
    fn statements_after_a_terminator_are_rejected() {
        let tree = single(Stmt::seq([Stmt::Valid, Stmt::Token, Stmt::Valid]));
        let err = linearize(&tree).unwrap_err();
        assert!(matches!(err, CompileError::Internal { stage: Stage::Linearize, .. }));
    }

    #[test]
    fn unknown_break_is_rejected() {
        let tree = single(Stmt::seq([Stmt::Break(LoopId(3)), Stmt::Valid]));
        assert!(linearize(&tree).is_err());
    }

    #[test]
    fn loop_exit_is_created_by_break() {
        let lp = LoopId(0);
        let tree = single(Stmt::seq([
            Stmt::Counter {
                id: CounterId(0),
                name: "n".to_owned(),
            },
            Stmt::Loop {
                id: lp,
                name: "items".to_owned(),
                body: Box::new(Stmt::seq([
                    Stmt::Token,
                    Stmt::if_else(Expr::IsTok(TokenKind::ArrayEnd), Stmt::Break(lp), Stmt::Incr(CounterId(0))),
                ])),
            },
            Stmt::Valid,
        ]));
        let cfg = linearize(&tree).unwrap();
        let frame = &cfg.frames[0];
        assert_eq!(frame.decls.counters, vec!["n".to_owned()]);
        let names: Vec<&str> = frame.body.blocks.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["entry", "items", "then", "else", "items_exit", "join"]);
        check_cfg(&cfg).unwrap();
    }
}

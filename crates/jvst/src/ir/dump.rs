//! Text listings of IR programs, used by tests and debugging.

use std::fmt::{self, Display, Formatter, Write};

use super::{Cfg, Decls, Expr, Flat, Frame, FrameId, Program, Stmt};
use crate::cnode::Pattern;

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Num(v) => write!(f, "NUM({v})"),
            Self::Int(v) => write!(f, "INT({v})"),
            Self::Size(v) => write!(f, "SIZE({v})"),
            Self::Bool(v) => write!(f, "BOOL({v})"),
            Self::TokType => f.write_str("TOKTYPE"),
            Self::TokNum => f.write_str("TOKNUM"),
            Self::TokComplete => f.write_str("TOKCOMPLETE"),
            Self::TokLen => f.write_str("TOKLEN"),
            Self::IsTok(kind) => write!(f, "ISTOK({})", kind.name()),
            Self::Count(c) => write!(f, "COUNT({c})"),
            Self::BTest(bv, bit) => write!(f, "BTEST({bv}, {bit})"),
            Self::BTestAll(bv) => write!(f, "BTESTALL({bv})"),
            Self::BTestAny(bv) => write!(f, "BTESTANY({bv})"),
            Self::BCount(bv) => write!(f, "BCOUNT({bv})"),
            Self::IsInt(e) => write!(f, "ISINT({e})"),
            Self::MultipleOf(e, d) => write!(f, "MULTIPLEOF({e}, {d})"),
            Self::And(a, b) => write!(f, "AND({a}, {b})"),
            Self::Or(a, b) => write!(f, "OR({a}, {b})"),
            Self::Not(e) => write!(f, "NOT({e})"),
            Self::Cmp(op, a, b) => write!(f, "{}({a}, {b})", <&str>::from(*op)),
            Self::Split(s) => write!(f, "SPLIT({s})"),
            Self::Match(m) => write!(f, "MATCH({m})"),
            Self::Unique(u) => write!(f, "UNIQUE({u})"),
            Self::Temp(t) => write!(f, "{t}"),
            Self::Seq(s, e) => {
                let mut inner = String::new();
                write_stmt(&mut inner, s, 0)?;
                write!(f, "SEQ({}, {e})", inner.trim_end())
            }
        }
    }
}

impl Display for Stmt {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_stmt(&mut out, self, 0)?;
        f.write_str(&out)
    }
}

fn pad(out: &mut String, indent: usize) {
    for _ in 0..indent {
        out.push_str("  ");
    }
}

/// Writes `stmt` and everything nested in it, one statement per line.
fn write_stmt(out: &mut String, stmt: &Stmt, indent: usize) -> fmt::Result {
    pad(out, indent);
    match stmt {
        Stmt::Nop => out.push_str("NOP\n"),
        Stmt::Valid => out.push_str("VALID\n"),
        Stmt::Invalid(code) => writeln!(out, "INVALID({})", code.name())?,
        Stmt::If { cond, then, els } => {
            writeln!(out, "IF {cond}")?;
            write_stmt(out, then, indent + 1)?;
            pad(out, indent);
            out.push_str("ELSE\n");
            write_stmt(out, els, indent + 1)?;
        }
        Stmt::Loop { id, name, body } => {
            writeln!(out, "LOOP {id} {name:?}")?;
            write_stmt(out, body, indent + 1)?;
        }
        Stmt::Break(id) => writeln!(out, "BREAK {id}")?,
        Stmt::Seq(stmts) => {
            out.push_str("SEQ\n");
            for s in stmts {
                write_stmt(out, s, indent + 1)?;
            }
        }
        Stmt::Token => out.push_str("TOKEN\n"),
        Stmt::Consume => out.push_str("CONSUME\n"),
        Stmt::Untoken => out.push_str("UNTOKEN\n"),
        Stmt::Frame(frame) => {
            out.push_str("FRAME\n");
            write_stmt(out, &frame.body, indent + 1)?;
        }
        Stmt::Counter { id, name } => writeln!(out, "COUNTER {id} {name:?}")?,
        Stmt::Matcher { id, matcher } => {
            writeln!(out, "MATCHER {id} {}", patterns(matcher.patterns()))?;
        }
        Stmt::Bitvec { id, name, size } => writeln!(out, "BITVECTOR {id} {name:?} {size}")?,
        Stmt::SplitList { id, frames } => {
            writeln!(out, "SPLITLIST {id}")?;
            for frame in frames {
                pad(out, indent + 1);
                out.push_str("FRAME\n");
                write_stmt(out, &frame.body, indent + 2)?;
            }
        }
        Stmt::UniqSet(id) => writeln!(out, "UNIQSET {id}")?,
        Stmt::BSet(bv, bit) => writeln!(out, "BSET {bv} {bit}")?,
        Stmt::BClear(bv, bit) => writeln!(out, "BCLEAR {bv} {bit}")?,
        Stmt::Incr(c) => writeln!(out, "INCR {c}")?,
        Stmt::Decr(c) => writeln!(out, "DECR {c}")?,
        Stmt::Match {
            matcher,
            cases,
            default,
        } => {
            writeln!(out, "MATCH {matcher}")?;
            for case in cases {
                pad(out, indent + 1);
                writeln!(out, "CASE {}", case.case)?;
                write_stmt(out, &case.body, indent + 2)?;
            }
            pad(out, indent + 1);
            out.push_str("DEFAULT\n");
            write_stmt(out, default, indent + 2)?;
        }
        Stmt::SplitVec { bitvec, split } => writeln!(out, "SPLITVEC {bitvec} {split}")?,
        Stmt::Block(id) => writeln!(out, "BLOCK {id}")?,
        Stmt::Branch(id) => writeln!(out, "BRANCH {id}")?,
        Stmt::CBranch { cond, then, els } => writeln!(out, "CBRANCH {cond} {then} {els}")?,
        Stmt::Move { dst, src } => writeln!(out, "MOVE {dst} {src}")?,
        Stmt::Call(id) => writeln!(out, "CALL {id}")?,
        Stmt::MatchBranch { temp, cases, default } => {
            write!(out, "MATCHBRANCH {temp}")?;
            for (case, block) in cases {
                write!(out, " {case}:{block}")?;
            }
            match default {
                Some(block) => writeln!(out, " default:{block}")?,
                None => out.push('\n'),
            }
        }
    }
    Ok(())
}

fn patterns(list: &[Pattern]) -> String {
    let items: Vec<String> = list
        .iter()
        .map(|p| match p {
            Pattern::Literal(s) => format!("{s:?}"),
            Pattern::Regex(s) => format!("/{s}/"),
        })
        .collect();
    format!("[{}]", items.join(", "))
}

fn write_decls(out: &mut String, decls: &Decls) -> fmt::Result {
    for (i, name) in decls.counters.iter().enumerate() {
        writeln!(out, "  COUNTER c{i} {name:?}")?;
    }
    for (i, m) in decls.matchers.iter().enumerate() {
        writeln!(out, "  MATCHER dfa{i} {}", patterns(m.patterns()))?;
    }
    for (i, bv) in decls.bitvecs.iter().enumerate() {
        writeln!(out, "  BITVECTOR bv{i} {:?} {}", bv.name, bv.size)?;
    }
    for (i, frames) in decls.splits.iter().enumerate() {
        let ids: Vec<String> = frames.iter().map(ToString::to_string).collect();
        writeln!(out, "  SPLITLIST split{i} [{}]", ids.join(", "))?;
    }
    for i in 0..decls.uniqs {
        writeln!(out, "  UNIQSET uniq{i}")?;
    }
    if decls.temps > 0 {
        writeln!(out, "  TEMPS {}", decls.temps)?;
    }
    Ok(())
}

/// Per-body-type listing of a frame.
pub trait DumpBody {
    fn dump(&self, out: &mut String) -> fmt::Result;
}

impl DumpBody for Stmt {
    fn dump(&self, out: &mut String) -> fmt::Result {
        write_stmt(out, self, 1)
    }
}

impl DumpBody for Cfg {
    fn dump(&self, out: &mut String) -> fmt::Result {
        for block in &self.blocks {
            writeln!(out, "  {} {:?}:", block.id, block.name)?;
            for stmt in &block.stmts {
                write_stmt(out, stmt, 2)?;
            }
        }
        Ok(())
    }
}

impl DumpBody for Flat {
    fn dump(&self, out: &mut String) -> fmt::Result {
        for stmt in &self.stmts {
            let indent = if matches!(stmt, Stmt::Block(_)) { 1 } else { 2 };
            write_stmt(out, stmt, indent)?;
        }
        Ok(())
    }
}

impl<B: DumpBody> Display for Frame<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        write_decls(&mut out, &self.decls)?;
        self.body.dump(&mut out)?;
        f.write_str(&out)
    }
}

impl<B: DumpBody> Display for Program<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            writeln!(f, "FRAME {}", FrameId(u32::try_from(i).map_err(|_| fmt::Error)?))?;
            write!(f, "{frame}")?;
        }
        Ok(())
    }
}

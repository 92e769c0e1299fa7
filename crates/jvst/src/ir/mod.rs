//! Intermediate representation of compiled validators.
//!
//! The same [`Stmt`]/[`Expr`] types carry every compiler stage; the program's
//! body type parameter records which stage produced it:
//!
//! | Stage | Type | Frame body |
//! |-------|------|------------|
//! | [`translate`] | [`TreeProgram`] | one statement tree, nested frames inline |
//! | [`linearize`] | [`CfgProgram`] | labeled basic blocks |
//! | [`flatten`] | [`FlatProgram`] | one statement list with block markers |
//!
//! Frames reference each other (CALL targets, split lists) by index into the
//! program's frame table, never by ownership.

mod dump;
mod flatten;
mod linearize;
mod liveness;
mod translate;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use flatten::flatten;
pub use linearize::{check_cfg, linearize};
pub use liveness::{BlockLiveness, FrameLiveness, Liveness, Var, liveness};
pub use translate::translate;

use crate::{invalid::InvalidCode, matcher::Matcher, token::TokenKind};

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// The id as a table index.
            #[must_use]
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(
    /// Frame-local counter.
    CounterId,
    "c"
);
define_id!(
    /// Frame-local matcher.
    MatcherId,
    "dfa"
);
define_id!(
    /// Frame-local bitvector.
    BitvecId,
    "bv"
);
define_id!(
    /// Frame-local split list.
    SplitId,
    "split"
);
define_id!(
    /// Frame-local unique-value set.
    UniqId,
    "uniq"
);
define_id!(
    /// Frame-local temporary, introduced by linearization.
    TempId,
    "t"
);
define_id!(
    /// Frame-local loop name.
    LoopId,
    "loop"
);
define_id!(
    /// Frame-local basic block.
    BlockId,
    "b"
);
define_id!(
    /// Index into the program's frame table.
    FrameId,
    "frame"
);

impl BlockId {
    /// Every frame starts executing here.
    pub const ENTRY: Self = Self(0);
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum CmpOp {
    Ne,
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl CmpOp {
    /// The operator with its truth value inverted (`<` becomes `>=`).
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Le => Self::Gt,
            Self::Eq => Self::Ne,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
        }
    }

    /// Applies the comparison.
    pub fn eval<T: PartialOrd>(self, lhs: T, rhs: T) -> bool {
        match self {
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Eq => lhs == rhs,
            Self::Ge => lhs >= rhs,
            Self::Gt => lhs > rhs,
        }
    }
}

/// IR expression.
///
/// Expressions only read registers and slots. `Split` and `Unique` run
/// lookahead over the upcoming value and leave the token position unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Int(i64),
    Size(usize),
    Bool(bool),

    /// Kind of the current token.
    TokType,
    /// Numeric value of the current token.
    TokNum,
    /// Whether the current token is complete.
    TokComplete,
    /// Length of the current token, in code points.
    TokLen,
    /// True when the current token has this kind.
    IsTok(TokenKind),

    Count(CounterId),
    BTest(BitvecId, u32),
    BTestAll(BitvecId),
    BTestAny(BitvecId),
    BCount(BitvecId),

    /// The operand has no fractional part.
    IsInt(Box<Expr>),
    /// The operand divided by the divisor has no fractional part.
    MultipleOf(Box<Expr>, f64),

    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Cmp(CmpOp, Box<Expr>, Box<Expr>),

    /// Number of frames of the split list that accept the upcoming value.
    Split(SplitId),
    /// Case number of the current string token.
    Match(MatcherId),
    /// True when the upcoming value was not seen before in this activation.
    Unique(UniqId),

    Temp(TempId),
    /// Runs the statement, then evaluates the expression.
    Seq(Box<Stmt>, Box<Expr>),
}

impl Expr {
    pub fn cmp(op: CmpOp, lhs: Self, rhs: Self) -> Self {
        Self::Cmp(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn and(lhs: Self, rhs: Self) -> Self {
        Self::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: Self, rhs: Self) -> Self {
        Self::Or(Box::new(lhs), Box::new(rhs))
    }

    pub fn negate(inner: Self) -> Self {
        Self::Not(Box::new(inner))
    }
}

/// One case of a tree-form [`Stmt::Match`].
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCase {
    /// Case number from the matcher's case table.
    pub case: u32,
    pub body: Stmt,
}

/// IR statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Nop,
    Valid,
    Invalid(InvalidCode),
    If {
        cond: Expr,
        then: Box<Stmt>,
        els: Box<Stmt>,
    },
    Loop {
        id: LoopId,
        name: String,
        body: Box<Stmt>,
    },
    Break(LoopId),
    Seq(Vec<Stmt>),

    /// Reads the next token.
    Token,
    /// Skips the rest of the current value.
    Consume,
    /// Pushes back the last token.
    Untoken,

    /// Nested sub-validator run on the upcoming value (tree form only).
    Frame(Box<Frame<Stmt>>),

    Counter {
        id: CounterId,
        name: String,
    },
    Matcher {
        id: MatcherId,
        matcher: Matcher,
    },
    Bitvec {
        id: BitvecId,
        name: String,
        size: u32,
    },
    /// Frames run by `Expr::Split` / `Stmt::SplitVec` (tree form only).
    SplitList {
        id: SplitId,
        frames: Vec<Frame<Stmt>>,
    },
    UniqSet(UniqId),

    BSet(BitvecId, u32),
    BClear(BitvecId, u32),
    Incr(CounterId),
    Decr(CounterId),

    /// Dispatches on the case number of the current string token (tree form only).
    Match {
        matcher: MatcherId,
        cases: Vec<MatchCase>,
        default: Box<Stmt>,
    },
    /// Runs the split list's frames; bit `i` records whether frame `i` passed.
    SplitVec {
        bitvec: BitvecId,
        split: SplitId,
    },

    /// Block boundary marker (flat form only).
    Block(BlockId),
    Branch(BlockId),
    CBranch {
        cond: Expr,
        then: BlockId,
        els: BlockId,
    },
    Move {
        dst: TempId,
        src: Expr,
    },
    Call(FrameId),
    /// Dispatches on a case number previously moved into `temp`.
    ///
    /// With no default, an unlisted case is an internal error path that returns
    /// `INVALID_MATCH_CASE`.
    MatchBranch {
        temp: TempId,
        cases: Vec<(u32, BlockId)>,
        default: Option<BlockId>,
    },
}

impl Stmt {
    pub fn seq(stmts: impl IntoIterator<Item = Self>) -> Self {
        Self::Seq(stmts.into_iter().collect())
    }

    pub fn if_else(cond: Expr, then: Self, els: Self) -> Self {
        Self::If {
            cond,
            then: Box::new(then),
            els: Box::new(els),
        }
    }

    /// `IF(cond, INVALID(code), NOP)`.
    pub fn invalid_if(cond: Expr, code: InvalidCode) -> Self {
        Self::if_else(cond, Self::Invalid(code), Self::Nop)
    }

    /// True for statements that end a block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Valid | Self::Invalid(_) | Self::Branch(_) | Self::CBranch { .. } | Self::MatchBranch { .. }
        )
    }

    /// Blocks a terminator can transfer control to, in operand order.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Branch(b) => vec![*b],
            Self::CBranch { then, els, .. } => vec![*then, *els],
            Self::MatchBranch { cases, default, .. } => {
                let mut out: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                out.extend(default);
                out
            }
            _ => Vec::new(),
        }
    }
}

/// Bitvector declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitvecDecl {
    pub name: String,
    pub size: u32,
}

/// Resources declared by a frame, collected during linearization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decls {
    pub counters: Vec<String>,
    pub matchers: Vec<Matcher>,
    pub bitvecs: Vec<BitvecDecl>,
    pub splits: Vec<Vec<FrameId>>,
    pub uniqs: u32,
    pub temps: u32,
}

/// One independent validation context.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<B> {
    /// Declared resources. Empty for tree frames, whose declarations are still
    /// statements in the body.
    pub decls: Decls,
    pub body: B,
}

/// A labeled basic block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub name: String,
    pub stmts: Vec<Stmt>,
}

/// Control-flow graph body: blocks in creation order, entry first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cfg {
    pub blocks: Vec<Block>,
}

/// Flat body: one statement list with [`Stmt::Block`] markers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Flat {
    pub stmts: Vec<Stmt>,
    /// Block names by id.
    pub labels: Vec<String>,
}

/// Ordered frame table; frame 0 is the entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Program<B> {
    pub frames: Vec<Frame<B>>,
}

pub type TreeProgram = Program<Stmt>;
pub type CfgProgram = Program<Cfg>;
pub type FlatProgram = Program<Flat>;

impl<B> Program<B> {
    /// The frame at `id`, if it exists.
    #[must_use]
    pub fn frame(&self, id: FrameId) -> Option<&Frame<B>> {
        self.frames.get(id.index())
    }
}

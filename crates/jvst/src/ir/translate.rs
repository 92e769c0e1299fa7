//! Constraint tree → tree-shaped IR.
//!
//! Every frame validates exactly one JSON value and starts *before* the value's
//! first token. Value-level combinators are checked first through lookahead
//! splits, then the value is read and dispatched on its token type. Inside a
//! type arm the first token has already been read, so arm-level combinators push
//! it back, run their splits, and read it again.

use indexmap::IndexSet;

use super::{
    BitvecId, CmpOp, CounterId, Decls, Expr, Frame, LoopId, MatchCase, MatcherId, Program, SplitId, Stmt, TreeProgram,
    UniqId,
};
use crate::{
    cnode::{Constraint, CountRange, Items, NumRange, Pattern, PropertyMatch, TypeSwitch, ValueType},
    error::{CompileError, Stage},
    invalid::InvalidCode,
    matcher::Matcher,
    token::TokenKind,
};

/// Bits available in one bitvector slot.
const BITVEC_WIDTH: usize = 64;

/// Translates a constraint tree into a program whose only frame is the entry
/// frame; nested frames stay inline until linearization hoists them.
pub fn translate(root: &Constraint) -> Result<TreeProgram, CompileError> {
    Ok(Program {
        frames: vec![value_frame(root)?],
    })
}

/// Per-frame id allocation and declaration statements.
#[derive(Default)]
struct FrameBuilder {
    decls: Vec<Stmt>,
    counters: u32,
    matchers: u32,
    bitvecs: u32,
    splits: u32,
    uniqs: u32,
    loops: u32,
}

impl FrameBuilder {
    fn counter(&mut self, name: &str) -> CounterId {
        let id = CounterId(self.counters);
        self.counters += 1;
        self.decls.push(Stmt::Counter {
            id,
            name: name.to_owned(),
        });
        id
    }

    fn matcher(&mut self, matcher: Matcher) -> MatcherId {
        let id = MatcherId(self.matchers);
        self.matchers += 1;
        self.decls.push(Stmt::Matcher { id, matcher });
        id
    }

    fn bitvec(&mut self, name: &str, size: usize) -> BitvecId {
        debug_assert!(size <= BITVEC_WIDTH);
        let id = BitvecId(self.bitvecs);
        self.bitvecs += 1;
        self.decls.push(Stmt::Bitvec {
            id,
            name: name.to_owned(),
            size: u32::try_from(size).unwrap_or(u32::MAX),
        });
        id
    }

    fn split(&mut self, frames: Vec<Frame<Stmt>>) -> SplitId {
        let id = SplitId(self.splits);
        self.splits += 1;
        self.decls.push(Stmt::SplitList { id, frames });
        id
    }

    fn uniq(&mut self) -> UniqId {
        let id = UniqId(self.uniqs);
        self.uniqs += 1;
        self.decls.push(Stmt::UniqSet(id));
        id
    }

    fn loop_id(&mut self) -> LoopId {
        let id = LoopId(self.loops);
        self.loops += 1;
        id
    }

    /// Declarations first, then the body.
    fn finish(self, body: Stmt) -> Frame<Stmt> {
        let mut stmts = self.decls;
        stmts.push(body);
        Frame {
            decls: Decls::default(),
            body: Stmt::Seq(stmts),
        }
    }
}

fn value_frame(c: &Constraint) -> Result<Frame<Stmt>, CompileError> {
    let mut fb = FrameBuilder::default();
    let body = translate_value(&mut fb, c)?;
    Ok(fb.finish(body))
}

/// Collects the conjuncts of `c`, flattening nested `And` and dropping `Valid`.
///
/// With `arm = Some(ty)` the value is known to be of type `ty`: switches select
/// their `ty` arm and leaves of other types are dropped since they accept.
/// Returns `None` when a conjunct is `Invalid`.
fn conjuncts(c: &Constraint, arm: Option<ValueType>) -> Option<Vec<&Constraint>> {
    fn walk<'a>(c: &'a Constraint, arm: Option<ValueType>, out: &mut Vec<&'a Constraint>) -> bool {
        match c {
            Constraint::Valid => true,
            Constraint::Invalid => false,
            Constraint::And(children) => children.iter().all(|child| walk(child, arm, out)),
            Constraint::Switch(sw) => match arm {
                Some(ty) => walk(sw.arm(ty), arm, out),
                None => {
                    out.push(c);
                    true
                }
            },
            _ => {
                if let (Some(ty), Some(leaf_ty)) = (arm, c.leaf_type())
                    && ty != leaf_ty
                {
                    return true;
                }
                out.push(c);
                true
            }
        }
    }
    let mut out = Vec::new();
    walk(c, arm, &mut out).then_some(out)
}

fn is_combinator(c: &Constraint) -> bool {
    matches!(c, Constraint::Or(_) | Constraint::Xor(_) | Constraint::Not(_))
}

/// Conjunction of two constraints, keeping `Valid` out of the tree.
fn and2(a: Constraint, b: Constraint) -> Constraint {
    match (a, b) {
        (Constraint::Valid, x) | (x, Constraint::Valid) => x,
        (Constraint::And(mut xs), Constraint::And(ys)) => {
            xs.extend(ys);
            Constraint::And(xs)
        }
        (Constraint::And(mut xs), y) => {
            xs.push(y);
            Constraint::And(xs)
        }
        (x, y) => Constraint::And(vec![x, y]),
    }
}

fn conj_of(parts: Vec<Constraint>) -> Constraint {
    parts.into_iter().fold(Constraint::Valid, and2)
}

/// Token kinds that start a value of `ty`.
fn token_cond(ty: ValueType) -> Expr {
    match ty {
        ValueType::Null => Expr::IsTok(TokenKind::Null),
        ValueType::Boolean => Expr::or(Expr::IsTok(TokenKind::True), Expr::IsTok(TokenKind::False)),
        ValueType::Number => Expr::IsTok(TokenKind::Number),
        ValueType::String => Expr::IsTok(TokenKind::String),
        ValueType::Object => Expr::IsTok(TokenKind::ObjectBeg),
        ValueType::Array => Expr::IsTok(TokenKind::ArrayBeg),
    }
}

/// Lowers a constraint for a value whose first token has not been read.
fn translate_value(fb: &mut FrameBuilder, c: &Constraint) -> Result<Stmt, CompileError> {
    let Some(parts) = conjuncts(c, None) else {
        return Ok(Stmt::Invalid(InvalidCode::UnexpectedToken));
    };

    let mut switch: Option<TypeSwitch> = None;
    let mut combs = Vec::new();
    for part in parts {
        match part {
            Constraint::Switch(sw) => {
                let merged = switch.get_or_insert_with(Constraint::any_type);
                for ty in ValueType::ALL {
                    let arm = std::mem::replace(merged.arm_mut(ty), Constraint::Valid);
                    *merged.arm_mut(ty) = and2(arm, sw.arm(ty).clone());
                }
            }
            _ if is_combinator(part) => combs.push(part),
            leaf => {
                let ty = leaf
                    .leaf_type()
                    .ok_or_else(|| CompileError::internal(Stage::Translate, "unclassified constraint"))?;
                let merged = switch.get_or_insert_with(Constraint::any_type);
                let arm = std::mem::replace(merged.arm_mut(ty), Constraint::Valid);
                *merged.arm_mut(ty) = and2(arm, leaf.clone());
            }
        }
    }

    let mut stmts = Vec::new();
    for comb in combs {
        let cond = split_cond(fb, comb, None)?;
        stmts.push(Stmt::invalid_if(Expr::negate(cond), InvalidCode::InvalidSplitCondition));
    }
    stmts.push(Stmt::Token);
    match switch {
        Some(sw) => stmts.push(dispatch(fb, &sw)?),
        None => stmts.extend([Stmt::Consume, Stmt::Valid]),
    }
    Ok(Stmt::Seq(stmts))
}

/// Split condition for `Or`/`Xor`/`Not`. With `arm = Some(ty)` the branch
/// frames re-check an arm-level constraint on a value of type `ty`.
fn split_cond(fb: &mut FrameBuilder, comb: &Constraint, arm: Option<ValueType>) -> Result<Expr, CompileError> {
    let frame_for = |child: &Constraint| match arm {
        Some(ty) => value_frame(&Constraint::only(ty, child.clone())),
        None => value_frame(child),
    };
    let (children, op, n): (Vec<&Constraint>, CmpOp, usize) = match comb {
        Constraint::Or(cs) => (cs.iter().collect(), CmpOp::Ge, 1),
        Constraint::Xor(cs) => (cs.iter().collect(), CmpOp::Eq, 1),
        Constraint::Not(c) => (vec![c.as_ref()], CmpOp::Eq, 0),
        _ => {
            return Err(CompileError::internal(
                Stage::Translate,
                "split condition on a non-combinator",
            ));
        }
    };
    let frames = children.into_iter().map(frame_for).collect::<Result<Vec<_>, _>>()?;
    let split = fb.split(frames);
    Ok(Expr::cmp(op, Expr::Split(split), Expr::Size(n)))
}

/// `IF(istok(T), arm, …)` chain over the accepted types; the current token
/// has been read.
fn dispatch(fb: &mut FrameBuilder, sw: &TypeSwitch) -> Result<Stmt, CompileError> {
    let mut arms = Vec::new();
    for ty in ValueType::ALL {
        let arm = sw.arm(ty);
        if conjuncts(arm, Some(ty)).is_none() {
            continue;
        }
        arms.push((token_cond(ty), translate_arm(fb, ty, arm)?));
    }
    Ok(arms
        .into_iter()
        .rev()
        .fold(Stmt::Invalid(InvalidCode::UnexpectedToken), |els, (cond, then)| {
            Stmt::if_else(cond, then, els)
        }))
}

/// Lowers the arm for type `ty`; the value's first token is current.
fn translate_arm(fb: &mut FrameBuilder, ty: ValueType, arm: &Constraint) -> Result<Stmt, CompileError> {
    let Some(parts) = conjuncts(arm, Some(ty)) else {
        return Ok(Stmt::Invalid(InvalidCode::UnexpectedToken));
    };
    let (combs, leaves): (Vec<&Constraint>, Vec<&Constraint>) = parts.into_iter().partition(|c| is_combinator(c));

    let mut stmts = Vec::new();
    if !combs.is_empty() {
        stmts.push(Stmt::Untoken);
        for comb in combs {
            let cond = split_cond(fb, comb, Some(ty))?;
            stmts.push(Stmt::invalid_if(Expr::negate(cond), InvalidCode::InvalidSplitCondition));
        }
        stmts.push(Stmt::Token);
    }

    if leaves.is_empty() {
        if ty.is_container() {
            stmts.push(Stmt::Consume);
        }
        stmts.push(Stmt::Valid);
        return Ok(Stmt::Seq(stmts));
    }
    match ty {
        ValueType::Null | ValueType::Boolean => stmts.push(Stmt::Valid),
        ValueType::Number => lower_number(&leaves, &mut stmts),
        ValueType::String => lower_string(fb, &leaves, &mut stmts)?,
        ValueType::Object => lower_object(fb, &leaves, &mut stmts)?,
        ValueType::Array => lower_array(fb, &leaves, &mut stmts)?,
    }
    Ok(Stmt::Seq(stmts))
}

fn lower_number(leaves: &[&Constraint], stmts: &mut Vec<Stmt>) {
    for leaf in leaves {
        match leaf {
            Constraint::Integer => stmts.push(Stmt::invalid_if(
                Expr::negate(Expr::IsInt(Box::new(Expr::TokNum))),
                InvalidCode::NotInteger,
            )),
            Constraint::MultipleOf(d) => stmts.push(Stmt::invalid_if(
                Expr::negate(Expr::MultipleOf(Box::new(Expr::TokNum), *d)),
                InvalidCode::NotMultiple,
            )),
            Constraint::NumRange(range) => lower_num_range(range, stmts),
            _ => {}
        }
    }
    stmts.push(Stmt::Valid);
}

fn lower_num_range(range: &NumRange, stmts: &mut Vec<Stmt>) {
    if let Some(min) = range.min {
        let op = if range.exclusive_min { CmpOp::Le } else { CmpOp::Lt };
        stmts.push(Stmt::invalid_if(
            Expr::cmp(op, Expr::TokNum, Expr::Num(min)),
            InvalidCode::NumberOutOfRange,
        ));
    }
    if let Some(max) = range.max {
        let op = if range.exclusive_max { CmpOp::Ge } else { CmpOp::Gt };
        stmts.push(Stmt::invalid_if(
            Expr::cmp(op, Expr::TokNum, Expr::Num(max)),
            InvalidCode::NumberOutOfRange,
        ));
    }
}

/// Checks `value` against `range`, pushing the too-small / too-large guards.
fn lower_count(value: &Expr, range: CountRange, short: InvalidCode, long: InvalidCode, stmts: &mut Vec<Stmt>) {
    if range.min > 0 {
        stmts.push(Stmt::invalid_if(
            Expr::cmp(CmpOp::Lt, value.clone(), Expr::Size(range.min)),
            short,
        ));
    }
    if let Some(max) = range.max {
        stmts.push(Stmt::invalid_if(Expr::cmp(CmpOp::Gt, value.clone(), Expr::Size(max)), long));
    }
}

fn lower_string(fb: &mut FrameBuilder, leaves: &[&Constraint], stmts: &mut Vec<Stmt>) -> Result<(), CompileError> {
    for leaf in leaves {
        match leaf {
            Constraint::Length(range) => lower_count(
                &Expr::TokLen,
                *range,
                InvalidCode::LengthTooShort,
                InvalidCode::LengthTooLong,
                stmts,
            ),
            Constraint::Pattern(source) => {
                let matcher = fb.matcher(Matcher::build([Pattern::Regex(source.clone())])?);
                stmts.push(Stmt::Match {
                    matcher,
                    cases: vec![MatchCase {
                        case: 1,
                        body: Stmt::Nop,
                    }],
                    default: Box::new(Stmt::Invalid(InvalidCode::PatternMismatch)),
                });
            }
            _ => {}
        }
    }
    stmts.push(Stmt::Valid);
    Ok(())
}

/// Validates the upcoming value against `c`: skip it, reject, or call a frame.
fn value_action(c: Constraint, reject: InvalidCode) -> Result<Stmt, CompileError> {
    match conjuncts(&c, None) {
        None => Ok(Stmt::Invalid(reject)),
        Some(parts) if parts.is_empty() => Ok(Stmt::seq([Stmt::Token, Stmt::Consume])),
        Some(_) => Ok(Stmt::Frame(Box::new(value_frame(&c)?))),
    }
}

fn lower_object(fb: &mut FrameBuilder, leaves: &[&Constraint], stmts: &mut Vec<Stmt>) -> Result<(), CompileError> {
    let mut groups: Vec<&PropertyMatch> = Vec::new();
    let mut counts: Vec<CountRange> = Vec::new();
    let mut required: IndexSet<&str> = IndexSet::new();
    for leaf in leaves {
        match leaf {
            Constraint::Properties(pm) => groups.push(pm),
            Constraint::PropertyCount(range) => counts.push(*range),
            Constraint::Required(names) => required.extend(names.iter().map(String::as_str)),
            _ => {}
        }
    }

    let mut patterns: IndexSet<Pattern> = IndexSet::new();
    for pm in &groups {
        patterns.extend(pm.rules.iter().map(|rule| rule.pattern.clone()));
    }
    patterns.extend(required.iter().map(|name| Pattern::Literal((*name).to_owned())));
    let required: Vec<&str> = required.into_iter().collect();

    let counter = (!counts.is_empty()).then(|| fb.counter("num_props"));
    let reqmasks: Vec<BitvecId> = required
        .chunks(BITVEC_WIDTH)
        .map(|chunk| fb.bitvec("reqmask", chunk.len()))
        .collect();

    // Statements run for a member whose name matched the pattern-index set.
    let member = |matcher: Option<&Matcher>, set: &[u32]| -> Result<Stmt, CompileError> {
        let mut body = Vec::new();
        let index_of = |pattern: &Pattern| matcher.and_then(|m| m.index_of(pattern));
        for (r, name) in required.iter().enumerate() {
            let idx = index_of(&Pattern::Literal((*name).to_owned()));
            if idx.is_some_and(|i| set.contains(&i)) {
                let bit = u32::try_from(r % BITVEC_WIDTH).unwrap_or(0);
                body.push(Stmt::BSet(reqmasks[r / BITVEC_WIDTH], bit));
            }
        }
        let mut parts = Vec::new();
        for pm in &groups {
            let before = parts.len();
            for rule in &pm.rules {
                if index_of(&rule.pattern).is_some_and(|i| set.contains(&i)) {
                    parts.push(rule.constraint.clone());
                }
            }
            if parts.len() == before {
                parts.push((*pm.additional).clone());
            }
        }
        body.push(value_action(conj_of(parts), InvalidCode::BadPropertyName)?);
        Ok(Stmt::Seq(body))
    };

    let regexes: Vec<Pattern> = patterns
        .iter()
        .filter(|p| matches!(p, Pattern::Regex(_)))
        .cloned()
        .collect();
    let on_member = if patterns.is_empty() {
        member(None, &[])?
    } else {
        let matcher = Matcher::build(patterns)?;
        let mut cases = Vec::new();
        for (k, set) in matcher.cases().iter().enumerate() {
            cases.push(MatchCase {
                case: u32::try_from(k + 1).unwrap_or(u32::MAX),
                body: member(Some(&matcher), set)?,
            });
        }
        // with two or more regexes the default also sees names matching several
        let default = if regexes.len() > 1 {
            lower_regex_member(fb, &groups, &regexes)?
        } else {
            member(Some(&matcher), &[])?
        };
        let id = fb.matcher(matcher);
        Stmt::Match {
            matcher: id,
            cases,
            default: Box::new(default),
        }
    };

    let mut per_member = Vec::new();
    per_member.extend(counter.map(Stmt::Incr));
    per_member.push(on_member);

    let lp = fb.loop_id();
    stmts.push(Stmt::Loop {
        id: lp,
        name: "props".to_owned(),
        body: Box::new(Stmt::seq([
            Stmt::Token,
            Stmt::if_else(Expr::IsTok(TokenKind::ObjectEnd), Stmt::Break(lp), Stmt::Seq(per_member)),
        ])),
    });

    if let Some(counter) = counter {
        for range in counts {
            lower_count(
                &Expr::Count(counter),
                range,
                InvalidCode::TooFewProperties,
                InvalidCode::TooManyProperties,
                stmts,
            );
        }
    }
    for bv in reqmasks {
        stmts.push(Stmt::invalid_if(
            Expr::negate(Expr::BTestAll(bv)),
            InvalidCode::MissingRequiredProperties,
        ));
    }
    stmts.push(Stmt::Valid);
    Ok(())
}

/// Member statements for a name that equals no literal and matches zero or
/// several regexes. Each regex gets its own one-pattern matcher and name bit;
/// each matching rule then checks the value ahead of reading it.
fn lower_regex_member(
    fb: &mut FrameBuilder,
    groups: &[&PropertyMatch],
    regexes: &[Pattern],
) -> Result<Stmt, CompileError> {
    let masks: Vec<BitvecId> = regexes
        .chunks(BITVEC_WIDTH)
        .map(|chunk| fb.bitvec("name_match", chunk.len()))
        .collect();
    let bit = |j: usize| (masks[j / BITVEC_WIDTH], u32::try_from(j % BITVEC_WIDTH).unwrap_or(0));

    let mut stmts = Vec::new();
    for (j, pattern) in regexes.iter().enumerate() {
        let matcher = fb.matcher(Matcher::build([pattern.clone()])?);
        let (bv, b) = bit(j);
        stmts.push(Stmt::Match {
            matcher,
            cases: vec![MatchCase {
                case: 1,
                body: Stmt::BSet(bv, b),
            }],
            default: Box::new(Stmt::BClear(bv, b)),
        });
    }

    for pm in groups {
        let check = check_ahead(fb, &pm.additional, InvalidCode::BadPropertyName)?;
        if check == Stmt::Nop {
            continue;
        }
        let matched = pm
            .rules
            .iter()
            .filter_map(|rule| regexes.iter().position(|p| *p == rule.pattern))
            .map(|j| {
                let (bv, b) = bit(j);
                Expr::BTest(bv, b)
            })
            .reduce(Expr::or);
        stmts.push(match matched {
            Some(any) => Stmt::if_else(any, Stmt::Nop, check),
            None => check,
        });
    }

    for (j, pattern) in regexes.iter().enumerate() {
        let rule = conj_of(
            groups
                .iter()
                .flat_map(|pm| &pm.rules)
                .filter(|rule| rule.pattern == *pattern)
                .map(|rule| rule.constraint.clone())
                .collect(),
        );
        let check = check_ahead(fb, &rule, InvalidCode::BadPropertyName)?;
        if check != Stmt::Nop {
            let (bv, b) = bit(j);
            stmts.push(Stmt::if_else(Expr::BTest(bv, b), check, Stmt::Nop));
        }
    }
    stmts.extend([Stmt::Token, Stmt::Consume]);
    Ok(Stmt::Seq(stmts))
}

/// Checks the upcoming value against `c` without reading it. A failing value is
/// then validated for real so the failure carries the constraint's own code.
fn check_ahead(fb: &mut FrameBuilder, c: &Constraint, reject: InvalidCode) -> Result<Stmt, CompileError> {
    match conjuncts(c, None) {
        None => Ok(Stmt::Invalid(reject)),
        Some(parts) if parts.is_empty() => Ok(Stmt::Nop),
        Some(_) => {
            let split = fb.split(vec![value_frame(c)?]);
            Ok(Stmt::if_else(
                Expr::cmp(CmpOp::Eq, Expr::Split(split), Expr::Size(0)),
                Stmt::seq([Stmt::Frame(Box::new(value_frame(c)?)), Stmt::Invalid(reject)]),
                Stmt::Nop,
            ))
        }
    }
}

/// Merges several `Items` leaves position by position.
fn merge_items(all: &[&Items]) -> (Vec<Constraint>, Constraint) {
    let len = all.iter().map(|items| items.tuple.len()).max().unwrap_or(0);
    let tuple = (0..len)
        .map(|i| {
            conj_of(
                all.iter()
                    .map(|items| items.tuple.get(i).unwrap_or(items.additional.as_ref()).clone())
                    .collect(),
            )
        })
        .collect();
    let additional = conj_of(all.iter().map(|items| (*items.additional).clone()).collect());
    (tuple, additional)
}

fn lower_array(fb: &mut FrameBuilder, leaves: &[&Constraint], stmts: &mut Vec<Stmt>) -> Result<(), CompileError> {
    let mut items: Vec<&Items> = Vec::new();
    let mut counts: Vec<CountRange> = Vec::new();
    let mut unique = false;
    let mut contains: Vec<&Constraint> = Vec::new();
    for leaf in leaves {
        match leaf {
            Constraint::Items(it) => items.push(it),
            Constraint::ItemCount(range) => counts.push(*range),
            Constraint::UniqueItems => unique = true,
            Constraint::Contains(c) => contains.push(c.as_ref()),
            _ => {}
        }
    }
    let (tuple, additional) = merge_items(&items);

    let counter = (!counts.is_empty() || !tuple.is_empty()).then(|| fb.counter("num_items"));
    let uniq = unique.then(|| fb.uniq());

    let mut per_item = vec![Stmt::Untoken];
    if let Some(uniq) = uniq {
        per_item.push(Stmt::invalid_if(
            Expr::negate(Expr::Unique(uniq)),
            InvalidCode::ArrayNotUnique,
        ));
    }

    let mut satisfied = Vec::new();
    for chunk in contains.chunks(BITVEC_WIDTH) {
        let frames = chunk
            .iter()
            .map(|c| value_frame(c))
            .collect::<Result<Vec<_>, _>>()?;
        let sat = fb.bitvec("contains", chunk.len());
        let scratch = fb.bitvec("contains_split", chunk.len());
        let split = fb.split(frames);
        per_item.push(Stmt::SplitVec { bitvec: scratch, split });
        for i in 0..chunk.len() {
            let bit = u32::try_from(i).unwrap_or(0);
            per_item.push(Stmt::if_else(Expr::BTest(scratch, bit), Stmt::BSet(sat, bit), Stmt::Nop));
        }
        satisfied.push((sat, chunk.len()));
    }

    per_item.extend(counter.map(Stmt::Incr));
    let mut action = value_action(additional, InvalidCode::TooManyItems)?;
    if let Some(counter) = counter {
        for (i, schema) in tuple.into_iter().enumerate().rev() {
            action = Stmt::if_else(
                Expr::cmp(CmpOp::Eq, Expr::Count(counter), Expr::Size(i + 1)),
                value_action(schema, InvalidCode::UnexpectedToken)?,
                action,
            );
        }
    }
    per_item.push(action);

    let lp = fb.loop_id();
    stmts.push(Stmt::Loop {
        id: lp,
        name: "items".to_owned(),
        body: Box::new(Stmt::seq([
            Stmt::Token,
            Stmt::if_else(Expr::IsTok(TokenKind::ArrayEnd), Stmt::Break(lp), Stmt::Seq(per_item)),
        ])),
    });

    if let Some(counter) = counter {
        for range in counts {
            lower_count(
                &Expr::Count(counter),
                range,
                InvalidCode::TooFewItems,
                InvalidCode::TooManyItems,
                stmts,
            );
        }
    }
    for (sat, n) in satisfied {
        stmts.push(Stmt::invalid_if(
            Expr::cmp(CmpOp::Ne, Expr::BCount(sat), Expr::Size(n)),
            InvalidCode::ContainsUnsatisfied,
        ));
    }
    stmts.push(Stmt::Valid);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_body(c: &Constraint) -> Stmt {
        translate(c).unwrap().frames.remove(0).body
    }

    #[test]
    fn valid_reads_and_consumes_one_value() {
        assert_eq!(
            entry_body(&Constraint::Valid),
            Stmt::seq([Stmt::seq([Stmt::Token, Stmt::Consume, Stmt::Valid])])
        );
    }

    #[test]
    fn type_switch_skips_rejected_types() {
        let body = entry_body(&Constraint::only(ValueType::Null, Constraint::Valid));
        let expected = Stmt::seq([Stmt::seq([
            Stmt::Token,
            Stmt::if_else(
                Expr::IsTok(TokenKind::Null),
                Stmt::seq([Stmt::Valid]),
                Stmt::Invalid(InvalidCode::UnexpectedToken),
            ),
        ])]);
        assert_eq!(body, expected);
    }

    #[test]
    fn value_level_or_declares_a_split_list() {
        let c = Constraint::Or(vec![Constraint::Integer, Constraint::Length(CountRange { min: 2, max: None })]);
        let Stmt::Seq(stmts) = entry_body(&c) else {
            panic!("frame body is a sequence");
        };
        let Stmt::SplitList { frames, .. } = &stmts[0] else {
            panic!("first statement declares the split list");
        };
        assert_eq!(frames.len(), 2);
    }

    #[test]
    fn conjuncts_drop_other_type_leaves_inside_an_arm() {
        let c = Constraint::And(vec![Constraint::Integer, Constraint::UniqueItems, Constraint::Valid]);
        let parts = conjuncts(&c, Some(ValueType::Number)).unwrap();
        assert_eq!(parts, vec![&Constraint::Integer]);
        assert!(conjuncts(&Constraint::And(vec![Constraint::Invalid]), None).is_none());
    }
}

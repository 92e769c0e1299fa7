//! Shared helpers for the integration tests.
//!
//! [`oracle`] evaluates a constraint tree directly against a parsed
//! `serde_json::Value`. The compiled pipeline must agree with it on every
//! document; the tests compare the two instead of hard-coding expectations
//! where the exact failure code does not matter.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use jvst::{CompileOptions, CompiledSchema, Constraint, CountRange, Pattern, TypeSwitch, ValueType, Verdict};
use regex::Regex;
use serde_json::Value;

/// Compiles `c` with default options, panicking on compile errors.
pub fn compile(c: &Constraint) -> CompiledSchema {
    CompiledSchema::compile(c).unwrap_or_else(|err| panic!("compile failed: {err}"))
}

/// Validates `doc` in one chunk.
pub fn check(c: &Constraint, doc: &str) -> Verdict {
    compile(c).validate(doc.as_bytes()).unwrap()
}

/// Validates `doc` in chunks of `size` bytes.
pub fn check_chunked(schema: &CompiledSchema, doc: &str, size: usize) -> Verdict {
    let mut validator = schema.validator();
    for chunk in doc.as_bytes().chunks(size.max(1)) {
        validator.validate_more(chunk).unwrap();
    }
    validator.validate_close().unwrap()
}

/// Asserts the compiled schema (with and without slot reuse, whole and
/// byte-at-a-time) agrees with the oracle on every document.
pub fn assert_agrees(c: &Constraint, docs: &[&str]) {
    let packed = compile(c);
    let naive = CompiledSchema::compile_with(c, CompileOptions { reuse_slots: false }).unwrap();
    for doc in docs {
        let value: Value = serde_json::from_str(doc).unwrap_or_else(|err| panic!("bad fixture {doc}: {err}"));
        let expected = oracle(c, &value);
        let got = packed.validate(doc.as_bytes()).unwrap();
        assert_eq!(got.is_valid(), expected, "schema {c:?}\ndocument {doc}\ngot {got:?}");
        assert_eq!(naive.validate(doc.as_bytes()).unwrap(), got, "slot reuse changed the verdict for {doc}");
        assert_eq!(check_chunked(&packed, doc, 1), got, "chunking changed the verdict for {doc}");
    }
}

/// Switch accepting only `ty` with no further constraint.
pub fn type_is(ty: ValueType) -> Constraint {
    Constraint::only(ty, Constraint::Valid)
}

pub fn count(min: usize, max: Option<usize>) -> CountRange {
    CountRange { min, max }
}

/// Reference semantics of a constraint tree.
pub fn oracle(c: &Constraint, v: &Value) -> bool {
    match c {
        Constraint::Valid => true,
        Constraint::Invalid => false,
        Constraint::And(cs) => cs.iter().all(|c| oracle(c, v)),
        Constraint::Or(cs) => cs.iter().any(|c| oracle(c, v)),
        Constraint::Xor(cs) => cs.iter().filter(|c| oracle(c, v)).count() == 1,
        Constraint::Not(c) => !oracle(c, v),
        Constraint::Switch(sw) => oracle(arm(sw, v), v),
        Constraint::NumRange(r) => v.as_f64().is_none_or(|x| {
            let lo = r.min.is_none_or(|m| if r.exclusive_min { x > m } else { x >= m });
            let hi = r.max.is_none_or(|m| if r.exclusive_max { x < m } else { x <= m });
            lo && hi
        }),
        Constraint::Integer => v.as_f64().is_none_or(|x| x.fract() == 0.0),
        Constraint::MultipleOf(d) => v.as_f64().is_none_or(|x| {
            let q = x / d;
            q.is_finite() && q.fract() == 0.0
        }),
        Constraint::Length(r) => v.as_str().is_none_or(|s| in_range(s.chars().count(), *r)),
        Constraint::Pattern(p) => v.as_str().is_none_or(|s| Regex::new(p).unwrap().is_match(s)),
        Constraint::Properties(pm) => v.as_object().is_none_or(|obj| {
            obj.iter().all(|(name, value)| {
                let matched: Vec<&Constraint> = pm
                    .rules
                    .iter()
                    .filter(|rule| pattern_matches(&rule.pattern, name))
                    .map(|rule| &rule.constraint)
                    .collect();
                if matched.is_empty() {
                    oracle(&pm.additional, value)
                } else {
                    matched.into_iter().all(|c| oracle(c, value))
                }
            })
        }),
        Constraint::PropertyCount(r) => v.as_object().is_none_or(|obj| in_range(obj.len(), *r)),
        Constraint::Required(names) => v
            .as_object()
            .is_none_or(|obj| names.iter().all(|n| obj.contains_key(n))),
        Constraint::Items(items) => v.as_array().is_none_or(|arr| {
            arr.iter()
                .enumerate()
                .all(|(i, item)| oracle(items.tuple.get(i).unwrap_or(&items.additional), item))
        }),
        Constraint::ItemCount(r) => v.as_array().is_none_or(|arr| in_range(arr.len(), *r)),
        Constraint::UniqueItems => v.as_array().is_none_or(|arr| {
            arr.iter()
                .enumerate()
                .all(|(i, a)| arr[..i].iter().all(|b| !json_eq(a, b)))
        }),
        Constraint::Contains(c) => v.as_array().is_none_or(|arr| arr.iter().any(|item| oracle(c, item))),
    }
}

fn arm<'a>(sw: &'a TypeSwitch, v: &Value) -> &'a Constraint {
    let ty = match v {
        Value::Null => ValueType::Null,
        Value::Bool(_) => ValueType::Boolean,
        Value::Number(_) => ValueType::Number,
        Value::String(_) => ValueType::String,
        Value::Object(_) => ValueType::Object,
        Value::Array(_) => ValueType::Array,
    };
    sw.arm(ty)
}

fn in_range(n: usize, r: CountRange) -> bool {
    n >= r.min && r.max.is_none_or(|max| n <= max)
}

fn pattern_matches(p: &Pattern, name: &str) -> bool {
    match p {
        Pattern::Literal(lit) => lit == name,
        Pattern::Regex(re) => Regex::new(re).unwrap().is_match(name),
    }
}

/// JSON equality with numbers compared by value.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y)),
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len() && xs.iter().all(|(k, x)| ys.get(k).is_some_and(|y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

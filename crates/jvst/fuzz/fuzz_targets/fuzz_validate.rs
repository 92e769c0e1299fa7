//! Fuzz target: validate arbitrary bytes against a fixed schema.
//!
//! The first byte picks a chunk size; the rest is the document. The verdict
//! must not depend on how the document is split, and malformed input must
//! come back as a verdict rather than a panic or a `VmError`.

#![no_main]

use std::sync::LazyLock;

use jvst::{
    CompiledSchema, Constraint, CountRange, Items, LimitedTracker, NoopTracer, NumRange, Pattern, PropertyMatch,
    PropertyRule, ResourceLimits, ValueType, Verdict,
};
use libfuzzer_sys::fuzz_target;

static SCHEMA: LazyLock<CompiledSchema> = LazyLock::new(|| {
    let leaf = Constraint::Or(vec![
        Constraint::only(ValueType::Number, Constraint::NumRange(NumRange {
            min: Some(0.0),
            ..NumRange::default()
        })),
        Constraint::only(ValueType::String, Constraint::Pattern("^[a-z]+$".to_owned())),
        Constraint::only(ValueType::Array, Constraint::UniqueItems),
    ]);
    let schema = Constraint::And(vec![
        Constraint::Properties(PropertyMatch {
            rules: vec![PropertyRule {
                pattern: Pattern::Literal("k".to_owned()),
                constraint: Constraint::Xor(vec![leaf.clone(), Constraint::Integer]),
            }],
            additional: Box::new(leaf.clone()),
        }),
        Constraint::Items(Items {
            tuple: vec![Constraint::Not(Box::new(Constraint::only(ValueType::Null, Constraint::Valid)))],
            additional: Box::new(leaf),
        }),
        Constraint::ItemCount(CountRange { min: 0, max: Some(64) }),
        Constraint::Contains(Box::new(Constraint::Integer)),
    ]);
    CompiledSchema::compile(&schema).expect("fuzz schema compiles")
});

fn run(document: &[u8], size: usize) -> Option<Verdict> {
    let limits = ResourceLimits::new().max_instructions(1_000_000).max_call_depth(Some(64));
    let mut validator = SCHEMA.validator_with(LimitedTracker::new(limits), NoopTracer);
    for chunk in document.chunks(size) {
        validator.validate_more(chunk).ok()?;
    }
    validator.validate_close().ok()
}

fuzz_target!(|data: &[u8]| {
    let Some((&first, document)) = data.split_first() else {
        return;
    };
    if document.len() > 4096 {
        return;
    }
    let size = usize::from(first % 16) + 1;

    let whole = run(document, document.len().max(1));
    let chunked = run(document, size);
    // resource errors are allowed, but only identically for both runs
    assert_eq!(whole, chunked, "chunks of {size} changed the verdict");
});

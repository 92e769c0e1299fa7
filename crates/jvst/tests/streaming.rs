//! Incremental validation: chunked input, malformed documents, resource limits
//! and tracing.

mod common;

use common::{check, check_chunked, compile, count, type_is};
use jvst::{
    CompiledSchema, Constraint, CoverageTracer, InvalidCode, Items, LimitedTracker, NoopTracer, ProfilingTracer,
    RecordingTracer, ResourceError, ResourceLimits, ResourceTracker, Status, TraceEvent, ValueType, Verdict, VmError,
};

fn items_of(c: Constraint) -> Constraint {
    Constraint::Items(Items {
        tuple: vec![],
        additional: Box::new(c),
    })
}

fn layered() -> Constraint {
    Constraint::And(vec![
        Constraint::Or(vec![
            type_is(ValueType::Array),
            Constraint::only(ValueType::Object, Constraint::Required(vec!["k".to_owned()])),
        ]),
        items_of(Constraint::Xor(vec![
            type_is(ValueType::Number),
            Constraint::only(ValueType::Array, Constraint::UniqueItems),
        ])),
        Constraint::Contains(Box::new(Constraint::only(ValueType::Number, Constraint::Integer))),
    ])
}

const LAYERED_DOCS: &[&str] = &[
    "[1, 2.5, [3, 4]]",
    "[1.5, [3, 3]]",
    "[2.5]",
    r#"{"k": [1, 1]}"#,
    r#"{"j": 1}"#,
    r#"[[{"a": "bé"}, {"a": "bé "}], 7]"#,
    "[]",
    "  [ 1 ,\n 2 ]  ",
];

#[test]
fn every_chunk_size_gives_the_same_verdict() {
    let schema = compile(&layered());
    for doc in LAYERED_DOCS {
        let whole = schema.validate(doc.as_bytes()).unwrap();
        for size in 1..=doc.len() {
            assert_eq!(check_chunked(&schema, doc, size), whole, "{doc} in chunks of {size}");
        }
    }
}

#[test]
fn verdict_arrives_as_soon_as_it_is_known() {
    let schema = compile(&type_is(ValueType::Number));
    let mut validator = schema.validator();
    assert_eq!(
        validator.validate_more(b"[1, ").unwrap(),
        Status::Invalid(InvalidCode::UnexpectedToken)
    );
    assert_eq!(validator.validate_more(b"2]").unwrap(), Status::Invalid(InvalidCode::UnexpectedToken));
    assert_eq!(validator.validate_close().unwrap(), Verdict::Invalid(InvalidCode::UnexpectedToken));
}

#[test]
fn numbers_wait_for_a_delimiter() {
    let schema = compile(&type_is(ValueType::Number));
    let mut validator = schema.validator();
    assert_eq!(validator.validate_more(b"1").unwrap(), Status::NeedMore);
    assert_eq!(validator.validate_more(b"2").unwrap(), Status::NeedMore);
    assert_eq!(validator.validate_close().unwrap(), Verdict::Valid);
}

#[test]
fn close_is_final() {
    let schema = compile(&Constraint::Valid);
    let mut validator = schema.validator();
    validator.validate_more(b"{}").unwrap();
    assert_eq!(validator.validate_close().unwrap(), Verdict::Valid);
    assert_eq!(validator.validate_close().unwrap(), Verdict::Valid);
    assert!(matches!(validator.validate_more(b" "), Err(VmError::Closed)));
}

#[test]
fn malformed_documents_are_invalid_json() {
    let schema = compile(&layered());
    for doc in ["", "[1,]", r#"{"a" 1}"#, "[1 2]", "{]", "01", "[1.]", r#"["\x"]"#, "[tru]", "[1", r#"["\ud800"]"#] {
        assert_eq!(
            schema.validate(doc.as_bytes()).unwrap(),
            Verdict::Invalid(InvalidCode::InvalidJson),
            "{doc:?}"
        );
    }
}

#[test]
fn lexer_error_is_reported() {
    let schema = compile(&Constraint::Valid);
    let mut validator = schema.validator();
    assert_eq!(validator.validate_more(b"[1, }").unwrap(), Status::Invalid(InvalidCode::InvalidJson));
    let err = validator.lexer_error().expect("lexer error recorded");
    assert_eq!(err.offset, 4);
}

#[test]
fn trailing_content_after_the_value() {
    let schema = compile(&Constraint::Valid);
    assert_eq!(check(&Constraint::Valid, "1   \n"), Verdict::Valid);
    assert_eq!(check(&Constraint::Valid, "1 2"), Verdict::Invalid(InvalidCode::InvalidJson));
    assert_eq!(check(&Constraint::Valid, "{} x"), Verdict::Invalid(InvalidCode::InvalidJson));

    let mut validator = schema.validator();
    assert_eq!(validator.validate_more(br#"{"a": 1}"#).unwrap(), Status::Valid);
    assert_eq!(validator.validate_more(b"  ").unwrap(), Status::Valid);
    assert_eq!(validator.validate_more(b"[").unwrap(), Status::Invalid(InvalidCode::InvalidJson));
    assert_eq!(validator.validate_close().unwrap(), Verdict::Invalid(InvalidCode::InvalidJson));
}

#[test]
fn instruction_limit() {
    let schema = compile(&items_of(Constraint::Integer));
    let mut validator = schema.validator_with(LimitedTracker::new(ResourceLimits::new().max_instructions(20)), NoopTracer);
    let err = validator.validate_more(b"[1, 2, 3, 4, 5, 6, 7, 8, 9]").unwrap_err();
    assert!(
        matches!(err, VmError::Resource(ResourceError::Instructions { limit: 20, .. })),
        "{err}"
    );

    let mut roomy = schema.validator_with(LimitedTracker::new(ResourceLimits::new().max_instructions(10_000)), NoopTracer);
    roomy.validate_more(b"[1, 2, 3]").unwrap();
    assert_eq!(roomy.validate_close().unwrap(), Verdict::Valid);
    assert!(roomy.tracker().instruction_count().is_some_and(|n| n > 0));
}

#[test]
fn call_depth_limit() {
    let nested = items_of(items_of(items_of(Constraint::Integer)));
    let schema = compile(&nested);
    let shallow = LimitedTracker::new(ResourceLimits::new().max_call_depth(Some(2)));
    let mut validator = schema.validator_with(shallow, NoopTracer);
    let err = validator.validate_more(b"[[[1]]]").unwrap_err();
    assert!(matches!(err, VmError::Resource(ResourceError::CallDepth { limit: 2, .. })), "{err}");

    let shallow = LimitedTracker::new(ResourceLimits::new().max_call_depth(Some(2)));
    let mut validator = schema.validator_with(shallow, NoopTracer);
    validator.validate_more(b"[1]").unwrap();
    assert_eq!(validator.validate_close().unwrap(), Verdict::Valid);
}

#[test]
fn buffer_limit_only_binds_during_replay() {
    let limits = ResourceLimits::new().max_buffered_tokens(4);

    let plain = compile(&items_of(Constraint::Valid));
    let mut validator = plain.validator_with(LimitedTracker::new(limits.clone()), NoopTracer);
    validator.validate_more(b"[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]").unwrap();
    assert_eq!(validator.validate_close().unwrap(), Verdict::Valid);

    let unique = compile(&Constraint::UniqueItems);
    let mut validator = unique.validator_with(LimitedTracker::new(limits), NoopTracer);
    let err = validator.validate_more(b"[[1, 2, 3, 4, 5, 6]]").unwrap_err();
    assert!(matches!(err, VmError::Resource(ResourceError::Buffer { limit: 4, .. })), "{err}");
}

#[test]
fn recording_tracer_sees_splits_and_suspensions() {
    let schema = compile(&Constraint::Or(vec![
        type_is(ValueType::Null),
        Constraint::only(ValueType::Array, Constraint::ItemCount(count(2, None))),
    ]));
    let mut validator = schema.validator_with(LimitedTracker::new(ResourceLimits::new()), RecordingTracer::new());
    assert_eq!(validator.validate_more(b"[1,").unwrap(), Status::NeedMore);
    assert_eq!(validator.validate_more(b" 2]").unwrap(), Status::Valid);
    assert_eq!(validator.validate_close().unwrap(), Verdict::Valid);

    let events = validator.into_tracer().into_events();
    assert!(events.iter().any(|e| matches!(e, TraceEvent::SplitStart { branches: 2, .. })));
    assert!(events.iter().any(|e| matches!(e, TraceEvent::SplitEnd { result: 1, .. })));
    assert!(events.iter().any(|e| matches!(e, TraceEvent::Suspend { .. })));
    assert!(events.iter().any(|e| matches!(e, TraceEvent::Call { depth: 2, .. })));
    assert!(matches!(events.last(), Some(TraceEvent::Return { code: 0, depth: 0 })));
}

#[test]
fn recording_tracer_respects_its_limit() {
    let schema = compile(&items_of(Constraint::Integer));
    let mut validator = schema.validator_with(jvst::NoLimitTracker, RecordingTracer::with_limit(5));
    validator.validate_more(b"[1, 2, 3, 4]").unwrap();
    validator.validate_close().unwrap();
    assert_eq!(validator.tracer().events().len(), 5);
}

#[test]
fn profiling_and_coverage() {
    let schema: CompiledSchema = compile(&layered());
    let mut validator = schema.validator_with(jvst::NoLimitTracker, ProfilingTracer::new());
    validator.validate_more(b"[1, [2, 3]]").unwrap();
    assert_eq!(validator.validate_close().unwrap(), Verdict::Valid);
    let report = validator.tracer().report();
    assert!(report.total_instructions > 0);
    assert!(report.total_splits >= 1);
    assert!(report.max_depth >= 2);
    assert_eq!(
        report.opcode_counts.iter().map(|(_, n)| n).sum::<u64>(),
        report.total_instructions
    );
    assert!(report.to_string().contains("Opcode Frequency"));

    let mut validator = schema.validator_with(jvst::NoLimitTracker, CoverageTracer::new());
    validator.validate_more(b"[1]").unwrap();
    validator.validate_close().unwrap();
    let covered = validator.tracer().coverage_count();
    assert!(covered > 0 && covered < schema.program().len());
}

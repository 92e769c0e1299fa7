//! Keyword-level behavior of compiled schemas.

mod common;

use common::{assert_agrees, check, count, type_is};
use jvst::{
    Constraint, InvalidCode, Items, NumRange, Pattern, PropertyMatch, PropertyRule, TypeSwitch, ValueType, Verdict,
};

fn invalid(code: InvalidCode) -> Verdict {
    Verdict::Invalid(code)
}

fn prop(name: &str, c: Constraint) -> PropertyRule {
    PropertyRule {
        pattern: Pattern::Literal(name.to_owned()),
        constraint: c,
    }
}

fn props(rules: Vec<PropertyRule>, additional: Constraint) -> Constraint {
    Constraint::Properties(PropertyMatch {
        rules,
        additional: Box::new(additional),
    })
}

fn items(tuple: Vec<Constraint>, additional: Constraint) -> Constraint {
    Constraint::Items(Items {
        tuple,
        additional: Box::new(additional),
    })
}

const MIXED_DOCS: &[&str] = &[
    "null",
    "true",
    "false",
    "0",
    "-1",
    "1.5",
    "1e3",
    r#""""#,
    r#""abc""#,
    "{}",
    "[]",
    r#"{"a": 1}"#,
    r#"{"a": {"b": [1, 2, {"c": null}]}}"#,
    "[1, [2, [3, [4]]]]",
    r#"[{"a": 1}, {"a": 1}]"#,
];

#[test]
fn empty_schema_accepts_everything() {
    assert_agrees(&Constraint::Valid, MIXED_DOCS);
    for doc in MIXED_DOCS {
        assert_eq!(check(&Constraint::Valid, doc), Verdict::Valid, "{doc}");
    }
}

#[test]
fn false_schema_rejects_everything() {
    assert_agrees(&Constraint::Invalid, MIXED_DOCS);
}

#[test]
fn type_number() {
    let schema = type_is(ValueType::Number);
    assert_eq!(check(&schema, "1"), Verdict::Valid);
    assert_eq!(check(&schema, "1.1"), Verdict::Valid);
    for doc in [r#""1""#, "{}", "[]", "true", "null"] {
        assert_eq!(check(&schema, doc), invalid(InvalidCode::UnexpectedToken), "{doc}");
    }
}

#[test]
fn type_integer() {
    let schema = Constraint::only(ValueType::Number, Constraint::Integer);
    assert_eq!(check(&schema, "1"), Verdict::Valid);
    assert_eq!(check(&schema, "1.0"), Verdict::Valid);
    assert_eq!(check(&schema, "1.1"), invalid(InvalidCode::NotInteger));
    assert_eq!(check(&schema, r#""1""#), invalid(InvalidCode::UnexpectedToken));
}

#[test]
fn number_leaves_ignore_other_types() {
    assert_eq!(check(&Constraint::Integer, r#""x""#), Verdict::Valid);
    assert_eq!(check(&Constraint::Integer, "[1.5]"), Verdict::Valid);
    assert_eq!(check(&Constraint::Integer, "2.5"), invalid(InvalidCode::NotInteger));
}

#[test]
fn number_ranges() {
    let inclusive = Constraint::NumRange(NumRange {
        min: Some(0.0),
        max: Some(10.0),
        ..NumRange::default()
    });
    assert_eq!(check(&inclusive, "0"), Verdict::Valid);
    assert_eq!(check(&inclusive, "10"), Verdict::Valid);
    assert_eq!(check(&inclusive, "-0.1"), invalid(InvalidCode::NumberOutOfRange));
    assert_eq!(check(&inclusive, "10.5"), invalid(InvalidCode::NumberOutOfRange));

    let exclusive = Constraint::NumRange(NumRange {
        min: Some(0.0),
        exclusive_min: true,
        max: Some(10.0),
        exclusive_max: true,
    });
    assert_eq!(check(&exclusive, "0"), invalid(InvalidCode::NumberOutOfRange));
    assert_eq!(check(&exclusive, "10"), invalid(InvalidCode::NumberOutOfRange));
    assert_eq!(check(&exclusive, "5"), Verdict::Valid);
    assert_agrees(&exclusive, &["-1", "0", "1e-9", "9.999", "10", "1e2", r#""5""#]);
}

#[test]
fn multiple_of() {
    let schema = Constraint::MultipleOf(0.5);
    assert_eq!(check(&schema, "1.5"), Verdict::Valid);
    assert_eq!(check(&schema, "-2"), Verdict::Valid);
    assert_eq!(check(&schema, "1.3"), invalid(InvalidCode::NotMultiple));
    assert_agrees(&Constraint::MultipleOf(3.0), &["0", "3", "-9", "10", "4.5", "null"]);
}

#[test]
fn string_length_counts_code_points() {
    let schema = Constraint::Length(count(2, Some(3)));
    assert_eq!(check(&schema, r#""éé""#), Verdict::Valid);
    assert_eq!(check(&schema, r#""é😀""#), Verdict::Valid);
    assert_eq!(check(&schema, r#""é""#), invalid(InvalidCode::LengthTooShort));
    assert_eq!(check(&schema, r#""abcd""#), invalid(InvalidCode::LengthTooLong));
    assert_eq!(check(&schema, "12345"), Verdict::Valid);
}

#[test]
fn string_pattern() {
    let schema = Constraint::Pattern("^a+$".to_owned());
    assert_eq!(check(&schema, r#""aaa""#), Verdict::Valid);
    assert_eq!(check(&schema, r#""ab""#), invalid(InvalidCode::PatternMismatch));
    assert_agrees(&schema, &[r#""a""#, r#""""#, r#""ba""#, "1", "[]"]);
}

#[test]
fn property_count_boundaries() {
    let schema = Constraint::PropertyCount(count(1, Some(2)));
    assert_eq!(check(&schema, "{}"), invalid(InvalidCode::TooFewProperties));
    assert_eq!(check(&schema, r#"{"a": 1}"#), Verdict::Valid);
    assert_eq!(check(&schema, r#"{"a": 1, "b": [2]}"#), Verdict::Valid);
    assert_eq!(
        check(&schema, r#"{"a": 1, "b": 2, "c": {}}"#),
        invalid(InvalidCode::TooManyProperties)
    );
    assert_eq!(check(&schema, "[]"), Verdict::Valid);
    assert_eq!(check(&schema, "7"), Verdict::Valid);
}

#[test]
fn required_properties() {
    let schema = Constraint::Required(vec!["a".to_owned(), "b".to_owned()]);
    assert_eq!(check(&schema, r#"{"b": 2, "a": 1}"#), Verdict::Valid);
    assert_eq!(check(&schema, r#"{"a": 1}"#), invalid(InvalidCode::MissingRequiredProperties));
    assert_eq!(check(&schema, r#"{"c": {"a": 1, "b": 2}}"#), invalid(InvalidCode::MissingRequiredProperties));
    assert_eq!(check(&schema, r#"["a", "b"]"#), Verdict::Valid);
    assert_eq!(check(&schema, "null"), Verdict::Valid);
}

#[test]
fn many_required_properties_span_bitvectors() {
    let names: Vec<String> = (0..70).map(|i| format!("p{i}")).collect();
    let schema = Constraint::Required(names.clone());
    let all = format!(
        "{{{}}}",
        names.iter().map(|n| format!("\"{n}\": 0")).collect::<Vec<_>>().join(", ")
    );
    assert_eq!(check(&schema, &all), Verdict::Valid);
    let missing_last = format!(
        "{{{}}}",
        names[..69].iter().map(|n| format!("\"{n}\": 0")).collect::<Vec<_>>().join(", ")
    );
    assert_eq!(check(&schema, &missing_last), invalid(InvalidCode::MissingRequiredProperties));
}

#[test]
fn property_values() {
    let schema = props(
        vec![
            prop("id", Constraint::only(ValueType::Number, Constraint::Integer)),
            PropertyRule {
                pattern: Pattern::Regex("^x_".to_owned()),
                constraint: type_is(ValueType::String),
            },
        ],
        Constraint::Invalid,
    );
    assert_eq!(check(&schema, r#"{"id": 3, "x_a": "s"}"#), Verdict::Valid);
    assert_eq!(check(&schema, r#"{"id": 3.5}"#), invalid(InvalidCode::NotInteger));
    assert_eq!(check(&schema, r#"{"x_a": 1}"#), invalid(InvalidCode::UnexpectedToken));
    assert_eq!(check(&schema, r#"{"other": 1}"#), invalid(InvalidCode::BadPropertyName));
    assert_agrees(
        &schema,
        &[
            "{}",
            r#"{"id": 1}"#,
            r#"{"id": "1"}"#,
            r#"{"x_": "", "x_b": "b"}"#,
            r#"{"x_": {}}"#,
            r#"{"idx": 1}"#,
            "[1]",
        ],
    );
}

#[test]
fn overlapping_property_rules_all_apply() {
    let schema = props(
        vec![
            prop("ab", Constraint::NumRange(NumRange {
                min: Some(0.0),
                ..NumRange::default()
            })),
            PropertyRule {
                pattern: Pattern::Regex("b$".to_owned()),
                constraint: Constraint::Integer,
            },
        ],
        type_is(ValueType::String),
    );
    assert_agrees(
        &schema,
        &[
            r#"{"ab": 1}"#,
            r#"{"ab": -1}"#,
            r#"{"ab": 1.5}"#,
            r#"{"cb": -1}"#,
            r#"{"cb": 1.5}"#,
            r#"{"zz": 1}"#,
            r#"{"zz": "s"}"#,
        ],
    );
}

fn regex(source: &str, c: Constraint) -> PropertyRule {
    PropertyRule {
        pattern: Pattern::Regex(source.to_owned()),
        constraint: c,
    }
}

fn at_least(min: f64) -> Constraint {
    Constraint::only(
        ValueType::Number,
        Constraint::NumRange(NumRange {
            min: Some(min),
            ..NumRange::default()
        }),
    )
}

#[test]
fn many_regex_rules_each_apply() {
    // "p10" matches both "^p1" and "^p10"
    let rules = (0..14).map(|i| regex(&format!("^p{i}"), at_least(f64::from(i)))).collect();
    let schema = props(rules, Constraint::Invalid);

    assert_eq!(check(&schema, r#"{"p1": 5, "p0": 0}"#), Verdict::Valid);
    assert_eq!(check(&schema, r#"{"p10": 10}"#), Verdict::Valid);
    assert_eq!(check(&schema, r#"{"p10": 5}"#), invalid(InvalidCode::NumberOutOfRange));
    assert_eq!(check(&schema, r#"{"p13x": 1}"#), invalid(InvalidCode::NumberOutOfRange));
    assert_eq!(check(&schema, r#"{"p11": "x"}"#), invalid(InvalidCode::UnexpectedToken));
    assert_eq!(check(&schema, r#"{"q": 1}"#), invalid(InvalidCode::BadPropertyName));
    assert_agrees(
        &schema,
        &[
            "{}",
            r#"{"p0": 0, "p12": 13}"#,
            r#"{"p12": 12}"#,
            r#"{"p13": 13, "p2": 2, "p9": 9}"#,
            r#"{"p13": {"p1": 0}}"#,
            r#"{"p1": 0}"#,
            r#"{"x": null}"#,
            "[1]",
        ],
    );
}

#[test]
fn regex_rules_from_separate_property_groups() {
    let first = props(
        (0..7).map(|i| regex(&format!("^a{i}"), at_least(f64::from(i)))).collect(),
        type_is(ValueType::String),
    );
    let second = props(
        vec![regex("x$", Constraint::Integer), regex("^a1", Constraint::Integer), prop("a1x", at_least(1.0))],
        Constraint::Valid,
    );
    let schema = Constraint::And(vec![first, second]);
    assert_eq!(check(&schema, r#"{"a1x": 1.5}"#), invalid(InvalidCode::NotInteger));
    assert_agrees(
        &schema,
        &[
            r#"{"a1": 1}"#,
            r#"{"a1": 1.5}"#,
            r#"{"a2x": 2}"#,
            r#"{"a2x": 2.5}"#,
            r#"{"zx": "s"}"#,
            r#"{"zx": 1}"#,
            r#"{"zz": "s"}"#,
            r#"{"zz": 1}"#,
            r#"{"a1x": 1}"#,
            r#"{"a1x": 0}"#,
            r#"{"a6a1": 6}"#,
            r#"{"a6a1": 5}"#,
        ],
    );
}

#[test]
fn any_of_needs_one_branch() {
    let schema = Constraint::Or(vec![type_is(ValueType::Number), type_is(ValueType::String)]);
    assert_eq!(check(&schema, "1"), Verdict::Valid);
    assert_eq!(check(&schema, r#""s""#), Verdict::Valid);
    assert_eq!(check(&schema, "null"), invalid(InvalidCode::InvalidSplitCondition));
    assert_eq!(check(&schema, r#"{"a": [1]}"#), invalid(InvalidCode::InvalidSplitCondition));
}

#[test]
fn one_of_needs_exactly_one_branch() {
    let schema = Constraint::Xor(vec![
        Constraint::Integer,
        Constraint::NumRange(NumRange {
            min: Some(0.0),
            ..NumRange::default()
        }),
    ]);
    assert_eq!(check(&schema, "-1"), Verdict::Valid);
    assert_eq!(check(&schema, "0.5"), Verdict::Valid);
    assert_eq!(check(&schema, "1"), invalid(InvalidCode::InvalidSplitCondition));
    assert_eq!(check(&schema, "-0.5"), invalid(InvalidCode::InvalidSplitCondition));
    // both branches accept non-numbers
    assert_eq!(check(&schema, r#""x""#), invalid(InvalidCode::InvalidSplitCondition));
}

#[test]
fn not_inverts() {
    let schema = Constraint::Not(Box::new(type_is(ValueType::String)));
    assert_eq!(check(&schema, "1"), Verdict::Valid);
    assert_eq!(check(&schema, "[\"a\"]"), Verdict::Valid);
    assert_eq!(check(&schema, r#""a""#), invalid(InvalidCode::InvalidSplitCondition));
}

#[test]
fn combinators_inside_type_arms() {
    let arm = Constraint::And(vec![
        Constraint::Required(vec!["kind".to_owned()]),
        Constraint::Or(vec![
            Constraint::Required(vec!["a".to_owned()]),
            Constraint::Required(vec!["b".to_owned()]),
        ]),
    ]);
    let schema = Constraint::Switch(TypeSwitch {
        object: Box::new(arm),
        ..Constraint::any_type()
    });
    assert_eq!(check(&schema, r#"{"kind": 1, "b": 2}"#), Verdict::Valid);
    assert_eq!(check(&schema, r#"{"kind": 1}"#), invalid(InvalidCode::InvalidSplitCondition));
    assert_eq!(check(&schema, r#"{"a": 1}"#), invalid(InvalidCode::MissingRequiredProperties));
    assert_eq!(check(&schema, "3"), Verdict::Valid);
}

#[test]
fn nested_splits() {
    let schema = Constraint::Or(vec![
        Constraint::Xor(vec![type_is(ValueType::Number), Constraint::Integer]),
        Constraint::Not(Box::new(Constraint::Or(vec![
            type_is(ValueType::Array),
            type_is(ValueType::Null),
        ]))),
    ]);
    assert_agrees(&schema, MIXED_DOCS);
    assert_agrees(&schema, &["1.5", "2", "[]", "null", "[[1]]"]);
}

#[test]
fn tuple_items() {
    let schema = items(
        vec![type_is(ValueType::Number), type_is(ValueType::String)],
        Constraint::Invalid,
    );
    assert_eq!(check(&schema, r#"[1, "a"]"#), Verdict::Valid);
    assert_eq!(check(&schema, "[1]"), Verdict::Valid);
    assert_eq!(check(&schema, "[]"), Verdict::Valid);
    assert_eq!(check(&schema, r#"["a"]"#), invalid(InvalidCode::UnexpectedToken));
    assert_eq!(check(&schema, r#"[1, "a", 3]"#), invalid(InvalidCode::TooManyItems));
}

#[test]
fn item_schema_applies_to_every_item() {
    let schema = items(vec![], Constraint::only(ValueType::Number, Constraint::Integer));
    assert_eq!(check(&schema, "[1, 2, 3]"), Verdict::Valid);
    assert_eq!(check(&schema, "[1, 2.5]"), invalid(InvalidCode::NotInteger));
    assert_agrees(&schema, &["[]", "[[]]", r#"[1, "2"]"#, "{}", "[0, -0, 1e2]"]);
}

#[test]
fn item_count_boundaries() {
    let schema = Constraint::ItemCount(count(1, Some(2)));
    assert_eq!(check(&schema, "[]"), invalid(InvalidCode::TooFewItems));
    assert_eq!(check(&schema, "[[1, 2, 3]]"), Verdict::Valid);
    assert_eq!(check(&schema, "[1, 2, 3]"), invalid(InvalidCode::TooManyItems));
    assert_eq!(check(&schema, r#"{"a": 1, "b": 2, "c": 3}"#), Verdict::Valid);
}

#[test]
fn unique_items_compare_values() {
    let schema = Constraint::UniqueItems;
    assert_eq!(check(&schema, "[1, 2, 3]"), Verdict::Valid);
    assert_eq!(check(&schema, "[1, 1.0]"), invalid(InvalidCode::ArrayNotUnique));
    assert_eq!(check(&schema, "[0, -0]"), invalid(InvalidCode::ArrayNotUnique));
    assert_eq!(
        check(&schema, r#"[{"a": 1, "b": 2}, {"b": 2, "a": 1}]"#),
        invalid(InvalidCode::ArrayNotUnique)
    );
    assert_eq!(check(&schema, "[[1], [1, 2]]"), Verdict::Valid);
    assert_eq!(check(&schema, r#"["1", 1]"#), Verdict::Valid);
    assert_agrees(
        &schema,
        &["[]", "[null, false, 0, \"\"]", "[[], {}]", "[[], []]", r#"[{"a": [1]}, {"a": [1.0]}]"#],
    );
}

#[test]
fn unique_items_compare_nested_members() {
    let schema = Constraint::UniqueItems;
    assert_eq!(
        check(
            &schema,
            r#"[{"a": {"x": 1, "y": [1, 2]}, "b": 2}, {"b": 2.0, "a": {"y": [1, 2.0], "x": 1}}]"#
        ),
        invalid(InvalidCode::ArrayNotUnique)
    );
    assert_agrees(
        &schema,
        &[
            r#"[{"a:": "1"}, {"a": ":1"}]"#,
            r#"[{"a": 1, "b": 2}, {"a": 1, "b": 3}]"#,
            r#"[{"a": {"b": 1}}, {"a": {"b": 1}, "c": null}]"#,
            r#"[{"": ""}, {"": ""}]"#,
        ],
    );
}

#[test]
fn contains() {
    let wanted = Constraint::only(
        ValueType::Number,
        Constraint::NumRange(NumRange {
            min: Some(5.0),
            ..NumRange::default()
        }),
    );
    let schema = Constraint::Contains(Box::new(wanted.clone()));
    assert_eq!(check(&schema, "[1, 7]"), Verdict::Valid);
    assert_eq!(check(&schema, "[1, 2]"), invalid(InvalidCode::ContainsUnsatisfied));
    assert_eq!(check(&schema, "[]"), invalid(InvalidCode::ContainsUnsatisfied));
    assert_eq!(check(&schema, "{}"), Verdict::Valid);

    let both = Constraint::And(vec![
        schema,
        Constraint::Contains(Box::new(type_is(ValueType::String))),
    ]);
    assert_eq!(check(&both, r#"["s", 9]"#), Verdict::Valid);
    assert_eq!(check(&both, "[9]"), invalid(InvalidCode::ContainsUnsatisfied));
    assert_agrees(&both, &["[]", r#"[[9], "s"]"#, r#"[5, {}, "x"]"#, r#"["x", "y"]"#]);
}

#[test]
fn document_like_schema_agrees_with_evaluator() {
    let address = Constraint::only(
        ValueType::Object,
        Constraint::And(vec![
            Constraint::Required(vec!["city".to_owned()]),
            props(
                vec![
                    prop("city", Constraint::only(ValueType::String, Constraint::Length(count(1, None)))),
                    prop("zip", Constraint::only(ValueType::String, Constraint::Pattern("^[0-9]{5}$".to_owned()))),
                ],
                Constraint::Valid,
            ),
        ]),
    );
    let schema = Constraint::only(
        ValueType::Object,
        Constraint::And(vec![
            Constraint::Required(vec!["name".to_owned(), "tags".to_owned()]),
            Constraint::PropertyCount(count(0, Some(4))),
            props(
                vec![
                    prop("name", type_is(ValueType::String)),
                    prop(
                        "tags",
                        Constraint::only(
                            ValueType::Array,
                            Constraint::And(vec![
                                Constraint::UniqueItems,
                                items(vec![], type_is(ValueType::String)),
                            ]),
                        ),
                    ),
                    prop("home", address.clone()),
                    prop("work", Constraint::Or(vec![address, type_is(ValueType::Null)])),
                ],
                Constraint::Invalid,
            ),
        ]),
    );
    assert_agrees(
        &schema,
        &[
            r#"{"name": "n", "tags": []}"#,
            r#"{"name": "n", "tags": ["a", "b"], "home": {"city": "c", "zip": "12345"}}"#,
            r#"{"name": "n", "tags": ["a", "a"]}"#,
            r#"{"name": "n", "tags": [1]}"#,
            r#"{"name": "n", "tags": [], "home": {"zip": "12345"}}"#,
            r#"{"name": "n", "tags": [], "home": {"city": "", "zip": "1"}}"#,
            r#"{"name": "n", "tags": [], "work": null}"#,
            r#"{"name": "n", "tags": [], "work": {"city": "x"}}"#,
            r#"{"name": "n", "tags": [], "work": 3}"#,
            r#"{"name": "n", "tags": [], "extra": 3}"#,
            r#"{"tags": []}"#,
            "[]",
        ],
    );
}

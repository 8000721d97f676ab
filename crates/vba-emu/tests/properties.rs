use pretty_assertions::assert_eq;
use proptest::prelude::*;
use proptest::test_runner::{Config, FileFailurePersistence, RngAlgorithm, TestRng, TestRunner};

use vba_emu::ast::BinOp;
use vba_emu::lexer::{tokenize, TokenKind};
use vba_emu::operators::{binary, CompareMode};
use vba_emu::{RecordingEnvironment, VbaProject, VbaRuntime, VbaValue};

fn runner() -> TestRunner {
    let config = Config {
        cases: 128,
        failure_persistence: Some(Box::new(FileFailurePersistence::Off)),
        ..Config::default()
    };
    TestRunner::new_with_rng(config, TestRng::deterministic_rng(RngAlgorithm::ChaCha))
}

fn eval(op: BinOp, l: &VbaValue, r: &VbaValue) -> VbaValue {
    binary(op, l, r, CompareMode::Binary).expect("operands coerce")
}

/// The value, or the error number when the operands do not coerce.
fn outcome(op: BinOp, l: &VbaValue, r: &VbaValue) -> Result<VbaValue, i32> {
    binary(op, l, r, CompareMode::Binary).map_err(|e| e.number())
}

fn evaluate(expression: &str) -> VbaValue {
    let source = format!("Attribute VB_Name = \"Calc\"\nFunction Main()\n    Main = {expression}\nEnd Function\n");
    let runtime = VbaRuntime::new(VbaProject::parse([source.as_str()]).unwrap());
    let report = runtime.execute(&mut RecordingEnvironment::new(), "Main", &[]);
    match report.returned() {
        Some(value) => value.clone(),
        None => panic!("`{expression}` did not complete: {:?}", report.outcome),
    }
}

/// Scalars that take part in comparison, including strings that do not read as numbers.
fn scalar() -> impl Strategy<Value = VbaValue> {
    prop_oneof![
        Just(VbaValue::Empty),
        any::<bool>().prop_map(VbaValue::Boolean),
        (-300i16..300).prop_map(VbaValue::Integer),
        (-70_000i32..70_000).prop_map(VbaValue::Long),
        (-1000i32..1000).prop_map(|n| VbaValue::Double(f64::from(n) / 4.0)),
        (-300i32..300).prop_map(|n| VbaValue::String(n.to_string())),
        "[a-z]{1,4}".prop_map(VbaValue::String),
    ]
}

/// Integral and floating numbers whose sums are exact.
fn number() -> impl Strategy<Value = VbaValue> {
    prop_oneof![
        (-100i16..100).prop_map(VbaValue::Integer),
        (-100_000i32..100_000).prop_map(VbaValue::Long),
        (-400i32..400).prop_map(|n| VbaValue::Double(f64::from(n) / 2.0)),
    ]
}

#[test]
fn precedence_evaluates_as_documented() {
    assert_eq!(evaluate("1 + 2 * 3 ^ 2").to_f64().unwrap(), 19.0);
    assert_eq!(evaluate("2 ^ 3 ^ 2").to_f64().unwrap(), 512.0);
    assert_eq!(evaluate("-2 ^ 2").to_f64().unwrap(), -4.0);
    assert_eq!(evaluate("10 - 4 - 3").to_f64().unwrap(), 3.0);
    assert_eq!(evaluate("7 \\ 2 * 3"), VbaValue::Integer(1));
}

#[test]
fn documented_coercions() {
    assert_eq!(
        eval(BinOp::Eq, &VbaValue::from("10"), &VbaValue::Integer(10)),
        VbaValue::Boolean(true)
    );
    assert_eq!(
        eval(BinOp::Eq, &VbaValue::Empty, &VbaValue::Integer(0)),
        VbaValue::Boolean(true)
    );
    for other in [VbaValue::Integer(0), VbaValue::from("x"), VbaValue::Null] {
        assert_eq!(eval(BinOp::Eq, &VbaValue::Null, &other), VbaValue::Null);
    }
    assert_eq!(outcome(BinOp::Lt, &VbaValue::from("+"), &VbaValue::Integer(9)), Err(13));
    assert_eq!(outcome(BinOp::Gt, &VbaValue::from("abc"), &VbaValue::Integer(9)), Err(13));
}

#[test]
fn equality_is_commutative() {
    runner()
        .run(&(scalar(), scalar()), |(a, b)| {
            prop_assert_eq!(outcome(BinOp::Eq, &a, &b), outcome(BinOp::Eq, &b, &a));
            prop_assert_eq!(outcome(BinOp::Ne, &a, &b), outcome(BinOp::Ne, &b, &a));
            prop_assert_eq!(outcome(BinOp::Lt, &a, &b), outcome(BinOp::Gt, &b, &a));
            Ok(())
        })
        .unwrap();
}

#[test]
fn promotion_ladder_is_associative() {
    runner()
        .run(&(number(), number(), number()), |(a, b, c)| {
            let left = eval(BinOp::Add, &eval(BinOp::Add, &a, &b), &c);
            let right = eval(BinOp::Add, &a, &eval(BinOp::Add, &b, &c));
            prop_assert_eq!(left.kind(), right.kind());
            prop_assert_eq!(left.to_f64().unwrap(), right.to_f64().unwrap());
            Ok(())
        })
        .unwrap();
}

#[test]
fn precedence_matches_a_reference_evaluator() {
    let ops = prop::sample::select(vec!['+', '-', '*']);
    runner()
        .run(
            &(0i64..30, ops.clone(), 0i64..30, ops, 0i64..30),
            |(a, op1, b, op2, c)| {
                let apply = |x: i64, op: char, y: i64| match op {
                    '+' => x + y,
                    '-' => x - y,
                    _ => x * y,
                };
                let expected = if op2 == '*' && op1 != '*' {
                    apply(a, op1, apply(b, op2, c))
                } else {
                    apply(apply(a, op1, b), op2, c)
                };
                let value = evaluate(&format!("{a} {op1} {b} {op2} {c}"));
                prop_assert_eq!(value.to_f64().unwrap(), expected as f64);
                Ok(())
            },
        )
        .unwrap();
}

fn statement() -> impl Strategy<Value = String> {
    let ident = "[a-z][a-z0-9]{0,5}";
    let atom = prop_oneof![
        ident.prop_map(|s| s),
        "[0-9]{1,4}(\\.[0-9]{1,2})?".prop_map(|s| s),
        "\"[a-z ]{0,5}\"".prop_map(|s| s),
        Just("&H1F".to_string()),
        Just("#1/2/2003#".to_string()),
    ];
    let op = prop::sample::select(vec!["+", "-", "*", "&", "<>", "And", "Mod"]);
    (ident, prop::collection::vec((op, atom.clone()), 0..4), atom).prop_map(|(target, rest, first)| {
        let tail: String = rest.iter().map(|(op, a)| format!(" {op} {a}")).collect();
        format!("{target} = {first}{tail}")
    })
}

#[test]
fn relexing_token_text_keeps_the_categories() {
    runner()
        .run(&prop::collection::vec(statement(), 1..5), |lines| {
            let source = lines.join("\n");
            let tokens = tokenize(&source).expect("generated statements lex");
            let rebuilt: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
            let relexed = tokenize(&rebuilt.join(" ")).expect("rebuilt text lexes");
            let kinds = |ts: &[vba_emu::lexer::Token]| ts.iter().map(|t| t.kind).collect::<Vec<TokenKind>>();
            prop_assert_eq!(kinds(&relexed), kinds(&tokens));
            Ok(())
        })
        .unwrap();
}

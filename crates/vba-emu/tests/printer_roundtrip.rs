use pretty_assertions::assert_eq;
use proptest::prelude::*;
use proptest::test_runner::{Config, FileFailurePersistence, RngAlgorithm, TestRng, TestRunner};

use vba_emu::{
    expression_text, parse_expression, parse_module, print_module, RecordingEnvironment,
    VbaProject, VbaRuntime,
};

const FIXTURES: &[(&str, &str)] = &[
    ("dropper.bas", include_str!("fixtures/dropper.bas")),
    ("Counter.cls", include_str!("fixtures/Counter.cls")),
    ("ledger.bas", include_str!("fixtures/ledger.bas")),
];

fn runner() -> TestRunner {
    let config = Config {
        cases: 256,
        failure_persistence: Some(Box::new(FileFailurePersistence::Off)),
        ..Config::default()
    };
    TestRunner::new_with_rng(config, TestRng::deterministic_rng(RngAlgorithm::ChaCha))
}

#[test]
fn printing_fixtures_is_idempotent() {
    for (name, source) in FIXTURES {
        let first = print_module(&parse_module(source).unwrap());
        let second = print_module(&parse_module(&first).unwrap());
        assert_eq!(first, second, "{name}");
    }
}

#[test]
fn printed_fixtures_keep_their_structure() {
    for (name, source) in FIXTURES {
        let original = parse_module(source).unwrap();
        let reparsed = parse_module(&print_module(&original)).unwrap();
        assert_eq!(reparsed.name, original.name, "{name}");
        assert_eq!(reparsed.kind, original.kind, "{name}");
        assert_eq!(reparsed.declarations.len(), original.declarations.len(), "{name}");
        let procedures = |m: &vba_emu::ast::Module| {
            m.procedures
                .iter()
                .map(|p| (p.name.clone(), p.kind, p.params.len(), p.body.len()))
                .collect::<Vec<_>>()
        };
        assert_eq!(procedures(&reparsed), procedures(&original), "{name}");
    }
}

#[test]
fn printed_project_behaves_like_the_original() {
    let printed: Vec<String> = FIXTURES[1..]
        .iter()
        .map(|(_, source)| print_module(&parse_module(source).unwrap()))
        .collect();
    let runtime = VbaRuntime::new(VbaProject::parse(printed.iter().map(String::as_str)).unwrap());
    for (entry, expected) in [
        ("UseCounter", "clicks=16"),
        ("UseCollection", "3:alpha;beta;gamma;beta:alpha"),
        ("UseDictionary", "2:True:11:x,y"),
        ("UseRecord", "fee 12.5 2"),
    ] {
        let report = runtime.execute(&mut RecordingEnvironment::new(), entry, &[]);
        let value = report.returned().map(|v| v.display_string());
        assert_eq!(value.as_deref(), Some(expected), "{entry}");
    }
}

fn expression() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        "v[a-z0-9]{0,4}".prop_map(|s| s),
        (0u32..100_000).prop_map(|n| n.to_string()),
        "[a-z ]{0,5}".prop_map(|s| format!("\"{s}\"")),
        Just("True".to_string()),
        Just("Nothing".to_string()),
    ];
    leaf.prop_recursive(4, 32, 3, |inner| {
        let op = prop::sample::select(vec![
            "+", "-", "*", "/", "\\", "^", "&", "=", "<>", "<", ">=", "And", "Or", "Mod", "Like",
        ]);
        prop_oneof![
            (inner.clone(), op, inner.clone()).prop_map(|(l, op, r)| format!("{l} {op} {r}")),
            inner.clone().prop_map(|e| format!("({e})")),
            inner.clone().prop_map(|e| format!("-{e}")),
            inner.clone().prop_map(|e| format!("Not {e}")),
            prop::collection::vec(inner, 0..3)
                .prop_map(|args| format!("fn({})", args.join(", "))),
        ]
    })
}

#[test]
fn expression_text_is_a_fixed_point() {
    runner()
        .run(&expression(), |source| {
            let parsed = parse_expression(&source).expect("generated expressions parse");
            let text = expression_text(&parsed);
            let reparsed = parse_expression(&text).expect("printed expressions parse");
            prop_assert_eq!(expression_text(&reparsed), text);
            Ok(())
        })
        .unwrap();
}

#[test]
fn long_chains_print_back_unchanged() {
    let source = (0..10_000).map(|i| format!("v{i}")).collect::<Vec<_>>().join(" + ");
    let parsed = parse_expression(&source).unwrap();
    assert_eq!(expression_text(&parsed), source);
}

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use proptest::test_runner::{Config, FileFailurePersistence, RngAlgorithm, TestRng, TestRunner};

use vba_emu::ast::{BinOp, ExprKind, Literal, ModuleKind, StmtKind};
use vba_emu::lexer::{tokenize, TokenKind};
use vba_emu::parser::MAX_NESTING_DEPTH;
use vba_emu::{parse_expression, parse_module, ErrorKind, VbaError};

const HEADER: &str = "Attribute VB_Name = \"Module1\"\n";

fn runner() -> TestRunner {
    let config = Config {
        cases: 128,
        failure_persistence: Some(Box::new(FileFailurePersistence::Off)),
        ..Config::default()
    };
    TestRunner::new_with_rng(config, TestRng::deterministic_rng(RngAlgorithm::ChaCha))
}

#[test]
fn multiplication_and_power_bind_tighter_than_addition() {
    let expr = parse_expression("1 + 2 * 3 ^ 2").unwrap();
    let ExprKind::Binary { op, left, right } = &expr.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinOp::Add);
    assert_eq!(left.kind, ExprKind::Literal(Literal::Integer(1)));
    let ExprKind::Binary { op, right, .. } = &right.kind else {
        panic!("expected a product");
    };
    assert_eq!(*op, BinOp::Mul);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::Pow, .. }));
}

#[test]
fn comparison_binds_tighter_than_logical_operators() {
    let expr = parse_expression("a = 1 Or b < 2 And c").unwrap();
    let ExprKind::Binary { op, right, .. } = &expr.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinOp::Or);
    assert!(matches!(right.kind, ExprKind::Binary { op: BinOp::And, .. }));
}

#[test]
fn line_continuations_join_physical_lines() {
    let tokens = tokenize("x = 1 + _\n    2\ny = 3").unwrap();
    let x_line = tokens.iter().find(|t| t.text == "2").unwrap();
    let y_line = tokens.iter().find(|t| t.text == "y").unwrap();
    assert_eq!(x_line.logical_line, 1);
    assert_eq!(x_line.position.line, 2);
    assert_eq!(y_line.logical_line, 2);
}

#[test]
fn comments_and_rem_are_dropped() {
    let tokens = tokenize("x = 1 ' trailing\nRem whole line\ny = 2").unwrap();
    let texts: Vec<_> = tokens
        .iter()
        .filter(|t| t.kind != TokenKind::EndOfLine)
        .map(|t| t.text.as_str())
        .collect();
    assert_eq!(texts, ["x", "=", "1", "y", "=", "2", ""]);
}

#[test]
fn unterminated_string_is_a_lexical_error_at_the_quote() {
    let err = tokenize("x = \"open").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lexical);
    assert_eq!(err.position().line, 1);
    assert_eq!(err.position().column, 5);
}

#[test]
fn continuation_inside_a_comment_is_reported_at_the_underscore() {
    for (source, column) in [("x = 1 ' note _\ny = 2", 14), ("Rem old _\ny = 2", 9)] {
        let err = tokenize(source).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lexical, "{source:?}");
        assert!(err.to_string().contains("inside a comment"), "{err}");
        assert_eq!((err.position().line, err.position().column), (1, column), "{source:?}");
    }
    // An underscore that does not end the comment is plain text.
    assert!(tokenize("x = 1 ' a _ b\ny = 2").is_ok());
}

#[test]
fn invalid_character_is_reported_where_it_appears() {
    let err = tokenize("x = \u{e9}").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Lexical);
    assert!(err.to_string().contains("invalid character"), "{err}");
    assert_eq!((err.position().line, err.position().column), (1, 5));

    let err = tokenize("a = 1\nb = 2 \u{b0} 3").unwrap_err();
    assert_eq!((err.position().line, err.position().column), (2, 7));
}

#[test]
fn fixed_strings_are_bounded_when_declared() {
    let ok = parse_module(&format!("{HEADER}Dim tag As String * 65535\n")).unwrap();
    assert_eq!(ok.declarations.len(), 1);
    for len in ["65536", "1000000000000", "0"] {
        let err = parse_module(&format!("{HEADER}Dim tag As String * {len}\n")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Syntax, "{len}");
        assert!(err.to_string().contains("fixed string length"), "{err}");
    }
}

#[test]
fn long_operator_chains_parse_flat() {
    let source = vec!["\"a\""; 20_000].join(" & ");
    let expr = parse_expression(&source).unwrap();
    let (leftmost, steps) = expr.binary_chain();
    assert_eq!(leftmost.kind, ExprKind::Literal(Literal::String("a".to_string())));
    assert_eq!(steps.len(), 19_999);
    assert!(steps.iter().all(|(op, _)| *op == BinOp::Concat));
}

#[test]
fn nesting_at_the_limit_parses_and_beyond_is_rejected() {
    let nested_ifs = |levels: usize| {
        let mut body = String::from("Sub Main()\n");
        body.push_str(&"If a Then\n".repeat(levels));
        body.push_str("b = 1\n");
        body.push_str(&"End If\n".repeat(levels));
        body.push_str("End Sub\n");
        format!("{HEADER}{body}")
    };
    assert!(parse_module(&nested_ifs(MAX_NESTING_DEPTH - 8)).is_ok());
    let err = parse_module(&nested_ifs(MAX_NESTING_DEPTH + 8)).unwrap_err();
    assert!(err.to_string().contains("nesting is too deep"), "{err}");
}

#[test]
fn missing_module_header_is_a_syntax_error() {
    let err = parse_module("Sub Main()\nEnd Sub\n").unwrap_err();
    assert!(matches!(err, VbaError::Syntax { .. }), "{err}");
}

#[test]
fn unclosed_block_reports_the_expected_terminator() {
    let err = parse_module(&format!("{HEADER}Sub Main()\nIf x Then\ny = 1\nEnd Sub\n")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Syntax);
    assert_eq!(err.position().line, 5);
}

#[test]
fn single_line_if_with_else() {
    let module = parse_module(&format!(
        "{HEADER}Sub Main()\nIf a Then b = 1: c = 2 Else d = 3\nEnd Sub\n"
    ))
    .unwrap();
    let StmtKind::If {
        then_body,
        else_body,
        ..
    } = &module.procedures[0].body[0].kind
    else {
        panic!("expected an If statement");
    };
    assert_eq!(then_body.len(), 2);
    assert_eq!(else_body.as_ref().map(Vec::len), Some(1));
}

#[test]
fn bare_argument_calls_and_call_keyword_agree() {
    let module = parse_module(&format!(
        "{HEADER}Sub Main()\nMsgBox \"hi\", 0\nCall MsgBox(\"hi\", 0)\nEnd Sub\n"
    ))
    .unwrap();
    let body = &module.procedures[0].body;
    let (StmtKind::Call { target: a, explicit: false }, StmtKind::Call { target: b, explicit: true }) =
        (&body[0].kind, &body[1].kind)
    else {
        panic!("expected two calls");
    };
    let ExprKind::Call { args: args_a, .. } = &a.kind else {
        panic!("expected call arguments");
    };
    let ExprKind::Call { args: args_b, .. } = &b.kind else {
        panic!("expected call arguments");
    };
    assert_eq!(args_a.len(), args_b.len());
}

#[test]
fn class_and_document_modules_are_recognized() {
    let class = parse_module(include_str!("fixtures/Counter.cls")).unwrap();
    assert_eq!(class.kind, ModuleKind::Class);
    assert_eq!(class.name, "Counter");

    let document = parse_module(
        "Attribute VB_Name = \"ThisDocument\"\nAttribute VB_Base = \"1Normal.ThisDocument\"\n",
    )
    .unwrap();
    assert_eq!(document.kind, ModuleKind::Document);
}

fn source_fragment() -> impl Strategy<Value = String> {
    let ident = "[a-zA-Z][a-zA-Z0-9_]{0,6}";
    let number = "[0-9]{1,5}(\\.[0-9]{1,3})?";
    let string = "\"[a-z ]{0,6}\"";
    let op = prop::sample::select(vec!["+", "-", "*", "/", "&", "=", "<>", "<=", "(", ")", ",", "."]);
    let piece = prop_oneof![
        ident.prop_map(|s| s),
        number.prop_map(|s| s),
        string.prop_map(|s| s),
        op.prop_map(str::to_string),
        Just("\n".to_string()),
        Just(" _\n".to_string()),
    ];
    prop::collection::vec(piece, 1..24).prop_map(|pieces| pieces.join(" "))
}

#[test]
fn token_positions_never_move_backwards() {
    runner()
        .run(&source_fragment(), |source| {
            let tokens = tokenize(&source).expect("generated fragments lex");
            for pair in tokens.windows(2) {
                prop_assert!(pair[0].position.offset <= pair[1].position.offset);
                prop_assert!(pair[0].logical_line <= pair[1].logical_line);
            }
            prop_assert!(tokens.last().is_some_and(|t| t.kind == TokenKind::EndOfFile));
            Ok(())
        })
        .unwrap();
}

#[test]
fn integer_sums_parse_left_to_right() {
    runner()
        .run(&prop::collection::vec(0i16..1000, 2..8), |terms| {
            let source = terms
                .iter()
                .map(i16::to_string)
                .collect::<Vec<_>>()
                .join(" - ");
            let root = parse_expression(&source).unwrap();
            let mut expr = &root;
            // Left-associative: the rightmost term hangs off the root.
            for term in terms.iter().skip(1).rev() {
                let ExprKind::Binary { op, left, right } = &expr.kind else {
                    return Err(TestCaseError::fail("expected a subtraction"));
                };
                prop_assert_eq!(*op, BinOp::Sub);
                prop_assert_eq!(&right.kind, &ExprKind::Literal(Literal::Integer(*term)));
                expr = &**left;
            }
            prop_assert_eq!(&expr.kind, &ExprKind::Literal(Literal::Integer(terms[0])));
            Ok(())
        })
        .unwrap();
}

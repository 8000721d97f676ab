use std::time::Duration;

use pretty_assertions::assert_eq;

use vba_emu::parser::MAX_NESTING_DEPTH;
use vba_emu::{
    Budget, EventKind, ExecutionReport, Outcome, RecordingEnvironment, VbaError, VbaProject,
    VbaRuntime, VbaSandboxPolicy, VbaValue,
};

const HEADER: &str = "Attribute VB_Name = \"Module1\"\n";

fn runtime(body: &str) -> VbaRuntime {
    let source = format!("{HEADER}{body}");
    VbaRuntime::new(VbaProject::parse([source.as_str()]).expect("source parses"))
}

fn execute(runtime: &VbaRuntime, entry: &str) -> ExecutionReport {
    runtime.execute(&mut RecordingEnvironment::new(), entry, &[])
}

fn returned(body: &str) -> String {
    let report = execute(&runtime(body), "Main");
    match report.returned() {
        Some(value) => value.display_string(),
        None => panic!("no value returned: {:?}", report.outcome),
    }
}

fn fixtures() -> VbaRuntime {
    let project = VbaProject::parse([
        include_str!("fixtures/Counter.cls"),
        include_str!("fixtures/ledger.bas"),
    ])
    .unwrap();
    VbaRuntime::new(project)
}

#[test]
fn operators_follow_the_coercion_table() {
    let value = returned(
        r#"
Function Main()
    Main = ("3" + 4) & "," & ("3" & 4) & "," & (True + 1) & "," & IsNull(Null + 1) & "," & (7 \ 2) & "," & (7 Mod 3)
End Function
"#,
    );
    assert_eq!(value, "7,34,0,True,3,1");
}

#[test]
fn declared_types_coerce_on_assignment() {
    let value = returned(
        r#"
Function Main()
    Dim i As Integer
    Dim s As String
    Dim b As Boolean
    i = 2.5
    s = 12
    b = "True"
    Main = i & "|" & s & "|" & b & "|" & TypeName(i)
End Function
"#,
    );
    // Banker's rounding: 2.5 rounds to 2.
    assert_eq!(value, "2|12|True|Integer");
}

#[test]
fn locals_shadow_module_variables() {
    let value = returned(
        r#"
Private x As String

Sub SetModule()
    x = "module"
End Sub

Function ModuleX()
    ModuleX = x
End Function

Function Main()
    Dim x
    x = "local"
    SetModule
    Main = x & "/" & ModuleX()
End Function
"#,
    );
    assert_eq!(value, "local/module");
}

#[test]
fn resume_next_continues_after_a_type_mismatch() {
    let runtime = runtime(
        r#"
Function Main()
    Dim n As Integer
    On Error Resume Next
    n = "abc"
    Main = Err.Number & "|" & n
End Function
"#,
    );
    let report = execute(&runtime, "Main");
    assert_eq!(report.returned().map(VbaValue::display_string).as_deref(), Some("13|0"));
    assert!(report.events.iter().any(|e| matches!(
        &e.kind,
        EventKind::ErrorHandled { number: 13, action } if action == "Resume Next"
    )));
}

#[test]
fn goto_handler_sees_err_and_resumes_next() {
    let value = returned(
        r#"
Function Main()
    Dim trail As String
    On Error GoTo Handler
    trail = trail & "a"
    Err.Raise 5000, "Src", "boom"
    trail = trail & "b"
    Main = trail & "|" & Err.Number
    Exit Function
Handler:
    trail = trail & "[" & Err.Number & ":" & Err.Description & "]"
    Resume Next
End Function
"#,
    );
    assert_eq!(value, "a[5000:boom]b|0");
}

#[test]
fn error_inside_an_active_handler_propagates() {
    let runtime = runtime(
        r#"
Sub Main()
    On Error GoTo Handler
    Error 5
    Exit Sub
Handler:
    Error 6
End Sub
"#,
    );
    let report = execute(&runtime, "Main");
    assert_eq!(report.outcome.error().map(VbaError::number), Some(6));
}

#[test]
fn uncaught_errors_carry_the_call_stack() {
    let runtime = runtime(
        r#"
Sub Main()
    Level1
End Sub

Sub Level1()
    Level2
End Sub

Sub Level2()
    Dim a As Integer
    a = 1 / 0
End Sub
"#,
    );
    let report = execute(&runtime, "Main");
    let Outcome::Uncaught(VbaError::Uncaught { error, call_stack }) = &report.outcome else {
        panic!("expected an uncaught error, got {:?}", report.outcome);
    };
    assert_eq!(error.number(), 11);
    let frames: Vec<_> = call_stack.iter().map(|f| f.procedure.as_str()).collect();
    assert_eq!(frames, ["Main", "Level1", "Level2"]);
    assert_eq!(call_stack[2].module, "Module1");
    assert_eq!(call_stack[2].position.line, 13);
}

#[test]
fn step_budget_cannot_be_trapped() {
    let runtime = runtime(
        r#"
Sub Main()
    On Error Resume Next
    Do
    Loop
End Sub
"#,
    )
    .with_sandbox_policy(VbaSandboxPolicy {
        max_steps: 1_000,
        ..VbaSandboxPolicy::default()
    });
    let report = execute(&runtime, "Main");
    assert!(matches!(
        report.outcome,
        Outcome::BudgetExhausted(VbaError::ResourceExhausted {
            budget: Budget::Steps,
            ..
        })
    ));
}

#[test]
fn time_budget_stops_long_loops() {
    let runtime = runtime(
        r#"
Sub Main()
    Dim i As Long
    Do While True
        i = i + 1
    Loop
End Sub
"#,
    )
    .with_sandbox_policy(VbaSandboxPolicy {
        max_steps: u64::MAX,
        max_execution_time: Duration::from_millis(20),
        ..VbaSandboxPolicy::default()
    });
    let report = execute(&runtime, "Main");
    assert!(matches!(
        report.outcome.error(),
        Some(VbaError::ResourceExhausted {
            budget: Budget::Time,
            ..
        })
    ));
}

#[test]
fn runaway_recursion_hits_the_call_depth_budget() {
    let runtime = runtime(
        r#"
Sub Main()
    Main
End Sub
"#,
    );
    let report = execute(&runtime, "Main");
    assert!(matches!(
        report.outcome,
        Outcome::BudgetExhausted(VbaError::ResourceExhausted {
            budget: Budget::CallDepth,
            ..
        })
    ));
}

#[test]
fn option_explicit_rejects_undeclared_assignment() {
    let runtime = runtime(
        r#"
Option Explicit

Sub Main()
    undeclared = 1
End Sub
"#,
    );
    let report = execute(&runtime, "Main");
    let err = report.outcome.error().unwrap();
    assert_eq!(err.number(), 424);
    assert!(matches!(
        err,
        VbaError::Uncaught { error, .. } if matches!(**error, VbaError::NameResolution { .. })
    ));
}

#[test]
fn implicit_locals_without_option_explicit() {
    assert_eq!(returned("Function Main()\n    y = 4\n    Main = y * 2\nEnd Function\n"), "8");
}

#[test]
fn static_locals_persist_between_calls() {
    let value = returned(
        r#"
Function NextId()
    Static n As Long
    n = n + 1
    NextId = n
End Function

Function Main()
    NextId
    NextId
    Main = NextId()
End Function
"#,
    );
    assert_eq!(value, "3");
}

#[test]
fn module_state_survives_between_executions() {
    let runtime = runtime(
        r#"
Dim counter As Long

Sub Bump()
    counter = counter + 1
End Sub

Function Current()
    Current = counter
End Function
"#,
    );
    execute(&runtime, "Bump");
    execute(&runtime, "Module1.Bump");
    let report = execute(&runtime, "Current");
    assert_eq!(report.returned(), Some(&VbaValue::Long(2)));
}

#[test]
fn byref_parenthesised_arguments_are_passed_by_value() {
    let value = returned(
        r#"
Sub Bump(x)
    x = x + 1
End Sub

Function Main()
    Dim a, b
    a = 1
    b = 1
    Bump a
    Bump (b)
    Main = a & b
End Function
"#,
    );
    assert_eq!(value, "21");
}

#[test]
fn param_array_collects_the_remaining_arguments() {
    let value = returned(
        r#"
Function Total(label, ParamArray xs())
    Dim x, s
    For Each x In xs
        s = s + x
    Next
    Total = label & "=" & s & "/" & (UBound(xs) + 1)
End Function

Function Main()
    Main = Total("sum", 1, 2, 3.5)
End Function
"#,
    );
    assert_eq!(value, "sum=6.5/3");
}

#[test]
fn select_case_and_loops() {
    let value = returned(
        r#"
Function Classify(n)
    Select Case n
        Case Is < 0
            Classify = "neg"
        Case 0
            Classify = "zero"
        Case 1 To 9
            Classify = "small"
        Case Else
            Classify = "big"
    End Select
End Function

Function Main()
    Dim i, out
    For i = -1 To 10 Step 11
        out = out & Classify(i) & " "
    Next i
    Do Until Len(out) > 40
        out = out & Classify(0)
    Loop
    Main = Left(out, 20)
End Function
"#,
    );
    assert_eq!(value, "neg big zerozerozero");
}

#[test]
fn arrays_redim_preserve_and_bounds() {
    let value = returned(
        r#"
Function Main()
    Dim a() As Long
    ReDim a(1 To 2)
    a(1) = 10
    a(2) = 20
    ReDim Preserve a(1 To 3)
    a(3) = 30
    Main = LBound(a) & ":" & UBound(a) & ":" & (a(1) + a(2) + a(3))
End Function
"#,
    );
    assert_eq!(value, "1:3:60");
}

#[test]
fn subscript_out_of_range_is_error_9() {
    let runtime = runtime("Sub Main()\n    Dim a(2)\n    a(5) = 1\nEnd Sub\n");
    let report = execute(&runtime, "Main");
    assert_eq!(report.outcome.error().map(VbaError::number), Some(9));
}

#[test]
fn end_terminates_the_whole_run() {
    let runtime = runtime("Sub Inner()\n    End\nEnd Sub\nSub Main()\n    Inner\n    Debug.Print \"unreachable\"\nEnd Sub\n");
    let report = execute(&runtime, "Main");
    assert_eq!(report.outcome, Outcome::Terminated);
    assert!(report.debug_output().is_empty());
}

#[test]
fn debug_print_is_reported_as_an_event() {
    let runtime = runtime("Sub Main()\n    Debug.Print \"a\"; \"b\"\n    Debug.Print \"x=\" & 1\nEnd Sub\n");
    let report = execute(&runtime, "Main");
    assert_eq!(report.debug_output(), ["ab", "x=1"]);
}

#[test]
fn unknown_entry_point_is_a_name_resolution_error() {
    let report = execute(&runtime("Sub Main()\nEnd Sub\n"), "Nope");
    let err = report.outcome.error().unwrap();
    assert_eq!(err.number(), 424);
}

#[test]
fn class_instances_dispatch_properties() {
    let report = execute(&fixtures(), "Ledger.UseCounter");
    assert_eq!(report.returned(), Some(&VbaValue::from("clicks=16")));
}

#[test]
fn native_collection() {
    let report = execute(&fixtures(), "UseCollection");
    assert_eq!(report.returned(), Some(&VbaValue::from("3:alpha;beta;gamma;beta:alpha")));
}

#[test]
fn native_dictionary_needs_no_host() {
    let runtime = fixtures();
    let mut env = RecordingEnvironment::new();
    let report = runtime.execute(&mut env, "UseDictionary", &[]);
    assert_eq!(report.returned(), Some(&VbaValue::from("2:True:11:x,y")));
    assert!(env.calls().is_empty());
}

#[test]
fn user_defined_types_and_enums() {
    let report = execute(&fixtures(), "UseRecord");
    assert_eq!(report.returned(), Some(&VbaValue::from("fee 12.5 2")));
}

#[test]
fn procedure_events_bracket_each_call() {
    let runtime = runtime("Sub Helper(ByVal n)\nEnd Sub\nSub Main()\n    Helper 7\nEnd Sub\n");
    let report = execute(&runtime, "Main");
    let kinds: Vec<_> = report
        .events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ProcedureEntered { args } => Some(format!("enter {} {args:?}", e.procedure)),
            EventKind::ProcedureExited => Some(format!("exit {}", e.procedure)),
            _ => None,
        })
        .collect();
    assert_eq!(
        kinds,
        [
            "enter Module1.Main []",
            "enter Module1.Helper [\"7\"]",
            "exit Module1.Helper",
            "exit Module1.Main",
        ]
    );
    let sequences: Vec<_> = report.events.iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn recursion_reaches_the_default_call_depth_exactly() {
    let depth = VbaSandboxPolicy::default().max_call_depth;
    let runtime = runtime(
        r#"
Function Main(n)
    Main = Down(n)
End Function

Function Down(n)
    If n <= 1 Then
        Down = 1
    Else
        Down = Down(n - 1) + 1
    End If
End Function
"#,
    );
    // `Main` plus `depth - 1` frames of `Down` fill the budget.
    let args = [VbaValue::Long(depth as i32 - 1)];
    let report = runtime.execute(&mut RecordingEnvironment::new(), "Main", &args);
    assert_eq!(report.returned().map(VbaValue::display_string), Some((depth - 1).to_string()));

    let args = [VbaValue::Long(depth as i32)];
    let report = runtime.execute(&mut RecordingEnvironment::new(), "Main", &args);
    assert!(matches!(
        report.outcome.error(),
        Some(VbaError::ResourceExhausted {
            budget: Budget::CallDepth,
            ..
        })
    ));
}

#[test]
fn blocks_nested_to_the_parser_limit_execute() {
    let levels = MAX_NESTING_DEPTH - 8;
    let mut body = String::from("Function Main()\n    Dim n\n");
    body.push_str(&"If n >= 0 Then\nn = n + 1\n".repeat(levels));
    body.push_str(&"End If\n".repeat(levels));
    body.push_str("Main = n\nEnd Function\n");
    assert_eq!(returned(&body), levels.to_string());
}

#[test]
fn long_operator_chains_evaluate() {
    let concat = vec!["\"a\""; 10_000].join(" & ");
    let value = returned(&format!("Function Main()\n    Main = Len({concat})\nEnd Function\n"));
    assert_eq!(value, "10000");

    let sum = vec!["1"; 20_000].join(" + ");
    let value = returned(&format!("Function Main()\n    Main = {sum}\nEnd Function\n"));
    assert_eq!(value, "20000");
}

#[test]
fn oversized_strings_raise_out_of_string_space() {
    let runtime = runtime(
        r#"
Function Main()
    Dim s
    On Error Resume Next
    s = String(1000000000000#, "a")
    Main = Err.Number & "|" & Err.Description & "|" & Len(s)
End Function

Sub Grow()
    Dim s
    s = "x"
    Do
        s = s & s
    Loop
End Sub
"#,
    );
    let report = execute(&runtime, "Main");
    assert_eq!(report.returned(), Some(&VbaValue::from("14|Out of string space|0")));

    let report = execute(&runtime, "Grow");
    assert_eq!(report.outcome.error().map(VbaError::number), Some(14));
}

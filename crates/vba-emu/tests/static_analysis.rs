use pretty_assertions::assert_eq;

use vba_emu::ast::{ModuleKind, ProcedureKind, Visibility};
use vba_emu::{EntryReason, VbaError, VbaProject, VbaRuntime};

fn runtime(sources: &[&str]) -> VbaRuntime {
    VbaRuntime::new(VbaProject::parse(sources.iter().copied()).expect("sources parse"))
}

fn fixtures() -> VbaRuntime {
    runtime(&[
        include_str!("fixtures/dropper.bas"),
        include_str!("fixtures/Counter.cls"),
        include_str!("fixtures/ledger.bas"),
    ])
}

#[test]
fn auto_exec_procedures_come_first_then_public_parameterless_subs() {
    let table = fixtures().analyze().unwrap();
    let entries: Vec<_> = table
        .entry_points
        .iter()
        .map(|e| (e.qualified_name(), e.reason))
        .collect();
    assert_eq!(
        entries,
        vec![
            ("NewMacros.AutoOpen".to_string(), EntryReason::AutoExec),
            ("NewMacros.Cleanup".to_string(), EntryReason::PublicSub),
        ]
    );
}

#[test]
fn symbol_table_describes_every_module() {
    let table = fixtures().analyze().unwrap();
    assert_eq!(table.modules.len(), 3);

    let counter = table.module("counter").unwrap();
    assert_eq!(counter.kind, ModuleKind::Class);
    assert!(counter.option_explicit);
    let names: Vec<_> = counter.variables.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, ["mCount", "mName"]);
    assert!(counter
        .variables
        .iter()
        .all(|v| v.visibility == Visibility::Private));
    let kinds: Vec<_> = counter.procedures.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        [
            ProcedureKind::Sub,
            ProcedureKind::PropertyGet,
            ProcedureKind::PropertyLet,
            ProcedureKind::PropertyGet,
            ProcedureKind::Sub,
        ]
    );
    let increment = counter.procedure("Increment").unwrap();
    assert!(increment.params[0].optional);
    assert!(!increment.params[0].by_ref);

    let ledger = table.module("Ledger").unwrap();
    assert_eq!(ledger.enums[0].members, ["Pending", "Done"]);
    assert_eq!(ledger.types[0].name, "Entry");
    assert_eq!(ledger.types[0].fields[1].ty, "Currency");

    let dropper = table.module("NewMacros").unwrap();
    assert_eq!(dropper.constants[0].name, "Payload");
    let auto_open = dropper.procedure("autoopen").unwrap();
    assert_eq!(auto_open.locals.len(), 2);
    assert_eq!(auto_open.calls, ["CreateObject", "Environ", "wsh.Run"]);
}

#[test]
fn external_declarations_are_listed() {
    let table = runtime(&[
        "Attribute VB_Name = \"Api\"\n\
         Private Declare PtrSafe Function URLDownloadToFileA Lib \"urlmon\" (ByVal p As LongPtr, ByVal url As String, ByVal file As String, ByVal r As Long, ByVal cb As LongPtr) As Long\n\
         Private Declare Sub Sleep Lib \"kernel32\" Alias \"SleepEx\" (ByVal ms As Long)\n",
    ])
    .analyze()
    .unwrap();
    let externals = &table.modules[0].externals;
    assert_eq!(externals.len(), 2);
    assert_eq!(externals[0].library, "urlmon");
    assert!(externals[0].is_function);
    assert_eq!(externals[1].alias.as_deref(), Some("SleepEx"));
}

#[test]
fn reserved_words_cannot_name_variables() {
    let err = runtime(&["Attribute VB_Name = \"M\"\nSub A()\nDim [Loop] As Long\nEnd Sub\n"])
        .analyze()
        .unwrap_err();
    assert!(matches!(err, VbaError::Semantic { .. }), "{err}");
    assert_eq!(err.position().line, 3);
}

#[test]
fn duplicate_procedures_are_compile_errors() {
    let err = runtime(&["Attribute VB_Name = \"M\"\nSub A()\nEnd Sub\nSub a()\nEnd Sub\n"])
        .analyze()
        .unwrap_err();
    assert!(matches!(err, VbaError::Semantic { .. }), "{err}");
}

#[test]
fn symbol_table_serializes_to_json() {
    let table = fixtures().analyze().unwrap();
    let json = serde_json::to_value(&table).unwrap();
    assert_eq!(json["entry_points"][0]["procedure"], "AutoOpen");
    assert_eq!(json["entry_points"][0]["reason"], "AutoExec");
    assert_eq!(json["modules"][1]["kind"], "Class");
    assert!(json["modules"][0]["position"]["line"].is_u64());
}

#[test]
fn long_chains_are_scanned_without_recursing_per_operator() {
    let chain = (0..12_000).map(|i| format!("Chr({})", 65 + i % 26)).collect::<Vec<_>>().join(" & ");
    let source = format!("Attribute VB_Name = \"M\"\nSub Build()\n    Dim s\n    s = {chain}\nEnd Sub\n");
    let table = runtime(&[source.as_str()]).analyze().unwrap();
    let build = table.modules[0].procedure("Build").unwrap();
    assert_eq!(build.calls, ["Chr"]);
    assert_eq!(build.locals.len(), 1);
}

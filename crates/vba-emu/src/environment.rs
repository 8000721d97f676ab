//! The capability set the interpreter calls out to for effectful operations.
//!
//! The core never performs an effect itself: object activation, process launch, file
//! writes and calls into `Declare`d libraries are all routed through [`Environment::invoke`].

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use thiserror::Error;

use crate::object_model::{VbaObject, VbaObjectRef};
use crate::value::{VbaArray, VbaValue};

/// Opaque identifier of an object or file owned by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct HostHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostCallKind {
    /// A host-routed built-in function such as `Shell` or `Environ`.
    Function,
    CreateObject,
    GetObject,
    Method,
    PropertyGet,
    PropertyLet,
    /// A procedure bound by `Declare`.
    External,
    FileOpen,
    FileWrite,
    FileClose,
    /// Elements of a host object visited by `For Each`.
    Enumerate,
}

#[derive(Debug, Clone, Copy)]
pub struct HostCall<'a> {
    pub kind: HostCallKind,
    pub operation: &'a str,
    pub target: Option<HostHandle>,
    pub args: &'a [VbaValue],
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("Object doesn't support this property or method: {0}")]
    Unsupported(String),
    #[error("{0}")]
    Failed(String),
}

impl HostError {
    /// Runtime error number the analyzed program observes.
    pub fn number(&self, kind: HostCallKind) -> i32 {
        match (self, kind) {
            (HostError::Unsupported(_), HostCallKind::CreateObject | HostCallKind::GetObject) => 429,
            (HostError::Unsupported(_), _) => 438,
            (HostError::Failed(_), _) => 5,
        }
    }
}

pub trait Environment {
    fn invoke(&mut self, call: &HostCall<'_>) -> Result<VbaValue, HostError>;

    /// Called exactly once for every handle the environment handed out.
    fn release(&mut self, _handle: HostHandle) {}
}

/// Wraps an environment-owned handle as a value the analyzed program can hold.
pub fn host_object(class: impl Into<String>, handle: HostHandle) -> VbaValue {
    VbaValue::Object(VbaObjectRef::new(VbaObject::Host {
        class: class.into(),
        handle,
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedCall {
    pub kind: HostCallKind,
    pub operation: String,
    pub target: Option<HostHandle>,
    pub args: Vec<String>,
}

/// Records every call and answers with inert values.
///
/// Objects and files get sequential handles, file writes accumulate per path, `Environ` reads
/// the configured variables, and any operation can be given a canned response.
#[derive(Debug, Default)]
pub struct RecordingEnvironment {
    calls: Vec<RecordedCall>,
    next_handle: u64,
    objects: HashMap<HostHandle, String>,
    open_files: HashMap<HostHandle, String>,
    writes: BTreeMap<String, String>,
    responses: HashMap<String, VbaValue>,
    env_vars: HashMap<String, String>,
    released: Vec<HostHandle>,
}

impl RecordingEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers every call of `operation` (case-insensitive) with `value`.
    pub fn with_response(mut self, operation: &str, value: VbaValue) -> Self {
        self.responses.insert(operation.to_ascii_lowercase(), value);
        self
    }

    pub fn with_env_var(mut self, name: &str, value: &str) -> Self {
        self.env_vars
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn calls(&self) -> &[RecordedCall] {
        &self.calls
    }

    pub fn calls_of(&self, kind: HostCallKind) -> impl Iterator<Item = &RecordedCall> {
        self.calls.iter().filter(move |c| c.kind == kind)
    }

    /// Contents written to `path` by `Print #`/`Write #`.
    pub fn written(&self, path: &str) -> Option<&str> {
        self.writes.get(path).map(String::as_str)
    }

    pub fn writes(&self) -> &BTreeMap<String, String> {
        &self.writes
    }

    pub fn released(&self) -> &[HostHandle] {
        &self.released
    }

    pub fn class_of(&self, handle: HostHandle) -> Option<&str> {
        self.objects.get(&handle).map(String::as_str)
    }

    fn allocate(&mut self, class: String) -> VbaValue {
        self.next_handle += 1;
        let handle = HostHandle(self.next_handle);
        self.objects.insert(handle, class.clone());
        host_object(class, handle)
    }

    fn first_arg(call: &HostCall<'_>) -> String {
        call.args
            .first()
            .map(VbaValue::display_string)
            .unwrap_or_default()
    }
}

impl Environment for RecordingEnvironment {
    fn invoke(&mut self, call: &HostCall<'_>) -> Result<VbaValue, HostError> {
        self.calls.push(RecordedCall {
            kind: call.kind,
            operation: call.operation.to_string(),
            target: call.target,
            args: call.args.iter().map(VbaValue::display_string).collect(),
        });
        if let Some(value) = self.responses.get(&call.operation.to_ascii_lowercase()) {
            return Ok(value.clone());
        }

        Ok(match call.kind {
            HostCallKind::CreateObject => {
                let class = Self::first_arg(call);
                self.allocate(class)
            }
            // Host globals arrive with their own name as the operation; an explicit
            // `GetObject(path, class)` names the class in its arguments.
            HostCallKind::GetObject if call.operation.eq_ignore_ascii_case("GetObject") => {
                let class = call
                    .args
                    .get(1)
                    .or_else(|| call.args.first())
                    .map(VbaValue::display_string)
                    .unwrap_or_default();
                self.allocate(class)
            }
            HostCallKind::GetObject => self.allocate(call.operation.to_string()),
            HostCallKind::FileOpen => {
                let path = Self::first_arg(call);
                let file = self.allocate("File".to_string());
                if let Some(handle) = file.as_object().and_then(|o| o.host_handle()) {
                    self.open_files.insert(handle, path.clone());
                }
                self.writes.entry(path).or_default();
                file
            }
            HostCallKind::FileWrite => {
                let path = call
                    .target
                    .and_then(|h| self.open_files.get(&h))
                    .cloned()
                    .ok_or_else(|| HostError::Failed("Bad file name or number".to_string()))?;
                let text: String = call.args.iter().map(VbaValue::display_string).collect();
                self.writes.entry(path).or_default().push_str(&text);
                VbaValue::Empty
            }
            HostCallKind::FileClose => {
                if let Some(handle) = call.target {
                    self.open_files.remove(&handle);
                }
                VbaValue::Empty
            }
            HostCallKind::Enumerate => {
                VbaValue::Array(VbaArray::from_values(0, Vec::new()).into_ref())
            }
            HostCallKind::External => VbaValue::Long(0),
            HostCallKind::Function => match call.operation.to_ascii_lowercase().as_str() {
                "environ" => {
                    let name = Self::first_arg(call).to_ascii_lowercase();
                    VbaValue::String(self.env_vars.get(&name).cloned().unwrap_or_default())
                }
                "shell" => {
                    self.next_handle += 1;
                    VbaValue::Double(self.next_handle as f64)
                }
                "msgbox" => VbaValue::Integer(1),
                "inputbox" | "dir" | "curdir" => VbaValue::String(String::new()),
                "filelen" => VbaValue::Long(0),
                _ => VbaValue::Empty,
            },
            HostCallKind::Method | HostCallKind::PropertyGet | HostCallKind::PropertyLet => {
                VbaValue::Empty
            }
        })
    }

    fn release(&mut self, handle: HostHandle) {
        self.open_files.remove(&handle);
        self.released.push(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_sequential_handles() {
        let mut env = RecordingEnvironment::new();
        let args = [VbaValue::from("WScript.Shell")];
        let call = HostCall {
            kind: HostCallKind::CreateObject,
            operation: "CreateObject",
            target: None,
            args: &args,
        };
        let first = env.invoke(&call).unwrap();
        let second = env.invoke(&call).unwrap();

        assert_eq!(first.as_object().and_then(|o| o.host_handle()), Some(HostHandle(1)));
        assert_eq!(second.as_object().and_then(|o| o.host_handle()), Some(HostHandle(2)));
        assert_eq!(env.class_of(HostHandle(1)), Some("WScript.Shell"));
        assert_eq!(env.calls().len(), 2);
    }

    #[test]
    fn unsupported_creation_maps_to_error_429() {
        let err = HostError::Unsupported("Foo.Bar".to_string());
        assert_eq!(err.number(HostCallKind::CreateObject), 429);
        assert_eq!(err.number(HostCallKind::Method), 438);
        assert_eq!(HostError::Failed("x".to_string()).number(HostCallKind::Method), 5);
    }
}

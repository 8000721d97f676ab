use std::cell::RefCell;
use std::rc::Rc;

use crate::environment::HostHandle;
use crate::operators::{compare_strings, CompareMode};
use crate::scope::Scope;
use crate::value::{ValueError, VbaArray, VbaValue};

#[derive(Clone)]
pub struct VbaObjectRef(Rc<RefCell<VbaObject>>);

impl std::fmt::Debug for VbaObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VbaObjectRef({})", self.class_name())
    }
}

impl VbaObjectRef {
    pub fn new(obj: VbaObject) -> Self {
        Self(Rc::new(RefCell::new(obj)))
    }

    pub fn borrow(&self) -> std::cell::Ref<'_, VbaObject> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> std::cell::RefMut<'_, VbaObject> {
        self.0.borrow_mut()
    }

    /// Object identity, as tested by `Is`.
    pub fn ptr_eq(&self, other: &VbaObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn class_name(&self) -> String {
        match self.0.try_borrow() {
            Ok(obj) => obj.class_name(),
            Err(_) => "Object".to_string(),
        }
    }

    pub fn is_record(&self) -> bool {
        matches!(self.0.try_borrow().as_deref(), Ok(VbaObject::Record(_)))
    }

    pub fn host_handle(&self) -> Option<HostHandle> {
        match &*self.0.try_borrow().ok()? {
            VbaObject::Host { handle, .. } => Some(*handle),
            _ => None,
        }
    }

    /// Deep copy of a user-defined record; records are values, not references.
    pub fn copied(&self) -> VbaObjectRef {
        let copy = match &*self.borrow() {
            VbaObject::Record(record) => VbaObject::Record(Record {
                type_name: record.type_name.clone(),
                fields: record.fields.copied(),
            }),
            _ => return self.clone(),
        };
        VbaObjectRef::new(copy)
    }
}

#[derive(Debug)]
pub enum VbaObject {
    Instance(ClassInstance),
    Record(Record),
    Collection(Collection),
    Dictionary(Dictionary),
    Err(ErrObject),
    Debug,
    /// An object owned by the environment, known only by its handle.
    Host { class: String, handle: HostHandle },
}

impl VbaObject {
    pub fn class_name(&self) -> String {
        match self {
            VbaObject::Instance(instance) => instance.class_name.clone(),
            VbaObject::Record(record) => record.type_name.clone(),
            VbaObject::Collection(_) => "Collection".to_string(),
            VbaObject::Dictionary(_) => "Dictionary".to_string(),
            VbaObject::Err(_) => "ErrObject".to_string(),
            VbaObject::Debug => "Debug".to_string(),
            VbaObject::Host { class, .. } => class.clone(),
        }
    }
}

/// A runtime instance of a class module. `class_module` indexes the project's modules and is
/// only used for lookup; the module owns the class definition.
#[derive(Debug)]
pub struct ClassInstance {
    pub class_module: usize,
    pub class_name: String,
    pub scope: Scope,
}

#[derive(Debug)]
pub struct Record {
    pub type_name: String,
    pub fields: Scope,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrObject {
    pub number: i32,
    pub description: String,
    pub source: String,
}

/// The native 1-based `Collection`.
#[derive(Debug, Default)]
pub struct Collection {
    items: Vec<(Option<String>, VbaValue)>,
}

impl Collection {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn values(&self) -> Vec<VbaValue> {
        self.items.iter().map(|(_, v)| v.clone()).collect()
    }

    fn position(&self, key: &VbaValue) -> Result<usize, ValueError> {
        match key {
            VbaValue::String(key) => self
                .items
                .iter()
                .position(|(k, _)| {
                    k.as_deref()
                        .is_some_and(|k| compare_strings(k, key, CompareMode::Text).is_eq())
                })
                .ok_or(ValueError::InvalidArgument),
            other => {
                let index = other.to_i64()?;
                if index < 1 || index as usize > self.items.len() {
                    return Err(ValueError::SubscriptOutOfRange);
                }
                Ok(index as usize - 1)
            }
        }
    }

    /// `Add item, [key], [before], [after]`.
    pub fn add(
        &mut self,
        value: VbaValue,
        key: Option<String>,
        before: Option<&VbaValue>,
        after: Option<&VbaValue>,
    ) -> Result<(), ValueError> {
        if let Some(key) = &key {
            if self.position(&VbaValue::from(key.as_str())).is_ok() {
                return Err(ValueError::DuplicateKey);
            }
        }
        let at = match (before, after) {
            (Some(before), _) => self.position(before)?,
            (None, Some(after)) => self.position(after)? + 1,
            (None, None) => self.items.len(),
        };
        self.items.insert(at, (key, value));
        Ok(())
    }

    pub fn item(&self, key: &VbaValue) -> Result<VbaValue, ValueError> {
        let at = self.position(key)?;
        Ok(self.items[at].1.clone())
    }

    pub fn remove(&mut self, key: &VbaValue) -> Result<(), ValueError> {
        let at = self.position(key)?;
        self.items.remove(at);
        Ok(())
    }
}

/// `Scripting.Dictionary`, kept in insertion order.
#[derive(Debug, Default)]
pub struct Dictionary {
    entries: Vec<(VbaValue, VbaValue)>,
    compare: CompareMode,
}

impl Dictionary {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, key: &VbaValue) -> Option<usize> {
        self.entries.iter().position(|(k, _)| match (k, key) {
            (VbaValue::String(a), VbaValue::String(b)) => {
                compare_strings(a, b, self.compare).is_eq()
            }
            (VbaValue::Object(a), VbaValue::Object(b)) => a.ptr_eq(b),
            (a, b) if a.kind().is_numeric() && b.kind().is_numeric() => {
                matches!((a.to_f64(), b.to_f64()), (Ok(x), Ok(y)) if x == y)
            }
            (a, b) => a == b,
        })
    }

    pub fn exists(&self, key: &VbaValue) -> bool {
        self.position(key).is_some()
    }

    pub fn add(&mut self, key: VbaValue, value: VbaValue) -> Result<(), ValueError> {
        if self.exists(&key) {
            return Err(ValueError::DuplicateKey);
        }
        self.entries.push((key, value));
        Ok(())
    }

    /// Reading a missing key adds it with an Empty value.
    pub fn item(&mut self, key: &VbaValue) -> VbaValue {
        match self.position(key) {
            Some(at) => self.entries[at].1.clone(),
            None => {
                self.entries.push((key.clone(), VbaValue::Empty));
                VbaValue::Empty
            }
        }
    }

    pub fn set_item(&mut self, key: VbaValue, value: VbaValue) {
        match self.position(&key) {
            Some(at) => self.entries[at].1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &VbaValue) -> Result<(), ValueError> {
        let at = self.position(key).ok_or(ValueError::InvalidArgument)?;
        self.entries.remove(at);
        Ok(())
    }

    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    pub fn keys(&self) -> Vec<VbaValue> {
        self.entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn items(&self) -> Vec<VbaValue> {
        self.entries.iter().map(|(_, v)| v.clone()).collect()
    }
}

fn arg(args: &[VbaValue], index: usize) -> Option<&VbaValue> {
    args.get(index).filter(|v| !v.is_missing())
}

fn required(args: &[VbaValue], index: usize) -> Result<&VbaValue, ValueError> {
    arg(args, index).ok_or(ValueError::InvalidArgument)
}

fn array_of(values: Vec<VbaValue>) -> VbaValue {
    VbaValue::Array(VbaArray::from_values(0, values).into_ref())
}

impl VbaObjectRef {
    /// Reads or calls a member of a native object. `None` when the object has no such member,
    /// which the interpreter reports as error 438.
    pub fn native_member(
        &self,
        member: &str,
        args: &[VbaValue],
    ) -> Option<Result<VbaValue, ValueError>> {
        let member = member.to_ascii_lowercase();
        let mut obj = self.borrow_mut();
        match &mut *obj {
            VbaObject::Collection(items) => Some(match member.as_str() {
                "count" => Ok(VbaValue::Long(items.len() as i32)),
                "item" | "" => required(args, 0).and_then(|key| items.item(key)),
                "add" => required(args, 0).and_then(|value| {
                    let key = match arg(args, 1) {
                        Some(key) => Some(key.to_string_value()?),
                        None => None,
                    };
                    items
                        .add(value.clone(), key, arg(args, 2), arg(args, 3))
                        .map(|()| VbaValue::Empty)
                }),
                "remove" => required(args, 0)
                    .and_then(|key| items.remove(key))
                    .map(|()| VbaValue::Empty),
                _ => return None,
            }),
            VbaObject::Dictionary(dict) => Some(match member.as_str() {
                "count" => Ok(VbaValue::Long(dict.len() as i32)),
                "item" | "" => required(args, 0).map(|key| dict.item(key)),
                "exists" => required(args, 0).map(|key| VbaValue::Boolean(dict.exists(key))),
                "add" => required(args, 0).and_then(|key| {
                    let value = arg(args, 1).cloned().unwrap_or_default();
                    dict.add(key.clone(), value).map(|()| VbaValue::Empty)
                }),
                "keys" => Ok(array_of(dict.keys())),
                "items" => Ok(array_of(dict.items())),
                "remove" => required(args, 0)
                    .and_then(|key| dict.remove(key))
                    .map(|()| VbaValue::Empty),
                "removeall" => {
                    dict.remove_all();
                    Ok(VbaValue::Empty)
                }
                "comparemode" => Ok(VbaValue::Long(match dict.compare {
                    CompareMode::Binary => 0,
                    CompareMode::Text => 1,
                })),
                _ => return None,
            }),
            VbaObject::Err(err) => Some(match member.as_str() {
                "number" | "" => Ok(VbaValue::Long(err.number)),
                "description" => Ok(VbaValue::String(err.description.clone())),
                "source" => Ok(VbaValue::String(err.source.clone())),
                "clear" => {
                    *err = ErrObject::default();
                    Ok(VbaValue::Empty)
                }
                _ => return None,
            }),
            VbaObject::Record(record) => {
                if !args.is_empty() {
                    return None;
                }
                record
                    .fields
                    .get(&member)
                    .map(|field| Ok(field.value.clone()))
            }
            VbaObject::Instance(_) | VbaObject::Debug | VbaObject::Host { .. } => None,
        }
    }

    /// Assigns a member of a native object. `None` when the member cannot be assigned.
    pub fn set_native_member(
        &self,
        member: &str,
        args: &[VbaValue],
        value: VbaValue,
    ) -> Option<Result<(), ValueError>> {
        let member = member.to_ascii_lowercase();
        let mut obj = self.borrow_mut();
        match &mut *obj {
            VbaObject::Dictionary(dict) => match member.as_str() {
                "item" | "" => Some(required(args, 0).map(|key| dict.set_item(key.clone(), value))),
                "comparemode" => Some(value.to_i32().map(|mode| {
                    dict.compare = if mode == 1 {
                        CompareMode::Text
                    } else {
                        CompareMode::Binary
                    };
                })),
                _ => None,
            },
            VbaObject::Err(err) => match member.as_str() {
                "number" | "" => Some(value.to_i32().map(|n| err.number = n)),
                "description" => Some(value.to_string_value().map(|d| err.description = d)),
                "source" => Some(value.to_string_value().map(|s| err.source = s)),
                _ => None,
            },
            VbaObject::Record(record) if args.is_empty() => {
                let field = record.fields.get_mut(&member)?;
                Some(field.assign(value))
            }
            _ => None,
        }
    }

    /// Snapshot of the elements a `For Each` over a native object visits.
    pub fn native_elements(&self) -> Option<Vec<VbaValue>> {
        match &*self.borrow() {
            VbaObject::Collection(items) => Some(items.values()),
            VbaObject::Dictionary(dict) => Some(dict.keys()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_is_one_based_with_case_insensitive_keys() {
        let col = VbaObjectRef::new(VbaObject::Collection(Collection::default()));
        col.native_member("Add", &[VbaValue::from("a"), VbaValue::from("First")])
            .unwrap()
            .unwrap();
        col.native_member("Add", &[VbaValue::from("b")]).unwrap().unwrap();

        assert_eq!(col.native_member("Count", &[]).unwrap(), Ok(VbaValue::Long(2)));
        assert_eq!(
            col.native_member("Item", &[VbaValue::Integer(2)]).unwrap(),
            Ok(VbaValue::from("b"))
        );
        assert_eq!(
            col.native_member("Item", &[VbaValue::from("FIRST")]).unwrap(),
            Ok(VbaValue::from("a"))
        );
        assert_eq!(
            col.native_member("Item", &[VbaValue::Integer(0)]).unwrap(),
            Err(ValueError::SubscriptOutOfRange)
        );
        assert_eq!(
            col.native_member("Add", &[VbaValue::from("c"), VbaValue::from("first")])
                .unwrap(),
            Err(ValueError::DuplicateKey)
        );
    }

    #[test]
    fn dictionary_reads_add_missing_keys() {
        let dict = VbaObjectRef::new(VbaObject::Dictionary(Dictionary::default()));
        dict.set_native_member("Item", &[VbaValue::from("k")], VbaValue::Integer(1))
            .unwrap()
            .unwrap();
        assert_eq!(
            dict.native_member("Exists", &[VbaValue::from("k")]).unwrap(),
            Ok(VbaValue::Boolean(true))
        );
        assert_eq!(
            dict.native_member("Item", &[VbaValue::from("other")]).unwrap(),
            Ok(VbaValue::Empty)
        );
        assert_eq!(dict.native_member("Count", &[]).unwrap(), Ok(VbaValue::Long(2)));
        assert!(dict.native_member("Frobnicate", &[]).is_none());
    }
}

//! Bulk patching of records.
//!
//! A [`Record`] exposes some of its fields as type-erased accessors.
//! [`assign`] applies a sequence of JSON patches to such a record: for every
//! key, in patch order, the field's accessor receives the value. Keys that
//! do not name an accessor field are left alone, and everything is written
//! inside one transaction so observers only see the final result.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ReactiveError, Result};
use crate::graph::NodeId;
use crate::reactive::{transact, Cell, Derived};

/// A set of field updates, keyed by field name.
pub type Patch = Map<String, Value>;

/// An accessor whose value crosses the boundary as JSON.
pub trait DynAccessor {
    fn read_value(&self) -> Result<Value>;

    fn write_value(&self, value: Value) -> Result<()>;

    fn is_writable(&self) -> bool;

    fn node_id(&self) -> NodeId;
}

impl<T> DynAccessor for Cell<T>
where
    T: Clone + Serialize + DeserializeOwned + 'static,
{
    fn read_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.get())?)
    }

    fn write_value(&self, value: Value) -> Result<()> {
        self.set(serde_json::from_value(value)?)
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn node_id(&self) -> NodeId {
        self.id()
    }
}

impl<T> DynAccessor for Derived<T>
where
    T: Clone + Serialize + DeserializeOwned + 'static,
{
    fn read_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self.get()?)?)
    }

    fn write_value(&self, value: Value) -> Result<()> {
        // Check before decoding so a read-only target reports Unwritable
        if !Derived::is_writable(self) {
            return Err(ReactiveError::Unwritable { node: self.id() });
        }
        self.set(serde_json::from_value(value)?)
    }

    fn is_writable(&self) -> bool {
        Derived::is_writable(self)
    }

    fn node_id(&self) -> NodeId {
        self.id()
    }
}

/// A value with named accessor fields.
///
/// Fields that are plain data simply return `None` from [`Record::field`].
pub trait Record {
    /// The accessor stored under `name`, if any.
    fn field(&self, name: &str) -> Option<&dyn DynAccessor>;

    /// Names of all accessor fields, in declaration order.
    fn field_names(&self) -> Vec<&'static str>;
}

/// Apply `patches` to `target` in order.
///
/// Later patches win over earlier ones. Keys without an accessor field are
/// skipped. A failing write aborts the remaining writes; earlier writes are
/// kept and settle when the transaction closes.
pub fn assign<R: Record + ?Sized>(target: &R, patches: &[Patch]) -> Result<()> {
    apply(target, patches, false)
}

/// Like [`assign`], but a key without an accessor field is an error.
pub fn assign_strict<R: Record + ?Sized>(target: &R, patches: &[Patch]) -> Result<()> {
    apply(target, patches, true)
}

fn apply<R: Record + ?Sized>(target: &R, patches: &[Patch], strict: bool) -> Result<()> {
    transact(|| -> Result<()> {
        for patch in patches {
            for (key, value) in patch {
                match target.field(key) {
                    Some(field) => field
                        .write_value(value.clone())
                        .map_err(|err| err.in_field(key.as_str()))?,
                    None if strict => {
                        return Err(ReactiveError::NotAssignable { key: key.clone() })
                    }
                    None => debug!(key = %key, "skipping key without an accessor field"),
                }
            }
        }
        Ok(())
    })?
}

/// Read every accessor field of `record` into a JSON object.
pub fn record_snapshot<R: Record + ?Sized>(record: &R) -> Result<Value> {
    let mut fields = Map::new();
    for name in record.field_names() {
        if let Some(field) = record.field(name) {
            let value = field.read_value().map_err(|err| err.in_field(name))?;
            fields.insert(name.to_string(), value);
        }
    }
    Ok(Value::Object(fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::subscribe;
    use crate::utils::snapshot::{to_plain, Snapshot};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Target {
        a: Cell<i64>,
        b: Rc<std::cell::Cell<i64>>,
        c: Derived<i64>,
    }

    impl Target {
        fn new() -> Self {
            let b = Rc::new(std::cell::Cell::new(3));
            let c = Derived::with_setter(
                {
                    let b = b.clone();
                    move || b.get() * 2
                },
                {
                    let b = b.clone();
                    move |v: i64| {
                        b.set(v);
                        Ok(())
                    }
                },
            );
            Self {
                a: Cell::new(1),
                b,
                c,
            }
        }
    }

    impl Record for Target {
        fn field(&self, name: &str) -> Option<&dyn DynAccessor> {
            match name {
                "a" => Some(&self.a),
                "c" => Some(&self.c),
                _ => None,
            }
        }

        fn field_names(&self) -> Vec<&'static str> {
            vec!["a", "c"]
        }
    }

    impl Snapshot for Target {
        fn snapshot(&self) -> Result<Value> {
            Ok(json!({
                "a": self.a.snapshot()?,
                "b": self.b.get(),
                "c": self.c.snapshot()?,
            }))
        }
    }

    fn patch(value: Value) -> Patch {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn patches_apply_in_order_through_setters() {
        let target = Target::new();
        assign(
            &target,
            &[patch(json!({ "a": 2 })), patch(json!({ "a": 4, "c": 5 }))],
        )
        .unwrap();

        assert_eq!(to_plain(&target).unwrap(), json!({ "a": 4, "b": 5, "c": 10 }));
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let target = Target::new();
        assign(&target, &[patch(json!({ "b": 9, "zzz": 1, "a": 7 }))]).unwrap();

        assert_eq!(target.a.get(), 7);
        assert_eq!(target.b.get(), 3);
    }

    #[test]
    fn strict_assign_rejects_unknown_keys() {
        let target = Target::new();
        let err = assign_strict(&target, &[patch(json!({ "zzz": 1 }))]).unwrap_err();
        assert!(matches!(err, ReactiveError::NotAssignable { key } if key == "zzz"));
    }

    #[test]
    fn patch_settles_once() {
        let target = Target::new();
        let sum = Derived::new({
            let a = target.a.clone();
            move || a.get() * 100
        });
        let seen = Rc::new(RefCell::new(Vec::new()));
        let _sub = subscribe(&sum, {
            let seen = seen.clone();
            move |v: &i64| seen.borrow_mut().push(*v)
        })
        .unwrap();

        assign(
            &target,
            &[patch(json!({ "a": 2 })), patch(json!({ "a": 3 }))],
        )
        .unwrap();
        assert_eq!(*seen.borrow(), vec![300]);
    }

    #[test]
    fn type_mismatch_names_the_field() {
        let target = Target::new();
        let err = assign(&target, &[patch(json!({ "a": "text" }))]).unwrap_err();
        assert!(matches!(err, ReactiveError::Field { ref key, .. } if key == "a"));
    }

    #[test]
    fn read_only_derivation_refuses_patch() {
        let derived = Derived::new(|| 1_i64);
        let err = DynAccessor::write_value(&derived, json!(2)).unwrap_err();
        assert!(matches!(err, ReactiveError::Unwritable { .. }));
    }

    #[test]
    fn record_snapshot_reads_accessor_fields() {
        let target = Target::new();
        assert_eq!(record_snapshot(&target).unwrap(), json!({ "a": 1, "c": 6 }));
    }
}

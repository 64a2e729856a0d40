//! Deep snapshots.
//!
//! [`to_plain`] converts any [`Snapshot`] value into a freshly allocated
//! [`serde_json::Value`]. Accessors are read (so a snapshot taken inside a
//! derivation tracks everything it touched) and their values converted in
//! turn; sequences and string-keyed maps are converted element by element.
//!
//! A type that wants a different plain form implements [`Snapshot`] by hand.
//! Whatever it returns is used as-is and not converted any further.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::error::Result;
use crate::reactive::{Cell, Derived};

/// Conversion into plain data with every accessor resolved.
pub trait Snapshot {
    fn snapshot(&self) -> Result<Value>;
}

/// Deep-snapshot `value`.
pub fn to_plain<T: Snapshot + ?Sized>(value: &T) -> Result<Value> {
    value.snapshot()
}

macro_rules! impl_snapshot_for_scalars {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Snapshot for $ty {
                fn snapshot(&self) -> Result<Value> {
                    Ok(serde_json::to_value(self)?)
                }
            }
        )*
    };
}

impl_snapshot_for_scalars!(
    bool, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize, f32, f64, char, String, str,
);

impl Snapshot for Value {
    fn snapshot(&self) -> Result<Value> {
        Ok(self.clone())
    }
}

impl Snapshot for () {
    fn snapshot(&self) -> Result<Value> {
        Ok(Value::Null)
    }
}

impl<T: Snapshot> Snapshot for Option<T> {
    fn snapshot(&self) -> Result<Value> {
        match self {
            Some(value) => value.snapshot(),
            None => Ok(Value::Null),
        }
    }
}

impl<T: Snapshot> Snapshot for [T] {
    fn snapshot(&self) -> Result<Value> {
        self.iter()
            .map(Snapshot::snapshot)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }
}

impl<T: Snapshot> Snapshot for Vec<T> {
    fn snapshot(&self) -> Result<Value> {
        self.as_slice().snapshot()
    }
}

impl<T: Snapshot> Snapshot for VecDeque<T> {
    fn snapshot(&self) -> Result<Value> {
        self.iter()
            .map(Snapshot::snapshot)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array)
    }
}

fn snapshot_entries<'a, T, I>(entries: I) -> Result<Value>
where
    T: Snapshot + 'a,
    I: IntoIterator<Item = (&'a String, &'a T)>,
{
    entries
        .into_iter()
        .map(|(key, value)| Ok((key.clone(), value.snapshot()?)))
        .collect::<Result<Map<String, Value>>>()
        .map(Value::Object)
}

impl<T: Snapshot> Snapshot for IndexMap<String, T> {
    fn snapshot(&self) -> Result<Value> {
        snapshot_entries(self)
    }
}

impl<T: Snapshot> Snapshot for BTreeMap<String, T> {
    fn snapshot(&self) -> Result<Value> {
        snapshot_entries(self)
    }
}

impl<T: Snapshot> Snapshot for HashMap<String, T> {
    fn snapshot(&self) -> Result<Value> {
        snapshot_entries(self)
    }
}

impl<T: Snapshot + ?Sized> Snapshot for Rc<T> {
    fn snapshot(&self) -> Result<Value> {
        (**self).snapshot()
    }
}

impl<T: Snapshot + ?Sized> Snapshot for Box<T> {
    fn snapshot(&self) -> Result<Value> {
        (**self).snapshot()
    }
}

impl<T: Snapshot + ?Sized> Snapshot for &T {
    fn snapshot(&self) -> Result<Value> {
        (**self).snapshot()
    }
}

impl<T: Snapshot + Clone + 'static> Snapshot for Cell<T> {
    fn snapshot(&self) -> Result<Value> {
        self.get().snapshot()
    }
}

impl<T: Snapshot + Clone + 'static> Snapshot for Derived<T> {
    fn snapshot(&self) -> Result<Value> {
        self.get()?.snapshot()
    }
}

//! Model reconciliation.
//!
//! A [`Model`] turns plain JSON objects into records built by a factory.
//! When a current instance is supplied and still matches (same model and,
//! for keyed models, the same key value) it is updated in place instead of
//! being replaced, so anything holding on to it keeps observing the same
//! accessors.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{ReactiveError, Result};
use crate::reactive::transact;
use crate::utils::patch::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ModelId(u64);

impl ModelId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// A record built by a model, tagged with the model that built it.
pub struct Instance<R> {
    model: ModelId,
    key: Option<Value>,
    record: Rc<R>,
}

impl<R> Instance<R> {
    /// The key value this instance was created with, for keyed models.
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    /// Whether both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.record, &other.record)
    }
}

impl<R> Clone for Instance<R> {
    fn clone(&self) -> Self {
        Self {
            model: self.model,
            key: self.key.clone(),
            record: Rc::clone(&self.record),
        }
    }
}

impl<R> Deref for Instance<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.record
    }
}

impl<R> fmt::Debug for Instance<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.model.0)
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

impl<R: crate::utils::Snapshot> crate::utils::Snapshot for Instance<R> {
    fn snapshot(&self) -> Result<Value> {
        self.record.snapshot()
    }
}

/// What a model is asked to reconcile.
pub enum ModelInput<R> {
    Absent,
    Plain(Value),
    Instance(Instance<R>),
}

impl<R> From<Value> for ModelInput<R> {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Absent,
            other => Self::Plain(other),
        }
    }
}

impl<R> From<Instance<R>> for ModelInput<R> {
    fn from(instance: Instance<R>) -> Self {
        Self::Instance(instance)
    }
}

impl<R> From<Option<Instance<R>>> for ModelInput<R> {
    fn from(instance: Option<Instance<R>>) -> Self {
        instance.map_or(Self::Absent, Self::Instance)
    }
}

/// Factory plus identity rules for one kind of record.
pub struct Model<R> {
    id: ModelId,
    factory: Rc<dyn Fn() -> R>,
    key: Option<String>,
}

impl<R> Clone for Model<R> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            factory: Rc::clone(&self.factory),
            key: self.key.clone(),
        }
    }
}

impl<R: Record + 'static> Model<R> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> R + 'static,
    {
        Self {
            id: ModelId::new(),
            factory: Rc::new(factory),
            key: None,
        }
    }

    /// Identify instances by the value of `key`. Inputs must carry it.
    pub fn keyed(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Whether `instance` was built by this model.
    pub fn owns(&self, instance: &Instance<R>) -> bool {
        instance.model == self.id
    }

    /// Reconcile `input` without a current instance.
    pub fn create(&self, input: impl Into<ModelInput<R>>) -> Result<Option<Instance<R>>> {
        self.reconcile(input, None)
    }

    /// Reconcile `input` against `current`.
    ///
    /// - absent input yields `None`
    /// - an instance of this model is returned unchanged
    /// - a plain object updates `current` in place when it matches, or a
    ///   fresh instance otherwise
    pub fn reconcile(
        &self,
        input: impl Into<ModelInput<R>>,
        current: Option<&Instance<R>>,
    ) -> Result<Option<Instance<R>>> {
        match input.into() {
            ModelInput::Absent => Ok(None),
            ModelInput::Instance(instance) if self.owns(&instance) => Ok(Some(instance)),
            ModelInput::Instance(_) => Err(ReactiveError::ModelMismatch),
            ModelInput::Plain(Value::Object(fields)) => self.reconcile_fields(fields, current),
            ModelInput::Plain(other) => Err(ReactiveError::ModelInput(kind_of(&other).into())),
        }
    }

    fn reconcile_fields(
        &self,
        fields: Map<String, Value>,
        current: Option<&Instance<R>>,
    ) -> Result<Option<Instance<R>>> {
        let key_value = match &self.key {
            Some(key) => Some(
                fields
                    .get(key)
                    .cloned()
                    .ok_or_else(|| ReactiveError::MissingKey { key: key.clone() })?,
            ),
            None => None,
        };

        let reusable = current.filter(|c| self.owns(c) && c.key == key_value);
        let instance = match reusable {
            Some(existing) => {
                trace!(model = self.id.0, "reconciling in place");
                existing.clone()
            }
            None => Instance {
                model: self.id,
                key: key_value,
                record: Rc::new((self.factory)()),
            },
        };

        transact(|| -> Result<()> {
            for (name, value) in fields {
                if self.key.as_deref() == Some(name.as_str()) {
                    continue;
                }
                let field = instance
                    .record
                    .field(&name)
                    .ok_or_else(|| ReactiveError::NotAssignable { key: name.clone() })?;
                field.write_value(value).map_err(|err| err.in_field(name))?;
            }
            Ok(())
        })??;

        Ok(Some(instance))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! Provenance-aware merge of the newest snapshot with previously stored fields.
//!
//! Some fields (job time, remaining time) must survive ticks where the device
//! omits them, others must be blanked when the device explicitly nulls them.
//! `FieldStore::resolve` distinguishes the two cases.

use crate::snapshot::Snapshot;
use crate::util::as_number;
use serde_json::Value;
use std::collections::BTreeMap;

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Fresh non-null value in this snapshot.
    Data,
    /// The snapshot explicitly set the key to null.
    DataNull,
    /// Key absent; last stored raw value used.
    Stored,
    /// Key absent; the field exists but its stored value is null.
    StoredNull,
    /// Never seen.
    None,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub source: Source,
}

impl Resolved {
    pub fn number(&self) -> Option<f64> {
        as_number(&self.value)
    }
}

/// Last trusted value of one field plus its display rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredField {
    pub raw: Value,
    pub computed: Value,
    /// Not yet consumed by the rendering layer.
    pub is_new: bool,
}

impl Default for StoredField {
    fn default() -> Self {
        Self {
            raw: Value::Null,
            computed: Value::Null,
            is_new: false,
        }
    }
}

/// Per-device field table. Entries are created lazily and never removed;
/// absence is `raw == null`.
#[derive(Debug, Clone, Default)]
pub struct FieldStore {
    fields: BTreeMap<String, StoredField>,
}

impl FieldStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, key: &str, snap: &Snapshot) -> Resolved {
        match snap.field(key) {
            Some(Value::Null) => Resolved {
                value: Value::Null,
                source: Source::DataNull,
            },
            Some(v) => Resolved {
                value: v.clone(),
                source: Source::Data,
            },
            None => match self.fields.get(key) {
                Some(f) if f.raw.is_null() => Resolved {
                    value: Value::Null,
                    source: Source::StoredNull,
                },
                Some(f) => Resolved {
                    value: f.raw.clone(),
                    source: Source::Stored,
                },
                None => Resolved {
                    value: Value::Null,
                    source: Source::None,
                },
            },
        }
    }

    pub fn get(&self, key: &str) -> Option<&StoredField> {
        self.fields.get(key)
    }

    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).map(|f| &f.raw).filter(|v| !v.is_null())
    }

    /// Write the raw variant. Marks the field new only when the value changed.
    pub fn set_raw(&mut self, key: &str, value: Value) {
        let f = self.fields.entry(key.to_string()).or_default();
        if f.raw != value {
            f.raw = value;
            f.is_new = true;
        }
    }

    /// Write the display variant.
    pub fn set_computed(&mut self, key: &str, value: Value) {
        let f = self.fields.entry(key.to_string()).or_default();
        if f.computed != value {
            f.computed = value;
            f.is_new = true;
        }
    }

    pub fn set(&mut self, key: &str, raw: Value, computed: Value) {
        self.set_raw(key, raw);
        self.set_computed(key, computed);
    }

    /// Blank both variants, keeping the entry.
    pub fn clear(&mut self, key: &str) {
        self.set(key, Value::Null, Value::Null);
    }

    /// Store every key the snapshot carried, explicit nulls included.
    pub fn commit(&mut self, snap: &Snapshot) {
        for (k, v) in snap.iter() {
            self.set_raw(k, v.clone());
        }
    }

    /// Hand out fields changed since the last call and mark them consumed.
    pub fn take_new(&mut self) -> Vec<(String, StoredField)> {
        let mut out = Vec::new();
        for (k, f) in &mut self.fields {
            if f.is_new {
                f.is_new = false;
                out.push((k.clone(), f.clone()));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

//! Per-session property container with compare-and-swap writes.
//!
//! Every session carries a [`PropertyStore`]: custom key/value pairs chosen by
//! the game plus a handful of [`well_known`] keys the directory itself relies on
//! (visibility, open flag, capacity, current player count, expected users).
//!
//! Writes go through [`PropertyStore::apply`], which is all-or-nothing: when an
//! `expected` map is supplied, every expectation must hold against the current
//! values or the whole write is rejected and nothing changes.

use crate::error::DirectoryError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Property values keyed by property name, in deterministic order.
pub type PropertyMap = BTreeMap<String, Value>;

/// Expected current values for a conditional write. `None` means "absent".
pub type ExpectedValues = BTreeMap<String, Option<Value>>;

/// Keys the directory publishes for every session regardless of lobby filters.
pub mod well_known {
    /// Whether the session is listed to discovery clients
    pub const VISIBLE: &str = "visible";
    /// Whether the session accepts joins
    pub const OPEN: &str = "open";
    /// Capacity; 0 means unbounded
    pub const MAX_PLAYERS: &str = "max_players";
    /// Number of players currently joined, maintained by the directory
    pub const PLAYER_COUNT: &str = "player_count";
    /// Player ids holding a reserved slot
    pub const EXPECTED_USERS: &str = "expected_users";

    /// All well-known keys.
    pub const ALL: [&str; 5] = [VISIBLE, OPEN, MAX_PLAYERS, PLAYER_COUNT, EXPECTED_USERS];

    /// Whether `key` is one of the well-known keys.
    pub fn contains(key: &str) -> bool {
        ALL.contains(&key)
    }
}

/// A single requested change to one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum PropertyWrite {
    /// Store a value
    Set(Value),
    /// Delete the key
    Remove,
}

/// Writes keyed by property name.
pub type PropertyWrites = BTreeMap<String, PropertyWrite>;

/// Outcome of a successful [`PropertyStore::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppliedWrite {
    /// Keys whose stored value actually changed (set, replaced or removed)
    pub changed: Vec<String>,
}

impl AppliedWrite {
    /// Whether the write left every value as it was.
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Key/value properties of one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyStore {
    values: PropertyMap,
    /// Writing `null` to a key removes it instead of storing `null`
    #[serde(default)]
    delete_null: bool,
}

impl PropertyStore {
    /// Creates a store holding `values`.
    pub fn new(values: PropertyMap, delete_null: bool) -> Self {
        let mut store = Self {
            values,
            delete_null,
        };
        if delete_null {
            store.values.retain(|_, value| !value.is_null());
        }
        store
    }

    /// Creates a store and fills in defaults for missing well-known keys.
    pub fn with_defaults(values: PropertyMap, delete_null: bool) -> Self {
        let mut store = Self::new(values, delete_null);
        store.fill_well_known_defaults();
        store
    }

    /// Inserts default values for absent well-known keys.
    pub fn fill_well_known_defaults(&mut self) {
        let defaults = [
            (well_known::VISIBLE, Value::Bool(true)),
            (well_known::OPEN, Value::Bool(true)),
            (well_known::MAX_PLAYERS, Value::from(0u64)),
            (well_known::PLAYER_COUNT, Value::from(0u64)),
            (well_known::EXPECTED_USERS, Value::Array(Vec::new())),
        ];
        for (key, value) in defaults {
            self.values.entry(key.to_string()).or_insert(value);
        }
    }

    /// Current values.
    pub fn values(&self) -> &PropertyMap {
        &self.values
    }

    /// Current value of one key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Whether null writes delete keys.
    pub fn deletes_null(&self) -> bool {
        self.delete_null
    }

    /// Applies `writes` iff every entry of `expected` matches the current state.
    ///
    /// Comparison is deep JSON equality; an expected `None` matches only an
    /// absent key. On a failed expectation nothing is modified.
    pub fn apply(
        &mut self,
        writes: &PropertyWrites,
        expected: &ExpectedValues,
    ) -> Result<AppliedWrite, DirectoryError> {
        for (key, wanted) in expected {
            if self.values.get(key) != wanted.as_ref() {
                return Err(DirectoryError::PreconditionFailed { key: key.clone() });
            }
        }

        let mut applied = AppliedWrite::default();
        for (key, write) in writes {
            let changed = match write {
                PropertyWrite::Set(Value::Null) if self.delete_null => {
                    self.values.remove(key).is_some()
                }
                PropertyWrite::Set(value) => {
                    match self.values.insert(key.clone(), value.clone()) {
                        Some(previous) => previous != *value,
                        None => true,
                    }
                }
                PropertyWrite::Remove => self.values.remove(key).is_some(),
            };
            if changed {
                applied.changed.push(key.clone());
            }
        }
        Ok(applied)
    }

    /// Unconditionally stores a directory-maintained value.
    pub(crate) fn set_internal(&mut self, key: &str, value: Value) -> bool {
        self.values.insert(key.to_string(), value.clone()).as_ref() != Some(&value)
    }

    /// Whether the session accepts joins (`open` missing counts as open).
    pub fn is_open(&self) -> bool {
        self.values
            .get(well_known::OPEN)
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Configured capacity; 0 when unbounded.
    pub fn max_players(&self) -> u64 {
        self.values
            .get(well_known::MAX_PLAYERS)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Player count as last maintained by the directory.
    pub fn player_count(&self) -> u64 {
        self.values
            .get(well_known::PLAYER_COUNT)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

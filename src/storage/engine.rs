//! Contract between the query/batch layers and an ordered transactional
//! key-value engine.
//!
//! Requests complete synchronously: a call returning is the completion
//! event of the request. Engines own durability, isolation and key order;
//! this crate only sequences requests inside the transactions they hand out.

use crate::catalog::schema::KeyPath;
use crate::catalog::types::Value;
use crate::error::ResourceType;
use crate::storage::encoded_key::EncodedKey;
use serde::{Deserialize, Serialize};
use std::ops::Bound;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorDirection {
    Next,
    /// Ascending, one record per distinct key.
    NextUnique,
    Prev,
    /// Descending, one record per distinct key.
    PrevUnique,
}

impl CursorDirection {
    pub fn is_reverse(self) -> bool {
        matches!(self, CursorDirection::Prev | CursorDirection::PrevUnique)
    }

    pub fn is_unique(self) -> bool {
        matches!(
            self,
            CursorDirection::NextUnique | CursorDirection::PrevUnique
        )
    }
}

/// What a cursor or count walks: the store itself or one of its indexes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorSource {
    Store(String),
    Index { store: String, index: String },
}

impl CursorSource {
    pub fn store_name(&self) -> &str {
        match self {
            CursorSource::Store(store) | CursorSource::Index { store, .. } => store,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorMode {
    /// Records carry their value.
    Value,
    /// Records carry keys only.
    Key,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KeyRange {
    Only(Value),
    LowerBound {
        lower: Value,
        open: bool,
    },
    UpperBound {
        upper: Value,
        open: bool,
    },
    Bound {
        lower: Value,
        upper: Value,
        lower_open: bool,
        upper_open: bool,
    },
}

impl KeyRange {
    pub fn only(value: impl Into<Value>) -> Self {
        KeyRange::Only(value.into())
    }

    pub fn lower_bound(lower: impl Into<Value>, open: bool) -> Self {
        KeyRange::LowerBound {
            lower: lower.into(),
            open,
        }
    }

    pub fn upper_bound(upper: impl Into<Value>, open: bool) -> Self {
        KeyRange::UpperBound {
            upper: upper.into(),
            open,
        }
    }

    /// Rejects an empty interval: `lower > upper`, or equal ends with either
    /// side open.
    pub fn bound(
        lower: impl Into<Value>,
        upper: impl Into<Value>,
        lower_open: bool,
        upper_open: bool,
    ) -> Result<Self, EngineError> {
        let lower = lower.into();
        let upper = upper.into();
        if lower > upper {
            return Err(EngineError::Data(
                "lower bound is greater than upper bound".into(),
            ));
        }
        if lower == upper && (lower_open || upper_open) {
            return Err(EngineError::Data(
                "bounds are equal and one of them is open".into(),
            ));
        }
        Ok(KeyRange::Bound {
            lower,
            upper,
            lower_open,
            upper_open,
        })
    }

    pub fn contains(&self, key: &Value) -> bool {
        match self {
            KeyRange::Only(value) => key == value,
            KeyRange::LowerBound { lower, open } => {
                if *open {
                    key > lower
                } else {
                    key >= lower
                }
            }
            KeyRange::UpperBound { upper, open } => {
                if *open {
                    key < upper
                } else {
                    key <= upper
                }
            }
            KeyRange::Bound {
                lower,
                upper,
                lower_open,
                upper_open,
            } => {
                let above = if *lower_open { key > lower } else { key >= lower };
                let below = if *upper_open { key < upper } else { key <= upper };
                above && below
            }
        }
    }

    /// Encoded `(start, end)` bounds for a map keyed by [`EncodedKey`].
    pub fn encoded_bounds(&self) -> Result<(Bound<EncodedKey>, Bound<EncodedKey>), EngineError> {
        let included = |v: &Value| EncodedKey::from_key(v).map(Bound::Included);
        let side = |v: &Value, open: bool| {
            EncodedKey::from_key(v).map(|k| {
                if open {
                    Bound::Excluded(k)
                } else {
                    Bound::Included(k)
                }
            })
        };
        Ok(match self {
            KeyRange::Only(value) => (included(value)?, included(value)?),
            KeyRange::LowerBound { lower, open } => (side(lower, *open)?, Bound::Unbounded),
            KeyRange::UpperBound { upper, open } => (Bound::Unbounded, side(upper, *open)?),
            KeyRange::Bound {
                lower,
                upper,
                lower_open,
                upper_open,
            } => (side(lower, *lower_open)?, side(upper, *upper_open)?),
        })
    }
}

/// Native engine failure, surfaced to callers as
/// [`crate::OrdkvError::Native`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("constraint violation: {0}")]
    Constraint(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("{resource_type} '{resource_id}' not found")]
    NotFound {
        resource_type: ResourceType,
        resource_id: String,
    },
    #[error("read-only transaction: {0}")]
    ReadOnly(String),
    #[error("write conflict on store '{store}'")]
    Conflict { store: String },
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl EngineError {
    pub fn store_not_found(store: &str) -> Self {
        EngineError::NotFound {
            resource_type: ResourceType::Store,
            resource_id: store.to_string(),
        }
    }

    pub fn index_not_found(store: &str, index: &str) -> Self {
        EngineError::NotFound {
            resource_type: ResourceType::Index,
            resource_id: format!("{store}.{index}"),
        }
    }
}

/// One cursor position.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorRecord {
    /// Index key for index cursors, primary key otherwise.
    pub key: Value,
    pub primary_key: Value,
    /// `None` for [`CursorMode::Key`] cursors.
    pub value: Option<Value>,
}

pub trait StorageEngine: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn version(&self) -> u64;
    fn store_names(&self) -> Vec<String>;
    /// Opens a transaction over exactly `stores`. Requests naming any other
    /// store fail with `NotFound`.
    fn transaction(
        &self,
        stores: &[String],
        mode: TxMode,
    ) -> Result<Box<dyn EngineTransaction>, EngineError>;
}

pub trait EngineTransaction: Send {
    fn mode(&self) -> TxMode;
    fn key_path(&self, store: &str) -> Result<Option<KeyPath>, EngineError>;
    fn get(&mut self, store: &str, key: &Value) -> Result<Option<Value>, EngineError>;
    /// Inserts a new record and returns its key; an existing key is a
    /// constraint violation.
    fn add(&mut self, store: &str, value: Value, key: Option<Value>)
    -> Result<Value, EngineError>;
    /// Inserts or replaces a record and returns its key.
    fn put(&mut self, store: &str, value: Value, key: Option<Value>)
    -> Result<Value, EngineError>;
    fn delete(&mut self, store: &str, key: &Value) -> Result<(), EngineError>;
    fn clear(&mut self, store: &str) -> Result<(), EngineError>;
    fn count(&mut self, source: &CursorSource, range: Option<&KeyRange>)
    -> Result<u64, EngineError>;
    /// Opens a cursor positioned on the first record in `direction`, if any.
    fn open_cursor<'a>(
        &'a mut self,
        source: &CursorSource,
        range: Option<&KeyRange>,
        direction: CursorDirection,
        mode: CursorMode,
    ) -> Result<Box<dyn EngineCursor + 'a>, EngineError>;
    fn commit(self: Box<Self>) -> Result<(), EngineError>;
    fn abort(self: Box<Self>);
}

pub trait EngineCursor {
    /// `None` once the cursor has run past its range.
    fn current(&self) -> Option<CursorRecord>;
    fn advance(&mut self, count: u64) -> Result<(), EngineError>;
    /// Replaces the record under the cursor and returns its primary key.
    fn update(&mut self, value: Value) -> Result<Value, EngineError>;
    fn delete(&mut self) -> Result<(), EngineError>;
}

use crate::catalog::types::Value;
use crate::error::{EvalError, OrdkvError};
use crate::storage::engine::{CursorDirection, CursorSource, KeyRange};
use std::fmt;
use std::sync::Arc;

pub type PredicateFn = Arc<dyn Fn(&Value) -> Result<bool, EvalError> + Send + Sync>;
pub type MapperFn = Arc<dyn Fn(Value) -> Result<Value, EvalError> + Send + Sync>;
pub type ComputeFn = Arc<dyn Fn(&Value) -> Result<Value, EvalError> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Value,
    Key,
    Count,
}

/// Record filter. All filters of a plan are ANDed.
#[derive(Clone)]
pub enum FilterPredicate {
    /// Field at a dotted path equals the value.
    Equals(String, Value),
    /// Every listed field equals its value.
    Fields(Vec<(String, Value)>),
    Predicate(PredicateFn),
}

impl FilterPredicate {
    pub fn matches(&self, record: &Value) -> Result<bool, EvalError> {
        match self {
            FilterPredicate::Equals(field, expected) => {
                Ok(record.get_field(field) == Some(expected))
            }
            FilterPredicate::Fields(fields) => Ok(fields
                .iter()
                .all(|(field, expected)| record.get_field(field) == Some(expected))),
            FilterPredicate::Predicate(predicate) => predicate(record),
        }
    }
}

impl fmt::Debug for FilterPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterPredicate::Equals(field, value) => {
                f.debug_tuple("Equals").field(field).field(value).finish()
            }
            FilterPredicate::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            FilterPredicate::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Skip the first `offset` matching records, then collect at most `count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitWindow {
    pub offset: u64,
    pub count: u64,
}

impl LimitWindow {
    pub fn new(offset: u64, count: u64) -> Result<Self, OrdkvError> {
        if count == 0 {
            return Err(OrdkvError::LimitArgument(
                "limit count must be greater than zero".into(),
            ));
        }
        if offset.checked_add(count).is_none() {
            return Err(OrdkvError::LimitArgument(format!(
                "limit window {offset}+{count} overflows"
            )));
        }
        Ok(Self { offset, count })
    }

    pub fn end(&self) -> u64 {
        self.offset + self.count
    }
}

#[derive(Clone)]
pub enum PatchField {
    Set(Value),
    /// Computed from the record as it was before the patch.
    Compute(ComputeFn),
}

/// Field updates applied in place to every matching record.
#[derive(Clone, Default)]
pub struct ModifyPatch {
    fields: Vec<(String, PatchField)>,
}

impl ModifyPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields
            .push((field.into(), PatchField::Set(value.into())));
        self
    }

    pub fn compute<F>(mut self, field: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.fields.push((
            field.into(),
            PatchField::Compute(Arc::new(move |record: &Value| {
                Ok::<_, EvalError>(compute(record))
            })),
        ));
        self
    }

    pub fn try_compute<F>(mut self, field: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, EvalError> + Send + Sync + 'static,
    {
        self.fields
            .push((field.into(), PatchField::Compute(Arc::new(compute))));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn apply(&self, record: &Value) -> Result<Value, EvalError> {
        let mut patched = record.clone();
        for (field, update) in &self.fields {
            let value = match update {
                PatchField::Set(value) => value.clone(),
                PatchField::Compute(compute) => compute(record)?,
            };
            if !patched.set_field(field, value) {
                return Err(EvalError::new(format!(
                    "cannot set field '{field}' on a {} record",
                    record.kind_name()
                )));
            }
        }
        Ok(patched)
    }
}

impl fmt::Debug for ModifyPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|(field, update)| match update {
                PatchField::Set(value) => format!("{field} = {value:?}"),
                PatchField::Compute(_) => format!("{field} = fn(..)"),
            }))
            .finish()
    }
}

/// Immutable description of one cursor walk.
#[derive(Clone)]
pub struct QueryPlan {
    pub store: String,
    pub index: Option<String>,
    pub range: Option<KeyRange>,
    pub order: Order,
    pub kind: CursorKind,
    pub filters: Vec<FilterPredicate>,
    pub window: Option<LimitWindow>,
    pub distinct: bool,
    pub patch: Option<ModifyPatch>,
    pub mapper: Option<MapperFn>,
}

impl QueryPlan {
    pub fn new(store: impl Into<String>, index: Option<String>) -> Self {
        Self {
            store: store.into(),
            index,
            range: None,
            order: Order::Asc,
            kind: CursorKind::Value,
            filters: Vec::new(),
            window: None,
            distinct: false,
            patch: None,
            mapper: None,
        }
    }

    pub fn source(&self) -> CursorSource {
        match &self.index {
            Some(index) => CursorSource::Index {
                store: self.store.clone(),
                index: index.clone(),
            },
            None => CursorSource::Store(self.store.clone()),
        }
    }

    pub fn direction(&self) -> CursorDirection {
        match (self.order, self.distinct) {
            (Order::Asc, false) => CursorDirection::Next,
            (Order::Asc, true) => CursorDirection::NextUnique,
            (Order::Desc, false) => CursorDirection::Prev,
            (Order::Desc, true) => CursorDirection::PrevUnique,
        }
    }

    /// Count answerable by a single native count request.
    pub fn is_native_count(&self) -> bool {
        self.kind == CursorKind::Count
            && self.filters.is_empty()
            && !self.distinct
            && self.window.is_none()
    }

    pub fn writes(&self) -> bool {
        self.patch.is_some()
    }

    pub fn map_output(&self, value: Value) -> Result<Value, EvalError> {
        match &self.mapper {
            Some(mapper) => mapper(value),
            None => Ok(value),
        }
    }

    /// Runs `mapper` after any mapper already in the plan.
    pub fn push_mapper(&mut self, mapper: MapperFn) {
        self.mapper = Some(match self.mapper.take() {
            Some(previous) => Arc::new(move |value: Value| mapper(previous(value)?)),
            None => mapper,
        });
    }
}

impl fmt::Debug for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryPlan")
            .field("store", &self.store)
            .field("index", &self.index)
            .field("range", &self.range)
            .field("order", &self.order)
            .field("kind", &self.kind)
            .field("filters", &self.filters)
            .field("window", &self.window)
            .field("distinct", &self.distinct)
            .field("patch", &self.patch)
            .field("mapped", &self.mapper.is_some())
            .finish()
    }
}

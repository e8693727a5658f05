use crate::catalog::types::Value;
use crate::error::OrdkvError;
use crate::storage::engine::{EngineError, KeyRange};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            RangeOp::Eq => "eq",
            RangeOp::Gt => "gt",
            RangeOp::Gte => "gte",
            RangeOp::Lt => "lt",
            RangeOp::Lte => "lte",
        }
    }

    pub fn parse(name: &str) -> Result<Self, OrdkvError> {
        match name {
            "eq" => Ok(RangeOp::Eq),
            "gt" => Ok(RangeOp::Gt),
            "gte" => Ok(RangeOp::Gte),
            "lt" => Ok(RangeOp::Lt),
            "lte" => Ok(RangeOp::Lte),
            other => Err(OrdkvError::RangeSpec(format!(
                "unknown range operator '{other}'"
            ))),
        }
    }

    fn is_lower(self) -> bool {
        matches!(self, RangeOp::Gt | RangeOp::Gte)
    }

    fn is_upper(self) -> bool {
        matches!(self, RangeOp::Lt | RangeOp::Lte)
    }
}

/// Declarative key range: one or two `(operator, value)` terms.
///
/// ```
/// use ordkv::query::range::RangeSpec;
/// let spec = RangeSpec::new().gte(20).lt(40);
/// assert_eq!(spec.terms().len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeSpec {
    terms: SmallVec<[(RangeOp, Value); 2]>,
}

impl RangeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, op: RangeOp, value: impl Into<Value>) -> Self {
        self.terms.push((op, value.into()));
        self
    }

    #[allow(clippy::should_implement_trait)]
    pub fn eq(self, value: impl Into<Value>) -> Self {
        self.with(RangeOp::Eq, value)
    }

    pub fn gt(self, value: impl Into<Value>) -> Self {
        self.with(RangeOp::Gt, value)
    }

    pub fn gte(self, value: impl Into<Value>) -> Self {
        self.with(RangeOp::Gte, value)
    }

    pub fn lt(self, value: impl Into<Value>) -> Self {
        self.with(RangeOp::Lt, value)
    }

    pub fn lte(self, value: impl Into<Value>) -> Self {
        self.with(RangeOp::Lte, value)
    }

    pub fn terms(&self) -> &[(RangeOp, Value)] {
        &self.terms
    }

    /// Parses `{"gte": 20, "lt": 40}`. Non-objects and unknown operator
    /// names are range errors.
    pub fn from_json(spec: &serde_json::Value) -> Result<Self, OrdkvError> {
        let serde_json::Value::Object(fields) = spec else {
            return Err(OrdkvError::RangeSpec(
                "range specification must be an object".into(),
            ));
        };
        fields.iter().try_fold(Self::new(), |acc, (name, value)| {
            Ok(acc.with(RangeOp::parse(name)?, Value::from(value.clone())))
        })
    }
}

/// Converts a range specification into the engine's native key range.
///
/// Pure: nothing here touches storage. Bound values are checked to be valid
/// keys, and a two-sided range must describe a non-empty interval.
pub fn translate(spec: &RangeSpec) -> Result<KeyRange, OrdkvError> {
    for (_, value) in spec.terms() {
        if !value.is_valid_key() {
            return Err(EngineError::Data(format!(
                "{} is not a valid key",
                value.kind_name()
            ))
            .into());
        }
    }
    match spec.terms() {
        [] => Err(OrdkvError::RangeSpec("range specification is empty".into())),
        [(op, value)] => Ok(match op {
            RangeOp::Eq => KeyRange::only(value.clone()),
            RangeOp::Gt => KeyRange::lower_bound(value.clone(), true),
            RangeOp::Gte => KeyRange::lower_bound(value.clone(), false),
            RangeOp::Lt => KeyRange::upper_bound(value.clone(), true),
            RangeOp::Lte => KeyRange::upper_bound(value.clone(), false),
        }),
        [(a, va), (b, vb)] => {
            let ((lower_op, lower), (upper_op, upper)) = if a.is_lower() && b.is_upper() {
                ((a, va), (b, vb))
            } else if b.is_lower() && a.is_upper() {
                ((b, vb), (a, va))
            } else {
                return Err(OrdkvError::RangeSpec(format!(
                    "cannot combine '{}' with '{}'",
                    a.as_str(),
                    b.as_str()
                )));
            };
            Ok(KeyRange::bound(
                lower.clone(),
                upper.clone(),
                *lower_op == RangeOp::Gt,
                *upper_op == RangeOp::Lt,
            )?)
        }
        terms => Err(OrdkvError::RangeSpec(format!(
            "at most two operators are allowed, got {}",
            terms.len()
        ))),
    }
}

use crate::storage::engine::EngineError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Store,
    Index,
    Record,
    Transaction,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Store => write!(f, "store"),
            ResourceType::Index => write!(f, "index"),
            ResourceType::Record => write!(f, "record"),
            ResourceType::Transaction => write!(f, "transaction"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrdkvErrorCode {
    RangeSpec,
    LimitArgument,
    StoreClosed,
    FilterEvaluation,
    ConstraintViolation,
    DataError,
    NotFound,
    ReadOnly,
    Conflict,
    InvalidState,
    TransactionAbort,
    TransactionInactive,
    TransactionBusy,
    ScanBoundExceeded,
    InvalidConfig,
    Validation,
}

impl OrdkvErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            OrdkvErrorCode::RangeSpec => "range_spec",
            OrdkvErrorCode::LimitArgument => "limit_argument",
            OrdkvErrorCode::StoreClosed => "store_closed",
            OrdkvErrorCode::FilterEvaluation => "filter_evaluation",
            OrdkvErrorCode::ConstraintViolation => "constraint_violation",
            OrdkvErrorCode::DataError => "data_error",
            OrdkvErrorCode::NotFound => "not_found",
            OrdkvErrorCode::ReadOnly => "read_only",
            OrdkvErrorCode::Conflict => "conflict",
            OrdkvErrorCode::InvalidState => "invalid_state",
            OrdkvErrorCode::TransactionAbort => "transaction_abort",
            OrdkvErrorCode::TransactionInactive => "transaction_inactive",
            OrdkvErrorCode::TransactionBusy => "transaction_busy",
            OrdkvErrorCode::ScanBoundExceeded => "scan_bound_exceeded",
            OrdkvErrorCode::InvalidConfig => "invalid_config",
            OrdkvErrorCode::Validation => "validation",
        }
    }
}

/// Error returned by a user-supplied predicate, mapper or patch function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EvalError {
    message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrdkvError {
    #[error("invalid range specification: {0}")]
    RangeSpec(String),
    #[error("invalid limit arguments: {0}")]
    LimitArgument(String),
    #[error("database connection is closed")]
    StoreClosed,
    #[error("filter evaluation failed: {0}")]
    FilterEvaluation(String),
    #[error(transparent)]
    Native(#[from] EngineError),
    #[error("transaction {tx_id} aborted: {reason}")]
    TransactionAbort { tx_id: u64, reason: String },
    #[error("transaction is no longer active")]
    TransactionInactive,
    #[error("{resource_type} busy: a batch over [{active_scope}] is in progress")]
    TransactionBusy {
        resource_type: ResourceType,
        active_scope: String,
    },
    #[error("scan bound exceeded: scanned={scanned}, max_scan_records={max_scan_records}")]
    ScanBoundExceeded {
        scanned: usize,
        max_scan_records: usize,
    },
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("validation error: {0}")]
    Validation(String),
}

impl From<EvalError> for OrdkvError {
    fn from(value: EvalError) -> Self {
        OrdkvError::FilterEvaluation(value.message)
    }
}

impl OrdkvError {
    pub fn code(&self) -> OrdkvErrorCode {
        match self {
            OrdkvError::RangeSpec(_) => OrdkvErrorCode::RangeSpec,
            OrdkvError::LimitArgument(_) => OrdkvErrorCode::LimitArgument,
            OrdkvError::StoreClosed => OrdkvErrorCode::StoreClosed,
            OrdkvError::FilterEvaluation(_) => OrdkvErrorCode::FilterEvaluation,
            OrdkvError::Native(native) => match native {
                EngineError::Constraint(_) => OrdkvErrorCode::ConstraintViolation,
                EngineError::Data(_) => OrdkvErrorCode::DataError,
                EngineError::NotFound { .. } => OrdkvErrorCode::NotFound,
                EngineError::ReadOnly(_) => OrdkvErrorCode::ReadOnly,
                EngineError::Conflict { .. } => OrdkvErrorCode::Conflict,
                EngineError::InvalidState(_) => OrdkvErrorCode::InvalidState,
            },
            OrdkvError::TransactionAbort { .. } => OrdkvErrorCode::TransactionAbort,
            OrdkvError::TransactionInactive => OrdkvErrorCode::TransactionInactive,
            OrdkvError::TransactionBusy { .. } => OrdkvErrorCode::TransactionBusy,
            OrdkvError::ScanBoundExceeded { .. } => OrdkvErrorCode::ScanBoundExceeded,
            OrdkvError::InvalidConfig { .. } => OrdkvErrorCode::InvalidConfig,
            OrdkvError::Validation(_) => OrdkvErrorCode::Validation,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// True for failures raised by the storage engine itself.
    pub fn is_native(&self) -> bool {
        matches!(self, OrdkvError::Native(_))
    }
}

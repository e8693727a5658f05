use crate::error::OrdkvError;

const DEFAULT_MAX_BATCH_OPERATIONS: usize = 10_000;

/// Runtime configuration for a [`crate::Database`] handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrdkvConfig {
    /// Batch mode used by the single-operation store helpers.
    pub default_parallel: bool,
    pub max_batch_operations: usize,
    /// Upper bound on cursor steps per query; `None` leaves scans unbounded.
    pub max_scan_records: Option<usize>,
    /// Let fresh queries and nested batches join the batch transaction that
    /// is current on the same handle when it covers their stores.
    pub reuse_current_transaction: bool,
}

impl Default for OrdkvConfig {
    fn default() -> Self {
        Self {
            default_parallel: false,
            max_batch_operations: DEFAULT_MAX_BATCH_OPERATIONS,
            max_scan_records: None,
            reuse_current_transaction: true,
        }
    }
}

impl OrdkvConfig {
    /// Profile that rejects any query stepping over more than
    /// `max_scan_records` cursor positions.
    pub fn bounded(max_scan_records: usize) -> Self {
        Self {
            max_scan_records: Some(max_scan_records),
            ..Self::default()
        }
    }

    pub fn with_default_parallel(mut self, parallel: bool) -> Self {
        self.default_parallel = parallel;
        self
    }

    pub fn with_max_batch_operations(mut self, max: usize) -> Self {
        self.max_batch_operations = max;
        self
    }

    pub fn with_max_scan_records(mut self, max: Option<usize>) -> Self {
        self.max_scan_records = max;
        self
    }

    pub fn with_reuse_current_transaction(mut self, reuse: bool) -> Self {
        self.reuse_current_transaction = reuse;
        self
    }

    pub fn validate(&self) -> Result<(), OrdkvError> {
        if self.max_batch_operations == 0 {
            return Err(OrdkvError::InvalidConfig {
                message: "max_batch_operations must be > 0".into(),
            });
        }
        if self.max_scan_records == Some(0) {
            return Err(OrdkvError::InvalidConfig {
                message: "max_scan_records must be > 0 when set".into(),
            });
        }
        Ok(())
    }
}

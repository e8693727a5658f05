use crate::commit::batch::BatchSlot;
use crate::commit::tx::TxShared;
use crate::error::OrdkvError;

/// Collects batch outcomes positionally and settles the batch on the first
/// failure.
pub(crate) struct ResultAggregator {
    slots: Vec<Option<BatchSlot>>,
    failure: Option<OrdkvError>,
}

impl ResultAggregator {
    pub(crate) fn new(entries: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(entries).collect(),
            failure: None,
        }
    }

    pub(crate) fn fill(&mut self, position: usize, slot: BatchSlot) {
        if let Some(target) = self.slots.get_mut(position) {
            *target = Some(slot);
        }
    }

    /// Keeps only the first failure.
    pub(crate) fn fail(&mut self, err: OrdkvError) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Resolves the batch against `tx`.
    ///
    /// A failure aborts `tx` and rejects with the transaction's first
    /// failure, which may predate the one observed here (a request that
    /// failed inside a callback that swallowed the error). `commit` is false
    /// when the batch joined an enclosing transaction that commits on its own.
    pub(crate) fn finish(self, tx: &TxShared, commit: bool) -> Result<Vec<BatchSlot>, OrdkvError> {
        if let Some(err) = self.failure {
            tx.abort(err.clone());
            return Err(tx.failure().unwrap_or(err));
        }
        if commit {
            tx.commit()?;
        } else if let Some(err) = tx.failure() {
            return Err(err);
        }
        self.slots
            .into_iter()
            .enumerate()
            .map(|(position, slot)| {
                slot.ok_or_else(|| {
                    OrdkvError::Validation(format!("batch entry {position} produced no result"))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::ResultAggregator;
    use crate::catalog::types::Value;
    use crate::commit::batch::BatchSlot;
    use crate::error::OrdkvError;

    #[test]
    fn first_failure_wins() {
        let mut aggregator = ResultAggregator::new(2);
        aggregator.fill(0, BatchSlot::Value(Value::Integer(1)));
        aggregator.fail(OrdkvError::Validation("first".into()));
        aggregator.fail(OrdkvError::Validation("second".into()));
        assert!(aggregator.has_failed());
        assert_eq!(
            aggregator.failure,
            Some(OrdkvError::Validation("first".into()))
        );
    }
}

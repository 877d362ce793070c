// 💾 Loader - CategorizedRecord → SQLite in fixed-size batches
// Each batch is one transaction; a failed batch leaves earlier ones committed

use crate::db::{BatchOutcome, SqliteStore};
use crate::error::Result;
use crate::rules::CategorizedRecord;
use tracing::{error, info};

pub struct Loader<'s> {
    store: &'s mut SqliteStore,
    source_file: String,
    batch_size: usize,
    buffer: Vec<CategorizedRecord>,
    batches_committed: usize,
    totals: BatchOutcome,
}

impl<'s> Loader<'s> {
    pub fn new(store: &'s mut SqliteStore, source_file: &str, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Loader {
            store,
            source_file: source_file.to_string(),
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            batches_committed: 0,
            totals: BatchOutcome::default(),
        }
    }

    /// Buffer a record, committing once the batch is full
    pub fn push(&mut self, record: CategorizedRecord) -> Result<()> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Commit the trailing partial batch and return the totals
    pub fn finish(mut self) -> Result<BatchOutcome> {
        self.flush()?;
        Ok(self.totals)
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let batch_index = self.batches_committed + 1;
        let batch = std::mem::take(&mut self.buffer);

        match self.store.commit_batch(&self.source_file, batch_index, &batch) {
            Ok(outcome) => {
                self.batches_committed += 1;
                self.totals.merge(outcome);
                info!(
                    source_file = %self.source_file,
                    batch = batch_index,
                    records = batch.len(),
                    inserted = outcome.inserted,
                    overwritten = outcome.overwritten,
                    unchanged = outcome.unchanged,
                    "committed batch"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    source_file = %self.source_file,
                    batch = batch_index,
                    records = batch.len(),
                    error = %e,
                    "batch rolled back"
                );
                Err(e)
            }
        }
    }

    /// Totals of the batches committed so far
    pub fn committed(&self) -> BatchOutcome {
        self.totals
    }

    pub fn batches_committed(&self) -> usize {
        self.batches_committed
    }

    /// Records waiting for the next commit
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EtlError;
    use crate::normalizer::NormalizedRecord;
    use crate::rules::Category;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;

    fn record(id: &str) -> CategorizedRecord {
        CategorizedRecord {
            record: NormalizedRecord {
                transaction_id: id.to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
                amount: Decimal::from(1000),
                counterparty: "+250788000111".to_string(),
                body: format!("You have received 1000 RWF ({})", id),
                source_file: "batch.xml".to_string(),
                line: 1,
                id_synthesized: false,
            },
            category: Category::Payment,
        }
    }

    #[test]
    fn test_commits_full_batches_and_tail() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut loader = Loader::new(&mut store, "batch.xml", 2);

        for i in 0..5 {
            loader.push(record(&format!("tx-{}", i))).unwrap();
        }
        assert_eq!(loader.batches_committed(), 2);
        assert_eq!(loader.pending(), 1);

        let totals = loader.finish().unwrap();

        assert_eq!(totals.inserted, 5);
        assert_eq!(store.count_messages().unwrap(), 5);
    }

    #[test]
    fn test_failed_batch_keeps_earlier_batches() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER fail_tx3 BEFORE INSERT ON messages
                 WHEN NEW.transaction_id = 'tx-3'
                 BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
            )
            .unwrap();

        let mut loader = Loader::new(&mut store, "batch.xml", 2);
        loader.push(record("tx-1")).unwrap();
        loader.push(record("tx-2")).unwrap();
        loader.push(record("tx-3")).unwrap();
        let err = loader.push(record("tx-4")).unwrap_err();

        assert!(matches!(err, EtlError::StorageCommit { batch: 2, .. }));
        assert_eq!(loader.committed().inserted, 2);
        assert_eq!(loader.pending(), 0, "failed batch is dropped, not retried");
        drop(loader);

        let ids: Vec<String> = store
            .all_messages()
            .unwrap()
            .into_iter()
            .map(|m| m.transaction_id)
            .collect();
        assert_eq!(ids, vec!["tx-1", "tx-2"]);
    }

    #[test]
    fn test_empty_finish_commits_nothing() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let totals = Loader::new(&mut store, "empty.xml", 10).finish().unwrap();
        assert_eq!(totals.total(), 0);
    }
}

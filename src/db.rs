use crate::error::{EtlError, Result};
use crate::normalizer::{format_timestamp, NormalizedRecord};
use crate::pipeline::{RunStatus, RunSummary};
use crate::rules::{CategorizedRecord, Category};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use std::str::FromStr;

/// Persisted message. `(transaction_id, source_file)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub transaction_id: String,
    pub source_file: String,
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    pub counterparty: String,
    pub body: String,
    pub category: Category,
    pub ingested_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredMessage {
    /// NormalizedRecord view used to re-run classification over stored rows
    pub fn to_normalized(&self) -> NormalizedRecord {
        NormalizedRecord {
            transaction_id: self.transaction_id.clone(),
            timestamp: self.timestamp,
            amount: self.amount,
            counterparty: self.counterparty.clone(),
            body: self.body.clone(),
            source_file: self.source_file.clone(),
            line: 0,
            id_synthesized: self.transaction_id.starts_with("syn-"),
        }
    }
}

/// Result of one upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    /// Same key, same content: nothing written
    Unchanged,
    /// Same key, different content: row overwritten
    Overwritten,
}

/// Counts for one or more committed batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub inserted: usize,
    pub unchanged: usize,
    pub overwritten: usize,
}

impl BatchOutcome {
    pub fn add(&mut self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.inserted += 1,
            UpsertOutcome::Unchanged => self.unchanged += 1,
            UpsertOutcome::Overwritten => self.overwritten += 1,
        }
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.inserted += other.inserted;
        self.unchanged += other.unchanged;
        self.overwritten += other.overwritten;
    }

    pub fn total(&self) -> usize {
        self.inserted + self.unchanged + self.overwritten
    }
}

/// Filters of the read contract `get_messages(skip, limit, category?, start_date?, end_date?)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub skip: usize,
    pub limit: usize,
    pub category: Option<Category>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub min_id: Option<i64>,
    pub max_id: Option<i64>,
}

impl Default for MessageQuery {
    fn default() -> Self {
        MessageQuery {
            skip: 0,
            limit: 100,
            category: None,
            start_date: None,
            end_date: None,
            min_id: None,
            max_id: None,
        }
    }
}

/// Message count and amount total for one category
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryStat {
    pub category: Category,
    pub count: usize,
    pub total_amount: Decimal,
}

/// Totals the dashboard reads: overall counts, category distribution, today's runs
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseStats {
    pub total_messages: usize,
    pub total_amount: Decimal,
    pub categories: Vec<CategoryStat>,
    pub runs_today: usize,
    pub accepted_today: usize,
    pub rejected_today: usize,
}

/// Content fingerprint used to tell a duplicate from a correction
pub fn content_hash(
    timestamp: &DateTime<Utc>,
    amount: &Decimal,
    counterparty: &str,
    body: &str,
    category: Category,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{}",
        format_timestamp(timestamp),
        amount.normalize(),
        counterparty,
        body,
        category
    ));
    format!("{:x}", hasher.finalize())
}

fn record_hash(record: &CategorizedRecord) -> String {
    let r = &record.record;
    content_hash(&r.timestamp, &r.amount, &r.counterparty, &r.body, record.category)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id TEXT NOT NULL,
            source_file TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            amount TEXT NOT NULL,
            counterparty TEXT NOT NULL,
            body TEXT NOT NULL,
            category TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            ingested_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (transaction_id, source_file)
        )",
        [],
    )?;

    // One row per pipeline run (the run summary)
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ingest_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            file TEXT NOT NULL,
            total_read INTEGER NOT NULL,
            accepted INTEGER NOT NULL,
            overwritten INTEGER NOT NULL,
            rejected INTEGER NOT NULL,
            duplicates INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL,
            status TEXT NOT NULL,
            failure TEXT,
            finished_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_category ON messages(category)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
        [],
    )?;

    Ok(())
}

/// Insert, skip or overwrite one record inside an open transaction
pub fn upsert_message(
    tx: &rusqlite::Transaction,
    source_file: &str,
    record: &CategorizedRecord,
    now: &DateTime<Utc>,
) -> rusqlite::Result<UpsertOutcome> {
    let r = &record.record;
    let hash = record_hash(record);
    let now = format_timestamp(now);

    let existing: Option<String> = tx
        .query_row(
            "SELECT content_hash FROM messages WHERE transaction_id = ?1 AND source_file = ?2",
            params![r.transaction_id, source_file],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        None => {
            tx.execute(
                "INSERT INTO messages (
                    transaction_id, source_file, timestamp, amount, counterparty,
                    body, category, content_hash, ingested_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    r.transaction_id,
                    source_file,
                    format_timestamp(&r.timestamp),
                    r.amount.normalize().to_string(),
                    r.counterparty,
                    r.body,
                    record.category.as_str(),
                    hash,
                    now,
                ],
            )?;
            Ok(UpsertOutcome::Inserted)
        }
        Some(existing_hash) if existing_hash == hash => Ok(UpsertOutcome::Unchanged),
        Some(_) => {
            // Overwrite-on-conflict: keep surrogate id and ingested_at
            tx.execute(
                "UPDATE messages
                 SET timestamp = ?3, amount = ?4, counterparty = ?5, body = ?6,
                     category = ?7, content_hash = ?8, updated_at = ?9
                 WHERE transaction_id = ?1 AND source_file = ?2",
                params![
                    r.transaction_id,
                    source_file,
                    format_timestamp(&r.timestamp),
                    r.amount.normalize().to_string(),
                    r.counterparty,
                    r.body,
                    record.category.as_str(),
                    hash,
                    now,
                ],
            )?;
            Ok(UpsertOutcome::Overwritten)
        }
    }
}

fn conversion_error(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}

fn parse_time(row: &Row, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(index)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(index, e))
}

fn message_from_row(row: &Row) -> rusqlite::Result<StoredMessage> {
    let amount: String = row.get(4)?;
    let category: String = row.get(7)?;

    Ok(StoredMessage {
        id: row.get(0)?,
        transaction_id: row.get(1)?,
        source_file: row.get(2)?,
        timestamp: parse_time(row, 3)?,
        amount: Decimal::from_str(&amount).map_err(|e| conversion_error(4, e))?,
        counterparty: row.get(5)?,
        body: row.get(6)?,
        category: category.parse().map_err(|e| conversion_error(7, e))?,
        ingested_at: parse_time(row, 8)?,
        updated_at: parse_time(row, 9)?,
    })
}

/// Inclusive calendar-date bounds on the message timestamp
fn push_date_filters(
    sql: &mut String,
    values: &mut Vec<Value>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) {
    if let Some(start) = start {
        sql.push_str(" AND date(timestamp) >= ?");
        values.push(Value::Text(start.format("%Y-%m-%d").to_string()));
    }
    if let Some(end) = end {
        sql.push_str(" AND date(timestamp) <= ?");
        values.push(Value::Text(end.format("%Y-%m-%d").to_string()));
    }
}

const MESSAGE_COLUMNS: &str = "id, transaction_id, source_file, timestamp, amount, counterparty,
     body, category, ingested_at, updated_at";

// ============================================================================
// STORE
// ============================================================================

/// SQLite-backed message store. The loader is its only writer of `messages`.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        setup_database(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Upsert a whole batch in one transaction; nothing is kept if any row fails
    pub fn commit_batch(
        &mut self,
        source_file: &str,
        batch_index: usize,
        batch: &[CategorizedRecord],
    ) -> Result<BatchOutcome> {
        let commit_error = |source: rusqlite::Error| EtlError::StorageCommit {
            file: source_file.to_string(),
            batch: batch_index,
            source,
        };

        let now = Utc::now();
        let tx = self.conn.transaction().map_err(commit_error)?;
        let mut outcome = BatchOutcome::default();

        for record in batch {
            let result = upsert_message(&tx, source_file, record, &now).map_err(commit_error)?;
            outcome.add(result);
        }

        tx.commit().map_err(commit_error)?;
        Ok(outcome)
    }

    pub fn count_messages(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count)
    }

    /// The read API's data contract, ordered by surrogate id
    pub fn query_messages(&self, query: &MessageQuery) -> Result<Vec<StoredMessage>> {
        let mut sql = format!("SELECT {} FROM messages WHERE 1=1", MESSAGE_COLUMNS);
        let mut values: Vec<Value> = Vec::new();

        if let Some(category) = query.category {
            sql.push_str(" AND category = ?");
            values.push(Value::Text(category.as_str().to_string()));
        }
        push_date_filters(&mut sql, &mut values, query.start_date, query.end_date);
        if let Some(min_id) = query.min_id {
            sql.push_str(" AND id >= ?");
            values.push(Value::Integer(min_id));
        }
        if let Some(max_id) = query.max_id {
            sql.push_str(" AND id <= ?");
            values.push(Value::Integer(max_id));
        }

        sql.push_str(" ORDER BY id LIMIT ? OFFSET ?");
        values.push(Value::Integer(query.limit as i64));
        values.push(Value::Integer(query.skip as i64));

        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params_from_iter(values.iter()), message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(messages)
    }

    pub fn all_messages(&self) -> Result<Vec<StoredMessage>> {
        let sql = format!("SELECT {} FROM messages ORDER BY id", MESSAGE_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let messages = stmt
            .query_map([], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    /// Rewrite categories in one transaction; content hashes follow
    pub fn update_categories(&mut self, changes: &[(StoredMessage, Category)]) -> Result<usize> {
        let now = format_timestamp(&Utc::now());
        let tx = self.conn.transaction()?;

        for (message, category) in changes {
            let hash = content_hash(
                &message.timestamp,
                &message.amount,
                &message.counterparty,
                &message.body,
                *category,
            );
            tx.execute(
                "UPDATE messages SET category = ?1, content_hash = ?2, updated_at = ?3 WHERE id = ?4",
                params![category.as_str(), hash, now, message.id],
            )?;
        }

        tx.commit()?;
        Ok(changes.len())
    }

    /// Count and amount sum per category, largest count first
    pub fn category_stats(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<Vec<CategoryStat>> {
        let mut sql = "SELECT category, amount FROM messages WHERE 1=1".to_string();
        let mut values: Vec<Value> = Vec::new();
        push_date_filters(&mut sql, &mut values, start_date, end_date);

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                let category: String = row.get(0)?;
                let amount: String = row.get(1)?;
                Ok((
                    category.parse::<Category>().map_err(|e| conversion_error(0, e))?,
                    Decimal::from_str(&amount).map_err(|e| conversion_error(1, e))?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        // Amounts are summed as Decimal, not as SQLite REAL
        let mut stats: Vec<CategoryStat> = Vec::new();
        for (category, amount) in rows {
            match stats.iter_mut().find(|s| s.category == category) {
                Some(stat) => {
                    stat.count += 1;
                    stat.total_amount += amount;
                }
                None => stats.push(CategoryStat {
                    category,
                    count: 1,
                    total_amount: amount,
                }),
            }
        }

        for stat in &mut stats {
            stat.total_amount = stat.total_amount.normalize();
        }
        stats.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.category.as_str().cmp(b.category.as_str()))
        });

        Ok(stats)
    }

    pub fn database_stats(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
    ) -> Result<DatabaseStats> {
        let categories = self.category_stats(start_date, end_date)?;

        let (runs_today, accepted_today, rejected_today): (i64, i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(accepted), 0), COALESCE(SUM(rejected), 0)
             FROM ingest_runs
             WHERE date(finished_at) = date('now')",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        Ok(DatabaseStats {
            total_messages: categories.iter().map(|s| s.count).sum(),
            total_amount: categories.iter().map(|s| s.total_amount).sum::<Decimal>().normalize(),
            categories,
            runs_today: runs_today.max(0) as usize,
            accepted_today: accepted_today.max(0) as usize,
            rejected_today: rejected_today.max(0) as usize,
        })
    }

    pub fn record_run(&self, summary: &RunSummary) -> Result<()> {
        let (status, failure) = match &summary.status {
            RunStatus::Done => ("done", None),
            RunStatus::Failed { cause } => ("failed", Some(cause.as_str())),
        };

        self.conn.execute(
            "INSERT INTO ingest_runs (
                run_id, file, total_read, accepted, overwritten, rejected,
                duplicates, duration_ms, status, failure, finished_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                summary.run_id,
                summary.file,
                summary.total_read as i64,
                summary.accepted as i64,
                summary.overwritten as i64,
                summary.rejected as i64,
                summary.duplicates as i64,
                summary.duration_ms as i64,
                status,
                failure,
                format_timestamp(&Utc::now()),
            ],
        )?;

        Ok(())
    }

    /// Most recent run summaries first
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT run_id, file, total_read, accepted, overwritten, rejected,
                    duplicates, duration_ms, status, failure
             FROM ingest_runs
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let runs = stmt
            .query_map([limit as i64], |row| {
                let status: String = row.get(8)?;
                let failure: Option<String> = row.get(9)?;
                let count = |index: usize| -> rusqlite::Result<usize> {
                    Ok(row.get::<_, i64>(index)?.max(0) as usize)
                };

                Ok(RunSummary {
                    run_id: row.get(0)?,
                    file: row.get(1)?,
                    total_read: count(2)?,
                    accepted: count(3)?,
                    overwritten: count(4)?,
                    rejected: count(5)?,
                    duplicates: count(6)?,
                    duration_ms: row.get::<_, i64>(7)?.max(0) as u64,
                    status: if status == "done" {
                        RunStatus::Done
                    } else {
                        RunStatus::Failed {
                            cause: failure.unwrap_or_default(),
                        }
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Helper to build a categorized record with all required fields
    fn create_test_record(id: &str, amount: i64, body: &str, category: Category) -> CategorizedRecord {
        CategorizedRecord {
            record: NormalizedRecord {
                transaction_id: id.to_string(),
                timestamp: Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap(),
                amount: Decimal::from(amount),
                counterparty: "+250788123456".to_string(),
                body: body.to_string(),
                source_file: "test.xml".to_string(),
                line: 1,
                id_synthesized: false,
            },
            category,
        }
    }

    #[test]
    fn test_idempotency_import_twice() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let records = vec![
            create_test_record("tx1", 500, "received 500 RWF", Category::Payment),
            create_test_record("tx2", 120, "transferred 120 RWF", Category::Transfer),
            create_test_record("tx3", 0, "balance 0 RWF", Category::Balance),
        ];

        let first = store.commit_batch("test.xml", 1, &records).unwrap();
        let second = store.commit_batch("test.xml", 1, &records).unwrap();

        assert_eq!(first.inserted, 3, "First import should insert 3 messages");
        assert_eq!(second.inserted, 0, "Second import should insert nothing");
        assert_eq!(second.unchanged, 3);
        assert_eq!(store.count_messages().unwrap(), 3);
    }

    #[test]
    fn test_same_transaction_id_in_other_file_is_distinct() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let records = vec![create_test_record("tx1", 500, "received", Category::Payment)];

        store.commit_batch("a.xml", 1, &records).unwrap();
        store.commit_batch("b.xml", 1, &records).unwrap();

        assert_eq!(store.count_messages().unwrap(), 2);
    }

    #[test]
    fn test_overwrite_on_conflict() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .commit_batch("a.xml", 1, &[create_test_record("tx1", 500, "received", Category::Payment)])
            .unwrap();
        let before = store.all_messages().unwrap().remove(0);

        let corrected = create_test_record("tx1", 550, "received", Category::Payment);
        let outcome = store.commit_batch("a.xml", 1, &[corrected]).unwrap();
        let after = store.all_messages().unwrap().remove(0);

        assert_eq!(outcome.overwritten, 1);
        assert_eq!(store.count_messages().unwrap(), 1);
        assert_eq!(after.amount, Decimal::from(550));
        assert_eq!(after.id, before.id, "surrogate id is kept");
        assert_eq!(after.ingested_at, before.ingested_at);
    }

    #[test]
    fn test_failed_batch_rolls_back_entirely() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON messages
                 WHEN NEW.transaction_id = 'bad'
                 BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
            )
            .unwrap();

        let batch = vec![
            create_test_record("good", 1, "x", Category::Other),
            create_test_record("bad", 2, "y", Category::Other),
        ];
        let result = store.commit_batch("a.xml", 4, &batch);

        match result {
            Err(EtlError::StorageCommit { batch, file, .. }) => {
                assert_eq!(batch, 4);
                assert_eq!(file, "a.xml");
            }
            other => panic!("expected commit error, got {:?}", other),
        }
        assert_eq!(store.count_messages().unwrap(), 0);
    }

    #[test]
    fn test_query_filters() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut late = create_test_record("tx3", 9, "balance", Category::Balance);
        late.record.timestamp = Utc.with_ymd_and_hms(2024, 2, 1, 8, 0, 0).unwrap();
        store
            .commit_batch(
                "a.xml",
                1,
                &[
                    create_test_record("tx1", 1, "received", Category::Payment),
                    create_test_record("tx2", 2, "received", Category::Payment),
                    late,
                ],
            )
            .unwrap();

        let payments = store
            .query_messages(&MessageQuery {
                category: Some(Category::Payment),
                ..MessageQuery::default()
            })
            .unwrap();
        assert_eq!(payments.len(), 2);

        let february = store
            .query_messages(&MessageQuery {
                start_date: NaiveDate::from_ymd_opt(2024, 2, 1),
                end_date: NaiveDate::from_ymd_opt(2024, 2, 29),
                ..MessageQuery::default()
            })
            .unwrap();
        assert_eq!(february.len(), 1);
        assert_eq!(february[0].transaction_id, "tx3");

        let paged = store
            .query_messages(&MessageQuery {
                skip: 1,
                limit: 1,
                ..MessageQuery::default()
            })
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].transaction_id, "tx2");

        let by_id = store
            .query_messages(&MessageQuery {
                min_id: Some(2),
                max_id: Some(3),
                ..MessageQuery::default()
            })
            .unwrap();
        assert_eq!(by_id.len(), 2);
    }

    #[test]
    fn test_stored_message_round_trip_fields() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let record = create_test_record("tx1", 500, "received 500 RWF", Category::Payment);
        store.commit_batch("a.xml", 1, &[record.clone()]).unwrap();

        let stored = store.all_messages().unwrap().remove(0);
        let view = stored.to_normalized();

        assert_eq!(stored.category, Category::Payment);
        assert_eq!(view.timestamp, record.record.timestamp);
        assert_eq!(view.amount, record.record.amount);
        assert_eq!(view.body, record.record.body);
    }

    #[test]
    fn test_category_stats() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let mut february = create_test_record("tx4", 40, "paid", Category::Payment);
        february.record.timestamp = Utc.with_ymd_and_hms(2024, 2, 3, 8, 0, 0).unwrap();
        let mut fraction = create_test_record("tx2", 0, "received", Category::Payment);
        fraction.record.amount = Decimal::new(2050, 2);
        store
            .commit_batch(
                "a.xml",
                1,
                &[
                    create_test_record("tx1", 100, "received", Category::Payment),
                    fraction,
                    create_test_record("tx3", 7, "balance", Category::Balance),
                    february,
                ],
            )
            .unwrap();

        let all = store.category_stats(None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].category, Category::Payment);
        assert_eq!(all[0].count, 3);
        assert_eq!(all[0].total_amount, Decimal::new(16050, 2));
        assert_eq!(all[1].category, Category::Balance);
        assert_eq!(all[1].total_amount, Decimal::from(7));

        let january = store
            .category_stats(None, NaiveDate::from_ymd_opt(2024, 1, 31))
            .unwrap();
        assert_eq!(january[0].count, 2);
        assert_eq!(january[0].total_amount, Decimal::new(12050, 2));

        let empty = store
            .category_stats(NaiveDate::from_ymd_opt(2025, 1, 1), None)
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_database_stats_totals() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .commit_batch(
                "a.xml",
                1,
                &[
                    create_test_record("tx1", 100, "received", Category::Payment),
                    create_test_record("tx2", 30, "sent", Category::Transfer),
                ],
            )
            .unwrap();
        store
            .record_run(&RunSummary {
                run_id: "run-today".into(),
                file: "a.xml".into(),
                total_read: 3,
                accepted: 2,
                overwritten: 0,
                rejected: 1,
                duplicates: 0,
                duration_ms: 1,
                status: RunStatus::Done,
            })
            .unwrap();

        let stats = store.database_stats(None, None).unwrap();

        assert_eq!(stats.total_messages, 2);
        assert_eq!(stats.total_amount, Decimal::from(130));
        assert_eq!(stats.runs_today, 1);
        assert_eq!(stats.accepted_today, 2);
        assert_eq!(stats.rejected_today, 1);
    }

    #[test]
    fn test_run_log() {
        let store = SqliteStore::open_in_memory().unwrap();
        let summary = RunSummary {
            run_id: "run-1".into(),
            file: "a.xml".into(),
            total_read: 3,
            accepted: 1,
            overwritten: 0,
            rejected: 2,
            duplicates: 0,
            duration_ms: 5,
            status: RunStatus::Failed {
                cause: "boom".into(),
            },
        };

        store.record_run(&summary).unwrap();
        let runs = store.recent_runs(10).unwrap();

        assert_eq!(runs, vec![summary]);
    }
}

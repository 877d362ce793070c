// 🔁 Pipeline Orchestrator - parse → normalize → categorize → load
// One file at a time through an explicit run state machine

use crate::config::PipelineConfig;
use crate::db::{content_hash, BatchOutcome, SqliteStore, StoredMessage};
use crate::dead_letter::{DeadLetterEntry, DeadLetterSink, Stage};
use crate::error::{EtlError, FatalParseError, RecordError, Result};
use crate::loader::Loader;
use crate::normalizer::Normalizer;
use crate::parser::{RawRecord, XmlParser};
use crate::rules::{Categorizer, Category};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ============================================================================
// RUN STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Parsing,
    Normalizing,
    Categorizing,
    Loading,
    Summarizing,
    Done,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }

    /// Allowed transitions. Only Normalizing and Loading may repeat.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;

        if next == Failed {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Idle, Parsing)
                | (Parsing, Normalizing)
                | (Parsing, Loading)
                | (Normalizing, Normalizing)
                | (Normalizing, Categorizing)
                | (Normalizing, Loading)
                | (Categorizing, Loading)
                | (Loading, Normalizing)
                | (Loading, Loading)
                | (Loading, Summarizing)
                | (Summarizing, Done)
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunMachine {
    state: RunState,
}

impl RunMachine {
    pub fn new() -> Self {
        RunMachine {
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn advance(&mut self, next: RunState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            return Err(EtlError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Move to Failed; a terminal run stays where it is
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = RunState::Failed;
        }
    }
}

impl Default for RunMachine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// RUN SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunStatus {
    Done,
    Failed { cause: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub file: String,
    pub total_read: usize,
    /// Inserted plus overwritten
    pub accepted: usize,
    pub overwritten: usize,
    pub rejected: usize,
    /// Already stored with identical content
    pub duplicates: usize,
    pub duration_ms: u64,
    pub status: RunStatus,
}

impl RunSummary {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, RunStatus::Failed { .. })
    }
}

/// Counters and state of one in-flight run
struct RunContext {
    run_id: String,
    source_file: String,
    started: Instant,
    machine: RunMachine,
    total_read: usize,
    rejected: usize,
    /// Identical repeats of an entry already seen in this file
    repeated: usize,
    /// transaction id -> content hash of the first entry carrying it
    seen: HashMap<String, String>,
    loaded: BatchOutcome,
}

impl RunContext {
    fn new(source_file: &str) -> Self {
        RunContext {
            run_id: Uuid::new_v4().to_string(),
            source_file: source_file.to_string(),
            started: Instant::now(),
            machine: RunMachine::new(),
            total_read: 0,
            rejected: 0,
            repeated: 0,
            seen: HashMap::new(),
            loaded: BatchOutcome::default(),
        }
    }
}

/// Result of re-running classification over stored messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecategorizeSummary {
    pub examined: usize,
    pub changed: usize,
}

/// File name used as the source identity of a path
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct Pipeline {
    config: PipelineConfig,
    parser: XmlParser,
    normalizer: Normalizer,
    categorizer: Categorizer,
    store: SqliteStore,
    sink: DeadLetterSink,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: SqliteStore, sink: DeadLetterSink) -> Result<Self> {
        config.validate()?;

        Ok(Pipeline {
            parser: XmlParser::new(&config.entry_tags),
            normalizer: Normalizer::new(&config)?,
            categorizer: Categorizer::from_rules(config.rules.clone())?,
            config,
            store,
            sink,
        })
    }

    /// Open the configured database and dead-letter log
    pub fn open(config: PipelineConfig) -> Result<Self> {
        let store = SqliteStore::open(&config.database_path)?;
        let sink = DeadLetterSink::new(config.dead_letter_path());
        Self::new(config, store, sink)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SqliteStore {
        &mut self.store
    }

    pub fn sink(&self) -> &DeadLetterSink {
        &self.sink
    }

    pub fn categorizer(&self) -> &Categorizer {
        &self.categorizer
    }

    /// Process one file. Read errors end the run as Failed like any other fatal error.
    pub fn run_file(&mut self, path: &Path) -> RunSummary {
        let source_file = source_name(path);
        info!(path = %path.display(), "processing file");

        match fs::read(path) {
            Ok(bytes) => self.run_bytes(&source_file, &bytes),
            Err(e) => {
                let run = RunContext::new(&source_file);
                self.conclude(run, Err(EtlError::Io(e)))
            }
        }
    }

    pub fn run_bytes(&mut self, source_file: &str, input: &[u8]) -> RunSummary {
        let mut run = RunContext::new(source_file);

        let parser = self.parser.clone();
        let result = run
            .machine
            .advance(RunState::Parsing)
            .and_then(|()| Ok(parser.parse(input, source_file)?))
            .and_then(|records| self.process(&mut run, records));

        self.conclude(run, result)
    }

    /// Re-drive dead-lettered records through normalize → categorize → load.
    /// Records that fail again are dead-lettered again.
    pub fn replay(&mut self, entries: Vec<DeadLetterEntry>) -> Vec<RunSummary> {
        let mut by_file: BTreeMap<String, Vec<RawRecord>> = BTreeMap::new();
        for entry in entries {
            // Replaying a repeated id would overwrite the entry that was kept
            if entry.reason == RecordError::DuplicateId(String::new()).code() {
                debug!(source_file = %entry.source_file, line = entry.line, "skipping duplicate-id entry");
                continue;
            }
            by_file.entry(entry.source_file).or_default().push(entry.payload);
        }

        let mut summaries = Vec::with_capacity(by_file.len());
        for (source_file, records) in by_file {
            info!(source_file = %source_file, records = records.len(), "replaying dead letters");

            let mut run = RunContext::new(&source_file);
            let result = run
                .machine
                .advance(RunState::Parsing)
                .and_then(|()| self.process(&mut run, records.into_iter().map(Ok)));

            summaries.push(self.conclude(run, result));
        }

        summaries
    }

    fn process<I>(&mut self, run: &mut RunContext, records: I) -> Result<()>
    where
        I: Iterator<Item = std::result::Result<RawRecord, FatalParseError>>,
    {
        let mut loader = Loader::new(&mut self.store, &run.source_file, self.config.batch_size);

        for item in records {
            let raw = item?;
            run.total_read += 1;

            if let Some(reason) = &raw.invalid {
                reject(&mut self.sink, &run.run_id, Stage::Parse, &raw, reason);
                run.rejected += 1;
                continue;
            }

            run.machine.advance(RunState::Normalizing)?;
            let normalized = match self.normalizer.normalize(&raw) {
                Ok(record) => record,
                Err(reason) => {
                    reject(&mut self.sink, &run.run_id, Stage::Normalize, &raw, &reason);
                    run.rejected += 1;
                    continue;
                }
            };

            run.machine.advance(RunState::Categorizing)?;
            let categorized = self.categorizer.categorize(normalized);
            debug!(
                source_file = %run.source_file,
                line = raw.line,
                transaction_id = %categorized.record.transaction_id,
                category = %categorized.category,
                "record accepted"
            );

            run.machine.advance(RunState::Loading)?;
            let record = &categorized.record;
            let hash = content_hash(
                &record.timestamp,
                &record.amount,
                &record.counterparty,
                &record.body,
                categorized.category,
            );
            match run.seen.get(&record.transaction_id) {
                Some(first) if *first == hash => {
                    run.repeated += 1;
                    continue;
                }
                Some(_) => {
                    let reason = RecordError::DuplicateId(record.transaction_id.clone());
                    reject(&mut self.sink, &run.run_id, Stage::Load, &raw, &reason);
                    run.rejected += 1;
                    continue;
                }
                None => {
                    run.seen.insert(record.transaction_id.clone(), hash);
                }
            }

            loader.push(categorized)?;
            run.loaded = loader.committed();
        }

        run.machine.advance(RunState::Loading)?;
        run.loaded = loader.finish()?;
        run.machine.advance(RunState::Summarizing)?;
        Ok(())
    }

    fn conclude(&mut self, mut run: RunContext, result: Result<()>) -> RunSummary {
        let status = match result.and_then(|()| run.machine.advance(RunState::Done)) {
            Ok(()) => RunStatus::Done,
            Err(e) => {
                run.machine.fail();
                error!(source_file = %run.source_file, run_id = %run.run_id, error = %e, "run failed");
                RunStatus::Failed {
                    cause: e.to_string(),
                }
            }
        };

        let summary = RunSummary {
            run_id: run.run_id,
            file: run.source_file,
            total_read: run.total_read,
            accepted: run.loaded.inserted + run.loaded.overwritten,
            overwritten: run.loaded.overwritten,
            rejected: run.rejected,
            duplicates: run.loaded.unchanged + run.repeated,
            duration_ms: run.started.elapsed().as_millis() as u64,
            status,
        };

        info!(
            source_file = %summary.file,
            run_id = %summary.run_id,
            total_read = summary.total_read,
            accepted = summary.accepted,
            rejected = summary.rejected,
            duplicates = summary.duplicates,
            failed = summary.is_failed(),
            "run finished"
        );

        if let Err(e) = self.store.record_run(&summary) {
            warn!(run_id = %summary.run_id, error = %e, "failed to record run summary");
        }

        summary
    }
}

fn reject(sink: &mut DeadLetterSink, run_id: &str, stage: Stage, raw: &RawRecord, reason: &RecordError) {
    warn!(
        source_file = %raw.source_file,
        line = raw.line,
        stage = ?stage,
        reason = reason.code(),
        detail = %reason,
        "record rejected"
    );
    sink.record(&DeadLetterEntry::new(run_id, stage, raw, reason));
}

/// Re-run the categorizer over every stored message and persist label changes
pub fn recategorize(store: &mut SqliteStore, categorizer: &Categorizer) -> Result<RecategorizeSummary> {
    let messages = store.all_messages()?;
    let examined = messages.len();

    let changes: Vec<(StoredMessage, Category)> = messages
        .into_iter()
        .filter_map(|message| {
            let category = categorizer.categorize(message.to_normalized()).category;
            (category != message.category).then_some((message, category))
        })
        .collect();

    let changed = store.update_categories(&changes)?;
    info!(examined, changed, "recategorized stored messages");

    Ok(RecategorizeSummary { examined, changed })
}

// ============================================================================
// TESTS
// ============================================================================

// MoMo ETL - Core Library
// SMS / mobile-money XML exports → normalized, categorized SQLite rows

pub mod config;
pub mod db;
pub mod dead_letter;
pub mod error;
pub mod export;
pub mod loader;
pub mod logging;
pub mod normalizer;
pub mod parser;
pub mod pipeline;
pub mod rules;

// Re-export commonly used types
pub use config::{PhonePolicy, PipelineConfig};
pub use db::{
    content_hash, setup_database, BatchOutcome, CategoryStat, DatabaseStats, MessageQuery,
    SqliteStore, StoredMessage, UpsertOutcome,
};
pub use dead_letter::{read_entries, DeadLetterEntry, DeadLetterSink, Stage};
pub use error::{EtlError, FatalParseError, RecordError, Result};
pub use export::{write_csv, write_json, write_messages, ExportFormat};
pub use loader::Loader;
pub use normalizer::{synthesize_id, NormalizedRecord, Normalizer};
pub use parser::{Field, RawRecord, RawRecords, XmlParser};
pub use pipeline::{
    recategorize, source_name, Pipeline, RecategorizeSummary, RunMachine, RunState, RunStatus,
    RunSummary,
};
pub use rules::{default_rules, CategorizedRecord, Categorizer, Category, CategoryRule};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

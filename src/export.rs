// 📤 Export - stored messages as JSON or CSV

use crate::db::StoredMessage;
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => bail!("unknown export format: {}", other),
        }
    }
}

pub fn write_messages<W: Write>(writer: W, messages: &[StoredMessage], format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Json => write_json(writer, messages),
        ExportFormat::Csv => write_csv(writer, messages),
    }
}

/// Pretty-printed JSON array
pub fn write_json<W: Write>(mut writer: W, messages: &[StoredMessage]) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, messages).context("Failed to write JSON export")?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// One header row, then one row per message
pub fn write_csv<W: Write>(writer: W, messages: &[StoredMessage]) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);

    for message in messages {
        csv_writer
            .serialize(message)
            .with_context(|| format!("Failed to write CSV row for message {}", message.id))?;
    }

    csv_writer.flush()?;
    Ok(())
}

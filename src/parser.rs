// 🏗️ XML Parser - lazy extraction of message entries
// Schema inference over semi-structured SMS / mobile-money exports

use crate::error::{FatalParseError, RecordError};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

// ============================================================================
// CORE TYPES
// ============================================================================

/// Canonical fields every parser output is read through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    TransactionId,
    Timestamp,
    Amount,
    Counterparty,
    Body,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::TransactionId => "transaction_id",
            Field::Timestamp => "timestamp",
            Field::Amount => "amount",
            Field::Counterparty => "counterparty",
            Field::Body => "body",
        }
    }

    /// Source names accepted for this field, in order of preference
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            Field::TransactionId => &["transaction_id", "tx_id", "txid", "id", "reference"],
            Field::Timestamp => &["timestamp", "datetime", "date", "readable_date", "time"],
            Field::Amount => &["amount", "value"],
            Field::Counterparty => &["counterparty", "sender", "address", "from", "recipient", "to"],
            Field::Body => &["body", "content", "text", "message"],
        }
    }
}

/// RawRecord - one XML entry before validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Lowercased attribute / child element name → raw text
    pub fields: BTreeMap<String, String>,

    // Provenance
    pub source_file: String,
    pub line: usize,
    pub raw_xml: String,

    /// Set when the entry is structurally unusable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalid: Option<RecordError>,
}

impl RawRecord {
    pub fn new(source_file: &str, line: usize) -> Self {
        RawRecord {
            fields: BTreeMap::new(),
            source_file: source_file.to_string(),
            line,
            raw_xml: String::new(),
            invalid: None,
        }
    }

    /// Builder pattern: add a raw field
    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_lowercase(), value.to_string());
        self
    }

    /// First present alias of a canonical field
    pub fn get(&self, field: Field) -> Option<&str> {
        field
            .aliases()
            .iter()
            .find_map(|alias| self.fields.get(*alias))
            .map(String::as_str)
    }

    pub fn has(&self, field: Field) -> bool {
        self.get(field).is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.invalid.is_none()
    }
}

// ============================================================================
// PARSER
// ============================================================================

const REQUIRED_FIELDS: [Field; 2] = [Field::Timestamp, Field::Body];

#[derive(Debug, Clone)]
pub struct XmlParser {
    entry_tags: Vec<String>,
}

impl XmlParser {
    pub fn new(entry_tags: &[String]) -> Self {
        XmlParser {
            entry_tags: entry_tags.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    /// Validate the whole document, then hand back a lazy record stream.
    ///
    /// A document that is not well-formed fails here, before any record is
    /// produced.
    pub fn parse<'a>(
        &'a self,
        input: &'a [u8],
        source_file: &str,
    ) -> Result<RawRecords<'a>, FatalParseError> {
        let text = std::str::from_utf8(input)
            .map_err(|e| FatalParseError::Encoding(e.to_string()))?;

        check_well_formed(text)?;

        Ok(RawRecords {
            reader: Reader::from_str(text),
            input: text,
            source_file: source_file.to_string(),
            parser: self,
            line_cursor: (0, 1),
            done: false,
        })
    }

    fn is_entry(&self, element: &BytesStart) -> bool {
        let name = local_name(element);
        self.entry_tags.iter().any(|tag| *tag == name)
    }
}

/// Single pass over every event; rejects anything not well-formed
fn check_well_formed(text: &str) -> Result<(), FatalParseError> {
    let mut reader = Reader::from_str(text);
    let mut depth = 0usize;
    let mut roots = 0usize;

    loop {
        let position = reader.buffer_position() as usize;
        let event = reader.read_event().map_err(|e| malformed(position, e))?;

        match event {
            Event::Start(ref element) | Event::Empty(ref element) => {
                for attr in element.attributes() {
                    let attr = attr.map_err(|e| malformed(position, e))?;
                    attr.unescape_value().map_err(|e| malformed(position, e))?;
                }
                if depth == 0 {
                    roots += 1;
                    if roots > 1 {
                        return Err(FatalParseError::Malformed {
                            position,
                            message: "more than one root element".into(),
                        });
                    }
                }
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Text(t) => {
                if depth == 0 && !t.iter().all(u8::is_ascii_whitespace) {
                    return Err(FatalParseError::Malformed {
                        position,
                        message: "text outside of the root element".into(),
                    });
                }
                t.unescape().map_err(|e| malformed(position, e))?;
            }
            Event::CData(_) if depth == 0 => {
                return Err(FatalParseError::Malformed {
                    position,
                    message: "CDATA outside of the root element".into(),
                });
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if roots == 0 {
        return Err(FatalParseError::Malformed {
            position: 0,
            message: "document has no root element".into(),
        });
    }
    if depth != 0 {
        return Err(FatalParseError::Malformed {
            position: text.len(),
            message: format!("{} element(s) left unclosed", depth),
        });
    }

    Ok(())
}

fn malformed(position: usize, error: impl std::fmt::Display) -> FatalParseError {
    FatalParseError::Malformed {
        position,
        message: error.to_string(),
    }
}

fn local_name(element: &BytesStart) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).to_lowercase()
}

// ============================================================================
// RECORD STREAM
// ============================================================================

/// Finite, one-pass iterator over the entries of a validated document
pub struct RawRecords<'a> {
    reader: Reader<&'a [u8]>,
    input: &'a str,
    source_file: String,
    parser: &'a XmlParser,
    /// (byte offset, line number at that offset)
    line_cursor: (usize, usize),
    done: bool,
}

impl<'a> RawRecords<'a> {
    fn line_at(&mut self, position: usize) -> usize {
        let (offset, line) = self.line_cursor;
        let position = position.clamp(offset, self.input.len());
        let newlines = self.input.as_bytes()[offset..position]
            .iter()
            .filter(|b| **b == b'\n')
            .count();
        self.line_cursor = (position, line + newlines);
        line + newlines
    }

    fn read_entry(
        &mut self,
        start: BytesStart<'a>,
        start_pos: usize,
        self_closing: bool,
    ) -> Result<RawRecord, FatalParseError> {
        // Skip leading whitespace so the line points at the opening tag
        let tag_pos = self.input[start_pos..]
            .find('<')
            .map_or(start_pos, |offset| start_pos + offset);
        let line = self.line_at(tag_pos);
        let mut record = RawRecord::new(&self.source_file, line);

        for attr in start.attributes() {
            let attr = attr.map_err(|e| malformed(start_pos, e))?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_lowercase();
            let value = attr.unescape_value().map_err(|e| malformed(start_pos, e))?;
            record.fields.entry(key).or_insert_with(|| value.into_owned());
        }

        if !self_closing {
            let own_text = self.read_children(&mut record.fields)?;
            let own_text = own_text.trim();
            if !own_text.is_empty() && !record.has(Field::Body) {
                record.fields.insert("body".into(), own_text.to_string());
            }
        }

        let end_pos = self.reader.buffer_position() as usize;
        record.raw_xml = self.input[start_pos..end_pos.min(self.input.len())]
            .trim()
            .to_string();

        for field in REQUIRED_FIELDS {
            if !record.has(field) {
                record.invalid = Some(RecordError::MissingField(field.name().to_string()));
                break;
            }
        }

        Ok(record)
    }

    /// Collect leaf child elements into `fields`; returns the entry's own text
    fn read_children(
        &mut self,
        fields: &mut BTreeMap<String, String>,
    ) -> Result<String, FatalParseError> {
        let mut own_text = String::new();
        let mut open: Vec<String> = Vec::new();
        let mut child_text = String::new();

        loop {
            let position = self.reader.buffer_position() as usize;
            match self.reader.read_event().map_err(|e| malformed(position, e))? {
                Event::Start(e) => {
                    open.push(local_name(&e));
                    child_text.clear();
                }
                Event::Empty(e) => {
                    fields.entry(local_name(&e)).or_default();
                }
                Event::Text(t) => {
                    let text = t.unescape().map_err(|e| malformed(position, e))?;
                    if open.is_empty() {
                        own_text.push_str(&text);
                    } else {
                        child_text.push_str(&text);
                    }
                }
                Event::CData(c) => {
                    let text = String::from_utf8_lossy(&c);
                    if open.is_empty() {
                        own_text.push_str(&text);
                    } else {
                        child_text.push_str(&text);
                    }
                }
                Event::End(_) => match open.pop() {
                    Some(name) => {
                        fields
                            .entry(name)
                            .or_insert_with(|| child_text.trim().to_string());
                        child_text.clear();
                    }
                    None => return Ok(own_text),
                },
                Event::Eof => {
                    return Err(FatalParseError::Malformed {
                        position,
                        message: "document ended inside an entry".into(),
                    })
                }
                _ => {}
            }
        }
    }
}

impl<'a> Iterator for RawRecords<'a> {
    type Item = Result<RawRecord, FatalParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let start_pos = self.reader.buffer_position() as usize;
            let event = match self.reader.read_event() {
                Ok(event) => event,
                Err(e) => {
                    self.done = true;
                    return Some(Err(malformed(start_pos, e)));
                }
            };

            let (start, self_closing) = match event {
                Event::Start(e) if self.parser.is_entry(&e) => (e, false),
                Event::Empty(e) if self.parser.is_entry(&e) => (e, true),
                Event::Eof => {
                    self.done = true;
                    return None;
                }
                _ => continue,
            };

            let result = self.read_entry(start, start_pos, self_closing);
            match &result {
                Ok(record) => debug!(
                    source_file = %record.source_file,
                    line = record.line,
                    valid = record.is_valid(),
                    "parsed entry"
                ),
                Err(_) => self.done = true,
            }
            return Some(result);
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

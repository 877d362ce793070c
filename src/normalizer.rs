// 🧹 Normalizer - RawRecord → NormalizedRecord
// Fixed rule order: whitespace, timestamp, amount, phone numbers, transaction id

use crate::config::{PhonePolicy, PipelineConfig};
use crate::error::{EtlError, RecordError};
use crate::parser::{Field, RawRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;

/// Canonical, typed record. Timestamp and amount are always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub transaction_id: String,
    pub timestamp: DateTime<Utc>,
    pub amount: Decimal,
    pub counterparty: String,
    pub body: String,

    // Provenance
    pub source_file: String,
    pub line: usize,

    /// True when `transaction_id` was derived from the record content
    #[serde(default)]
    pub id_synthesized: bool,
}

/// Storage and hashing representation of an instant
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// TEXT HELPERS
// ============================================================================

/// Drop control characters, trim, collapse runs of whitespace to one space
pub fn clean_text(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| word.chars().filter(|c| !c.is_control()).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keep only `[A-Za-z0-9_-]`
pub fn clean_id(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Deterministic id from (timestamp, amount, body hash)
pub fn synthesize_id(timestamp: &DateTime<Utc>, amount: &Decimal, body: &str) -> String {
    let body_hash = Sha256::digest(body.as_bytes());

    let mut hasher = Sha256::new();
    hasher.update(format!(
        "{}|{}|{:x}",
        format_timestamp(timestamp),
        amount.normalize(),
        body_hash
    ));
    let digest = format!("{:x}", hasher.finalize());

    format!("syn-{}", &digest[..32])
}

// ============================================================================
// NORMALIZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct Normalizer {
    timestamp_formats: Vec<String>,
    accept_epoch: bool,
    country_code: String,
    phone_policy: PhonePolicy,

    currency_token: Regex,
    plain_amount: Regex,
    amount_in_body: Regex,
    currency_after: Regex,
    phone_in_body: Regex,
    phone_like: Regex,
}

impl Normalizer {
    pub fn new(config: &PipelineConfig) -> Result<Self, EtlError> {
        let codes = config
            .currency_codes
            .iter()
            .map(|code| regex::escape(code.trim()))
            .filter(|code| !code.is_empty())
            .collect::<Vec<_>>()
            .join("|");
        let codes = if codes.is_empty() { "[A-Z]{3}".to_string() } else { codes };

        // Thousands groups use either commas or single spaces, never both
        let number = r"(-?(?:\d{1,3}(?:,\d{3})+|\d{1,3}(?: \d{3})+|\d+)(?:\.\d+)?)";
        let build = |pattern: String| {
            Regex::new(&pattern).map_err(|e| EtlError::Config(format!("bad pattern: {}", e)))
        };

        Ok(Normalizer {
            timestamp_formats: config.timestamp_formats.clone(),
            accept_epoch: config.accept_epoch_timestamps,
            country_code: config.default_country_code.clone(),
            phone_policy: config.phone_policy,
            currency_token: build(format!(r"(?i)(?:{})|[$€£]", codes))?,
            plain_amount: build(
                r"^-?(?:\d{1,3}(?:,\d{3})+|\d{1,3}(?: \d{3})+|\d+)(?:\.\d+)?$".to_string(),
            )?,
            currency_after: build(format!(r"(?i)^\s*(?:(?:{})\b|[$€£])", codes))?,
            amount_in_body: build(format!(
                r"(?i)(?:{codes})\s*{number}|{number}\s*(?:{codes})\b|[$€£]\s*{number}",
                codes = codes,
                number = number
            ))?,
            phone_in_body: build(
                r"\+\d{6,15}\b|\+\d{1,3}(?:[ -]\d{2,4}){2,5}\b|\(?\b0\d{2,3}\)?[ -]\d{3}[ -]\d{3,4}\b"
                    .to_string(),
            )?,
            phone_like: build(r"^\+?[\d\s().-]+$".to_string())?,
        })
    }

    /// Apply every normalization rule in order, or say why the record is rejected
    pub fn normalize(&self, raw: &RawRecord) -> Result<NormalizedRecord, RecordError> {
        if let Some(reason) = &raw.invalid {
            return Err(reason.clone());
        }

        // 1. Whitespace
        let field = |f: Field| raw.get(f).map(clean_text);
        let body = field(Field::Body).unwrap_or_default();

        // 2. Timestamp
        let timestamp_raw = field(Field::Timestamp)
            .ok_or_else(|| RecordError::MissingField(Field::Timestamp.name().to_string()))?;
        let timestamp = self.parse_timestamp(&timestamp_raw)?;

        // 3. Amount, falling back to the first currency-tagged figure in the body
        let amount = match field(Field::Amount).filter(|a| !a.is_empty()) {
            Some(amount) => self.parse_amount(&amount)?,
            None => self.amount_from_body(&body)?,
        };

        // 4. Phone numbers
        let counterparty = self.normalize_counterparty(&field(Field::Counterparty).unwrap_or_default());
        let body = self.normalize_phones_in_body(&body);

        // 5. Transaction id
        let (transaction_id, id_synthesized) = match field(Field::TransactionId)
            .map(|id| clean_id(&id))
            .filter(|id| !id.is_empty())
        {
            Some(id) => (id, false),
            None => (synthesize_id(&timestamp, &amount, &body), true),
        };

        Ok(NormalizedRecord {
            transaction_id,
            timestamp,
            amount,
            counterparty,
            body,
            source_file: raw.source_file.clone(),
            line: raw.line,
            id_synthesized,
        })
    }

    pub fn parse_timestamp(&self, value: &str) -> Result<DateTime<Utc>, RecordError> {
        let value = value.trim();

        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(dt.with_timezone(&Utc));
        }

        for format in &self.timestamp_formats {
            if format.contains("%z") || format.contains("%:z") || format.contains("%#z") {
                if let Ok(dt) = DateTime::parse_from_str(value, format) {
                    return Ok(dt.with_timezone(&Utc));
                }
                continue;
            }

            // Offset-less formats are read as UTC
            if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
                return Ok(Utc.from_utc_datetime(&naive));
            }
            if let Some(midnight) = NaiveDate::parse_from_str(value, format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
            {
                return Ok(Utc.from_utc_datetime(&midnight));
            }
        }

        if self.accept_epoch && value.chars().all(|c| c.is_ascii_digit()) {
            let epoch = match (value.len(), value.parse::<i64>()) {
                (13, Ok(millis)) => Utc.timestamp_millis_opt(millis).single(),
                (10, Ok(secs)) => Utc.timestamp_opt(secs, 0).single(),
                _ => None,
            };
            if let Some(dt) = epoch {
                return Ok(dt);
            }
        }

        Err(RecordError::InvalidTimestamp(value.to_string()))
    }

    /// Monetary value with optional currency tag and thousands separators
    pub fn parse_amount(&self, value: &str) -> Result<Decimal, RecordError> {
        let invalid = || RecordError::InvalidAmount(value.to_string());

        let without_currency = self.currency_token.replace_all(value, "");
        let stripped = without_currency.trim().trim_end_matches(',').trim_end();

        if !self.plain_amount.is_match(stripped) {
            return Err(invalid());
        }

        let digits: String = stripped.chars().filter(|c| *c != ',' && *c != ' ').collect();
        let amount = Decimal::from_str(&digits).map_err(|_| invalid())?;
        if amount < Decimal::ZERO {
            return Err(invalid());
        }

        Ok(amount.normalize())
    }

    fn amount_from_body(&self, body: &str) -> Result<Decimal, RecordError> {
        let figure = self
            .amount_in_body
            .captures(body)
            .and_then(|caps| caps.iter().skip(1).flatten().next())
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| RecordError::InvalidAmount("no amount in record".to_string()))?;

        self.parse_amount(&figure)
    }

    /// `+<country><subscriber>` (or its redacted form) when `candidate` is a plausible number
    pub fn canonical_phone(&self, candidate: &str) -> Option<String> {
        let candidate = candidate.trim();
        let digits: String = candidate.chars().filter(|c| c.is_ascii_digit()).collect();
        let cc = self.country_code.as_str();

        let full = if candidate.starts_with('+') {
            digits
        } else if let Some(subscriber) = digits.strip_prefix('0') {
            format!("{}{}", cc, subscriber)
        } else if digits.starts_with(cc) && digits.len() > 10 {
            digits
        } else {
            format!("{}{}", cc, digits)
        };

        if !(8..=15).contains(&full.len()) {
            return None;
        }

        Some(match self.phone_policy {
            PhonePolicy::Normalize => format!("+{}", full),
            PhonePolicy::Redact => {
                let keep = full.len() - 3;
                format!("+{}{}", "*".repeat(keep), &full[keep..])
            }
        })
    }

    fn normalize_counterparty(&self, counterparty: &str) -> String {
        let digit_count = counterparty.chars().filter(|c| c.is_ascii_digit()).count();
        if digit_count >= 7 && self.phone_like.is_match(counterparty) {
            if let Some(phone) = self.canonical_phone(counterparty) {
                return phone;
            }
        }
        counterparty.to_string()
    }

    fn normalize_phones_in_body(&self, body: &str) -> String {
        self.phone_in_body
            .replace_all(body, |caps: &Captures| {
                let found = &caps[0];
                // A figure followed by a currency tag is an amount
                let rest = caps.get(0).map_or("", |m| &body[m.end()..]);
                if self.currency_after.is_match(rest) {
                    return found.to_string();
                }
                self.canonical_phone(found)
                    .unwrap_or_else(|| found.to_string())
            })
            .into_owned()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn normalizer() -> Normalizer {
        Normalizer::new(&PipelineConfig::default()).unwrap()
    }

    fn raw(fields: &[(&str, &str)]) -> RawRecord {
        fields
            .iter()
            .fold(RawRecord::new("test.xml", 1), |r, (k, v)| r.with_field(k, v))
    }

    #[test]
    fn test_clean_text_collapses_whitespace_and_controls() {
        assert_eq!(
            clean_text("  Payment \n\t received:\x07  $100.00  "),
            "Payment received: $100.00"
        );
        assert_eq!(clean_text("   "), "");
    }

    #[test]
    fn test_timestamp_formats() {
        let n = normalizer();
        let expected = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 0).unwrap();

        assert_eq!(n.parse_timestamp("2024-01-05T10:00:00Z").unwrap(), expected);
        assert_eq!(n.parse_timestamp("2024-01-05T12:00:00+02:00").unwrap(), expected);
        assert_eq!(n.parse_timestamp("2024-01-05 10:00:00").unwrap(), expected);
        assert_eq!(n.parse_timestamp("2024-01-05T10:00:00").unwrap(), expected);
        assert_eq!(n.parse_timestamp("2024-01-05 10:00:00.000").unwrap(), expected);
        assert_eq!(n.parse_timestamp("5 Jan 2024 10:00:00 AM").unwrap(), expected);
        assert_eq!(n.parse_timestamp("1704448800000").unwrap(), expected);
        assert_eq!(n.parse_timestamp("1704448800").unwrap(), expected);

        let date_only = n.parse_timestamp("2024-01-05").unwrap();
        assert_eq!(date_only.day(), 5);
    }

    #[test]
    fn test_unparseable_timestamp_rejected() {
        let n = normalizer();
        assert_eq!(
            n.parse_timestamp("not-a-date"),
            Err(RecordError::InvalidTimestamp("not-a-date".into()))
        );
        assert!(n.parse_timestamp("2024-13-45").is_err());
        assert!(n.parse_timestamp("12345").is_err());
    }

    #[test]
    fn test_epoch_can_be_disabled() {
        let config = PipelineConfig {
            accept_epoch_timestamps: false,
            ..PipelineConfig::default()
        };
        let n = Normalizer::new(&config).unwrap();
        assert!(n.parse_timestamp("1704448800000").is_err());
    }

    #[test]
    fn test_amount_parsing() {
        let n = normalizer();
        assert_eq!(n.parse_amount("500").unwrap(), Decimal::from(500));
        assert_eq!(n.parse_amount("1,500 RWF").unwrap(), Decimal::from(1500));
        assert_eq!(n.parse_amount("RWF 2000").unwrap(), Decimal::from(2000));
        assert_eq!(n.parse_amount("$12.50").unwrap(), Decimal::new(125, 1));
        assert_eq!(n.parse_amount("500.00").unwrap().to_string(), "500");
    }

    #[test]
    fn test_negative_or_non_numeric_amount_rejected() {
        let n = normalizer();
        assert_eq!(
            n.parse_amount("-250"),
            Err(RecordError::InvalidAmount("-250".into()))
        );
        assert!(n.parse_amount("abc").is_err());
        assert!(n.parse_amount("1.2.3").is_err());
        assert!(n.parse_amount("").is_err());
    }

    #[test]
    fn test_amount_taken_from_body_when_field_missing() {
        let n = normalizer();
        let record = n
            .normalize(&raw(&[
                ("timestamp", "2024-01-05 10:00:00"),
                ("body", "You have received 2,000 RWF from Jane Smith."),
            ]))
            .unwrap();
        assert_eq!(record.amount, Decimal::from(2000));

        let missing = n.normalize(&raw(&[
            ("timestamp", "2024-01-05 10:00:00"),
            ("body", "Welcome to MoMo"),
        ]));
        assert!(matches!(missing, Err(RecordError::InvalidAmount(_))));
    }

    #[test]
    fn test_space_grouped_amounts() {
        let n = normalizer();
        assert_eq!(n.parse_amount("100 000 RWF").unwrap(), Decimal::from(100_000));
        assert!(n.parse_amount("1 00").is_err());
        assert!(n.parse_amount("1,000 000").is_err());

        let record = n
            .normalize(&raw(&[
                ("timestamp", "2024-01-05 10:00:00"),
                ("body", "You have received 100 000 000 RWF from Bob"),
            ]))
            .unwrap();

        assert_eq!(record.amount, Decimal::from(100_000_000));
        // The figure before the currency tag is not mistaken for a phone number
        assert_eq!(record.body, "You have received 100 000 000 RWF from Bob");
    }

    #[test]
    fn test_grouped_reference_not_rewritten_as_phone() {
        let n = normalizer();
        let record = n
            .normalize(&raw(&[
                ("timestamp", "2024-01-05 10:00:00"),
                ("amount", "10"),
                ("body", "Payment ref 123-456-7890 completed, call 0788 123 456"),
            ]))
            .unwrap();

        assert_eq!(
            record.body,
            "Payment ref 123-456-7890 completed, call +250788123456"
        );
    }

    #[test]
    fn test_canonical_phone_forms() {
        let n = normalizer();
        assert_eq!(n.canonical_phone("0788 123 456").as_deref(), Some("+250788123456"));
        assert_eq!(n.canonical_phone("+1-234-567-8900").as_deref(), Some("+12345678900"));
        assert_eq!(n.canonical_phone("250788123456").as_deref(), Some("+250788123456"));
        assert_eq!(n.canonical_phone("788123456").as_deref(), Some("+250788123456"));
        assert_eq!(n.canonical_phone("+12"), None);
    }

    #[test]
    fn test_phones_rewritten_in_counterparty_and_body() {
        let n = normalizer();
        let record = n
            .normalize(&raw(&[
                ("id", "tx1"),
                ("timestamp", "2024-01-05 10:00:00"),
                ("amount", "500"),
                ("sender", " 0788-123-456 "),
                ("body", "Sent 500 RWF to +250 788 999 000 ref 76662021700"),
            ]))
            .unwrap();

        assert_eq!(record.counterparty, "+250788123456");
        // Bare digit runs (transaction references) are left alone
        assert_eq!(record.body, "Sent 500 RWF to +250788999000 ref 76662021700");
    }

    #[test]
    fn test_named_counterparty_untouched() {
        let n = normalizer();
        let record = n
            .normalize(&raw(&[
                ("timestamp", "2024-01-05"),
                ("amount", "1"),
                ("sender", "M-Money"),
                ("body", "hello"),
            ]))
            .unwrap();
        assert_eq!(record.counterparty, "M-Money");
    }

    #[test]
    fn test_redact_policy_masks_digits() {
        let config = PipelineConfig {
            phone_policy: PhonePolicy::Redact,
            ..PipelineConfig::default()
        };
        let n = Normalizer::new(&config).unwrap();
        assert_eq!(n.canonical_phone("0788123456").as_deref(), Some("+*********456"));
    }

    #[test]
    fn test_transaction_id_cleaned() {
        let n = normalizer();
        let record = n
            .normalize(&raw(&[
                ("id", " msg#001 "),
                ("timestamp", "2024-01-05"),
                ("amount", "1"),
                ("body", "x"),
            ]))
            .unwrap();
        assert_eq!(record.transaction_id, "msg001");
        assert!(!record.id_synthesized);
    }

    #[test]
    fn test_synthesized_id_is_deterministic() {
        let n = normalizer();
        let input = raw(&[
            ("timestamp", "2024-01-05 10:00:00"),
            ("amount", "500"),
            ("body", "You have received 500 RWF"),
        ]);

        let first = n.normalize(&input).unwrap();
        let second = n.normalize(&input).unwrap();

        assert!(first.id_synthesized);
        assert!(first.transaction_id.starts_with("syn-"));
        assert_eq!(first.transaction_id.len(), 36);
        assert_eq!(first.transaction_id, second.transaction_id);

        // Different content, different id
        let other = n
            .normalize(&raw(&[
                ("timestamp", "2024-01-05 10:00:00"),
                ("amount", "501"),
                ("body", "You have received 500 RWF"),
            ]))
            .unwrap();
        assert_ne!(first.transaction_id, other.transaction_id);
    }

    #[test]
    fn test_parser_marked_invalid_passes_through() {
        let n = normalizer();
        let mut input = raw(&[("body", "x")]);
        input.invalid = Some(RecordError::MissingField("timestamp".into()));
        assert_eq!(
            n.normalize(&input),
            Err(RecordError::MissingField("timestamp".into()))
        );
    }
}

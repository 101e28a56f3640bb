// 📥 Ingest - CSV / JSON files into a NormalizedLedger
//
// Column names are fixed (with a few common aliases). Amounts come either
// from an `amount` column or from `debit` - `credit`. Timestamps accept
// ISO datetimes and a handful of common date layouts (midnight assumed).

use crate::ledger::{JournalEntry, NormalizedLedger};
use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d-%b-%Y",
    "%d-%b-%y",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y%m%d",
    "%B %d, %Y",
    "%b %d, %Y",
    "%d-%m-%Y",
    "%m-%d-%Y",
];

/// Numeric or textual amount cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountField {
    Number(f64),
    Text(String),
}

impl AmountField {
    fn value(&self) -> Result<f64> {
        match self {
            AmountField::Number(n) => Ok(*n),
            AmountField::Text(s) => parse_amount(s),
        }
    }
}

/// One input row before typing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryRow {
    #[serde(alias = "id")]
    pub entry_id: String,

    #[serde(alias = "posting_date", alias = "date")]
    pub posted_at: String,

    #[serde(default)]
    pub amount: Option<AmountField>,
    #[serde(default)]
    pub debit: Option<AmountField>,
    #[serde(default)]
    pub credit: Option<AmountField>,

    #[serde(default)]
    pub currency: Option<String>,

    #[serde(default, alias = "account")]
    pub account_code: String,

    #[serde(default, alias = "user")]
    pub user_id: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub sequence_number: Option<String>,

    #[serde(default)]
    pub period: Option<String>,
}

impl EntryRow {
    /// Type the row; missing currency → USD, missing period → YYYY-MM
    pub fn into_entry(self) -> Result<JournalEntry> {
        let posted_at = parse_datetime(&self.posted_at)
            .with_context(|| format!("entry '{}': bad posted_at", self.entry_id))?;

        let amount = match (&self.amount, &self.debit, &self.credit) {
            (Some(amount), _, _) => amount.value()?,
            (None, None, None) => {
                return Err(anyhow!(
                    "entry '{}': no amount (looked for 'amount', 'debit', 'credit')",
                    self.entry_id
                ))
            }
            (None, debit, credit) => {
                let dr = debit.as_ref().map(AmountField::value).transpose()?.unwrap_or(0.0);
                let cr = credit.as_ref().map(AmountField::value).transpose()?.unwrap_or(0.0);
                dr - cr
            }
        };

        let mut entry = JournalEntry::new(
            self.entry_id.trim(),
            posted_at,
            amount,
            self.account_code.trim(),
            self.user_id.trim(),
        );

        if let Some(currency) = self.currency.filter(|c| !c.trim().is_empty()) {
            entry = entry.with_currency(currency.trim().to_uppercase());
        }
        if let Some(description) = self.description {
            entry = entry.with_description(description);
        }
        if let Some(sequence) = self.sequence_number.filter(|s| !s.trim().is_empty()) {
            entry = entry.with_sequence(sequence);
        }
        if let Some(period) = self.period.filter(|p| !p.trim().is_empty()) {
            entry = entry.with_period(period.trim());
        }

        Ok(entry)
    }
}

/// Parse a timestamp in any of the accepted layouts
pub fn parse_datetime(raw: &str) -> Result<NaiveDateTime> {
    let trimmed = raw.trim();

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt);
            }
        }
    }

    Err(anyhow!("unrecognized date/time '{}'", raw))
}

/// Parse "1,234.50", "$99", "(250.00)" style amounts
pub fn parse_amount(raw: &str) -> Result<f64> {
    let mut cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | ' '))
        .collect();

    let negative = cleaned.starts_with('(') && cleaned.ends_with(')');
    if negative {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }

    let value: f64 = cleaned
        .parse()
        .with_context(|| format!("invalid amount '{}'", raw))?;
    if !value.is_finite() {
        return Err(anyhow!("invalid amount '{}'", raw));
    }

    Ok(if negative { -value } else { value })
}

pub fn ledger_from_rows(rows: Vec<EntryRow>) -> Result<NormalizedLedger> {
    let entries = rows
        .into_iter()
        .map(EntryRow::into_entry)
        .collect::<Result<Vec<_>>>()?;
    let ledger = NormalizedLedger::new(entries).context("Ledger validation failed")?;
    Ok(ledger)
}

/// Read a CSV document (header row required)
pub fn read_csv<R: Read>(reader: R) -> Result<NormalizedLedger> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let mut entries = Vec::new();
    for (line_num, result) in reader.deserialize::<EntryRow>().enumerate() {
        // +2: 1-indexed plus the header row
        let row = result.with_context(|| format!("Failed to parse CSV line {}", line_num + 2))?;
        let entry = row
            .into_entry()
            .with_context(|| format!("Invalid entry on CSV line {}", line_num + 2))?;
        entries.push(entry);
    }

    debug!(entries = entries.len(), "read CSV ledger");
    let ledger = NormalizedLedger::new(entries).context("Ledger validation failed")?;
    Ok(ledger)
}

pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<NormalizedLedger> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    read_csv(file).with_context(|| format!("Failed to load {}", path.display()))
}

/// Read a JSON array of rows
pub fn read_json(content: &str) -> Result<NormalizedLedger> {
    let rows: Vec<EntryRow> =
        serde_json::from_str(content).context("Failed to parse ledger JSON")?;
    ledger_from_rows(rows)
}

pub fn load_json<P: AsRef<Path>>(path: P) -> Result<NormalizedLedger> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;
    read_json(&content).with_context(|| format!("Failed to load {}", path.display()))
}

/// Pick the reader from the file extension (.csv or .json)
pub fn load_ledger<P: AsRef<Path>>(path: P) -> Result<NormalizedLedger> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match extension.as_deref() {
        Some("csv") => load_csv(path),
        Some("json") => load_json(path),
        _ => Err(anyhow!(
            "Unsupported ledger file: {} (expected .csv or .json)",
            path.display()
        )),
    }
}

// ============================================================================
// TESTS
// ============================================================================

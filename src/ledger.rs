// 📒 Ledger Model - Journal entries and the immutable ledger snapshot
//
// The ledger is built once per dataset and shared read-only by every
// detector, the profiler and the aggregator for the length of a run.

use crate::error::{AuditError, AuditResult};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

/// Largest accepted |amount|; keeps every amount representable in i64 cents
pub const MAX_ABS_AMOUNT: f64 = 1e15;

// ============================================================================
// JOURNAL ENTRY
// ============================================================================

/// One general-ledger posting, already typed by ingestion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Unique identifier within the dataset
    pub entry_id: String,

    /// When the entry was posted
    pub posted_at: NaiveDateTime,

    /// Signed amount (positive = debit, negative = credit)
    pub amount: f64,

    /// ISO 4217 currency code
    pub currency: String,

    pub account_code: String,

    /// Preparer of the entry
    pub user_id: String,

    #[serde(default)]
    pub description: String,

    /// Raw posting number, e.g. "JE-000123" (optional column)
    #[serde(default)]
    pub sequence_number: Option<String>,

    /// Accounting period label, e.g. "2024-12"
    #[serde(default)]
    pub period: String,
}

impl JournalEntry {
    /// Create an entry with the required fields; optional fields start empty
    pub fn new(
        entry_id: impl Into<String>,
        posted_at: NaiveDateTime,
        amount: f64,
        account_code: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        JournalEntry {
            entry_id: entry_id.into(),
            posted_at,
            amount,
            currency: "USD".to_string(),
            account_code: account_code.into(),
            user_id: user_id.into(),
            description: String::new(),
            sequence_number: None,
            period: posted_at.format("%Y-%m").to_string(),
        }
    }

    /// Builder pattern: set description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder pattern: set sequence number
    pub fn with_sequence(mut self, sequence: impl Into<String>) -> Self {
        self.sequence_number = Some(sequence.into());
        self
    }

    /// Builder pattern: set currency
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Builder pattern: set period label
    pub fn with_period(mut self, period: impl Into<String>) -> Self {
        self.period = period.into();
        self
    }

    pub fn posted_date(&self) -> NaiveDate {
        self.posted_at.date()
    }

    /// Absolute amount in integer cents
    pub fn amount_cents(&self) -> i64 {
        self.signed_cents().abs()
    }

    /// Signed amount in integer cents
    ///
    /// Exact for any amount accepted by `NormalizedLedger::new`.
    pub fn signed_cents(&self) -> i64 {
        (self.amount * 100.0).round() as i64
    }
}

// ============================================================================
// NORMALIZED LEDGER
// ============================================================================

/// Ordered, immutable snapshot of one uploaded dataset
///
/// Cloning is cheap: entries are shared behind an `Arc` and never mutated.
#[derive(Debug, Clone)]
pub struct NormalizedLedger {
    entries: Arc<Vec<JournalEntry>>,
    index: Arc<HashMap<String, usize>>,
}

impl NormalizedLedger {
    /// Build a ledger, enforcing unique non-empty ids and finite amounts
    pub fn new(entries: Vec<JournalEntry>) -> AuditResult<Self> {
        let mut index = HashMap::with_capacity(entries.len());

        for (position, entry) in entries.iter().enumerate() {
            if entry.entry_id.trim().is_empty() {
                return Err(AuditError::validation(format!(
                    "entry at position {} has an empty entry_id",
                    position
                )));
            }

            if !entry.amount.is_finite() {
                return Err(AuditError::validation(format!(
                    "entry '{}' has a non-finite amount",
                    entry.entry_id
                )));
            }

            if entry.amount.abs() > MAX_ABS_AMOUNT {
                return Err(AuditError::validation(format!(
                    "entry '{}' amount {} exceeds the supported magnitude {:e}",
                    entry.entry_id, entry.amount, MAX_ABS_AMOUNT
                )));
            }

            if index.insert(entry.entry_id.clone(), position).is_some() {
                return Err(AuditError::validation(format!(
                    "entry_id '{}' appears more than once",
                    entry.entry_id
                )));
            }
        }

        Ok(NormalizedLedger {
            entries: Arc::new(entries),
            index: Arc::new(index),
        })
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, JournalEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by id
    pub fn get(&self, entry_id: &str) -> Option<&JournalEntry> {
        self.index.get(entry_id).map(|&i| &self.entries[i])
    }

    /// Ledger position of an entry
    pub fn position(&self, entry_id: &str) -> Option<usize> {
        self.index.get(entry_id).copied()
    }

    pub fn amounts(&self) -> Vec<f64> {
        self.entries.iter().map(|e| e.amount).collect()
    }

    /// Latest posting date, used as the default reference date
    pub fn latest_posting_date(&self) -> Option<NaiveDate> {
        self.entries.iter().map(|e| e.posted_date()).max()
    }

    /// SHA-256 over every field of every entry, in ledger order
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for e in self.entries.iter() {
            hasher.update(format!(
                "{}|{}|{}|{}|{}|{}|{}|{}|{}\n",
                e.entry_id,
                e.posted_at,
                e.amount,
                e.currency,
                e.account_code,
                e.user_id,
                e.description,
                e.sequence_number.as_deref().unwrap_or(""),
                e.period
            ));
        }
        format!("{:x}", hasher.finalize())
    }

    /// Soft data-quality observations that do not block analysis
    pub fn quality_notes(&self) -> Vec<String> {
        let mut notes = Vec::new();

        let currencies: BTreeSet<&str> = self
            .entries
            .iter()
            .map(|e| e.currency.as_str())
            .collect();
        if currencies.len() > 1 {
            notes.push(format!(
                "ledger mixes {} currencies ({}); amounts are compared without conversion",
                currencies.len(),
                currencies.into_iter().collect::<Vec<_>>().join(", ")
            ));
        }

        let blank_users = self
            .entries
            .iter()
            .filter(|e| e.user_id.trim().is_empty())
            .count();
        if blank_users > 0 {
            notes.push(format!(
                "{} entries have no user_id and are profiled under an empty user",
                blank_users
            ));
        }

        let blank_accounts = self
            .entries
            .iter()
            .filter(|e| e.account_code.trim().is_empty())
            .count();
        if blank_accounts > 0 {
            notes.push(format!("{} entries have no account_code", blank_accounts));
        }

        notes
    }

    /// Distinct preparers in the ledger
    pub fn user_count(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.user_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn at(date: &str, hour: u32) -> NaiveDateTime {
        NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    pub(crate) fn entry(id: &str, date: &str, amount: f64, account: &str) -> JournalEntry {
        JournalEntry::new(id, at(date, 10), amount, account, "alice")
    }

    #[test]
    fn test_ledger_rejects_duplicate_ids() {
        let result = NormalizedLedger::new(vec![
            entry("JE-1", "2024-03-01", 10.0, "4000"),
            entry("JE-1", "2024-03-02", 20.0, "4000"),
        ]);

        assert!(matches!(result, Err(AuditError::Validation(_))));
    }

    #[test]
    fn test_ledger_rejects_non_finite_amount() {
        let result = NormalizedLedger::new(vec![entry("JE-1", "2024-03-01", f64::NAN, "4000")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_ledger_rejects_blank_id() {
        let result = NormalizedLedger::new(vec![entry("  ", "2024-03-01", 1.0, "4000")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_lookup_and_latest_date() {
        let ledger = NormalizedLedger::new(vec![
            entry("JE-1", "2024-03-01", 10.0, "4000"),
            entry("JE-2", "2024-03-09", 20.0, "4000"),
            entry("JE-3", "2024-03-05", 30.0, "4000"),
        ])
        .unwrap();

        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.get("JE-2").unwrap().amount, 20.0);
        assert_eq!(ledger.position("JE-3"), Some(2));
        assert_eq!(
            ledger.latest_posting_date(),
            NaiveDate::from_ymd_opt(2024, 3, 9)
        );
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = NormalizedLedger::new(vec![entry("JE-1", "2024-03-01", 10.0, "4000")]).unwrap();
        let b = NormalizedLedger::new(vec![entry("JE-1", "2024-03-01", 10.0, "4000")]).unwrap();
        let c = NormalizedLedger::new(vec![entry("JE-1", "2024-03-01", 10.5, "4000")]).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn test_quality_notes_mixed_currency() {
        let ledger = NormalizedLedger::new(vec![
            entry("JE-1", "2024-03-01", 10.0, "4000"),
            entry("JE-2", "2024-03-01", 10.0, "4000").with_currency("EUR"),
        ])
        .unwrap();

        let notes = ledger.quality_notes();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("EUR, USD"));
    }

    #[test]
    fn test_ledger_rejects_amount_beyond_cents_range() {
        let result = NormalizedLedger::new(vec![
            entry("JE-1", "2024-03-01", 1.0e17, "4000"),
            entry("JE-2", "2024-03-01", 3.0e17, "4000"),
        ]);
        assert!(matches!(result, Err(AuditError::Validation(_))));

        let edge = NormalizedLedger::new(vec![entry("JE-1", "2024-03-01", -MAX_ABS_AMOUNT, "4000")])
            .unwrap();
        assert_eq!(edge.entries()[0].signed_cents(), -100_000_000_000_000_000);
    }

    #[test]
    fn test_amount_cents_rounds() {
        let e = entry("JE-1", "2024-03-01", -1234.56, "4000");
        assert_eq!(e.amount_cents(), 123456);
        assert_eq!(e.signed_cents(), -123456);
        assert_eq!(e.period, "2024-03");
    }
}

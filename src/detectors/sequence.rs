// 🔗 Sequence Gap Detector - missing or reused posting numbers
//
// A sequence number splits into a series prefix and a trailing integer:
// "JE-000123" → ("JE-", 123), "77" → ("", 77). Series are checked
// independently. Entries without a sequence number are skipped.

use super::{AnomalyFlag, Detector, Severity};
use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::ledger::{JournalEntry, NormalizedLedger};
use std::collections::BTreeMap;

pub const NAME: &str = "sequence_gap";

const COLUMN: &str = "sequence_number";

pub struct SequenceGapDetector;

/// Split a raw sequence number into (series, number)
pub fn parse_sequence(raw: &str) -> Result<(String, u64), DetectorError> {
    let trimmed = raw.trim();
    let digits_start = trimmed
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i);

    let start = digits_start.ok_or_else(|| DetectorError::MalformedColumn {
        column: COLUMN.to_string(),
        detail: format!("'{}' has no trailing number", raw),
    })?;

    let number = trimmed[start..]
        .parse::<u64>()
        .map_err(|e| DetectorError::MalformedColumn {
            column: COLUMN.to_string(),
            detail: format!("'{}': {}", raw, e),
        })?;

    Ok((trimmed[..start].to_string(), number))
}

impl Detector for SequenceGapDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let rules = &config.sequence;

        let mut series: BTreeMap<String, Vec<(u64, &JournalEntry)>> = BTreeMap::new();
        for entry in ledger.iter() {
            let raw = match entry.sequence_number.as_deref() {
                Some(raw) if !raw.trim().is_empty() => raw,
                _ => continue,
            };
            let (prefix, number) = parse_sequence(raw)?;
            series.entry(prefix).or_default().push((number, entry));
        }

        if series.is_empty() {
            return Err(DetectorError::MissingColumn {
                column: COLUMN.to_string(),
            });
        }

        let mut flags = Vec::new();

        for (prefix, numbers) in series.iter_mut() {
            numbers.sort_by(|(na, a), (nb, b)| {
                na.cmp(nb)
                    .then_with(|| a.posted_at.cmp(&b.posted_at))
                    .then_with(|| a.entry_id.cmp(&b.entry_id))
            });

            let label = if prefix.is_empty() { "(unprefixed)" } else { prefix.as_str() };
            let mut previous: Option<(u64, &JournalEntry)> = None;

            for &(number, entry) in numbers.iter() {
                match previous {
                    Some((prev, holder)) if prev == number => {
                        flags.push(
                            AnomalyFlag::new(
                                &entry.entry_id,
                                NAME,
                                Severity::High,
                                1.0,
                                format!(
                                    "Sequence number {} in series {} already used by {}",
                                    number, label, holder.entry_id
                                ),
                            )
                            .related_to(&holder.entry_id),
                        );
                        // Keep the first holder as the reference
                        continue;
                    }
                    Some((prev, holder)) => {
                        let missing = number - prev - 1;
                        if missing > rules.max_tolerated_gap {
                            let severity = if missing > rules.high_gap {
                                Severity::High
                            } else {
                                Severity::Medium
                            };
                            flags.push(
                                AnomalyFlag::new(
                                    &entry.entry_id,
                                    NAME,
                                    severity,
                                    missing as f64,
                                    format!(
                                        "{} number(s) missing before {} in series {} ({}..={})",
                                        missing,
                                        number,
                                        label,
                                        prev + 1,
                                        number - 1
                                    ),
                                )
                                .related_to(&holder.entry_id),
                            );
                        }
                    }
                    None => {}
                }
                previous = Some((number, entry));
            }
        }

        Ok(flags)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::entry;

    fn seq(id: &str, sequence: &str) -> JournalEntry {
        entry(id, "2024-05-01", 10.0, "1000").with_sequence(sequence)
    }

    fn run(entries: Vec<JournalEntry>) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let ledger = NormalizedLedger::new(entries).unwrap();
        SequenceGapDetector.detect(&ledger, &AnalysisConfig::default())
    }

    #[test]
    fn test_parse_sequence() {
        assert_eq!(parse_sequence("JE-000123").unwrap(), ("JE-".to_string(), 123));
        assert_eq!(parse_sequence(" 77 ").unwrap(), ("".to_string(), 77));
        assert!(parse_sequence("JE-ABC").is_err());
    }

    #[test]
    fn test_gap_flags_entry_after_gap() {
        let flags = run(vec![seq("a", "JE-1"), seq("b", "JE-2"), seq("c", "JE-5")]).unwrap();

        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].entry_id, "c");
        assert_eq!(flags[0].raw_score, 2.0);
        assert_eq!(flags[0].severity, Severity::Medium);
        assert_eq!(flags[0].related_entry_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_reused_number_flagged_high() {
        let flags = run(vec![seq("a", "JE-1"), seq("b", "JE-2"), seq("c", "JE-2")]).unwrap();

        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].entry_id, "c");
        assert_eq!(flags[0].severity, Severity::High);
    }

    #[test]
    fn test_series_are_independent() {
        let flags = run(vec![
            seq("a", "AP-1"),
            seq("b", "JE-1"),
            seq("c", "AP-2"),
            seq("d", "JE-2"),
        ])
        .unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn test_entries_without_sequence_are_skipped() {
        let flags = run(vec![
            seq("a", "1"),
            entry("b", "2024-05-01", 10.0, "1000"),
            seq("c", "2"),
        ])
        .unwrap();
        assert!(flags.is_empty());
    }

    #[test]
    fn test_missing_column_is_error() {
        let err = run(vec![entry("a", "2024-05-01", 10.0, "1000")]).unwrap_err();
        assert!(matches!(err, DetectorError::MissingColumn { .. }));
    }

    #[test]
    fn test_malformed_value_is_error() {
        let err = run(vec![seq("a", "JE-1"), seq("b", "n/a")]).unwrap_err();
        assert!(matches!(err, DetectorError::MalformedColumn { .. }));
    }

    #[test]
    fn test_large_gap_is_high() {
        let flags = run(vec![seq("a", "100"), seq("b", "200")]).unwrap();
        assert_eq!(flags[0].severity, Severity::High);
    }
}

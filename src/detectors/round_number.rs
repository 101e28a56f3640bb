// 🎯 Round Number Detector - material amounts that are exact multiples
//
// Compared in integer cents so 1000.0 and 999.9999999 never get confused.
// Amounts with sub-cent fractions are not round by definition.

use super::{AnomalyFlag, Detector, Severity};
use crate::config::{AnalysisConfig, RoundNumberConfig};
use crate::error::DetectorError;
use crate::ledger::{JournalEntry, NormalizedLedger};

pub const NAME: &str = "round_number";

pub struct RoundNumberDetector;

impl Detector for RoundNumberDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let rules = &config.round_number;
        let threshold_cents = (rules.threshold * 100.0).round() as i64;
        if threshold_cents <= 0 {
            return Err(DetectorError::Precondition(
                "round threshold is below one cent".to_string(),
            ));
        }

        let flags = ledger
            .iter()
            .filter_map(|entry| {
                let magnitude = entry.amount.abs();
                if magnitude < rules.materiality_floor {
                    return None;
                }

                let cents = exact_cents(entry)?;
                if cents == 0 || cents % threshold_cents != 0 {
                    return None;
                }

                let zeros = trailing_zeros(cents / 100);
                Some(AnomalyFlag::new(
                    &entry.entry_id,
                    NAME,
                    severity_for(zeros, rules),
                    zeros as f64,
                    format!(
                        "Round amount {:.2} {} is a multiple of {:.2} ({} trailing zeros)",
                        entry.amount, entry.currency, rules.threshold, zeros
                    ),
                ))
            })
            .collect();

        Ok(flags)
    }
}

/// Absolute cents when the amount has no sub-cent remainder
fn exact_cents(entry: &JournalEntry) -> Option<i64> {
    let scaled = entry.amount.abs() * 100.0;
    let cents = entry.amount_cents();
    if (scaled - cents as f64).abs() > 1e-6 * scaled.max(1.0) {
        return None;
    }
    Some(cents)
}

/// Trailing decimal zeros of a whole-unit amount
fn trailing_zeros(mut units: i64) -> u32 {
    if units == 0 {
        return 0;
    }
    let mut zeros = 0;
    while units % 10 == 0 {
        units /= 10;
        zeros += 1;
    }
    zeros
}

fn severity_for(zeros: u32, rules: &RoundNumberConfig) -> Severity {
    if zeros >= rules.high_trailing_zeros {
        Severity::High
    } else if zeros >= rules.medium_trailing_zeros {
        Severity::Medium
    } else {
        Severity::Low
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::entry;

    fn run(amounts: &[f64]) -> Vec<AnomalyFlag> {
        let entries = amounts
            .iter()
            .enumerate()
            .map(|(i, a)| entry(&format!("JE-{}", i), "2024-05-01", *a, "6000"))
            .collect();
        let ledger = NormalizedLedger::new(entries).unwrap();
        RoundNumberDetector
            .detect(&ledger, &AnalysisConfig::default())
            .unwrap()
    }

    #[test]
    fn test_trailing_zero_count() {
        assert_eq!(trailing_zeros(1000), 3);
        assert_eq!(trailing_zeros(1_250_000), 4);
        assert_eq!(trailing_zeros(7), 0);
    }

    #[test]
    fn test_flags_multiples_above_floor() {
        let flags = run(&[1000.0, 50.0, 1500.0, 2000.5, -3000.0]);
        let ids: Vec<&str> = flags.iter().map(|f| f.entry_id.as_str()).collect();

        assert_eq!(ids, vec!["JE-0", "JE-4"]);
        assert!(flags.iter().all(|f| f.severity == Severity::Low));
    }

    #[test]
    fn test_severity_scales_with_zeros() {
        let flags = run(&[10_000.0, 2_000_000.0]);

        assert_eq!(flags[0].severity, Severity::Medium);
        assert_eq!(flags[0].raw_score, 4.0);
        assert_eq!(flags[1].severity, Severity::High);
    }

    #[test]
    fn test_sub_cent_fraction_is_not_round() {
        assert!(run(&[1000.004]).is_empty());
    }

    #[test]
    fn test_below_materiality_floor() {
        let ledger = NormalizedLedger::new(vec![entry("JE-1", "2024-05-01", 100.0, "6000")]).unwrap();
        let mut config = AnalysisConfig::default();
        config.round_number.threshold = 100.0;

        assert!(RoundNumberDetector.detect(&ledger, &config).unwrap().is_empty());

        config.round_number.materiality_floor = 100.0;
        assert_eq!(RoundNumberDetector.detect(&ledger, &config).unwrap().len(), 1);
    }
}

// 🪙 Near-Zero Detector - postings too small to be real business

use super::{AnomalyFlag, Detector, Severity};
use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::ledger::NormalizedLedger;

pub const NAME: &str = "near_zero";

pub struct NearZeroDetector;

impl Detector for NearZeroDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let floor = config.near_zero.floor;

        let flags = ledger
            .iter()
            .filter(|entry| entry.amount.abs() < floor)
            .map(|entry| {
                AnomalyFlag::new(
                    &entry.entry_id,
                    NAME,
                    Severity::Low,
                    floor - entry.amount.abs(),
                    format!(
                        "Near-zero amount {:.2} {} (below {:.2})",
                        entry.amount, entry.currency, floor
                    ),
                )
            })
            .collect();

        Ok(flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::entry;

    fn run(amounts: &[f64], config: &AnalysisConfig) -> Vec<AnomalyFlag> {
        let entries = amounts
            .iter()
            .enumerate()
            .map(|(i, a)| entry(&format!("JE-{}", i), "2024-05-01", *a, "6000"))
            .collect();
        let ledger = NormalizedLedger::new(entries).unwrap();
        NearZeroDetector.detect(&ledger, config).unwrap()
    }

    #[test]
    fn test_flags_amounts_below_one() {
        let flags = run(&[0.25, -0.99, 1.0, 0.0, 42.0], &AnalysisConfig::default());
        let ids: Vec<&str> = flags.iter().map(|f| f.entry_id.as_str()).collect();

        assert_eq!(ids, vec!["JE-0", "JE-1", "JE-3"]);
        assert!(flags.iter().all(|f| f.severity == Severity::Low));
    }

    #[test]
    fn test_configurable_floor() {
        let mut config = AnalysisConfig::default();
        config.near_zero.floor = 50.0;

        assert_eq!(run(&[0.25, 42.0, 50.0], &config).len(), 2);
    }
}

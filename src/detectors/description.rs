// 📝 Description Detector - suspicious or missing narrative
//
// Manual adjustments tend to carry vague descriptions ("misc", "temp",
// "suspense"). Keywords match whole words, case-insensitively.

use super::{AnomalyFlag, Detector, Severity};
use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::ledger::NormalizedLedger;

pub const NAME: &str = "description";

pub struct DescriptionDetector;

impl Detector for DescriptionDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let rules = &config.description;
        let keywords: Vec<String> = rules
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let mut flags = Vec::new();

        for entry in ledger.iter() {
            let text = entry.description.trim();

            if text.is_empty() {
                if rules.flag_blank {
                    flags.push(AnomalyFlag::new(
                        &entry.entry_id,
                        NAME,
                        Severity::Low,
                        1.0,
                        "Description is empty",
                    ));
                }
                continue;
            }

            let lowered = text.to_lowercase();
            let words: Vec<&str> = lowered
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .collect();

            let hits: Vec<&str> = keywords
                .iter()
                .filter(|k| words.iter().any(|w| *w == k.as_str()))
                .map(|k| k.as_str())
                .collect();

            if !hits.is_empty() {
                flags.push(AnomalyFlag::new(
                    &entry.entry_id,
                    NAME,
                    Severity::Low,
                    hits.len() as f64,
                    format!("Suspicious description '{}' ({})", text, hits.join(", ")),
                ));
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

    fn run(descriptions: &[&str]) -> Vec<AnomalyFlag> {
        let entries = descriptions
            .iter()
            .enumerate()
            .map(|(i, d)| entry(&format!("JE-{}", i), "2024-05-01", 10.0, "1000").with_description(*d))
            .collect();
        let ledger = NormalizedLedger::new(entries).unwrap();
        DescriptionDetector
            .detect(&ledger, &AnalysisConfig::default())
            .unwrap()
    }

    #[test]
    fn test_keyword_whole_word_match() {
        let flags = run(&["Manual adjust - year end", "Office supplies", "Temporary staff"]);

        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].entry_id, "JE-0");
        assert_eq!(flags[0].raw_score, 2.0);
    }

    #[test]
    fn test_case_insensitive() {
        let flags = run(&["SUSPENSE"]);
        assert_eq!(flags.len(), 1);
    }

    #[test]
    fn test_blank_description() {
        let flags = run(&["   "]);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].explanation, "Description is empty");
    }
}

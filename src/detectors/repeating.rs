// 🔁 Repeating Entry Detector - same account, amount and narrative
//
// Unlike the duplicate detector there is no date window: an identical
// (account, currency, signed cents, description) posted twice anywhere in
// the dataset is flagged. Descriptions compare trimmed and case-insensitive;
// blank descriptions are left to the description detector.

use super::{AnomalyFlag, Detector, Severity};
use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::ledger::{JournalEntry, NormalizedLedger};
use std::collections::BTreeMap;

pub const NAME: &str = "repeating";

pub struct RepeatingEntryDetector;

impl Detector for RepeatingEntryDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let min_occurrences = config.repeating.min_occurrences;

        let mut groups: BTreeMap<(&str, &str, i64, String), Vec<&JournalEntry>> = BTreeMap::new();
        for entry in ledger.iter() {
            let description = entry.description.trim().to_lowercase();
            if description.is_empty() {
                continue;
            }
            groups
                .entry((
                    entry.account_code.as_str(),
                    entry.currency.as_str(),
                    entry.signed_cents(),
                    description,
                ))
                .or_default()
                .push(entry);
        }

        let mut flags = Vec::new();

        for group in groups.values_mut() {
            if group.len() < min_occurrences {
                continue;
            }

            group.sort_by(|a, b| {
                a.posted_at
                    .cmp(&b.posted_at)
                    .then_with(|| a.entry_id.cmp(&b.entry_id))
            });

            let first = group[0];
            let occurrences = group.len();
            for later in &group[1..] {
                flags.push(
                    AnomalyFlag::new(
                        &later.entry_id,
                        NAME,
                        Severity::Low,
                        occurrences as f64,
                        format!(
                            "Repeats {} ({} occurrences): account {} | {:.2} {} | '{}'",
                            first.entry_id,
                            occurrences,
                            later.account_code,
                            later.amount,
                            later.currency,
                            later.description.trim()
                        ),
                    )
                    .related_to(&first.entry_id),
                );
            }
        }

        Ok(flags)
    }
}

// ============================================================================
// TESTS
// ============================================================================

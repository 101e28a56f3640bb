// 🔍 Duplicate Detector - same account, same amount, close posting dates
//
// Within each (account, currency, amount) group entries are ordered by
// (posting date, entry_id). An entry is a duplicate of the earliest entry in
// that order posted no more than `window_days` before it. The ordering makes
// the choice of "original" independent of input order.

use super::{AnomalyFlag, Detector, Severity};
use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::ledger::{JournalEntry, NormalizedLedger};
use std::collections::BTreeMap;

pub const NAME: &str = "duplicate";

pub struct DuplicateDetector;

impl Detector for DuplicateDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let window = config.duplicate.window_days;
        let mut flags = Vec::new();

        // Group by exact key (signed cents: a reversal is not a duplicate)
        let mut groups: BTreeMap<(&str, &str, i64), Vec<&JournalEntry>> = BTreeMap::new();
        for entry in ledger.iter() {
            groups
                .entry((
                    entry.account_code.as_str(),
                    entry.currency.as_str(),
                    entry.signed_cents(),
                ))
                .or_default()
                .push(entry);
        }

        for group in groups.values_mut() {
            if group.len() < 2 {
                continue;
            }

            group.sort_by(|a, b| {
                a.posted_date()
                    .cmp(&b.posted_date())
                    .then_with(|| a.entry_id.cmp(&b.entry_id))
            });

            // Earliest candidate original within the window (dates are sorted)
            let mut lo = 0;
            for j in 1..group.len() {
                let later = group[j];
                while (later.posted_date() - group[lo].posted_date()).num_days() > window {
                    lo += 1;
                }
                if lo == j {
                    continue;
                }

                let original = group[lo];
                let days_apart = (later.posted_date() - original.posted_date()).num_days();
                let severity = if days_apart == 0 {
                    Severity::High
                } else {
                    Severity::Medium
                };
                let confidence = 1.0 - days_apart as f64 / (window as f64 + 1.0);

                flags.push(
                    AnomalyFlag::new(
                        &later.entry_id,
                        NAME,
                        severity,
                        confidence,
                        format!(
                            "Possible duplicate of {}: account {} | {:.2} {} | {} day(s) apart",
                            original.entry_id,
                            later.account_code,
                            later.amount,
                            later.currency,
                            days_apart
                        ),
                    )
                    .related_to(&original.entry_id),
                );
            }
        }

        Ok(flags)
    }
}

// ============================================================================
// TESTS
// ============================================================================

// 📈 Outlier Detector - robust tests on amount magnitude
//
// Baselines use median/MAD or quartiles so the outliers being hunted do not
// drag the baseline toward themselves. Only unusually large magnitudes are
// flagged.

use super::{AnomalyFlag, Detector, Severity};
use crate::config::{AnalysisConfig, OutlierConfig, OutlierMethod, OutlierScope};
use crate::error::DetectorError;
use crate::ledger::{JournalEntry, NormalizedLedger};
use crate::stats::{quartiles, RobustBaseline};
use std::collections::BTreeMap;

pub const NAME: &str = "outlier";

pub struct OutlierDetector;

/// Fitted baseline for one group of magnitudes
#[derive(Debug, Clone, Copy)]
enum Baseline {
    Robust(RobustBaseline),
    Fences { q3: f64, iqr: f64 },
}

impl Baseline {
    fn fit(values: &[f64], method: OutlierMethod) -> Option<Self> {
        match method {
            OutlierMethod::RobustZ => RobustBaseline::from_values(values).map(Baseline::Robust),
            OutlierMethod::Iqr => {
                let (q1, q3) = quartiles(values)?;
                let iqr = q3 - q1;
                if iqr > 0.0 {
                    Some(Baseline::Fences { q3, iqr })
                } else {
                    None
                }
            }
        }
    }

    /// (severity, raw score, description) when `magnitude` is an outlier
    fn assess(&self, magnitude: f64, rules: &OutlierConfig) -> Option<(Severity, f64, String)> {
        match *self {
            Baseline::Robust(b) => {
                let z = b.z_score(magnitude);
                if z < rules.z_cutoff {
                    return None;
                }
                let severity = if z >= 2.0 * rules.z_cutoff {
                    Severity::High
                } else {
                    Severity::Medium
                };
                Some((
                    severity,
                    z,
                    format!("robust z-score {:.2} (median {:.2})", z, b.median),
                ))
            }
            Baseline::Fences { q3, iqr } => {
                let upper = q3 + rules.iqr_multiplier * iqr;
                if magnitude <= upper {
                    return None;
                }
                let severity = if magnitude > q3 + 2.0 * rules.iqr_multiplier * iqr {
                    Severity::High
                } else {
                    Severity::Medium
                };
                Some((
                    severity,
                    (magnitude - q3) / iqr,
                    format!("above upper fence {:.2} (Q3 {:.2}, IQR {:.2})", upper, q3, iqr),
                ))
            }
        }
    }
}

impl Detector for OutlierDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let rules = &config.outlier;
        let all: Vec<f64> = ledger.iter().map(|e| e.amount.abs()).collect();

        let global = if all.len() >= rules.min_group_size {
            Baseline::fit(&all, rules.method)
        } else {
            None
        };

        let mut flags = Vec::new();

        match rules.scope {
            OutlierScope::Global => {
                if let Some(baseline) = global {
                    let entries: Vec<&JournalEntry> = ledger.iter().collect();
                    flag_group(&entries, &baseline, "all accounts", rules, &mut flags);
                }
            }
            OutlierScope::PerAccount => {
                let mut accounts: BTreeMap<&str, Vec<&JournalEntry>> = BTreeMap::new();
                for entry in ledger.iter() {
                    accounts
                        .entry(entry.account_code.as_str())
                        .or_default()
                        .push(entry);
                }

                for (account, entries) in accounts {
                    let own = if entries.len() >= rules.min_group_size {
                        let values: Vec<f64> = entries.iter().map(|e| e.amount.abs()).collect();
                        Baseline::fit(&values, rules.method)
                    } else {
                        None
                    };

                    match (own, global) {
                        (Some(baseline), _) => {
                            let scope = format!("account {}", account);
                            flag_group(&entries, &baseline, &scope, rules, &mut flags);
                        }
                        (None, Some(baseline)) => {
                            flag_group(&entries, &baseline, "all accounts", rules, &mut flags);
                        }
                        (None, None) => {}
                    }
                }
            }
        }

        // Report in ledger order regardless of grouping
        flags.sort_by_key(|f| ledger.position(&f.entry_id));
        Ok(flags)
    }
}

fn flag_group(
    entries: &[&JournalEntry],
    baseline: &Baseline,
    scope: &str,
    rules: &OutlierConfig,
    flags: &mut Vec<AnomalyFlag>,
) {
    for entry in entries {
        if let Some((severity, score, detail)) = baseline.assess(entry.amount.abs(), rules) {
            flags.push(AnomalyFlag::new(
                &entry.entry_id,
                NAME,
                severity,
                score,
                format!(
                    "Unusually large amount {:.2} for {}: {}",
                    entry.amount, scope, detail
                ),
            ));
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

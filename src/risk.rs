// ⚖️ Risk Aggregator - many signals, one bounded score
//
// raw   = Σ severity_weight × detector_multiplier
//       + deviation_weight × max(0, deviation - deviation_floor)
// score = 100 × (1 - e^(-raw / k)), rounded to 2 decimals
//
// Contributions are summed in sorted order so the score is bit-identical
// however the flags arrived. Every term is non-negative, so adding a flag
// never lowers the score.

use crate::config::AnalysisConfig;
use crate::detectors::{AnomalyFlag, Severity};
use crate::ledger::JournalEntry;
use crate::profiler::Deviation;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Source label of the behavioral deviation contribution
pub const DEVIATION_SOURCE: &str = "user_deviation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
            RiskTier::Critical => "critical",
        }
    }
}

/// One term of the raw score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskContribution {
    /// Detector name or `user_deviation`
    pub source: String,
    pub severity: Option<Severity>,
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub entry_id: String,

    /// Bounded score in [0, 100]
    pub score: f64,

    pub tier: RiskTier,

    /// Unbounded sum of contributions
    pub raw: f64,

    /// Canonical order, largest first
    pub contributions: Vec<RiskContribution>,
}

pub struct RiskAggregator<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> RiskAggregator<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        RiskAggregator { config }
    }

    fn severity_weight(&self, severity: Severity) -> f64 {
        match severity {
            Severity::Low => self.config.risk.low_weight,
            Severity::Medium => self.config.risk.medium_weight,
            Severity::High => self.config.risk.high_weight,
        }
    }

    /// Map a bounded score onto its tier
    pub fn tier_for(&self, score: f64) -> RiskTier {
        let tiers = &self.config.risk.tiers;
        if score >= tiers.critical {
            RiskTier::Critical
        } else if score >= tiers.high {
            RiskTier::High
        } else if score >= tiers.medium {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }

    /// Combine every signal about one entry
    ///
    /// Flags for other entries are ignored.
    pub fn aggregate(
        &self,
        entry: &JournalEntry,
        flags: &[AnomalyFlag],
        deviation: &Deviation,
    ) -> RiskScore {
        let risk = &self.config.risk;

        let mut contributions: Vec<RiskContribution> = flags
            .iter()
            .filter(|f| f.entry_id == entry.entry_id)
            .map(|f| RiskContribution {
                source: f.detector.clone(),
                severity: Some(f.severity),
                points: self.severity_weight(f.severity) * self.config.detector_weight(&f.detector),
            })
            .collect();

        if let Some(value) = deviation.value() {
            let excess = (value - risk.deviation_floor).max(0.0);
            if excess > 0.0 && risk.deviation_weight > 0.0 {
                contributions.push(RiskContribution {
                    source: DEVIATION_SOURCE.to_string(),
                    severity: None,
                    points: risk.deviation_weight * excess,
                });
            }
        }

        contributions.sort_by(canonical_order);

        // Smallest first for the sum
        let raw = contributions.iter().rev().fold(0.0, |acc, c| acc + c.points);
        let score = bounded(raw, risk.saturation_k);

        RiskScore {
            entry_id: entry.entry_id.clone(),
            score,
            tier: self.tier_for(score),
            raw,
            contributions,
        }
    }
}

fn canonical_order(a: &RiskContribution, b: &RiskContribution) -> Ordering {
    b.points
        .total_cmp(&a.points)
        .then_with(|| a.source.cmp(&b.source))
        .then_with(|| a.severity.cmp(&b.severity))
}

fn bounded(raw: f64, k: f64) -> f64 {
    let score = 100.0 * (1.0 - (-raw / k).exp());
    ((score * 100.0).round() / 100.0).clamp(0.0, 100.0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::entry;
    use crate::profiler::DeviationScore;

    fn flag(detector: &str, severity: Severity) -> AnomalyFlag {
        AnomalyFlag::new("JE-1", detector, severity, 1.0, "test")
    }

    fn deviation(composite: f64) -> Deviation {
        Deviation::Score(DeviationScore {
            amount_z: composite,
            rare_account: false,
            rare_hour: false,
            composite,
        })
    }

    #[test]
    fn test_no_signals_is_low_zero() {
        let config = AnalysisConfig::default();
        let je = entry("JE-1", "2024-05-01", 100.0, "6000");

        let score = RiskAggregator::new(&config).aggregate(&je, &[], &Deviation::none());

        assert_eq!(score.score, 0.0);
        assert_eq!(score.tier, RiskTier::Low);
        assert!(score.contributions.is_empty());
    }

    #[test]
    fn test_insufficient_history_adds_nothing() {
        let config = AnalysisConfig::default();
        let je = entry("JE-1", "2024-05-01", 100.0, "6000");
        let history = Deviation::InsufficientHistory {
            entry_count: 1,
            required: 5,
        };

        let score = RiskAggregator::new(&config).aggregate(&je, &[], &history);
        assert_eq!(score.raw, 0.0);
    }

    #[test]
    fn test_known_score() {
        let config = AnalysisConfig::default();
        let je = entry("JE-1", "2024-05-01", 100.0, "6000");
        let flags = vec![flag("duplicate", Severity::High), flag("timing", Severity::Low)];

        let score = RiskAggregator::new(&config).aggregate(&je, &flags, &Deviation::none());

        // raw 35, k 50 → 100 × (1 - e^-0.7) = 50.34
        assert_eq!(score.raw, 35.0);
        assert_eq!(score.score, 50.34);
        assert_eq!(score.tier, RiskTier::High);
        assert_eq!(score.contributions[0].source, "duplicate");
    }

    #[test]
    fn test_adding_flag_never_lowers_score() {
        let config = AnalysisConfig::default();
        let je = entry("JE-1", "2024-05-01", 100.0, "6000");
        let agg = RiskAggregator::new(&config);

        let mut flags = Vec::new();
        let mut previous = agg.aggregate(&je, &flags, &deviation(4.0)).score;
        for severity in [Severity::Low, Severity::High, Severity::Medium, Severity::High] {
            flags.push(flag("outlier", severity));
            let next = agg.aggregate(&je, &flags, &deviation(4.0)).score;
            assert!(next >= previous);
            previous = next;
        }
    }

    #[test]
    fn test_flag_order_does_not_matter() {
        let config = AnalysisConfig::default();
        let je = entry("JE-1", "2024-05-01", 100.0, "6000");
        let agg = RiskAggregator::new(&config);

        let forward = vec![
            flag("duplicate", Severity::Medium),
            flag("timing", Severity::Low),
            flag("outlier", Severity::High),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        assert_eq!(
            agg.aggregate(&je, &forward, &deviation(6.5)),
            agg.aggregate(&je, &backward, &deviation(6.5))
        );
    }

    #[test]
    fn test_deviation_below_floor_is_ignored() {
        let config = AnalysisConfig::default();
        let je = entry("JE-1", "2024-05-01", 100.0, "6000");
        let agg = RiskAggregator::new(&config);

        assert_eq!(agg.aggregate(&je, &[], &deviation(2.9)).raw, 0.0);
        assert_eq!(agg.aggregate(&je, &[], &deviation(5.0)).raw, 8.0);
    }

    #[test]
    fn test_detector_multiplier_and_foreign_flags() {
        let mut config = AnalysisConfig::default();
        config.risk.detector_weights.insert("round_number".to_string(), 0.5);
        let je = entry("JE-1", "2024-05-01", 100.0, "6000");

        let flags = vec![
            flag("round_number", Severity::Medium),
            AnomalyFlag::new("JE-2", "duplicate", Severity::High, 1.0, "other entry"),
        ];
        let score = RiskAggregator::new(&config).aggregate(&je, &flags, &Deviation::none());

        assert_eq!(score.raw, 7.5);
        assert_eq!(score.contributions.len(), 1);
    }

    #[test]
    fn test_score_is_bounded() {
        let config = AnalysisConfig::default();
        let je = entry("JE-1", "2024-05-01", 100.0, "6000");
        let flags: Vec<AnomalyFlag> = (0..200).map(|_| flag("duplicate", Severity::High)).collect();

        let score = RiskAggregator::new(&config).aggregate(&je, &flags, &deviation(1e6));

        assert!(score.score <= 100.0);
        assert_eq!(score.tier, RiskTier::Critical);
    }
}

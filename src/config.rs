// ⚙️ Analysis Configuration - Rules as Data
//
// Every threshold the detectors, profiler and aggregator use lives here with
// a documented default. Partial JSON files are accepted: any missing field
// falls back to its default. validate() runs before any analysis starts.

use crate::error::{AuditError, AuditResult};
use anyhow::{Context as AnyhowContext, Result};
use chrono::{NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

// ============================================================================
// BENFORD
// ============================================================================

/// MAD cut-offs between conformity classes (upper bounds, inclusive)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MadThresholds {
    pub close: f64,
    pub acceptable: f64,
    pub marginal: f64,
}

impl MadThresholds {
    /// Nigrini's first-digit cut-offs
    pub fn first_digit() -> Self {
        MadThresholds {
            close: 0.006,
            acceptable: 0.012,
            marginal: 0.015,
        }
    }

    /// Nigrini's first-two-digits cut-offs
    pub fn first_two_digits() -> Self {
        MadThresholds {
            close: 0.0012,
            acceptable: 0.0018,
            marginal: 0.0022,
        }
    }

    fn validate(&self, field: &str) -> AuditResult<()> {
        let ordered = self.close > 0.0 && self.close < self.acceptable && self.acceptable < self.marginal;
        if !ordered || !self.marginal.is_finite() {
            return Err(AuditError::configuration(
                field,
                "thresholds must be positive and strictly increasing (close < acceptable < marginal)",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenfordConfig {
    /// Below this many nonzero amounts the result is InsufficientData
    pub min_sample_size: usize,

    /// Minimum sample for the first-two-digits test
    pub first_two_min_sample_size: usize,

    /// Also run the first-two-digits test
    pub include_first_two_digits: bool,

    pub first_digit_thresholds: MadThresholds,
    pub first_two_thresholds: MadThresholds,

    /// Flag entries carrying an over-represented leading digit on nonconformity
    pub flag_excess_digits: bool,

    /// z-statistic above which a digit counts as over-represented
    pub excess_z: f64,
}

impl Default for BenfordConfig {
    fn default() -> Self {
        BenfordConfig {
            min_sample_size: 100,
            first_two_min_sample_size: 1000,
            include_first_two_digits: true,
            first_digit_thresholds: MadThresholds::first_digit(),
            first_two_thresholds: MadThresholds::first_two_digits(),
            flag_excess_digits: true,
            excess_z: 1.96,
        }
    }
}

// ============================================================================
// PATTERN DETECTORS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Two postings this many days apart (or fewer) can be duplicates
    pub window_days: i64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        DuplicateConfig { window_days: 3 }
    }
}

/// Same account, amount and description anywhere in the dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatingConfig {
    /// Occurrences of one (account, amount, description) before flagging
    pub min_occurrences: usize,
}

impl Default for RepeatingConfig {
    fn default() -> Self {
        RepeatingConfig { min_occurrences: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearZeroConfig {
    /// |amount| strictly below this is near zero
    pub floor: f64,
}

impl Default for NearZeroConfig {
    fn default() -> Self {
        NearZeroConfig { floor: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundNumberConfig {
    /// Amounts that are exact multiples of this are "round"
    pub threshold: f64,

    /// Amounts below this are never flagged
    pub materiality_floor: f64,

    /// Trailing zeros needed for Medium severity
    pub medium_trailing_zeros: u32,

    /// Trailing zeros needed for High severity
    pub high_trailing_zeros: u32,
}

impl Default for RoundNumberConfig {
    fn default() -> Self {
        RoundNumberConfig {
            threshold: 1000.0,
            materiality_floor: 500.0,
            medium_trailing_zeros: 4,
            high_trailing_zeros: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Gaps of up to this many missing numbers are tolerated
    pub max_tolerated_gap: u64,

    /// Gaps larger than this are High severity
    pub high_gap: u64,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        SequenceConfig {
            max_tolerated_gap: 0,
            high_gap: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// First business hour (inclusive, 0-23)
    pub business_start_hour: u32,

    /// End of business hours (exclusive, 1-24)
    pub business_end_hour: u32,

    pub business_days: Vec<Weekday>,

    /// Size of the period-end window in days
    pub period_end_days: u32,

    /// Window share must exceed expected share by this factor to cluster
    pub clustering_factor: f64,

    /// Periods with fewer entries are not tested for clustering
    pub min_period_entries: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            business_start_hour: 7,
            business_end_hour: 19,
            business_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
            ],
            period_end_days: 3,
            clustering_factor: 2.0,
            min_period_entries: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// 0.6745 * (x - median) / MAD
    RobustZ,
    /// Tukey fences on the interquartile range
    Iqr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierScope {
    PerAccount,
    Global,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub method: OutlierMethod,
    pub scope: OutlierScope,

    /// Robust z-score at which an amount is an outlier
    pub z_cutoff: f64,

    /// Tukey multiplier for the IQR method
    pub iqr_multiplier: f64,

    /// Accounts with fewer entries are measured against the global baseline
    pub min_group_size: usize,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        OutlierConfig {
            method: OutlierMethod::RobustZ,
            scope: OutlierScope::PerAccount,
            z_cutoff: 3.5,
            iqr_multiplier: 1.5,
            min_group_size: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptionConfig {
    /// Whole words that mark a description as suspicious
    pub keywords: Vec<String>,

    /// Flag entries with an empty description
    pub flag_blank: bool,
}

impl Default for DescriptionConfig {
    fn default() -> Self {
        DescriptionConfig {
            keywords: [
                "adjust",
                "misc",
                "manual",
                "override",
                "error",
                "temp",
                "reversal",
                "correction",
                "clearing",
                "suspense",
                "miscellaneous",
            ]
            .iter()
            .map(|k| k.to_string())
            .collect(),
            flag_blank: true,
        }
    }
}

// ============================================================================
// PROFILER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Users with fewer entries get InsufficientHistory
    pub min_history: usize,

    /// An account with at most this share of the user's entries is rare
    pub rare_account_share: f64,

    /// A posting hour with at most this share of the user's entries is rare
    pub rare_hour_share: f64,

    /// Floor for the log10 spread, so constant-amount users stay scorable
    pub min_log_spread: f64,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        ProfileConfig {
            min_history: 5,
            rare_account_share: 0.05,
            rare_hour_share: 0.05,
            min_log_spread: 0.05,
        }
    }
}

// ============================================================================
// RISK
// ============================================================================

/// Lower score bound of each tier above Low
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBoundaries {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for TierBoundaries {
    fn default() -> Self {
        TierBoundaries {
            medium: 25.0,
            high: 50.0,
            critical: 75.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub low_weight: f64,
    pub medium_weight: f64,
    pub high_weight: f64,

    /// Per-detector multiplier on severity weight (missing = 1.0)
    pub detector_weights: BTreeMap<String, f64>,

    /// Points per unit of deviation above the floor
    pub deviation_weight: f64,

    /// Deviation at or below this contributes nothing
    pub deviation_floor: f64,

    /// Saturation constant k in 100 * (1 - e^(-raw / k))
    pub saturation_k: f64,

    pub tiers: TierBoundaries,
}

impl Default for RiskConfig {
    fn default() -> Self {
        RiskConfig {
            low_weight: 5.0,
            medium_weight: 15.0,
            high_weight: 30.0,
            detector_weights: BTreeMap::new(),
            deviation_weight: 4.0,
            deviation_floor: 3.0,
            saturation_k: 50.0,
            tiers: TierBoundaries::default(),
        }
    }
}

// ============================================================================
// ANALYSIS CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AnalysisConfig {
    /// "Today" for timing checks; defaults to the ledger's latest posting date
    pub reference_date: Option<NaiveDate>,

    pub benford: BenfordConfig,
    pub duplicate: DuplicateConfig,
    pub repeating: RepeatingConfig,
    pub round_number: RoundNumberConfig,
    pub near_zero: NearZeroConfig,
    pub sequence: SequenceConfig,
    pub timing: TimingConfig,
    pub outlier: OutlierConfig,
    pub description: DescriptionConfig,
    pub profile: ProfileConfig,
    pub risk: RiskConfig,

    /// Detector enable switches by name; missing = enabled
    pub detectors: BTreeMap<String, bool>,
}

impl AnalysisConfig {
    /// Load configuration from a JSON file (missing fields take defaults)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: AnalysisConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        Ok(config)
    }

    /// Builder pattern: fix the reference date
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    /// Builder pattern: switch one detector on or off
    pub fn with_detector(mut self, name: &str, enabled: bool) -> Self {
        self.detectors.insert(name.to_string(), enabled);
        self
    }

    pub fn is_detector_enabled(&self, name: &str) -> bool {
        self.detectors.get(name).copied().unwrap_or(true)
    }

    /// Multiplier applied to a detector's severity weight
    pub fn detector_weight(&self, name: &str) -> f64 {
        self.risk.detector_weights.get(name).copied().unwrap_or(1.0)
    }

    /// Reject out-of-range values before any analysis runs
    pub fn validate(&self) -> AuditResult<()> {
        // Benford
        if self.benford.min_sample_size == 0 {
            return Err(AuditError::configuration(
                "benford.min_sample_size",
                "must be at least 1",
            ));
        }
        if self.benford.first_two_min_sample_size == 0 {
            return Err(AuditError::configuration(
                "benford.first_two_min_sample_size",
                "must be at least 1",
            ));
        }
        self.benford
            .first_digit_thresholds
            .validate("benford.first_digit_thresholds")?;
        self.benford
            .first_two_thresholds
            .validate("benford.first_two_thresholds")?;
        positive("benford.excess_z", self.benford.excess_z)?;

        // Duplicates
        if self.duplicate.window_days < 0 {
            return Err(AuditError::configuration(
                "duplicate.window_days",
                "must not be negative",
            ));
        }

        if self.repeating.min_occurrences < 2 {
            return Err(AuditError::configuration(
                "repeating.min_occurrences",
                "must be at least 2",
            ));
        }
        positive("near_zero.floor", self.near_zero.floor)?;

        // Round numbers
        positive("round_number.threshold", self.round_number.threshold)?;
        if (self.round_number.threshold * 100.0).round() < 1.0 {
            return Err(AuditError::configuration(
                "round_number.threshold",
                "must be at least one cent",
            ));
        }
        non_negative(
            "round_number.materiality_floor",
            self.round_number.materiality_floor,
        )?;
        if self.round_number.medium_trailing_zeros > self.round_number.high_trailing_zeros {
            return Err(AuditError::configuration(
                "round_number.medium_trailing_zeros",
                "must not exceed high_trailing_zeros",
            ));
        }

        // Sequence
        if self.sequence.high_gap < self.sequence.max_tolerated_gap {
            return Err(AuditError::configuration(
                "sequence.high_gap",
                "must not be below max_tolerated_gap",
            ));
        }

        // Timing
        let t = &self.timing;
        if t.business_start_hour >= t.business_end_hour || t.business_end_hour > 24 {
            return Err(AuditError::configuration(
                "timing.business_start_hour",
                "business hours must satisfy start < end <= 24",
            ));
        }
        if t.business_days.is_empty() {
            return Err(AuditError::configuration(
                "timing.business_days",
                "at least one business day is required",
            ));
        }
        if t.period_end_days == 0 || t.period_end_days > 27 {
            return Err(AuditError::configuration(
                "timing.period_end_days",
                "must be between 1 and 27",
            ));
        }
        if !(t.clustering_factor.is_finite() && t.clustering_factor >= 1.0) {
            return Err(AuditError::configuration(
                "timing.clustering_factor",
                "must be a finite value of at least 1.0",
            ));
        }

        // Outliers
        positive("outlier.z_cutoff", self.outlier.z_cutoff)?;
        positive("outlier.iqr_multiplier", self.outlier.iqr_multiplier)?;
        if self.outlier.min_group_size < 3 {
            return Err(AuditError::configuration(
                "outlier.min_group_size",
                "must be at least 3",
            ));
        }

        // Profiler
        if self.profile.min_history == 0 {
            return Err(AuditError::configuration(
                "profile.min_history",
                "must be at least 1",
            ));
        }
        share("profile.rare_account_share", self.profile.rare_account_share)?;
        share("profile.rare_hour_share", self.profile.rare_hour_share)?;
        positive("profile.min_log_spread", self.profile.min_log_spread)?;

        // Risk
        let r = &self.risk;
        non_negative("risk.low_weight", r.low_weight)?;
        non_negative("risk.medium_weight", r.medium_weight)?;
        non_negative("risk.high_weight", r.high_weight)?;
        if !(r.low_weight <= r.medium_weight && r.medium_weight <= r.high_weight) {
            return Err(AuditError::configuration(
                "risk.medium_weight",
                "severity weights must satisfy low <= medium <= high",
            ));
        }
        for (name, weight) in &r.detector_weights {
            non_negative(&format!("risk.detector_weights.{}", name), *weight)?;
        }
        non_negative("risk.deviation_weight", r.deviation_weight)?;
        non_negative("risk.deviation_floor", r.deviation_floor)?;
        positive("risk.saturation_k", r.saturation_k)?;

        let tiers = &r.tiers;
        let ordered = tiers.medium > 0.0
            && tiers.medium < tiers.high
            && tiers.high < tiers.critical
            && tiers.critical <= 100.0;
        if !ordered {
            return Err(AuditError::configuration(
                "risk.tiers",
                "tier boundaries must satisfy 0 < medium < high < critical <= 100",
            ));
        }

        Ok(())
    }
}

fn positive(field: &str, value: f64) -> AuditResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(AuditError::configuration(
            field,
            format!("must be a finite positive number (got {})", value),
        ))
    }
}

fn non_negative(field: &str, value: f64) -> AuditResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(AuditError::configuration(
            field,
            format!("must be a finite non-negative number (got {})", value),
        ))
    }
}

fn share(field: &str, value: f64) -> AuditResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(AuditError::configuration(
            field,
            format!("must be within [0, 1] (got {})", value),
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================

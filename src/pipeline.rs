// 🧭 Analysis Pipeline - one ledger in, one result out
//
// Stages:
// 1. Validate configuration (fatal on error)
// 2. Resolve the reference date
// 3. In parallel: digit tests, every enabled detector, user profiles
// 4. Digit-excess flags from a nonconforming first-digit test
// 5. In parallel, per entry: deviation + risk score
// 6. Summary
//
// A detector that errors or panics becomes a warning; the rest of the run
// is unaffected. Cancellation is checked between stages and per entry.

use crate::benford::{leading_digits, BenfordResult, Conformity, DigitDistributionAnalyzer};
use crate::config::AnalysisConfig;
use crate::detectors::{AnomalyFlag, Detector, DetectorRegistry, Severity};
use crate::error::{AuditError, AuditResult};
use crate::ledger::{JournalEntry, NormalizedLedger};
use crate::profiler::{Deviation, UserBehaviorProfiler, UserProfile};
use crate::risk::{RiskAggregator, RiskScore, RiskTier};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name used for flags derived from the first-digit test
pub const BENFORD_EXCESS: &str = "benford_excess";

// ============================================================================
// CANCELLATION
// ============================================================================

/// Cooperative cancellation: a shared flag plus an optional deadline
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token that trips on its own once `timeout` has elapsed; a timeout
    /// too large to represent as an `Instant` means no deadline
    pub fn with_timeout(timeout: Duration) -> Self {
        CancellationToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    fn check(&self, stage: &str) -> AuditResult<()> {
        if self.is_cancelled() {
            Err(AuditError::Cancelled {
                stage: stage.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// RESULT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Soft data-quality observation about the ledger
    DataQuality,
    /// A statistical test ran on too few values to classify
    InsufficientData,
    /// A sub-test could not run on this input
    Skipped,
    /// A detector returned an error
    DetectorFailed,
    /// A detector panicked
    DetectorPanicked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisWarning {
    /// Component that raised the warning
    pub source: String,
    pub kind: WarningKind,
    pub message: String,
}

impl AnalysisWarning {
    fn new(source: &str, kind: WarningKind, message: impl Into<String>) -> Self {
        AnalysisWarning {
            source: source.to_string(),
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DetectorStatus {
    Completed { flags: usize },
    Disabled,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorRun {
    pub detector: String,
    #[serde(flatten)]
    pub status: DetectorStatus,
}

/// Everything known about one entry after the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryAssessment {
    pub entry_id: String,
    pub risk: RiskScore,
    pub flags: Vec<AnomalyFlag>,
    pub deviation: Deviation,
}

impl EntryAssessment {
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total_entries: usize,
    pub user_count: usize,

    /// Signed sum of amounts
    pub net_balance: f64,

    /// Sum of absolute amounts
    pub absolute_total: f64,

    /// |net| / absolute total × 100
    pub imbalance_pct: f64,

    /// Entries with at least one flag
    pub flagged_entries: usize,

    pub flags_by_detector: BTreeMap<String, usize>,

    /// Entries per risk tier ("low", "medium", "high", "critical")
    pub entries_by_tier: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// SHA-256 of the analyzed ledger
    pub ledger_fingerprint: String,

    /// Reference date the timing checks used
    pub reference_date: Option<NaiveDate>,

    /// One assessment per entry, in ledger order
    pub entries: Vec<EntryAssessment>,

    pub benford: Option<BenfordResult>,
    pub benford_first_two: Option<BenfordResult>,

    pub profiles: BTreeMap<String, UserProfile>,
    pub warnings: Vec<AnalysisWarning>,
    pub detector_runs: Vec<DetectorRun>,
    pub summary: ResultSummary,
}

impl AnalysisResult {
    pub fn assessment(&self, entry_id: &str) -> Option<&EntryAssessment> {
        self.entries.iter().find(|a| a.entry_id == entry_id)
    }

    /// Every flag raised in the run, in ledger order
    pub fn flags(&self) -> impl Iterator<Item = &AnomalyFlag> {
        self.entries.iter().flat_map(|a| a.flags.iter())
    }

    /// Highest scores first (ties keep ledger order)
    pub fn top_risks(&self, limit: usize) -> Vec<&EntryAssessment> {
        let mut ranked: Vec<&EntryAssessment> = self.entries.iter().collect();
        ranked.sort_by(|a, b| b.risk.score.total_cmp(&a.risk.score));
        ranked.truncate(limit);
        ranked
    }

    pub fn detector_run(&self, name: &str) -> Option<&DetectorRun> {
        self.detector_runs.iter().find(|r| r.detector == name)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct AnalysisPipeline {
    registry: DetectorRegistry,
}

impl Default for AnalysisPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisPipeline {
    /// Pipeline with every built-in detector
    pub fn new() -> Self {
        Self::with_registry(DetectorRegistry::with_defaults())
    }

    pub fn with_registry(registry: DetectorRegistry) -> Self {
        AnalysisPipeline { registry }
    }

    /// Run every stage to completion
    pub fn run(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> AuditResult<AnalysisResult> {
        self.run_with_cancellation(ledger, config, &CancellationToken::new())
    }

    /// Run, giving up with `AuditError::Cancelled` once `token` trips
    pub fn run_with_cancellation(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
        token: &CancellationToken,
    ) -> AuditResult<AnalysisResult> {
        config.validate()?;
        token.check("startup")?;

        // Detectors see the resolved date, never the wall clock
        let mut effective = config.clone();
        effective.reference_date = config.reference_date.or_else(|| ledger.latest_posting_date());

        info!(
            entries = ledger.len(),
            users = ledger.user_count(),
            detectors = self.registry.len(),
            reference_date = ?effective.reference_date,
            "starting ledger analysis"
        );

        let mut warnings: Vec<AnalysisWarning> = ledger
            .quality_notes()
            .into_iter()
            .map(|note| AnalysisWarning::new("ledger", WarningKind::DataQuality, note))
            .collect();

        let profiler = UserBehaviorProfiler::new(effective.profile.clone());

        let ((digit_stage, detector_stage), profiles) = rayon::join(
            || {
                rayon::join(
                    || digit_tests(ledger, &effective),
                    || self.run_detectors(ledger, &effective, token),
                )
            },
            || profiler.build(ledger),
        );
        token.check("detectors")?;

        let (benford, benford_first_two, digit_warnings) = digit_stage;
        warnings.extend(digit_warnings);

        let (mut detector_runs, mut flags, detector_warnings) = detector_stage;
        warnings.extend(detector_warnings);

        let excess = digit_excess_flags(ledger, &effective, benford.as_ref());
        detector_runs.push(excess.0);
        flags.extend(excess.1);

        debug!(flags = flags.len(), "detector stage complete");

        // Per-entry flag lists in a fixed order
        let mut by_entry: HashMap<&str, Vec<AnomalyFlag>> = HashMap::new();
        for flag in &flags {
            by_entry
                .entry(flag.entry_id.as_str())
                .or_default()
                .push(flag.clone());
        }
        for list in by_entry.values_mut() {
            list.sort_by(flag_order);
        }

        let aggregator = RiskAggregator::new(&effective);
        let entries: Vec<EntryAssessment> = ledger
            .entries()
            .par_iter()
            .map(|entry| -> AuditResult<EntryAssessment> {
                token.check("scoring")?;
                let entry_flags = by_entry.get(entry.entry_id.as_str()).cloned().unwrap_or_default();
                let deviation = profiles
                    .get(&entry.user_id)
                    .map(|profile| profiler.score(entry, profile))
                    .unwrap_or_else(Deviation::none);
                let risk = aggregator.aggregate(entry, &entry_flags, &deviation);
                Ok(EntryAssessment {
                    entry_id: entry.entry_id.clone(),
                    risk,
                    flags: entry_flags,
                    deviation,
                })
            })
            .collect::<AuditResult<Vec<_>>>()?;

        for w in &warnings {
            warn!(source = %w.source, kind = ?w.kind, "{}", w.message);
        }

        let summary = summarize(ledger, &entries);
        info!(
            flagged = summary.flagged_entries,
            warnings = warnings.len(),
            "ledger analysis complete"
        );

        Ok(AnalysisResult {
            ledger_fingerprint: ledger.fingerprint(),
            reference_date: effective.reference_date,
            entries,
            benford,
            benford_first_two,
            profiles,
            warnings,
            detector_runs,
            summary,
        })
    }

    fn run_detectors(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
        token: &CancellationToken,
    ) -> (Vec<DetectorRun>, Vec<AnomalyFlag>, Vec<AnalysisWarning>) {
        let outcomes: Vec<(DetectorRun, Vec<AnomalyFlag>, Option<AnalysisWarning>)> = self
            .registry
            .detectors()
            .par_iter()
            .map(|detector| run_one(&**detector, ledger, config, token))
            .collect();

        let mut runs = Vec::with_capacity(outcomes.len());
        let mut flags = Vec::new();
        let mut warnings = Vec::new();
        for (run, found, warning) in outcomes {
            runs.push(run);
            flags.extend(found);
            warnings.extend(warning);
        }
        (runs, flags, warnings)
    }
}

fn run_one(
    detector: &dyn Detector,
    ledger: &NormalizedLedger,
    config: &AnalysisConfig,
    token: &CancellationToken,
) -> (DetectorRun, Vec<AnomalyFlag>, Option<AnalysisWarning>) {
    let name = detector.name();
    let run = |status| DetectorRun {
        detector: name.to_string(),
        status,
    };

    if !config.is_detector_enabled(name) {
        debug!(detector = name, "detector disabled");
        return (run(DetectorStatus::Disabled), Vec::new(), None);
    }
    if token.is_cancelled() {
        // The stage check right after the join reports the cancellation
        return (run(DetectorStatus::Disabled), Vec::new(), None);
    }

    match panic::catch_unwind(AssertUnwindSafe(|| detector.detect(ledger, config))) {
        Ok(Ok(flags)) => {
            debug!(detector = name, flags = flags.len(), "detector finished");
            (run(DetectorStatus::Completed { flags: flags.len() }), flags, None)
        }
        Ok(Err(e)) => {
            let reason = e.to_string();
            (
                run(DetectorStatus::Failed {
                    reason: reason.clone(),
                }),
                Vec::new(),
                Some(AnalysisWarning::new(name, WarningKind::DetectorFailed, reason)),
            )
        }
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let reason = format!("detector panicked: {}", reason);
            (
                run(DetectorStatus::Failed {
                    reason: reason.clone(),
                }),
                Vec::new(),
                Some(AnalysisWarning::new(name, WarningKind::DetectorPanicked, reason)),
            )
        }
    }
}

// ============================================================================
// DIGIT TESTS
// ============================================================================

type DigitStage = (Option<BenfordResult>, Option<BenfordResult>, Vec<AnalysisWarning>);

fn digit_tests(ledger: &NormalizedLedger, config: &AnalysisConfig) -> DigitStage {
    let amounts = ledger.amounts();
    let mut warnings = Vec::new();

    let mut run = |analyzer: DigitDistributionAnalyzer, source: &str| {
        match analyzer.analyze(&amounts) {
            Ok(result) => {
                debug!(test = source, "{}", result.summary());
                if result.conformity == Conformity::InsufficientData {
                    warnings.push(AnalysisWarning::new(
                        source,
                        WarningKind::InsufficientData,
                        format!(
                            "{} usable amounts, at least {} needed for a conformity class",
                            result.sample_size, analyzer.min_sample_size
                        ),
                    ));
                }
                Some(result)
            }
            Err(e) => {
                warnings.push(AnalysisWarning::new(source, WarningKind::Skipped, e.to_string()));
                None
            }
        }
    };

    let first = run(DigitDistributionAnalyzer::first_digit(&config.benford), "benford");
    let first_two = if config.benford.include_first_two_digits {
        run(
            DigitDistributionAnalyzer::first_two_digits(&config.benford),
            "benford_first_two",
        )
    } else {
        None
    };

    (first, first_two, warnings)
}

/// Low flags on entries whose first digit is over-represented in a
/// nonconforming ledger
fn digit_excess_flags(
    ledger: &NormalizedLedger,
    config: &AnalysisConfig,
    result: Option<&BenfordResult>,
) -> (DetectorRun, Vec<AnomalyFlag>) {
    let enabled = config.benford.flag_excess_digits && config.is_detector_enabled(BENFORD_EXCESS);
    if !enabled {
        return (
            DetectorRun {
                detector: BENFORD_EXCESS.to_string(),
                status: DetectorStatus::Disabled,
            },
            Vec::new(),
        );
    }

    let mut flags = Vec::new();
    if let Some(result) = result.filter(|r| r.conformity == Conformity::Nonconformity) {
        let excess = result.over_represented_digits(config.benford.excess_z);
        let rows: HashMap<u32, f64> = result
            .digits
            .iter()
            .map(|d| (d.digit, d.z_statistic.unwrap_or(0.0)))
            .collect();

        for entry in ledger.iter() {
            if let Some(digit) = leading_digits(entry.amount, 1).filter(|d| excess.contains(d)) {
                let z = rows.get(&digit).copied().unwrap_or(0.0);
                flags.push(excess_flag(entry, digit, z));
            }
        }
    }

    (
        DetectorRun {
            detector: BENFORD_EXCESS.to_string(),
            status: DetectorStatus::Completed { flags: flags.len() },
        },
        flags,
    )
}

fn excess_flag(entry: &JournalEntry, digit: u32, z: f64) -> AnomalyFlag {
    AnomalyFlag::new(
        &entry.entry_id,
        BENFORD_EXCESS,
        Severity::Low,
        z,
        format!(
            "Leading digit {} is over-represented in this ledger (z = {:.2})",
            digit, z
        ),
    )
}

// ============================================================================
// ASSEMBLY
// ============================================================================

fn flag_order(a: &AnomalyFlag, b: &AnomalyFlag) -> std::cmp::Ordering {
    a.detector
        .cmp(&b.detector)
        .then_with(|| b.severity.cmp(&a.severity))
        .then_with(|| a.related_entry_id.cmp(&b.related_entry_id))
        .then_with(|| a.explanation.cmp(&b.explanation))
        .then_with(|| a.raw_score.total_cmp(&b.raw_score))
}

fn summarize(ledger: &NormalizedLedger, entries: &[EntryAssessment]) -> ResultSummary {
    let net_balance: f64 = ledger.iter().map(|e| e.amount).sum();
    let absolute_total: f64 = ledger.iter().map(|e| e.amount.abs()).sum();
    let imbalance_pct = if absolute_total > 0.0 {
        round2(net_balance.abs() / absolute_total * 100.0)
    } else {
        0.0
    };

    let mut flags_by_detector = BTreeMap::new();
    let mut entries_by_tier: BTreeMap<String, usize> = [
        RiskTier::Low,
        RiskTier::Medium,
        RiskTier::High,
        RiskTier::Critical,
    ]
    .iter()
    .map(|t| (t.as_str().to_string(), 0))
    .collect();

    for assessment in entries {
        for flag in &assessment.flags {
            *flags_by_detector.entry(flag.detector.clone()).or_insert(0) += 1;
        }
        *entries_by_tier
            .entry(assessment.risk.tier.as_str().to_string())
            .or_insert(0) += 1;
    }

    ResultSummary {
        total_entries: ledger.len(),
        user_count: ledger.user_count(),
        net_balance: round2(net_balance),
        absolute_total: round2(absolute_total),
        imbalance_pct,
        flagged_entries: entries.iter().filter(|a| a.is_flagged()).count(),
        flags_by_detector,
        entries_by_tier,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetectorError;
    use crate::ledger::tests::entry;

    struct Exploding;

    impl Detector for Exploding {
        fn name(&self) -> &'static str {
            "exploding"
        }

        fn detect(
            &self,
            _ledger: &NormalizedLedger,
            _config: &AnalysisConfig,
        ) -> Result<Vec<AnomalyFlag>, DetectorError> {
            panic!("boom")
        }
    }

    /// Trips the shared token from inside the detector stage
    struct CancelsMidRun {
        token: CancellationToken,
    }

    impl Detector for CancelsMidRun {
        fn name(&self) -> &'static str {
            "cancels_mid_run"
        }

        fn detect(
            &self,
            _ledger: &NormalizedLedger,
            _config: &AnalysisConfig,
        ) -> Result<Vec<AnomalyFlag>, DetectorError> {
            self.token.cancel();
            Ok(Vec::new())
        }
    }

    fn small_ledger() -> NormalizedLedger {
        NormalizedLedger::new(vec![
            entry("A", "2024-06-03", 5000.0, "6000"),
            entry("B", "2024-06-04", 5000.0, "6000"),
            entry("C", "2024-06-05", 1234.56, "6000"),
        ])
        .unwrap()
    }

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());

        assert!(CancellationToken::with_timeout(Duration::ZERO).is_cancelled());
    }

    #[test]
    fn test_unrepresentable_timeout_never_trips() {
        let token = CancellationToken::with_timeout(Duration::from_secs(u64::MAX));
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_cancel_during_detectors_stops_run() {
        let token = CancellationToken::new();
        let mut registry = DetectorRegistry::with_defaults();
        registry.register(Box::new(CancelsMidRun {
            token: token.clone(),
        }));

        let err = AnalysisPipeline::with_registry(registry)
            .run_with_cancellation(&small_ledger(), &AnalysisConfig::default(), &token)
            .unwrap_err();

        match err {
            AuditError::Cancelled { stage } => assert_eq!(stage, "detectors"),
            other => panic!("expected cancellation, got {:?}", other),
        }
    }

    #[test]
    fn test_pre_cancelled_run_returns_cancelled() {
        let token = CancellationToken::new();
        token.cancel();

        let err = AnalysisPipeline::new()
            .run_with_cancellation(&small_ledger(), &AnalysisConfig::default(), &token)
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_panicking_detector_becomes_warning() {
        let mut registry = DetectorRegistry::with_defaults();
        registry.register(Box::new(Exploding));

        let result = AnalysisPipeline::with_registry(registry)
            .run(&small_ledger(), &AnalysisConfig::default())
            .unwrap();

        let warning = result
            .warnings
            .iter()
            .find(|w| w.source == "exploding")
            .unwrap();
        assert_eq!(warning.kind, WarningKind::DetectorPanicked);
        assert!(warning.message.contains("boom"));
        assert!(result.assessment("B").unwrap().is_flagged());
    }

    #[test]
    fn test_disabled_detector_recorded() {
        let config = AnalysisConfig::default().with_detector("duplicate", false);
        let result = AnalysisPipeline::new().run(&small_ledger(), &config).unwrap();

        assert_eq!(
            result.detector_run("duplicate").unwrap().status,
            DetectorStatus::Disabled
        );
        assert!(result.flags().all(|f| f.detector != "duplicate"));
    }

    #[test]
    fn test_summary_totals() {
        let ledger = NormalizedLedger::new(vec![
            entry("A", "2024-06-03", 100.0, "1000"),
            entry("B", "2024-06-03", -60.0, "2000"),
        ])
        .unwrap();

        let result = AnalysisPipeline::new()
            .run(&ledger, &AnalysisConfig::default())
            .unwrap();

        assert_eq!(result.summary.total_entries, 2);
        assert_eq!(result.summary.net_balance, 40.0);
        assert_eq!(result.summary.absolute_total, 160.0);
        assert_eq!(result.summary.imbalance_pct, 25.0);
        assert_eq!(result.summary.entries_by_tier.values().sum::<usize>(), 2);
    }

    #[test]
    fn test_reference_date_resolved_from_ledger() {
        let result = AnalysisPipeline::new()
            .run(&small_ledger(), &AnalysisConfig::default())
            .unwrap();
        assert_eq!(
            result.reference_date,
            NaiveDate::from_ymd_opt(2024, 6, 5)
        );
    }

    #[test]
    fn test_excess_flags_on_nonconforming_ledger() {
        // Every amount starts with 9
        let entries = (0..150)
            .map(|i| entry(&format!("JE-{}", i), "2024-06-03", 90.0 + (i % 10) as f64, "6000"))
            .collect();
        let ledger = NormalizedLedger::new(entries).unwrap();

        let result = AnalysisPipeline::new()
            .run(&ledger, &AnalysisConfig::default())
            .unwrap();

        assert_eq!(
            result.benford.as_ref().unwrap().conformity,
            Conformity::Nonconformity
        );
        assert_eq!(result.summary.flags_by_detector[BENFORD_EXCESS], 150);
    }
}

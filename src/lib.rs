// Ledger Audit - Core Library
// Journal-entry risk analytics shared by the CLI, the API server and tests

pub mod benford;    // Digit distribution (Benford) tests
pub mod config;     // Analysis configuration + validation
pub mod detectors;  // Pattern detectors + registry
pub mod error;      // Error types
pub mod ingest;     // CSV / JSON loading
pub mod ledger;     // Journal entries + immutable ledger
pub mod pipeline;   // Orchestration
pub mod profiler;   // Per-user behavior baselines
pub mod risk;       // Composite risk scoring
pub mod stats;      // Robust statistics

// Re-export commonly used types
pub use benford::{
    BenfordResult, Conformity, DigitDistributionAnalyzer, DigitFrequency, DigitTest,
};
pub use config::{
    AnalysisConfig, BenfordConfig, DescriptionConfig, DuplicateConfig, MadThresholds,
    NearZeroConfig, OutlierConfig, OutlierMethod, OutlierScope, ProfileConfig, RepeatingConfig,
    RiskConfig, RoundNumberConfig, SequenceConfig, TierBoundaries, TimingConfig,
};
pub use detectors::{
    AnomalyFlag, DescriptionDetector, Detector, DetectorRegistry, DuplicateDetector,
    NearZeroDetector, OutlierDetector, RepeatingEntryDetector, RoundNumberDetector,
    SequenceGapDetector, Severity, TimingDetector,
};
pub use error::{AuditError, AuditResult, DetectorError};
pub use ingest::{load_csv, load_json, load_ledger, read_csv, read_json, EntryRow};
pub use ledger::{JournalEntry, NormalizedLedger};
pub use pipeline::{
    AnalysisPipeline, AnalysisResult, AnalysisWarning, CancellationToken, DetectorRun,
    DetectorStatus, EntryAssessment, ResultSummary, WarningKind,
};
pub use profiler::{Deviation, DeviationScore, UserBehaviorProfiler, UserProfile};
pub use risk::{RiskAggregator, RiskContribution, RiskScore, RiskTier};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

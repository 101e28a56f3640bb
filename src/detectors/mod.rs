// 🚩 Pattern Detectors - one contract, many tests
//
// Every detector is a pure function of (ledger, config). Adding a detector
// means implementing `Detector` and registering it; nothing else changes.
// Detectors are toggled by name through `AnalysisConfig::detectors`.

use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::ledger::NormalizedLedger;
use serde::{Deserialize, Serialize};

pub mod description;
pub mod duplicate;
pub mod near_zero;
pub mod outlier;
pub mod repeating;
pub mod round_number;
pub mod sequence;
pub mod timing;

pub use description::DescriptionDetector;
pub use duplicate::DuplicateDetector;
pub use near_zero::NearZeroDetector;
pub use outlier::OutlierDetector;
pub use repeating::RepeatingEntryDetector;
pub use round_number::RoundNumberDetector;
pub use sequence::SequenceGapDetector;
pub use timing::TimingDetector;

// ============================================================================
// FLAGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// One finding attached to one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyFlag {
    pub entry_id: String,

    /// Name of the detector that raised the flag
    pub detector: String,

    pub severity: Severity,

    /// Detector-specific magnitude (z-score, trailing zeros, gap size, ...)
    pub raw_score: f64,

    /// Human-readable reason
    pub explanation: String,

    /// Another entry this finding refers to (e.g. the original of a duplicate)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_entry_id: Option<String>,
}

impl AnomalyFlag {
    pub fn new(
        entry_id: impl Into<String>,
        detector: &str,
        severity: Severity,
        raw_score: f64,
        explanation: impl Into<String>,
    ) -> Self {
        AnomalyFlag {
            entry_id: entry_id.into(),
            detector: detector.to_string(),
            severity,
            raw_score,
            explanation: explanation.into(),
            related_entry_id: None,
        }
    }

    /// Builder pattern: point at a related entry
    pub fn related_to(mut self, entry_id: impl Into<String>) -> Self {
        self.related_entry_id = Some(entry_id.into());
        self
    }
}

// ============================================================================
// DETECTOR TRAIT
// ============================================================================

/// Detector - the uniform contract every pattern test implements
///
/// Implementations must be deterministic for identical input: no wall clock,
/// no randomness, no iteration-order dependence on hash maps.
pub trait Detector: Send + Sync {
    /// Stable name used for toggles, weights and flag attribution
    fn name(&self) -> &'static str;

    /// Run the test over the whole ledger
    ///
    /// # Returns
    /// * `Ok(flags)` - zero or more flags
    /// * `Err(DetectorError)` - the test cannot execute on this ledger
    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError>;
}

// ============================================================================
// REGISTRY
// ============================================================================

pub struct DetectorRegistry {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        DetectorRegistry {
            detectors: Vec::new(),
        }
    }

    /// Registry holding every built-in detector
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(DuplicateDetector));
        registry.register(Box::new(RoundNumberDetector));
        registry.register(Box::new(SequenceGapDetector));
        registry.register(Box::new(TimingDetector));
        registry.register(Box::new(OutlierDetector));
        registry.register(Box::new(DescriptionDetector));
        registry.register(Box::new(NearZeroDetector));
        registry.register(Box::new(RepeatingEntryDetector));
        registry
    }

    /// Add a detector; a detector with the same name is replaced
    pub fn register(&mut self, detector: Box<dyn Detector>) {
        self.detectors.retain(|d| d.name() != detector.name());
        self.detectors.push(detector);
    }

    pub fn detectors(&self) -> &[Box<dyn Detector>] {
        &self.detectors
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysFlag;

    impl Detector for AlwaysFlag {
        fn name(&self) -> &'static str {
            "duplicate"
        }

        fn detect(
            &self,
            ledger: &NormalizedLedger,
            _config: &AnalysisConfig,
        ) -> Result<Vec<AnomalyFlag>, DetectorError> {
            Ok(ledger
                .iter()
                .map(|e| AnomalyFlag::new(&e.entry_id, self.name(), Severity::Low, 1.0, "always"))
                .collect())
        }
    }

    #[test]
    fn test_default_registry_names() {
        let registry = DetectorRegistry::with_defaults();
        assert_eq!(
            registry.names(),
            vec![
                "duplicate",
                "round_number",
                "sequence_gap",
                "timing",
                "outlier",
                "description",
                "near_zero",
                "repeating"
            ]
        );
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = DetectorRegistry::with_defaults();
        registry.register(Box::new(AlwaysFlag));

        assert_eq!(registry.len(), 8);
        assert_eq!(registry.names().last(), Some(&"duplicate"));
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
    }

    #[test]
    fn test_flag_builder() {
        let flag = AnomalyFlag::new("JE-2", "duplicate", Severity::High, 1.0, "dup").related_to("JE-1");
        assert_eq!(flag.related_entry_id.as_deref(), Some("JE-1"));
    }
}

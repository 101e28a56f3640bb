// 🔢 Digit Distribution Analyzer - Benford's Law conformity
//
// Leading digits are taken from |amount| after shifting the value by powers
// of ten until it lies in [1, 10). Zero and non-finite amounts carry no
// leading digit and are excluded from the sample.
//
// Statistics: mean absolute deviation of proportions (classification) and
// chi-square against its 5% critical value (reported alongside).

use crate::config::{BenfordConfig, MadThresholds};
use crate::error::{AuditError, AuditResult};
use serde::{Deserialize, Serialize};

/// Chi-square 5% critical value, 8 degrees of freedom
pub const FIRST_DIGIT_CHI_SQ_CRITICAL: f64 = 15.507;

/// Chi-square 5% critical value, 89 degrees of freedom
pub const FIRST_TWO_CHI_SQ_CRITICAL: f64 = 112.022;

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigitTest {
    FirstDigit,
    FirstTwoDigits,
}

impl DigitTest {
    /// How many leading digits the test reads
    pub fn width(&self) -> u32 {
        match self {
            DigitTest::FirstDigit => 1,
            DigitTest::FirstTwoDigits => 2,
        }
    }

    pub fn digits(&self) -> std::ops::RangeInclusive<u32> {
        match self {
            DigitTest::FirstDigit => 1..=9,
            DigitTest::FirstTwoDigits => 10..=99,
        }
    }

    pub fn chi_square_critical(&self) -> f64 {
        match self {
            DigitTest::FirstDigit => FIRST_DIGIT_CHI_SQ_CRITICAL,
            DigitTest::FirstTwoDigits => FIRST_TWO_CHI_SQ_CRITICAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conformity {
    CloseConformity,
    Acceptable,
    Marginal,
    Nonconformity,
    /// Sample smaller than the configured minimum; no class is assigned
    InsufficientData,
}

impl Conformity {
    fn classify(mad: f64, thresholds: &MadThresholds) -> Self {
        if mad <= thresholds.close {
            Conformity::CloseConformity
        } else if mad <= thresholds.acceptable {
            Conformity::Acceptable
        } else if mad <= thresholds.marginal {
            Conformity::Marginal
        } else {
            Conformity::Nonconformity
        }
    }
}

/// One row of the expected-vs-observed table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitFrequency {
    pub digit: u32,
    pub count: usize,
    pub observed: f64,
    pub expected: f64,

    /// Proportion z-test with continuity correction (None on insufficient data)
    pub z_statistic: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenfordResult {
    pub test: DigitTest,

    /// Amounts that contributed a leading digit
    pub sample_size: usize,

    /// Zero amounts left out of the sample
    pub excluded_zero: usize,

    pub digits: Vec<DigitFrequency>,

    /// Mean absolute deviation of observed from expected proportions
    pub mad: Option<f64>,

    pub chi_square: Option<f64>,
    pub chi_square_critical: f64,
    pub conformity: Conformity,
}

impl BenfordResult {
    pub fn has_sufficient_data(&self) -> bool {
        self.conformity != Conformity::InsufficientData
    }

    /// Chi-square exceeds its 5% critical value
    pub fn exceeds_critical(&self) -> bool {
        self.chi_square
            .map_or(false, |chi| chi > self.chi_square_critical)
    }

    /// Digits observed significantly more often than expected
    pub fn over_represented_digits(&self, z_threshold: f64) -> Vec<u32> {
        self.digits
            .iter()
            .filter(|d| d.observed > d.expected)
            .filter(|d| d.z_statistic.map_or(false, |z| z > z_threshold))
            .map(|d| d.digit)
            .collect()
    }

    pub fn summary(&self) -> String {
        match (self.mad, self.chi_square) {
            (Some(mad), Some(chi)) => format!(
                "{:?}: n={}, MAD={:.4}, chi²={:.2} (critical {:.3}) → {:?}",
                self.test, self.sample_size, mad, chi, self.chi_square_critical, self.conformity
            ),
            _ => format!(
                "{:?}: n={} → {:?}",
                self.test, self.sample_size, self.conformity
            ),
        }
    }
}

// ============================================================================
// DIGIT EXTRACTION
// ============================================================================

/// Benford probability of a leading digit (or digit pair)
pub fn expected_frequency(digit: u32) -> f64 {
    (1.0 + 1.0 / digit as f64).log10()
}

/// Leading `width` digits of a nonzero finite value
///
/// Shifts |value| by powers of ten into [1, 10), then reads the integer part
/// of `normalized * 10^(width - 1)`. A tiny epsilon absorbs the rounding of
/// repeated shifts (0.3 * 10 = 2.9999999999999996).
pub fn leading_digits(value: f64, width: u32) -> Option<u32> {
    let mut v = value.abs();
    if v == 0.0 || !v.is_finite() {
        return None;
    }

    while v >= 10.0 {
        v /= 10.0;
    }
    while v < 1.0 {
        v *= 10.0;
    }

    let scaled = v * 10f64.powi(width as i32 - 1);
    let digit = (scaled + 1e-9).floor() as u32;

    let lo = 10u32.pow(width - 1);
    let hi = 10u32.pow(width) - 1;
    Some(digit.clamp(lo, hi))
}

// ============================================================================
// ANALYZER
// ============================================================================

#[derive(Debug, Clone)]
pub struct DigitDistributionAnalyzer {
    pub test: DigitTest,
    pub min_sample_size: usize,
    pub thresholds: MadThresholds,
}

impl DigitDistributionAnalyzer {
    pub fn new(test: DigitTest, min_sample_size: usize, thresholds: MadThresholds) -> Self {
        DigitDistributionAnalyzer {
            test,
            min_sample_size,
            thresholds,
        }
    }

    /// First-digit analyzer from configuration
    pub fn first_digit(config: &BenfordConfig) -> Self {
        Self::new(
            DigitTest::FirstDigit,
            config.min_sample_size,
            config.first_digit_thresholds,
        )
    }

    /// First-two-digits analyzer from configuration
    pub fn first_two_digits(config: &BenfordConfig) -> Self {
        Self::new(
            DigitTest::FirstTwoDigits,
            config.first_two_min_sample_size,
            config.first_two_thresholds,
        )
    }

    /// Run the conformity test over a set of amounts
    ///
    /// Fails on empty input and on input without a single nonzero amount.
    /// Samples below the minimum size come back as `InsufficientData`.
    pub fn analyze(&self, amounts: &[f64]) -> AuditResult<BenfordResult> {
        if amounts.is_empty() {
            return Err(AuditError::validation("no amounts to analyze"));
        }

        let width = self.test.width();
        let lo = *self.test.digits().start();
        let bins = self.test.digits().count();

        let mut counts = vec![0usize; bins];
        let mut excluded_zero = 0;

        for amount in amounts {
            match leading_digits(*amount, width) {
                Some(d) => counts[(d - lo) as usize] += 1,
                None if *amount == 0.0 => excluded_zero += 1,
                None => {}
            }
        }

        let n: usize = counts.iter().sum();
        if n == 0 {
            return Err(AuditError::validation(
                "all amounts are zero; leading digits are undefined",
            ));
        }

        let sufficient = n >= self.min_sample_size;
        let nf = n as f64;

        let digits: Vec<DigitFrequency> = self
            .test
            .digits()
            .zip(counts.iter())
            .map(|(digit, &count)| {
                let expected = expected_frequency(digit);
                let observed = count as f64 / nf;
                let z_statistic = if sufficient {
                    Some(proportion_z(observed, expected, nf))
                } else {
                    None
                };
                DigitFrequency {
                    digit,
                    count,
                    observed,
                    expected,
                    z_statistic,
                }
            })
            .collect();

        if !sufficient {
            return Ok(BenfordResult {
                test: self.test,
                sample_size: n,
                excluded_zero,
                digits,
                mad: None,
                chi_square: None,
                chi_square_critical: self.test.chi_square_critical(),
                conformity: Conformity::InsufficientData,
            });
        }

        let mad = digits
            .iter()
            .map(|d| (d.observed - d.expected).abs())
            .sum::<f64>()
            / digits.len() as f64;

        let chi_square = digits
            .iter()
            .map(|d| {
                let expected_count = d.expected * nf;
                (d.count as f64 - expected_count).powi(2) / expected_count
            })
            .sum::<f64>();

        Ok(BenfordResult {
            test: self.test,
            sample_size: n,
            excluded_zero,
            digits,
            mad: Some(mad),
            chi_square: Some(chi_square),
            chi_square_critical: self.test.chi_square_critical(),
            conformity: Conformity::classify(mad, &self.thresholds),
        })
    }
}

/// z = (|p_o - p_e| - 1/(2n)) / sqrt(p_e (1 - p_e) / n), correction dropped
/// when it exceeds the difference
fn proportion_z(observed: f64, expected: f64, n: f64) -> f64 {
    let diff = (observed - expected).abs();
    let correction = 1.0 / (2.0 * n);
    let numerator = if correction < diff { diff - correction } else { diff };
    numerator / (expected * (1.0 - expected) / n).sqrt()
}

// ============================================================================
// TESTS
// ============================================================================

// 📐 Robust Statistics - medians, MAD and IQR over plain slices
//
// Shared by the outlier detector and the user profiler. Inputs may be
// unsorted; callers filter non-finite values first.

use std::cmp::Ordering;

/// Consistency constant turning a median absolute deviation into a sigma estimate.
pub const MAD_SCALE: f64 = 1.4826;

/// Robust z-score numerator constant (1 / MAD_SCALE).
pub const ROBUST_Z_FACTOR: f64 = 0.6745;

/// Consistency constant for the mean-absolute-deviation fallback.
pub const MEAN_AD_SCALE: f64 = 1.2533;

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    quantile(values, 0.5)
}

/// Linear-interpolated quantile, `q` in [0, 1]
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    Some(quantile_sorted(&v, q))
}

fn quantile_sorted(v: &[f64], q: f64) -> f64 {
    let q = q.clamp(0.0, 1.0);
    let pos = q * (v.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        v[lo]
    } else {
        v[lo] + (v[hi] - v[lo]) * (pos - lo as f64)
    }
}

/// Median absolute deviation around the median (unscaled)
pub fn median_absolute_deviation(values: &[f64]) -> Option<f64> {
    let m = median(values)?;
    let deviations: Vec<f64> = values.iter().map(|x| (x - m).abs()).collect();
    median(&deviations)
}

/// Mean absolute deviation around the mean
pub fn mean_absolute_deviation(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    mean(&values.iter().map(|x| (x - m).abs()).collect::<Vec<_>>())
}

/// First and third quartile
pub fn quartiles(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let v = sorted(values);
    Some((quantile_sorted(&v, 0.25), quantile_sorted(&v, 0.75)))
}

/// Location and scale for robust z-scores
///
/// Uses the MAD; when more than half the values coincide the MAD is zero,
/// so the mean absolute deviation is used instead. Returns `None` when the
/// sample has no spread at all.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustBaseline {
    pub median: f64,
    /// Spread already scaled to be comparable with a standard deviation
    pub scale: f64,
}

impl RobustBaseline {
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let median = median(values)?;
        let mad = median_absolute_deviation(values)?;

        let scale = if mad > 0.0 {
            mad / ROBUST_Z_FACTOR
        } else {
            let mean_ad = mean_absolute_deviation(values)?;
            mean_ad * MEAN_AD_SCALE
        };

        if scale > 0.0 && scale.is_finite() {
            Some(RobustBaseline { median, scale })
        } else {
            None
        }
    }

    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.median) / self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_quartiles() {
        let (q1, q3) = quartiles(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(q1, 2.0);
        assert_eq!(q3, 4.0);
    }

    #[test]
    fn test_mad_ignores_single_outlier() {
        let values = [10.0, 11.0, 9.0, 10.0, 12.0, 8.0, 10_000.0];
        let mad = median_absolute_deviation(&values).unwrap();
        assert!(mad <= 2.0);
    }

    #[test]
    fn test_robust_baseline_falls_back_when_mad_is_zero() {
        let values = [100.0, 100.0, 100.0, 100.0, 900.0];
        let baseline = RobustBaseline::from_values(&values).unwrap();
        assert_eq!(baseline.median, 100.0);
        assert!(baseline.scale > 0.0);
        assert!(baseline.z_score(900.0) > 2.0);
    }

    #[test]
    fn test_robust_baseline_none_without_spread() {
        assert!(RobustBaseline::from_values(&[5.0, 5.0, 5.0]).is_none());
    }
}

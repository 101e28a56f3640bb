// 👤 User Behavior Profiler - per-preparer baselines
//
// build() makes one pass over the ledger. Each profile holds fixed-size
// summaries only (running sums, a log-magnitude histogram on a fixed grid,
// account/hour/weekday counters), so memory grows with distinct users and
// their accounts, never with entry count.
//
// score() measures how far one entry sits from its preparer's own centre,
// in log10 space: a 50x jump is the same distance for a small or a large
// spender, but the same raw amount can be ordinary for one user and
// extreme for another.

use crate::config::ProfileConfig;
use crate::ledger::{JournalEntry, NormalizedLedger};
use crate::stats::MAD_SCALE;
use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// Histogram resolution: bins per power of ten
const BINS_PER_DECADE: f64 = 100.0;

/// Grid bounds (1e-4 .. 1e15); magnitudes outside land in the edge bins
const MIN_BIN: i32 = -400;
const MAX_BIN: i32 = 1500;

// ============================================================================
// LOG-MAGNITUDE HISTOGRAM
// ============================================================================

/// Counts of log10(|amount|) on a fixed grid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogHistogram {
    bins: BTreeMap<i32, u32>,
    total: u32,
}

impl LogHistogram {
    pub fn add(&mut self, magnitude: f64) {
        if !(magnitude > 0.0 && magnitude.is_finite()) {
            return;
        }
        let bin = ((magnitude.log10() * BINS_PER_DECADE).floor() as i32).clamp(MIN_BIN, MAX_BIN);
        *self.bins.entry(bin).or_insert(0) += 1;
        self.total += 1;
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    fn center(bin: i32) -> f64 {
        (bin as f64 + 0.5) / BINS_PER_DECADE
    }

    /// Lower weighted median of a (value, weight) list sorted by value
    fn weighted_median(sorted: impl Iterator<Item = (f64, u32)>, total: u32) -> Option<f64> {
        if total == 0 {
            return None;
        }
        let target = (total + 1) / 2;
        let mut seen = 0;
        for (value, weight) in sorted {
            seen += weight;
            if seen >= target {
                return Some(value);
            }
        }
        None
    }

    /// Median of log10 magnitudes (bin resolution)
    pub fn median(&self) -> Option<f64> {
        Self::weighted_median(
            self.bins.iter().map(|(&b, &c)| (Self::center(b), c)),
            self.total,
        )
    }

    /// Median absolute deviation of log10 magnitudes around `center`
    pub fn mad(&self, center: f64) -> Option<f64> {
        let mut distances: Vec<(f64, u32)> = self
            .bins
            .iter()
            .map(|(&b, &c)| ((Self::center(b) - center).abs(), c))
            .collect();
        distances.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Self::weighted_median(distances.into_iter(), self.total)
    }
}

// ============================================================================
// USER PROFILE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub entry_count: usize,

    /// Sum of absolute amounts
    pub total_amount: f64,

    /// Mean absolute amount
    pub mean_amount: f64,

    /// Median absolute amount (histogram resolution)
    pub median_amount: f64,

    /// Median of log10 |amount|
    pub log_median: f64,

    /// Median absolute deviation of log10 |amount|
    pub log_mad: f64,

    /// Entries with a zero amount (excluded from the magnitude baseline)
    pub zero_amount_count: usize,

    pub account_usage: BTreeMap<String, usize>,

    /// Entries per posting hour (0-23)
    pub hour_distribution: [u32; 24],

    /// Entries per weekday, Monday first
    pub weekday_distribution: [u32; 7],

    pub first_posted: NaiveDateTime,
    pub last_posted: NaiveDateTime,

    #[serde(skip)]
    histogram: LogHistogram,
}

impl UserProfile {
    fn start(entry: &JournalEntry) -> Self {
        UserProfile {
            user_id: entry.user_id.clone(),
            entry_count: 0,
            total_amount: 0.0,
            mean_amount: 0.0,
            median_amount: 0.0,
            log_median: 0.0,
            log_mad: 0.0,
            zero_amount_count: 0,
            account_usage: BTreeMap::new(),
            hour_distribution: [0; 24],
            weekday_distribution: [0; 7],
            first_posted: entry.posted_at,
            last_posted: entry.posted_at,
            histogram: LogHistogram::default(),
        }
    }

    fn observe(&mut self, entry: &JournalEntry) {
        let magnitude = entry.amount.abs();

        self.entry_count += 1;
        self.total_amount += magnitude;
        if magnitude == 0.0 {
            self.zero_amount_count += 1;
        } else {
            self.histogram.add(magnitude);
        }

        *self
            .account_usage
            .entry(entry.account_code.clone())
            .or_insert(0) += 1;
        self.hour_distribution[entry.posted_at.hour() as usize] += 1;
        self.weekday_distribution[entry.posted_at.weekday().num_days_from_monday() as usize] += 1;

        self.first_posted = self.first_posted.min(entry.posted_at);
        self.last_posted = self.last_posted.max(entry.posted_at);
    }

    fn finalize(&mut self) {
        if self.entry_count > 0 {
            self.mean_amount = self.total_amount / self.entry_count as f64;
        }
        if let Some(median) = self.histogram.median() {
            self.log_median = median;
            self.median_amount = 10f64.powf(median);
            self.log_mad = self.histogram.mad(median).unwrap_or(0.0);
        }
    }

    /// Share of this user's entries posted to `account`
    pub fn account_share(&self, account: &str) -> f64 {
        if self.entry_count == 0 {
            return 0.0;
        }
        self.account_usage.get(account).copied().unwrap_or(0) as f64 / self.entry_count as f64
    }

    /// Share of this user's entries posted in `hour`
    pub fn hour_share(&self, hour: u32) -> f64 {
        if self.entry_count == 0 {
            return 0.0;
        }
        self.hour_distribution[(hour as usize).min(23)] as f64 / self.entry_count as f64
    }
}

// ============================================================================
// DEVIATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviationScore {
    /// Robust z-score of log10 |amount| against the user's median
    pub amount_z: f64,

    /// Account is rarely used by this user
    pub rare_account: bool,

    /// Posting hour is unusual for this user
    pub rare_hour: bool,

    /// |amount_z| + 1 per rarity signal
    pub composite: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Deviation {
    Score(DeviationScore),
    /// Too few entries to trust the baseline
    InsufficientHistory { entry_count: usize, required: usize },
}

impl Deviation {
    /// Numeric deviation, if the user has enough history
    pub fn value(&self) -> Option<f64> {
        match self {
            Deviation::Score(s) => Some(s.composite),
            Deviation::InsufficientHistory { .. } => None,
        }
    }

    pub fn none() -> Self {
        Deviation::Score(DeviationScore {
            amount_z: 0.0,
            rare_account: false,
            rare_hour: false,
            composite: 0.0,
        })
    }
}

// ============================================================================
// PROFILER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct UserBehaviorProfiler {
    pub config: ProfileConfig,
}

impl UserBehaviorProfiler {
    pub fn new(config: ProfileConfig) -> Self {
        UserBehaviorProfiler { config }
    }

    /// One pass over the ledger → profile per user
    pub fn build(&self, ledger: &NormalizedLedger) -> BTreeMap<String, UserProfile> {
        let mut profiles: HashMap<&str, UserProfile> = HashMap::new();

        for entry in ledger.iter() {
            profiles
                .entry(entry.user_id.as_str())
                .or_insert_with(|| UserProfile::start(entry))
                .observe(entry);
        }

        debug!(users = profiles.len(), "built user profiles");

        profiles
            .into_iter()
            .map(|(user, mut profile)| {
                profile.finalize();
                (user.to_string(), profile)
            })
            .collect()
    }

    /// Distance of one entry from its preparer's baseline
    pub fn score(&self, entry: &JournalEntry, profile: &UserProfile) -> Deviation {
        if profile.entry_count < self.config.min_history {
            return Deviation::InsufficientHistory {
                entry_count: profile.entry_count,
                required: self.config.min_history,
            };
        }

        let magnitude = entry.amount.abs();
        let amount_z = if magnitude > 0.0 && profile.histogram.total() > 0 {
            let spread = profile.log_mad.max(self.config.min_log_spread) * MAD_SCALE;
            (magnitude.log10() - profile.log_median).abs() / spread
        } else {
            0.0
        };

        let rare_account =
            profile.account_share(&entry.account_code) <= self.config.rare_account_share;
        let rare_hour = profile.hour_share(entry.posted_at.hour()) <= self.config.rare_hour_share;

        let composite = amount_z
            + if rare_account { 1.0 } else { 0.0 }
            + if rare_hour { 1.0 } else { 0.0 };

        Deviation::Score(DeviationScore {
            amount_z,
            rare_account,
            rare_hour,
            composite,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::tests::at;

    fn posting(id: &str, user: &str, amount: f64) -> JournalEntry {
        JournalEntry::new(id, at("2024-05-06", 10), amount, "6000", user)
    }

    fn profiler() -> UserBehaviorProfiler {
        UserBehaviorProfiler::new(ProfileConfig::default())
    }

    #[test]
    fn test_histogram_median_and_mad() {
        let mut hist = LogHistogram::default();
        for v in [15.0, 150.0, 1500.0] {
            hist.add(v);
        }
        hist.add(0.0);

        assert_eq!(hist.total(), 3);
        let median = hist.median().unwrap();
        assert!((median - 2.175).abs() < 1e-9);
        assert!((hist.mad(median).unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_build_profiles_one_per_user() {
        let ledger = NormalizedLedger::new(vec![
            posting("1", "alice", 100.0),
            posting("2", "alice", 300.0),
            posting("3", "bob", 50.0),
        ])
        .unwrap();

        let profiles = profiler().build(&ledger);

        assert_eq!(profiles.len(), 2);
        let alice = &profiles["alice"];
        assert_eq!(alice.entry_count, 2);
        assert_eq!(alice.mean_amount, 200.0);
        assert_eq!(alice.account_usage["6000"], 2);
        assert_eq!(alice.hour_distribution[10], 2);
        assert_eq!(alice.weekday_distribution[0], 2);
    }

    #[test]
    fn test_insufficient_history() {
        let ledger = NormalizedLedger::new(vec![posting("1", "carol", 100.0)]).unwrap();
        let profiles = profiler().build(&ledger);

        let deviation = profiler().score(ledger.get("1").unwrap(), &profiles["carol"]);

        assert_eq!(
            deviation,
            Deviation::InsufficientHistory {
                entry_count: 1,
                required: 5
            }
        );
        assert!(deviation.value().is_none());
    }

    #[test]
    fn test_fifty_times_mean_scores_higher_than_median_entry() {
        let amounts = [100.0, 105.0, 110.0, 95.0, 98.0, 102.0];
        let mean = amounts.iter().sum::<f64>() / amounts.len() as f64;

        let mut entries: Vec<JournalEntry> = amounts
            .iter()
            .enumerate()
            .map(|(i, a)| posting(&format!("JE-{}", i), "dave", *a))
            .collect();
        entries.push(posting("BIG", "dave", mean * 50.0));
        let ledger = NormalizedLedger::new(entries).unwrap();

        let profiles = profiler().build(&ledger);
        let dave = &profiles["dave"];

        let big = profiler().score(ledger.get("BIG").unwrap(), dave).value().unwrap();
        // 102.0 is the median of the seven amounts
        let typical = profiler().score(ledger.get("JE-5").unwrap(), dave).value().unwrap();

        assert!(big > typical);
        assert!(big > 10.0);
    }

    #[test]
    fn test_same_amount_scores_differently_per_user() {
        let mut entries = Vec::new();
        for i in 0..6 {
            entries.push(posting(&format!("small-{}", i), "small", 50.0 + i as f64));
            entries.push(posting(&format!("large-{}", i), "large", 5000.0 + i as f64 * 100.0));
        }
        entries.push(posting("target-small", "small", 5000.0));
        entries.push(posting("target-large", "large", 5000.0));
        let ledger = NormalizedLedger::new(entries).unwrap();
        let profiles = profiler().build(&ledger);

        let small = profiler()
            .score(ledger.get("target-small").unwrap(), &profiles["small"])
            .value()
            .unwrap();
        let large = profiler()
            .score(ledger.get("target-large").unwrap(), &profiles["large"])
            .value()
            .unwrap();

        assert!(small > large);
    }

    #[test]
    fn test_rare_account_signal() {
        let mut entries: Vec<JournalEntry> = (0..30)
            .map(|i| posting(&format!("JE-{}", i), "erin", 100.0))
            .collect();
        let mut odd = posting("ODD", "erin", 100.0);
        odd.account_code = "9999".to_string();
        entries.push(odd);
        let ledger = NormalizedLedger::new(entries).unwrap();
        let profiles = profiler().build(&ledger);

        match profiler().score(ledger.get("ODD").unwrap(), &profiles["erin"]) {
            Deviation::Score(s) => {
                assert!(s.rare_account);
                assert!(!s.rare_hour);
                assert!((s.composite - s.amount_z - 1.0).abs() < 1e-12);
            }
            other => panic!("expected a score, got {:?}", other),
        }
    }

    #[test]
    fn test_rare_hour_signal() {
        let mut entries: Vec<JournalEntry> = (0..30)
            .map(|i| posting(&format!("JE-{}", i), "frank", 100.0))
            .collect();
        let mut night = posting("NIGHT", "frank", 100.0);
        night.posted_at = at("2024-05-06", 3);
        entries.push(night);
        let ledger = NormalizedLedger::new(entries).unwrap();
        let profiles = profiler().build(&ledger);

        match profiler().score(ledger.get("NIGHT").unwrap(), &profiles["frank"]) {
            Deviation::Score(s) => {
                assert!(s.rare_hour);
                assert!(!s.rare_account);
                assert!((s.composite - s.amount_z - 1.0).abs() < 1e-12);
            }
            other => panic!("expected a score, got {:?}", other),
        }
    }
}

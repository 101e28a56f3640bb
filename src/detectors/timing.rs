// ⏰ Timing Detector - when an entry was posted
//
// Three independent checks:
// 1. Off-schedule: non-business weekday, or outside business hours
// 2. Future-dated: posted after the explicit reference date
// 3. Period-end clustering: the final N days of a period hold far more
//    entries than an even spread would put there
//
// The reference date always comes from configuration, never the wall clock.

use super::{AnomalyFlag, Detector, Severity};
use crate::config::AnalysisConfig;
use crate::error::DetectorError;
use crate::ledger::{JournalEntry, NormalizedLedger};
use chrono::{Datelike, Duration, NaiveDate, Timelike};
use std::collections::BTreeMap;

pub const NAME: &str = "timing";

pub struct TimingDetector;

impl Detector for TimingDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn detect(
        &self,
        ledger: &NormalizedLedger,
        config: &AnalysisConfig,
    ) -> Result<Vec<AnomalyFlag>, DetectorError> {
        let rules = &config.timing;
        let reference = match config.reference_date.or_else(|| ledger.latest_posting_date()) {
            Some(date) => date,
            None => return Ok(Vec::new()),
        };

        let mut flags = Vec::new();

        for entry in ledger.iter() {
            let weekday = entry.posted_at.weekday();
            let hour = entry.posted_at.hour();

            if !rules.business_days.contains(&weekday) {
                flags.push(AnomalyFlag::new(
                    &entry.entry_id,
                    NAME,
                    Severity::Medium,
                    1.0,
                    format!("Posted on a non-business day ({})", weekday),
                ));
            } else if hour < rules.business_start_hour || hour >= rules.business_end_hour {
                flags.push(AnomalyFlag::new(
                    &entry.entry_id,
                    NAME,
                    Severity::Low,
                    1.0,
                    format!(
                        "Posted at {} outside business hours {:02}:00-{:02}:00",
                        entry.posted_at.format("%H:%M"),
                        rules.business_start_hour,
                        rules.business_end_hour
                    ),
                ));
            }

            if entry.posted_date() > reference {
                let days_ahead = (entry.posted_date() - reference).num_days();
                flags.push(AnomalyFlag::new(
                    &entry.entry_id,
                    NAME,
                    Severity::High,
                    days_ahead as f64,
                    format!(
                        "Future-dated: posted {} day(s) after reference date {}",
                        days_ahead, reference
                    ),
                ));
            }
        }

        flags.extend(period_end_clusters(ledger, config));
        Ok(flags)
    }
}

fn period_end_clusters(ledger: &NormalizedLedger, config: &AnalysisConfig) -> Vec<AnomalyFlag> {
    let rules = &config.timing;
    let mut periods: BTreeMap<&str, Vec<&JournalEntry>> = BTreeMap::new();
    for entry in ledger.iter() {
        periods.entry(entry.period.as_str()).or_default().push(entry);
    }

    let mut flags = Vec::new();

    for (period, entries) in periods {
        if entries.len() < rules.min_period_entries {
            continue;
        }

        let (first, last) = match (
            entries.iter().map(|e| e.posted_date()).min(),
            entries.iter().map(|e| e.posted_date()).max(),
        ) {
            (Some(first), Some(last)) => (first, last),
            _ => continue,
        };

        let period_start = month_start(first);
        let period_end = month_end(last);
        let period_days = (period_end - period_start).num_days() + 1;
        let window_start = period_end - Duration::days(rules.period_end_days as i64 - 1);

        let in_window: Vec<&&JournalEntry> = entries
            .iter()
            .filter(|e| e.posted_date() >= window_start)
            .collect();

        let expected_share = rules.period_end_days as f64 / period_days as f64;
        let observed_share = in_window.len() as f64 / entries.len() as f64;
        if observed_share <= expected_share * rules.clustering_factor {
            continue;
        }

        let ratio = observed_share / expected_share;
        for entry in in_window {
            flags.push(AnomalyFlag::new(
                &entry.entry_id,
                NAME,
                Severity::Medium,
                ratio,
                format!(
                    "Period {} end clustering: {:.0}% of entries in the final {} day(s), {:.1}x the expected rate",
                    period,
                    observed_share * 100.0,
                    rules.period_end_days,
                    ratio
                ),
            ));
        }
    }

    flags
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

// ============================================================================
// TESTS
// ============================================================================

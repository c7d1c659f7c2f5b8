//! Reduce raw, possibly daily, observations to one value per calendar month.
//!
//! The representative value of a month is the first observation of that month
//! in chronological order whose value parses (the month-open price). Later
//! observations of the same month are discarded. Observations with missing or
//! non-numeric values are skipped one by one; they never fail the batch.

use crate::models::{GoldDirection, MonthKey, MonthlyOpenClose, MonthlyValue, RawObservation};
use crate::planner::FetchWindow;
use std::collections::BTreeMap;
use tracing::debug;

/// Parse a provider value. FRED marks gaps with ".", Yahoo with null.
/// "1,234.5" → 1234.5 | "." → None | "NaN" → None
pub fn parse_value(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() || matches!(s, "." | "-" | "—" | "N/A" | "null" | "None") {
        return None;
    }
    let v: f64 = s.replace(',', "").parse().ok()?;
    v.is_finite().then_some(v)
}

/// Observations sorted chronologically and clipped to `window`.
/// The sort is stable, so same-timestamp observations keep input order.
fn in_window<'a>(
    observations: &'a [RawObservation],
    window: Option<&FetchWindow>,
) -> Vec<&'a RawObservation> {
    let mut obs: Vec<&RawObservation> = observations
        .iter()
        .filter(|o| window.is_none_or(|w| w.contains(&o.month())))
        .collect();
    obs.sort_by_key(|o| o.timestamp);
    obs
}

pub fn normalize(
    observations: &[RawObservation],
    window: Option<&FetchWindow>,
) -> Vec<MonthlyValue> {
    let mut monthly: BTreeMap<MonthKey, f64> = BTreeMap::new();
    let mut skipped = 0usize;

    for obs in in_window(observations, window) {
        let month = obs.month();
        if monthly.contains_key(&month) {
            continue;
        }
        match obs.value.as_deref().and_then(parse_value) {
            Some(v) => {
                monthly.insert(month, v);
            }
            None => {
                debug!("{}: skipping {} value {:?}", obs.source, obs.timestamp, obs.value);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        debug!("{} observations skipped as non-numeric", skipped);
    }

    monthly
        .into_iter()
        .map(|(month, value)| MonthlyValue { month, value })
        .collect()
}

/// Same first-of-month policy for sources carrying an open (`value`) and a
/// close (`secondary`). Both must parse on the same observation.
pub fn normalize_open_close(
    observations: &[RawObservation],
    window: Option<&FetchWindow>,
) -> Vec<MonthlyOpenClose> {
    let mut monthly: BTreeMap<MonthKey, MonthlyOpenClose> = BTreeMap::new();

    for obs in in_window(observations, window) {
        let month = obs.month();
        if monthly.contains_key(&month) {
            continue;
        }
        let open = obs.value.as_deref().and_then(parse_value);
        let close = obs.secondary.as_deref().and_then(parse_value);
        let (Some(open), Some(close)) = (open, close) else {
            debug!("{}: skipping {} open={:?} close={:?}",
                obs.source, obs.timestamp, obs.value, obs.secondary);
            continue;
        };
        monthly.insert(month, MonthlyOpenClose {
            month,
            open,
            close,
            direction: GoldDirection::from_open_close(open, close),
        });
    }

    monthly.into_values().collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceId;
    use crate::planner::ChunkedFetchPlanner;
    use chrono::NaiveDate;

    fn obs(date: &str, value: &str) -> RawObservation {
        let ts = NaiveDate::parse_from_str(date, "%Y-%m-%d")
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        RawObservation::new(SourceId::Cpi, ts, Some(value.to_string()))
    }

    fn gold(date: &str, open: &str, close: &str) -> RawObservation {
        RawObservation {
            source: SourceId::Gold,
            secondary: Some(close.to_string()),
            ..obs(date, open)
        }
    }

    fn key(s: &str) -> MonthKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("123.45"), Some(123.45));
        assert_eq!(parse_value(" 1,234.5 "), Some(1234.5));
        assert_eq!(parse_value("."), None);
        assert_eq!(parse_value("null"), None);
        assert_eq!(parse_value("abc"), None);
        assert_eq!(parse_value("NaN"), None);
        assert_eq!(parse_value(""), None);
    }

    #[test]
    fn test_first_observation_of_month_wins() {
        let input = vec![obs("2024-01-05", "10"), obs("2024-01-20", "12"), obs("2024-02-03", "9")];
        let out = normalize(&input, None);
        assert_eq!(out, vec![
            MonthlyValue { month: key("2024-01"), value: 10.0 },
            MonthlyValue { month: key("2024-02"), value: 9.0 },
        ]);
    }

    #[test]
    fn test_unordered_input_is_sorted_first() {
        let input = vec![obs("2024-02-03", "9"), obs("2024-01-20", "12"), obs("2024-01-05", "10")];
        let out = normalize(&input, None);
        assert_eq!(out[0], MonthlyValue { month: key("2024-01"), value: 10.0 });
        assert_eq!(out[1].month, key("2024-02"));
    }

    #[test]
    fn test_missing_values_skip_to_next_in_month() {
        let input = vec![
            obs("2024-01-01", "."),
            obs("2024-01-02", "n/a value"),
            obs("2024-01-03", "101.5"),
            obs("2024-02-01", "102"),
        ];
        let out = normalize(&input, None);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].value, 101.5);
    }

    #[test]
    fn test_month_with_only_bad_values_is_absent() {
        let input = vec![obs("2024-01-01", "."), obs("2024-02-01", "5")];
        let out = normalize(&input, None);
        assert_eq!(out, vec![MonthlyValue { month: key("2024-02"), value: 5.0 }]);
    }

    #[test]
    fn test_empty_input_gives_empty_output() {
        assert!(normalize(&[], None).is_empty());
        assert!(normalize_open_close(&[], None).is_empty());
    }

    #[test]
    fn test_window_clips_both_ends() {
        let planner = ChunkedFetchPlanner::new(2, 100, key("2024-01"));
        let window = planner.window_for_chunk(0); // [2024-01, 2024-03)
        let input = vec![
            obs("2023-12-29", "1"),
            obs("2024-01-02", "2"),
            obs("2024-02-01", "3"),
            obs("2024-03-01", "4"),
        ];
        let out = normalize(&input, Some(&window));
        let months: Vec<String> = out.iter().map(|m| m.month.to_string()).collect();
        assert_eq!(months, vec!["2024-01", "2024-02"]);
    }

    #[test]
    fn test_one_output_per_month_over_daily_series() {
        let start = NaiveDate::from_ymd_opt(2016, 7, 1).unwrap();
        let input: Vec<RawObservation> = (0..800)
            .map(|d| {
                let date = start + chrono::Duration::days(d);
                obs(&date.format("%Y-%m-%d").to_string(), &d.to_string())
            })
            .collect();
        let out = normalize(&input, None);
        let mut months: Vec<MonthKey> = out.iter().map(|m| m.month).collect();
        let n = months.len();
        months.dedup();
        assert_eq!(months.len(), n);
        assert!(out.windows(2).all(|w| w[0].month < w[1].month));
        // Each month's value is its first day's index.
        assert_eq!(out[1].value, 31.0);
    }

    #[test]
    fn test_open_close_derives_direction() {
        let input = vec![
            gold("2024-01-02", "10", "12"),
            gold("2024-01-03", "50", "40"),
            gold("2024-02-01", "12", "10"),
            gold("2024-03-01", "11", "11"),
        ];
        let out = normalize_open_close(&input, None);
        assert_eq!(out.len(), 3);
        assert_eq!((out[0].open, out[0].close), (10.0, 12.0));
        assert_eq!(out[0].direction, GoldDirection::Up);
        assert_eq!(out[1].direction, GoldDirection::Down);
        assert_eq!(out[2].direction, GoldDirection::Down);
    }

    #[test]
    fn test_open_close_needs_both_values() {
        let input = vec![gold("2024-01-02", "10", "."), gold("2024-01-03", "11", "13")];
        let out = normalize_open_close(&input, None);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].open, 11.0);
        assert_eq!(out[0].direction, GoldDirection::Up);
    }
}

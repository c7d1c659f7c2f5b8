//! Chunked backfill planning.
//!
//! A source's history is fetched in fixed-size chunks of months counted from
//! `epoch_start`. Chunk `k` covers `[epoch + k*chunk, epoch + (k+1)*chunk)`.
//! Two ways of deciding which chunk comes next:
//!
//! - `plan_from_count` derives the chunk from how many months are stored.
//!   A window that comes back short leaves the count below the next multiple,
//!   so the same window is requested again on the following run.
//! - `plan_from_cursor` reads an explicit, persisted chunk cursor that advances
//!   once per committed window, short or not.

use crate::config::{IngestConfig, ProgressMode};
use crate::models::MonthKey;
use serde::Serialize;
use std::fmt;

/// Half-open month range `[start, end)` requested from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FetchWindow {
    pub chunk_index: u32,
    pub start: MonthKey,
    pub end: MonthKey,
}

impl FetchWindow {
    pub fn contains(&self, month: &MonthKey) -> bool {
        *month >= self.start && *month < self.end
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chunk {} [{}, {})", self.chunk_index + 1, self.start, self.end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPlan {
    /// The cap is reached; nothing to fetch.
    Complete,
    Fetch(FetchWindow),
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkedFetchPlanner {
    chunk_size: u32,
    max_total: u32,
    epoch_start: MonthKey,
    mode: ProgressMode,
}

impl ChunkedFetchPlanner {
    pub fn new(chunk_size: u32, max_total: u32, epoch_start: MonthKey) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            max_total,
            epoch_start,
            mode: ProgressMode::Cursor,
        }
    }

    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self::new(cfg.chunk_size, cfg.max_total, cfg.epoch_start).with_mode(cfg.progress)
    }

    pub fn with_mode(mut self, mode: ProgressMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> ProgressMode {
        self.mode
    }

    pub fn max_total(&self) -> u32 {
        self.max_total
    }

    pub fn window_for_chunk(&self, chunk_index: u32) -> FetchWindow {
        let start = self.epoch_start.add_months(chunk_index * self.chunk_size);
        FetchWindow {
            chunk_index,
            start,
            end: start.add_months(self.chunk_size),
        }
    }

    pub fn plan_from_count(&self, stored_count: usize) -> FetchPlan {
        if stored_count >= self.max_total as usize {
            return FetchPlan::Complete;
        }
        let chunk_index = (stored_count / self.chunk_size as usize) as u32;
        FetchPlan::Fetch(self.window_for_chunk(chunk_index))
    }

    /// `next_chunk` is the persisted cursor (0 when the source has never run).
    pub fn plan_from_cursor(&self, next_chunk: u32, stored_count: usize) -> FetchPlan {
        if stored_count >= self.max_total as usize
            || next_chunk as u64 * self.chunk_size as u64 >= self.max_total as u64
        {
            return FetchPlan::Complete;
        }
        FetchPlan::Fetch(self.window_for_chunk(next_chunk))
    }

    /// Plan according to the configured progress mode. In cursor mode a
    /// source with no cursor yet starts from its count-derived chunk.
    pub fn plan(&self, cursor: Option<u32>, stored_count: usize) -> FetchPlan {
        match self.mode {
            ProgressMode::Count => self.plan_from_count(stored_count),
            ProgressMode::Cursor => {
                let next = cursor.unwrap_or((stored_count / self.chunk_size as usize) as u32);
                self.plan_from_cursor(next, stored_count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner() -> ChunkedFetchPlanner {
        ChunkedFetchPlanner::new(25, 100, MonthKey::new(2016, 7).unwrap())
    }

    fn window(plan: FetchPlan) -> FetchWindow {
        match plan {
            FetchPlan::Fetch(w) => w,
            FetchPlan::Complete => panic!("expected a window"),
        }
    }

    #[test]
    fn test_first_chunk_starts_at_epoch() {
        let w = window(planner().plan_from_count(0));
        assert_eq!(w.chunk_index, 0);
        assert_eq!(w.start.to_string(), "2016-07");
        assert_eq!(w.end.to_string(), "2018-08");
    }

    #[test]
    fn test_count_planning_is_idempotent() {
        let p = planner();
        for count in [0, 7, 24, 25, 60, 99] {
            assert_eq!(p.plan_from_count(count), p.plan_from_count(count));
        }
    }

    #[test]
    fn test_count_multiple_of_chunk_advances_exactly() {
        let p = planner();
        let epoch = MonthKey::new(2016, 7).unwrap();
        for k in 0..4u32 {
            let w = window(p.plan_from_count((k * 25) as usize));
            assert_eq!(w.chunk_index, k);
            assert_eq!(epoch.months_until(&w.start), (k * 25) as i64);
            assert_eq!(w.start.months_until(&w.end), 25);
        }
    }

    #[test]
    fn test_partial_chunk_stays_on_same_window() {
        let p = planner();
        assert_eq!(window(p.plan_from_count(24)).chunk_index, 0);
        assert_eq!(window(p.plan_from_count(26)).chunk_index, 1);
    }

    #[test]
    fn test_complete_at_and_beyond_cap() {
        let p = planner();
        assert_eq!(p.plan_from_count(100), FetchPlan::Complete);
        assert_eq!(p.plan_from_count(250), FetchPlan::Complete);
        assert!(matches!(p.plan_from_count(99), FetchPlan::Fetch(_)));
    }

    #[test]
    fn test_cursor_advances_past_short_window() {
        let p = planner();
        // 20 months stored after chunk 0 came back short; cursor says chunk 1.
        let w = window(p.plan_from_cursor(1, 20));
        assert_eq!(w.chunk_index, 1);
        assert_eq!(w.start.to_string(), "2018-08");
    }

    #[test]
    fn test_cursor_completes_after_last_chunk() {
        let p = planner();
        assert!(matches!(p.plan_from_cursor(3, 70), FetchPlan::Fetch(_)));
        assert_eq!(p.plan_from_cursor(4, 90), FetchPlan::Complete);
        assert_eq!(p.plan_from_cursor(0, 100), FetchPlan::Complete);
    }

    #[test]
    fn test_plan_dispatches_on_mode() {
        let count_mode = planner().with_mode(ProgressMode::Count);
        assert_eq!(window(count_mode.plan(Some(3), 30)).chunk_index, 1);

        let cursor_mode = planner();
        assert_eq!(window(cursor_mode.plan(Some(3), 30)).chunk_index, 3);
        assert_eq!(window(cursor_mode.plan(None, 30)).chunk_index, 1);
        assert_eq!(window(cursor_mode.plan(None, 0)).chunk_index, 0);
    }

    #[test]
    fn test_window_contains_is_half_open() {
        let w = planner().window_for_chunk(0);
        assert!(w.contains(&MonthKey::new(2016, 7).unwrap()));
        assert!(w.contains(&MonthKey::new(2018, 7).unwrap()));
        assert!(!w.contains(&MonthKey::new(2018, 8).unwrap()));
        assert!(!w.contains(&MonthKey::new(2016, 6).unwrap()));
    }
}

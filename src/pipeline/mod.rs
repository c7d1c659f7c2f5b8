//! Pipeline orchestrator: ties planner → sources → normalizer → storage together.
//!
//! ## Run mode
//!
//! `run()`: one pass per invocation (manual or cron use):
//!   1. For each enabled source, in order, plan the next chunk window from the
//!      stored progress (cursor or non-null count).
//!   2. Fetch raw observations for the window (bounded retry inside the client).
//!   3. Reduce to one value per month and merge into `combined_prices`,
//!      advancing the chunk cursor in the same transaction.
//!
//! Sources run sequentially. A failing source is logged and skipped; nothing is
//! written for it and the remaining sources still run.

use crate::config::{AppConfig, ProgressMode};
use crate::models::{MonthKey, MonthlyRow, RawObservation, SourceId};
use crate::normalizer::{normalize, normalize_open_close};
use crate::planner::{ChunkedFetchPlanner, FetchPlan, FetchWindow};
use crate::sources::{build_sources, ObservationSource};
use crate::storage::{Repository, UpsertStore};
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

pub struct Pipeline {
    config: AppConfig,
}

impl Pipeline {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Open (and migrate) the configured database.
    pub fn open_repository(&self) -> Result<Repository> {
        let repo = Repository::open(&self.config.storage.db_path)
            .context("Failed to open DuckDB")?;
        if self.config.storage.run_migrations {
            repo.run_migrations()?;
        }
        Ok(repo)
    }

    pub fn planner(&self) -> ChunkedFetchPlanner {
        ChunkedFetchPlanner::from_config(&self.config.ingest)
    }

    /// Ingest the next chunk of every enabled source, or of `only` when non-empty.
    pub async fn run(&self, only: &[SourceId]) -> Result<PipelineStats> {
        let repo = self.open_repository()?;
        let sources: Vec<Box<dyn ObservationSource>> = build_sources(&self.config)
            .context("Failed to build sources")?
            .into_iter()
            .filter(|s| only.is_empty() || only.contains(&s.source()))
            .collect();

        let run_id = repo.begin_ingest_run()?;
        let today = MonthKey::from_date(Utc::now());

        info!("=== Ingesting {} sources ({:?} progress) ===", sources.len(), self.planner().mode());
        let stats = ingest_all(&repo, &sources, &self.planner(), today).await;

        let error = (stats.errors > 0).then(|| format!("{} sources failed", stats.errors));
        repo.finish_ingest_run(run_id, stats.sources_processed, stats.months_merged, error.as_deref())
            .ok();

        let (min, max) = repo.month_range().unwrap_or((None, None));
        info!("=== Done: {} sources | {} months merged | {} complete | {} errors | DB range: {:?} → {:?} ===",
            stats.sources_processed, stats.months_merged, stats.complete, stats.errors,
            min.map(|m| m.to_string()), max.map(|m| m.to_string()),
        );

        Ok(stats)
    }

    /// Next window per source without fetching anything.
    pub fn preview(&self, store: &impl UpsertStore) -> Result<Vec<(SourceId, usize, FetchPlan)>> {
        let planner = self.planner();
        self.config
            .sources
            .enabled
            .iter()
            .map(|&id| {
                let (stored, plan) = plan_source(store, id, &planner)?;
                Ok((id, stored, plan))
            })
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct PipelineStats {
    pub sources_processed: usize,
    pub months_merged: usize,
    pub complete: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    /// Cap reached; no request made.
    Complete { stored: usize },
    Ingested { window: FetchWindow, months: usize, cursor_advanced: bool },
}

/// Run every source once, isolating failures per source.
pub async fn ingest_all<S: UpsertStore>(
    store: &S,
    sources: &[Box<dyn ObservationSource>],
    planner: &ChunkedFetchPlanner,
    today: MonthKey,
) -> PipelineStats {
    let mut stats = PipelineStats::default();

    for source in sources {
        let id = source.source();
        stats.sources_processed += 1;
        match ingest_source(store, source.as_ref(), planner, today).await {
            Ok(SourceOutcome::Complete { .. }) => stats.complete += 1,
            Ok(SourceOutcome::Ingested { months, .. }) => stats.months_merged += months,
            Err(e) => {
                warn!("{}: update skipped: {:#}", id, e);
                stats.errors += 1;
            }
        }
    }

    stats
}

/// Stored count and the plan derived from it for one source.
pub fn plan_source<S: UpsertStore + ?Sized>(
    store: &S,
    id: SourceId,
    planner: &ChunkedFetchPlanner,
) -> Result<(usize, FetchPlan)> {
    let stored = store.count_non_null(id.progress_field())?;
    let cursor = match planner.mode() {
        ProgressMode::Cursor => store.chunk_cursor(id)?,
        ProgressMode::Count => None,
    };
    Ok((stored, planner.plan(cursor, stored)))
}

/// Plan, fetch, normalize and merge one chunk for one source.
///
/// The cursor only moves past windows that end at or before `today`'s month;
/// a window still receiving data is merged but will be requested again.
pub async fn ingest_source<S: UpsertStore + ?Sized>(
    store: &S,
    source: &dyn ObservationSource,
    planner: &ChunkedFetchPlanner,
    today: MonthKey,
) -> Result<SourceOutcome> {
    let id = source.source();
    let (stored, plan) = plan_source(store, id, planner)?;

    let window = match plan {
        FetchPlan::Complete => {
            info!("{}: {} months stored, cap of {} reached", id, stored, planner.max_total());
            return Ok(SourceOutcome::Complete { stored });
        }
        FetchPlan::Fetch(w) => w,
    };

    info!("{}: fetching {} ({} months stored)", id, window, stored);
    let raw = source
        .fetch(&window)
        .await
        .with_context(|| format!("fetch {}", window))?;

    let rows = monthly_rows(id, &raw, &window);
    if rows.is_empty() {
        warn!("{}: no usable observations in {}", id, window);
        return Ok(SourceOutcome::Ingested { window, months: 0, cursor_advanced: false });
    }

    let cursor_advanced = window.end <= today;
    let next_chunk = if cursor_advanced { window.chunk_index + 1 } else { window.chunk_index };
    let months = store
        .commit_chunk(id, &rows, next_chunk)
        .with_context(|| format!("commit {}", window))?;

    info!("{}: {} months merged from {} raw observations", id, months, raw.len());
    Ok(SourceOutcome::Ingested { window, months, cursor_advanced })
}

/// Normalize raw observations into store rows for `id`'s columns.
pub fn monthly_rows(id: SourceId, raw: &[RawObservation], window: &FetchWindow) -> Vec<MonthlyRow> {
    if id.is_open_close() {
        normalize_open_close(raw, Some(window))
            .into_iter()
            .map(|m| m.into_gold_row())
            .collect()
    } else {
        let field = id.progress_field();
        normalize(raw, Some(window))
            .into_iter()
            .map(|m| m.into_row(field))
            .collect()
    }
}

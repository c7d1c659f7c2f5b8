use crate::models::{
    CombinedRecord, Field, FieldValue, MonthKey, MonthlyRow, SourceId,
};
use anyhow::{Context, Result};
use chrono::{NaiveDateTime, Utc};
use duckdb::types::{ToSql, ToSqlOutput, Type, Value};
use duckdb::{params, Connection};
use std::path::Path;
use tracing::{debug, info};

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS combined_prices (
    month           VARCHAR   PRIMARY KEY,   -- YYYY-MM
    btc_price       DOUBLE,
    sp500_price     DOUBLE,
    gold_open       DOUBLE,
    gold_close      DOUBLE,
    gold_direction  VARCHAR,                 -- 'up' | 'down'
    oil_price       DOUBLE,
    natgas_price    DOUBLE,
    cpi_value       DOUBLE,
    updated_at      TIMESTAMP NOT NULL
);

CREATE TABLE IF NOT EXISTS ingest_progress (
    source      VARCHAR   PRIMARY KEY,
    next_chunk  INTEGER   NOT NULL,
    updated_at  TIMESTAMP NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS ingest_run_ids START 1;

CREATE TABLE IF NOT EXISTS ingest_runs (
    id                  INTEGER PRIMARY KEY DEFAULT nextval('ingest_run_ids'),
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    sources_processed   INTEGER DEFAULT 0,
    months_merged       INTEGER DEFAULT 0,
    error_msg           VARCHAR
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

// ── Store trait ───────────────────────────────────────────────────────────────

/// Month-keyed persistence that merges column updates from independent sources.
pub trait UpsertStore {
    /// Insert the month if absent, otherwise overwrite only `fields`.
    /// Overlapping fields are last-write-wins.
    fn merge_fields(&self, key: MonthKey, fields: &[(Field, FieldValue)]) -> Result<()>;

    /// Number of months with a non-null value in `field`.
    fn count_non_null(&self, field: Field) -> Result<usize>;

    /// Every record, ascending by month.
    fn records(&self) -> Result<Vec<CombinedRecord>>;

    /// Next chunk index persisted for `source`, if it ever committed one.
    fn chunk_cursor(&self, source: SourceId) -> Result<Option<u32>>;

    /// Merge `rows` and move the cursor of `source` to `next_chunk`, atomically.
    fn commit_chunk(&self, source: SourceId, rows: &[MonthlyRow], next_chunk: u32) -> Result<usize>;
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Number(v) => ToSqlOutput::Owned(Value::Double(*v)),
            FieldValue::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
        })
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        self.conn.execute_batch(DDL).context("DDL failed")?;
        self.conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub fn record_count(&self) -> Result<i64> {
        let mut s = self.conn.prepare("SELECT COUNT(*) FROM combined_prices")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    pub fn month_range(&self) -> Result<(Option<MonthKey>, Option<MonthKey>)> {
        let mut s = self.conn.prepare("SELECT MIN(month), MAX(month) FROM combined_prices")?;
        let (min, max): (Option<String>, Option<String>) =
            s.query_row([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        Ok((
            min.as_deref().map(str::parse::<MonthKey>).transpose()?,
            max.as_deref().map(str::parse::<MonthKey>).transpose()?,
        ))
    }

    // ── Ingest run log ────────────────────────────────────────────────────────

    pub fn begin_ingest_run(&self) -> Result<i64> {
        let id: i64 = self.conn.query_row(
            "INSERT INTO ingest_runs (started_at, status) VALUES (?, 'running') RETURNING id",
            params![Utc::now().naive_utc()],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_ingest_run(
        &self, run_id: i64, sources: usize, months: usize, error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            r#"UPDATE ingest_runs SET
               finished_at = ?, status = ?,
               sources_processed = ?, months_merged = ?, error_msg = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if error.is_none() { "success" } else { "error" },
                sources as i64, months as i64, error, run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_ingest_run(&self) -> Result<Option<(NaiveDateTime, String)>> {
        let mut stmt = self.conn.prepare(
            "SELECT started_at, status FROM ingest_runs ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(r) => Ok(Some((r.get(0)?, r.get(1)?))),
            None => Ok(None),
        }
    }
}

/// Later duplicates of a field within one call replace earlier ones.
fn dedup_fields(fields: &[(Field, FieldValue)]) -> Vec<&(Field, FieldValue)> {
    let mut out: Vec<&(Field, FieldValue)> = Vec::with_capacity(fields.len());
    for fv in fields {
        match out.iter_mut().find(|(f, _)| *f == fv.0) {
            Some(slot) => *slot = fv,
            None => out.push(fv),
        }
    }
    out
}

fn merge_row(
    conn: &Connection,
    key: MonthKey,
    fields: &[(Field, FieldValue)],
    now: NaiveDateTime,
) -> Result<()> {
    let fields = dedup_fields(fields);
    let cols: Vec<&str> = fields.iter().map(|(f, _)| f.column()).collect();

    let mut sql = String::from("INSERT INTO combined_prices (month");
    for c in &cols {
        sql.push_str(", ");
        sql.push_str(c);
    }
    sql.push_str(", updated_at) VALUES (?");
    sql.push_str(&", ?".repeat(cols.len()));
    sql.push_str(", ?) ON CONFLICT (month) DO UPDATE SET ");
    for c in &cols {
        sql.push_str(&format!("{c} = excluded.{c}, "));
    }
    sql.push_str("updated_at = excluded.updated_at");

    let month = key.to_string();
    let mut values: Vec<&dyn ToSql> = Vec::with_capacity(cols.len() + 2);
    values.push(&month);
    for (_, v) in &fields {
        values.push(v);
    }
    values.push(&now);

    conn.execute(&sql, values.as_slice())
        .with_context(|| format!("merge {} {:?}", month, cols))?;
    debug!("merged {} {:?}", month, cols);
    Ok(())
}

fn month_from_sql(idx: usize, s: String) -> duckdb::Result<MonthKey> {
    s.parse()
        .map_err(|e| duckdb::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl UpsertStore for Repository {
    fn merge_fields(&self, key: MonthKey, fields: &[(Field, FieldValue)]) -> Result<()> {
        if fields.is_empty() { return Ok(()); }

        let tx = self.conn.unchecked_transaction()?;
        merge_row(&tx, key, fields, Utc::now().naive_utc())?;
        tx.commit()?;
        Ok(())
    }

    fn count_non_null(&self, field: Field) -> Result<usize> {
        let sql = format!("SELECT COUNT({}) FROM combined_prices", field.column());
        let n: i64 = self.conn.query_row(&sql, [], |r| r.get(0))?;
        Ok(n as usize)
    }

    fn records(&self) -> Result<Vec<CombinedRecord>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT month, btc_price, sp500_price, gold_open, gold_close,
                      gold_direction, oil_price, natgas_price, cpi_value, updated_at
               FROM combined_prices
               ORDER BY month"#,
        )?;
        let records = stmt
            .query_map([], |r| {
                let direction: Option<String> = r.get(5)?;
                Ok(CombinedRecord {
                    month: month_from_sql(0, r.get(0)?)?,
                    btc_price: r.get(1)?,
                    sp500_price: r.get(2)?,
                    gold_open: r.get(3)?,
                    gold_close: r.get(4)?,
                    gold_direction: direction.and_then(|d| d.parse().ok()),
                    oil_price: r.get(6)?,
                    natgas_price: r.get(7)?,
                    cpi_value: r.get(8)?,
                    updated_at: r.get(9)?,
                })
            })?
            .collect::<duckdb::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn chunk_cursor(&self, source: SourceId) -> Result<Option<u32>> {
        let mut stmt = self.conn.prepare(
            "SELECT next_chunk FROM ingest_progress WHERE source = ?",
        )?;
        let mut rows = stmt.query(params![source.as_str()])?;
        match rows.next()? {
            Some(r) => Ok(Some(r.get::<_, i64>(0)? as u32)),
            None => Ok(None),
        }
    }

    fn commit_chunk(&self, source: SourceId, rows: &[MonthlyRow], next_chunk: u32) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let now = Utc::now().naive_utc();
        for row in rows {
            merge_row(&tx, row.month, &row.fields, now)
                .with_context(|| format!("commit {} chunk", source))?;
        }
        // The cursor never moves backwards.
        tx.execute(
            r#"INSERT INTO ingest_progress (source, next_chunk, updated_at)
               VALUES (?, ?, ?)
               ON CONFLICT (source) DO UPDATE SET
                   next_chunk = GREATEST(ingest_progress.next_chunk, excluded.next_chunk),
                   updated_at = excluded.updated_at"#,
            params![source.as_str(), next_chunk as i64, now],
        )?;
        tx.commit()?;
        Ok(rows.len())
    }
}

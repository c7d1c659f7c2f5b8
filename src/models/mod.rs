use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── Month key ─────────────────────────────────────────────────────────────────

/// Calendar month; the only granularity of persisted records.
/// Ordering is chronological (year, then month).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MonthKey {
    year: i32,
    month: u32,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid month key {0:?}, expected YYYY-MM")]
pub struct MonthKeyError(String);

impl MonthKey {
    /// First month of every backfill unless configured otherwise.
    pub const DEFAULT_EPOCH: MonthKey = MonthKey { year: 2016, month: 7 };

    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=9999).contains(&year) && (1..=12).contains(&month) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    pub fn from_date(date: impl Datelike) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or_default()
    }

    /// Months since year 0; makes month arithmetic a plain integer add.
    fn index(&self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_index(idx: i64) -> Self {
        Self {
            year: idx.div_euclid(12) as i32,
            month: idx.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn add_months(&self, months: u32) -> Self {
        Self::from_index(self.index() + months as i64)
    }

    /// Signed number of months from `self` to `other`.
    pub fn months_until(&self, other: &MonthKey) -> i64 {
        other.index() - self.index()
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = MonthKeyError;

    /// Accepts "2016-07" and full dates such as "2016-07-01".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || MonthKeyError(s.to_string());
        let s = s.trim();
        if s.matches('-').count() == 2 {
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| err())?;
            return Ok(MonthKey::from_date(date));
        }
        let (year, month) = s.split_once('-').ok_or_else(err)?;
        let year: i32 = year.parse().map_err(|_| err())?;
        let month: u32 = month.parse().map_err(|_| err())?;
        MonthKey::new(year, month).ok_or_else(err)
    }
}

impl TryFrom<String> for MonthKey {
    type Error = MonthKeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MonthKey> for String {
    fn from(key: MonthKey) -> Self {
        key.to_string()
    }
}

// ── Sources & fields ──────────────────────────────────────────────────────────

/// One external data provider feeding the combined table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Bitcoin,
    Sp500,
    Gold,
    Oil,
    Natgas,
    Cpi,
}

impl SourceId {
    pub const ALL: [SourceId; 6] = [
        SourceId::Bitcoin,
        SourceId::Sp500,
        SourceId::Gold,
        SourceId::Oil,
        SourceId::Natgas,
        SourceId::Cpi,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Bitcoin => "bitcoin",
            SourceId::Sp500 => "sp500",
            SourceId::Gold => "gold",
            SourceId::Oil => "oil",
            SourceId::Natgas => "natgas",
            SourceId::Cpi => "cpi",
        }
    }

    /// Column whose non-null count tracks this source's progress.
    pub fn progress_field(&self) -> Field {
        match self {
            SourceId::Bitcoin => Field::BtcPrice,
            SourceId::Sp500 => Field::Sp500Price,
            SourceId::Gold => Field::GoldOpen,
            SourceId::Oil => Field::OilPrice,
            SourceId::Natgas => Field::NatgasPrice,
            SourceId::Cpi => Field::CpiValue,
        }
    }

    /// True for sources that carry an open and a close per observation.
    pub fn is_open_close(&self) -> bool {
        matches!(self, SourceId::Gold)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Nullable column of `combined_prices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    BtcPrice,
    Sp500Price,
    GoldOpen,
    GoldClose,
    GoldDirection,
    OilPrice,
    NatgasPrice,
    CpiValue,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::BtcPrice,
        Field::Sp500Price,
        Field::GoldOpen,
        Field::GoldClose,
        Field::GoldDirection,
        Field::OilPrice,
        Field::NatgasPrice,
        Field::CpiValue,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Field::BtcPrice => "btc_price",
            Field::Sp500Price => "sp500_price",
            Field::GoldOpen => "gold_open",
            Field::GoldClose => "gold_close",
            Field::GoldDirection => "gold_direction",
            Field::OilPrice => "oil_price",
            Field::NatgasPrice => "natgas_price",
            Field::CpiValue => "cpi_value",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

/// Field updates for one month, as handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct MonthlyRow {
    pub month: MonthKey,
    pub fields: Vec<(Field, FieldValue)>,
}

// ── Gold direction ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoldDirection {
    Up,
    Down,
}

impl GoldDirection {
    /// Up only when the close is strictly above the open.
    pub fn from_open_close(open: f64, close: f64) -> Self {
        if close > open { GoldDirection::Up } else { GoldDirection::Down }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GoldDirection::Up => "up",
            GoldDirection::Down => "down",
        }
    }
}

impl FromStr for GoldDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "up" => Ok(GoldDirection::Up),
            "down" => Ok(GoldDirection::Down),
            other => Err(anyhow::anyhow!("unknown gold direction {:?}", other)),
        }
    }
}

// ── Raw observations ──────────────────────────────────────────────────────────

/// One dated observation exactly as a provider returned it.
/// Values stay raw text ("123.45", ".", "null") until normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub source: SourceId,
    pub timestamp: NaiveDateTime,
    pub value: Option<String>,
    pub secondary: Option<String>,  // close, for open/close sources
}

impl RawObservation {
    pub fn new(source: SourceId, timestamp: NaiveDateTime, value: Option<String>) -> Self {
        Self { source, timestamp, value, secondary: None }
    }

    pub fn month(&self) -> MonthKey {
        MonthKey::from_date(self.timestamp)
    }
}

// ── Normalized monthly values ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyValue {
    pub month: MonthKey,
    pub value: f64,
}

impl MonthlyValue {
    pub fn into_row(self, field: Field) -> MonthlyRow {
        MonthlyRow {
            month: self.month,
            fields: vec![(field, FieldValue::Number(self.value))],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonthlyOpenClose {
    pub month: MonthKey,
    pub open: f64,
    pub close: f64,
    pub direction: GoldDirection,
}

impl MonthlyOpenClose {
    pub fn into_gold_row(self) -> MonthlyRow {
        MonthlyRow {
            month: self.month,
            fields: vec![
                (Field::GoldOpen, FieldValue::Number(self.open)),
                (Field::GoldClose, FieldValue::Number(self.close)),
                (Field::GoldDirection, FieldValue::Text(self.direction.as_str().to_string())),
            ],
        }
    }
}

// ── Combined record ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CombinedRecord {
    pub month: MonthKey,
    pub btc_price: Option<f64>,
    pub sp500_price: Option<f64>,
    pub gold_open: Option<f64>,
    pub gold_close: Option<f64>,
    pub gold_direction: Option<GoldDirection>,
    pub oil_price: Option<f64>,
    pub natgas_price: Option<f64>,
    pub cpi_value: Option<f64>,
    pub updated_at: NaiveDateTime,
}

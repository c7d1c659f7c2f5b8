//! Read-only statistics over fully populated months.
//!
//! Only months with btc, sp500, gold close, oil and CPI all present take part,
//! so every series below has the same length and month alignment.

use crate::models::{CombinedRecord, MonthKey};
use std::fmt::{self, Write as _};

pub const PRICE_LABELS: [&str; 4] = ["btc", "sp500", "gold", "oil"];
pub const LEVEL_LABELS: [&str; 5] = ["btc", "sp500", "gold", "oil", "cpi"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompleteMonth {
    pub month: MonthKey,
    pub prices: [f64; 4],  // PRICE_LABELS order
    pub cpi: f64,
}

impl CompleteMonth {
    pub fn from_record(r: &CombinedRecord) -> Option<Self> {
        Some(Self {
            month: r.month,
            prices: [r.btc_price?, r.sp500_price?, r.gold_close?, r.oil_price?],
            cpi: r.cpi_value?,
        })
    }

    fn level(&self, i: usize) -> f64 {
        if i < self.prices.len() { self.prices[i] } else { self.cpi }
    }

    /// Prices divided by CPI; None when CPI is zero.
    pub fn ratios_to_cpi(&self) -> Option<[f64; 4]> {
        if self.cpi == 0.0 {
            return None;
        }
        Some(self.prices.map(|p| p / self.cpi))
    }
}

pub fn complete_months(records: &[CombinedRecord]) -> Vec<CompleteMonth> {
    records.iter().filter_map(CompleteMonth::from_record).collect()
}

// ── Primitives ────────────────────────────────────────────────────────────────

/// Simple returns `(p[i] - p[i-1]) / p[i-1]`; steps from a zero price are dropped.
pub fn monthly_returns(prices: &[f64]) -> Vec<f64> {
    prices
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by n).
pub fn population_std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Pearson correlation; None for fewer than two points or a constant series.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return None;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let (mx, my) = (mean(xs)?, mean(ys)?);

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let (dx, dy) = (x - mx, y - my);
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }

    let denom = (vx * vy).sqrt();
    if denom == 0.0 { None } else { Some(cov / denom) }
}

/// Square matrix of pairwise correlations; the diagonal is 1 for any
/// non-constant series.
pub fn correlation_matrix(series: &[Vec<f64>]) -> Vec<Vec<Option<f64>>> {
    series
        .iter()
        .map(|a| series.iter().map(|b| pearson(a, b)).collect())
        .collect()
}

// ── Report ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Report {
    pub months: Vec<CompleteMonth>,
    pub average_returns_pct: [Option<f64>; 4],
    pub volatility_pct: [Option<f64>; 4],
    pub correlation: Vec<Vec<Option<f64>>>,
    /// Ratio rows shown by `Display`.
    pub limit: usize,
}

impl Report {
    pub fn build(records: &[CombinedRecord], limit: usize) -> Self {
        let months = complete_months(records);

        let price_series: Vec<Vec<f64>> = (0..PRICE_LABELS.len())
            .map(|i| months.iter().map(|m| m.level(i)).collect())
            .collect();
        let returns: Vec<Vec<f64>> = price_series.iter().map(|p| monthly_returns(p)).collect();

        let average_returns_pct = std::array::from_fn(|i| mean(&returns[i]).map(|m| m * 100.0));
        let volatility_pct =
            std::array::from_fn(|i| population_std_dev(&returns[i]).map(|s| s * 100.0));

        let levels: Vec<Vec<f64>> = (0..LEVEL_LABELS.len())
            .map(|i| months.iter().map(|m| m.level(i)).collect())
            .collect();

        Self {
            correlation: correlation_matrix(&levels),
            months,
            average_returns_pct,
            volatility_pct,
            limit,
        }
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{:.2}", x)).unwrap_or_else(|| "n/a".into())
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (Some(first), Some(last)) = (self.months.first(), self.months.last()) else {
            return writeln!(f, "No fully populated months yet.");
        };
        writeln!(f, "{} complete months ({} → {})", self.months.len(), first.month, last.month)?;

        writeln!(f, "\nPrice-to-CPI ratios (first {}):", self.limit.min(self.months.len()))?;
        for m in self.months.iter().take(self.limit) {
            let Some(r) = m.ratios_to_cpi() else { continue };
            writeln!(
                f,
                "{}: BTC/CPI={:.2}, SP500/CPI={:.2}, Gold/CPI={:.2}, Oil/CPI={:.2}",
                m.month, r[0], r[1], r[2], r[3]
            )?;
        }

        writeln!(f, "\nCorrelation matrix:")?;
        let mut header = String::new();
        for l in LEVEL_LABELS {
            write!(header, "\t{}", l)?;
        }
        writeln!(f, "{}", header)?;
        for (label, row) in LEVEL_LABELS.iter().zip(&self.correlation) {
            let cells: Vec<String> = row.iter().map(|c| fmt_opt(*c)).collect();
            writeln!(f, "{}\t{}", label, cells.join("\t"))?;
        }

        writeln!(f, "\nAverage monthly returns (%):")?;
        for (label, avg) in PRICE_LABELS.iter().zip(self.average_returns_pct) {
            writeln!(f, "{}: {}%", label, fmt_opt(avg))?;
        }

        writeln!(f, "\nVolatility (std-dev of monthly returns, %):")?;
        for (label, vol) in PRICE_LABELS.iter().zip(self.volatility_pct) {
            writeln!(f, "{}: {}%", label, fmt_opt(vol))?;
        }
        Ok(())
    }
}

use crate::models::MonthKey;
use std::time::Instant;
use tracing::info;

/// Logs when a named step starts and how long it took once dropped.
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    pub fn start(label: &'static str) -> Self {
        info!("⏱  {}…", label);
        Self { label, start: Instant::now() }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!("⏱  {} finished in {:.2?}", self.label, self.start.elapsed());
    }
}

/// Thousands separators for counts shown in `stats`.
pub fn fmt_count(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

pub fn fmt_month(m: Option<MonthKey>) -> String {
    m.map(|m| m.to_string()).unwrap_or_else(|| "—".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_count() {
        assert_eq!(fmt_count(1_234_567), "1,234,567");
        assert_eq!(fmt_count(0), "0");
        assert_eq!(fmt_count(100), "100");
        assert_eq!(fmt_count(1000), "1,000");
    }

    #[test]
    fn test_fmt_month() {
        assert_eq!(fmt_month(MonthKey::new(2016, 7)), "2016-07");
        assert_eq!(fmt_month(None), "—");
    }
}

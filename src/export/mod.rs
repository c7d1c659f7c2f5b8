//! CSV export of the combined monthly table.

use crate::models::CombinedRecord;
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Serialize `records` with a header row; empty fields for missing values.
pub fn write_csv<W: Write>(records: &[CombinedRecord], out: W) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(out);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(records.len())
}

pub fn export_csv(records: &[CombinedRecord], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Could not create dir {:?}", parent))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Could not create {:?}", path))?;

    let n = write_csv(records, file)?;
    info!("{} months written to {:?}", n, path);
    Ok(n)
}

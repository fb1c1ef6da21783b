use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use csv::WriterBuilder;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::table::FinalTable;

/// Name of the first column of every exported table.
pub const INDEX_COLUMN: &str = "identifier";

/// Tab for `.tsv` targets, comma otherwise.
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => b'\t',
        _ => b',',
    }
}

/// Writes a finalized table as delimited text: a header of `identifier` followed by the column
/// names, then one line per row. Missing cells are written as empty fields.
///
/// The output depends only on the table, so writing the same table twice produces the same bytes.
pub fn write_table<W: Write>(table: &FinalTable, writer: W, delimiter: u8) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(writer);

    wtr.write_record(std::iter::once(INDEX_COLUMN).chain(table.columns.iter().map(String::as_str)))?;

    for row in &table.rows {
        wtr.write_record(
            std::iter::once(row.identifier.clone())
                .chain(row.cells.iter().map(|cell| cell.to_string())),
        )?;
    }

    wtr.flush()?;
    Ok(())
}

/// Writes `contents` to `path` through a temporary file in the same directory, so that the target
/// is either absent or complete.
fn write_atomically(path: &Path, contents: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)
        .with_context(|| format!("Output directory {} is not writable", dir.display()))?;

    {
        let mut writer = BufWriter::new(temp.as_file_mut());
        contents(&mut writer)?;
        writer.flush()?;
    }

    temp.persist(path)
        .with_context(|| format!("Unable to write {}", path.display()))?;
    Ok(())
}

/// Exports a finalized table to `path`, choosing the delimiter from its extension.
pub fn export_to_path(table: &FinalTable, path: &Path) -> Result<()> {
    info!("Writing {} rows to {}", table.rows.len(), path.display());
    let delimiter = delimiter_for(path);
    write_atomically(path, |w| write_table(table, w, delimiter))
}

/// One line of the warnings file.
#[derive(Debug, Serialize)]
pub struct WarningRow<'a> {
    pub identifier: &'a str,
    pub kind: &'a str,
    pub message: String,
}

/// Writes run warnings as a tab-separated file with an `identifier`, `kind` and `message` column.
pub fn write_warnings<W: Write>(rows: &[WarningRow], writer: W) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer);

    wtr.write_record(["identifier", "kind", "message"])?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn export_warnings(rows: &[WarningRow], path: &Path) -> Result<()> {
    write_atomically(path, |w| write_warnings(rows, w))
}

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// A record of one analysis run, written next to its outputs and shown in the summaries.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct RunMetadata {
    pub proteoscan_version: String,
    pub input_path: String,
    pub run_date: String,
    pub elapsed: f64,
    pub record_count: usize,
    pub retained_count: usize,
    pub length_interval: String,
    pub motif_rows: usize,
    pub motif_columns: usize,
    pub stats_rows: usize,
    pub warning_count: usize,
    pub conservation_plot: Option<String>,
}

impl RunMetadata {
    pub fn new(input_path: &Path) -> Self {
        RunMetadata {
            proteoscan_version: crate::cli::VERSION.to_string(),
            input_path: input_path.display().to_string(),
            run_date: chrono::Local::now().to_rfc2822(),
            ..Default::default()
        }
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file =
            File::create(path).with_context(|| format!("Unable to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .context("Could not serialize run metadata")?;
        writer.flush()?;
        Ok(())
    }
}

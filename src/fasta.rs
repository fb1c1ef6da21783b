use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::str::Lines;

use anyhow::{Context, Result};
use itertools::{Itertools, MinMaxResult};
use serde::Serialize;
use thiserror::Error;

/// A single record of a multi-record FASTA file.
///
/// # Fields
///
/// * `identifier` - The accession token, i.e. the header up to the first whitespace character
/// * `header` - The full header line, without the leading `>`
/// * `residues` - The concatenated sequence lines, with all whitespace removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceRecord {
    pub identifier: String,
    pub header: String,
    pub residues: String,
}

impl SequenceRecord {
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    /// The name used for any per-record file derived from this record.
    pub fn file_stem(&self) -> String {
        file_stem_for(&self.identifier)
    }

    /// Writes the record as a two-line FASTA block.
    pub fn write_fasta(&self, writer: &mut impl Write) -> std::io::Result<()> {
        writeln!(writer, ">{}\n{}", self.header, self.residues)
    }
}

/// Replaces characters which cannot appear in a file name. Accessions such as
/// `sp|P69905|HBA_HUMAN` would otherwise produce nested or invalid paths.
pub fn file_stem_for(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| match c {
            '/' | '\\' | '|' | ':' | '*' | '?' | '"' | '<' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FastaError {
    #[error("input is not a text FASTA file: {reason} at byte {offset}")]
    Malformed { offset: usize, reason: &'static str },
}

/// Checks that a FASTA buffer is text before it is split into records.
///
/// # Errors
///
/// Returns `FastaError::Malformed` if the buffer contains a NUL byte or is not valid UTF-8.
/// Any other content, including text with no `>` markers at all, is accepted.
pub fn decode_fasta(bytes: &[u8]) -> Result<&str, FastaError> {
    if let Some(offset) = bytes.iter().position(|b| *b == 0) {
        return Err(FastaError::Malformed {
            offset,
            reason: "NUL byte",
        });
    }

    std::str::from_utf8(bytes).map_err(|e| FastaError::Malformed {
        offset: e.valid_up_to(),
        reason: "invalid UTF-8",
    })
}

/// Lazily splits FASTA text into `SequenceRecord`s. Create a new instance over the same text to
/// iterate again.
pub struct FastaRecords<'a> {
    lines: Peekable<Lines<'a>>,
}

impl<'a> FastaRecords<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut lines = text.lines().peekable();

        // anything before the first header does not belong to a record
        let mut preamble = 0;
        while let Some(line) = lines.next_if(|l| !l.starts_with('>')) {
            if !line.trim().is_empty() {
                preamble += 1;
            }
        }
        if preamble > 0 {
            debug!("Ignoring {preamble} line(s) before the first FASTA header");
        }

        FastaRecords { lines }
    }
}

impl Iterator for FastaRecords<'_> {
    type Item = SequenceRecord;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.lines.next()?;
        let header = line.strip_prefix('>').unwrap_or(line).trim_end().to_string();
        let identifier = header
            .split(char::is_whitespace)
            .next()
            .unwrap_or_default()
            .to_string();

        let mut residues = String::new();
        while let Some(line) = self.lines.next_if(|l| !l.starts_with('>')) {
            residues.extend(line.chars().filter(|c| !c.is_whitespace()));
        }

        Some(SequenceRecord {
            identifier,
            header,
            residues,
        })
    }
}

/// Reads and splits a FASTA file.
pub fn read_fasta_file(path: &Path) -> Result<Vec<SequenceRecord>> {
    let bytes =
        fs::read(path).with_context(|| format!("Could not read FASTA file {}", path.display()))?;
    let text = decode_fasta(&bytes).with_context(|| format!("{} is malformed", path.display()))?;

    Ok(FastaRecords::new(text).collect())
}

/// Writes every record to a single FASTA file.
pub fn write_fasta_file(path: &Path, records: &[SequenceRecord]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Unable to create FASTA file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    for record in records {
        record.write_fasta(&mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes each record to its own file `<dir>/<file stem>.fasta`, creating `dir` if needed.
///
/// # Returns
///
/// The path written for each record, in the same order as `records`.
pub fn split_into_dir(dir: &Path, records: &[SequenceRecord]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Unable to create directory {}", dir.display()))?;

    records
        .iter()
        .map(|record| -> Result<PathBuf> {
            let path = dir.join(format!("{}.fasta", record.file_stem()));
            write_fasta_file(&path, std::slice::from_ref(record))?;
            Ok(path)
        })
        .collect()
}

/// Residue length statistics over a batch of records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LengthSummary {
    pub count: usize,
    pub min: usize,
    pub max: usize,
    pub mean: f64,
}

impl LengthSummary {
    /// Returns `None` for an empty batch.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a SequenceRecord>) -> Option<Self> {
        let lengths = records.into_iter().map(|r| r.len()).collect::<Vec<_>>();

        let (min, max) = match lengths.iter().minmax() {
            MinMaxResult::NoElements => return None,
            MinMaxResult::OneElement(v) => (*v, *v),
            MinMaxResult::MinMax(a, b) => (*a, *b),
        };

        Some(LengthSummary {
            count: lengths.len(),
            min,
            max,
            mean: lengths.iter().sum::<usize>() as f64 / lengths.len() as f64,
        })
    }
}

impl std::fmt::Display for LengthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sequences, shortest {} aa, longest {} aa, mean {:.1} aa",
            self.count, self.min, self.max, self.mean
        )
    }
}

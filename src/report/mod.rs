//! Extraction of per-sequence attributes from the text reports of external tools.
//!
//! Each report is parsed independently into a [`ParsedReport`]; nothing here touches the
//! filesystem or shared state, so reports can be parsed in parallel. Problems found while parsing
//! never discard the report: they are returned alongside whatever could be extracted.

pub mod motif;
pub mod stats;

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;
use thiserror::Error;

pub use motif::MotifParser;
pub use stats::StatsParser;

/// A named scalar extracted from a report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeValue {
    /// Number of occurrences, e.g. of a motif
    Count(u64),
    /// An integer measurement, e.g. the residue count
    Integer(i64),
    /// A real-valued measurement, e.g. the molecular weight
    Float(f64),
}

impl AttributeValue {
    pub fn as_f64(&self) -> f64 {
        match *self {
            AttributeValue::Count(v) => v as f64,
            AttributeValue::Integer(v) => v as f64,
            AttributeValue::Float(v) => v,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Count(v) => write!(f, "{v}"),
            AttributeValue::Integer(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
        }
    }
}

/// Attribute name to value, in the order the attributes were first seen.
pub type AttributeMap = IndexMap<String, AttributeValue>;

/// The kinds of report the pipeline knows how to read.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportKind {
    /// PROSITE motif scans, as written by `patmatmotifs`
    Motifs,
    /// Peptide statistics, as written by `pepstats`
    Stats,
}

impl ReportKind {
    /// The file extension reports of this kind are stored under.
    pub fn extension(&self) -> &'static str {
        match self {
            ReportKind::Motifs => "patmatmotifs",
            ReportKind::Stats => "pepstats",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::Motifs => "motif",
            ReportKind::Stats => "peptide statistics",
        }
    }
}

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("report for {identifier} could not be read from {}: {source}", .path.display())]
    MissingInput {
        identifier: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("report for {identifier} is malformed: {reason}")]
    MalformedReport { identifier: String, reason: String },

    #[error("report for {identifier} matches {fields} ambiguously on line `{line}`; leaving them unset")]
    AmbiguousFieldMatch {
        identifier: String,
        fields: String,
        line: String,
    },

    #[error("report for {identifier} has a non-numeric value for `{field}` on line `{line}`")]
    NumericParse {
        identifier: String,
        field: String,
        line: String,
    },

    #[error("report expected for {expected} names sequence {found}")]
    IdentifierMismatch { expected: String, found: String },
}

impl ReportError {
    /// The sequence this problem belongs to.
    pub fn identifier(&self) -> &str {
        match self {
            ReportError::MissingInput { identifier, .. }
            | ReportError::MalformedReport { identifier, .. }
            | ReportError::AmbiguousFieldMatch { identifier, .. }
            | ReportError::NumericParse { identifier, .. } => identifier,
            ReportError::IdentifierMismatch { expected, .. } => expected,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReportError::MissingInput { .. } => "missing-input",
            ReportError::MalformedReport { .. } => "malformed-report",
            ReportError::AmbiguousFieldMatch { .. } => "ambiguous-field-match",
            ReportError::NumericParse { .. } => "numeric-parse",
            ReportError::IdentifierMismatch { .. } => "identifier-mismatch",
        }
    }
}

/// The result of parsing one report.
///
/// # Fields
///
/// * `identifier` - The sequence the report describes, as recovered from the report itself or,
///   failing that, the identifier the caller expected
/// * `attributes` - Every attribute that could be extracted
/// * `issues` - Non-fatal problems found while parsing
#[derive(Debug)]
pub struct ParsedReport {
    pub identifier: String,
    pub attributes: AttributeMap,
    pub issues: Vec<ReportError>,
}

/// A parser for one kind of tool report. Implementations are pure functions of the report text.
pub trait ReportParser: Sync {
    /// Parses `text`, the report generated for the sequence `expected`.
    fn parse(&self, text: &str, expected: &str) -> ParsedReport;

    /// The preferred order of the attribute names this parser produces, if it has one.
    fn column_order(&self) -> Vec<String> {
        Vec::new()
    }
}

const DECORATION: &[char] = &['\'', '"', '[', ']', ','];
const FASTA_EXTENSIONS: &[&str] = &[".fasta", ".faa", ".fas", ".fa"];

/// Normalises a sequence identifier recovered from a report or a file name.
///
/// Surrounding whitespace and quote, bracket and comma characters are removed, then a single
/// trailing FASTA extension, then any trailing underscores.
///
/// # Example
///
/// ```ignore
/// assert_eq!(sanitize_identifier("['XP_011.1',"), "XP_011.1");
/// assert_eq!(sanitize_identifier("XP_011.1.fasta"), "XP_011.1");
/// assert_eq!(sanitize_identifier("XP_011.1_"), "XP_011.1");
/// ```
pub fn sanitize_identifier(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches(DECORATION);
    let trimmed = FASTA_EXTENSIONS
        .iter()
        .find_map(|ext| trimmed.strip_suffix(ext))
        .unwrap_or(trimmed);

    trimmed.trim_end_matches('_').trim().to_string()
}

/// Settles which identifier a report belongs to, recording an issue when the report does not
/// name its sequence or names a different one.
fn resolve_identifier(
    recovered: Option<String>,
    expected: &str,
    missing_anchor: &str,
    issues: &mut Vec<ReportError>,
) -> String {
    let expected = sanitize_identifier(expected);

    match recovered.filter(|id| !id.is_empty()) {
        Some(found) => {
            if found != expected {
                issues.push(ReportError::IdentifierMismatch {
                    expected,
                    found: found.clone(),
                });
            }
            found
        }
        None => {
            issues.push(ReportError::MalformedReport {
                identifier: expected.clone(),
                reason: format!("no {missing_anchor} line found"),
            });
            expected
        }
    }
}

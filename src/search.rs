//! Resolving a taxonomic group and protein family into an NCBI protein search, and retrieving the
//! matching sequences.

use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use itertools::Itertools;
use regex::Regex;
use thiserror::Error;

use crate::fasta::{decode_fasta, FastaRecords};
use crate::tools::{run_chain, ToolConfig, ToolError};

/// Whether to restrict a protein search to partial sequences.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartialFilter {
    /// partial and complete sequences
    Any,
    /// partial sequences only
    Partial,
    /// complete sequences only
    NotPartial,
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("no result was found for `{query}`")]
    NoResult { query: String },

    #[error("NCBI rejected `{query}`: {message}")]
    Rejected { query: String, message: String },

    #[error("`{query}` matches several taxonomic groups, choose one with --pick:\n{candidates}")]
    AmbiguousTaxon { query: String, candidates: String },

    #[error("--pick {pick} is out of range, `{query}` matches {count} taxonomic group(s)")]
    PickOutOfRange {
        query: String,
        pick: usize,
        count: usize,
    },

    #[error("the search for `{term}` did not report a result count")]
    NoCount { term: String },

    #[error("the search for `{term}` returned {count} sequences, refine it to at most {max}")]
    TooManySequences { term: String, count: usize, max: usize },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Builds a search term of the form `Aves[ORGN] AND glucose-6-phosphatase[PROT] NOT PARTIAL`.
pub fn build_search_term(taxon: &str, protein: &str, partial: PartialFilter) -> String {
    let term = format!("{}[ORGN] AND {}[PROT]", taxon.trim(), protein.trim());
    match partial {
        PartialFilter::Any => term,
        PartialFilter::Partial => format!("{term} PARTIAL"),
        PartialFilter::NotPartial => format!("{term} NOT PARTIAL"),
    }
}

/// A file name derived from a search term: spaces become underscores and punctuation is dropped.
pub fn term_file_stem(term: &str) -> String {
    term.chars()
        .filter(|c| !matches!(c, '[' | ']' | '\'' | ',' | '.' | '-' | '*'))
        .map(|c| if c == ' ' { '_' } else { c })
        .collect()
}

static COUNT_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Count>\s*(\d+)\s*</Count>").expect("valid count pattern"));

/// Reads the `<Count>N</Count>` element of an `esearch` result.
pub fn parse_count(text: &str) -> Option<usize> {
    COUNT_ELEMENT.captures(text)?.get(1)?.as_str().parse().ok()
}

/// Rejects empty output and output in which Entrez Direct reports a problem.
pub fn check_tool_output(query: &str, output: &str) -> Result<(), SearchError> {
    if output.trim().is_empty() {
        return Err(SearchError::NoResult {
            query: query.to_string(),
        });
    }

    let problem = output
        .lines()
        .find(|line| ["FAILURE", "WARNING", "ERROR"].iter().any(|w| line.contains(w)));

    match problem {
        Some(line) => Err(SearchError::Rejected {
            query: query.to_string(),
            message: line.trim().to_string(),
        }),
        None => Ok(()),
    }
}

/// The scientific names of the taxonomic groups matching `query`, in the order NCBI lists them.
pub fn taxonomy_candidates(tools: &ToolConfig, query: &str) -> Result<Vec<String>, SearchError> {
    let result = run_chain(&[
        tools.esearch("taxonomy", query),
        tools.efetch(Some("docsum")),
        tools.xtract("DocumentSummary", "ScientificName"),
    ])?;

    check_tool_output(query, &result.stdout)?;
    if !result.stderr.trim().is_empty() {
        check_tool_output(query, &result.stderr)?;
    }

    Ok(result
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unique()
        .map(String::from)
        .collect())
}

/// Chooses one of the candidate taxonomic groups. A single candidate is taken as is; among
/// several, `pick` is required.
pub fn choose_taxon(
    query: &str,
    candidates: Vec<String>,
    pick: Option<usize>,
) -> Result<String, SearchError> {
    let count = candidates.len();

    match (count, pick) {
        (0, _) => Err(SearchError::NoResult {
            query: query.to_string(),
        }),
        (1, None) => Ok(candidates.into_iter().next().unwrap_or_default()),
        (_, None) => Err(SearchError::AmbiguousTaxon {
            query: query.to_string(),
            candidates: candidates
                .iter()
                .enumerate()
                .map(|(i, name)| format!("  {i}: {name}"))
                .join("\n"),
        }),
        (_, Some(pick)) => candidates
            .into_iter()
            .nth(pick)
            .ok_or_else(|| SearchError::PickOutOfRange {
                query: query.to_string(),
                pick,
                count,
            }),
    }
}

/// The number of protein sequences matching `term`.
pub fn count_matches(tools: &ToolConfig, term: &str) -> Result<usize, SearchError> {
    let result = run_chain(&[tools.esearch("protein", term)])?;
    check_tool_output(term, &result.stdout)?;

    parse_count(&result.stdout).ok_or_else(|| SearchError::NoCount {
        term: term.to_string(),
    })
}

/// Downloads the sequences matching `term` as FASTA text.
pub fn fetch_fasta(tools: &ToolConfig, term: &str) -> Result<String, SearchError> {
    let result = run_chain(&[tools.esearch("protein", term), tools.efetch(Some("fasta"))])?;

    if !result.stdout.contains('>') {
        return Err(SearchError::NoResult {
            query: term.to_string(),
        });
    }
    Ok(result.stdout)
}

pub struct FetchRequest {
    pub taxon: String,
    pub protein: String,
    pub partial: PartialFilter,
    pub pick: Option<usize>,
    pub max_results: usize,
    pub output: Option<PathBuf>,
}

/// Resolves the taxon, checks the size of the search and writes the matching sequences.
///
/// # Returns
///
/// The path of the written FASTA file.
pub fn fetch(tools: &ToolConfig, request: &FetchRequest) -> Result<PathBuf> {
    let candidates = taxonomy_candidates(tools, &request.taxon)
        .with_context(|| format!("Could not look up the taxonomic group `{}`", request.taxon))?;
    let taxon = choose_taxon(&request.taxon, candidates, request.pick)?;
    info!("Using taxonomic group {taxon}");

    let term = build_search_term(&taxon, &request.protein, request.partial);
    info!("Searching NCBI protein for {term}");

    let count = count_matches(tools, &term)?;
    if count == 0 {
        return Err(SearchError::NoResult { query: term }.into());
    }
    if count > request.max_results {
        return Err(SearchError::TooManySequences {
            term,
            count,
            max: request.max_results,
        }
        .into());
    }
    info!("Search returned {count} sequences");

    let fasta = fetch_fasta(tools, &term)?;
    let records = decode_fasta(fasta.as_bytes())
        .map(|text| FastaRecords::new(text).count())
        .context("NCBI returned malformed FASTA")?;
    if records != count {
        warn!("Expected {count} sequences but received {records}");
    }

    let path = request
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(format!("{}.fasta", term_file_stem(&term))));
    fs::write(&path, fasta).with_context(|| format!("Unable to write {}", path.display()))?;

    info!("Wrote {records} sequences to {}", path.display());
    Ok(path)
}

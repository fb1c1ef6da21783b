use std::fmt;
use std::path::PathBuf;

use clap::builder::styling::AnsiColor;
use clap::builder::Styles;
use clap::{Parser, Subcommand};

use crate::report::ReportKind;
use crate::search::PartialFilter;
use crate::summary::BarLayout;

const fn extra_build_info() -> &'static str {
    match option_env!("CARGO_BUILD_DESC") {
        Some(e) => e,
        None => env!("CARGO_PKG_VERSION"),
    }
}
pub const VERSION: &str = extra_build_info();
const INFO_STRING: &str = "
🧬 proteoscan version ";
const AFTER_STRING: &str = "
   ──────────────────────────────────
   protein retrieval, motif scanning and peptide statistics
   built on NCBI Entrez Direct, Clustal Omega and EMBOSS";

// colouring of the help
const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().bold())
    .usage(AnsiColor::BrightMagenta.on_default().bold())
    .literal(AnsiColor::BrightMagenta.on_default())
    .placeholder(AnsiColor::White.on_default());

#[derive(Parser)]
#[command(
    version = VERSION,
    about = format!("{}{}{}", INFO_STRING, VERSION, AFTER_STRING),
    arg_required_else_help = true,
    flatten_help = true,
    styles = STYLES
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build an NCBI protein search term and download the matching sequences as FASTA
    #[command(arg_required_else_help = true)]
    Fetch {
        /// the taxonomic group, e.g. "Aves"
        #[arg(long)]
        taxon: String,

        /// the protein family, e.g. "glucose-6-phosphatase"
        #[arg(long)]
        protein: String,

        /// restrict the search to partial or complete sequences
        #[arg(long, value_enum, default_value = "any")]
        partial: PartialFilter,

        /// when the taxon matches several taxonomic groups, the 0-based index of the one to use
        #[arg(long)]
        pick: Option<usize>,

        /// refuse searches returning more sequences than this
        #[arg(long, default_value_t = 1000)]
        max_results: usize,

        /// the output .fasta, named after the search term if not given
        #[arg(short)]
        output: Option<String>,

        /// directory containing the Entrez Direct executables, if they are not on the PATH
        #[arg(long)]
        bin_dir: Option<PathBuf>,
    },

    /// Report the number of sequences and their length range
    #[command(arg_required_else_help = true)]
    Lengths {
        /// the input .fasta
        fasta: String,
    },

    /// Keep only the sequences whose length is within an interval
    #[command(arg_required_else_help = true)]
    Filter {
        /// the input .fasta
        fasta: String,

        /// filter lengths to a value within the given interval [a,b], both inclusive.
        /// a can be `-inf` and b can be `inf`; `0,inf` keeps every sequence.
        #[arg(
            long,
            value_parser = |x: &str| ArgInterval::try_from(x),
            default_value = "0,inf",
            verbatim_doc_comment
        )]
        len: ArgInterval,

        /// the output .fasta
        #[arg(short)]
        output: Option<String>,
    },

    /// Write each sequence of a multi-record .fasta to its own file
    #[command(arg_required_else_help = true)]
    Split {
        /// the input .fasta
        fasta: String,

        /// the directory to write `<identifier>.fasta` files into
        #[arg(long, default_value = "sequences")]
        outdir: PathBuf,
    },

    /// Tabulate existing motif or peptide statistics reports, one per sequence of a .fasta
    #[command(arg_required_else_help = true)]
    Collect {
        /// the kind of report to read
        #[arg(value_enum)]
        kind: ReportKind,

        /// the .fasta the reports were generated from
        #[arg(long)]
        fasta: String,

        /// the directory holding `<identifier>.<extension>` reports
        #[arg(long)]
        reports: PathBuf,

        /// the report extension, by default `patmatmotifs` or `pepstats`
        #[arg(long)]
        extension: Option<String>,

        /// the output table (.csv, or .tsv for tab-separated); standard output if not given
        #[arg(short)]
        output: Option<String>,

        /// also write an HTML summary with bar charts
        #[arg(long)]
        summary: Option<PathBuf>,

        /// also write every warning to a tab-separated file
        #[arg(long)]
        warnings: Option<PathBuf>,

        /// how bars of one sequence are arranged in the summary charts
        #[arg(long, value_enum, default_value = "stacked")]
        layout: BarLayout,
    },

    /// Run the whole analysis on a .fasta: length filter, conservation plot, motif scan and
    /// peptide statistics
    #[command(arg_required_else_help = true)]
    Run {
        /// the input .fasta
        fasta: PathBuf,

        /// the directory to write every output into
        #[arg(long, default_value = "proteoscan_out")]
        outdir: PathBuf,

        /// prefix of the output file names, by default the name of the input file
        #[arg(long)]
        stem: Option<String>,

        /// keep sequences whose length is within the interval [a,b]; see `filter --help`
        #[arg(
            long,
            value_parser = |x: &str| ArgInterval::try_from(x),
            default_value = "0,inf"
        )]
        len: ArgInterval,

        /// the number of external tool invocations to run at once
        #[arg(short, long, default_value_t = 4)]
        threads: usize,

        /// do not report simple post-translational modification sites in the motif scan
        #[arg(long, action)]
        prune: bool,

        /// skip the alignment and conservation plot
        #[arg(long, action)]
        skip_conservation: bool,

        /// how bars of one sequence are arranged in the summary charts
        #[arg(long, value_enum, default_value = "stacked")]
        layout: BarLayout,

        /// fail when any sequence produced a warning
        #[arg(long, action)]
        strict: bool,

        /// directory containing the EMBOSS and Clustal Omega executables, if they are not on
        /// the PATH
        #[arg(long)]
        bin_dir: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ArgInterval {
    pub min: f64,
    pub max: f64,
}

/// Error type for parsing an interval string.
#[derive(Debug)]
pub struct ParseIntervalErr(String);

impl std::fmt::Display for ParseIntervalErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid interval format: {}", self.0)
    }
}

impl std::error::Error for ParseIntervalErr {}

impl<'a> TryFrom<&'a str> for ArgInterval {
    type Error = ParseIntervalErr;

    fn try_from(arg: &'a str) -> Result<ArgInterval, Self::Error> {
        let arg_lc = arg.to_lowercase();
        let parts: Vec<&str> = arg_lc.split(',').collect();

        if parts.len() != 2 {
            return Err(ParseIntervalErr(indoc::formatdoc! {"
            Expected format '<min>,<max>', got '{arg}'. The expected format is \
            `a,b`, as in:
              --len 0,1000
              --len 0,inf
              --len 100,1000
            "}));
        }

        // Try to parse the minimum and maximum, handling unbounded cases.
        let min = match parts[0].trim() {
            "-inf" => f64::NEG_INFINITY,
            s => parse_bound(s).ok_or_else(|| {
                ParseIntervalErr(format!(
                    "Invalid minimum value: '{}' (should be any number or `-inf`)",
                    parts[0].trim()
                ))
            })?,
        };

        let max = match parts[1].trim() {
            "inf" => f64::INFINITY,
            s => parse_bound(s).ok_or_else(|| {
                ParseIntervalErr(format!(
                    "Invalid maximum value: '{}' (should be any number or `inf`)",
                    parts[1].trim()
                ))
            })?,
        };

        if min > max {
            return Err(ParseIntervalErr(format!(
                "the minimum {min} is larger than the maximum {max}"
            )));
        }

        Ok(ArgInterval { min, max })
    }
}

/// A finite bound; the unbounded ends are only spelled `-inf` and `inf`.
fn parse_bound(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn bound_label(v: f64) -> String {
    if v.is_infinite() {
        if v > 0.0 { "inf" } else { "-inf" }.to_string()
    } else {
        format!("{v}")
    }
}

impl ArgInterval {
    pub fn unbounded() -> Self {
        ArgInterval {
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
        }
    }

    /// Whether `v` lies within the interval, bounds included.
    pub fn contains(&self, v: f64) -> bool {
        (self.min <= v) && (v <= self.max)
    }

    /// A file-name friendly description, e.g. `min50_max800`.
    pub fn label(&self) -> String {
        format!("min{}_max{}", bound_label(self.min), bound_label(self.max))
    }
}

impl fmt::Display for ArgInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{},{}]", bound_label(self.min), bound_label(self.max))
    }
}

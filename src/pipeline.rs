//! Drives an analysis run: from a FASTA file to motif and peptide statistics tables, their
//! summaries and a record of everything that went wrong along the way.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, ensure, Context, Result};
use rayon::prelude::*;
use thiserror::Error;

use crate::export::{export_to_path, export_warnings, WarningRow};
use crate::fasta::{read_fasta_file, split_into_dir, write_fasta_file, LengthSummary, SequenceRecord};
use crate::file::RunMetadata;
use crate::filter::{retain_by_length, FilterOpts};
use crate::report::{MotifParser, ParsedReport, ReportError, ReportKind, ReportParser, StatsParser};
use crate::summary::{self, BarLayout, DEFAULT_STATS_COLUMNS};
use crate::table::{AttributeTable, FillPolicy, FinalTable, MissingMarker, ZeroFill};
use crate::tools::{invoke_all, ToolConfig, ToolError};

/// Everything a run needs to know, passed explicitly to each step.
pub struct RunContext {
    pub input: PathBuf,
    pub outdir: PathBuf,
    /// Prefix of every output file name
    pub stem: String,
    pub threads: usize,
    pub filter: FilterOpts,
    pub prune: bool,
    pub conservation: bool,
    pub tools: ToolConfig,
    pub layout: BarLayout,
    pub strict: bool,
}

impl RunContext {
    /// The file stem of `input`, used when no stem is given.
    pub fn default_stem(input: &Path) -> String {
        input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "proteoscan".to_string())
    }

    /// `<outdir>/<stem><suffix>`
    pub fn output(&self, suffix: &str) -> PathBuf {
        self.outdir.join(format!("{}{}", self.stem, suffix))
    }
}

/// A problem confined to one sequence, or to an optional step, which does not stop the run.
#[derive(Error, Debug)]
pub enum RunWarning {
    #[error(transparent)]
    Report(#[from] ReportError),

    #[error("`{tool}` failed for {identifier}: {source}")]
    ToolFailed {
        identifier: String,
        tool: String,
        #[source]
        source: ToolError,
    },

    #[error("the conservation plot could not be produced: {source}")]
    Conservation {
        #[source]
        source: ToolError,
    },

    #[error("skipping record {identifier}: {reason}")]
    SkippedRecord { identifier: String, reason: String },
}

impl RunWarning {
    /// The sequence this warning belongs to, or `-` for run-level warnings.
    pub fn identifier(&self) -> &str {
        match self {
            RunWarning::Report(e) => e.identifier(),
            RunWarning::ToolFailed { identifier, .. }
            | RunWarning::SkippedRecord { identifier, .. } => identifier,
            RunWarning::Conservation { .. } => "-",
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RunWarning::Report(e) => e.kind(),
            RunWarning::ToolFailed { .. } => "tool-failed",
            RunWarning::Conservation { .. } => "conservation",
            RunWarning::SkippedRecord { .. } => "skipped-record",
        }
    }

    pub fn to_row(&self) -> WarningRow<'_> {
        WarningRow {
            identifier: self.identifier(),
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// Where the report for one sequence comes from.
#[derive(Debug)]
pub enum ReportSource {
    File(PathBuf),
    /// The report was never produced
    Unavailable(RunWarning),
}

/// A finalized table together with the warnings raised while building it.
#[derive(Debug)]
pub struct Tabulated {
    pub table: FinalTable,
    pub warnings: Vec<RunWarning>,
}

/// Drops records which cannot be told apart: those without an identifier, every repeat of an
/// identifier after its first record, and records whose file stem is already taken by an earlier
/// record (`sp|P1|X` and `sp_P1_X` would share every per-sequence file).
pub fn prepare_batch(records: Vec<SequenceRecord>) -> (Vec<SequenceRecord>, Vec<RunWarning>) {
    let mut seen = HashSet::new();
    let mut stems = HashSet::new();
    let mut warnings = Vec::new();
    let mut batch = Vec::with_capacity(records.len());

    for record in records {
        if record.identifier.is_empty() {
            warnings.push(RunWarning::SkippedRecord {
                identifier: format!(">{}", record.header),
                reason: "the header has no identifier".to_string(),
            });
        } else if !seen.insert(record.identifier.clone()) {
            warnings.push(RunWarning::SkippedRecord {
                identifier: record.identifier,
                reason: "the identifier was already used by an earlier record".to_string(),
            });
        } else if !stems.insert(record.file_stem()) {
            warnings.push(RunWarning::SkippedRecord {
                reason: format!(
                    "its file name {} is already used by an earlier record",
                    record.file_stem()
                ),
                identifier: record.identifier,
            });
        } else {
            batch.push(record);
        }
    }

    for warning in &warnings {
        warn!("{warning}");
    }
    (batch, warnings)
}

/// Reads the report of `identifier` from `path`.
pub fn load_report(identifier: &str, path: &Path) -> Result<String, ReportError> {
    fs::read_to_string(path).map_err(|source| ReportError::MissingInput {
        identifier: identifier.to_string(),
        path: path.to_path_buf(),
        source,
    })
}

/// The report of `record` within `dir`: `<stem>.<extension>`, or `<stem>.fasta.<extension>` when
/// only that exists.
pub fn report_path(dir: &Path, record: &SequenceRecord, extension: &str) -> PathBuf {
    let stem = record.file_stem();
    let plain = dir.join(format!("{stem}.{extension}"));
    let with_fasta = dir.join(format!("{stem}.fasta.{extension}"));

    if !plain.exists() && with_fasta.exists() {
        with_fasta
    } else {
        plain
    }
}

enum Loaded {
    Parsed(ParsedReport),
    Missing(RunWarning),
}

/// Parses the report of every sequence and gathers the results into one table.
///
/// Reports are read and parsed in parallel; the table is filled afterwards from a single thread
/// in the order of `sources`. Rows are keyed by the identifiers in `sources`: an identifier
/// recovered from a report is only checked against them. A sequence whose report is missing gets
/// a flagged row of missing cells.
///
/// It is an error when `sources` is empty or none of the reports could be read.
pub fn tabulate<P: FillPolicy>(
    parser: &dyn ReportParser,
    kind: ReportKind,
    sources: Vec<(String, ReportSource)>,
) -> Result<Tabulated> {
    ensure!(!sources.is_empty(), "there are no sequences to tabulate");

    let identifiers = sources.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>();

    let loaded: Vec<(String, Loaded)> = sources
        .into_par_iter()
        .map(|(identifier, source)| {
            let loaded = match source {
                ReportSource::File(path) => match load_report(&identifier, &path) {
                    Ok(text) => Loaded::Parsed(parser.parse(&text, &identifier)),
                    Err(e) => Loaded::Missing(e.into()),
                },
                ReportSource::Unavailable(warning) => Loaded::Missing(warning),
            };
            (identifier, loaded)
        })
        .collect();

    let mut table = AttributeTable::<P>::for_batch(identifiers)
        .with_column_order(parser.column_order());
    let mut warnings = Vec::new();
    let mut readable = 0usize;

    for (identifier, loaded) in loaded {
        match loaded {
            Loaded::Parsed(report) => {
                readable += 1;
                table.add_row(&identifier, report.attributes)?;
                warnings.extend(report.issues.into_iter().map(RunWarning::from));
            }
            Loaded::Missing(warning) => {
                table.flag_missing(&identifier, warning.to_string())?;
                warnings.push(warning);
            }
        }
    }

    for warning in &warnings {
        warn!("{warning}");
    }

    if readable == 0 {
        bail!("none of the {} reports could be read", kind.label());
    }

    let table = table.finalize();
    info!(
        "Tabulated {} {} reports into {} columns ({} with warnings)",
        table.rows.len(),
        kind.label(),
        table.columns.len(),
        warnings.len()
    );

    Ok(Tabulated { table, warnings })
}

fn tabulate_kind(kind: ReportKind, sources: Vec<(String, ReportSource)>) -> Result<Tabulated> {
    match kind {
        ReportKind::Motifs => tabulate::<ZeroFill>(&MotifParser::new(), kind, sources),
        ReportKind::Stats => tabulate::<MissingMarker>(&StatsParser::new(), kind, sources),
    }
}

/// Tabulates reports that already exist in `reports`, one per sequence of `fasta`.
pub fn collect_reports(
    kind: ReportKind,
    fasta: &Path,
    reports: &Path,
    extension: Option<&str>,
) -> Result<Tabulated> {
    ensure!(
        reports.is_dir(),
        "report directory {} does not exist",
        reports.display()
    );

    let records = read_fasta_file(fasta)?;
    ensure!(
        !records.is_empty(),
        "no FASTA records found in {}",
        fasta.display()
    );
    let (records, skipped) = prepare_batch(records);

    let extension = extension.unwrap_or(kind.extension());
    let sources = records
        .iter()
        .map(|record| {
            let path = report_path(reports, record, extension);
            (record.identifier.clone(), ReportSource::File(path))
        })
        .collect();

    let mut tabulated = tabulate_kind(kind, sources)?;
    let mut warnings = skipped;
    warnings.append(&mut tabulated.warnings);
    tabulated.warnings = warnings;
    Ok(tabulated)
}

/// Runs the tool of `kind` over every sequence file and collects where each report went.
fn scan(
    ctx: &RunContext,
    kind: ReportKind,
    records: &[SequenceRecord],
    fasta_paths: &[PathBuf],
) -> Result<Vec<(String, ReportSource)>> {
    let dir = ctx.outdir.join(kind.extension());
    fs::create_dir_all(&dir)
        .with_context(|| format!("Unable to create directory {}", dir.display()))?;

    let outfiles = records
        .iter()
        .map(|r| dir.join(format!("{}.{}", r.file_stem(), kind.extension())))
        .collect::<Vec<_>>();

    let commands = fasta_paths
        .iter()
        .zip(&outfiles)
        .map(|(fasta, outfile)| match kind {
            ReportKind::Motifs => ctx.tools.patmatmotifs(fasta, outfile, ctx.prune),
            ReportKind::Stats => ctx.tools.pepstats(fasta, outfile),
        })
        .collect::<Vec<_>>();

    info!(
        "Running {} on {} sequences with {} threads",
        kind.extension(),
        commands.len(),
        ctx.threads
    );

    let sources = invoke_all(commands, ctx.threads)
        .into_iter()
        .zip(records.iter().zip(outfiles))
        .map(|(result, (record, outfile))| {
            let outcome = result.and_then(|r| r.check(kind.extension()));
            let source = match outcome {
                Ok(_) => ReportSource::File(outfile),
                Err(source) => ReportSource::Unavailable(RunWarning::ToolFailed {
                    identifier: record.identifier.clone(),
                    tool: kind.extension().to_string(),
                    source,
                }),
            };
            (record.identifier.clone(), source)
        })
        .collect();

    Ok(sources)
}

/// Aligns the retained sequences and plots their conservation.
///
/// # Returns
///
/// The path of the plot.
fn conservation(ctx: &RunContext, trimmed: &Path) -> Result<PathBuf, ToolError> {
    let alignment = ctx.output(".msf");

    info!("Aligning sequences to {}", alignment.display());
    ctx.tools
        .clustalo(trimmed, &alignment, ctx.threads)
        .invoke()?
        .check("clustalo")?;

    ctx.tools
        .plotcon(&alignment, &ctx.outdir, &ctx.stem)
        .invoke()?
        .check("plotcon")?;

    Ok(ctx.output(".1.png"))
}

/// Runs the whole analysis described by `ctx`.
///
/// Outputs, all within `ctx.outdir`:
///
/// * `<stem>_<interval>.fasta` - the sequences retained by the length filter
/// * `sequences/` - one FASTA file per retained sequence
/// * `patmatmotifs/`, `pepstats/` - the tool reports
/// * `<stem>_motif_counts.csv`, `<stem>_stats.csv` - the tables
/// * `<stem>_motifs.html`, `<stem>_stats.html` - their summaries
/// * `<stem>_warnings.tsv` - every warning raised
/// * `<stem>_run.json` - the run metadata
pub fn run(ctx: &RunContext) -> Result<RunMetadata> {
    let start = Instant::now();
    let mut metadata = RunMetadata::new(&ctx.input);

    fs::create_dir_all(&ctx.outdir)
        .with_context(|| format!("Unable to create output directory {}", ctx.outdir.display()))?;

    let records = read_fasta_file(&ctx.input)?;
    ensure!(
        !records.is_empty(),
        "no FASTA records found in {}",
        ctx.input.display()
    );
    metadata.record_count = records.len();
    let (records, mut warnings) = prepare_batch(records);
    if let Some(lengths) = LengthSummary::from_records(&records) {
        info!("Read {lengths}");
    }

    let retained = retain_by_length(records, &ctx.filter);
    ensure!(
        !retained.is_empty(),
        "no sequences have a length within {}",
        ctx.filter.len
    );
    metadata.retained_count = retained.len();
    metadata.length_interval = ctx.filter.len.to_string();

    let trimmed = ctx.output(&format!("_{}.fasta", ctx.filter.len.label()));
    write_fasta_file(&trimmed, &retained)?;
    let fasta_paths = split_into_dir(&ctx.outdir.join("sequences"), &retained)?;

    if ctx.conservation {
        match conservation(ctx, &trimmed) {
            Ok(plot) => {
                info!("Conservation plot written to {}", plot.display());
                metadata.conservation_plot = Some(plot.display().to_string());
            }
            Err(source) => {
                let warning = RunWarning::Conservation { source };
                warn!("{warning}");
                warnings.push(warning);
            }
        }
    }

    let sources = scan(ctx, ReportKind::Motifs, &retained, &fasta_paths)?;
    let motifs = tabulate::<ZeroFill>(&MotifParser::new(), ReportKind::Motifs, sources)?;
    warnings.extend(motifs.warnings);
    export_to_path(&motifs.table, &ctx.output("_motif_counts.csv"))?;

    let sources = scan(ctx, ReportKind::Stats, &retained, &fasta_paths)?;
    let stats = tabulate::<MissingMarker>(&StatsParser::new(), ReportKind::Stats, sources)?;
    warnings.extend(stats.warnings);
    export_to_path(&stats.table, &ctx.output("_stats.csv"))?;

    let warnings_path = ctx.output("_warnings.tsv");
    export_warnings(
        &warnings.iter().map(RunWarning::to_row).collect::<Vec<_>>(),
        &warnings_path,
    )?;

    metadata.motif_rows = motifs.table.rows.len();
    metadata.motif_columns = motifs.table.columns.len();
    metadata.stats_rows = stats.table.rows.len();
    metadata.warning_count = warnings.len();
    metadata.elapsed = start.elapsed().as_secs_f64();
    metadata.write_json(&ctx.output("_run.json"))?;

    summary::write_summary(
        &ctx.output("_motifs.html"),
        "Motif occurrences",
        &metadata,
        &motifs.table,
        &summary::motif_charts(&motifs.table, ctx.layout),
    )?;
    summary::write_summary(
        &ctx.output("_stats.html"),
        "Peptide statistics",
        &metadata,
        &stats.table,
        &summary::stats_charts(&stats.table, DEFAULT_STATS_COLUMNS, ctx.layout),
    )?;

    if ctx.strict && !warnings.is_empty() {
        bail!(
            "{} warning(s) were raised, see {}",
            warnings.len(),
            warnings_path.display()
        );
    }

    info!(
        "Completed in {:.1}s with {} warning(s)",
        metadata.elapsed,
        warnings.len()
    );
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::ArgInterval;
    use crate::report::AttributeValue;
    use crate::table::Cell;
    use indoc::indoc;

    fn record(id: &str, residues: &str) -> SequenceRecord {
        SequenceRecord {
            identifier: id.to_string(),
            header: format!("{id} test protein"),
            residues: residues.to_string(),
        }
    }

    #[test]
    fn prepares_batch() {
        let (batch, warnings) = prepare_batch(vec![
            record("a", "MK"),
            record("", "MK"),
            record("b", "MK"),
            record("a", "MKT"),
        ]);

        let ids = batch.iter().map(|r| r.identifier.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(warnings.len(), 2);
        assert!(warnings.iter().all(|w| w.kind() == "skipped-record"));
    }

    #[test]
    fn records_sharing_a_file_stem_are_skipped() {
        let (batch, warnings) = prepare_batch(vec![record("a|b", "MKT"), record("a_b", "MKTA")]);

        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].identifier, "a|b");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind(), "skipped-record");
        assert_eq!(warnings[0].identifier(), "a_b");
        assert!(warnings[0].to_string().contains("a_b"));
    }

    #[test]
    fn collected_reports_are_not_shared_between_records() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("batch.fasta");
        fs::write(&fasta, ">a|b first\nMKT\n>a_b second\nMKTA\n").unwrap();

        let reports = dir.path().join("reports");
        fs::create_dir(&reports).unwrap();
        fs::write(
            reports.join("a_b.pepstats"),
            "PEPSTATS of a|b from 1 to 3\n\nCharge   = 7.0\n",
        )
        .unwrap();

        let tabulated = collect_reports(ReportKind::Stats, &fasta, &reports, None).unwrap();

        assert_eq!(tabulated.table.rows.len(), 1);
        assert_eq!(tabulated.table.cell("a|b", "Charge").unwrap().as_f64(), Some(7.0));
        assert_eq!(tabulated.table.cell("a_b", "Charge"), None);
        let kinds = tabulated.warnings.iter().map(|w| w.kind()).collect::<Vec<_>>();
        assert_eq!(kinds, vec!["skipped-record"]);
    }

    #[test]
    fn tabulates_with_missing_and_failed_reports() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("s1.patmatmotifs");
        fs::write(&present, "# Sequence: s1 from: 1 to: 10\nMotif = EF_HAND\nMotif = EF_HAND\n")
            .unwrap();
        let empty = dir.path().join("s2.patmatmotifs");
        fs::write(&empty, "# Sequence: s2 from: 1 to: 10\n# HitCount: 0\n").unwrap();

        let sources = vec![
            ("s1".to_string(), ReportSource::File(present)),
            ("s2".to_string(), ReportSource::File(empty)),
            (
                "s3".to_string(),
                ReportSource::File(dir.path().join("s3.patmatmotifs")),
            ),
            (
                "s4".to_string(),
                ReportSource::Unavailable(RunWarning::SkippedRecord {
                    identifier: "s4".to_string(),
                    reason: "test".to_string(),
                }),
            ),
        ];

        let tabulated =
            tabulate::<ZeroFill>(&MotifParser::new(), ReportKind::Motifs, sources).unwrap();
        let table = &tabulated.table;

        assert_eq!(table.columns, vec!["EF_HAND"]);
        assert_eq!(
            table.cell("s1", "EF_HAND"),
            Some(&Cell::Value(AttributeValue::Count(2)))
        );
        assert_eq!(
            table.cell("s2", "EF_HAND"),
            Some(&Cell::Value(AttributeValue::Count(0)))
        );
        assert_eq!(table.cell("s3", "EF_HAND"), Some(&Cell::Missing));
        assert_eq!(table.cell("s4", "EF_HAND"), Some(&Cell::Missing));

        let kinds = tabulated.warnings.iter().map(|w| w.kind()).collect::<Vec<_>>();
        assert_eq!(kinds, vec!["missing-input", "skipped-record"]);
        assert_eq!(tabulated.warnings[0].identifier(), "s3");
    }

    #[test]
    fn no_readable_report_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let sources = vec![(
            "s1".to_string(),
            ReportSource::File(dir.path().join("s1.pepstats")),
        )];

        assert!(tabulate::<MissingMarker>(&StatsParser::new(), ReportKind::Stats, sources).is_err());
        assert!(
            tabulate::<MissingMarker>(&StatsParser::new(), ReportKind::Stats, Vec::new()).is_err()
        );
    }

    #[test]
    fn finds_reports_named_after_the_fasta_file() {
        let dir = tempfile::tempdir().unwrap();
        let rec = record("XP_1.1", "MK");
        assert_eq!(
            report_path(dir.path(), &rec, "pepstats"),
            dir.path().join("XP_1.1.pepstats")
        );

        fs::write(dir.path().join("XP_1.1.fasta.pepstats"), "").unwrap();
        assert_eq!(
            report_path(dir.path(), &rec, "pepstats"),
            dir.path().join("XP_1.1.fasta.pepstats")
        );
    }

    #[test]
    fn collects_stats_reports() {
        let dir = tempfile::tempdir().unwrap();
        let fasta = dir.path().join("batch.fasta");
        fs::write(&fasta, ">A first\nMKT\n>B second\nMKTA\n").unwrap();

        let reports = dir.path().join("reports");
        fs::create_dir(&reports).unwrap();
        fs::write(
            reports.join("A.pepstats"),
            indoc! {"
                PEPSTATS of A from 1 to 3

                Molecular weight = 350.45  \t\tResidues = 3
                Average Residue Weight  = 116.817 \t\tCharge   = 1.5
            "},
        )
        .unwrap();
        fs::write(
            reports.join("B.pepstats"),
            "PEPSTATS of B from 1 to 4\n\nMolecular weight = 451.56  \t\tResidues = 4\n",
        )
        .unwrap();

        let tabulated = collect_reports(ReportKind::Stats, &fasta, &reports, None).unwrap();
        let table = &tabulated.table;

        assert_eq!(
            table.columns,
            vec![
                "Molecular Weight",
                "Number of Residues",
                "Average Residue Weight",
                "Charge"
            ]
        );
        assert_eq!(table.cell("A", "Charge").unwrap().as_f64(), Some(1.5));
        assert_eq!(table.cell("B", "Charge"), Some(&Cell::Missing));
        assert!(tabulated.warnings.is_empty());
    }

    #[test]
    fn names_outputs_after_the_stem() {
        let ctx = RunContext {
            input: PathBuf::from("data/birds.fasta"),
            outdir: PathBuf::from("out"),
            stem: RunContext::default_stem(Path::new("data/birds.fasta")),
            threads: 1,
            filter: FilterOpts {
                len: ArgInterval::unbounded(),
            },
            prune: false,
            conservation: false,
            tools: ToolConfig::default(),
            layout: BarLayout::Stacked,
            strict: false,
        };

        assert_eq!(ctx.stem, "birds");
        assert_eq!(ctx.output("_stats.csv"), PathBuf::from("out/birds_stats.csv"));
    }
}

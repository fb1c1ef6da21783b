extern crate env_logger;
#[macro_use]
extern crate log;
use std::{
    fs::File,
    io::{prelude::*, stdout, BufWriter},
    path::Path,
    time::Instant,
};

use anyhow::{bail, Result};
use clap::Parser;

mod cli;
mod export;
mod fasta;
mod file;
mod filter;
mod pipeline;
mod report;
mod search;
mod summary;
mod table;
mod tools;

use cli::{Cli, Commands};
use fasta::{read_fasta_file, split_into_dir, LengthSummary};
use filter::FilterOpts;
use pipeline::{RunContext, RunWarning};
use tools::ToolConfig;

/// Creates a `BufWriter` for the given output option. This allows for an output file to be passed
/// or otherwise will default to using standard output.
///
/// If `output` is `Some`, it creates a file at the specified path and returns a `BufWriter` for it.
/// If `output` is `None`, it returns a `BufWriter` for the standard output.
///
/// # Arguments
///
/// * `output` - An `Option` containing the path to the output file as a `String`.
///
/// # Returns
///
/// A `Result` containing a `BufWriter` that implements `Write`.
fn get_writer(output: &Option<String>) -> Result<impl Write> {
    // get output as a BufWriter - equal to stdout if None
    let writer = BufWriter::new(match output {
        Some(ref x) => {
            let file = File::create(Path::new(x))?;
            Box::new(file) as Box<dyn Write + Send>
        }
        None => Box::new(stdout()) as Box<dyn Write + Send>,
    });
    Ok(writer)
}

fn try_main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_target(false)
        .init();

    let cli = Cli::parse();

    info!("proteoscan v{}", cli::VERSION);

    match &cli.command {
        Commands::Fetch {
            taxon,
            protein,
            partial,
            pick,
            max_results,
            output,
            bin_dir,
        } => {
            let request = search::FetchRequest {
                taxon: taxon.clone(),
                protein: protein.clone(),
                partial: *partial,
                pick: *pick,
                max_results: *max_results,
                output: output.as_ref().map(Into::into),
            };

            search::fetch(&ToolConfig::new(bin_dir.clone()), &request)?;
            info!("Completed successfully.")
        }
        Commands::Lengths { fasta } => {
            let records = read_fasta_file(Path::new(fasta))?;
            match LengthSummary::from_records(&records) {
                Some(lengths) => println!("{lengths}"),
                None => bail!("no FASTA records found in {fasta}"),
            }
        }
        Commands::Filter { fasta, len, output } => {
            let records = read_fasta_file(Path::new(fasta))?;
            let retained = filter::retain_by_length(records, &FilterOpts { len: *len });

            let mut writer = get_writer(output)?;
            for record in &retained {
                record.write_fasta(&mut writer)?;
            }
            writer.flush()?;
        }
        Commands::Split { fasta, outdir } => {
            let records = read_fasta_file(Path::new(fasta))?;
            let (records, _) = pipeline::prepare_batch(records);
            let paths = split_into_dir(outdir, &records)?;
            info!("Wrote {} files to {}", paths.len(), outdir.display());
        }
        Commands::Collect {
            kind,
            fasta,
            reports,
            extension,
            output,
            summary: summary_path,
            warnings: warnings_path,
            layout,
        } => {
            let start = Instant::now();
            let tabulated = pipeline::collect_reports(
                *kind,
                Path::new(fasta),
                reports,
                extension.as_deref(),
            )?;

            match output {
                Some(path) => export::export_to_path(&tabulated.table, Path::new(path))?,
                None => export::write_table(&tabulated.table, get_writer(output)?, b',')?,
            }

            if let Some(path) = warnings_path {
                let rows = tabulated
                    .warnings
                    .iter()
                    .map(RunWarning::to_row)
                    .collect::<Vec<_>>();
                export::export_warnings(&rows, path)?;
            }

            if let Some(path) = summary_path {
                let mut metadata = file::RunMetadata::new(Path::new(fasta));
                metadata.record_count = tabulated.table.rows.len();
                metadata.retained_count = tabulated.table.rows.len();
                metadata.warning_count = tabulated.warnings.len();
                metadata.elapsed = start.elapsed().as_secs_f64();

                let charts = match kind {
                    report::ReportKind::Motifs => summary::motif_charts(&tabulated.table, *layout),
                    report::ReportKind::Stats => summary::stats_charts(
                        &tabulated.table,
                        summary::DEFAULT_STATS_COLUMNS,
                        *layout,
                    ),
                };
                let title = format!("Collected {} reports", kind.label());
                summary::write_summary(path, &title, &metadata, &tabulated.table, &charts)?;
            }

            info!("Completed with {} warning(s)", tabulated.warnings.len())
        }
        Commands::Run {
            fasta,
            outdir,
            stem,
            len,
            threads,
            prune,
            skip_conservation,
            layout,
            strict,
            bin_dir,
        } => {
            let ctx = RunContext {
                input: fasta.clone(),
                outdir: outdir.clone(),
                stem: stem
                    .clone()
                    .unwrap_or_else(|| RunContext::default_stem(fasta)),
                threads: *threads,
                filter: FilterOpts { len: *len },
                prune: *prune,
                conservation: !*skip_conservation,
                tools: ToolConfig::new(bin_dir.clone()),
                layout: *layout,
                strict: *strict,
            };

            pipeline::run(&ctx)?;
            info!("Completed successfully.")
        }
    };
    Ok(())
}

fn main() {
    if let Err(err) = try_main() {
        error!("{}", err);

        // report any errors that are produced
        err.chain()
            .skip(1)
            .for_each(|cause| error!("  because: {}", cause));

        std::process::exit(1);
    }
}

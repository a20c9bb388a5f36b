#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use shiftplot::{
    AnalysisConfig, Analyzer, CsvDirectorySource, DataTypeClass, Workspace,
    write_annotated_csv_string,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "shiftplot-cli", version, about = "Formula evaluation and shift detection over engine-test telemetry")]
struct Cli {
    /// JSON configuration file; missing sections use defaults.
    #[arg(long, env = "SHIFTPLOT_CONFIG")]
    config: Option<PathBuf>,

    /// Session working directory (overrides the configuration).
    #[arg(long, env = "SHIFTPLOT_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Root of the `<engine>/<build>/<CLASS>.csv` telemetry tree.
    #[arg(long, env = "SHIFTPLOT_DATA_ROOT", default_value = "data")]
    data_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Annotate every class the session's plots draw.
    Analyze {
        /// Restrict to one class (RAW, PDR, SOURCE, PROFILE).
        #[arg(long)]
        class: Option<DataTypeClass>,
        /// Write `<CLASS>_annotated.csv` files here.
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Validate a formula file and make it the session's formula set.
    CommitFormulas { file: PathBuf },
    /// Bundle the session into a zip archive.
    ExportArchive { dest: PathBuf },
    /// Replace the session with an archive's contents, keeping local comments.
    ImportArchive { src: PathBuf },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(dir) = cli.workspace {
        config.workspace.dir = dir;
    }

    let source = CsvDirectorySource::new(&cli.data_root);
    match cli.command {
        Command::Analyze { class, out_dir } => {
            analyze(Analyzer::open(source, config)?, class, out_dir.as_deref())
        }
        Command::CommitFormulas { file } => {
            let mut analyzer = Analyzer::open(source, config)?;
            let text = fs::read_to_string(&file)?;
            analyzer.commit_formulas(&text)?;
            println!("committed formulas={}", analyzer.formulas().len());
            Ok(())
        }
        Command::ExportArchive { dest } => {
            Analyzer::open(source, config)?.export_archive(&dest)?;
            println!("exported {}", dest.display());
            Ok(())
        }
        Command::ImportArchive { src } => {
            // Unpacked before the analyzer loads the session it replaces.
            Workspace::new(config.workspace.clone()).import_archive(&src)?;
            let mut analyzer = Analyzer::open(source, config)?;
            analyzer.invalidate();
            let metadata = analyzer.metadata();
            println!(
                "imported engine={} build={} records={} plots={}",
                metadata.engine_number(),
                metadata.build_number(),
                metadata.records().len(),
                analyzer.plots().len()
            );
            Ok(())
        }
    }
}

fn analyze(
    mut analyzer: Analyzer<CsvDirectorySource>,
    class: Option<DataTypeClass>,
    out_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let results: BTreeMap<_, _> = match class {
        Some(class) => [(class, analyzer.annotated(class))].into_iter().collect(),
        None => analyzer.refresh(),
    };
    if let Some(dir) = out_dir {
        fs::create_dir_all(dir)?;
    }
    let mut failed = 0_usize;
    for (class, result) in results {
        match result {
            Ok(annotated) => {
                println!(
                    "class={class} rows={} pairs={} shifts={}",
                    annotated.table.len(),
                    annotated.annotations.len(),
                    annotated.shift_count()
                );
                if let Some(dir) = out_dir {
                    let path = dir.join(format!("{}_annotated.csv", class.as_str()));
                    fs::write(&path, write_annotated_csv_string(&annotated)?)?;
                    println!("wrote {}", path.display());
                }
            }
            Err(err) => {
                failed += 1;
                println!("class={class} error={err}");
            }
        }
    }
    let stats = analyzer.cache_stats();
    println!(
        "cache hits={} store_hits={} recomputes={} corruptions={}",
        stats.hits, stats.store_hits, stats.recomputes, stats.corruptions
    );
    if failed > 0 {
        return Err(format!("{failed} class(es) failed").into());
    }
    Ok(())
}

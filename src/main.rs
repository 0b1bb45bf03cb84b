use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use log::{info, warn};

use trailmatch::io::{read_checklist_file, read_raw_input_file, write_trails_json};
use trailmatch::report::{write_csv_report, write_text_report};
use trailmatch::{
    Config, MapStore, Reconciliation, TrackProcessor, TrackResult, merge, trails_from_results,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Match GPS tracks against OpenStreetMap trails", long_about = None)]
struct Cli {
    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Hide progress bars
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse an OSM extract and write its binary cache
    OsmExport(ExtractArgs),
    /// Match a directory of GPX tracks and print a report
    ParseGpx(ParseGpxArgs),
    /// Match tracks and merge the completed trails into the trail list
    Full(FullArgs),
}

#[derive(Parser, Debug)]
struct ExtractArgs {
    /// OSM XML extract for the region
    #[arg(short = 'r', long, env = "OSM_REGION_FILE")]
    osm_region_file: PathBuf,
}

#[derive(Parser, Debug)]
struct TrackArgs {
    #[command(flatten)]
    extract: ExtractArgs,

    /// Directory of GPX files, or a single GPX file
    #[arg(short, long, env = "TRACK_FILES")]
    track_files: PathBuf,

    /// Only look at the top level of the track directory
    #[arg(long)]
    no_recursive: bool,

    /// Re-parse the extract even if the cache is fresh
    #[arg(long)]
    force_reload: bool,

    /// Worker threads (0 = one per CPU)
    #[arg(long, default_value_t = 0)]
    workers: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportFormat {
    Text,
    Csv,
}

#[derive(Parser, Debug)]
struct ParseGpxArgs {
    #[command(flatten)]
    tracks: TrackArgs,

    #[arg(short, long, value_enum, default_value_t = ReportFormat::Text)]
    format: ReportFormat,
}

#[derive(Parser, Debug)]
struct FullArgs {
    #[command(flatten)]
    tracks: TrackArgs,

    /// Trail master list (three lines per trail)
    #[arg(short, long, env = "INPUT_FILE")]
    input_file: Option<PathBuf>,

    /// Existing Markdown checklist, used when no input file is given
    #[arg(short, long, env = "CHECKLIST_FILE")]
    checklist_file: Option<PathBuf>,

    /// Write the merged trail list here as JSON instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::builder()
        .filter_level(if cli.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .format_target(false)
        .format_timestamp(None)
        .target(env_logger::Target::Stderr)
        .init();

    let show_progress = !cli.quiet;
    match cli.command {
        Command::OsmExport(args) => {
            let config = Config::default()
                .with_extract_path(&args.osm_region_file)
                .with_progress(show_progress);
            let store = MapStore::new(&config);
            let index = store.export(&config.extract_path)?;
            info!(
                "Exported {} nodes and {} ways to {}",
                index.node_count(),
                index.way_count(),
                store.cache_path(&config.extract_path).display()
            );
        }
        Command::ParseGpx(args) => {
            let results = match_tracks(&args.tracks, show_progress)?;
            let stdout = io::stdout().lock();
            match args.format {
                ReportFormat::Text => write_text_report(&results, stdout)?,
                ReportFormat::Csv => write_csv_report(&results, stdout)?,
            }
        }
        Command::Full(args) => run_full(args, show_progress)?,
    }

    Ok(())
}

fn track_config(args: &TrackArgs, show_progress: bool) -> Config {
    Config::default()
        .with_extract_path(&args.extract.osm_region_file)
        .with_force_reload(args.force_reload)
        .with_recursive(!args.no_recursive)
        .with_workers(args.workers)
        .with_progress(show_progress)
}

fn match_tracks(args: &TrackArgs, show_progress: bool) -> Result<Vec<TrackResult>> {
    let config = track_config(args, show_progress);
    let index = MapStore::new(&config)
        .load(&config.extract_path, config.force_reload)
        .context("error loading OSM region file")?;

    let processor = TrackProcessor::new(&index, &config);
    let cancel = AtomicBool::new(false);
    processor
        .process_target(&args.track_files, &cancel)
        .context("error processing track files")
}

fn run_full(args: FullArgs, show_progress: bool) -> Result<()> {
    let results = match_tracks(&args.tracks, show_progress)?;
    let completed = trails_from_results(&results);
    info!(
        "{} completed trails from {} tracks",
        completed.len(),
        results.len()
    );

    let raw = match (&args.input_file, &args.checklist_file) {
        (Some(input), _) => read_raw_input_file(input)?,
        (None, Some(checklist)) => read_checklist_file(checklist)?,
        (None, None) => bail!("either --input-file or --checklist-file is required"),
    };

    let trails = match merge(&completed, raw) {
        Reconciliation::Merged(trails) => trails,
        Reconciliation::NoCompletedTrails(trails) => {
            warn!("No completed trails found, returning the trail list unchanged");
            trails
        }
    };

    match &args.output {
        Some(path) => write_json_file(&trails, path)?,
        None => write_trails_json(&trails, io::stdout().lock())?,
    }
    Ok(())
}

fn write_json_file(trails: &[trailmatch::Trail], path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    write_trails_json(trails, BufWriter::new(file))?;
    info!("Wrote {} trails to {}", trails.len(), path.display());
    Ok(())
}

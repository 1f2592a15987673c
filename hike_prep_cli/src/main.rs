use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, ensure, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use hike_prep::split::{write_file_list, DEFAULT_TRAIN_FRACTION};
use hike_prep::{
    extract_segment_features, parse_gpx_file, segments_from_tracks, split_train_test,
    standard_walking_time_s, FeatureTable, PrepConfig, SegmentStats, SmoothingStage, Track,
};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(author, version, about = "Hiking track feature preparation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split GPX files into train/test sets and write their feature tables
    Prepare(PrepareArgs),
    /// Compute feature records for a single GPX file
    Features(FeaturesArgs),
}

#[derive(Parser, Debug)]
struct PrepareArgs {
    /// Folder searched recursively for GPX tracks
    #[arg(value_hint = ValueHint::DirPath)]
    base_folder: PathBuf,

    /// Substring every selected path must contain (for example "Hiking")
    filter_key: String,

    /// Directory receiving file lists and feature tables
    #[arg(short, long, default_value = ".", value_hint = ValueHint::DirPath)]
    output_dir: PathBuf,

    /// Fraction of files assigned to the training set
    #[arg(long, default_value_t = DEFAULT_TRAIN_FRACTION)]
    train_fraction: f64,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Parser, Debug)]
struct FeaturesArgs {
    /// GPX file to process
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Optional JSON path for the feature table
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// JSON configuration file; flags below override its values
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Maximum number of points in a path feature
    #[arg(long)]
    num_points_path: Option<usize>,

    /// Minimum spacing between kept points (meters)
    #[arg(long)]
    min_distance: Option<f64>,

    /// Length above which segments are split (meters)
    #[arg(long)]
    max_length: Option<f64>,

    /// Elevation gain/loss above which a segment is discarded (meters)
    #[arg(long)]
    max_elevation_diff: Option<f64>,

    /// Keep segments with implausible elevation change
    #[arg(long, action = ArgAction::SetTrue)]
    no_bad_segment_filter: bool,

    /// Pipeline stage for coordinate smoothing
    #[arg(long, value_enum)]
    smoothing: Option<SmoothingOpt>,

    /// Moving-average window for smoothing (odd)
    #[arg(long)]
    smoothing_window: Option<usize>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum SmoothingOpt {
    Off,
    BeforeFilter,
    AfterSplit,
}

impl From<SmoothingOpt> for SmoothingStage {
    fn from(value: SmoothingOpt) -> Self {
        match value {
            SmoothingOpt::Off => SmoothingStage::Disabled,
            SmoothingOpt::BeforeFilter => SmoothingStage::BeforeFilter,
            SmoothingOpt::AfterSplit => SmoothingStage::AfterSplit,
        }
    }
}

impl PipelineArgs {
    fn load_config(&self) -> Result<PrepConfig> {
        let base = match self.config.as_ref() {
            Some(path) => PrepConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => PrepConfig::default(),
        };
        let config = self.apply(base);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, mut config: PrepConfig) -> PrepConfig {
        if let Some(n) = self.num_points_path {
            config.num_points_path = n;
        }
        if let Some(d) = self.min_distance {
            config.min_distance_m = d;
        }
        if let Some(l) = self.max_length {
            config.max_length_m = l;
        }
        if let Some(e) = self.max_elevation_diff {
            config.max_elevation_diff_m = e;
        }
        if self.no_bad_segment_filter {
            config.filter_bad_segments = false;
        }
        if let Some(stage) = self.smoothing {
            config.smoothing = stage.into();
        }
        if let Some(window) = self.smoothing_window {
            config.smoothing_window = window;
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Prepare(args) => args.pipeline.verbose,
        Command::Features(args) => args.pipeline.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Prepare(args) => handle_prepare(args),
        Command::Features(args) => handle_features(args),
    }
}

fn handle_prepare(args: PrepareArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.train_fraction) {
        return Err(anyhow!(
            "--train-fraction must lie in [0, 1], got {}",
            args.train_fraction
        ));
    }
    let config = args.pipeline.load_config()?;

    info!(
        "Recursively searching for GPX files in '{}' containing '{}'",
        args.base_folder.display(),
        args.filter_key
    );
    let files = find_gpx_files(&args.base_folder, &args.filter_key)?;
    if files.is_empty() {
        warn!("No matching GPX files found");
    }

    let split = split_train_test(&files, args.train_fraction);
    let train: HashSet<&String> = split.train.iter().collect();
    ensure!(
        split.test.iter().all(|f| !train.contains(f)),
        "train and test file lists overlap"
    );

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;
    for (name, list) in [
        ("train_file_list.txt", &split.train),
        ("test_file_list.txt", &split.test),
    ] {
        let path = args.output_dir.join(name);
        write_file_list(&path, list)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote {} entries to {}", list.len(), path.display());
    }

    for (name, list) in [
        ("hiking_data_training.json", &split.train),
        ("hiking_data_test.json", &split.test),
    ] {
        let t_extract = Instant::now();
        let records = extract_file_features(list, &config)?;
        debug!(
            "Extract stage: {:.1} ms ({} records)",
            t_extract.elapsed().as_secs_f64() * 1000.0,
            records.len()
        );
        let path = args.output_dir.join(name);
        write_table(&records, &config, &path)?;
    }

    info!("Finished writing statistics about tracks");
    Ok(())
}

fn handle_features(args: FeaturesArgs) -> Result<()> {
    let config = args.pipeline.load_config()?;
    let tracks = parse_gpx_file(&args.input)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    if let Some(track) = tracks.first() {
        let elevation = track.uphill_downhill();
        let estimate_s =
            standard_walking_time_s(track.length_2d(), elevation.uphill, elevation.downhill);
        info!(
            "Track '{}': {:.0} m, +{:.0} m / -{:.0} m, standard estimate {:.2} h",
            track.name.as_deref().unwrap_or("NotAvailable"),
            track.length_2d(),
            elevation.uphill,
            elevation.downhill,
            estimate_s / 3600.0
        );
    } else {
        warn!("{} contains no tracks", args.input.display());
    }

    let records = extract_segment_features(segments_from_tracks(tracks), &config)?;
    let moving: f64 = records.iter().map(|r| r.moving_time).sum();
    info!(
        "Extracted {} feature records ({:.2} h recorded moving time)",
        records.len(),
        moving / 3600.0
    );

    if let Some(path) = args.output.as_ref() {
        write_table(&records, &config, path)?;
    }
    Ok(())
}

fn is_selected(path: &str, key: &str) -> bool {
    path.ends_with(".gpx") && path.contains(key)
}

fn find_gpx_files(folder: &Path, key: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(folder) {
        let entry = entry.with_context(|| format!("failed to walk {}", folder.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_string_lossy().into_owned();
        if is_selected(&path, key) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse every file, skipping the ones that fail. Returns the tracks and the
/// number of skipped files.
fn load_tracks(files: &[String]) -> (Vec<Track>, usize) {
    let mut tracks = Vec::new();
    let mut skipped = 0;
    for file in files {
        match parse_gpx_file(Path::new(file)) {
            Ok(parsed) => tracks.extend(parsed),
            Err(err) => {
                warn!("Skipping {}: {}", file, err);
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!("Skipped {} of {} files that failed to parse", skipped, files.len());
    }
    (tracks, skipped)
}

fn extract_file_features(files: &[String], config: &PrepConfig) -> Result<Vec<SegmentStats>> {
    let (tracks, _) = load_tracks(files);
    Ok(extract_segment_features(segments_from_tracks(tracks), config)?)
}

fn write_table(records: &[SegmentStats], config: &PrepConfig, path: &Path) -> Result<()> {
    let table = FeatureTable::from_stats(records, config.num_points_path)?;
    table
        .write_json(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Wrote {} records to {}", table.len(), path.display());
    Ok(())
}

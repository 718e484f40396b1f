use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use serde_json::json;
use tcx_runs::{
    parse_file_with, render_comparison_plots, GeoPoint, ImageFormat, LocatorParams, Metric,
    ParseOptions, PlotOptions, TabularArray, TagMode, TrainingCenter, TCX_NAMESPACE,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Training Center XML run comparison CLI", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Verbose logging
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    /// How TCX tag names are matched
    #[arg(long, global = true, value_enum, default_value_t = TagModeOpt::Auto)]
    tag_mode: TagModeOpt,

    /// Namespace URI of TCX elements
    #[arg(long, global = true, default_value = TCX_NAMESPACE)]
    namespace: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Flatten every trackpoint of a TCX file into a CSV table
    Parse(ParseArgs),
    /// List activities whose first lap starts near a coordinate
    Locate(LocateArgs),
    /// Compare runs sharing a start and end point and plot them
    Compare(CompareArgs),
}

#[derive(Args, Debug)]
struct ParseArgs {
    /// TCX file to parse
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Master TCX file holding all activities
    #[arg(long, default_value = "All Training Center Data.tcx", value_hint = ValueHint::FilePath)]
    master: PathBuf,

    /// Squared-degree tolerance for coordinate matches
    #[arg(long, default_value_t = 1e-5)]
    tolerance: f64,

    /// Distance metric for coordinate matches
    #[arg(long, value_enum, default_value_t = MetricOpt::SquaredDegrees)]
    metric: MetricOpt,
}

#[derive(Args, Debug)]
struct LocateArgs {
    #[command(flatten)]
    search: SearchArgs,

    /// Target start latitude
    #[arg(long, default_value_t = 40.020631, allow_hyphen_values = true)]
    lat: f64,

    /// Target start longitude
    #[arg(long, default_value_t = -105.296255, allow_hyphen_values = true)]
    lon: f64,

    /// Print matches as JSON
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Args, Debug)]
struct CompareArgs {
    #[command(flatten)]
    search: SearchArgs,

    #[arg(long, default_value_t = 40.020631, allow_hyphen_values = true)]
    start_lat: f64,

    #[arg(long, default_value_t = -105.296255, allow_hyphen_values = true)]
    start_lon: f64,

    #[arg(long, default_value_t = 40.034425, allow_hyphen_values = true)]
    end_lat: f64,

    #[arg(long, default_value_t = -105.305303, allow_hyphen_values = true)]
    end_lon: f64,

    /// Base path for the four figures (`<stem>_<figure>.<ext>`)
    #[arg(long, default_value = "runs.png", value_hint = ValueHint::FilePath)]
    plot: PathBuf,

    /// Image format of the figures
    #[arg(long, value_enum, default_value_t = FormatOpt::Png)]
    format: FormatOpt,

    /// Also write one CSV per run into this directory
    #[arg(long, value_hint = ValueHint::DirPath)]
    csv_dir: Option<PathBuf>,

    /// Skip plotting
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum TagModeOpt {
    Auto,
    Qualified,
    Substring,
}

impl From<TagModeOpt> for TagMode {
    fn from(value: TagModeOpt) -> Self {
        match value {
            TagModeOpt::Auto => TagMode::Auto,
            TagModeOpt::Qualified => TagMode::Qualified,
            TagModeOpt::Substring => TagMode::Substring,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum MetricOpt {
    SquaredDegrees,
    /// Scale longitude by cos(latitude); changes which runs match
    ScaledDegrees,
}

impl From<MetricOpt> for Metric {
    fn from(value: MetricOpt) -> Self {
        match value {
            MetricOpt::SquaredDegrees => Metric::SquaredDegrees,
            MetricOpt::ScaledDegrees => Metric::ScaledDegrees,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FormatOpt {
    Png,
    Svg,
}

impl From<FormatOpt> for ImageFormat {
    fn from(value: FormatOpt) -> Self {
        match value {
            FormatOpt::Png => ImageFormat::Png,
            FormatOpt::Svg => ImageFormat::Svg,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.global.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let parse_opts = ParseOptions {
        namespace: cli.global.namespace.clone(),
        tag_mode: cli.global.tag_mode.into(),
    };

    match cli.command {
        Command::Parse(args) => handle_parse(args, parse_opts),
        Command::Locate(args) => handle_locate(args, parse_opts),
        Command::Compare(args) => handle_compare(args, parse_opts),
    }
}

fn locator_params(search: &SearchArgs, parse: ParseOptions) -> LocatorParams {
    LocatorParams {
        master_file: search.master.clone(),
        tolerance: search.tolerance,
        metric: search.metric.into(),
        parse,
        ..LocatorParams::default()
    }
}

fn open_master(params: &LocatorParams) -> Result<TrainingCenter> {
    if params.metric != Metric::SquaredDegrees {
        warn!("Using {:?} distances; matches differ from raw squared degrees", params.metric);
    }
    TrainingCenter::open(params)
        .with_context(|| format!("failed to load {}", params.master_file.display()))
}

fn handle_parse(args: ParseArgs, opts: ParseOptions) -> Result<()> {
    let array = parse_file_with(&args.input, &opts)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;
    if args.output.as_os_str() == "-" {
        write_csv_stdout(&array)?;
    } else {
        write_csv_file(&array, &args.output)?;
        info!("Wrote CSV: {}", args.output.display());
    }
    Ok(())
}

fn handle_locate(args: LocateArgs, opts: ParseOptions) -> Result<()> {
    let params = locator_params(&args.search, opts);
    let center = open_master(&params)?;
    let target = GeoPoint::new(args.lat, args.lon);
    let found = center.find_workouts_by_start(target, params.tolerance, params.metric)?;
    info!("{} activities start near ({}, {})", found.len(), args.lat, args.lon);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if args.json {
        let rows: Vec<_> = found
            .iter()
            .map(|run| {
                json!({
                    "start_time": run.start_time,
                    "lat": run.start.lat,
                    "lon": run.start.lon,
                    "distance": run.distance,
                    "laps": run.activity.lap_start_times(),
                })
            })
            .collect();
        serde_json::to_writer_pretty(&mut out, &rows)?;
        writeln!(out)?;
    } else {
        for run in &found {
            writeln!(
                out,
                "{}\t{:.6}\t{:.6}\t{:.3e}",
                run.start_time, run.start.lat, run.start.lon, run.distance
            )?;
        }
    }
    Ok(())
}

fn handle_compare(args: CompareArgs, opts: ParseOptions) -> Result<()> {
    let params = LocatorParams {
        start: GeoPoint::new(args.start_lat, args.start_lon),
        end: GeoPoint::new(args.end_lat, args.end_lon),
        ..locator_params(&args.search, opts)
    };
    let center = open_master(&params)?;
    let runs = center.location_arrays(&params)?;
    if runs.is_empty() {
        return Err(anyhow!(
            "no runs start near ({}, {}) and end near ({}, {})",
            args.start_lat,
            args.start_lon,
            args.end_lat,
            args.end_lon
        ));
    }
    for (key, run) in &runs {
        info!("Run {}: {} samples", key, run.len());
    }

    if let Some(dir) = args.csv_dir.as_ref() {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        for (key, run) in &runs {
            let path = dir.join(format!("{}.csv", key.replace(':', "-")));
            write_csv_file(run, &path)?;
        }
        info!("Wrote {} CSV files to {}", runs.len(), dir.display());
    }

    if !args.no_plot {
        let plot_opts = PlotOptions {
            output: args.plot.clone(),
            format: args.format.into(),
            ..PlotOptions::default()
        };
        if let Err(err) = render_plots_guard(&runs, &plot_opts) {
            warn!("Skipping plots ({}): {}", args.plot.display(), err);
        }
    }
    Ok(())
}

fn render_plots_guard(
    runs: &std::collections::BTreeMap<String, TabularArray>,
    opts: &PlotOptions,
) -> Result<Vec<PathBuf>, String> {
    let render = || render_comparison_plots(runs, opts).map_err(|e| e.to_string());
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn write_csv_stdout(array: &TabularArray) -> Result<()> {
    let stdout = io::stdout();
    array.write_csv(stdout.lock())?;
    Ok(())
}

fn write_csv_file(array: &TabularArray, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    array
        .write_csv(file)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

use std::path::PathBuf;

use anyhow::Context;
use structopt::StructOpt;

use parse_radiometer::{CorrectionConfig, CorrectionMode, TelemetryLoader, TimeSource};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "parse-radiometer",
    about = "Parsing flux radiometer telemetry"
)]
struct Opt {
    /// Telemetry files, in chronological order
    #[structopt(parse(from_os_str))]
    files: Vec<PathBuf>,
    /// Glob pattern expanded (sorted) into the file list
    #[structopt(short, long)]
    pattern: Option<String>,
    /// Timestamp source: "nav" or "ins"
    #[structopt(short, long, default_value = "nav")]
    time_source: TimeSource,
    /// Time offset [s] applied to the shifted time series
    #[structopt(long, default_value = "0")]
    time_offset: f64,
    /// Dark correction mode: "interpolate" or "mean"
    #[structopt(short, long, default_value = "interpolate")]
    mode: CorrectionMode,
    /// Samples trimmed off the outer edge of each bracketing dark cycle
    #[structopt(long, default_value = "2")]
    dark_extend: usize,
    /// Samples trimmed off both edges of each light cycle
    #[structopt(long, default_value = "2")]
    light_extend: usize,
    /// Minimum surviving samples per dark flank
    #[structopt(long, default_value = "5")]
    dark_threshold: usize,
    /// Minimum surviving samples per trimmed light cycle
    #[structopt(long, default_value = "10")]
    light_threshold: usize,
    /// Sentinel stored where no valid correction exists
    #[structopt(long, default_value = "-99999", allow_hyphen_values = true)]
    fill_value: f64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let mut files = opt.files;
    if let Some(pattern) = &opt.pattern {
        let mut globbed: Vec<PathBuf> = glob::glob(pattern)?.collect::<Result<_, _>>()?;
        globbed.sort();
        files.extend(globbed);
    }

    let telemetry = TelemetryLoader::default()
        .time_source(opt.time_source)
        .time_offset(opt.time_offset)
        .load(&files)
        .context("loading the telemetry files")?;
    let good = telemetry.quality.iter().filter(|quality| **quality).count();
    println!(
        "{} records from {} files ({} good)",
        telemetry.len(),
        telemetry.comments.len(),
        good
    );
    for comment in telemetry.comments.iter().flatten() {
        println!("  comment: {}", comment);
    }

    let config = CorrectionConfig {
        mode: opt.mode,
        dark_extend: opt.dark_extend,
        light_extend: opt.light_extend,
        dark_threshold: opt.dark_threshold,
        light_threshold: opt.light_threshold,
        fill_value: opt.fill_value,
    };
    let correction = telemetry
        .dark_correction(&config)
        .context("applying the dark correction")?;
    for group in &correction.groups {
        let valid = group
            .correction
            .valid
            .iter()
            .filter(|valid| **valid)
            .count();
        println!(
            "{} @ {:>4} ms: {:>6} records, {:>6} corrected",
            group.channel,
            group.integration_time,
            group.indices.len(),
            valid
        );
    }
    Ok(())
}

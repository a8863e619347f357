use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use taxi_dataset_rs::{
    pipeline, BlinkerPolicy, DatasetConfig, LabelStrategy, MotionLayout, VehicleScope,
};

#[derive(Parser, Debug)]
#[command(name = "taxi_dataset")]
#[command(about = "Build a labeled boarding/alighting dataset from taxi telemetry captures", long_about = None)]
struct Args {
    /// JSON config file; flags given on the command line override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of capture files (*.json, *.json.gz)
    #[arg(long)]
    json_dir: Option<PathBuf>,

    /// Status-change log CSV (required)
    #[arg(long)]
    change_flag_path: Option<PathBuf>,

    /// Output path prefix, e.g. outputs/taxi_dataset
    #[arg(long)]
    output_prefix: Option<PathBuf>,

    /// Speed below which a row is a stop candidate (km/h)
    #[arg(long)]
    stop_speed_threshold: Option<f64>,

    /// Minimum first-to-last duration of a stop (seconds)
    #[arg(long)]
    min_stop_duration: Option<f64>,

    /// Gap between consecutive rows that force-closes a stop (seconds)
    #[arg(long)]
    max_gap: Option<f64>,

    /// Fraction of each vehicle's rows assigned to train
    #[arg(long)]
    train_ratio: Option<f64>,

    /// Process at most this many capture files
    #[arg(long)]
    max_files: Option<usize>,

    #[arg(long, value_enum)]
    blinker_policy: Option<BlinkerPolicy>,

    #[arg(long, value_enum)]
    label_strategy: Option<LabelStrategy>,

    #[arg(long, value_enum)]
    vehicle_scope: Option<VehicleScope>,

    #[arg(long, value_enum)]
    motion_layout: Option<MotionLayout>,
}

impl Args {
    fn into_config(self) -> Result<DatasetConfig> {
        let mut config = match &self.config {
            Some(path) => DatasetConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => DatasetConfig::default(),
        };

        if let Some(v) = self.json_dir {
            config.json_dir = v;
        }
        if let Some(v) = self.change_flag_path {
            config.change_flag_path = Some(v);
        }
        if let Some(v) = self.output_prefix {
            config.output_prefix = v;
        }
        if let Some(v) = self.stop_speed_threshold {
            config.stop_speed_threshold = v;
        }
        if let Some(v) = self.min_stop_duration {
            config.min_stop_duration_secs = v;
        }
        if let Some(v) = self.max_gap {
            config.max_gap_secs = v;
        }
        if let Some(v) = self.train_ratio {
            config.train_ratio = v;
        }
        if self.max_files.is_some() {
            config.max_files = self.max_files;
        }
        if let Some(v) = self.blinker_policy {
            config.blinker_policy = v;
        }
        if let Some(v) = self.label_strategy {
            config.label_strategy = v;
        }
        if let Some(v) = self.vehicle_scope {
            config.vehicle_scope = v;
        }
        if let Some(v) = self.motion_layout {
            config.motion_layout = v;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    log::info!("  JSON dir: {}", config.json_dir.display());
    log::info!("  Output prefix: {}", config.output_prefix.display());
    log::info!(
        "  Stop rule: speed < {} for >= {}s, gap > {}s splits",
        config.stop_speed_threshold,
        config.min_stop_duration_secs,
        config.max_gap_secs
    );

    let output = match pipeline::run(&config) {
        Ok(output) => output,
        Err(e) => {
            let context = if e.is_fatal() {
                "aborted before writing any output"
            } else {
                "dataset build failed"
            };
            return Err(anyhow::Error::new(e).context(context));
        }
    };
    let summary = &output.summary;

    log::info!(
        "[stops] {} stopped rows of {} ({:.1}%) in {} segments",
        summary.stopped_rows,
        summary.base_rows,
        summary.stopped_pct,
        summary.stop_segments
    );
    for (label, count) in &summary.label_distribution {
        log::info!("[labels] {:>9}: {}", label, count);
    }
    if !summary.files_failed.is_empty() {
        log::warn!("{} file(s) failed:", summary.files_failed.len());
        for failure in &summary.files_failed {
            log::warn!("  {}: {}", failure.path.display(), failure.reason);
        }
    }
    log::info!(
        "[split] train={} test={}; summary written to {}",
        summary.train_rows,
        summary.test_rows,
        output.summary_path.display()
    );
    Ok(())
}

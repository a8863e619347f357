use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{DatasetError, Result};

/// How a per-instant turn-signal flag array collapses into one boolean.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum BlinkerPolicy {
    /// On if any entry is nonzero.
    #[default]
    Any,
    /// On if more than half the entries are nonzero.
    Majority,
}

impl BlinkerPolicy {
    pub fn reduce(self, flags: &[f64]) -> bool {
        match self {
            BlinkerPolicy::Any => flags.iter().any(|f| *f != 0.0),
            BlinkerPolicy::Majority => {
                let on = flags.iter().filter(|f| **f != 0.0).count();
                on * 2 > flags.len()
            }
        }
    }
}

/// Where raw boarding/alighting events end up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LabelStrategy {
    /// Label the whole nearest stop segment.
    #[default]
    Segment,
    /// Label only the row carrying the event.
    Instant,
}

/// Whether the timeline is split per vehicle or treated as one global sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum VehicleScope {
    #[default]
    PerVehicle,
    /// Ignores vehicle identity: one timeline, timestamp-only status join.
    Global,
}

/// Which high-rate outputs to emit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum MotionLayout {
    /// One row per 100 Hz sub-sample.
    #[default]
    Raw,
    /// Per-sample axis statistics.
    Summary,
    Both,
}

impl MotionLayout {
    pub fn wants_raw(self) -> bool {
        matches!(self, MotionLayout::Raw | MotionLayout::Both)
    }

    pub fn wants_summary(self) -> bool {
        matches!(self, MotionLayout::Summary | MotionLayout::Both)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub json_dir: PathBuf,
    /// Status log; required, no default.
    pub change_flag_path: Option<PathBuf>,
    pub output_prefix: PathBuf,
    /// Same unit as input speed (km/h in the field data).
    pub stop_speed_threshold: f64,
    pub min_stop_duration_secs: f64,
    pub max_gap_secs: f64,
    pub train_ratio: f64,
    pub max_files: Option<usize>,
    pub blinker_policy: BlinkerPolicy,
    pub label_strategy: LabelStrategy,
    pub vehicle_scope: VehicleScope,
    pub motion_layout: MotionLayout,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        DatasetConfig {
            json_dir: PathBuf::from("./json"),
            change_flag_path: None,
            output_prefix: PathBuf::from("./outputs/taxi_dataset"),
            stop_speed_threshold: 10.0,
            min_stop_duration_secs: 10.0,
            max_gap_secs: 60.0,
            train_ratio: 0.8,
            max_files: None,
            blinker_policy: BlinkerPolicy::Any,
            label_strategy: LabelStrategy::Segment,
            vehicle_scope: VehicleScope::PerVehicle,
            motion_layout: MotionLayout::Raw,
        }
    }
}

impl DatasetConfig {
    /// Load a config from JSON; absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| DatasetError::io(path, e))?;
        let config: DatasetConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return Err(DatasetError::InvalidConfig(format!(
                "train_ratio must be in (0, 1), got {}",
                self.train_ratio
            )));
        }
        let positive = [
            ("stop_speed_threshold", self.stop_speed_threshold),
            ("min_stop_duration_secs", self.min_stop_duration_secs),
            ("max_gap_secs", self.max_gap_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(DatasetError::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.max_files == Some(0) {
            return Err(DatasetError::InvalidConfig(
                "max_files must be at least 1 when set".to_string(),
            ));
        }
        Ok(())
    }
}

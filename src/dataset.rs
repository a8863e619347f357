use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{MotionLayout, VehicleScope};
use crate::error::{DatasetError, Result};
use crate::timeline::Timeline;
use crate::types::{format_timestamp, AxisSummary, BaseRow, FeatureRow, Label, MotionRow};

const AXIS_NAMES: [&str; 6] = ["acc_x", "acc_y", "acc_z", "rad_x", "rad_y", "rad_z"];
const STAT_NAMES: [&str; 5] = ["mean", "max", "min", "std", "median"];

/// Emitted base-table row: only the measured fields plus the three derived columns.
#[derive(Debug, Serialize)]
struct BaseRecord<'a> {
    car_id: Option<&'a str>,
    timestamp: String,
    speed: f64,
    latitude: f64,
    longitude: f64,
    right_blinker: u8,
    left_blinker: u8,
    stop_segment: u32,
    is_stopped: u8,
    label: u8,
}

impl<'a> From<&'a BaseRow> for BaseRecord<'a> {
    fn from(row: &'a BaseRow) -> Self {
        BaseRecord {
            car_id: row.car_id.as_deref(),
            timestamp: format_timestamp(row.timestamp),
            speed: row.speed,
            latitude: row.latitude,
            longitude: row.longitude,
            right_blinker: row.right_blinker as u8,
            left_blinker: row.left_blinker as u8,
            stop_segment: row.stop_segment,
            is_stopped: row.is_stopped as u8,
            label: row.label.code(),
        }
    }
}

/// Chronological per-vehicle train/test partition of the base table.
#[derive(Clone, Debug, Default)]
pub struct Split {
    pub train: Vec<BaseRow>,
    pub test: Vec<BaseRow>,
}

/// Paths written by [`Dataset::write`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct OutputFiles {
    pub base: PathBuf,
    pub train: PathBuf,
    pub test: PathBuf,
    pub motion: Option<PathBuf>,
    pub features: Option<PathBuf>,
}

/// The finalized, labeled tables of one run.
#[derive(Clone, Debug, Default)]
pub struct Dataset {
    pub base: Vec<BaseRow>,
    pub motion: Vec<MotionRow>,
    pub features: Vec<FeatureRow>,
    pub scope: VehicleScope,
}

impl Dataset {
    pub fn finalize(mut timeline: Timeline) -> Self {
        timeline.sort();
        Dataset {
            base: timeline.base,
            motion: timeline.motion,
            features: timeline.features,
            scope: timeline.scope,
        }
    }

    /// First `floor(train_ratio * n)` rows of each vehicle go to train, the rest to test.
    ///
    /// Vehicles are grouped by id regardless of scope; order within a vehicle is kept.
    pub fn split(&self, train_ratio: f64) -> Split {
        let mut by_vehicle: BTreeMap<Option<&str>, Vec<&BaseRow>> = BTreeMap::new();
        for row in &self.base {
            by_vehicle.entry(row.car_id.as_deref()).or_default().push(row);
        }

        let mut split = Split::default();
        for rows in by_vehicle.values() {
            let cut = (train_ratio * rows.len() as f64).floor() as usize;
            let cut = cut.min(rows.len());
            split.train.extend(rows[..cut].iter().map(|r| (*r).clone()));
            split.test.extend(rows[cut..].iter().map(|r| (*r).clone()));
        }
        split
    }

    pub fn label_distribution(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for label in [Label::Normal, Label::Boarding, Label::Alighting] {
            counts.insert(label.name(), 0);
        }
        for row in &self.base {
            *counts.entry(row.label.name()).or_insert(0) += 1;
        }
        counts
    }

    pub fn stopped_rows(&self) -> usize {
        self.base.iter().filter(|r| r.is_stopped).count()
    }

    /// Write every table under `prefix` (e.g. `outputs/taxi_dataset` -> `outputs/taxi_dataset_base.csv`).
    pub fn write(&self, prefix: &Path, split: &Split, layout: MotionLayout) -> Result<OutputFiles> {
        if let Some(parent) = prefix.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| DatasetError::io(parent, e))?;
        }

        let mut files = OutputFiles {
            base: with_suffix(prefix, "_base.csv"),
            train: with_suffix(prefix, "_train.csv"),
            test: with_suffix(prefix, "_test.csv"),
            ..OutputFiles::default()
        };
        write_base(&files.base, &self.base)?;
        write_base(&files.train, &split.train)?;
        write_base(&files.test, &split.test)?;

        if layout.wants_raw() && !self.motion.is_empty() {
            let path = with_suffix(prefix, "_accel.csv");
            let mut wtr = csv::Writer::from_path(&path)?;
            for row in &self.motion {
                wtr.serialize(row)?;
            }
            wtr.flush().map_err(|e| DatasetError::io(&path, e))?;
            files.motion = Some(path);
        }
        if layout.wants_summary() && !self.features.is_empty() {
            let path = with_suffix(prefix, "_features.csv");
            write_features(&path, &self.features)?;
            files.features = Some(path);
        }

        log::info!(
            "[split] Wrote {} base rows ({} train / {} test) to {}",
            self.base.len(),
            split.train.len(),
            split.test.len(),
            files.base.display()
        );
        Ok(files)
    }
}

pub fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn write_base(path: &Path, rows: &[BaseRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    if rows.is_empty() {
        // serde only emits the header alongside the first record
        wtr.write_record([
            "car_id", "timestamp", "speed", "latitude", "longitude", "right_blinker",
            "left_blinker", "stop_segment", "is_stopped", "label",
        ])?;
    }
    for row in rows {
        wtr.serialize(BaseRecord::from(row))?;
    }
    wtr.flush().map_err(|e| DatasetError::io(path, e))?;
    Ok(())
}

fn write_features(path: &Path, rows: &[FeatureRow]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    let mut header = vec!["car_id".to_string(), "timestamp".to_string()];
    for axis in AXIS_NAMES {
        for stat in STAT_NAMES {
            header.push(format!("{}_{}", axis, stat));
        }
    }
    wtr.write_record(&header)?;

    for row in rows {
        let mut record = vec![
            row.car_id.clone().unwrap_or_default(),
            format_timestamp(row.timestamp),
        ];
        for summary in &row.axes {
            record.extend(summary_fields(summary.as_ref()));
        }
        wtr.write_record(&record)?;
    }
    wtr.flush().map_err(|e| DatasetError::io(path, e))?;
    Ok(())
}

fn summary_fields(summary: Option<&AxisSummary>) -> [String; 5] {
    match summary {
        Some(s) => [s.mean, s.max, s.min, s.std, s.median].map(|v| v.to_string()),
        None => Default::default(),
    }
}

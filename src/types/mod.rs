use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch (UTC).
pub type EpochMillis = i64;

/// Spacing between high-rate sub-samples inside one reporting instant (100 Hz).
pub const MOTION_SAMPLE_SPACING_MS: i64 = 10;

/// Number of motion axes carried per sample (accX/Y/Z, radX/Y/Z).
pub const MOTION_AXES: usize = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    #[default]
    Normal,
    Boarding,
    Alighting,
}

impl Label {
    pub fn code(self) -> u8 {
        match self {
            Label::Normal => 0,
            Label::Boarding => 1,
            Label::Alighting => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Label::Normal => "normal",
            Label::Boarding => "boarding",
            Label::Alighting => "alighting",
        }
    }
}

/// Discrete event derived from the status log or a status-code transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Boarding,
    Alighting,
}

impl From<EventKind> for Label {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Boarding => Label::Boarding,
            EventKind::Alighting => Label::Alighting,
        }
    }
}

/// One row per reported instant of a capture.
#[derive(Clone, Debug, PartialEq)]
pub struct BaseRow {
    pub car_id: Option<String>,
    pub timestamp: EpochMillis,
    pub speed: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub right_blinker: bool,
    pub left_blinker: bool,
    /// Status code reported inside the capture itself, if any.
    pub status_code: Option<u8>,
    /// 0 = not part of a qualifying stop.
    pub stop_segment: u32,
    pub is_stopped: bool,
    pub label: Label,
}

impl BaseRow {
    pub fn new(car_id: Option<String>, timestamp: EpochMillis, speed: f64) -> Self {
        BaseRow {
            car_id,
            timestamp,
            speed,
            latitude: 0.0,
            longitude: 0.0,
            right_blinker: false,
            left_blinker: false,
            status_code: None,
            stop_segment: 0,
            is_stopped: false,
            label: Label::Normal,
        }
    }
}

/// One row per high-rate sub-sample. `None` marks an axis whose array ran short.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MotionRow {
    pub car_id: Option<String>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: EpochMillis,
    pub sample_index: u32,
    pub acc_x: Option<f64>,
    pub acc_y: Option<f64>,
    pub acc_z: Option<f64>,
    pub rad_x: Option<f64>,
    pub rad_y: Option<f64>,
    pub rad_z: Option<f64>,
}

impl MotionRow {
    pub fn axes(&self) -> [Option<f64>; MOTION_AXES] {
        [
            self.acc_x, self.acc_y, self.acc_z, self.rad_x, self.rad_y, self.rad_z,
        ]
    }
}

/// Descriptive statistics of one axis array within one sample.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AxisSummary {
    pub mean: f64,
    pub max: f64,
    pub min: f64,
    pub std: f64,
    pub median: f64,
}

impl AxisSummary {
    /// Returns `None` for an empty array.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(AxisSummary {
            mean,
            max,
            min,
            std: variance.sqrt(),
            median,
        })
    }
}

/// Per-sample axis statistics, the alternative to raw motion rows.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRow {
    pub car_id: Option<String>,
    pub timestamp: EpochMillis,
    /// Ordered accX, accY, accZ, radX, radY, radZ.
    pub axes: [Option<AxisSummary>; MOTION_AXES],
}

/// External status log entry. Joined by value, never mutated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusEvent {
    pub car_id: Option<String>,
    pub timestamp: EpochMillis,
    pub status_code: Option<u8>,
    pub change_flag: bool,
}

/// A qualifying stop: rows `start_index..=end_index` of one vehicle's timeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StopSegment {
    pub id: u32,
    pub start_index: usize,
    pub end_index: usize,
    pub start_ts: EpochMillis,
    pub end_ts: EpochMillis,
}

impl StopSegment {
    pub fn row_count(&self) -> usize {
        self.end_index - self.start_index + 1
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_ts.saturating_sub(self.start_ts) as f64 / 1000.0
    }
}

/// Render epoch milliseconds as `YYYY-MM-DD HH:MM:SS.fff` (UTC).
pub fn format_timestamp(ms: EpochMillis) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        None => ms.to_string(),
    }
}

pub fn serialize_timestamp<S>(ms: &EpochMillis, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&format_timestamp(*ms))
}

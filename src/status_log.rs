use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::config::VehicleScope;
use crate::error::{DatasetError, Result};
use crate::types::{EpochMillis, StatusEvent};

/// How base rows are matched against the status log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinMode {
    VehicleAndTimestamp,
    /// Degraded: vehicle identity is discarded and only the millisecond stamp matches.
    TimestampOnly,
}

#[derive(Deserialize)]
struct StatusRecord {
    #[serde(default)]
    car_id: Option<String>,
    time_stamp: String,
    #[serde(default)]
    status_management: Option<String>,
    #[serde(default)]
    change_flag: Option<String>,
}

/// The external status-change log (`change_flag_filled0.csv`).
#[derive(Clone, Debug, Default)]
pub struct StatusLog {
    pub entries: Vec<StatusEvent>,
    pub has_vehicle_ids: bool,
    /// Rows dropped because the timestamp was unusable.
    pub skipped_rows: usize,
}

impl StatusLog {
    /// Load the log. Its absence is a fatal precondition for the whole run.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(DatasetError::MissingPrecondition(format!(
                "required status log not found: {}",
                path.display()
            )));
        }
        let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
        let log = Self::from_reader(file)?;
        log::info!(
            "[labels] Loaded {} status entries from {} ({} skipped)",
            log.entries.len(),
            path.display(),
            log.skipped_rows
        );
        Ok(log)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let has_vehicle_ids = rdr.headers()?.iter().any(|h| h == "car_id");

        let mut log = StatusLog {
            has_vehicle_ids,
            ..StatusLog::default()
        };
        for record in rdr.deserialize::<StatusRecord>() {
            let record = record?;
            let Some(timestamp) = parse_millis(&record.time_stamp) else {
                log.skipped_rows += 1;
                continue;
            };
            log.entries.push(StatusEvent {
                car_id: record.car_id.filter(|c| !c.is_empty()),
                timestamp,
                status_code: record.status_management.as_deref().and_then(parse_status_code),
                change_flag: record
                    .change_flag
                    .as_deref()
                    .and_then(parse_number)
                    .map(|f| f == 1.0)
                    .unwrap_or(false),
            });
        }
        Ok(log)
    }

    pub fn join_mode(&self, scope: VehicleScope) -> JoinMode {
        if scope == VehicleScope::PerVehicle && self.has_vehicle_ids {
            JoinMode::VehicleAndTimestamp
        } else {
            JoinMode::TimestampOnly
        }
    }

    /// Build the lookup index. The first entry for a key wins.
    pub fn index(&self, mode: JoinMode) -> StatusIndex<'_> {
        let mut by_time: HashMap<EpochMillis, Vec<&StatusEvent>> =
            HashMap::with_capacity(self.entries.len());
        let mut duplicates = 0;
        for entry in &self.entries {
            let bucket = by_time.entry(entry.timestamp).or_default();
            let shadowed = match mode {
                JoinMode::TimestampOnly => !bucket.is_empty(),
                JoinMode::VehicleAndTimestamp => bucket.iter().any(|e| e.car_id == entry.car_id),
            };
            if shadowed {
                duplicates += 1;
            } else {
                bucket.push(entry);
            }
        }
        StatusIndex {
            mode,
            by_time,
            duplicates,
        }
    }
}

pub struct StatusIndex<'a> {
    pub mode: JoinMode,
    by_time: HashMap<EpochMillis, Vec<&'a StatusEvent>>,
    /// Log entries shadowed by an earlier entry with the same key.
    pub duplicates: usize,
}

impl<'a> StatusIndex<'a> {
    /// Vehicle and timestamp must both match when both sides carry a vehicle id.
    /// A row or log entry without one matches on timestamp alone.
    pub fn lookup(&self, car_id: Option<&str>, timestamp: EpochMillis) -> Option<&'a StatusEvent> {
        let bucket = self.by_time.get(&timestamp)?;
        match (self.mode, car_id) {
            (JoinMode::TimestampOnly, _) | (JoinMode::VehicleAndTimestamp, None) => {
                bucket.first().copied()
            }
            (JoinMode::VehicleAndTimestamp, Some(id)) => bucket
                .iter()
                .find(|e| e.car_id.as_deref() == Some(id))
                .or_else(|| bucket.iter().find(|e| e.car_id.is_none()))
                .copied(),
        }
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

fn parse_millis(text: &str) -> Option<EpochMillis> {
    let text = text.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| parse_number(text).map(|f| f.floor() as i64))
}

fn parse_status_code(text: &str) -> Option<u8> {
    let value = parse_number(text)?;
    if value.fract() == 0.0 && (0.0..=99.0).contains(&value) {
        Some(value as u8)
    } else {
        None
    }
}

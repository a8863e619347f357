//! Stop-segment detection over the base stream.
//!
//! A two-state scan per vehicle: `Running` while speed is at or above the
//! threshold, `Candidate` while below it. Every time a candidate run closes
//! (speed rises, a data gap forces it shut, or the stream ends) the run is
//! checked against the stop rule:
//! - at least two rows,
//! - first-to-last duration of at least `min_duration_secs`,
//! - at least one row with speed exactly zero.
//!
//! Qualifying runs get the next segment id (starting at 1 per vehicle).

use std::ops::Range;

use crate::config::DatasetConfig;
use crate::timeline::Timeline;
use crate::types::{BaseRow, StopSegment};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StopRule {
    pub speed_threshold: f64,
    pub min_duration_secs: f64,
    /// A larger gap between consecutive rows force-closes the current run.
    pub max_gap_secs: f64,
}

impl Default for StopRule {
    fn default() -> Self {
        StopRule {
            speed_threshold: 10.0,
            min_duration_secs: 10.0,
            max_gap_secs: 60.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    Running,
    Candidate { start: usize },
}

/// Stop segments of one vehicle. Segment indices are relative to `range`.
#[derive(Clone, Debug, PartialEq)]
pub struct VehicleStops {
    pub range: Range<usize>,
    pub segments: Vec<StopSegment>,
}

impl StopRule {
    pub fn from_config(config: &DatasetConfig) -> Self {
        StopRule {
            speed_threshold: config.stop_speed_threshold,
            min_duration_secs: config.min_stop_duration_secs,
            max_gap_secs: config.max_gap_secs,
        }
    }

    /// Scan one vehicle's rows (ascending timestamp) and mark qualifying stops.
    ///
    /// Previous `stop_segment`/`is_stopped` values are cleared first.
    pub fn detect(&self, rows: &mut [BaseRow]) -> Vec<StopSegment> {
        for row in rows.iter_mut() {
            row.stop_segment = 0;
            row.is_stopped = false;
        }

        let mut runs = Vec::new();
        let mut state = ScanState::Running;

        for i in 0..rows.len() {
            if i > 0 {
                let gap_ms = rows[i].timestamp.saturating_sub(rows[i - 1].timestamp);
                let gap_secs = gap_ms as f64 / 1000.0;
                if gap_secs > self.max_gap_secs {
                    if let ScanState::Candidate { start } = state {
                        runs.push(start..i);
                        state = ScanState::Running;
                    }
                }
            }

            let low = rows[i].speed < self.speed_threshold;
            state = match (state, low) {
                (ScanState::Running, true) => ScanState::Candidate { start: i },
                (ScanState::Candidate { start }, false) => {
                    runs.push(start..i);
                    ScanState::Running
                }
                (unchanged, _) => unchanged,
            };
        }
        if let ScanState::Candidate { start } = state {
            runs.push(start..rows.len());
        }

        let mut segments = Vec::new();
        for run in runs {
            if !self.qualifies(&rows[run.clone()]) {
                continue;
            }
            let id = segments.len() as u32 + 1;
            for row in &mut rows[run.clone()] {
                row.stop_segment = id;
                row.is_stopped = true;
            }
            segments.push(StopSegment {
                id,
                start_index: run.start,
                end_index: run.end - 1,
                start_ts: rows[run.start].timestamp,
                end_ts: rows[run.end - 1].timestamp,
            });
        }
        segments
    }

    fn qualifies(&self, run: &[BaseRow]) -> bool {
        if run.len() < 2 {
            return false;
        }
        let duration_secs =
            run[run.len() - 1].timestamp.saturating_sub(run[0].timestamp) as f64 / 1000.0;
        duration_secs >= self.min_duration_secs && run.iter().any(|r| r.speed == 0.0)
    }
}

/// Run detection independently over each vehicle range of the timeline.
pub fn detect_all(timeline: &mut Timeline, rule: &StopRule) -> Vec<VehicleStops> {
    let ranges = timeline.vehicle_ranges();
    let stops: Vec<VehicleStops> = ranges
        .into_iter()
        .map(|range| {
            let segments = rule.detect(&mut timeline.base[range.clone()]);
            for segment in &segments {
                log::debug!(
                    "[stops] segment {} at rows {}..={}: {} rows, {:.1}s",
                    segment.id,
                    range.start + segment.start_index,
                    range.start + segment.end_index,
                    segment.row_count(),
                    segment.duration_secs()
                );
            }
            VehicleStops { range, segments }
        })
        .collect();
    log::info!(
        "[stops] {} stop segments across {} vehicle timeline(s)",
        stops.iter().map(|v| v.segments.len()).sum::<usize>(),
        stops.len()
    );
    stops
}

//! Event reconciliation: status-log join, raw event derivation, label propagation.
//!
//! Raw events per row, evaluated in this order with later checks overriding:
//! 1. the joined log entry's change flag is set -> boarding,
//! 2. the two-digit status transition `prev ++ cur` is a known boarding or
//!    alighting code -> that event.
//!
//! Under the segment strategy a boarding event labels the latest stop that
//! ended at or before it and an alighting event labels the earliest stop
//! starting at or after it. Events are applied in ascending time, so the
//! later event wins when two land on the same segment.

use serde::Serialize;

use crate::config::{LabelStrategy, VehicleScope};
use crate::status_log::{JoinMode, StatusIndex, StatusLog};
use crate::stops::VehicleStops;
use crate::types::{BaseRow, EpochMillis, EventKind, Label, StopSegment};

/// Status transitions (previous code, current code) meaning a passenger got on.
pub const BOARDING_CODES: [&str; 27] = [
    "0003", "0012", "0014", "0103", "0112", "0114", "0203", "0212", "0214", "0403", "0412", "0414",
    "0503", "0512", "0514", "0603", "0612", "0614", "0803", "0812", "0814", "1303", "1312", "1314",
    "1503", "1512", "1514",
];

/// Status transitions meaning a passenger got off.
pub const ALIGHTING_CODES: [&str; 27] = [
    "0300", "1200", "1400", "0301", "1201", "1401", "0302", "1202", "1402", "0304", "1204", "1404",
    "0305", "1205", "1405", "0306", "1206", "1406", "0308", "1208", "1408", "0313", "1213", "1413",
    "0315", "1215", "1415",
];

pub fn transition_code(previous: u8, current: u8) -> String {
    format!("{:02}{:02}", previous, current)
}

pub fn transition_event(previous: u8, current: u8) -> Option<EventKind> {
    let code = transition_code(previous, current);
    if BOARDING_CODES.contains(&code.as_str()) {
        Some(EventKind::Boarding)
    } else if ALIGHTING_CODES.contains(&code.as_str()) {
        Some(EventKind::Alighting)
    } else {
        None
    }
}

/// An event attached to a single row (index into the full base stream).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawEvent {
    pub row: usize,
    pub timestamp: EpochMillis,
    pub kind: EventKind,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub rows_matched: usize,
    pub raw_boarding: usize,
    pub raw_alighting: usize,
    pub attached: usize,
    pub unattached: usize,
    pub status_duplicates: usize,
}

pub struct Reconciler<'a> {
    index: StatusIndex<'a>,
    strategy: LabelStrategy,
}

impl<'a> Reconciler<'a> {
    pub fn new(log: &'a StatusLog, scope: VehicleScope, strategy: LabelStrategy) -> Self {
        let mode = log.join_mode(scope);
        if mode == JoinMode::TimestampOnly {
            log::warn!("[labels] Joining status log on timestamp only; vehicle identity is ignored");
        }
        Reconciler {
            index: log.index(mode),
            strategy,
        }
    }

    pub fn join_mode(&self) -> JoinMode {
        self.index.mode
    }

    /// Relabel every vehicle timeline from scratch. Running twice gives the same labels.
    pub fn run(&self, rows: &mut [BaseRow], stops: &[VehicleStops]) -> ReconcileReport {
        let mut report = ReconcileReport {
            status_duplicates: self.index.duplicates,
            ..ReconcileReport::default()
        };
        if self.index.mode == JoinMode::VehicleAndTimestamp {
            let anonymous = rows.iter().filter(|r| r.car_id.is_none()).count();
            if anonymous > 0 {
                log::warn!(
                    "[labels] {} row(s) without a vehicle id joined on timestamp only",
                    anonymous
                );
            }
        }

        for vehicle in stops {
            let range = vehicle.range.clone();
            for row in &mut rows[range.clone()] {
                row.label = Label::Normal;
            }

            let (events, matched) = self.derive_events(&rows[range.clone()], range.start);
            report.rows_matched += matched;
            for event in &events {
                match event.kind {
                    EventKind::Boarding => report.raw_boarding += 1,
                    EventKind::Alighting => report.raw_alighting += 1,
                }
            }

            let (attached, unattached) = match self.strategy {
                LabelStrategy::Segment => {
                    propagate_to_segments(&mut rows[range.clone()], &vehicle.segments, &events)
                }
                LabelStrategy::Instant => {
                    for event in &events {
                        rows[event.row].label = event.kind.into();
                    }
                    (events.len(), 0)
                }
            };
            report.attached += attached;
            report.unattached += unattached;
        }

        log::info!(
            "[labels] {} boarding / {} alighting raw events, {} attached, {} unattached",
            report.raw_boarding,
            report.raw_alighting,
            report.attached,
            report.unattached
        );
        report
    }

    /// Raw events for one vehicle's rows, plus the number of rows that matched the log.
    fn derive_events(&self, rows: &[BaseRow], offset: usize) -> (Vec<RawEvent>, usize) {
        let mut events = Vec::new();
        let mut matched = 0;
        let mut previous_code: Option<u8> = None;

        for (i, row) in rows.iter().enumerate() {
            let joined = self.index.lookup(row.car_id.as_deref(), row.timestamp);
            if joined.is_some() {
                matched += 1;
            }
            let code = joined.and_then(|e| e.status_code).or(row.status_code);

            let mut kind = None;
            if joined.map(|e| e.change_flag).unwrap_or(false) {
                kind = Some(EventKind::Boarding);
            }
            if let (Some(prev), Some(cur)) = (previous_code, code) {
                if let Some(transition) = transition_event(prev, cur) {
                    kind = Some(transition);
                }
            }
            previous_code = code;

            if let Some(kind) = kind {
                events.push(RawEvent {
                    row: offset + i,
                    timestamp: row.timestamp,
                    kind,
                });
            }
        }
        (events, matched)
    }
}

/// Label whole segments from events. `rows` is the vehicle slice the segments index into.
fn propagate_to_segments(
    rows: &mut [BaseRow],
    segments: &[StopSegment],
    events: &[RawEvent],
) -> (usize, usize) {
    let mut segment_labels: Vec<Option<Label>> = vec![None; segments.len()];
    let (mut attached, mut unattached) = (0, 0);

    for event in events {
        match nearest_segment(segments, event.timestamp, event.kind) {
            Some(i) => {
                segment_labels[i] = Some(event.kind.into());
                attached += 1;
            }
            None => unattached += 1,
        }
    }

    for (segment, label) in segments.iter().zip(segment_labels) {
        if let Some(label) = label {
            for row in &mut rows[segment.start_index..=segment.end_index] {
                row.label = label;
            }
        }
    }
    (attached, unattached)
}

/// Binary search over segment boundaries (segments are ordered and disjoint).
pub fn nearest_segment(segments: &[StopSegment], at: EpochMillis, kind: EventKind) -> Option<usize> {
    match kind {
        EventKind::Boarding => {
            let after = segments.partition_point(|s| s.end_ts <= at);
            after.checked_sub(1)
        }
        EventKind::Alighting => {
            let first = segments.partition_point(|s| s.start_ts < at);
            (first < segments.len()).then_some(first)
        }
    }
}

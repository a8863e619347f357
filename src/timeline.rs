use std::ops::Range;

use crate::config::VehicleScope;
use crate::parser::ParsedCapture;
use crate::types::{BaseRow, EpochMillis, FeatureRow, MotionRow};

/// Merged base, motion and feature streams of every capture in a run.
#[derive(Clone, Debug, Default)]
pub struct Timeline {
    pub base: Vec<BaseRow>,
    pub motion: Vec<MotionRow>,
    pub features: Vec<FeatureRow>,
    pub scope: VehicleScope,
}

impl Timeline {
    /// Concatenate captures in input order, then stable-sort each stream.
    ///
    /// Nothing is dropped or deduplicated; timestamp ties keep file order.
    pub fn assemble(captures: Vec<ParsedCapture>, scope: VehicleScope) -> Self {
        let mut timeline = Timeline {
            scope,
            ..Timeline::default()
        };
        for capture in captures {
            timeline.base.extend(capture.base);
            timeline.motion.extend(capture.motion);
            timeline.features.extend(capture.features);
        }
        timeline.sort();
        timeline
    }

    pub fn sort(&mut self) {
        let scope = self.scope;
        self.base.sort_by(|a, b| {
            order_key(scope, &a.car_id, a.timestamp).cmp(&order_key(scope, &b.car_id, b.timestamp))
        });
        self.motion.sort_by(|a, b| {
            order_key(scope, &a.car_id, a.timestamp).cmp(&order_key(scope, &b.car_id, b.timestamp))
        });
        self.features.sort_by(|a, b| {
            order_key(scope, &a.car_id, a.timestamp).cmp(&order_key(scope, &b.car_id, b.timestamp))
        });
    }

    /// Contiguous per-vehicle ranges of the (sorted) base stream.
    pub fn vehicle_ranges(&self) -> Vec<Range<usize>> {
        vehicle_ranges(&self.base, self.scope)
    }
}

fn order_key<'a>(
    scope: VehicleScope,
    car_id: &'a Option<String>,
    timestamp: EpochMillis,
) -> (Option<&'a str>, EpochMillis) {
    match scope {
        VehicleScope::PerVehicle => (car_id.as_deref(), timestamp),
        VehicleScope::Global => (None, timestamp),
    }
}

/// Split sorted rows into runs sharing one vehicle id.
///
/// Under [`VehicleScope::Global`] the whole stream is a single run: vehicle
/// identity is ignored on purpose and segments/events may span vehicles.
pub fn vehicle_ranges(rows: &[BaseRow], scope: VehicleScope) -> Vec<Range<usize>> {
    if rows.is_empty() {
        return Vec::new();
    }
    if scope == VehicleScope::Global {
        return vec![0..rows.len()];
    }
    let mut ranges = Vec::new();
    let mut start = 0;
    for i in 1..rows.len() {
        if rows[i].car_id != rows[i - 1].car_id {
            ranges.push(start..i);
            start = i;
        }
    }
    ranges.push(start..rows.len());
    ranges
}

//! Trip capture decoding.
//!
//! A capture is one JSON document (optionally gzipped) holding a vehicle id,
//! a `recordDateTime` start stamp and a `data` list of samples. Each sample
//! yields one [`BaseRow`] and, depending on the layout, one [`MotionRow`] per
//! high-rate sub-sample and/or one [`FeatureRow`] of axis statistics.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use chrono::NaiveDateTime;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::config::{BlinkerPolicy, MotionLayout};
use crate::error::{DatasetError, Result};
use crate::types::{
    AxisSummary, BaseRow, EpochMillis, FeatureRow, MotionRow, MOTION_AXES,
    MOTION_SAMPLE_SPACING_MS,
};

/// `timeStamp` values below this are offsets from the capture start, not epoch instants.
const ABSOLUTE_EPOCH_MS_FLOOR: i64 = 100_000_000_000;

const RECORD_DATETIME_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Clone, Copy, Debug, Default)]
pub struct ParseOptions {
    pub blinker_policy: BlinkerPolicy,
    pub motion_layout: MotionLayout,
}

/// Capture-level metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct TripCapture {
    pub source: String,
    pub car_id: Option<String>,
    /// Declared capture start, if `recordDateTime` was usable.
    pub start: Option<EpochMillis>,
}

/// A sample that was dropped while decoding a capture.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleError {
    pub index: usize,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct ParsedCapture {
    pub capture: TripCapture,
    pub base: Vec<BaseRow>,
    pub motion: Vec<MotionRow>,
    pub features: Vec<FeatureRow>,
    pub skipped: Vec<SampleError>,
    /// Axis arrays that failed to decode and were treated as empty.
    pub bad_axis_arrays: usize,
}

impl ParsedCapture {
    fn empty(capture: TripCapture) -> Self {
        ParsedCapture {
            capture,
            base: Vec::new(),
            motion: Vec::new(),
            features: Vec::new(),
            skipped: Vec::new(),
            bad_axis_arrays: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.base.is_empty()
    }
}

/// Keys that may carry the vehicle id, highest priority first.
const CAR_ID_KEYS: [&str; 3] = ["imei", "car_id", "vehicleId"];

/// Keys that may carry a sample's own status code, highest priority first.
const STATUS_KEYS: [&str; 3] = ["status", "statusManagement", "status_management"];

#[derive(Deserialize)]
struct RawCapture {
    #[serde(default, rename = "recordDateTime")]
    record_date_time: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSample {
    time_stamp: Option<Value>,
    speed: Option<Value>,
    latitude: Option<Value>,
    longitude: Option<Value>,
    acc_x: Option<Value>,
    acc_y: Option<Value>,
    acc_z: Option<Value>,
    rad_x: Option<Value>,
    rad_y: Option<Value>,
    rad_z: Option<Value>,
    vehicle_information_right_blinker: Option<Value>,
    vehicle_information_left_blinker: Option<Value>,
    #[serde(flatten)]
    other: Map<String, Value>,
}

impl RawSample {
    fn axis_fields(&self) -> [Option<&Value>; MOTION_AXES] {
        [
            self.acc_x.as_ref(),
            self.acc_y.as_ref(),
            self.acc_z.as_ref(),
            self.rad_x.as_ref(),
            self.rad_y.as_ref(),
            self.rad_z.as_ref(),
        ]
    }
}

/// Open a capture file, gunzipping `*.gz` transparently.
pub fn load_capture(path: &Path, options: &ParseOptions) -> Result<ParsedCapture> {
    let file = File::open(path).map_err(|e| DatasetError::io(path, e))?;
    let source = path.display().to_string();
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        parse_capture(BufReader::new(GzDecoder::new(file)), &source, options)
    } else {
        parse_capture(BufReader::new(file), &source, options)
    }
}

/// Decode one capture document.
///
/// A document without a usable `data` list yields an empty capture, not an error.
/// Undecodable documents fail with [`DatasetError::Parse`].
pub fn parse_capture<R: Read>(
    reader: R,
    source: &str,
    options: &ParseOptions,
) -> Result<ParsedCapture> {
    let raw: RawCapture =
        serde_json::from_reader(reader).map_err(|e| DatasetError::parse(source, e.to_string()))?;

    let car_id = first_field(&raw.other, &CAR_ID_KEYS).and_then(value_string);
    let start = raw.record_date_time.as_ref().and_then(|v| {
        let parsed = value_string(v).and_then(|s| parse_record_datetime(&s));
        if parsed.is_none() {
            log::debug!("[parse] {}: unusable recordDateTime {}", source, v);
        }
        parsed
    });

    let mut parsed = ParsedCapture::empty(TripCapture {
        source: source.to_string(),
        car_id,
        start,
    });

    let samples = match raw.data {
        Some(Value::Array(samples)) if !samples.is_empty() => samples,
        _ => return Ok(parsed),
    };

    for (index, value) in samples.into_iter().enumerate() {
        if let Err(reason) = decode_sample(value, options, &mut parsed) {
            log::debug!("[parse] {}: skipping sample {}: {}", source, index, reason);
            parsed.skipped.push(SampleError { index, reason });
        }
    }

    Ok(parsed)
}

fn decode_sample(
    value: Value,
    options: &ParseOptions,
    parsed: &mut ParsedCapture,
) -> std::result::Result<(), String> {
    let sample: RawSample =
        serde_json::from_value(value).map_err(|e| format!("malformed sample: {}", e))?;

    let timestamp = resolve_timestamp(sample.time_stamp.as_ref(), parsed.capture.start)?;
    let speed = scalar_or_zero(sample.speed.as_ref(), "speed")?;
    let latitude = scalar_or_zero(sample.latitude.as_ref(), "latitude")?;
    let longitude = scalar_or_zero(sample.longitude.as_ref(), "longitude")?;

    let car_id = parsed.capture.car_id.clone();
    let mut row = BaseRow::new(car_id.clone(), timestamp, speed);
    row.latitude = latitude;
    row.longitude = longitude;
    row.right_blinker = reduce_blinker(
        sample.vehicle_information_right_blinker.as_ref(),
        options.blinker_policy,
    );
    row.left_blinker = reduce_blinker(
        sample.vehicle_information_left_blinker.as_ref(),
        options.blinker_policy,
    );
    row.status_code = first_field(&sample.other, &STATUS_KEYS).and_then(value_status_code);

    let mut axes: [Vec<f64>; MOTION_AXES] = Default::default();
    let mut bad_axes = 0;
    for (slot, field) in axes.iter_mut().zip(sample.axis_fields()) {
        match field {
            None => {}
            Some(v) => match decode_array(v) {
                Some(values) => *slot = values,
                None => bad_axes += 1,
            },
        }
    }

    if options.motion_layout.wants_raw() {
        let motion = expand_motion_rows(car_id.clone(), timestamp, &axes)
            .ok_or_else(|| format!("sub-sample timestamps overflow from {}", timestamp))?;
        parsed.motion.extend(motion);
    }
    parsed.bad_axis_arrays += bad_axes;
    if options.motion_layout.wants_summary() {
        parsed.features.push(FeatureRow {
            car_id,
            timestamp,
            axes: std::array::from_fn(|i| AxisSummary::from_values(&axes[i])),
        });
    }
    parsed.base.push(row);
    Ok(())
}

/// Pad ragged axis arrays to the longest one; short axes get `None`, never zero.
///
/// Returns `None` if the last sub-sample timestamp does not fit in an `i64`.
pub fn expand_motion_rows(
    car_id: Option<String>,
    timestamp: EpochMillis,
    axes: &[Vec<f64>; MOTION_AXES],
) -> Option<Vec<MotionRow>> {
    let len = axes.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let span = i64::try_from(len - 1)
        .ok()?
        .checked_mul(MOTION_SAMPLE_SPACING_MS)?;
    timestamp.checked_add(span)?;

    let rows = (0..len)
        .map(|i| {
            let at = |axis: usize| axes[axis].get(i).copied();
            MotionRow {
                car_id: car_id.clone(),
                timestamp: timestamp + MOTION_SAMPLE_SPACING_MS * i as i64,
                sample_index: i as u32,
                acc_x: at(0),
                acc_y: at(1),
                acc_z: at(2),
                rad_x: at(3),
                rad_y: at(4),
                rad_z: at(5),
            }
        })
        .collect();
    Some(rows)
}

fn parse_record_datetime(s: &str) -> Option<EpochMillis> {
    NaiveDateTime::parse_from_str(s.trim(), RECORD_DATETIME_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn resolve_timestamp(
    value: Option<&Value>,
    start: Option<EpochMillis>,
) -> std::result::Result<EpochMillis, String> {
    let raw = value.ok_or_else(|| "missing timeStamp".to_string())?;
    let ms = value_i64(raw).ok_or_else(|| format!("malformed timeStamp {}", raw))?;
    if ms >= ABSOLUTE_EPOCH_MS_FLOOR {
        return Ok(ms);
    }
    match start {
        Some(start) => start
            .checked_add(ms)
            .ok_or_else(|| format!("timeStamp offset {} overflows capture start", ms)),
        None => Err(format!(
            "relative timeStamp {} without a usable recordDateTime",
            ms
        )),
    }
}

fn scalar_or_zero(value: Option<&Value>, field: &str) -> std::result::Result<f64, String> {
    match value {
        None | Some(Value::Null) => Ok(0.0),
        Some(v) => value_f64(v).ok_or_else(|| format!("malformed {} {}", field, v)),
    }
}

fn reduce_blinker(value: Option<&Value>, policy: BlinkerPolicy) -> bool {
    value
        .and_then(|v| decode_array(v).or_else(|| value_f64(v).map(|f| vec![f])))
        .map(|flags| policy.reduce(&flags))
        .unwrap_or(false)
}

/// First non-null value among `keys`, in order.
fn first_field<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| fields.get(*k))
        .find(|v| !v.is_null())
}

/// Decode a numeric array given either as a JSON array or as its string encoding.
pub fn decode_array(value: &Value) -> Option<Vec<f64>> {
    match value {
        Value::Array(items) => items.iter().map(value_f64).collect(),
        Value::String(text) => {
            let items: Vec<Value> = serde_json::from_str(text).ok()?;
            items.iter().map(value_f64).collect()
        }
        _ => None,
    }
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn value_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_status_code(value: &Value) -> Option<u8> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u8::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<u8>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(doc: Value, options: &ParseOptions) -> ParsedCapture {
        let text = doc.to_string();
        parse_capture(text.as_bytes(), "test.json", options).unwrap()
    }

    fn sample(ts: &str, speed: f64) -> Value {
        json!({
            "timeStamp": ts,
            "speed": speed,
            "latitude": "35.68",
            "longitude": "139.76",
            "accX": "[0.1, 0.2]",
            "accY": "[0.1, 0.2]",
            "accZ": "[9.8, 9.7]",
            "radX": "[0.0, 0.0]",
            "radY": "[0.0, 0.0]",
            "radZ": "[0.0, 0.0]",
            "vehicleInformationRightBlinker": "[0, 1, 0]",
            "vehicleInformationLeftBlinker": "[0, 0, 0]"
        })
    }

    #[test]
    fn test_ragged_arrays_pad_with_missing() {
        let doc = json!({
            "imei": "CAR1",
            "recordDateTime": "20240101080000",
            "data": [{
                "timeStamp": "1704096000000",
                "speed": 12.5,
                "accX": "[1, 2, 3]",
                "accY": "[1, 2, 3, 4, 5]",
                "accZ": "[1, 2, 3, 4]",
                "radX": "[1, 2, 3, 4, 5]",
                "radY": "[1, 2, 3]",
                "radZ": "[1, 2, 3, 4, 5]"
            }]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.base.len(), 1);
        assert_eq!(parsed.motion.len(), 5);

        let lengths = [3, 5, 4, 5, 3, 5];
        for (i, row) in parsed.motion.iter().enumerate() {
            assert_eq!(row.timestamp, 1_704_096_000_000 + 10 * i as i64);
            assert_eq!(row.sample_index, i as u32);
            for (axis, value) in row.axes().iter().enumerate() {
                if i >= lengths[axis] {
                    assert!(value.is_none(), "axis {} index {}", axis, i);
                } else {
                    assert_eq!(*value, Some((i + 1) as f64));
                }
            }
        }
    }

    #[test]
    fn test_no_arrays_yields_single_missing_row() {
        let doc = json!({"imei": "CAR1", "data": [{"timeStamp": "1704096000000", "speed": "3"}]});
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.motion.len(), 1);
        assert!(parsed.motion[0].axes().iter().all(Option::is_none));
        assert_eq!(parsed.base[0].speed, 3.0);
    }

    #[test]
    fn test_bad_axis_is_empty_not_dropped() {
        let doc = json!({
            "imei": "CAR1",
            "data": [{"timeStamp": "1704096000000", "accX": "[1, oops", "accY": "[1, 2]"}]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.base.len(), 1);
        assert_eq!(parsed.bad_axis_arrays, 1);
        assert_eq!(parsed.motion.len(), 2);
        assert!(parsed.motion.iter().all(|r| r.acc_x.is_none()));
        assert_eq!(parsed.motion[1].acc_y, Some(2.0));
    }

    #[test]
    fn test_malformed_timestamp_skips_only_that_sample() {
        let doc = json!({
            "imei": "CAR1",
            "recordDateTime": "20240101080000",
            "data": [
                sample("1704096000000", 5.0),
                sample("not-a-number", 5.0),
                {"speed": 4.0},
                sample("1704096001000", 0.0)
            ]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.base.len(), 2);
        assert_eq!(parsed.skipped.len(), 2);
        assert_eq!(parsed.skipped[0].index, 1);
        assert_eq!(parsed.skipped[1].index, 2);
    }

    #[test]
    fn test_relative_offset_uses_record_start() {
        let doc = json!({
            "imei": "CAR1",
            "recordDateTime": "20240101080000",
            "data": [{"timeStamp": "1500", "speed": 0}]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.capture.start, Some(1_704_096_000_000));
        assert_eq!(parsed.base[0].timestamp, 1_704_096_001_500);
    }

    #[test]
    fn test_relative_offset_without_start_is_skipped() {
        let doc = json!({"imei": "CAR1", "recordDateTime": "garbage", "data": [{"timeStamp": "1500"}]});
        let parsed = parse(doc, &ParseOptions::default());
        assert!(parsed.is_empty());
        assert_eq!(parsed.skipped.len(), 1);
    }

    #[test]
    fn test_missing_data_is_empty_not_error() {
        let parsed = parse(json!({"imei": "CAR1"}), &ParseOptions::default());
        assert!(parsed.is_empty());
        let parsed = parse(json!({"imei": "CAR1", "data": []}), &ParseOptions::default());
        assert!(parsed.is_empty());
        let parsed = parse(json!({"imei": "CAR1", "data": "nope"}), &ParseOptions::default());
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_unreadable_document_is_parse_error() {
        let err = parse_capture("{not json".as_bytes(), "broken.json", &ParseOptions::default())
            .unwrap_err();
        assert!(matches!(err, DatasetError::Parse { .. }));
    }

    #[test]
    fn test_blinker_policy_applied() {
        let doc = json!({"imei": "CAR1", "data": [sample("1704096000000", 5.0)]});
        let any = parse(doc.clone(), &ParseOptions::default());
        assert!(any.base[0].right_blinker);
        assert!(!any.base[0].left_blinker);

        let majority = parse(
            doc,
            &ParseOptions {
                blinker_policy: BlinkerPolicy::Majority,
                ..ParseOptions::default()
            },
        );
        assert!(!majority.base[0].right_blinker);
    }

    #[test]
    fn test_summary_layout_emits_features_only() {
        let doc = json!({"imei": 8612345, "data": [sample("1704096000000", 5.0)]});
        let parsed = parse(
            doc,
            &ParseOptions {
                motion_layout: MotionLayout::Summary,
                ..ParseOptions::default()
            },
        );
        assert!(parsed.motion.is_empty());
        assert_eq!(parsed.features.len(), 1);
        assert_eq!(parsed.capture.car_id.as_deref(), Some("8612345"));
        let acc_z = parsed.features[0].axes[2].unwrap();
        assert!((acc_z.mean - 9.75).abs() < 1e-9);
    }

    #[test]
    fn test_overflowing_timestamp_skips_only_that_sample() {
        let doc = json!({
            "imei": "CAR1",
            "data": [
                {"timeStamp": "9223372036854775807", "accX": "[1.0, 2.0]"},
                sample("1704096000000", 5.0)
            ]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.base.len(), 1);
        assert_eq!(parsed.base[0].timestamp, 1_704_096_000_000);
        assert_eq!(parsed.motion.len(), 2);
        assert_eq!(parsed.skipped.len(), 1);
        assert_eq!(parsed.skipped[0].index, 0);
        assert!(parsed.skipped[0].reason.contains("overflow"));
    }

    #[test]
    fn test_relative_offset_overflow_is_skipped() {
        let doc = json!({
            "imei": "CAR1",
            "recordDateTime": "00010101000000",
            "data": [{"timeStamp": -9223372036854775807i64}]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert!(parsed.is_empty());
        assert_eq!(parsed.skipped.len(), 1);
    }

    #[test]
    fn test_expand_motion_rows_rejects_overflow() {
        let axes: [Vec<f64>; MOTION_AXES] = [vec![1.0, 2.0], vec![], vec![], vec![], vec![], vec![]];
        assert!(expand_motion_rows(None, i64::MAX, &axes).is_none());
        assert_eq!(expand_motion_rows(None, i64::MAX - 10, &axes).map(|r| r.len()), Some(2));
    }

    #[test]
    fn test_repeated_id_and_status_keys_use_priority_order() {
        let doc = json!({
            "imei": "CAR1",
            "vehicleId": "OTHER",
            "data": [{
                "timeStamp": "1704096000000",
                "status": "12",
                "statusManagement": "03"
            }, {
                "timeStamp": "1704096001000",
                "status": null,
                "statusManagement": "03"
            }]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert!(parsed.skipped.is_empty());
        assert_eq!(parsed.capture.car_id.as_deref(), Some("CAR1"));
        assert_eq!(parsed.base[0].status_code, Some(12));
        assert_eq!(parsed.base[1].status_code, Some(3));
    }

    #[test]
    fn test_numeric_record_datetime_is_accepted() {
        let doc = json!({
            "vehicleId": "CAR9",
            "recordDateTime": 20240101080000u64,
            "data": [{"timeStamp": "1500"}]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.capture.car_id.as_deref(), Some("CAR9"));
        assert_eq!(parsed.capture.start, Some(1_704_096_000_000));
        assert_eq!(parsed.base[0].timestamp, 1_704_096_001_500);
    }

    #[test]
    fn test_unusable_record_datetime_is_harmless_for_absolute_stamps() {
        let doc = json!({
            "imei": "CAR1",
            "recordDateTime": [2024],
            "data": [{"timeStamp": "1704096000000"}]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.capture.start, None);
        assert_eq!(parsed.base.len(), 1);
    }

    #[test]
    fn test_status_code_from_sample() {
        let doc = json!({
            "imei": "CAR1",
            "data": [{"timeStamp": "1704096000000", "statusManagement": "03"}]
        });
        let parsed = parse(doc, &ParseOptions::default());
        assert_eq!(parsed.base[0].status_code, Some(3));
    }
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::dataset::{Dataset, OutputFiles, Split};
use crate::error::{DatasetError, Result};
use crate::reconcile::ReconcileReport;

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Counters and outputs of one pipeline run, saved next to the CSVs.
#[derive(Serialize, Clone, Debug, Default)]
pub struct RunSummary {
    pub files_discovered: usize,
    pub files_processed: usize,
    pub files_failed: Vec<FileFailure>,
    pub samples_skipped: usize,
    pub bad_axis_arrays: usize,
    pub status_rows_skipped: usize,

    pub base_rows: usize,
    pub motion_rows: usize,
    pub feature_rows: usize,
    pub vehicles: usize,
    pub stop_segments: usize,
    pub stopped_rows: usize,
    pub stopped_pct: f64,

    pub labels: ReconcileReport,
    pub label_distribution: BTreeMap<String, usize>,

    pub train_rows: usize,
    pub test_rows: usize,
    pub outputs: Option<OutputFiles>,
}

impl RunSummary {
    pub fn record_dataset(&mut self, dataset: &Dataset, split: &Split) {
        self.base_rows = dataset.base.len();
        self.motion_rows = dataset.motion.len();
        self.feature_rows = dataset.features.len();
        self.stopped_rows = dataset.stopped_rows();
        self.stopped_pct = if self.base_rows == 0 {
            0.0
        } else {
            100.0 * self.stopped_rows as f64 / self.base_rows as f64
        };
        self.label_distribution = dataset
            .label_distribution()
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        self.train_rows = split.train.len();
        self.test_rows = split.test.len();
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| DatasetError::io(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BaseRow, Label};
    use approx::assert_relative_eq;

    #[test]
    fn test_record_dataset_counts() {
        let mut base: Vec<BaseRow> = (0..4)
            .map(|i| BaseRow::new(Some("A".into()), i * 1000, 0.0))
            .collect();
        base[0].is_stopped = true;
        base[0].label = Label::Boarding;
        let dataset = Dataset {
            base,
            ..Dataset::default()
        };
        let split = dataset.split(0.5);

        let mut summary = RunSummary::default();
        summary.record_dataset(&dataset, &split);
        assert_eq!(summary.base_rows, 4);
        assert_eq!(summary.stopped_rows, 1);
        assert_relative_eq!(summary.stopped_pct, 25.0);
        assert_eq!(summary.label_distribution["boarding"], 1);
        assert_eq!((summary.train_rows, summary.test_rows), (2, 2));
    }

    #[test]
    fn test_save_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        let summary = RunSummary {
            files_discovered: 3,
            files_failed: vec![FileFailure {
                path: PathBuf::from("bad.json"),
                reason: "truncated".into(),
            }],
            ..RunSummary::default()
        };
        summary.save(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["files_discovered"], 3);
        assert_eq!(value["files_failed"][0]["reason"], "truncated");
    }
}

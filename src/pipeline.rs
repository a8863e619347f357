//! End-to-end batch run: discover -> parse -> assemble -> stops -> labels -> split -> write.
//!
//! Fatal conditions (bad config, missing status log, nothing to process)
//! are checked before any output file is created.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::DatasetConfig;
use crate::dataset::{with_suffix, Dataset, Split};
use crate::error::{DatasetError, Result};
use crate::parser::{load_capture, ParseOptions, ParsedCapture};
use crate::reconcile::Reconciler;
use crate::status_log::StatusLog;
use crate::stops::{detect_all, StopRule};
use crate::summary::{FileFailure, RunSummary};
use crate::timeline::Timeline;

#[derive(Debug)]
pub struct PipelineOutput {
    pub dataset: Dataset,
    pub split: Split,
    pub summary: RunSummary,
    pub summary_path: PathBuf,
}

fn is_capture_file(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    path.is_file() && (name.ends_with(".json") || name.ends_with(".json.gz"))
}

/// Capture files directly inside `dir`, in file-name order, capped at `max_files`.
pub fn discover_captures(dir: &Path, max_files: Option<usize>) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(DatasetError::EmptyResult(format!(
            "capture directory not found: {}",
            dir.display()
        )));
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| DatasetError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| is_capture_file(p))
        .collect();
    files.sort();
    if let Some(limit) = max_files {
        files.truncate(limit);
    }
    if files.is_empty() {
        return Err(DatasetError::EmptyResult(format!(
            "no *.json or *.json.gz captures in {}",
            dir.display()
        )));
    }
    Ok(files)
}

pub fn run(config: &DatasetConfig) -> Result<PipelineOutput> {
    config.validate()?;

    let log_path = config.change_flag_path.as_deref().ok_or_else(|| {
        DatasetError::MissingPrecondition("no status log configured (change_flag_path)".into())
    })?;
    let status_log = StatusLog::load(log_path)?;

    let files = discover_captures(&config.json_dir, config.max_files)?;
    log::info!("[parse] {} capture file(s) in {}", files.len(), config.json_dir.display());

    let mut summary = RunSummary {
        files_discovered: files.len(),
        status_rows_skipped: status_log.skipped_rows,
        ..RunSummary::default()
    };

    let options = ParseOptions {
        blinker_policy: config.blinker_policy,
        motion_layout: config.motion_layout,
    };
    let mut captures: Vec<ParsedCapture> = Vec::with_capacity(files.len());
    for path in &files {
        match load_capture(path, &options) {
            Ok(capture) => {
                summary.files_processed += 1;
                summary.samples_skipped += capture.skipped.len();
                summary.bad_axis_arrays += capture.bad_axis_arrays;
                if capture.is_empty() {
                    log::debug!("[parse] {} produced no rows", path.display());
                } else {
                    log::debug!(
                        "[parse] {}: {} rows, {} skipped samples",
                        path.display(),
                        capture.base.len(),
                        capture.skipped.len()
                    );
                }
                captures.push(capture);
            }
            Err(e) => {
                log::warn!("[parse] Failed {}: {}", path.display(), e);
                summary.files_failed.push(FileFailure {
                    path: path.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let total_rows: usize = captures.iter().map(|c| c.base.len()).sum();
    if total_rows == 0 {
        return Err(DatasetError::EmptyResult(format!(
            "no usable rows in {} capture file(s) ({} failed)",
            files.len(),
            summary.files_failed.len()
        )));
    }

    let mut timeline = Timeline::assemble(captures, config.vehicle_scope);
    log::info!(
        "[parse] Assembled {} base rows, {} motion rows, {} feature rows",
        timeline.base.len(),
        timeline.motion.len(),
        timeline.features.len()
    );

    let stops = detect_all(&mut timeline, &StopRule::from_config(config));
    summary.vehicles = stops.len();
    summary.stop_segments = stops.iter().map(|v| v.segments.len()).sum();

    let reconciler = Reconciler::new(&status_log, config.vehicle_scope, config.label_strategy);
    log::info!("[labels] Status join: {:?}", reconciler.join_mode());
    summary.labels = reconciler.run(&mut timeline.base, &stops);

    let dataset = Dataset::finalize(timeline);
    let split = dataset.split(config.train_ratio);
    summary.record_dataset(&dataset, &split);

    summary.outputs = Some(dataset.write(&config.output_prefix, &split, config.motion_layout)?);
    let summary_path = with_suffix(&config.output_prefix, "_summary.json");
    summary.save(&summary_path)?;

    Ok(PipelineOutput {
        dataset,
        split,
        summary,
        summary_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_filters_and_orders() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.json", "a.json.gz", "c.txt", "d.json"] {
            fs::write(dir.path().join(name), "{}").unwrap();
        }
        fs::create_dir(dir.path().join("nested.json")).unwrap();

        let files = discover_captures(dir.path(), None).unwrap();
        let names: Vec<&str> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.json.gz", "b.json", "d.json"]);

        let capped = discover_captures(dir.path(), Some(2)).unwrap();
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn test_empty_directory_is_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover_captures(dir.path(), None).unwrap_err();
        assert!(matches!(err, DatasetError::EmptyResult(_)));
    }

    #[test]
    fn test_unset_status_log_is_missing_precondition() {
        let config = DatasetConfig::default();
        let err = run(&config).err().unwrap();
        assert!(matches!(err, DatasetError::MissingPrecondition(_)));
    }
}

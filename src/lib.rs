//! Taxi telemetry labeling pipeline.
//!
//! Turns per-trip JSON captures plus an external status-change log into a
//! labeled, per-vehicle time-ordered tabular dataset with a train/test split.

pub mod config;
pub mod dataset;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod reconcile;
pub mod status_log;
pub mod stops;
pub mod summary;
pub mod timeline;
pub mod types;

pub use config::{BlinkerPolicy, DatasetConfig, LabelStrategy, MotionLayout, VehicleScope};
pub use error::{DatasetError, Result};
pub use pipeline::{run, PipelineOutput};

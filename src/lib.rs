//! Aggregates already-computed scholarship distribution results into a
//! student-centric matrix and a three-sheet spreadsheet export.

pub mod analyzer;
pub mod client;
pub mod export;
pub mod matrix;
pub mod models;
pub mod pipeline;
pub mod rejection;
pub mod rows;
pub mod telemetry;

pub use analyzer::{Aggregation, ApplicationFilter, DistributionAnalyzer};
pub use matrix::{contiguous_runs, ColumnRun};
pub use models::{normalize_application_id, Config, Locale};
pub use pipeline::{DistributionMatrix, MatrixCache, MatrixInputs};
pub use rows::{build_student_rows, Placement, PlacementKind, StudentRow};

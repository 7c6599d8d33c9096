use crate::analyzer::{Aggregation, ApplicationFilter, DistributionAnalyzer};
use crate::models::{Application, DistributionDetails, Locale, QuotaOverride, SubTypeTranslation};
use crate::rows::{build_student_rows, StudentRow};
use crate::matrix::{layout_rows, MatrixRow};
use std::collections::BTreeMap;
use tracing::debug;

/// Everything the derived matrix depends on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixInputs {
    pub details: DistributionDetails,
    pub applications: Vec<Application>,
    pub quota_overrides: BTreeMap<String, QuotaOverride>,
    pub translations: BTreeMap<String, SubTypeTranslation>,
    pub locale: Locale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DistributionMatrix {
    pub aggregation: Aggregation,
    pub rows: Vec<StudentRow>,
    pub matrix: Vec<MatrixRow>,
    pub filtered: bool,
}

impl DistributionMatrix {
    pub fn build(inputs: &MatrixInputs) -> Self {
        let details = &inputs.details;
        let filter =
            ApplicationFilter::from_applications(&inputs.applications, details.distribution_executed);

        let aggregation = DistributionAnalyzer::new(&details.sub_type_metadata)
            .with_overrides(&inputs.quota_overrides)
            .with_filter(filter.as_ref())
            .with_locale(inputs.locale)
            .aggregate(&details.distribution_summary, &details.rejected);

        let rows = build_student_rows(
            &inputs.applications,
            &aggregation,
            &inputs.translations,
            inputs.locale,
        );
        let matrix = layout_rows(&rows, &aggregation);

        debug!(
            sub_types = aggregation.sub_types.len(),
            rows = rows.len(),
            filtered = filter.is_some(),
            conflicts = aggregation.conflicts.len(),
            "built distribution matrix"
        );

        Self {
            aggregation,
            rows,
            matrix,
            filtered: filter.is_some(),
        }
    }

    /// No distribution data to show.
    pub fn is_empty(&self) -> bool {
        self.aggregation.is_empty()
    }
}

/// Keeps the last built matrix and rebuilds only when an input changed.
#[derive(Debug, Default)]
pub struct MatrixCache {
    entry: Option<(MatrixInputs, DistributionMatrix)>,
    builds: usize,
}

impl MatrixCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_build(&mut self, inputs: &MatrixInputs) -> &DistributionMatrix {
        let stale = self
            .entry
            .as_ref()
            .map_or(true, |(cached, _)| cached != inputs);

        if stale {
            self.entry = Some((inputs.clone(), DistributionMatrix::build(inputs)));
            self.builds += 1;
        }

        let (_, matrix) = self
            .entry
            .get_or_insert_with(|| (inputs.clone(), DistributionMatrix::build(inputs)));
        matrix
    }

    /// Number of times the matrix was actually rebuilt.
    pub fn builds(&self) -> usize {
        self.builds
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }
}

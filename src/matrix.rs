use crate::analyzer::Aggregation;
use crate::rows::StudentRow;
use serde::Serialize;

/// Inclusive range of adjacent matrix columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ColumnRun {
    pub start: usize,
    pub end: usize,
}

impl ColumnRun {
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn contains(&self, column: usize) -> bool {
        (self.start..=self.end).contains(&column)
    }
}

/// Group sorted, distinct column indices into maximal runs of consecutive values.
pub fn contiguous_runs(indices: &[usize]) -> Vec<ColumnRun> {
    let mut runs = Vec::new();
    let Some((&first, rest)) = indices.split_first() else {
        return runs;
    };

    let mut current = ColumnRun {
        start: first,
        end: first,
    };
    for &index in rest {
        if index == current.end + 1 {
            current.end = index;
        } else {
            runs.push(current);
            current = ColumnRun {
                start: index,
                end: index,
            };
        }
    }
    runs.push(current);

    runs
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MatrixCell {
    Admitted { college: String },
    Backup { position: Option<u32>, college: String },
    Eligible,
    NotEligible,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixRow {
    pub application_id: Option<u64>,
    pub cells: Vec<MatrixCell>,
    pub eligible_columns: Vec<usize>,
    pub eligibility_runs: Vec<ColumnRun>,
}

/// One matrix row per student row, one cell per sub-type column.
pub fn layout_rows(rows: &[StudentRow], aggregation: &Aggregation) -> Vec<MatrixRow> {
    rows.iter().map(|row| layout_row(row, aggregation)).collect()
}

fn layout_row(row: &StudentRow, aggregation: &Aggregation) -> MatrixRow {
    let mut eligible_columns: Vec<usize> = row
        .eligible_sub_types
        .iter()
        .filter_map(|code| aggregation.column_index(code))
        .collect();
    eligible_columns.sort_unstable();
    eligible_columns.dedup();

    let cells = aggregation
        .sub_types
        .iter()
        .enumerate()
        .map(|(column, code)| {
            if let Some(allocation) = row.allocation.as_ref().filter(|a| &a.sub_type == code) {
                return MatrixCell::Admitted {
                    college: allocation.college.clone(),
                };
            }
            if let Some(backup) = row.backups.iter().find(|b| &b.sub_type == code) {
                return MatrixCell::Backup {
                    position: backup.backup_position,
                    college: backup.college.clone(),
                };
            }
            if eligible_columns.binary_search(&column).is_ok() {
                MatrixCell::Eligible
            } else {
                MatrixCell::NotEligible
            }
        })
        .collect();

    let eligibility_runs = contiguous_runs(&eligible_columns);

    MatrixRow {
        application_id: row.application_id,
        cells,
        eligible_columns,
        eligibility_runs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DistributionAnalyzer;
    use crate::models::{Application, DistributionDetails, Locale};
    use crate::rows::build_student_rows;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn runs(pairs: &[(usize, usize)]) -> Vec<ColumnRun> {
        pairs
            .iter()
            .map(|&(start, end)| ColumnRun { start, end })
            .collect()
    }

    #[test]
    fn groups_consecutive_columns() {
        assert_eq!(
            contiguous_runs(&[1, 2, 3, 5, 6, 9]),
            runs(&[(1, 3), (5, 6), (9, 9)])
        );
    }

    #[test]
    fn singleton_and_empty_inputs() {
        assert_eq!(contiguous_runs(&[4]), runs(&[(4, 4)]));
        assert!(contiguous_runs(&[]).is_empty());
        assert_eq!(contiguous_runs(&[0, 1, 2]), runs(&[(0, 2)]));
    }

    #[test]
    fn runs_reconstruct_the_input() {
        let input = [0, 2, 3, 4, 7, 8, 10];
        let rebuilt: Vec<usize> = contiguous_runs(&input)
            .iter()
            .flat_map(|run| run.start..=run.end)
            .collect();
        assert_eq!(rebuilt, input);
        assert_eq!(contiguous_runs(&input)[1].len(), 3);
        assert!(contiguous_runs(&input)[1].contains(3));
    }

    #[test]
    fn lays_out_cells_per_sub_type_column() {
        let details: DistributionDetails = serde_json::from_value(json!({
            "distribution_summary": {
                "A": { "colleges": { "CS": {
                    "quota": 1,
                    "admitted": [{ "rank_position": 1, "application_id": 1 }]
                } } },
                "B": { "colleges": { "EE": {
                    "quota": 1,
                    "backup": [{ "rank_position": 2, "application_id": 2, "backup_position": 3 }]
                } } },
                "C": { "colleges": {} },
                "D": { "colleges": {} }
            }
        }))
        .expect("details parse");
        let apps: Vec<Application> = serde_json::from_value(json!([
            { "id": 1, "rank_position": 1, "eligible_subtypes": "A,B,D" },
            { "id": 2, "rank_position": 2, "eligible_subtypes": ["D", "B", "unknown"] }
        ]))
        .expect("applications parse");

        let aggregation = DistributionAnalyzer::new(&[])
            .aggregate(&details.distribution_summary, &details.rejected);
        let rows = build_student_rows(&apps, &aggregation, &BTreeMap::new(), Locale::En);
        let matrix = layout_rows(&rows, &aggregation);

        assert_eq!(
            matrix[0].cells,
            vec![
                MatrixCell::Admitted { college: "CS".to_string() },
                MatrixCell::Eligible,
                MatrixCell::NotEligible,
                MatrixCell::Eligible,
            ]
        );
        assert_eq!(matrix[0].eligibility_runs, runs(&[(0, 1), (3, 3)]));

        assert_eq!(matrix[1].eligible_columns, vec![1, 3]);
        assert_eq!(
            matrix[1].cells[1],
            MatrixCell::Backup {
                position: Some(3),
                college: "EE".to_string()
            }
        );
        assert_eq!(matrix[1].eligibility_runs, runs(&[(1, 1), (3, 3)]));
    }
}

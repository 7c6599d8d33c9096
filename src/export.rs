use crate::analyzer::{fallback_label, Aggregation};
use crate::models::{normalize_rank, DistributionDetails, Locale};
use crate::rows::{Placement, PlacementKind, StudentRow};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use regex::Regex;
use rust_xlsxwriter::{Format, Workbook};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{info, warn};

pub const OVERVIEW_CSV: &str = "overview.csv";
pub const DETAILS_CSV: &str = "details.csv";
pub const REJECTED_CSV: &str = "rejected.csv";

/// What a column holds; decides its fixed width in the workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnPurpose {
    MetricLabel,
    MetricValue,
    Rank,
    Name,
    StudentId,
    TermCount,
    SubTypeList,
    AllocationType,
    SubType,
    Positions,
    Reason,
}

impl ColumnPurpose {
    pub const fn width(self) -> f64 {
        match self {
            ColumnPurpose::MetricLabel => 28.0,
            ColumnPurpose::MetricValue => 18.0,
            ColumnPurpose::Rank => 8.0,
            ColumnPurpose::Name => 14.0,
            ColumnPurpose::StudentId => 14.0,
            ColumnPurpose::TermCount => 10.0,
            ColumnPurpose::SubTypeList => 36.0,
            ColumnPurpose::AllocationType => 14.0,
            ColumnPurpose::SubType => 20.0,
            ColumnPurpose::Positions => 14.0,
            ColumnPurpose::Reason => 40.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub header: String,
    pub purpose: ColumnPurpose,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Empty,
}

impl Cell {
    fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }

    fn count(value: impl Into<f64>) -> Self {
        Cell::Number(value.into())
    }

    fn optional(value: Option<u32>) -> Self {
        value
            .map(|v| Cell::Number(f64::from(v)))
            .unwrap_or(Cell::Empty)
    }

    pub fn to_text(&self) -> String {
        match self {
            Cell::Text(text) => text.clone(),
            Cell::Number(number) => number.to_string(),
            Cell::Empty => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub title: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    fn new(title: &str, columns: &[(&str, ColumnPurpose)]) -> Self {
        Self {
            title: title.to_string(),
            columns: columns
                .iter()
                .map(|&(header, purpose)| Column {
                    header: header.to_string(),
                    purpose,
                })
                .collect(),
            rows: Vec::new(),
        }
    }

    pub fn headers(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.header.as_str()).collect()
    }
}

/// The three sheets of one distribution export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportWorkbook {
    pub overview: Sheet,
    pub details: Sheet,
    pub rejected: Sheet,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportOutcome {
    Written(PathBuf),
    Skipped(String),
}

pub struct ExportSerializer {
    locale: Locale,
}

impl ExportSerializer {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    /// Notice explaining why nothing can be exported, if that is the case.
    pub fn skip_reason(&self, aggregation: &Aggregation, rows: &[StudentRow]) -> Option<String> {
        if rows.is_empty() {
            Some(self.text("沒有可匯出的學生資料", "No student rows to export").to_string())
        } else if aggregation.is_empty() {
            Some(self.text("沒有分配子類別資料", "No sub-type data to export").to_string())
        } else {
            None
        }
    }

    pub fn build(
        &self,
        details: &DistributionDetails,
        aggregation: &Aggregation,
        rows: &[StudentRow],
    ) -> ExportWorkbook {
        ExportWorkbook {
            overview: self.overview(details, aggregation, rows),
            details: self.details(aggregation, rows),
            rejected: self.rejected(details),
        }
    }

    pub fn overview(
        &self,
        details: &DistributionDetails,
        aggregation: &Aggregation,
        rows: &[StudentRow],
    ) -> Sheet {
        let mut sheet = Sheet::new(
            self.text("分配概覽", "Overview"),
            &[
                (self.text("項目", "Item"), ColumnPurpose::MetricLabel),
                (self.text("數值", "Value"), ColumnPurpose::MetricValue),
            ],
        );

        let mut admitted = 0u32;
        let mut backup = 0u32;
        for row in rows {
            match row.placement().kind() {
                PlacementKind::Admitted => admitted += 1,
                PlacementKind::Backup => backup += 1,
                PlacementKind::NotAllocated | PlacementKind::Pending => {}
            }
        }
        let total_rows = u32::try_from(rows.len()).unwrap_or(u32::MAX);
        let not_allocated = total_rows.saturating_sub(admitted + backup);
        let total_applications = if details.total_applications > 0 {
            details.total_applications
        } else {
            u64::from(total_rows)
        };

        let mut metric = |label: String, value: Cell| sheet.rows.push(vec![Cell::Text(label), value]);

        metric(
            self.text("排名名稱", "Ranking").to_string(),
            Cell::text(ranking_display_name(details)),
        );
        metric(
            self.text("申請總數", "Total Applications").to_string(),
            Cell::count(total_applications as f64),
        );
        metric(self.text("正取人數", "Admitted").to_string(), Cell::count(admitted));
        metric(self.text("備取人數", "Backup").to_string(), Cell::count(backup));
        metric(
            self.text("未分配人數", "Not Allocated").to_string(),
            Cell::count(not_allocated),
        );
        metric(
            self.text("分配成功率", "Success Rate").to_string(),
            Cell::text(success_rate(admitted, total_applications)),
        );

        for code in &aggregation.sub_types {
            let label = self.sub_type_label(aggregation, code);
            metric(
                format!("{} {}", label, self.text("名額", "Quota")),
                Cell::count(aggregation.quota(code)),
            );
            metric(
                format!("{} {}", label, self.text("正取", "Admitted")),
                Cell::count(aggregation.admitted_count(code)),
            );
            let backup_count = aggregation.backup_count(code);
            if backup_count > 0 {
                metric(
                    format!("{} {}", label, self.text("備取", "Backup")),
                    Cell::count(backup_count),
                );
            }
        }

        sheet
    }

    pub fn details(&self, aggregation: &Aggregation, rows: &[StudentRow]) -> Sheet {
        let mut sheet = Sheet::new(
            self.text("詳細清單", "Details"),
            &[
                (self.text("排名", "Rank"), ColumnPurpose::Rank),
                (self.text("姓名", "Name"), ColumnPurpose::Name),
                (self.text("學號", "Student ID"), ColumnPurpose::StudentId),
                (self.text("修業學期數", "Terms"), ColumnPurpose::TermCount),
                (self.text("可申請子類別", "Eligible Sub-types"), ColumnPurpose::SubTypeList),
                (self.text("分配結果", "Allocation Type"), ColumnPurpose::AllocationType),
                (self.text("分配子類別", "Allocated Sub-type"), ColumnPurpose::SubType),
                (self.text("備取子類別", "Backup Sub-types"), ColumnPurpose::SubTypeList),
                (self.text("備取順位", "Backup Positions"), ColumnPurpose::Positions),
            ],
        );

        for row in rows {
            let placement = row.placement();
            let allocated = match placement {
                Placement::Admitted(allocation) => self.sub_type_label(aggregation, &allocation.sub_type),
                _ => String::new(),
            };
            let (backup_labels, backup_positions) = match placement {
                Placement::Backup(backups) => (
                    backups
                        .iter()
                        .map(|b| self.sub_type_label(aggregation, &b.sub_type))
                        .collect::<Vec<_>>()
                        .join(", "),
                    backups
                        .iter()
                        .map(|b| {
                            b.backup_position
                                .map(|p| p.to_string())
                                .unwrap_or_else(|| "-".to_string())
                        })
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
                _ => (String::new(), String::new()),
            };

            sheet.rows.push(vec![
                Cell::optional(row.rank),
                Cell::text(row.student_name.as_str()),
                Cell::text(row.student_id.as_str()),
                Cell::optional(row.term_count),
                Cell::text(row.eligible_labels.join(", ")),
                Cell::text(placement.kind().label(self.locale)),
                Cell::text(allocated),
                Cell::text(backup_labels),
                Cell::text(backup_positions),
            ]);
        }

        sheet
    }

    pub fn rejected(&self, details: &DistributionDetails) -> Sheet {
        let mut sheet = Sheet::new(
            self.text("駁回清單", "Rejected"),
            &[
                (self.text("排名", "Rank"), ColumnPurpose::Rank),
                (self.text("姓名", "Name"), ColumnPurpose::Name),
                (self.text("學號", "Student ID"), ColumnPurpose::StudentId),
                (self.text("駁回原因", "Reason"), ColumnPurpose::Reason),
            ],
        );

        for entry in &details.rejected {
            sheet.rows.push(vec![
                Cell::optional(normalize_rank(&entry.rank_position)),
                Cell::text(entry.student_name.as_str()),
                Cell::text(entry.student_id.as_str()),
                Cell::text(entry.reason.as_str()),
            ]);
        }

        sheet
    }

    /// File name built from the ranking name and the export date.
    pub fn file_name(&self, details: &DistributionDetails, date: NaiveDate) -> String {
        format!(
            "{}_{}_{}.xlsx",
            safe_file_stem(&ranking_display_name(details)),
            self.text("分配結果", "distribution"),
            date.format("%Y-%m-%d")
        )
    }

    fn sub_type_label(&self, aggregation: &Aggregation, code: &str) -> String {
        aggregation
            .label(code, self.locale)
            .map(str::to_string)
            .unwrap_or_else(|| fallback_label(code))
    }

    fn text(&self, zh: &'static str, en: &'static str) -> &'static str {
        self.locale.pick(zh, en)
    }
}

impl ExportWorkbook {
    pub fn sheets(&self) -> [&Sheet; 3] {
        [&self.overview, &self.details, &self.rejected]
    }

    pub fn to_xlsx_buffer(&self) -> Result<Vec<u8>> {
        let mut workbook = self.to_workbook()?;
        let buffer = workbook
            .save_to_buffer()
            .context("Failed to serialize workbook")?;
        Ok(buffer)
    }

    pub fn write_xlsx(&self, path: &Path) -> Result<()> {
        let mut workbook = self.to_workbook()?;
        workbook
            .save(path)
            .with_context(|| format!("Failed to write workbook: {}", path.display()))?;
        Ok(())
    }

    fn to_workbook(&self) -> Result<Workbook> {
        let mut workbook = Workbook::new();
        let header_format = Format::new().set_bold();

        for sheet in self.sheets() {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(sheet.title.as_str())?;

            for (col, column) in sheet.columns.iter().enumerate() {
                let col = u16::try_from(col).context("Too many columns")?;
                worksheet.set_column_width(col, column.purpose.width())?;
                worksheet.write_string_with_format(0, col, column.header.as_str(), &header_format)?;
            }

            for (r, cells) in sheet.rows.iter().enumerate() {
                let row = u32::try_from(r + 1).context("Too many rows")?;
                for (c, cell) in cells.iter().enumerate() {
                    let col = u16::try_from(c).context("Too many columns")?;
                    match cell {
                        Cell::Text(text) => {
                            worksheet.write_string(row, col, text.as_str())?;
                        }
                        Cell::Number(number) => {
                            worksheet.write_number(row, col, *number)?;
                        }
                        Cell::Empty => {}
                    }
                }
            }
        }

        Ok(workbook)
    }

    /// Write one CSV per sheet into `output_dir`.
    pub fn write_csv(&self, output_dir: &Path) -> Result<Vec<PathBuf>> {
        let targets = [
            (&self.overview, OVERVIEW_CSV),
            (&self.details, DETAILS_CSV),
            (&self.rejected, REJECTED_CSV),
        ];

        let mut written = Vec::with_capacity(targets.len());
        for (sheet, file_name) in targets {
            let path = output_dir.join(file_name);
            write_sheet_csv(sheet, &path)?;
            written.push(path);
        }
        Ok(written)
    }
}

pub fn write_sheet_csv(sheet: &Sheet, path: &Path) -> Result<()> {
    use csv::Writer;

    let mut writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;

    writer.write_record(sheet.headers())?;
    for row in &sheet.rows {
        writer.write_record(row.iter().map(Cell::to_text))?;
    }

    writer.flush()?;
    Ok(())
}

/// A details row read back from its CSV export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRecord {
    pub rank: Option<u32>,
    pub student_name: String,
    pub student_id: String,
    pub placement: Option<PlacementKind>,
}

pub fn read_details_csv(path: &Path, locale: Locale) -> Result<Vec<DetailRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |index: usize| record.get(index).unwrap_or("").to_string();

        records.push(DetailRecord {
            rank: field(0).trim().parse::<u32>().ok(),
            student_name: field(1),
            student_id: field(2),
            placement: PlacementKind::from_label(&field(5), locale),
        });
    }
    Ok(records)
}

/// Build and write the workbook plus CSV copies, unless there is nothing to export.
pub fn export_distribution(
    output_dir: &Path,
    details: &DistributionDetails,
    aggregation: &Aggregation,
    rows: &[StudentRow],
    locale: Locale,
    date: NaiveDate,
) -> Result<ExportOutcome> {
    let serializer = ExportSerializer::new(locale);
    if let Some(notice) = serializer.skip_reason(aggregation, rows) {
        warn!(%notice, "export skipped");
        return Ok(ExportOutcome::Skipped(notice));
    }

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {}", output_dir.display()))?;

    let workbook = serializer.build(details, aggregation, rows);
    let path = output_dir.join(serializer.file_name(details, date));
    workbook.write_xlsx(&path)?;
    workbook.write_csv(output_dir)?;

    info!(path = %path.display(), rows = rows.len(), "exported distribution workbook");
    Ok(ExportOutcome::Written(path))
}

pub fn ranking_display_name(details: &DistributionDetails) -> String {
    match details.ranking_name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => match &details.ranking_id {
            serde_json::Value::Null => "ranking".to_string(),
            serde_json::Value::String(id) => format!("ranking_{}", id),
            other => format!("ranking_{}", other),
        },
    }
}

fn success_rate(admitted: u32, total: u64) -> String {
    if total == 0 {
        return "0.0%".to_string();
    }
    format!("{:.1}%", f64::from(admitted) / total as f64 * 100.0)
}

fn safe_file_stem(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let pattern = UNSAFE.get_or_init(|| {
        Regex::new(r#"[\\/:*?"<>|\s]+"#).expect("file name pattern is valid")
    });
    pattern.replace_all(name.trim(), "_").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DistributionAnalyzer;
    use crate::models::Application;
    use crate::rows::build_student_rows;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn fixture() -> (DistributionDetails, Aggregation, Vec<StudentRow>) {
        let details: DistributionDetails = serde_json::from_value(json!({
            "ranking_id": 12,
            "ranking_name": "113 學年度 / 博士生",
            "distribution_executed": true,
            "total_allocated": 1,
            "total_applications": 4,
            "distribution_summary": {
                "nstc": {
                    "label": "國科會", "label_en": "NSTC",
                    "colleges": { "CS": {
                        "quota": 1,
                        "admitted": [{ "rank_position": 1, "application_id": 1, "student_name": "甲" }],
                        "backup": [{ "rank_position": 2, "application_id": 2, "backup_position": 1, "student_name": "乙" }]
                    } }
                },
                "moe_1w": {
                    "colleges": { "EE": {
                        "quota": 2,
                        "backup": [{ "rank_position": 2, "application_id": 2, "student_name": "乙" }]
                    } }
                }
            },
            "rejected": [
                { "rank_position": 3, "application_id": 3, "student_name": "丙", "student_id": "s3", "reason": "名額已滿" }
            ]
        }))
        .expect("details parse");
        let apps: Vec<Application> = serde_json::from_value(json!([
            { "id": 2, "rank_position": 2, "student_name": "乙", "student_id": "s2", "eligible_subtypes": ["nstc", "moe_1w"] },
            { "id": 1, "rank_position": 1, "student_name": "甲", "student_id": "s1", "eligible_subtypes": ["nstc"], "term_count": 4 },
            { "id": 4, "rank_position": null, "student_name": "丁", "student_id": "s4" },
            { "id": 3, "rank_position": 3, "student_name": "丙", "student_id": "s3", "eligible_subtypes": "nstc" }
        ]))
        .expect("applications parse");

        let aggregation = DistributionAnalyzer::new(&details.sub_type_metadata)
            .aggregate(&details.distribution_summary, &details.rejected);
        let rows = build_student_rows(&apps, &aggregation, &BTreeMap::new(), Locale::En);
        (details, aggregation, rows)
    }

    fn text_column(sheet: &Sheet, column: usize) -> Vec<String> {
        sheet.rows.iter().map(|row| row[column].to_text()).collect()
    }

    #[test]
    fn overview_lists_metrics_then_sub_types() {
        let (details, aggregation, rows) = fixture();
        let sheet = ExportSerializer::new(Locale::En).overview(&details, &aggregation, &rows);

        assert_eq!(sheet.title, "Overview");
        assert_eq!(
            text_column(&sheet, 0),
            vec![
                "Ranking",
                "Total Applications",
                "Admitted",
                "Backup",
                "Not Allocated",
                "Success Rate",
                "NSTC Quota",
                "NSTC Admitted",
                "NSTC Backup",
                "MOE 1W Quota",
                "MOE 1W Admitted",
                "MOE 1W Backup",
            ]
        );
        assert_eq!(
            text_column(&sheet, 1),
            vec!["113 學年度 / 博士生", "4", "1", "1", "2", "25.0%", "1", "1", "1", "2", "0", "1"]
        );
    }

    #[test]
    fn overview_omits_backup_line_when_sub_type_has_none() {
        let (details, mut aggregation, rows) = fixture();
        aggregation.backup_counts.insert("moe_1w".to_string(), 0);
        let sheet = ExportSerializer::new(Locale::Zh).overview(&details, &aggregation, &rows);

        assert_eq!(sheet.title, "分配概覽");
        let labels = text_column(&sheet, 0);
        assert!(labels.contains(&"國科會 備取".to_string()));
        assert!(!labels.iter().any(|label| label.starts_with("MOE 1W 備取")));
    }

    #[test]
    fn details_rows_carry_placement_columns() {
        let (_, aggregation, rows) = fixture();
        let sheet = ExportSerializer::new(Locale::En).details(&aggregation, &rows);

        assert_eq!(sheet.title, "Details");
        assert_eq!(sheet.rows.len(), 4);
        assert_eq!(text_column(&sheet, 0), vec!["1", "2", "3", ""]);
        assert_eq!(text_column(&sheet, 3), vec!["4", "", "", ""]);
        assert_eq!(
            text_column(&sheet, 5),
            vec!["Admitted", "Backup", "Not Allocated", "Pending"]
        );
        assert_eq!(sheet.rows[0][6].to_text(), "NSTC");
        assert_eq!(sheet.rows[1][4].to_text(), "NSTC, MOE 1W");
        assert_eq!(sheet.rows[1][7].to_text(), "NSTC, MOE 1W");
        assert_eq!(sheet.rows[1][8].to_text(), "1, -");
    }

    #[test]
    fn rejected_sheet_keeps_raw_reason() {
        let (details, _, _) = fixture();
        let sheet = ExportSerializer::new(Locale::Zh).rejected(&details);

        assert_eq!(sheet.title, "駁回清單");
        assert_eq!(sheet.headers(), vec!["排名", "姓名", "學號", "駁回原因"]);
        assert_eq!(
            sheet.rows[0].iter().map(Cell::to_text).collect::<Vec<_>>(),
            vec!["3", "丙", "s3", "名額已滿"]
        );
    }

    #[test]
    fn skips_export_without_rows_or_sub_types() {
        let (_, aggregation, rows) = fixture();
        let serializer = ExportSerializer::new(Locale::En);

        assert!(serializer.skip_reason(&aggregation, &rows).is_none());
        assert!(serializer.skip_reason(&aggregation, &[]).is_some());
        assert!(serializer
            .skip_reason(&Aggregation::default(), &rows)
            .is_some());
    }

    #[test]
    fn file_name_replaces_unsafe_characters() {
        let (details, _, _) = fixture();
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).expect("valid date");

        assert_eq!(
            ExportSerializer::new(Locale::En).file_name(&details, date),
            "113_學年度_博士生_distribution_2026-03-01.xlsx"
        );

        let unnamed = DistributionDetails {
            ranking_id: json!(7),
            ..DistributionDetails::default()
        };
        assert_eq!(
            ExportSerializer::new(Locale::Zh).file_name(&unnamed, date),
            "ranking_7_分配結果_2026-03-01.xlsx"
        );
    }

    #[test]
    fn workbook_serializes_to_xlsx_bytes() {
        let (details, aggregation, rows) = fixture();
        let workbook = ExportSerializer::new(Locale::Zh).build(&details, &aggregation, &rows);
        let bytes = workbook.to_xlsx_buffer().expect("xlsx buffer");

        // xlsx files are zip archives
        assert!(bytes.starts_with(b"PK"));
    }
}

use crate::analyzer::{fallback_label, Aggregation, AllocationEntry, BackupEntry, RejectionInfo};
use crate::models::{normalize_rank, Application, Locale, SubTypeTranslation};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Alternate field names carrying the number of enrolled terms, checked in order.
const TERM_COUNT_FIELDS: &[&str] = &[
    "term_count",
    "terms",
    "term",
    "semester_count",
    "semesters",
    "study_terms",
];

const VERIFIED_STATUSES: &[&str] = &[
    "approved",
    "completed",
    "allocated",
    "finalized",
    "admitted",
    "college_reviewed",
];

const REJECTED_STATUSES: &[&str] = &[
    "rejected",
    "returned",
    "withdrawn",
    "cancelled",
    "ineligible",
    "not_eligible",
    "unqualified",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
    Verified,
    Rejected,
    Pending,
}

impl StatusBucket {
    pub fn from_status(status: Option<&str>) -> Self {
        let Some(status) = status else {
            return StatusBucket::Pending;
        };
        let status = status.trim().to_ascii_lowercase();

        if VERIFIED_STATUSES.contains(&status.as_str()) {
            StatusBucket::Verified
        } else if REJECTED_STATUSES.contains(&status.as_str()) {
            StatusBucket::Rejected
        } else {
            StatusBucket::Pending
        }
    }

    pub fn badge(self, locale: Locale) -> StatusBadge {
        let (label, color, icon) = match self {
            StatusBucket::Verified => (locale.pick("已審核", "Verified"), "green", "check-circle"),
            StatusBucket::Rejected => (locale.pick("未通過", "Rejected"), "red", "x-circle"),
            StatusBucket::Pending => (locale.pick("待審核", "Pending"), "amber", "clock"),
        };
        StatusBadge {
            bucket: self,
            label,
            color,
            icon,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusBadge {
    pub bucket: StatusBucket,
    pub label: &'static str,
    pub color: &'static str,
    pub icon: &'static str,
}

/// One student of the ranked list joined with the distribution outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRow {
    pub application_id: Option<u64>,
    pub rank: Option<u32>,
    pub student_name: String,
    pub student_id: String,
    pub term_count: Option<u32>,
    pub eligible_sub_types: Vec<String>,
    pub eligible_labels: Vec<String>,
    pub allocation: Option<AllocationEntry>,
    pub backups: Vec<BackupEntry>,
    pub rejection: Option<RejectionInfo>,
    pub status: StatusBadge,
}

/// Outcome of a row, checked as allocation, then backups, then rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement<'a> {
    Admitted(&'a AllocationEntry),
    Backup(&'a [BackupEntry]),
    NotAllocated(&'a RejectionInfo),
    Pending,
}

impl<'a> Placement<'a> {
    pub fn kind(&self) -> PlacementKind {
        match self {
            Placement::Admitted(_) => PlacementKind::Admitted,
            Placement::Backup(_) => PlacementKind::Backup,
            Placement::NotAllocated(_) => PlacementKind::NotAllocated,
            Placement::Pending => PlacementKind::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementKind {
    Admitted,
    Backup,
    NotAllocated,
    Pending,
}

impl PlacementKind {
    pub const ALL: [PlacementKind; 4] = [
        PlacementKind::Admitted,
        PlacementKind::Backup,
        PlacementKind::NotAllocated,
        PlacementKind::Pending,
    ];

    pub fn label(self, locale: Locale) -> &'static str {
        match self {
            PlacementKind::Admitted => locale.pick("正取", "Admitted"),
            PlacementKind::Backup => locale.pick("備取", "Backup"),
            PlacementKind::NotAllocated => locale.pick("未分配", "Not Allocated"),
            PlacementKind::Pending => locale.pick("待定", "Pending"),
        }
    }

    pub fn from_label(label: &str, locale: Locale) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|kind| kind.label(locale) == label)
    }
}

impl StudentRow {
    pub fn placement(&self) -> Placement<'_> {
        if let Some(allocation) = &self.allocation {
            Placement::Admitted(allocation)
        } else if !self.backups.is_empty() {
            Placement::Backup(&self.backups)
        } else if let Some(rejection) = &self.rejection {
            Placement::NotAllocated(rejection)
        } else {
            Placement::Pending
        }
    }
}

/// Build one row per application, sorted by rank with unranked rows last.
pub fn build_student_rows(
    applications: &[Application],
    aggregation: &Aggregation,
    translations: &BTreeMap<String, SubTypeTranslation>,
    locale: Locale,
) -> Vec<StudentRow> {
    let mut rows: Vec<StudentRow> = applications
        .iter()
        .map(|application| build_row(application, aggregation, translations, locale))
        .collect();

    rows.sort_by_key(|row| (row.rank.is_none(), row.rank));
    rows
}

fn build_row(
    application: &Application,
    aggregation: &Aggregation,
    translations: &BTreeMap<String, SubTypeTranslation>,
    locale: Locale,
) -> StudentRow {
    let application_id = application.normalized_id();
    let eligible_sub_types = parse_eligible_subtypes(&application.eligible_subtypes);
    let eligible_labels = eligible_sub_types
        .iter()
        .map(|code| sub_type_label(code, aggregation, translations, locale))
        .collect();

    let (allocation, backups, rejection) = match application_id {
        Some(id) => (
            aggregation.allocation(id).cloned(),
            aggregation.backups(id).to_vec(),
            aggregation.rejection(id).cloned(),
        ),
        None => (None, Vec::new(), None),
    };

    StudentRow {
        application_id,
        rank: application.rank(),
        student_name: application.student_name.clone(),
        student_id: application.student_id.clone(),
        term_count: term_count(application),
        eligible_sub_types,
        eligible_labels,
        allocation,
        backups,
        rejection,
        status: StatusBucket::from_status(application.review_state()).badge(locale),
    }
}

/// Eligible sub-type codes from an array of strings, an array of objects, or a
/// comma-separated string. Duplicates are dropped keeping first-seen order.
pub fn parse_eligible_subtypes(value: &Value) -> Vec<String> {
    let candidates: Vec<String> = match value {
        Value::String(text) => text.split(',').map(str::to_string).collect(),
        Value::Array(items) => items.iter().filter_map(item_code).collect(),
        _ => Vec::new(),
    };

    let mut codes: Vec<String> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let code = candidate.trim();
        if !code.is_empty() && !codes.iter().any(|existing| existing == code) {
            codes.push(code.to_string());
        }
    }
    codes
}

fn item_code(item: &Value) -> Option<String> {
    match item {
        Value::String(code) => Some(code.clone()),
        Value::Object(fields) => ["code", "value", "label"]
            .iter()
            .filter_map(|key| fields.get(*key))
            .find_map(|field| match field {
                Value::String(code) if !code.trim().is_empty() => Some(code.clone()),
                _ => None,
            }),
        _ => None,
    }
}

/// Label from the aggregation, then the translation table, then the code itself.
pub fn sub_type_label(
    code: &str,
    aggregation: &Aggregation,
    translations: &BTreeMap<String, SubTypeTranslation>,
    locale: Locale,
) -> String {
    if let Some(label) = aggregation.label(code, locale) {
        return label.to_string();
    }

    let translation = translations
        .get(code)
        .or_else(|| translations.get(&code.to_lowercase()));
    let translated = translation.and_then(|t| match locale {
        Locale::Zh => t.label.as_deref(),
        Locale::En => t.label_en.as_deref(),
    });

    match translated {
        Some(label) if !label.trim().is_empty() => label.to_string(),
        _ => fallback_label(code),
    }
}

fn term_count(application: &Application) -> Option<u32> {
    TERM_COUNT_FIELDS
        .iter()
        .filter_map(|field| application.extra.get(*field))
        .find_map(normalize_rank)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::DistributionAnalyzer;
    use crate::models::DistributionDetails;
    use serde_json::json;

    fn applications(value: serde_json::Value) -> Vec<Application> {
        serde_json::from_value(value).expect("applications parse")
    }

    fn scenario() -> (DistributionDetails, Vec<Application>) {
        let details: DistributionDetails = serde_json::from_value(json!({
            "distribution_executed": true,
            "total_allocated": 1,
            "distribution_summary": {
                "A": { "colleges": { "CS": {
                    "quota": 2,
                    "admitted": [{ "rank_position": 1, "application_id": 101, "student_name": "X" }],
                    "backup": [{ "rank_position": 2, "application_id": 102, "backup_position": 1, "student_name": "Y" }]
                } } }
            }
        }))
        .expect("details parse");

        let apps = applications(json!([
            { "id": 101, "rank_position": 1, "eligible_subtypes": ["A"], "student_name": "X" },
            { "id": 102, "rank_position": 2, "eligible_subtypes": ["A"], "student_name": "Y" },
            { "id": 103, "rank_position": 3, "eligible_subtypes": ["A"], "student_name": "Z" }
        ]));

        (details, apps)
    }

    #[test]
    fn pending_row_for_student_without_outcome() {
        let (details, apps) = scenario();
        let aggregation = DistributionAnalyzer::new(&details.sub_type_metadata)
            .aggregate(&details.distribution_summary, &details.rejected);
        let rows = build_student_rows(&apps, &aggregation, &BTreeMap::new(), Locale::En);

        assert_eq!(aggregation.admitted_count("A"), 1);
        assert_eq!(aggregation.backup_count("A"), 1);

        let row = rows
            .iter()
            .find(|row| row.application_id == Some(103))
            .expect("row 103 present");
        assert!(row.allocation.is_none());
        assert!(row.backups.is_empty());
        assert_eq!(row.eligible_sub_types, vec!["A"]);
        assert_eq!(row.placement(), Placement::Pending);

        assert_eq!(rows[0].placement().kind(), PlacementKind::Admitted);
        assert_eq!(rows[1].placement().kind(), PlacementKind::Backup);
    }

    #[test]
    fn unranked_rows_sort_last_regardless_of_input_order() {
        let (details, _) = scenario();
        let aggregation = DistributionAnalyzer::new(&details.sub_type_metadata)
            .aggregate(&details.distribution_summary, &details.rejected);
        let apps = applications(json!([
            { "id": 1, "rank_position": null, "student_name": "none-1" },
            { "id": 2, "rank_position": 7 },
            { "id": 3 },
            { "id": 4, "rank_position": "2" },
            { "id": 5, "rank_position": 4294967295u64 }
        ]));

        let rows = build_student_rows(&apps, &aggregation, &BTreeMap::new(), Locale::Zh);
        let ranks: Vec<Option<u32>> = rows.iter().map(|row| row.rank).collect();
        assert_eq!(ranks, vec![Some(2), Some(7), Some(u32::MAX), None, None]);
        assert_eq!(rows[3].student_name, "none-1");
    }

    #[test]
    fn parses_every_eligibility_shape() {
        assert_eq!(parse_eligible_subtypes(&json!(["a", "b", "a"])), vec!["a", "b"]);
        assert_eq!(parse_eligible_subtypes(&json!(" a, b ,,c ")), vec!["a", "b", "c"]);
        assert_eq!(
            parse_eligible_subtypes(&json!([
                { "code": "nstc" },
                { "value": "moe_1w", "label": "MOE" },
                { "label": "moe_2w" },
                { "code": "" , "value": "other" },
                42
            ])),
            vec!["nstc", "moe_1w", "moe_2w", "other"]
        );
        assert!(parse_eligible_subtypes(&Value::Null).is_empty());
        assert!(parse_eligible_subtypes(&json!(12)).is_empty());
        assert!(parse_eligible_subtypes(&json!({ "code": "nstc" })).is_empty());
    }

    #[test]
    fn labels_fall_through_translations_to_code() {
        let aggregation = Aggregation::default();
        let mut translations = BTreeMap::new();
        translations.insert(
            "nstc".to_string(),
            SubTypeTranslation {
                label: Some("國科會".to_string()),
                label_en: None,
            },
        );

        assert_eq!(sub_type_label("NSTC", &aggregation, &translations, Locale::Zh), "國科會");
        assert_eq!(sub_type_label("nstc", &aggregation, &translations, Locale::En), "NSTC");
        assert_eq!(sub_type_label("moe_1w", &aggregation, &translations, Locale::Zh), "MOE 1W");
    }

    #[test]
    fn status_buckets() {
        assert_eq!(StatusBucket::from_status(Some("College_Reviewed")), StatusBucket::Verified);
        assert_eq!(StatusBucket::from_status(Some("withdrawn")), StatusBucket::Rejected);
        assert_eq!(StatusBucket::from_status(Some("submitted")), StatusBucket::Pending);
        assert_eq!(StatusBucket::from_status(None), StatusBucket::Pending);

        let badge = StatusBucket::Verified.badge(Locale::En);
        assert_eq!((badge.label, badge.color, badge.icon), ("Verified", "green", "check-circle"));
        assert_eq!(StatusBucket::Pending.badge(Locale::Zh).label, "待審核");
    }

    #[test]
    fn rejected_row_is_not_allocated_and_term_count_uses_first_known_field() {
        let details: DistributionDetails = serde_json::from_value(json!({
            "distribution_summary": { "A": { "colleges": {} } },
            "rejected": [{ "application_id": 7, "rank_position": 1, "reason": "不符資格" }]
        }))
        .expect("details parse");
        let aggregation = DistributionAnalyzer::new(&[])
            .aggregate(&details.distribution_summary, &details.rejected);
        let apps = applications(json!([
            { "id": "7", "rank_position": 1, "semesters": "5", "terms": "x", "study_terms": 8 }
        ]));

        let rows = build_student_rows(&apps, &aggregation, &BTreeMap::new(), Locale::En);
        assert!(matches!(rows[0].placement(), Placement::NotAllocated(info) if info.reason == "不符資格"));
        assert_eq!(rows[0].term_count, Some(5));
    }

    #[test]
    fn placement_labels_round_trip_per_locale() {
        for locale in [Locale::Zh, Locale::En] {
            for kind in PlacementKind::ALL {
                assert_eq!(PlacementKind::from_label(kind.label(locale), locale), Some(kind));
            }
        }
        assert_eq!(PlacementKind::from_label("Admitted", Locale::Zh), None);
    }
}

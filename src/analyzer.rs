use crate::models::{
    coerce_quota, normalize_application_id, normalize_rank, numeric_value, Application,
    Backup, CollegeSummary, Locale, OrderedEntries, QuotaOverride, RejectedEntry, SubTypeMeta,
    SubTypeSummary,
};
use crate::rejection::{classify_rejection, RejectionClass};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, warn};

/// Where an application was admitted. At most one per application id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationEntry {
    pub sub_type: String,
    pub college: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub sub_type: String,
    pub backup_position: Option<u32>,
    pub college: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionInfo {
    pub reason: String,
    pub rank: Option<u32>,
    pub classification: RejectionClass,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubTypeLabel {
    pub label: String,
    pub label_en: String,
}

impl SubTypeLabel {
    pub fn display(&self, locale: Locale) -> &str {
        locale.pick(&self.label, &self.label_en)
    }
}

/// A second admitted entry seen for an application that already holds an allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AllocationConflict {
    pub application_id: u64,
    pub kept: AllocationEntry,
    pub ignored: AllocationEntry,
}

/// Lookups and counters derived from one distribution summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregation {
    pub sub_types: Vec<String>,
    pub labels: HashMap<String, SubTypeLabel>,
    pub quotas: HashMap<String, u32>,
    pub admitted_counts: HashMap<String, u32>,
    pub backup_counts: HashMap<String, u32>,
    pub allocations: HashMap<u64, AllocationEntry>,
    pub backups: HashMap<u64, Vec<BackupEntry>>,
    pub rejections: HashMap<u64, RejectionInfo>,
    pub conflicts: Vec<AllocationConflict>,
}

impl Aggregation {
    pub fn is_empty(&self) -> bool {
        self.sub_types.is_empty()
    }

    pub fn quota(&self, sub_type: &str) -> u32 {
        self.quotas.get(sub_type).copied().unwrap_or(0)
    }

    pub fn admitted_count(&self, sub_type: &str) -> u32 {
        self.admitted_counts.get(sub_type).copied().unwrap_or(0)
    }

    pub fn backup_count(&self, sub_type: &str) -> u32 {
        self.backup_counts.get(sub_type).copied().unwrap_or(0)
    }

    pub fn label(&self, sub_type: &str, locale: Locale) -> Option<&str> {
        self.labels.get(sub_type).map(|label| label.display(locale))
    }

    pub fn allocation(&self, application_id: u64) -> Option<&AllocationEntry> {
        self.allocations.get(&application_id)
    }

    pub fn backups(&self, application_id: u64) -> &[BackupEntry] {
        self.backups
            .get(&application_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn rejection(&self, application_id: u64) -> Option<&RejectionInfo> {
        self.rejections.get(&application_id)
    }

    /// Column position of a sub-type in the matrix.
    pub fn column_index(&self, sub_type: &str) -> Option<usize> {
        self.sub_types.iter().position(|code| code == sub_type)
    }
}

/// Application ids that scope an aggregation to one ranking's applicant pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationFilter {
    ids: HashSet<u64>,
}

impl ApplicationFilter {
    /// Returns a filter only when the distribution ran and the ranked list yields ids.
    pub fn from_applications(
        applications: &[Application],
        distribution_executed: bool,
    ) -> Option<Self> {
        if !distribution_executed {
            return None;
        }
        Self::from_ids(applications.iter().filter_map(Application::normalized_id))
    }

    pub fn from_ids(ids: impl IntoIterator<Item = u64>) -> Option<Self> {
        let ids: HashSet<u64> = ids.into_iter().collect();
        if ids.is_empty() {
            None
        } else {
            Some(Self { ids })
        }
    }

    pub fn contains(&self, application_id: u64) -> bool {
        self.ids.contains(&application_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct DistributionAnalyzer<'a> {
    metadata: &'a [SubTypeMeta],
    overrides: Option<&'a BTreeMap<String, QuotaOverride>>,
    filter: Option<&'a ApplicationFilter>,
    locale: Locale,
}

impl<'a> DistributionAnalyzer<'a> {
    pub fn new(metadata: &'a [SubTypeMeta]) -> Self {
        Self {
            metadata,
            overrides: None,
            filter: None,
            locale: Locale::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: &'a BTreeMap<String, QuotaOverride>) -> Self {
        self.overrides = Some(overrides);
        self
    }

    pub fn with_filter(mut self, filter: Option<&'a ApplicationFilter>) -> Self {
        self.filter = filter.filter(|f| !f.is_empty());
        self
    }

    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Main aggregation over every sub-type of the summary, in document order
    pub fn aggregate(
        &self,
        summary: &OrderedEntries<SubTypeSummary>,
        rejected: &[RejectedEntry],
    ) -> Aggregation {
        let mut aggregation = Aggregation::default();

        for (code, sub_type) in summary.iter() {
            if aggregation.labels.contains_key(code) {
                warn!(sub_type = code, "duplicate sub-type key in summary, keeping the first");
                continue;
            }

            // Step 1: Resolve display labels
            aggregation
                .labels
                .insert(code.to_string(), self.resolve_label(code, sub_type));
            aggregation.sub_types.push(code.to_string());

            // Step 2 and 3: Walk included colleges and register their entries
            let mut computed_quota: u32 = 0;
            let mut admitted_count: u32 = 0;
            let mut backup_count: u32 = 0;

            for (college_code, college) in sub_type.colleges.iter() {
                if !self.includes_college(college) {
                    debug!(sub_type = code, college = college_code, "college outside filter");
                    continue;
                }

                computed_quota = computed_quota.saturating_add(coerce_quota(&college.quota));

                for admitted in &college.admitted {
                    admitted_count += 1;
                    match normalize_application_id(&admitted.application_id) {
                        Some(id) => register_allocation(
                            &mut aggregation,
                            id,
                            AllocationEntry {
                                sub_type: code.to_string(),
                                college: college_code.to_string(),
                            },
                        ),
                        None => debug!(
                            sub_type = code,
                            college = college_code,
                            "admitted entry without a usable application id"
                        ),
                    }
                }

                for backup in &college.backup {
                    backup_count += 1;
                    register_backup(&mut aggregation, code, college_code, backup);
                }
            }

            // Step 4: Resolve the final quota
            let quota = self.resolve_quota(code, sub_type, computed_quota);
            debug!(
                sub_type = code,
                quota,
                admitted = admitted_count,
                backup = backup_count,
                "aggregated sub-type"
            );

            aggregation.quotas.insert(code.to_string(), quota);
            aggregation
                .admitted_counts
                .insert(code.to_string(), admitted_count);
            aggregation
                .backup_counts
                .insert(code.to_string(), backup_count);
        }

        // Step 5: Rejection lookup
        aggregation.rejections = self.build_rejection_lookup(rejected);

        aggregation
    }

    fn includes_college(&self, college: &CollegeSummary) -> bool {
        let Some(filter) = self.filter else {
            return true;
        };

        college
            .admitted
            .iter()
            .map(|entry| &entry.application_id)
            .chain(college.backup.iter().map(|entry| &entry.application_id))
            .filter_map(normalize_application_id)
            .any(|id| filter.contains(id))
    }

    /// Override, then metadata table, then the summary's own label, then the code itself
    fn resolve_label(&self, code: &str, sub_type: &SubTypeSummary) -> SubTypeLabel {
        let override_entry = self.overrides.and_then(|overrides| overrides.get(code));
        let meta = self.metadata.iter().find(|meta| meta.code == code);

        let label = first_non_empty([
            override_entry.and_then(|o| o.label.as_deref()),
            meta.and_then(|m| m.label.as_deref()),
            sub_type.label.as_deref(),
        ]);
        let label_en = first_non_empty([
            override_entry.and_then(|o| o.label_en.as_deref()),
            meta.and_then(|m| m.label_en.as_deref()),
            sub_type.label_en.as_deref(),
        ]);

        SubTypeLabel {
            label: label.map(str::to_string).unwrap_or_else(|| fallback_label(code)),
            label_en: label_en
                .map(str::to_string)
                .unwrap_or_else(|| fallback_label(code)),
        }
    }

    fn resolve_quota(&self, code: &str, sub_type: &SubTypeSummary, computed: u32) -> u32 {
        let overridden = self
            .overrides
            .and_then(|overrides| overrides.get(code))
            .and_then(|o| o.quota.as_ref())
            .filter(|value| numeric_value(value).is_some());
        if let Some(value) = overridden {
            return coerce_quota(value);
        }

        let declared = sub_type
            .total_quota
            .as_ref()
            .filter(|value| numeric_value(value).is_some());
        if let Some(value) = declared {
            return coerce_quota(value);
        }

        computed
    }

    fn build_rejection_lookup(&self, rejected: &[RejectedEntry]) -> HashMap<u64, RejectionInfo> {
        let mut lookup = HashMap::new();

        for entry in rejected {
            let Some(id) = normalize_application_id(&entry.application_id) else {
                debug!(student = %entry.student_name, "rejected entry without application id");
                continue;
            };

            lookup.entry(id).or_insert_with(|| RejectionInfo {
                reason: entry.reason.clone(),
                rank: normalize_rank(&entry.rank_position),
                classification: classify_rejection(&entry.reason, self.locale),
            });
        }

        lookup
    }
}

fn register_allocation(aggregation: &mut Aggregation, id: u64, entry: AllocationEntry) {
    match aggregation.allocations.entry(id) {
        Entry::Vacant(slot) => {
            slot.insert(entry);
        }
        Entry::Occupied(existing) => {
            warn!(
                application_id = id,
                kept = %existing.get().sub_type,
                ignored = %entry.sub_type,
                "application admitted more than once, keeping the first allocation"
            );
            aggregation.conflicts.push(AllocationConflict {
                application_id: id,
                kept: existing.get().clone(),
                ignored: entry,
            });
        }
    }
}

fn register_backup(aggregation: &mut Aggregation, sub_type: &str, college: &str, backup: &Backup) {
    let Some(id) = normalize_application_id(&backup.application_id) else {
        debug!(sub_type, college, "backup entry without a usable application id");
        return;
    };

    aggregation.backups.entry(id).or_default().push(BackupEntry {
        sub_type: sub_type.to_string(),
        backup_position: normalize_rank(&backup.backup_position),
        college: college.to_string(),
    });
}

fn first_non_empty<'s>(candidates: [Option<&'s str>; 3]) -> Option<&'s str> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}

/// Last-resort label: `moe_1w` becomes `MOE 1W`.
pub fn fallback_label(code: &str) -> String {
    code.to_uppercase().replace('_', " ")
}

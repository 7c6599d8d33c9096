use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ranking_id: u64,
    #[serde(default)]
    pub locale: Locale,
    pub data_source_mode: DataSourceMode,
    pub api_base_url: Option<String>,
    pub distribution_endpoint: Option<String>,
    pub applications_endpoint: Option<String>,
    pub distribution_file: Option<String>,
    pub applications_file: Option<String>,
    pub output_directory: Option<String>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub quota_overrides: BTreeMap<String, QuotaOverride>,
    #[serde(default)]
    pub sub_type_translations: BTreeMap<String, SubTypeTranslation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DataSourceMode {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "internet")]
    Internet,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ranking_id: 0,
            locale: Locale::Zh,
            data_source_mode: DataSourceMode::Local,
            api_base_url: Some("http://localhost:8000/api/v1".to_string()),
            distribution_endpoint: Some(
                "/college-review/rankings/{ranking_id}/distribution-details".to_string(),
            ),
            applications_endpoint: Some("/college-review/rankings/{ranking_id}".to_string()),
            distribution_file: Some("data/distribution.json".to_string()),
            applications_file: Some("data/applications.json".to_string()),
            output_directory: Some("output".to_string()),
            log_level: Some("info".to_string()),
            quota_overrides: BTreeMap::new(),
            sub_type_translations: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }
}

/// Display language for labels and sheet headers. Values are never localized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Zh,
    En,
}

impl Locale {
    pub fn pick<'a>(self, zh: &'a str, en: &'a str) -> &'a str {
        match self {
            Locale::Zh => zh,
            Locale::En => en,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "zh" | "zh-tw" | "zh_tw" => Some(Locale::Zh),
            "en" | "en-us" | "en_us" => Some(Locale::En),
            _ => None,
        }
    }
}

/// Manual adjustments for a sub-type, keyed by sub-type code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_en: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubTypeTranslation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_en: Option<String>,
}

/// JSON object decoded into a list of `(key, value)` pairs in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedEntries<T>(pub Vec<(String, T)>);

impl<T> Default for OrderedEntries<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> OrderedEntries<T> {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for OrderedEntries<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor<T>(PhantomData<T>);

        impl<'de, T: Deserialize<'de>> Visitor<'de> for EntriesVisitor<T> {
            type Value = OrderedEntries<T>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map or null")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(OrderedEntries::default())
            }

            fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(OrderedEntries::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((key, value)) = map.next_entry::<String, T>()? {
                    entries.push((key, value));
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_any(EntriesVisitor(PhantomData))
    }
}

/// Response of the distribution-details endpoint for one ranking.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DistributionDetails {
    #[serde(default)]
    pub ranking_id: Value,
    #[serde(default)]
    pub ranking_name: Option<String>,
    #[serde(default)]
    pub distribution_executed: bool,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_allocated: u64,
    #[serde(default, deserialize_with = "lenient_count")]
    pub total_applications: u64,
    #[serde(default)]
    pub distribution_summary: OrderedEntries<SubTypeSummary>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub rejected: Vec<RejectedEntry>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub sub_type_metadata: Vec<SubTypeMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubTypeSummary {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub label_en: Option<String>,
    #[serde(default)]
    pub total_quota: Option<Value>,
    #[serde(default)]
    pub colleges: OrderedEntries<CollegeSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CollegeSummary {
    #[serde(default)]
    pub quota: Value,
    #[serde(default)]
    pub admitted_count: Value,
    #[serde(default)]
    pub backup_count: Value,
    #[serde(default, deserialize_with = "nullable_list")]
    pub admitted: Vec<Admitted>,
    #[serde(default, deserialize_with = "nullable_list")]
    pub backup: Vec<Backup>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Admitted {
    #[serde(default)]
    pub rank_position: Value,
    #[serde(default)]
    pub application_id: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Backup {
    #[serde(default)]
    pub rank_position: Value,
    #[serde(default)]
    pub backup_position: Value,
    #[serde(default)]
    pub application_id: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RejectedEntry {
    #[serde(default)]
    pub rank_position: Value,
    #[serde(default)]
    pub application_id: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SubTypeMeta {
    #[serde(default, deserialize_with = "lenient_string")]
    pub code: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub label_en: Option<String>,
}

/// One entry of the ranked application list. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Application {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub rank_position: Value,
    #[serde(default)]
    pub eligible_subtypes: Value,
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub student_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub review_status: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Application {
    pub fn normalized_id(&self) -> Option<u64> {
        normalize_application_id(&self.id)
    }

    pub fn rank(&self) -> Option<u32> {
        normalize_rank(&self.rank_position)
    }

    /// Review status, falling back to the generic `status` field.
    pub fn review_state(&self) -> Option<&str> {
        self.review_status.as_deref().or(self.status.as_deref())
    }
}

/// Canonical integer key for an application id given as a number or numeric string.
pub fn normalize_application_id(value: &Value) -> Option<u64> {
    let number = numeric_value(value)?;
    if number < 0.0 || number.fract() != 0.0 || number >= u64::MAX as f64 {
        return None;
    }
    Some(number as u64)
}

pub fn normalize_rank(value: &Value) -> Option<u32> {
    normalize_application_id(value).and_then(|rank| u32::try_from(rank).ok())
}

/// Best-effort numeric read: numbers and trimmed numeric strings, finite only.
pub fn numeric_value(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

/// Quota coercion: negative or non-numeric values count as zero.
pub fn coerce_quota(value: &Value) -> u32 {
    match numeric_value(value) {
        Some(n) if n > 0.0 => n.min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

fn nullable_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn lenient_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(match numeric_value(&value) {
        Some(n) if n > 0.0 => n.min(u64::MAX as f64) as u64,
        _ => 0,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

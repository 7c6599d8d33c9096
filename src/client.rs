use crate::models::{Application, Config, DistributionDetails};
use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use tracing::info;

/// Unwrap the `{ success, message, data }` envelope when present; otherwise the
/// document is the payload itself.
fn unwrap_envelope<T: DeserializeOwned>(content: &str, what: &str) -> Result<T> {
    let document: Value = serde_json::from_str(content)?;

    let payload = match document {
        Value::Object(mut object) if object.contains_key("success") => {
            let success = object.get("success").and_then(Value::as_bool).unwrap_or(false);
            if !success {
                let message = object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no message");
                bail!("{} request was not successful: {}", what, message);
            }
            match object.remove("data") {
                Some(Value::Null) | None => bail!("{} response carried no data", what),
                Some(data) => data,
            }
        }
        other => other,
    };

    serde_json::from_value(payload).with_context(|| format!("Malformed {} payload", what))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ApplicationsPayload {
    List(Vec<Application>),
    Wrapped { applications: Vec<Application> },
}

impl ApplicationsPayload {
    fn into_applications(self) -> Vec<Application> {
        match self {
            ApplicationsPayload::List(applications) => applications,
            ApplicationsPayload::Wrapped { applications } => applications,
        }
    }
}

pub struct DistributionClient {
    client: reqwest::Client,
    base_url: String,
    distribution_endpoint: String,
    applications_endpoint: String,
}

impl DistributionClient {
    pub fn new(base_url: &str, distribution_endpoint: &str, applications_endpoint: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.to_string(),
            distribution_endpoint: distribution_endpoint.to_string(),
            applications_endpoint: applications_endpoint.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let base_url = config
            .api_base_url
            .as_deref()
            .context("api_base_url is required in internet mode")?;
        let distribution_endpoint = config
            .distribution_endpoint
            .as_deref()
            .context("distribution_endpoint is required in internet mode")?;
        let applications_endpoint = config
            .applications_endpoint
            .as_deref()
            .context("applications_endpoint is required in internet mode")?;

        Ok(Self::new(base_url, distribution_endpoint, applications_endpoint))
    }

    pub fn distribution_url(&self, ranking_id: u64) -> String {
        endpoint_url(&self.base_url, &self.distribution_endpoint, ranking_id)
    }

    pub fn applications_url(&self, ranking_id: u64) -> String {
        endpoint_url(&self.base_url, &self.applications_endpoint, ranking_id)
    }

    pub async fn fetch_distribution(&self, ranking_id: u64) -> Result<DistributionDetails> {
        let url = self.distribution_url(ranking_id);
        let content = self.get_text(&url).await?;
        parse_distribution(&content).with_context(|| format!("Invalid distribution data from: {}", url))
    }

    pub async fn fetch_applications(&self, ranking_id: u64) -> Result<Vec<Application>> {
        let url = self.applications_url(ranking_id);
        let content = self.get_text(&url).await?;
        parse_applications(&content).with_context(|| format!("Invalid application list from: {}", url))
    }

    async fn get_text(&self, url: &str) -> Result<String> {
        info!(url, "fetching");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch URL: {}", url))?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP request failed with status: {}", response.status()));
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from: {}", url))
    }
}

pub fn load_distribution_file(file_path: &str) -> Result<DistributionDetails> {
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read file: {}", file_path))?;
    parse_distribution(&content).with_context(|| format!("Invalid distribution data in: {}", file_path))
}

pub fn load_applications_file(file_path: &str) -> Result<Vec<Application>> {
    let content = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read file: {}", file_path))?;
    parse_applications(&content).with_context(|| format!("Invalid application list in: {}", file_path))
}

pub fn parse_distribution(content: &str) -> Result<DistributionDetails> {
    unwrap_envelope(content, "distribution details")
}

pub fn parse_applications(content: &str) -> Result<Vec<Application>> {
    let payload: ApplicationsPayload = unwrap_envelope(content, "application list")?;
    Ok(payload.into_applications())
}

/// Join base URL and endpoint template, substituting `{ranking_id}`.
pub fn endpoint_url(base_url: &str, template: &str, ranking_id: u64) -> String {
    let path = template.replace("{ranking_id}", &ranking_id.to_string());
    if path.starts_with("http://") || path.starts_with("https://") {
        return path;
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_and_enveloped_distribution() {
        let bare = parse_distribution(r#"{ "ranking_id": 3, "distribution_executed": true }"#)
            .expect("bare payload parses");
        assert!(bare.distribution_executed);

        let wrapped = parse_distribution(
            r#"{ "success": true, "message": "ok", "data": { "ranking_name": "R", "total_allocated": 2 } }"#,
        )
        .expect("envelope parses");
        assert_eq!(wrapped.ranking_name.as_deref(), Some("R"));
        assert_eq!(wrapped.total_allocated, 2);
    }

    #[test]
    fn unsuccessful_envelope_is_an_error() {
        let err = parse_distribution(r#"{ "success": false, "message": "ranking not found" }"#)
            .expect_err("unsuccessful response fails");
        assert!(err.to_string().contains("ranking not found"));

        let err = parse_distribution(r#"{ "success": true }"#).expect_err("missing data fails");
        assert!(err.to_string().contains("no data"));
    }

    #[test]
    fn accepts_every_application_list_shape() {
        let list = parse_applications(r#"[{ "id": 1 }, { "id": "2" }]"#).expect("list parses");
        assert_eq!(list.len(), 2);

        let wrapped = parse_applications(r#"{ "applications": [{ "id": 1 }] }"#).expect("object parses");
        assert_eq!(wrapped.len(), 1);

        let enveloped = parse_applications(
            r#"{ "success": true, "data": { "applications": [{ "id": 1 }, { "id": 2 }, { "id": 3 }] } }"#,
        )
        .expect("envelope parses");
        assert_eq!(enveloped.len(), 3);
    }

    #[test]
    fn malformed_inner_payload_is_an_error() {
        let err = parse_distribution(
            r#"{ "success": true, "data": { "distribution_executed": "yes", "distribution_summary": {} } }"#,
        )
        .expect_err("bad payload inside a successful envelope fails");
        assert!(format!("{:#}", err).contains("Malformed distribution details payload"));
    }

    #[test]
    fn envelope_with_null_lists_keeps_the_summary() {
        let details = parse_distribution(
            r#"{ "success": true, "data": {
                "distribution_executed": true,
                "distribution_summary": { "A": { "colleges": { "EE": { "quota": 1, "backup": null } } } },
                "sub_type_metadata": null
            } }"#,
        )
        .expect("envelope parses");
        assert_eq!(details.distribution_summary.len(), 1);
        assert!(details.sub_type_metadata.is_empty());
    }

    #[test]
    fn application_with_both_status_fields_parses() {
        let list = parse_applications(r#"[{ "id": 1, "status": "submitted", "review_status": "approved" }]"#)
            .expect("list parses");
        assert_eq!(list[0].review_state(), Some("approved"));
    }

    #[test]
    fn builds_endpoint_urls() {
        assert_eq!(
            endpoint_url("http://api/v1/", "/rankings/{ranking_id}/distribution-details", 42),
            "http://api/v1/rankings/42/distribution-details"
        );
        assert_eq!(
            endpoint_url("http://api/v1", "https://other/rankings/{ranking_id}", 5),
            "https://other/rankings/5"
        );
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_distribution_file("does/not/exist.json").expect_err("missing file fails");
        assert!(err.to_string().contains("does/not/exist.json"));
    }
}

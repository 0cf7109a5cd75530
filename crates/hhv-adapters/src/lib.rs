//! Vacancy source adapters: the HTTP client for the vacancy API, a
//! captured-payload source, and the serializer from raw items to records.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use hhv_core::{EmployerRecord, VacancyDraft, VacancyRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

pub const CRATE_NAME: &str = "hhv-adapters";

pub const DEFAULT_VACANCIES_URL: &str = "https://api.hh.ru/vacancies";

/// One page of the vacancy API, items left as raw JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub items: Vec<JsonValue>,
    #[serde(default)]
    pub found: Option<u64>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub pages: Option<u64>,
    #[serde(default)]
    pub per_page: Option<u64>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("vacancy source unavailable: http status {status} for {url}")]
    SourceUnavailable { status: u16, url: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid vacancy payload: {0}")]
    Decode(String),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait VacancySource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Fetch one page of vacancies, filtered to `employer_ids` when given.
    async fn fetch_vacancies(&self, employer_ids: Option<&[i64]>) -> Result<RawPayload, FetchError>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

/// Client for the public vacancy API. Issues a single GET per call, no retries.
#[derive(Debug, Clone)]
pub struct HhClient {
    client: reqwest::Client,
    base_url: String,
}

impl HhClient {
    pub fn new(base_url: impl Into<String>, config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

/// `employer_id` repeated once per id; empty when there is no filter.
pub fn employer_query(employer_ids: Option<&[i64]>) -> Vec<(&'static str, String)> {
    employer_ids
        .unwrap_or_default()
        .iter()
        .map(|id| ("employer_id", id.to_string()))
        .collect()
}

pub fn parse_payload(bytes: &[u8]) -> Result<RawPayload, FetchError> {
    serde_json::from_slice(bytes).map_err(|e| FetchError::Decode(e.to_string()))
}

#[async_trait]
impl VacancySource for HhClient {
    fn source_id(&self) -> &'static str {
        "hh"
    }

    async fn fetch_vacancies(&self, employer_ids: Option<&[i64]>) -> Result<RawPayload, FetchError> {
        let query = employer_query(employer_ids);
        let span = info_span!(
            "http_fetch",
            source_id = self.source_id(),
            url = %self.base_url,
            employer_filters = query.len()
        );

        async move {
            let resp = self.client.get(&self.base_url).query(&query).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::SourceUnavailable {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?;
            let payload = parse_payload(&body)?;
            debug!(items = payload.items.len(), found = ?payload.found, "fetched vacancy page");
            Ok(payload)
        }
        .instrument(span)
        .await
    }
}

/// Serves a captured API response from disk, applying the employer filter locally.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    path: PathBuf,
}

impl FixtureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl VacancySource for FixtureSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_vacancies(&self, employer_ids: Option<&[i64]>) -> Result<RawPayload, FetchError> {
        let bytes = fs::read(&self.path).map_err(|source| FetchError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        let mut payload = parse_payload(&bytes)?;

        if let Some(ids) = employer_ids {
            let wanted = ids.iter().copied().collect::<HashSet<_>>();
            payload.items.retain(|item| {
                item.get("employer")
                    .and_then(|e| json_id(e, &["id"]))
                    .is_some_and(|id| wanted.contains(&id))
            });
        }
        Ok(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    #[error("vacancy item is missing `{0}`")]
    MissingField(&'static str),
    #[error("vacancy `{0}` has no employer with a usable id")]
    MissingEmployer(String),
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

fn json_string(value: &JsonValue, path: &[&str]) -> Option<String> {
    json_at(value, path)?.as_str().map(ToString::to_string)
}

fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    json_at(value, path)?.as_i64()
}

/// Identifiers come back as JSON strings (`"93"`) as often as numbers.
fn json_id(value: &JsonValue, path: &[&str]) -> Option<i64> {
    let raw = json_at(value, path)?;
    raw.as_i64()
        .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()))
}

/// Map a raw vacancy item into a draft, keeping the employer object as-is.
pub fn serialize_vacancy(raw: &JsonValue) -> Result<VacancyDraft, SerializeError> {
    let name = json_string(raw, &["name"]).ok_or(SerializeError::MissingField("name"))?;
    let salary = json_at(raw, &["salary"]);

    Ok(VacancyDraft {
        name,
        url: json_string(raw, &["url"]),
        description: json_string(raw, &["description"])
            .or_else(|| json_string(raw, &["snippet", "responsibility"])),
        requirements: json_string(raw, &["requirements"])
            .or_else(|| json_string(raw, &["snippet", "requirement"])),
        salary_from: salary.and_then(|s| json_i64(s, &["from"])),
        salary_to: salary.and_then(|s| json_i64(s, &["to"])),
        employer: json_at(raw, &["employer"]).cloned(),
    })
}

pub fn serialize_company(raw: &JsonValue) -> Result<EmployerRecord, SerializeError> {
    Ok(EmployerRecord {
        id: json_id(raw, &["id"]).ok_or(SerializeError::MissingField("employer.id"))?,
        name: json_string(raw, &["name"]).ok_or(SerializeError::MissingField("employer.name"))?,
        url: json_string(raw, &["url"]),
        accredited_it_employer: json_at(raw, &["accredited_it_employer"])
            .and_then(JsonValue::as_bool)
            .unwrap_or(false),
    })
}

/// Replace the embedded employer object with its id.
pub fn promote_employer_to_foreign_key(draft: VacancyDraft) -> Result<VacancyRecord, SerializeError> {
    let employer_id = draft
        .employer
        .as_ref()
        .and_then(|e| json_id(e, &["id"]));
    let Some(employer_id) = employer_id else {
        return Err(SerializeError::MissingEmployer(draft.name));
    };

    Ok(VacancyRecord {
        name: draft.name,
        url: draft.url,
        description: draft.description,
        requirements: draft.requirements,
        salary_from: draft.salary_from,
        salary_to: draft.salary_to,
        employer_id,
    })
}

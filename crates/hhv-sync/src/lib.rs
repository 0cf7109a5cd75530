//! One-pass sync driver: configuration, fetch → serialize → import, and reports.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hhv_adapters::{
    promote_employer_to_foreign_key, serialize_company, serialize_vacancy, HttpClientConfig,
    SerializeError, VacancySource, DEFAULT_VACANCIES_URL,
};
use hhv_core::{EmployerRecord, KeywordMatch, SalaryLeader, StoredVacancy, VacancyRecord};
use hhv_storage::{PoolConfig, VacancyStore, DEFAULT_TOP_LIMIT};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgConnectOptions;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "hhv-sync";

pub const DEFAULT_EMPLOYER_IDS: [i64; 10] = [
    93, 1060821, 9161401, 10260977, 827187, 3878807, 10725937, 10056971, 3711736, 2700516,
];
pub const DEFAULT_KEYWORD: &str = "Менеджер отдела продаж";
pub const DB_PORT: u16 = 5432;

#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub vacancies_url: String,
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    /// `None` fetches without an employer filter.
    pub employer_ids: Option<Vec<i64>>,
    pub keyword: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let string_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let parsed_or = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(default)
        };

        let employer_ids = match lookup("HH_EMPLOYER_IDS") {
            Some(raw) => parse_employer_ids(&raw).context("parsing HH_EMPLOYER_IDS")?,
            None => Some(DEFAULT_EMPLOYER_IDS.to_vec()),
        };

        let defaults = PoolConfig::default();
        Ok(Self {
            vacancies_url: string_or("VACANCIES_URL", DEFAULT_VACANCIES_URL),
            database: DatabaseConfig {
                host: string_or("DB_HOST", "localhost"),
                port: DB_PORT,
                user: string_or("DB_USER", "postgres"),
                password: string_or("DB_PASSWORD", "postgres"),
                name: string_or("DB_NAME", "hh_db"),
            },
            pool: PoolConfig {
                min_connections: defaults.min_connections,
                max_connections: parsed_or("DB_POOL_MAX", defaults.max_connections as u64) as u32,
                acquire_timeout: Duration::from_secs(parsed_or(
                    "DB_ACQUIRE_TIMEOUT_SECS",
                    defaults.acquire_timeout.as_secs(),
                )),
            },
            employer_ids,
            keyword: string_or("HH_SEARCH_KEYWORD", DEFAULT_KEYWORD),
            user_agent: string_or("HH_USER_AGENT", "hhv-loader/0.1"),
            http_timeout_secs: parsed_or("HH_HTTP_TIMEOUT_SECS", 20),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

/// Comma-separated employer ids. Blank input means "no filter".
pub fn parse_employer_ids(raw: &str) -> Result<Option<Vec<i64>>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>()
                .with_context(|| format!("invalid employer id `{part}`"))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub index: usize,
    pub reason: SerializeError,
}

/// Payload items split into insertable records and the items that were skipped.
/// `employers` holds one entry per kept vacancy; the store deduplicates them.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub vacancies: Vec<VacancyRecord>,
    pub employers: Vec<EmployerRecord>,
    pub skipped: Vec<SkippedItem>,
}

pub fn normalize_items(items: &[JsonValue]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();

    for (index, raw) in items.iter().enumerate() {
        let outcome = serialize_vacancy(raw).and_then(|draft| {
            let employer = match draft.employer.as_ref() {
                Some(employer) => serialize_company(employer)?,
                None => return Err(SerializeError::MissingEmployer(draft.name.clone())),
            };
            Ok((promote_employer_to_foreign_key(draft)?, employer))
        });

        match outcome {
            Ok((vacancy, employer)) => {
                batch.vacancies.push(vacancy);
                batch.employers.push(employer);
            }
            Err(reason) => {
                warn!(index, %reason, "skipping vacancy item");
                batch.skipped.push(SkippedItem { index, reason });
            }
        }
    }

    batch
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub source_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched_items: usize,
    pub skipped_items: usize,
    pub employers_inserted: u64,
    pub vacancies_inserted: u64,
}

pub struct SyncPipeline {
    config: SyncConfig,
    source: Box<dyn VacancySource>,
    store: VacancyStore,
}

impl SyncPipeline {
    pub fn new(config: SyncConfig, source: Box<dyn VacancySource>, store: VacancyStore) -> Self {
        Self {
            config,
            source,
            store,
        }
    }

    /// Drop and recreate both tables.
    pub async fn reset_schema(&self) -> Result<()> {
        if self.store.drop_schema().await.context("dropping schema")? {
            self.store.create_schema().await.context("creating schema")?;
        }
        Ok(())
    }

    /// Rebuild the dataset from scratch: reset schema, fetch, normalize, import.
    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let span = info_span!("sync_run", %run_id, source_id = self.source.source_id());

        async move {
            self.reset_schema().await?;

            let payload = self
                .source
                .fetch_vacancies(self.config.employer_ids.as_deref())
                .await
                .context("fetching vacancies")?;
            let batch = normalize_items(&payload.items);

            let import = self
                .store
                .import_vacancies(&batch.vacancies, &batch.employers)
                .await
                .context("importing vacancies")?;

            let summary = SyncRunSummary {
                run_id,
                source_id: self.source.source_id().to_string(),
                started_at,
                finished_at: Utc::now(),
                fetched_items: payload.items.len(),
                skipped_items: batch.skipped.len(),
                employers_inserted: import.employers_inserted,
                vacancies_inserted: import.vacancies_inserted,
            };
            info!(
                fetched = summary.fetched_items,
                skipped = summary.skipped_items,
                vacancies = summary.vacancies_inserted,
                "sync run complete"
            );
            Ok::<_, anyhow::Error>(summary)
        }
        .instrument(span)
        .await
    }
}

/// The five report results, in the order they are printed.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub employer_vacancy_counts: BTreeMap<String, i64>,
    pub vacancies: Vec<StoredVacancy>,
    pub average_salary: Option<f64>,
    pub top_by_salary: Vec<SalaryLeader>,
    pub keyword: String,
    pub keyword_matches: Vec<KeywordMatch>,
}

pub async fn collect_report(store: &VacancyStore, keyword: &str) -> Result<Report> {
    let employer_vacancy_counts = store
        .employer_vacancy_counts()
        .await
        .context("counting vacancies per employer")?;
    let vacancies = store.all_vacancies().await.context("reading vacancies")?;
    let average_salary = store
        .average_salary()
        .await
        .context("computing average salary")?;
    let top_by_salary = store
        .top_vacancies_by_salary(DEFAULT_TOP_LIMIT)
        .await
        .context("ranking vacancies by salary")?;
    let keyword_matches = store
        .vacancies_matching_keyword(keyword)
        .await
        .with_context(|| format!("searching vacancies for `{keyword}`"))?;

    Ok(Report {
        employer_vacancy_counts,
        vacancies,
        average_salary,
        top_by_salary,
        keyword: keyword.to_string(),
        keyword_matches,
    })
}

pub fn render_report_text(report: &Report) -> String {
    let mut lines = vec!["# HH Vacancy Report".to_string(), String::new()];

    lines.push("## Vacancies per employer".to_string());
    if report.employer_vacancy_counts.is_empty() {
        lines.push("- (no employers)".to_string());
    }
    for (name, count) in &report.employer_vacancy_counts {
        lines.push(format!("- {name}: {count}"));
    }
    lines.push(String::new());

    lines.push(format!("## All vacancies ({})", report.vacancies.len()));
    for v in &report.vacancies {
        lines.push(format!(
            "- #{} {} | salary {} | employer {} | {}",
            v.id,
            v.name,
            v.salary_range_label(),
            v.employer_id,
            v.url.as_deref().unwrap_or("-")
        ));
    }
    lines.push(String::new());

    lines.push("## Average salary".to_string());
    lines.push(
        report
            .average_salary
            .map(|avg| format!("{avg:.2}"))
            .unwrap_or_else(|| "n/a".to_string()),
    );
    lines.push(String::new());

    lines.push(format!("## Top {} by salary", DEFAULT_TOP_LIMIT));
    for (rank, leader) in report.top_by_salary.iter().enumerate() {
        lines.push(format!("{}. {}: {:.2}", rank + 1, leader.name, leader.average_salary));
    }
    lines.push(String::new());

    lines.push(format!(
        "## Vacancies matching \"{}\" ({})",
        report.keyword,
        report.keyword_matches.len()
    ));
    for m in &report.keyword_matches {
        lines.push(format!(
            "- {} | salary {} | {}",
            m.name,
            m.salary_range_label(),
            m.url.as_deref().unwrap_or("-")
        ));
    }

    lines.join("\n")
}

pub fn render_report_json(report: &Report) -> Result<String> {
    serde_json::to_string_pretty(report).context("serializing report")
}

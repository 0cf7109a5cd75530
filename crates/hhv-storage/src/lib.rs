//! Postgres store for employers and vacancies: schema DDL, bulk import and report queries.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use hhv_core::{EmployerRecord, KeywordMatch, SalaryLeader, StoredVacancy, VacancyRecord};
use sqlx::error::ErrorKind;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub const CRATE_NAME: &str = "hhv-storage";

pub const DEFAULT_TOP_LIMIT: i64 = 5;

/// SQLSTATE `duplicate_table`.
const DUPLICATE_TABLE: &str = "42P07";

const CREATE_EMPLOYER_TABLE: &str = r#"
    CREATE TABLE employer (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        url TEXT,
        accredited_it_employer BOOLEAN NOT NULL DEFAULT FALSE
    )
"#;

const CREATE_VACANCY_TABLE: &str = r#"
    CREATE TABLE vacancy (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        url TEXT,
        description TEXT,
        requirements TEXT,
        salary_from BIGINT,
        salary_to BIGINT,
        employer_id BIGINT NOT NULL,
        CONSTRAINT fk_employer FOREIGN KEY (employer_id)
            REFERENCES employer (id) ON DELETE CASCADE
    )
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("schema already exists: {0}")]
    SchemaConflict(String),
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("database unreachable: {0}")]
    Connectivity(#[source] sqlx::Error),
    #[error("vacancies reference employers that are not stored: {0:?}")]
    MissingEmployers(Vec<i64>),
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_)
        ) {
            return StoreError::Connectivity(err);
        }

        if let Some(db) = err.as_database_error() {
            if db.code().as_deref() == Some(DUPLICATE_TABLE) {
                return StoreError::SchemaConflict(db.message().to_string());
            }
            if matches!(
                db.kind(),
                ErrorKind::UniqueViolation
                    | ErrorKind::ForeignKeyViolation
                    | ErrorKind::NotNullViolation
                    | ErrorKind::CheckViolation
            ) {
                return StoreError::ConstraintViolation(db.message().to_string());
            }
        }

        StoreError::Database(err)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub employers_inserted: u64,
    pub vacancies_inserted: u64,
}

/// Collapse employers that are equal on every field.
///
/// The vacancy payload repeats an employer once per vacancy it owns; the
/// result is ordered by the record's `Ord` so inserts are deterministic.
pub fn dedup_employers(records: &[EmployerRecord]) -> Vec<EmployerRecord> {
    records
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[derive(Debug, Clone)]
pub struct VacancyStore {
    pool: PgPool,
}

impl VacancyStore {
    pub async fn connect(options: PgConnectOptions, config: PoolConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(config.acquire_timeout)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create both tables in one transaction. Fails with
    /// [`StoreError::SchemaConflict`] when either table already exists.
    pub async fn create_schema(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(CREATE_EMPLOYER_TABLE).execute(&mut *tx).await?;
        sqlx::query(CREATE_VACANCY_TABLE).execute(&mut *tx).await?;
        tx.commit().await?;
        info!("created employer and vacancy tables");
        Ok(())
    }

    /// Drop vacancy, then employer. Safe to call when neither exists.
    pub async fn drop_schema(&self) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DROP TABLE IF EXISTS vacancy")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS employer CASCADE")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!("dropped employer and vacancy tables");
        Ok(true)
    }

    /// Deduplicate and bulk-insert employers in a single committed statement.
    #[instrument(skip_all, fields(input = records.len()))]
    pub async fn import_employers(&self, records: &[EmployerRecord]) -> Result<u64, StoreError> {
        let distinct = dedup_employers(records);
        if distinct.is_empty() {
            return Ok(0);
        }
        debug!(distinct = distinct.len(), "inserting employers");

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new("INSERT INTO employer (id, name, url, accredited_it_employer) ");
        builder.push_values(&distinct, |mut row, employer| {
            row.push_bind(employer.id)
                .push_bind(employer.name.clone())
                .push_bind(employer.url.clone())
                .push_bind(employer.accredited_it_employer);
        });

        let mut tx = self.pool.begin().await?;
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    /// Import employers first, verify every referenced employer is stored,
    /// then bulk-insert the vacancies in one statement.
    #[instrument(skip_all, fields(vacancies = vacancies.len(), employers = employers.len()))]
    pub async fn import_vacancies(
        &self,
        vacancies: &[VacancyRecord],
        employers: &[EmployerRecord],
    ) -> Result<ImportSummary, StoreError> {
        let employers_inserted = self.import_employers(employers).await?;
        self.ensure_employers_stored(vacancies).await?;

        if vacancies.is_empty() {
            return Ok(ImportSummary {
                employers_inserted,
                vacancies_inserted: 0,
            });
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO vacancy (name, url, description, requirements, salary_from, salary_to, employer_id) ",
        );
        builder.push_values(vacancies, |mut row, vacancy| {
            row.push_bind(vacancy.name.clone())
                .push_bind(vacancy.url.clone())
                .push_bind(vacancy.description.clone())
                .push_bind(vacancy.requirements.clone())
                .push_bind(vacancy.salary_from)
                .push_bind(vacancy.salary_to)
                .push_bind(vacancy.employer_id);
        });

        let mut tx = self.pool.begin().await?;
        let result = builder.build().execute(&mut *tx).await?;
        tx.commit().await?;

        let summary = ImportSummary {
            employers_inserted,
            vacancies_inserted: result.rows_affected(),
        };
        info!(
            employers = summary.employers_inserted,
            vacancies = summary.vacancies_inserted,
            "import committed"
        );
        Ok(summary)
    }

    async fn ensure_employers_stored(&self, vacancies: &[VacancyRecord]) -> Result<(), StoreError> {
        let referenced = vacancies
            .iter()
            .map(|v| v.employer_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        if referenced.is_empty() {
            return Ok(());
        }

        let rows = sqlx::query("SELECT id FROM employer WHERE id = ANY($1)")
            .bind(&referenced)
            .fetch_all(&self.pool)
            .await?;
        let stored = rows
            .iter()
            .map(|row| row.try_get::<i64, _>("id"))
            .collect::<Result<HashSet<_>, _>>()?;

        let missing = referenced
            .into_iter()
            .filter(|id| !stored.contains(id))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::MissingEmployers(missing))
        }
    }

    /// Vacancy count per employer name; employers without vacancies report 0.
    pub async fn employer_vacancy_counts(&self) -> Result<BTreeMap<String, i64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT e.name, COUNT(v.id) AS vacancy_count
              FROM employer e
              LEFT JOIN vacancy v ON v.employer_id = e.id
             GROUP BY e.name
             ORDER BY e.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = BTreeMap::new();
        for row in rows {
            out.insert(row.try_get("name")?, row.try_get("vacancy_count")?);
        }
        Ok(out)
    }

    pub async fn all_vacancies(&self) -> Result<Vec<StoredVacancy>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, url, description, requirements, salary_from, salary_to, employer_id
              FROM vacancy
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(stored_vacancy_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::from)
    }

    /// Mean of per-vacancy midpoints, a missing bound counting as zero.
    /// Vacancies with no bound at all are left out; `None` when none qualify.
    pub async fn average_salary(&self) -> Result<Option<f64>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT ROUND(AVG(midpoint), 2)::float8 AS average_salary
              FROM (
                    SELECT (COALESCE(salary_from, 0) + COALESCE(salary_to, 0)) / 2.0 AS midpoint
                      FROM vacancy
                     WHERE salary_from IS NOT NULL OR salary_to IS NOT NULL
                   ) AS midpoints
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("average_salary")?)
    }

    /// Highest `(salary_from + salary_to) / 2`, descending. Rows missing
    /// either bound are excluded; ties are ordered by name.
    pub async fn top_vacancies_by_salary(&self, limit: i64) -> Result<Vec<SalaryLeader>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, ((salary_from + salary_to) / 2.0)::float8 AS average_salary
              FROM vacancy
             WHERE salary_from IS NOT NULL AND salary_to IS NOT NULL
             ORDER BY average_salary DESC, name ASC
             LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SalaryLeader {
                name: row.try_get("name")?,
                average_salary: row.try_get("average_salary")?,
            });
        }
        Ok(out)
    }

    /// Literal, case-sensitive substring match on the vacancy name.
    pub async fn vacancies_matching_keyword(&self, keyword: &str) -> Result<Vec<KeywordMatch>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name, url, description, requirements, salary_from, salary_to
              FROM vacancy
             WHERE strpos(name, $1) > 0
             ORDER BY id
            "#,
        )
        .bind(keyword)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(KeywordMatch {
                name: row.try_get("name")?,
                url: row.try_get("url")?,
                description: row.try_get("description")?,
                requirements: row.try_get("requirements")?,
                salary_from: row.try_get("salary_from")?,
                salary_to: row.try_get("salary_to")?,
            });
        }
        Ok(out)
    }
}

fn stored_vacancy_from_row(row: &PgRow) -> Result<StoredVacancy, sqlx::Error> {
    Ok(StoredVacancy {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        description: row.try_get("description")?,
        requirements: row.try_get("requirements")?,
        salary_from: row.try_get("salary_from")?,
        salary_to: row.try_get("salary_to")?,
        employer_id: row.try_get("employer_id")?,
    })
}

//! Core record types shared by the vacancy source, serializer and store.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CRATE_NAME: &str = "hhv-core";

/// Employer row, keyed by the identifier the vacancy API assigns.
///
/// Full-record equality (all four fields) is what employer deduplication
/// collapses on, so the derives here are load-bearing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EmployerRecord {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
    pub accredited_it_employer: bool,
}

/// Serialized vacancy that still carries the raw employer object from the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VacancyDraft {
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub salary_from: Option<i64>,
    pub salary_to: Option<i64>,
    pub employer: Option<JsonValue>,
}

/// Vacancy ready for insertion, with the employer folded into a foreign key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacancyRecord {
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub salary_from: Option<i64>,
    pub salary_to: Option<i64>,
    pub employer_id: i64,
}

/// Vacancy row as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredVacancy {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub salary_from: Option<i64>,
    pub salary_to: Option<i64>,
    pub employer_id: i64,
}

/// Projection returned by keyword search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
    pub requirements: Option<String>,
    pub salary_from: Option<i64>,
    pub salary_to: Option<i64>,
}

/// One row of the top-by-salary ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalaryLeader {
    pub name: String,
    pub average_salary: f64,
}

impl StoredVacancy {
    pub fn salary_range_label(&self) -> String {
        salary_range_label(self.salary_from, self.salary_to)
    }
}

impl KeywordMatch {
    pub fn salary_range_label(&self) -> String {
        salary_range_label(self.salary_from, self.salary_to)
    }
}

/// Human-readable salary bounds, e.g. `100..200`, `from 100`, `up to 200`.
pub fn salary_range_label(from: Option<i64>, to: Option<i64>) -> String {
    match (from, to) {
        (Some(from), Some(to)) => format!("{from}..{to}"),
        (Some(from), None) => format!("from {from}"),
        (None, Some(to)) => format!("up to {to}"),
        (None, None) => "not specified".to_string(),
    }
}

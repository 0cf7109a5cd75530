// Integration tests against a live Postgres.
// Set HHV_TEST_DATABASE_URL to run them; each test works in its own schema.

use std::str::FromStr;

use hhv_core::{EmployerRecord, VacancyRecord};
use hhv_storage::{PoolConfig, StoreError, VacancyStore, DEFAULT_TOP_LIMIT};
use sqlx::postgres::{PgConnectOptions, PgPool};

async fn isolated_store(schema: &str) -> Option<VacancyStore> {
    let url = std::env::var("HHV_TEST_DATABASE_URL").ok()?;
    let base = PgConnectOptions::from_str(&url).expect("valid HHV_TEST_DATABASE_URL");

    let admin = PgPool::connect_with(base.clone()).await.expect("admin connect");
    sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
        .execute(&admin)
        .await
        .expect("drop test schema");
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create test schema");
    admin.close().await;

    let options = base.options([("search_path", schema)]);
    let store = VacancyStore::connect(options, PoolConfig::default())
        .await
        .expect("store connect");
    store.drop_schema().await.expect("drop");
    store.create_schema().await.expect("create");
    Some(store)
}

fn employer(id: i64, name: &str) -> EmployerRecord {
    EmployerRecord {
        id,
        name: name.to_string(),
        url: Some(format!("https://api.hh.ru/employers/{id}")),
        accredited_it_employer: id % 2 == 0,
    }
}

fn vacancy(name: &str, employer_id: i64, from: Option<i64>, to: Option<i64>) -> VacancyRecord {
    VacancyRecord {
        name: name.to_string(),
        url: Some(format!("https://hh.ru/vacancy/{}", name.len())),
        description: Some(format!("{name} description")),
        requirements: None,
        salary_from: from,
        salary_to: to,
        employer_id,
    }
}

async fn count_rows(store: &VacancyStore, table: &str) -> i64 {
    sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(store.pool())
        .await
        .expect("count")
}

#[tokio::test]
async fn drop_then_create_succeeds_twice_in_a_row() {
    let Some(store) = isolated_store("hhv_test_schema_cycle").await else {
        return;
    };
    assert!(store.drop_schema().await.expect("second drop"));
    store.create_schema().await.expect("second create");
    assert_eq!(count_rows(&store, "employer").await, 0);
    store.close().await;
}

#[tokio::test]
async fn create_on_existing_tables_is_a_schema_conflict() {
    let Some(store) = isolated_store("hhv_test_schema_conflict").await else {
        return;
    };
    let err = store.create_schema().await.expect_err("tables already exist");
    assert!(matches!(err, StoreError::SchemaConflict(_)), "got {err:?}");
    store.close().await;
}

#[tokio::test]
async fn import_employers_inserts_each_distinct_record_once() {
    let Some(store) = isolated_store("hhv_test_employer_dedup").await else {
        return;
    };
    let records = vec![
        employer(93, "Acme"),
        employer(3711736, "Globex"),
        employer(93, "Acme"),
        employer(3711736, "Globex"),
        employer(827187, "Initech"),
    ];
    let inserted = store.import_employers(&records).await.expect("import");
    assert_eq!(inserted, 3);
    assert_eq!(count_rows(&store, "employer").await, 3);
    store.close().await;
}

#[tokio::test]
async fn counts_include_employers_without_vacancies() {
    let Some(store) = isolated_store("hhv_test_counts").await else {
        return;
    };
    let employers = vec![employer(93, "Acme"), employer(94, "Idle Corp")];
    let vacancies = vec![
        vacancy("Rust Engineer", 93, Some(1000), Some(2000)),
        vacancy("QA Engineer", 93, None, None),
    ];
    let summary = store
        .import_vacancies(&vacancies, &employers)
        .await
        .expect("import");
    assert_eq!(summary.employers_inserted, 2);
    assert_eq!(summary.vacancies_inserted, 2);

    let counts = store.employer_vacancy_counts().await.expect("counts");
    assert_eq!(counts.get("Acme"), Some(&2));
    assert_eq!(counts.get("Idle Corp"), Some(&0));
    store.close().await;
}

#[tokio::test]
async fn average_salary_skips_vacancies_without_any_bound() {
    let Some(store) = isolated_store("hhv_test_average").await else {
        return;
    };
    assert_eq!(store.average_salary().await.expect("empty average"), None);

    let vacancies = vec![
        vacancy("Analyst", 93, Some(1000), Some(2000)),
        vacancy("Courier", 93, None, Some(500)),
        vacancy("Volunteer", 93, None, None),
    ];
    store
        .import_vacancies(&vacancies, &[employer(93, "Acme")])
        .await
        .expect("import");

    assert_eq!(store.average_salary().await.expect("average"), Some(875.0));
    store.close().await;
}

#[tokio::test]
async fn top_by_salary_is_descending_and_capped() {
    let Some(store) = isolated_store("hhv_test_top").await else {
        return;
    };
    let vacancies = vec![
        vacancy("A", 93, Some(100), Some(200)),
        vacancy("B", 93, Some(900), Some(1100)),
        vacancy("C", 93, Some(300), Some(500)),
        vacancy("D", 93, None, Some(99999)),
        vacancy("E", 93, Some(700), Some(700)),
        vacancy("F", 93, Some(50), Some(50)),
        vacancy("G", 93, Some(2000), Some(4000)),
    ];
    store
        .import_vacancies(&vacancies, &[employer(93, "Acme")])
        .await
        .expect("import");

    let top = store
        .top_vacancies_by_salary(DEFAULT_TOP_LIMIT)
        .await
        .expect("top");
    let names = top.iter().map(|l| l.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["G", "B", "E", "C", "A"]);
    assert!(top.windows(2).all(|w| w[0].average_salary > w[1].average_salary));
    assert_eq!(top[0].average_salary, 3000.0);
    store.close().await;
}

#[tokio::test]
async fn keyword_search_is_a_literal_substring_match() {
    let Some(store) = isolated_store("hhv_test_keyword").await else {
        return;
    };
    let vacancies = vec![
        vacancy("Senior Engineer", 93, Some(1), Some(2)),
        vacancy("Engineer", 93, None, None),
        vacancy("engineering lead", 93, None, None),
        vacancy("Sales Manager", 93, None, None),
    ];
    store
        .import_vacancies(&vacancies, &[employer(93, "Acme")])
        .await
        .expect("import");

    let hits = store
        .vacancies_matching_keyword("Engineer")
        .await
        .expect("search");
    let names = hits.iter().map(|m| m.name.as_str()).collect::<Vec<_>>();
    assert_eq!(names, vec!["Senior Engineer", "Engineer"]);
    assert!(hits.iter().all(|m| m.name.contains("Engineer")));

    let wildcard = store
        .vacancies_matching_keyword("%' OR '1'='1")
        .await
        .expect("search with quotes");
    assert!(wildcard.is_empty());
    store.close().await;
}

#[tokio::test]
async fn vacancies_for_unknown_employers_are_rejected_before_insert() {
    let Some(store) = isolated_store("hhv_test_missing_employer").await else {
        return;
    };
    let vacancies = vec![
        vacancy("Rust Engineer", 93, None, None),
        vacancy("Orphan", 404, None, None),
    ];
    let err = store
        .import_vacancies(&vacancies, &[employer(93, "Acme")])
        .await
        .expect_err("employer 404 missing");
    assert!(matches!(err, StoreError::MissingEmployers(ref ids) if ids == &vec![404]), "got {err:?}");
    assert_eq!(count_rows(&store, "vacancy").await, 0);
    assert_eq!(count_rows(&store, "employer").await, 1);
    store.close().await;
}

#[tokio::test]
async fn conflicting_employer_records_violate_the_primary_key() {
    let Some(store) = isolated_store("hhv_test_pk_conflict").await else {
        return;
    };
    let err = store
        .import_employers(&[employer(93, "Acme"), employer(93, "Acme Renamed")])
        .await
        .expect_err("same id, different name");
    assert!(matches!(err, StoreError::ConstraintViolation(_)), "got {err:?}");
    assert_eq!(count_rows(&store, "employer").await, 0);
    store.close().await;
}

#[tokio::test]
async fn all_vacancies_returns_rows_in_insert_order() {
    let Some(store) = isolated_store("hhv_test_all").await else {
        return;
    };
    let vacancies = vec![
        vacancy("First", 93, Some(10), None),
        vacancy("Second", 93, None, Some(20)),
    ];
    store
        .import_vacancies(&vacancies, &[employer(93, "Acme")])
        .await
        .expect("import");

    let all = store.all_vacancies().await.expect("all");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].name, "First");
    assert_eq!(all[0].salary_from, Some(10));
    assert_eq!(all[1].salary_to, Some(20));
    assert!(all.iter().all(|v| v.employer_id == 93));
    store.close().await;
}

use std::path::PathBuf;

use hhv_adapters::{FixtureSource, VacancySource};

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/hh/vacancies.json")
}

#[test]
fn captured_payload_fixture_exists() {
    assert!(fixture_path().exists());
}

#[tokio::test]
async fn fixture_source_returns_every_item_without_filter() {
    let source = FixtureSource::new(fixture_path());
    let payload = source.fetch_vacancies(None).await.expect("fixture payload");
    assert_eq!(payload.items.len(), 6);
    assert_eq!(payload.found, Some(6));
}

#[tokio::test]
async fn fixture_source_applies_employer_filter() {
    let source = FixtureSource::new(fixture_path());
    let payload = source
        .fetch_vacancies(Some(&[1060821][..]))
        .await
        .expect("fixture payload");
    assert_eq!(payload.items.len(), 2);
    assert!(payload
        .items
        .iter()
        .all(|item| item["employer"]["id"] == "1060821"));
}

#[tokio::test]
async fn missing_fixture_is_an_io_error() {
    let source = FixtureSource::new("/nonexistent/hhv/vacancies.json");
    let err = source.fetch_vacancies(None).await.expect_err("missing file");
    assert!(matches!(err, hhv_adapters::FetchError::Io { .. }));
}

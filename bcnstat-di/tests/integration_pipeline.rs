//! End-to-end pipeline tests
//!
//! Each test drives `IntegrationPipeline::run` against a real temp-file
//! database, fixture catalog and JSON dataset files, then inspects the
//! fact tables, the master table and the returned run summary.

mod helpers;

use bcnstat_di::extract::{Granularity, Manifest, MetricKind};
use bcnstat_di::pipeline::{IntegrationPipeline, RunOptions};
use bcnstat_di::report::RunStatus;
use helpers::*;
use serde_json::json;
use sqlx::SqlitePool;

/// Manifest with population (annual, census), income (annual, tax_agency)
/// and housing prices (quarterly, portal) covering entities 1 and 2
fn standard_manifest(dir: &std::path::Path) -> Manifest {
    let population = write_dataset(
        dir,
        "population.json",
        json!([
            {"code": "01", "period": "2020", "metrics": {"population": 47000}},
            {"code": "02", "period": "2020", "metrics": {"population": 29000}},
            {"code": "01", "period": "2021", "metrics": {"population": 47500}},
            {"code": "02", "period": "2021", "metrics": {"population": 29300}}
        ]),
    );
    let income = write_dataset(
        dir,
        "income.json",
        json!([
            {"code": "01", "period": "2021", "metrics": {"income_eur_year": 31000}},
            {"code": "02", "period": "2021", "metrics": {"income_eur_year": 35000}}
        ]),
    );
    let prices = write_dataset(
        dir,
        "prices.json",
        json!([
            {"neighborhood": "el Raval", "period": "2021-Q1", "metrics": {"price_eur_m2": 15.1}},
            {"neighborhood": "el Raval", "period": "2021-Q2", "metrics": {"price_eur_m2": 15.4}}
        ]),
    );

    Manifest::from_descriptors(vec![
        descriptor(
            population,
            "census",
            "census-2021",
            "fact_population",
            Granularity::Annual,
            &[("population", MetricKind::Count)],
        ),
        descriptor(
            income,
            "tax_agency",
            "irpf-2021",
            "fact_income",
            Granularity::Annual,
            &[("income_eur_year", MetricKind::Amount)],
        ),
        descriptor(
            prices,
            "portal",
            "portal-2021",
            "fact_housing_prices",
            Granularity::Quarterly,
            &[("price_eur_m2", MetricKind::Amount)],
        ),
    ])
}

/// All fact rows of one table minus the surrogate id, in series-key order
async fn table_rows(
    pool: &SqlitePool,
    table: &str,
) -> Vec<(i64, i64, Option<i64>, String, Option<f64>, String, String, i64)> {
    sqlx::query_as(&format!(
        "SELECT entity_id, year, quarter, metric_name, value, source_tag, dataset_id, \
         is_interpolated FROM {table} \
         ORDER BY entity_id, year, COALESCE(quarter, 0), metric_name, source_tag, dataset_id"
    ))
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_full_run_end_to_end() {
    let (dir, pool) = create_test_db().await;
    let manifest = standard_manifest(dir.path());
    let catalog = full_catalog();

    let pipeline = IntegrationPipeline::new(pool.clone(), test_config(dir.path()), RunOptions::default());
    let summary = pipeline.run(&manifest, &catalog).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert!(summary.error.is_none());
    assert_eq!(summary.dimension.unwrap().inserted, 73);
    assert_eq!(summary.sources.len(), 3);
    assert_eq!(summary.tables.len(), 5);
    assert!(summary.tables.iter().all(|t| t.included_in_master));

    // All resolutions succeed: 6 observations by code, 2 by name
    assert_eq!(summary.match_stats.by_code, 6);
    assert_eq!(summary.match_stats.by_name, 2);
    assert_eq!(summary.match_stats.unresolved, 0);

    // Annual series expand to the original row plus four quarters
    assert_eq!(fact_count(&pool, "fact_population").await, 4 * 5);
    assert_eq!(fact_count(&pool, "fact_income").await, 2 * 5);
    assert_eq!(fact_count(&pool, "fact_housing_prices").await, 2);
    let interpolated: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM fact_population WHERE is_interpolated = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(interpolated, 16);

    // Quarterly periods: 2020 Q1-Q4 and 2021 Q1-Q4, for all 73 entities
    let assemble = summary.assemble.unwrap();
    assert_eq!(assemble.periods, 8);
    assert_eq!(assemble.metric_columns, 3);
    assert_eq!(assemble.derived_columns, 2);
    assert_eq!(assemble.rows_written, 73 * 8);
    assert_eq!(fact_count(&pool, "master_table").await, 73 * 8);

    let columns = master_columns(&pool).await;
    assert_eq!(columns[..3], ["entity_id", "year", "quarter"]);
    for expected in [
        "population",
        "income_eur_year",
        "price_eur_m2",
        "price_to_income_ratio",
        "log_income",
    ] {
        assert!(columns.iter().any(|c| c == expected), "missing {}", expected);
    }
    // No listings data configured, so the per-thousand column is skipped
    assert!(!columns.iter().any(|c| c == "listings_per_thousand"));

    // Entity 1, 2021 Q1: all three metrics present plus derived values
    let population = master_value(&pool, "population", 1, 2021, 1).await.unwrap();
    let income = master_value(&pool, "income_eur_year", 1, 2021, 1).await.unwrap();
    let price = master_value(&pool, "price_eur_m2", 1, 2021, 1).await.unwrap();
    let ratio = master_value(&pool, "price_to_income_ratio", 1, 2021, 1).await.unwrap();
    let log_income = master_value(&pool, "log_income", 1, 2021, 1).await.unwrap();
    assert_eq!(population, 47500.0);
    assert_eq!(income, 31000.0);
    assert_eq!(price, 15.1);
    assert!((ratio - 15.1 / 31000.0).abs() < 1e-12);
    assert!((log_income - 31000.0_f64.ln()).abs() < 1e-12);

    // Prices only cover 2021 Q1/Q2; derived values follow their inputs
    assert_eq!(master_value(&pool, "price_eur_m2", 1, 2021, 2).await, Some(15.4));
    assert_eq!(master_value(&pool, "price_eur_m2", 1, 2020, 3).await, None);
    assert_eq!(master_value(&pool, "price_to_income_ratio", 1, 2020, 3).await, None);
    assert_eq!(master_value(&pool, "population", 1, 2020, 3).await, Some(47000.0));

    // Entities without data get grid rows with NULL metrics
    assert_eq!(master_value(&pool, "population", 50, 2021, 1).await, None);

    // Session bookkeeping
    let (status, summary_json): (String, Option<String>) =
        sqlx::query_as("SELECT status, summary FROM run_sessions")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "succeeded");
    assert!(summary_json.is_some());
}

#[tokio::test]
async fn test_reruns_are_idempotent() {
    let (dir, pool) = create_test_db().await;
    let manifest = standard_manifest(dir.path());
    let catalog = full_catalog();

    let pipeline = IntegrationPipeline::new(pool.clone(), test_config(dir.path()), RunOptions::default());
    let first = pipeline.run(&manifest, &catalog).await.unwrap();
    assert_eq!(first.status, RunStatus::Succeeded);

    let population_before = table_rows(&pool, "fact_population").await;
    let prices_before = table_rows(&pool, "fact_housing_prices").await;
    let master_before: Vec<(i64, i64, i64, Option<f64>)> = sqlx::query_as(
        "SELECT entity_id, year, quarter, population FROM master_table \
         ORDER BY entity_id, year, quarter",
    )
    .fetch_all(&pool)
    .await
    .unwrap();

    let second = pipeline.run(&manifest, &catalog).await.unwrap();
    assert_eq!(second.status, RunStatus::Succeeded);
    assert_eq!(second.dimension.unwrap().inserted, 0);

    assert_eq!(table_rows(&pool, "fact_population").await, population_before);
    assert_eq!(table_rows(&pool, "fact_housing_prices").await, prices_before);
    let master_after: Vec<(i64, i64, i64, Option<f64>)> = sqlx::query_as(
        "SELECT entity_id, year, quarter, population FROM master_table \
         ORDER BY entity_id, year, quarter",
    )
    .fetch_all(&pool)
    .await
    .unwrap();
    assert_eq!(master_after, master_before);

    // Both runs recorded
    let sessions: Vec<(String,)> = sqlx::query_as("SELECT status FROM run_sessions")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(sessions.len(), 2);
    assert!(sessions.iter().all(|(s,)| s == "succeeded"));
}

#[tokio::test]
async fn test_year_range_limits_loaded_records() {
    let (dir, pool) = create_test_db().await;
    let population = write_dataset(
        dir.path(),
        "population.json",
        json!([
            {"code": "01", "period": "2018", "metrics": {"population": 46000}},
            {"code": "01", "period": "2019", "metrics": {"population": 46500}},
            {"code": "01", "period": "2020", "metrics": {"population": 47000}},
            {"code": "01", "period": "2021", "metrics": {"population": 47500}},
            {"code": "01", "period": "2022", "metrics": {"population": 48000}}
        ]),
    );
    let manifest = Manifest::from_descriptors(vec![descriptor(
        population,
        "census",
        "census-series",
        "fact_population",
        Granularity::Annual,
        &[("population", MetricKind::Count)],
    )]);

    let options = RunOptions {
        year_start: Some(2020),
        year_end: Some(2021),
        ..RunOptions::default()
    };
    let pipeline = IntegrationPipeline::new(pool.clone(), test_config(dir.path()), options);
    let summary = pipeline.run(&manifest, &full_catalog()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.sources[0].outside_year_range, 3);
    // Two surviving annual records, each expanded to five rows
    assert_eq!(fact_count(&pool, "fact_population").await, 10);
    let years: Vec<(i64,)> =
        sqlx::query_as("SELECT DISTINCT year FROM fact_population ORDER BY year")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(years, vec![(2020,), (2021,)]);
}

#[tokio::test]
async fn test_source_selection_skips_other_sources() {
    let (dir, pool) = create_test_db().await;
    let manifest = standard_manifest(dir.path());

    let options = RunOptions {
        sources: vec!["census".to_string()],
        ..RunOptions::default()
    };
    let pipeline = IntegrationPipeline::new(pool.clone(), test_config(dir.path()), options);
    let summary = pipeline.run(&manifest, &full_catalog()).await.unwrap();

    assert_eq!(summary.status, RunStatus::Succeeded);
    // Only the census dataset was processed; the others left no trace
    assert_eq!(summary.sources.len(), 1);
    assert_eq!(summary.sources[0].dataset_id, "census-2021");
    assert_eq!(fact_count(&pool, "fact_population").await, 4 * 5);
    assert_eq!(fact_count(&pool, "fact_income").await, 0);
    assert_eq!(fact_count(&pool, "fact_housing_prices").await, 0);
}

#[tokio::test]
async fn test_missing_source_file_keeps_run_alive() {
    let (dir, pool) = create_test_db().await;

    let population = write_dataset(
        dir.path(),
        "population.json",
        json!([
            {"code": "01", "period": "2021", "metrics": {"population": 47500}}
        ]),
    );
    let manifest = Manifest::from_descriptors(vec![
        descriptor(
            population,
            "census",
            "census-2021",
            "fact_population",
            Granularity::Annual,
            &[("population", MetricKind::Count)],
        ),
        descriptor(
            dir.path().join("never-written.json"),
            "portal",
            "portal-listings-2021",
            "fact_str_listings",
            Granularity::Quarterly,
            &[("listings", MetricKind::Count)],
        ),
    ]);

    let pipeline =
        IntegrationPipeline::new(pool.clone(), test_config(dir.path()), RunOptions::default());
    let summary = pipeline.run(&manifest, &full_catalog()).await.unwrap();

    // The broken source is reported as failed; the run itself survives
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.sources.len(), 2);
    let listings = summary
        .sources
        .iter()
        .find(|s| s.dataset_id == "portal-listings-2021")
        .unwrap();
    let failure = listings.failed.as_deref().unwrap();
    assert!(failure.contains("dataset file missing"), "failure was: {}", failure);
    assert_eq!(fact_count(&pool, "fact_str_listings").await, 0);

    // An empty-but-declared table is still valid; its column rides along
    // as all NULL and it contributes no periods
    let listings_table = summary
        .tables
        .iter()
        .find(|t| t.table == "fact_str_listings")
        .unwrap();
    assert!(listings_table.included_in_master);
    let columns = master_columns(&pool).await;
    assert!(columns.iter().any(|c| c == "listings"));
    assert_eq!(fact_count(&pool, "master_table").await, 73 * 4);
}

#[tokio::test]
async fn test_duplicated_manifest_entry_loads_once() {
    let (dir, pool) = create_test_db().await;
    write_dataset(
        dir.path(),
        "population.json",
        json!([
            {"code": "01", "period": "2021", "metrics": {"population": 47500}}
        ]),
    );
    // The same dataset pasted twice, as in a hand-edited manifest
    let entry = json!({
        "file_path": "population.json",
        "source_tag": "census",
        "dataset_id": "census-2021",
        "table": "fact_population",
        "granularity": "annual",
        "metric_schema": {"population": "count"}
    });
    let manifest_path = dir.path().join("manifest.json");
    std::fs::write(
        &manifest_path,
        serde_json::to_string_pretty(&json!([entry.clone(), entry])).unwrap(),
    )
    .unwrap();
    let manifest = Manifest::load(&manifest_path).unwrap();
    assert_eq!(manifest.datasets.len(), 1);
    assert_eq!(manifest.skipped_entries, 1);

    let pipeline =
        IntegrationPipeline::new(pool.clone(), test_config(dir.path()), RunOptions::default());
    let summary = pipeline.run(&manifest, &full_catalog()).await.unwrap();

    // The dataset loads once; a second append of the same rows would have
    // collided on the fact series key and failed the run
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert!(summary.error.is_none());
    assert_eq!(summary.manifest_entries_skipped, 1);
    assert_eq!(summary.sources.len(), 1);
    assert_eq!(fact_count(&pool, "fact_population").await, 5);
}

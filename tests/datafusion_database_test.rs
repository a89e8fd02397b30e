use std::path::PathBuf;
use std::sync::Once;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use nlq_engine_service::catalog::ColumnType;
use nlq_engine_service::database::{
    AnalyticsDatabase, MetadataAccessor, QueryExecutor,
};
use nlq_engine_service::error::NlqError;

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

fn write_sales_csv(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("sales.csv");
    let mut writer = csv::Writer::from_path(&path).expect("Failed to create CSV");
    writer
        .write_record(["region", "amount", "sale_date"])
        .expect("Failed to write header");
    for (region, amount, date) in [
        ("west", "10.5", "2024-01-01"),
        ("east", "20.0", "2024-01-02"),
        ("west", "5.25", "2024-01-03"),
        ("north", "7.75", "2024-01-04"),
    ] {
        writer
            .write_record([region, amount, date])
            .expect("Failed to write row");
    }
    writer.flush().expect("Failed to flush CSV");
    path
}

async fn database_with_sales() -> (AnalyticsDatabase, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_sales_csv(&dir);
    let db = AnalyticsDatabase::new(Duration::from_secs(10)).expect("Failed to build database");
    db.register_csv("sales", &path)
        .await
        .expect("Registration should succeed");
    (db, dir)
}

#[tokio::test]
async fn test_registered_csv_is_listed_and_typed() {
    init_test_logging();

    // Given
    let (db, _dir) = database_with_sales().await;

    // Then: the table is listed and its inferred column types are usable
    let tables = db.tables().await.expect("Listing should work");
    assert_eq!(tables, vec!["sales".to_string()]);

    let columns = db.columns("sales").await.expect("Columns should resolve");
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["region", "amount", "sale_date"]);

    let amount = columns.iter().find(|c| c.name == "amount").unwrap();
    assert_eq!(amount.data_type, ColumnType::Float);
    let region = columns.iter().find(|c| c.name == "region").unwrap();
    assert_eq!(region.data_type, ColumnType::Text);

    assert_eq!(db.row_count("sales").await.expect("Count should work"), 4);
    db.health_check().await.expect("Health check should pass");
}

#[tokio::test]
async fn test_select_returns_typed_json_rows() {
    init_test_logging();

    let (db, _dir) = database_with_sales().await;

    let output = db
        .execute(r#"SELECT "amount" FROM "sales" WHERE "region" = 'east'"#)
        .await
        .expect("Filtered SELECT should work");
    assert_eq!(output.columns, vec!["amount".to_string()]);
    assert_eq!(output.rows.len(), 1);
    assert_eq!(output.rows[0].get("amount"), Some(&json!(20.0)));

    let counted = db
        .execute(r#"SELECT COUNT(*) AS row_total FROM "sales""#)
        .await
        .expect("Aggregation should work");
    assert_eq!(counted.rows[0].get("row_total"), Some(&json!(4)));
}

#[tokio::test]
async fn test_empty_result_keeps_column_names() {
    init_test_logging();

    let (db, _dir) = database_with_sales().await;

    let output = db
        .execute(r#"SELECT "region" FROM "sales" WHERE "amount" < 0"#)
        .await
        .expect("Empty SELECT should work");
    assert!(output.rows.is_empty());
    assert_eq!(output.columns, vec!["region".to_string()]);
}

#[tokio::test]
async fn test_ddl_and_dml_are_rejected_at_execution() {
    init_test_logging();

    // Given: statements that skipped every upstream gate
    let (db, _dir) = database_with_sales().await;

    for statement in [
        "DROP TABLE sales",
        "INSERT INTO sales VALUES ('south', 1.0, '2024-02-01')",
        "CREATE TABLE copy_of_sales AS SELECT * FROM sales",
        "SET datafusion.execution.batch_size = 1",
    ] {
        let result = db.execute(statement).await;
        assert!(
            matches!(result, Err(NlqError::Execution { .. })),
            "Should reject at the engine: {}",
            statement
        );
    }

    // And: the table is untouched
    assert_eq!(db.row_count("sales").await.expect("Count should work"), 4);
}

#[tokio::test]
async fn test_reregistering_a_table_replaces_it() {
    init_test_logging();

    let (db, dir) = database_with_sales().await;

    // A second file with fewer rows under the same table name.
    let path = dir.path().join("sales_v2.csv");
    let mut writer = csv::Writer::from_path(&path).expect("Failed to create CSV");
    writer
        .write_record(["region", "amount", "sale_date"])
        .expect("Failed to write header");
    writer
        .write_record(["south", "1.0", "2024-02-01"])
        .expect("Failed to write row");
    writer.flush().expect("Failed to flush CSV");

    db.register_csv("sales", &path)
        .await
        .expect("Re-registration should succeed");
    assert_eq!(db.row_count("sales").await.expect("Count should work"), 1);
}

#[tokio::test]
async fn test_bad_table_names_and_missing_files_are_rejected() {
    init_test_logging();

    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = write_sales_csv(&dir);
    let db = AnalyticsDatabase::new(Duration::from_secs(10)).expect("Failed to build database");

    let result = db.register_csv("bad name;", &path).await;
    assert!(matches!(result, Err(NlqError::Validation { .. })));

    let result = db.register_csv("sales", &dir.path().join("missing.csv")).await;
    assert!(matches!(result, Err(NlqError::Config { .. })));
}

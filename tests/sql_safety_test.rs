use std::sync::Once;

use chrono::Utc;
use nlq_engine_service::catalog::{
    ColumnProfile, ColumnStats, ColumnType, NumericStats, SchemaAnnotations, TableKeys,
    TableSchema, TemporalStats, TextStats,
};
use nlq_engine_service::error::NlqError;
use nlq_engine_service::validator::SqlValidator;

static INIT: Once = Once::new();

fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

fn column(name: &str, data_type: ColumnType) -> ColumnProfile {
    let stats = match data_type {
        ColumnType::Integer | ColumnType::Float => ColumnStats::Numeric(NumericStats {
            min: None,
            max: None,
            mean: None,
            median: None,
            std_dev: None,
            null_count: 0,
            null_percentage: 0.0,
            unique_count: 0,
            is_integer: data_type == ColumnType::Integer,
            is_categorical: false,
            value_counts: Vec::new(),
        }),
        ColumnType::Date | ColumnType::Timestamp => ColumnStats::Temporal(TemporalStats {
            min: None,
            max: None,
            time_span_days: None,
            null_count: 0,
            null_percentage: 0.0,
            unique_count: 0,
            is_time_series: false,
            approximate_frequency: None,
        }),
        _ => ColumnStats::Text(TextStats {
            min_length: 0,
            max_length: 0,
            null_count: 0,
            null_percentage: 0.0,
            unique_count: 0,
            is_unique: false,
            is_categorical: false,
            value_counts: Vec::new(),
            is_email: false,
            is_url: false,
            likely_contains_names: false,
        }),
    };
    ColumnProfile {
        name: name.to_string(),
        data_type,
        declared_type: data_type.as_str().to_string(),
        nullable: true,
        is_primary_key: false,
        stats,
    }
}

fn sales_schema() -> TableSchema {
    TableSchema {
        table_name: "sales".to_string(),
        row_count: 100,
        analyzed_at: Utc::now(),
        columns: vec![
            column("region", ColumnType::Text),
            column("amount", ColumnType::Float),
            column("sale_date", ColumnType::Date),
            column("updated_at", ColumnType::Timestamp),
        ],
        relationships: Vec::new(),
        keys: TableKeys::default(),
        sample_queries: Vec::new(),
        annotations: SchemaAnnotations::default(),
    }
}

fn validator() -> SqlValidator {
    SqlValidator::new(100).expect("Failed to build validator")
}

fn validation_message(result: Result<String, NlqError>) -> String {
    match result {
        Err(NlqError::Validation { message }) => message,
        Err(other) => panic!("Expected a validation error, got: {}", other),
        Ok(sql) => panic!("Expected rejection, got accepted SQL: {}", sql),
    }
}

#[test]
fn test_prepared_select_starts_clean_and_carries_one_limit() {
    init_test_logging();

    // Given
    let validator = validator();
    let schema = sales_schema();

    // When
    let prepared = validator
        .prepare(r#"SELECT "region" FROM "sales""#, &schema)
        .expect("Plain SELECT should pass");

    // Then
    assert!(prepared.starts_with("SELECT"), "Got: {}", prepared);
    assert!(!prepared.contains(';'), "Got: {}", prepared);
    assert_eq!(
        prepared.to_lowercase().matches("limit").count(),
        1,
        "Exactly one limit expected, got: {}",
        prepared
    );
    assert!(prepared.ends_with("LIMIT 100"), "Got: {}", prepared);
}

#[test]
fn test_with_clause_is_accepted_as_statement_start() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    let prepared = validator
        .prepare(
            r#"WITH t AS (SELECT "region" FROM "sales") SELECT * FROM t"#,
            &schema,
        )
        .expect("CTE should pass");
    assert!(prepared.starts_with("WITH"), "Got: {}", prepared);
}

#[test]
fn test_prepare_is_idempotent_on_accepted_output() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    let once = validator
        .prepare(r#"SELECT "region" FROM "sales""#, &schema)
        .expect("First pass should succeed");
    let twice = validator
        .prepare(&once, &schema)
        .expect("Second pass should succeed");
    assert_eq!(once, twice);
}

#[test]
fn test_generation_artifacts_are_stripped() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    // A leading label and explanatory prose ahead of the statement both go.
    let labeled = validator
        .prepare(r#"sql: SELECT "region" FROM "sales""#, &schema)
        .expect("Labeled SQL should pass");
    assert!(labeled.starts_with("SELECT"), "Got: {}", labeled);

    let prosed = validator
        .prepare(
            "Here is the query you asked for:\nSELECT \"region\" FROM \"sales\"",
            &schema,
        )
        .expect("Prose-prefixed SQL should pass");
    assert!(prosed.starts_with("SELECT"), "Got: {}", prosed);
}

#[test]
fn test_known_identifiers_pass_and_unknown_are_named() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    assert!(validator
        .prepare(r#"SELECT "region", "amount" FROM "sales""#, &schema)
        .is_ok());

    let message = validation_message(validator.prepare(r#"SELECT "bogus" FROM "sales""#, &schema));
    assert!(message.contains("bogus"), "Got: {}", message);

    let message =
        validation_message(validator.prepare(r#"SELECT * FROM "other_table""#, &schema));
    assert!(message.contains("other_table"), "Got: {}", message);
}

#[test]
fn test_alias_must_be_introduced_before_use() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    // Introduced with AS, then referenced later: fine.
    assert!(validator
        .prepare(
            r#"SELECT SUM("amount") AS "total_amount" FROM "sales" GROUP BY "region" ORDER BY "total_amount" DESC"#,
            &schema,
        )
        .is_ok());

    // Referenced without any introduction: named in the rejection.
    let message = validation_message(
        validator.prepare(r#"SELECT "region" FROM "sales" ORDER BY "total_amount""#, &schema),
    );
    assert!(message.contains("total_amount"), "Got: {}", message);
}

#[test]
fn test_forbidden_keywords_rejected_as_whole_words_only() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    for statement in [
        r#"UPDATE "sales" SET "amount" = 0"#,
        r#"DROP TABLE "sales""#,
        r#"DELETE FROM "sales""#,
        r#"INSERT INTO "sales" VALUES (1)"#,
        r#"SELECT "region" FROM "sales" WHERE drop = 1"#,
    ] {
        assert!(
            validator.prepare(statement, &schema).is_err(),
            "Should reject: {}",
            statement
        );
    }

    // "update" inside an identifier is not the keyword.
    assert!(validator
        .prepare(r#"SELECT "updated_at" FROM "sales""#, &schema)
        .is_ok());
}

#[test]
fn test_comment_markers_and_statement_chaining_rejected() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    for statement in [
        r#"SELECT "region" FROM "sales" -- hidden"#,
        r#"SELECT "region" /* hidden */ FROM "sales""#,
        r#"SELECT "region" FROM "sales"; SELECT "amount" FROM "sales""#,
    ] {
        let message = validation_message(validator.prepare(statement, &schema));
        assert!(
            message.contains("Only SELECT queries are allowed"),
            "Got: {}",
            message
        );
    }
}

#[test]
fn test_trailing_semicolon_is_stripped_not_rejected() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    let prepared = validator
        .prepare(r#"SELECT "region" FROM "sales";"#, &schema)
        .expect("Trailing semicolon should be tolerated");
    assert!(!prepared.contains(';'), "Got: {}", prepared);
}

#[test]
fn test_existing_limit_is_untouched() {
    init_test_logging();

    let validator = validator();
    let schema = sales_schema();

    let prepared = validator
        .prepare(r#"SELECT "region" FROM "sales" LIMIT 5"#, &schema)
        .expect("Explicit limit should pass");
    assert!(prepared.ends_with("LIMIT 5"), "Got: {}", prepared);
    assert_eq!(prepared.to_lowercase().matches("limit").count(), 1);
}

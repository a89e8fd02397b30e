use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map as JsonMap};

use nlq_engine_service::catalog::{
    ColumnProfile, ColumnStats, ColumnType, NumericStats, SchemaAnnotations, TableKeys,
    TableSchema, TemporalStats, TextStats, VisualizationType,
};
use nlq_engine_service::database::{QueryExecutor, QueryOutput};
use nlq_engine_service::error::NlqError;
use nlq_engine_service::history::{HistoryStore, MemoryHistoryStore, QueryStatus};
use nlq_engine_service::llm::{GenerationBackend, HealthCache, LlmClient};
use nlq_engine_service::orchestrator::LlmOrchestrator;
use nlq_engine_service::pipeline::{QueryOutcome, QueryPipeline};
use nlq_engine_service::prompt::{PromptBuilder, PromptTemplates};
use nlq_engine_service::response::infer_visualization;
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

/// Replays a queue of canned model responses.
struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedBackend {
    fn new(responses: Vec<Result<String, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, _prompt: &str) -> Result<String, NlqError> {
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(NlqError::Generation { message }),
            None => Err(NlqError::Generation {
                message: "script exhausted".to_string(),
            }),
        }
    }
}

/// Records every statement it sees and replays a queue of canned results.
struct ScriptedExecutor {
    calls: Mutex<Vec<String>>,
    results: Mutex<VecDeque<Result<QueryOutput, String>>>,
}

impl ScriptedExecutor {
    fn new(results: Vec<Result<QueryOutput, String>>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            results: Mutex::new(results.into()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, NlqError> {
        self.calls.lock().unwrap().push(sql.to_string());
        match self.results.lock().unwrap().pop_front() {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(NlqError::Execution { message }),
            None => Err(NlqError::Execution {
                message: "unexpected execute call".to_string(),
            }),
        }
    }
}

fn region_totals() -> QueryOutput {
    let mut row = JsonMap::new();
    row.insert("region".to_string(), json!("west"));
    row.insert("total_amount".to_string(), json!(100.0));
    QueryOutput {
        columns: vec!["region".to_string(), "total_amount".to_string()],
        rows: vec![row],
    }
}

fn build_pipeline(
    responses: Vec<Result<String, String>>,
    executor: Arc<ScriptedExecutor>,
    history: Arc<MemoryHistoryStore>,
) -> QueryPipeline {
    let primary: Box<dyn GenerationBackend> = Box::new(ScriptedBackend::new(responses));
    let client = LlmClient::with_backends(
        primary,
        Vec::new(),
        HealthCache::new(Duration::from_secs(60)),
    )
    .expect("Failed to build client");
    let templates: Arc<dyn PromptTemplates> = Arc::new(PromptBuilder::new());
    let orchestrator =
        Arc::new(LlmOrchestrator::new(client, templates).expect("Failed to build orchestrator"));
    QueryPipeline::new(
        orchestrator,
        executor,
        history,
        SqlValidator::new(100).expect("Failed to build validator"),
    )
}

#[tokio::test]
async fn test_ambiguous_time_question_asks_one_clarification() {
    init_test_logging();

    // Given: two temporal columns and a question about "last quarter"
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
    let history = Arc::new(MemoryHistoryStore::new());
    let pipeline = build_pipeline(Vec::new(), executor.clone(), history.clone());

    // When
    let outcome = pipeline
        .run("show sales from last quarter", &sales_schema())
        .await
        .expect("Clarification is a successful outcome");

    // Then
    match outcome {
        QueryOutcome::Clarification { message, questions } => {
            assert_eq!(message, "I need a bit more detail to answer precisely.");
            assert_eq!(questions.len(), 1, "Got: {:?}", questions);
            assert_eq!(
                questions[0],
                "Which date column should I use? Options: sale_date, updated_at."
            );
        }
        other => panic!("Expected clarification, got: {:?}", other),
    }

    // And: nothing was executed, and the run is in the history with no SQL
    assert!(executor.calls().is_empty());
    let records = history.recent(10).await.expect("History read should work");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, QueryStatus::Clarify);
    assert!(records[0].sql_query.is_empty());
}

#[tokio::test]
async fn test_failed_execution_is_repaired_once_and_final_sql_reported() {
    init_test_logging();

    // Given: the first statement fails at execution, the model proposes a
    // fix, and the fix runs clean
    let first_sql = r#"SELECT "region" FROM "sales" GROUP BY "region""#;
    let fixed_sql =
        r#"SELECT "region", SUM("amount") AS "total_amount" FROM "sales" GROUP BY "region""#;
    let fix_response = format!(
        "```json\n{}\n```",
        json!({
            "error_analysis": "Aggregation was missing",
            "fixed_query": fixed_sql,
        })
    );
    let analysis_response = format!(
        "```json\n{}\n```",
        json!({
            "natural_language_response": "Totals by region.",
            "explanation": "Grouped by region and summed the amounts.",
            "visualization_type": "bar",
        })
    );

    let executor = Arc::new(ScriptedExecutor::new(vec![
        Err("Projection references non-aggregate values".to_string()),
        Ok(region_totals()),
    ]));
    let history = Arc::new(MemoryHistoryStore::new());
    let pipeline = build_pipeline(
        vec![
            Ok(first_sql.to_string()),
            Ok(fix_response),
            Ok(analysis_response),
        ],
        executor.clone(),
        history.clone(),
    );

    // When
    let outcome = pipeline
        .run("total amount by region", &sales_schema())
        .await
        .expect("Repaired run should succeed");

    // Then: the reported SQL is the repaired statement that produced the rows
    let answer = match outcome {
        QueryOutcome::Answer(answer) => answer,
        other => panic!("Expected an answer, got: {:?}", other),
    };
    let expected_final = format!("{} LIMIT 100", fixed_sql);
    assert_eq!(answer.sql, expected_final);
    assert_eq!(answer.summary, "Totals by region.");
    assert_eq!(answer.visualization, VisualizationType::Bar);
    assert_eq!(answer.rows.len(), 1);

    // And: both attempts reached the executor
    let calls = executor.calls();
    assert_eq!(calls.len(), 2, "Got: {:?}", calls);
    assert_eq!(calls[0], format!("{} LIMIT 100", first_sql));
    assert_eq!(calls[1], expected_final);

    // And: history holds one success with the final SQL
    let records = history.recent(10).await.expect("History read should work");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, QueryStatus::Success);
    assert_eq!(records[0].sql_query, expected_final);
}

#[tokio::test]
async fn test_validation_failure_is_terminal() {
    init_test_logging();

    // Given: the model produces a destructive statement
    let executor = Arc::new(ScriptedExecutor::new(Vec::new()));
    let history = Arc::new(MemoryHistoryStore::new());
    let pipeline = build_pipeline(
        vec![Ok(r#"DROP TABLE "sales""#.to_string())],
        executor.clone(),
        history.clone(),
    );

    // When
    let result = pipeline.run("delete everything", &sales_schema()).await;

    // Then: rejected without execution and without a repair attempt
    assert!(matches!(result, Err(NlqError::Validation { .. })));
    assert!(executor.calls().is_empty());
    let records = history.recent(10).await.expect("History read should work");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, QueryStatus::Error);
}

#[tokio::test]
async fn test_fallback_serves_when_primary_fails() {
    init_test_logging();

    // Given
    let primary: Box<dyn GenerationBackend> =
        Box::new(ScriptedBackend::new(vec![Err("primary down".to_string())]));
    let fallbacks: Vec<Box<dyn GenerationBackend>> = vec![Box::new(ScriptedBackend::new(vec![
        Ok("```sql\nSELECT 1\n```".to_string()),
    ]))];
    let client = LlmClient::with_backends(
        primary,
        fallbacks,
        HealthCache::new(Duration::from_secs(60)),
    )
    .expect("Failed to build client");

    // When
    let text = client
        .generate("prompt")
        .await
        .expect("Fallback should serve the request");

    // Then: the fallback's text comes back with the fence stripped
    assert_eq!(text, "SELECT 1");
}

#[tokio::test]
async fn test_all_backends_failing_reports_both_errors() {
    init_test_logging();

    let primary: Box<dyn GenerationBackend> =
        Box::new(ScriptedBackend::new(vec![Err("primary down".to_string())]));
    let fallbacks: Vec<Box<dyn GenerationBackend>> = vec![Box::new(ScriptedBackend::new(vec![
        Err("fallback down".to_string()),
    ]))];
    let client = LlmClient::with_backends(
        primary,
        fallbacks,
        HealthCache::new(Duration::from_secs(60)),
    )
    .expect("Failed to build client");

    let err = client
        .generate("prompt")
        .await
        .expect_err("All backends are down");
    let message = err.to_string();
    assert!(message.contains("primary down"), "Got: {}", message);
    assert!(message.contains("fallback down"), "Got: {}", message);
}

#[tokio::test]
async fn test_unparseable_analysis_falls_back_to_counted_summary() {
    init_test_logging();

    // Given: the analysis call returns prose instead of the JSON contract
    let generated_sql =
        r#"SELECT "region", SUM("amount") AS "total_amount" FROM "sales" GROUP BY "region""#;
    let executor = Arc::new(ScriptedExecutor::new(vec![Ok(region_totals())]));
    let history = Arc::new(MemoryHistoryStore::new());
    let pipeline = build_pipeline(
        vec![
            Ok(generated_sql.to_string()),
            Ok("The results look reasonable to me.".to_string()),
        ],
        executor.clone(),
        history.clone(),
    );

    // When
    let outcome = pipeline
        .run("how did each region perform", &sales_schema())
        .await
        .expect("An unparseable analysis should not fail the request");

    // Then: a counted summary and a shape-inferred chart, not a failure
    let answer = match outcome {
        QueryOutcome::Answer(answer) => answer,
        other => panic!("Expected an answer, got: {:?}", other),
    };
    assert_eq!(
        answer.summary,
        "Returned 1 rows. Columns: region, total_amount."
    );
    assert!(answer.explanation.is_empty(), "Got: {}", answer.explanation);
    assert_eq!(answer.visualization, VisualizationType::Bar);

    let records = history.recent(10).await.expect("History read should work");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, QueryStatus::Success);
}

#[test]
fn test_visualization_inference_follows_result_shape() {
    init_test_logging();

    let schema = sales_schema();

    // A numeric column next to a temporal one: line. The bucketed month is
    // a derived column, judged by its value shape.
    let mut bucket = JsonMap::new();
    bucket.insert("month".to_string(), json!("2024-03-01"));
    bucket.insert("total_sales".to_string(), json!(42));
    let monthly = QueryOutput {
        columns: vec!["month".to_string(), "total_sales".to_string()],
        rows: vec![bucket],
    };
    assert_eq!(
        infer_visualization(&monthly, &schema),
        VisualizationType::Line
    );

    // Exactly one numeric beside a label column: bar.
    assert_eq!(
        infer_visualization(&region_totals(), &schema),
        VisualizationType::Bar
    );

    // No rows: table.
    let empty = QueryOutput {
        columns: vec!["region".to_string()],
        rows: Vec::new(),
    };
    assert_eq!(infer_visualization(&empty, &schema), VisualizationType::Table);

    // All numeric, nothing to label an axis with: table.
    let mut pair = JsonMap::new();
    pair.insert("amount".to_string(), json!(10.5));
    pair.insert("total_amount".to_string(), json!(21.0));
    let totals = QueryOutput {
        columns: vec!["amount".to_string(), "total_amount".to_string()],
        rows: vec![pair],
    };
    assert_eq!(infer_visualization(&totals, &schema), VisualizationType::Table);
}

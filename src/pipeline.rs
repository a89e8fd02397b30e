use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map as JsonMap, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{ColumnProfile, TableSchema, VisualizationType};
use crate::database::QueryExecutor;
use crate::error::NlqError;
use crate::history::{HistoryStore, QueryHistoryRecord, QueryStatus};
use crate::orchestrator::LlmOrchestrator;
use crate::validator::SqlValidator;

const CLARIFY_MESSAGE: &str = "I need a bit more detail to answer precisely.";
const MAX_CLARIFICATION_QUESTIONS: usize = 2;
const CLARIFICATION_OPTION_LIMIT: usize = 6;

const TIME_TERMS: [&str; 14] = [
    "last",
    "this",
    "previous",
    "next",
    "year",
    "month",
    "week",
    "quarter",
    "today",
    "yesterday",
    "between",
    "from",
    "to",
    "date",
];

const METRIC_TERMS: [&str; 8] = [
    "sales", "revenue", "amount", "total", "profit", "cost", "price", "value",
];

/// Questions to send back when the request is too ambiguous to answer with
/// one query. Empty means the question is specific enough to proceed.
pub fn detect_clarification_questions(question: &str, schema: &TableSchema) -> Vec<String> {
    let lowered = question.to_lowercase();
    let words: HashSet<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let mut questions = Vec::new();

    let temporal = schema.temporal_columns();
    if temporal.len() > 1 && TIME_TERMS.iter().any(|t| words.contains(t)) {
        questions.push(format!(
            "Which date column should I use? Options: {}.",
            option_list(&temporal)
        ));
    }

    let numeric = schema.numeric_columns();
    if numeric.len() > 1
        && METRIC_TERMS.iter().any(|t| words.contains(t))
        && !mentions_any(&lowered, &schema.columns)
    {
        questions.push(format!(
            "Which metric column should I use? Options: {}.",
            option_list(&numeric)
        ));
    }

    let id_like = schema.id_like_columns();
    if id_like.len() > 1
        && (words.contains("count") || lowered.contains("number of"))
        && !mentions_any(&lowered, id_like.iter().copied())
    {
        questions.push(format!(
            "Which identifier should I count? Options: {}.",
            option_list(&id_like)
        ));
    }

    questions.truncate(MAX_CLARIFICATION_QUESTIONS);
    questions
}

fn option_list(columns: &[&ColumnProfile]) -> String {
    columns
        .iter()
        .take(CLARIFICATION_OPTION_LIMIT)
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn mentions_any<'a, I>(lowered_question: &str, columns: I) -> bool
where
    I: IntoIterator<Item = &'a ColumnProfile>,
{
    columns
        .into_iter()
        .any(|c| lowered_question.contains(&c.name.to_lowercase()))
}

/// Fully resolved answer for a question that made it through the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<JsonMap<String, Value>>,
    pub summary: String,
    pub explanation: String,
    pub visualization: VisualizationType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum QueryOutcome {
    Clarification {
        message: String,
        questions: Vec<String>,
    },
    Answer(QueryAnswer),
}

/// Runs a natural-language question end to end: clarification check,
/// generation, validation, execution with a single repair attempt, then
/// result analysis. Every terminal outcome lands in the history store.
pub struct QueryPipeline {
    orchestrator: Arc<LlmOrchestrator>,
    executor: Arc<dyn QueryExecutor>,
    history: Arc<dyn HistoryStore>,
    validator: SqlValidator,
}

impl QueryPipeline {
    pub fn new(
        orchestrator: Arc<LlmOrchestrator>,
        executor: Arc<dyn QueryExecutor>,
        history: Arc<dyn HistoryStore>,
        validator: SqlValidator,
    ) -> Self {
        Self {
            orchestrator,
            executor,
            history,
            validator,
        }
    }

    pub async fn run(
        &self,
        question: &str,
        schema: &TableSchema,
    ) -> Result<QueryOutcome, NlqError> {
        let request_id = Uuid::new_v4();
        info!(
            "Query {} against table {}: {}",
            request_id, schema.table_name, question
        );

        let questions = detect_clarification_questions(question, schema);
        if !questions.is_empty() {
            info!(
                "Query {}: ambiguous, asking {} clarification question(s)",
                request_id,
                questions.len()
            );
            self.record(schema, question, "", QueryStatus::Clarify, None)
                .await;
            return Ok(QueryOutcome::Clarification {
                message: CLARIFY_MESSAGE.to_string(),
                questions,
            });
        }

        debug!("Query {}: generating SQL", request_id);
        let candidate = match self.orchestrator.generate_sql(question, schema).await {
            Ok(sql) => sql,
            Err(e) => {
                self.record(schema, question, "", QueryStatus::Error, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        let prepared = match self.validator.prepare(&candidate, schema) {
            Ok(sql) => sql,
            Err(e) => {
                self.record(schema, question, "", QueryStatus::Error, Some(e.to_string()))
                    .await;
                return Err(e);
            }
        };

        debug!("Query {}: executing", request_id);
        let (final_sql, output) = match self.executor.execute(&prepared).await {
            Ok(output) => (prepared, output),
            Err(exec_err) => {
                warn!(
                    "Query {}: execution failed, attempting repair: {}",
                    request_id, exec_err
                );
                let fix = self
                    .orchestrator
                    .fix_sql_error(&exec_err.to_string(), &prepared, schema)
                    .await;
                if fix.fixed_query.is_empty() {
                    info!(
                        "Query {}: no usable fix produced ({})",
                        request_id, fix.error_analysis
                    );
                    self.record(
                        schema,
                        question,
                        &prepared,
                        QueryStatus::Error,
                        Some(exec_err.to_string()),
                    )
                    .await;
                    return Err(exec_err);
                }

                let prepared_fix = match self.validator.prepare(&fix.fixed_query, schema) {
                    Ok(sql) => sql,
                    Err(e) => {
                        self.record(schema, question, "", QueryStatus::Error, Some(e.to_string()))
                            .await;
                        return Err(e);
                    }
                };
                match self.executor.execute(&prepared_fix).await {
                    Ok(output) => {
                        info!("Query {}: repaired statement succeeded", request_id);
                        (prepared_fix, output)
                    }
                    Err(e) => {
                        self.record(
                            schema,
                            question,
                            &prepared_fix,
                            QueryStatus::Error,
                            Some(e.to_string()),
                        )
                        .await;
                        return Err(e);
                    }
                }
            }
        };

        debug!("Query {}: analyzing {} result rows", request_id, output.rows.len());
        let analysis = match self
            .orchestrator
            .analyze_results(question, &final_sql, schema, &output)
            .await
        {
            Ok(analysis) => analysis,
            Err(e) => {
                self.record(
                    schema,
                    question,
                    &final_sql,
                    QueryStatus::Error,
                    Some(e.to_string()),
                )
                .await;
                return Err(e);
            }
        };

        self.record(schema, question, &final_sql, QueryStatus::Success, None)
            .await;
        info!("Query {}: done ({} rows)", request_id, output.rows.len());

        Ok(QueryOutcome::Answer(QueryAnswer {
            sql: final_sql,
            columns: output.columns,
            rows: output.rows,
            summary: analysis.summary,
            explanation: analysis.explanation,
            visualization: analysis.visualization,
        }))
    }

    async fn record(
        &self,
        schema: &TableSchema,
        question: &str,
        sql: &str,
        status: QueryStatus,
        error: Option<String>,
    ) {
        let record =
            QueryHistoryRecord::new(schema.table_name.as_str(), question, sql, status, error);
        if let Err(e) = self.history.log(record).await {
            warn!("Failed to record {} history entry: {}", status.as_str(), e);
        }
    }
}

use serde::Serialize;
use serde_json::{Map as JsonMap, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::catalog::{TableSchema, VisualizationType};
use crate::database::QueryOutput;
use crate::error::NlqError;
use crate::llm::{LlmClient, LlmHealthReport};
use crate::prompt::PromptTemplates;
use crate::response::{infer_visualization, ParsedResponse, ResponseProcessor};

const SUMMARY_COLUMN_LIMIT: usize = 6;

/// Interpretation of query results, either model-authored or synthesized
/// from the result shape when the model response cannot be parsed.
#[derive(Debug, Clone, Serialize)]
pub struct ResultAnalysis {
    pub summary: String,
    pub explanation: String,
    pub visualization: VisualizationType,
}

/// Outcome of an error-repair round. `fixed_query` is empty when no usable
/// fix was produced; `error_analysis` then says why.
#[derive(Debug, Clone, Serialize)]
pub struct SqlFix {
    pub error_analysis: String,
    pub fixed_query: String,
}

/// Drives every model interaction: builds the prompt, calls the client and
/// shapes the raw text into typed results.
pub struct LlmOrchestrator {
    client: LlmClient,
    templates: Arc<dyn PromptTemplates>,
    processor: ResponseProcessor,
}

impl LlmOrchestrator {
    pub fn new(client: LlmClient, templates: Arc<dyn PromptTemplates>) -> Result<Self, NlqError> {
        Ok(Self {
            client,
            templates,
            processor: ResponseProcessor::new()?,
        })
    }

    pub async fn generate_sql(
        &self,
        question: &str,
        schema: &TableSchema,
    ) -> Result<String, NlqError> {
        let prompt = self.templates.text_to_sql(question, schema);
        let sql = self.client.generate(&prompt).await?.trim().to_string();
        info!("Generated SQL: {}", sql);
        Ok(sql)
    }

    /// Asks the model to summarize results. A response that is not the
    /// expected JSON object degrades to a counted summary with a
    /// visualization inferred from the result shape; only backend
    /// exhaustion is an error.
    pub async fn analyze_results(
        &self,
        question: &str,
        sql: &str,
        schema: &TableSchema,
        output: &QueryOutput,
    ) -> Result<ResultAnalysis, NlqError> {
        let prompt = self
            .templates
            .result_analysis(question, sql, schema, &output.rows);
        let response = self.client.generate(&prompt).await?;

        match self.processor.parse_structured(&response) {
            ParsedResponse::Recognized(fields) => Ok(ResultAnalysis {
                summary: string_field(&fields, "natural_language_response"),
                explanation: string_field(&fields, "explanation"),
                visualization: fields
                    .get("visualization_type")
                    .and_then(Value::as_str)
                    .map(VisualizationType::parse_lenient)
                    .unwrap_or(VisualizationType::Table),
            }),
            ParsedResponse::Unparseable(_) => {
                warn!("Analysis response was not valid JSON; using a basic summary");
                Ok(ResultAnalysis {
                    summary: fallback_summary(output),
                    explanation: String::new(),
                    visualization: infer_visualization(output, schema),
                })
            }
        }
    }

    /// Analyzes a failed statement and proposes a replacement. This never
    /// fails: when the model is unreachable or its response unusable, the
    /// fix comes back with an empty `fixed_query` and the reason in
    /// `error_analysis`.
    pub async fn fix_sql_error(
        &self,
        error_message: &str,
        sql: &str,
        schema: &TableSchema,
    ) -> SqlFix {
        let prompt = self.templates.error_fix(error_message, sql, schema);
        match self.client.generate(&prompt).await {
            Ok(response) => match self.processor.parse_object(&response) {
                Some(fields) => SqlFix {
                    error_analysis: string_field(&fields, "error_analysis"),
                    fixed_query: string_field(&fields, "fixed_query").trim().to_string(),
                },
                None => SqlFix {
                    error_analysis: "Failed to parse fix response".to_string(),
                    fixed_query: String::new(),
                },
            },
            Err(e) => SqlFix {
                error_analysis: e.to_string(),
                fixed_query: String::new(),
            },
        }
    }

    /// Rebuilds a query from whatever context is at hand: the original
    /// question, a prior attempt, an error, a result sample, or any subset.
    pub async fn regenerate_sql(
        &self,
        question: Option<&str>,
        schema: &TableSchema,
        current_sql: Option<&str>,
        error_message: Option<&str>,
        result_sample: &[JsonMap<String, Value>],
    ) -> Result<String, NlqError> {
        let prompt = self.templates.regeneration(
            question,
            schema,
            current_sql,
            error_message,
            result_sample,
        );
        let sql = self.client.generate(&prompt).await?.trim().to_string();
        info!("Regenerated SQL: {}", sql);
        Ok(sql)
    }

    pub async fn explain_sql(
        &self,
        sql: &str,
        schema: &TableSchema,
        question: Option<&str>,
        result_sample: &[JsonMap<String, Value>],
    ) -> Result<String, NlqError> {
        let prompt = self
            .templates
            .explanation(sql, schema, question, result_sample);
        let response = self.client.generate(&prompt).await?;
        Ok(self.processor.normalize_markdown(&response))
    }

    pub async fn health(&self) -> LlmHealthReport {
        self.client.health().await
    }
}

fn string_field(fields: &JsonMap<String, Value>, key: &str) -> String {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_default()
}

fn fallback_summary(output: &QueryOutput) -> String {
    if output.rows.is_empty() {
        return "Query executed successfully.".to_string();
    }
    let columns = output
        .columns
        .iter()
        .take(SUMMARY_COLUMN_LIMIT)
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");
    format!("Returned {} rows. Columns: {}.", output.rows.len(), columns)
}

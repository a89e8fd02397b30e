use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map as JsonMap, Value};
use tracing::info;

use crate::analyzer::{render_schema_summary, SchemaAnalyzer};
use crate::catalog::{SchemaAnnotations, SchemaCatalog, TableSchema};
use crate::config::Settings;
use crate::database::{AnalyticsDatabase, MetadataAccessor, QueryExecutor, QueryOutput};
use crate::error::NlqError;
use crate::history::{HistoryStore, MemoryHistoryStore, QueryHistoryRecord};
use crate::llm::{ComponentHealth, LlmClient, LlmHealthReport};
use crate::orchestrator::LlmOrchestrator;
use crate::pipeline::{QueryOutcome, QueryPipeline};
use crate::prompt::{PromptBuilder, PromptTemplates};
use crate::validator::SqlValidator;

#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub database: ComponentHealth,
    pub llm: LlmHealthReport,
}

/// Result of running caller-supplied SQL. `sql` is the prepared statement
/// that actually executed, including any appended row limit.
#[derive(Debug, Clone, Serialize)]
pub struct RunSqlOutput {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<JsonMap<String, Value>>,
}

/// Facade over the whole stack: the embedded engine, schema analysis, the
/// model orchestrator and the question pipeline.
pub struct NlqEngine {
    db: Arc<AnalyticsDatabase>,
    catalog: SchemaCatalog,
    analyzer: SchemaAnalyzer,
    orchestrator: Arc<LlmOrchestrator>,
    pipeline: QueryPipeline,
    validator: SqlValidator,
    history: Arc<dyn HistoryStore>,
}

impl NlqEngine {
    pub fn new(settings: &Settings) -> Result<Self, NlqError> {
        info!("Initializing NLQ engine");

        let db = Arc::new(AnalyticsDatabase::new(settings.statement_timeout)?);
        let metadata: Arc<dyn MetadataAccessor> = db.clone();
        let analyzer = SchemaAnalyzer::new(metadata)?;

        let templates: Arc<dyn PromptTemplates> = Arc::new(PromptBuilder::new());
        let client = LlmClient::from_settings(settings)?;
        let orchestrator = Arc::new(LlmOrchestrator::new(client, templates)?);

        let history: Arc<dyn HistoryStore> = Arc::new(MemoryHistoryStore::new());
        let executor: Arc<dyn QueryExecutor> = db.clone();
        let pipeline = QueryPipeline::new(
            orchestrator.clone(),
            executor,
            history.clone(),
            SqlValidator::new(settings.default_query_limit)?,
        );

        info!("NLQ engine initialized successfully");

        Ok(Self {
            db,
            catalog: SchemaCatalog::new(),
            analyzer,
            orchestrator,
            pipeline,
            validator: SqlValidator::new(settings.default_query_limit)?,
            history,
        })
    }

    /// Registers a CSV file as a table and immediately analyzes it, so every
    /// registered table has a schema document before the first question.
    pub async fn register_csv_table(
        &self,
        table_name: &str,
        path: &Path,
    ) -> Result<TableSchema, NlqError> {
        self.db.register_csv(table_name, path).await?;
        self.analyze_table(table_name).await
    }

    pub async fn analyze_table(&self, table_name: &str) -> Result<TableSchema, NlqError> {
        let schema = self.analyzer.analyze(table_name).await?;
        self.catalog.put(schema.clone()).await;
        Ok(schema)
    }

    /// Stored schema with the table's annotations merged in.
    pub async fn schema(&self, table_name: &str) -> Result<TableSchema, NlqError> {
        self.catalog
            .annotated(table_name)
            .await
            .ok_or_else(|| NlqError::TableNotFound {
                table_name: table_name.to_string(),
            })
    }

    pub async fn schema_summary(&self, table_name: &str) -> Result<String, NlqError> {
        let schema = self.schema(table_name).await?;
        Ok(render_schema_summary(&schema))
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, NlqError> {
        self.db.tables().await
    }

    pub async fn sample(&self, table_name: &str, limit: usize) -> Result<QueryOutput, NlqError> {
        self.ensure_table(table_name).await?;
        self.db.sample_rows(table_name, limit).await
    }

    /// Answers a natural-language question against a registered table.
    pub async fn ask(&self, table_name: &str, question: &str) -> Result<QueryOutcome, NlqError> {
        let schema = self.schema(table_name).await?;
        self.pipeline.run(question, &schema).await
    }

    /// Runs caller-edited SQL through the same validation gate as generated
    /// SQL, then executes it.
    pub async fn run_sql(&self, table_name: &str, sql: &str) -> Result<RunSqlOutput, NlqError> {
        let schema = self.schema(table_name).await?;
        let prepared = self.validator.prepare(sql, &schema)?;
        let output = self.db.execute(&prepared).await?;
        Ok(RunSqlOutput {
            sql: prepared,
            columns: output.columns,
            rows: output.rows,
        })
    }

    pub async fn explain_sql(
        &self,
        table_name: &str,
        sql: &str,
        question: Option<&str>,
    ) -> Result<String, NlqError> {
        let schema = self.schema(table_name).await?;
        self.orchestrator
            .explain_sql(sql, &schema, question, &[])
            .await
    }

    /// Produces a fresh validated statement from whatever context the caller
    /// has: the question plus optionally a prior attempt and its error.
    pub async fn regenerate_sql(
        &self,
        table_name: &str,
        question: &str,
        current_sql: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<String, NlqError> {
        let schema = self.schema(table_name).await?;
        let candidate = self
            .orchestrator
            .regenerate_sql(Some(question), &schema, current_sql, error_message, &[])
            .await?;
        self.validator.prepare(&candidate, &schema)
    }

    pub async fn get_annotations(&self, table_name: &str) -> SchemaAnnotations {
        self.catalog.annotations(table_name).await
    }

    pub async fn set_annotations(&self, table_name: &str, annotations: SchemaAnnotations) {
        self.catalog.set_annotations(table_name, annotations).await;
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<QueryHistoryRecord>, NlqError> {
        self.history.recent(limit).await
    }

    pub async fn health(&self) -> EngineHealth {
        let database = match self.db.health_check().await {
            Ok(()) => ComponentHealth::ok("reachable"),
            Err(e) => ComponentHealth::error(e.to_string()),
        };
        let llm = self.orchestrator.health().await;
        EngineHealth { database, llm }
    }

    async fn ensure_table(&self, table_name: &str) -> Result<(), NlqError> {
        let tables = self.db.tables().await?;
        if !tables.iter().any(|t| t.as_str() == table_name) {
            return Err(NlqError::TableNotFound {
                table_name: table_name.to_string(),
            });
        }
        Ok(())
    }
}

use datafusion::arrow::array::{
    Array, ArrayRef, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, LargeStringArray, RecordBatch, StringArray, UInt16Array, UInt32Array, UInt64Array,
    UInt8Array,
};
use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::util::display::array_value_to_string;
use datafusion::catalog::{CatalogProvider, MemoryCatalogProvider, MemorySchemaProvider};
use datafusion::datasource::file_format::csv::CsvFormat;
use datafusion::datasource::listing::{
    ListingOptions, ListingTable, ListingTableConfig, ListingTableUrl,
};
use datafusion::execution::config::SessionConfig;
use datafusion::execution::context::{SQLOptions, SessionContext};
use datafusion::execution::runtime_env::RuntimeEnvBuilder;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map as JsonMap, Number, Value};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::catalog::ColumnType;
use crate::error::NlqError;

const CATALOG_NAME: &str = "nlq_analytics";
const SCHEMA_NAME: &str = "public";

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: ColumnType,
    pub declared_type: String,
    pub nullable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeyInfo {
    pub column: String,
    pub referenced_table: String,
    pub referenced_column: String,
}

/// Result of one executed statement: column names in projection order plus
/// rows as column-to-value maps.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<JsonMap<String, Value>>,
}

/// Read access to catalog metadata for registered tables.
#[async_trait]
pub trait MetadataAccessor: Send + Sync {
    async fn tables(&self) -> Result<Vec<String>, NlqError>;
    async fn columns(&self, table_name: &str) -> Result<Vec<ColumnInfo>, NlqError>;
    async fn row_count(&self, table_name: &str) -> Result<u64, NlqError>;
    async fn sample_rows(&self, table_name: &str, limit: usize) -> Result<QueryOutput, NlqError>;
    async fn primary_keys(&self, table_name: &str) -> Result<Vec<String>, NlqError>;
    async fn foreign_keys(&self, table_name: &str) -> Result<Vec<ForeignKeyInfo>, NlqError>;
}

/// Runs one read-only statement under a bounded timeout.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, NlqError>;
}

/// Embedded DataFusion session over CSV-backed tables. Statements run with
/// DDL, DML and SET denied, under the configured statement timeout.
pub struct AnalyticsDatabase {
    ctx: SessionContext,
    statement_timeout: Duration,
    table_name_pattern: Regex,
}

impl AnalyticsDatabase {
    pub fn new(statement_timeout: Duration) -> Result<Self, NlqError> {
        let max_memory = 8 * 1024 * 1024 * 1024;
        let memory_fraction = 0.8;

        let runtime_builder =
            RuntimeEnvBuilder::new().with_memory_limit(max_memory, memory_fraction);

        let runtime_config = runtime_builder
            .build()
            .map_err(|e| NlqError::Config {
                message: format!("Failed to build DataFusion runtime environment: {}", e),
            })?;

        let session_config =
            SessionConfig::new().with_default_catalog_and_schema(CATALOG_NAME, SCHEMA_NAME);

        let ctx = SessionContext::new_with_config_rt(session_config, runtime_config.into());

        let catalog = Arc::new(MemoryCatalogProvider::new());
        let schema = Arc::new(MemorySchemaProvider::new());
        let _ = catalog.register_schema(SCHEMA_NAME, schema)?;
        ctx.register_catalog(CATALOG_NAME, catalog);

        info!("DataFusion session initialized");

        Ok(Self {
            ctx,
            statement_timeout,
            table_name_pattern: Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$")?,
        })
    }

    /// Registers a CSV file as a queryable table, inferring its schema from
    /// the file. Re-registering an existing name replaces the table.
    pub async fn register_csv(&self, table_name: &str, path: &Path) -> Result<(), NlqError> {
        if !self.table_name_pattern.is_match(table_name) {
            return Err(NlqError::Validation {
                message: format!("Invalid table name: {}", table_name),
            });
        }

        let resolved = path.canonicalize().map_err(|e| NlqError::Config {
            message: format!("CSV file {} not readable: {}", path.display(), e),
        })?;

        let table_url = ListingTableUrl::parse(resolved.to_string_lossy().as_ref())?;
        let csv_format = CsvFormat::default()
            .with_has_header(true)
            .with_delimiter(b',');
        let listing_options = ListingOptions::new(Arc::new(csv_format));

        let mut config = ListingTableConfig::new(table_url).with_listing_options(listing_options);
        config = config.infer_schema(&self.ctx.state()).await?;
        let table = ListingTable::try_new(config)?;

        let schema = self.schema_provider()?;
        if schema.table_exist(table_name) {
            schema.deregister_table(table_name)?;
        }
        schema.register_table(table_name.to_string(), Arc::new(table))?;

        info!("Registered table '{}' from {}", table_name, resolved.display());
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), NlqError> {
        let df = self.ctx.sql("SELECT 1 as health_check").await?;
        df.collect().await?;
        Ok(())
    }

    fn schema_provider(&self) -> Result<Arc<dyn datafusion::catalog::SchemaProvider>, NlqError> {
        self.ctx
            .catalog(CATALOG_NAME)
            .ok_or_else(|| NlqError::Config {
                message: format!("{} catalog not found", CATALOG_NAME),
            })?
            .schema(SCHEMA_NAME)
            .ok_or_else(|| NlqError::Config {
                message: format!("{} schema not found in {} catalog", SCHEMA_NAME, CATALOG_NAME),
            })
    }

    async fn get_table(
        &self,
        table_name: &str,
    ) -> Result<Arc<dyn datafusion::catalog::TableProvider>, NlqError> {
        self.schema_provider()?
            .table(table_name)
            .await?
            .ok_or_else(|| NlqError::TableNotFound {
                table_name: table_name.to_string(),
            })
    }

    async fn run_statement(&self, sql: &str) -> Result<QueryOutput, NlqError> {
        let options = SQLOptions::new()
            .with_allow_ddl(false)
            .with_allow_dml(false)
            .with_allow_statements(false);

        let df = self
            .ctx
            .sql_with_options(sql, options)
            .await
            .map_err(|e| NlqError::Execution {
                message: e.to_string(),
            })?;

        let columns: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();

        let batches = df.collect().await.map_err(|e| NlqError::Execution {
            message: e.to_string(),
        })?;

        batches_to_output(columns, &batches)
    }
}

#[async_trait]
impl QueryExecutor for AnalyticsDatabase {
    async fn execute(&self, sql: &str) -> Result<QueryOutput, NlqError> {
        let start_time = std::time::Instant::now();
        debug!("Executing statement: {}", sql);

        let output = timeout(self.statement_timeout, self.run_statement(sql))
            .await
            .map_err(|_| NlqError::Execution {
                message: format!(
                    "Statement timed out after {}ms",
                    self.statement_timeout.as_millis()
                ),
            })??;

        info!(
            "Statement returned {} rows in {}ms",
            output.rows.len(),
            start_time.elapsed().as_millis()
        );
        Ok(output)
    }
}

#[async_trait]
impl MetadataAccessor for AnalyticsDatabase {
    async fn tables(&self) -> Result<Vec<String>, NlqError> {
        let mut names = self.schema_provider()?.table_names();
        names.sort();
        Ok(names)
    }

    async fn columns(&self, table_name: &str) -> Result<Vec<ColumnInfo>, NlqError> {
        let table = self.get_table(table_name).await?;
        let schema = table.schema();
        Ok(schema
            .fields()
            .iter()
            .map(|field| ColumnInfo {
                name: field.name().clone(),
                data_type: map_arrow_type(field.data_type()),
                declared_type: field.data_type().to_string(),
                nullable: field.is_nullable(),
            })
            .collect())
    }

    async fn row_count(&self, table_name: &str) -> Result<u64, NlqError> {
        self.get_table(table_name).await?;
        let sql = format!(
            "SELECT COUNT(*) AS row_count FROM {}",
            quote_ident(table_name)
        );
        let output = self.execute(&sql).await?;
        output
            .rows
            .first()
            .and_then(|row| row.get("row_count"))
            .and_then(|v| v.as_u64())
            .ok_or_else(|| NlqError::Internal {
                message: format!("Row count query returned no value for {}", table_name),
            })
    }

    async fn sample_rows(&self, table_name: &str, limit: usize) -> Result<QueryOutput, NlqError> {
        self.get_table(table_name).await?;
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(table_name), limit);
        self.execute(&sql).await
    }

    // Flat-file tables declare no constraints; relationship detection falls
    // back to naming patterns.
    async fn primary_keys(&self, _table_name: &str) -> Result<Vec<String>, NlqError> {
        Ok(Vec::new())
    }

    async fn foreign_keys(&self, _table_name: &str) -> Result<Vec<ForeignKeyInfo>, NlqError> {
        Ok(Vec::new())
    }
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn batches_to_output(
    columns: Vec<String>,
    batches: &[RecordBatch],
) -> Result<QueryOutput, NlqError> {
    let mut rows = Vec::new();
    for batch in batches {
        for row_idx in 0..batch.num_rows() {
            let mut row = JsonMap::with_capacity(columns.len());
            for (col_idx, column_name) in columns.iter().enumerate() {
                let value = arrow_value(batch.column(col_idx), row_idx)?;
                row.insert(column_name.clone(), value);
            }
            rows.push(row);
        }
    }
    Ok(QueryOutput { columns, rows })
}

fn arrow_value(array: &ArrayRef, row: usize) -> Result<Value, NlqError> {
    if array.is_null(row) {
        return Ok(Value::Null);
    }

    let value = match array.data_type() {
        DataType::Boolean => downcast::<BooleanArray>(array)
            .map(|a| Value::Bool(a.value(row)))
            .unwrap_or(Value::Null),
        DataType::Int8 => downcast::<Int8Array>(array)
            .map(|a| Value::Number(Number::from(a.value(row) as i64)))
            .unwrap_or(Value::Null),
        DataType::Int16 => downcast::<Int16Array>(array)
            .map(|a| Value::Number(Number::from(a.value(row) as i64)))
            .unwrap_or(Value::Null),
        DataType::Int32 => downcast::<Int32Array>(array)
            .map(|a| Value::Number(Number::from(a.value(row) as i64)))
            .unwrap_or(Value::Null),
        DataType::Int64 => downcast::<Int64Array>(array)
            .map(|a| Value::Number(Number::from(a.value(row))))
            .unwrap_or(Value::Null),
        DataType::UInt8 => downcast::<UInt8Array>(array)
            .map(|a| Value::Number(Number::from(a.value(row) as u64)))
            .unwrap_or(Value::Null),
        DataType::UInt16 => downcast::<UInt16Array>(array)
            .map(|a| Value::Number(Number::from(a.value(row) as u64)))
            .unwrap_or(Value::Null),
        DataType::UInt32 => downcast::<UInt32Array>(array)
            .map(|a| Value::Number(Number::from(a.value(row) as u64)))
            .unwrap_or(Value::Null),
        DataType::UInt64 => downcast::<UInt64Array>(array)
            .map(|a| Value::Number(Number::from(a.value(row))))
            .unwrap_or(Value::Null),
        DataType::Float32 => downcast::<Float32Array>(array)
            .and_then(|a| Number::from_f64(a.value(row) as f64))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DataType::Float64 => downcast::<Float64Array>(array)
            .and_then(|a| Number::from_f64(a.value(row)))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        DataType::Utf8 => downcast::<StringArray>(array)
            .map(|a| Value::String(a.value(row).to_string()))
            .unwrap_or(Value::Null),
        DataType::LargeUtf8 => downcast::<LargeStringArray>(array)
            .map(|a| Value::String(a.value(row).to_string()))
            .unwrap_or(Value::Null),
        // Dates, timestamps, decimals and everything else render through
        // Arrow's display path.
        _ => Value::String(array_value_to_string(array, row)?),
    };
    Ok(value)
}

fn downcast<T: 'static>(array: &ArrayRef) -> Option<&T> {
    array.as_any().downcast_ref::<T>()
}

fn map_arrow_type(data_type: &DataType) -> ColumnType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => ColumnType::Integer,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => ColumnType::Float,
        DataType::Boolean => ColumnType::Boolean,
        DataType::Date32 | DataType::Date64 => ColumnType::Date,
        DataType::Timestamp(_, _) => ColumnType::Timestamp,
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => ColumnType::Text,
        _ => ColumnType::Other,
    }
}

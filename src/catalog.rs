use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Boolean,
    Date,
    Timestamp,
    Text,
    Other,
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Float)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, ColumnType::Date | ColumnType::Timestamp)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Text => "text",
            ColumnType::Other => "other",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValueCount {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub std_dev: Option<f64>,
    pub null_count: u64,
    pub null_percentage: f64,
    pub unique_count: u64,
    pub is_integer: bool,
    pub is_categorical: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_counts: Vec<ValueCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalStats {
    pub min: Option<String>,
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_span_days: Option<i64>,
    pub null_count: u64,
    pub null_percentage: f64,
    pub unique_count: u64,
    pub is_time_series: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate_frequency: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextStats {
    pub min_length: u64,
    pub max_length: u64,
    pub null_count: u64,
    pub null_percentage: f64,
    pub unique_count: u64,
    pub is_unique: bool,
    pub is_categorical: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_counts: Vec<ValueCount>,
    pub is_email: bool,
    pub is_url: bool,
    pub likely_contains_names: bool,
}

/// Per-kind statistics computed by the column profiler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnStats {
    Numeric(NumericStats),
    Temporal(TemporalStats),
    Text(TextStats),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    pub data_type: ColumnType,
    pub declared_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub stats: ColumnStats,
}

impl ColumnProfile {
    pub fn is_numeric(&self) -> bool {
        self.data_type.is_numeric() || matches!(self.stats, ColumnStats::Numeric(_))
    }

    /// Temporal by declared type or by profiled stats; CSV-inferred schemas
    /// often carry dates as plain strings.
    pub fn is_temporal(&self) -> bool {
        self.data_type.is_temporal() || matches!(self.stats, ColumnStats::Temporal(_))
    }

    pub fn is_id_like(&self) -> bool {
        self.name.to_lowercase().contains("id")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relationship {
    ForeignKey {
        from_column: String,
        to_table: String,
        to_column: String,
    },
    NamingPattern {
        from_column: String,
        to_table: String,
        to_column: String,
    },
    JunctionTable {
        junction_table: String,
        table1: String,
        column1: String,
        table2: String,
        column2: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableKeys {
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleQuery {
    pub description: String,
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnAnnotation {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnAlias {
    pub alias: String,
    pub column: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub sql: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Human-curated context merged into the schema view at read time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaAnnotations {
    #[serde(default)]
    pub columns: Vec<ColumnAnnotation>,
    #[serde(default)]
    pub aliases: Vec<ColumnAlias>,
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
}

impl SchemaAnnotations {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.aliases.is_empty() && self.metrics.is_empty()
    }

    pub fn column_description(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|c| c.name == column)
            .map(|c| c.description.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationType {
    Table,
    Bar,
    Line,
    Pie,
}

impl VisualizationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualizationType::Table => "table",
            VisualizationType::Bar => "bar",
            VisualizationType::Line => "line",
            VisualizationType::Pie => "pie",
        }
    }

    /// Maps a model-suggested label into the closed set; anything
    /// unrecognized renders as a table.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "bar" => VisualizationType::Bar,
            "line" => VisualizationType::Line,
            "pie" => VisualizationType::Pie,
            _ => VisualizationType::Table,
        }
    }
}

impl std::fmt::Display for VisualizationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Schema document produced by the analyzer; grounds prompt construction and
/// identifier validation for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub table_name: String,
    pub row_count: u64,
    pub analyzed_at: DateTime<Utc>,
    pub columns: Vec<ColumnProfile>,
    pub relationships: Vec<Relationship>,
    pub keys: TableKeys,
    pub sample_queries: Vec<SampleQuery>,
    #[serde(default)]
    pub annotations: SchemaAnnotations,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnProfile> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn temporal_columns(&self) -> Vec<&ColumnProfile> {
        self.columns.iter().filter(|c| c.is_temporal()).collect()
    }

    pub fn numeric_columns(&self) -> Vec<&ColumnProfile> {
        self.columns.iter().filter(|c| c.is_numeric()).collect()
    }

    pub fn id_like_columns(&self) -> Vec<&ColumnProfile> {
        self.columns.iter().filter(|c| c.is_id_like()).collect()
    }

    pub fn with_annotations(mut self, annotations: SchemaAnnotations) -> Self {
        self.annotations = annotations;
        self
    }
}

/// In-memory store of analyzed schemas and their annotations, keyed by table
/// name. Re-analysis overwrites the previous document.
pub struct SchemaCatalog {
    schemas: RwLock<HashMap<String, TableSchema>>,
    annotations: RwLock<HashMap<String, SchemaAnnotations>>,
}

impl SchemaCatalog {
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            annotations: RwLock::new(HashMap::new()),
        }
    }

    pub async fn put(&self, schema: TableSchema) {
        self.schemas
            .write()
            .await
            .insert(schema.table_name.clone(), schema);
    }

    pub async fn get(&self, table_name: &str) -> Option<TableSchema> {
        self.schemas.read().await.get(table_name).cloned()
    }

    /// Stored schema with the table's annotations merged in.
    pub async fn annotated(&self, table_name: &str) -> Option<TableSchema> {
        let schema = self.get(table_name).await?;
        Some(schema.with_annotations(self.annotations(table_name).await))
    }

    pub async fn remove(&self, table_name: &str) {
        self.schemas.write().await.remove(table_name);
        self.annotations.write().await.remove(table_name);
    }

    pub async fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.schemas.read().await.keys().cloned().collect();
        tables.sort();
        tables
    }

    pub async fn annotations(&self, table_name: &str) -> SchemaAnnotations {
        self.annotations
            .read()
            .await
            .get(table_name)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_annotations(&self, table_name: &str, annotations: SchemaAnnotations) {
        self.annotations
            .write()
            .await
            .insert(table_name.to_string(), annotations);
    }
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::new()
    }
}

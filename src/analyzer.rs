use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::{
    ColumnProfile, ColumnStats, ColumnType, Relationship, SampleQuery, SchemaAnnotations,
    TableKeys, TableSchema,
};
use crate::database::{quote_ident, ForeignKeyInfo, MetadataAccessor};
use crate::error::NlqError;
use crate::profiler::ColumnProfiler;

const SAMPLE_ROW_LIMIT: usize = 1000;

/// Builds a [`TableSchema`] for a registered table by profiling sampled rows
/// and inferring relationships from key metadata and column naming.
pub struct SchemaAnalyzer {
    metadata: Arc<dyn MetadataAccessor>,
    profiler: ColumnProfiler,
}

impl SchemaAnalyzer {
    pub fn new(metadata: Arc<dyn MetadataAccessor>) -> Result<Self, NlqError> {
        Ok(Self {
            metadata,
            profiler: ColumnProfiler::new()?,
        })
    }

    /// Runs the full analysis for one table. Any metadata failure aborts the
    /// whole analysis; no partial schema is returned.
    pub async fn analyze(&self, table_name: &str) -> Result<TableSchema, NlqError> {
        let start_time = std::time::Instant::now();
        info!("Analyzing table '{}'", table_name);

        let column_infos = self.metadata.columns(table_name).await?;
        if column_infos.is_empty() {
            return Err(NlqError::Analysis {
                message: format!("Table {} has no columns", table_name),
            });
        }

        let (row_count, sample) = futures::try_join!(
            self.metadata.row_count(table_name),
            self.metadata.sample_rows(table_name, SAMPLE_ROW_LIMIT)
        )?;

        let mut columns: Vec<ColumnProfile> = column_infos
            .iter()
            .map(|info| {
                let values: Vec<Value> = sample
                    .rows
                    .iter()
                    .map(|row| row.get(&info.name).cloned().unwrap_or(Value::Null))
                    .collect();
                self.profiler.profile(
                    &info.name,
                    info.data_type,
                    &info.declared_type,
                    info.nullable,
                    &values,
                )
            })
            .collect();

        let (primary_keys, foreign_keys) = futures::try_join!(
            self.metadata.primary_keys(table_name),
            self.metadata.foreign_keys(table_name)
        )?;
        for column in &mut columns {
            column.is_primary_key = primary_keys.contains(&column.name);
        }

        let sibling_tables: Vec<String> = self
            .metadata
            .tables()
            .await?
            .into_iter()
            .filter(|t| t != table_name)
            .collect();

        let relationships =
            detect_relationships(table_name, &columns, &foreign_keys, &sibling_tables);
        let sample_queries = self
            .build_sample_queries(table_name, &columns, &foreign_keys)
            .await;

        info!(
            "Analyzed table '{}' ({} columns, {} relationships) in {}ms",
            table_name,
            columns.len(),
            relationships.len(),
            start_time.elapsed().as_millis()
        );

        Ok(TableSchema {
            table_name: table_name.to_string(),
            row_count,
            analyzed_at: Utc::now(),
            columns,
            relationships,
            keys: TableKeys {
                primary_keys,
                foreign_keys: foreign_keys.iter().map(|fk| fk.column.clone()).collect(),
            },
            sample_queries,
            annotations: SchemaAnnotations::default(),
        })
    }

    async fn build_sample_queries(
        &self,
        table_name: &str,
        columns: &[ColumnProfile],
        foreign_keys: &[ForeignKeyInfo],
    ) -> Vec<SampleQuery> {
        let table = quote_ident(table_name);
        let mut samples = vec![SampleQuery {
            description: "Select all rows".to_string(),
            query: format!("SELECT * FROM {}", table),
        }];

        if let Some(first) = columns.first() {
            samples.push(SampleQuery {
                description: format!("Select filtered by {}", first.name),
                query: format!(
                    "SELECT * FROM {} WHERE {} = $1",
                    table,
                    quote_ident(&first.name)
                ),
            });
        }

        samples.push(SampleQuery {
            description: "Count all rows".to_string(),
            query: format!("SELECT COUNT(*) FROM {}", table),
        });

        if columns.len() > 1 {
            let numeric: Vec<&ColumnProfile> =
                columns.iter().filter(|c| c.is_numeric()).collect();
            if let Some(group_col) = columns.iter().find(|c| !c.is_numeric()) {
                let aggregates: Vec<String> = numeric
                    .iter()
                    .take(2)
                    .map(|c| format!("SUM({}) as sum_{}", quote_ident(&c.name), c.name))
                    .collect();
                if aggregates.is_empty() {
                    samples.push(SampleQuery {
                        description: format!("Group by {} with count", group_col.name),
                        query: format!(
                            "SELECT {}, COUNT(*) as count FROM {} GROUP BY {}",
                            quote_ident(&group_col.name),
                            table,
                            quote_ident(&group_col.name)
                        ),
                    });
                } else {
                    samples.push(SampleQuery {
                        description: format!("Group by {} with aggregations", group_col.name),
                        query: format!(
                            "SELECT {}, COUNT(*) as count, {} FROM {} GROUP BY {}",
                            quote_ident(&group_col.name),
                            aggregates.join(", "),
                            table,
                            quote_ident(&group_col.name)
                        ),
                    });
                }
            }
        }

        if let Some(first) = columns.first() {
            samples.push(SampleQuery {
                description: format!("Order by {} descending", first.name),
                query: format!(
                    "SELECT * FROM {} ORDER BY {} DESC",
                    table,
                    quote_ident(&first.name)
                ),
            });
        }

        samples.push(SampleQuery {
            description: "Pagination example".to_string(),
            query: format!("SELECT * FROM {} LIMIT 10 OFFSET 0", table),
        });

        if let Some(fk) = foreign_keys.first() {
            match self.metadata.columns(&fk.referenced_table).await {
                Ok(foreign_columns) if !foreign_columns.is_empty() => {
                    let join_col = foreign_columns
                        .iter()
                        .take(2)
                        .find(|c| c.name != fk.referenced_column)
                        .unwrap_or(&foreign_columns[0]);
                    samples.push(SampleQuery {
                        description: format!("Join with {}", fk.referenced_table),
                        query: format!(
                            "SELECT a.*, b.{} FROM {} a JOIN {} b ON a.{} = b.{}",
                            quote_ident(&join_col.name),
                            table,
                            quote_ident(&fk.referenced_table),
                            quote_ident(&fk.column),
                            quote_ident(&fk.referenced_column)
                        ),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(
                        "Skipping join sample for '{}': could not read columns of '{}': {}",
                        table_name, fk.referenced_table, e
                    );
                }
            }
        }

        if let Some(date_col) = columns.iter().find(|c| c.is_temporal()) {
            let quoted = quote_ident(&date_col.name);
            samples.push(SampleQuery {
                description: "Filter by date range".to_string(),
                query: format!(
                    "SELECT * FROM {} WHERE {} BETWEEN $1 AND $2",
                    table, quoted
                ),
            });
            samples.push(SampleQuery {
                description: "Group by month".to_string(),
                query: format!(
                    "SELECT DATE_TRUNC('month', {}) as month, COUNT(*) FROM {} GROUP BY month ORDER BY month",
                    quoted, table
                ),
            });
        }

        if let Some(text_col) = columns
            .iter()
            .find(|c| c.data_type == ColumnType::Text && !c.is_temporal())
        {
            samples.push(SampleQuery {
                description: "Text search".to_string(),
                query: format!(
                    "SELECT * FROM {} WHERE {} ILIKE '%' || $1 || '%'",
                    table,
                    quote_ident(&text_col.name)
                ),
            });
        }

        samples
    }
}

/// Renders a stored schema as a short Markdown summary.
pub fn render_schema_summary(schema: &TableSchema) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n", schema.table_name));
    out.push_str(&format!(
        "{} rows, analyzed at {}\n\n## Columns\n",
        schema.row_count,
        schema.analyzed_at.to_rfc3339()
    ));

    for column in &schema.columns {
        let mut flags: Vec<&str> = Vec::new();
        if column.is_primary_key {
            flags.push("primary key");
        }
        match &column.stats {
            ColumnStats::Numeric(stats) => {
                if stats.is_categorical {
                    flags.push("categorical");
                }
            }
            ColumnStats::Temporal(stats) => {
                if stats.is_time_series {
                    flags.push("time series");
                }
            }
            ColumnStats::Text(stats) => {
                if stats.is_categorical {
                    flags.push("categorical");
                }
                if stats.is_unique {
                    flags.push("unique");
                }
                if stats.is_email {
                    flags.push("email");
                }
            }
        }
        let flag_str = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        out.push_str(&format!(
            "- {} ({}){}\n",
            column.name, column.data_type, flag_str
        ));
    }

    if !schema.relationships.is_empty() {
        out.push_str("\n## Relationships\n");
        for relationship in &schema.relationships {
            match relationship {
                Relationship::ForeignKey {
                    from_column,
                    to_table,
                    to_column,
                } => out.push_str(&format!(
                    "- {} references {}.{} (declared)\n",
                    from_column, to_table, to_column
                )),
                Relationship::NamingPattern {
                    from_column,
                    to_table,
                    to_column,
                } => out.push_str(&format!(
                    "- {} likely references {}.{} (inferred)\n",
                    from_column, to_table, to_column
                )),
                Relationship::JunctionTable {
                    table1,
                    column1,
                    table2,
                    column2,
                    ..
                } => out.push_str(&format!(
                    "- junction linking {} via {} and {} via {}\n",
                    table1, column1, table2, column2
                )),
            }
        }
    }

    out
}

/// True when `column` looks like a reference to `table`, tolerating a plural
/// table name ("order_id" matches both "order" and "orders").
fn references_table(column: &str, table: &str) -> bool {
    let column = column.to_lowercase();
    let table = table.to_lowercase();
    if column == format!("{}_id", table) {
        return true;
    }
    match table.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => column == format!("{}_id", stem),
        _ => false,
    }
}

fn detect_relationships(
    table_name: &str,
    columns: &[ColumnProfile],
    declared: &[ForeignKeyInfo],
    sibling_tables: &[String],
) -> Vec<Relationship> {
    let mut relationships: Vec<Relationship> = declared
        .iter()
        .map(|fk| Relationship::ForeignKey {
            from_column: fk.column.clone(),
            to_table: fk.referenced_table.clone(),
            to_column: fk.referenced_column.clone(),
        })
        .collect();

    for column in columns {
        for sibling in sibling_tables {
            if !references_table(&column.name, sibling) {
                continue;
            }
            let covered = declared
                .iter()
                .any(|fk| fk.column == column.name && &fk.referenced_table == sibling);
            if covered {
                continue;
            }
            relationships.push(Relationship::NamingPattern {
                from_column: column.name.clone(),
                to_table: sibling.clone(),
                to_column: "id".to_string(),
            });
        }
    }

    if columns.len() <= 3 {
        let resolved: Vec<(&str, &String)> = columns
            .iter()
            .filter(|c| c.name.to_lowercase().ends_with("_id"))
            .filter_map(|c| {
                sibling_tables
                    .iter()
                    .find(|t| references_table(&c.name, t))
                    .map(|t| (c.name.as_str(), t))
            })
            .collect();

        for (i, (column1, table1)) in resolved.iter().enumerate() {
            for (column2, table2) in resolved.iter().skip(i + 1) {
                if table1 == table2 {
                    continue;
                }
                relationships.push(Relationship::JunctionTable {
                    junction_table: table_name.to_string(),
                    table1: (*table1).clone(),
                    column1: column1.to_string(),
                    table2: (*table2).clone(),
                    column2: column2.to_string(),
                });
            }
        }
    }

    relationships
}

use serde_json::{Map as JsonMap, Value};

use crate::catalog::{ColumnStats, Relationship, TableSchema};

const MAX_PROMPT_ROWS: usize = 5;
const MAX_EXAMPLE_VALUES: usize = 5;

/// Deterministic prompt construction. Every builder ends where the model's
/// raw answer can be concatenated, so outputs suit completion endpoints.
pub trait PromptTemplates: Send + Sync {
    fn text_to_sql(&self, question: &str, schema: &TableSchema) -> String;
    fn result_analysis(
        &self,
        question: &str,
        sql: &str,
        schema: &TableSchema,
        rows: &[JsonMap<String, Value>],
    ) -> String;
    fn error_fix(&self, error_message: &str, sql: &str, schema: &TableSchema) -> String;
    fn regeneration(
        &self,
        question: Option<&str>,
        schema: &TableSchema,
        current_sql: Option<&str>,
        error_message: Option<&str>,
        result_sample: &[JsonMap<String, Value>],
    ) -> String;
    fn explanation(
        &self,
        sql: &str,
        schema: &TableSchema,
        question: Option<&str>,
        result_sample: &[JsonMap<String, Value>],
    ) -> String;
}

#[derive(Debug, Default)]
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn new() -> Self {
        Self
    }
}

impl PromptTemplates for PromptBuilder {
    fn text_to_sql(&self, question: &str, schema: &TableSchema) -> String {
        let mut prompt = String::new();
        prompt.push_str("# Text-to-SQL Conversion Task\n\n");
        prompt.push_str(
            "You are an expert SQL query generator. Your task is to convert the user's \
             natural language question into a precise, efficient SQL query.\n\n",
        );
        prompt.push_str("## Database Information\n");
        prompt.push_str(&format!("Table name: {}\n", schema.table_name));
        prompt.push_str(&format!("Row count: {}\n\n", schema.row_count));
        prompt.push_str("## Columns:\n");
        prompt.push_str(&column_bullets(schema));

        push_block(&mut prompt, "## Relationships:", &relationship_lines(schema));
        push_block(&mut prompt, "## Sample Queries:", &sample_query_lines(schema));
        push_block(
            &mut prompt,
            "## Column Aliases (User terms → Columns):",
            &alias_lines(schema),
        );
        push_block(&mut prompt, "## Metric Definitions:", &metric_lines(schema));

        prompt.push_str("\n\n## Task\n");
        prompt.push_str("Convert this natural language question to a SQL query:\n");
        prompt.push_str(&format!("\"{}\"\n\n", question));
        prompt.push_str("## Requirements:\n");
        prompt.push_str("1. Generate only the SQL query with no explanations or comments\n");
        prompt.push_str("2. Produce a single SELECT statement; never modify data\n");
        prompt.push_str("3. Use double quotes around table and column names\n");
        prompt.push_str("4. Use appropriate JOIN operations if they would be helpful\n");
        prompt.push_str(
            "5. Use appropriate aggregation functions when needed (COUNT, SUM, AVG, etc.)\n",
        );
        prompt.push_str(
            "6. Include ORDER BY, GROUP BY, or HAVING clauses when implied by the question\n",
        );
        prompt.push_str(
            "7. Handle potential NULL values appropriately with COALESCE or IS NULL checks\n",
        );
        prompt.push_str("8. Use date functions such as date_trunc when appropriate\n");
        prompt.push_str("9. Make sure the SQL is compatible with PostgreSQL\n\n");
        prompt.push_str("SQL query:\n```sql\n");
        prompt
    }

    fn result_analysis(
        &self,
        question: &str,
        sql: &str,
        schema: &TableSchema,
        rows: &[JsonMap<String, Value>],
    ) -> String {
        let sample = &rows[..rows.len().min(MAX_PROMPT_ROWS)];

        let mut prompt = String::new();
        prompt.push_str("# Data Analysis Task\n\n");
        prompt.push_str(
            "You are an expert data analyst. Your task is to analyze SQL query results \
             and provide insights in natural language.\n\n",
        );
        prompt.push_str("## Context\n");
        prompt.push_str(&format!("User's original question: \"{}\"\n\n", question));
        prompt.push_str(&format!("SQL query used:\n```sql\n{}\n```\n\n", sql));
        prompt.push_str("## Database Schema\n");
        prompt.push_str(&format!("Table: {}\n", schema.table_name));
        prompt.push_str(&format!("Columns:\n{}\n\n", column_outline(schema)));
        prompt.push_str("## Query Results\n");
        prompt.push_str(&format!(
            "Showing {} out of {} rows:\n```json\n{}\n```\n\n",
            sample.len(),
            rows.len(),
            rows_json(sample)
        ));
        prompt.push_str("## Your Tasks:\n");
        prompt.push_str("1. Provide a direct answer to the user's question based on the data\n");
        prompt.push_str("2. Provide a deeper analysis with key insights about the data\n");
        prompt.push_str("3. Recommend the best visualization type for this data\n\n");
        prompt.push_str("## Visualization Options:\n");
        prompt.push_str("- \"table\": For raw data or many columns\n");
        prompt.push_str("- \"bar\": For comparing values across categories\n");
        prompt.push_str("- \"line\": For time series or trends\n");
        prompt.push_str(
            "- \"pie\": For showing proportions of a whole (only for small numbers of categories)\n\n",
        );
        prompt.push_str("## Response Format\n");
        prompt.push_str("Format your response as JSON with the following structure:\n");
        prompt.push_str("```json\n{\n");
        prompt.push_str(
            "    \"natural_language_response\": \"A direct, concise answer to the question\",\n",
        );
        prompt.push_str(
            "    \"explanation\": \"A detailed explanation with insights about the data. Use HTML \
             formatting (<p>, <ul>, <li>, <strong>, etc.) for better readability.\",\n",
        );
        prompt.push_str(
            "    \"visualization_type\": \"The suggested visualization type (table, bar, line, or pie)\"\n",
        );
        prompt.push_str("}\n```\n\n");
        prompt.push_str("Response:\n```json\n");
        prompt
    }

    fn error_fix(&self, error_message: &str, sql: &str, schema: &TableSchema) -> String {
        let mut prompt = String::new();
        prompt.push_str("# SQL Error Analysis Task\n\n");
        prompt.push_str(
            "You are an expert SQL developer. A query has failed, and you need to analyze \
             the error and provide a fixed query.\n\n",
        );
        prompt.push_str(&format!("## Error Message\n```\n{}\n```\n\n", error_message));
        prompt.push_str(&format!("## Original SQL Query\n```sql\n{}\n```\n\n", sql));
        prompt.push_str("## Database Schema\n");
        prompt.push_str(&format!("Table: {}\n", schema.table_name));
        prompt.push_str(&format!("Columns:\n{}\n\n", column_outline(schema)));
        prompt.push_str("## Your Task\n");
        prompt.push_str("1. Analyze the error message and identify the issue in the SQL query\n");
        prompt.push_str("2. Provide a fixed version of the SQL query\n");
        prompt.push_str("3. Make sure to keep the same intent as the original query\n\n");
        prompt.push_str("## Response Format\n");
        prompt.push_str("Format your response as JSON with the following structure:\n");
        prompt.push_str("```json\n{\n");
        prompt.push_str("    \"error_analysis\": \"A brief explanation of what went wrong\",\n");
        prompt.push_str("    \"fixed_query\": \"The corrected SQL query\"\n");
        prompt.push_str("}\n```\n\n");
        prompt.push_str("Response:\n```json\n");
        prompt
    }

    fn regeneration(
        &self,
        question: Option<&str>,
        schema: &TableSchema,
        current_sql: Option<&str>,
        error_message: Option<&str>,
        result_sample: &[JsonMap<String, Value>],
    ) -> String {
        let sample = &result_sample[..result_sample.len().min(MAX_PROMPT_ROWS)];

        let mut prompt = String::new();
        prompt.push_str("# SQL Regeneration Task\n\n");
        prompt.push_str(
            "You are an expert SQL query generator. The original query needs improvement.\n\n",
        );
        prompt.push_str("## User Question\n");
        match question {
            Some(q) => prompt.push_str(&format!("\"{}\"\n\n", q)),
            None => prompt.push_str(
                "(No natural-language question provided. Infer intent from SQL + schema + error/output.)\n\n",
            ),
        }
        prompt.push_str("## Database Schema\n");
        prompt.push_str(&format!("Table: {}\n", schema.table_name));
        prompt.push_str(&format!("Columns:\n{}\n", column_outline(schema)));

        if let Some(sql) = current_sql {
            prompt.push_str(&format!("\n## Previous SQL Attempt\n```sql\n{}\n```\n", sql));
        }
        if let Some(error) = error_message {
            prompt.push_str(&format!("\n## Database Error\n```\n{}\n```\n", error));
        }
        if !sample.is_empty() {
            prompt.push_str(&format!(
                "\n## Sample Output (if query executed)\n```json\n{}\n```\n",
                rows_json(sample)
            ));
        }

        prompt.push_str("\n## Your Task\n");
        prompt.push_str("1. Produce a corrected SQL query that answers the user's question\n");
        prompt.push_str("2. Fix any errors indicated above\n");
        prompt.push_str("3. Make sure the SQL is compatible with PostgreSQL\n");
        prompt.push_str("4. Return only the SQL query without explanations\n\n");
        prompt.push_str("SQL query:\n```sql\n");
        prompt
    }

    fn explanation(
        &self,
        sql: &str,
        schema: &TableSchema,
        question: Option<&str>,
        result_sample: &[JsonMap<String, Value>],
    ) -> String {
        let sample = &result_sample[..result_sample.len().min(MAX_PROMPT_ROWS)];

        let mut prompt = String::new();
        prompt.push_str("# SQL Explanation Task\n\n");
        prompt.push_str(
            "You are an expert SQL analyst. Explain what the query does in clear, concise language.\n\n",
        );
        if let Some(q) = question {
            prompt.push_str(&format!("## User Question\n\"{}\"\n\n", q));
        }
        prompt.push_str(&format!("## SQL Query\n```sql\n{}\n```\n\n", sql));
        prompt.push_str("## Database Schema\n");
        prompt.push_str(&format!("Table: {}\n", schema.table_name));
        prompt.push_str(&format!("Columns:\n{}\n", column_outline(schema)));
        if !sample.is_empty() {
            prompt.push_str(&format!(
                "\n## Sample Output (if available)\n```json\n{}\n```\n",
                rows_json(sample)
            ));
        }
        prompt.push_str("\n## Your Task\n");
        prompt.push_str("1. Explain the SQL logic step-by-step as a numbered list\n");
        prompt.push_str("2. Summarize the intent in one sentence\n");
        prompt.push_str("3. Be concise and avoid code blocks or HTML\n");
        prompt.push_str("4. Use Markdown with the exact structure below\n\n");
        prompt.push_str("Use this exact Markdown template:\n");
        prompt.push_str("### SQL Explanation\n1. ...\n2. ...\n3. ...\n\n");
        prompt.push_str("### Summary\nOne sentence summary.\n\n");
        prompt.push_str("Explanation (Markdown only):\n");
        prompt
    }
}

fn push_block(prompt: &mut String, header: &str, lines: &[String]) {
    if lines.is_empty() {
        return;
    }
    prompt.push_str(&format!("\n\n{}\n{}", header, lines.join("\n")));
}

/// Column bullets for the text-to-SQL prompt: type, context flags, example
/// values drawn from the profiled top value counts, annotation description.
fn column_bullets(schema: &TableSchema) -> String {
    let mut bullets = Vec::with_capacity(schema.columns.len());
    for column in &schema.columns {
        let mut flags: Vec<&str> = Vec::new();
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
            }
        }
        if column.is_primary_key {
            flags.push("primary key");
        }
        if schema.keys.foreign_keys.contains(&column.name) {
            flags.push("foreign key");
        }
        let context = if flags.is_empty() {
            String::new()
        } else {
            format!(" ({})", flags.join(", "))
        };

        let examples = example_values(column.is_numeric(), &column.stats);
        let mut bullet = format!(
            "- {} ({}){}: Example values: {}",
            column.name, column.data_type, context, examples
        );
        if let Some(description) = schema.annotations.column_description(&column.name) {
            bullet.push_str(&format!("; {}", description));
        }
        bullets.push(bullet);
    }
    bullets.join("\n")
}

fn example_values(numeric: bool, stats: &ColumnStats) -> String {
    let counts = match stats {
        ColumnStats::Numeric(stats) => &stats.value_counts,
        ColumnStats::Text(stats) => &stats.value_counts,
        ColumnStats::Temporal(_) => return "N/A".to_string(),
    };
    if counts.is_empty() {
        return "N/A".to_string();
    }
    counts
        .iter()
        .take(MAX_EXAMPLE_VALUES)
        .map(|vc| {
            if numeric {
                vc.value.clone()
            } else {
                format!("\"{}\"", vc.value)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Short `- name: type` outline used by the analysis-flavored prompts.
fn column_outline(schema: &TableSchema) -> String {
    schema
        .columns
        .iter()
        .map(|c| format!("- {}: {}", c.name, c.data_type))
        .collect::<Vec<_>>()
        .join("\n")
}

fn relationship_lines(schema: &TableSchema) -> Vec<String> {
    schema
        .relationships
        .iter()
        .map(|rel| match rel {
            Relationship::ForeignKey {
                from_column,
                to_table,
                to_column,
            } => format!(
                "- {} in {} relates to {} in {} (foreign_key)",
                from_column, schema.table_name, to_column, to_table
            ),
            Relationship::NamingPattern {
                from_column,
                to_table,
                to_column,
            } => format!(
                "- {} in {} relates to {} in {} (naming_pattern)",
                from_column, schema.table_name, to_column, to_table
            ),
            Relationship::JunctionTable {
                junction_table,
                table1,
                column1,
                table2,
                column2,
            } => format!(
                "- {} links {}.{} to {}.{} (junction_table)",
                junction_table, table1, column1, table2, column2
            ),
        })
        .collect()
}

fn sample_query_lines(schema: &TableSchema) -> Vec<String> {
    schema
        .sample_queries
        .iter()
        .map(|sample| {
            format!(
                "- {}:\n  ```sql\n  {}\n  ```",
                sample.description, sample.query
            )
        })
        .collect()
}

fn alias_lines(schema: &TableSchema) -> Vec<String> {
    schema
        .annotations
        .aliases
        .iter()
        .filter(|a| !a.alias.is_empty() && !a.column.is_empty())
        .map(|a| format!("- \"{}\" → {}", a.alias, a.column))
        .collect()
}

fn metric_lines(schema: &TableSchema) -> Vec<String> {
    schema
        .annotations
        .metrics
        .iter()
        .filter(|m| !m.name.is_empty() && !m.sql.is_empty())
        .map(|m| match &m.description {
            Some(description) if !description.is_empty() => {
                format!("- {}: {} ({})", m.name, m.sql, description)
            }
            _ => format!("- {}: {}", m.name, m.sql),
        })
        .collect()
}

fn rows_json(rows: &[JsonMap<String, Value>]) -> String {
    if rows.is_empty() {
        return "[]".to_string();
    }
    serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string())
}

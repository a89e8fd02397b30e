use regex::Regex;
use tracing::debug;

use crate::catalog::TableSchema;
use crate::error::NlqError;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "alter", "create", "truncate", "grant", "revoke",
    "vacuum", "analyze", "explain", "execute", "merge", "call", "copy", "set", "show", "refresh",
    "load", "do", "begin", "commit", "rollback",
];

/// Textual gate applied to every piece of generated or user-edited SQL
/// before it reaches execution. Not a parser: it bounds what a generation
/// backend can produce, it does not prove the statement correct.
pub struct SqlValidator {
    default_limit: usize,
    label_pattern: Regex,
    statement_start: Regex,
    forbidden_pattern: Regex,
    table_ref_pattern: Regex,
    alias_pattern: Regex,
    quoted_pattern: Regex,
    limit_pattern: Regex,
}

impl SqlValidator {
    pub fn new(default_limit: usize) -> Result<Self, NlqError> {
        Ok(Self {
            default_limit,
            label_pattern: Regex::new(r"(?i)^\s*(sql\s*query|sql)\s*:\s*")?,
            statement_start: Regex::new(r"(?i)^\s*(with|select)\b")?,
            forbidden_pattern: Regex::new(&format!(
                r"\b({})\b",
                FORBIDDEN_KEYWORDS.join("|")
            ))?,
            table_ref_pattern: Regex::new(r#"(?i)\b(from|join)\s+"([^"]+)""#)?,
            alias_pattern: Regex::new(r#"(?i)\bas\s+"([^"]+)""#)?,
            quoted_pattern: Regex::new(r#""([^"]+)""#)?,
            limit_pattern: Regex::new(r"(?i)\blimit\b")?,
        })
    }

    /// Sanitizes, classifies and allowlists `candidate`, then enforces a row
    /// limit. The first failing gate rejects the statement.
    pub fn prepare(&self, candidate: &str, schema: &TableSchema) -> Result<String, NlqError> {
        let sql = self.sanitize(candidate);
        if !self.is_safe_select_only(&sql) {
            debug!("Rejected statement: {}", sql);
            return Err(NlqError::Validation {
                message: "Unsafe SQL detected. Only SELECT queries are allowed.".to_string(),
            });
        }
        self.validate_identifiers(&sql, schema)?;
        Ok(self.enforce_limit(&sql))
    }

    /// Strips generation artifacts: a leading `sql:` label, prose before the
    /// first line that starts a statement, and one trailing semicolon.
    fn sanitize(&self, sql: &str) -> String {
        let mut sql = sql.trim().to_string();
        sql = self.label_pattern.replace(&sql, "").into_owned();

        for (idx, line) in sql.lines().enumerate() {
            if self.statement_start.is_match(line) {
                sql = sql
                    .lines()
                    .skip(idx)
                    .collect::<Vec<_>>()
                    .join("\n")
                    .trim()
                    .to_string();
                break;
            }
        }

        let trimmed = sql.trim_end();
        match trimmed.strip_suffix(';') {
            Some(stripped) => stripped.trim().to_string(),
            None => trimmed.trim().to_string(),
        }
    }

    fn is_safe_select_only(&self, sql: &str) -> bool {
        let sql_lower = sql.trim().to_lowercase();
        if sql_lower.contains(';') {
            return false;
        }
        if sql_lower.contains("--") || sql_lower.contains("/*") || sql_lower.contains("*/") {
            return false;
        }
        if !self.statement_start.is_match(&sql_lower) {
            return false;
        }
        !self.forbidden_pattern.is_match(&sql_lower)
    }

    /// Every double-quoted identifier must be a declared column, the table
    /// itself, or an alias introduced with `AS "alias"` earlier in the text.
    fn validate_identifiers(&self, sql: &str, schema: &TableSchema) -> Result<(), NlqError> {
        for caps in self.table_ref_pattern.captures_iter(sql) {
            if let Some(table_ref) = caps.get(2) {
                if table_ref.as_str() != schema.table_name {
                    return Err(NlqError::Validation {
                        message: format!("Unsafe table reference: {}", table_ref.as_str()),
                    });
                }
            }
        }

        let aliases: Vec<(usize, &str)> = self
            .alias_pattern
            .captures_iter(sql)
            .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str())))
            .collect();

        let column_names = schema.column_names();
        for caps in self.quoted_pattern.captures_iter(sql) {
            let ident = match caps.get(1) {
                Some(m) => m,
                None => continue,
            };
            let name = ident.as_str();
            if name == schema.table_name || column_names.iter().any(|c| *c == name) {
                continue;
            }
            let introduced = aliases
                .iter()
                .any(|(pos, alias)| *alias == name && *pos <= ident.start());
            if !introduced {
                return Err(NlqError::Validation {
                    message: format!("Unknown or unsafe identifier: {}", name),
                });
            }
        }
        Ok(())
    }

    fn enforce_limit(&self, sql: &str) -> String {
        if self.limit_pattern.is_match(sql) {
            return sql.to_string();
        }
        format!("{} LIMIT {}", sql.trim(), self.default_limit)
    }
}

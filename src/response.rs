use regex::Regex;
use serde_json::{Map as JsonMap, Value};

use crate::catalog::{TableSchema, VisualizationType};
use crate::database::QueryOutput;
use crate::error::NlqError;
use crate::profiler::parse_timestamp;

/// Outcome of parsing a structured model response: either a JSON object or
/// the raw text for the caller's fallback path.
#[derive(Debug)]
pub enum ParsedResponse {
    Recognized(JsonMap<String, Value>),
    Unparseable(String),
}

/// Strips generation artifacts from model output: fenced code blocks,
/// stray prose around JSON payloads, uneven Markdown.
pub struct ResponseProcessor {
    json_fence: Regex,
    sql_fence: Regex,
    any_fence: Regex,
    fence_unwrap: Regex,
    heading_space: Regex,
    heading_break: Regex,
    numbered_break: Regex,
    bullet_break: Regex,
    blank_collapse: Regex,
}

impl ResponseProcessor {
    pub fn new() -> Result<Self, NlqError> {
        Ok(Self {
            json_fence: Regex::new(r"(?is)```json\s*(.*?)\s*```")?,
            sql_fence: Regex::new(r"(?is)```sql\s*(.*?)\s*```")?,
            any_fence: Regex::new(r"(?s)```\s*(.*?)\s*```")?,
            fence_unwrap: Regex::new(r"(?s)```(?:\w+)?\s*(.*?)\s*```")?,
            heading_space: Regex::new(r"(#{2,6})(\S)")?,
            heading_break: Regex::new(r"([^\n])(#{2,6}\s)")?,
            numbered_break: Regex::new(r"([^\n])(\d+\.\s+)")?,
            bullet_break: Regex::new(r"([^\n])([-*]\s+)")?,
            blank_collapse: Regex::new(r"\n{3,}")?,
        })
    }

    /// Unwraps a fenced code block, preferring the most specific tag. Applied
    /// to every successful backend response before further processing.
    pub fn clean(&self, text: &str) -> String {
        let mut current = text.trim().to_string();
        let mut tagged = false;

        if let Some(body) = self.json_fence.captures(&current).and_then(|c| c.get(1)) {
            current = body.as_str().trim().to_string();
            tagged = true;
        }
        if let Some(body) = self.sql_fence.captures(&current).and_then(|c| c.get(1)) {
            current = body.as_str().trim().to_string();
            tagged = true;
        }
        if !tagged {
            if let Some(body) = self.any_fence.captures(&current).and_then(|c| c.get(1)) {
                current = body.as_str().trim().to_string();
            }
        }
        current
    }

    /// Best-effort extraction of a JSON payload: tagged fence, untagged fence
    /// holding a literal, brace span, bracket span, then the text itself.
    fn json_candidate(&self, text: &str) -> String {
        if let Some(body) = self.json_fence.captures(text).and_then(|c| c.get(1)) {
            return body.as_str().trim().to_string();
        }
        if let Some(body) = self.any_fence.captures(text).and_then(|c| c.get(1)) {
            let candidate = body.as_str().trim();
            if candidate.starts_with('{') || candidate.starts_with('[') {
                return candidate.to_string();
            }
        }
        if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
            if start < end {
                return text[start..=end].trim().to_string();
            }
        }
        if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
            if start < end {
                return text[start..=end].trim().to_string();
            }
        }
        text.trim().to_string()
    }

    /// Parses a JSON object out of model text. Retries with single quotes
    /// swapped for double quotes, since models sometimes emit Python-style
    /// literals.
    pub fn parse_object(&self, text: &str) -> Option<JsonMap<String, Value>> {
        let candidate = self.json_candidate(text);
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&candidate) {
            return Some(map);
        }
        let relaxed = candidate.replace('\'', "\"");
        match serde_json::from_str::<Value>(&relaxed) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    pub fn parse_structured(&self, text: &str) -> ParsedResponse {
        match self.parse_object(text) {
            Some(map) => ParsedResponse::Recognized(map),
            None => ParsedResponse::Unparseable(text.to_string()),
        }
    }

    /// Repairs model-flavored Markdown: unwraps fences, forces headings and
    /// list items onto their own lines, collapses blank runs.
    pub fn normalize_markdown(&self, text: &str) -> String {
        let cleaned = text.trim();
        if cleaned.is_empty() {
            return String::new();
        }

        let mut current = self.fence_unwrap.replace_all(cleaned, "$1").into_owned();
        current = current.replace("\r\n", "\n").replace('\r', "\n");
        current = self.heading_space.replace_all(&current, "$1 $2").into_owned();
        current = self.heading_break.replace_all(&current, "$1\n$2").into_owned();

        // Blank line after each heading.
        let lines: Vec<&str> = current.lines().collect();
        let mut spaced: Vec<String> = Vec::with_capacity(lines.len());
        for (idx, line) in lines.iter().enumerate() {
            spaced.push((*line).to_string());
            let hashes = line.trim_start().chars().take_while(|c| *c == '#').count();
            if (2..=6).contains(&hashes) {
                if let Some(next) = lines.get(idx + 1) {
                    if !next.trim().is_empty() {
                        spaced.push(String::new());
                    }
                }
            }
        }
        current = spaced.join("\n");

        current = self
            .numbered_break
            .replace_all(&current, "$1\n$2")
            .into_owned();
        current = self.bullet_break.replace_all(&current, "$1\n$2").into_owned();
        current = self.blank_collapse.replace_all(&current, "\n\n").into_owned();
        current.trim().to_string()
    }
}

/// Picks a chart type from the shape of the result set: line when a numeric
/// column appears alongside a temporal one, bar for a single numeric column
/// with labels, table otherwise.
pub fn infer_visualization(output: &QueryOutput, schema: &TableSchema) -> VisualizationType {
    let first_row = match output.rows.first() {
        Some(row) => row,
        None => return VisualizationType::Table,
    };

    let mut numeric = 0usize;
    let mut temporal = 0usize;
    let mut other = 0usize;

    for (name, value) in first_row {
        match schema.column(name) {
            Some(profile) => {
                if profile.is_numeric() {
                    numeric += 1;
                } else if profile.is_temporal() {
                    temporal += 1;
                } else {
                    other += 1;
                }
            }
            // Derived columns (aggregates, aliases) are judged by the value
            // shape instead.
            None => match value {
                Value::Number(_) => numeric += 1,
                Value::String(s) if parse_timestamp(s).is_some() => temporal += 1,
                _ => other += 1,
            },
        }
    }

    if numeric > 0 && temporal > 0 {
        VisualizationType::Line
    } else if numeric == 1 && other >= 1 {
        VisualizationType::Bar
    } else {
        VisualizationType::Table
    }
}

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::catalog::{
    ColumnProfile, ColumnStats, ColumnType, NumericStats, TemporalStats, TextStats, ValueCount,
};
use crate::error::NlqError;

const NAME_INDICATORS: &[&str] = &["name", "person", "customer", "employee", "user"];

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Profiles one column's sampled values into a [`ColumnStats`] variant.
///
/// Classification: numeric declared type takes the numeric path; a temporal
/// declared type, or a value sample that is at least 80% date-shaped, takes
/// the temporal path; everything else is profiled as text. Any failure in
/// the temporal path falls back to the textual path instead of aborting.
pub struct ColumnProfiler {
    date_patterns: Vec<Regex>,
    email_pattern: Regex,
    url_pattern: Regex,
}

impl ColumnProfiler {
    pub fn new() -> Result<Self, NlqError> {
        let date_patterns = [
            r"^\d{4}-\d{2}-\d{2}",
            r"^\d{2}/\d{2}/\d{4}",
            r"^\d{2}-\d{2}-\d{4}",
            r"^\d{2}\.\d{2}\.\d{4}",
        ]
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            date_patterns,
            email_pattern: Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")?,
            url_pattern: Regex::new(r"^(http|https)://[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")?,
        })
    }

    pub fn profile(
        &self,
        name: &str,
        data_type: ColumnType,
        declared_type: &str,
        nullable: bool,
        values: &[Value],
    ) -> ColumnProfile {
        let stats = if data_type.is_numeric() {
            ColumnStats::Numeric(self.profile_numeric(data_type, values))
        } else if data_type.is_temporal() || self.looks_like_date(values) {
            match self.profile_temporal(values) {
                Some(temporal) => ColumnStats::Temporal(temporal),
                None => ColumnStats::Text(self.profile_text(name, values)),
            }
        } else {
            ColumnStats::Text(self.profile_text(name, values))
        };

        ColumnProfile {
            name: name.to_string(),
            data_type,
            declared_type: declared_type.to_string(),
            nullable,
            is_primary_key: false,
            stats,
        }
    }

    fn looks_like_date(&self, values: &[Value]) -> bool {
        let sample: Vec<String> = non_null(values).iter().map(|v| value_text(v)).collect();
        if sample.is_empty() {
            return false;
        }
        let matches = sample
            .iter()
            .filter(|s| self.date_patterns.iter().any(|p| p.is_match(s)))
            .count();
        matches as f64 >= sample.len() as f64 * 0.8
    }

    fn profile_numeric(&self, data_type: ColumnType, values: &[Value]) -> NumericStats {
        let total = values.len() as u64;
        let non_null = non_null(values);
        let null_count = total - non_null.len() as u64;

        let numbers: Vec<f64> = non_null.iter().filter_map(|v| value_number(v)).collect();
        let mut sorted = numbers.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let min = sorted.first().copied();
        let max = sorted.last().copied();
        let mean = mean(&numbers);
        let median = median(&sorted);
        let std_dev = sample_std_dev(&numbers);

        let texts: Vec<String> = non_null.iter().map(|v| value_text(v)).collect();
        let unique_count = distinct_count(&texts);

        let is_integer = data_type == ColumnType::Integer
            || numbers.iter().all(|n| n.fract() == 0.0 && n.is_finite());

        let is_categorical = unique_count < 10 && total > unique_count * 2;
        let value_counts = if is_categorical {
            top_value_counts(&texts, 10)
        } else {
            Vec::new()
        };

        NumericStats {
            min,
            max,
            mean,
            median,
            std_dev,
            null_count,
            null_percentage: percentage(null_count, total),
            unique_count,
            is_integer,
            is_categorical,
            value_counts,
        }
    }

    fn profile_temporal(&self, values: &[Value]) -> Option<TemporalStats> {
        let total = values.len() as u64;
        let non_null = non_null(values);
        let null_count = total - non_null.len() as u64;

        // Every non-null value must coerce, mirroring a strict column-wide
        // timestamp conversion; otherwise the caller profiles as text.
        let mut timestamps = Vec::with_capacity(non_null.len());
        for value in &non_null {
            timestamps.push(parse_timestamp(&value_text(value))?);
        }

        let mut unique = timestamps.clone();
        unique.sort();
        unique.dedup();

        let min = unique.first().copied();
        let max = unique.last().copied();
        let time_span_days = match (min, max) {
            (Some(lo), Some(hi)) => Some((hi - lo).num_days()),
            _ => None,
        };

        let unique_count = unique.len() as u64;
        let mut is_time_series = false;
        let mut approximate_frequency = None;

        if unique_count > 10 && unique.len() > 2 {
            let window = unique.iter().take(10).collect::<Vec<_>>();
            let deltas: Vec<f64> = window
                .windows(2)
                .map(|pair| (*pair[1] - *pair[0]).num_seconds() as f64)
                .collect();
            if let (Some(mean_delta), Some(std_delta)) =
                (mean(&deltas), population_std_dev(&deltas))
            {
                let evenly_spaced = deltas.iter().all(|d| *d == deltas[0])
                    || (mean_delta != 0.0 && std_delta / mean_delta < 0.2);
                if evenly_spaced {
                    is_time_series = true;
                    approximate_frequency = Some(format_seconds(mean_delta));
                }
            }
        }

        Some(TemporalStats {
            min: min.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            max: max.map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
            time_span_days,
            null_count,
            null_percentage: percentage(null_count, total),
            unique_count,
            is_time_series,
            approximate_frequency,
        })
    }

    fn profile_text(&self, name: &str, values: &[Value]) -> TextStats {
        let total = values.len() as u64;
        let non_null = non_null(values);
        let null_count = total - non_null.len() as u64;

        let texts: Vec<String> = non_null.iter().map(|v| value_text(v)).collect();
        let min_length = texts.iter().map(|s| s.chars().count() as u64).min().unwrap_or(0);
        let max_length = texts.iter().map(|s| s.chars().count() as u64).max().unwrap_or(0);
        let unique_count = distinct_count(&texts);

        let is_categorical = unique_count < 20 && total > unique_count * 2;
        let value_counts = if is_categorical {
            top_value_counts(&texts, 10)
        } else {
            Vec::new()
        };

        let is_email = pattern_share(&texts, &self.email_pattern) > 0.7;
        let is_url = pattern_share(&texts, &self.url_pattern) > 0.7;

        let lower_name = name.to_lowercase();
        let likely_contains_names =
            NAME_INDICATORS.iter().any(|ind| lower_name.contains(ind)) && max_length < 100;

        TextStats {
            min_length,
            max_length,
            null_count,
            null_percentage: percentage(null_count, total),
            unique_count,
            is_unique: unique_count == total,
            is_categorical,
            value_counts,
            is_email,
            is_url,
            likely_contains_names,
        }
    }
}

fn non_null(values: &[Value]) -> Vec<&Value> {
    values.iter().filter(|v| !v.is_null()).collect()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn value_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn median(sorted: &[f64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

fn sample_std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() as f64 - 1.0);
    Some(variance.sqrt())
}

fn population_std_dev(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

fn distinct_count(texts: &[String]) -> u64 {
    let mut seen: Vec<&String> = texts.iter().collect();
    seen.sort();
    seen.dedup();
    seen.len() as u64
}

fn top_value_counts(texts: &[String], limit: usize) -> Vec<ValueCount> {
    let mut counts: HashMap<&String, u64> = HashMap::new();
    for text in texts {
        *counts.entry(text).or_insert(0) += 1;
    }
    let mut pairs: Vec<(&String, u64)> = counts.into_iter().collect();
    pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    pairs
        .into_iter()
        .take(limit)
        .map(|(value, count)| ValueCount {
            value: value.clone(),
            count,
        })
        .collect()
}

fn pattern_share(texts: &[String], pattern: &Regex) -> f64 {
    if texts.is_empty() {
        return 0.0;
    }
    let matches = texts.iter().filter(|s| pattern.is_match(s)).count();
    matches as f64 / texts.len() as f64
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(ts.naive_utc());
    }
    for format in TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(ts);
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

fn format_seconds(seconds: f64) -> String {
    let total = seconds.round() as i64;
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let secs = total % 60;
    match (days, hours, minutes) {
        (0, 0, 0) => format!("{}s", secs),
        (0, 0, _) => format!("{}m {}s", minutes, secs),
        (0, _, _) => format!("{}h {}m", hours, minutes),
        _ => format!("{}d {}h", days, hours),
    }
}

//! Prompt contract for chart generation.
//!
//! The generation service receives [`SYSTEM_PROMPT`] as its system
//! instruction and the user's query (plus at most one clarification
//! answer) as the user turn. It must answer with a single JSON object in
//! the [`AiResponse`] shape; [`parse_ai_response`] enforces that shape.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::models::{AiResponse, ChartData, ChartType, Trend};
use crate::{Error, Result};

/// Bumped whenever the requested schema changes.
pub const PROMPT_VERSION: u32 = 2;

/// System instruction sent with every generation call.
pub const SYSTEM_PROMPT: &str = r#"You are a data analyst that turns questions into chart data.

Answer ONLY with one JSON object. No prose, no markdown, no code fences.

When the question can be charted, answer:
{
  "needsClarification": false,
  "chartData": {
    "title": "short descriptive title",
    "chartType": "bar" | "line" | "pie" | "area",
    "labels": ["label 1", "label 2", ...],
    "values": [number, number, ...],
    "unit": "unit of the values, e.g. million people",
    "description": "one sentence describing the chart",
    "sources": ["where this kind of data is published"],
    "insights": ["analytical insight 1", "analytical insight 2"],
    "trend": "up" | "down" | "stable",
    "highlightIndex": index of the most notable data point
  }
}

Rules:
- Provide 10 to 15 data points unless the question asks for a specific number.
- labels and values must have the same length; values are plain numbers.
- Give 2 to 3 short insights about the data.
- Use "line" or "area" for time series, "pie" for parts of a whole, "bar" for comparisons.
- highlightIndex must be a valid index into values.
- Prefer a reasonable interpretation over asking a question.

Only if the question cannot be interpreted at all, answer:
{
  "needsClarification": true,
  "clarificationQuestion": "one short question"
}"#;

/// Build the user turn from the query and an optional clarification answer.
pub fn build_user_prompt(query: &str, clarification_answer: Option<&str>) -> String {
    match clarification_answer.map(str::trim).filter(|a| !a.is_empty()) {
        Some(answer) => format!("{}\nClarification: {}", query.trim(), answer),
        None => query.trim().to_string(),
    }
}

/// Wire shape as the model may send it; everything optional so that
/// missing fields produce a precise error instead of a serde message.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    #[serde(default)]
    needs_clarification: bool,
    clarification_question: Option<String>,
    chart_data: Option<RawChart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChart {
    title: Option<String>,
    chart_type: Option<String>,
    #[serde(default)]
    labels: Vec<Value>,
    #[serde(alias = "data", default)]
    values: Vec<Value>,
    unit: Option<String>,
    description: Option<String>,
    sources: Option<Value>,
    source: Option<Value>,
    insights: Option<Value>,
    trend: Option<Value>,
    highlight_index: Option<Value>,
}

/// Parse and validate the raw text returned by the generation service.
pub fn parse_ai_response(raw: &str) -> Result<AiResponse> {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return Err(Error::Generation("No content in generation response".to_string()));
    }

    let parsed: RawResponse = serde_json::from_str(body)
        .map_err(|e| Error::Generation(format!("Response is not valid JSON: {}", e)))?;

    if parsed.needs_clarification {
        let question = parsed
            .clarification_question
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| Error::Generation("Clarification requested without a question".to_string()))?;
        return Ok(AiResponse::clarification(question));
    }

    let raw_chart = parsed
        .chart_data
        .ok_or_else(|| Error::Generation("Response has no chartData".to_string()))?;

    let chart = into_chart(raw_chart)?;
    chart
        .check()
        .map_err(|e| Error::Generation(e.to_string()))?;

    Ok(AiResponse::chart(chart))
}

fn into_chart(raw: RawChart) -> Result<ChartData> {
    let title = raw
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Generation("chartData.title is missing".to_string()))?;

    let chart_type: ChartType = raw
        .chart_type
        .as_deref()
        .map(|t| t.trim().to_ascii_lowercase())
        .ok_or_else(|| Error::Generation("chartData.chartType is missing".to_string()))?
        .parse()
        .map_err(|e: Error| Error::Generation(e.to_string()))?;

    let labels = raw
        .labels
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect::<Vec<_>>();

    let values = raw
        .values
        .iter()
        .map(value_as_number)
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| Error::Generation("chartData.values must be numbers".to_string()))?;

    if labels.is_empty() || values.is_empty() {
        return Err(Error::Generation("chartData has no data points".to_string()));
    }

    let sources = string_list("sources", raw.sources).or_else(|| string_list("source", raw.source));
    let trend = raw.trend.and_then(|t| match t.as_str().map(str::parse::<Trend>) {
        Some(Ok(trend)) => Some(trend),
        _ => {
            warn!("Ignoring unknown trend {}", t);
            None
        }
    });
    let highlight_index = raw
        .highlight_index
        .and_then(|i| point_index(&i, values.len()));

    Ok(ChartData {
        title,
        chart_type,
        labels,
        values,
        unit: raw.unit.filter(|u| !u.trim().is_empty()),
        description: raw.description.filter(|d| !d.trim().is_empty()),
        sources,
        insights: string_list("insights", raw.insights),
        trend,
        highlight_index,
    })
}

/// Numbers sometimes come back quoted, e.g. "1,234.5".
fn value_as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// A list of strings, or a lone string, with blank entries dropped.
fn string_list(field: &str, value: Option<Value>) -> Option<Vec<String>> {
    let items = match value? {
        Value::String(single) => vec![single],
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                Value::Number(n) => Some(n.to_string()),
                other => {
                    warn!("Ignoring {} entry {}", field, other);
                    None
                }
            })
            .collect(),
        Value::Null => return None,
        other => {
            warn!("Ignoring {} {}", field, other);
            return None;
        }
    };
    let items: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

/// Whole, in-range point index; `1.0` and `"1"` count as 1.
fn point_index(value: &Value, len: usize) -> Option<usize> {
    match value_as_number(value) {
        Some(i) if i.fract() == 0.0 && i >= 0.0 && (i as usize) < len => Some(i as usize),
        _ => {
            warn!("Ignoring highlightIndex {} for {} points", value, len);
            None
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

//! Display-side numbers for a chart: summary statistics, pie shares,
//! axis tick labels and the layout of the PDF export.
//!
//! Nothing here feeds back into stored values.

use serde::{Deserialize, Serialize};

use crate::models::{ChartData, ChartType};

/// Charts with more points than this get no data table in the export.
pub const MAX_TABLE_ROWS: usize = 15;

/// Max, min and sum of a series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSummary {
    pub max: f64,
    pub min: f64,
    pub sum: f64,
    pub max_index: usize,
    pub min_index: usize,
}

impl ChartSummary {
    /// `None` for an empty series.
    pub fn of(values: &[f64]) -> Option<Self> {
        let first = *values.first()?;
        let mut summary = Self {
            max: first,
            min: first,
            sum: 0.0,
            max_index: 0,
            min_index: 0,
        };
        for (i, &value) in values.iter().enumerate() {
            if value > summary.max {
                summary.max = value;
                summary.max_index = i;
            }
            if value < summary.min {
                summary.min = value;
                summary.min_index = i;
            }
            summary.sum += value;
        }
        Some(summary)
    }
}

/// Share of the total per slice, in percent. All zero when the total is zero.
pub fn pie_percentages(values: &[f64]) -> Vec<f64> {
    let total: f64 = values.iter().sum();
    if total == 0.0 {
        return vec![0.0; values.len()];
    }
    values.iter().map(|v| v / total * 100.0).collect()
}

/// Axis tick label; values longer than four characters use K/M/B.
pub fn format_axis_tick(value: f64) -> String {
    let plain = trim_decimal(format!("{}", value));
    if plain.len() <= 4 {
        return plain;
    }

    let abs = value.abs();
    let mut tier = TICK_TIERS
        .iter()
        .position(|(scale, _)| abs >= *scale)
        .unwrap_or(TICK_TIERS.len() - 1);
    // 999_950 rounds to 1000.0K; show it as 1M instead.
    let rounded = |tier: usize| (value / TICK_TIERS[tier].0 * 10.0).round() / 10.0;
    if tier > 0 && rounded(tier).abs() >= 1000.0 {
        tier -= 1;
    }

    let (scale, suffix) = TICK_TIERS[tier];
    format!("{}{}", trim_decimal(format!("{:.1}", value / scale)), suffix)
}

const TICK_TIERS: [(f64, &str); 4] = [(1e9, "B"), (1e6, "M"), (1e3, "K"), (1.0, "")];

fn trim_decimal(s: String) -> String {
    match s.strip_suffix(".0") {
        Some(trimmed) => trimmed.to_string(),
        None => s,
    }
}

/// Marker shown next to a row of the export table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowMarker {
    Max,
    Min,
}

/// One row of the export data table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    pub label: String,
    pub value: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<RowMarker>,
}

/// What goes into an exported document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPlan {
    pub title: String,
    pub file_stem: String,
    pub summary: ChartSummary,
    pub point_count: usize,
    /// Second page; only present for small charts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<Vec<TableRow>>,
}

impl ExportPlan {
    pub fn for_chart(chart: &ChartData) -> Option<Self> {
        let summary = ChartSummary::of(&chart.values)?;
        let percentages = (chart.chart_type == ChartType::Pie).then(|| pie_percentages(&chart.values));

        let table = (chart.values.len() <= MAX_TABLE_ROWS).then(|| {
            chart
                .labels
                .iter()
                .zip(&chart.values)
                .enumerate()
                .map(|(i, (label, &value))| TableRow {
                    label: label.clone(),
                    value,
                    percentage: percentages.as_ref().map(|p| p[i]),
                    marker: if i == summary.max_index {
                        Some(RowMarker::Max)
                    } else if i == summary.min_index {
                        Some(RowMarker::Min)
                    } else {
                        None
                    },
                })
                .collect()
        });

        Some(Self {
            title: chart.title.clone(),
            file_stem: file_stem(&chart.title),
            summary,
            point_count: chart.values.len(),
            table,
        })
    }
}

/// File name (without extension) for an exported chart.
pub fn file_stem(title: &str) -> String {
    let mut stem = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_alphanumeric() {
            stem.extend(c.to_lowercase());
        } else if !stem.ends_with('-') && !stem.is_empty() {
            stem.push('-');
        }
    }
    let stem = stem.trim_end_matches('-');
    if stem.is_empty() {
        "chart".to_string()
    } else {
        stem.to_string()
    }
}

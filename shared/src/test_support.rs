//! Fixtures shared by unit tests.

use crate::models::{ChartData, ChartType, NewChart, Owner, Trend};
use crate::share::generate_share_id;

pub fn sample_chart() -> ChartData {
    ChartData {
        title: "Top 5 countries by population".to_string(),
        chart_type: ChartType::Bar,
        labels: ["India", "China", "United States", "Indonesia", "Pakistan"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        values: vec![1428.6, 1425.7, 339.9, 277.5, 240.5],
        unit: Some("million people".to_string()),
        description: Some("Population in 2023".to_string()),
        sources: Some(vec!["UN World Population Prospects".to_string()]),
        insights: Some(vec!["India overtook China in 2023".to_string()]),
        trend: Some(Trend::Down),
        highlight_index: Some(0),
    }
}

pub fn new_chart(owner: &Owner, chart: ChartData) -> NewChart {
    NewChart {
        owner: owner.clone(),
        chart,
        share_id: generate_share_id(),
    }
}

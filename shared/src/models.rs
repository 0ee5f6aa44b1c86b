//! Shared data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{Error, Result};

/// Visual encoding requested for a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Area,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Area => "area",
        }
    }
}

impl std::str::FromStr for ChartType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bar" => Ok(ChartType::Bar),
            "line" => Ok(ChartType::Line),
            "pie" => Ok(ChartType::Pie),
            "area" => Ok(ChartType::Area),
            other => Err(Error::Validation(format!("Unknown chart type: {}", other))),
        }
    }
}

/// Overall direction of the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Up => "up",
            Trend::Down => "down",
            Trend::Stable => "stable",
        }
    }
}

impl std::str::FromStr for Trend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Trend::Up),
            "down" => Ok(Trend::Down),
            "stable" => Ok(Trend::Stable),
            other => Err(Error::Validation(format!("Unknown trend: {}", other))),
        }
    }
}

/// Structured chart produced by generation.
///
/// `values` is the canonical series; `data` is accepted on input as the
/// legacy name for the same content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub chart_type: ChartType,
    #[validate(length(min = 1, max = 100))]
    pub labels: Vec<String>,
    #[serde(alias = "data")]
    #[validate(length(min = 1, max = 100))]
    pub values: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<Trend>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight_index: Option<usize>,
}

impl ChartData {
    /// Check the structural invariants shared by generation and persistence.
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::Validation(format!("Invalid chart data: {}", e)))?;

        if self.labels.len() != self.values.len() {
            return Err(Error::Validation(format!(
                "labels and values differ in length ({} vs {})",
                self.labels.len(),
                self.values.len()
            )));
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(Error::Validation("values must be finite numbers".to_string()));
        }
        if let Some(index) = self.highlight_index {
            if index >= self.values.len() {
                return Err(Error::Validation(format!(
                    "highlightIndex {} out of range for {} points",
                    index,
                    self.values.len()
                )));
            }
        }
        Ok(())
    }
}

/// Generation request payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    #[validate(length(min = 1, max = 2000))]
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 1000))]
    pub clarification_answer: Option<String>,
}

/// Response of the generation service: either a question or a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub needs_clarification: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_data: Option<ChartData>,
}

impl AiResponse {
    pub fn clarification(question: impl Into<String>) -> Self {
        Self {
            needs_clarification: true,
            clarification_question: Some(question.into()),
            chart_data: None,
        }
    }

    pub fn chart(chart_data: ChartData) -> Self {
        Self {
            needs_clarification: false,
            clarification_question: None,
            chart_data: Some(chart_data),
        }
    }
}

/// Who owns a chart. Exactly one identity is ever recorded on a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Owner {
    User(String),
    Anonymous(String),
}

impl Owner {
    /// Resolve an owner from optional request ids; an authenticated id wins.
    pub fn from_ids(user_id: Option<&str>, anonymous_id: Option<&str>) -> Option<Self> {
        let non_empty = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        non_empty(user_id)
            .map(Owner::User)
            .or_else(|| non_empty(anonymous_id).map(Owner::Anonymous))
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Owner::User(id) => Some(id),
            Owner::Anonymous(_) => None,
        }
    }

    pub fn anonymous_id(&self) -> Option<&str> {
        match self {
            Owner::Anonymous(id) => Some(id),
            Owner::User(_) => None,
        }
    }

    /// Key used to serialize inserts for the same owner.
    pub fn lock_key(&self) -> String {
        match self {
            Owner::User(id) => format!("user:{}", id),
            Owner::Anonymous(id) => format!("anon:{}", id),
        }
    }
}

/// Persisted chart row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredChart {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
    #[serde(flatten)]
    pub chart: ChartData,
    pub is_public: bool,
    pub share_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredChart {
    pub fn owner(&self) -> Option<Owner> {
        Owner::from_ids(self.user_id.as_deref(), self.anonymous_id.as_deref())
    }

    pub fn is_owned_by(&self, owner: &Owner) -> bool {
        match owner {
            Owner::User(id) => self.user_id.as_deref() == Some(id.as_str()),
            Owner::Anonymous(id) => {
                self.user_id.is_none() && self.anonymous_id.as_deref() == Some(id.as_str())
            }
        }
    }
}

/// A chart about to be inserted.
#[derive(Debug, Clone)]
pub struct NewChart {
    pub owner: Owner,
    pub chart: ChartData,
    pub share_id: String,
}

/// How a single chart is looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChartLookup {
    Id(Uuid),
    ShareId(String),
}

/// Derived quota for an identity; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaState {
    pub allowed: bool,
    pub current: i64,
    /// `None` means unbounded.
    pub limit: Option<i64>,
    pub is_pro: bool,
}

impl QuotaState {
    pub fn new(current: i64, limit: Option<i64>, is_pro: bool) -> Self {
        Self {
            allowed: limit.map_or(true, |limit| current < limit),
            current,
            limit,
            is_pro,
        }
    }
}

/// Identity parameters accepted by list and check-limit.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<String>,
}

/// Body of the save action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    #[serde(flatten)]
    pub identity: IdentityParams,
    pub chart_data: ChartData,
}

/// Body or query of the delete action.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_id: Option<String>,
    #[serde(flatten)]
    pub identity: IdentityParams,
}

/// Body or query of the get action.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share_id: Option<String>,
}

/// Body of the migrate action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrateRequest {
    pub user_id: String,
    pub anonymous_id: String,
}

/// Successful save.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveResponse {
    pub success: bool,
    pub chart: StoredChart,
    pub share_url: String,
}

//! Typed client for the generation and charts endpoints.
//!
//! The front end generates a chart and then saves it in the background.
//! [`AutoSavePolicy`] decides what a failed background save means.

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::models::{AiResponse, ChartData, ChartRequest, IdentityParams, QuotaState, SaveResponse, StoredChart};
use crate::render::{ChartSummary, ExportPlan};
use crate::{Error, Result};

/// What to do when the automatic save after a generation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AutoSavePolicy {
    /// Keep the chart, drop the failure quietly.
    Silent,
    /// Keep the chart, log the failure and report it in the outcome.
    #[default]
    Warn,
    /// Fail the whole call.
    Fail,
}

/// Result of [`ChartApiClient::generate_and_save`].
#[derive(Debug)]
pub struct GenerationOutcome {
    pub response: AiResponse,
    pub saved: Option<SaveResponse>,
    /// Why the automatic save did not happen, unless the policy is silent.
    pub save_error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartsList {
    charts: Vec<StoredChart>,
}

/// Chart returned by the `get` action.
#[derive(Debug, Deserialize)]
pub struct FetchedChart {
    pub chart: StoredChart,
    pub summary: Option<ChartSummary>,
}

impl FetchedChart {
    /// Layout for the PDF export of this chart.
    pub fn export_plan(&self) -> Option<ExportPlan> {
        ExportPlan::for_chart(&self.chart.chart)
    }
}

#[derive(Debug, Deserialize)]
struct MigrateResult {
    migrated: u64,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    error: String,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    current: Option<i64>,
    #[serde(default)]
    limit: Option<i64>,
}

/// HTTP client for a deployed chart API.
#[derive(Debug, Clone)]
pub struct ChartApiClient {
    http_client: reqwest::Client,
    generate_url: String,
    charts_url: String,
    bearer_token: Option<String>,
}

impl ChartApiClient {
    pub fn new(http_client: reqwest::Client, generate_url: impl Into<String>, charts_url: impl Into<String>) -> Self {
        Self {
            http_client,
            generate_url: generate_url.into(),
            charts_url: charts_url.into(),
            bearer_token: None,
        }
    }

    /// Authenticate subsequent calls with the identity provider's token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub async fn generate(&self, query: &str, clarification_answer: Option<&str>) -> Result<AiResponse> {
        let request = ChartRequest {
            query: query.to_string(),
            clarification_answer: clarification_answer.map(String::from),
        };
        self.send(Method::POST, &self.generate_url, None, Some(&request)).await
    }

    pub async fn save(&self, identity: &IdentityParams, chart_data: &ChartData) -> Result<SaveResponse> {
        let body = json!({
            "userId": identity.user_id,
            "anonymousId": identity.anonymous_id,
            "chartData": chart_data,
        });
        self.send(Method::POST, &self.charts_url, Some("save"), Some(&body)).await
    }

    pub async fn list(&self, identity: &IdentityParams) -> Result<Vec<StoredChart>> {
        let list: ChartsList = self
            .send(Method::POST, &self.charts_url, Some("list"), Some(identity))
            .await?;
        Ok(list.charts)
    }

    pub async fn get_by_share_id(&self, share_id: &str) -> Result<FetchedChart> {
        let body = json!({ "shareId": share_id });
        self.send(Method::POST, &self.charts_url, Some("get"), Some(&body)).await
    }

    pub async fn delete(&self, chart_id: &str, identity: &IdentityParams) -> Result<()> {
        let body = json!({
            "chartId": chart_id,
            "userId": identity.user_id,
            "anonymousId": identity.anonymous_id,
        });
        let _: serde_json::Value = self
            .send(Method::DELETE, &self.charts_url, Some("delete"), Some(&body))
            .await?;
        Ok(())
    }

    pub async fn check_limit(&self, identity: &IdentityParams) -> Result<QuotaState> {
        self.send(Method::POST, &self.charts_url, Some("check-limit"), Some(identity))
            .await
    }

    /// Move an anonymous session's charts to the signed-in user.
    pub async fn migrate(&self, user_id: &str, anonymous_id: &str) -> Result<u64> {
        let body = json!({ "userId": user_id, "anonymousId": anonymous_id });
        let result: MigrateResult = self
            .send(Method::POST, &self.charts_url, Some("migrate"), Some(&body))
            .await?;
        Ok(result.migrated)
    }

    /// Generate a chart and save it right away.
    ///
    /// Clarification questions are returned without saving.
    pub async fn generate_and_save(
        &self,
        query: &str,
        clarification_answer: Option<&str>,
        identity: &IdentityParams,
        policy: AutoSavePolicy,
    ) -> Result<GenerationOutcome> {
        let response = self.generate(query, clarification_answer).await?;
        let save_result = match &response.chart_data {
            Some(chart) => Some(self.save(identity, chart).await),
            None => None,
        };
        settle_auto_save(response, save_result, policy)
    }

    async fn send<B, T>(&self, method: Method, url: &str, action: Option<&str>, body: Option<&B>) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self.http_client.request(method, url);
        if let Some(action) = action {
            request = request.query(&[("action", action)]);
        }
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if (200..300).contains(&status) {
            return Ok(serde_json::from_str(&text)?);
        }
        Err(remote_error(status, &text))
    }
}

/// Map an endpoint error body back onto [`Error`].
fn remote_error(status: u16, body: &str) -> Error {
    let Ok(remote) = serde_json::from_str::<RemoteError>(body) else {
        return Error::Upstream { status, message: body.chars().take(500).collect(), code: None };
    };
    let message = match remote.details {
        Some(details) => format!("{}: {}", remote.error, details),
        None => remote.error,
    };
    match (status, remote.code.as_deref()) {
        (403, Some("QUOTA_EXCEEDED")) => Error::QuotaExceeded {
            current: remote.current.unwrap_or_default(),
            limit: remote.limit.unwrap_or_default(),
        },
        (403, _) => Error::Unauthorized(message),
        (401, _) => Error::Auth(message),
        (404, _) => Error::NotFound(message),
        (400, _) => Error::Validation(message),
        (_, code) => Error::Upstream { status, message, code: code.map(String::from) },
    }
}

fn settle_auto_save(
    response: AiResponse,
    save_result: Option<Result<SaveResponse>>,
    policy: AutoSavePolicy,
) -> Result<GenerationOutcome> {
    match save_result {
        None => Ok(GenerationOutcome { response, saved: None, save_error: None }),
        Some(Ok(saved)) => Ok(GenerationOutcome { response, saved: Some(saved), save_error: None }),
        Some(Err(e)) => match policy {
            AutoSavePolicy::Fail => {
                error!("Auto-save failed: {}", e);
                Err(e)
            }
            AutoSavePolicy::Warn => {
                warn!("Auto-save failed, chart kept unsaved: {}", e);
                Ok(GenerationOutcome { response, saved: None, save_error: Some(e.to_string()) })
            }
            AutoSavePolicy::Silent => Ok(GenerationOutcome { response, saved: None, save_error: None }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_chart;
    use axum::body::Bytes;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::{Json, Router};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    fn quota_error() -> Result<SaveResponse> {
        Err(Error::QuotaExceeded { current: 3, limit: 3 })
    }

    #[test]
    fn test_warn_policy_keeps_chart() {
        let response = AiResponse::chart(sample_chart());
        let outcome = settle_auto_save(response.clone(), Some(quota_error()), AutoSavePolicy::Warn).unwrap();
        assert_eq!(outcome.response, response);
        assert!(outcome.saved.is_none());
        assert!(outcome.save_error.unwrap().contains("3/3"));
    }

    #[test]
    fn test_silent_policy_hides_failure() {
        let outcome = settle_auto_save(
            AiResponse::chart(sample_chart()),
            Some(quota_error()),
            AutoSavePolicy::Silent,
        )
        .unwrap();
        assert!(outcome.save_error.is_none());
    }

    #[test]
    fn test_fail_policy_propagates() {
        let err = settle_auto_save(AiResponse::chart(sample_chart()), Some(quota_error()), AutoSavePolicy::Fail)
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
    }

    #[test]
    fn test_clarification_is_not_saved() {
        let outcome = settle_auto_save(AiResponse::clarification("Which year?"), None, AutoSavePolicy::Fail).unwrap();
        assert!(outcome.saved.is_none());
        assert!(outcome.response.needs_clarification);
    }

    /// One request as seen by [`fake_api`].
    #[derive(Debug, Clone)]
    struct Seen {
        method: String,
        path: String,
        query: String,
        authorization: Option<String>,
        body: serde_json::Value,
    }

    #[derive(Clone, Default)]
    struct FakeApi {
        seen: Arc<Mutex<Vec<Seen>>>,
        quota_full: bool,
    }

    async fn fake_api(
        State(api): State<FakeApi>,
        method: axum::http::Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, Json<serde_json::Value>) {
        let seen = Seen {
            method: method.to_string(),
            path: uri.path().to_string(),
            query: uri.query().unwrap_or_default().to_string(),
            authorization: headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body: serde_json::from_slice(&body).unwrap_or_default(),
        };
        api.seen.lock().unwrap().push(seen.clone());

        if seen.path == "/generate-chart" {
            return (StatusCode::OK, Json(json!(AiResponse::chart(sample_chart()))));
        }
        match seen.query.as_str() {
            "action=save" if api.quota_full => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Chart limit reached", "code": "QUOTA_EXCEEDED", "current": 3, "limit": 3 })),
            ),
            "action=save" => {
                let chart = StoredChart {
                    id: Uuid::new_v4(),
                    user_id: None,
                    anonymous_id: seen.body["anonymousId"].as_str().map(String::from),
                    chart: sample_chart(),
                    is_public: false,
                    share_id: "Ab3dE6gH".to_string(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                };
                (
                    StatusCode::OK,
                    Json(json!({ "success": true, "chart": chart, "shareUrl": "https://charts.example.com/chart/Ab3dE6gH" })),
                )
            }
            "action=delete" => (StatusCode::OK, Json(json!({ "success": true }))),
            _ => (StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid action" }))),
        }
    }

    async fn serve(api: FakeApi) -> ChartApiClient {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(fake_api).with_state(api);
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        ChartApiClient::new(
            reqwest::Client::new(),
            format!("http://{}/generate-chart", addr),
            format!("http://{}/charts", addr),
        )
    }

    fn anonymous() -> IdentityParams {
        IdentityParams {
            user_id: None,
            anonymous_id: Some("anon-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_generate_and_save_over_http() {
        let api = FakeApi::default();
        let client = serve(api.clone()).await.with_bearer_token("token-123");

        let outcome = client
            .generate_and_save("top 5 countries by population", None, &anonymous(), AutoSavePolicy::Fail)
            .await
            .unwrap();
        assert_eq!(outcome.saved.unwrap().chart.share_id, "Ab3dE6gH");

        let seen = api.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].method, "POST");
        assert_eq!(seen[0].body["query"], "top 5 countries by population");
        assert_eq!(seen[1].path, "/charts");
        assert_eq!(seen[1].query, "action=save");
        assert_eq!(seen[1].authorization.as_deref(), Some("Bearer token-123"));
        assert_eq!(seen[1].body["anonymousId"], "anon-1");
        assert_eq!(seen[1].body["chartData"]["title"], sample_chart().title);
    }

    #[tokio::test]
    async fn test_delete_sends_chart_id_in_body() {
        let api = FakeApi::default();
        let client = serve(api.clone()).await;

        client.delete("5f0c6a4e-0000-4000-8000-000000000001", &anonymous()).await.unwrap();

        let seen = api.seen.lock().unwrap().clone();
        assert_eq!(seen[0].method, "DELETE");
        assert_eq!(seen[0].query, "action=delete");
        assert_eq!(seen[0].body["chartId"], "5f0c6a4e-0000-4000-8000-000000000001");
        assert!(seen[0].authorization.is_none());
    }

    #[tokio::test]
    async fn test_quota_refusal_over_http() {
        let api = FakeApi { quota_full: true, ..FakeApi::default() };
        let client = serve(api).await;

        let outcome = client
            .generate_and_save("GDP of France", None, &anonymous(), AutoSavePolicy::Warn)
            .await
            .unwrap();
        assert!(outcome.response.chart_data.is_some());
        assert!(outcome.save_error.unwrap().contains("3/3"));

        let err = client
            .generate_and_save("GDP of France", None, &anonymous(), AutoSavePolicy::Fail)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { current: 3, limit: 3 }));
    }

    #[test]
    fn test_remote_error_mapping() {
        let quota = remote_error(
            403,
            r#"{"error":"Chart limit reached","code":"QUOTA_EXCEEDED","current":8,"limit":8}"#,
        );
        assert!(matches!(quota, Error::QuotaExceeded { current: 8, limit: 8 }));

        let missing = remote_error(404, r#"{"error":"Chart not found","code":"NOT_FOUND"}"#);
        assert!(matches!(missing, Error::NotFound(_)));

        let gateway = remote_error(502, "Bad Gateway");
        assert_eq!(gateway.status_code(), 502);
    }
}

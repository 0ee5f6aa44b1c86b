//! Charts Lambda - Saves, lists, fetches and deletes charts.
//!
//! Endpoints (all under /api/charts, selected by `?action=`):
//! - POST   save        - Store a chart within the caller's quota
//! - GET    list        - List the caller's charts, newest first
//! - ANY    get         - Fetch one chart by chartId or shareId
//! - DELETE delete      - Delete one of the caller's charts
//! - GET    check-limit - Current quota for the caller
//! - POST   migrate     - Move an anonymous session's charts to a user
//!
//! GET and DELETE take their parameters from the query string; POST takes
//! them from the JSON body.

use anyhow::Context;
use lambda_http::{run, service_fn, Body, Error, Request, RequestExt, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use shared::http::{error_response, json_response, message_response, parse_json_body, preflight_response};
use shared::models::{DeleteRequest, GetRequest, IdentityParams, MigrateRequest, SaveRequest};
use shared::service::lookup_from;
use shared::{
    caller, parse_body, resolve_user_id, AuthenticatedUser, ChartService, ChartSummary, DeleteCaller, Owner,
    StoreConfig,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Unwrap a domain result or answer with its error response.
macro_rules! try_respond {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => return error_response(&e),
        }
    };
}

/// Read action parameters, returning early with 400 when they do not parse.
macro_rules! read_params {
    ($event:expr) => {
        match read_params($event)? {
            Ok(parsed) => parsed,
            Err(response) => return Ok(response),
        }
    };
}

/// Application state
struct AppState {
    service: Result<ChartService, String>,
}

impl AppState {
    async fn new() -> Self {
        let service = build_service().await.map_err(|e| {
            error!("Chart storage is not configured: {:#}", e);
            format!("{:#}", e)
        });
        Self { service }
    }
}

async fn build_service() -> anyhow::Result<ChartService> {
    let config = StoreConfig::from_env().context("Invalid store settings")?;
    let aws_config = shared::config::load_aws_config().await;
    let store = shared::store::open(&config, &aws_config)
        .await
        .context("Failed to open the chart store")?;
    Ok(ChartService::new(store, &config.share_base_url).with_bare_id_delete(config.allow_bare_id_delete))
}

const POST_ONLY: &[&str] = &["POST"];
const READ_METHODS: &[&str] = &["GET", "POST"];
const DELETE_METHODS: &[&str] = &["DELETE", "POST"];
/// Empty means every method.
const ANY_METHOD: &[&str] = &[];

/// Methods accepted by each action; `None` for an unknown action.
fn allowed_methods(action: &str) -> Option<&'static [&'static str]> {
    match action {
        "save" | "migrate" => Some(POST_ONLY),
        "list" | "check-limit" => Some(READ_METHODS),
        "get" => Some(ANY_METHOD),
        "delete" => Some(DELETE_METHODS),
        _ => None,
    }
}

/// Parameters from the JSON body, or from the query string when there is none.
fn read_params<T: DeserializeOwned>(event: &Request) -> Result<Result<T, Response<Body>>, Error> {
    let body: &[u8] = event.body().as_ref();
    if !body.iter().all(u8::is_ascii_whitespace) {
        return parse_json_body(event.body());
    }

    let query_params = event.query_string_parameters();
    let params: serde_json::Map<String, Value> = query_params
        .iter()
        .filter(|(key, _)| *key != "action")
        .map(|(key, value)| (key.to_string(), Value::String(value.to_string())))
        .collect();

    match serde_json::from_value(Value::Object(params)) {
        Ok(parsed) => Ok(Ok(parsed)),
        Err(e) => Ok(Err(message_response(
            400,
            format!("Invalid query parameters: {}", e),
            "VALIDATION_ERROR",
        )?)),
    }
}

fn respond<T: Serialize>(result: shared::Result<T>) -> Result<Response<Body>, Error> {
    match result {
        Ok(body) => json_response(200, &body),
        Err(e) => error_response(&e),
    }
}

/// Owner named by the request, checked against the authenticated caller.
fn owner_of(caller: Option<&AuthenticatedUser>, identity: &IdentityParams) -> shared::Result<Option<Owner>> {
    let user_id = resolve_user_id(caller, identity.user_id.as_deref())?;
    Ok(Owner::from_ids(user_id.as_deref(), identity.anonymous_id.as_deref()))
}

async fn save(service: &ChartService, caller: Option<&AuthenticatedUser>, event: &Request) -> Result<Response<Body>, Error> {
    let request: SaveRequest = parse_body!(event.body());
    let owner = try_respond!(owner_of(caller, &request.identity));
    respond(service.save(owner.as_ref(), request.chart_data).await)
}

async fn list(service: &ChartService, caller: Option<&AuthenticatedUser>, event: &Request) -> Result<Response<Body>, Error> {
    let identity: IdentityParams = read_params!(event);
    let owner = try_respond!(owner_of(caller, &identity));
    let charts = try_respond!(service.list(owner.as_ref()).await);
    json_response(200, &json!({ "charts": charts }))
}

async fn get(service: &ChartService, event: &Request) -> Result<Response<Body>, Error> {
    let request: GetRequest = read_params!(event);
    let lookup = try_respond!(lookup_from(request.chart_id.as_deref(), request.share_id.as_deref()));
    let chart = try_respond!(service.get(&lookup).await);
    let summary = ChartSummary::of(&chart.chart.values);
    json_response(200, &json!({ "chart": chart, "summary": summary }))
}

async fn delete(service: &ChartService, caller: Option<&AuthenticatedUser>, event: &Request) -> Result<Response<Body>, Error> {
    let request: DeleteRequest = read_params!(event);
    let Some(chart_id) = request.chart_id.as_deref().filter(|id| !id.trim().is_empty()) else {
        return message_response(400, "chartId is required", "VALIDATION_ERROR");
    };
    let delete_caller = DeleteCaller {
        user_id: try_respond!(resolve_user_id(caller, request.identity.user_id.as_deref())),
        anonymous_id: request.identity.anonymous_id.clone(),
    };
    try_respond!(service.delete(chart_id, &delete_caller).await);
    json_response(200, &json!({ "success": true }))
}

async fn check_limit(service: &ChartService, caller: Option<&AuthenticatedUser>, event: &Request) -> Result<Response<Body>, Error> {
    let identity: IdentityParams = read_params!(event);
    let owner = try_respond!(owner_of(caller, &identity));
    respond(service.check_limit(owner.as_ref()).await)
}

async fn migrate(service: &ChartService, caller: Option<&AuthenticatedUser>, event: &Request) -> Result<Response<Body>, Error> {
    let request: MigrateRequest = parse_body!(event.body());
    let user_id = try_respond!(resolve_user_id(caller, Some(request.user_id.as_str()))).unwrap_or_default();
    let migrated = try_respond!(service.migrate(&user_id, &request.anonymous_id).await);
    json_response(200, &json!({ "success": true, "migrated": migrated }))
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let method = event.method().as_str();
    let query_params = event.query_string_parameters();
    let action = query_params.first("action").unwrap_or_default();

    info!("Charts request: {} action={}", method, action);

    if method == "OPTIONS" {
        return preflight_response();
    }

    let service = match &state.service {
        Ok(service) => service,
        Err(msg) => return error_response(&shared::Error::Config(msg.clone())),
    };

    let Some(methods) = allowed_methods(action) else {
        return message_response(400, "Invalid action", "VALIDATION_ERROR");
    };
    if !methods.is_empty() && !methods.contains(&method) {
        return message_response(405, "Method not allowed", "METHOD_NOT_ALLOWED");
    }

    let caller = try_respond!(caller(&event));
    let caller = caller.as_ref();

    match action {
        "save" => save(service, caller, &event).await,
        "list" => list(service, caller, &event).await,
        "get" => get(service, &event).await,
        "delete" => delete(service, caller, &event).await,
        "check-limit" => check_limit(service, caller, &event).await,
        "migrate" => migrate(service, caller, &event).await,
        _ => message_response(400, "Invalid action", "VALIDATION_ERROR"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let state = Arc::new(AppState::new().await);
    let state_clone = state.clone();

    run(service_fn(move |event| {
        let state = state_clone.clone();
        async move { handler(state, event).await }
    }))
    .await
}

//! Generate Chart Lambda - Turns a natural-language question into chart data.
//!
//! Endpoints:
//! - POST /api/generate-chart - Generate a chart or a clarification question
//! - OPTIONS /api/generate-chart - CORS preflight

use anyhow::Context;
use lambda_http::{run, service_fn, Body, Error, Request, Response};
use shared::http::{error_response, json_response, message_response, preflight_response};
use shared::{parse_body, ChartGenerator, ChartRequest, GenerationConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Application state
struct AppState {
    /// `Err` holds the start-up configuration failure.
    generator: Result<ChartGenerator, String>,
}

impl AppState {
    async fn new() -> Self {
        let generator = build_generator().await.map_err(|e| {
            error!("Chart generation is not configured: {:#}", e);
            format!("{:#}", e)
        });
        Self { generator }
    }
}

async fn build_generator() -> anyhow::Result<ChartGenerator> {
    let config = GenerationConfig::from_env().context("Invalid generation settings")?;
    let aws_config = shared::config::load_aws_config().await;
    let generator = ChartGenerator::from_config(&config, &aws_config)
        .await
        .context("Failed to set up the generation client")?;
    info!("Chart generation ready ({:?}, model {})", config.provider, config.model);
    Ok(generator)
}

async fn handler(state: Arc<AppState>, event: Request) -> Result<Response<Body>, Error> {
    let method = event.method().as_str();
    info!("Generate chart request: {} {}", method, event.uri().path());

    match method {
        "OPTIONS" => return preflight_response(),
        "POST" => {}
        _ => return message_response(405, "Method not allowed", "METHOD_NOT_ALLOWED"),
    }

    let generator = match &state.generator {
        Ok(generator) => generator,
        Err(msg) => return error_response(&shared::Error::Config(msg.clone())),
    };

    let request: ChartRequest = parse_body!(event.body());

    match generator.generate(&request).await {
        Ok(response) => {
            info!(
                "Generated response (clarification: {})",
                response.needs_clarification
            );
            json_response(200, &response)
        }
        Err(e) => error_response(&e),
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

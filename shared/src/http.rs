//! HTTP helpers for Lambda functions.

use lambda_http::{Body, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, warn};

use crate::Error;

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, DELETE, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

/// Error body returned by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl From<&Error> for ErrorBody {
    fn from(err: &Error) -> Self {
        let (error, details) = match err {
            Error::Config(msg) => ("Server configuration error".to_string(), Some(msg.clone())),
            Error::Validation(msg) | Error::Auth(msg) | Error::Unauthorized(msg) | Error::NotFound(msg) => {
                (msg.clone(), None)
            }
            Error::QuotaExceeded { .. } => ("Chart limit reached".to_string(), None),
            Error::Upstream { message, .. } => ("Generation service error".to_string(), Some(message.clone())),
            Error::Generation(msg) => ("Failed to generate chart".to_string(), Some(msg.clone())),
            other => ("Internal server error".to_string(), Some(other.to_string())),
        };
        let (current, limit) = match err {
            Error::QuotaExceeded { current, limit } => (Some(*current), Some(*limit)),
            _ => (None, None),
        };
        Self {
            error,
            details,
            code: err.code().to_string(),
            current,
            limit,
        }
    }
}

/// Create a JSON response with the given status code and data.
pub fn json_response<T: Serialize>(status: u16, data: &T) -> Result<Response<Body>, lambda_http::Error> {
    let mut builder = Response::builder()
        .status(status)
        .header("content-type", "application/json");
    for (name, value) in CORS_HEADERS {
        builder = builder.header(name, value);
    }
    Ok(builder.body(Body::from(serde_json::to_string(data)?))?)
}

/// Create an error response with the given status code and message.
pub fn message_response(status: u16, message: impl Into<String>, code: &str) -> Result<Response<Body>, lambda_http::Error> {
    json_response(
        status,
        &ErrorBody {
            error: message.into(),
            details: None,
            code: code.to_string(),
            current: None,
            limit: None,
        },
    )
}

/// Convert a domain error into its JSON response, logging server-side failures.
pub fn error_response(err: &Error) -> Result<Response<Body>, lambda_http::Error> {
    let status = err.status_code();
    if status >= 500 {
        error!("Request failed: {}", err);
    } else {
        warn!("Request rejected ({}): {}", status, err);
    }
    json_response(status, &ErrorBody::from(err))
}

/// Empty 200 answer to a CORS preflight.
pub fn preflight_response() -> Result<Response<Body>, lambda_http::Error> {
    let mut builder = Response::builder().status(200);
    for (name, value) in CORS_HEADERS {
        builder = builder.header(name, value);
    }
    Ok(builder.body(Body::Empty)?)
}

/// Parse request body as JSON; an empty body parses from `{}`.
///
/// Returns `Ok(Ok(T))` on successful parse, `Ok(Err(Response))` on parse error (400),
/// or `Err(lambda_http::Error)` on serialization failure.
pub fn parse_json_body<T: DeserializeOwned>(body: &Body) -> Result<Result<T, Response<Body>>, lambda_http::Error> {
    let bytes: &[u8] = body.as_ref();
    let bytes = if bytes.iter().all(u8::is_ascii_whitespace) { b"{}" as &[u8] } else { bytes };
    match serde_json::from_slice(bytes) {
        Ok(parsed) => Ok(Ok(parsed)),
        Err(e) => {
            let response = message_response(400, format!("Invalid request body: {}", e), "VALIDATION_ERROR")?;
            Ok(Err(response))
        }
    }
}

/// Macro to parse request body, returning early with 400 on parse error.
///
/// Usage:
/// ```ignore
/// let request: MyRequest = parse_body!(event.body());
/// ```
#[macro_export]
macro_rules! parse_body {
    ($body:expr) => {
        match shared::http::parse_json_body($body)? {
            Ok(parsed) => parsed,
            Err(response) => return Ok(response),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body_json(response: &Response<Body>) -> serde_json::Value {
        serde_json::from_slice(response.body().as_ref()).unwrap()
    }

    #[test]
    fn test_quota_error_body() {
        let response = error_response(&Error::QuotaExceeded { current: 3, limit: 3 }).unwrap();
        assert_eq!(response.status(), 403);
        let body = body_json(&response);
        assert_eq!(body["current"], 3);
        assert_eq!(body["limit"], 3);
        assert_eq!(body["code"], "QUOTA_EXCEEDED");
    }

    #[test]
    fn test_config_error_body() {
        let response = error_response(&Error::Config("OPENAI_API_KEY missing".into())).unwrap();
        assert_eq!(response.status(), 500);
        let body = body_json(&response);
        assert_eq!(body["code"], "CONFIG_ERROR");
        assert_eq!(body["details"], "OPENAI_API_KEY missing");
        assert!(body.get("current").is_none());
    }

    #[test]
    fn test_cors_headers() {
        let response = preflight_response().unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["Access-Control-Allow-Origin"], "*");
        assert_eq!(
            response.headers()["Access-Control-Allow-Headers"],
            "Content-Type, Authorization"
        );
    }

    #[test]
    fn test_empty_body_parses_as_object() {
        #[derive(serde::Deserialize)]
        struct Params {
            #[serde(default)]
            name: Option<String>,
        }
        let parsed: Params = parse_json_body(&Body::Empty).unwrap().ok().unwrap();
        assert!(parsed.name.is_none());

        let rejected = parse_json_body::<Params>(&Body::from("{not json")).unwrap();
        assert_eq!(rejected.err().unwrap().status(), 400);
    }
}

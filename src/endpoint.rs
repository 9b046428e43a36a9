//! HTTP enrichment endpoint: forwards one company lookup to the language
//! provider and reshapes its answer into `{text, sources}`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{Settings, resolve_credential};
use crate::error::AgentError;
use crate::provider::{
    GeminiProvider, LanguageProvider, ProviderError, build_prompt, normalize_response,
};

pub const SEARCH_PATH: &str = "/api/search";
pub const HEALTH_PATH: &str = "/api/health";

#[derive(Clone)]
pub struct EndpointState {
    pub provider: Arc<dyn LanguageProvider>,
    pub configured_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBody {
    pub company_name: String,
    #[serde(default)]
    pub cnpj: Option<String>,
    #[serde(default)]
    pub manual_api_key: Option<String>,
}

pub fn build_router(state: EndpointState) -> Router {
    Router::new()
        .route(SEARCH_PATH, post(search).fallback(method_not_allowed))
        .route(HEALTH_PATH, get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `settings.bind` and serves until the process stops. Owns its runtime
/// so callers stay synchronous.
pub fn serve(settings: &Settings) -> Result<(), AgentError> {
    let provider = GeminiProvider::new(settings.provider.clone(), settings.request_timeout)
        .map_err(|err| AgentError::Server(err.to_string()))?;
    if settings.api_key.is_none() {
        warn!("no provider API key configured; requests must carry manualApiKey");
    }
    let state = EndpointState {
        provider: Arc::new(provider),
        configured_key: settings.api_key.clone(),
    };

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| AgentError::Server(err.to_string()))?;
    runtime.block_on(async {
        let listener = TcpListener::bind(&settings.bind)
            .await
            .map_err(|err| AgentError::Server(format!("bind {}: {err}", settings.bind)))?;
        info!(bind = %settings.bind, "enrichment endpoint listening");
        axum::serve(listener, build_router(state))
            .await
            .map_err(|err| AgentError::Server(err.to_string()))
    })
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn method_not_allowed() -> Response {
    error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed", None)
}

async fn search(
    State(state): State<EndpointState>,
    body: Result<Json<SearchBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, &rejection.body_text(), None);
        }
    };
    let company_name = body.company_name.trim();
    if company_name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "companyName is required", None);
    }

    let Some(api_key) = resolve_credential(
        body.manual_api_key.as_deref(),
        state.configured_key.as_deref(),
    ) else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "API key not configured on the server",
            None,
        );
    };

    let prompt = build_prompt(company_name, body.cnpj.as_deref().unwrap_or_default());
    match state.provider.generate(&api_key, &prompt).await {
        Ok(data) => Json(normalize_response(&data)).into_response(),
        Err(err) => {
            warn!(company = company_name, error = %err, "provider call failed");
            provider_error_response(err)
        }
    }
}

fn provider_error_response(err: ProviderError) -> Response {
    match err {
        ProviderError::NonJson { body, .. } => error_response(
            StatusCode::BAD_GATEWAY,
            "Provider returned a non-JSON response",
            Some(Value::String(body)),
        ),
        ProviderError::Status {
            status,
            message,
            details,
        } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            error_response(status, &message, Some(details))
        }
        ProviderError::Transport(details) => error_response(
            StatusCode::BAD_GATEWAY,
            "Provider request failed",
            Some(Value::String(details)),
        ),
    }
}

fn error_response(status: StatusCode, error: &str, details: Option<Value>) -> Response {
    let mut payload = json!({ "error": error });
    if let Some(details) = details {
        payload["details"] = details;
    }
    (status, Json(payload)).into_response()
}

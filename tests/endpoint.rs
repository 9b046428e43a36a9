use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use market_agent::endpoint::{EndpointState, build_router};
use market_agent::provider::{LanguageProvider, ProviderError};

enum Reply {
    Data(Value),
    NonJson(&'static str),
    Status(u16, Value),
    Transport,
}

struct MockProvider {
    reply: Reply,
    seen: Mutex<Vec<(String, String)>>,
}

impl MockProvider {
    fn new(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            seen: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl LanguageProvider for MockProvider {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<Value, ProviderError> {
        self.seen
            .lock()
            .unwrap()
            .push((api_key.to_string(), prompt.to_string()));
        match &self.reply {
            Reply::Data(data) => Ok(data.clone()),
            Reply::NonJson(body) => Err(ProviderError::NonJson {
                status: 200,
                body: body.to_string(),
            }),
            Reply::Status(status, details) => Err(ProviderError::Status {
                status: *status,
                message: details["error"]["message"]
                    .as_str()
                    .unwrap_or("Provider API error")
                    .to_string(),
                details: details.clone(),
            }),
            Reply::Transport => Err(ProviderError::Transport("connection reset".to_string())),
        }
    }
}

fn candidate(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }] },
            "groundingMetadata": {
                "groundingChunks": [{ "web": { "uri": "https://econodata.com.br/acme" } }]
            }
        }]
    })
}

fn app(provider: Arc<MockProvider>, configured_key: Option<&str>) -> axum::Router {
    build_router(EndpointState {
        provider,
        configured_key: configured_key.map(str::to_string),
    })
}

fn search_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/search")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(resp: Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn search_returns_normalized_text_and_sources() {
    let provider = MockProvider::new(Reply::Data(candidate("**Acme** produz tintas.")));
    let resp = app(provider.clone(), Some("server-key"))
        .oneshot(search_request(
            r#"{"companyName":"Acme","cnpj":"12.345.678/0001-90"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({ "text": "Acme produz tintas.", "sources": ["https://econodata.com.br/acme"] })
    );
    let seen = provider.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "server-key");
    assert!(seen[0].1.contains("\"Acme\" (identificada pelo CNPJ 12.345.678/0001-90)"));
}

#[tokio::test]
async fn manual_key_overrides_configured_key() {
    let provider = MockProvider::new(Reply::Data(candidate("Ok.")));
    let resp = app(provider.clone(), Some("server-key"))
        .oneshot(search_request(
            r#"{"companyName":"Acme","manualApiKey":" GEMINI_API_KEY=manual-key "}"#,
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(provider.seen.lock().unwrap()[0].0, "manual-key");
}

#[tokio::test]
async fn missing_credential_is_a_server_error() {
    let provider = MockProvider::new(Reply::Data(candidate("Ok.")));
    let resp = app(provider.clone(), None)
        .oneshot(search_request(r#"{"companyName":"Acme"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("API key"));
    assert!(provider.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let provider = MockProvider::new(Reply::Data(candidate("Ok.")));

    let resp = app(provider.clone(), Some("key"))
        .oneshot(search_request("{not json"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].is_string());

    let resp = app(provider.clone(), Some("key"))
        .oneshot(search_request(r#"{"companyName":"   "}"#))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(resp).await,
        json!({ "error": "companyName is required" })
    );
    assert!(provider.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let provider = MockProvider::new(Reply::Data(candidate("Ok.")));
    let resp = app(provider, Some("key"))
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/api/search")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body_json(resp).await, json!({ "error": "Method not allowed" }));
}

#[tokio::test]
async fn provider_status_is_passed_through() {
    let details = json!({ "error": { "code": 429, "message": "Quota exceeded" } });
    let provider = MockProvider::new(Reply::Status(429, details.clone()));
    let resp = app(provider, Some("key"))
        .oneshot(search_request(r#"{"companyName":"Acme"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body_json(resp).await,
        json!({ "error": "Quota exceeded", "details": details })
    );
}

#[tokio::test]
async fn non_json_provider_reply_is_a_bad_gateway() {
    let provider = MockProvider::new(Reply::NonJson("<html>oops</html>"));
    let resp = app(provider, Some("key"))
        .oneshot(search_request(r#"{"companyName":"Acme"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = body_json(resp).await;
    assert_eq!(body["details"], json!("<html>oops</html>"));
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn provider_transport_failure_is_a_bad_gateway() {
    let provider = MockProvider::new(Reply::Transport);
    let resp = app(provider, Some("key"))
        .oneshot(search_request(r#"{"companyName":"Acme"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(resp).await["details"], json!("connection reset"));
}

#[tokio::test]
async fn health_reports_ok() {
    let provider = MockProvider::new(Reply::Data(candidate("Ok.")));
    let resp = app(provider, None)
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "status": "ok" }));
}

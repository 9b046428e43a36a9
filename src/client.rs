use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::Enrichment;
use crate::error::AgentError;

/// Prefix of the description stored for rows whose endpoint reported an error.
pub const DIAGNOSTIC_PREFIX: &str = "Technical error: ";

/// One enrichment lookup per call.
///
/// Failure policy: `Err` only when no usable reply was obtained (transport
/// failure, timeout, a body outside the JSON contract). An error payload sent
/// by the endpoint resolves to `Ok` with a diagnostic description, so the row
/// completes and visibly carries the problem.
pub trait EnrichmentClient: Send + Sync {
    fn fetch_company_info(&self, name: &str, id: &str) -> Result<Enrichment, AgentError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest<'a> {
    pub company_name: &'a str,
    pub cnpj: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EndpointReply {
    Failure {
        error: String,
    },
    Success {
        text: String,
        #[serde(default)]
        sources: Vec<String>,
    },
}

#[derive(Clone)]
pub struct EndpointClient {
    client: Client,
    endpoint_url: String,
}

impl EndpointClient {
    pub fn new(endpoint_url: impl Into<String>, timeout: Duration) -> Result<Self, AgentError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("market-agent/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| AgentError::EndpointHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| AgentError::EndpointHttp(err.to_string()))?;
        Ok(Self {
            client,
            endpoint_url: endpoint_url.into(),
        })
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

impl EnrichmentClient for EndpointClient {
    fn fetch_company_info(&self, name: &str, id: &str) -> Result<Enrichment, AgentError> {
        let response = self
            .client
            .post(&self.endpoint_url)
            .json(&SearchRequest {
                company_name: name,
                cnpj: id,
            })
            .send()
            .map_err(|err| AgentError::EndpointHttp(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| AgentError::EndpointHttp(err.to_string()))?;
        debug!(status, company = name, "enrichment endpoint replied");
        interpret_reply(status, &body)
    }
}

/// Maps an endpoint reply onto the client failure policy.
pub fn interpret_reply(status: u16, body: &str) -> Result<Enrichment, AgentError> {
    match serde_json::from_str::<EndpointReply>(body) {
        Ok(EndpointReply::Failure { error }) => Ok(Enrichment {
            text: format!("{DIAGNOSTIC_PREFIX}{error}"),
            sources: Vec::new(),
        }),
        Ok(EndpointReply::Success { text, sources }) if is_success(status) => {
            Ok(Enrichment { text, sources })
        }
        Ok(EndpointReply::Success { .. }) => Err(AgentError::EndpointStatus {
            status,
            message: truncate(body),
        }),
        Err(_) if !is_success(status) => Err(AgentError::EndpointStatus {
            status,
            message: error_message(body),
        }),
        Err(err) => Err(AgentError::EndpointResponse(err.to_string())),
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| truncate(body))
}

fn truncate(body: &str) -> String {
    const MAX_CHARS: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_CHARS).collect();
    out.push('…');
    out
}

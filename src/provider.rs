//! Generative-language provider used by the enrichment endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::config::ProviderSettings;
use crate::domain::Enrichment;

/// Text returned when the provider produced no usable candidate.
pub const NOT_FOUND_TEXT: &str = "Informação não encontrada.";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider returned a non-JSON response (status {status})")]
    NonJson { status: u16, body: String },

    #[error("provider returned status {status}: {message}")]
    Status {
        status: u16,
        message: String,
        details: Value,
    },

    #[error("provider request failed: {0}")]
    Transport(String),
}

/// A single generation call. Implementations never retry.
#[async_trait]
pub trait LanguageProvider: Send + Sync {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<Value, ProviderError>;
}

#[derive(Clone)]
pub struct GeminiProvider {
    client: Client,
    settings: ProviderSettings,
}

impl GeminiProvider {
    pub fn new(settings: ProviderSettings, timeout: Duration) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("market-agent/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ProviderError::Transport(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.base_url, self.settings.model
        )
    }

    fn request_body(&self, prompt: &str) -> Value {
        let mut body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
        });
        if self.settings.grounding {
            body["tools"] = json!([{ "google_search": {} }]);
        }
        body
    }
}

#[async_trait]
impl LanguageProvider for GeminiProvider {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<Value, ProviderError> {
        let url = self.generate_url();
        debug!(%url, grounding = self.settings.grounding, "calling provider");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.contains("application/json"))
            .unwrap_or(false);
        let body = response
            .text()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;

        let data = match is_json.then(|| serde_json::from_str::<Value>(&body)) {
            Some(Ok(data)) => data,
            _ => {
                return Err(ProviderError::NonJson {
                    status: status.as_u16(),
                    body,
                });
            }
        };

        if !status.is_success() {
            let message = data
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("Provider API error")
                .to_string();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
                details: data,
            });
        }
        Ok(data)
    }
}

/// Fixed instruction sent for every company, in Brazilian Portuguese.
pub fn build_prompt(company_name: &str, cnpj: &str) -> String {
    let cnpj = cnpj.trim();
    let identification = if cnpj.is_empty() {
        String::new()
    } else {
        format!(" (identificada pelo CNPJ {cnpj})")
    };
    format!(
        "Descreva de forma direta a atividade principal da empresa \"{company_name}\"{identification}.\n\
         \n\
         REGRAS OBRIGATÓRIAS:\n\
         1. Responda em no máximo 2 frases curtas.\n\
         2. NÃO use asteriscos (**) ou qualquer formatação especial.\n\
         3. NÃO repita o CNPJ ou o nome da empresa se não for estritamente necessário para o sentido.\n\
         4. Foque apenas no setor de atuação e no que ela produz ou oferece.\n\
         5. Responda apenas o texto puro em Português do Brasil."
    )
}

/// Converts a provider payload into the endpoint contract.
pub fn normalize_response(data: &Value) -> Enrichment {
    Enrichment {
        text: extract_text(data),
        sources: extract_sources(data),
    }
}

fn extract_text(data: &Value) -> String {
    let text = data
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default();
    let cleaned = text.replace('*', "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        NOT_FOUND_TEXT.to_string()
    } else {
        cleaned.to_string()
    }
}

fn extract_sources(data: &Value) -> Vec<String> {
    let Some(candidate) = data.pointer("/candidates/0") else {
        return Vec::new();
    };
    let grounding = candidate
        .pointer("/groundingMetadata/groundingChunks")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|chunk| chunk.pointer("/web/uri").and_then(Value::as_str));
    let citations = candidate
        .pointer("/citationMetadata/citationSources")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|source| source.get("uri").and_then(Value::as_str));

    let mut sources: Vec<String> = Vec::new();
    for uri in grounding.chain(citations) {
        if !uri.is_empty() && !sources.iter().any(|known| known == uri) {
            sources.push(uri.to_string());
        }
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_mentions_cnpj_only_when_given() {
        let with_id = build_prompt("Acme", "12.345.678/0001-90");
        assert!(with_id.contains("\"Acme\" (identificada pelo CNPJ 12.345.678/0001-90)."));

        let without_id = build_prompt("Acme", "  ");
        assert!(without_id.contains("\"Acme\"."));
        assert!(!without_id.contains("identificada"));
        assert!(without_id.contains("Português do Brasil"));
    }

    #[test]
    fn normalize_strips_markup_and_collects_sources() {
        let data = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "  **Indústria** de tintas.  " }] },
                "groundingMetadata": {
                    "groundingChunks": [
                        { "web": { "uri": "https://cnpj.biz/123", "title": "cnpj.biz" } },
                        { "web": { "uri": "https://cnpj.biz/123" } },
                        { "retrievedContext": {} }
                    ]
                },
                "citationMetadata": {
                    "citationSources": [{ "uri": "https://www.linkedin.com/company/acme" }]
                }
            }]
        });
        let enrichment = normalize_response(&data);
        assert_eq!(enrichment.text, "Indústria de tintas.");
        assert_eq!(
            enrichment.sources,
            vec![
                "https://cnpj.biz/123".to_string(),
                "https://www.linkedin.com/company/acme".to_string()
            ]
        );
    }

    #[test]
    fn normalize_falls_back_when_no_candidate() {
        let enrichment = normalize_response(&json!({ "candidates": [] }));
        assert_eq!(enrichment.text, NOT_FOUND_TEXT);
        assert!(enrichment.sources.is_empty());
    }
}

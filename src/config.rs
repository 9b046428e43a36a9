use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AgentError;

pub const CONFIG_FILE_NAME: &str = "market-agent.json";
pub const DEFAULT_ENDPOINT_URL: &str = "http://127.0.0.1:3000/api/search";
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";
pub const DEFAULT_ROW_DELAY_MS: u64 = 400;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PROVIDER_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_EXPORT_FILE: &str = "market_agent_result.xlsx";

/// Environment variables holding the provider credential, in lookup order.
pub const CREDENTIAL_VARS: &[&str] = &["GEMINI_API_KEY", "VITE_GEMINI_API_KEY"];

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub bind: Option<String>,
    #[serde(default)]
    pub row_delay_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub provider: Option<ProviderFile>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
pub struct ProviderFile {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub grounding: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    pub grounding: bool,
}

#[derive(Clone)]
pub struct Settings {
    pub endpoint_url: String,
    pub bind: String,
    pub row_delay: Duration,
    pub request_timeout: Duration,
    pub output: Utf8PathBuf,
    pub provider: ProviderSettings,
    pub api_key: Option<String>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("endpoint_url", &self.endpoint_url)
            .field("bind", &self.bind)
            .field("row_delay", &self.row_delay)
            .field("request_timeout", &self.request_timeout)
            .field("output", &self.output)
            .field("provider", &self.provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub struct SettingsLoader;

impl SettingsLoader {
    pub fn resolve(path: Option<&str>) -> Result<Settings, AgentError> {
        let file = Self::read_file(path)?;
        Self::resolve_config(file, |name| std::env::var(name).ok())
    }

    fn read_file(path: Option<&str>) -> Result<ConfigFile, AgentError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => match default_config_path() {
                Some(path) => path,
                None => return Ok(ConfigFile::default()),
            },
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| AgentError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| AgentError::ConfigParse(err.to_string()))
    }

    /// Merges the file layer with environment overrides. `env` abstracts the
    /// process environment so the merge can be exercised without mutating it.
    pub fn resolve_config<F>(config: ConfigFile, env: F) -> Result<Settings, AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint_url = env("MARKET_AGENT_ENDPOINT")
            .or(config.endpoint_url)
            .unwrap_or_else(|| DEFAULT_ENDPOINT_URL.to_string());
        Url::parse(&endpoint_url)
            .map_err(|err| AgentError::InvalidSetting(format!("endpoint_url {endpoint_url}: {err}")))?;

        let bind = env("MARKET_AGENT_BIND")
            .or(config.bind)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let row_delay_ms = match env("MARKET_AGENT_ROW_DELAY_MS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                AgentError::InvalidSetting(format!("MARKET_AGENT_ROW_DELAY_MS={raw}"))
            })?,
            None => config.row_delay_ms.unwrap_or(DEFAULT_ROW_DELAY_MS),
        };

        let timeout_secs = config
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(AgentError::InvalidSetting(
                "request_timeout_secs must be positive".to_string(),
            ));
        }

        let provider = config.provider.unwrap_or_default();
        let provider = ProviderSettings {
            base_url: provider
                .base_url
                .unwrap_or_else(|| DEFAULT_PROVIDER_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: provider.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            grounding: provider.grounding.unwrap_or(false),
        };

        let configured_key = CREDENTIAL_VARS.iter().find_map(|name| env(*name));

        Ok(Settings {
            endpoint_url,
            bind,
            row_delay: Duration::from_millis(row_delay_ms),
            request_timeout: Duration::from_secs(timeout_secs),
            output: Utf8PathBuf::from(
                config
                    .output
                    .unwrap_or_else(|| DEFAULT_EXPORT_FILE.to_string()),
            ),
            provider,
            api_key: resolve_credential(None, configured_key.as_deref()),
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    ProjectDirs::from("", "", "market-agent")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

/// Picks the request-supplied key over the configured one. Keys are trimmed,
/// and a pasted `NAME=value` line keeps only the value.
pub fn resolve_credential(manual: Option<&str>, configured: Option<&str>) -> Option<String> {
    manual
        .and_then(clean_credential)
        .or_else(|| configured.and_then(clean_credential))
}

fn clean_credential(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let value = match trimmed.rsplit_once('=') {
        Some((_, value)) => value.trim(),
        None => trimmed,
    };
    (!value.is_empty()).then(|| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file_or_env() {
        let settings = SettingsLoader::resolve_config(ConfigFile::default(), |_| None).unwrap();
        assert_eq!(settings.endpoint_url, DEFAULT_ENDPOINT_URL);
        assert_eq!(settings.row_delay, Duration::from_millis(400));
        assert_eq!(settings.output, Utf8PathBuf::from(DEFAULT_EXPORT_FILE));
        assert_eq!(settings.provider.model, DEFAULT_MODEL);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn credential_strips_pasted_assignment() {
        assert_eq!(
            resolve_credential(None, Some("  GEMINI_API_KEY=abc123 ")),
            Some("abc123".to_string())
        );
        assert_eq!(resolve_credential(Some("   "), Some("xyz")), Some("xyz".to_string()));
        assert_eq!(resolve_credential(None, None), None);
    }
}

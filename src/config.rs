//! Service configuration.
//!
//! Everything is read from the environment (a `.env` file is loaded first by
//! `main`). Limits that are part of the extraction contract are constants in
//! their own modules.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Top-level configuration assembled at start-up.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub gateway: GatewayConfig,
    pub supabase: SupabaseConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            gateway: GatewayConfig::from_env()?,
            supabase: SupabaseConfig::from_env()?,
        })
    }
}

/// Settings for the chat-completions gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub api_key: String,
    pub base_url: String,
    pub default_model: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("OPENROUTER_API_KEY")
            .context("OPENROUTER_API_KEY environment variable not set")?;

        let base_url =
            env::var("OPENROUTER_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        let mut config = Self::with_base_url(api_key, base_url);
        if let Ok(model) = env::var("OPENROUTER_MODEL") {
            config.default_model = model;
        }
        config.timeout = Duration::from_secs(parse_var("LLM_TIMEOUT_SECS", 30)?);
        config.max_retries = parse_var("LLM_MAX_RETRIES", 2)?;
        config.retry_delay = Duration::from_millis(parse_var("LLM_RETRY_DELAY_MS", 1000)?);
        config.backoff_multiplier = parse_var("LLM_BACKOFF_MULTIPLIER", 2.0)?;
        Ok(config)
    }

    /// Default retry and timeout settings for the given endpoint.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            default_model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
        }
    }

    /// Endpoint for chat completions.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .finish_non_exhaustive()
    }
}

/// Supabase project settings.
#[derive(Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_role_key: String,
}

impl SupabaseConfig {
    pub fn from_env() -> Result<Self> {
        let url = env::var("SUPABASE_URL").context("SUPABASE_URL not set")?;
        let service_role_key =
            env::var("SUPABASE_SERVICE_ROLE_KEY").context("SUPABASE_SERVICE_ROLE_KEY not set")?;

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            service_role_key,
        })
    }
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

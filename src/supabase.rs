//! Supabase client for session checks and extraction bookkeeping.
//!
//! The pipeline only needs three storage operations, expressed by
//! [`ExtractionStore`]. Atomicity of the daily counter is the database's job:
//! the increment is a single RPC call.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::SupabaseConfig;
use crate::schema::ExtractionAttemptLog;

/// Storage operations the extraction pipeline relies on.
#[async_trait]
pub trait ExtractionStore: Send + Sync {
    /// Successful extractions recorded for `user_id` on `date`.
    async fn daily_count(&self, user_id: &str, date: NaiveDate) -> Result<u32>;

    async fn increment_daily_count(&self, user_id: &str, date: NaiveDate) -> Result<()>;

    /// Append one audit row, returning its id.
    async fn insert_extraction_log(&self, row: &ExtractionAttemptLog) -> Result<Uuid>;
}

/// Supabase client configuration.
#[derive(Clone)]
pub struct SupabaseClient {
    client: Client,
    base_url: String,
    service_role_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.url.clone(),
            service_role_key: config.service_role_key.clone(),
        }
    }

    /// Resolve a user access token to the user's id. `None` for rejected tokens.
    pub async fn authenticate(&self, access_token: &str) -> Result<Option<String>> {
        #[derive(Deserialize)]
        struct AuthUser {
            id: String,
        }

        let url = format!("{}/auth/v1/user", self.base_url);
        let resp = self
            .client
            .get(&url)
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await
            .context("Supabase auth request failed")?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Ok(None),
            status if !status.is_success() => {
                let text = resp.text().await.unwrap_or_default();
                return Err(anyhow!("Supabase auth failed: {} - {}", status, text));
            }
            _ => {}
        }

        let user: AuthUser = resp
            .json()
            .await
            .context("Failed to parse Supabase user")?;
        Ok(Some(user.id))
    }

    /// PostgREST request with service-role credentials.
    fn rest(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, path))
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl ExtractionStore for SupabaseClient {
    async fn daily_count(&self, user_id: &str, date: NaiveDate) -> Result<u32> {
        #[derive(Deserialize)]
        struct CountRow {
            count: u32,
        }

        let path = format!(
            "daily_extraction_limits?user_id=eq.{}&date=eq.{}&select=count",
            user_id,
            date.format("%Y-%m-%d")
        );
        let resp = self.rest(Method::GET, &path).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to read daily count: {} - {}", status, text));
        }

        let rows: Vec<CountRow> = resp.json().await.context("Failed to parse daily count")?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    async fn increment_daily_count(&self, user_id: &str, date: NaiveDate) -> Result<()> {
        let body = json!({
            "p_user_id": user_id,
            "p_date": date.format("%Y-%m-%d").to_string(),
        });

        let resp = self
            .rest(Method::POST, "rpc/increment_daily_extraction_count")
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to increment daily count: {} - {}", status, text));
        }

        debug!("Incremented daily extraction count for {}", user_id);
        Ok(())
    }

    async fn insert_extraction_log(&self, row: &ExtractionAttemptLog) -> Result<Uuid> {
        let resp = self
            .rest(Method::POST, "extraction_logs")
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to insert extraction log: {} - {}", status, text));
        }

        info!("Inserted extraction log {} ({})", row.id, row.module);
        Ok(row.id)
    }
}

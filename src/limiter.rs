//! Per-user daily extraction quota and the extraction audit log.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::schema::{ExtractedRecipeData, ExtractionAttemptLog, ExtractionModule};
use crate::supabase::ExtractionStore;

/// Successful extractions allowed per user per UTC day.
pub const DAILY_EXTRACTION_LIMIT: u32 = 100;

/// Quota snapshot for one user and day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyUsage {
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    pub date: NaiveDate,
}

/// One finished attempt, ready to be written to the audit log.
#[derive(Debug, Clone)]
pub struct AttemptRecord<'a> {
    pub user_id: &'a str,
    pub module: ExtractionModule,
    pub input: &'a str,
    pub data: Option<&'a ExtractedRecipeData>,
    pub error_message: Option<&'a str>,
    pub tokens_used: Option<i64>,
    pub duration_ms: Option<i64>,
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn ExtractionStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn ExtractionStore>) -> Self {
        Self { store }
    }

    /// Day key for counters, `YYYY-MM-DD` in UTC.
    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    /// True while the user may start another extraction today.
    pub async fn check_daily_limit(&self, user_id: &str) -> Result<bool> {
        let used = self.store.daily_count(user_id, Self::today()).await?;
        let allowed = used < DAILY_EXTRACTION_LIMIT;
        if !allowed {
            warn!(
                "User {} reached the daily extraction limit ({}/{})",
                user_id, used, DAILY_EXTRACTION_LIMIT
            );
        }
        Ok(allowed)
    }

    pub async fn increment_daily_count(&self, user_id: &str) -> Result<()> {
        self.store
            .increment_daily_count(user_id, Self::today())
            .await
    }

    pub async fn usage(&self, user_id: &str) -> Result<DailyUsage> {
        let date = Self::today();
        let used = self.store.daily_count(user_id, date).await?;
        Ok(DailyUsage {
            used,
            limit: DAILY_EXTRACTION_LIMIT,
            remaining: DAILY_EXTRACTION_LIMIT.saturating_sub(used),
            date,
        })
    }

    /// Write one audit row and return its id.
    pub async fn log_extraction_attempt(&self, record: AttemptRecord<'_>) -> Result<Uuid> {
        let mut row = ExtractionAttemptLog::new(record.user_id, record.module, record.input);
        row.extraction_result = record.data.cloned();
        row.error_message = record.error_message.map(str::to_string);
        row.tokens_used = record.tokens_used;
        row.generation_duration = record.duration_ms;

        let id = self.store.insert_extraction_log(&row).await?;
        debug!(
            "Logged {} extraction attempt {} for {} (success: {})",
            record.module,
            id,
            record.user_id,
            record.error_message.is_none()
        );
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use std::sync::atomic::Ordering;

    fn limiter() -> (Arc<MemoryStore>, RateLimiter) {
        let store = Arc::new(MemoryStore::default());
        (store.clone(), RateLimiter::new(store))
    }

    #[tokio::test]
    async fn test_limit_boundary() {
        let (store, limiter) = limiter();
        let today = RateLimiter::today();

        assert!(limiter.check_daily_limit("user-1").await.unwrap());

        store.set_count("user-1", today, DAILY_EXTRACTION_LIMIT - 1);
        assert!(limiter.check_daily_limit("user-1").await.unwrap());

        store.set_count("user-1", today, DAILY_EXTRACTION_LIMIT);
        assert!(!limiter.check_daily_limit("user-1").await.unwrap());

        // Other users are unaffected.
        assert!(limiter.check_daily_limit("user-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_yesterday_does_not_count() {
        let (store, limiter) = limiter();
        let yesterday = RateLimiter::today().pred_opt().unwrap();
        store.set_count("user-1", yesterday, DAILY_EXTRACTION_LIMIT);

        assert!(limiter.check_daily_limit("user-1").await.unwrap());
    }

    #[tokio::test]
    async fn test_increment_and_usage() {
        let (store, limiter) = limiter();
        limiter.increment_daily_count("user-1").await.unwrap();
        limiter.increment_daily_count("user-1").await.unwrap();

        assert_eq!(store.count("user-1", RateLimiter::today()), 2);

        let usage = limiter.usage("user-1").await.unwrap();
        assert_eq!(usage.used, 2);
        assert_eq!(usage.limit, 100);
        assert_eq!(usage.remaining, 98);
    }

    #[tokio::test]
    async fn test_usage_never_negative() {
        let (store, limiter) = limiter();
        store.set_count("user-1", RateLimiter::today(), 130);

        let usage = limiter.usage("user-1").await.unwrap();
        assert_eq!(usage.remaining, 0);
    }

    #[tokio::test]
    async fn test_log_extraction_attempt() {
        let (store, limiter) = limiter();
        let id = limiter
            .log_extraction_attempt(AttemptRecord {
                user_id: "user-1",
                module: ExtractionModule::Url,
                input: "https://aniagotuje.pl/przepis/x",
                data: None,
                error_message: Some("timeout"),
                tokens_used: None,
                duration_ms: Some(1200),
            })
            .await
            .unwrap();

        let logs = store.logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].id, id);
        assert_eq!(logs[0].module, ExtractionModule::Url);
        assert_eq!(logs[0].extraction_result, None);
        assert_eq!(logs[0].error_message.as_deref(), Some("timeout"));
        assert_eq!(logs[0].generation_duration, Some(1200));
        assert_eq!(logs[0].tokens_used, None);
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let (store, limiter) = limiter();
        store.fail_reads.store(true, Ordering::SeqCst);

        assert!(limiter.check_daily_limit("user-1").await.is_err());
    }
}

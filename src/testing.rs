//! In-memory doubles for the model gateway, page fetcher and storage.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use crate::fetch::{FetchError, HtmlFetcher};
use crate::openrouter::{
    ChatCompletion, ChatCompletionRequest, ChatCompletionResponse, Choice, GatewayError,
    ResponseMessage,
};
use crate::schema::ExtractionAttemptLog;
use crate::supabase::ExtractionStore;

pub const JAJECZNICA_JSON: &str = r#"{
    "name": "Jajecznica",
    "ingredients": ["3 jajka", "masło", "sól"],
    "steps": ["Rozgrzej masło na patelni.", "Wbij jajka i mieszaj do ścięcia."],
    "preparation_time": "10 minut",
    "suggested_tags": ["śniadanie", "szybkie", "jajka"]
}"#;

pub fn completion(content: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: "gen-test".to_string(),
        model: "test/model".to_string(),
        choices: vec![Choice {
            message: ResponseMessage {
                role: Some("assistant".to_string()),
                content: Some(content.to_string()),
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
    }
}

type ChatReply = Box<dyn Fn() -> Result<ChatCompletionResponse, GatewayError> + Send + Sync>;

/// Chat model that answers every request the same way and records requests.
pub struct FakeChat {
    reply: ChatReply,
    requests: Mutex<Vec<ChatCompletionRequest>>,
}

impl FakeChat {
    pub fn replying(content: &str) -> Self {
        let content = content.to_string();
        Self::with(move || Ok(completion(&content)))
    }

    pub fn failing(make: impl Fn() -> GatewayError + Send + Sync + 'static) -> Self {
        Self::with(move || Err(make()))
    }

    pub fn with(
        reply: impl Fn() -> Result<ChatCompletionResponse, GatewayError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            reply: Box::new(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<ChatCompletionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ChatCompletion for FakeChat {
    async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        self.requests.lock().unwrap().push(request);
        (self.reply)()
    }
}

type FetchReply = Box<dyn Fn() -> Result<String, FetchError> + Send + Sync>;

/// Fetcher serving a fixed page and counting calls.
pub struct FakeFetcher {
    reply: FetchReply,
    calls: AtomicUsize,
    delay: Duration,
}

impl FakeFetcher {
    pub fn serving(html: &str) -> Self {
        let html = html.to_string();
        Self {
            reply: Box::new(move || Ok(html.clone())),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub fn failing(make: impl Fn() -> FetchError + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(move || Err(make())),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    /// Simulate a slow site.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HtmlFetcher for FakeFetcher {
    async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.reply)()
    }
}

/// Storage kept in memory. Each operation can be made to fail.
#[derive(Default)]
pub struct MemoryStore {
    counts: Mutex<HashMap<(String, NaiveDate), u32>>,
    logs: Mutex<Vec<ExtractionAttemptLog>>,
    pub fail_reads: AtomicBool,
    pub fail_increments: AtomicBool,
    pub fail_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn set_count(&self, user_id: &str, date: NaiveDate, count: u32) {
        self.counts
            .lock()
            .unwrap()
            .insert((user_id.to_string(), date), count);
    }

    pub fn count(&self, user_id: &str, date: NaiveDate) -> u32 {
        self.counts
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), date))
            .copied()
            .unwrap_or(0)
    }

    pub fn logs(&self) -> Vec<ExtractionAttemptLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionStore for MemoryStore {
    async fn daily_count(&self, user_id: &str, date: NaiveDate) -> Result<u32> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(anyhow!("read failed"));
        }
        Ok(self.count(user_id, date))
    }

    async fn increment_daily_count(&self, user_id: &str, date: NaiveDate) -> Result<()> {
        if self.fail_increments.load(Ordering::SeqCst) {
            return Err(anyhow!("increment failed"));
        }
        *self
            .counts
            .lock()
            .unwrap()
            .entry((user_id.to_string(), date))
            .or_insert(0) += 1;
        Ok(())
    }

    async fn insert_extraction_log(&self, row: &ExtractionAttemptLog) -> Result<Uuid> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(anyhow!("insert failed"));
        }
        self.logs.lock().unwrap().push(row.clone());
        Ok(row.id)
    }
}

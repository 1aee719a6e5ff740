//! Supabase (PostgREST) storage: results go to `test_results`, question sets
//! come from `mock_tests`.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use proctor_core::answers::AnswerStore;
use proctor_core::model::{Question, QuestionSet};
use proctor_core::parser::normalize_question_set;
use proctor_core::traits::{QuestionSource, ResultSink};
use proctor_core::{SessionResult, SinkError};

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const RESULTS_TABLE: &str = "test_results";
const QUESTION_SETS_TABLE: &str = "mock_tests";

/// Connection details shared by the sink and the source.
#[derive(Clone)]
struct SupabaseClient {
    base_url: String,
    api_key: String,
    user_id: Option<String>,
    client: reqwest::Client,
}

impl SupabaseClient {
    fn new(base_url: &str, api_key: &str, user_id: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            user_id,
            client,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: impl reqwest::IntoUrl,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

/// Row shape of the `test_results` table.
#[derive(Debug, Serialize)]
struct TestResultRow<'a> {
    id: Uuid,
    user_id: &'a str,
    test_id: &'a str,
    score: u8,
    time_taken_minutes: u64,
    answers: &'a AnswerStore,
    completed_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct PostgrestError {
    message: String,
}

/// Stores results in the `test_results` table.
///
/// The row id is the session id and inserts ignore duplicates, so storing the
/// same session twice leaves one row. `user_id` is a required column of the
/// table, so the sink cannot be built without one.
pub struct SupabaseSink {
    inner: SupabaseClient,
    user_id: String,
}

impl SupabaseSink {
    pub fn new(base_url: &str, api_key: &str, user_id: &str) -> anyhow::Result<Self> {
        if user_id.trim().is_empty() {
            anyhow::bail!("supabase sink requires a user_id");
        }
        Ok(Self {
            inner: SupabaseClient::new(base_url, api_key, None)?,
            user_id: user_id.to_string(),
        })
    }
}

#[async_trait]
impl ResultSink for SupabaseSink {
    fn name(&self) -> &str {
        "supabase"
    }

    #[instrument(skip(self, result), fields(test_id = %result.question_set_id))]
    async fn persist(&self, result: &SessionResult, session_id: Uuid) -> Result<(), SinkError> {
        let row = TestResultRow {
            id: session_id,
            user_id: &self.user_id,
            test_id: &result.question_set_id,
            score: result.score,
            time_taken_minutes: result.minutes_taken(),
            answers: &result.answers,
            completed_at: result.completed_at,
        };

        let response = self
            .inner
            .request(reqwest::Method::POST, self.inner.table_url(RESULTS_TABLE))
            .header("Prefer", "resolution=ignore-duplicates,return=minimal")
            .json(&row)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SinkError::Timeout(DEFAULT_TIMEOUT_SECS)
                } else {
                    SinkError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                debug!(status, "result row inserted");
                Ok(())
            }
            // Unique violation: the row is already there.
            409 => {
                debug!("result row already present");
                Ok(())
            }
            401 | 403 => {
                let body = response.text().await.unwrap_or_default();
                Err(SinkError::AuthenticationFailed(body))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<PostgrestError>(&body)
                    .map(|e| e.message)
                    .unwrap_or(body);
                Err(SinkError::Rejected { status, message })
            }
        }
    }
}

/// Row shape of the `mock_tests` table.
#[derive(Debug, Deserialize)]
struct MockTestRow {
    id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    test_type: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u32>,
    #[serde(default)]
    max_score: Option<u32>,
    #[serde(default)]
    questions: Vec<Question>,
}

/// Loads question sets from the `mock_tests` table.
///
/// When a user id is configured only that user's sets are visible.
pub struct SupabaseSource {
    inner: SupabaseClient,
}

impl SupabaseSource {
    pub fn new(base_url: &str, api_key: &str, user_id: Option<String>) -> anyhow::Result<Self> {
        Ok(Self {
            inner: SupabaseClient::new(base_url, api_key, user_id)?,
        })
    }
}

#[async_trait]
impl QuestionSource for SupabaseSource {
    fn name(&self) -> &str {
        "supabase"
    }

    #[instrument(skip(self))]
    async fn load(&self, id: &str) -> anyhow::Result<QuestionSet> {
        let mut query = vec![("select", "*".to_string()), ("id", format!("eq.{id}"))];
        if let Some(user_id) = &self.inner.user_id {
            query.push(("user_id", format!("eq.{user_id}")));
        }
        let table_url = self.inner.table_url(QUESTION_SETS_TABLE);
        let url = reqwest::Url::parse_with_params(&table_url, &query)
            .with_context(|| format!("invalid Supabase URL: {}", self.inner.base_url))?;

        let response = self
            .inner
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .with_context(|| format!("failed to fetch question set '{id}'"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("failed to fetch question set '{id}' (HTTP {status}): {body}");
        }

        let rows: Vec<MockTestRow> = response
            .json()
            .await
            .with_context(|| format!("failed to decode question set '{id}'"))?;
        let row = rows
            .into_iter()
            .next()
            .with_context(|| format!("question set '{id}' not found or not accessible"))?;

        let source = format!("{QUESTION_SETS_TABLE}/{}", row.id);
        normalize_question_set(
            QuestionSet {
                id: row.id,
                title: row.title,
                description: row.description.unwrap_or_default(),
                test_type: row.test_type,
                duration_minutes: row.duration_minutes,
                max_score: row.max_score,
                questions: row.questions,
            },
            std::path::Path::new(&source),
        )
    }
}

//! Collaborator traits for loading question sets and storing results.
//!
//! These async traits are implemented by the `proctor-store` crate.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SinkError;
use crate::model::QuestionSet;
use crate::session::SessionResult;

/// Durable storage for finished sessions.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Human-readable sink name (e.g. "supabase").
    fn name(&self) -> &str;

    /// Store `result` for `session_id`.
    ///
    /// Must be idempotent per `session_id`: storing the same session twice
    /// leaves exactly one record.
    async fn persist(&self, result: &SessionResult, session_id: Uuid) -> Result<(), SinkError>;
}

/// Where question sets come from.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    /// Human-readable source name.
    fn name(&self) -> &str;

    /// Load the question set with the given id.
    async fn load(&self, id: &str) -> anyhow::Result<QuestionSet>;
}

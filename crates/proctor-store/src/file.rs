//! Local filesystem storage: one JSON file per session, question sets from a
//! directory.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument};
use uuid::Uuid;

use proctor_core::model::QuestionSet;
use proctor_core::parser::{load_question_directory, parse_question_set};
use proctor_core::traits::{QuestionSource, ResultSink};
use proctor_core::{SessionResult, SinkError};

/// Writes each result to `<dir>/<session_id>.json`.
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a session's result is stored at.
    pub fn path_for(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> SinkError {
    SinkError::Io(format!("failed to {action} {}: {err}", path.display()))
}

#[async_trait]
impl ResultSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    #[instrument(skip(self, result), fields(dir = %self.dir.display()))]
    async fn persist(&self, result: &SessionResult, session_id: Uuid) -> Result<(), SinkError> {
        let path = self.path_for(session_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "result already stored");
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error("create", &self.dir, e))?;

        let json = serde_json::to_vec_pretty(result)
            .map_err(|e| SinkError::Serialization(e.to_string()))?;

        // Write then rename so readers never see a partial file.
        let tmp = self.dir.join(format!(".{session_id}.json.tmp"));
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("rename", &tmp, e))?;

        debug!(path = %path.display(), "result stored");
        Ok(())
    }
}

/// Read every stored result in `dir`, oldest completion first.
///
/// Files that are not results are skipped with a warning.
pub fn read_results(dir: &Path) -> Result<Vec<SessionResult>> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut results = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        if !path.extension().is_some_and(|ext| ext == "json") {
            continue;
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        match serde_json::from_str::<SessionResult>(&content) {
            Ok(result) => results.push(result),
            Err(e) => tracing::warn!("skipping {}: {}", path.display(), e),
        }
    }

    results.sort_by_key(|r| r.completed_at);
    Ok(results)
}

/// Loads question sets from TOML/JSON files under a directory.
///
/// `load(id)` first tries `<dir>/<id>.toml` and `<dir>/<id>.json`, then
/// scans the directory for a set declaring that id.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn load_blocking(dir: &Path, id: &str) -> Result<QuestionSet> {
        for ext in ["toml", "json"] {
            let candidate = dir.join(format!("{id}.{ext}"));
            if candidate.is_file() {
                return parse_question_set(&candidate);
            }
        }

        load_question_directory(dir)?
            .into_iter()
            .find(|set| set.id == id)
            .with_context(|| format!("question set '{id}' not found in {}", dir.display()))
    }
}

#[async_trait]
impl QuestionSource for DirectorySource {
    fn name(&self) -> &str {
        "directory"
    }

    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn load(&self, id: &str) -> Result<QuestionSet> {
        let dir = self.dir.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || Self::load_blocking(&dir, &id))
            .await
            .context("question loading task failed")?
    }
}

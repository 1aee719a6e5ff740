//! Configuration and factories for sinks and question sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use proctor_core::traits::{QuestionSource, ResultSink};
use proctor_core::ControllerConfig;

use crate::file::{DirectorySource, FileSink};
use crate::memory::MemorySink;
use crate::supabase::{SupabaseSink, SupabaseSource};

/// Where finished sessions are stored.
///
/// `Debug` prints `***` in place of the Supabase API key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Keep results in process memory only.
    Memory,
    /// One JSON file per session.
    File {
        #[serde(default = "default_results_dir")]
        dir: PathBuf,
    },
    /// Supabase `test_results` table; also serves question sets.
    Supabase {
        url: String,
        api_key: String,
        /// Owner of stored rows; required to store results.
        #[serde(default)]
        user_id: Option<String>,
    },
}

impl std::fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkConfig::Memory => f.write_str("Memory"),
            SinkConfig::File { dir } => f.debug_struct("File").field("dir", dir).finish(),
            SinkConfig::Supabase {
                url,
                api_key: _,
                user_id,
            } => f
                .debug_struct("Supabase")
                .field("url", url)
                .field("api_key", &"***")
                .field("user_id", user_id)
                .finish(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::File {
            dir: default_results_dir(),
        }
    }
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("./proctor-results")
}

/// Top-level proctor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProctorConfig {
    /// Result storage.
    #[serde(default)]
    pub sink: SinkConfig,
    /// Directory searched for question set files.
    #[serde(default = "default_question_dir")]
    pub question_dir: PathBuf,
    /// Countdown polling interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Retries after a failed submission.
    #[serde(default = "default_retries")]
    pub max_retries: u32,
    /// Initial delay between retries in milliseconds; doubles per attempt.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_question_dir() -> PathBuf {
    PathBuf::from("./question-sets")
}
fn default_tick_interval() -> u64 {
    250
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1000
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            question_dir: default_question_dir(),
            tick_interval_ms: default_tick_interval(),
            max_retries: default_retries(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl ProctorConfig {
    /// Controller settings derived from this configuration.
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            ..ControllerConfig::default()
        }
    }

    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }
}

/// Resolve environment variable references like `${VAR_NAME}` in a string.
fn resolve_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_name = &result[start + 2..start + end];
            let value = std::env::var(var_name).unwrap_or_default();
            result = format!(
                "{}{}{}",
                &result[..start],
                value,
                &result[start + end + 1..]
            );
        } else {
            break;
        }
    }
    result
}

fn resolve_sink_config(config: &SinkConfig) -> SinkConfig {
    match config {
        SinkConfig::Memory => SinkConfig::Memory,
        SinkConfig::File { dir } => SinkConfig::File {
            dir: PathBuf::from(resolve_env_vars(&dir.to_string_lossy())),
        },
        SinkConfig::Supabase {
            url,
            api_key,
            user_id,
        } => SinkConfig::Supabase {
            url: resolve_env_vars(url),
            api_key: resolve_env_vars(api_key),
            user_id: user_id.as_ref().map(|u| resolve_env_vars(u)),
        },
    }
}

/// Load configuration from well-known paths.
///
/// Search order:
/// 1. `proctor.toml` in the current directory
/// 2. `~/.config/proctor/config.toml`
///
/// Environment variable override: `PROCTOR_SUPABASE_KEY`.
pub fn load_config() -> Result<ProctorConfig> {
    load_config_from(None)
}

/// Load config from an explicit path, or search the default locations.
pub fn load_config_from(path: Option<&Path>) -> Result<ProctorConfig> {
    let config_path = if let Some(p) = path {
        if p.exists() {
            Some(p.to_path_buf())
        } else {
            anyhow::bail!("config file not found: {}", p.display());
        }
    } else {
        let local = PathBuf::from("proctor.toml");
        if local.exists() {
            Some(local)
        } else {
            dirs_path()
                .map(|home| home.join("config.toml"))
                .filter(|global| global.exists())
        }
    };

    let mut config = match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config: {}", path.display()))?;
            parse_config(&content)
                .with_context(|| format!("failed to parse config: {}", path.display()))?
        }
        None => ProctorConfig::default(),
    };

    if let Ok(key) = std::env::var("PROCTOR_SUPABASE_KEY") {
        if let SinkConfig::Supabase { api_key, .. } = &mut config.sink {
            *api_key = key;
        }
    }

    Ok(config)
}

/// Parse a configuration string and resolve `${VAR}` references.
pub fn parse_config(content: &str) -> Result<ProctorConfig> {
    let mut config: ProctorConfig = toml::from_str(content)?;
    config.sink = resolve_sink_config(&config.sink);
    config.question_dir = PathBuf::from(resolve_env_vars(&config.question_dir.to_string_lossy()));
    Ok(config)
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|h| PathBuf::from(h).join(".config").join("proctor"))
}

/// Create a result sink from its configuration.
pub fn create_sink(config: &SinkConfig) -> Result<Arc<dyn ResultSink>> {
    match config {
        SinkConfig::Memory => Ok(Arc::new(MemorySink::new())),
        SinkConfig::File { dir } => Ok(Arc::new(FileSink::new(dir))),
        SinkConfig::Supabase {
            url,
            api_key,
            user_id,
        } => {
            if api_key.is_empty() {
                anyhow::bail!("supabase sink requires an api_key (or PROCTOR_SUPABASE_KEY)");
            }
            let Some(user_id) = user_id.as_deref().filter(|id| !id.trim().is_empty()) else {
                anyhow::bail!("supabase sink requires a user_id to own its test_results rows");
            };
            Ok(Arc::new(SupabaseSink::new(url, api_key, user_id)?))
        }
    }
}

/// Create the question source matching a configuration.
///
/// A Supabase sink also serves question sets; otherwise sets come from
/// `question_dir`.
pub fn create_source(config: &ProctorConfig) -> Result<Box<dyn QuestionSource>> {
    match &config.sink {
        SinkConfig::Supabase {
            url,
            api_key,
            user_id,
        } => Ok(Box::new(SupabaseSource::new(url, api_key, user_id.clone())?)),
        SinkConfig::Memory | SinkConfig::File { .. } => {
            Ok(Box::new(DirectorySource::new(&config.question_dir)))
        }
    }
}

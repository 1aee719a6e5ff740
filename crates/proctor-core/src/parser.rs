//! Question set parser.
//!
//! Loads question sets from TOML or JSON files and directories, and validates
//! them. JSON may be wrapped in a fenced markdown block, as produced by
//! question generators.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{Question, QuestionSet};

/// Intermediate TOML structure for question set files.
#[derive(Debug, Deserialize)]
struct TomlQuestionFile {
    question_set: TomlQuestionSetHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
}

#[derive(Debug, Deserialize)]
struct TomlQuestionSetHeader {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    test_type: Option<String>,
    #[serde(default)]
    duration_minutes: Option<u32>,
    #[serde(default)]
    max_score: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    #[serde(default)]
    id: Option<String>,
    prompt: String,
    options: Vec<String>,
    #[serde(alias = "correct")]
    correct_option: usize,
    #[serde(default)]
    explanation: Option<String>,
}

/// Intermediate JSON structure, matching generator output and stored rows.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonQuestionFile {
    #[serde(default)]
    id: Option<String>,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "test_type")]
    test_type: Option<String>,
    #[serde(default, alias = "duration_minutes")]
    duration_minutes: Option<u32>,
    #[serde(default, alias = "max_score")]
    max_score: Option<u32>,
    #[serde(default)]
    questions: Vec<Question>,
}

/// Parse a single question set file, choosing the format by extension.
///
/// `.json` and `.md` files are read as JSON; everything else as TOML.
pub fn parse_question_set(path: &Path) -> Result<QuestionSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read question set file: {}", path.display()))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") | Some("md") => parse_question_set_json(&content, path),
        _ => parse_question_set_str(&content, path),
    }
}

/// Parse a TOML string into a `QuestionSet` (useful for testing).
pub fn parse_question_set_str(content: &str, source_path: &Path) -> Result<QuestionSet> {
    let parsed: TomlQuestionFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let header = parsed.question_set;
    let questions = parsed
        .questions
        .into_iter()
        .map(|q| Question {
            id: q.id.unwrap_or_default(),
            prompt: q.prompt,
            options: q.options,
            correct_option: q.correct_option,
            explanation: q.explanation,
        })
        .collect();

    normalize_question_set(
        QuestionSet {
            id: header.id,
            title: header.title,
            description: header.description,
            test_type: header.test_type,
            duration_minutes: header.duration_minutes,
            max_score: header.max_score,
            questions,
        },
        source_path,
    )
}

/// Parse a JSON question set, optionally wrapped in a fenced block.
///
/// Without an `id` field the set is named after the file stem.
pub fn parse_question_set_json(content: &str, source_path: &Path) -> Result<QuestionSet> {
    let json = extract_json_from_markdown(content);
    let parsed: JsonQuestionFile = serde_json::from_str(&json)
        .with_context(|| format!("failed to parse JSON: {}", source_path.display()))?;

    let id = match parsed.id {
        Some(id) if !id.trim().is_empty() => id,
        _ => source_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .filter(|stem| !stem.is_empty())
            .with_context(|| {
                format!(
                    "question set has no id and none can be derived from {}",
                    source_path.display()
                )
            })?,
    };

    normalize_question_set(
        QuestionSet {
            id,
            title: parsed.title,
            description: parsed.description,
            test_type: parsed.test_type,
            duration_minutes: parsed.duration_minutes,
            max_score: parsed.max_score,
            questions: parsed.questions,
        },
        source_path,
    )
}

/// Fill missing question ids and reject structurally unusable questions.
///
/// Questions without an id become `q-<n>` (1-based). A question with fewer
/// than two options, or whose correct option is out of range, is an error.
pub fn normalize_question_set(mut set: QuestionSet, source: &Path) -> Result<QuestionSet> {
    for (i, question) in set.questions.iter_mut().enumerate() {
        if question.id.trim().is_empty() {
            question.id = format!("q-{}", i + 1);
        }
        if question.options.len() < 2 {
            anyhow::bail!(
                "{}: question '{}' has {} option(s), need at least 2",
                source.display(),
                question.id,
                question.options.len()
            );
        }
        if question.correct_option >= question.options.len() {
            anyhow::bail!(
                "{}: question '{}' marks option {} correct but only has {} options",
                source.display(),
                question.id,
                question.correct_option,
                question.options.len()
            );
        }
    }
    Ok(set)
}

/// Recursively load all `.toml` and `.json` question sets from a directory.
///
/// Files that fail to parse are skipped with a warning.
pub fn load_question_directory(dir: &Path) -> Result<Vec<QuestionSet>> {
    let mut sets = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    let mut entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();

        if path.is_dir() {
            sets.extend(load_question_directory(&path)?);
        } else if path
            .extension()
            .is_some_and(|ext| ext == "toml" || ext == "json")
        {
            match parse_question_set(&path) {
                Ok(set) => sets.push(set),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(sets)
}

/// A warning from question set validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The question ID (if applicable).
    pub question_id: Option<String>,
    /// Warning message.
    pub message: String,
}

/// Validate a question set for common issues.
pub fn validate_question_set(set: &QuestionSet) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    if set.is_empty() {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "question set has no questions and cannot be taken".into(),
        });
    }

    if set.duration_minutes == Some(0) {
        warnings.push(ValidationWarning {
            question_id: None,
            message: "duration_minutes is 0; the set will run without a time limit".into(),
        });
    }

    let mut seen_ids = HashSet::new();
    for question in &set.questions {
        if !seen_ids.insert(&question.id) {
            warnings.push(ValidationWarning {
                question_id: Some(question.id.clone()),
                message: format!("duplicate question ID: {}", question.id),
            });
        }
    }

    for question in &set.questions {
        if question.prompt.trim().is_empty() {
            warnings.push(ValidationWarning {
                question_id: Some(question.id.clone()),
                message: "prompt is empty".into(),
            });
        }
        if question.options.iter().any(|o| o.trim().is_empty()) {
            warnings.push(ValidationWarning {
                question_id: Some(question.id.clone()),
                message: "has a blank option".into(),
            });
        }
        let distinct: HashSet<_> = question.options.iter().map(|o| o.trim()).collect();
        if distinct.len() < question.options.len() {
            warnings.push(ValidationWarning {
                question_id: Some(question.id.clone()),
                message: "has duplicate options".into(),
            });
        }
        if question.explanation.is_none() {
            warnings.push(ValidationWarning {
                question_id: Some(question.id.clone()),
                message: "no explanation provided".into(),
            });
        }
    }

    warnings
}

/// Extract a JSON payload from a markdown-formatted response.
///
/// Question sets produced by a generator often arrive wrapped in a fenced
/// block. Handles:
/// - a ```json block (the first one wins)
/// - a generic ``` block if no json-tagged block is found
/// - raw JSON with no fences (returned trimmed)
pub fn extract_json_from_markdown(response: &str) -> String {
    let mut json_block: Option<String> = None;
    let mut generic_block: Option<String> = None;
    let mut in_block = false;
    let mut is_json_block = false;
    let mut is_generic_block = false;
    let mut current_block = String::new();

    for line in response.lines() {
        let trimmed = line.trim();

        if !in_block && trimmed.starts_with("```") {
            in_block = true;
            let lang = trimmed.trim_start_matches('`').trim().to_lowercase();
            is_json_block = lang == "json";
            is_generic_block = lang.is_empty();
            current_block.clear();
            continue;
        }

        if in_block && trimmed == "```" {
            in_block = false;
            if is_json_block && json_block.is_none() {
                json_block = Some(std::mem::take(&mut current_block));
            } else if is_generic_block && generic_block.is_none() {
                generic_block = Some(std::mem::take(&mut current_block));
            }
            current_block.clear();
            continue;
        }

        if in_block {
            if !current_block.is_empty() {
                current_block.push('\n');
            }
            current_block.push_str(line);
        }
    }

    // Unclosed fence: keep what was accumulated.
    if in_block && !current_block.is_empty() {
        if is_json_block && json_block.is_none() {
            json_block = Some(current_block);
        } else if is_generic_block && generic_block.is_none() {
            generic_block = Some(current_block);
        }
    }

    json_block
        .or(generic_block)
        .unwrap_or_else(|| response.trim().to_string())
}

//! Core data model types for proctor.
//!
//! A `QuestionSet` mirrors a stored mock test: metadata plus an ordered list
//! of multiple-choice questions. Field aliases accept the camelCase payload
//! produced by the question generator (`question`, `correctAnswer`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Identifier, unique within its set.
    #[serde(default)]
    pub id: String,
    /// The question text shown to the user.
    #[serde(alias = "question")]
    pub prompt: String,
    /// Answer options, in display order.
    pub options: Vec<String>,
    /// Index into `options` of the correct answer.
    #[serde(alias = "correctAnswer")]
    pub correct_option: usize,
    /// Why the correct answer is correct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Question {
    /// Number of selectable options.
    pub fn option_count(&self) -> usize {
        self.options.len()
    }

    /// Returns `true` if `option` is the correct answer.
    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct_option
    }
}

/// Display label for an option index: `A`, `B`, ... then `27`, `28`, ...
pub fn option_label(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => char::from(b'A' + i).to_string(),
        _ => (index + 1).to_string(),
    }
}

/// Parse an option label typed by a user (`b`, `B` or the 1-based number).
pub fn parse_option_label(label: &str) -> Option<usize> {
    let label = label.trim();
    if let Ok(n) = label.parse::<usize>() {
        return n.checked_sub(1);
    }
    let mut chars = label.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphabetic() => {
            Some(usize::from(c.to_ascii_uppercase() as u8 - b'A'))
        }
        _ => None,
    }
}

/// An ordered collection of questions taken in one sitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionSet {
    /// Unique identifier for this set.
    pub id: String,
    /// Human-readable title.
    pub title: String,
    /// What the set covers.
    #[serde(default)]
    pub description: String,
    /// Free-form category such as "technical" or "aptitude".
    #[serde(default)]
    pub test_type: Option<String>,
    /// Suggested time limit.
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    /// Nominal maximum points, informational only.
    #[serde(default)]
    pub max_score: Option<u32>,
    /// The questions, in order.
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl QuestionSet {
    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// The question at `position`, if in range.
    pub fn get(&self, position: usize) -> Option<&Question> {
        self.questions.get(position)
    }

    /// The set's own time limit, if it declares one.
    pub fn duration(&self) -> Option<Duration> {
        self.duration_minutes
            .filter(|m| *m > 0)
            .map(|m| Duration::from_secs(u64::from(m) * 60))
    }
}

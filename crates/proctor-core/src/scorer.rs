//! Deterministic scoring of an answer store against its question set.

use serde::{Deserialize, Serialize};

use crate::answers::AnswerStore;
use crate::model::QuestionSet;

/// The timestamp-free part of a session result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Percentage of correct answers, rounded half up.
    pub percent: u8,
    /// Positions answered with the correct option.
    pub correct: usize,
    /// Positions with any answer.
    pub answered: usize,
    /// Questions in the set.
    pub total: usize,
}

/// Score `answers` against `set`.
///
/// A position counts as correct only when it is answered with the question's
/// correct option; unanswered positions count as incorrect. Entries outside
/// the set are ignored.
pub fn score(set: &QuestionSet, answers: &AnswerStore) -> Score {
    let mut correct = 0usize;
    let mut answered = 0usize;

    for (position, question) in set.questions.iter().enumerate() {
        if let Some(option) = answers.get(position) {
            answered += 1;
            if question.is_correct(option) {
                correct += 1;
            }
        }
    }

    Score {
        percent: round_percent(correct, set.len()),
        correct,
        answered,
        total: set.len(),
    }
}

/// `round(100 * correct / total)` with halves rounded up, in integer math.
pub fn round_percent(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let correct = correct.min(total) as u64;
    let total = total as u64;
    // floor(100c/t + 1/2) == floor((200c + t) / 2t)
    let percent = (200 * correct + total) / (2 * total);
    u8::try_from(percent).unwrap_or(100)
}

//! Per-session answer store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Partial mapping from question position to selected option index.
///
/// Absent entries mean "unanswered". The store performs no bounds checks of
/// its own and has no notion of session state; the controller validates every
/// write before it lands here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnswerStore {
    entries: BTreeMap<usize, usize>,
}

impl AnswerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `option` for `position`, returning the previous selection.
    pub fn set(&mut self, position: usize, option: usize) -> Option<usize> {
        self.entries.insert(position, option)
    }

    pub fn get(&self, position: usize) -> Option<usize> {
        self.entries.get(&position).copied()
    }

    pub fn is_answered(&self, position: usize) -> bool {
        self.entries.contains_key(&position)
    }

    pub fn answered_count(&self) -> usize {
        self.entries.len()
    }

    /// `(position, option)` pairs in position order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.entries.iter().map(|(p, o)| (*p, *o))
    }
}

impl FromIterator<(usize, usize)> for AnswerStore {
    fn from_iter<I: IntoIterator<Item = (usize, usize)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

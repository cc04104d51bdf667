//! Ordered, bounded bank of test questions

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::core::errors::{CompareError, Result};
use crate::matrix::state::SharedRunState;

/// A single test question
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Opaque, stable identity (positions shift on removal, ids do not)
    pub id: String,
    pub text: String,
    /// Set when the question took part in the last completed run
    pub ready: bool,
}

impl Question {
    fn new(text: impl Into<String>, ready: bool) -> Self {
        Self {
            id: cuid2::create_id(),
            text: text.into(),
            ready,
        }
    }
}

/// Accepted shapes for bulk import
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportedQuestion {
    Text(String),
    Entry { question: String },
}

impl ImportedQuestion {
    fn into_text(self) -> String {
        match self {
            ImportedQuestion::Text(text) => text,
            ImportedQuestion::Entry { question } => question,
        }
    }
}

/// Question at a known position, captured for a run request
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct QuestionSnapshot {
    pub index: usize,
    pub id: String,
    pub text: String,
}

pub struct QuestionSet {
    questions: RwLock<Vec<Question>>,
    max_questions: usize,
    state: SharedRunState,
}

impl QuestionSet {
    pub fn new(max_questions: usize, state: SharedRunState) -> Self {
        Self {
            questions: RwLock::new(Vec::new()),
            max_questions,
            state,
        }
    }

    pub fn max_questions(&self) -> usize {
        self.max_questions
    }

    /// Overwrite the set, keeping at most `max_questions` entries in input order.
    ///
    /// Returns the number of questions retained.
    pub fn replace_all<I, S>(&self, list: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ready = self.state.is_running();
        let mut texts: Vec<String> = list.into_iter().map(Into::into).collect();
        if texts.len() > self.max_questions {
            warn!(
                offered = texts.len(),
                max_questions = self.max_questions,
                "Question import truncated"
            );
            texts.truncate(self.max_questions);
        }
        let replacement: Vec<Question> = texts
            .into_iter()
            .map(|text| Question::new(text, ready))
            .collect();

        let retained = replacement.len();
        *self.questions.write() = replacement;
        debug!(retained, ready, "Replaced question set");
        retained
    }

    /// Replace the set from a JSON array of strings or `{"question": ...}` objects
    pub fn import_json(&self, json: &str) -> Result<usize> {
        let imported: Vec<ImportedQuestion> = serde_json::from_str(json)?;
        Ok(self.replace_all(imported.into_iter().map(ImportedQuestion::into_text)))
    }

    /// Append one question; returns its position
    pub fn append(&self, text: impl Into<String>) -> Result<usize> {
        let ready = self.state.is_running();
        let mut questions = self.questions.write();
        if questions.len() >= self.max_questions {
            return Err(CompareError::Validation {
                message: format!("at most {} questions are allowed", self.max_questions),
                field: Some("questions".to_string()),
            });
        }
        questions.push(Question::new(text, ready));
        Ok(questions.len() - 1)
    }

    /// Replace the text of the question at `index`
    pub fn update(&self, index: usize, text: impl Into<String>) -> Result<()> {
        let mut questions = self.questions.write();
        let len = questions.len();
        let question = questions
            .get_mut(index)
            .ok_or_else(|| CompareError::invalid_index("questions", index, len))?;
        question.text = text.into();
        Ok(())
    }

    /// Remove and return the question at `index`
    pub fn remove(&self, index: usize) -> Result<Question> {
        let mut questions = self.questions.write();
        if index >= questions.len() {
            return Err(CompareError::invalid_index("questions", index, questions.len()));
        }
        Ok(questions.remove(index))
    }

    pub fn get(&self, index: usize) -> Option<Question> {
        self.questions.read().get(index).cloned()
    }

    pub fn list(&self) -> Vec<Question> {
        self.questions.read().clone()
    }

    pub fn len(&self) -> usize {
        self.questions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.read().is_empty()
    }

    /// Capture every question in order, optionally resetting readiness
    pub(crate) fn snapshot_all(&self, reset_ready: bool) -> Vec<QuestionSnapshot> {
        let mut questions = self.questions.write();
        questions
            .iter_mut()
            .enumerate()
            .map(|(index, q)| {
                if reset_ready {
                    q.ready = false;
                }
                QuestionSnapshot {
                    index,
                    id: q.id.clone(),
                    text: q.text.clone(),
                }
            })
            .collect()
    }

    /// Capture one question, optionally resetting its readiness
    pub(crate) fn snapshot_one(&self, index: usize, reset_ready: bool) -> Result<QuestionSnapshot> {
        let mut questions = self.questions.write();
        let len = questions.len();
        let q = questions
            .get_mut(index)
            .ok_or_else(|| CompareError::invalid_index("questions", index, len))?;
        if reset_ready {
            q.ready = false;
        }
        Ok(QuestionSnapshot {
            index,
            id: q.id.clone(),
            text: q.text.clone(),
        })
    }

    /// Mark questions ready by id; ids removed in the meantime are ignored
    pub(crate) fn mark_ready(&self, ids: &[String]) {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        for q in self.questions.write().iter_mut() {
            if ids.contains(q.id.as_str()) {
                q.ready = true;
            }
        }
    }
}

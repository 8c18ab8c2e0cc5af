use std::{fmt, str::FromStr};

use serde::Serialize;
use utoipa::ToSchema;

use super::section::SectionId;
use crate::{error::Error, student::StyleId};

pub type UnitId = i64;
pub type QuestionId = i64;

/// Canonical answer representation: a choice letter `A`..=`Z`.
///
/// Accepts `"b"`, `"B"`, `"B."`, `"B)"` and `"B. Some text"`. Bare numbers are
/// rejected: index and letter answers must never be compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnswerKey(char);

impl AnswerKey {
    pub fn letter(&self) -> char {
        self.0
    }
}

impl FromStr for AnswerKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut chars = s.chars();
        let Some(first) = chars.next() else {
            return Err(Error::InvalidSubmission("empty answer".to_string()));
        };
        if !first.is_ascii_alphabetic() {
            return Err(Error::InvalidSubmission(format!(
                "answer '{s}' must start with a choice letter"
            )));
        }
        match chars.next() {
            None | Some('.') | Some(')') | Some(':') | Some(' ') | Some('-') => {
                Ok(AnswerKey(first.to_ascii_uppercase()))
            }
            Some(_) => Err(Error::InvalidSubmission(format!(
                "answer '{s}' is not a choice letter"
            ))),
        }
    }
}

impl fmt::Display for AnswerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Choice {
    pub label: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Question {
    pub id: QuestionId,
    pub position: i64,
    pub prompt: String,
    /// never sent to students
    #[serde(skip)]
    pub correct_answer: AnswerKey,
    pub choices: Vec<Choice>,
}

impl Question {
    pub fn is_correct(&self, selected: &AnswerKey) -> bool {
        *selected == self.correct_answer
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UnitBody {
    Learn { content: String },
    Test { questions: Vec<Question> },
    Quiz { questions: Vec<Question> },
}

impl UnitBody {
    pub fn questions(&self) -> &[Question] {
        match self {
            UnitBody::Learn { .. } => &[],
            UnitBody::Test { questions } | UnitBody::Quiz { questions } => questions,
        }
    }
}

/// A style-specific rendering of one course section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StyledContentUnit {
    pub id: UnitId,
    pub section_id: SectionId,
    /// `None` is the generic unit shown when no styled variant matches.
    pub style_id: Option<StyleId>,
    pub body: UnitBody,
}

impl StyledContentUnit {
    pub fn questions(&self) -> &[Question] {
        self.body.questions()
    }

    pub fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions().iter().find(|q| q.id == id)
    }
}

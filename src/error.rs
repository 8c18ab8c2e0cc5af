use crate::course::{QuestionId, SectionId, UnitId};
use crate::student::StudentId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Content is missing or malformed for what the student asked for.
    #[error("Not configured: {0}")]
    Configuration(String),
    #[error("Question {question_id} does not belong to unit {unit_id}")]
    InvalidQuestionReference {
        unit_id: UnitId,
        question_id: QuestionId,
    },
    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Student {0} has no learning style assigned")]
    StyleNotAssigned(StudentId),
    #[error("Section {0} is locked")]
    SectionLocked(SectionId),
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
    #[error("Inconsistent attempt state: expected {expected} detail rows, found {actual}")]
    InconsistentAttemptState { expected: usize, actual: usize },
    #[error("Submission timed out before it was committed")]
    SubmissionTimedOut,
}

impl Error {
    /// Whether the caller can fix the request and retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Configuration(_)
            | Error::InvalidQuestionReference { .. }
            | Error::InvalidSubmission(_)
            | Error::NotFound(_)
            | Error::StyleNotAssigned(_)
            | Error::SectionLocked(_) => true,
            Error::StoreUnavailable(_)
            | Error::InconsistentAttemptState { .. }
            | Error::SubmissionTimedOut => false,
        }
    }
}

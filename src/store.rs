//! The seam between the progression engine and the relational store.
//!
//! Every engine operation receives the store handle explicitly; there is no
//! process-wide client.

pub mod sqlite;
#[cfg(test)]
pub mod testing;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;

use crate::{
    course::{AnswerKey, Course, CourseId, CourseSection, QuestionId, SectionId, StyledContentUnit, UnitId},
    error::Result,
    student::{Enrollment, LearningStyle, Student, StudentId, StyleId},
};

pub use sqlite::SqliteStore;

pub type AttemptId = i64;

/// Completion record of one student on one course section. Absence means "not started".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SectionProgress {
    pub student_id: StudentId,
    pub section_id: SectionId,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// `None` for learn sections.
    pub score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Attempt {
    pub id: AttemptId,
    pub student_id: StudentId,
    pub unit_id: UnitId,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end_time: Option<OffsetDateTime>,
    pub score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AttemptDetail {
    pub attempt_id: AttemptId,
    pub question_id: QuestionId,
    /// Canonical choice letter, `None` when the question was left unanswered.
    pub selected_answer: Option<String>,
    pub is_correct: bool,
    /// seconds
    pub time_taken: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailRecord {
    pub question_id: QuestionId,
    pub selected_answer: Option<AnswerKey>,
    pub is_correct: bool,
    pub time_taken: u32,
}

/// A fully graded submission, written as one unit: header, details, section progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub student_id: StudentId,
    pub unit_id: UnitId,
    pub section_id: SectionId,
    pub start_time: OffsetDateTime,
    pub end_time: OffsetDateTime,
    pub score: u8,
    /// Question count of the unit; the written detail rows must match it.
    pub question_count: usize,
    pub details: Vec<DetailRecord>,
}

impl AttemptRecord {
    pub fn section_progress(&self) -> SectionProgress {
        SectionProgress {
            student_id: self.student_id,
            section_id: self.section_id,
            completed: true,
            completed_at: Some(self.end_time),
            score: Some(self.score),
        }
    }
}

/// Late re-grading of an already persisted attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreCorrection {
    pub attempt_id: AttemptId,
    pub score: u8,
    pub details: Vec<(QuestionId, bool)>,
    /// Set when the attempt is the one the section progress currently reflects.
    pub progress: Option<SectionProgress>,
}

/// Read-only access to courses, sections and styled content.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn list_courses(&self) -> Result<Vec<Course>>;
    async fn fetch_course(&self, course_id: CourseId) -> Result<Option<Course>>;
    /// Sections of a course ordered by position.
    async fn fetch_sections(&self, course_id: CourseId) -> Result<Vec<CourseSection>>;
    async fn fetch_section(&self, section_id: SectionId) -> Result<Option<CourseSection>>;
    /// All style variants of a section, with nested questions and choices.
    async fn fetch_styled_units(&self, section_id: SectionId) -> Result<Vec<StyledContentUnit>>;
    async fn fetch_unit(&self, unit_id: UnitId) -> Result<Option<StyledContentUnit>>;
    async fn list_styles(&self) -> Result<Vec<LearningStyle>>;
}

/// Durable per-student state: style assignment, enrollments, progress and attempts.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn fetch_student(&self, student_id: StudentId) -> Result<Option<Student>>;
    async fn assign_learning_style(&self, student_id: StudentId, style_id: StyleId) -> Result<()>;

    /// Returns `false` when the enrollment already existed.
    async fn enroll(&self, student_id: StudentId, course_id: CourseId) -> Result<bool>;
    /// Returns `false` when there was nothing to remove.
    async fn unenroll(&self, student_id: StudentId, course_id: CourseId) -> Result<bool>;
    async fn fetch_enrollment(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>>;
    async fn update_enrollment_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        percentage: u8,
    ) -> Result<()>;

    async fn fetch_section_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<SectionProgress>>;
    /// Last write wins on `(student, section)`.
    async fn upsert_section_progress(&self, record: &SectionProgress) -> Result<()>;

    /// Persist header, details and the section progress upsert atomically.
    ///
    /// `timeout` bounds everything up to the commit. Once the commit is issued the call
    /// waits for it, so `SubmissionTimedOut` always means nothing was written.
    async fn record_attempt(&self, record: &AttemptRecord, timeout: Duration)
    -> Result<AttemptId>;
    async fn fetch_attempt(&self, attempt_id: AttemptId) -> Result<Option<Attempt>>;
    async fn fetch_attempt_details(&self, attempt_id: AttemptId) -> Result<Vec<AttemptDetail>>;
    async fn latest_attempt_for_section(
        &self,
        student_id: StudentId,
        section_id: SectionId,
    ) -> Result<Option<AttemptId>>;
    async fn apply_score_correction(&self, correction: &ScoreCorrection) -> Result<()>;
}

/// Both halves of the store, as the engine operations need them.
pub trait LearningStore: ContentRepository + ProgressStore {}

impl<T: ContentRepository + ProgressStore> LearningStore for T {}

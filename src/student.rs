use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    course::CourseId,
    error::{Error, Result},
    progression::aggregator::recompute_enrollment_progress,
    store::LearningStore,
};

pub type StudentId = i64;
pub type StyleId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LearningStyle {
    pub id: StyleId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub learning_style_id: Option<StyleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Enrollment {
    pub student_id: StudentId,
    pub course_id: CourseId,
    /// Derived from section progress, never authoritative.
    pub progress_percentage: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub enrolled_at: OffsetDateTime,
}

/// The style that collected the most votes. Ties go to the lowest style id.
pub fn tally_style_votes(votes: &[StyleId]) -> Option<StyleId> {
    let mut counts: BTreeMap<StyleId, usize> = BTreeMap::new();
    for vote in votes {
        *counts.entry(*vote).or_default() += 1;
    }
    let mut winner: Option<(StyleId, usize)> = None;
    for (style, count) in counts {
        match winner {
            Some((_, best)) if best >= count => {}
            _ => winner = Some((style, count)),
        }
    }
    winner.map(|(style, _)| style)
}

pub async fn get_student<S: LearningStore>(store: &S, student_id: StudentId) -> Result<Student> {
    store
        .fetch_student(student_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("student {student_id}")))
}

/// The enrollment that progress and attempt writes hang off. Writes for a course the
/// student is not enrolled in are refused.
pub async fn get_enrollment<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<Enrollment> {
    store
        .fetch_enrollment(student_id, course_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("enrollment {student_id}/{course_id}")))
}

/// Tally the answers of a learning-style assessment and assign the winning style.
pub async fn assess_learning_style<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    votes: &[StyleId],
) -> Result<LearningStyle> {
    get_student(store, student_id).await?;
    let styles = store.list_styles().await?;
    if let Some(unknown) = votes.iter().find(|v| !styles.iter().any(|s| s.id == **v)) {
        return Err(Error::InvalidSubmission(format!(
            "unknown learning style {unknown}"
        )));
    }
    let Some(winner) = tally_style_votes(votes) else {
        return Err(Error::InvalidSubmission(
            "style assessment has no answers".to_string(),
        ));
    };
    store.assign_learning_style(student_id, winner).await?;
    let style = styles
        .into_iter()
        .find(|s| s.id == winner)
        .ok_or_else(|| Error::NotFound(format!("learning style {winner}")))?;
    info!(student_id, style = %style.name, "learning style assigned");
    Ok(style)
}

/// Enroll a student, idempotently. The percentage is computed from whatever
/// progress already exists.
pub async fn enroll<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<Enrollment> {
    get_student(store, student_id).await?;
    if store.fetch_course(course_id).await?.is_none() {
        return Err(Error::NotFound(format!("course {course_id}")));
    }
    if store.enroll(student_id, course_id).await? {
        info!(student_id, course_id, "student enrolled");
    }
    recompute_enrollment_progress(store, student_id, course_id).await?;
    get_enrollment(store, student_id, course_id).await
}

/// Remove an enrollment together with every progress and attempt row of that course.
pub async fn unenroll<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<()> {
    if !store.unenroll(student_id, course_id).await? {
        return Err(Error::NotFound(format!(
            "enrollment {student_id}/{course_id}"
        )));
    }
    info!(student_id, course_id, "student unenrolled");
    Ok(())
}

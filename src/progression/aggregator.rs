use std::collections::HashMap;

use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;
use utoipa::ToSchema;

use crate::{
    course::{CourseId, CourseSection, SectionId, SectionType},
    error::{Error, Result},
    store::{LearningStore, SectionProgress},
    student::{StudentId, get_student},
    utils::percent,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SectionStatus {
    pub section_id: SectionId,
    pub section_type: SectionType,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub score: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ProgressReport {
    pub percentage: u8,
    pub section_breakdown: Vec<SectionStatus>,
}

/// Share of the course's sections with a completed progress row. A course without
/// sections is complete.
pub fn completion_percentage(sections: &[CourseSection], progress: &[SectionProgress]) -> u8 {
    let completed = sections
        .iter()
        .filter(|s| progress.iter().any(|p| p.section_id == s.id && p.completed))
        .count();
    percent(completed, sections.len())
}

/// Recompute the stored enrollment percentage from the progress rows alone.
pub async fn recompute_enrollment_progress<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<u8> {
    let (sections, progress) = tokio::try_join!(
        store.fetch_sections(course_id),
        store.fetch_section_progress(student_id, course_id),
    )?;
    let percentage = completion_percentage(&sections, &progress);
    store
        .update_enrollment_progress(student_id, course_id, percentage)
        .await?;
    debug!(student_id, course_id, percentage, "enrollment progress recomputed");
    Ok(percentage)
}

/// Percentage plus the per-section state behind it. Read-only: the stored enrollment
/// percentage is left to the writes that change progress.
pub async fn progress_report<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<ProgressReport> {
    get_student(store, student_id).await?;
    if store.fetch_course(course_id).await?.is_none() {
        return Err(Error::NotFound(format!("course {course_id}")));
    }
    let (sections, progress) = tokio::try_join!(
        store.fetch_sections(course_id),
        store.fetch_section_progress(student_id, course_id),
    )?;
    let percentage = completion_percentage(&sections, &progress);
    let mut by_section: HashMap<SectionId, SectionProgress> =
        progress.into_iter().map(|p| (p.section_id, p)).collect();
    let section_breakdown = sections
        .iter()
        .map(|s| match by_section.remove(&s.id) {
            Some(p) => SectionStatus {
                section_id: s.id,
                section_type: s.section_type,
                completed: p.completed,
                completed_at: p.completed_at,
                score: p.score,
            },
            None => SectionStatus {
                section_id: s.id,
                section_type: s.section_type,
                completed: false,
                completed_at: None,
                score: None,
            },
        })
        .collect();
    Ok(ProgressReport {
        percentage,
        section_breakdown,
    })
}

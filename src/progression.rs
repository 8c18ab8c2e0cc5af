//! The learning-path progression engine: style resolution, the section-type gate,
//! attempt scoring and progress aggregation.

pub mod aggregator;
pub mod gate;
pub mod scorer;
pub mod style;

use tracing::info;

use crate::{
    config::UnassignedStylePolicy,
    course::{SectionId, SectionType},
    error::{Error, Result},
    store::{LearningStore, SectionProgress},
    student::{StudentId, get_enrollment, get_student},
    utils::now_utc,
};

use self::{
    aggregator::recompute_enrollment_progress,
    gate::ensure_section_accessible,
    style::{ResolvedSection, resolve_units, student_style},
};

/// Mark a learn section done. Learn sections carry no score.
/// Returns the refreshed course percentage.
pub async fn complete_learn_section<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    section_id: SectionId,
) -> Result<u8> {
    get_student(store, student_id).await?;
    let section = ensure_section_accessible(store, student_id, section_id).await?;
    if section.section_type != SectionType::Learn {
        return Err(Error::InvalidSubmission(format!(
            "section {section_id} is a {} section, submit an attempt instead",
            section.section_type
        )));
    }
    get_enrollment(store, student_id, section.course_id).await?;
    store
        .upsert_section_progress(&SectionProgress {
            student_id,
            section_id,
            completed: true,
            completed_at: Some(now_utc()),
            score: None,
        })
        .await?;
    let percentage = recompute_enrollment_progress(store, student_id, section.course_id).await?;
    info!(student_id, section_id, percentage, "learn section completed");
    Ok(percentage)
}

/// The content of one section as this student should see it, if the gate allows it.
pub async fn visible_section_content<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    section_id: SectionId,
    policy: UnassignedStylePolicy,
) -> Result<ResolvedSection> {
    let style = student_style(store, student_id, policy).await?;
    let section = ensure_section_accessible(store, student_id, section_id).await?;
    let units = store.fetch_styled_units(section.id).await?;
    Ok(ResolvedSection {
        resolution: resolve_units(style, &units),
        section,
    })
}

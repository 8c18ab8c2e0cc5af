//! The section-type gate: learn before test, test before quiz.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::{
    course::{CourseId, CourseSection, SectionId, SectionType},
    error::{Error, Result},
    store::{LearningStore, SectionProgress},
    student::StudentId,
};

/// Where a student stands in a course. A type without sections is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    LearnPending,
    TestPending,
    QuizPending,
    CourseComplete,
}

impl GateState {
    pub fn unlocked_type(&self) -> Option<SectionType> {
        match self {
            GateState::LearnPending => Some(SectionType::Learn),
            GateState::TestPending => Some(SectionType::Test),
            GateState::QuizPending => Some(SectionType::Quiz),
            GateState::CourseComplete => None,
        }
    }
}

/// Per type: every section of that type has a completed progress row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct TypeCompletion {
    pub learn: bool,
    pub test: bool,
    pub quiz: bool,
}

impl TypeCompletion {
    pub fn get(&self, section_type: SectionType) -> bool {
        match section_type {
            SectionType::Learn => self.learn,
            SectionType::Test => self.test,
            SectionType::Quiz => self.quiz,
        }
    }
}

/// Sections the student may start now. Only the unlocked type is non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct UnlockedSections {
    pub learn: Vec<CourseSection>,
    pub test: Vec<CourseSection>,
    pub quiz: Vec<CourseSection>,
}

impl UnlockedSections {
    pub fn is_empty(&self) -> bool {
        self.learn.is_empty() && self.test.is_empty() && self.quiz.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct GateDecision {
    pub state: GateState,
    pub completion: TypeCompletion,
    pub unlocked: UnlockedSections,
}

/// Pure gate evaluation over a course's sections and one student's progress rows.
pub fn evaluate(sections: &[CourseSection], progress: &[SectionProgress]) -> GateDecision {
    let completed: HashSet<SectionId> = progress
        .iter()
        .filter(|p| p.completed)
        .map(|p| p.section_id)
        .collect();
    let of_type = |t: SectionType| sections.iter().filter(move |s| s.section_type == t);
    let type_complete = |t: SectionType| of_type(t).all(|s| completed.contains(&s.id));
    let has_type = |t: SectionType| of_type(t).next().is_some();

    let completion = TypeCompletion {
        learn: type_complete(SectionType::Learn),
        test: type_complete(SectionType::Test),
        quiz: type_complete(SectionType::Quiz),
    };

    let state = if !completion.learn && has_type(SectionType::Learn) {
        GateState::LearnPending
    } else if completion.learn && !completion.test && has_type(SectionType::Test) {
        GateState::TestPending
    } else if completion.learn
        && completion.test
        && !completion.quiz
        && has_type(SectionType::Quiz)
    {
        GateState::QuizPending
    } else {
        GateState::CourseComplete
    };

    let mut unlocked = UnlockedSections::default();
    if let Some(t) = state.unlocked_type() {
        let candidates = of_type(t).cloned().collect();
        match t {
            SectionType::Learn => unlocked.learn = candidates,
            SectionType::Test => unlocked.test = candidates,
            SectionType::Quiz => unlocked.quiz = candidates,
        }
    }

    GateDecision {
        state,
        completion,
        unlocked,
    }
}

/// A decision together with the progress rows it was derived from.
struct GateEvaluation {
    decision: GateDecision,
    progress: Vec<SectionProgress>,
}

/// Evaluate the gate from the store. Any read failure fails closed: the error is
/// returned and nothing is reported as unlocked.
pub async fn evaluate_gate<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<GateDecision> {
    Ok(load_and_evaluate(store, student_id, course_id).await?.decision)
}

async fn load_and_evaluate<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<GateEvaluation> {
    let reads = tokio::try_join!(
        store.fetch_student(student_id),
        store.fetch_course(course_id),
        store.fetch_sections(course_id),
        store.fetch_section_progress(student_id, course_id),
    );
    let (student, course, sections, progress) = match reads {
        Ok(reads) => reads,
        Err(e) => {
            warn!(student_id, course_id, "gate failing closed: {}", e);
            return Err(e);
        }
    };
    if student.is_none() {
        return Err(Error::NotFound(format!("student {student_id}")));
    }
    if course.is_none() {
        return Err(Error::NotFound(format!("course {course_id}")));
    }
    let decision = evaluate(&sections, &progress);
    debug!(student_id, course_id, state = ?decision.state, "gate evaluated");
    Ok(GateEvaluation { decision, progress })
}

/// The sections of the currently unlocked type, empty lists for locked types.
pub async fn next_unlocked_section_type<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    course_id: CourseId,
) -> Result<UnlockedSections> {
    Ok(evaluate_gate(store, student_id, course_id).await?.unlocked)
}

/// A section is reachable when its type is the unlocked one, its type is complete, or
/// the student already completed that section. Completed content is never revoked.
pub async fn ensure_section_accessible<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    section_id: SectionId,
) -> Result<CourseSection> {
    let section = store
        .fetch_section(section_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("section {section_id}")))?;
    let GateEvaluation { decision, progress } =
        load_and_evaluate(store, student_id, section.course_id).await?;
    let finished = progress
        .iter()
        .any(|p| p.section_id == section_id && p.completed);
    if finished
        || decision.completion.get(section.section_type)
        || decision.state.unlocked_type() == Some(section.section_type)
    {
        Ok(section)
    } else {
        debug!(student_id, section_id, state = ?decision.state, "section locked");
        Err(Error::SectionLocked(section_id))
    }
}

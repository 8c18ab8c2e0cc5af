//! Which styled unit of each section a student gets to see.

use futures::future::try_join_all;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    config::UnassignedStylePolicy,
    course::{CourseSection, StyledContentUnit},
    error::{Error, Result},
    store::LearningStore,
    student::{StudentId, StyleId, get_student},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Resolution {
    /// The variant written for the student's style.
    Styled { unit: StyledContentUnit },
    /// No variant for the style; the generic unit stands in.
    Generic { unit: StyledContentUnit },
    /// Student has no style yet and the policy shows every variant.
    AllVariants { units: Vec<StyledContentUnit> },
    /// Neither a matching nor a generic unit exists.
    NotConfigured,
}

impl Resolution {
    pub fn is_configured(&self) -> bool {
        !matches!(self, Resolution::NotConfigured)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ResolvedSection {
    pub section: CourseSection,
    pub resolution: Resolution,
}

/// The style the engine should resolve content for. `Ok(None)` only when the
/// policy lets unassessed students see every variant.
pub async fn student_style<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    policy: UnassignedStylePolicy,
) -> Result<Option<StyleId>> {
    let student = get_student(store, student_id).await?;
    match (student.learning_style_id, policy) {
        (Some(style), _) => Ok(Some(style)),
        (None, UnassignedStylePolicy::ShowAllVariants) => Ok(None),
        (None, UnassignedStylePolicy::BlockUntilAssessed) => {
            Err(Error::StyleNotAssigned(student_id))
        }
    }
}

/// Exact style match first, then the generic unit.
pub fn resolve_units(style: Option<StyleId>, units: &[StyledContentUnit]) -> Resolution {
    let Some(style) = style else {
        return if units.is_empty() {
            Resolution::NotConfigured
        } else {
            Resolution::AllVariants {
                units: units.to_vec(),
            }
        };
    };
    if let Some(unit) = units.iter().find(|u| u.style_id == Some(style)) {
        return Resolution::Styled { unit: unit.clone() };
    }
    match units.iter().find(|u| u.style_id.is_none()) {
        Some(unit) => Resolution::Generic { unit: unit.clone() },
        None => Resolution::NotConfigured,
    }
}

/// Resolve every section, keeping sections without content as `NotConfigured`.
pub async fn resolve_visible_units<S: LearningStore>(
    store: &S,
    style: Option<StyleId>,
    sections: &[CourseSection],
) -> Result<Vec<ResolvedSection>> {
    let units = try_join_all(sections.iter().map(|s| store.fetch_styled_units(s.id))).await?;
    Ok(sections
        .iter()
        .zip(units)
        .map(|(section, units)| ResolvedSection {
            section: section.clone(),
            resolution: resolve_units(style, &units),
        })
        .collect())
}

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::Error;

pub type CourseId = i64;
pub type SectionId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    pub description: String,
}

/// The three kinds of section a course is built from, in unlock order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum SectionType {
    Learn,
    Test,
    Quiz,
}

impl SectionType {
    pub const ALL: [SectionType; 3] = [SectionType::Learn, SectionType::Test, SectionType::Quiz];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionType::Learn => "learn",
            SectionType::Test => "test",
            SectionType::Quiz => "quiz",
        }
    }

    /// Whether units of this type carry questions and produce a score.
    pub fn is_scored(&self) -> bool {
        match self {
            SectionType::Learn => false,
            SectionType::Test | SectionType::Quiz => true,
        }
    }
}

impl fmt::Display for SectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "learn" => Ok(SectionType::Learn),
            "test" => Ok(SectionType::Test),
            "quiz" => Ok(SectionType::Quiz),
            other => Err(Error::Configuration(format!(
                "unknown section type '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CourseSection {
    pub id: SectionId,
    pub course_id: CourseId,
    pub section_type: SectionType,
    /// Ordering among the course's sections.
    pub position: i64,
}

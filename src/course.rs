pub mod section;
pub mod unit;

pub use section::{Course, CourseId, CourseSection, SectionId, SectionType};
pub use unit::{AnswerKey, Choice, Question, QuestionId, StyledContentUnit, UnitBody, UnitId};

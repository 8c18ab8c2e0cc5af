use std::{collections::BTreeMap, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use moka::future::Cache;
use sqlx::{
    FromRow, SqliteConnection, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::OffsetDateTime;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, warn};

use super::{
    Attempt, AttemptDetail, AttemptId, AttemptRecord, ContentRepository, DetailRecord,
    ProgressStore, ScoreCorrection, SectionProgress,
};
use crate::{
    course::{
        AnswerKey, Choice, Course, CourseId, CourseSection, Question, SectionId, SectionType,
        StyledContentUnit, UnitBody, UnitId,
    },
    error::{Error, Result},
    student::{Enrollment, LearningStyle, Student, StudentId, StyleId},
    utils::now_utc,
};

const SCHEMA: &str = include_str!("../../database/schema.sql");

/// Relational store backed by SQLite. Cheap to clone; clones share the pool and cache.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    units: Cache<SectionId, Arc<Vec<StyledContentUnit>>>,
}

#[derive(FromRow)]
struct SectionRow {
    id: i64,
    course_id: i64,
    section_type: String,
    position: i64,
}

impl TryFrom<SectionRow> for CourseSection {
    type Error = Error;

    fn try_from(row: SectionRow) -> Result<Self> {
        Ok(CourseSection {
            id: row.id,
            course_id: row.course_id,
            section_type: row.section_type.parse()?,
            position: row.position,
        })
    }
}

#[derive(FromRow)]
struct UnitRow {
    id: i64,
    section_id: i64,
    style_id: Option<i64>,
    content: Option<String>,
}

#[derive(FromRow)]
struct QuestionRow {
    id: i64,
    unit_id: i64,
    position: i64,
    prompt: String,
    correct_answer: String,
}

#[derive(FromRow)]
struct ChoiceRow {
    question_id: i64,
    label: String,
    body: String,
}

#[derive(FromRow)]
struct ProgressRow {
    student_id: i64,
    section_id: i64,
    completed: bool,
    completed_at: Option<OffsetDateTime>,
    score: Option<i64>,
}

impl From<ProgressRow> for SectionProgress {
    fn from(row: ProgressRow) -> Self {
        SectionProgress {
            student_id: row.student_id,
            section_id: row.section_id,
            completed: row.completed,
            completed_at: row.completed_at,
            score: row.score.map(clamp_score),
        }
    }
}

#[derive(FromRow)]
struct AttemptRow {
    id: i64,
    student_id: i64,
    unit_id: i64,
    start_time: OffsetDateTime,
    end_time: Option<OffsetDateTime>,
    score: Option<i64>,
}

#[derive(FromRow)]
struct DetailRow {
    attempt_id: i64,
    question_id: i64,
    selected_answer: Option<String>,
    is_correct: bool,
    time_taken: i64,
}

#[derive(FromRow)]
struct EnrollmentRow {
    student_id: i64,
    course_id: i64,
    progress_percentage: i64,
    enrolled_at: OffsetDateTime,
}

fn clamp_score(score: i64) -> u8 {
    score.clamp(0, 100) as u8
}

impl SqliteStore {
    /// Content is authored outside the engine, so cached units expire after `cache_ttl`.
    pub fn new(pool: SqlitePool, cache_capacity: u64, cache_ttl: Duration) -> Self {
        Self {
            pool,
            units: Cache::builder()
                .max_capacity(cache_capacity)
                .time_to_live(cache_ttl)
                .build(),
        }
    }

    /// Open (creating if missing) the database at `url` with foreign keys enforced.
    pub async fn connect(url: &str, cache_capacity: u64, cache_ttl: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Ok(Self::new(pool, cache_capacity, cache_ttl))
    }

    /// Run the reference schema. Safe to call on an existing database.
    pub async fn create_schema(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drop cached content, e.g. after an answer key was corrected.
    pub fn invalidate_content(&self) {
        self.units.invalidate_all();
    }

    async fn load_units(&self, section_id: SectionId) -> Result<Vec<StyledContentUnit>> {
        let Some(section) = self.fetch_section(section_id).await? else {
            return Ok(vec![]);
        };
        let units = sqlx::query_as::<_, UnitRow>(
            "select id, section_id, style_id, content from styled_unit where section_id = ? order by id",
        )
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;
        let questions = sqlx::query_as::<_, QuestionRow>(
            "select q.id, q.unit_id, q.position, q.prompt, q.correct_answer from question q \
             join styled_unit u on q.unit_id = u.id where u.section_id = ? \
             order by q.unit_id, q.position, q.id",
        )
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;
        let choices = sqlx::query_as::<_, ChoiceRow>(
            "select c.question_id, c.label, c.body from choice c \
             join question q on c.question_id = q.id \
             join styled_unit u on q.unit_id = u.id where u.section_id = ? \
             order by c.question_id, c.label",
        )
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;

        let mut choices_by_question: BTreeMap<i64, Vec<Choice>> = BTreeMap::new();
        for c in choices {
            choices_by_question
                .entry(c.question_id)
                .or_default()
                .push(Choice {
                    label: c.label,
                    body: c.body,
                });
        }
        let mut questions_by_unit: BTreeMap<i64, Vec<Question>> = BTreeMap::new();
        for q in questions {
            let correct_answer = AnswerKey::from_str(&q.correct_answer).map_err(|_| {
                Error::Configuration(format!(
                    "question {} has a malformed answer key '{}'",
                    q.id, q.correct_answer
                ))
            })?;
            questions_by_unit.entry(q.unit_id).or_default().push(Question {
                id: q.id,
                position: q.position,
                prompt: q.prompt,
                correct_answer,
                choices: choices_by_question.remove(&q.id).unwrap_or_default(),
            });
        }

        let units = units
            .into_iter()
            .map(|u| {
                let body = match section.section_type {
                    SectionType::Learn => UnitBody::Learn {
                        content: u.content.unwrap_or_default(),
                    },
                    SectionType::Test => UnitBody::Test {
                        questions: questions_by_unit.remove(&u.id).unwrap_or_default(),
                    },
                    SectionType::Quiz => UnitBody::Quiz {
                        questions: questions_by_unit.remove(&u.id).unwrap_or_default(),
                    },
                };
                StyledContentUnit {
                    id: u.id,
                    section_id: u.section_id,
                    style_id: u.style_id,
                    body,
                }
            })
            .collect();
        Ok(units)
    }
}

async fn insert_attempt(conn: &mut SqliteConnection, record: &AttemptRecord) -> Result<AttemptId> {
    let id = sqlx::query(
        "insert into attempt (student_id, unit_id, start_time, end_time, score) values (?, ?, ?, ?, ?)",
    )
    .bind(record.student_id)
    .bind(record.unit_id)
    .bind(record.start_time)
    .bind(record.end_time)
    .bind(i64::from(record.score))
    .execute(conn)
    .await?
    .last_insert_rowid();
    Ok(id)
}

async fn insert_attempt_details(
    conn: &mut SqliteConnection,
    attempt_id: AttemptId,
    details: &[DetailRecord],
) -> Result<()> {
    for detail in details {
        sqlx::query(
            "insert into attempt_detail (attempt_id, question_id, selected_answer, is_correct, time_taken) \
             values (?, ?, ?, ?, ?)",
        )
        .bind(attempt_id)
        .bind(detail.question_id)
        .bind(detail.selected_answer.map(|a| a.to_string()))
        .bind(detail.is_correct)
        .bind(i64::from(detail.time_taken))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

async fn upsert_progress(conn: &mut SqliteConnection, record: &SectionProgress) -> Result<()> {
    sqlx::query(
        "insert into section_progress (student_id, section_id, completed, completed_at, score) \
         values (?, ?, ?, ?, ?) \
         on conflict (student_id, section_id) do update set \
         completed = excluded.completed, completed_at = excluded.completed_at, score = excluded.score",
    )
    .bind(record.student_id)
    .bind(record.section_id)
    .bind(record.completed)
    .bind(record.completed_at)
    .bind(record.score.map(i64::from))
    .execute(conn)
    .await?;
    Ok(())
}

/// Header, details, detail count check, then the progress upsert. The caller owns the
/// transaction and decides between commit and rollback.
async fn write_attempt(conn: &mut SqliteConnection, record: &AttemptRecord) -> Result<AttemptId> {
    let attempt_id = insert_attempt(&mut *conn, record).await?;
    insert_attempt_details(&mut *conn, attempt_id, &record.details).await?;
    let written = sqlx::query_scalar::<_, i64>(
        "select count(*) from attempt_detail where attempt_id = ?",
    )
    .bind(attempt_id)
    .fetch_one(&mut *conn)
    .await? as usize;
    if written != record.question_count {
        warn!(
            attempt_id,
            expected = record.question_count,
            written,
            "attempt detail count mismatch"
        );
        return Err(Error::InconsistentAttemptState {
            expected: record.question_count,
            actual: written,
        });
    }
    upsert_progress(conn, &record.section_progress()).await?;
    Ok(attempt_id)
}

// attempts of one student on any unit of one course
const COURSE_ATTEMPTS: &str = "select a.id from attempt a \
     join styled_unit u on a.unit_id = u.id \
     join course_section s on u.section_id = s.id \
     where a.student_id = ? and s.course_id = ?";

#[async_trait]
impl ContentRepository for SqliteStore {
    async fn list_courses(&self) -> Result<Vec<Course>> {
        let rows = sqlx::query_as::<_, (i64, String, String)>(
            "select id, name, description from course order by id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name, description)| Course {
                id,
                name,
                description,
            })
            .collect())
    }

    async fn fetch_course(&self, course_id: CourseId) -> Result<Option<Course>> {
        let row = sqlx::query_as::<_, (i64, String, String)>(
            "select id, name, description from course where id = ?",
        )
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, description)| Course {
            id,
            name,
            description,
        }))
    }

    async fn fetch_sections(&self, course_id: CourseId) -> Result<Vec<CourseSection>> {
        sqlx::query_as::<_, SectionRow>(
            "select id, course_id, section_type, position from course_section \
             where course_id = ? order by position, id",
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(CourseSection::try_from)
        .collect()
    }

    async fn fetch_section(&self, section_id: SectionId) -> Result<Option<CourseSection>> {
        sqlx::query_as::<_, SectionRow>(
            "select id, course_id, section_type, position from course_section where id = ?",
        )
        .bind(section_id)
        .fetch_optional(&self.pool)
        .await?
        .map(CourseSection::try_from)
        .transpose()
    }

    async fn fetch_styled_units(&self, section_id: SectionId) -> Result<Vec<StyledContentUnit>> {
        if let Some(units) = self.units.get(&section_id).await {
            return Ok(units.as_ref().clone());
        }
        let units = self.load_units(section_id).await?;
        // a section without units may still be being authored
        if !units.is_empty() {
            self.units.insert(section_id, Arc::new(units.clone())).await;
            debug!(section_id, count = units.len(), "styled units cached");
        }
        Ok(units)
    }

    async fn fetch_unit(&self, unit_id: UnitId) -> Result<Option<StyledContentUnit>> {
        let section_id =
            sqlx::query_scalar::<_, i64>("select section_id from styled_unit where id = ?")
                .bind(unit_id)
                .fetch_optional(&self.pool)
                .await?;
        let Some(section_id) = section_id else {
            return Ok(None);
        };
        let units = self.fetch_styled_units(section_id).await?;
        Ok(units.into_iter().find(|u| u.id == unit_id))
    }

    async fn list_styles(&self) -> Result<Vec<LearningStyle>> {
        let rows = sqlx::query_as::<_, (i64, String)>(
            "select id, name from learning_style order by id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| LearningStyle { id, name })
            .collect())
    }
}

#[async_trait]
impl ProgressStore for SqliteStore {
    async fn fetch_student(&self, student_id: StudentId) -> Result<Option<Student>> {
        let row = sqlx::query_as::<_, (i64, String, Option<i64>)>(
            "select id, name, learning_style_id from student where id = ?",
        )
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, learning_style_id)| Student {
            id,
            name,
            learning_style_id,
        }))
    }

    async fn assign_learning_style(&self, student_id: StudentId, style_id: StyleId) -> Result<()> {
        let updated = sqlx::query("update student set learning_style_id = ? where id = ?")
            .bind(style_id)
            .bind(student_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(Error::NotFound(format!("student {student_id}")));
        }
        Ok(())
    }

    async fn enroll(&self, student_id: StudentId, course_id: CourseId) -> Result<bool> {
        let inserted = sqlx::query(
            "insert or ignore into enrollment (student_id, course_id, progress_percentage, enrolled_at) \
             values (?, ?, 0, ?)",
        )
        .bind(student_id)
        .bind(course_id)
        .bind(now_utc())
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn unenroll(&self, student_id: StudentId, course_id: CourseId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let enrolled = sqlx::query_scalar::<_, i64>(
            "select count(*) from enrollment where student_id = ? and course_id = ?",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_one(&mut *tx)
        .await?;
        if enrolled == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        sqlx::query(&format!(
            "delete from attempt_detail where attempt_id in ({COURSE_ATTEMPTS})"
        ))
        .bind(student_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!("delete from attempt where id in ({COURSE_ATTEMPTS})"))
            .bind(student_id)
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "delete from section_progress where student_id = ? \
             and section_id in (select id from course_section where course_id = ?)",
        )
        .bind(student_id)
        .bind(course_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("delete from enrollment where student_id = ? and course_id = ?")
            .bind(student_id)
            .bind(course_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn fetch_enrollment(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Option<Enrollment>> {
        let row = sqlx::query_as::<_, EnrollmentRow>(
            "select student_id, course_id, progress_percentage, enrolled_at from enrollment \
             where student_id = ? and course_id = ?",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Enrollment {
            student_id: r.student_id,
            course_id: r.course_id,
            progress_percentage: clamp_score(r.progress_percentage),
            enrolled_at: r.enrolled_at,
        }))
    }

    async fn update_enrollment_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        percentage: u8,
    ) -> Result<()> {
        sqlx::query(
            "update enrollment set progress_percentage = ? where student_id = ? and course_id = ?",
        )
        .bind(i64::from(percentage))
        .bind(student_id)
        .bind(course_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_section_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<SectionProgress>> {
        let rows = sqlx::query_as::<_, ProgressRow>(
            "select p.student_id, p.section_id, p.completed, p.completed_at, p.score \
             from section_progress p join course_section s on p.section_id = s.id \
             where p.student_id = ? and s.course_id = ? order by s.position, s.id",
        )
        .bind(student_id)
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(SectionProgress::from).collect())
    }

    async fn upsert_section_progress(&self, record: &SectionProgress) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        upsert_progress(&mut conn, record).await
    }

    async fn record_attempt(
        &self,
        record: &AttemptRecord,
        timeout: Duration,
    ) -> Result<AttemptId> {
        let deadline = Instant::now() + timeout;
        let mut tx = match timeout_at(deadline, self.pool.begin()).await {
            Ok(tx) => tx?,
            Err(_) => return Err(Error::SubmissionTimedOut),
        };
        let attempt_id = match timeout_at(deadline, write_attempt(&mut tx, record)).await {
            Ok(Ok(attempt_id)) => attempt_id,
            Ok(Err(e)) => {
                error!(unit_id = record.unit_id, "writing attempt failed, rolling back: {}", e);
                tx.rollback().await?;
                return Err(e);
            }
            Err(_) => {
                warn!(unit_id = record.unit_id, "attempt write timed out, rolling back");
                tx.rollback().await?;
                return Err(Error::SubmissionTimedOut);
            }
        };
        // not bounded: a commit already handed to the worker completes regardless
        tx.commit().await?;
        Ok(attempt_id)
    }

    async fn fetch_attempt(&self, attempt_id: AttemptId) -> Result<Option<Attempt>> {
        let row = sqlx::query_as::<_, AttemptRow>(
            "select id, student_id, unit_id, start_time, end_time, score from attempt where id = ?",
        )
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Attempt {
            id: r.id,
            student_id: r.student_id,
            unit_id: r.unit_id,
            start_time: r.start_time,
            end_time: r.end_time,
            score: r.score.map(clamp_score),
        }))
    }

    async fn fetch_attempt_details(&self, attempt_id: AttemptId) -> Result<Vec<AttemptDetail>> {
        let rows = sqlx::query_as::<_, DetailRow>(
            "select attempt_id, question_id, selected_answer, is_correct, time_taken \
             from attempt_detail where attempt_id = ? order by id",
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| AttemptDetail {
                attempt_id: r.attempt_id,
                question_id: r.question_id,
                selected_answer: r.selected_answer,
                is_correct: r.is_correct,
                time_taken: r.time_taken.max(0) as u32,
            })
            .collect())
    }

    async fn latest_attempt_for_section(
        &self,
        student_id: StudentId,
        section_id: SectionId,
    ) -> Result<Option<AttemptId>> {
        let id = sqlx::query_scalar::<_, i64>(
            "select a.id from attempt a join styled_unit u on a.unit_id = u.id \
             where a.student_id = ? and u.section_id = ? and a.end_time is not null \
             order by a.id desc limit 1",
        )
        .bind(student_id)
        .bind(section_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn apply_score_correction(&self, correction: &ScoreCorrection) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("update attempt set score = ? where id = ?")
            .bind(i64::from(correction.score))
            .bind(correction.attempt_id)
            .execute(&mut *tx)
            .await?;
        for (question_id, is_correct) in &correction.details {
            sqlx::query(
                "update attempt_detail set is_correct = ? where attempt_id = ? and question_id = ?",
            )
            .bind(*is_correct)
            .bind(correction.attempt_id)
            .bind(*question_id)
            .execute(&mut *tx)
            .await?;
        }
        if let Some(progress) = &correction.progress {
            upsert_progress(&mut tx, progress).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

//! Fixtures for tests: an in-memory store and small seeding helpers.

use std::{path::Path, time::Duration};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::SqliteStore;
use crate::{
    course::{CourseId, QuestionId, SectionId, SectionType, UnitId},
    student::{StudentId, StyleId},
};

const CACHE_TTL: Duration = Duration::from_secs(60);

/// Single-connection in-memory database with the schema applied.
pub async fn memory_store() -> SqliteStore {
    memory_store_with_ttl(CACHE_TTL).await
}

pub async fn memory_store_with_ttl(cache_ttl: Duration) -> SqliteStore {
    let options = "sqlite::memory:"
        .parse::<SqliteConnectOptions>()
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    let store = SqliteStore::new(pool, 64, cache_ttl);
    store.create_schema().await.unwrap();
    store
}

/// File-backed store, for tests that need several connections at once.
pub async fn file_store(dir: &Path) -> SqliteStore {
    let url = format!("sqlite://{}", dir.join("learnpath.db").display());
    let store = SqliteStore::connect(&url, 64, CACHE_TTL).await.unwrap();
    store.create_schema().await.unwrap();
    store
}

/// A store whose every query fails: the database lives in a directory that does not exist.
pub fn unreachable_store() -> SqliteStore {
    let options = SqliteConnectOptions::new()
        .filename("/nonexistent/learnpath/db.sqlite")
        .create_if_missing(false);
    let pool = SqlitePoolOptions::new()
        .acquire_timeout(Duration::from_millis(200))
        .connect_lazy_with(options);
    SqliteStore::new(pool, 8, CACHE_TTL)
}

pub async fn add_style(store: &SqliteStore, name: &str) -> StyleId {
    sqlx::query("insert into learning_style (name) values (?)")
        .bind(name)
        .execute(store.pool())
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn add_student(store: &SqliteStore, name: &str, style: Option<StyleId>) -> StudentId {
    sqlx::query("insert into student (name, learning_style_id) values (?, ?)")
        .bind(name)
        .bind(style)
        .execute(store.pool())
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn add_course(store: &SqliteStore, name: &str) -> CourseId {
    sqlx::query("insert into course (name, description) values (?, '')")
        .bind(name)
        .execute(store.pool())
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn add_section(
    store: &SqliteStore,
    course: CourseId,
    section_type: SectionType,
    position: i64,
) -> SectionId {
    sqlx::query("insert into course_section (course_id, section_type, position) values (?, ?, ?)")
        .bind(course)
        .bind(section_type.as_str())
        .bind(position)
        .execute(store.pool())
        .await
        .unwrap()
        .last_insert_rowid()
}

pub async fn add_learn_unit(
    store: &SqliteStore,
    section: SectionId,
    style: Option<StyleId>,
    content: &str,
) -> UnitId {
    sqlx::query("insert into styled_unit (section_id, style_id, content) values (?, ?, ?)")
        .bind(section)
        .bind(style)
        .bind(content)
        .execute(store.pool())
        .await
        .unwrap()
        .last_insert_rowid()
}

/// A test/quiz unit with one question per answer key, each offering choices A to D.
pub async fn add_question_unit(
    store: &SqliteStore,
    section: SectionId,
    style: Option<StyleId>,
    answer_keys: &[&str],
) -> (UnitId, Vec<QuestionId>) {
    let unit = sqlx::query("insert into styled_unit (section_id, style_id) values (?, ?)")
        .bind(section)
        .bind(style)
        .execute(store.pool())
        .await
        .unwrap()
        .last_insert_rowid();
    let mut questions = Vec::new();
    for (position, key) in answer_keys.iter().enumerate() {
        let question = sqlx::query(
            "insert into question (unit_id, position, prompt, correct_answer) values (?, ?, ?, ?)",
        )
        .bind(unit)
        .bind(position as i64)
        .bind(format!("Question {}", position + 1))
        .bind(*key)
        .execute(store.pool())
        .await
        .unwrap()
        .last_insert_rowid();
        for label in ["A", "B", "C", "D"] {
            sqlx::query("insert into choice (question_id, label, body) values (?, ?, ?)")
                .bind(question)
                .bind(label)
                .bind(format!("Option {label}"))
                .execute(store.pool())
                .await
                .unwrap();
        }
        questions.push(question);
    }
    (unit, questions)
}

/// Mark a section completed without going through the scorer.
pub async fn complete_section(
    store: &SqliteStore,
    student: StudentId,
    section: SectionId,
    score: Option<u8>,
) {
    use super::{ProgressStore, SectionProgress};
    store
        .upsert_section_progress(&SectionProgress {
            student_id: student,
            section_id: section,
            completed: true,
            completed_at: Some(crate::utils::now_utc()),
            score,
        })
        .await
        .unwrap();
}

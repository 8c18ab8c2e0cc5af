//! Grading of test and quiz submissions.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use super::aggregator::recompute_enrollment_progress;
use crate::{
    course::{AnswerKey, QuestionId, StyledContentUnit, UnitId},
    error::{Error, Result},
    store::{AttemptId, AttemptRecord, DetailRecord, LearningStore, ScoreCorrection, SectionProgress},
    student::{StudentId, get_enrollment, get_student},
    utils::{now_utc, percent},
};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, ToSchema)]
pub struct SubmittedAnswer {
    pub question_id: QuestionId,
    /// A choice letter such as `"B"` or `"b) text"`.
    pub selected_answer: String,
    /// seconds
    #[serde(default)]
    pub time_spent: u32,
}

impl SubmittedAnswer {
    pub fn new(question_id: QuestionId, selected_answer: &str) -> Self {
        Self {
            question_id,
            selected_answer: selected_answer.to_string(),
            time_spent: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct AttemptOutcome {
    pub attempt_id: AttemptId,
    pub score: u8,
    pub correct_count: usize,
    pub total_count: usize,
}

/// Graded answers, one detail per question of the unit in question order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grade {
    pub details: Vec<DetailRecord>,
    pub correct_count: usize,
    pub total_count: usize,
    pub score: u8,
}

/// Validate a submission against the unit and grade it. Unanswered questions get an
/// incorrect detail row so the detail set always covers the whole unit.
pub fn grade(unit: &StyledContentUnit, answers: &[SubmittedAnswer]) -> Result<Grade> {
    if answers.is_empty() {
        return Err(Error::InvalidSubmission("no answers submitted".to_string()));
    }
    let questions = unit.questions();
    if questions.is_empty() {
        return Err(Error::Configuration(format!(
            "unit {} has no questions",
            unit.id
        )));
    }

    let mut by_question: HashMap<QuestionId, (AnswerKey, u32)> = HashMap::new();
    for answer in answers {
        if unit.question(answer.question_id).is_none() {
            return Err(Error::InvalidQuestionReference {
                unit_id: unit.id,
                question_id: answer.question_id,
            });
        }
        let key = answer.selected_answer.parse::<AnswerKey>()?;
        if by_question
            .insert(answer.question_id, (key, answer.time_spent))
            .is_some()
        {
            return Err(Error::InvalidSubmission(format!(
                "question {} answered more than once",
                answer.question_id
            )));
        }
    }

    let details: Vec<DetailRecord> = questions
        .iter()
        .map(|q| match by_question.get(&q.id) {
            Some((key, time_taken)) => DetailRecord {
                question_id: q.id,
                selected_answer: Some(*key),
                is_correct: q.is_correct(key),
                time_taken: *time_taken,
            },
            None => DetailRecord {
                question_id: q.id,
                selected_answer: None,
                is_correct: false,
                time_taken: 0,
            },
        })
        .collect();
    let correct_count = details.iter().filter(|d| d.is_correct).count();
    let total_count = questions.len();
    Ok(Grade {
        details,
        correct_count,
        total_count,
        score: percent(correct_count, total_count),
    })
}

/// Grade and persist one pass through a test or quiz unit.
///
/// Header, details and the section progress upsert commit together or not at all.
/// `timeout` bounds the writes before the commit; when it elapses the transaction is
/// rolled back and `SubmissionTimedOut` is returned. A started commit is always awaited,
/// so a committed attempt is never reported as timed out.
pub async fn submit_attempt<S: LearningStore>(
    store: &S,
    student_id: StudentId,
    unit_id: UnitId,
    answers: &[SubmittedAnswer],
    timeout: Duration,
) -> Result<AttemptOutcome> {
    let start_time = now_utc();
    get_student(store, student_id).await?;
    let unit = store
        .fetch_unit(unit_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("unit {unit_id}")))?;
    let section = store
        .fetch_section(unit.section_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("section {}", unit.section_id)))?;
    if !section.section_type.is_scored() {
        return Err(Error::InvalidSubmission(format!(
            "section {} is a {} section and takes no answers",
            section.id, section.section_type
        )));
    }
    get_enrollment(store, student_id, section.course_id).await?;

    let grade = match grade(&unit, answers) {
        Ok(grade) => grade,
        Err(e) => {
            warn!(student_id, unit_id, "submission rejected: {}", e);
            return Err(e);
        }
    };
    let record = AttemptRecord {
        student_id,
        unit_id,
        section_id: section.id,
        start_time,
        end_time: now_utc(),
        score: grade.score,
        question_count: grade.total_count,
        details: grade.details,
    };
    let attempt_id = match store.record_attempt(&record, timeout).await {
        Ok(attempt_id) => attempt_id,
        Err(Error::SubmissionTimedOut) => {
            warn!(student_id, unit_id, "attempt submission timed out, nothing recorded");
            return Err(Error::SubmissionTimedOut);
        }
        Err(e) => return Err(e),
    };
    info!(
        student_id,
        unit_id,
        attempt_id,
        score = grade.score,
        "attempt recorded"
    );
    recompute_enrollment_progress(store, student_id, section.course_id).await?;

    Ok(AttemptOutcome {
        attempt_id,
        score: grade.score,
        correct_count: grade.correct_count,
        total_count: grade.total_count,
    })
}

/// Re-grade a stored attempt against the unit's current answer key.
///
/// The section progress score follows only when this attempt is the student's most
/// recent one on that section.
pub async fn rescore_attempt<S: LearningStore>(
    store: &S,
    attempt_id: AttemptId,
) -> Result<AttemptOutcome> {
    let attempt = store
        .fetch_attempt(attempt_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("attempt {attempt_id}")))?;
    let details = store.fetch_attempt_details(attempt_id).await?;
    let unit = store
        .fetch_unit(attempt.unit_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("unit {}", attempt.unit_id)))?;
    let total_count = unit.questions().len();
    if details.len() != total_count {
        return Err(Error::InconsistentAttemptState {
            expected: total_count,
            actual: details.len(),
        });
    }

    let mut corrected = Vec::with_capacity(details.len());
    for detail in &details {
        let question =
            unit.question(detail.question_id)
                .ok_or(Error::InconsistentAttemptState {
                    expected: total_count,
                    actual: details.len(),
                })?;
        let is_correct = match &detail.selected_answer {
            Some(selected) => question.is_correct(&selected.parse()?),
            None => false,
        };
        corrected.push((detail.question_id, is_correct));
    }
    let correct_count = corrected.iter().filter(|(_, ok)| *ok).count();
    let score = percent(correct_count, total_count);

    let latest = store
        .latest_attempt_for_section(attempt.student_id, unit.section_id)
        .await?;
    let progress = (latest == Some(attempt_id)).then(|| SectionProgress {
        student_id: attempt.student_id,
        section_id: unit.section_id,
        completed: true,
        completed_at: attempt.end_time,
        score: Some(score),
    });
    store
        .apply_score_correction(&ScoreCorrection {
            attempt_id,
            score,
            details: corrected,
            progress,
        })
        .await?;
    if attempt.score != Some(score) {
        info!(attempt_id, old = ?attempt.score, new = score, "attempt score corrected");
    }

    Ok(AttemptOutcome {
        attempt_id,
        score,
        correct_count,
        total_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        course::{Question, SectionType, UnitBody},
        store::{ContentRepository, ProgressStore, testing},
    };

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn unit(keys: &[&str]) -> StyledContentUnit {
        StyledContentUnit {
            id: 1,
            section_id: 1,
            style_id: None,
            body: UnitBody::Test {
                questions: keys
                    .iter()
                    .enumerate()
                    .map(|(i, k)| Question {
                        id: i as i64 + 10,
                        position: i as i64,
                        prompt: String::new(),
                        correct_answer: k.parse().unwrap(),
                        choices: vec![],
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn grades_in_question_order() {
        let unit = unit(&["A", "B", "C"]);
        let grade = grade(
            &unit,
            &[SubmittedAnswer::new(12, "c."), SubmittedAnswer::new(10, "b")],
        )
        .unwrap();
        assert_eq!(grade.total_count, 3);
        assert_eq!(grade.correct_count, 1);
        assert_eq!(grade.score, 33);
        let ids: Vec<_> = grade.details.iter().map(|d| d.question_id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert_eq!(grade.details[1].selected_answer, None);
    }

    #[test]
    fn score_is_rounded_percentage() {
        for total in 1..=12usize {
            let keys = vec!["A"; total];
            let unit = unit(&keys);
            for correct in 0..=total {
                let answers: Vec<_> = (0..total)
                    .map(|i| SubmittedAnswer::new(i as i64 + 10, if i < correct { "A" } else { "B" }))
                    .collect();
                let grade = grade(&unit, &answers).unwrap();
                assert_eq!(grade.correct_count, correct);
                let expected = (100.0 * correct as f64 / total as f64).round() as u8;
                assert_eq!(grade.score, expected);
            }
        }
    }

    #[test]
    fn rejects_bad_submissions() {
        let unit = unit(&["A", "B"]);
        assert!(matches!(
            grade(&unit, &[]),
            Err(Error::InvalidSubmission(_))
        ));
        assert!(matches!(
            grade(&unit, &[SubmittedAnswer::new(99, "A")]),
            Err(Error::InvalidQuestionReference { unit_id: 1, question_id: 99 })
        ));
        assert!(matches!(
            grade(&unit, &[SubmittedAnswer::new(10, "A"), SubmittedAnswer::new(10, "B")]),
            Err(Error::InvalidSubmission(_))
        ));
        assert!(matches!(
            grade(&unit, &[SubmittedAnswer::new(10, "0")]),
            Err(Error::InvalidSubmission(_))
        ));
    }

    struct Fixture {
        store: crate::store::SqliteStore,
        student: StudentId,
        course: i64,
        section: i64,
        unit: UnitId,
        questions: Vec<QuestionId>,
    }

    async fn five_question_test() -> Fixture {
        let store = testing::memory_store().await;
        let student = testing::add_student(&store, "Ada", None).await;
        let course = testing::add_course(&store, "Rust").await;
        let section = testing::add_section(&store, course, SectionType::Test, 0).await;
        let (unit, questions) =
            testing::add_question_unit(&store, section, None, &["A", "B", "C", "D", "A"]).await;
        crate::student::enroll(&store, student, course).await.unwrap();
        Fixture {
            store,
            student,
            course,
            section,
            unit,
            questions,
        }
    }

    fn answers(questions: &[QuestionId], picks: &[&str]) -> Vec<SubmittedAnswer> {
        questions
            .iter()
            .zip(picks)
            .map(|(q, a)| SubmittedAnswer {
                question_id: *q,
                selected_answer: a.to_string(),
                time_spent: 12,
            })
            .collect()
    }

    #[tokio::test]
    async fn four_of_five_scores_eighty() {
        let f = five_question_test().await;
        let outcome = submit_attempt(
            &f.store,
            f.student,
            f.unit,
            &answers(&f.questions, &["A", "B", "C", "D", "B"]),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(outcome.score, 80);
        assert_eq!((outcome.correct_count, outcome.total_count), (4, 5));

        let progress = f.store.fetch_section_progress(f.student, f.course).await.unwrap();
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0].section_id, f.section);
        assert!(progress[0].completed);
        assert_eq!(progress[0].score, Some(80));

        let attempt = f.store.fetch_attempt(outcome.attempt_id).await.unwrap().unwrap();
        assert_eq!(attempt.score, Some(80));
        assert_eq!(progress[0].completed_at, attempt.end_time);
        let details = f.store.fetch_attempt_details(outcome.attempt_id).await.unwrap();
        assert_eq!(details.len(), 5);
        assert_eq!(details.iter().filter(|d| d.is_correct).count(), 4);
        assert!(details.iter().all(|d| d.time_taken == 12));

        let enrollment = f.store.fetch_enrollment(f.student, f.course).await.unwrap().unwrap();
        assert_eq!(enrollment.progress_percentage, 100);
    }

    #[tokio::test]
    async fn partial_submission_still_writes_every_detail() {
        let f = five_question_test().await;
        let outcome = submit_attempt(
            &f.store,
            f.student,
            f.unit,
            &answers(&f.questions[..2], &["A", "B"]),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!(outcome.score, 40);
        let details = f.store.fetch_attempt_details(outcome.attempt_id).await.unwrap();
        assert_eq!(details.len(), f.questions.len());
    }

    #[tokio::test]
    async fn foreign_question_creates_no_attempt() {
        let f = five_question_test().await;
        let mut submitted = answers(&f.questions, &["A", "B", "C", "D", "A"]);
        submitted.push(SubmittedAnswer::new(4242, "A"));
        let err = submit_attempt(&f.store, f.student, f.unit, &submitted, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuestionReference { question_id: 4242, .. }));

        let attempts: i64 = sqlx::query_scalar("select count(*) from attempt")
            .fetch_one(f.store.pool())
            .await
            .unwrap();
        assert_eq!(attempts, 0);
        assert!(f.store.fetch_section_progress(f.student, f.course).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_detail_write_rolls_back_the_header() {
        let f = five_question_test().await;
        sqlx::query(
            "create trigger reject_details before insert on attempt_detail \
             begin select raise(abort, 'disk full'); end",
        )
        .execute(f.store.pool())
        .await
        .unwrap();
        let err = submit_attempt(
            &f.store,
            f.student,
            f.unit,
            &answers(&f.questions, &["A", "B", "C", "D", "A"]),
            TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        let attempts: i64 = sqlx::query_scalar("select count(*) from attempt")
            .fetch_one(f.store.pool())
            .await
            .unwrap();
        assert_eq!(attempts, 0);
        assert!(f.store.fetch_section_progress(f.student, f.course).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn swallowed_detail_rows_are_detected() {
        let f = five_question_test().await;
        // a store that silently drops one row must not produce a valid attempt
        sqlx::query(
            "create trigger drop_last_detail before insert on attempt_detail \
             when new.question_id = (select max(id) from question) \
             begin select raise(ignore); end",
        )
        .execute(f.store.pool())
        .await
        .unwrap();
        let err = submit_attempt(
            &f.store,
            f.student,
            f.unit,
            &answers(&f.questions, &["A", "B", "C", "D", "A"]),
            TIMEOUT,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::InconsistentAttemptState { expected: 5, actual: 4 }
        ));
        let attempts: i64 = sqlx::query_scalar("select count(*) from attempt")
            .fetch_one(f.store.pool())
            .await
            .unwrap();
        assert_eq!(attempts, 0);
    }

    #[tokio::test]
    async fn expired_timeout_records_nothing() {
        let f = five_question_test().await;
        let err = submit_attempt(
            &f.store,
            f.student,
            f.unit,
            &answers(&f.questions, &["A", "B", "C", "D", "A"]),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SubmissionTimedOut));
        let attempts: i64 = sqlx::query_scalar("select count(*) from attempt")
            .fetch_one(f.store.pool())
            .await
            .unwrap();
        assert_eq!(attempts, 0);
        assert!(f.store.fetch_section_progress(f.student, f.course).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn timed_out_means_not_recorded() {
        let f = five_question_test().await;
        let picks = answers(&f.questions, &["A", "B", "C", "D", "A"]);
        let mut recorded = 0;
        for micros in (0..=3000).step_by(150) {
            let result = submit_attempt(
                &f.store,
                f.student,
                f.unit,
                &picks,
                Duration::from_micros(micros),
            )
            .await;
            let attempts: i64 = sqlx::query_scalar("select count(*) from attempt")
                .fetch_one(f.store.pool())
                .await
                .unwrap();
            match result {
                Ok(outcome) => {
                    recorded += 1;
                    assert!(f.store.fetch_attempt(outcome.attempt_id).await.unwrap().is_some());
                    let enrollment =
                        f.store.fetch_enrollment(f.student, f.course).await.unwrap().unwrap();
                    assert_eq!(enrollment.progress_percentage, 100);
                }
                Err(e) => assert!(matches!(e, Error::SubmissionTimedOut)),
            }
            assert_eq!(attempts, recorded);
        }
        let outcome = submit_attempt(&f.store, f.student, f.unit, &picks, TIMEOUT)
            .await
            .unwrap();
        assert_eq!(outcome.score, 100);
    }

    #[tokio::test]
    async fn attempts_require_enrollment() {
        let store = testing::memory_store().await;
        let student = testing::add_student(&store, "Ada", None).await;
        let course = testing::add_course(&store, "Rust").await;
        let section = testing::add_section(&store, course, SectionType::Test, 0).await;
        let (unit, questions) = testing::add_question_unit(&store, section, None, &["A"]).await;

        let err = submit_attempt(&store, student, unit, &[SubmittedAnswer::new(questions[0], "A")], TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        let attempts: i64 = sqlx::query_scalar("select count(*) from attempt")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(attempts, 0);
        assert!(store.fetch_section_progress(student, course).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn learn_units_take_no_answers() {
        let store = testing::memory_store().await;
        let student = testing::add_student(&store, "Ada", None).await;
        let course = testing::add_course(&store, "Rust").await;
        let section = testing::add_section(&store, course, SectionType::Learn, 0).await;
        let unit = testing::add_learn_unit(&store, section, None, "read me").await;
        let err = submit_attempt(&store, student, unit, &[SubmittedAnswer::new(1, "A")], TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSubmission(_)));
    }

    #[tokio::test]
    async fn concurrent_submissions_leave_one_progress_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = testing::file_store(dir.path()).await;
        let student = testing::add_student(&store, "Ada", None).await;
        let course = testing::add_course(&store, "Rust").await;
        let section = testing::add_section(&store, course, SectionType::Test, 0).await;
        let keys = ["A"; 10];
        let (unit, questions) = testing::add_question_unit(&store, section, None, &keys).await;
        crate::student::enroll(&store, student, course).await.unwrap();

        let picks = |correct: usize| -> Vec<SubmittedAnswer> {
            questions
                .iter()
                .enumerate()
                .map(|(i, q)| SubmittedAnswer::new(*q, if i < correct { "A" } else { "B" }))
                .collect()
        };
        let (sixty, ninety) = (picks(6), picks(9));
        let (a, b) = tokio::join!(
            submit_attempt(&store, student, unit, &sixty, TIMEOUT),
            submit_attempt(&store, student, unit, &ninety, TIMEOUT),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!((a.score, b.score), (60, 90));

        let progress = store.fetch_section_progress(student, course).await.unwrap();
        assert_eq!(progress.len(), 1);
        // the attempt committed last has the highest id
        let last = if a.attempt_id > b.attempt_id { a } else { b };
        assert_eq!(progress[0].score, Some(last.score));
        for outcome in [a, b] {
            let details = store.fetch_attempt_details(outcome.attempt_id).await.unwrap();
            assert_eq!(details.len(), 10);
        }
    }

    #[tokio::test]
    async fn rescore_follows_a_corrected_answer_key() {
        let f = five_question_test().await;
        let first = submit_attempt(
            &f.store,
            f.student,
            f.unit,
            &answers(&f.questions, &["A", "B", "C", "D", "B"]),
            TIMEOUT,
        )
        .await
        .unwrap();
        let second = submit_attempt(
            &f.store,
            f.student,
            f.unit,
            &answers(&f.questions, &["A", "B", "C", "A", "B"]),
            TIMEOUT,
        )
        .await
        .unwrap();
        assert_eq!((first.score, second.score), (80, 60));

        // the author fixes the last question's key to B
        sqlx::query("update question set correct_answer = 'B' where id = ?")
            .bind(f.questions[4])
            .execute(f.store.pool())
            .await
            .unwrap();
        let store = f.store;
        store.invalidate_content();

        let corrected = rescore_attempt(&store, first.attempt_id).await.unwrap();
        assert_eq!(corrected.score, 100);
        // an older attempt does not move the section score
        let progress = store.fetch_section_progress(f.student, f.course).await.unwrap();
        assert_eq!(progress[0].score, Some(60));

        let corrected = rescore_attempt(&store, second.attempt_id).await.unwrap();
        assert_eq!(corrected.score, 80);
        let progress = store.fetch_section_progress(f.student, f.course).await.unwrap();
        assert_eq!(progress[0].score, Some(80));
        let attempt = store.fetch_attempt(second.attempt_id).await.unwrap().unwrap();
        assert_eq!(attempt.score, Some(80));
        assert!(matches!(
            rescore_attempt(&store, 999).await,
            Err(Error::NotFound(_))
        ));
    }
}

// tests/postgres_tests.rs
//
// Runs against the database in DATABASE_URL; skipped when it is not set.

use std::sync::Arc;

use chrono::{Duration, Utc};
use exam_attempts::{
    error::StoreError,
    models::{
        attempt::{AnswerPayload, Attempt, AttemptStatus},
        late_code::{LateCode, LateCodeStatus},
        response::QuestionResponse,
    },
    store::{AttemptStore, GradedSubmission, LateCodeStore, PgStore},
    utils::code::{generate_late_code, generate_resume_token},
};
use sqlx::{PgPool, postgres::PgPoolOptions, types::Json};
use uuid::Uuid;

const TEACHER_ID: i64 = 900;

/// Connects and migrates, or returns `None` when no database is configured.
async fn connect() -> Option<PgPool> {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping Postgres test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to Postgres for testing. Make sure DATABASE_URL is set.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to migrate database");

    Some(pool)
}

/// Inserts a running exam with one QCM question; returns (exam, question).
async fn seed_exam(pool: &PgPool) -> (i64, i64) {
    let now = Utc::now();
    let exam_id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO exams (title, created_by, start_time, end_time, duration_minutes)
        VALUES ($1, $2, $3, $4, 60)
        RETURNING id
        "#,
    )
    .bind(format!("Exam {}", Uuid::new_v4()))
    .bind(TEACHER_ID)
    .bind(now - Duration::hours(1))
    .bind(now + Duration::hours(1))
    .fetch_one(pool)
    .await
    .unwrap();

    let question_id: i64 = sqlx::query_scalar(
        "INSERT INTO questions (exam_id, type, text) VALUES ($1, 'QCM', 'Pick one') RETURNING id",
    )
    .bind(exam_id)
    .fetch_one(pool)
    .await
    .unwrap();

    (exam_id, question_id)
}

fn answer(attempt_id: Uuid, question_id: i64) -> QuestionResponse {
    QuestionResponse::from_answer(
        attempt_id,
        &AnswerPayload {
            question_id,
            selected_option_id: None,
            text_response: Some("x < 5 & y > 2".to_string()),
            time_spent: 5,
        },
        Utc::now(),
    )
}

fn all_correct(responses: Vec<QuestionResponse>) -> GradedSubmission {
    let responses: Vec<QuestionResponse> = responses
        .into_iter()
        .map(|r| QuestionResponse {
            is_correct: Some(true),
            ..r
        })
        .collect();
    GradedSubmission {
        responses,
        score: 1.0,
        percentage: 100.0,
    }
}

#[tokio::test]
async fn pg_last_use_goes_to_one_redeemer() {
    let Some(pool) = connect().await else {
        return;
    };
    let (exam_id, _) = seed_exam(&pool).await;
    let store = Arc::new(PgStore::new(pool));

    let now = Utc::now();
    let code = store
        .create_late_code(&LateCode {
            id: Uuid::new_v4(),
            exam_id,
            code: generate_late_code(8),
            generated_by: TEACHER_ID,
            usages_remaining: 1,
            expires_at: now + Duration::days(1),
            assigned_user_id: None,
            reason: None,
            status: LateCodeStatus::Active,
            usage_history: Json(Vec::new()),
            created_at: now,
        })
        .await
        .unwrap();

    let handles: Vec<_> = (1..=8)
        .map(|user_id| {
            let store = store.clone();
            let id = code.id;
            tokio::spawn(async move { store.redeem(id, user_id, Utc::now()).await })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let stored = store.find_late_code(code.id).await.unwrap().unwrap();
    assert_eq!(stored.usages_remaining, 0);
    assert_eq!(stored.usage_history.0.len(), 1);
}

#[tokio::test]
async fn pg_completion_happens_once_and_freezes_answers() {
    let Some(pool) = connect().await else {
        return;
    };
    let (exam_id, question_id) = seed_exam(&pool).await;
    let store = PgStore::new(pool);

    let now = Utc::now();
    let attempt = store
        .create_attempt(&Attempt::new(
            exam_id,
            1,
            now,
            now + Duration::hours(1),
            generate_resume_token(),
            None,
        ))
        .await
        .unwrap();

    let saved = store
        .upsert_response(&answer(attempt.id, question_id), Utc::now())
        .await
        .unwrap()
        .expect("attempt is still running");
    assert_eq!(saved.text_response.as_deref(), Some("x < 5 & y > 2"));

    let (completed, responses) = store
        .complete_attempt(attempt.id, Utc::now(), &all_correct)
        .await
        .unwrap()
        .expect("first completion applies");
    assert_eq!(completed.status, AttemptStatus::Completed);
    assert_eq!(completed.percentage, Some(100.0));
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].is_correct, Some(true));

    assert!(
        store
            .complete_attempt(attempt.id, Utc::now(), &all_correct)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        store
            .upsert_response(&answer(attempt.id, question_id), Utc::now())
            .await
            .unwrap()
            .is_none()
    );
    assert!(matches!(
        store
            .transition(attempt.id, AttemptStatus::Completed, AttemptStatus::Started)
            .await,
        Err(StoreError::IllegalTransition { .. })
    ));
}

#[tokio::test]
async fn pg_one_current_attempt_per_user_and_exam() {
    let Some(pool) = connect().await else {
        return;
    };
    let (exam_id, _) = seed_exam(&pool).await;
    let store = PgStore::new(pool);

    let now = Utc::now();
    let fresh = || {
        Attempt::new(
            exam_id,
            1,
            now,
            now + Duration::hours(1),
            generate_resume_token(),
            None,
        )
    };
    let first = store.create_attempt(&fresh()).await.unwrap();
    assert!(matches!(
        store.create_attempt(&fresh()).await,
        Err(StoreError::Duplicate)
    ));

    store
        .transition(first.id, AttemptStatus::Started, AttemptStatus::Abandoned)
        .await
        .unwrap()
        .expect("attempt was started");
    store.create_attempt(&fresh()).await.unwrap();
}

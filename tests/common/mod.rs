// tests/common/mod.rs

#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use chrono::{DateTime, Duration, TimeZone, Utc};
use exam_attempts::{
    config::{Config, RateLimit, parse_frontend_url},
    models::exam::{AnswerOption, CloseMode, Exam, ExamConfig, Question, QuestionType},
    routes,
    services::{anti_cheat::AntiCheatPolicy, late_code::LateCodeSettings},
    state::AppState,
    store::MemoryStore,
    utils::{clock::ManualClock, jwt::sign_jwt},
};

pub const JWT_SECRET: &str = "test_secret_for_integration_tests";
pub const TEACHER_ID: i64 = 900;
pub const STUDENT_ID: i64 = 1;
pub const OTHER_STUDENT_ID: i64 = 2;

/// Exam whose window is open at `opened_at() + 5min`.
pub const OPEN_EXAM: i64 = 1;
/// Same timing as `OPEN_EXAM`, but attempts always get the full duration.
pub const PERMISSIVE_EXAM: i64 = 2;
/// Exam whose window closed an hour before `opened_at()`.
pub const CLOSED_EXAM: i64 = 3;

pub fn opened_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn test_config(anti_cheat: AntiCheatPolicy) -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        rust_log: "error".to_string(),
        log_dir: "logs".to_string(),
        port: 0,
        frontend_url: parse_frontend_url("http://localhost:3000").unwrap(),
        anti_cheat,
        late_codes: LateCodeSettings::default(),
        late_code_rate: RateLimit::disabled(),
    }
}

pub fn exam(id: i64, start: DateTime<Utc>, end: DateTime<Utc>, close_mode: CloseMode) -> Exam {
    Exam {
        id,
        title: format!("Exam {}", id),
        class_id: Some(42),
        created_by: TEACHER_ID,
        start_time: start,
        end_time: end,
        duration_minutes: 60,
        config: ExamConfig {
            late_duration_minutes: 30,
            delay_results_until_late_end: true,
        },
        close_mode,
    }
}

pub fn question_id(exam_id: i64, n: i64) -> i64 {
    exam_id * 100 + n
}

pub fn correct_option(question_id: i64) -> i64 {
    question_id * 10
}

pub fn wrong_option(question_id: i64) -> i64 {
    question_id * 10 + 1
}

/// Four one-point QCM questions.
pub fn questions(exam_id: i64) -> Vec<Question> {
    (1..=4)
        .map(|n| {
            let id = question_id(exam_id, n);
            Question {
                id,
                exam_id,
                question_type: QuestionType::Qcm,
                text: format!("Question {}", n),
                points: 1.0,
                correct_answer: None,
                position: n as i32,
                options: vec![
                    AnswerOption {
                        id: correct_option(id),
                        question_id: id,
                        text: "right".to_string(),
                        is_correct: true,
                    },
                    AnswerOption {
                        id: wrong_option(id),
                        question_id: id,
                        text: "wrong".to_string(),
                        is_correct: false,
                    },
                ],
            }
        })
        .collect()
}

pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

/// Seeded services over the in-memory store, clock at `opened_at() + 5min`.
pub async fn setup(anti_cheat: AntiCheatPolicy) -> TestContext {
    let t0 = opened_at();
    let store = Arc::new(MemoryStore::new());
    store
        .insert_exam(
            exam(OPEN_EXAM, t0, t0 + Duration::hours(2), CloseMode::Strict),
            questions(OPEN_EXAM),
        )
        .await;
    store
        .insert_exam(
            exam(PERMISSIVE_EXAM, t0, t0 + Duration::hours(2), CloseMode::Permissive),
            questions(PERMISSIVE_EXAM),
        )
        .await;
    store
        .insert_exam(
            exam(
                CLOSED_EXAM,
                t0 - Duration::hours(3),
                t0 - Duration::hours(1),
                CloseMode::Strict,
            ),
            questions(CLOSED_EXAM),
        )
        .await;

    let clock = Arc::new(ManualClock::new(t0 + Duration::minutes(5)));
    let state = AppState::new(
        test_config(anti_cheat),
        store.clone(),
        store.clone(),
        store.clone(),
        clock.clone(),
    );

    TestContext {
        state,
        store,
        clock,
    }
}

/// Spawns the router on a random port and returns its base URL.
pub async fn spawn_app(state: AppState) -> String {
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    format!("http://127.0.0.1:{}", port)
}

pub fn token(user_id: i64, role: &str) -> String {
    sign_jwt(user_id, role, JWT_SECRET, 600).unwrap()
}

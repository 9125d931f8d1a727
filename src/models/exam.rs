// src/models/exam.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::user::{Identity, Role};

/// How an exam's end time bounds an attempt started inside the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "close_mode", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CloseMode {
    /// Attempts end no later than the exam's end time.
    Strict,
    /// Attempts always get the full duration.
    Permissive,
}

/// Late-period settings of an exam.
#[derive(Debug, Clone, Default, FromRow, Serialize, Deserialize)]
pub struct ExamConfig {
    /// Grace window after `end_time`, in minutes. 0 disables it.
    pub late_duration_minutes: i32,

    /// Withhold results from students until the grace window is over.
    pub delay_results_until_late_end: bool,
}

/// Represents the 'exams' table. Owned by the catalog; read-only here.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,
    pub class_id: Option<i64>,
    pub created_by: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i32,
    #[sqlx(flatten)]
    pub config: ExamConfig,
    pub close_mode: CloseMode,
}

impl Exam {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn late_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.config.late_duration_minutes.max(0)))
    }

    pub fn late_end(&self) -> DateTime<Utc> {
        self.end_time + self.late_duration()
    }

    pub fn window_contains(&self, at: DateTime<Utc>) -> bool {
        self.start_time <= at && at <= self.end_time
    }

    /// Admins manage every exam; teachers manage the exams they created.
    pub fn is_managed_by(&self, who: &Identity) -> bool {
        match who.role {
            Role::Admin => true,
            Role::Teacher => self.created_by == who.user_id,
            Role::Student => false,
        }
    }
}

/// Question kind: 'QCM' is answered by picking an option, 'TEXT' by free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "question_type", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum QuestionType {
    Qcm,
    Text,
}

/// Represents the 'options' table.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: i64,
    pub question_id: i64,
    pub text: String,
    pub is_correct: bool,
}

/// Represents the 'questions' table, with its options attached.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,
    pub exam_id: i64,

    /// Mapped from the database column 'type' since `type` is a reserved keyword in Rust.
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub question_type: QuestionType,

    pub text: String,
    pub points: f64,

    /// Expected answer of a TEXT question.
    pub correct_answer: Option<String>,

    pub position: i32,

    #[sqlx(skip)]
    pub options: Vec<AnswerOption>,
}

impl Question {
    pub fn option(&self, option_id: i64) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.id == option_id)
    }
}

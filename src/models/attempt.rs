// src/models/attempt.rs

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{exam::Question, response::QuestionResponse};

/// Lifecycle state of an attempt.
/// `Started` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "attempt_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    Started,
    Completed,
    Expired,
    Abandoned,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptStatus::Started)
    }

    /// Allowed moves: STARTED to any terminal state, nothing else.
    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        self == AttemptStatus::Started && next.is_terminal()
    }
}

/// Client-reported suspicious behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AntiCheatEventType {
    TabSwitch,
    CopyPaste,
    RightClick,
    Screenshot,
    FullscreenExit,
    WindowBlur,
    ContextMenu,
}

impl AntiCheatEventType {
    pub const ALL: [AntiCheatEventType; 7] = [
        AntiCheatEventType::TabSwitch,
        AntiCheatEventType::CopyPaste,
        AntiCheatEventType::RightClick,
        AntiCheatEventType::Screenshot,
        AntiCheatEventType::FullscreenExit,
        AntiCheatEventType::WindowBlur,
        AntiCheatEventType::ContextMenu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AntiCheatEventType::TabSwitch => "tab_switch",
            AntiCheatEventType::CopyPaste => "copy_paste",
            AntiCheatEventType::RightClick => "right_click",
            AntiCheatEventType::Screenshot => "screenshot",
            AntiCheatEventType::FullscreenExit => "fullscreen_exit",
            AntiCheatEventType::WindowBlur => "window_blur",
            AntiCheatEventType::ContextMenu => "context_menu",
        }
    }
}

impl fmt::Display for AntiCheatEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AntiCheatEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|t| t.as_str()).collect();
                format!("Invalid event type. Must be one of: {}", valid.join(", "))
            })
    }
}

/// One entry of the append-only anti-cheat log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntiCheatEvent {
    #[serde(rename = "type")]
    pub event_type: AntiCheatEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

/// Represents the 'attempts' table: one student's timed try at one exam.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Attempt {
    pub id: Uuid,
    pub exam_id: i64,
    pub user_id: i64,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,

    /// Secret needed to reattach to the attempt.
    /// Never serialized with the attempt; handed out once by `start`.
    #[serde(skip_serializing)]
    pub resume_token: String,

    pub score: Option<f64>,
    pub percentage: Option<f64>,

    /// Stored as a JSONB array.
    pub anti_cheat_events: Json<Vec<AntiCheatEvent>>,

    /// Late code that allowed the attempt outside the exam window.
    pub late_code_id: Option<Uuid>,
}

impl Attempt {
    pub fn new(
        exam_id: i64,
        user_id: i64,
        started_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        resume_token: String,
        late_code_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            exam_id,
            user_id,
            status: AttemptStatus::Started,
            started_at,
            expires_at,
            submitted_at: None,
            resume_token,
            score: None,
            percentage: None,
            anti_cheat_events: Json(Vec::new()),
            late_code_id,
        }
    }

    /// Expiry is a computed predicate, re-checked on every access.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == AttemptStatus::Started && !self.is_past_deadline(now)
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}

/// Aggregate grading outcome of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub total_points: f64,
    pub percentage: f64,
    pub correct_count: usize,
    pub total_questions: usize,
    pub answered_count: usize,
}

/// Attempt plus its saved responses, as returned by resume and get.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptSnapshot {
    pub attempt: Attempt,
    pub responses: Vec<QuestionResponse>,
    pub remaining_seconds: i64,
}

/// Result of `start`.
#[derive(Debug, Clone, Serialize)]
pub struct StartedAttempt {
    pub attempt_id: Uuid,
    pub resume_token: String,
    pub expires_at: DateTime<Utc>,
    /// True when an in-progress attempt was returned instead of a new one.
    pub existing: bool,
}

/// Result of `submit` (or of an auto-submit).
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    pub attempt: Attempt,
    pub evaluation: Evaluation,
    pub responses: Vec<QuestionResponse>,
}

/// Result of recording an anti-cheat event.
#[derive(Debug, Clone, Serialize)]
pub struct AntiCheatOutcome {
    pub event: AntiCheatEvent,
    pub violation_score: u32,
    pub auto_submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission: Option<SubmissionResult>,
}

/// Attempt review shown once the results gate opens.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptReview {
    pub attempt: Attempt,
    /// Questions with their answer key.
    pub questions: Vec<Question>,
    pub responses: Vec<QuestionResponse>,
    /// Present once the attempt has been graded.
    pub evaluation: Option<Evaluation>,
}

/// Where the client should go to continue an attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ResumeRedirect {
    pub redirect_url: String,
    pub attempt_id: Uuid,
    pub exam_id: i64,
}

/// DTO for starting (or re-joining) an attempt.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct StartAttemptRequest {
    pub exam_id: i64,
    /// Late access code, needed only outside the exam window.
    #[validate(length(min = 1, max = 32))]
    pub late_code: Option<String>,
}

/// DTO for resuming an attempt after a disconnect.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResumeAttemptRequest {
    #[validate(length(min = 1, max = 128, message = "resume_token is required"))]
    pub resume_token: String,
}

/// DTO for one answer, used by save and by submit.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct AnswerPayload {
    pub question_id: i64,
    pub selected_option_id: Option<i64>,
    #[validate(length(max = 10000))]
    pub text_response: Option<String>,
    /// Seconds spent on the question.
    #[validate(range(min = 0, max = 86400))]
    #[serde(default)]
    pub time_spent: i32,
}

/// DTO for saving an answer during an attempt.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SaveAnswerRequest {
    pub attempt_id: Uuid,
    #[serde(flatten)]
    #[validate(nested)]
    pub answer: AnswerPayload,
}

/// DTO for reporting an anti-cheat signal.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AntiCheatEventRequest {
    #[serde(rename = "type")]
    #[validate(length(min = 1, max = 32, message = "event type is required"))]
    pub event_type: String,
    #[schema(value_type = Object)]
    pub data: Option<serde_json::Value>,
}

/// DTO for submitting an attempt.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SubmitAttemptRequest {
    #[validate(nested)]
    pub responses: Vec<AnswerPayload>,
}

/// DTO for resolving a resume link.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ResumeRedirectRequest {
    #[validate(length(min = 1, max = 128, message = "Token is required"))]
    pub token: String,
}

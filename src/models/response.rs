// src/models/response.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::{models::attempt::AnswerPayload, utils::html::serialize_clean};

/// Represents the 'responses' table.
/// Unique per (attempt_id, question_id); re-saving overwrites.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct QuestionResponse {
    pub id: Uuid,
    pub attempt_id: Uuid,
    pub question_id: i64,
    pub selected_option_id: Option<i64>,

    /// Stored and graded as typed; sanitized only when serialized.
    #[serde(serialize_with = "serialize_clean")]
    pub text_response: Option<String>,

    /// Filled in when the attempt is graded.
    pub is_correct: Option<bool>,

    /// Seconds spent on the question.
    pub time_spent: i32,
    pub updated_at: DateTime<Utc>,
}

impl QuestionResponse {
    /// Builds a fresh, ungraded response from a client answer.
    pub fn from_answer(attempt_id: Uuid, answer: &AnswerPayload, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            attempt_id,
            question_id: answer.question_id,
            selected_option_id: answer.selected_option_id,
            text_response: answer.text_response.clone(),
            is_correct: None,
            time_spent: answer.time_spent,
            updated_at: at,
        }
    }
}

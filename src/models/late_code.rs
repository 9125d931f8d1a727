// src/models/late_code.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "late_code_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LateCodeStatus {
    Active,
    Deactivated,
}

/// One redemption of a late code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LateCodeUsage {
    pub user_id: i64,
    pub used_at: DateTime<Utc>,
}

/// Represents the 'late_codes' table.
/// A bounded-use exception to an exam's window.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LateCode {
    pub id: Uuid,
    pub exam_id: i64,

    /// Normalized (trimmed, uppercase) code.
    pub code: String,

    pub generated_by: i64,

    /// Never negative.
    pub usages_remaining: i32,

    pub expires_at: DateTime<Utc>,

    /// When set, only this user may redeem the code.
    pub assigned_user_id: Option<i64>,

    pub reason: Option<String>,
    pub status: LateCodeStatus,

    /// Stored as a JSONB array.
    pub usage_history: Json<Vec<LateCodeUsage>>,

    pub created_at: DateTime<Utc>,
}

impl LateCode {
    pub fn used_by(&self, user_id: i64) -> bool {
        self.usage_history.iter().any(|u| u.user_id == user_id)
    }
}

/// Parameters for issuing a code; unset fields fall back to registry defaults.
#[derive(Debug, Clone, Default)]
pub struct LateCodeOptions {
    pub usages_remaining: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub assigned_user_id: Option<i64>,
    pub reason: Option<String>,
}

/// DTO for generating a late code.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct GenerateLateCodeRequest {
    #[validate(range(min = 1, message = "Invalid examId"))]
    pub exam_id: i64,
    #[validate(range(min = 1, max = 1000))]
    pub usages_remaining: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    #[validate(range(min = 1, message = "Invalid assignedUserId"))]
    pub assigned_user_id: Option<i64>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

impl From<GenerateLateCodeRequest> for LateCodeOptions {
    fn from(req: GenerateLateCodeRequest) -> Self {
        Self {
            usages_remaining: req.usages_remaining,
            expires_at: req.expires_at,
            assigned_user_id: req.assigned_user_id,
            reason: req.reason,
        }
    }
}

/// DTO for validating (redeeming) a late code.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ValidateLateCodeRequest {
    #[validate(length(min = 1, max = 32, message = "code is required"))]
    pub code: String,
    #[validate(range(min = 1, message = "Invalid examId"))]
    pub exam_id: i64,
}

/// Query for listing the codes of one exam.
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LateCodeListQuery {
    pub exam_id: i64,
}

/// Public view returned after a successful redemption.
#[derive(Debug, Serialize)]
pub struct LateCodeGrant {
    pub exam_id: i64,
    pub expires_at: DateTime<Utc>,
    pub usages_remaining: i32,
}

impl From<&LateCode> for LateCodeGrant {
    fn from(code: &LateCode) -> Self {
        Self {
            exam_id: code.exam_id,
            expires_at: code.expires_at,
            usages_remaining: code.usages_remaining,
        }
    }
}

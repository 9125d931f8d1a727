// src/store/mod.rs

//! Storage ports.
//!
//! Every method returns plain values. Methods that change an attempt or a
//! late code are conditional single units at the store: they either apply
//! against the state they guard on or return `None`, so callers never do an
//! unguarded read-modify-write.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    error::StoreResult,
    models::{
        attempt::{AntiCheatEvent, Attempt, AttemptStatus},
        exam::{Exam, Question},
        late_code::LateCode,
        response::QuestionResponse,
        user::Identity,
    },
};

/// Outcome of grading, produced inside `AttemptStore::complete_attempt`.
#[derive(Debug, Clone)]
pub struct GradedSubmission {
    /// Every response of the attempt, with `is_correct` filled in.
    pub responses: Vec<QuestionResponse>,
    pub score: f64,
    pub percentage: f64,
}

/// Turns the saved responses into the graded submission.
/// Runs while the store holds the attempt, so it must be pure.
pub type Finalizer<'a> = dyn Fn(Vec<QuestionResponse>) -> GradedSubmission + Send + Sync + 'a;

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Inserts a new attempt.
    /// Fails with `StoreError::Duplicate` when the (user, exam) pair already
    /// has a non-abandoned attempt.
    async fn create_attempt(&self, attempt: &Attempt) -> StoreResult<Attempt>;

    async fn find_attempt(&self, id: Uuid) -> StoreResult<Option<Attempt>>;

    /// The non-abandoned attempt of a (user, exam) pair, if any.
    async fn find_current_attempt(&self, user_id: i64, exam_id: i64)
    -> StoreResult<Option<Attempt>>;

    async fn find_by_resume_token(&self, token: &str) -> StoreResult<Option<Attempt>>;

    async fn list_responses(&self, attempt_id: Uuid) -> StoreResult<Vec<QuestionResponse>>;

    /// Inserts or overwrites the response for (attempt, question).
    /// Applies only while the attempt is STARTED and `now` is within its
    /// deadline; returns `None` otherwise.
    async fn upsert_response(
        &self,
        response: &QuestionResponse,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QuestionResponse>>;

    /// Appends to the anti-cheat log of a STARTED attempt.
    async fn append_event(
        &self,
        attempt_id: Uuid,
        event: &AntiCheatEvent,
    ) -> StoreResult<Option<Attempt>>;

    /// Compare-and-swap on the status.
    async fn transition(
        &self,
        attempt_id: Uuid,
        from: AttemptStatus,
        to: AttemptStatus,
    ) -> StoreResult<Option<Attempt>>;

    /// Grades and completes a STARTED attempt as one unit.
    ///
    /// Holds the attempt, reads its responses, applies `finalize`, writes the
    /// graded responses and sets COMPLETED/submitted_at/score/percentage.
    /// Returns `None` when the attempt was no longer STARTED.
    async fn complete_attempt(
        &self,
        attempt_id: Uuid,
        submitted_at: DateTime<Utc>,
        finalize: &Finalizer<'_>,
    ) -> StoreResult<Option<(Attempt, Vec<QuestionResponse>)>>;
}

#[async_trait]
pub trait LateCodeStore: Send + Sync {
    /// Fails with `StoreError::Duplicate` when (exam_id, code) is taken.
    async fn create_late_code(&self, code: &LateCode) -> StoreResult<LateCode>;

    async fn find_late_code(&self, id: Uuid) -> StoreResult<Option<LateCode>>;

    async fn find_by_code(&self, exam_id: i64, code: &str) -> StoreResult<Option<LateCode>>;

    /// An ACTIVE, unexpired code of the exam already redeemed by the user.
    async fn find_redeemed(
        &self,
        exam_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LateCode>>;

    async fn list_late_codes(&self, exam_id: i64) -> StoreResult<Vec<LateCode>>;

    /// Decrements `usages_remaining` and records the user, as one unit.
    ///
    /// Re-checks status, expiry, remaining uses, assignment and prior use;
    /// returns `None` if any of them no longer allows the redemption.
    async fn redeem(
        &self,
        id: Uuid,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LateCode>>;

    async fn deactivate(&self, id: Uuid) -> StoreResult<Option<LateCode>>;
}

/// Read-only view of the exam catalog owned by the CRUD layer.
#[async_trait]
pub trait ExamCatalog: Send + Sync {
    async fn get_exam(&self, exam_id: i64) -> StoreResult<Option<Exam>>;

    /// Questions ordered by position, options attached.
    async fn get_questions(&self, exam_id: i64) -> StoreResult<Vec<Question>>;

    /// Whether `who` may manage the exam (issue late codes, review).
    async fn can_manage_exam(&self, exam: &Exam, who: &Identity) -> StoreResult<bool>;
}

// src/store/memory.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AttemptStore, ExamCatalog, Finalizer, LateCodeStore};
use crate::{
    error::{StoreError, StoreResult},
    models::{
        attempt::{AntiCheatEvent, Attempt, AttemptStatus},
        exam::{Exam, Question},
        late_code::{LateCode, LateCodeStatus, LateCodeUsage},
        response::QuestionResponse,
        user::Identity,
    },
};

#[derive(Debug, Default)]
struct Data {
    exams: HashMap<i64, Exam>,
    questions: HashMap<i64, Vec<Question>>,
    attempts: HashMap<Uuid, Attempt>,
    // keyed by (attempt_id, question_id)
    responses: HashMap<(Uuid, i64), QuestionResponse>,
    late_codes: HashMap<Uuid, LateCode>,
}

impl Data {
    fn responses_of(&self, attempt_id: Uuid) -> Vec<QuestionResponse> {
        let mut out: Vec<QuestionResponse> = self
            .responses
            .values()
            .filter(|r| r.attempt_id == attempt_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.question_id);
        out
    }
}

/// In-process implementation of every storage port.
///
/// One lock guards all maps, so each method is a single atomic unit just
/// like the conditional statements of the Postgres adapter.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the catalog. Questions are sorted by position.
    pub async fn insert_exam(&self, exam: Exam, mut questions: Vec<Question>) {
        questions.sort_by_key(|q| q.position);
        let mut data = self.data.lock().await;
        data.questions.insert(exam.id, questions);
        data.exams.insert(exam.id, exam);
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn create_attempt(&self, attempt: &Attempt) -> StoreResult<Attempt> {
        let mut data = self.data.lock().await;
        let taken = data.attempts.values().any(|a| {
            a.user_id == attempt.user_id
                && a.exam_id == attempt.exam_id
                && a.status != AttemptStatus::Abandoned
        });
        if taken || data.attempts.contains_key(&attempt.id) {
            return Err(StoreError::Duplicate);
        }
        data.attempts.insert(attempt.id, attempt.clone());
        Ok(attempt.clone())
    }

    async fn find_attempt(&self, id: Uuid) -> StoreResult<Option<Attempt>> {
        let data = self.data.lock().await;
        Ok(data.attempts.get(&id).cloned())
    }

    async fn find_current_attempt(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> StoreResult<Option<Attempt>> {
        let data = self.data.lock().await;
        Ok(data
            .attempts
            .values()
            .find(|a| {
                a.user_id == user_id && a.exam_id == exam_id && a.status != AttemptStatus::Abandoned
            })
            .cloned())
    }

    async fn find_by_resume_token(&self, token: &str) -> StoreResult<Option<Attempt>> {
        let data = self.data.lock().await;
        Ok(data
            .attempts
            .values()
            .find(|a| a.resume_token == token)
            .cloned())
    }

    async fn list_responses(&self, attempt_id: Uuid) -> StoreResult<Vec<QuestionResponse>> {
        let data = self.data.lock().await;
        Ok(data.responses_of(attempt_id))
    }

    async fn upsert_response(
        &self,
        response: &QuestionResponse,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QuestionResponse>> {
        let mut data = self.data.lock().await;
        let live = data
            .attempts
            .get(&response.attempt_id)
            .is_some_and(|a| a.is_live(now));
        if !live {
            return Ok(None);
        }

        let key = (response.attempt_id, response.question_id);
        let stored = match data.responses.get(&key) {
            // keep the row identity, overwrite every answer field
            Some(existing) => QuestionResponse {
                id: existing.id,
                ..response.clone()
            },
            None => response.clone(),
        };
        data.responses.insert(key, stored.clone());
        Ok(Some(stored))
    }

    async fn append_event(
        &self,
        attempt_id: Uuid,
        event: &AntiCheatEvent,
    ) -> StoreResult<Option<Attempt>> {
        let mut data = self.data.lock().await;
        match data.attempts.get_mut(&attempt_id) {
            Some(attempt) if attempt.status == AttemptStatus::Started => {
                attempt.anti_cheat_events.0.push(event.clone());
                Ok(Some(attempt.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn transition(
        &self,
        attempt_id: Uuid,
        from: AttemptStatus,
        to: AttemptStatus,
    ) -> StoreResult<Option<Attempt>> {
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition { from, to });
        }
        let mut data = self.data.lock().await;
        match data.attempts.get_mut(&attempt_id) {
            Some(attempt) if attempt.status == from => {
                attempt.status = to;
                Ok(Some(attempt.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn complete_attempt(
        &self,
        attempt_id: Uuid,
        submitted_at: DateTime<Utc>,
        finalize: &Finalizer<'_>,
    ) -> StoreResult<Option<(Attempt, Vec<QuestionResponse>)>> {
        let mut data = self.data.lock().await;
        let started = data
            .attempts
            .get(&attempt_id)
            .is_some_and(|a| a.status.can_transition_to(AttemptStatus::Completed));
        if !started {
            return Ok(None);
        }

        let graded = finalize(data.responses_of(attempt_id));
        for response in &graded.responses {
            let key = (attempt_id, response.question_id);
            let stored = match data.responses.get(&key) {
                Some(existing) => QuestionResponse {
                    id: existing.id,
                    ..response.clone()
                },
                None => response.clone(),
            };
            data.responses.insert(key, stored);
        }

        let Some(attempt) = data.attempts.get_mut(&attempt_id) else {
            return Ok(None);
        };
        attempt.status = AttemptStatus::Completed;
        attempt.submitted_at = Some(submitted_at);
        attempt.score = Some(graded.score);
        attempt.percentage = Some(graded.percentage);
        let attempt = attempt.clone();

        Ok(Some((attempt, data.responses_of(attempt_id))))
    }
}

#[async_trait]
impl LateCodeStore for MemoryStore {
    async fn create_late_code(&self, code: &LateCode) -> StoreResult<LateCode> {
        let mut data = self.data.lock().await;
        let taken = data
            .late_codes
            .values()
            .any(|c| c.exam_id == code.exam_id && c.code == code.code);
        if taken {
            return Err(StoreError::Duplicate);
        }
        data.late_codes.insert(code.id, code.clone());
        Ok(code.clone())
    }

    async fn find_late_code(&self, id: Uuid) -> StoreResult<Option<LateCode>> {
        let data = self.data.lock().await;
        Ok(data.late_codes.get(&id).cloned())
    }

    async fn find_by_code(&self, exam_id: i64, code: &str) -> StoreResult<Option<LateCode>> {
        let data = self.data.lock().await;
        Ok(data
            .late_codes
            .values()
            .find(|c| c.exam_id == exam_id && c.code == code)
            .cloned())
    }

    async fn find_redeemed(
        &self,
        exam_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LateCode>> {
        let data = self.data.lock().await;
        Ok(data
            .late_codes
            .values()
            .filter(|c| {
                c.exam_id == exam_id
                    && c.status == LateCodeStatus::Active
                    && c.expires_at > now
                    && c.used_by(user_id)
            })
            .max_by_key(|c| c.expires_at)
            .cloned())
    }

    async fn list_late_codes(&self, exam_id: i64) -> StoreResult<Vec<LateCode>> {
        let data = self.data.lock().await;
        let mut codes: Vec<LateCode> = data
            .late_codes
            .values()
            .filter(|c| c.exam_id == exam_id)
            .cloned()
            .collect();
        codes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(codes)
    }

    async fn redeem(
        &self,
        id: Uuid,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LateCode>> {
        let mut data = self.data.lock().await;
        let Some(code) = data.late_codes.get_mut(&id) else {
            return Ok(None);
        };
        let redeemable = code.status == LateCodeStatus::Active
            && code.expires_at > now
            && code.usages_remaining > 0
            && code.assigned_user_id.is_none_or(|assigned| assigned == user_id)
            && !code.used_by(user_id);
        if !redeemable {
            return Ok(None);
        }

        code.usages_remaining -= 1;
        code.usage_history.0.push(LateCodeUsage {
            user_id,
            used_at: now,
        });
        Ok(Some(code.clone()))
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<Option<LateCode>> {
        let mut data = self.data.lock().await;
        Ok(data.late_codes.get_mut(&id).map(|code| {
            code.status = LateCodeStatus::Deactivated;
            code.clone()
        }))
    }
}

#[async_trait]
impl ExamCatalog for MemoryStore {
    async fn get_exam(&self, exam_id: i64) -> StoreResult<Option<Exam>> {
        let data = self.data.lock().await;
        Ok(data.exams.get(&exam_id).cloned())
    }

    async fn get_questions(&self, exam_id: i64) -> StoreResult<Vec<Question>> {
        let data = self.data.lock().await;
        Ok(data.questions.get(&exam_id).cloned().unwrap_or_default())
    }

    async fn can_manage_exam(&self, exam: &Exam, who: &Identity) -> StoreResult<bool> {
        Ok(exam.is_managed_by(who))
    }
}

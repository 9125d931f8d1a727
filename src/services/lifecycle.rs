// src/services/lifecycle.rs

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use url::Url;
use uuid::Uuid;

use crate::{
    error::{ServiceError, ServiceResult, StoreError},
    models::{
        attempt::{
            AnswerPayload, AntiCheatOutcome, Attempt, AttemptReview, AttemptSnapshot,
            AttemptStatus, ResumeRedirect, StartedAttempt, SubmissionResult,
        },
        exam::{CloseMode, Exam, Question},
        response::QuestionResponse,
        user::Identity,
    },
    services::{
        anti_cheat::AntiCheatMonitor,
        grader::{Grader, stored_evaluation},
        late_code::LateCodeRegistry,
        results::results_gate,
    },
    store::{AttemptStore, ExamCatalog, GradedSubmission},
    utils::{
        clock::Clock,
        code::{constant_time_eq, generate_resume_token},
    },
};

/// Drives an attempt from start to a terminal state.
///
/// Expiry is lazy: every path that depends on liveness re-checks the
/// deadline and moves an overdue STARTED attempt to EXPIRED.
#[derive(Clone)]
pub struct AttemptLifecycle {
    store: Arc<dyn AttemptStore>,
    catalog: Arc<dyn ExamCatalog>,
    late_codes: Arc<LateCodeRegistry>,
    monitor: AntiCheatMonitor,
    grader: Grader,
    clock: Arc<dyn Clock>,
    frontend_url: Url,
}

impl AttemptLifecycle {
    pub fn new(
        store: Arc<dyn AttemptStore>,
        catalog: Arc<dyn ExamCatalog>,
        late_codes: Arc<LateCodeRegistry>,
        monitor: AntiCheatMonitor,
        grader: Grader,
        clock: Arc<dyn Clock>,
        frontend_url: Url,
    ) -> Self {
        Self {
            store,
            catalog,
            late_codes,
            monitor,
            grader,
            clock,
            frontend_url,
        }
    }

    async fn exam(&self, exam_id: i64) -> ServiceResult<Exam> {
        self.catalog
            .get_exam(exam_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Exam not found".to_string()))
    }

    async fn attempt(&self, attempt_id: Uuid) -> ServiceResult<Attempt> {
        self.store
            .find_attempt(attempt_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Attempt not found".to_string()))
    }

    async fn owned_attempt(&self, attempt_id: Uuid, user_id: i64) -> ServiceResult<Attempt> {
        let attempt = self.attempt(attempt_id).await?;
        if attempt.user_id != user_id {
            return Err(ServiceError::Unauthorized(
                "Unauthorized access to attempt".to_string(),
            ));
        }
        Ok(attempt)
    }

    /// Owner, or staff managing the attempt's exam. The flag tells
    /// whether the caller reviews as staff.
    async fn viewable_attempt(
        &self,
        attempt_id: Uuid,
        who: &Identity,
    ) -> ServiceResult<(Attempt, bool)> {
        let attempt = self.attempt(attempt_id).await?;
        let reviewer = if who.role.is_privileged() {
            let exam = self.exam(attempt.exam_id).await?;
            self.catalog.can_manage_exam(&exam, who).await?
        } else {
            false
        };
        if attempt.user_id != who.user_id && !reviewer {
            return Err(ServiceError::Unauthorized(
                "Unauthorized access to attempt".to_string(),
            ));
        }
        Ok((attempt, reviewer))
    }

    /// Moves a STARTED attempt to EXPIRED and returns the current record.
    async fn expire(&self, attempt: &Attempt) -> ServiceResult<Attempt> {
        match self
            .store
            .transition(attempt.id, AttemptStatus::Started, AttemptStatus::Expired)
            .await?
        {
            Some(expired) => {
                tracing::info!("Attempt {} expired (deadline {})", expired.id, expired.expires_at);
                Ok(expired)
            }
            None => self.attempt(attempt.id).await,
        }
    }

    /// Applies lazy expiry.
    async fn refresh(&self, attempt: Attempt, now: DateTime<Utc>) -> ServiceResult<Attempt> {
        if attempt.status.can_transition_to(AttemptStatus::Expired)
            && attempt.is_past_deadline(now)
        {
            self.expire(&attempt).await
        } else {
            Ok(attempt)
        }
    }

    async fn snapshot(&self, attempt: Attempt, now: DateTime<Utc>) -> ServiceResult<AttemptSnapshot> {
        let responses = self.store.list_responses(attempt.id).await?;
        let remaining_seconds = if attempt.is_live(now) {
            attempt.remaining_seconds(now)
        } else {
            0
        };
        Ok(AttemptSnapshot {
            attempt,
            responses,
            remaining_seconds,
        })
    }

    fn started(attempt: &Attempt, existing: bool) -> StartedAttempt {
        StartedAttempt {
            attempt_id: attempt.id,
            resume_token: attempt.resume_token.clone(),
            expires_at: attempt.expires_at,
            existing,
        }
    }

    /// Answers a start request that found a current attempt.
    async fn rejoin(&self, existing: Attempt, now: DateTime<Utc>) -> ServiceResult<StartedAttempt> {
        match existing.status {
            AttemptStatus::Started if !existing.is_past_deadline(now) => {
                tracing::info!(
                    "User {} rejoined attempt {} on exam {}",
                    existing.user_id,
                    existing.id,
                    existing.exam_id
                );
                Ok(Self::started(&existing, true))
            }
            AttemptStatus::Started => {
                self.expire(&existing).await?;
                Err(ServiceError::InvalidState("Attempt has expired".to_string()))
            }
            _ => Err(ServiceError::InvalidState(
                "Exam already attempted".to_string(),
            )),
        }
    }

    /// Starts an attempt, or returns the one already in progress.
    pub async fn start(
        &self,
        user_id: i64,
        exam_id: i64,
        late_code: Option<&str>,
    ) -> ServiceResult<StartedAttempt> {
        let now = self.clock.now();
        let exam = self.exam(exam_id).await?;

        if let Some(existing) = self.store.find_current_attempt(user_id, exam_id).await? {
            return self.rejoin(existing, now).await;
        }

        if now < exam.start_time {
            return Err(ServiceError::WindowClosed(
                "Exam has not started yet".to_string(),
            ));
        }

        let (cap, late_code_id) = if exam.window_contains(now) {
            match exam.close_mode {
                CloseMode::Strict => (Some(exam.end_time), None),
                CloseMode::Permissive => (None, None),
            }
        } else {
            match self.late_codes.late_access(exam_id, user_id, late_code).await? {
                Some(code) => (Some(code.expires_at), Some(code.id)),
                None => {
                    return Err(ServiceError::WindowClosed("Exam has ended".to_string()));
                }
            }
        };

        let full = now + exam.duration();
        let expires_at = cap.map_or(full, |cap| full.min(cap));
        let attempt = Attempt::new(
            exam_id,
            user_id,
            now,
            expires_at,
            generate_resume_token(),
            late_code_id,
        );

        match self.store.create_attempt(&attempt).await {
            Ok(created) => {
                tracing::info!(
                    "Attempt {} started by user {} on exam {} (expires {})",
                    created.id,
                    user_id,
                    exam_id,
                    created.expires_at
                );
                Ok(Self::started(&created, false))
            }
            Err(StoreError::Duplicate) => {
                // A concurrent start won; hand back its attempt.
                let winner = self
                    .store
                    .find_current_attempt(user_id, exam_id)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::Conflict("Attempt changed during start, retry".to_string())
                    })?;
                self.rejoin(winner, now).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reattaches to an attempt after a disconnect. Never mutates a live attempt.
    pub async fn resume(
        &self,
        attempt_id: Uuid,
        resume_token: &str,
        user_id: i64,
    ) -> ServiceResult<AttemptSnapshot> {
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        if !constant_time_eq(&attempt.resume_token, resume_token) {
            return Err(ServiceError::Unauthorized("Invalid resume token".to_string()));
        }
        if attempt.status != AttemptStatus::Started {
            return Err(ServiceError::InvalidState(
                "Attempt is not in progress".to_string(),
            ));
        }

        let now = self.clock.now();
        if attempt.is_past_deadline(now) {
            self.expire(&attempt).await?;
            return Err(ServiceError::Expired("Attempt has expired".to_string()));
        }
        self.snapshot(attempt, now).await
    }

    /// Owner or privileged reader.
    pub async fn get_attempt(&self, attempt_id: Uuid, who: &Identity) -> ServiceResult<AttemptSnapshot> {
        let now = self.clock.now();
        let (attempt, _) = self.viewable_attempt(attempt_id, who).await?;
        let attempt = self.refresh(attempt, now).await?;
        self.snapshot(attempt, now).await
    }

    /// Checks that an answer refers to the exam's own question and option.
    fn check_answer(questions: &[Question], answer: &AnswerPayload) -> ServiceResult<()> {
        let question = questions
            .iter()
            .find(|q| q.id == answer.question_id)
            .ok_or_else(|| {
                ServiceError::Validation("Question does not belong to this exam".to_string())
            })?;
        if answer
            .selected_option_id
            .is_some_and(|option_id| question.option(option_id).is_none())
        {
            return Err(ServiceError::Validation(
                "Option does not belong to this question".to_string(),
            ));
        }
        Ok(())
    }

    fn not_in_progress(attempt: &Attempt) -> ServiceError {
        match attempt.status {
            AttemptStatus::Expired => ServiceError::InvalidState("Attempt has expired".to_string()),
            AttemptStatus::Completed => {
                ServiceError::InvalidState("Attempt is already completed".to_string())
            }
            _ => ServiceError::InvalidState("Attempt is not in progress".to_string()),
        }
    }

    /// Upserts one answer; the last write for a question wins.
    pub async fn save_answer(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        answer: &AnswerPayload,
    ) -> ServiceResult<QuestionResponse> {
        let now = self.clock.now();
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        let attempt = self.refresh(attempt, now).await?;
        if attempt.status != AttemptStatus::Started {
            return Err(Self::not_in_progress(&attempt));
        }

        let questions = self.catalog.get_questions(attempt.exam_id).await?;
        Self::check_answer(&questions, answer)?;

        let response = QuestionResponse::from_answer(attempt.id, answer, now);
        match self.store.upsert_response(&response, now).await? {
            Some(saved) => Ok(saved),
            None => {
                let current = self.attempt(attempt.id).await?;
                Err(Self::not_in_progress(&current))
            }
        }
    }

    /// Appends an anti-cheat event and enforces the violation threshold.
    pub async fn record_anti_cheat_event(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        event_type: &str,
        data: Option<serde_json::Value>,
    ) -> ServiceResult<AntiCheatOutcome> {
        let now = self.clock.now();
        let event = self.monitor.build_event(event_type, data, now)?;

        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        let attempt = self.refresh(attempt, now).await?;
        if attempt.status != AttemptStatus::Started {
            return Err(Self::not_in_progress(&attempt));
        }

        let Some(updated) = self.store.append_event(attempt.id, &event).await? else {
            let current = self.attempt(attempt.id).await?;
            return Err(Self::not_in_progress(&current));
        };

        let violation_score = self.monitor.violation_score(&updated.anti_cheat_events.0);
        if !self.monitor.threshold_exceeded(violation_score) {
            return Ok(AntiCheatOutcome {
                event,
                violation_score,
                auto_submitted: false,
                submission: None,
            });
        }

        tracing::warn!(
            "Attempt {} exceeded the violation threshold (score {}), auto-submitting",
            updated.id,
            violation_score
        );
        let submission = self.complete(&updated, Vec::new(), now).await?;
        Ok(AntiCheatOutcome {
            event,
            violation_score,
            auto_submitted: true,
            submission: Some(submission),
        })
    }

    /// Grades and completes the attempt. Idempotent once COMPLETED.
    pub async fn submit(
        &self,
        attempt_id: Uuid,
        user_id: i64,
        answers: &[AnswerPayload],
    ) -> ServiceResult<SubmissionResult> {
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        match attempt.status {
            AttemptStatus::Completed => return self.stored_result(attempt).await,
            AttemptStatus::Started => {}
            _ => return Err(Self::not_in_progress(&attempt)),
        }

        let now = self.clock.now();
        if attempt.is_past_deadline(now) {
            let current = self.expire(&attempt).await?;
            return match current.status {
                AttemptStatus::Completed => self.stored_result(current).await,
                _ => Err(Self::not_in_progress(&current)),
            };
        }

        let questions = self.catalog.get_questions(attempt.exam_id).await?;
        for answer in answers {
            Self::check_answer(&questions, answer)?;
        }
        let supplied: Vec<QuestionResponse> = answers
            .iter()
            .map(|a| QuestionResponse::from_answer(attempt.id, a, now))
            .collect();

        self.complete(&attempt, supplied, now).await
    }

    /// Runs the status-guarded completion; a lost race falls back to the
    /// stored result when someone else completed the attempt.
    async fn complete(
        &self,
        attempt: &Attempt,
        supplied: Vec<QuestionResponse>,
        now: DateTime<Utc>,
    ) -> ServiceResult<SubmissionResult> {
        let questions = self.catalog.get_questions(attempt.exam_id).await?;
        let grader = &self.grader;
        let finalize = |saved: Vec<QuestionResponse>| {
            let grade = grader.grade(&questions, merge_responses(saved, &supplied));
            GradedSubmission {
                responses: grade.responses,
                score: grade.evaluation.score,
                percentage: grade.evaluation.percentage,
            }
        };

        match self.store.complete_attempt(attempt.id, now, &finalize).await? {
            Some((completed, responses)) => {
                tracing::info!(
                    "Attempt {} completed with score {:?} ({:?}%)",
                    completed.id,
                    completed.score,
                    completed.percentage
                );
                let evaluation = stored_evaluation(
                    &questions,
                    &responses,
                    completed.score.unwrap_or(0.0),
                    completed.percentage.unwrap_or(0.0),
                );
                Ok(SubmissionResult {
                    attempt: completed,
                    evaluation,
                    responses,
                })
            }
            None => {
                let current = self.attempt(attempt.id).await?;
                match current.status {
                    AttemptStatus::Completed => self.stored_result(current).await,
                    _ => Err(Self::not_in_progress(&current)),
                }
            }
        }
    }

    /// Rebuilds the result of a graded attempt without grading again.
    async fn stored_result(&self, attempt: Attempt) -> ServiceResult<SubmissionResult> {
        let questions = self.catalog.get_questions(attempt.exam_id).await?;
        let responses = self.store.list_responses(attempt.id).await?;
        let evaluation = stored_evaluation(
            &questions,
            &responses,
            attempt.score.unwrap_or(0.0),
            attempt.percentage.unwrap_or(0.0),
        );
        Ok(SubmissionResult {
            attempt,
            evaluation,
            responses,
        })
    }

    /// Gives up a STARTED attempt so a new one may be started.
    pub async fn abandon(&self, attempt_id: Uuid, user_id: i64) -> ServiceResult<Attempt> {
        let now = self.clock.now();
        let attempt = self.owned_attempt(attempt_id, user_id).await?;
        let attempt = self.refresh(attempt, now).await?;
        if !attempt.status.can_transition_to(AttemptStatus::Abandoned) {
            return Err(Self::not_in_progress(&attempt));
        }

        match self
            .store
            .transition(attempt.id, AttemptStatus::Started, AttemptStatus::Abandoned)
            .await?
        {
            Some(abandoned) => {
                tracing::info!("Attempt {} abandoned by user {}", abandoned.id, user_id);
                Ok(abandoned)
            }
            None => {
                let current = self.attempt(attempt.id).await?;
                Err(Self::not_in_progress(&current))
            }
        }
    }

    /// Attempt review behind the results gate.
    pub async fn results(&self, attempt_id: Uuid, who: &Identity) -> ServiceResult<AttemptReview> {
        let now = self.clock.now();
        let (attempt, reviewer) = self.viewable_attempt(attempt_id, who).await?;
        let attempt = self.refresh(attempt, now).await?;
        let exam = self.exam(attempt.exam_id).await?;

        let gate = results_gate(&exam, reviewer, now);
        if gate.blocked {
            return Err(ServiceError::ResultsWithheld(gate));
        }

        let questions = self.catalog.get_questions(exam.id).await?;
        let responses = self.store.list_responses(attempt.id).await?;
        let evaluation = (attempt.status == AttemptStatus::Completed).then(|| {
            stored_evaluation(
                &questions,
                &responses,
                attempt.score.unwrap_or(0.0),
                attempt.percentage.unwrap_or(0.0),
            )
        });

        Ok(AttemptReview {
            attempt,
            questions,
            responses,
            evaluation,
        })
    }

    /// Resolves a resume link to the page that continues the attempt.
    pub async fn get_resume_redirect(
        &self,
        token: &str,
        current_user: Option<i64>,
    ) -> ServiceResult<ResumeRedirect> {
        let attempt = self
            .store
            .find_by_resume_token(token)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Invalid token".to_string()))?;

        if current_user.is_some_and(|id| id != attempt.user_id) {
            return Err(ServiceError::Forbidden(
                "This attempt belongs to another user".to_string(),
            ));
        }

        let exam = self.exam(attempt.exam_id).await?;
        let redirect_url = take_url(&self.frontend_url, &exam, attempt.id)?;
        Ok(ResumeRedirect {
            redirect_url: redirect_url.to_string(),
            attempt_id: attempt.id,
            exam_id: exam.id,
        })
    }
}

/// Overlays `supplied` answers on the `saved` ones by question id.
fn merge_responses(
    saved: Vec<QuestionResponse>,
    supplied: &[QuestionResponse],
) -> Vec<QuestionResponse> {
    let mut by_question: BTreeMap<i64, QuestionResponse> =
        saved.into_iter().map(|r| (r.question_id, r)).collect();
    for response in supplied {
        by_question.insert(response.question_id, response.clone());
    }
    by_question.into_values().collect()
}

fn take_url(base: &Url, exam: &Exam, attempt_id: Uuid) -> ServiceResult<Url> {
    let path = match exam.class_id {
        Some(class_id) => format!("student/classes/{}/exams/{}/take", class_id, exam.id),
        None => format!("student/exams/{}/take", exam.id),
    };
    let mut url = base
        .join(&path)
        .map_err(|e| ServiceError::Internal(format!("bad frontend url: {}", e)))?;
    url.query_pairs_mut()
        .append_pair("attempt", &attempt_id.to_string());
    Ok(url)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::exam::ExamConfig;

    fn response(question_id: i64, option: i64) -> QuestionResponse {
        QuestionResponse {
            id: Uuid::new_v4(),
            attempt_id: Uuid::nil(),
            question_id,
            selected_option_id: Some(option),
            text_response: None,
            is_correct: None,
            time_spent: 0,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_supplied_answers_take_precedence() {
        let saved = vec![response(1, 10), response(2, 20)];
        let supplied = vec![response(2, 21), response(3, 30)];

        let merged = merge_responses(saved, &supplied);
        let picks: Vec<(i64, Option<i64>)> = merged
            .iter()
            .map(|r| (r.question_id, r.selected_option_id))
            .collect();
        assert_eq!(picks, vec![(1, Some(10)), (2, Some(21)), (3, Some(30))]);
    }

    #[test]
    fn test_take_url() {
        let now = Utc::now();
        let mut exam = Exam {
            id: 5,
            title: "Chemistry".to_string(),
            class_id: Some(9),
            created_by: 1,
            start_time: now,
            end_time: now + Duration::hours(1),
            duration_minutes: 30,
            config: ExamConfig::default(),
            close_mode: CloseMode::Strict,
        };
        let base = Url::parse("https://school.example/").unwrap();
        let id = Uuid::nil();

        let url = take_url(&base, &exam, id).unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://school.example/student/classes/9/exams/5/take?attempt={}", id)
        );

        exam.class_id = None;
        let url = take_url(&base, &exam, id).unwrap();
        assert_eq!(
            url.as_str(),
            format!("https://school.example/student/exams/5/take?attempt={}", id)
        );
    }
}

// src/store/postgres.rs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction, types::Json};
use uuid::Uuid;

use super::{AttemptStore, ExamCatalog, Finalizer, LateCodeStore};
use crate::{
    error::{StoreError, StoreResult},
    models::{
        attempt::{AntiCheatEvent, Attempt, AttemptStatus},
        exam::{AnswerOption, Exam, Question},
        late_code::{LateCode, LateCodeUsage},
        response::QuestionResponse,
        user::Identity,
    },
};

const ATTEMPT_COLUMNS: &str = "id, exam_id, user_id, status, started_at, expires_at, submitted_at, \
     resume_token, score, percentage, anti_cheat_events, late_code_id";

const RESPONSE_COLUMNS: &str =
    "id, attempt_id, question_id, selected_option_id, text_response, is_correct, time_spent, updated_at";

const LATE_CODE_COLUMNS: &str = "id, exam_id, code, generated_by, usages_remaining, expires_at, \
     assigned_user_id, reason, status, usage_history, created_at";

/// Postgres implementation of the storage ports.
///
/// Guards live in the SQL itself (status-conditional `UPDATE`s, upserts on
/// unique keys, `FOR UPDATE` row locks) so concurrent requests cannot lose
/// writes.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Maps unique violations to `StoreError::Duplicate`.
fn map_insert_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate,
        _ => StoreError::Database(err),
    }
}

async fn upsert_graded_response(
    tx: &mut Transaction<'_, Postgres>,
    response: &QuestionResponse,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO responses
            (id, attempt_id, question_id, selected_option_id, text_response, is_correct, time_spent, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (attempt_id, question_id) DO UPDATE SET
            selected_option_id = EXCLUDED.selected_option_id,
            text_response = EXCLUDED.text_response,
            is_correct = EXCLUDED.is_correct,
            time_spent = EXCLUDED.time_spent,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(response.id)
    .bind(response.attempt_id)
    .bind(response.question_id)
    .bind(response.selected_option_id)
    .bind(&response.text_response)
    .bind(response.is_correct)
    .bind(response.time_spent)
    .bind(response.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl AttemptStore for PgStore {
    async fn create_attempt(&self, attempt: &Attempt) -> StoreResult<Attempt> {
        let sql = format!(
            r#"
            INSERT INTO attempts
                (id, exam_id, user_id, status, started_at, expires_at, resume_token, anti_cheat_events, late_code_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Attempt>(&sql)
            .bind(attempt.id)
            .bind(attempt.exam_id)
            .bind(attempt.user_id)
            .bind(attempt.status)
            .bind(attempt.started_at)
            .bind(attempt.expires_at)
            .bind(&attempt.resume_token)
            .bind(&attempt.anti_cheat_events)
            .bind(attempt.late_code_id)
            .fetch_one(&self.pool)
            .await
            .map_err(map_insert_error)
    }

    async fn find_attempt(&self, id: Uuid) -> StoreResult<Option<Attempt>> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE id = $1");
        Ok(sqlx::query_as::<_, Attempt>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_current_attempt(
        &self,
        user_id: i64,
        exam_id: i64,
    ) -> StoreResult<Option<Attempt>> {
        let sql = format!(
            "SELECT {ATTEMPT_COLUMNS} FROM attempts \
             WHERE user_id = $1 AND exam_id = $2 AND status <> 'ABANDONED' LIMIT 1"
        );
        Ok(sqlx::query_as::<_, Attempt>(&sql)
            .bind(user_id)
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_resume_token(&self, token: &str) -> StoreResult<Option<Attempt>> {
        let sql = format!("SELECT {ATTEMPT_COLUMNS} FROM attempts WHERE resume_token = $1");
        Ok(sqlx::query_as::<_, Attempt>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_responses(&self, attempt_id: Uuid) -> StoreResult<Vec<QuestionResponse>> {
        let sql = format!(
            "SELECT {RESPONSE_COLUMNS} FROM responses WHERE attempt_id = $1 ORDER BY question_id"
        );
        Ok(sqlx::query_as::<_, QuestionResponse>(&sql)
            .bind(attempt_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn upsert_response(
        &self,
        response: &QuestionResponse,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<QuestionResponse>> {
        // FOR SHARE makes a concurrent completion wait for us, or us for it.
        let sql = format!(
            r#"
            INSERT INTO responses
                (id, attempt_id, question_id, selected_option_id, text_response, time_spent, updated_at)
            SELECT $1, a.id, $3, $4, $5, $6, $7
            FROM attempts a
            WHERE a.id = $2 AND a.status = 'STARTED' AND a.expires_at >= $7
            FOR SHARE
            ON CONFLICT (attempt_id, question_id) DO UPDATE SET
                selected_option_id = EXCLUDED.selected_option_id,
                text_response = EXCLUDED.text_response,
                time_spent = EXCLUDED.time_spent,
                updated_at = EXCLUDED.updated_at
            RETURNING {RESPONSE_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, QuestionResponse>(&sql)
            .bind(response.id)
            .bind(response.attempt_id)
            .bind(response.question_id)
            .bind(response.selected_option_id)
            .bind(&response.text_response)
            .bind(response.time_spent)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn append_event(
        &self,
        attempt_id: Uuid,
        event: &AntiCheatEvent,
    ) -> StoreResult<Option<Attempt>> {
        let sql = format!(
            r#"
            UPDATE attempts
            SET anti_cheat_events = anti_cheat_events || $2, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND status = 'STARTED'
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, Attempt>(&sql)
            .bind(attempt_id)
            .bind(Json(vec![event]))
            .fetch_optional(&self.pool)
            .await?)
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
        let sql = format!(
            r#"
            UPDATE attempts
            SET status = $3, updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND status = $2
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, Attempt>(&sql)
            .bind(attempt_id)
            .bind(from)
            .bind(to)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn complete_attempt(
        &self,
        attempt_id: Uuid,
        submitted_at: DateTime<Utc>,
        finalize: &Finalizer<'_>,
    ) -> StoreResult<Option<(Attempt, Vec<QuestionResponse>)>> {
        let mut tx = self.pool.begin().await?;

        let locked: Option<AttemptStatus> =
            sqlx::query_scalar("SELECT status FROM attempts WHERE id = $1 FOR UPDATE")
                .bind(attempt_id)
                .fetch_optional(&mut *tx)
                .await?;
        if !locked.is_some_and(|status| status.can_transition_to(AttemptStatus::Completed)) {
            tx.rollback().await?;
            return Ok(None);
        }

        let sql = format!(
            "SELECT {RESPONSE_COLUMNS} FROM responses WHERE attempt_id = $1 ORDER BY question_id"
        );
        let saved = sqlx::query_as::<_, QuestionResponse>(&sql)
            .bind(attempt_id)
            .fetch_all(&mut *tx)
            .await?;

        let graded = finalize(saved);
        for response in &graded.responses {
            upsert_graded_response(&mut tx, response).await?;
        }

        let sql = format!(
            r#"
            UPDATE attempts
            SET status = 'COMPLETED', submitted_at = $2, score = $3, percentage = $4,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND status = 'STARTED'
            RETURNING {ATTEMPT_COLUMNS}
            "#
        );
        let attempt = sqlx::query_as::<_, Attempt>(&sql)
            .bind(attempt_id)
            .bind(submitted_at)
            .bind(graded.score)
            .bind(graded.percentage)
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!(
            "SELECT {RESPONSE_COLUMNS} FROM responses WHERE attempt_id = $1 ORDER BY question_id"
        );
        let responses = sqlx::query_as::<_, QuestionResponse>(&sql)
            .bind(attempt_id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some((attempt, responses)))
    }
}

#[async_trait]
impl LateCodeStore for PgStore {
    async fn create_late_code(&self, code: &LateCode) -> StoreResult<LateCode> {
        let sql = format!(
            r#"
            INSERT INTO late_codes
                (id, exam_id, code, generated_by, usages_remaining, expires_at,
                 assigned_user_id, reason, status, usage_history, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {LATE_CODE_COLUMNS}
            "#
        );
        sqlx::query_as::<_, LateCode>(&sql)
            .bind(code.id)
            .bind(code.exam_id)
            .bind(&code.code)
            .bind(code.generated_by)
            .bind(code.usages_remaining)
            .bind(code.expires_at)
            .bind(code.assigned_user_id)
            .bind(&code.reason)
            .bind(code.status)
            .bind(&code.usage_history)
            .bind(code.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(map_insert_error)
    }

    async fn find_late_code(&self, id: Uuid) -> StoreResult<Option<LateCode>> {
        let sql = format!("SELECT {LATE_CODE_COLUMNS} FROM late_codes WHERE id = $1");
        Ok(sqlx::query_as::<_, LateCode>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_by_code(&self, exam_id: i64, code: &str) -> StoreResult<Option<LateCode>> {
        let sql =
            format!("SELECT {LATE_CODE_COLUMNS} FROM late_codes WHERE exam_id = $1 AND code = $2");
        Ok(sqlx::query_as::<_, LateCode>(&sql)
            .bind(exam_id)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_redeemed(
        &self,
        exam_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LateCode>> {
        let sql = format!(
            r#"
            SELECT {LATE_CODE_COLUMNS} FROM late_codes
            WHERE exam_id = $1 AND status = 'ACTIVE' AND expires_at > $3
              AND usage_history @> $2
            ORDER BY expires_at DESC
            LIMIT 1
            "#
        );
        Ok(sqlx::query_as::<_, LateCode>(&sql)
            .bind(exam_id)
            .bind(Json(serde_json::json!([{ "user_id": user_id }])))
            .bind(now)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_late_codes(&self, exam_id: i64) -> StoreResult<Vec<LateCode>> {
        let sql = format!(
            "SELECT {LATE_CODE_COLUMNS} FROM late_codes WHERE exam_id = $1 ORDER BY created_at DESC"
        );
        Ok(sqlx::query_as::<_, LateCode>(&sql)
            .bind(exam_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn redeem(
        &self,
        id: Uuid,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<LateCode>> {
        // One statement: the row lock taken by UPDATE serializes racing
        // redeemers, and the loser re-evaluates the WHERE clause.
        let sql = format!(
            r#"
            UPDATE late_codes
            SET usages_remaining = usages_remaining - 1,
                usage_history = usage_history || $3
            WHERE id = $1
              AND status = 'ACTIVE'
              AND expires_at > $4
              AND usages_remaining > 0
              AND (assigned_user_id IS NULL OR assigned_user_id = $2)
              AND NOT usage_history @> $5
            RETURNING {LATE_CODE_COLUMNS}
            "#
        );
        let usage = LateCodeUsage {
            user_id,
            used_at: now,
        };
        Ok(sqlx::query_as::<_, LateCode>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(Json(vec![usage]))
            .bind(now)
            .bind(Json(serde_json::json!([{ "user_id": user_id }])))
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn deactivate(&self, id: Uuid) -> StoreResult<Option<LateCode>> {
        let sql = format!(
            "UPDATE late_codes SET status = 'DEACTIVATED' WHERE id = $1 RETURNING {LATE_CODE_COLUMNS}"
        );
        Ok(sqlx::query_as::<_, LateCode>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }
}

#[async_trait]
impl ExamCatalog for PgStore {
    async fn get_exam(&self, exam_id: i64) -> StoreResult<Option<Exam>> {
        Ok(sqlx::query_as::<_, Exam>(
            r#"
            SELECT id, title, class_id, created_by, start_time, end_time, duration_minutes,
                   late_duration_minutes, delay_results_until_late_end, close_mode
            FROM exams
            WHERE id = $1
            "#,
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn get_questions(&self, exam_id: i64) -> StoreResult<Vec<Question>> {
        let mut questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT id, exam_id, type, text, points, correct_answer, position
            FROM questions
            WHERE exam_id = $1
            ORDER BY position, id
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        let question_ids: Vec<i64> = questions.iter().map(|q| q.id).collect();
        let options = sqlx::query_as::<_, AnswerOption>(
            "SELECT id, question_id, text, is_correct FROM options WHERE question_id = ANY($1) ORDER BY id",
        )
        .bind(&question_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_question: HashMap<i64, Vec<AnswerOption>> = HashMap::new();
        for option in options {
            by_question.entry(option.question_id).or_default().push(option);
        }
        for question in &mut questions {
            question.options = by_question.remove(&question.id).unwrap_or_default();
        }

        Ok(questions)
    }

    async fn can_manage_exam(&self, exam: &Exam, who: &Identity) -> StoreResult<bool> {
        Ok(exam.is_managed_by(who))
    }
}

// src/services/late_code.rs

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::{
    error::{LateCodeRejection, ServiceError, ServiceResult, StoreError},
    models::{
        exam::Exam,
        late_code::{LateCode, LateCodeOptions, LateCodeStatus},
        user::Identity,
    },
    store::{ExamCatalog, LateCodeStore},
    utils::{
        clock::Clock,
        code::{generate_late_code, is_well_formed_late_code, normalize_late_code},
    },
};

const MAX_GENERATION_ATTEMPTS: usize = 5;

#[derive(Debug, Clone)]
pub struct LateCodeSettings {
    pub code_length: usize,
    pub default_validity: Duration,
    pub default_usages: i32,
}

impl Default for LateCodeSettings {
    fn default() -> Self {
        Self {
            code_length: 8,
            default_validity: Duration::days(7),
            default_usages: 1,
        }
    }
}

/// Issues, validates and redeems late-access codes.
#[derive(Clone)]
pub struct LateCodeRegistry {
    store: Arc<dyn LateCodeStore>,
    catalog: Arc<dyn ExamCatalog>,
    clock: Arc<dyn Clock>,
    settings: LateCodeSettings,
}

impl LateCodeRegistry {
    pub fn new(
        store: Arc<dyn LateCodeStore>,
        catalog: Arc<dyn ExamCatalog>,
        clock: Arc<dyn Clock>,
        settings: LateCodeSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            clock,
            settings,
        }
    }

    async fn managed_exam(&self, exam_id: i64, issuer: &Identity) -> ServiceResult<Exam> {
        let exam = self
            .catalog
            .get_exam(exam_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Exam not found".to_string()))?;

        if !self.catalog.can_manage_exam(&exam, issuer).await? {
            return Err(ServiceError::Unauthorized(
                "Not allowed to manage late codes for this exam".to_string(),
            ));
        }
        Ok(exam)
    }

    /// Persists a freshly generated code for `exam_id`.
    pub async fn generate(
        &self,
        exam_id: i64,
        issuer: &Identity,
        options: LateCodeOptions,
    ) -> ServiceResult<LateCode> {
        let now = self.clock.now();
        let usages_remaining = options.usages_remaining.unwrap_or(self.settings.default_usages);
        if usages_remaining < 1 {
            return Err(ServiceError::Validation(
                "usages_remaining must be at least 1".to_string(),
            ));
        }
        let expires_at = options
            .expires_at
            .unwrap_or(now + self.settings.default_validity);
        if expires_at <= now {
            return Err(ServiceError::Validation(
                "expires_at must be in the future".to_string(),
            ));
        }

        self.managed_exam(exam_id, issuer).await?;

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let code = LateCode {
                id: Uuid::new_v4(),
                exam_id,
                code: generate_late_code(self.settings.code_length),
                generated_by: issuer.user_id,
                usages_remaining,
                expires_at,
                assigned_user_id: options.assigned_user_id,
                reason: options.reason.clone(),
                status: LateCodeStatus::Active,
                usage_history: Json(Vec::new()),
                created_at: now,
            };

            match self.store.create_late_code(&code).await {
                Ok(created) => {
                    tracing::info!(
                        "Late code {} generated for exam {} by user {}",
                        created.id,
                        exam_id,
                        issuer.user_id
                    );
                    return Ok(created);
                }
                Err(StoreError::Duplicate) => {
                    tracing::warn!("Late code collision on exam {}, regenerating", exam_id);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::Internal(format!(
            "could not generate a unique late code for exam {}",
            exam_id
        )))
    }

    /// Checks a code in a fixed order and reports the first failing rule.
    fn check(code: &LateCode, user_id: i64, now: DateTime<Utc>) -> Result<(), LateCodeRejection> {
        if code.expires_at <= now {
            return Err(LateCodeRejection::Expired);
        }
        if code.status == LateCodeStatus::Deactivated {
            return Err(LateCodeRejection::Deactivated);
        }
        if code.usages_remaining <= 0 {
            return Err(LateCodeRejection::NoRemainingUses);
        }
        if code.assigned_user_id.is_some_and(|assigned| assigned != user_id) {
            return Err(LateCodeRejection::AssignedToAnother);
        }
        if code.used_by(user_id) {
            return Err(LateCodeRejection::AlreadyUsed);
        }
        Ok(())
    }

    /// Redeems `raw_code` for `user_id`, consuming one use.
    pub async fn validate(
        &self,
        raw_code: &str,
        exam_id: i64,
        user_id: i64,
    ) -> ServiceResult<LateCode> {
        let normalized = normalize_late_code(raw_code);
        if normalized.is_empty() {
            return Err(ServiceError::Validation("code is required".to_string()));
        }
        if !is_well_formed_late_code(&normalized) {
            return Err(LateCodeRejection::Invalid.into());
        }

        let now = self.clock.now();
        let code = self
            .store
            .find_by_code(exam_id, &normalized)
            .await?
            .ok_or(LateCodeRejection::Invalid)?;

        Self::check(&code, user_id, now)?;

        if let Some(redeemed) = self.store.redeem(code.id, user_id, now).await? {
            tracing::info!(
                "Late code {} redeemed by user {} ({} uses left)",
                redeemed.id,
                user_id,
                redeemed.usages_remaining
            );
            return Ok(redeemed);
        }

        // Lost a race; report whatever rule the current state now breaks.
        let current = self
            .store
            .find_late_code(code.id)
            .await?
            .ok_or(LateCodeRejection::Invalid)?;
        Self::check(&current, user_id, now)?;
        Err(ServiceError::Conflict(
            "Late code changed during validation, retry".to_string(),
        ))
    }

    /// Finds the late extension of `user_id` for an exam whose window has
    /// closed: a code already redeemed, or else `supplied` redeemed now.
    pub async fn late_access(
        &self,
        exam_id: i64,
        user_id: i64,
        supplied: Option<&str>,
    ) -> ServiceResult<Option<LateCode>> {
        let now = self.clock.now();
        if let Some(code) = self.store.find_redeemed(exam_id, user_id, now).await? {
            return Ok(Some(code));
        }
        match supplied {
            Some(raw) => self.validate(raw, exam_id, user_id).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn list(&self, exam_id: i64, issuer: &Identity) -> ServiceResult<Vec<LateCode>> {
        self.managed_exam(exam_id, issuer).await?;
        Ok(self.store.list_late_codes(exam_id).await?)
    }

    /// Permanently deactivates a code.
    pub async fn deactivate(&self, code_id: Uuid, issuer: &Identity) -> ServiceResult<LateCode> {
        let code = self
            .store
            .find_late_code(code_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Late code not found".to_string()))?;
        self.managed_exam(code.exam_id, issuer).await?;

        let code = self
            .store
            .deactivate(code_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Late code not found".to_string()))?;
        tracing::info!("Late code {} deactivated by user {}", code.id, issuer.user_id);
        Ok(code)
    }
}

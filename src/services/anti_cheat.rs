// src/services/anti_cheat.rs

use std::{collections::HashMap, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::ServiceError,
    models::attempt::{AntiCheatEvent, AntiCheatEventType},
};

/// Largest accepted event payload, serialized.
pub const MAX_PAYLOAD_BYTES: usize = 4 * 1024;

/// Violation weights and the optional auto-submit threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct AntiCheatPolicy {
    /// Score above which the attempt is auto-submitted. `None` disables it.
    pub max_violations: Option<u32>,
    /// Types missing from the map weigh nothing.
    pub weights: HashMap<AntiCheatEventType, u32>,
}

impl Default for AntiCheatPolicy {
    fn default() -> Self {
        let weights = [
            AntiCheatEventType::TabSwitch,
            AntiCheatEventType::WindowBlur,
            AntiCheatEventType::FullscreenExit,
            AntiCheatEventType::CopyPaste,
            AntiCheatEventType::Screenshot,
        ]
        .into_iter()
        .map(|t| (t, 1))
        .collect();

        Self {
            max_violations: None,
            weights,
        }
    }
}

impl AntiCheatPolicy {
    /// Parses `tab_switch=1,window_blur=2` style weight lists.
    pub fn parse_weights(raw: &str) -> Result<HashMap<AntiCheatEventType, u32>, String> {
        raw.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (name, weight) = entry
                    .split_once('=')
                    .ok_or_else(|| format!("expected type=weight, got '{}'", entry))?;
                let event_type = AntiCheatEventType::from_str(name.trim())?;
                let weight = weight
                    .trim()
                    .parse::<u32>()
                    .map_err(|e| format!("bad weight for {}: {}", name.trim(), e))?;
                Ok((event_type, weight))
            })
            .collect()
    }
}

/// Validates incoming signals and scores an attempt's event log.
#[derive(Debug, Clone, Default)]
pub struct AntiCheatMonitor {
    policy: AntiCheatPolicy,
}

impl AntiCheatMonitor {
    pub fn new(policy: AntiCheatPolicy) -> Self {
        Self { policy }
    }

    /// Builds an event from raw client input, rejecting unknown types and
    /// oversized payloads.
    pub fn build_event(
        &self,
        raw_type: &str,
        payload: Option<serde_json::Value>,
        at: DateTime<Utc>,
    ) -> Result<AntiCheatEvent, ServiceError> {
        if raw_type.trim().is_empty() {
            return Err(ServiceError::Validation("event type is required".to_string()));
        }
        let event_type = AntiCheatEventType::from_str(raw_type).map_err(ServiceError::Validation)?;

        if let Some(payload) = &payload {
            let size = serde_json::to_vec(payload)
                .map_err(|e| ServiceError::Validation(e.to_string()))?
                .len();
            if size > MAX_PAYLOAD_BYTES {
                return Err(ServiceError::Validation(format!(
                    "event data exceeds {} bytes",
                    MAX_PAYLOAD_BYTES
                )));
            }
        }

        Ok(AntiCheatEvent {
            event_type,
            timestamp: at,
            payload,
        })
    }

    pub fn violation_score(&self, events: &[AntiCheatEvent]) -> u32 {
        events
            .iter()
            .map(|e| self.policy.weights.get(&e.event_type).copied().unwrap_or(0))
            .fold(0u32, u32::saturating_add)
    }

    pub fn threshold_exceeded(&self, score: u32) -> bool {
        self.policy.max_violations.is_some_and(|max| score > max)
    }
}

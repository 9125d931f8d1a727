// src/config.rs

use std::{env, fmt::Display, str::FromStr};

use chrono::Duration;
use dotenvy::dotenv;
use url::Url;

use crate::{
    services::{anti_cheat::AntiCheatPolicy, late_code::LateCodeSettings},
    utils::code::LATE_CODE_LENGTHS,
};

const DEFAULT_WEIGHTS: &str =
    "tab_switch=1,window_blur=1,fullscreen_exit=1,copy_paste=1,screenshot=1";

/// Per-IP limit on late-code validation. A zero rate disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst: u32,
}

impl RateLimit {
    pub fn disabled() -> Self {
        Self {
            per_second: 0,
            burst: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.per_second > 0 && self.burst > 0
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub log_dir: String,
    pub port: u16,
    /// Base of resume redirect links; always ends with '/'.
    pub frontend_url: Url,
    pub anti_cheat: AntiCheatPolicy,
    pub late_codes: LateCodeSettings,
    pub late_code_rate: RateLimit,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let log_dir = env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());

        let frontend_url = parse_frontend_url(
            &env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000/".to_string()),
        )
        .expect("FRONTEND_URL must be an absolute URL");

        let weights = AntiCheatPolicy::parse_weights(
            &env::var("ANTI_CHEAT_WEIGHTS").unwrap_or_else(|_| DEFAULT_WEIGHTS.to_string()),
        )
        .expect("ANTI_CHEAT_WEIGHTS must look like tab_switch=1,window_blur=1");

        let max_violations = env::var("ANTI_CHEAT_MAX_VIOLATIONS")
            .ok()
            .map(|raw| {
                raw.trim()
                    .parse::<u32>()
                    .expect("ANTI_CHEAT_MAX_VIOLATIONS must be a number")
            });

        let validity_days: i64 = load("LATE_CODE_VALIDITY_DAYS", "7");

        let code_length = parse_code_length(
            &env::var("LATE_CODE_LENGTH").unwrap_or_else(|_| "8".to_string()),
        )
        .unwrap_or_else(|e| panic!("Invalid LATE_CODE_LENGTH value: {}", e));

        Self {
            database_url,
            jwt_secret,
            rust_log,
            log_dir,
            port: load("PORT", "3000"),
            frontend_url,
            anti_cheat: AntiCheatPolicy {
                max_violations,
                weights,
            },
            late_codes: LateCodeSettings {
                code_length,
                default_validity: Duration::days(validity_days),
                ..LateCodeSettings::default()
            },
            late_code_rate: RateLimit {
                per_second: load("LATE_CODE_RATE_PER_SECOND", "2"),
                burst: load("LATE_CODE_RATE_BURST", "5"),
            },
        }
    }
}

fn load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .unwrap_or_else(|e| panic!("Invalid {} value: {}", key, e))
}

/// Parses a late-code length; issued codes must stay redeemable.
pub fn parse_code_length(raw: &str) -> Result<usize, String> {
    let len: usize = raw.trim().parse().map_err(|e| format!("{}", e))?;
    if LATE_CODE_LENGTHS.contains(&len) {
        Ok(len)
    } else {
        Err(format!(
            "{} is outside {}..={}",
            len,
            LATE_CODE_LENGTHS.start(),
            LATE_CODE_LENGTHS.end()
        ))
    }
}

/// Parses the frontend base URL and makes sure relative joins append to it.
pub fn parse_frontend_url(raw: &str) -> Result<Url, url::ParseError> {
    let raw = raw.trim();
    if raw.ends_with('/') {
        Url::parse(raw)
    } else {
        Url::parse(&format!("{}/", raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frontend_url_gets_trailing_slash() {
        let url = parse_frontend_url("https://school.example/app").unwrap();
        assert_eq!(url.as_str(), "https://school.example/app/");
        assert_eq!(
            url.join("student/exams/1/take").unwrap().as_str(),
            "https://school.example/app/student/exams/1/take"
        );
        assert!(parse_frontend_url("not a url").is_err());
    }

    #[test]
    fn test_default_weights_parse() {
        let weights = AntiCheatPolicy::parse_weights(DEFAULT_WEIGHTS).unwrap();
        assert_eq!(weights, AntiCheatPolicy::default().weights);
    }

    #[test]
    fn test_code_length_bounds() {
        assert_eq!(parse_code_length("8"), Ok(8));
        assert_eq!(parse_code_length(" 4 "), Ok(4));
        assert_eq!(parse_code_length("32"), Ok(32));
        assert!(parse_code_length("0").is_err());
        assert!(parse_code_length("3").is_err());
        assert!(parse_code_length("40").is_err());
        assert!(parse_code_length("eight").is_err());
    }

    #[test]
    fn test_rate_limit_switch() {
        assert!(!RateLimit::disabled().is_enabled());
        assert!(
            RateLimit {
                per_second: 2,
                burst: 5
            }
            .is_enabled()
        );
    }
}

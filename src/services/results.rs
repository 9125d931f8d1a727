// src/services/results.rs

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::exam::Exam;

/// Whether results of an exam may be shown to the caller right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResultsGate {
    pub blocked: bool,
    pub in_late_period: bool,
    /// Whole minutes (rounded up) until the late period ends; 0 outside it.
    pub time_until_results: i64,
}

impl ResultsGate {
    pub fn message(&self) -> &'static str {
        if self.in_late_period {
            "Results will be available after the late period ends."
        } else {
            "Results will be available after the exam ends."
        }
    }
}

/// Results are withheld until the exam ends, and during the late period
/// when the exam asks for it. Staff managing the exam are never blocked.
pub fn results_gate(exam: &Exam, reviewer: bool, now: DateTime<Utc>) -> ResultsGate {
    let late_end = exam.late_end();
    let exam_ended = now >= exam.end_time;
    let in_late_period = exam_ended && now < late_end && exam.config.late_duration_minutes > 0;
    let withheld = !exam_ended || (exam.config.delay_results_until_late_end && in_late_period);

    let time_until_results = if in_late_period {
        let millis = (late_end - now).num_milliseconds();
        (millis + 59_999) / 60_000
    } else {
        0
    };

    ResultsGate {
        blocked: withheld && !reviewer,
        in_late_period,
        time_until_results,
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::models::exam::{CloseMode, ExamConfig};

    fn exam(end: DateTime<Utc>, late_minutes: i32, delay: bool) -> Exam {
        Exam {
            id: 1,
            title: "Algebra".to_string(),
            class_id: None,
            created_by: 7,
            start_time: end - Duration::hours(2),
            end_time: end,
            duration_minutes: 60,
            config: ExamConfig {
                late_duration_minutes: late_minutes,
                delay_results_until_late_end: delay,
            },
            close_mode: CloseMode::Strict,
        }
    }

    #[test]
    fn test_blocked_during_late_period() {
        let t = Utc::now();
        let exam = exam(t, 30, true);
        let now = t + Duration::minutes(10);

        let gate = results_gate(&exam, false, now);
        assert!(gate.blocked);
        assert!(gate.in_late_period);
        assert_eq!(gate.time_until_results, 20);

        let gate = results_gate(&exam, true, now);
        assert!(!gate.blocked);
        assert!(gate.in_late_period);
    }

    #[test]
    fn test_partial_minutes_round_up() {
        let t = Utc::now();
        let exam = exam(t, 30, true);
        let gate = results_gate(&exam, false, t + Duration::seconds(10 * 60 + 30));
        assert_eq!(gate.time_until_results, 20);
    }

    #[test]
    fn test_last_second_still_counts_a_minute() {
        let t = Utc::now();
        let exam = exam(t, 30, true);
        let last = t + Duration::minutes(30) - Duration::milliseconds(500);

        let gate = results_gate(&exam, false, last);
        assert!(gate.blocked);
        assert!(gate.in_late_period);
        assert_eq!(gate.time_until_results, 1);
    }

    #[test]
    fn test_late_period_without_delay_flag() {
        let t = Utc::now();
        let exam = exam(t, 30, false);
        let gate = results_gate(&exam, false, t + Duration::minutes(10));
        assert!(!gate.blocked);
        assert!(gate.in_late_period);
    }

    #[test]
    fn test_blocked_before_exam_end() {
        let t = Utc::now();
        let exam = exam(t, 0, false);
        let gate = results_gate(&exam, false, t - Duration::minutes(1));
        assert!(gate.blocked);
        assert!(!gate.in_late_period);
        assert_eq!(gate.time_until_results, 0);

        assert!(!results_gate(&exam, true, t - Duration::minutes(1)).blocked);
    }

    #[test]
    fn test_open_after_late_end() {
        let t = Utc::now();
        let exam = exam(t, 30, true);
        let gate = results_gate(&exam, false, t + Duration::minutes(30));
        assert!(!gate.blocked);
        assert!(!gate.in_late_period);
    }
}

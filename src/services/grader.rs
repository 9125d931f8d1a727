// src/services/grader.rs

use std::{collections::HashMap, sync::Arc};

use crate::models::{
    attempt::Evaluation,
    exam::{Question, QuestionType},
    response::QuestionResponse,
};

/// Decides whether a free-text answer matches the expected one.
pub trait TextComparator: Send + Sync {
    fn matches(&self, expected: &str, given: &str) -> bool;
}

/// Case-insensitive comparison after trimming and collapsing whitespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizedTextComparator;

impl TextComparator for NormalizedTextComparator {
    fn matches(&self, expected: &str, given: &str) -> bool {
        fn normalize(s: &str) -> String {
            s.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase()
        }
        let expected = normalize(expected);
        !expected.is_empty() && expected == normalize(given)
    }
}

/// Responses with `is_correct` filled in, plus the aggregate.
#[derive(Debug, Clone)]
pub struct Grade {
    pub responses: Vec<QuestionResponse>,
    pub evaluation: Evaluation,
}

/// Pure grading: no storage, no clock.
#[derive(Clone)]
pub struct Grader {
    comparator: Arc<dyn TextComparator>,
}

impl Default for Grader {
    fn default() -> Self {
        Self::new(Arc::new(NormalizedTextComparator))
    }
}

impl Grader {
    pub fn new(comparator: Arc<dyn TextComparator>) -> Self {
        Self { comparator }
    }

    fn is_correct(&self, question: &Question, response: &QuestionResponse) -> bool {
        match question.question_type {
            QuestionType::Qcm => response
                .selected_option_id
                .and_then(|id| question.option(id))
                .is_some_and(|option| option.is_correct),
            QuestionType::Text => match (&question.correct_answer, &response.text_response) {
                (Some(expected), Some(given)) => self.comparator.matches(expected, given),
                _ => false,
            },
        }
    }

    /// Grades `responses` against the answer key of `questions`.
    ///
    /// Score is the sum of points of correct responses; percentage is
    /// score / total points * 100, or 0 when the exam is worth nothing.
    /// Responses to questions outside the exam are marked incorrect and
    /// earn nothing.
    pub fn grade(&self, questions: &[Question], responses: Vec<QuestionResponse>) -> Grade {
        let by_id: HashMap<i64, &Question> = questions.iter().map(|q| (q.id, q)).collect();
        let total_points: f64 = questions.iter().map(|q| q.points).sum();

        let mut score = 0.0;
        let mut correct_count = 0;
        let graded: Vec<QuestionResponse> = responses
            .into_iter()
            .map(|mut response| {
                let correct = by_id
                    .get(&response.question_id)
                    .is_some_and(|q| self.is_correct(q, &response));
                if correct {
                    correct_count += 1;
                    score += by_id[&response.question_id].points;
                }
                response.is_correct = Some(correct);
                response
            })
            .collect();

        let answered_count = graded
            .iter()
            .filter(|r| by_id.contains_key(&r.question_id) && has_answer(r))
            .count();

        Grade {
            responses: graded,
            evaluation: Evaluation {
                score,
                total_points,
                percentage: percentage(score, total_points),
                correct_count,
                total_questions: questions.len(),
                answered_count,
            },
        }
    }
}

fn has_answer(response: &QuestionResponse) -> bool {
    response.selected_option_id.is_some()
        || response
            .text_response
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
}

pub fn percentage(score: f64, total_points: f64) -> f64 {
    if total_points <= 0.0 {
        0.0
    } else {
        score / total_points * 100.0
    }
}

/// Rebuilds the evaluation of an already graded attempt from what was stored.
pub fn stored_evaluation(
    questions: &[Question],
    responses: &[QuestionResponse],
    score: f64,
    percentage: f64,
) -> Evaluation {
    let in_exam = |r: &&QuestionResponse| questions.iter().any(|q| q.id == r.question_id);
    Evaluation {
        score,
        total_points: questions.iter().map(|q| q.points).sum(),
        percentage,
        correct_count: responses.iter().filter(|r| r.is_correct == Some(true)).count(),
        total_questions: questions.len(),
        answered_count: responses.iter().filter(in_exam).filter(|r| has_answer(r)).count(),
    }
}

use crate::models::question::{AnswerValue, Question};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradingResult {
    pub score: i32,
    pub max_score: i32,
    pub correct_count: i32,
    pub grade: i32,
}

/// Pure grading over an exam's question list and the raw submitted answer
/// map. Deterministic and side-effect free; regrading identical inputs
/// always yields identical output.
pub struct GradingService;

impl GradingService {
    pub fn grade(questions: &[Question], answers: &JsonValue) -> GradingResult {
        let mut score: i32 = 0;
        let mut max_score: i32 = 0;
        let mut correct_count: i32 = 0;

        for q in questions {
            max_score += q.points;
            if Self::is_answer_correct(q, answers) {
                score += q.points;
                correct_count += 1;
            }
        }

        GradingResult {
            score,
            max_score,
            correct_count,
            grade: Self::grade_band(Self::percentage(score, max_score)),
        }
    }

    /// Resolve one question's correctness from the raw answer map.
    /// Missing or unparseable submissions count as incorrect, never error.
    pub fn is_answer_correct(question: &Question, answers: &JsonValue) -> bool {
        answers
            .get(question.number.to_string())
            .and_then(AnswerValue::parse)
            .map(|a| a.is_correct_for(question.answer))
            .unwrap_or(false)
    }

    pub fn percentage(score: i32, max_score: i32) -> f64 {
        if max_score > 0 {
            (score as f64 / max_score as f64) * 100.0
        } else {
            0.0
        }
    }

    /// Korean 1-9 grade band. Thresholds are evaluated top-down; the first
    /// one met wins.
    pub fn grade_band(percentage: f64) -> i32 {
        const BANDS: [(f64, i32); 8] = [
            (96.0, 1),
            (89.0, 2),
            (77.0, 3),
            (60.0, 4),
            (40.0, 5),
            (23.0, 6),
            (11.0, 7),
            (4.0, 8),
        ];
        for (threshold, band) in BANDS {
            if percentage >= threshold {
                return band;
            }
        }
        9
    }
}

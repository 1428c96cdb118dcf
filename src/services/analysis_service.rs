use crate::models::question::{AnswerValue, Difficulty, Question};
use crate::services::grading_service::{GradingResult, GradingService};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Strength,
    Neutral,
    Weakness,
}

impl Classification {
    pub fn from_percentage(percentage: i32) -> Self {
        if percentage >= 80 {
            Classification::Strength
        } else if percentage < 60 {
            Classification::Weakness
        } else {
            Classification::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainScore {
    pub domain: String,
    pub total: i32,
    pub correct: i32,
    pub earned_points: i32,
    pub max_points: i32,
    pub percentage: i32,
    pub classification: Classification,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyScore {
    pub difficulty: Difficulty,
    pub total: i32,
    pub correct: i32,
    pub earned_points: i32,
    pub max_points: i32,
    pub percentage: i32,
}

/// One graded question annotated for downstream narrative generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub number: i32,
    pub domain: String,
    pub difficulty: Difficulty,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub points: i32,
    pub student_answer: Option<String>,
    pub correct: bool,
}

/// Full per-attempt aggregation: overall grading plus domain and difficulty
/// breakdowns and the annotated correct/incorrect question lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub grading: GradingResult,
    pub domains: Vec<DomainScore>,
    pub difficulties: Vec<DifficultyScore>,
    pub correct_questions: Vec<QuestionOutcome>,
    pub incorrect_questions: Vec<QuestionOutcome>,
}

impl ScoreBreakdown {
    pub fn weak_domains(&self) -> Vec<String> {
        self.domains
            .iter()
            .filter(|d| d.classification == Classification::Weakness)
            .map(|d| d.domain.clone())
            .collect()
    }

    pub fn strong_domains(&self) -> Vec<String> {
        self.domains
            .iter()
            .filter(|d| d.classification == Classification::Strength)
            .map(|d| d.domain.clone())
            .collect()
    }
}

/// Per-exam composition, independent of any student: how the question list
/// distributes over domains and difficulties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamAnalysis {
    pub total_questions: i32,
    pub total_score: i32,
    pub domains: Vec<DomainComposition>,
    pub difficulties: Vec<DifficultyComposition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainComposition {
    pub domain: String,
    pub questions: i32,
    pub points: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyComposition {
    pub difficulty: Difficulty,
    pub questions: i32,
    pub points: i32,
}

/// Pure derivation over (question list, answer map). Safe to recompute at
/// any time; callers cache the output per attempt id through the artifact
/// layer.
pub struct AnalysisService;

impl AnalysisService {
    pub fn breakdown(questions: &[Question], answers: &JsonValue) -> ScoreBreakdown {
        let grading = GradingService::grade(questions, answers);

        let mut domains: Vec<DomainScore> = Vec::new();
        let mut difficulties: Vec<DifficultyScore> = Vec::new();
        let mut correct_questions: Vec<QuestionOutcome> = Vec::new();
        let mut incorrect_questions: Vec<QuestionOutcome> = Vec::new();

        for q in questions {
            let submitted = answers
                .get(q.number.to_string())
                .and_then(AnswerValue::parse);
            let correct = submitted
                .map(|a| a.is_correct_for(q.answer))
                .unwrap_or(false);

            // Group by domain, ordered by first appearance for determinism.
            let idx = match domains.iter().position(|d| d.domain == q.domain) {
                Some(i) => i,
                None => {
                    domains.push(DomainScore {
                        domain: q.domain.clone(),
                        total: 0,
                        correct: 0,
                        earned_points: 0,
                        max_points: 0,
                        percentage: 0,
                        classification: Classification::Weakness,
                    });
                    domains.len() - 1
                }
            };
            let entry = &mut domains[idx];
            entry.total += 1;
            entry.max_points += q.points;
            if correct {
                entry.correct += 1;
                entry.earned_points += q.points;
            }

            let idx = match difficulties.iter().position(|d| d.difficulty == q.difficulty) {
                Some(i) => i,
                None => {
                    difficulties.push(DifficultyScore {
                        difficulty: q.difficulty,
                        total: 0,
                        correct: 0,
                        earned_points: 0,
                        max_points: 0,
                        percentage: 0,
                    });
                    difficulties.len() - 1
                }
            };
            let diff_entry = &mut difficulties[idx];
            diff_entry.total += 1;
            diff_entry.max_points += q.points;
            if correct {
                diff_entry.correct += 1;
                diff_entry.earned_points += q.points;
            }

            let outcome = QuestionOutcome {
                number: q.number,
                domain: q.domain.clone(),
                difficulty: q.difficulty,
                subcategory: q.subcategory.clone(),
                points: q.points,
                student_answer: submitted.map(|a| a.display()),
                correct,
            };
            if correct {
                correct_questions.push(outcome);
            } else {
                incorrect_questions.push(outcome);
            }
        }

        for d in domains.iter_mut() {
            d.percentage = accuracy_percentage(d.correct, d.total);
            d.classification = Classification::from_percentage(d.percentage);
        }
        for d in difficulties.iter_mut() {
            d.percentage = accuracy_percentage(d.correct, d.total);
        }

        ScoreBreakdown {
            grading,
            domains,
            difficulties,
            correct_questions,
            incorrect_questions,
        }
    }

    pub fn exam_analysis(questions: &[Question]) -> ExamAnalysis {
        let mut domains: Vec<DomainComposition> = Vec::new();
        let mut difficulties: Vec<DifficultyComposition> = Vec::new();
        let mut total_score = 0;

        for q in questions {
            total_score += q.points;
            match domains.iter_mut().find(|d| d.domain == q.domain) {
                Some(d) => {
                    d.questions += 1;
                    d.points += q.points;
                }
                None => domains.push(DomainComposition {
                    domain: q.domain.clone(),
                    questions: 1,
                    points: q.points,
                }),
            }
            match difficulties.iter_mut().find(|d| d.difficulty == q.difficulty) {
                Some(d) => {
                    d.questions += 1;
                    d.points += q.points;
                }
                None => difficulties.push(DifficultyComposition {
                    difficulty: q.difficulty,
                    questions: 1,
                    points: q.points,
                }),
            }
        }

        ExamAnalysis {
            total_questions: questions.len() as i32,
            total_score,
            domains,
            difficulties,
        }
    }
}

fn accuracy_percentage(correct: i32, total: i32) -> i32 {
    if total > 0 {
        ((correct as f64 / total as f64) * 100.0).round() as i32
    } else {
        0
    }
}

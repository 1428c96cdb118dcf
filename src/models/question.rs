use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// One question descriptor inside an exam's ordered question list.
/// Numbers are 1-based and unique within the exam.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub number: i32,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub answer: i32,
    #[serde(default = "default_points")]
    pub points: i32,
}

fn default_points() -> i32 {
    1
}

pub fn default_domain() -> String {
    "기타".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Low,
    #[default]
    Mid,
    High,
}

impl Difficulty {
    pub fn label(&self) -> &'static str {
        match self {
            Difficulty::Low => "low",
            Difficulty::Mid => "mid",
            Difficulty::High => "high",
        }
    }
}

/// A student's submitted answer for one question.
///
/// The wire value is either a raw choice integer (1-5) or the literal tags
/// "correct"/"wrong" when a staff member graded the item by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerValue {
    Choice(i32),
    Manual { correct: bool },
}

impl AnswerValue {
    /// Parse a raw submitted value. Returns None for anything unparseable;
    /// the grader counts those as incorrect rather than erroring.
    pub fn parse(raw: &JsonValue) -> Option<Self> {
        if let Some(n) = raw.as_i64() {
            return Some(AnswerValue::Choice(n as i32));
        }
        match raw.as_str() {
            Some("correct") => Some(AnswerValue::Manual { correct: true }),
            Some("wrong") => Some(AnswerValue::Manual { correct: false }),
            Some(s) => s.trim().parse::<i32>().ok().map(AnswerValue::Choice),
            None => None,
        }
    }

    pub fn is_correct_for(&self, answer_key: i32) -> bool {
        match self {
            AnswerValue::Choice(n) => *n == answer_key,
            AnswerValue::Manual { correct } => *correct,
        }
    }

    /// Display form used when annotating graded question lists.
    pub fn display(&self) -> String {
        match self {
            AnswerValue::Choice(n) => n.to_string(),
            AnswerValue::Manual { correct: true } => "correct".to_string(),
            AnswerValue::Manual { correct: false } => "wrong".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_choice_and_manual_values() {
        assert_eq!(AnswerValue::parse(&json!(3)), Some(AnswerValue::Choice(3)));
        assert_eq!(
            AnswerValue::parse(&json!("correct")),
            Some(AnswerValue::Manual { correct: true })
        );
        assert_eq!(
            AnswerValue::parse(&json!("wrong")),
            Some(AnswerValue::Manual { correct: false })
        );
        assert_eq!(AnswerValue::parse(&json!("4")), Some(AnswerValue::Choice(4)));
    }

    #[test]
    fn unparseable_values_are_none() {
        assert_eq!(AnswerValue::parse(&json!(null)), None);
        assert_eq!(AnswerValue::parse(&json!("maybe")), None);
        assert_eq!(AnswerValue::parse(&json!({"selected": 2})), None);
    }

    #[test]
    fn manual_tags_override_choice_matching() {
        assert!(AnswerValue::Manual { correct: true }.is_correct_for(1));
        assert!(!AnswerValue::Manual { correct: false }.is_correct_for(1));
        assert!(AnswerValue::Choice(2).is_correct_for(2));
        assert!(!AnswerValue::Choice(3).is_correct_for(2));
    }

    #[test]
    fn question_defaults_apply() {
        let q: Question = serde_json::from_value(json!({
            "number": 1,
            "answer": 2
        }))
        .unwrap();
        assert_eq!(q.points, 1);
        assert_eq!(q.domain, "기타");
        assert_eq!(q.difficulty, Difficulty::Mid);
    }
}

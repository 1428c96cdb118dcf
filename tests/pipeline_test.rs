use academy_backend::models::exam::Exam;
use academy_backend::models::student::Student;
use academy_backend::services::ai_service;
use academy_backend::services::analysis_service::{AnalysisService, Classification};
use academy_backend::services::grading_service::GradingService;
use academy_backend::services::report_service;
use serde_json::json;
use uuid::Uuid;

fn exam() -> Exam {
    Exam {
        id: Uuid::new_v4(),
        title: "6월 모의고사".to_string(),
        subject: "국어".to_string(),
        grade_label: "고3".to_string(),
        questions: json!([
            {"number": 1, "domain": "독서", "difficulty": "low", "answer": 1, "points": 2},
            {"number": 2, "domain": "독서", "difficulty": "mid", "answer": 2, "points": 2},
            {"number": 3, "domain": "독서", "difficulty": "mid", "answer": 3, "points": 2},
            {"number": 4, "domain": "독서", "difficulty": "high", "answer": 4, "points": 3},
            {"number": 5, "domain": "독서", "difficulty": "high", "answer": 5, "points": 3},
            {"number": 6, "domain": "문학", "difficulty": "mid", "answer": 1, "points": 2},
            {"number": 7, "domain": "문학", "difficulty": "mid", "answer": 2, "points": 2},
            {"number": 8, "domain": "문법", "difficulty": "high", "subcategory": "음운", "answer": 3, "points": 4}
        ]),
        total_score: 20,
        created_at: None,
        updated_at: None,
    }
}

fn student() -> Student {
    Student {
        id: Uuid::new_v4(),
        name: "이서연".to_string(),
        grade_label: "고3".to_string(),
        branch: Some("분당".to_string()),
        created_at: None,
    }
}

/// Full offline pipeline: grade, aggregate, synthesize analysis, assemble,
/// render. No database, no network.
#[test]
fn pipeline_produces_complete_report_without_providers() {
    let exam = exam();
    let student = student();
    let questions = exam.question_list();
    // 4/5 reading correct, literature all wrong, grammar marked correct by staff.
    let answers = json!({
        "1": 1, "2": 2, "3": 3, "4": 4, "5": 1,
        "6": 3, "7": 4,
        "8": "correct"
    });

    let grading = GradingService::grade(&questions, &answers);
    assert_eq!(grading.max_score, 20);
    assert_eq!(grading.score, 2 + 2 + 2 + 3 + 4);
    assert_eq!(grading.correct_count, 5);

    let breakdown = AnalysisService::breakdown(&questions, &answers);
    assert_eq!(breakdown.grading, grading);

    let reading = breakdown.domains.iter().find(|d| d.domain == "독서").unwrap();
    assert_eq!(reading.percentage, 80);
    assert_eq!(reading.classification, Classification::Strength);
    assert_eq!(breakdown.weak_domains(), vec!["문학".to_string()]);

    let analysis = ai_service::offline_analysis(&student.name, &breakdown);
    assert!(analysis.summary.contains("이서연"));

    let content = report_service::assemble(&student, &exam, &breakdown, &analysis);
    assert_eq!(content.score, grading.score);
    assert!(content.domains.iter().all(|d| !d.analysis.is_empty()));
    assert_eq!(content.weak_domains, vec!["문학".to_string()]);
    assert!(!content.recommendations.is_empty());

    let html = report_service::render_html(&content);
    assert!(html.contains("이서연"));
    assert!(html.contains("6월 모의고사"));
    assert!(html.contains("id=\"projection\""));
}

/// Deleting a report never touches the aggregation: recomputing the
/// breakdown from the same inputs yields the same weakness set.
#[test]
fn weakness_set_is_stable_across_recomputation() {
    let exam = exam();
    let questions = exam.question_list();
    let answers = json!({"1": 1, "2": 1, "3": 1, "6": 1, "8": 3});

    let first = AnalysisService::breakdown(&questions, &answers);
    let second = AnalysisService::breakdown(&questions, &answers);
    assert_eq!(first.weak_domains(), second.weak_domains());
    assert_eq!(first, second);
}

#[test]
fn prompt_reflects_manual_grades_and_omissions() {
    let exam = exam();
    let questions = exam.question_list();
    let answers = json!({"1": 1, "8": "wrong"});
    let breakdown = AnalysisService::breakdown(&questions, &answers);

    let prompt = ai_service::build_analysis_prompt("이서연", "고3", &exam.title, &breakdown);
    assert!(prompt.contains("무응답"));
    assert!(prompt.contains("음운"));
    assert!(prompt.contains("JSON"));
}

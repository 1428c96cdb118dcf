use crate::error::{Error, Result};
use crate::models::attempt::Attempt;
use crate::models::exam::Exam;
use crate::models::report::Report;
use crate::models::student::Student;
use crate::services::ai_service::{self, AiAnalysis, AiService, Propensity, StrategyStage};
use crate::services::analysis_service::{AnalysisService, Classification, ScoreBreakdown};
use crate::services::artifact_service::stage;
use crate::services::grading_service::GradingService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Number of projected future points (monthly intervals).
const PROJECTION_INTERVALS: i32 = 3;
/// Fraction of the remaining gap to max score closed per interval.
const PROJECTION_GAP_CLOSE: f64 = 0.15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainReportEntry {
    pub domain: String,
    pub correct: i32,
    pub total: i32,
    pub earned_points: i32,
    pub max_points: i32,
    pub percentage: i32,
    pub classification: Classification,
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPoint {
    pub label: String,
    pub score: i32,
}

/// Fully merged report structure: numeric statistics plus narrative text,
/// with every entry guaranteed a non-empty analysis string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportContent {
    pub student_name: String,
    pub grade_label: String,
    pub exam_title: String,
    pub subject: String,
    pub score: i32,
    pub max_score: i32,
    pub correct_count: i32,
    pub grade: i32,
    pub summary: String,
    pub domains: Vec<DomainReportEntry>,
    pub strength_analysis: String,
    pub weakness_analysis: String,
    pub propensity: Propensity,
    pub learning_strategy: Vec<StrategyStage>,
    pub weak_domains: Vec<String>,
    pub recommendations: Vec<String>,
    pub predicted_progress: Vec<ProgressPoint>,
    pub predicted_grade: i32,
}

/// Whether `generate_report` wrote a new row or replayed an existing one.
#[derive(Debug, Clone)]
pub enum ReportOutcome {
    Created(Report),
    Existing(Report),
}

impl ReportOutcome {
    pub fn into_report(self) -> Report {
        match self {
            ReportOutcome::Created(report) | ReportOutcome::Existing(report) => report,
        }
    }
}

/// Storage backing the report pipeline. The service only talks to this seam,
/// so the idempotency and caching logic runs against an in-memory store in
/// tests.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>>;
    async fn exam(&self, exam_id: Uuid) -> Result<Option<Exam>>;
    async fn student(&self, student_id: Uuid) -> Result<Option<Student>>;
    async fn find_report(&self, attempt_id: Uuid) -> Result<Option<Report>>;
    async fn insert_report(
        &self,
        attempt_id: Uuid,
        content: &ReportContent,
        html: &str,
    ) -> Result<Report>;
    /// Returns the number of rows removed.
    async fn delete_report(&self, attempt_id: Uuid) -> Result<u64>;
    async fn artifact(&self, stage: &str, key: Uuid) -> Result<Option<JsonValue>>;
    async fn put_artifact(&self, stage: &str, key: Uuid, payload: &JsonValue) -> Result<()>;
}

pub struct PgReportStore {
    pool: PgPool,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReportStore for PgReportStore {
    async fn attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
        let attempt = sqlx::query_as::<_, Attempt>(r#"SELECT * FROM attempts WHERE id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(attempt)
    }

    async fn exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
        let exam = sqlx::query_as::<_, Exam>(r#"SELECT * FROM exams WHERE id = $1"#)
            .bind(exam_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(exam)
    }

    async fn student(&self, student_id: Uuid) -> Result<Option<Student>> {
        let student = sqlx::query_as::<_, Student>(r#"SELECT * FROM students WHERE id = $1"#)
            .bind(student_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(student)
    }

    async fn find_report(&self, attempt_id: Uuid) -> Result<Option<Report>> {
        let report = sqlx::query_as::<_, Report>(r#"SELECT * FROM reports WHERE attempt_id = $1"#)
            .bind(attempt_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(report)
    }

    async fn insert_report(
        &self,
        attempt_id: Uuid,
        content: &ReportContent,
        html: &str,
    ) -> Result<Report> {
        let report = sqlx::query_as::<_, Report>(
            r#"
            INSERT INTO reports (id, attempt_id, summary, weak_domains, recommendations, predicted_grade, content, html)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(attempt_id)
        .bind(&content.summary)
        .bind(serde_json::to_value(&content.weak_domains)?)
        .bind(serde_json::to_value(&content.recommendations)?)
        .bind(content.predicted_grade)
        .bind(serde_json::to_value(content)?)
        .bind(html)
        .fetch_one(&self.pool)
        .await?;
        Ok(report)
    }

    async fn delete_report(&self, attempt_id: Uuid) -> Result<u64> {
        let result = sqlx::query(r#"DELETE FROM reports WHERE attempt_id = $1"#)
            .bind(attempt_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn artifact(&self, stage: &str, key: Uuid) -> Result<Option<JsonValue>> {
        let payload: Option<JsonValue> = sqlx::query_scalar(
            r#"SELECT payload FROM pipeline_artifacts WHERE stage = $1 AND key = $2"#,
        )
        .bind(stage)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payload)
    }

    async fn put_artifact(&self, stage: &str, key: Uuid, payload: &JsonValue) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_artifacts (stage, key, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (stage, key)
            DO UPDATE SET payload = EXCLUDED.payload, created_at = NOW()
            "#,
        )
        .bind(stage)
        .bind(key)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct ReportService {
    store: Arc<dyn ReportStore>,
    ai: Arc<AiService>,
}

impl ReportService {
    pub fn new(pool: PgPool, ai: Arc<AiService>) -> Self {
        Self {
            store: Arc::new(PgReportStore::new(pool)),
            ai,
        }
    }

    /// Test constructor: explicit storage backend.
    pub fn with_store(store: Arc<dyn ReportStore>, ai: Arc<AiService>) -> Self {
        Self { store, ai }
    }

    /// Run the full pipeline for one attempt. Idempotent: when a report row
    /// already exists it is returned as `Existing` and no provider call is
    /// made. `force` recomputes the cached breakdown and AI-analysis
    /// artifacts but still refuses to overwrite an existing report, which
    /// must be deleted explicitly first.
    pub async fn generate_report(&self, attempt_id: Uuid, force: bool) -> Result<ReportOutcome> {
        let attempt = self
            .store
            .attempt(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;
        if !attempt.is_graded() {
            return Err(Error::BadRequest(
                "Attempt has not been submitted and graded yet".to_string(),
            ));
        }

        if let Some(existing) = self.store.find_report(attempt_id).await? {
            if force {
                return Err(Error::Conflict(
                    "Report already exists for this attempt; delete it before regenerating"
                        .to_string(),
                ));
            }
            tracing::info!(attempt_id = %attempt_id, report_id = %existing.id, "Returning existing report");
            return Ok(ReportOutcome::Existing(existing));
        }

        let exam = self
            .store
            .exam(attempt.exam_id)
            .await?
            .ok_or_else(|| Error::NotFound("Exam not found".to_string()))?;
        let student = self
            .store
            .student(attempt.student_id)
            .await?
            .ok_or_else(|| Error::NotFound("Student not found".to_string()))?;
        let questions = exam.question_list();
        let answers = attempt.answers.clone().unwrap_or_else(|| serde_json::json!({}));

        let breakdown_json = match self.cached(stage::SCORE_BREAKDOWN, attempt_id, force).await? {
            Some(cached) => cached,
            None => {
                let payload =
                    serde_json::to_value(AnalysisService::breakdown(&questions, &answers))?;
                self.store
                    .put_artifact(stage::SCORE_BREAKDOWN, attempt_id, &payload)
                    .await?;
                payload
            }
        };
        let breakdown: ScoreBreakdown = serde_json::from_value(breakdown_json)?;

        let analysis = self
            .cached_ai_analysis(&attempt, &student, &exam, &breakdown, force)
            .await?;

        let content = assemble(&student, &exam, &breakdown, &analysis);
        let html = render_html(&content);

        match self.store.insert_report(attempt_id, &content, &html).await {
            Ok(report) => Ok(ReportOutcome::Created(report)),
            // Lost a race with a concurrent generate for the same attempt:
            // the winner's row is the report.
            Err(e) if e.is_unique_violation() => {
                tracing::info!(attempt_id = %attempt_id, "Concurrent report insert, returning existing row");
                self.store
                    .find_report(attempt_id)
                    .await?
                    .map(ReportOutcome::Existing)
                    .ok_or_else(|| {
                        Error::Internal("Report vanished after duplicate insert".to_string())
                    })
            }
            Err(e) => Err(e),
        }
    }

    async fn cached(&self, stage: &str, key: Uuid, force: bool) -> Result<Option<JsonValue>> {
        if force {
            return Ok(None);
        }
        self.store.artifact(stage, key).await
    }

    async fn cached_ai_analysis(
        &self,
        attempt: &Attempt,
        student: &Student,
        exam: &Exam,
        breakdown: &ScoreBreakdown,
        force: bool,
    ) -> Result<AiAnalysis> {
        if let Some(cached) = self.cached(stage::AI_ANALYSIS, attempt.id, force).await? {
            tracing::debug!(attempt_id = %attempt.id, "AI analysis cache hit");
            return Ok(serde_json::from_value(cached)?);
        }

        let analysis = self
            .ai
            .analyze(&student.name, &student.grade_label, &exam.title, breakdown)
            .await?;
        self.store
            .put_artifact(stage::AI_ANALYSIS, attempt.id, &serde_json::to_value(&analysis)?)
            .await?;
        Ok(analysis)
    }

    pub async fn get_report(&self, attempt_id: Uuid) -> Result<Report> {
        self.store
            .find_report(attempt_id)
            .await?
            .ok_or_else(|| Error::NotFound("No report exists for this attempt".to_string()))
    }

    pub async fn find_report(&self, attempt_id: Uuid) -> Result<Option<Report>> {
        self.store.find_report(attempt_id).await
    }

    pub async fn delete_report(&self, attempt_id: Uuid) -> Result<()> {
        if self.store.delete_report(attempt_id).await? == 0 {
            return Err(Error::NotFound("No report exists for this attempt".to_string()));
        }
        Ok(())
    }
}

/// Merge the AI narrative into the numeric structure. Any domain or
/// strength/weakness entry the AI skipped gets a deterministic templated
/// sentence so every entry carries non-empty analysis text.
pub fn assemble(
    student: &Student,
    exam: &Exam,
    breakdown: &ScoreBreakdown,
    analysis: &AiAnalysis,
) -> ReportContent {
    let domains: Vec<DomainReportEntry> = breakdown
        .domains
        .iter()
        .map(|d| {
            let narrative = analysis
                .domain_analysis
                .get(&d.domain)
                .filter(|s| !s.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| ai_service::domain_sentence(&d.domain, d.percentage));
            DomainReportEntry {
                domain: d.domain.clone(),
                correct: d.correct,
                total: d.total,
                earned_points: d.earned_points,
                max_points: d.max_points,
                percentage: d.percentage,
                classification: d.classification,
                analysis: narrative,
            }
        })
        .collect();

    let weak_domains = breakdown.weak_domains();
    let strong_domains = breakdown.strong_domains();

    let strength_analysis = non_empty_or(&analysis.strength_analysis, || {
        if strong_domains.is_empty() {
            "정답률 80% 이상의 강점 영역이 없습니다.".to_string()
        } else {
            format!("강점 영역: {} (정답률 80% 이상)", strong_domains.join(", "))
        }
    });
    let weakness_analysis = non_empty_or(&analysis.weakness_analysis, || {
        if weak_domains.is_empty() {
            "정답률 60% 미만의 취약 영역이 없습니다.".to_string()
        } else {
            format!("취약 영역: {} (정답률 60% 미만)", weak_domains.join(", "))
        }
    });

    let learning_strategy = if analysis.learning_strategy.is_empty() {
        ai_service::offline_analysis(&student.name, breakdown).learning_strategy
    } else {
        analysis.learning_strategy.clone()
    };

    let recommendations: Vec<String> = learning_strategy
        .iter()
        .flat_map(|s| s.actions.iter().cloned())
        .collect();

    let predicted_progress =
        predicted_progress(breakdown.grading.score, breakdown.grading.max_score);
    let predicted_grade = predicted_progress
        .last()
        .map(|p| {
            GradingService::grade_band(GradingService::percentage(
                p.score,
                breakdown.grading.max_score,
            ))
        })
        .unwrap_or(breakdown.grading.grade);

    ReportContent {
        student_name: student.name.clone(),
        grade_label: student.grade_label.clone(),
        exam_title: exam.title.clone(),
        subject: exam.subject.clone(),
        score: breakdown.grading.score,
        max_score: breakdown.grading.max_score,
        correct_count: breakdown.grading.correct_count,
        grade: breakdown.grading.grade,
        summary: analysis.summary.clone(),
        domains,
        strength_analysis,
        weakness_analysis,
        propensity: analysis.propensity.clone(),
        learning_strategy,
        weak_domains,
        recommendations,
        predicted_progress,
        predicted_grade,
    }
}

fn non_empty_or<F: FnOnce() -> String>(text: &str, fallback: F) -> String {
    if text.trim().is_empty() {
        fallback()
    } else {
        text.to_string()
    }
}

/// Score projection: current score plus monotonically non-decreasing points
/// at monthly intervals, each closing 15% of the remaining gap to the
/// maximum, capped at the maximum possible score.
pub fn predicted_progress(score: i32, max_score: i32) -> Vec<ProgressPoint> {
    let mut points = vec![ProgressPoint {
        label: "현재".to_string(),
        score,
    }];
    let gap = (max_score - score).max(0) as f64;
    for i in 1..=PROJECTION_INTERVALS {
        let projected = score as f64 + gap * PROJECTION_GAP_CLOSE * i as f64;
        points.push(ProgressPoint {
            label: format!("{}개월 후", i),
            score: (projected.round() as i32).min(max_score),
        });
    }
    points
}

/// Render the merged report into a fixed multi-section static HTML document.
pub fn render_html(content: &ReportContent) -> String {
    let mut domain_rows = String::new();
    for d in &content.domains {
        let badge = match d.classification {
            Classification::Strength => "강점",
            Classification::Neutral => "보통",
            Classification::Weakness => "약점",
        };
        domain_rows.push_str(&format!(
            "<tr><td>{}</td><td>{}/{}</td><td>{}/{}</td><td>{}%</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&d.domain),
            d.correct,
            d.total,
            d.earned_points,
            d.max_points,
            d.percentage,
            badge,
            escape_html(&d.analysis)
        ));
    }

    let mut strategy_items = String::new();
    for s in &content.learning_strategy {
        let actions = s
            .actions
            .iter()
            .map(|a| format!("<li>{}</li>", escape_html(a)))
            .collect::<Vec<_>>()
            .join("");
        strategy_items.push_str(&format!(
            "<li><strong>{}: {}</strong><ul>{}</ul></li>\n",
            escape_html(&s.stage),
            escape_html(&s.focus),
            actions
        ));
    }

    let mut progress_items = String::new();
    for p in &content.predicted_progress {
        progress_items.push_str(&format!(
            "<li>{}: {}점</li>\n",
            escape_html(&p.label),
            p.score
        ));
    }

    let weak_list = if content.weak_domains.is_empty() {
        "없음".to_string()
    } else {
        escape_html(&content.weak_domains.join(", "))
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="ko">
<head>
<meta charset="utf-8">
<title>{title} 학습 분석 리포트</title>
</head>
<body>
<section id="header">
<h1>{title} 학습 분석 리포트</h1>
<p>{student} ({grade_label}) · {subject}</p>
<p>점수: {score}/{max_score} · 정답 {correct_count}문항 · {grade}등급</p>
</section>
<section id="summary">
<h2>종합 분석</h2>
<p>{summary}</p>
</section>
<section id="domains">
<h2>영역별 분석</h2>
<table>
<thead><tr><th>영역</th><th>정답</th><th>배점</th><th>정답률</th><th>평가</th><th>분석</th></tr></thead>
<tbody>
{domain_rows}</tbody>
</table>
</section>
<section id="strengths">
<h2>강점</h2>
<p>{strength}</p>
</section>
<section id="weaknesses">
<h2>약점</h2>
<p>취약 영역: {weak_list}</p>
<p>{weakness}</p>
</section>
<section id="propensity">
<h2>학습 성향: {propensity_name}</h2>
<p>{propensity_desc}</p>
</section>
<section id="strategy">
<h2>학습 전략</h2>
<ol>
{strategy_items}</ol>
</section>
<section id="projection">
<h2>성적 예측 ({predicted_grade}등급 예상)</h2>
<ul>
{progress_items}</ul>
</section>
</body>
</html>"#,
        title = escape_html(&content.exam_title),
        student = escape_html(&content.student_name),
        grade_label = escape_html(&content.grade_label),
        subject = escape_html(&content.subject),
        score = content.score,
        max_score = content.max_score,
        correct_count = content.correct_count,
        grade = content.grade,
        summary = escape_html(&content.summary),
        domain_rows = domain_rows,
        strength = escape_html(&content.strength_analysis),
        weak_list = weak_list,
        weakness = escape_html(&content.weakness_analysis),
        propensity_name = escape_html(&content.propensity.name),
        propensity_desc = escape_html(&content.propensity.description),
        strategy_items = strategy_items,
        predicted_grade = content.predicted_grade,
        progress_items = progress_items,
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::attempt::status;
    use crate::services::ai_service::MockAnalysisProvider;
    use crate::services::analysis_service::AnalysisService;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Mutex;
    use std::time::Duration;

    fn student() -> Student {
        Student {
            id: Uuid::new_v4(),
            name: "김민준".to_string(),
            grade_label: "고2".to_string(),
            branch: Some("강남".to_string()),
            created_at: None,
        }
    }

    fn exam() -> Exam {
        Exam {
            id: Uuid::new_v4(),
            title: "3월 모의고사".to_string(),
            subject: "국어".to_string(),
            grade_label: "고2".to_string(),
            questions: json!([
                {"number": 1, "domain": "독서", "difficulty": "mid", "answer": 1, "points": 2},
                {"number": 2, "domain": "독서", "difficulty": "mid", "answer": 2, "points": 2},
                {"number": 3, "domain": "문학", "difficulty": "high", "answer": 3, "points": 3}
            ]),
            total_score: 7,
            created_at: None,
            updated_at: None,
        }
    }

    fn breakdown() -> ScoreBreakdown {
        let exam = exam();
        AnalysisService::breakdown(&exam.question_list(), &json!({"1": 1, "2": 2, "3": 1}))
    }

    fn sparse_analysis() -> AiAnalysis {
        AiAnalysis {
            summary: "전반적으로 독서 영역이 안정적입니다.".to_string(),
            domain_analysis: BTreeMap::from([("독서".to_string(), "독서는 우수합니다.".to_string())]),
            strength_analysis: String::new(),
            weakness_analysis: String::new(),
            propensity: Propensity {
                name: "성장 잠재형".to_string(),
                description: "편차가 있는 성향".to_string(),
            },
            learning_strategy: vec![],
        }
    }

    fn graded_attempt(exam: &Exam, student: &Student) -> Attempt {
        Attempt {
            id: Uuid::new_v4(),
            exam_id: exam.id,
            student_id: student.id,
            access_token: "tok".to_string(),
            answers: Some(json!({"1": 1, "2": 2, "3": 1})),
            score: Some(4),
            max_score: Some(7),
            correct_count: Some(2),
            grade: Some(4),
            status: status::GRADED.to_string(),
            started_at: None,
            submitted_at: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn provider_json() -> String {
        json!({
            "summary": "요약",
            "domain_analysis": {"독서": "우수", "문학": "보완 필요"},
            "strength_analysis": "강점",
            "weakness_analysis": "약점",
            "propensity": {"name": "안정형", "description": "설명"},
            "learning_strategy": [
                {"stage": "1단계", "focus": "복습", "actions": ["오답 복습"]}
            ]
        })
        .to_string()
    }

    /// Single-attempt in-memory backend for pipeline tests.
    struct MemoryStore {
        attempt: Attempt,
        exam: Exam,
        student: Student,
        reports: Mutex<Vec<Report>>,
        artifacts: Mutex<HashMap<(String, Uuid), JsonValue>>,
    }

    impl MemoryStore {
        fn new(attempt: Attempt, exam: Exam, student: Student) -> Self {
            Self {
                attempt,
                exam,
                student,
                reports: Mutex::new(Vec::new()),
                artifacts: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl ReportStore for MemoryStore {
        async fn attempt(&self, attempt_id: Uuid) -> Result<Option<Attempt>> {
            Ok((self.attempt.id == attempt_id).then(|| self.attempt.clone()))
        }

        async fn exam(&self, exam_id: Uuid) -> Result<Option<Exam>> {
            Ok((self.exam.id == exam_id).then(|| self.exam.clone()))
        }

        async fn student(&self, student_id: Uuid) -> Result<Option<Student>> {
            Ok((self.student.id == student_id).then(|| self.student.clone()))
        }

        async fn find_report(&self, attempt_id: Uuid) -> Result<Option<Report>> {
            Ok(self
                .reports
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.attempt_id == attempt_id)
                .cloned())
        }

        async fn insert_report(
            &self,
            attempt_id: Uuid,
            content: &ReportContent,
            html: &str,
        ) -> Result<Report> {
            let report = Report {
                id: Uuid::new_v4(),
                attempt_id,
                summary: content.summary.clone(),
                weak_domains: serde_json::to_value(&content.weak_domains)?,
                recommendations: serde_json::to_value(&content.recommendations)?,
                predicted_grade: content.predicted_grade,
                content: serde_json::to_value(content)?,
                html: html.to_string(),
                created_at: None,
            };
            self.reports.lock().unwrap().push(report.clone());
            Ok(report)
        }

        async fn delete_report(&self, attempt_id: Uuid) -> Result<u64> {
            let mut reports = self.reports.lock().unwrap();
            let before = reports.len();
            reports.retain(|r| r.attempt_id != attempt_id);
            Ok((before - reports.len()) as u64)
        }

        async fn artifact(&self, stage: &str, key: Uuid) -> Result<Option<JsonValue>> {
            Ok(self
                .artifacts
                .lock()
                .unwrap()
                .get(&(stage.to_string(), key))
                .cloned())
        }

        async fn put_artifact(&self, stage: &str, key: Uuid, payload: &JsonValue) -> Result<()> {
            self.artifacts
                .lock()
                .unwrap()
                .insert((stage.to_string(), key), payload.clone());
            Ok(())
        }
    }

    fn service_with_provider(
        store: Arc<MemoryStore>,
        expected_calls: usize,
    ) -> ReportService {
        let mut provider = MockAnalysisProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_complete()
            .times(expected_calls)
            .returning(|_| Ok(provider_json()));
        let ai = Arc::new(AiService::with_providers(
            vec![Box::new(provider)],
            Duration::ZERO,
        ));
        ReportService::with_store(store, ai)
    }

    #[tokio::test]
    async fn second_generate_replays_same_report_without_provider_call() {
        let exam = exam();
        let student = student();
        let attempt = graded_attempt(&exam, &student);
        let attempt_id = attempt.id;
        let store = Arc::new(MemoryStore::new(attempt, exam, student));
        let svc = service_with_provider(store, 1);

        let first = match svc.generate_report(attempt_id, false).await.unwrap() {
            ReportOutcome::Created(report) => report,
            ReportOutcome::Existing(_) => panic!("first call must create"),
        };

        match svc.generate_report(attempt_id, false).await.unwrap() {
            ReportOutcome::Existing(report) => assert_eq!(report.id, first.id),
            ReportOutcome::Created(_) => panic!("second call must replay"),
        }
    }

    #[tokio::test]
    async fn delete_then_regenerate_issues_new_id_with_same_weakness_set() {
        let exam = exam();
        let student = student();
        let attempt = graded_attempt(&exam, &student);
        let attempt_id = attempt.id;
        let store = Arc::new(MemoryStore::new(attempt, exam, student));
        // The ai_analysis artifact survives the report delete, so the
        // provider is called exactly once across both generations.
        let svc = service_with_provider(store, 1);

        let first = svc
            .generate_report(attempt_id, false)
            .await
            .unwrap()
            .into_report();
        svc.delete_report(attempt_id).await.unwrap();

        let second = match svc.generate_report(attempt_id, false).await.unwrap() {
            ReportOutcome::Created(report) => report,
            ReportOutcome::Existing(_) => panic!("regenerate after delete must create"),
        };
        assert_ne!(second.id, first.id);
        assert_eq!(second.weak_domains, first.weak_domains);
    }

    #[tokio::test]
    async fn force_against_existing_report_is_a_conflict() {
        let exam = exam();
        let student = student();
        let attempt = graded_attempt(&exam, &student);
        let attempt_id = attempt.id;
        let store = Arc::new(MemoryStore::new(attempt, exam, student));
        let svc = service_with_provider(store, 1);

        svc.generate_report(attempt_id, false).await.unwrap();
        let err = svc.generate_report(attempt_id, true).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn deleting_a_missing_report_is_not_found() {
        let exam = exam();
        let student = student();
        let attempt = graded_attempt(&exam, &student);
        let attempt_id = attempt.id;
        let store = Arc::new(MemoryStore::new(attempt, exam, student));
        let svc = service_with_provider(store, 0);

        let err = svc.delete_report(attempt_id).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn assemble_fills_entries_the_ai_skipped() {
        let content = assemble(&student(), &exam(), &breakdown(), &sparse_analysis());

        let literature = content.domains.iter().find(|d| d.domain == "문학").unwrap();
        assert!(!literature.analysis.is_empty());
        assert!(literature.analysis.contains("문학"));

        let reading = content.domains.iter().find(|d| d.domain == "독서").unwrap();
        assert_eq!(reading.analysis, "독서는 우수합니다.");

        assert!(!content.strength_analysis.is_empty());
        assert!(!content.weakness_analysis.is_empty());
        assert!(!content.learning_strategy.is_empty());
        assert!(!content.recommendations.is_empty());
        assert_eq!(content.weak_domains, vec!["문학".to_string()]);
    }

    #[test]
    fn progress_projection_is_monotone_and_capped() {
        let points = predicted_progress(40, 100);
        assert_eq!(points[0].score, 40);
        for pair in points.windows(2) {
            assert!(pair[1].score >= pair[0].score);
        }
        assert!(points.iter().all(|p| p.score <= 100));

        let full = predicted_progress(100, 100);
        assert!(full.iter().all(|p| p.score == 100));
    }

    #[test]
    fn projection_handles_zero_max() {
        let points = predicted_progress(0, 0);
        assert!(points.iter().all(|p| p.score == 0));
    }

    #[test]
    fn predicted_grade_never_worse_than_current() {
        let content = assemble(&student(), &exam(), &breakdown(), &sparse_analysis());
        assert!(content.predicted_grade <= content.grade);
    }

    #[test]
    fn html_contains_every_section() {
        let content = assemble(&student(), &exam(), &breakdown(), &sparse_analysis());
        let html = render_html(&content);
        for id in [
            "header",
            "summary",
            "domains",
            "strengths",
            "weaknesses",
            "propensity",
            "strategy",
            "projection",
        ] {
            assert!(html.contains(&format!("id=\"{}\"", id)), "missing section {}", id);
        }
        assert!(html.contains("김민준"));
        assert!(html.contains("3월 모의고사"));
        assert!(html.contains("문학"));
    }

    #[test]
    fn html_escapes_markup_in_narrative() {
        let mut analysis = sparse_analysis();
        analysis.summary = "<script>alert(1)</script>".to_string();
        let content = assemble(&student(), &exam(), &breakdown(), &analysis);
        let html = render_html(&content);
        assert!(!html.contains("<script>alert"));
        assert!(html.contains("&lt;script&gt;"));
    }
}

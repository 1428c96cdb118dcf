use crate::error::{Error, Result};
use crate::services::analysis_service::ScoreBreakdown;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;

/// Structured narrative analysis returned by a provider (or synthesized
/// offline). Field names mirror the JSON schema demanded by the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub summary: String,
    #[serde(default)]
    pub domain_analysis: BTreeMap<String, String>,
    #[serde(default)]
    pub strength_analysis: String,
    #[serde(default)]
    pub weakness_analysis: String,
    pub propensity: Propensity,
    #[serde(default)]
    pub learning_strategy: Vec<StrategyStage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Propensity {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStage {
    pub stage: String,
    pub focus: String,
    #[serde(default)]
    pub actions: Vec<String>,
}

/// One generative-AI backend. Implementations submit a prompt and return the
/// raw completion text; JSON parsing and retries live in `AiService`.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AnalysisProvider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct GeminiProvider {
    client: Client,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(api_key: String, client: Client) -> Self {
        Self { client, api_key }
    }
}

#[async_trait::async_trait]
impl AnalysisProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let payload = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": 0.4,
                "maxOutputTokens": 2048,
                "responseMimeType": "application/json"
            }
        });

        let res = self
            .client
            .post(format!(
                "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent?key={}",
                self.api_key
            ))
            .json(&payload)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        if res.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let text = res.text().await.unwrap_or_default();
            return Err(Error::RateLimited(format!("Gemini quota exhausted: {}", text)));
        }
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Gemini API Error {}: {}", status, text).into());
        }

        let body: JsonValue = res.json().await?;
        body.get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response format").into())
    }
}

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, client: Client) -> Self {
        Self { client, api_key }
    }
}

#[async_trait::async_trait]
impl AnalysisProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let payload = serde_json::json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "response_format": { "type": "json_object" },
            "temperature": 0.4
        });

        let res = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(120))
            .send()
            .await?;

        if res.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let text = res.text().await.unwrap_or_default();
            return Err(Error::RateLimited(format!("OpenAI quota exhausted: {}", text)));
        }
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("OpenAI API Error {}: {}", status, text).into());
        }

        let body: JsonValue = res.json().await?;
        body.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response format").into())
    }
}

/// Ordered provider chain with retry/backoff and a guaranteed offline
/// terminal strategy. Constructed once in `AppState` and injected into the
/// report pipeline.
pub struct AiService {
    providers: Vec<Box<dyn AnalysisProvider>>,
    max_attempts: u32,
    backoff_base: Duration,
}

impl AiService {
    pub fn new(
        gemini_api_key: Option<String>,
        openai_api_key: Option<String>,
        client: Client,
    ) -> Self {
        let mut providers: Vec<Box<dyn AnalysisProvider>> = Vec::new();
        if let Some(key) = gemini_api_key {
            providers.push(Box::new(GeminiProvider::new(key, client.clone())));
        }
        if let Some(key) = openai_api_key {
            providers.push(Box::new(OpenAiProvider::new(key, client)));
        }
        Self {
            providers,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Test constructor: explicit providers, no real backoff delay.
    pub fn with_providers(providers: Vec<Box<dyn AnalysisProvider>>, backoff_base: Duration) -> Self {
        Self {
            providers,
            max_attempts: 3,
            backoff_base,
        }
    }

    /// Run the analysis prompt through the provider chain. Each provider gets
    /// up to three attempts with doubling backoff; a malformed JSON response
    /// counts as a failed attempt. Quota exhaustion is surfaced as
    /// `Error::RateLimited` instead of silently degrading; any other total
    /// failure falls back to the deterministic offline analysis.
    pub async fn analyze(
        &self,
        student_name: &str,
        grade_label: &str,
        exam_title: &str,
        breakdown: &ScoreBreakdown,
    ) -> Result<AiAnalysis> {
        let prompt = build_analysis_prompt(student_name, grade_label, exam_title, breakdown);

        let mut rate_limited: Option<String> = None;
        for provider in &self.providers {
            match self.try_provider(provider.as_ref(), &prompt).await {
                Ok(analysis) => return Ok(analysis),
                Err(Error::RateLimited(msg)) => {
                    tracing::warn!(provider = provider.name(), "AI provider rate limited");
                    rate_limited = Some(msg);
                }
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = ?e, "AI provider failed");
                }
            }
        }

        if let Some(msg) = rate_limited {
            return Err(Error::RateLimited(msg));
        }

        tracing::warn!("All AI providers unavailable, generating offline analysis");
        Ok(offline_analysis(student_name, breakdown))
    }

    async fn try_provider(
        &self,
        provider: &dyn AnalysisProvider,
        prompt: &str,
    ) -> Result<AiAnalysis> {
        let mut delay = self.backoff_base;
        let mut last_err = Error::Internal("No provider attempt made".to_string());

        for attempt in 1..=self.max_attempts {
            match provider.complete(prompt).await {
                Ok(text) => match parse_analysis(&text) {
                    Ok(analysis) => return Ok(analysis),
                    Err(e) => {
                        tracing::warn!(
                            provider = provider.name(),
                            attempt,
                            "Malformed analysis JSON: {}",
                            e
                        );
                        last_err = e;
                    }
                },
                Err(e) => {
                    tracing::warn!(provider = provider.name(), attempt, error = ?e, "AI call failed");
                    last_err = e;
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(last_err)
    }
}

/// Deterministically render the analysis prompt. The model is told the exact
/// JSON schema and forbidden from emitting prose outside it.
pub fn build_analysis_prompt(
    student_name: &str,
    grade_label: &str,
    exam_title: &str,
    breakdown: &ScoreBreakdown,
) -> String {
    let mut stats = String::new();
    stats.push_str(&format!(
        "총점: {}/{} ({}문항 중 {}문항 정답, 등급 {})\n",
        breakdown.grading.score,
        breakdown.grading.max_score,
        breakdown.correct_questions.len() + breakdown.incorrect_questions.len(),
        breakdown.grading.correct_count,
        breakdown.grading.grade
    ));

    stats.push_str("영역별 성취도:\n");
    for d in &breakdown.domains {
        stats.push_str(&format!(
            "- {}: {}/{}문항 정답 ({}%), 배점 {}/{}\n",
            d.domain, d.correct, d.total, d.percentage, d.earned_points, d.max_points
        ));
    }

    stats.push_str("난이도별 성취도:\n");
    for d in &breakdown.difficulties {
        stats.push_str(&format!(
            "- {}: {}/{}문항 정답 ({}%)\n",
            d.difficulty.label(),
            d.correct,
            d.total,
            d.percentage
        ));
    }

    if !breakdown.incorrect_questions.is_empty() {
        stats.push_str("오답 문항:\n");
        for q in &breakdown.incorrect_questions {
            stats.push_str(&format!(
                "- {}번 ({} / {}{}) 학생 답: {}\n",
                q.number,
                q.domain,
                q.difficulty.label(),
                q.subcategory
                    .as_deref()
                    .map(|s| format!(" / {}", s))
                    .unwrap_or_default(),
                q.student_answer.as_deref().unwrap_or("무응답")
            ));
        }
    }

    format!(
        r#"당신은 학원 국어 학습 분석 전문가입니다. 아래 시험 결과를 분석하여 한국어로 학습 리포트를 작성하세요.

학생: {student_name} ({grade_label})
시험: {exam_title}

{stats}
반드시 아래 스키마를 따르는 JSON 객체 하나만 출력하세요. JSON 외의 설명, 인사말, 마크다운은 절대 출력하지 마세요.

{{
  "summary": "전체 성취도 요약 (string)",
  "domain_analysis": {{ "영역명": "해당 영역 분석 (string)" }},
  "strength_analysis": "강점 영역 분석 (string)",
  "weakness_analysis": "약점 영역 분석 (string)",
  "propensity": {{ "name": "학습 성향 이름", "description": "성향 설명" }},
  "learning_strategy": [
    {{ "stage": "1단계", "focus": "중점 내용", "actions": ["구체적 실행 항목"] }}
  ]
}}"#
    )
}

/// Strip a Markdown code fence (``` or ```json) wrapping, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

pub fn parse_analysis(text: &str) -> Result<AiAnalysis> {
    let cleaned = strip_code_fences(text);
    let analysis: AiAnalysis = serde_json::from_str(cleaned)?;
    if analysis.summary.trim().is_empty() {
        return Err(anyhow::anyhow!("Analysis summary is empty").into());
    }
    Ok(analysis)
}

/// Terminal strategy: build the analysis purely from the numeric statistics.
/// No network, cannot fail.
pub fn offline_analysis(student_name: &str, breakdown: &ScoreBreakdown) -> AiAnalysis {
    let pct = crate::services::grading_service::GradingService::percentage(
        breakdown.grading.score,
        breakdown.grading.max_score,
    )
    .round() as i32;

    let summary = format!(
        "{} 학생은 이번 시험에서 {}점 만점에 {}점({}%)을 받아 {}등급을 기록했습니다. 총 {}문항 중 {}문항을 맞혔습니다.",
        student_name,
        breakdown.grading.max_score,
        breakdown.grading.score,
        pct,
        breakdown.grading.grade,
        breakdown.correct_questions.len() + breakdown.incorrect_questions.len(),
        breakdown.grading.correct_count
    );

    let mut domain_analysis = BTreeMap::new();
    for d in &breakdown.domains {
        domain_analysis.insert(d.domain.clone(), domain_sentence(&d.domain, d.percentage));
    }

    let strong = breakdown.strong_domains();
    let weak = breakdown.weak_domains();

    let strength_analysis = if strong.is_empty() {
        "이번 시험에서 정답률 80% 이상의 강점 영역은 없었습니다. 기본 개념부터 차근차근 다져야 합니다.".to_string()
    } else {
        format!(
            "{} 영역에서 정답률 80% 이상의 안정적인 성취를 보였습니다. 현재 수준을 유지하면서 고난도 문항으로 확장하는 것이 좋습니다.",
            strong.join(", ")
        )
    };

    let weakness_analysis = if weak.is_empty() {
        "정답률 60% 미만의 취약 영역은 없었습니다. 전 영역에서 고른 성취를 보이고 있습니다.".to_string()
    } else {
        format!(
            "{} 영역의 정답률이 60% 미만으로 집중 보완이 필요합니다. 오답 문항을 다시 풀며 개념의 빈틈을 확인하세요.",
            weak.join(", ")
        )
    };

    let propensity = if pct >= 80 {
        Propensity {
            name: "안정 성취형".to_string(),
            description: "전반적으로 높은 정답률을 유지하는 학습 성향입니다. 실수 관리와 고난도 문항 훈련이 다음 과제입니다."
                .to_string(),
        }
    } else if pct >= 50 {
        Propensity {
            name: "성장 잠재형".to_string(),
            description: "기본기는 갖추었으나 영역별 편차가 있는 성향입니다. 취약 영역 보완 시 등급 상승 여지가 큽니다."
                .to_string(),
        }
    } else {
        Propensity {
            name: "기초 보강형".to_string(),
            description: "개념 기초부터 다시 쌓아야 하는 단계입니다. 쉬운 문항부터 정답률을 끌어올리는 전략이 필요합니다."
                .to_string(),
        }
    };

    let focus_domains = if weak.is_empty() {
        breakdown
            .domains
            .iter()
            .map(|d| d.domain.clone())
            .collect::<Vec<_>>()
    } else {
        weak.clone()
    };
    let focus = focus_domains.join(", ");

    let learning_strategy = vec![
        StrategyStage {
            stage: "1단계".to_string(),
            focus: format!("오답 복습: {}", focus),
            actions: vec![
                "이번 시험의 오답 문항을 영역별로 분류해 다시 풀기".to_string(),
                "틀린 이유를 개념 부족 / 실수 / 시간 부족으로 구분해 기록하기".to_string(),
            ],
        },
        StrategyStage {
            stage: "2단계".to_string(),
            focus: format!("취약 영역 개념 보강: {}", focus),
            actions: vec![
                "취약 영역의 핵심 개념 정리 노트 작성하기".to_string(),
                "유사 유형 문항을 매일 3문항 이상 풀기".to_string(),
            ],
        },
        StrategyStage {
            stage: "3단계".to_string(),
            focus: "실전 감각 유지".to_string(),
            actions: vec![
                "주 1회 실전 모의고사로 시간 관리 연습하기".to_string(),
                "강점 영역은 고난도 문항 위주로 유지 학습하기".to_string(),
            ],
        },
    ];

    AiAnalysis {
        summary,
        domain_analysis,
        strength_analysis,
        weakness_analysis,
        propensity,
        learning_strategy,
    }
}

/// Templated per-domain sentence used both by the offline analysis and by
/// the report assembler when the AI skipped a domain.
pub fn domain_sentence(domain: &str, percentage: i32) -> String {
    if percentage >= 80 {
        format!(
            "{} 영역 정답률 {}%로 우수한 성취를 보였습니다. 현재 수준을 유지하세요.",
            domain, percentage
        )
    } else if percentage >= 60 {
        format!(
            "{} 영역 정답률 {}%로 보통 수준입니다. 오답 유형을 점검하면 상승 여지가 있습니다.",
            domain, percentage
        )
    } else {
        format!(
            "{} 영역 정답률 {}%로 집중 보완이 필요합니다. 기본 개념부터 복습하세요.",
            domain, percentage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analysis_service::AnalysisService;
    use serde_json::json;

    fn sample_breakdown() -> ScoreBreakdown {
        let questions: Vec<crate::models::question::Question> = serde_json::from_value(json!([
            {"number": 1, "domain": "독서", "difficulty": "low", "answer": 1, "points": 2},
            {"number": 2, "domain": "독서", "difficulty": "mid", "answer": 2, "points": 2},
            {"number": 3, "domain": "문학", "difficulty": "high", "answer": 3, "points": 3},
            {"number": 4, "domain": "문법", "difficulty": "mid", "answer": 4, "points": 3}
        ]))
        .unwrap();
        let answers = json!({"1": 1, "2": 2, "3": 1, "4": 2});
        AnalysisService::breakdown(&questions, &answers)
    }

    fn valid_analysis_json() -> String {
        json!({
            "summary": "요약",
            "domain_analysis": {"독서": "우수"},
            "strength_analysis": "강점",
            "weakness_analysis": "약점",
            "propensity": {"name": "안정형", "description": "설명"},
            "learning_strategy": [
                {"stage": "1단계", "focus": "복습", "actions": ["오답 복습"]}
            ]
        })
        .to_string()
    }

    #[test]
    fn prompt_contains_stats_and_schema() {
        let breakdown = sample_breakdown();
        let prompt = build_analysis_prompt("김민준", "고2", "3월 모의고사", &breakdown);
        assert!(prompt.contains("김민준"));
        assert!(prompt.contains("3월 모의고사"));
        assert!(prompt.contains("독서"));
        assert!(prompt.contains("\"summary\""));
        assert!(prompt.contains("\"propensity\""));
        assert!(prompt.contains("\"learning_strategy\""));
        // Deterministic rendering.
        assert_eq!(
            prompt,
            build_analysis_prompt("김민준", "고2", "3월 모의고사", &breakdown)
        );
    }

    #[test]
    fn strips_markdown_fences_before_parsing() {
        let fenced = format!("```json\n{}\n```", valid_analysis_json());
        let analysis = parse_analysis(&fenced).unwrap();
        assert_eq!(analysis.summary, "요약");
        assert_eq!(analysis.propensity.name, "안정형");

        let bare = parse_analysis(&valid_analysis_json()).unwrap();
        assert_eq!(analysis, bare);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(parse_analysis("not json at all").is_err());
        assert!(parse_analysis("```json\n{\"summary\": \"\"}\n```").is_err());
    }

    #[test]
    fn offline_analysis_covers_every_domain() {
        let breakdown = sample_breakdown();
        let analysis = offline_analysis("김민준", &breakdown);
        assert!(!analysis.summary.is_empty());
        for d in &breakdown.domains {
            let text = analysis.domain_analysis.get(&d.domain).unwrap();
            assert!(!text.is_empty());
        }
        assert!(!analysis.learning_strategy.is_empty());
    }

    #[tokio::test]
    async fn retries_then_succeeds_on_third_attempt() {
        let mut provider = MockAnalysisProvider::new();
        provider.expect_name().return_const("mock");
        let mut calls = 0;
        provider.expect_complete().times(3).returning(move |_| {
            calls += 1;
            if calls < 3 {
                Err(anyhow::anyhow!("transient").into())
            } else {
                Ok(valid_analysis_json())
            }
        });

        let svc = AiService::with_providers(vec![Box::new(provider)], Duration::ZERO);
        let analysis = svc
            .analyze("김민준", "고2", "모의고사", &sample_breakdown())
            .await
            .unwrap();
        assert_eq!(analysis.summary, "요약");
    }

    #[tokio::test]
    async fn falls_back_to_secondary_provider() {
        let mut primary = MockAnalysisProvider::new();
        primary.expect_name().return_const("primary");
        primary
            .expect_complete()
            .times(3)
            .returning(|_| Err(anyhow::anyhow!("down").into()));

        let mut secondary = MockAnalysisProvider::new();
        secondary.expect_name().return_const("secondary");
        secondary
            .expect_complete()
            .times(1)
            .returning(|_| Ok(valid_analysis_json()));

        let svc =
            AiService::with_providers(vec![Box::new(primary), Box::new(secondary)], Duration::ZERO);
        let analysis = svc
            .analyze("김민준", "고2", "모의고사", &sample_breakdown())
            .await
            .unwrap();
        assert_eq!(analysis.propensity.name, "안정형");
    }

    #[tokio::test]
    async fn total_failure_degrades_to_offline_analysis() {
        let mut provider = MockAnalysisProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_complete()
            .times(3)
            .returning(|_| Err(anyhow::anyhow!("unreachable").into()));

        let svc = AiService::with_providers(vec![Box::new(provider)], Duration::ZERO);
        let analysis = svc
            .analyze("김민준", "고2", "모의고사", &sample_breakdown())
            .await
            .unwrap();
        assert!(!analysis.summary.is_empty());
    }

    #[tokio::test]
    async fn no_providers_still_yields_analysis() {
        let svc = AiService::with_providers(vec![], Duration::ZERO);
        let analysis = svc
            .analyze("김민준", "고2", "모의고사", &sample_breakdown())
            .await
            .unwrap();
        assert!(!analysis.summary.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_is_surfaced_not_swallowed() {
        let mut provider = MockAnalysisProvider::new();
        provider.expect_name().return_const("mock");
        provider
            .expect_complete()
            .times(3)
            .returning(|_| Err(Error::RateLimited("quota".to_string())));

        let svc = AiService::with_providers(vec![Box::new(provider)], Duration::ZERO);
        let err = svc
            .analyze("김민준", "고2", "모의고사", &sample_breakdown())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
    }

    #[tokio::test]
    async fn malformed_response_counts_as_failed_attempt() {
        let mut provider = MockAnalysisProvider::new();
        provider.expect_name().return_const("mock");
        let mut calls = 0;
        provider.expect_complete().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok("```json\n{broken".to_string())
            } else {
                Ok(valid_analysis_json())
            }
        });

        let svc = AiService::with_providers(vec![Box::new(provider)], Duration::ZERO);
        let analysis = svc
            .analyze("김민준", "고2", "모의고사", &sample_breakdown())
            .await
            .unwrap();
        assert_eq!(analysis.summary, "요약");
    }
}

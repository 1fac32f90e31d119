//! LLM answer evaluation
//!
//! Five criteria scored 0-20 by the LLM, combined with configurable weights
//! into a 0-100 total checked against the domain's threshold. Evaluator
//! failures never fail the pipeline: an unparseable or unreachable judge
//! degrades to a neutral pass with a warning.

use serde::Deserialize;
use std::sync::Arc;

use sodam_config::EvaluationConfig;
use sodam_core::{DomainLabel, EvaluationReport, EvaluationScores};
use sodam_llm::{GenerateOptions, LlmBackend, Message, UsageMeter};
use sodam_rag::ScoredDocument;

/// Answer evaluator
pub struct AnswerEvaluator {
    llm: Arc<dyn LlmBackend>,
    config: EvaluationConfig,
    evaluator_context_length: usize,
}

impl AnswerEvaluator {
    pub fn new(
        llm: Arc<dyn LlmBackend>,
        config: EvaluationConfig,
        evaluator_context_length: usize,
    ) -> Self {
        Self {
            llm,
            config,
            evaluator_context_length,
        }
    }

    /// Pass threshold for a domain (law/finance stricter, startup looser)
    pub fn threshold_for(&self, domain: DomainLabel) -> f32 {
        self.config
            .domain_evaluation_thresholds
            .get(domain.as_collection())
            .copied()
            .unwrap_or(self.config.evaluation_threshold)
    }

    /// Evaluate an answer against its retrieval context.
    pub async fn evaluate(
        &self,
        query: &str,
        answer: &str,
        documents: &[ScoredDocument],
        primary: DomainLabel,
        usage: &UsageMeter,
    ) -> EvaluationReport {
        let threshold = self.threshold_for(primary);

        let mut context = String::new();
        for (i, doc) in documents.iter().enumerate() {
            let snippet: String = doc
                .document
                .content
                .chars()
                .take(self.evaluator_context_length)
                .collect();
            context.push_str(&format!("[{}] {}\n", i + 1, snippet));
        }

        let messages = [
            Message::system(
                "당신은 상담 답변 품질 평가자입니다. 질문, 참고 자료, 답변을 보고 \
                 다섯 항목을 각각 0~20점으로 채점하세요: accuracy(자료와의 일치), \
                 completeness(질문 요소 충족), relevance(질문 적합성), \
                 citation([n] 인용의 정확성), retrieval_quality(자료 자체의 적합성). \
                 70점 미만이면 feedback에 개선 방향을 한 문장으로 쓰세요. JSON만 출력: \
                 {\"accuracy\": 0, \"completeness\": 0, \"relevance\": 0, \
                 \"citation\": 0, \"retrieval_quality\": 0, \"feedback\": \"\"}",
            ),
            Message::user(format!(
                "질문: {}\n\n참고 자료:\n{}\n답변:\n{}",
                query, context, answer
            )),
        ];

        let response = self
            .llm
            .generate(
                &messages,
                GenerateOptions {
                    temperature: Some(0.0),
                    max_tokens: Some(300),
                },
            )
            .await;

        match response {
            Ok(result) => {
                usage.record(&result);
                match parse_scores(&result.text) {
                    Some((scores, feedback)) => {
                        let total = self.weighted_total(&scores);
                        let passed = total >= threshold;
                        EvaluationReport {
                            scores,
                            total_score: total,
                            passed,
                            feedback: if passed { None } else { feedback },
                        }
                    }
                    None => {
                        tracing::warn!("evaluation response unparseable, passing with warning");
                        self.neutral_report(threshold)
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "evaluation LLM failed, passing with warning");
                self.neutral_report(threshold)
            }
        }
    }

    /// Alternative phrasings for the bounded post-evaluation retry
    pub async fn alternative_queries(
        &self,
        query: &str,
        feedback: Option<&str>,
        count: usize,
        usage: &UsageMeter,
    ) -> Vec<String> {
        let mut prompt = format!(
            "다음 질문의 답변 품질이 낮았습니다. 더 나은 검색 결과를 얻도록 \
             질문을 {}가지로 다시 써 주세요. 한 줄에 하나씩, 번호를 붙이세요.\n질문: {}",
            count, query
        );
        if let Some(feedback) = feedback {
            prompt.push_str(&format!("\n평가 피드백: {}", feedback));
        }

        let messages = [
            Message::system("당신은 검색 질의를 다듬는 전문가입니다."),
            Message::user(prompt),
        ];

        match self
            .llm
            .generate(
                &messages,
                GenerateOptions {
                    temperature: Some(0.7),
                    max_tokens: Some(200),
                },
            )
            .await
        {
            Ok(result) => {
                usage.record(&result);
                result
                    .text
                    .lines()
                    .map(|l| {
                        l.trim()
                            .trim_start_matches(|c: char| {
                                c.is_ascii_digit() || c == '.' || c == ')' || c == '-'
                            })
                            .trim()
                            .to_string()
                    })
                    .filter(|l| !l.is_empty() && l != query)
                    .take(count)
                    .collect()
            }
            Err(e) => {
                tracing::warn!(error = %e, "alternative query generation failed");
                Vec::new()
            }
        }
    }

    /// Weighted 0-100 total: each criterion is 0-20, so the weighted mean is
    /// scaled by five
    fn weighted_total(&self, scores: &EvaluationScores) -> f32 {
        let w = &self.config.evaluation_weights;
        let weight_sum = w.sum();
        if weight_sum <= 0.0 {
            return 0.0;
        }
        let weighted = scores.accuracy * w.accuracy
            + scores.completeness * w.completeness
            + scores.relevance * w.relevance
            + scores.citation * w.citation
            + scores.retrieval_quality * w.retrieval_quality;
        (weighted / weight_sum) * 5.0
    }

    fn neutral_report(&self, threshold: f32) -> EvaluationReport {
        let per_criterion = threshold / 5.0;
        EvaluationReport {
            scores: EvaluationScores {
                accuracy: per_criterion,
                completeness: per_criterion,
                relevance: per_criterion,
                citation: per_criterion,
                retrieval_quality: per_criterion,
            },
            total_score: threshold,
            passed: true,
            feedback: Some("평가를 완료하지 못해 기준점으로 처리되었습니다".to_string()),
        }
    }
}

#[derive(Deserialize)]
struct WireScores {
    #[serde(default)]
    accuracy: f32,
    #[serde(default)]
    completeness: f32,
    #[serde(default)]
    relevance: f32,
    #[serde(default)]
    citation: f32,
    #[serde(default)]
    retrieval_quality: f32,
    #[serde(default)]
    feedback: Option<String>,
}

fn parse_scores(text: &str) -> Option<(EvaluationScores, Option<String>)> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let wire: WireScores = serde_json::from_str(&text[start..=end]).ok()?;
    let clamp = |v: f32| v.clamp(0.0, 20.0);
    Some((
        EvaluationScores {
            accuracy: clamp(wire.accuracy),
            completeness: clamp(wire.completeness),
            relevance: clamp(wire.relevance),
            citation: clamp(wire.citation),
            retrieval_quality: clamp(wire.retrieval_quality),
        },
        wire.feedback.filter(|f| !f.trim().is_empty()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodam_core::Document;
    use sodam_llm::testing::ScriptedLlm;
    use sodam_llm::LlmError;

    fn evaluator(response: &str) -> AnswerEvaluator {
        AnswerEvaluator::new(
            Arc::new(ScriptedLlm::new(response)),
            EvaluationConfig::default(),
            1500,
        )
    }

    fn docs() -> Vec<ScoredDocument> {
        vec![ScoredDocument::dense(
            Document::new("부가가치세 확정신고는 1월 25일까지"),
            0.9,
        )]
    }

    #[tokio::test]
    async fn test_high_scores_pass() {
        let e = evaluator(
            "{\"accuracy\": 18, \"completeness\": 17, \"relevance\": 19, \
             \"citation\": 16, \"retrieval_quality\": 18, \"feedback\": \"\"}",
        );
        let usage = UsageMeter::new();
        let report = e
            .evaluate("부가세 기한", "1월 25일입니다 [1]", &docs(), DomainLabel::HrLabor, &usage)
            .await;
        assert!(report.passed);
        assert!((report.total_score - 88.0).abs() < 0.5);
        assert!(report.feedback.is_none());
    }

    #[tokio::test]
    async fn test_low_scores_fail_with_feedback() {
        let e = evaluator(
            "{\"accuracy\": 5, \"completeness\": 6, \"relevance\": 8, \
             \"citation\": 4, \"retrieval_quality\": 12, \
             \"feedback\": \"답변이 자료와 어긋납니다\"}",
        );
        let usage = UsageMeter::new();
        let report = e
            .evaluate("부가세 기한", "틀린 답", &docs(), DomainLabel::HrLabor, &usage)
            .await;
        assert!(!report.passed);
        assert_eq!(report.feedback.as_deref(), Some("답변이 자료와 어긋납니다"));
    }

    #[tokio::test]
    async fn test_domain_thresholds_differ() {
        let e = evaluator("{}");
        // Defaults: law/finance 75, startup 65
        assert!(e.threshold_for(DomainLabel::LawCommon) > e.threshold_for(DomainLabel::StartupFunding));
    }

    #[tokio::test]
    async fn test_same_scores_pass_startup_fail_law() {
        let response = "{\"accuracy\": 14, \"completeness\": 14, \"relevance\": 14, \
             \"citation\": 14, \"retrieval_quality\": 14}";
        let usage = UsageMeter::new();

        // Total 70: below law_common's 75, above startup_funding's 65
        let report = evaluator(response)
            .evaluate("q", "a", &docs(), DomainLabel::LawCommon, &usage)
            .await;
        assert!(!report.passed);

        let report = evaluator(response)
            .evaluate("q", "a", &docs(), DomainLabel::StartupFunding, &usage)
            .await;
        assert!(report.passed);
    }

    #[tokio::test]
    async fn test_judge_failure_degrades_to_neutral_pass() {
        let e = AnswerEvaluator::new(
            Arc::new(ScriptedLlm::new("unused").with_failure(LlmError::Timeout)),
            EvaluationConfig::default(),
            1500,
        );
        let usage = UsageMeter::new();
        let report = e
            .evaluate("q", "a", &docs(), DomainLabel::HrLabor, &usage)
            .await;
        assert!(report.passed);
        assert!(report.feedback.is_some());
    }

    #[tokio::test]
    async fn test_alternative_queries_parsed() {
        let e = evaluator("1. 부가가치세 확정신고 기한\n2. 부가세 납부 일정 안내");
        let usage = UsageMeter::new();
        let alts = e
            .alternative_queries("부가세 기한", Some("자료 불충분"), 2, &usage)
            .await;
        assert_eq!(alts.len(), 2);
        assert!(alts[0].contains("확정신고"));
    }

    #[test]
    fn test_scores_clamped_to_range() {
        let (scores, _) = parse_scores("{\"accuracy\": 35, \"citation\": -4}").unwrap();
        assert_eq!(scores.accuracy, 20.0);
        assert_eq!(scores.citation, 0.0);
    }
}

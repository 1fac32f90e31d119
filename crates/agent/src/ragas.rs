//! RAGAS metrics
//!
//! Faithfulness, answer relevancy, context precision, and context recall,
//! computed with the LLM as judge and the embedder for relevancy. Results
//! are logged and attached to the response; they never trigger retry.

use std::sync::Arc;

use sodam_core::RagasMetrics;
use sodam_llm::{GenerateOptions, LlmBackend, Message, UsageMeter};
use sodam_rag::{cosine_similarity, Embedder};

/// RAGAS metric computer
pub struct RagasEvaluator {
    llm: Arc<dyn LlmBackend>,
    embedder: Arc<dyn Embedder>,
}

impl RagasEvaluator {
    pub fn new(llm: Arc<dyn LlmBackend>, embedder: Arc<dyn Embedder>) -> Self {
        Self { llm, embedder }
    }

    /// Compute all metrics available for the inputs. `context_recall`
    /// requires a ground-truth answer and is `None` without one.
    pub async fn compute(
        &self,
        question: &str,
        answer: &str,
        contexts: &[String],
        ground_truth: Option<&str>,
        usage: &UsageMeter,
    ) -> RagasMetrics {
        let faithfulness = self.faithfulness(answer, contexts, usage).await;
        let answer_relevancy = self.answer_relevancy(question, answer, usage).await;
        let context_precision = self.context_precision(question, contexts, usage).await;
        let context_recall = match ground_truth {
            Some(truth) => self.context_recall(truth, contexts, usage).await,
            None => None,
        };

        let metrics = RagasMetrics {
            faithfulness,
            answer_relevancy,
            context_precision,
            context_recall,
        };
        tracing::info!(
            faithfulness = ?metrics.faithfulness,
            answer_relevancy = ?metrics.answer_relevancy,
            context_precision = ?metrics.context_precision,
            context_recall = ?metrics.context_recall,
            "RAGAS metrics computed"
        );
        metrics
    }

    /// Fraction of answer claims supported by the contexts
    async fn faithfulness(
        &self,
        answer: &str,
        contexts: &[String],
        usage: &UsageMeter,
    ) -> Option<f32> {
        let context_block = numbered(contexts);
        let messages = [
            Message::system(
                "답변을 사실 주장 단위로 나누고, 각 주장이 참고 자료로 뒷받침되는지 \
                 판정하세요. 한 줄에 하나씩 '주장: YES' 또는 '주장: NO' 형식으로만 \
                 출력하세요.",
            ),
            Message::user(format!("참고 자료:\n{}\n답변:\n{}", context_block, answer)),
        ];
        let text = self.judge(&messages, usage).await?;
        yes_ratio(&text)
    }

    /// Cosine similarity between the question and questions back-generated
    /// from the answer
    async fn answer_relevancy(
        &self,
        question: &str,
        answer: &str,
        usage: &UsageMeter,
    ) -> Option<f32> {
        let messages = [
            Message::system(
                "다음 답변만 보고, 이 답변이 대답하고 있을 질문 2개를 추정해서 \
                 한 줄에 하나씩 출력하세요.",
            ),
            Message::user(answer.to_string()),
        ];
        let text = self.judge(&messages, usage).await?;
        let generated: Vec<String> = text
            .lines()
            .map(|l| {
                l.trim()
                    .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ')')
                    .trim()
                    .to_string()
            })
            .filter(|l| !l.is_empty())
            .collect();
        if generated.is_empty() {
            return None;
        }

        let question_vec = self.embedder.embed(question).await.ok()?;
        let generated_vecs = self.embedder.embed_batch(&generated).await.ok()?;
        let mean = generated_vecs
            .iter()
            .map(|v| cosine_similarity(&question_vec, v).clamp(0.0, 1.0))
            .sum::<f32>()
            / generated_vecs.len() as f32;
        Some(mean)
    }

    /// Order-weighted relevance of the retrieved contexts: precision@i
    /// averaged over the relevant positions
    async fn context_precision(
        &self,
        question: &str,
        contexts: &[String],
        usage: &UsageMeter,
    ) -> Option<f32> {
        if contexts.is_empty() {
            return None;
        }
        let messages = [
            Message::system(
                "각 자료가 질문에 답하는 데 유용한지 순서대로 판정하세요. \
                 자료당 한 줄씩 'YES' 또는 'NO'만 출력하세요.",
            ),
            Message::user(format!("질문: {}\n\n자료:\n{}", question, numbered(contexts))),
        ];
        let text = self.judge(&messages, usage).await?;
        let verdicts: Vec<bool> = text
            .lines()
            .filter_map(line_verdict)
            .take(contexts.len())
            .collect();
        if verdicts.is_empty() {
            return None;
        }

        let mut relevant_so_far = 0u32;
        let mut precision_sum = 0.0f32;
        let mut relevant_total = 0u32;
        for (i, &relevant) in verdicts.iter().enumerate() {
            if relevant {
                relevant_so_far += 1;
                relevant_total += 1;
                precision_sum += relevant_so_far as f32 / (i as f32 + 1.0);
            }
        }
        if relevant_total == 0 {
            return Some(0.0);
        }
        Some(precision_sum / relevant_total as f32)
    }

    /// Coverage of ground-truth claims by the contexts
    async fn context_recall(
        &self,
        ground_truth: &str,
        contexts: &[String],
        usage: &UsageMeter,
    ) -> Option<f32> {
        let messages = [
            Message::system(
                "정답을 사실 주장 단위로 나누고, 각 주장이 자료에서 확인되는지 \
                 판정하세요. 한 줄에 하나씩 '주장: YES' 또는 '주장: NO' 형식으로만 \
                 출력하세요.",
            ),
            Message::user(format!(
                "자료:\n{}\n정답:\n{}",
                numbered(contexts),
                ground_truth
            )),
        ];
        let text = self.judge(&messages, usage).await?;
        yes_ratio(&text)
    }

    async fn judge(&self, messages: &[Message], usage: &UsageMeter) -> Option<String> {
        match self
            .llm
            .generate(
                messages,
                GenerateOptions {
                    temperature: Some(0.0),
                    max_tokens: Some(400),
                },
            )
            .await
        {
            Ok(result) => {
                usage.record(&result);
                Some(result.text)
            }
            Err(e) => {
                tracing::warn!(error = %e, "RAGAS judge call failed");
                None
            }
        }
    }
}

fn numbered(contexts: &[String]) -> String {
    contexts
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n")
}

fn line_verdict(line: &str) -> Option<bool> {
    let upper = line.trim().to_ascii_uppercase();
    if upper.is_empty() {
        None
    } else if upper.ends_with("YES") || upper == "YES" {
        Some(true)
    } else if upper.ends_with("NO") || upper == "NO" {
        Some(false)
    } else {
        None
    }
}

fn yes_ratio(text: &str) -> Option<f32> {
    let verdicts: Vec<bool> = text.lines().filter_map(line_verdict).collect();
    if verdicts.is_empty() {
        return None;
    }
    let yes = verdicts.iter().filter(|v| **v).count();
    Some(yes as f32 / verdicts.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodam_llm::testing::ScriptedLlm;
    use sodam_rag::HashEmbedder;

    fn contexts() -> Vec<String> {
        vec![
            "부가가치세 확정신고는 1월 25일까지".to_string(),
            "법인세 중간예납 안내".to_string(),
        ]
    }

    #[tokio::test]
    async fn test_faithfulness_ratio() {
        let llm = ScriptedLlm::new("기한은 1월 25일이다: YES\n세율은 5%이다: NO");
        let ragas = RagasEvaluator::new(Arc::new(llm), Arc::new(HashEmbedder::default()));
        let usage = UsageMeter::new();
        let metrics = ragas
            .compute("부가세 기한", "기한은 1월 25일 [1]", &contexts(), None, &usage)
            .await;
        assert_eq!(metrics.faithfulness, Some(0.5));
        // No ground truth: recall is absent
        assert!(metrics.context_recall.is_none());
    }

    #[tokio::test]
    async fn test_recall_present_with_ground_truth() {
        let llm = ScriptedLlm::new("주장: YES");
        let ragas = RagasEvaluator::new(Arc::new(llm), Arc::new(HashEmbedder::default()));
        let usage = UsageMeter::new();
        let metrics = ragas
            .compute(
                "부가세 기한",
                "1월 25일",
                &contexts(),
                Some("1월 25일까지 신고해야 한다"),
                &usage,
            )
            .await;
        assert_eq!(metrics.context_recall, Some(1.0));
    }

    #[tokio::test]
    async fn test_judge_failure_yields_none_not_error() {
        let llm = ScriptedLlm::new("unused")
            .with_failure(sodam_llm::LlmError::Timeout)
            .with_failure(sodam_llm::LlmError::Timeout)
            .with_failure(sodam_llm::LlmError::Timeout);
        let ragas = RagasEvaluator::new(Arc::new(llm), Arc::new(HashEmbedder::default()));
        let usage = UsageMeter::new();
        let metrics = ragas
            .compute("질문", "답", &contexts(), None, &usage)
            .await;
        assert!(metrics.faithfulness.is_none());
        assert!(metrics.answer_relevancy.is_none());
        assert!(metrics.context_precision.is_none());
    }

    #[test]
    fn test_context_precision_order_weighting() {
        // Order-weighted: [YES, NO] = 1.0, [NO, YES] = 0.5
        let head = vec![true, false];
        let tail = vec![false, true];
        let weight = |verdicts: &[bool]| {
            let mut relevant = 0u32;
            let mut sum = 0.0f32;
            let mut total = 0u32;
            for (i, &v) in verdicts.iter().enumerate() {
                if v {
                    relevant += 1;
                    total += 1;
                    sum += relevant as f32 / (i as f32 + 1.0);
                }
            }
            sum / total as f32
        };
        assert!(weight(&head) > weight(&tail));
        assert_eq!(weight(&head), 1.0);
        assert_eq!(weight(&tail), 0.5);
    }
}

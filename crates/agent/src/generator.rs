//! Answer generation
//!
//! Formats retrieved documents into a sandwich-ordered, citation-numbered
//! context, assembles the domain prompt with action hints, and runs the LLM.
//! Multi-domain requests use a single synthesis prompt with one section per
//! sub-question. Streaming enforces a hard wall-clock cap and a per-chunk
//! inactivity timeout.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use sodam_config::GenerationConfig;
use sodam_core::{
    ActionSuggestion, Document, DomainLabel, StreamEvent, SubQuery, SourceRef, UserContext,
};
use sodam_llm::{GenerateOptions, LlmBackend, Message, UsageMeter};
use sodam_rag::ScoredDocument;

use crate::domains::agent_for;
use crate::AgentError;

/// Canonical out-of-scope rejection (§ supported areas)
pub const REJECTION_MESSAGE: &str = "죄송합니다. 답변드릴 수 있는 분야가 아닙니다. \
    이 서비스는 소상공인을 위한 창업/정부지원, 재무/세무, 인사/노무, 법률 분야의 \
    상담을 제공합니다. 해당 분야의 질문을 주시면 자세히 안내해 드리겠습니다.";

/// Advisory shown when domain classification failed transiently
pub const CLASSIFIER_ADVISORY_MESSAGE: &str = "일시적인 오류로 질문의 분야를 \
    확인하지 못했습니다. 잠시 후 같은 질문을 다시 시도해 주세요. 문제가 계속되면 \
    질문을 조금 더 구체적으로 작성해 주시면 도움이 됩니다.";

/// A generated answer with its citations and suggested actions
#[derive(Debug, Clone)]
pub struct GeneratedAnswer {
    pub content: String,
    pub sources: Vec<SourceRef>,
    pub actions: Vec<ActionSuggestion>,
    pub used_domains: Vec<DomainLabel>,
    pub streamed: bool,
    /// Set when a stream was cut by a timeout
    pub truncated_by_timeout: bool,
}

impl GeneratedAnswer {
    fn canned(content: &str) -> Self {
        Self {
            content: content.to_string(),
            sources: Vec::new(),
            actions: Vec::new(),
            used_domains: Vec::new(),
            streamed: false,
            truncated_by_timeout: false,
        }
    }

    /// The canonical rejection answer
    pub fn rejection() -> Self {
        Self::canned(REJECTION_MESSAGE)
    }

    /// The classifier-failure advisory answer
    pub fn classifier_advisory() -> Self {
        Self::canned(CLASSIFIER_ADVISORY_MESSAGE)
    }
}

/// Answer generator
pub struct ResponseGenerator {
    llm: Arc<dyn LlmBackend>,
    config: GenerationConfig,
}

impl ResponseGenerator {
    pub fn new(llm: Arc<dyn LlmBackend>, config: GenerationConfig) -> Self {
        Self { llm, config }
    }

    /// Generate a grounded answer for the merged document set.
    pub async fn generate(
        &self,
        query: &str,
        sub_queries: &[SubQuery],
        documents: &[ScoredDocument],
        domains: &[DomainLabel],
        user_context: Option<&UserContext>,
        usage: &UsageMeter,
    ) -> Result<GeneratedAnswer, AgentError> {
        let prepared = self.prepare(query, sub_queries, documents, domains, user_context);

        let result = self
            .llm
            .generate(&prepared.messages, prepared.options)
            .await
            .map_err(|e| AgentError::Generation(e.to_string()))?;
        usage.record(&result);

        Ok(GeneratedAnswer {
            content: result.text,
            sources: prepared.sources,
            actions: prepared.actions,
            used_domains: prepared.used_domains,
            streamed: false,
            truncated_by_timeout: false,
        })
    }

    /// Streaming variant. Sources and actions are emitted first, then tokens
    /// in LLM order; the router closes the stream with metadata and `Done`.
    /// A hard wall-clock cap and a per-chunk inactivity timeout both abort a
    /// stalled stream with a partial answer.
    pub async fn generate_streaming(
        &self,
        query: &str,
        sub_queries: &[SubQuery],
        documents: &[ScoredDocument],
        domains: &[DomainLabel],
        user_context: Option<&UserContext>,
        usage: &UsageMeter,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<GeneratedAnswer, AgentError> {
        let prepared = self.prepare(query, sub_queries, documents, domains, user_context);

        for source in &prepared.sources {
            let _ = events.send(StreamEvent::Source(source.clone())).await;
        }
        for action in &prepared.actions {
            let _ = events.send(StreamEvent::Action(action.clone())).await;
        }

        let (token_tx, mut token_rx) = mpsc::channel::<String>(32);
        let llm = Arc::clone(&self.llm);
        let messages = prepared.messages.clone();
        let options = prepared.options;
        let generation = tokio::spawn(async move {
            llm.generate_stream(&messages, options, token_tx).await
        });

        let hard_deadline = Instant::now() + Duration::from_secs(self.config.stream_hard_timeout);
        let chunk_timeout = Duration::from_secs(self.config.stream_chunk_timeout);
        let mut content = String::new();
        let mut truncated_by_timeout = false;

        loop {
            let remaining = hard_deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::warn!("stream hit hard wall-clock cap, aborting");
                generation.abort();
                truncated_by_timeout = true;
                break;
            }
            match tokio::time::timeout(chunk_timeout.min(remaining), token_rx.recv()).await {
                Ok(Some(token)) => {
                    content.push_str(&token);
                    if events.send(StreamEvent::Token(token)).await.is_err() {
                        // Client went away; stop generating
                        generation.abort();
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!("stream chunk inactivity timeout, aborting");
                    generation.abort();
                    truncated_by_timeout = true;
                    break;
                }
            }
        }

        match generation.await {
            Ok(Ok(result)) => usage.record(&result),
            Ok(Err(e)) if content.is_empty() => {
                return Err(AgentError::Generation(e.to_string()));
            }
            _ => {}
        }

        if truncated_by_timeout {
            content.push_str("\n\n(응답이 시간 제한으로 중단되었습니다)");
        }

        Ok(GeneratedAnswer {
            content,
            sources: prepared.sources,
            actions: prepared.actions,
            used_domains: prepared.used_domains,
            streamed: true,
            truncated_by_timeout,
        })
    }

    fn prepare(
        &self,
        query: &str,
        sub_queries: &[SubQuery],
        documents: &[ScoredDocument],
        domains: &[DomainLabel],
        user_context: Option<&UserContext>,
    ) -> PreparedGeneration {
        let ordered = sandwich_order(documents);
        let sources: Vec<SourceRef> = ordered.iter().map(|d| source_ref(&d.document)).collect();

        let primary = domains.first().copied().unwrap_or(DomainLabel::StartupFunding);
        let multi_domain = domains.len() > 1;

        // Action rules run before generation; matched labels become hints
        let plain_docs: Vec<Document> =
            ordered.iter().map(|d| d.document.clone()).collect();
        let mut actions: Vec<ActionSuggestion> = Vec::new();
        let mut seen_actions = HashSet::new();
        for &domain in domains {
            for action in agent_for(domain).suggest_actions(query, &plain_docs) {
                if seen_actions.insert((action.action_type, action.label.clone())) {
                    actions.push(action);
                }
            }
        }

        let mut system = agent_for(primary).system_prompt().to_string();
        if multi_domain {
            system.push_str(
                "\n\n이 질문은 여러 분야에 걸쳐 있습니다. 분야별 하위 질문마다 \
                 소제목을 붙인 별도 섹션으로 답하고, 섹션 사이에 연관된 내용이 \
                 있으면 서로 참조하세요. 전체 답변은 1500자 이내로 작성하세요.",
            );
        } else {
            system.push_str("\n\n답변은 800자 이내로 간결하게 작성하세요.");
        }

        if let Some(hint) = context_hint(user_context) {
            system.push_str(&hint);
        }

        if !actions.is_empty() {
            let labels: Vec<&str> = actions.iter().map(|a| a.label.as_str()).collect();
            system.push_str(&format!(
                "\n\n답변 마지막에 다음 후속 기능을 자연스럽게 안내하세요: {}",
                labels.join(", ")
            ));
        }

        let context = if multi_domain {
            self.format_context_grouped(&ordered)
        } else {
            self.format_context(&ordered)
        };

        let mut user_prompt = String::new();
        if multi_domain {
            user_prompt.push_str("분야별 하위 질문:\n");
            for sub in sub_queries {
                user_prompt.push_str(&format!(
                    "- [{}] {}\n",
                    sub.domain.display_ko(),
                    sub.query
                ));
            }
            user_prompt.push('\n');
        }
        user_prompt.push_str(&format!("참고 자료:\n{}\n질문: {}", context, query));

        let used_domains = engaged_domains(domains, &ordered);

        PreparedGeneration {
            messages: vec![Message::system(system), Message::user(user_prompt)],
            options: GenerateOptions {
                max_tokens: Some(self.config.generation_max_tokens),
                temperature: Some(self.config.temperature_for(primary.as_collection())),
            },
            sources,
            actions,
            used_domains,
        }
    }

    /// Numbered context in sandwich order
    fn format_context(&self, ordered: &[&ScoredDocument]) -> String {
        let mut out = String::new();
        for (i, doc) in ordered.iter().enumerate() {
            out.push_str(&format!(
                "[{}] {}\n{}\n\n",
                i + 1,
                doc.document.title(),
                truncate_chars(&doc.document.content, self.config.format_context_length)
            ));
        }
        out
    }

    /// Context grouped by domain, numbering continuous across groups
    fn format_context_grouped(&self, ordered: &[&ScoredDocument]) -> String {
        let mut out = String::new();
        let mut groups: Vec<(DomainLabel, Vec<(usize, &ScoredDocument)>)> = Vec::new();
        for (i, doc) in ordered.iter().enumerate() {
            let domain = doc.document.domain().unwrap_or(DomainLabel::LawCommon);
            if let Some(pos) = groups.iter().position(|(d, _)| *d == domain) {
                groups[pos].1.push((i, *doc));
            } else {
                groups.push((domain, vec![(i, *doc)]));
            }
        }
        for (domain, docs) in groups {
            out.push_str(&format!("## {} 자료\n", domain.display_ko()));
            for (i, doc) in docs {
                out.push_str(&format!(
                    "[{}] {}\n{}\n\n",
                    i + 1,
                    doc.document.title(),
                    truncate_chars(&doc.document.content, self.config.format_context_length)
                ));
            }
        }
        out
    }
}

struct PreparedGeneration {
    messages: Vec<Message>,
    options: GenerateOptions,
    sources: Vec<SourceRef>,
    actions: Vec<ActionSuggestion>,
    used_domains: Vec<DomainLabel>,
}

/// Sandwich order: strongest document first, second-strongest last, the
/// rest in the middle. Mitigates middle-position neglect.
fn sandwich_order(documents: &[ScoredDocument]) -> Vec<&ScoredDocument> {
    match documents.len() {
        0 | 1 | 2 => documents.iter().collect(),
        _ => {
            let mut ordered: Vec<&ScoredDocument> = Vec::with_capacity(documents.len());
            ordered.push(&documents[0]);
            ordered.extend(documents.iter().skip(2));
            ordered.push(&documents[1]);
            ordered
        }
    }
}

/// Build the response-facing source reference for a document
pub fn source_ref(document: &Document) -> SourceRef {
    SourceRef {
        title: document.title().to_string(),
        content: document.content.clone(),
        source: document
            .metadata
            .get("source_name")
            .and_then(sodam_core::MetaValue::as_str)
            .unwrap_or("")
            .to_string(),
        url: document
            .metadata
            .get("source_url")
            .and_then(sodam_core::MetaValue::as_str)
            .map(str::to_string),
        metadata: document.metadata.clone(),
    }
}

fn context_hint(user_context: Option<&UserContext>) -> Option<String> {
    let ctx = user_context?;
    let company = ctx.company.as_ref()?;
    let mut parts = Vec::new();
    if let Some(ref name) = company.industry_name {
        parts.push(format!("업종 {}", name));
    }
    if let Some(n) = company.employee_count {
        parts.push(format!("직원 {}명", n));
    }
    if let Some(y) = company.years_in_business {
        parts.push(format!("업력 {}년", y));
    }
    if let Some(ref region) = company.region {
        parts.push(format!("소재지 {}", region));
    }
    if parts.is_empty() {
        return None;
    }
    Some(format!(
        "\n\n상담 대상 사업장: {}. 해당 조건에 맞는 내용을 우선 안내하세요.",
        parts.join(", ")
    ))
}

/// Engaged domains in request order, restricted to those that actually have
/// documents; falls back to the requested list when nothing was retrieved
fn engaged_domains(domains: &[DomainLabel], ordered: &[&ScoredDocument]) -> Vec<DomainLabel> {
    let present: HashSet<DomainLabel> = ordered
        .iter()
        .filter_map(|d| d.document.domain())
        .collect();
    let mut used: Vec<DomainLabel> = domains
        .iter()
        .copied()
        .filter(|d| present.contains(d))
        .collect();
    for domain in &present {
        if !used.contains(domain) {
            used.push(*domain);
        }
    }
    if used.is_empty() {
        used = domains.to_vec();
    }
    used
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{}…", truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodam_llm::testing::ScriptedLlm;

    fn scored(domain: DomainLabel, title: &str, content: &str, score: f32) -> ScoredDocument {
        let mut doc = Document::new(content)
            .with_meta("title", title)
            .with_meta("source_name", "국세청")
            .with_meta("source_url", "https://nts.go.kr");
        doc.set_domain(domain);
        ScoredDocument::dense(doc, score)
    }

    fn generator(response: &str) -> ResponseGenerator {
        ResponseGenerator::new(
            Arc::new(ScriptedLlm::new(response)),
            GenerationConfig::default(),
        )
    }

    #[test]
    fn test_sandwich_order() {
        let docs = vec![
            scored(DomainLabel::FinanceTax, "a", "최고 점수 문서", 0.9),
            scored(DomainLabel::FinanceTax, "b", "둘째 점수 문서", 0.8),
            scored(DomainLabel::FinanceTax, "c", "셋째 점수 문서", 0.7),
            scored(DomainLabel::FinanceTax, "d", "넷째 점수 문서", 0.6),
        ];
        let ordered = sandwich_order(&docs);
        assert_eq!(ordered[0].document.content, "최고 점수 문서");
        assert_eq!(ordered.last().unwrap().document.content, "둘째 점수 문서");
        assert_eq!(ordered.len(), 4);
    }

    #[tokio::test]
    async fn test_generate_collects_sources_and_actions() {
        let generator = generator("부가가치세 확정신고 기한은 1월 25일입니다 [1].");
        let docs = vec![scored(
            DomainLabel::FinanceTax,
            "부가세 신고 안내",
            "부가가치세 확정신고는 다음 해 1월 25일까지",
            0.9,
        )];
        let usage = UsageMeter::new();
        let answer = generator
            .generate(
                "부가세 신고 기한이 언제인가요?",
                &[SubQuery::new(DomainLabel::FinanceTax, "부가세 신고 기한")],
                &docs,
                &[DomainLabel::FinanceTax],
                None,
                &usage,
            )
            .await
            .unwrap();

        assert!(answer.content.contains("[1]"));
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].source, "국세청");
        assert!(answer
            .actions
            .iter()
            .any(|a| a.action_type == sodam_core::ActionType::TaxCalendar));
        assert_eq!(answer.used_domains, vec![DomainLabel::FinanceTax]);
        assert!(usage.snapshot().llm_calls >= 1);
    }

    #[tokio::test]
    async fn test_multi_domain_prompt_contains_sections() {
        let llm = ScriptedLlm::new("## 창업\n...\n## 세무\n...");
        let llm = Arc::new(llm);
        let generator = ResponseGenerator::new(llm.clone(), GenerationConfig::default());
        let docs = vec![
            scored(DomainLabel::StartupFunding, "등록", "사업자등록 절차 안내", 0.9),
            scored(DomainLabel::FinanceTax, "세무", "간이과세자 기준", 0.8),
        ];
        let usage = UsageMeter::new();
        let answer = generator
            .generate(
                "창업하려는데 사업자등록 방법과 초기 세무 처리 알려주세요",
                &[
                    SubQuery::new(DomainLabel::StartupFunding, "사업자등록 방법"),
                    SubQuery::new(DomainLabel::FinanceTax, "창업 초기 세무 처리"),
                ],
                &docs,
                &[DomainLabel::StartupFunding, DomainLabel::FinanceTax],
                None,
                &usage,
            )
            .await
            .unwrap();

        // The synthesis prompt lists sub-queries and groups context by domain
        let prompt = llm.seen_prompts().pop().unwrap();
        assert!(prompt.contains("사업자등록 방법"));
        assert!(prompt.contains("창업 초기 세무 처리"));
        assert!(prompt.contains("## 창업/정부지원 자료"));
        assert!(prompt.contains("## 재무/세무 자료"));
        assert_eq!(answer.used_domains.len(), 2);
    }

    #[tokio::test]
    async fn test_streaming_emits_sources_then_tokens_then_done() {
        let generator = generator("기한은 1월 25일입니다 [1].");
        let docs = vec![scored(
            DomainLabel::FinanceTax,
            "안내",
            "부가가치세 확정신고 기한",
            0.9,
        )];
        let (tx, mut rx) = mpsc::channel(64);
        let usage = UsageMeter::new();
        let answer = generator
            .generate_streaming(
                "부가세 신고 기한",
                &[SubQuery::new(DomainLabel::FinanceTax, "부가세 신고 기한")],
                &docs,
                &[DomainLabel::FinanceTax],
                None,
                &usage,
                tx,
            )
            .await
            .unwrap();

        assert!(answer.streamed);
        assert!(!answer.truncated_by_timeout);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                StreamEvent::Source(_) => "source",
                StreamEvent::Action(_) => "action",
                StreamEvent::Token(_) => "token",
                StreamEvent::Metadata(_) => "metadata",
                StreamEvent::Done => "done",
            });
        }
        assert_eq!(kinds.first(), Some(&"source"));
        assert!(kinds.contains(&"token"));
        // Sources always precede the first token
        let first_token = kinds.iter().position(|k| *k == "token").unwrap();
        let last_source = kinds.iter().rposition(|k| *k == "source").unwrap();
        assert!(last_source < first_token);
    }

    #[test]
    fn test_rejection_is_canned_and_empty() {
        let answer = GeneratedAnswer::rejection();
        assert!(answer.content.contains("창업/정부지원"));
        assert!(answer.content.contains("법률"));
        assert!(answer.sources.is_empty());
        assert!(answer.actions.is_empty());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "가나다라마바사";
        assert_eq!(truncate_chars(text, 3), "가나다…");
        assert_eq!(truncate_chars("짧음", 10), "짧음");
    }

    #[test]
    fn test_context_hint_from_company_profile() {
        let ctx = UserContext {
            user_id: None,
            user_type: None,
            company: Some(sodam_core::CompanyProfile {
                industry_name: Some("음식점업".into()),
                employee_count: Some(4),
                ..Default::default()
            }),
        };
        let hint = context_hint(Some(&ctx)).unwrap();
        assert!(hint.contains("음식점업"));
        assert!(hint.contains("4명"));
        assert!(context_hint(None).is_none());
    }
}

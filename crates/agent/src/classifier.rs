//! Domain classification
//!
//! Three paths, in order of preference:
//! 1. LLM structured classification (one retry; a second failure yields the
//!    `llm_retry_failed` advisory outcome, not an error)
//! 2. Keyword matching over extracted lemmas plus compound rules
//! 3. Vector similarity against per-domain centroids (mean embedding of the
//!    representative queries), boosted on keyword agreement
//!
//! Keyword and vector verdicts are unioned: vector-accepted domains first,
//! keyword-only additions appended.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

use sodam_core::korean;
use sodam_core::{ClassificationMethod, DomainClassification, DomainLabel};
use sodam_llm::{GenerateOptions, LlmBackend, Message};
use sodam_rag::{cosine_similarity, Embedder};

use crate::keywords::DomainVocabulary;

/// Classifier configuration
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub enable_llm: bool,
    pub enable_rejection: bool,
    /// Score floor for vector acceptance
    pub threshold: f32,
    /// Secondary domains within this gap of the best are included
    pub gap: f32,
    /// Keyword hit ratio that triggers the vector boost
    pub boost_trigger_ratio: f32,
    /// Boost added to the vector similarity on keyword agreement
    pub boost_delta: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        use sodam_config::constants::classification;
        Self {
            enable_llm: false,
            enable_rejection: true,
            threshold: classification::DOMAIN_CLASSIFICATION_THRESHOLD,
            gap: classification::MULTI_DOMAIN_GAP_THRESHOLD,
            boost_trigger_ratio: classification::KEYWORD_BOOST_TRIGGER_RATIO,
            boost_delta: classification::KEYWORD_BOOST_DELTA,
        }
    }
}

impl ClassifierConfig {
    pub fn from_settings(settings: &sodam_config::ClassificationConfig) -> Self {
        use sodam_config::constants::classification;
        Self {
            enable_llm: settings.enable_llm_domain_classification,
            enable_rejection: settings.enable_domain_rejection,
            threshold: settings.domain_classification_threshold,
            gap: settings.multi_domain_gap_threshold,
            boost_trigger_ratio: classification::KEYWORD_BOOST_TRIGGER_RATIO,
            boost_delta: classification::KEYWORD_BOOST_DELTA,
        }
    }
}

/// Per-domain keyword verdict
#[derive(Debug, Clone, Default)]
struct KeywordScore {
    hits: usize,
    ratio: f32,
    compound_fired: bool,
    matched: Vec<String>,
}

/// The domain classifier
pub struct DomainClassifier {
    llm: Option<Arc<dyn LlmBackend>>,
    embedder: Arc<dyn Embedder>,
    vocabulary: DomainVocabulary,
    centroids: OnceCell<HashMap<DomainLabel, Vec<f32>>>,
    config: ClassifierConfig,
}

impl DomainClassifier {
    pub fn new(
        llm: Option<Arc<dyn LlmBackend>>,
        embedder: Arc<dyn Embedder>,
        vocabulary: DomainVocabulary,
        config: ClassifierConfig,
    ) -> Self {
        Self {
            llm,
            embedder,
            vocabulary,
            centroids: OnceCell::new(),
            config,
        }
    }

    /// Classify a query. Deterministic when the LLM path is disabled.
    pub async fn classify(&self, query: &str) -> DomainClassification {
        if self.config.enable_llm {
            if let Some(ref llm) = self.llm {
                match self.classify_llm(llm, query).await {
                    Ok(classification) => return classification,
                    Err(failed) => return failed,
                }
            }
        }
        self.classify_heuristic(query).await
    }

    /// LLM structured classification with one retry. `Err` carries the
    /// advisory `llm_retry_failed` classification.
    async fn classify_llm(
        &self,
        llm: &Arc<dyn LlmBackend>,
        query: &str,
    ) -> Result<DomainClassification, DomainClassification> {
        let messages = [
            Message::system(
                "당신은 소상공인 상담 질문을 분류합니다. 질문이 다음 네 분야 중 \
                 어디에 속하는지 판단하세요: startup_funding(창업/정부지원), \
                 finance_tax(재무/세무), hr_labor(인사/노무), law_common(법률). \
                 관련 분야를 관련도 순으로 나열하고, 네 분야 모두와 무관하면 \
                 relevant를 false로 하세요. JSON만 출력: \
                 {\"domains\": [\"...\"], \"confidence\": 0.0, \"relevant\": true}",
            ),
            Message::user(query.to_string()),
        ];

        for attempt in 0..2u8 {
            match llm
                .generate(
                    &messages,
                    GenerateOptions {
                        temperature: Some(0.0),
                        max_tokens: Some(150),
                    },
                )
                .await
            {
                Ok(result) => match parse_llm_classification(&result.text) {
                    Some(classification) => return Ok(classification),
                    None => {
                        tracing::warn!(attempt, "LLM classification unparseable, retrying");
                    }
                },
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "LLM classification failed");
                }
            }
        }

        tracing::warn!("LLM classification failed twice, yielding advisory outcome");
        Err(DomainClassification::llm_retry_failed())
    }

    /// Keyword + centroid-vector classification with union semantics
    async fn classify_heuristic(&self, query: &str) -> DomainClassification {
        let lemmas = korean::extract_lemmas(query);
        let keyword_scores = self.keyword_scores(query, &lemmas);

        let vector_scores = self.vector_scores(query, &keyword_scores).await;

        // Vector acceptance after boosting
        let mut vector_accepted: Vec<(DomainLabel, f32)> = vector_scores
            .iter()
            .filter(|(_, score)| **score >= self.config.threshold)
            .map(|(d, s)| (*d, *s))
            .collect();
        vector_accepted.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        if let Some(&(_, best)) = vector_accepted.first() {
            vector_accepted.retain(|(_, s)| best - s <= self.config.gap);
        }

        // Keyword acceptance: any hit qualifies; ordering by hit ratio
        let mut keyword_accepted: Vec<(DomainLabel, &KeywordScore)> = keyword_scores
            .iter()
            .filter(|(_, s)| s.hits > 0 || s.compound_fired)
            .map(|(d, s)| (*d, s))
            .collect();
        keyword_accepted.sort_by(|a, b| {
            b.1.ratio
                .partial_cmp(&a.1.ratio)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.1.hits.cmp(&a.1.hits))
                .then_with(|| a.0.cmp(&b.0))
        });

        let mut matched_keywords: Vec<String> = Vec::new();
        for (_, score) in &keyword_accepted {
            matched_keywords.extend(score.matched.iter().cloned());
        }
        matched_keywords.dedup();

        // Union: vector-accepted first, keyword-only additions appended.
        // This is the only way a keyword-detected extra domain joins a
        // vector-strong pair.
        let mut domains: Vec<DomainLabel> = vector_accepted.iter().map(|(d, _)| *d).collect();
        let mut keyword_added = false;
        for (domain, _) in &keyword_accepted {
            if !domains.contains(domain) {
                domains.push(*domain);
                keyword_added = true;
            }
        }

        if domains.is_empty() {
            if self.config.enable_rejection {
                tracing::info!(query, "query rejected as out of scope");
                return DomainClassification::rejected();
            }
            // Rejection disabled: route to the best-scoring domain anyway
            let fallback = vector_scores
                .iter()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(d, _)| *d)
                .unwrap_or(DomainLabel::StartupFunding);
            return DomainClassification::relevant(
                vec![fallback],
                0.0,
                ClassificationMethod::Vector,
            );
        }

        let confidence = vector_accepted
            .first()
            .map(|(_, s)| *s)
            .or_else(|| keyword_accepted.first().map(|(_, s)| s.ratio.min(1.0)))
            .unwrap_or(0.0);

        let method = match (!vector_accepted.is_empty(), keyword_added || !keyword_accepted.is_empty()) {
            (true, true) => ClassificationMethod::KeywordVector,
            (true, false) => ClassificationMethod::Vector,
            (false, _) => ClassificationMethod::Keyword,
        };

        let mut classification = DomainClassification::relevant(domains, confidence, method);
        classification.matched_keywords = matched_keywords;
        classification
    }

    fn keyword_scores(
        &self,
        query: &str,
        lemmas: &[String],
    ) -> HashMap<DomainLabel, KeywordScore> {
        let mut scores = HashMap::new();

        for (domain, terms) in self.vocabulary.domains() {
            let mut score = KeywordScore::default();

            for lemma in lemmas {
                if terms
                    .keywords
                    .iter()
                    .any(|k| lemma == k || lemma.contains(k.as_str()))
                {
                    score.hits += 1;
                    score.matched.push(lemma.clone());
                }
            }
            score.ratio = if lemmas.is_empty() {
                0.0
            } else {
                score.hits as f32 / lemmas.len() as f32
            };

            for rule in &terms.compounds {
                if rule.lemmas.iter().all(|l| query.contains(l.as_str())) {
                    score.compound_fired = true;
                    score.ratio = score.ratio.max(0.5);
                    score
                        .matched
                        .extend(rule.lemmas.iter().cloned());
                }
            }

            scores.insert(*domain, score);
        }
        scores
    }

    async fn vector_scores(
        &self,
        query: &str,
        keyword_scores: &HashMap<DomainLabel, KeywordScore>,
    ) -> HashMap<DomainLabel, f32> {
        let centroids = match self.centroids().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "centroid computation failed, vector path disabled");
                return HashMap::new();
            }
        };
        let query_vector = match self.embedder.embed(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, vector path disabled");
                return HashMap::new();
            }
        };

        let mut scores = HashMap::new();
        for (domain, centroid) in centroids {
            let mut similarity = cosine_similarity(&query_vector, centroid).clamp(0.0, 1.0);
            if let Some(kw) = keyword_scores.get(domain) {
                if kw.ratio > self.config.boost_trigger_ratio {
                    similarity += self.config.boost_delta;
                }
            }
            scores.insert(*domain, similarity);
        }
        scores
    }

    /// Domain centroids, computed once per process from the representative
    /// queries
    async fn centroids(&self) -> Result<&HashMap<DomainLabel, Vec<f32>>, sodam_rag::RagError> {
        self.centroids
            .get_or_try_init(|| async {
                let mut centroids = HashMap::new();
                for (domain, terms) in self.vocabulary.domains() {
                    let vectors = self
                        .embedder
                        .embed_batch(&terms.representative_queries)
                        .await?;
                    if vectors.is_empty() {
                        continue;
                    }
                    let dim = vectors[0].len();
                    let mut mean = vec![0.0f32; dim];
                    for v in &vectors {
                        for (m, x) in mean.iter_mut().zip(v.iter()) {
                            *m += x;
                        }
                    }
                    let n = vectors.len() as f32;
                    for m in mean.iter_mut() {
                        *m /= n;
                    }
                    sodam_rag::l2_normalize(&mut mean);
                    centroids.insert(*domain, mean);
                }
                Ok(centroids)
            })
            .await
    }
}

#[derive(Deserialize)]
struct LlmClassification {
    #[serde(default)]
    domains: Vec<String>,
    #[serde(default)]
    confidence: f32,
    #[serde(default = "default_relevant")]
    relevant: bool,
}

fn default_relevant() -> bool {
    true
}

/// Tolerant JSON extraction: the model may wrap the object in prose
fn parse_llm_classification(text: &str) -> Option<DomainClassification> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let parsed: LlmClassification = serde_json::from_str(&text[start..=end]).ok()?;

    if !parsed.relevant {
        return Some(DomainClassification::rejected());
    }

    let domains: Vec<DomainLabel> = parsed
        .domains
        .iter()
        .filter_map(|d| DomainLabel::from_external(d))
        .collect();
    if domains.is_empty() {
        return None;
    }

    Some(DomainClassification::relevant(
        domains,
        parsed.confidence.clamp(0.0, 1.0),
        ClassificationMethod::Llm,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodam_llm::testing::ScriptedLlm;
    use sodam_llm::LlmError;
    use sodam_rag::HashEmbedder;

    fn classifier(config: ClassifierConfig, llm: Option<ScriptedLlm>) -> DomainClassifier {
        DomainClassifier::new(
            llm.map(|l| Arc::new(l) as Arc<dyn LlmBackend>),
            Arc::new(HashEmbedder::default()),
            DomainVocabulary::default(),
            config,
        )
    }

    #[tokio::test]
    async fn test_tax_query_classifies_finance() {
        let c = classifier(ClassifierConfig::default(), None);
        let result = c.classify("부가세 신고 기한이 언제인가요?").await;
        assert!(result.is_relevant);
        assert_eq!(result.domains[0], DomainLabel::FinanceTax);
    }

    #[tokio::test]
    async fn test_multi_part_query_spans_domains() {
        let c = classifier(ClassifierConfig::default(), None);
        let result = c
            .classify("창업하려는데 사업자등록 방법과 초기 세무 처리 알려주세요")
            .await;
        assert!(result.is_relevant);
        assert!(result.domains.contains(&DomainLabel::StartupFunding));
        assert!(result.domains.contains(&DomainLabel::FinanceTax));
    }

    #[tokio::test]
    async fn test_hr_query_with_legal_angle_leads_with_hr() {
        let c = classifier(ClassifierConfig::default(), None);
        let result = c.classify("직원 해고 시 법적 절차와 퇴직금 계산").await;
        assert!(result.is_relevant);
        assert_eq!(result.domains[0], DomainLabel::HrLabor);
    }

    #[tokio::test]
    async fn test_off_topic_query_rejected() {
        let c = classifier(ClassifierConfig::default(), None);
        let result = c.classify("오늘 점심 뭐 먹을까요?").await;
        assert!(!result.is_relevant);
        assert!(result.domains.is_empty());
        assert_eq!(result.method, ClassificationMethod::FallbackRejected);
    }

    #[tokio::test]
    async fn test_heuristic_classification_is_deterministic() {
        let c = classifier(ClassifierConfig::default(), None);
        let a = c.classify("퇴직금 계산 방법").await;
        let b = c.classify("퇴직금 계산 방법").await;
        assert_eq!(a.domains, b.domains);
        assert_eq!(a.method, b.method);
    }

    #[tokio::test]
    async fn test_llm_classification_success() {
        let llm = ScriptedLlm::new(
            "{\"domains\": [\"finance_tax\"], \"confidence\": 0.92, \"relevant\": true}",
        );
        let config = ClassifierConfig {
            enable_llm: true,
            ..ClassifierConfig::default()
        };
        let c = classifier(config, Some(llm));
        let result = c.classify("법인세 계산 방법").await;
        assert_eq!(result.method, ClassificationMethod::Llm);
        assert_eq!(result.domains, vec![DomainLabel::FinanceTax]);
        assert!((result.confidence - 0.92).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_llm_double_failure_yields_advisory() {
        let llm = ScriptedLlm::new("unused")
            .with_failure(LlmError::Network("down".into()))
            .with_failure(LlmError::Network("down".into()));
        let config = ClassifierConfig {
            enable_llm: true,
            ..ClassifierConfig::default()
        };
        let c = classifier(config, Some(llm));
        let result = c.classify("법인세 계산 방법").await;
        assert!(!result.is_relevant);
        assert_eq!(result.method, ClassificationMethod::LlmRetryFailed);
    }

    #[tokio::test]
    async fn test_llm_alias_legal_maps_to_law_common() {
        let llm = ScriptedLlm::new(
            "분류 결과는 다음과 같습니다: {\"domains\": [\"legal\"], \"confidence\": 0.8, \"relevant\": true}",
        );
        let config = ClassifierConfig {
            enable_llm: true,
            ..ClassifierConfig::default()
        };
        let c = classifier(config, Some(llm));
        let result = c.classify("판례 문의").await;
        assert_eq!(result.domains, vec![DomainLabel::LawCommon]);
    }

    #[tokio::test]
    async fn test_single_char_query_does_not_crash() {
        let c = classifier(ClassifierConfig::default(), None);
        let result = c.classify("세").await;
        // One character yields no lemmas; rejection is acceptable
        assert!(result.domains.len() <= 1 || !result.is_relevant);
    }
}

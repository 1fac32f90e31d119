//! Pipeline router
//!
//! The state machine over one `RequestState`:
//!
//! ```text
//! START → CLASSIFY
//! CLASSIFY → [not_relevant] → REJECT → END
//!          → DECOMPOSE
//! DECOMPOSE → RETRIEVE
//! RETRIEVE → GENERATE
//! GENERATE → EVALUATE
//! EVALUATE → [pass | retry_disabled | retry_used] → END
//!          → RETRY_WITH_ALTERNATIVES → END
//! ```
//!
//! The router owns stage timing, token accounting, the response cache, the
//! global soft deadline, and final response assembly. Recoverable failures
//! stay inside their stage; only unrecoverable errors and timeouts reach
//! this level, where they become degraded or partial responses.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use sodam_agent::{
    AnswerEvaluator, DomainClassifier, GeneratedAnswer, QuestionDecomposer, RagasEvaluator,
    ResponseCache, ResponseGenerator,
};
use sodam_config::{CacheConfig, EvaluationConfig};
use sodam_core::{
    ClassificationMethod, DomainClassification, DomainLabel, Error, QueryRequest, QueryResponse,
    StreamEvent, SubQuery,
};
use sodam_rag::{MergedRetrieval, RetrievalOrchestrator};

use crate::state::RequestState;

/// Queries longer than this fail input sanitisation
const MAX_QUERY_CHARS: usize = 2000;

/// Candidate answer during the bounded post-evaluation retry
struct Candidate {
    answer: GeneratedAnswer,
    /// Absent when LLM evaluation is disabled or the answer was streamed
    evaluation: Option<sodam_core::EvaluationReport>,
    retrieval: MergedRetrieval,
    alt_query: Option<String>,
}

impl Candidate {
    fn total_score(&self) -> f32 {
        self.evaluation.as_ref().map(|e| e.total_score).unwrap_or(0.0)
    }
}

/// The pipeline router
pub struct PipelineRouter {
    classifier: Arc<DomainClassifier>,
    decomposer: Arc<QuestionDecomposer>,
    orchestrator: Arc<RetrievalOrchestrator>,
    generator: Arc<ResponseGenerator>,
    evaluator: Arc<AnswerEvaluator>,
    ragas: Option<Arc<RagasEvaluator>>,
    cache: Option<Arc<ResponseCache>>,
    evaluation_config: EvaluationConfig,
    cache_config: CacheConfig,
    /// Global soft deadline for one request
    deadline: Option<Duration>,
}

impl PipelineRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        classifier: Arc<DomainClassifier>,
        decomposer: Arc<QuestionDecomposer>,
        orchestrator: Arc<RetrievalOrchestrator>,
        generator: Arc<ResponseGenerator>,
        evaluator: Arc<AnswerEvaluator>,
        ragas: Option<Arc<RagasEvaluator>>,
        cache: Option<Arc<ResponseCache>>,
        evaluation_config: EvaluationConfig,
        cache_config: CacheConfig,
    ) -> Self {
        Self {
            classifier,
            decomposer,
            orchestrator,
            generator,
            evaluator,
            ragas,
            cache,
            evaluation_config,
            cache_config,
            deadline: None,
        }
    }

    /// Set the global request deadline; work past it yields a partial
    /// response carrying the best available answer
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Handle one request end to end.
    pub async fn handle(&self, request: QueryRequest) -> Result<QueryResponse, Error> {
        validate(&request)?;
        let mut state = RequestState::new(request);
        tracing::info!(request_id = %state.request_id, "pipeline start");

        // CLASSIFY
        let started = Instant::now();
        let classification = self.classifier.classify(&state.request.message).await;
        state.timings.classify_ms = started.elapsed().as_millis() as u64;

        if classification.method == ClassificationMethod::LlmRetryFailed {
            tracing::warn!(request_id = %state.request_id, "classifier advisory path");
            return Ok(self.finalize_canned(
                &state,
                &classification,
                GeneratedAnswer::classifier_advisory(),
            ));
        }
        if !classification.is_relevant {
            return Ok(self.finalize_canned(&state, &classification, GeneratedAnswer::rejection()));
        }
        state.classification = Some(classification.clone());

        // Response cache, keyed on the classified domains
        let cache_key = if self.cache_config.enable_response_cache {
            self.cache.as_ref().map(|_| {
                ResponseCache::key(
                    &classification.domains,
                    &state.request.message,
                    state.request.user_context.as_ref(),
                )
            })
        } else {
            None
        };
        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_ref()) {
            if let Some(mut hit) = cache.get(key) {
                tracing::info!(request_id = %state.request_id, "response cache hit");
                hit.session_id = state.request.session_id.clone();
                return Ok(hit);
            }
        }

        // DECOMPOSE
        let started = Instant::now();
        state.sub_queries = self
            .decomposer
            .decompose(
                &state.request.message,
                &classification.domains,
                &state.request.history,
            )
            .await;
        state.timings.decompose_ms = started.elapsed().as_millis() as u64;

        // RETRIEVE
        let started = Instant::now();
        let retrieval = match self
            .bounded(&state, self.orchestrator.retrieve(&state.request.message, &state.sub_queries))
            .await
        {
            Ok(Ok(merged)) => merged,
            Ok(Err(e)) => {
                tracing::error!(request_id = %state.request_id, error = %e, "retrieval unrecoverable");
                return Ok(self.finalize_degraded(&state, &classification, "검색"));
            }
            Err(timeout) => {
                tracing::warn!(request_id = %state.request_id, error = %timeout, "deadline during retrieval");
                return Ok(self.finalize_degraded(&state, &classification, "검색 시간 초과"));
            }
        };
        state.timings.retrieve_ms = started.elapsed().as_millis() as u64;
        for result in &retrieval.per_domain {
            state
                .timings
                .per_domain_ms
                .insert(result.domain.as_collection().to_string(), result.retrieve_time_ms);
        }

        // GENERATE
        let started = Instant::now();
        let answer = match self
            .bounded(
                &state,
                self.generator.generate(
                    &state.request.message,
                    &state.sub_queries,
                    &retrieval.documents,
                    &classification.domains,
                    state.request.user_context.as_ref(),
                    &state.usage,
                ),
            )
            .await
        {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                tracing::error!(request_id = %state.request_id, error = %e, "generation failed");
                state.retrieval = Some(retrieval);
                return Ok(self.finalize_degraded(&state, &classification, "답변 생성"));
            }
            Err(timeout) => {
                tracing::warn!(request_id = %state.request_id, error = %timeout, "deadline during generation");
                state.retrieval = Some(retrieval);
                return Ok(self.finalize_degraded(&state, &classification, "답변 생성 시간 초과"));
            }
        };
        state.timings.generate_ms = started.elapsed().as_millis() as u64;

        // EVALUATE, with at most one retry-with-alternatives
        let started = Instant::now();
        let chosen = self
            .evaluate_with_bounded_retry(&mut state, &classification, retrieval, answer)
            .await;
        state.timings.evaluate_ms = started.elapsed().as_millis() as u64;

        // RAGAS is observational only
        if self.evaluation_config.enable_ragas_evaluation {
            if let Some(ref ragas) = self.ragas {
                let contexts: Vec<String> = chosen
                    .retrieval
                    .documents
                    .iter()
                    .map(|d| d.document.content.clone())
                    .collect();
                state.ragas = Some(
                    ragas
                        .compute(
                            &state.request.message,
                            &chosen.answer.content,
                            &contexts,
                            None,
                            &state.usage,
                        )
                        .await,
                );
            }
        }

        let response = self.finalize(&state, &classification, &chosen);

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key) {
            if !chosen.answer.streamed {
                cache.put(key, response.clone(), classification.primary());
            }
        }

        tracing::info!(
            request_id = %state.request_id,
            total_ms = state.total_elapsed_ms(),
            retry_count = state.retry_count,
            tokens = state.usage.snapshot().total_tokens(),
            "pipeline done"
        );
        Ok(response)
    }

    /// Streaming variant: tokens are forwarded as they arrive, the stream
    /// closes with a metadata event and `Done`. Streamed responses are never
    /// cached and never retried.
    pub async fn handle_streaming(
        &self,
        request: QueryRequest,
        events: mpsc::Sender<StreamEvent>,
    ) -> Result<QueryResponse, Error> {
        validate(&request)?;
        let mut state = RequestState::new(request);

        let started = Instant::now();
        let classification = self.classifier.classify(&state.request.message).await;
        state.timings.classify_ms = started.elapsed().as_millis() as u64;

        if classification.method == ClassificationMethod::LlmRetryFailed
            || !classification.is_relevant
        {
            let answer = if classification.method == ClassificationMethod::LlmRetryFailed {
                GeneratedAnswer::classifier_advisory()
            } else {
                GeneratedAnswer::rejection()
            };
            let _ = events.send(StreamEvent::Token(answer.content.clone())).await;
            let response = self.finalize_canned(&state, &classification, answer);
            let _ = events
                .send(StreamEvent::Metadata(serde_json::json!({
                    "domains": response.domains,
                    "retry_count": response.retry_count,
                })))
                .await;
            let _ = events.send(StreamEvent::Done).await;
            return Ok(response);
        }
        state.classification = Some(classification.clone());

        let started = Instant::now();
        state.sub_queries = self
            .decomposer
            .decompose(
                &state.request.message,
                &classification.domains,
                &state.request.history,
            )
            .await;
        state.timings.decompose_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let retrieval = match self
            .bounded(&state, self.orchestrator.retrieve(&state.request.message, &state.sub_queries))
            .await
        {
            Ok(Ok(merged)) => merged,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "retrieval unrecoverable in stream");
                let response = self.finalize_degraded(&state, &classification, "검색");
                let _ = events.send(StreamEvent::Token(response.content.clone())).await;
                let _ = events.send(StreamEvent::Done).await;
                return Ok(response);
            }
            Err(timeout) => {
                let response = self.finalize_degraded(&state, &classification, "검색 시간 초과");
                tracing::warn!(error = %timeout, "deadline during streamed retrieval");
                let _ = events.send(StreamEvent::Token(response.content.clone())).await;
                let _ = events.send(StreamEvent::Done).await;
                return Ok(response);
            }
        };
        state.timings.retrieve_ms = started.elapsed().as_millis() as u64;

        let started = Instant::now();
        let answer = match self
            .generator
            .generate_streaming(
                &state.request.message,
                &state.sub_queries,
                &retrieval.documents,
                &classification.domains,
                state.request.user_context.as_ref(),
                &state.usage,
                events.clone(),
            )
            .await
        {
            Ok(answer) => answer,
            Err(e) => {
                tracing::error!(error = %e, "streamed generation failed");
                state.retrieval = Some(retrieval);
                let response = self.finalize_degraded(&state, &classification, "답변 생성");
                let _ = events.send(StreamEvent::Token(response.content.clone())).await;
                let _ = events.send(StreamEvent::Done).await;
                return Ok(response);
            }
        };
        state.timings.generate_ms = started.elapsed().as_millis() as u64;

        let chosen = Candidate {
            answer,
            evaluation: None,
            retrieval,
            alt_query: None,
        };
        let response = self.finalize(&state, &classification, &chosen);

        let _ = events
            .send(StreamEvent::Metadata(serde_json::json!({
                "domains": response.domains,
                "retry_count": response.retry_count,
                "timing_metrics": response.timing_metrics,
            })))
            .await;
        let _ = events.send(StreamEvent::Done).await;
        Ok(response)
    }

    /// Evaluate the answer; on FAIL with retry budget, generate alternative
    /// queries, run retrieval+generation per candidate, and keep the best.
    /// At most one retry, ever.
    async fn evaluate_with_bounded_retry(
        &self,
        state: &mut RequestState,
        classification: &DomainClassification,
        retrieval: MergedRetrieval,
        answer: GeneratedAnswer,
    ) -> Candidate {
        let primary = classification.primary().unwrap_or(DomainLabel::StartupFunding);

        if !self.evaluation_config.enable_llm_evaluation {
            return Candidate {
                answer,
                evaluation: None,
                retrieval,
                alt_query: None,
            };
        }

        let evaluation = self
            .evaluator
            .evaluate(
                &state.request.message,
                &answer.content,
                &retrieval.documents,
                primary,
                &state.usage,
            )
            .await;

        let retry_allowed = self.evaluation_config.enable_post_eval_retry
            && self.evaluation_config.max_retry_count > 0
            && state.retry_count == 0;

        if evaluation.passed || !retry_allowed {
            return Candidate {
                answer,
                evaluation: Some(evaluation),
                retrieval,
                alt_query: None,
            };
        }

        tracing::info!(
            request_id = %state.request_id,
            total_score = evaluation.total_score,
            "answer below threshold, retrying with alternative queries"
        );
        state.retry_count = 1;

        let alternatives = self
            .evaluator
            .alternative_queries(
                &state.request.message,
                evaluation.feedback.as_deref(),
                self.evaluation_config.post_eval_alt_query_count,
                &state.usage,
            )
            .await;

        let mut candidates = vec![Candidate {
            answer,
            evaluation: Some(evaluation),
            retrieval,
            alt_query: None,
        }];

        for alt in alternatives {
            let sub_queries: Vec<SubQuery> = classification
                .domains
                .iter()
                .map(|&d| SubQuery::new(d, alt.clone()))
                .collect();

            let retrieval = match self.orchestrator.retrieve(&alt, &sub_queries).await {
                Ok(merged) => merged,
                Err(e) => {
                    tracing::warn!(error = %e, alt, "alternative retrieval failed");
                    continue;
                }
            };
            let answer = match self
                .generator
                .generate(
                    &alt,
                    &sub_queries,
                    &retrieval.documents,
                    &classification.domains,
                    state.request.user_context.as_ref(),
                    &state.usage,
                )
                .await
            {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!(error = %e, alt, "alternative generation failed");
                    continue;
                }
            };
            let evaluation = self
                .evaluator
                .evaluate(&alt, &answer.content, &retrieval.documents, primary, &state.usage)
                .await;

            candidates.push(Candidate {
                answer,
                evaluation: Some(evaluation),
                retrieval,
                alt_query: Some(alt),
            });
        }

        // Highest total wins
        candidates
            .into_iter()
            .max_by(|a, b| {
                a.total_score()
                    .partial_cmp(&b.total_score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .expect("at least the original candidate exists")
    }

    /// Apply the remaining global deadline to a stage future
    async fn bounded<F, T>(&self, state: &RequestState, fut: F) -> Result<T, Error>
    where
        F: Future<Output = T>,
    {
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_sub(state.started_at.elapsed());
                if remaining.is_zero() {
                    return Err(Error::Timeout("request deadline exceeded".to_string()));
                }
                tokio::time::timeout(remaining, fut)
                    .await
                    .map_err(|_| Error::Timeout("request deadline exceeded".to_string()))
            }
            None => Ok(fut.await),
        }
    }

    /// Assemble the final response
    fn finalize(
        &self,
        state: &RequestState,
        classification: &DomainClassification,
        chosen: &Candidate,
    ) -> QueryResponse {
        let domains: Vec<String> = classification
            .domains
            .iter()
            .map(|d| d.as_collection().to_string())
            .collect();

        let per_domain_digest: Vec<serde_json::Value> = chosen
            .retrieval
            .per_domain
            .iter()
            .map(|r| {
                serde_json::json!({
                    "domain": r.domain.as_collection(),
                    "status": r.evaluation.status,
                    "doc_count": r.evaluation.doc_count,
                    "keyword_match_ratio": r.evaluation.keyword_match_ratio,
                    "avg_similarity": r.evaluation.avg_similarity,
                    "used_multi_query": r.used_multi_query,
                    "retry_levels": r.retry_levels,
                })
            })
            .collect();

        let evaluation_data = serde_json::json!({
            "request_id": state.request_id,
            "method": classification.method,
            "confidence": classification.confidence,
            "matched_keywords": classification.matched_keywords,
            "search_mode": chosen.retrieval.mode,
            "legal_supplemented": chosen.retrieval.legal_supplemented,
            "merged_status": chosen.retrieval.evaluation.status,
            "per_domain": per_domain_digest,
            "alt_query": chosen.alt_query,
            "usage": state.usage.snapshot(),
        });

        QueryResponse {
            content: chosen.answer.content.clone(),
            domain: domains.first().cloned().unwrap_or_default(),
            domains,
            sources: chosen.answer.sources.clone(),
            actions: chosen.answer.actions.clone(),
            evaluation: chosen.evaluation.clone(),
            session_id: state.request.session_id.clone(),
            retry_count: state.retry_count,
            ragas_metrics: state.ragas.clone(),
            timing_metrics: Some(state.timings.to_metrics(state.total_elapsed_ms())),
            evaluation_data: Some(evaluation_data),
        }
    }

    /// Rejection and advisory responses: empty sources and actions, no
    /// retrieval or generation ran
    fn finalize_canned(
        &self,
        state: &RequestState,
        classification: &DomainClassification,
        answer: GeneratedAnswer,
    ) -> QueryResponse {
        QueryResponse {
            content: answer.content,
            domain: String::new(),
            domains: Vec::new(),
            sources: Vec::new(),
            actions: Vec::new(),
            evaluation: None,
            session_id: state.request.session_id.clone(),
            retry_count: 0,
            ragas_metrics: None,
            timing_metrics: Some(state.timings.to_metrics(state.total_elapsed_ms())),
            evaluation_data: Some(serde_json::json!({
                "request_id": state.request_id,
                "method": classification.method,
            })),
        }
    }

    /// Backend failure past all mitigations: advisory content plus whatever
    /// stages completed
    fn finalize_degraded(
        &self,
        state: &RequestState,
        classification: &DomainClassification,
        failed_stage: &str,
    ) -> QueryResponse {
        let domains: Vec<String> = classification
            .domains
            .iter()
            .map(|d| d.as_collection().to_string())
            .collect();
        let sources: Vec<sodam_core::SourceRef> = state
            .retrieval
            .as_ref()
            .map(|r| {
                r.documents
                    .iter()
                    .map(|d| sodam_agent::generator::source_ref(&d.document))
                    .collect()
            })
            .unwrap_or_default();

        QueryResponse {
            content: format!(
                "일시적인 시스템 문제({})로 완전한 답변을 드리지 못했습니다. \
                 잠시 후 다시 시도해 주세요.",
                failed_stage
            ),
            domain: domains.first().cloned().unwrap_or_default(),
            domains,
            sources,
            actions: Vec::new(),
            evaluation: None,
            session_id: state.request.session_id.clone(),
            retry_count: state.retry_count,
            ragas_metrics: None,
            timing_metrics: Some(state.timings.to_metrics(state.total_elapsed_ms())),
            evaluation_data: Some(serde_json::json!({
                "request_id": state.request_id,
                "method": classification.method,
                "degraded_stage": failed_stage,
            })),
        }
    }
}

/// Input sanitisation
fn validate(request: &QueryRequest) -> Result<(), Error> {
    let message = request.message.trim();
    if message.is_empty() {
        return Err(Error::InvalidRequest("message is empty".to_string()));
    }
    if message.chars().count() > MAX_QUERY_CHARS {
        return Err(Error::InvalidRequest(format!(
            "message exceeds {} characters",
            MAX_QUERY_CHARS
        )));
    }
    if message.chars().any(|c| c.is_control() && c != '\n' && c != '\t') {
        return Err(Error::InvalidRequest(
            "message contains control characters".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_and_oversized() {
        assert!(validate(&QueryRequest::new("  ")).is_err());
        assert!(validate(&QueryRequest::new("가".repeat(2001))).is_err());
        assert!(validate(&QueryRequest::new("부가세 신고 기한")).is_ok());
    }

    #[test]
    fn test_validate_rejects_control_characters() {
        assert!(validate(&QueryRequest::new("질문\u{0000}")).is_err());
        assert!(validate(&QueryRequest::new("줄바꿈은\n허용")).is_ok());
    }
}

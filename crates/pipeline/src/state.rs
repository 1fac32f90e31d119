//! Request state
//!
//! One `RequestState` value flows through the pipeline and accumulates stage
//! outputs. The router owns it exclusively; fan-out work inside a stage
//! writes to its own slot and merges at the join.

use std::collections::HashMap;
use std::time::Instant;

use sodam_agent::GeneratedAnswer;
use sodam_core::{
    DomainClassification, EvaluationReport, QueryRequest, RagasMetrics, SubQuery, TimingMetrics,
};
use sodam_llm::UsageMeter;
use sodam_rag::MergedRetrieval;

/// Wall-clock per stage
#[derive(Debug, Default)]
pub struct StageTimings {
    pub classify_ms: u64,
    pub decompose_ms: u64,
    pub retrieve_ms: u64,
    pub generate_ms: u64,
    pub evaluate_ms: u64,
    pub per_domain_ms: HashMap<String, u64>,
}

impl StageTimings {
    pub fn to_metrics(&self, total_ms: u64) -> TimingMetrics {
        TimingMetrics {
            classify: self.classify_ms,
            decompose: self.decompose_ms,
            retrieve: self.retrieve_ms,
            generate: self.generate_ms,
            evaluate: self.evaluate_ms,
            total: total_ms,
            per_agent: self.per_domain_ms.clone(),
        }
    }
}

/// The accumulating request state
pub struct RequestState {
    pub request_id: String,
    pub request: QueryRequest,
    pub started_at: Instant,
    pub classification: Option<DomainClassification>,
    pub sub_queries: Vec<SubQuery>,
    pub retrieval: Option<MergedRetrieval>,
    pub answer: Option<GeneratedAnswer>,
    pub evaluation: Option<EvaluationReport>,
    pub ragas: Option<RagasMetrics>,
    pub retry_count: u32,
    pub timings: StageTimings,
    pub usage: UsageMeter,
}

impl RequestState {
    pub fn new(mut request: QueryRequest) -> Self {
        request.truncate_history();
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            request,
            started_at: Instant::now(),
            classification: None,
            sub_queries: Vec::new(),
            retrieval: None,
            answer: None,
            evaluation: None,
            ragas: None,
            retry_count: 0,
            timings: StageTimings::default(),
            usage: UsageMeter::new(),
        }
    }

    pub fn total_elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sodam_core::{ChatRole, ChatTurn};

    #[test]
    fn test_new_state_truncates_history() {
        let mut request = QueryRequest::new("질문");
        for i in 0..80 {
            request.history.push(ChatTurn {
                role: ChatRole::User,
                content: format!("{}", i),
            });
        }
        let state = RequestState::new(request);
        assert_eq!(state.request.history.len(), 50);
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn test_timings_to_metrics() {
        let mut timings = StageTimings::default();
        timings.classify_ms = 3;
        timings.retrieve_ms = 40;
        timings.per_domain_ms.insert("finance_tax".to_string(), 25);
        let metrics = timings.to_metrics(120);
        assert_eq!(metrics.classify, 3);
        assert_eq!(metrics.total, 120);
        assert_eq!(metrics.per_agent.get("finance_tax"), Some(&25));
    }
}

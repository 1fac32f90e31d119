//! Per-domain document budgeting
//!
//! Splits the global document budget across the domains of a request.
//! Bounded mode keeps the total within `max_retrieval_docs` while holding
//! the `min_domain_k` floor; the primary domain takes leftover slots first.

use sodam_core::DomainLabel;

/// Budget for one domain's retrieval
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalBudget {
    pub domain: DomainLabel,
    pub allocated_k: usize,
    /// First domain of a multi-domain request
    pub is_primary: bool,
    /// 1-based request order
    pub priority: usize,
}

/// Allocates per-domain budgets
#[derive(Debug, Clone)]
pub struct DocumentBudgetCalculator {
    pub retrieval_k: usize,
    pub max_retrieval_docs: usize,
    pub min_domain_k: usize,
    /// Bounded multi-domain mode (enable_fixed_doc_limit)
    pub bounded: bool,
}

impl DocumentBudgetCalculator {
    pub fn from_settings(retrieval: &sodam_config::RetrievalConfig) -> Self {
        Self {
            retrieval_k: retrieval.retrieval_k,
            max_retrieval_docs: retrieval.max_retrieval_docs,
            min_domain_k: retrieval.min_domain_k,
            bounded: retrieval.enable_fixed_doc_limit,
        }
    }

    /// Allocate budgets, primary first. `recommended_k` comes from the
    /// strategy selector.
    pub fn allocate(&self, domains: &[DomainLabel], recommended_k: usize) -> Vec<RetrievalBudget> {
        let desired = recommended_k.min(self.retrieval_k).max(self.min_domain_k);

        let mut budgets: Vec<RetrievalBudget> = domains
            .iter()
            .enumerate()
            .map(|(i, &domain)| RetrievalBudget {
                domain,
                allocated_k: desired,
                is_primary: i == 0,
                priority: i + 1,
            })
            .collect();

        if budgets.len() <= 1 || !self.bounded {
            return budgets;
        }

        let total: usize = budgets.iter().map(|b| b.allocated_k).sum();
        if total <= self.max_retrieval_docs {
            return budgets;
        }

        // Equal split of the global budget; leftover slots go to the
        // highest-priority domains
        let n = budgets.len();
        let base = self.max_retrieval_docs / n;
        let extra = self.max_retrieval_docs - base * n;
        for (i, budget) in budgets.iter_mut().enumerate() {
            let mut k = base + usize::from(i < extra);
            // The per-domain floor dominates the global cap
            k = k.max(self.min_domain_k);
            budget.allocated_k = k.min(desired);
        }
        budgets
    }
}

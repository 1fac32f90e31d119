//! Advisory domains
//!
//! Four domains partition the knowledge base: one collection per domain plus
//! the shared `law_common` collection. The external JSONL value `legal` is an
//! alias of `law_common`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of advisory domains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainLabel {
    /// Startup and government funding programmes
    StartupFunding,
    /// Corporate finance and taxation
    FinanceTax,
    /// HR and labor law compliance
    HrLabor,
    /// Shared statute/precedent collection
    LawCommon,
}

impl DomainLabel {
    /// All domains in canonical order
    pub const ALL: [DomainLabel; 4] = [
        DomainLabel::StartupFunding,
        DomainLabel::FinanceTax,
        DomainLabel::HrLabor,
        DomainLabel::LawCommon,
    ];

    /// Collection key in the vector store and BM25 registry
    pub fn as_collection(&self) -> &'static str {
        match self {
            DomainLabel::StartupFunding => "startup_funding",
            DomainLabel::FinanceTax => "finance_tax",
            DomainLabel::HrLabor => "hr_labor",
            DomainLabel::LawCommon => "law_common",
        }
    }

    /// Parse a collection key or external alias. `legal` (the JSONL domain
    /// value) maps to `law_common`.
    pub fn from_external(s: &str) -> Option<Self> {
        match s {
            "startup_funding" | "startup" => Some(DomainLabel::StartupFunding),
            "finance_tax" | "finance" => Some(DomainLabel::FinanceTax),
            "hr_labor" | "hr" => Some(DomainLabel::HrLabor),
            "law_common" | "law" | "legal" => Some(DomainLabel::LawCommon),
            _ => None,
        }
    }

    /// Adjacent domains searched at the CROSS_DOMAIN retry level
    pub fn adjacent(&self) -> &'static [DomainLabel] {
        match self {
            DomainLabel::StartupFunding => &[DomainLabel::FinanceTax],
            DomainLabel::FinanceTax => &[DomainLabel::StartupFunding, DomainLabel::LawCommon],
            DomainLabel::HrLabor => &[DomainLabel::LawCommon],
            DomainLabel::LawCommon => &[DomainLabel::HrLabor, DomainLabel::FinanceTax],
        }
    }

    /// Korean display name, used in prompts and the rejection message
    pub fn display_ko(&self) -> &'static str {
        match self {
            DomainLabel::StartupFunding => "창업/정부지원",
            DomainLabel::FinanceTax => "재무/세무",
            DomainLabel::HrLabor => "인사/노무",
            DomainLabel::LawCommon => "법률",
        }
    }
}

impl fmt::Display for DomainLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_collection())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_alias() {
        assert_eq!(
            DomainLabel::from_external("legal"),
            Some(DomainLabel::LawCommon)
        );
        assert_eq!(
            DomainLabel::from_external("finance_tax"),
            Some(DomainLabel::FinanceTax)
        );
        assert_eq!(DomainLabel::from_external("weather"), None);
    }

    #[test]
    fn test_adjacency_is_symmetric_enough() {
        // finance <-> startup and hr <-> law must hold in both directions
        assert!(DomainLabel::StartupFunding
            .adjacent()
            .contains(&DomainLabel::FinanceTax));
        assert!(DomainLabel::FinanceTax
            .adjacent()
            .contains(&DomainLabel::StartupFunding));
        assert!(DomainLabel::HrLabor
            .adjacent()
            .contains(&DomainLabel::LawCommon));
        assert!(DomainLabel::LawCommon
            .adjacent()
            .contains(&DomainLabel::HrLabor));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&DomainLabel::HrLabor).unwrap();
        assert_eq!(json, "\"hr_labor\"");
        let back: DomainLabel = serde_json::from_str("\"startup_funding\"").unwrap();
        assert_eq!(back, DomainLabel::StartupFunding);
    }
}

//! Query request wire model

use serde::{Deserialize, Serialize};

/// History is capped at this many turns; older turns are dropped oldest-first.
pub const MAX_HISTORY_TURNS: usize = 50;

/// Chat turn role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Caller-declared user type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    Prospective,
    StartupCeo,
    SmeOwner,
}

/// Company profile attached to the request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub industry_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub employee_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub years_in_business: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annual_revenue: Option<i64>,
}

/// Optional user/company context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<UserType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<CompanyProfile>,
}

impl UserContext {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_none() && self.user_type.is_none() && self.company.is_none()
    }

    /// Stable fingerprint of the fields that influence answers, used in the
    /// response cache key. Field order is fixed.
    pub fn fingerprint(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if let Some(ref ut) = self.user_type {
            parts.push(format!("ut={:?}", ut));
        }
        if let Some(ref c) = self.company {
            if let Some(ref v) = c.industry_code {
                parts.push(format!("ic={}", v));
            }
            if let Some(v) = c.employee_count {
                parts.push(format!("ec={}", v));
            }
            if let Some(v) = c.years_in_business {
                parts.push(format!("yb={}", v));
            }
            if let Some(ref v) = c.region {
                parts.push(format!("rg={}", v));
            }
            if let Some(v) = c.annual_revenue {
                parts.push(format!("ar={}", v));
            }
        }
        parts.join("|")
    }
}

/// A natural-language advisory query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_context: Option<UserContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl QueryRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            history: Vec::new(),
            user_context: None,
            session_id: None,
        }
    }

    /// Drop turns beyond the cap, keeping the most recent ones.
    pub fn truncate_history(&mut self) {
        if self.history.len() > MAX_HISTORY_TURNS {
            let excess = self.history.len() - MAX_HISTORY_TURNS;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_cap_keeps_recent() {
        let mut req = QueryRequest::new("질문");
        for i in 0..60 {
            req.history.push(ChatTurn {
                role: ChatRole::User,
                content: format!("turn {}", i),
            });
        }
        req.truncate_history();
        assert_eq!(req.history.len(), MAX_HISTORY_TURNS);
        assert_eq!(req.history.last().unwrap().content, "turn 59");
        assert_eq!(req.history.first().unwrap().content, "turn 10");
    }

    #[test]
    fn test_context_fingerprint_stability() {
        let ctx = UserContext {
            user_id: Some("u-1".into()),
            user_type: Some(UserType::SmeOwner),
            company: Some(CompanyProfile {
                employee_count: Some(12),
                region: Some("부산".into()),
                ..CompanyProfile::default()
            }),
        };
        // user_id does not shape the answer and is excluded
        assert_eq!(ctx.fingerprint(), "ut=SmeOwner|ec=12|rg=부산");
        assert!(UserContext::default().fingerprint().is_empty());
    }
}

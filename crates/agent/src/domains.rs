//! Domain agents
//!
//! A domain agent is a thin adapter: the domain's system prompt plus a
//! declarative action-rule table. Rules are evaluated against the retrieved
//! documents before generation; matched suggestions are injected into the
//! prompt as hints and emitted on the response as fresh copies.

use once_cell::sync::Lazy;

use sodam_core::{ActionSuggestion, ActionType, Document, DomainLabel};

/// Keyword set → action template. The rule fires when any keyword appears in
/// a retrieved document or the query.
#[derive(Debug, Clone)]
pub struct ActionRule {
    pub keywords: Vec<String>,
    pub template: ActionSuggestion,
}

impl ActionRule {
    fn new(keywords: &[&str], template: ActionSuggestion) -> Self {
        Self {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            template,
        }
    }

    fn matches(&self, query: &str, documents: &[Document]) -> bool {
        self.keywords.iter().any(|k| {
            query.contains(k.as_str())
                || documents.iter().any(|d| d.content.contains(k.as_str()))
        })
    }
}

/// One advisory domain's prompt and action surface
pub struct DomainAgent {
    pub domain: DomainLabel,
    system_prompt: String,
    action_rules: Vec<ActionRule>,
}

impl DomainAgent {
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn action_rules(&self) -> &[ActionRule] {
        &self.action_rules
    }

    /// Evaluate the rule table. Every returned suggestion is a fresh deep
    /// copy; emitted instances never share params.
    pub fn suggest_actions(&self, query: &str, documents: &[Document]) -> Vec<ActionSuggestion> {
        self.action_rules
            .iter()
            .filter(|rule| rule.matches(query, documents))
            .map(|rule| rule.template.clone())
            .collect()
    }
}

/// Shared grounding rules appended to every domain prompt
const GROUNDING_RULES: &str = "\n\n답변 규칙:\n\
    - 제공된 참고 자료에 있는 내용만 사용하세요. 자료 밖의 사실을 지어내지 마세요.\n\
    - 문장의 근거가 된 자료 번호를 [1], [2] 형식으로 본문에 표기하세요.\n\
    - 법령 조문 번호, 금액, 날짜는 자료에 있는 그대로만 인용하고, 자료에 없으면 \
    '확인된 자료에 해당 정보가 없습니다'라고 답하세요.\n\
    - 한국어로 답변하세요.";

static AGENTS: Lazy<Vec<DomainAgent>> = Lazy::new(|| {
    vec![
        DomainAgent {
            domain: DomainLabel::StartupFunding,
            system_prompt: format!(
                "당신은 창업과 정부지원사업 전문 상담사입니다. 예비창업자와 \
                 초기 창업가에게 지원사업, 정책자금, 창업 절차를 안내합니다. \
                 신청 자격과 기한은 반드시 자료 기준으로 답하세요.{}",
                GROUNDING_RULES
            ),
            action_rules: vec![
                ActionRule::new(
                    &["지원사업", "지원금", "보조금", "정책자금", "모집"],
                    ActionSuggestion::new(ActionType::FundingSearch, "맞춤 지원사업 찾아보기")
                        .with_description("업종과 지역 조건에 맞는 지원사업을 검색합니다")
                        .with_param("source", "kstartup"),
                ),
                ActionRule::new(
                    &["사업계획서", "신청서", "제출 서류"],
                    ActionSuggestion::new(ActionType::DocumentGeneration, "사업계획서 초안 만들기")
                        .with_param("template", "business_plan"),
                ),
            ],
        },
        DomainAgent {
            domain: DomainLabel::FinanceTax,
            system_prompt: format!(
                "당신은 소상공인 세무 전문 상담사입니다. 부가가치세, 법인세, \
                 소득세, 원천징수 등 세무 신고와 절세를 안내합니다. 세율과 \
                 기한은 자료에 있는 값만 사용하세요.{}",
                GROUNDING_RULES
            ),
            action_rules: vec![
                ActionRule::new(
                    &["신고", "납부", "기한", "부가가치세", "부가세", "법인세"],
                    ActionSuggestion::new(ActionType::TaxCalendar, "세무 일정 확인하기")
                        .with_description("이번 분기의 신고·납부 일정을 보여줍니다"),
                ),
                ActionRule::new(
                    &["홈택스", "전자신고"],
                    ActionSuggestion::new(ActionType::ExternalLink, "홈택스 바로가기")
                        .with_param("url", "https://hometax.go.kr"),
                ),
            ],
        },
        DomainAgent {
            domain: DomainLabel::HrLabor,
            system_prompt: format!(
                "당신은 인사·노무 전문 상담사입니다. 채용, 근로계약, 임금, \
                 해고, 퇴직금, 4대보험을 안내합니다. 법정 기준을 설명할 때는 \
                 자료의 조문을 근거로 드세요.{}",
                GROUNDING_RULES
            ),
            action_rules: vec![
                ActionRule::new(
                    &["근로계약서", "계약서 작성"],
                    ActionSuggestion::new(ActionType::DocumentGeneration, "근로계약서 초안 만들기")
                        .with_param("template", "employment_contract"),
                ),
                ActionRule::new(
                    &["해고", "징계", "부당해고", "분쟁"],
                    ActionSuggestion::new(ActionType::LegalConsultation, "노무사 상담 연결")
                        .with_description("해고·징계 절차는 전문가 검토를 권장합니다"),
                ),
            ],
        },
        DomainAgent {
            domain: DomainLabel::LawCommon,
            system_prompt: format!(
                "당신은 소상공인 법률 상담사입니다. 계약, 분쟁, 소송 절차를 \
                 안내합니다. 법령 조문과 판례는 자료에 있는 표현을 그대로 \
                 인용하고, 개별 사건에 대한 단정적 판단은 피하세요.{}",
                GROUNDING_RULES
            ),
            action_rules: vec![
                ActionRule::new(
                    &["소송", "분쟁", "손해배상", "내용증명", "고소"],
                    ActionSuggestion::new(ActionType::LegalConsultation, "변호사 상담 연결")
                        .with_description("구체적 사건은 변호사 상담이 필요합니다"),
                ),
                ActionRule::new(
                    &["계약서", "표준계약"],
                    ActionSuggestion::new(ActionType::DocumentGeneration, "표준계약서 초안 만들기")
                        .with_param("template", "standard_contract"),
                ),
            ],
        },
    ]
});

/// The agent for a domain
pub fn agent_for(domain: DomainLabel) -> &'static DomainAgent {
    AGENTS
        .iter()
        .find(|agent| agent.domain == domain)
        .expect("agent registry covers every domain")
}

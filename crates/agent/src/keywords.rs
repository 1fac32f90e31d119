//! Per-domain vocabulary
//!
//! Keyword sets, compound rules, and representative queries per domain.
//! These defaults are compiled in; a deployment can override them wholesale
//! by constructing a `DomainVocabulary` from its own tables.

use std::collections::HashMap;

use sodam_core::DomainLabel;

/// A compound rule fires only when every lemma is present
#[derive(Debug, Clone)]
pub struct CompoundRule {
    pub lemmas: Vec<String>,
}

/// One domain's vocabulary
#[derive(Debug, Clone, Default)]
pub struct DomainTerms {
    pub keywords: Vec<String>,
    pub compounds: Vec<CompoundRule>,
    /// Typical user questions; their embedding mean is the domain centroid
    pub representative_queries: Vec<String>,
}

/// Vocabulary for all domains
#[derive(Debug, Clone)]
pub struct DomainVocabulary {
    terms: HashMap<DomainLabel, DomainTerms>,
}

impl DomainVocabulary {
    pub fn new(terms: HashMap<DomainLabel, DomainTerms>) -> Self {
        Self { terms }
    }

    pub fn terms(&self, domain: DomainLabel) -> Option<&DomainTerms> {
        self.terms.get(&domain)
    }

    pub fn domains(&self) -> impl Iterator<Item = (&DomainLabel, &DomainTerms)> {
        self.terms.iter()
    }
}

fn terms(
    keywords: &[&str],
    compounds: &[&[&str]],
    representative: &[&str],
) -> DomainTerms {
    DomainTerms {
        keywords: keywords.iter().map(|s| s.to_string()).collect(),
        compounds: compounds
            .iter()
            .map(|lemmas| CompoundRule {
                lemmas: lemmas.iter().map(|s| s.to_string()).collect(),
            })
            .collect(),
        representative_queries: representative.iter().map(|s| s.to_string()).collect(),
    }
}

impl Default for DomainVocabulary {
    fn default() -> Self {
        let mut map = HashMap::new();

        map.insert(
            DomainLabel::StartupFunding,
            terms(
                &[
                    "창업", "스타트업", "지원금", "보조금", "정부지원", "사업계획서", "예비창업",
                    "창업자금", "정책자금", "융자", "입주", "액셀러레이터", "사업자등록",
                ],
                &[&["창업", "대출"], &["정부", "지원"], &["사업", "계획서"]],
                &[
                    "예비창업패키지 신청 자격이 어떻게 되나요?",
                    "창업 지원금은 어디서 받을 수 있나요?",
                    "사업자등록은 어떻게 하나요?",
                    "정책자금 융자 조건이 궁금합니다",
                ],
            ),
        );

        map.insert(
            DomainLabel::FinanceTax,
            terms(
                &[
                    "세금", "세무", "부가세", "부가가치세", "법인세", "소득세", "원천징수",
                    "세액공제", "세액감면", "신고", "납부", "기장", "재무제표", "매출", "경비",
                    "환급",
                ],
                &[&["세금", "신고"], &["부가세", "기한"], &["법인세", "계산"]],
                &[
                    "부가가치세 신고 기한이 언제인가요?",
                    "법인세 계산 방법을 알려주세요",
                    "세액공제를 받을 수 있는 항목이 뭔가요?",
                    "원천징수 신고는 매달 해야 하나요?",
                ],
            ),
        );

        map.insert(
            DomainLabel::HrLabor,
            terms(
                &[
                    "직원", "근로자", "채용", "해고", "퇴직금", "연차", "휴가", "임금", "급여",
                    "근로계약", "4대보험", "주휴수당", "야근수당", "취업규칙", "노무",
                ],
                &[&["직원", "해고"], &["퇴직금", "계산"], &["근로", "계약서"]],
                &[
                    "직원 해고 절차가 어떻게 되나요?",
                    "퇴직금 계산 방법 알려주세요",
                    "연차휴가는 며칠을 줘야 하나요?",
                    "4대보험 가입은 의무인가요?",
                ],
            ),
        );

        map.insert(
            DomainLabel::LawCommon,
            terms(
                &[
                    "법률", "소송", "판례", "계약", "손해배상", "법원", "변호사", "고소",
                    "법적", "분쟁", "내용증명", "과태료", "처벌",
                ],
                &[&["계약", "위반"], &["법적", "절차"], &["손해", "배상"]],
                &[
                    "거래처가 대금을 안 주는데 소송해야 하나요?",
                    "계약 위반 시 법적 절차가 궁금합니다",
                    "내용증명은 어떻게 보내나요?",
                    "임대차 분쟁은 어디에 상담하나요?",
                ],
            ),
        );

        Self { terms: map }
    }
}

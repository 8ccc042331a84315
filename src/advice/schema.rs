//! 구조화 출력 스키마
//!
//! 모델 출력은 닫힌 스키마로만 받아들입니다.
//! - 필수 필드 누락 / 알 수 없는 필드: `Parsed::Incomplete`
//! - 타입 불일치 / 범위 위반 / JSON 아님: `Parsed::Invalid`
//! 어떤 경우에도 기본값으로 채우거나 잘라내지 않습니다.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 목록 필드 최대 항목 수
pub const MAX_LIST_ITEMS: usize = 5;
pub const MIN_ADVICE_STEPS: usize = 3;
pub const MAX_ADVICE_STEPS: usize = 6;
/// 미팅 준비 목록 항목 수 범위
pub const MIN_PREP_ITEMS: usize = 2;
pub const MAX_PREP_ITEMS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Blocker {
    pub description: String,
    pub severity: Severity,
}

/// 1단계: 회고/로그에서 추출한 구조화 인사이트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Insight {
    pub key_points: Vec<String>,
    pub blockers: Vec<Blocker>,
    pub resources_needed: Vec<String>,
    pub confidence_delta: f64,
}

/// 2단계: 인사이트 기반 실행 조언
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Advice {
    pub steps: Vec<String>,
    pub checklist: Vec<String>,
    pub urgency: Urgency,
}

/// 저장/캐시 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub insight: Insight,
    pub advice: Advice,
}

/// 저장된 분석 여러 건을 묶은 미팅 준비 자료
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeetingPrep {
    /// 팀 동료용 진행 공유
    pub team_update: Vec<String>,
    /// 매니저용 성과/리스크/일정
    pub manager_update: Vec<String>,
    pub recommendations: Vec<String>,
}

/// 닫힌 스키마를 가진 모델 출력
pub trait StructuredOutput: DeserializeOwned + Serialize + Clone + Send {
    /// 로그/에러 메시지용 이름
    const NAME: &'static str;
    /// 허용 필드 (모두 필수)
    const FIELDS: &'static [&'static str];

    /// 타입 검사 이후의 의미 검증
    fn check(&self) -> std::result::Result<(), String>;
}

impl StructuredOutput for Insight {
    const NAME: &'static str = "insight";
    const FIELDS: &'static [&'static str] = &["key_points", "blockers", "resources_needed", "confidence_delta"];

    fn check(&self) -> std::result::Result<(), String> {
        check_items("key_points", &self.key_points, 0, MAX_LIST_ITEMS)?;
        check_items("resources_needed", &self.resources_needed, 0, MAX_LIST_ITEMS)?;
        if self.blockers.len() > MAX_LIST_ITEMS {
            return Err(format!("blockers has {} items (max {})", self.blockers.len(), MAX_LIST_ITEMS));
        }
        if self.blockers.iter().any(|b| b.description.trim().is_empty()) {
            return Err("blockers contains an empty description".to_string());
        }
        if !self.confidence_delta.is_finite() || !(-1.0..=1.0).contains(&self.confidence_delta) {
            return Err(format!("confidence_delta {} is outside [-1, 1]", self.confidence_delta));
        }
        Ok(())
    }
}

impl StructuredOutput for Advice {
    const NAME: &'static str = "advice";
    const FIELDS: &'static [&'static str] = &["steps", "checklist", "urgency"];

    fn check(&self) -> std::result::Result<(), String> {
        check_items("steps", &self.steps, MIN_ADVICE_STEPS, MAX_ADVICE_STEPS)?;
        check_items("checklist", &self.checklist, 0, MAX_LIST_ITEMS)
    }
}

impl StructuredOutput for MeetingPrep {
    const NAME: &'static str = "meeting_prep";
    const FIELDS: &'static [&'static str] = &["team_update", "manager_update", "recommendations"];

    fn check(&self) -> std::result::Result<(), String> {
        check_items("team_update", &self.team_update, MIN_PREP_ITEMS, MAX_PREP_ITEMS)?;
        check_items("manager_update", &self.manager_update, MIN_PREP_ITEMS, MAX_PREP_ITEMS)?;
        check_items("recommendations", &self.recommendations, MIN_PREP_ITEMS, MAX_PREP_ITEMS)
    }
}

fn check_items(field: &str, items: &[String], min: usize, max: usize) -> std::result::Result<(), String> {
    if items.len() < min || items.len() > max {
        return Err(format!("{} has {} items (expected {}..={})", field, items.len(), min, max));
    }
    if items.iter().any(|item| item.trim().is_empty()) {
        return Err(format!("{} contains an empty item", field));
    }
    Ok(())
}

/// 모델 출력 파싱 결과
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed<T> {
    Valid(T),
    Incomplete { missing: Vec<String>, unknown: Vec<String> },
    Invalid(String),
}

impl<T> Parsed<T> {
    pub fn is_valid(&self) -> bool {
        matches!(self, Parsed::Valid(_))
    }

    /// 수정 요청/에러 메시지용 설명
    pub fn problem(&self) -> Option<String> {
        match self {
            Parsed::Valid(_) => None,
            Parsed::Incomplete { missing, unknown } => {
                let mut parts = Vec::new();
                if !missing.is_empty() {
                    parts.push(format!("missing fields: {}", missing.join(", ")));
                }
                if !unknown.is_empty() {
                    parts.push(format!("unknown fields: {}", unknown.join(", ")));
                }
                Some(parts.join("; "))
            }
            Parsed::Invalid(reason) => Some(reason.clone()),
        }
    }
}

/// 코드펜스(```json ... ```)만 벗겨냄. 내용은 건드리지 않음
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 모델 출력 문자열을 스키마로 파싱
pub fn parse_output<T: StructuredOutput>(raw: &str) -> Parsed<T> {
    let value: Value = match serde_json::from_str(strip_code_fence(raw)) {
        Ok(value) => value,
        Err(e) => return Parsed::Invalid(format!("{} output is not valid JSON: {}", T::NAME, e)),
    };
    let Value::Object(map) = &value else {
        return Parsed::Invalid(format!("{} output is not a JSON object", T::NAME));
    };

    let missing: Vec<String> = T::FIELDS
        .iter()
        .filter(|field| !map.contains_key(**field))
        .map(|field| field.to_string())
        .collect();
    let mut unknown: Vec<String> = map
        .keys()
        .filter(|key| !T::FIELDS.contains(&key.as_str()))
        .cloned()
        .collect();
    unknown.sort();
    if !missing.is_empty() || !unknown.is_empty() {
        return Parsed::Incomplete { missing, unknown };
    }

    let parsed: T = match serde_json::from_value(value) {
        Ok(parsed) => parsed,
        Err(e) => return Parsed::Invalid(format!("{} output has wrong types: {}", T::NAME, e)),
    };
    match parsed.check() {
        Ok(()) => Parsed::Valid(parsed),
        Err(reason) => Parsed::Invalid(format!("{} output violates constraints: {}", T::NAME, reason)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSIGHT: &str = r#"{
        "key_points": ["Auth tests fail on token expiry"],
        "blockers": [{"description": "blocked on auth tests", "severity": "high"}],
        "resources_needed": ["auth service docs"],
        "confidence_delta": -0.2
    }"#;

    #[test]
    fn test_valid_insight() {
        let Parsed::Valid(insight) = parse_output::<Insight>(INSIGHT) else {
            panic!("expected valid insight");
        };
        assert_eq!(insight.blockers[0].severity, Severity::High);
    }

    #[test]
    fn test_code_fence_is_stripped() {
        let fenced = format!("```json\n{}\n```", INSIGHT);
        assert!(parse_output::<Insight>(&fenced).is_valid());
    }

    #[test]
    fn test_missing_and_unknown_fields_are_incomplete() {
        let parsed = parse_output::<Insight>(r#"{"key_points": [], "blockers": [], "mood": "low"}"#);
        assert_eq!(
            parsed,
            Parsed::Incomplete {
                missing: vec!["resources_needed".to_string(), "confidence_delta".to_string()],
                unknown: vec!["mood".to_string()],
            }
        );
    }

    #[test]
    fn test_out_of_range_values_are_not_clamped() {
        let raw = INSIGHT.replace("-0.2", "1.5");
        assert!(matches!(parse_output::<Insight>(&raw), Parsed::Invalid(_)));

        let raw = INSIGHT.replace("\"high\"", "\"critical\"");
        assert!(matches!(parse_output::<Insight>(&raw), Parsed::Invalid(_)));
    }

    #[test]
    fn test_advice_step_bounds() {
        let two_steps = r#"{"steps": ["a", "b"], "checklist": [], "urgency": "low"}"#;
        assert!(matches!(parse_output::<Advice>(two_steps), Parsed::Invalid(_)));

        let ok = r#"{"steps": ["a", "b", "c"], "checklist": ["x"], "urgency": "medium"}"#;
        assert!(parse_output::<Advice>(ok).is_valid());
    }

    #[test]
    fn test_meeting_prep_needs_two_items_per_audience() {
        let ok = r#"{
            "team_update": ["auth suite fixed", "deploy scripts reviewed"],
            "manager_update": ["onboarding on track", "auth flakiness is the main risk"],
            "recommendations": ["book a pairing slot", "write down the token flow"]
        }"#;
        assert!(parse_output::<MeetingPrep>(ok).is_valid());

        let thin = ok.replace(r#"["book a pairing slot", "write down the token flow"]"#, r#"["book a pairing slot"]"#);
        assert!(matches!(parse_output::<MeetingPrep>(&thin), Parsed::Invalid(_)));

        let missing = r#"{"team_update": ["a", "b"], "manager_update": ["c", "d"]}"#;
        assert_eq!(
            parse_output::<MeetingPrep>(missing),
            Parsed::Incomplete {
                missing: vec!["recommendations".to_string()],
                unknown: vec![],
            }
        );
    }

    #[test]
    fn test_non_json_is_invalid() {
        let parsed = parse_output::<Advice>("Sure! Here are some steps...");
        assert!(matches!(parsed, Parsed::Invalid(_)));
        assert!(parsed.problem().is_some());
    }
}

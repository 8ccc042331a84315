//! 프롬프트 템플릿
//!
//! 프롬프트 문구가 바뀌면 버전도 올려야 함 (캐시 키와 저장된 분석 결과에 버전이 포함됨)

use serde::{Deserialize, Serialize};

use crate::advice::schema::{MAX_ADVICE_STEPS, MAX_LIST_ITEMS, MAX_PREP_ITEMS, MIN_ADVICE_STEPS, MIN_PREP_ITEMS};

pub const REFLECTION_PROMPT_VERSION: &str = "reflection-v1";
pub const TRANSCRIPT_PROMPT_VERSION: &str = "transcript-v1";
pub const ADVICE_PROMPT_VERSION: &str = "advice-v1";
pub const PREP_PROMPT_VERSION: &str = "prep-v1";

const INSIGHT_SCHEMA: &str = r#"{
  "key_points": ["string"],
  "blockers": [{"description": "string", "severity": "low|medium|high"}],
  "resources_needed": ["string"],
  "confidence_delta": 0.0
}"#;

const ADVICE_SCHEMA: &str = r#"{
  "steps": ["string"],
  "checklist": ["string"],
  "urgency": "low|medium|high"
}"#;

const PREP_SCHEMA: &str = r#"{
  "team_update": ["string"],
  "manager_update": ["string"],
  "recommendations": ["string"]
}"#;

/// 입력 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// 직접 작성한 회고
    Reflection,
    /// 정리된 터미널 로그
    Transcript,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Reflection => "reflection",
            EntryKind::Transcript => "transcript",
        }
    }

    pub fn prompt_version(&self) -> &'static str {
        match self {
            EntryKind::Reflection => REFLECTION_PROMPT_VERSION,
            EntryKind::Transcript => TRANSCRIPT_PROMPT_VERSION,
        }
    }

    /// 인사이트 + 조언 단계를 합친 버전 문자열
    pub fn pipeline_version(&self) -> String {
        format!("{}+{}", self.prompt_version(), ADVICE_PROMPT_VERSION)
    }

    pub fn insight_system_prompt(&self) -> String {
        let source = match self {
            EntryKind::Reflection => {
                "You read a developer's private work reflection written during their first weeks on a new team."
            }
            EntryKind::Transcript => {
                "You read a cleaned terminal session transcript (commands and their output) from a developer's working session."
            }
        };
        format!(
            "{source}\n\
             Extract a structured insight. Respond with a single JSON object and nothing else, using exactly these fields:\n\
             {schema}\n\
             Rules:\n\
             - key_points: at most {max} short, concrete observations.\n\
             - blockers: at most {max}; each has a description and a severity of low, medium or high.\n\
             - resources_needed: at most {max} docs, people, access or tools that would unblock progress.\n\
             - confidence_delta: number between -1.0 and 1.0 estimating how the developer's confidence changed.\n\
             - Do not add fields. Do not wrap the JSON in prose.",
            source = source,
            schema = INSIGHT_SCHEMA,
            max = MAX_LIST_ITEMS,
        )
    }

    pub fn insight_user_message(&self, text: &str) -> String {
        match self {
            EntryKind::Reflection => format!("Reflection:\n{}", text),
            EntryKind::Transcript => format!("Transcript:\n{}", text),
        }
    }
}

pub fn advice_system_prompt() -> String {
    format!(
        "You turn a structured insight about a developer's week into small, actionable advice.\n\
         Respond with a single JSON object and nothing else, using exactly these fields:\n\
         {schema}\n\
         Rules:\n\
         - steps: {min} to {max_steps} concrete next actions, each doable within a day.\n\
         - checklist: at most {max_items} short items the developer can tick off.\n\
         - urgency: low, medium or high, based on blocker severity.\n\
         - Do not add fields. Do not wrap the JSON in prose.",
        schema = ADVICE_SCHEMA,
        min = MIN_ADVICE_STEPS,
        max_steps = MAX_ADVICE_STEPS,
        max_items = MAX_LIST_ITEMS,
    )
}

pub fn prep_system_prompt() -> String {
    format!(
        "You receive a JSON array of analyzed work entries from a developer's recent weeks, newest first. \
         Each entry has an insight (key points, blockers, resources) and the advice given at the time.\n\
         Compose meeting preparation notes. Respond with a single JSON object and nothing else, using exactly these fields:\n\
         {schema}\n\
         Rules:\n\
         - team_update: {min} to {max} peer-friendly progress updates.\n\
         - manager_update: {min} to {max} updates on outcomes, risks and timeline.\n\
         - recommendations: {min} to {max} concrete next steps for the coming week.\n\
         - Use only facts present in the entries. Do not add fields. Do not wrap the JSON in prose.",
        schema = PREP_SCHEMA,
        min = MIN_PREP_ITEMS,
        max = MAX_PREP_ITEMS,
    )
}

/// 스키마 위반 시 다시 보낼 교정 지시
pub fn repair_instruction(problem: &str, fields: &[&str]) -> String {
    format!(
        "Your previous reply was rejected: {problem}.\n\
         Reply again with only one JSON object containing exactly these fields: {fields}. \
         Respect every rule from the instructions. No prose, no code fences.",
        problem = problem,
        fields = fields.join(", "),
    )
}

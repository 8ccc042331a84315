//! Orchestrator
//!
//! 원문 텍스트 → 스키마 검증된 인사이트/조언
//!
//! 요청별 상태 전이:
//! `Validated → CacheCheck → (CacheHit) | Generating → Repairing* → Persisting → Done`
//! 실패는 `Failed(지점)`으로 끝나며, 생성이 끝나기 전에는 아무것도 저장/캐시하지 않습니다.

pub mod prompts;
pub mod schema;
pub mod validate;

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::cache::{self, ResponseCache};
use crate::config::AppConfig;
use crate::db::VaultHandle;
use crate::error::{InnerBoardError, Result};
use crate::llm::{ChatMessage, ModelClient};
use crate::models::{AnalysisMeta, RecordId};

pub use prompts::EntryKind;
pub use schema::{Advice, Analysis, Blocker, Insight, MeetingPrep, Parsed, Severity, Urgency};

use schema::{parse_output, StructuredOutput};

/// 실패 지점
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailurePoint {
    Validation,
    Generating,
    Repairing,
    Persisting,
}

/// 요청 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "stage", content = "at", rename_all = "camelCase")]
pub enum Stage {
    Validated,
    CacheCheck,
    CacheHit,
    Generating,
    Repairing,
    Persisting,
    Done,
    Failed(FailurePoint),
}

/// 한 요청의 상태 기록
struct RequestTrace {
    request_id: Uuid,
    stages: Vec<Stage>,
    model_calls: u32,
    repairs: u32,
}

impl RequestTrace {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            stages: Vec::new(),
            model_calls: 0,
            repairs: 0,
        }
    }

    fn advance(&mut self, stage: Stage) {
        tracing::debug!(stage = ?stage, "orchestrator state transition");
        self.stages.push(stage);
    }

    fn fail(&mut self, at: FailurePoint, err: InnerBoardError) -> InnerBoardError {
        self.advance(Stage::Failed(at));
        tracing::warn!(at = ?at, code = err.code(), "request failed");
        err
    }
}

/// 분석 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutcome {
    pub request_id: Uuid,
    pub kind: EntryKind,
    pub analysis: Analysis,
    pub from_cache: bool,
    pub model_calls: u32,
    pub repairs: u32,
    pub stages: Vec<Stage>,
}

/// 저장까지 마친 결과
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    pub record_id: RecordId,
    #[serde(flatten)]
    pub outcome: AnalysisOutcome,
}

/// 미팅 준비 결과 (저장/캐시 없음)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepOutcome {
    pub request_id: Uuid,
    pub prep: MeetingPrep,
    pub prompt_version: &'static str,
    pub model_calls: u32,
    pub repairs: u32,
    pub stages: Vec<Stage>,
}

pub struct Orchestrator {
    client: Arc<ModelClient>,
    cache: Arc<ResponseCache<Analysis>>,
    repair_attempts: u32,
}

impl Orchestrator {
    pub fn new(client: Arc<ModelClient>, cache: Arc<ResponseCache<Analysis>>, repair_attempts: u32) -> Self {
        Self {
            client,
            cache,
            repair_attempts,
        }
    }

    pub fn from_config(config: &AppConfig, client: Arc<ModelClient>) -> Self {
        Self::new(
            client,
            Arc::new(ResponseCache::from_config(config)),
            config.schema_repair_attempts,
        )
    }

    pub fn client(&self) -> &Arc<ModelClient> {
        &self.client
    }

    pub fn cache(&self) -> &Arc<ResponseCache<Analysis>> {
        &self.cache
    }

    /// 캐시 키 (검증/정리 이후의 텍스트 기준)
    pub fn fingerprint(&self, text: &str, kind: EntryKind) -> String {
        cache::fingerprint(self.client.model(), &kind.pipeline_version(), kind.as_str(), text)
    }

    /// 분석만 수행 (저장 없음, 캐시는 채움)
    pub async fn analyze(&self, text: &str, kind: EntryKind) -> Result<AnalysisOutcome> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("analyze", %request_id, kind = kind.as_str());
        self.run(request_id, text, kind, None)
            .instrument(span)
            .await
            .map(|(_, outcome)| outcome)
    }

    /// 분석 후 원문과 결과를 한 트랜잭션으로 저장
    pub async fn add(&self, vault: &VaultHandle, text: &str, kind: EntryKind) -> Result<AddOutcome> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("add", %request_id, kind = kind.as_str());
        let (record_id, outcome) = self
            .run(request_id, text, kind, Some(vault))
            .instrument(span)
            .await?;
        let record_id = record_id.ok_or_else(|| {
            InnerBoardError::Config("persisting request finished without a record id".to_string())
        })?;
        Ok(AddOutcome { record_id, outcome })
    }

    /// 여러 입력을 동시에 분석. 실제 동시성은 모델 풀 크기로 제한됨
    pub async fn analyze_batch(&self, texts: &[String], kind: EntryKind) -> Vec<Result<AnalysisOutcome>> {
        tracing::info!(count = texts.len(), "batch analysis started");
        join_all(texts.iter().map(|text| self.analyze(text, kind))).await
    }

    /// 저장된 원문에 해당하는 캐시 항목 제거 (종류 무관)
    pub fn forget(&self, text: &str) {
        for kind in [EntryKind::Reflection, EntryKind::Transcript] {
            self.cache.invalidate(&self.fingerprint(text, kind));
        }
    }

    /// 분석 결과 여러 건(최신순)을 팀/매니저 공유용 미팅 준비 자료로 묶음
    pub async fn prepare_meeting(&self, analyses: &[Analysis]) -> Result<PrepOutcome> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("prep", %request_id, entries = analyses.len());
        self.run_prep(request_id, analyses).instrument(span).await
    }

    async fn run_prep(&self, request_id: Uuid, analyses: &[Analysis]) -> Result<PrepOutcome> {
        let mut trace = RequestTrace::new(request_id);
        if analyses.is_empty() {
            let err = InnerBoardError::InputValidation("no analyzed entries to prepare from".to_string());
            return Err(trace.fail(FailurePoint::Validation, err));
        }
        trace.advance(Stage::Validated);

        let entries = serde_json::to_string(analyses)?;
        let prep: MeetingPrep = self
            .generate_stage(
                vec![
                    ChatMessage::system(prompts::prep_system_prompt()),
                    ChatMessage::user(entries),
                ],
                &mut trace,
            )
            .await?;

        trace.advance(Stage::Done);
        tracing::info!(model_calls = trace.model_calls, repairs = trace.repairs, "meeting prep completed");
        Ok(PrepOutcome {
            request_id,
            prep,
            prompt_version: prompts::PREP_PROMPT_VERSION,
            model_calls: trace.model_calls,
            repairs: trace.repairs,
            stages: trace.stages,
        })
    }

    async fn run(
        &self,
        request_id: Uuid,
        text: &str,
        kind: EntryKind,
        vault: Option<&VaultHandle>,
    ) -> Result<(Option<RecordId>, AnalysisOutcome)> {
        let mut trace = RequestTrace::new(request_id);

        let text = validate::validate_entry(text, kind).map_err(|e| trace.fail(FailurePoint::Validation, e))?;
        trace.advance(Stage::Validated);

        let key = self.fingerprint(&text, kind);
        trace.advance(Stage::CacheCheck);
        let (analysis, from_cache) = match self.cache.get(&key) {
            Some(hit) => {
                tracing::debug!(fingerprint = &key[..12], "cache hit");
                trace.advance(Stage::CacheHit);
                (hit, true)
            }
            None => (self.generate_analysis(&text, kind, &mut trace).await?, false),
        };

        let record_id = match vault {
            Some(vault) => {
                trace.advance(Stage::Persisting);
                let meta = AnalysisMeta {
                    model: self.client.model().to_string(),
                    prompt_version: kind.pipeline_version(),
                };
                let stored = serde_json::to_vec(&analysis)
                    .map_err(InnerBoardError::from)
                    .and_then(|payload| vault.put_with_analysis(text.as_bytes(), &meta, &payload));
                Some(stored.map_err(|e| trace.fail(FailurePoint::Persisting, e))?)
            }
            None => None,
        };

        if !from_cache {
            self.cache.insert(&key, analysis.clone());
        }
        trace.advance(Stage::Done);
        tracing::info!(
            record_id,
            from_cache,
            model_calls = trace.model_calls,
            repairs = trace.repairs,
            "request completed"
        );

        Ok((
            record_id,
            AnalysisOutcome {
                request_id,
                kind,
                analysis,
                from_cache,
                model_calls: trace.model_calls,
                repairs: trace.repairs,
                stages: trace.stages,
            },
        ))
    }

    /// 2단계 생성: 인사이트 → 조언
    async fn generate_analysis(&self, text: &str, kind: EntryKind, trace: &mut RequestTrace) -> Result<Analysis> {
        let insight: Insight = self
            .generate_stage(
                vec![
                    ChatMessage::system(kind.insight_system_prompt()),
                    ChatMessage::user(kind.insight_user_message(text)),
                ],
                trace,
            )
            .await?;

        let insight_json = serde_json::to_string(&insight)?;
        let advice: Advice = self
            .generate_stage(
                vec![
                    ChatMessage::system(prompts::advice_system_prompt()),
                    ChatMessage::user(insight_json),
                ],
                trace,
            )
            .await?;

        Ok(Analysis { insight, advice })
    }

    /// 한 단계 생성 + 제한된 횟수의 스키마 수정 요청
    async fn generate_stage<T: StructuredOutput>(
        &self,
        mut messages: Vec<ChatMessage>,
        trace: &mut RequestTrace,
    ) -> Result<T> {
        trace.advance(Stage::Generating);
        let mut repairs: u32 = 0;

        loop {
            let at = if repairs == 0 {
                FailurePoint::Generating
            } else {
                FailurePoint::Repairing
            };

            trace.model_calls += 1;
            let raw = self.client.chat(&messages).await.map_err(|e| trace.fail(at, e))?;

            let problem = match parse_output::<T>(&raw) {
                Parsed::Valid(value) => return Ok(value),
                other => other.problem().unwrap_or_default(),
            };

            if repairs >= self.repair_attempts {
                let err = InnerBoardError::SchemaValidation(format!(
                    "{} output rejected after {} repair attempt(s): {}",
                    T::NAME,
                    repairs,
                    problem
                ));
                return Err(trace.fail(at, err));
            }

            repairs += 1;
            trace.repairs += 1;
            trace.advance(Stage::Repairing);
            tracing::warn!(schema = T::NAME, attempt = repairs, %problem, "model output failed schema validation; requesting repair");

            messages.push(ChatMessage::assistant(raw));
            messages.push(ChatMessage::user(prompts::repair_instruction(&problem, T::FIELDS)));
        }
    }
}

//! 미팅 준비 명령어
//!
//! 저장된 최근 분석 결과를 모아 팀/매니저 공유 메모와 추천 행동으로 요약

use serde::Serialize;

use crate::advice::schema::Analysis;
use crate::advice::PrepOutcome;
use crate::commands::AppContext;
use crate::error::{CommandResult, InnerBoardError};
use crate::models::RecordId;

/// 기본으로 묶는 최근 항목 수
pub const DEFAULT_PREP_ENTRIES: usize = 10;

/// 미팅 준비 결과
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepResult {
    /// 요약에 사용된 레코드 (최신순)
    pub record_ids: Vec<RecordId>,
    #[serde(flatten)]
    pub outcome: PrepOutcome,
}

/// 최근 `limit`개 레코드 중 분석이 있는 것만 모아 미팅 준비 자료 생성
///
/// 분석이 하나도 없으면 모델 호출 없이 `INPUT_VALIDATION`
pub async fn prep(ctx: &AppContext, limit: Option<usize>) -> CommandResult<PrepResult> {
    let vault = ctx.vault()?;
    let previews = vault.list(limit.unwrap_or(DEFAULT_PREP_ENTRIES), 0)?;

    let mut record_ids = Vec::new();
    let mut analyses = Vec::new();
    for preview in previews.iter().filter(|p| p.has_analysis) {
        let Some(stored) = vault.get_analysis(preview.id)? else {
            continue;
        };
        let analysis: Analysis = serde_json::from_slice(&stored.payload).map_err(InnerBoardError::from)?;
        record_ids.push(preview.id);
        analyses.push(analysis);
    }
    tracing::debug!(scanned = previews.len(), used = analyses.len(), "collected analyses for meeting prep");

    let outcome = ctx.orchestrator().prepare_meeting(&analyses).await?;
    Ok(PrepResult { record_ids, outcome })
}

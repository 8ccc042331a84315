//! Vault 명령어
//!
//! 키 초기화/잠금 해제, 회고 추가, 조회, 삭제

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::advice::prompts::EntryKind;
use crate::advice::schema::Analysis;
use crate::advice::validate::clean_terminal_log;
use crate::advice::AddOutcome;
use crate::commands::AppContext;
use crate::error::{CommandResult, InnerBoardError};
use crate::models::{AnalysisMeta, RecordId, RecordPreview, VaultCounts};

/// 목록 기본 크기
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// 잠금 해제 결과
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockResult {
    pub created: bool,
    pub password_protected: bool,
    pub counts: VaultCounts,
}

/// 단일 항목 상세
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryDetail {
    pub id: RecordId,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub analysis: Option<Analysis>,
    pub analysis_meta: Option<AnalysisMeta>,
}

/// 삭제 결과
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub id: RecordId,
    pub cache_invalidated: bool,
}

/// 전체 삭제 결과
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearResult {
    pub removed: usize,
}

fn effective_password<'a>(ctx: &'a AppContext, password: Option<&'a str>) -> Option<&'a str> {
    password.or(ctx.config().password.as_deref())
}

/// 최초 설정: 마스터키 생성 후 Vault 열기
///
/// 키 파일이 이미 있으면 `KEY_EXISTS`. 비밀번호가 없으면 설정의 `INNERBOARD_KEY_PASSWORD` 사용.
pub fn init(ctx: &AppContext, password: Option<&str>) -> CommandResult<UnlockResult> {
    let password = effective_password(ctx, password);
    let master = ctx.keys().initialize(password)?;
    ctx.install_session(master)?;

    Ok(UnlockResult {
        created: true,
        password_protected: password.is_some(),
        counts: ctx.vault()?.count()?,
    })
}

/// 기존 키로 잠금 해제
pub fn open(ctx: &AppContext, password: Option<&str>) -> CommandResult<UnlockResult> {
    let password = effective_password(ctx, password);
    let master = ctx.keys().unlock(password)?;
    ctx.install_session(master)?;

    Ok(UnlockResult {
        created: false,
        password_protected: ctx.keys().is_password_protected()?,
        counts: ctx.vault()?.count()?,
    })
}

/// 세션 종료. 마스터키는 drop 시 zeroize
pub fn close(ctx: &AppContext) -> CommandResult<bool> {
    match ctx.take_session()? {
        Some(session) => {
            session.vault.close()?;
            tracing::info!("session closed");
            Ok(true)
        }
        None => Ok(false),
    }
}

/// 회고 추가: 분석 후 원문과 결과를 함께 저장
pub async fn add(ctx: &AppContext, text: &str) -> CommandResult<AddOutcome> {
    let vault = ctx.vault()?;
    Ok(ctx.orchestrator().add(&vault, text, EntryKind::Reflection).await?)
}

/// 터미널 로그 추가: 정리 후 transcript 프롬프트로 분석
pub async fn add_transcript(ctx: &AppContext, raw_log: &str) -> CommandResult<AddOutcome> {
    let vault = ctx.vault()?;
    let cleaned = clean_terminal_log(raw_log);
    Ok(ctx.orchestrator().add(&vault, &cleaned, EntryKind::Transcript).await?)
}

/// 최신순 목록 (미리보기만 반환)
pub fn list(ctx: &AppContext, limit: Option<usize>, offset: Option<usize>) -> CommandResult<Vec<RecordPreview>> {
    let vault = ctx.vault()?;
    Ok(vault.list(limit.unwrap_or(DEFAULT_LIST_LIMIT), offset.unwrap_or(0))?)
}

/// 단일 항목 복호화 조회
pub fn show(ctx: &AppContext, id: RecordId) -> CommandResult<EntryDetail> {
    let vault = ctx.vault()?;
    let (created_at, plaintext) = vault.get_entry(id)?;
    let text = String::from_utf8(plaintext.to_vec())
        .map_err(|_| InnerBoardError::Tamper(format!("record {}: not valid UTF-8", id)))?;

    let (analysis, analysis_meta) = match vault.get_analysis(id)? {
        Some(stored) => {
            let analysis: Analysis =
                serde_json::from_slice(&stored.payload).map_err(InnerBoardError::from)?;
            (Some(analysis), Some(stored.meta))
        }
        None => (None, None),
    };

    Ok(EntryDetail {
        id,
        created_at,
        text,
        analysis,
        analysis_meta,
    })
}

/// 항목 삭제 (secure delete) 및 해당 캐시 무효화
///
/// 원문 복호화에 실패해도 삭제는 진행 (캐시는 TTL로 만료)
pub fn delete(ctx: &AppContext, id: RecordId) -> CommandResult<DeleteResult> {
    let vault = ctx.vault()?;
    let text = vault
        .take(id)?
        .and_then(|plaintext| String::from_utf8(plaintext.to_vec()).ok());

    let cache_invalidated = match text {
        Some(text) => {
            ctx.orchestrator().forget(&text);
            true
        }
        None => false,
    };

    Ok(DeleteResult { id, cache_invalidated })
}

/// 전체 삭제 (캐시 포함)
pub fn clear(ctx: &AppContext) -> CommandResult<ClearResult> {
    let vault = ctx.vault()?;
    let removed = vault.clear()?;
    ctx.orchestrator().cache().clear();
    Ok(ClearResult { removed })
}

/// 비밀번호 변경 (마스터키 유지, wrapping만 교체)
pub fn rotate(ctx: &AppContext, new_password: Option<&str>) -> CommandResult<bool> {
    ctx.with_session(|session| ctx.keys().rotate(&session.master, new_password))?;
    Ok(new_password.is_some())
}

//! 상태 / 진단 명령어

use serde::Serialize;

use crate::cache::CacheStats;
use crate::commands::AppContext;
use crate::db;
use crate::error::CommandResult;
use crate::guard::{GuardPolicy, GuardReceipt};
use crate::llm::types::ModelInfo;
use crate::models::VaultCounts;

/// 전체 상태
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub key_present: bool,
    pub password_protected: Option<bool>,
    pub vault_present: bool,
    pub unlocked: bool,
    pub counts: Option<VaultCounts>,
    pub model: String,
    pub endpoint: String,
    pub cache: CacheStats,
    pub guard_armed: bool,
    pub guard_policy: Option<GuardPolicy>,
    pub violations: u64,
}

/// 모델 목록
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelsReport {
    pub configured: String,
    pub installed: bool,
    pub models: Vec<ModelInfo>,
}

/// 키/Vault/캐시/가드 상태 (잠금 해제 없이도 동작)
pub fn status(ctx: &AppContext) -> CommandResult<StatusReport> {
    let config = ctx.config();
    let keys = ctx.keys();

    let password_protected = if keys.exists() {
        Some(keys.is_password_protected()?)
    } else {
        None
    };

    let counts = match ctx.vault() {
        Ok(vault) => Some(vault.count()?),
        Err(_) => db::peek_counts(&config.db_path)?,
    };

    let guard = ctx.guard();
    Ok(StatusReport {
        key_present: keys.exists(),
        password_protected,
        vault_present: config.db_path.exists(),
        unlocked: ctx.is_unlocked(),
        counts,
        model: config.model.clone(),
        endpoint: config.ollama_host.to_string(),
        cache: ctx.orchestrator().cache().stats(),
        guard_armed: guard.is_armed(),
        guard_policy: guard.current_policy(),
        violations: guard.violations(),
    })
}

/// 설치된 모델 조회 + 설정된 모델 존재 여부
pub async fn models(ctx: &AppContext) -> CommandResult<ModelsReport> {
    let configured = ctx.config().model.clone();
    let models = ctx.orchestrator().client().list_models().await?;
    let installed = models.iter().any(|m| model_matches(&m.name, &configured));

    if !installed {
        tracing::warn!(model = %configured, "configured model is not installed");
    }

    Ok(ModelsReport {
        configured,
        installed,
        models,
    })
}

/// 만료된 캐시 항목 정리
pub fn purge_cache(ctx: &AppContext) -> CommandResult<usize> {
    Ok(ctx.orchestrator().cache().purge_expired())
}

/// 캐시 통계
pub fn cache_stats(ctx: &AppContext) -> CommandResult<CacheStats> {
    Ok(ctx.orchestrator().cache().stats())
}

/// 가드 정책 검증 실행
pub fn verify_guard(ctx: &AppContext) -> CommandResult<GuardReceipt> {
    Ok(ctx.guard().verify()?)
}

/// 태그 없는 이름은 `:latest`와 같은 모델로 취급
fn model_matches(installed: &str, configured: &str) -> bool {
    let normalize = |name: &str| {
        if name.contains(':') {
            name.to_string()
        } else {
            format!("{}:latest", name)
        }
    };
    normalize(installed) == normalize(configured)
}

//! InnerBoard Data Models
//!
//! 저장소/명령 계층이 공유하는 데이터 모델

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vault가 부여하는 레코드 ID (단조 증가, 재사용 없음)
pub type RecordId = i64;

/// 목록 조회용 미리보기
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPreview {
    pub id: RecordId,
    pub preview: String,
    pub created_at: DateTime<Utc>,
    pub has_analysis: bool,
}

/// 레코드와 함께 저장되는 분석 결과 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMeta {
    pub model: String,
    pub prompt_version: String,
}

/// 복호화된 분석 결과 (직렬화된 JSON 그대로)
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAnalysis {
    pub meta: AnalysisMeta,
    pub created_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

/// 복호화 없이 셀 수 있는 Vault 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultCounts {
    pub records: u64,
    pub analyses: u64,
}

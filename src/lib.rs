//! InnerBoard - 로컬 우선 암호화 저널 Vault 라이브러리
//!
//! 회고/터미널 로그를 로컬 SQLite에 암호화 저장하고, 루프백 전용 모델 엔드포인트로
//! 구조화된 인사이트와 조언을 생성합니다. 표현 계층(CLI)은 `commands` 모듈만 사용합니다.

pub mod advice;
pub mod cache;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod llm;
pub mod logging;
pub mod models;
pub mod secrets;
pub mod utils;

pub use advice::{Analysis, EntryKind, Orchestrator};
pub use commands::AppContext;
pub use config::AppConfig;
pub use error::{CommandError, CommandResult, InnerBoardError, Result};

/// 환경 설정을 읽고 로깅을 켠 뒤 실행 컨텍스트 생성
pub fn bootstrap() -> Result<AppContext> {
    let config = AppConfig::from_env()?;
    logging::init_logging(&config.log)?;
    AppContext::from_config(config)
}

//! InnerBoard Error Types
//!
//! 애플리케이션 전역 에러 타입 정의
//!
//! Key Manager / Vault Store 에러는 종류를 유지한 채 호출자까지 전파됩니다.
//! 표현(코드/메시지)만 `CommandError`에서 달라집니다.

use serde::Serialize;
use thiserror::Error;

/// InnerBoard 애플리케이션 에러
#[derive(Error, Debug)]
pub enum InnerBoardError {
    #[error("Key material already exists: {0}")]
    KeyExists(String),

    #[error("Key material not found: {0}")]
    KeyMissing(String),

    #[error("Wrong password or corrupted key wrapping")]
    WrongPassword,

    #[error("Integrity check failed: {0}")]
    Tamper(String),

    #[error("Vault is closed")]
    VaultClosed,

    #[error("Record not found: {0}")]
    NotFound(i64),

    #[error("Network policy violation: {0}")]
    NetworkPolicyViolation(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Schema validation failed: {0}")]
    SchemaValidation(String),

    #[error("Invalid input: {0}")]
    InputValidation(String),

    #[error("Network guard fault: {0}")]
    GuardFault(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Lock poisoned: {0}")]
    Lock(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl InnerBoardError {
    /// 로컬 재시도 대상 여부 (백엔드 일시 장애만 해당)
    pub fn is_transient(&self) -> bool {
        matches!(self, InnerBoardError::ModelUnavailable(_))
    }

    /// 안정적인 에러 코드
    pub fn code(&self) -> &'static str {
        match self {
            InnerBoardError::KeyExists(_) => "KEY_EXISTS",
            InnerBoardError::KeyMissing(_) => "KEY_MISSING",
            InnerBoardError::WrongPassword => "WRONG_PASSWORD",
            InnerBoardError::Tamper(_) => "TAMPER_DETECTED",
            InnerBoardError::VaultClosed => "VAULT_CLOSED",
            InnerBoardError::NotFound(_) => "NOT_FOUND",
            InnerBoardError::NetworkPolicyViolation(_) => "NETWORK_POLICY_VIOLATION",
            InnerBoardError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            InnerBoardError::SchemaValidation(_) => "SCHEMA_VALIDATION",
            InnerBoardError::InputValidation(_) => "INPUT_VALIDATION",
            InnerBoardError::GuardFault(_) => "GUARD_FAULT",
            InnerBoardError::Config(_) => "CONFIG_ERROR",
            InnerBoardError::Crypto(_) => "CRYPTO_ERROR",
            InnerBoardError::Lock(_) => "LOCK_ERROR",
            InnerBoardError::Database(_) => "DB_ERROR",
            InnerBoardError::Io(_) => "IO_ERROR",
            InnerBoardError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for InnerBoardError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        InnerBoardError::Lock(err.to_string())
    }
}

/// crate 전역 Result
pub type Result<T> = std::result::Result<T, InnerBoardError>;

/// CLI 계층 응답용 직렬화 가능한 에러
#[derive(Debug, Serialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl From<InnerBoardError> for CommandError {
    fn from(error: InnerBoardError) -> Self {
        let details = match &error {
            InnerBoardError::Tamper(_) => {
                Some("The vault or key file may have been modified outside InnerBoard.".to_string())
            }
            InnerBoardError::KeyMissing(_) => Some("Run `init` first to set up your vault.".to_string()),
            _ => None,
        };

        CommandError {
            code: error.code().to_string(),
            message: error.to_string(),
            details,
        }
    }
}

/// 명령 결과 타입
pub type CommandResult<T> = std::result::Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_keeps_kind() {
        let err: CommandError = InnerBoardError::Tamper("record 3".to_string()).into();
        assert_eq!(err.code, "TAMPER_DETECTED");
        assert!(err.message.contains("record 3"));
        assert!(err.details.is_some());

        let err: CommandError = InnerBoardError::NotFound(7).into();
        assert_eq!(err.code, "NOT_FOUND");
        assert!(err.details.is_none());
    }

    #[test]
    fn test_only_model_unavailable_is_transient() {
        assert!(InnerBoardError::ModelUnavailable("down".into()).is_transient());
        assert!(!InnerBoardError::NetworkPolicyViolation("8.8.8.8:53".into()).is_transient());
        assert!(!InnerBoardError::SchemaValidation("missing urgency".into()).is_transient());
    }
}

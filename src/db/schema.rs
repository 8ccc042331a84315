//! Database Schema
//!
//! SQLite 테이블 스키마 정의

/// 연결마다 적용하는 pragma
/// - WAL: 단일 writer / 다중 reader
/// - secure_delete: 삭제된 셀 내용을 0으로 덮어씀
pub const CONNECTION_PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA secure_delete = ON;
PRAGMA busy_timeout = 5000;
"#;

/// 스키마 버전
pub const SCHEMA_VERSION: &str = "1";

/// 데이터베이스 스키마 생성 SQL
pub const CREATE_SCHEMA: &str = r#"
-- Vault 메타데이터 (스키마 버전, 키 확인값)
CREATE TABLE IF NOT EXISTS vault_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- 레코드 테이블 (AUTOINCREMENT: 삭제된 ID 재사용 금지)
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at TEXT NOT NULL,
    nonce BLOB NOT NULL UNIQUE,
    ciphertext BLOB NOT NULL,
    digest BLOB NOT NULL
);

-- 분석 결과 테이블 (레코드와 생명주기 공유)
CREATE TABLE IF NOT EXISTS analyses (
    record_id INTEGER PRIMARY KEY,
    model TEXT NOT NULL,
    prompt_version TEXT NOT NULL,
    created_at TEXT NOT NULL,
    nonce BLOB NOT NULL UNIQUE,
    ciphertext BLOB NOT NULL,
    digest BLOB NOT NULL,
    FOREIGN KEY (record_id) REFERENCES records(id) ON DELETE CASCADE
);
"#;

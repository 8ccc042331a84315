//! Key Manager 모듈
//!
//! 마스터키 1개로 Vault 전체를 암호화합니다.
//!
//! - 마스터키는 `vault.key` 파일에 저장 (비밀번호가 있으면 PBKDF2 파생 키로 wrapping)
//! - 런타임에서는 메모리에만 보관하고 drop 시 zeroize
//! - 레코드 암호화/다이제스트 키는 HKDF로 마스터키에서 분리 파생

pub mod crypto;
pub mod keyfile;
pub mod manager;

pub use manager::{KeyManager, MasterKey};

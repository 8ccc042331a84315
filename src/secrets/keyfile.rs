//! Key 파일 I/O
//!
//! 파일 포맷 (v2, JSON):
//! - `kdf`, `iterations`, `salt`: 생성 후 불변
//! - `wrapped_key`: 비밀번호 보호 시에만 존재 (nonce 24 bytes || AEAD 결과)
//! - `master_key`: 비밀번호 없이 초기화한 경우에만 존재 (파일 권한 0600)
//! - `key_check`: 마스터키로 계산한 확인값 (회전 시 같은 키인지 검증)
//! - `integrity_tag`: 위 필드 전체에 대한 HMAC-SHA256

use std::fs;
use std::io::Write;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InnerBoardError, Result};

pub const KEYFILE_VERSION: u32 = 2;
pub const KDF_ALGORITHM: &str = "pbkdf2-hmac-sha256";
pub const SALT_LEN: usize = 32;

/// 디스크에 저장되는 키 메타데이터
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFile {
    pub version: u32,
    pub kdf: String,
    pub iterations: u32,
    pub salt: String,
    pub password_protected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_key: Option<String>,
    pub key_check: String,
    pub integrity_tag: String,
    pub created_at: DateTime<Utc>,
}

impl KeyFile {
    /// 무결성 태그 대상 필드 (태그 자신과 created_at 제외)
    pub fn tagged_fields(&self) -> Vec<Vec<u8>> {
        vec![
            self.version.to_be_bytes().to_vec(),
            self.kdf.as_bytes().to_vec(),
            self.iterations.to_be_bytes().to_vec(),
            self.salt.as_bytes().to_vec(),
            vec![u8::from(self.password_protected)],
            self.wrapped_key.as_deref().unwrap_or_default().as_bytes().to_vec(),
            self.master_key.as_deref().unwrap_or_default().as_bytes().to_vec(),
            self.key_check.as_bytes().to_vec(),
        ]
    }

    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        decode_field("salt", &self.salt)
    }

    pub fn tag_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(&self.integrity_tag).map_err(|_| corrupt("integrity_tag is not hex"))
    }

    /// 포맷/알고리즘 기본 검증. 실패는 변조로 취급
    pub fn check_header(&self) -> Result<()> {
        if self.version != KEYFILE_VERSION {
            return Err(corrupt(&format!("unsupported key file version {}", self.version)));
        }
        if self.kdf != KDF_ALGORITHM {
            return Err(corrupt(&format!("unsupported kdf {}", self.kdf)));
        }
        if self.iterations == 0 {
            return Err(corrupt("iteration count is zero"));
        }
        if self.password_protected != self.wrapped_key.is_some()
            || self.password_protected == self.master_key.is_some()
        {
            return Err(corrupt("protection flag does not match stored key fields"));
        }
        Ok(())
    }
}

pub fn encode_field(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|_| corrupt(&format!("{} is not valid base64", name)))
}

fn corrupt(reason: &str) -> InnerBoardError {
    InnerBoardError::Tamper(format!("key file: {}", reason))
}

/// Key 파일 읽기
pub fn read_key_file(path: &Path) -> Result<KeyFile> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(InnerBoardError::KeyMissing(path.display().to_string()))
        }
        Err(e) => return Err(e.into()),
    };
    let key_file: KeyFile = serde_json::from_str(&text).map_err(|e| corrupt(&format!("unreadable ({})", e)))?;
    key_file.check_header()?;
    Ok(key_file)
}

fn write_tmp(path: &Path, key_file: &KeyFile) -> Result<std::path::PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("key.tmp");
    let json = serde_json::to_vec_pretty(key_file)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    Ok(tmp_path)
}

/// 신규 생성: 대상이 이미 있으면 `KeyExists` (암묵적 덮어쓰기 금지)
///
/// hard link는 대상이 존재하면 실패하므로 확인과 생성이 원자적으로 이루어짐
pub fn create_key_file(path: &Path, key_file: &KeyFile) -> Result<()> {
    if path.exists() {
        return Err(InnerBoardError::KeyExists(path.display().to_string()));
    }
    let tmp_path = write_tmp(path, key_file)?;
    let linked = fs::hard_link(&tmp_path, path);
    let _ = fs::remove_file(&tmp_path);
    match linked {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(InnerBoardError::KeyExists(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// 기존 파일 교체 (회전용): 임시 파일에 쓰고 rename
pub fn replace_key_file(path: &Path, key_file: &KeyFile) -> Result<()> {
    if !path.exists() {
        return Err(InnerBoardError::KeyMissing(path.display().to_string()));
    }
    let tmp_path = write_tmp(path, key_file)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> KeyFile {
        KeyFile {
            version: KEYFILE_VERSION,
            kdf: KDF_ALGORITHM.to_string(),
            iterations: 1_000,
            salt: encode_field(&[1u8; SALT_LEN]),
            password_protected: false,
            wrapped_key: None,
            master_key: Some(encode_field(&[2u8; 32])),
            key_check: "00".to_string(),
            integrity_tag: "00".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_create_refuses_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.key");

        create_key_file(&path, &sample()).unwrap();
        let err = create_key_file(&path, &sample()).unwrap_err();
        assert!(matches!(err, InnerBoardError::KeyExists(_)));
        assert!(!path.with_extension("key.tmp").exists());
    }

    #[test]
    fn test_read_missing_is_key_missing() {
        let dir = tempdir().unwrap();
        let err = read_key_file(&dir.path().join("nope.key")).unwrap_err();
        assert!(matches!(err, InnerBoardError::KeyMissing(_)));
    }

    #[test]
    fn test_inconsistent_protection_flag_is_tamper() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.key");
        let mut key_file = sample();
        key_file.password_protected = true;
        fs::write(&path, serde_json::to_vec(&key_file).unwrap()).unwrap();

        let err = read_key_file(&path).unwrap_err();
        assert!(matches!(err, InnerBoardError::Tamper(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.key");
        create_key_file(&path, &sample()).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

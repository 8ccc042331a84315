//! Key Manager - 마스터키 생성 / 잠금 해제 / 회전
//!
//! - 마스터키는 CSPRNG로 1회 생성하며 이후 절대 바뀌지 않음 (데이터 암호화 키)
//! - 비밀번호가 있으면 PBKDF2로 파생한 wrapping key로 감싸서 저장
//! - 회전(`rotate`)은 salt와 wrapping만 새로 만들고 마스터키는 유지 → 레코드 재암호화 불필요

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::config::AppConfig;
use crate::error::{InnerBoardError, Result};
use crate::secrets::crypto::{self, KEY_LEN, NONCE_LEN};
use crate::secrets::keyfile::{
    self, create_key_file, read_key_file, replace_key_file, KeyFile, KDF_ALGORITHM, KEYFILE_VERSION,
    SALT_LEN,
};

/// key wrapping AEAD의 AAD (포맷 바인딩)
const WRAP_AAD: &[u8] = b"innerboard:keywrap:v2";
/// key_check 계산용 라벨
const KEY_CHECK_LABEL: &[u8] = b"innerboard:key-check:v2";

/// Zeroize가 적용된 마스터키 (drop 시 메모리에서 지움)
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    fn generate() -> Self {
        Self {
            bytes: crypto::random_bytes::<KEY_LEN>(),
        }
    }

    fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEY_LEN {
            return Err(InnerBoardError::Tamper("key file: master key has wrong length".to_string()));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// 키 식별용 확인값 (키 자체는 드러내지 않음)
    pub fn check_value(&self) -> Result<String> {
        Ok(hex::encode(crypto::hmac_tag(&self.bytes, &[KEY_CHECK_LABEL])?))
    }

    /// 저장된 확인값과 같은 키인지 (상수 시간 비교)
    pub fn matches_check_value(&self, check_hex: &str) -> Result<bool> {
        let Ok(expected) = hex::decode(check_hex) else {
            return Ok(false);
        };
        crypto::verify_tag(&self.bytes, &[KEY_CHECK_LABEL], &expected)
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Key Manager
///
/// 전역 상태 없이 경로/반복 횟수만 가지므로 테스트마다 독립 인스턴스를 만들 수 있음
#[derive(Debug, Clone)]
pub struct KeyManager {
    key_path: PathBuf,
    iterations: u32,
}

impl KeyManager {
    pub fn new(key_path: impl Into<PathBuf>, iterations: u32) -> Self {
        Self {
            key_path: key_path.into(),
            iterations,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.key_path.clone(), config.kdf_iterations)
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    pub fn exists(&self) -> bool {
        self.key_path.exists()
    }

    /// 잠금 해제 없이 비밀번호 보호 여부만 확인
    pub fn is_password_protected(&self) -> Result<bool> {
        Ok(read_key_file(&self.key_path)?.password_protected)
    }

    /// 신규 마스터키 생성 및 저장
    ///
    /// 대상 위치에 이미 키가 있으면 `KeyExists`.
    pub fn initialize(&self, password: Option<&str>) -> Result<MasterKey> {
        if self.exists() {
            return Err(InnerBoardError::KeyExists(self.key_path.display().to_string()));
        }

        let master = MasterKey::generate();
        let key_file = seal_key_file(&master, password, self.iterations)?;
        create_key_file(&self.key_path, &key_file)?;

        tracing::info!(
            path = %self.key_path.display(),
            password_protected = key_file.password_protected,
            iterations = self.iterations,
            "master key initialized"
        );
        Ok(master)
    }

    /// 저장된 키 파일에서 마스터키 복원
    ///
    /// - 키 파일 없음: `KeyMissing`
    /// - 비밀번호 불일치(태그 불일치): `WrongPassword` (상수 시간 비교)
    /// - 태그는 맞는데 unwrap 실패 / 비보호 파일의 태그 불일치: `Tamper`
    pub fn unlock(&self, password: Option<&str>) -> Result<MasterKey> {
        let key_file = read_key_file(&self.key_path)?;
        let master = open_key_file(&key_file, password)?;
        tracing::debug!(path = %self.key_path.display(), "master key unlocked");
        Ok(master)
    }

    /// 비밀번호(wrapping) 회전
    ///
    /// 새 salt로 다시 감싸서 원자적으로 교체. 마스터키는 그대로이므로 기존 레코드는 계속 복호화됨.
    /// `master`는 현재 키 파일의 마스터키여야 함.
    pub fn rotate(&self, master: &MasterKey, new_password: Option<&str>) -> Result<()> {
        let current = read_key_file(&self.key_path)?;
        if !master.matches_check_value(&current.key_check)? {
            return Err(InnerBoardError::Crypto(
                "Supplied master key does not belong to this key file".to_string(),
            ));
        }

        let rotated = seal_key_file(master, new_password, self.iterations.max(current.iterations))?;
        replace_key_file(&self.key_path, &rotated)?;

        tracing::info!(
            path = %self.key_path.display(),
            password_protected = rotated.password_protected,
            "key wrapping rotated"
        );
        Ok(())
    }
}

/// 마스터키를 키 파일 구조로 봉인
fn seal_key_file(master: &MasterKey, password: Option<&str>, iterations: u32) -> Result<KeyFile> {
    let salt = crypto::random_bytes::<SALT_LEN>();
    let mut key_file = KeyFile {
        version: KEYFILE_VERSION,
        kdf: KDF_ALGORITHM.to_string(),
        iterations,
        salt: keyfile::encode_field(&salt),
        password_protected: password.is_some(),
        wrapped_key: None,
        master_key: None,
        key_check: master.check_value()?,
        integrity_tag: String::new(),
        created_at: Utc::now(),
    };

    let tag = match password {
        Some(password) => {
            let (wrap_key, tag_key) = crypto::derive_password_keys(password, &salt, iterations);
            let (nonce, ciphertext) = crypto::seal(&wrap_key, WRAP_AAD, master.as_bytes())?;
            let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
            blob.extend_from_slice(&nonce);
            blob.extend_from_slice(&ciphertext);
            key_file.wrapped_key = Some(keyfile::encode_field(&blob));
            tag_with(&tag_key[..], &key_file)?
        }
        None => {
            key_file.master_key = Some(keyfile::encode_field(master.as_bytes()));
            tag_with(master.as_bytes(), &key_file)?
        }
    };
    key_file.integrity_tag = hex::encode(tag);
    Ok(key_file)
}

fn tag_with(key: &[u8], key_file: &KeyFile) -> Result<[u8; crypto::TAG_LEN]> {
    let fields = key_file.tagged_fields();
    let parts: Vec<&[u8]> = fields.iter().map(Vec::as_slice).collect();
    crypto::hmac_tag(key, &parts)
}

fn verify_with(key: &[u8], key_file: &KeyFile) -> Result<bool> {
    let fields = key_file.tagged_fields();
    let parts: Vec<&[u8]> = fields.iter().map(Vec::as_slice).collect();
    crypto::verify_tag(key, &parts, &key_file.tag_bytes()?)
}

fn open_key_file(key_file: &KeyFile, password: Option<&str>) -> Result<MasterKey> {
    if !key_file.password_protected {
        if password.is_some() {
            tracing::warn!("password supplied for a key file that is not password protected; ignoring");
        }
        let raw = Zeroizing::new(keyfile::decode_field("master_key", key_file.master_key.as_deref().unwrap_or_default())?);
        let master = MasterKey::from_slice(&raw)?;
        if !verify_with(master.as_bytes(), key_file)? {
            return Err(InnerBoardError::Tamper("key file: integrity tag mismatch".to_string()));
        }
        return Ok(master);
    }

    let Some(password) = password else {
        tracing::warn!("key file is password protected but no password was supplied");
        return Err(InnerBoardError::WrongPassword);
    };

    let salt = key_file.salt_bytes()?;
    let (wrap_key, tag_key) = crypto::derive_password_keys(password, &salt, key_file.iterations);
    if !verify_with(&tag_key[..], key_file)? {
        return Err(InnerBoardError::WrongPassword);
    }

    let blob = keyfile::decode_field("wrapped_key", key_file.wrapped_key.as_deref().unwrap_or_default())?;
    if blob.len() <= NONCE_LEN {
        return Err(InnerBoardError::Tamper("key file: wrapped key is truncated".to_string()));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let raw = crypto::open(&wrap_key, nonce, WRAP_AAD, ciphertext)
        .ok_or_else(|| InnerBoardError::Tamper("key file: wrapped key failed authentication".to_string()))?;
    MasterKey::from_slice(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TEST_ITERATIONS: u32 = 1_000;

    fn manager(dir: &Path) -> KeyManager {
        KeyManager::new(dir.join("vault.key"), TEST_ITERATIONS)
    }

    #[test]
    fn test_initialize_then_unlock_with_password() {
        let dir = tempdir().unwrap();
        let km = manager(dir.path());

        let created = km.initialize(Some("p")).unwrap();
        let unlocked = km.unlock(Some("p")).unwrap();
        assert_eq!(created.as_bytes(), unlocked.as_bytes());
        assert!(km.is_password_protected().unwrap());
    }

    #[test]
    fn test_wrong_or_missing_password() {
        let dir = tempdir().unwrap();
        let km = manager(dir.path());
        km.initialize(Some("correct horse")).unwrap();

        assert!(matches!(km.unlock(Some("battery staple")), Err(InnerBoardError::WrongPassword)));
        assert!(matches!(km.unlock(None), Err(InnerBoardError::WrongPassword)));
    }

    #[test]
    fn test_initialize_refuses_existing_key() {
        let dir = tempdir().unwrap();
        let km = manager(dir.path());
        km.initialize(None).unwrap();
        assert!(matches!(km.initialize(None), Err(InnerBoardError::KeyExists(_))));
    }

    #[test]
    fn test_unlock_without_key_file() {
        let dir = tempdir().unwrap();
        assert!(matches!(manager(dir.path()).unlock(None), Err(InnerBoardError::KeyMissing(_))));
    }

    #[test]
    fn test_unprotected_key_tamper_detected() {
        let dir = tempdir().unwrap();
        let km = manager(dir.path());
        km.initialize(None).unwrap();

        let mut key_file = read_key_file(km.key_path()).unwrap();
        key_file.iterations += 1;
        std::fs::write(km.key_path(), serde_json::to_vec(&key_file).unwrap()).unwrap();

        assert!(matches!(km.unlock(None), Err(InnerBoardError::Tamper(_))));
    }

    #[test]
    fn test_protected_wrapped_key_tamper_is_rejected() {
        let dir = tempdir().unwrap();
        let km = manager(dir.path());
        km.initialize(Some("p")).unwrap();

        let mut key_file = read_key_file(km.key_path()).unwrap();
        let mut blob = keyfile::decode_field("w", key_file.wrapped_key.as_deref().unwrap()).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x80;
        key_file.wrapped_key = Some(keyfile::encode_field(&blob));
        std::fs::write(km.key_path(), serde_json::to_vec(&key_file).unwrap()).unwrap();

        // 태그가 wrapped_key까지 덮으므로 올바른 비밀번호여도 통과 못함
        assert!(km.unlock(Some("p")).is_err());
    }

    #[test]
    fn test_rotate_keeps_master_key() {
        let dir = tempdir().unwrap();
        let km = manager(dir.path());
        let master = km.initialize(Some("old")).unwrap();
        let before = read_key_file(km.key_path()).unwrap();

        km.rotate(&master, Some("new")).unwrap();
        let after = read_key_file(km.key_path()).unwrap();

        assert_ne!(before.salt, after.salt);
        assert!(matches!(km.unlock(Some("old")), Err(InnerBoardError::WrongPassword)));
        let unlocked = km.unlock(Some("new")).unwrap();
        assert_eq!(unlocked.as_bytes(), master.as_bytes());

        // 비밀번호 제거도 회전의 한 형태
        km.rotate(&unlocked, None).unwrap();
        assert!(!km.is_password_protected().unwrap());
        assert_eq!(km.unlock(None).unwrap().as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_rotate_rejects_foreign_master_key() {
        let dir = tempdir().unwrap();
        let km = manager(dir.path());
        km.initialize(None).unwrap();

        let other = KeyManager::new(dir.path().join("other.key"), TEST_ITERATIONS);
        let foreign = other.initialize(None).unwrap();
        assert!(km.rotate(&foreign, Some("x")).is_err());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let master = MasterKey::generate();
        assert_eq!(format!("{:?}", master), "MasterKey([REDACTED])");
    }
}

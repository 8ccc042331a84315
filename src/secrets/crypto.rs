//! 암호 프리미티브 모음
//!
//! - AEAD: XChaCha20-Poly1305 (nonce 24 bytes, 랜덤 생성해도 충돌 확률 무시 가능)
//! - 무결성 태그/다이제스트: HMAC-SHA256, 비교는 상수 시간
//! - 서브키 파생: HKDF-SHA256 (마스터키 하나에서 용도별 키 분리)
//! - 비밀번호 파생: PBKDF2-HMAC-SHA256

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{InnerBoardError, Result};

/// 대칭키 길이 (256-bit)
pub const KEY_LEN: usize = 32;

/// Nonce 길이 (XChaCha20-Poly1305용 24 bytes)
pub const NONCE_LEN: usize = 24;

/// HMAC-SHA256 출력 길이
pub const TAG_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// CSPRNG 랜덤 바이트
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::thread_rng().fill(&mut out[..]);
    out
}

/// AEAD 암호화. 반환: (nonce, ciphertext+tag)
pub fn seal(key: &[u8; KEY_LEN], aad: &[u8], plaintext: &[u8]) -> Result<([u8; NONCE_LEN], Vec<u8>)> {
    let nonce = random_bytes::<NONCE_LEN>();
    let cipher = XChaCha20Poly1305::new(key.into());
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
        .map_err(|e| InnerBoardError::Crypto(format!("Encryption failed: {}", e)))?;
    Ok((nonce, ciphertext))
}

/// AEAD 복호화. 태그 불일치는 `None` (호출자가 에러 종류를 결정)
pub fn open(key: &[u8; KEY_LEN], nonce: &[u8], aad: &[u8], ciphertext: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    if nonce.len() != NONCE_LEN {
        return None;
    }
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .ok()
        .map(Zeroizing::new)
}

fn mac_over(key: &[u8], parts: &[&[u8]]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| InnerBoardError::Crypto(format!("Failed to initialize HMAC: {}", e)))?;
    for part in parts {
        // 길이 prefix로 경계를 고정 (["ab","c"] 와 ["a","bc"] 구분)
        mac.update(&(part.len() as u64).to_be_bytes());
        mac.update(part);
    }
    Ok(mac)
}

/// HMAC-SHA256 태그 계산
pub fn hmac_tag(key: &[u8], parts: &[&[u8]]) -> Result<[u8; TAG_LEN]> {
    let mac = mac_over(key, parts)?;
    let mut out = [0u8; TAG_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// HMAC-SHA256 태그 검증 (상수 시간 비교)
pub fn verify_tag(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> Result<bool> {
    let mac = mac_over(key, parts)?;
    Ok(mac.verify_slice(tag).is_ok())
}

/// 마스터키에서 용도별 서브키 파생
pub fn derive_subkey(master: &[u8; KEY_LEN], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, master);
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut out[..])
        .map_err(|e| InnerBoardError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(out)
}

/// 비밀번호에서 (wrapping key, tag key) 파생
pub fn derive_password_keys(
    password: &str,
    salt: &[u8],
    iterations: u32,
) -> (Zeroizing<[u8; KEY_LEN]>, Zeroizing<[u8; KEY_LEN]>) {
    let mut okm = Zeroizing::new([0u8; KEY_LEN * 2]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut okm[..]);

    let mut wrap_key = Zeroizing::new([0u8; KEY_LEN]);
    let mut tag_key = Zeroizing::new([0u8; KEY_LEN]);
    wrap_key.copy_from_slice(&okm[..KEY_LEN]);
    tag_key.copy_from_slice(&okm[KEY_LEN..]);
    (wrap_key, tag_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = random_bytes::<KEY_LEN>();
        let (nonce, ct) = seal(&key, b"aad", b"blocked on auth tests").unwrap();
        let pt = open(&key, &nonce, b"aad", &ct).unwrap();
        assert_eq!(pt.as_slice(), b"blocked on auth tests");
    }

    #[test]
    fn test_open_rejects_bit_flip_and_wrong_aad() {
        let key = random_bytes::<KEY_LEN>();
        let (nonce, mut ct) = seal(&key, b"aad", b"payload").unwrap();
        assert!(open(&key, &nonce, b"other", &ct).is_none());
        ct[0] ^= 0x01;
        assert!(open(&key, &nonce, b"aad", &ct).is_none());
    }

    #[test]
    fn test_nonces_differ_per_seal() {
        let key = random_bytes::<KEY_LEN>();
        let (n1, _) = seal(&key, b"", b"same").unwrap();
        let (n2, _) = seal(&key, b"", b"same").unwrap();
        assert_ne!(n1, n2);
    }

    #[test]
    fn test_tag_is_length_framed() {
        let key = [7u8; KEY_LEN];
        let t1 = hmac_tag(&key, &[b"ab", b"c"]).unwrap();
        let t2 = hmac_tag(&key, &[b"a", b"bc"]).unwrap();
        assert_ne!(t1, t2);
        assert!(verify_tag(&key, &[b"ab", b"c"], &t1).unwrap());
        assert!(!verify_tag(&key, &[b"ab", b"c"], &t2).unwrap());
    }

    #[test]
    fn test_subkeys_are_separated() {
        let master = [3u8; KEY_LEN];
        let a = derive_subkey(&master, b"record-enc").unwrap();
        let b = derive_subkey(&master, b"record-mac").unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_password_keys_depend_on_salt() {
        let (w1, t1) = derive_password_keys("p", b"salt-one", 1_000);
        let (w2, _) = derive_password_keys("p", b"salt-two", 1_000);
        assert_ne!(*w1, *w2);
        assert_ne!(*w1, *t1);
    }
}

//! 레코드 봉인/개봉
//!
//! 마스터키에서 HKDF로 두 서브키를 파생:
//! - `record-enc`: XChaCha20-Poly1305 본문 암호화
//! - `record-mac`: 평문 다이제스트 (HMAC-SHA256)
//!
//! AAD에 생성 시각/레코드 ID를 묶어 행 간 바꿔치기를 막음

use zeroize::Zeroizing;

use crate::error::{InnerBoardError, Result};
use crate::models::RecordId;
use crate::secrets::crypto::{self, KEY_LEN};
use crate::secrets::MasterKey;

const ENC_INFO: &[u8] = b"innerboard:record-enc:v1";
const MAC_INFO: &[u8] = b"innerboard:record-mac:v1";
const RECORD_DOMAIN: &[u8] = b"innerboard:record:v1";
const ANALYSIS_DOMAIN: &[u8] = b"innerboard:analysis:v1";

/// 디스크에 쓰일 봉인 결과
#[derive(Debug, Clone)]
pub struct Sealed {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub digest: Vec<u8>,
}

/// 레코드 단위 암호화기 (서브키만 보관)
pub struct RecordCipher {
    enc_key: Zeroizing<[u8; KEY_LEN]>,
    mac_key: Zeroizing<[u8; KEY_LEN]>,
}

impl RecordCipher {
    pub fn new(master: &MasterKey) -> Result<Self> {
        Ok(Self {
            enc_key: crypto::derive_subkey(master.as_bytes(), ENC_INFO)?,
            mac_key: crypto::derive_subkey(master.as_bytes(), MAC_INFO)?,
        })
    }

    pub fn seal_record(&self, created_at: &str, plaintext: &[u8]) -> Result<Sealed> {
        self.seal(&[RECORD_DOMAIN, created_at.as_bytes()], plaintext)
    }

    pub fn open_record(&self, id: RecordId, created_at: &str, sealed: &Sealed) -> Result<Zeroizing<Vec<u8>>> {
        self.open(&[RECORD_DOMAIN, created_at.as_bytes()], sealed)
            .map_err(|reason| InnerBoardError::Tamper(format!("record {}: {}", id, reason)))
    }

    pub fn seal_analysis(
        &self,
        record_id: RecordId,
        model: &str,
        prompt_version: &str,
        payload: &[u8],
    ) -> Result<Sealed> {
        let id = record_id.to_be_bytes();
        self.seal(&[ANALYSIS_DOMAIN, &id, model.as_bytes(), prompt_version.as_bytes()], payload)
    }

    pub fn open_analysis(
        &self,
        record_id: RecordId,
        model: &str,
        prompt_version: &str,
        sealed: &Sealed,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let id = record_id.to_be_bytes();
        self.open(&[ANALYSIS_DOMAIN, &id, model.as_bytes(), prompt_version.as_bytes()], sealed)
            .map_err(|reason| InnerBoardError::Tamper(format!("analysis for record {}: {}", record_id, reason)))
    }

    fn seal(&self, context: &[&[u8]], plaintext: &[u8]) -> Result<Sealed> {
        let aad = frame(context);
        let (nonce, ciphertext) = crypto::seal(&self.enc_key, &aad, plaintext)?;
        let digest = self.digest(context, plaintext)?;
        Ok(Sealed {
            nonce: nonce.to_vec(),
            ciphertext,
            digest: digest.to_vec(),
        })
    }

    fn open(&self, context: &[&[u8]], sealed: &Sealed) -> std::result::Result<Zeroizing<Vec<u8>>, &'static str> {
        let aad = frame(context);
        let plaintext = crypto::open(&self.enc_key, &sealed.nonce, &aad, &sealed.ciphertext)
            .ok_or("authentication failed")?;

        let mut parts: Vec<&[u8]> = context.to_vec();
        parts.push(plaintext.as_slice());
        match crypto::verify_tag(&self.mac_key[..], &parts, &sealed.digest) {
            Ok(true) => Ok(plaintext),
            _ => Err("digest mismatch"),
        }
    }

    fn digest(&self, context: &[&[u8]], plaintext: &[u8]) -> Result<[u8; crypto::TAG_LEN]> {
        let mut parts: Vec<&[u8]> = context.to_vec();
        parts.push(plaintext);
        crypto::hmac_tag(&self.mac_key[..], &parts)
    }
}

/// AAD 직렬화: 길이 prefix로 필드 경계 고정
fn frame(context: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for part in context {
        out.extend_from_slice(&(part.len() as u32).to_be_bytes());
        out.extend_from_slice(part);
    }
    out
}

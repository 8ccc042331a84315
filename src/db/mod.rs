//! Database Module
//!
//! 암호화된 SQLite Vault 관리
//!
//! - 모든 레코드/분석 결과는 봉인된 상태로만 디스크에 기록
//! - 핸들 상태: Closed → Open → Closed (닫힌 뒤에는 모든 연산이 `VaultClosed`)
//! - 쓰기는 Mutex로 직렬화, 파일은 WAL 모드 (단일 writer / 다중 reader)

pub mod cipher;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use zeroize::Zeroizing;

use crate::error::{InnerBoardError, Result};
use crate::models::{AnalysisMeta, RecordId, RecordPreview, StoredAnalysis, VaultCounts};
use crate::secrets::MasterKey;
use crate::utils::{ensure_parent_dir, format_preview, PREVIEW_MAX_CHARS};

use cipher::{RecordCipher, Sealed};

const META_KEY_CHECK: &str = "key_check";
const META_SCHEMA_VERSION: &str = "schema_version";

/// 열린 Vault의 내부 상태
struct OpenVault {
    conn: Connection,
    cipher: RecordCipher,
}

/// Vault 핸들
pub struct VaultHandle {
    path: PathBuf,
    state: Mutex<Option<OpenVault>>,
}

impl VaultHandle {
    /// Vault 열기 (없으면 생성)
    ///
    /// 처음 여는 파일에는 마스터키 확인값을 기록하고,
    /// 기존 파일이면 확인값이 일치해야 함 (불일치 시 `Tamper`).
    pub fn open(path: &Path, master: &MasterKey) -> Result<Self> {
        ensure_parent_dir(path)?;
        let conn = Connection::open(path)?;
        conn.execute_batch(schema::CONNECTION_PRAGMAS)?;
        conn.execute_batch(schema::CREATE_SCHEMA)?;
        restrict_permissions(path)?;
        bind_master_key(&conn, master)?;

        let cipher = RecordCipher::new(master)?;
        tracing::info!(path = %path.display(), "vault opened");

        Ok(Self {
            path: path.to_path_buf(),
            state: Mutex::new(Some(OpenVault { conn, cipher })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().map(|state| state.is_some()).unwrap_or(false)
    }

    /// Vault 닫기. 이미 닫혀 있으면 `VaultClosed`
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        let vault = state.take().ok_or(InnerBoardError::VaultClosed)?;
        checkpoint(&vault.conn)?;
        vault
            .conn
            .close()
            .map_err(|(_, e)| InnerBoardError::Database(e))?;
        tracing::info!(path = %self.path.display(), "vault closed");
        Ok(())
    }

    fn with_vault<T>(&self, f: impl FnOnce(&OpenVault) -> Result<T>) -> Result<T> {
        let state = self.state.lock()?;
        let vault = state.as_ref().ok_or(InnerBoardError::VaultClosed)?;
        f(vault)
    }

    /// 레코드 저장 (본문 + nonce + 다이제스트를 한 트랜잭션으로)
    pub fn put(&self, plaintext: &[u8]) -> Result<RecordId> {
        self.with_vault(|vault| {
            let tx = vault.conn.unchecked_transaction()?;
            let id = insert_record(&tx, &vault.cipher, plaintext)?;
            tx.commit()?;
            tracing::debug!(record_id = id, size = plaintext.len(), "record stored");
            Ok(id)
        })
    }

    /// 레코드와 분석 결과를 한 트랜잭션으로 저장
    pub fn put_with_analysis(&self, plaintext: &[u8], meta: &AnalysisMeta, payload: &[u8]) -> Result<RecordId> {
        self.with_vault(|vault| {
            let tx = vault.conn.unchecked_transaction()?;
            let id = insert_record(&tx, &vault.cipher, plaintext)?;
            insert_analysis(&tx, &vault.cipher, id, meta, payload)?;
            tx.commit()?;
            tracing::debug!(record_id = id, size = plaintext.len(), model = %meta.model, "record stored with analysis");
            Ok(id)
        })
    }

    /// 레코드 복호화
    ///
    /// AEAD 태그 검증 후 다이제스트를 한 번 더 검증. 어느 쪽이든 실패하면 `Tamper`.
    pub fn get(&self, id: RecordId) -> Result<Zeroizing<Vec<u8>>> {
        self.get_entry(id).map(|(_, plaintext)| plaintext)
    }

    /// 생성 시각과 함께 복호화
    pub fn get_entry(&self, id: RecordId) -> Result<(DateTime<Utc>, Zeroizing<Vec<u8>>)> {
        self.with_vault(|vault| {
            let (created_at, sealed) = read_sealed_record(&vault.conn, id)?;
            let plaintext = vault.cipher.open_record(id, &created_at, &sealed)?;
            Ok((parse_timestamp(id, &created_at)?, plaintext))
        })
    }

    /// 레코드에 연결된 분석 결과 (없으면 `None`)
    pub fn get_analysis(&self, id: RecordId) -> Result<Option<StoredAnalysis>> {
        self.with_vault(|vault| {
            let row = vault
                .conn
                .query_row(
                    "SELECT model, prompt_version, created_at, nonce, ciphertext, digest
                     FROM analyses WHERE record_id = ?1",
                    [id],
                    |row| {
                        Ok((
                            AnalysisMeta {
                                model: row.get(0)?,
                                prompt_version: row.get(1)?,
                            },
                            row.get::<_, String>(2)?,
                            Sealed {
                                nonce: row.get(3)?,
                                ciphertext: row.get(4)?,
                                digest: row.get(5)?,
                            },
                        ))
                    },
                )
                .optional()?;

            let Some((meta, created_at, sealed)) = row else {
                return Ok(None);
            };
            let payload = vault
                .cipher
                .open_analysis(id, &meta.model, &meta.prompt_version, &sealed)?;
            Ok(Some(StoredAnalysis {
                created_at: parse_timestamp(id, &created_at)?,
                meta,
                payload: payload.to_vec(),
            }))
        })
    }

    /// 미리보기 목록 (최신순)
    ///
    /// 행 단위로 복호화하고 미리보기만 남긴 뒤 평문은 즉시 지움
    pub fn list(&self, limit: usize, offset: usize) -> Result<Vec<RecordPreview>> {
        self.with_vault(|vault| {
            let mut stmt = vault.conn.prepare(
                "SELECT r.id, r.created_at, r.nonce, r.ciphertext, r.digest, a.record_id IS NOT NULL
                 FROM records r LEFT JOIN analyses a ON a.record_id = r.id
                 ORDER BY r.id DESC LIMIT ?1 OFFSET ?2",
            )?;
            let iter = stmt.query_map([to_sql_int(limit), to_sql_int(offset)], |row| {
                Ok((
                    row.get::<_, RecordId>(0)?,
                    row.get::<_, String>(1)?,
                    Sealed {
                        nonce: row.get(2)?,
                        ciphertext: row.get(3)?,
                        digest: row.get(4)?,
                    },
                    row.get::<_, bool>(5)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in iter {
                let (id, created_at, sealed, has_analysis) = row?;
                let plaintext = vault.cipher.open_record(id, &created_at, &sealed)?;
                out.push(RecordPreview {
                    id,
                    preview: format_preview(&String::from_utf8_lossy(&plaintext), PREVIEW_MAX_CHARS),
                    created_at: parse_timestamp(id, &created_at)?,
                    has_analysis,
                });
            }
            Ok(out)
        })
    }

    /// 레코드 삭제 (분석 결과 포함). 삭제 전 저장 위치를 덮어씀
    pub fn delete(&self, id: RecordId) -> Result<()> {
        self.take(id).map(|_| ())
    }

    /// 복호화한 원문을 돌려주며 삭제
    ///
    /// 조회와 삭제가 같은 잠금/트랜잭션 안에서 일어남. 무결성 검증에 실패한 레코드도 삭제하며 이때 원문은 `None`
    pub fn take(&self, id: RecordId) -> Result<Option<Zeroizing<Vec<u8>>>> {
        self.with_vault(|vault| {
            let tx = vault.conn.unchecked_transaction()?;
            let (created_at, sealed) = read_sealed_record(&tx, id)?;
            let plaintext = match vault.cipher.open_record(id, &created_at, &sealed) {
                Ok(plaintext) => Some(plaintext),
                Err(InnerBoardError::Tamper(reason)) => {
                    tracing::warn!(record_id = id, %reason, "deleting record that failed integrity check");
                    None
                }
                Err(e) => return Err(e),
            };

            scrub(&tx, Some(id))?;
            let removed = tx.execute("DELETE FROM records WHERE id = ?1", [id])?;
            if removed == 0 {
                return Err(InnerBoardError::NotFound(id));
            }
            tx.commit()?;
            checkpoint(&vault.conn)?;
            tracing::info!(record_id = id, "record deleted");
            Ok(plaintext)
        })
    }

    /// 전체 삭제. 삭제된 레코드 수 반환
    pub fn clear(&self) -> Result<usize> {
        self.with_vault(|vault| {
            let tx = vault.conn.unchecked_transaction()?;
            scrub(&tx, None)?;
            tx.execute("DELETE FROM analyses", [])?;
            let removed = tx.execute("DELETE FROM records", [])?;
            tx.commit()?;
            checkpoint(&vault.conn)?;
            tracing::info!(removed, "vault cleared");
            Ok(removed)
        })
    }

    pub fn count(&self) -> Result<VaultCounts> {
        self.with_vault(|vault| read_counts(&vault.conn))
    }
}

/// 키 없이 통계만 조회 (읽기 전용 연결). 파일이 없으면 `None`
pub fn peek_counts(path: &Path) -> Result<Option<VaultCounts>> {
    if !path.exists() {
        return Ok(None);
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let has_records: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'records')",
        [],
        |row| row.get(0),
    )?;
    if !has_records {
        return Ok(Some(VaultCounts::default()));
    }
    read_counts(&conn).map(Some)
}

fn read_counts(conn: &Connection) -> Result<VaultCounts> {
    let (records, analyses): (i64, i64) = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM records), (SELECT COUNT(*) FROM analyses)",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(VaultCounts {
        records: records.max(0) as u64,
        analyses: analyses.max(0) as u64,
    })
}

fn bind_master_key(conn: &Connection, master: &MasterKey) -> Result<()> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT value FROM vault_meta WHERE key = ?1",
            [META_KEY_CHECK],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(check) => {
            if !master.matches_check_value(&check)? {
                return Err(InnerBoardError::Tamper(
                    "vault was sealed with a different master key".to_string(),
                ));
            }
        }
        None => {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO vault_meta (key, value) VALUES (?1, ?2)",
                [META_KEY_CHECK, master.check_value()?.as_str()],
            )?;
            tx.execute(
                "INSERT OR REPLACE INTO vault_meta (key, value) VALUES (?1, ?2)",
                [META_SCHEMA_VERSION, schema::SCHEMA_VERSION],
            )?;
            tx.commit()?;
        }
    }
    Ok(())
}

fn insert_record(conn: &Connection, cipher: &RecordCipher, plaintext: &[u8]) -> Result<RecordId> {
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let sealed = cipher.seal_record(&created_at, plaintext)?;
    conn.execute(
        "INSERT INTO records (created_at, nonce, ciphertext, digest) VALUES (?1, ?2, ?3, ?4)",
        (&created_at, &sealed.nonce, &sealed.ciphertext, &sealed.digest),
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_analysis(
    conn: &Connection,
    cipher: &RecordCipher,
    record_id: RecordId,
    meta: &AnalysisMeta,
    payload: &[u8],
) -> Result<()> {
    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let sealed = cipher.seal_analysis(record_id, &meta.model, &meta.prompt_version, payload)?;
    conn.execute(
        "INSERT INTO analyses (record_id, model, prompt_version, created_at, nonce, ciphertext, digest)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        (
            record_id,
            &meta.model,
            &meta.prompt_version,
            &created_at,
            &sealed.nonce,
            &sealed.ciphertext,
            &sealed.digest,
        ),
    )?;
    Ok(())
}

fn read_sealed_record(conn: &Connection, id: RecordId) -> Result<(String, Sealed)> {
    conn.query_row(
        "SELECT created_at, nonce, ciphertext, digest FROM records WHERE id = ?1",
        [id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                Sealed {
                    nonce: row.get(1)?,
                    ciphertext: row.get(2)?,
                    digest: row.get(3)?,
                },
            ))
        },
    )
    .optional()?
    .ok_or(InnerBoardError::NotFound(id))
}

/// 삭제 전 덮어쓰기
///
/// 본문/다이제스트는 0으로, nonce는 UNIQUE 제약 때문에 랜덤 값으로 채움.
/// 이후 DELETE 시 `secure_delete`가 해제된 셀을 한 번 더 지움.
fn scrub(conn: &Connection, id: Option<RecordId>) -> Result<()> {
    const SCRUB_ANALYSES: &str = "UPDATE analyses SET
            ciphertext = zeroblob(length(ciphertext)),
            digest = zeroblob(length(digest)),
            nonce = randomblob(length(nonce))";
    const SCRUB_RECORDS: &str = "UPDATE records SET
            ciphertext = zeroblob(length(ciphertext)),
            digest = zeroblob(length(digest)),
            nonce = randomblob(length(nonce))";

    match id {
        Some(id) => {
            conn.execute(&format!("{} WHERE record_id = ?1", SCRUB_ANALYSES), [id])?;
            conn.execute(&format!("{} WHERE id = ?1", SCRUB_RECORDS), [id])?;
        }
        None => {
            conn.execute(SCRUB_ANALYSES, [])?;
            conn.execute(SCRUB_RECORDS, [])?;
        }
    }
    Ok(())
}

/// WAL에 남은 이전 페이지를 본 파일로 반영하고 WAL을 비움
fn checkpoint(conn: &Connection) -> Result<()> {
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
    Ok(())
}

fn parse_timestamp(id: RecordId, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| InnerBoardError::Tamper(format!("record {}: invalid timestamp", id)))
}

fn to_sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

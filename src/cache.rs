//! Response Cache
//!
//! 같은 입력에 대한 모델 재호출을 피하기 위한 TTL 캐시
//!
//! - 정책: bounded FIFO + TTL (LRU 아님). 용량 초과 시 가장 먼저 삽입된 항목부터 제거
//! - 조회(hit)는 만료 시간을 연장하지 않음
//! - 덮어쓰기는 새 삽입으로 취급 (FIFO 순서에서 맨 뒤로 이동)

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::AppConfig;

/// 캐시 키 생성: (모델, 프롬프트 버전, 종류, 입력 텍스트)의 SHA-256
pub fn fingerprint(model: &str, prompt_version: &str, kind: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [model, prompt_version, kind, text] {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub enabled: bool,
    pub size: usize,
    pub capacity: usize,
    pub ttl_seconds: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct CacheEntry<V> {
    value: V,
    /// `None`이면 만료 없음 (TTL이 Instant 범위를 넘는 경우)
    expires_at: Option<Instant>,
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// 삽입 순서 (key, seq). seq가 현재 항목과 다르면 이미 덮어쓴 흔적
    order: VecDeque<(String, u64)>,
    next_seq: u64,
    hits: u64,
    misses: u64,
}

impl<V> CacheInner<V> {
    fn remove_oldest(&mut self) -> bool {
        while let Some((key, seq)) = self.order.pop_front() {
            let current = self.entries.get(&key).map(|e| e.seq);
            if current == Some(seq) {
                self.entries.remove(&key);
                return true;
            }
        }
        false
    }

    fn compact_order(&mut self) {
        let entries = &self.entries;
        self.order
            .retain(|(key, seq)| entries.get(key).map(|e| e.seq) == Some(*seq));
    }
}

pub struct ResponseCache<V> {
    inner: Mutex<CacheInner<V>>,
    enabled: bool,
    capacity: usize,
    default_ttl: Duration,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self::with_enabled(true, capacity, default_ttl)
    }

    pub fn with_enabled(enabled: bool, capacity: usize, default_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
                hits: 0,
                misses: 0,
            }),
            enabled: enabled && capacity > 0,
            capacity,
            default_ttl,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::with_enabled(config.enable_caching, config.cache_capacity, config.cache_ttl)
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// 만료되지 않은 값만 반환. 만료된 항목은 이 시점에 제거
    pub fn get(&self, key: &str) -> Option<V> {
        if !self.enabled {
            return None;
        }
        let mut inner = self.lock();
        let now = Instant::now();

        let lookup = inner
            .entries
            .get(key)
            .map(|entry| entry.is_fresh(now).then(|| entry.value.clone()));
        let fresh = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        };

        match fresh {
            Some(value) => {
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// 삽입 또는 덮어쓰기. 용량이 찼으면 가장 오래 전에 삽입된 항목을 먼저 제거
    pub fn put(&self, key: &str, value: V, ttl: Duration) {
        if !self.enabled {
            return;
        }
        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;

        if inner.entries.remove(key).is_none() {
            while inner.entries.len() >= self.capacity {
                if !inner.remove_oldest() {
                    break;
                }
            }
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now().checked_add(ttl),
                seq,
            },
        );
        inner.order.push_back((key.to_string(), seq));

        if inner.order.len() > self.capacity.saturating_mul(2) {
            inner.compact_order();
        }
    }

    /// 기본 TTL로 삽입
    pub fn insert(&self, key: &str, value: V) {
        self.put(key, value, self.default_ttl);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.compact_order();
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        tracing::debug!("response cache cleared");
    }

    /// 만료 항목 일괄 제거. 제거된 수 반환
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_fresh(now));
        let purged = before - inner.entries.len();
        if purged > 0 {
            inner.compact_order();
            tracing::debug!(purged, "expired cache entries purged");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let total = inner.hits + inner.misses;
        CacheStats {
            enabled: self.enabled,
            size: inner.entries.len(),
            capacity: self.capacity,
            ttl_seconds: self.default_ttl.as_secs(),
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                inner.hits as f64 / total as f64
            },
        }
    }

    // poison 상태여도 계속 사용
    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner<V>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

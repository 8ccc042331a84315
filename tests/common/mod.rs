//! 통합 테스트 공용 도구: 소켓 없이 Ollama 응답을 흉내내는 Transport

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use innerboard_lib::config::AppConfig;
use innerboard_lib::guard::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use innerboard_lib::guard::NetworkGuard;
use innerboard_lib::AppContext;
use serde_json::json;
use tempfile::TempDir;

pub const INSIGHT: &str = r#"{"key_points":["auth test suite fails intermittently"],"blockers":[{"description":"blocked on auth tests","severity":"high"}],"resources_needed":["auth service runbook"],"confidence_delta":-0.2}"#;
pub const PREP: &str = r#"{"team_update":["auth suite failures narrowed to token refresh","deploy scripts reviewed with a teammate"],"manager_update":["onboarding on schedule","auth test flakiness is the main risk this week"],"recommendations":["book a pairing slot with the auth owner","write up the token refresh flow"]}"#;
pub const ADVICE: &str = r#"{"steps":["ask the auth owner for a pairing slot","read the token refresh docs","rerun the suite with verbose logs"],"checklist":["pairing booked","docs read"],"urgency":"high"}"#;

/// `/api/chat`, `/api/tags`만 응답하는 가짜 모델 서버
///
/// system 프롬프트 문구로 인사이트/미팅 준비/조언 응답을 고름
pub struct FakeOllama {
    pub calls: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
    pub latency: Duration,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
}

impl FakeOllama {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            latency,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reply_for(request: &HttpRequest) -> serde_json::Value {
        if request.url.path().ends_with("/api/tags") {
            return json!({"models": [
                {"name": "gpt-oss:20b", "modified_at": "2025-01-01T00:00:00Z", "size": 13_000_000_000u64},
                {"name": "llama3.1:8b"}
            ]});
        }

        let system = request
            .body
            .as_ref()
            .and_then(|b| b["messages"][0]["content"].as_str())
            .unwrap_or_default();
        let content = if system.contains("Extract a structured insight") {
            INSIGHT
        } else if system.contains("Compose meeting preparation") {
            PREP
        } else {
            ADVICE
        };
        json!({"message": {"role": "assistant", "content": content}, "done": true})
    }
}

#[async_trait]
impl Transport for FakeOllama {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(request.url.to_string());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(HttpResponse {
            status: 200,
            body: Self::reply_for(&request).to_string(),
        })
    }
}

/// 빠른 KDF, 짧은 backoff의 테스트 설정
pub fn test_config(dir: &TempDir) -> AppConfig {
    let mut config = AppConfig::with_data_dir(dir.path()).unwrap();
    config.kdf_iterations = 1_000;
    config.allow_weak_kdf = true;
    config.retry_backoff = Duration::from_millis(1);
    config.transport_retries = 1;
    config
}

/// 독립 가드 + 가짜 모델로 컨텍스트 생성
pub fn context(config: AppConfig, model: Arc<FakeOllama>) -> AppContext {
    AppContext::with_transport(config, Arc::new(NetworkGuard::new()), model).unwrap()
}

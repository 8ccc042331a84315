//! Local model client
//!
//! 로컬 Ollama 엔드포인트에 대한 풀링된 클라이언트
//!
//! - 동시 요청 수는 Semaphore로 제한 (초과 호출자는 대기, 대기 시간 초과 시 `ModelUnavailable`)
//! - 일시 장애는 지수 백오프 + jitter로 제한된 횟수만 재시도
//! - 정책 위반(`TransportError::Policy`)은 재시도 없이 즉시 `NetworkPolicyViolation`

pub mod types;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;
use url::Url;

use crate::config::AppConfig;
use crate::error::{InnerBoardError, Result};
use crate::guard::transport::{HttpRequest, Transport, TransportError};

pub use types::{ChatMessage, ModelInfo, Role};
use types::{ChatOptions, ChatRequest, ChatResponse, ListModelsResponse};

/// 백오프 상한
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 모델 호출 설정
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub base_url: Url,
    pub model: String,
    pub request_timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub pool_size: usize,
    pub transport_retries: u32,
    pub retry_backoff: Duration,
}

impl ModelSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            base_url: config.ollama_host.clone(),
            model: config.model.clone(),
            request_timeout: config.request_timeout,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            pool_size: config.pool_size.max(1),
            transport_retries: config.transport_retries,
            retry_backoff: config.retry_backoff,
        }
    }
}

/// 동시 실행 중인 요청 수 추적 (permit 보유 구간)
struct InFlight<'a> {
    current: &'a AtomicUsize,
}

impl<'a> InFlight<'a> {
    fn enter(current: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self { current }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct ModelClient {
    transport: Arc<dyn Transport>,
    settings: ModelSettings,
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ModelClient {
    pub fn new(transport: Arc<dyn Transport>, settings: ModelSettings) -> Self {
        let permits = Arc::new(Semaphore::new(settings.pool_size.max(1)));
        Self {
            transport,
            settings,
            permits,
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// 지금까지 관측된 최대 동시 요청 수
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// 채팅 완료 요청. 모델 응답 본문(content)만 반환
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let url = self.endpoint("api/chat")?;
        let body = serde_json::to_value(ChatRequest {
            model: &self.settings.model,
            messages,
            stream: false,
            format: "json",
            options: ChatOptions {
                temperature: self.settings.temperature,
                top_p: self.settings.top_p,
                num_predict: self.settings.max_tokens,
            },
        })?;

        let raw = self
            .execute(|| HttpRequest::post_json(url.clone(), body.clone(), self.settings.request_timeout))
            .await?;
        let response: ChatResponse = serde_json::from_str(&raw)
            .map_err(|e| InnerBoardError::ModelUnavailable(format!("Malformed chat envelope: {}", e)))?;
        Ok(response.message.content)
    }

    /// 설치된 모델 목록 (`GET /api/tags`)
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("api/tags")?;
        let raw = self
            .execute(|| HttpRequest::get(url.clone(), self.settings.request_timeout))
            .await?;
        let list: ListModelsResponse = serde_json::from_str(&raw)
            .map_err(|e| InnerBoardError::ModelUnavailable(format!("Failed to parse models list: {}", e)))?;
        Ok(list.models)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.settings
            .base_url
            .join(path)
            .map_err(|e| InnerBoardError::Config(format!("Invalid model endpoint: {}", e)))
    }

    /// pool permit 획득 후 재시도 루프 실행
    async fn execute(&self, make_request: impl Fn() -> HttpRequest) -> Result<String> {
        let _permit = tokio::time::timeout(self.settings.request_timeout, self.permits.acquire())
            .await
            .map_err(|_| InnerBoardError::ModelUnavailable("Model pool saturated; timed out waiting for a slot".to_string()))?
            .map_err(|_| InnerBoardError::ModelUnavailable("Model pool closed".to_string()))?;
        let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);

        let max_attempts = self.settings.transport_retries + 1;
        let mut attempt: u32 = 0;
        loop {
            let request = make_request();
            let outcome = match tokio::time::timeout(request.timeout, self.transport.send(request)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(TransportError::Timeout),
            };

            match outcome {
                Ok(response) => return Ok(response.body),
                Err(TransportError::Policy(reason)) => {
                    tracing::error!(%reason, "model request blocked by network guard");
                    return Err(InnerBoardError::NetworkPolicyViolation(reason));
                }
                Err(e) if attempt + 1 < max_attempts => {
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "model request failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(attempts = attempt + 1, error = %e, "model request failed");
                    return Err(InnerBoardError::ModelUnavailable(format!(
                        "Request failed after {} attempts: {}",
                        attempt + 1,
                        e
                    )));
                }
            }
        }
    }
}

/// 지수 백오프 + jitter: base, 2*base, 4*base ... (최대 30초)
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
    let jitter_ms = if base_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..=base_ms / 2)
    };
    Duration::from_millis(exp_ms.saturating_add(jitter_ms)).min(MAX_BACKOFF)
}

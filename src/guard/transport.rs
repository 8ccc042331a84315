//! 주입 가능한 HTTP Transport
//!
//! 모델 클라이언트는 `Transport` trait만 알고, 실제 소켓 사용 여부는 구현체가 결정합니다.
//! 테스트는 소켓 없이 스크립트된 구현체로 정책/재시도를 검증합니다.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use serde_json::Value;
use url::Url;

use crate::error::{InnerBoardError, Result};
use crate::guard::{loopback_socket_addrs, NetworkGuard, PolicyDenied};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: Url, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            body: None,
            timeout,
        }
    }

    pub fn post_json(url: Url, body: Value, timeout: Duration) -> Self {
        Self {
            method: HttpMethod::Post,
            url,
            body: Some(body),
            timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Transport 계층 에러
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("{0}")]
    Policy(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

impl TransportError {
    /// 정책 위반은 재시도 대상이 아님
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Policy(_))
    }
}

impl From<PolicyDenied> for TransportError {
    fn from(denied: PolicyDenied) -> Self {
        TransportError::Policy(denied.to_string())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// 모든 요청을 가드 정책으로 먼저 검사하는 래퍼
pub struct GuardedTransport {
    guard: Arc<NetworkGuard>,
    inner: Arc<dyn Transport>,
}

impl GuardedTransport {
    pub fn new(guard: Arc<NetworkGuard>, inner: Arc<dyn Transport>) -> Self {
        Self { guard, inner }
    }

    pub fn guard(&self) -> &Arc<NetworkGuard> {
        &self.guard
    }
}

#[async_trait]
impl Transport for GuardedTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        self.guard.check_url(&request.url)?;
        self.inner.send(request).await
    }
}

/// loopback 이름만 해석하는 DNS resolver
///
/// 가드가 무장되지 않았거나 외부 이름이면 해석 자체를 거부
struct LoopbackResolver {
    guard: Arc<NetworkGuard>,
}

impl Resolve for LoopbackResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let verdict = self.guard.check_resolution(name.as_str());
        Box::pin(async move {
            match verdict {
                Ok(ips) => {
                    let addrs: Addrs = Box::new(loopback_socket_addrs(ips).into_iter());
                    Ok(addrs)
                }
                Err(denied) => Err(Box::new(denied) as Box<dyn StdError + Send + Sync>),
            }
        })
    }
}

/// reqwest 기반 실제 Transport
///
/// - 프록시 비활성화 (환경 변수 프록시로 우회 방지)
/// - 리다이렉트 비활성화 (허용 엔드포인트에서 외부로 튕기는 것 방지)
/// - DNS는 `LoopbackResolver`만 사용
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(guard: Arc<NetworkGuard>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .redirect(reqwest::redirect::Policy::none())
            .dns_resolver(Arc::new(LoopbackResolver { guard }))
            .build()
            .map_err(|e| InnerBoardError::GuardFault(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let builder = match request.method {
            HttpMethod::Get => self.client.get(request.url.clone()),
            HttpMethod::Post => self.client.post(request.url.clone()),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let response = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;
        if !(200..300).contains(&status) {
            return Err(TransportError::Http { status, body });
        }
        Ok(HttpResponse { status, body })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    // resolver가 거부한 경우 source chain 어딘가에 PolicyDenied가 있음
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(denied) = cause.downcast_ref::<PolicyDenied>() {
            return TransportError::Policy(denied.to_string());
        }
        source = cause.source();
    }

    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Connect(err.without_url().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn send(&self, _request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(HttpResponse {
                status: 200,
                body: "{}".to_string(),
            })
        }
    }

    fn request(url: &str) -> HttpRequest {
        HttpRequest::get(Url::parse(url).unwrap(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_guarded_transport_blocks_before_inner_call() {
        let guard = Arc::new(NetworkGuard::new());
        let inner = Arc::new(CountingTransport {
            calls: AtomicUsize::new(0),
        });
        let transport = GuardedTransport::new(Arc::clone(&guard), inner.clone());

        // 무장 전에는 loopback도 차단
        let err = transport.send(request("http://127.0.0.1:11434/api/tags")).await.unwrap_err();
        assert!(matches!(err, TransportError::Policy(_)));

        let _armed = guard.arm("127.0.0.1", 11434).unwrap();
        assert!(transport.send(request("http://127.0.0.1:11434/api/tags")).await.is_ok());
        let err = transport.send(request("https://api.example.com/v1")).await.unwrap_err();
        assert!(!err.is_retryable());

        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolver_refuses_public_names() {
        let guard = Arc::new(NetworkGuard::new());
        let _armed = guard.arm("localhost", 11434).unwrap();
        let resolver = LoopbackResolver {
            guard: Arc::clone(&guard),
        };

        let name: Name = "example.com".parse().unwrap();
        assert!(resolver.resolve(name).await.is_err());

        let name: Name = "localhost".parse().unwrap();
        let addrs: Vec<_> = resolver.resolve(name).await.unwrap().collect();
        assert!(!addrs.is_empty());
        assert!(addrs.iter().all(|a| a.ip().is_loopback()));
    }
}

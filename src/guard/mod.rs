//! Network Guard
//!
//! AI 처리 중에는 지정된 로컬 엔드포인트(loopback + 허용 포트) 외의 네트워크 접근을 차단합니다.
//!
//! - 모든 외부 호출은 `transport::GuardedTransport`를 통과 (URL 검사)
//! - 실제 HTTP 클라이언트는 loopback만 해석하는 DNS resolver 사용 (우회 차단)
//! - 무장되지 않은 상태에서는 모든 요청을 거부 (fail closed)
//! - `arm()`은 RAII 핸들을 반환하고, 핸들이 drop될 때 반드시 해제됨

pub mod transport;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use url::Url;

use crate::error::{InnerBoardError, Result};

/// 프로세스 전역 가드 (프로세스 수명 동안 한 번 무장)
pub static NETWORK_GUARD: Lazy<Arc<NetworkGuard>> = Lazy::new(|| Arc::new(NetworkGuard::new()));

/// 정책 위반 사유
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("network policy violation: {0}")]
pub struct PolicyDenied(pub String);

/// 무장 시 허용되는 단일 목적지
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardPolicy {
    pub host: String,
    pub port: u16,
}

/// 정책 검증용 목적지 판정 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationCheck {
    pub target: String,
    pub expected_blocked: bool,
    pub blocked: bool,
}

/// 감사용 증빙
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardReceipt {
    pub armed: bool,
    pub policy: Option<GuardPolicy>,
    pub permitted: Vec<String>,
    pub checks: Vec<DestinationCheck>,
    pub violations: u64,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct NetworkGuard {
    policy: RwLock<Option<GuardPolicy>>,
    violations: AtomicU64,
}

/// 무장 상태 핸들. drop 시 해제
#[derive(Debug)]
pub struct ArmedGuard {
    guard: Arc<NetworkGuard>,
}

impl ArmedGuard {
    pub fn guard(&self) -> &Arc<NetworkGuard> {
        &self.guard
    }
}

impl Drop for ArmedGuard {
    fn drop(&mut self) {
        self.guard.disarm();
    }
}

impl NetworkGuard {
    /// 독립 인스턴스 (테스트 / 격리 실행용)
    pub fn new() -> Self {
        Self::default()
    }

    /// 가드 무장
    ///
    /// - 허용 호스트는 loopback이어야 함 (아니면 `NetworkPolicyViolation`)
    /// - 이미 무장된 상태면 `GuardFault` (재진입 불가)
    pub fn arm(self: &Arc<Self>, host: &str, port: u16) -> Result<ArmedGuard> {
        if !is_loopback_name(host) {
            return Err(InnerBoardError::NetworkPolicyViolation(format!(
                "refusing to arm for non-loopback host '{}'",
                host
            )));
        }

        let mut policy = self.policy.write()?;
        if let Some(current) = policy.as_ref() {
            return Err(InnerBoardError::GuardFault(format!(
                "guard already armed for {}:{}",
                current.host, current.port
            )));
        }
        *policy = Some(GuardPolicy {
            host: host.to_string(),
            port,
        });
        tracing::info!(host, port, "network guard armed");

        Ok(ArmedGuard {
            guard: Arc::clone(self),
        })
    }

    fn disarm(&self) {
        // poison 상태여도 해제는 반드시 수행
        let mut policy = match self.policy.write() {
            Ok(policy) => policy,
            Err(poisoned) => poisoned.into_inner(),
        };
        if policy.take().is_some() {
            tracing::info!("network guard disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.current_policy().is_some()
    }

    pub fn current_policy(&self) -> Option<GuardPolicy> {
        match self.policy.read() {
            Ok(policy) => policy.clone(),
            Err(_) => None,
        }
    }

    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }

    /// 요청 URL 검사
    pub fn check_url(&self, url: &Url) -> std::result::Result<(), PolicyDenied> {
        let host = url.host_str().unwrap_or_default();
        let port = url.port_or_known_default().unwrap_or(0);
        self.check_destination(host, port)
    }

    /// 목적지(host, port) 검사
    pub fn check_destination(&self, host: &str, port: u16) -> std::result::Result<(), PolicyDenied> {
        let verdict = self.evaluate(host, port);
        if let Err(denied) = &verdict {
            self.record_violation(denied);
        }
        verdict
    }

    fn evaluate(&self, host: &str, port: u16) -> std::result::Result<(), PolicyDenied> {
        match self.current_policy() {
            None => Err(PolicyDenied("guard is not armed; outbound traffic is blocked".to_string())),
            Some(_) if !is_loopback_name(host) => {
                Err(PolicyDenied(format!("destination host '{}' is not loopback", host)))
            }
            Some(policy) if policy.port != port => Err(PolicyDenied(format!(
                "destination port {} is not the permitted port {}",
                port, policy.port
            ))),
            Some(_) => Ok(()),
        }
    }

    /// DNS 해석 검사. loopback 이름만 허용하고 loopback 주소만 돌려줌
    pub fn check_resolution(&self, name: &str) -> std::result::Result<Vec<IpAddr>, PolicyDenied> {
        let denied = if !self.is_armed() {
            Some(PolicyDenied(format!("DNS lookup for '{}' while guard is not armed", name)))
        } else if !is_loopback_name(name) {
            Some(PolicyDenied(format!("DNS lookup for non-loopback name '{}'", name)))
        } else {
            None
        };
        if let Some(denied) = denied {
            self.record_violation(&denied);
            return Err(denied);
        }

        match name.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
            Ok(ip) => Ok(vec![ip]),
            Err(_) => Ok(vec![IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)]),
        }
    }

    fn record_violation(&self, denied: &PolicyDenied) {
        self.violations.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(reason = %denied.0, "blocked outbound network attempt");
    }

    /// 현재 정책을 알려진 목적지들로 검증하고 증빙을 반환
    ///
    /// 기대 결과와 다른 판정이 하나라도 있으면 `GuardFault`.
    /// 검증용 판정은 위반 카운터에 포함하지 않음.
    pub fn verify(&self) -> Result<GuardReceipt> {
        let policy = self.current_policy();

        let mut targets: Vec<(String, String, u16, bool)> = vec![
            ("8.8.8.8:53".into(), "8.8.8.8".into(), 53, true),
            ("1.1.1.1:443".into(), "1.1.1.1".into(), 443, true),
            ("[2001:4860:4860::8888]:443".into(), "2001:4860:4860::8888".into(), 443, true),
            ("example.com:80".into(), "example.com".into(), 80, true),
        ];
        let mut permitted = Vec::new();
        if let Some(policy) = &policy {
            let other_port = policy.port.wrapping_add(1).max(1);
            targets.push((
                format!("127.0.0.1:{}", other_port),
                "127.0.0.1".into(),
                other_port,
                true,
            ));
            targets.push((
                format!("{}:{}", policy.host, policy.port),
                policy.host.clone(),
                policy.port,
                false,
            ));
            permitted.push(format!("{}:{}", policy.host, policy.port));
        }

        let results: Vec<DestinationCheck> = targets
            .into_iter()
            .map(|(target, host, port, expected_blocked)| DestinationCheck {
                target,
                expected_blocked,
                blocked: self.evaluate(&host, port).is_err(),
            })
            .collect();

        if let Some(mismatch) = results.iter().find(|p| p.blocked != p.expected_blocked) {
            return Err(InnerBoardError::GuardFault(format!(
                "check {} expected blocked={} but got blocked={}",
                mismatch.target, mismatch.expected_blocked, mismatch.blocked
            )));
        }
        if policy != self.current_policy() {
            return Err(InnerBoardError::GuardFault(
                "guard state changed while verifying".to_string(),
            ));
        }

        Ok(GuardReceipt {
            armed: policy.is_some(),
            policy,
            permitted,
            checks: results,
            violations: self.violations(),
            checked_at: Utc::now(),
        })
    }
}

/// loopback 호스트 이름/주소 여부
pub fn is_loopback_name(host: &str) -> bool {
    let host = host.trim_matches(|c| c == '[' || c == ']');
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// resolver용: loopback 주소 목록을 포트와 묶음
pub(crate) fn loopback_socket_addrs(ips: Vec<IpAddr>) -> Vec<SocketAddr> {
    ips.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect()
}

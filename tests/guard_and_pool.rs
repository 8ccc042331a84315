//! 네트워크 가드 / 모델 풀 통합 테스트

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{context, test_config, FakeOllama};
use innerboard_lib::advice::EntryKind;
use innerboard_lib::commands::{status, vault};
use innerboard_lib::guard::transport::{GuardedTransport, Transport};
use innerboard_lib::guard::NetworkGuard;
use innerboard_lib::llm::{ChatMessage, ModelClient, ModelSettings};
use innerboard_lib::{AppContext, InnerBoardError};
use url::Url;

fn client_for(ctx: &AppContext, model: Arc<FakeOllama>, base_url: &str) -> ModelClient {
    let mut settings = ModelSettings::from_config(ctx.config());
    settings.base_url = Url::parse(base_url).unwrap();
    let transport: Arc<dyn Transport> = Arc::new(GuardedTransport::new(Arc::clone(ctx.guard()), model));
    ModelClient::new(transport, settings)
}

#[tokio::test]
async fn test_requests_off_the_permitted_destination_are_blocked() {
    let dir = tempfile::tempdir().unwrap();
    let model = FakeOllama::new();
    let ctx = context(test_config(&dir), model.clone());

    for target in ["http://127.0.0.1:8080", "http://example.com:11434", "http://10.0.0.5:11434"] {
        let client = client_for(&ctx, model.clone(), target);
        let err = client.chat(&[ChatMessage::user("hello")]).await.unwrap_err();
        assert!(
            matches!(err, InnerBoardError::NetworkPolicyViolation(_)),
            "{} should be blocked, got {:?}",
            target,
            err
        );
    }

    assert_eq!(model.calls(), 0);
    assert_eq!(ctx.guard().violations(), 3);
    assert_eq!(status::status(&ctx).unwrap().violations, 3);
}

#[test]
fn test_non_loopback_endpoint_is_rejected_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.ollama_host = Url::parse("http://192.168.1.20:11434").unwrap();

    let guard = Arc::new(NetworkGuard::new());
    let result = AppContext::with_transport(config, Arc::clone(&guard), FakeOllama::new());
    assert!(result.is_err());
    assert!(!guard.is_armed());
}

#[test]
fn test_guard_is_armed_for_context_lifetime() {
    let dir = tempfile::tempdir().unwrap();
    let guard = Arc::new(NetworkGuard::new());

    let ctx = AppContext::with_transport(test_config(&dir), Arc::clone(&guard), FakeOllama::new()).unwrap();
    assert!(guard.is_armed());

    let second = AppContext::with_transport(test_config(&dir), Arc::clone(&guard), FakeOllama::new());
    assert!(matches!(second, Err(InnerBoardError::GuardFault(_))));

    drop(ctx);
    assert!(!guard.is_armed());
}

#[test]
fn test_verify_guard_receipt() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(test_config(&dir), FakeOllama::new());

    let receipt = status::verify_guard(&ctx).unwrap();
    assert!(receipt.armed);
    assert_eq!(receipt.permitted, vec!["127.0.0.1:11434".to_string()]);
    assert!(receipt.checks.iter().all(|p| p.blocked == p.expected_blocked));
    assert_eq!(receipt.violations, 0);
}

#[tokio::test]
async fn test_batch_concurrency_is_bounded_by_pool() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.pool_size = 2;
    let model = FakeOllama::with_latency(Duration::from_millis(20));
    let ctx = context(config, model.clone());

    let texts: Vec<String> = (0..6).map(|i| format!("standup note {}", i)).collect();
    let results = ctx.orchestrator().analyze_batch(&texts, EntryKind::Reflection).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(model.calls(), 12);
    assert!(model.peak.load(std::sync::atomic::Ordering::SeqCst) <= 2);
    assert!(ctx.orchestrator().client().peak_concurrency() <= 2);
}

#[tokio::test]
async fn test_pool_timeout_surfaces_model_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.pool_size = 1;
    config.transport_retries = 0;
    config.request_timeout = Duration::from_millis(300);
    let model = FakeOllama::with_latency(Duration::from_millis(200));
    let ctx = context(config, model);
    vault::init(&ctx, None).unwrap();

    // 세 번째 요청은 slot을 300ms 안에 얻지 못함
    let (a, b, c) = tokio::join!(
        vault::add(&ctx, "first entry"),
        vault::add(&ctx, "second entry"),
        vault::add(&ctx, "third entry"),
    );
    let results = [a, b, c];

    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert!(!failures.is_empty());
    assert!(failures.iter().all(|e| e.code == "MODEL_UNAVAILABLE"));

    let persisted = results.iter().filter(|r| r.is_ok()).count();
    assert!(persisted >= 1);
    assert_eq!(vault::list(&ctx, None, None).unwrap().len(), persisted);
}

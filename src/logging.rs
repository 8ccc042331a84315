//! Logging
//!
//! `tracing` 구독자 초기화. `RUST_LOG`가 있으면 우선하고, 없으면 설정 레벨을 사용합니다.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogSettings;
use crate::error::Result;

/// 전역 tracing 구독자 설치
///
/// 이미 설치되어 있으면(테스트, 두 번째 호출) 아무것도 하지 않고 `Ok(false)`.
pub fn init_logging(settings: &LogSettings) -> Result<bool> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("innerboard_lib={0},{0}", settings.level)));

    let console_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file_layer = match &settings.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Arc::new(file))
                    .boxed(),
            )
        }
        None => None,
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(level = %settings.level, json = settings.json, "logging configured");
    }
    Ok(installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let settings = LogSettings {
            level: "debug".to_string(),
            file: Some(dir.path().join("logs").join("innerboard.log")),
            json: false,
        };

        // 다른 테스트가 먼저 설치했을 수도 있으므로 첫 결과는 단정하지 않음
        let _ = init_logging(&settings).unwrap();
        assert!(!init_logging(&settings).unwrap());
        assert!(dir.path().join("logs").join("innerboard.log").exists());
    }
}

//! Commands Module
//!
//! 표현 계층(CLI 등)에서 호출하는 명령 정의
//!
//! 전역 싱글톤 대신 `AppContext`를 명시적으로 넘겨 테스트마다 독립 인스턴스를 만들 수 있습니다.
//! 모든 명령은 `CommandResult<T>`를 반환하며, 에러 종류는 코드로 보존됩니다.

pub mod prep;
pub mod status;
pub mod vault;

use std::sync::{Arc, Mutex};

use crate::advice::Orchestrator;
use crate::config::AppConfig;
use crate::db::VaultHandle;
use crate::error::{InnerBoardError, Result};
use crate::guard::transport::{GuardedTransport, ReqwestTransport, Transport};
use crate::guard::{ArmedGuard, NetworkGuard, NETWORK_GUARD};
use crate::llm::{ModelClient, ModelSettings};
use crate::secrets::{KeyManager, MasterKey};

/// 잠금 해제된 세션 (프로세스 수명 동안 유지)
pub(crate) struct Session {
    pub(crate) master: MasterKey,
    pub(crate) vault: Arc<VaultHandle>,
}

/// 명령 실행 컨텍스트
pub struct AppContext {
    config: AppConfig,
    keys: KeyManager,
    orchestrator: Orchestrator,
    // drop 시 가드 해제
    armed: ArmedGuard,
    session: Mutex<Option<Session>>,
}

impl AppContext {
    /// 프로세스 전역 가드 + 실제 HTTP transport로 생성
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let guard = Arc::clone(&NETWORK_GUARD);
        let inner: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(Arc::clone(&guard))?);
        Self::with_transport(config, guard, inner)
    }

    /// 가드/transport 주입 (테스트는 독립 가드 + 스크립트 transport 사용)
    ///
    /// 설정 검증 후 가드를 모델 엔드포인트에 대해 무장하고, 모든 모델 호출이 가드를 거치도록 구성
    pub fn with_transport(config: AppConfig, guard: Arc<NetworkGuard>, inner: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let armed = guard.arm(&config.endpoint_host()?, config.endpoint_port()?)?;
        let transport: Arc<dyn Transport> = Arc::new(GuardedTransport::new(Arc::clone(&guard), inner));
        let client = Arc::new(ModelClient::new(transport, ModelSettings::from_config(&config)));
        let orchestrator = Orchestrator::from_config(&config, client);

        tracing::info!(
            model = %config.model,
            pool_size = config.pool_size,
            caching = config.enable_caching,
            "application context ready"
        );

        Ok(Self {
            keys: KeyManager::from_config(&config),
            config,
            orchestrator,
            armed,
            session: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn guard(&self) -> &Arc<NetworkGuard> {
        self.armed.guard()
    }

    pub fn is_unlocked(&self) -> bool {
        self.session.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// 열린 Vault (잠금 해제 전이면 `VaultClosed`)
    pub(crate) fn vault(&self) -> Result<Arc<VaultHandle>> {
        let session = self.session.lock()?;
        session
            .as_ref()
            .map(|s| Arc::clone(&s.vault))
            .ok_or(InnerBoardError::VaultClosed)
    }

    pub(crate) fn with_session<T>(&self, f: impl FnOnce(&Session) -> Result<T>) -> Result<T> {
        let session = self.session.lock()?;
        let session = session.as_ref().ok_or(InnerBoardError::VaultClosed)?;
        f(session)
    }

    pub(crate) fn install_session(&self, master: MasterKey) -> Result<()> {
        let vault = VaultHandle::open(&self.config.db_path, &master)?;
        let mut session = self.session.lock()?;
        if let Some(previous) = session.take() {
            // 이전 세션의 Vault는 닫고 교체
            if previous.vault.is_open() {
                previous.vault.close()?;
            }
        }
        *session = Some(Session {
            master,
            vault: Arc::new(vault),
        });
        Ok(())
    }

    pub(crate) fn take_session(&self) -> Result<Option<Session>> {
        Ok(self.session.lock()?.take())
    }
}

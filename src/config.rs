//! Configuration
//!
//! 환경 변수(.env 포함) 기반 설정. 코어가 소비하는 값만 다룹니다.
//! - CLI 인자 파싱은 이 crate 범위 밖이며, 그 계층이 `AppConfig`를 만들어 넘깁니다.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use url::{Host, Url};

use crate::error::{InnerBoardError, Result};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "gpt-oss:20b";
pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
/// 이보다 낮은 반복 횟수는 `allow_weak_kdf` 없이는 거부
pub const MIN_KDF_ITERATIONS: u32 = 10_000;
/// 캐시 TTL 상한 (30일)
pub const MAX_CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 3600);

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// 로깅 설정
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            json: false,
        }
    }
}

/// 애플리케이션 설정
#[derive(Clone)]
pub struct AppConfig {
    // 저장소
    pub db_path: PathBuf,
    pub key_path: PathBuf,
    pub password: Option<String>,
    pub kdf_iterations: u32,
    pub allow_weak_kdf: bool,

    // 모델 엔드포인트
    pub ollama_host: Url,
    pub model: String,
    pub request_timeout: Duration,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub pool_size: usize,
    pub transport_retries: u32,
    pub schema_repair_attempts: u32,
    pub retry_backoff: Duration,

    // 네트워크 가드
    pub allowed_ports: Vec<u16>,

    // 캐시
    pub enable_caching: bool,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,

    pub log: LogSettings,

    /// 설정에 반영된 `.env` 경로 (없으면 `None`)
    pub env_file: Option<PathBuf>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("db_path", &self.db_path)
            .field("key_path", &self.key_path)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("kdf_iterations", &self.kdf_iterations)
            .field("ollama_host", &self.ollama_host.as_str())
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .field("pool_size", &self.pool_size)
            .field("allowed_ports", &self.allowed_ports)
            .field("enable_caching", &self.enable_caching)
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_capacity", &self.cache_capacity)
            .field("log", &self.log)
            .field("env_file", &self.env_file)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    /// 기본 설정 (기본 엔드포인트 파싱 실패는 `Config` 에러로 전파)
    pub fn new() -> Result<Self> {
        let ollama_host = Url::parse(DEFAULT_ENDPOINT)
            .map_err(|e| config_err(format!("Default model endpoint is invalid: {}", e)))?;
        Ok(Self {
            db_path: PathBuf::from("vault.db"),
            key_path: PathBuf::from("vault.key"),
            password: None,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            allow_weak_kdf: false,
            ollama_host,
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(30),
            max_tokens: 512,
            temperature: 0.7,
            top_p: 0.95,
            pool_size: 5,
            transport_retries: 2,
            schema_repair_attempts: 1,
            retry_backoff: Duration::from_millis(500),
            allowed_ports: vec![11434],
            enable_caching: true,
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 1000,
            log: LogSettings::default(),
            env_file: None,
        })
    }

    /// 데이터 디렉토리 기준 경로로 기본 설정 생성
    pub fn with_data_dir(dir: &Path) -> Result<Self> {
        Ok(Self {
            db_path: dir.join("vault.db"),
            key_path: dir.join("vault.key"),
            ..Self::new()?
        })
    }

    /// 프로세스 환경 변수 + `.env`(CWD에서 상위로 탐색)로 설정 생성
    ///
    /// 비어 있지 않은 프로세스 환경 변수가 `.env` 값보다 우선
    pub fn from_env() -> Result<Self> {
        let env_file = std::env::current_dir()
            .ok()
            .and_then(|cwd| discover_env_file(&cwd))
            .and_then(|path| match read_env_file(&path) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read .env");
                    None
                }
            })
            .unwrap_or_default();

        let mut config = Self::from_vars(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .or_else(|| env_file.vars.get(key).cloned())
        })?;

        if !env_file.vars.is_empty() {
            tracing::info!(path = %env_file.path.display(), keys = env_file.vars.len(), "configuration merged from .env");
            config.env_file = Some(env_file.path);
        }
        Ok(config)
    }

    /// 임의의 키 조회 함수로 설정 생성 (테스트에서 프로세스 env를 건드리지 않기 위함)
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::new()?;

        if let Some(v) = get("INNERBOARD_DB_PATH") {
            config.db_path = PathBuf::from(v);
        }
        if let Some(v) = get("INNERBOARD_KEY_PATH") {
            config.key_path = PathBuf::from(v);
        }
        // 비밀번호는 공백도 의미가 있으므로 trim 하지 않음
        config.password = lookup("INNERBOARD_KEY_PASSWORD").filter(|v| !v.is_empty());
        if let Some(v) = get("KDF_ITERATIONS") {
            config.kdf_iterations = parse_num("KDF_ITERATIONS", &v)?;
        }
        if let Some(v) = get("OLLAMA_HOST") {
            config.ollama_host = Url::parse(&v)
                .map_err(|e| InnerBoardError::Config(format!("OLLAMA_HOST is not a valid URL: {}", e)))?;
        }
        if let Some(v) = get("OLLAMA_MODEL") {
            config.model = v;
        }
        if let Some(v) = get("OLLAMA_TIMEOUT") {
            config.request_timeout = Duration::from_secs(parse_num("OLLAMA_TIMEOUT", &v)?);
        }
        if let Some(v) = get("MAX_TOKENS") {
            config.max_tokens = parse_num("MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("MODEL_TEMPERATURE") {
            config.temperature = parse_num("MODEL_TEMPERATURE", &v)?;
        }
        if let Some(v) = get("MODEL_TOP_P") {
            config.top_p = parse_num("MODEL_TOP_P", &v)?;
        }
        if let Some(v) = get("MODEL_POOL_SIZE") {
            config.pool_size = parse_num("MODEL_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("TRANSPORT_RETRIES") {
            config.transport_retries = parse_num("TRANSPORT_RETRIES", &v)?;
        }
        if let Some(v) = get("SCHEMA_REPAIR_ATTEMPTS") {
            config.schema_repair_attempts = parse_num("SCHEMA_REPAIR_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("RETRY_BACKOFF_MS") {
            config.retry_backoff = Duration::from_millis(parse_num("RETRY_BACKOFF_MS", &v)?);
        }
        if let Some(v) = get("ALLOWED_PORTS") {
            config.allowed_ports = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(|p| parse_num("ALLOWED_PORTS", p))
                .collect::<Result<Vec<u16>>>()?;
        }
        if let Some(v) = get("ENABLE_CACHING") {
            config.enable_caching = parse_bool(&v);
        }
        if let Some(v) = get("CACHE_TTL_SECONDS") {
            config.cache_ttl = Duration::from_secs(parse_num("CACHE_TTL_SECONDS", &v)?);
        }
        if let Some(v) = get("CACHE_CAPACITY") {
            config.cache_capacity = parse_num("CACHE_CAPACITY", &v)?;
        }
        if let Some(v) = get("LOG_LEVEL") {
            config.log.level = v.to_lowercase();
        }
        config.log.file = get("LOG_FILE").map(PathBuf::from);
        if let Some(v) = get("LOG_JSON") {
            config.log.json = parse_bool(&v);
        }

        config.validate()?;
        Ok(config)
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(config_err(format!(
                "Temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(config_err(format!("Top-p must be between 0.0 and 1.0, got {}", self.top_p)));
        }
        if self.max_tokens == 0 {
            return Err(config_err("Max tokens must be positive".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(config_err("Request timeout must be positive".to_string()));
        }
        if self.pool_size == 0 {
            return Err(config_err("Model pool size must be positive".to_string()));
        }
        if self.cache_capacity == 0 {
            return Err(config_err("Cache capacity must be positive".to_string()));
        }
        if self.cache_ttl > MAX_CACHE_TTL {
            return Err(config_err(format!(
                "Cache TTL must be at most {} seconds, got {}",
                MAX_CACHE_TTL.as_secs(),
                self.cache_ttl.as_secs()
            )));
        }
        if self.kdf_iterations < MIN_KDF_ITERATIONS && !self.allow_weak_kdf {
            return Err(config_err(format!(
                "KDF iterations must be at least {}, got {}",
                MIN_KDF_ITERATIONS, self.kdf_iterations
            )));
        }
        if self.kdf_iterations == 0 {
            return Err(config_err("KDF iterations must be positive".to_string()));
        }
        if !VALID_LOG_LEVELS.contains(&self.log.level.as_str()) {
            return Err(config_err(format!(
                "Log level must be one of {:?}, got {}",
                VALID_LOG_LEVELS, self.log.level
            )));
        }

        let port = self.endpoint_port()?;
        if !is_loopback_host(&self.ollama_host) {
            return Err(config_err(format!(
                "Model endpoint must be a loopback address, got {}",
                self.ollama_host
            )));
        }
        if !self.allowed_ports.contains(&port) {
            return Err(config_err(format!(
                "Model endpoint port {} is not in the allowed ports {:?}",
                port, self.allowed_ports
            )));
        }
        Ok(())
    }

    /// 엔드포인트 포트 (명시되지 않으면 scheme 기본 포트)
    pub fn endpoint_port(&self) -> Result<u16> {
        self.ollama_host
            .port_or_known_default()
            .ok_or_else(|| config_err(format!("Model endpoint has no port: {}", self.ollama_host)))
    }

    /// 엔드포인트 호스트 문자열 (IPv6는 대괄호 없이)
    pub fn endpoint_host(&self) -> Result<String> {
        match self.ollama_host.host() {
            Some(Host::Domain(d)) => Ok(d.to_string()),
            Some(Host::Ipv4(ip)) => Ok(ip.to_string()),
            Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
            None => Err(config_err(format!("Model endpoint has no host: {}", self.ollama_host))),
        }
    }
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(d)) => d.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn config_err(message: String) -> InnerBoardError {
    InnerBoardError::Config(message)
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| config_err(format!("{} has an invalid value {:?}: {}", key, value, e)))
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// =====================================
// .env 로딩
// =====================================

/// `.env`를 찾을 때 올라갈 최대 상위 디렉토리 수
const ENV_SEARCH_DEPTH: usize = 6;

/// 읽어 들인 `.env` 파일 (프로세스 env는 건드리지 않고 조회 시 보조로만 사용)
#[derive(Debug, Clone, Default)]
struct EnvFile {
    path: PathBuf,
    vars: HashMap<String, String>,
}

/// `start`부터 상위로 올라가며 첫 번째 `.env` 경로 탐색
fn discover_env_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take(ENV_SEARCH_DEPTH + 1)
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())
}

/// `.env` 읽기. dotenvy가 거부하는 파일(markdown 섞인 경우 등)은 관대한 파서로 재시도
fn read_env_file(path: &Path) -> std::io::Result<EnvFile> {
    let strict = dotenvy::from_path_iter(path)
        .ok()
        .and_then(|iter| iter.collect::<std::result::Result<HashMap<_, _>, _>>().ok());

    let vars = match strict {
        Some(vars) => vars,
        None => {
            let vars = parse_env_lenient(&std::fs::read_to_string(path)?);
            tracing::debug!(path = %path.display(), keys = vars.len(), ".env parsed leniently");
            vars
        }
    };
    Ok(EnvFile {
        path: path.to_path_buf(),
        vars,
    })
}

/// `KEY=VALUE` 줄만 추림. 주석, 코드 펜스, 소문자 키, 빈 값은 무시
fn parse_env_lenient(text: &str) -> HashMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("```"))
        .filter_map(|line| line.strip_prefix("export ").unwrap_or(line).split_once('='))
        .map(|(key, value)| (key.trim(), unquote(value.trim())))
        .filter(|(key, value)| is_config_key(key) && !value.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn is_config_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|q| value.strip_prefix(*q).and_then(|v| v.strip_suffix(*q)))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::from_vars(|_| None).unwrap();
        assert_eq!(config.kdf_iterations, 100_000);
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.allowed_ports, vec![11434]);
        assert_eq!(config.endpoint_port().unwrap(), 11434);
        assert_eq!(config.endpoint_host().unwrap(), "127.0.0.1");
    }

    #[test]
    fn test_env_overrides() {
        let config = AppConfig::from_vars(lookup(&[
            ("OLLAMA_HOST", "http://localhost:8080"),
            ("ALLOWED_PORTS", "8080, 11434"),
            ("CACHE_TTL_SECONDS", "60"),
            ("MODEL_POOL_SIZE", "2"),
            ("LOG_LEVEL", "DEBUG"),
            ("INNERBOARD_KEY_PASSWORD", " spaced "),
        ]))
        .unwrap();

        assert_eq!(config.allowed_ports, vec![8080, 11434]);
        assert_eq!(config.cache_ttl, Duration::from_secs(60));
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.log.level, "debug");
        assert_eq!(config.password.as_deref(), Some(" spaced "));
    }

    #[test]
    fn test_rejects_non_loopback_endpoint() {
        let err = AppConfig::from_vars(lookup(&[("OLLAMA_HOST", "http://10.0.0.5:11434")])).unwrap_err();
        assert!(matches!(err, InnerBoardError::Config(_)));
    }

    #[test]
    fn test_rejects_endpoint_port_outside_allow_list() {
        let err = AppConfig::from_vars(lookup(&[("OLLAMA_HOST", "http://127.0.0.1:9999")])).unwrap_err();
        assert!(err.to_string().contains("9999"));
    }

    #[test]
    fn test_rejects_weak_kdf_unless_allowed() {
        let mut config = AppConfig::new().unwrap();
        config.kdf_iterations = 1_000;
        assert!(config.validate().is_err());
        config.allow_weak_kdf = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let mut config = AppConfig::new().unwrap();
        config.password = Some("hunter2".to_string());
        let printed = format!("{:?}", config);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("[REDACTED]"));
    }

    #[test]
    fn test_cache_ttl_has_upper_bound() {
        let err = AppConfig::from_vars(lookup(&[("CACHE_TTL_SECONDS", u64::MAX.to_string().as_str())])).unwrap_err();
        assert!(matches!(err, InnerBoardError::Config(_)));

        let max = MAX_CACHE_TTL.as_secs().to_string();
        let config = AppConfig::from_vars(lookup(&[("CACHE_TTL_SECONDS", max.as_str())])).unwrap();
        assert_eq!(config.cache_ttl, MAX_CACHE_TTL);
    }

    #[test]
    fn test_env_file_parsed_leniently_when_strict_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# notes\n```\nOLLAMA_MODEL='llama3.1:8b'\nnot a pair\nlower_case=1\nEMPTY=\n```\n",
        )
        .unwrap();

        let file = read_env_file(&path).unwrap();
        assert_eq!(file.path, path);
        assert_eq!(file.vars.len(), 1);
        assert_eq!(file.vars["OLLAMA_MODEL"], "llama3.1:8b");
    }

    #[test]
    fn test_env_file_discovered_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(".env"), "MODEL_POOL_SIZE=3\n").unwrap();

        let found = discover_env_file(&nested).unwrap();
        assert_eq!(found, dir.path().join(".env"));

        let file = read_env_file(&found).unwrap();
        let config = AppConfig::from_vars(|key| file.vars.get(key).cloned()).unwrap();
        assert_eq!(config.pool_size, 3);
    }
}

use anyhow::anyhow;
use anyhow::Result;
use serde::Deserialize;

/// Default marker carried in the `User-Agent` of push deliveries.
pub const DEFAULT_PUSH_AGENT: &str = "APIs-Google";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pubsub: PubSubConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// `None` or `0` lets the OS pick an ephemeral port.
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_true")]
    pub grpc: bool,
    #[serde(default = "default_true")]
    pub gateway: bool,
    #[serde(default)]
    pub pubsub: bool,
    /// Expose gRPC server reflection next to the services.
    #[serde(default = "default_true")]
    pub reflection: bool,
    #[serde(default)]
    pub worker_threads: Option<usize>,
    #[serde(default)]
    pub shutdown_timeout_secs: Option<u64>,
    #[serde(default)]
    pub admin_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            grpc: true,
            gateway: true,
            pubsub: false,
            reflection: true,
            worker_threads: Some(4),
            shutdown_timeout_secs: None,
            admin_addr: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PubSubConfig {
    #[serde(default = "default_push_agent")]
    pub user_agent: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self { user_agent: default_push_agent(), max_body_bytes: default_max_body_bytes() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { format: default_log_format() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StoreConfig {
    /// JSON file backing the document store; in-memory only when unset.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub collection_prefix: String,
}

fn default_host() -> String { "0.0.0.0".into() }
fn default_true() -> bool { true }
fn default_push_agent() -> String { DEFAULT_PUSH_AGENT.into() }
// base64 inflates a 10 MiB push message to ~13.4 MiB, plus envelope fields
fn default_max_body_bytes() -> usize { 16 * 1024 * 1024 }
fn default_log_format() -> String { "compact".into() }

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    /// Load `config.toml` (or `CONFIG_PATH`), falling back to defaults when the
    /// file is missing, then apply environment overrides and validate.
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = match load_default() {
            Ok(cfg) => cfg,
            Err(e) if is_not_found(&e) => AppConfig::default(),
            Err(e) => return Err(e),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    /// Environment overrides. `PORT` wins over the file; an empty `PORT`
    /// means "let the OS choose".
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            let port = port.trim();
            self.server.port = if port.is_empty() {
                None
            } else {
                Some(port.parse::<u16>().map_err(|e| anyhow!("PORT 无效 ({port}): {e}"))?)
            };
        }
        if let Some(prefix) = lookup("COLLECTION_PREFIX") {
            self.store.collection_prefix = prefix;
        }
        Ok(())
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.server.normalize()?;
        self.pubsub.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = default_host();
        }
        if self.port == Some(0) {
            self.port = None;
        }
        // pubsub 解包后的请求会转发到 gateway，因此开启 pubsub 必须同时开启 gateway
        if self.pubsub {
            self.gateway = true;
        }
        if !(self.grpc || self.gateway) {
            return Err(anyhow!("server.grpc / server.gateway / server.pubsub 至少需要开启一个"));
        }
        match self.worker_threads {
            Some(0) | None => self.worker_threads = Some(4),
            Some(_) => {}
        }
        if self.shutdown_timeout_secs == Some(0) {
            return Err(anyhow!("server.shutdown_timeout_secs 必须为正整数秒"));
        }
        Ok(())
    }
}

impl PubSubConfig {
    fn validate(&self) -> Result<()> {
        if self.user_agent.trim().is_empty() {
            return Err(anyhow!("pubsub.user_agent 不能为空"));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow!("pubsub.max_body_bytes 必须 >= 1"));
        }
        Ok(())
    }
}

fn is_not_found(e: &anyhow::Error) -> bool {
    e.downcast_ref::<std::io::Error>()
        .map(|io| io.kind() == std::io::ErrorKind::NotFound)
        .unwrap_or(false)
}

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_META_URL: &str = "https://api.github.com/meta";
pub const DEFAULT_ALLOW_LIST_TTL_SECS: u64 = 3600;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_OUTPUT_CHARS: usize = 30_000;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 3600;

/// Top-level config (easyblog.toml + EASYBLOG_* env overrides).
///
/// Loaded once at startup and handed to every subsystem by reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EasyblogConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Recurring tasks run by `easyblog scheduler`.
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Deploy webhook (`POST /deploy_api/`) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Shared HMAC secret. When unset the endpoint answers 501.
    #[serde(default)]
    pub secret: Option<String>,
    /// Provider metadata endpoint publishing the `hooks` CIDR list.
    #[serde(default = "default_meta_url")]
    pub meta_url: String,
    /// How long a fetched allow-list stays valid.
    #[serde(default = "default_allow_list_ttl_secs")]
    pub allow_list_ttl_secs: u64,
    /// Upper bound for the allow-list fetch. A timeout rejects the request.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Static CIDR list. When set, `meta_url` is never contacted.
    #[serde(default)]
    pub allow_ranges: Option<Vec<String>>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            meta_url: default_meta_url(),
            allow_list_ttl_secs: DEFAULT_ALLOW_LIST_TTL_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            allow_ranges: None,
        }
    }
}

/// Redeploy executor settings. Every command is an argv list, never a shell string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Working tree that gets fetched, reset and restarted.
    #[serde(default = "default_repo_dir")]
    pub repo_dir: String,
    #[serde(default = "default_remote")]
    pub remote: String,
    /// Append-only log receiving one entry per failed step.
    #[serde(default = "default_error_log")]
    pub error_log: String,
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
    #[serde(default = "default_collect_static_command")]
    pub collect_static_command: Vec<String>,
    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            repo_dir: default_repo_dir(),
            remote: default_remote(),
            error_log: default_error_log(),
            install_command: default_install_command(),
            collect_static_command: default_collect_static_command(),
            restart_command: default_restart_command(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Captured task output above this size is truncated before it is stored.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
    /// Timeout for tasks that do not set their own.
    #[serde(default = "default_task_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_output_chars: DEFAULT_MAX_OUTPUT_CHARS,
            default_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
        }
    }
}

/// One `[[tasks]]` entry.
///
/// `every_secs` is signed on purpose: zero and negative values must reach the
/// registry so they can be rejected with a proper message instead of a serde
/// type error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    /// Program to execute (looked up in `PATH` when not absolute).
    pub command: String,
    #[serde(default)]
    pub args: Vec<ArgConfig>,
    pub every_secs: i64,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// A task argument as written in TOML.
///
/// ```toml
/// args = ["dumpdata", { timestamp = "%Y%m%d" }, { env = "DB_NAME" }, { git_rev = "/srv/blog" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgConfig {
    Literal(String),
    /// Environment variable read at dispatch time.
    Env { env: String },
    /// Current UTC time rendered with a strftime pattern at dispatch time.
    Timestamp { timestamp: String },
    /// `git rev-parse HEAD` in the given repository at dispatch time.
    GitRev { git_rev: String },
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_meta_url() -> String {
    DEFAULT_META_URL.to_string()
}
fn default_allow_list_ttl_secs() -> u64 {
    DEFAULT_ALLOW_LIST_TTL_SECS
}
fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}
fn default_max_output_chars() -> usize {
    DEFAULT_MAX_OUTPUT_CHARS
}
fn default_task_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}
fn default_repo_dir() -> String {
    ".".to_string()
}
fn default_remote() -> String {
    "origin".to_string()
}
fn default_install_command() -> Vec<String> {
    argv(&["poetry", "install", "--only", "main", "--sync"])
}
fn default_collect_static_command() -> Vec<String> {
    argv(&["poetry", "run", "python", "manage.py", "collectstatic", "--no-input"])
}
fn default_restart_command() -> Vec<String> {
    argv(&["systemctl", "--user", "restart", "gunicorn_jiri_one.socket"])
}
fn default_db_path() -> String {
    format!("{}/easyblog.db", data_dir())
}
fn default_error_log() -> String {
    format!("{}/redeploy-error.log", data_dir())
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// `~/.easyblog`, or `./.easyblog` when `HOME` is unset.
pub fn data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.easyblog", home)
}

impl EasyblogConfig {
    /// Load config from a TOML file with EASYBLOG_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. EASYBLOG_CONFIG env var
    ///   3. ~/.easyblog/easyblog.toml
    ///
    /// A missing file is not an error (all sections have defaults); a file
    /// that does not parse is.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("EASYBLOG_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        tracing::debug!(path = %path, "loading configuration");

        Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("EASYBLOG_").ignore(&["CONFIG"]).split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))
    }
}

fn default_config_path() -> String {
    format!("{}/easyblog.toml", data_dir())
}

/// Ensure the parent directory for a file path exists.
pub fn ensure_parent_dir(path: &str) -> crate::error::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

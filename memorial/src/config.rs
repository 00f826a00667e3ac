use std::{fmt, fs, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use crate::auth::PrivilegePolicy;
use crate::model::PaymentMethod;

/// Command line options.
#[derive(Parser, Debug, Default)]
#[command(name = "memorial", about = "Memorial guestbook, gallery and donations service")]
pub struct Cli {
    /// Override bind address (host:port).
    #[arg(long)]
    pub bind: Option<String>,
    /// Override server port.
    #[arg(long)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long)]
    pub logging: Option<bool>,
    /// Path to configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Record store backend: sqlite, memory or remote.
    #[arg(long)]
    pub backend: Option<Backend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Sqlite,
    Memory,
    Remote,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "memory" => Ok(Backend::Memory),
            "remote" => Ok(Backend::Remote),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

#[derive(Clone)]
pub struct Bootstrap {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Hosted endpoint used by the `remote` backend.
#[derive(Clone)]
pub struct RemoteStore {
    pub url: String,
    pub key: String,
}

impl fmt::Debug for RemoteStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStore")
            .field("url", &self.url)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// Mobile-money receiving numbers per provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentNumbers {
    pub mtn: String,
    pub telecel: String,
    pub airteltigo: String,
}

impl Default for PaymentNumbers {
    fn default() -> Self {
        Self {
            mtn: "0241234567".into(),
            telecel: "0201234567".into(),
            airteltigo: "0271234567".into(),
        }
    }
}

impl PaymentNumbers {
    pub fn for_method(&self, method: PaymentMethod) -> Option<&str> {
        match method {
            PaymentMethod::Mtn => Some(&self.mtn),
            PaymentMethod::Telecel => Some(&self.telecel),
            PaymentMethod::AirtelTigo => Some(&self.airteltigo),
            PaymentMethod::Stripe => None,
        }
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to bind the HTTP server to.
    pub bind: String,
    /// Base directory for the database, objects and accounts.
    pub data_dir: PathBuf,
    pub logging_enabled: bool,
    pub backend: Backend,
    /// Set when `backend` is `Remote`.
    pub remote: Option<RemoteStore>,
    /// Ordered storage bucket candidates.
    pub buckets: Vec<String>,
    /// Base for public object URLs served by the disk backend.
    pub public_base: String,
    pub max_upload_mb: u64,
    /// Whether visitors may upload to the gallery.
    pub visitor_uploads: bool,
    pub privilege: PrivilegePolicy,
    /// Bootstrap credentials, consumed on first run.
    pub bootstrap: Option<Bootstrap>,
    pub payments: PaymentNumbers,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    bootstrap: Option<FileBootstrap>,
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    logging: FileLogging,
    #[serde(default)]
    store: FileStore,
    #[serde(default)]
    storage: FileStorage,
    #[serde(default)]
    auth: FileAuth,
    #[serde(default)]
    payments: FilePayments,
}

#[derive(Deserialize)]
struct FileBootstrap {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

#[derive(Deserialize, Default)]
struct FileStore {
    #[serde(default)]
    backend: Option<Backend>,
    url: Option<String>,
    anon_key: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileStorage {
    buckets: Option<Vec<String>>,
    public_base: Option<String>,
    max_upload_mb: Option<u64>,
    visitor_uploads: Option<bool>,
}

#[derive(Deserialize, Default)]
struct FileAuth {
    privilege: Option<String>,
    admin_role: Option<String>,
    #[serde(default)]
    admin_email_domains: Vec<String>,
}

#[derive(Deserialize, Default)]
struct FilePayments {
    mtn: Option<String>,
    telecel: Option<String>,
    airteltigo: Option<String>,
}

fn default_port() -> u16 {
    8790
}

fn default_logging() -> bool {
    true
}

pub fn default_buckets() -> Vec<String> {
    vec!["images".to_string(), "gallary_images".to_string()]
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

fn env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn privilege_policy(kind: &str, role: Option<String>, domains: Vec<String>) -> Result<PrivilegePolicy> {
    match kind.to_ascii_lowercase().as_str() {
        "role" => Ok(PrivilegePolicy::Role {
            role: role.unwrap_or_else(|| "admin".to_string()),
            email_domains: domains,
        }),
        "any_signed_in" => Ok(PrivilegePolicy::AnySignedIn),
        other => anyhow::bail!("invalid_privilege: {}", other),
    }
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(cli: &Cli) -> Result<Self> {
        // config file path precedence: CLI -> ENV -> default
        let config_path = cli
            .config
            .clone()
            .or_else(|| env("MEMORIAL_CONFIG").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/memorial.toml"));

        let file_cfg: FileConfig = match fs::read(&config_path) {
            Ok(bytes) => {
                let contents = String::from_utf8_lossy(&bytes);
                toml::from_str(&contents)
                    .with_context(|| format!("invalid config file {}", config_path.display()))?
            }
            Err(_) => FileConfig::default(),
        };

        let mut port = file_cfg.server.port;
        let mut logging = file_cfg.logging.enabled;
        let mut backend = file_cfg.store.backend.unwrap_or_default();
        let mut store_url = file_cfg.store.url;
        let mut store_key = file_cfg.store.anon_key;
        let mut privilege = file_cfg.auth.privilege.unwrap_or_else(|| "role".to_string());
        let bootstrap = file_cfg.bootstrap.map(|b| Bootstrap {
            email: b.email,
            password: b.password,
        });
        let defaults = PaymentNumbers::default();
        let mut payments = PaymentNumbers {
            mtn: file_cfg.payments.mtn.unwrap_or(defaults.mtn),
            telecel: file_cfg.payments.telecel.unwrap_or(defaults.telecel),
            airteltigo: file_cfg.payments.airteltigo.unwrap_or(defaults.airteltigo),
        };

        // environment overrides
        if let Some(p) = env("MEMORIAL_PORT").and_then(|p| p.parse::<u16>().ok()) {
            port = p;
        }
        if let Some(l) = env("MEMORIAL_LOGGING").and_then(|l| l.parse::<bool>().ok()) {
            logging = l;
        }
        if let Some(b) = env("MEMORIAL_BACKEND").and_then(|b| b.parse::<Backend>().ok()) {
            backend = b;
        }
        if let Some(u) = env("MEMORIAL_STORE_URL") {
            store_url = Some(u);
        }
        if let Some(k) = env("MEMORIAL_STORE_KEY") {
            store_key = Some(k);
        }
        if let Some(p) = env("MEMORIAL_PRIVILEGE") {
            privilege = p;
        }
        if let Some(n) = env("MEMORIAL_MTN_NUMBER") {
            payments.mtn = n;
        }
        if let Some(n) = env("MEMORIAL_TELECEL_NUMBER") {
            payments.telecel = n;
        }
        if let Some(n) = env("MEMORIAL_AIRTELTIGO_NUMBER") {
            payments.airteltigo = n;
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(b) = cli.backend {
            backend = b;
        }

        // validate port range
        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }

        let remote = match (backend, store_url, store_key) {
            (Backend::Remote, Some(url), Some(key)) => Some(RemoteStore {
                url: url.trim_end_matches('/').to_string(),
                key,
            }),
            (Backend::Remote, _, _) => anyhow::bail!("missing_store_credentials"),
            _ => None,
        };

        let buckets = file_cfg.storage.buckets.unwrap_or_else(default_buckets);
        if buckets.iter().all(|b| b.trim().is_empty()) {
            anyhow::bail!("no_buckets");
        }

        let privilege = privilege_policy(
            &privilege,
            file_cfg.auth.admin_role,
            file_cfg.auth.admin_email_domains,
        )?;

        // bind address precedence for host override
        let bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Some(b) = env("BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };

        let public_base = file_cfg
            .storage
            .public_base
            .unwrap_or_else(|| format!("http://{}", bind))
            .trim_end_matches('/')
            .to_string();

        let data_dir = env("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        Ok(Self {
            bind,
            data_dir,
            logging_enabled: logging,
            backend,
            remote,
            buckets,
            public_base,
            max_upload_mb: file_cfg.storage.max_upload_mb.unwrap_or(5),
            visitor_uploads: file_cfg.storage.visitor_uploads.unwrap_or(false),
            privilege,
            bootstrap,
            payments,
        })
    }

    /// Helper to return the upload limit in bytes.
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * 1024 * 1024
    }
}

/// Determine the default data directory.
pub fn default_data_dir() -> PathBuf {
    if let Ok(home) = std::env::var("HOME") {
        let mut p = PathBuf::from(home);
        p.push(".local/share/memorial");
        p
    } else {
        PathBuf::from("./memorial_data")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    const VARS: &[&str] = &[
        "MEMORIAL_CONFIG",
        "MEMORIAL_PORT",
        "MEMORIAL_LOGGING",
        "MEMORIAL_BACKEND",
        "MEMORIAL_STORE_URL",
        "MEMORIAL_STORE_KEY",
        "MEMORIAL_PRIVILEGE",
        "MEMORIAL_MTN_NUMBER",
        "MEMORIAL_TELECEL_NUMBER",
        "MEMORIAL_AIRTELTIGO_NUMBER",
        "BIND",
    ];

    fn clear_env() {
        for v in VARS {
            std::env::remove_var(v);
        }
    }

    fn load(contents: &str, cli: Cli) -> Result<Config> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.toml");
        fs::write(&path, contents).unwrap();
        Config::load(&Cli {
            config: Some(path),
            ..cli
        })
    }

    #[test]
    #[serial]
    fn missing_keys_defaults() {
        clear_env();
        let cfg = load("", Cli::default()).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:8790");
        assert!(cfg.logging_enabled);
        assert_eq!(cfg.backend, Backend::Sqlite);
        assert_eq!(cfg.buckets, default_buckets());
        assert_eq!(cfg.max_upload_bytes(), 5 * 1024 * 1024);
        assert!(!cfg.visitor_uploads);
        assert_eq!(cfg.privilege, PrivilegePolicy::default());
        assert_eq!(cfg.payments, PaymentNumbers::default());
        assert_eq!(cfg.public_base, "http://127.0.0.1:8790");
    }

    #[test]
    #[serial]
    fn invalid_port_fails() {
        clear_env();
        let err = load("[server]\nport=80\n", Cli::default()).unwrap_err();
        assert_eq!(err.to_string(), "invalid_port");
    }

    #[test]
    #[serial]
    fn precedence_cli_env_file() {
        clear_env();
        std::env::set_var("MEMORIAL_PORT", "2222");
        let cfg = load(
            "[server]\nport=1111\n",
            Cli {
                port: Some(3333),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:3333");
        let cfg = load("[server]\nport=1111\n", Cli::default()).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:2222");
        clear_env();
        let cfg = load("[server]\nport=1111\n", Cli::default()).unwrap();
        assert_eq!(cfg.bind, "127.0.0.1:1111");
    }

    #[test]
    #[serial]
    fn remote_backend_needs_credentials() {
        clear_env();
        let err = load("[store]\nbackend=\"remote\"\nurl=\"https://x.example\"\n", Cli::default())
            .unwrap_err();
        assert_eq!(err.to_string(), "missing_store_credentials");

        std::env::set_var("MEMORIAL_STORE_KEY", "anon");
        let cfg = load("[store]\nbackend=\"remote\"\nurl=\"https://x.example/\"\n", Cli::default())
            .unwrap();
        let remote = cfg.remote.unwrap();
        assert_eq!(remote.url, "https://x.example");
        assert!(!format!("{:?}", remote).contains("anon"));
        clear_env();
    }

    #[test]
    #[serial]
    fn cli_backend_wins() {
        clear_env();
        std::env::set_var("MEMORIAL_BACKEND", "sqlite");
        let cfg = load(
            "",
            Cli {
                backend: Some(Backend::Memory),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(cfg.backend, Backend::Memory);
        clear_env();
    }

    #[test]
    #[serial]
    fn empty_bucket_list_rejected() {
        clear_env();
        let err = load("[storage]\nbuckets=[]\n", Cli::default()).unwrap_err();
        assert_eq!(err.to_string(), "no_buckets");
    }

    #[test]
    #[serial]
    fn privilege_strictness_is_configurable() {
        clear_env();
        let cfg = load(
            "[auth]\nprivilege=\"role\"\nadmin_role=\"moderator\"\nadmin_email_domains=[\"family.org\"]\n",
            Cli::default(),
        )
        .unwrap();
        assert_eq!(
            cfg.privilege,
            PrivilegePolicy::Role {
                role: "moderator".into(),
                email_domains: vec!["family.org".into()],
            }
        );
        std::env::set_var("MEMORIAL_PRIVILEGE", "any_signed_in");
        let cfg = load("", Cli::default()).unwrap();
        assert_eq!(cfg.privilege, PrivilegePolicy::AnySignedIn);
        std::env::set_var("MEMORIAL_PRIVILEGE", "everyone");
        assert!(load("", Cli::default()).is_err());
        clear_env();
    }

    #[test]
    #[serial]
    fn payment_numbers_layer() {
        clear_env();
        std::env::set_var("MEMORIAL_TELECEL_NUMBER", "0209999999");
        let cfg = load("[payments]\nmtn=\"0245555555\"\n", Cli::default()).unwrap();
        assert_eq!(cfg.payments.mtn, "0245555555");
        assert_eq!(cfg.payments.telecel, "0209999999");
        assert_eq!(cfg.payments.airteltigo, PaymentNumbers::default().airteltigo);
        assert_eq!(cfg.payments.for_method(PaymentMethod::Stripe), None);
        clear_env();
    }

    #[test]
    #[serial]
    fn bootstrap_password_redacted() {
        clear_env();
        let cfg = load(
            "[bootstrap]\nemail=\"admin@example.org\"\npassword=\"s3cret\"\n",
            Cli::default(),
        )
        .unwrap();
        let shown = format!("{:?}", cfg.bootstrap.unwrap());
        assert!(shown.contains("admin@example.org"));
        assert!(!shown.contains("s3cret"));
    }
}

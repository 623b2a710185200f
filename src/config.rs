use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use url::Url;

use crate::error::ApiError;

/// Mini App session client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Application mode (dev, prod)
    #[arg(short = 'm', long, env = "APP_MODE", default_value = "prod")]
    pub mode: String,

    /// Backend address override used in dev mode
    #[arg(short = 'a', long, env = "API_URL")]
    pub api_url: Option<String>,

    /// Address the Mini App is served from
    #[arg(short = 'o', long, env = "APP_ORIGIN")]
    pub origin: Option<String>,

    /// Path to the SQLite file holding the session credential
    #[arg(short = 'd', long, env = "SESSION_DB_FILE")]
    pub db_file: Option<String>,

    /// Host-injected Telegram WebApp object as JSON
    #[arg(long, env = "TELEGRAM_WEBAPP")]
    pub telegram_webapp: Option<String>,

    /// Use the mock Telegram user when no host object is given (dev mode only)
    #[arg(long, env = "MOCK_TELEGRAM", default_value = "false")]
    pub mock_telegram: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// Clear the stored session and exit
    #[arg(long)]
    pub logout: bool,

    /// Phone number to set on the profile after signing in
    #[arg(long)]
    pub phone: Option<String>,

    /// Email to set on the profile after signing in
    #[arg(long)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AppMode {
    Dev,
    Prod,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub mode: AppMode,
    pub api_url: Option<String>,
    pub origin: Option<String>,
    pub session_db_file: PathBuf,
    pub telegram_webapp: Option<String>,
    pub mock_telegram: bool,

    // HTTP client
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    pub log_level: String,

    // One-shot actions
    pub logout: bool,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let args = CliArgs::parse();
        Ok(Self::from_args(args))
    }

    pub fn from_args(args: CliArgs) -> Self {
        Config {
            mode: parse_app_mode(&args.mode),
            api_url: args.api_url.filter(|s| !s.trim().is_empty()),
            origin: args.origin.filter(|s| !s.trim().is_empty()),
            session_db_file: args
                .db_file
                .map(|s| expand_tilde(&s))
                .unwrap_or_else(default_db_path),
            telegram_webapp: args.telegram_webapp.filter(|s| !s.trim().is_empty()),
            mock_telegram: args.mock_telegram,

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            http_request_timeout: args.http_timeout,

            log_level: args.log_level,

            logout: args.logout,
            phone: args.phone,
            email: args.email,
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(ref raw) = self.telegram_webapp {
            serde_json::from_str::<serde_json::Value>(raw)
                .context("TELEGRAM_WEBAPP is not valid JSON")?;
        }

        self.base_url()?;
        Ok(())
    }

    /// Backend base address for this configuration
    pub fn base_url(&self) -> Result<String> {
        let location = self
            .origin
            .as_deref()
            .map(Url::parse)
            .transpose()
            .context("APP_ORIGIN is not a valid URL")?;

        resolve_base_url(&self.mode, self.api_url.as_deref(), location.as_ref())
            .map_err(anyhow::Error::from)
    }
}

/// Resolve the backend base address from the mode and the current location.
///
/// - dev with an override: the override, `/api` appended unless present
/// - dev without one: `/api` on the current location, port kept
/// - prod: current origin without the default port, plus `/api`
pub fn resolve_base_url(
    mode: &AppMode,
    api_override: Option<&str>,
    location: Option<&Url>,
) -> std::result::Result<String, ApiError> {
    if *mode == AppMode::Dev {
        if let Some(api_url) = api_override {
            let trimmed = api_url.trim_end_matches('/');
            return Ok(if trimmed.ends_with("/api") {
                trimmed.to_string()
            } else {
                format!("{}/api", trimmed)
            });
        }
    }

    let location = location.ok_or_else(|| {
        ApiError::Config("APP_ORIGIN is required to resolve the API address".to_string())
    })?;
    let host = location
        .host_str()
        .ok_or_else(|| ApiError::Config(format!("APP_ORIGIN has no host: {}", location)))?;

    // Url::port() is None for the scheme's default port (443/80)
    Ok(match location.port() {
        Some(port) => format!("{}://{}:{}/api", location.scheme(), host, port),
        None => format!("{}://{}/api", location.scheme(), host),
    })
}

/// Default session database under the platform data directory
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("miniapp-session")
        .join("session.sqlite3")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse application mode from string
fn parse_app_mode(s: &str) -> AppMode {
    match s.to_lowercase().as_str() {
        "dev" | "development" => AppMode::Dev,
        _ => AppMode::Prod,
    }
}

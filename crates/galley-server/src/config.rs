use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub storage_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub service_token: Option<String>,
    pub public_url: String,
}

impl Config {
    /// Read configuration from the environment (after `.env` has been loaded).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = var("GALLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("GALLEY_JWT_SECRET is unset or still a placeholder; it must match the auth provider's signing secret");
        }

        let host = var("GALLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = var("GALLEY_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("GALLEY_PORT must be a port number")?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .context("GALLEY_HOST must be an IP address")?;

        let db_path = var("GALLEY_DB_PATH")
            .unwrap_or_else(|| "galley.db".into())
            .into();
        let storage_dir = var("GALLEY_STORAGE_DIR")
            .unwrap_or_else(|| "./chat-uploads".into())
            .into();
        let max_upload_mb: usize = var("GALLEY_MAX_UPLOAD_MB")
            .and_then(|v| v.parse().ok())
            .unwrap_or(25);
        let service_token = var("GALLEY_SERVICE_TOKEN").filter(|t| !t.is_empty());
        let public_url =
            var("GALLEY_PUBLIC_URL").unwrap_or_else(|| format!("http://localhost:{}", port));

        Ok(Self {
            addr,
            db_path,
            jwt_secret,
            storage_dir,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            service_token,
            public_url,
        })
    }
}

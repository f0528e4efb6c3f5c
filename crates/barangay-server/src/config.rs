use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
];

pub struct AdminBootstrap {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub upload_dir: PathBuf,
    pub jwt_secret: String,
    pub admin: Option<AdminBootstrap>,
    /// Seeds the `barangay_name` setting on first start.
    pub barangay_name: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let jwt_secret = get("BARANGAY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("BARANGAY_JWT_SECRET is unset or still a placeholder; set it in your .env file");
        }

        let port: u16 = match get("BARANGAY_PORT") {
            Some(raw) => raw.parse::<u16>().with_context(|| format!("BARANGAY_PORT '{}' is not a port", raw))?,
            None => 3000,
        };

        let admin = match (get("BARANGAY_ADMIN_EMAIL"), get("BARANGAY_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminBootstrap {
                name: get("BARANGAY_ADMIN_NAME").unwrap_or_else(|| "Administrator".into()),
                email,
                password,
            }),
            (None, None) => None,
            _ => bail!("BARANGAY_ADMIN_EMAIL and BARANGAY_ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            host: get("BARANGAY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("BARANGAY_DB_PATH").unwrap_or_else(|| "barangay.db".into()).into(),
            upload_dir: get("BARANGAY_UPLOAD_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            jwt_secret,
            admin,
            barangay_name: get("BARANGAY_NAME").filter(|v| !v.trim().is_empty()),
        })
    }
}

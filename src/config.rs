use std::path::PathBuf;

use axum_extra::extract::cookie::SameSite;

use crate::error::AppError;

/// Attributes applied to every cookie the provider sets.
///
/// `SameSite=None` only works over HTTPS, so it forces the `Secure`
/// attribute regardless of the configured value.
#[derive(Debug, Clone, Copy)]
pub struct CookieOptions {
    pub same_site: SameSite,
    pub secure: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            same_site: SameSite::Lax,
            secure: false,
        }
    }
}

impl CookieOptions {
    pub fn secure(&self) -> bool {
        self.secure || self.same_site == SameSite::None
    }
}

/// A whitelist entry: a bare path matches any method, a path plus method
/// only that method.
#[derive(Debug, Clone)]
pub enum WhitelistEntry {
    Route(String),
    RouteMethod { route: String, method: String },
}

impl WhitelistEntry {
    fn normalize(&self) -> Result<String, AppError> {
        match self {
            WhitelistEntry::Route(route) => {
                if route.trim().is_empty() {
                    return Err(AppError::missing_argument("Whitelist route cannot be empty"));
                }
                Ok(route.clone())
            }
            WhitelistEntry::RouteMethod { route, method } => {
                if route.trim().is_empty() || method.trim().is_empty() {
                    return Err(AppError::missing_argument(
                        "Whitelist entries require both route and method",
                    ));
                }
                Ok(format!("{}-method-{}", route, method.to_uppercase()))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Master secret: signs the LTIK and the cookies, and encrypts
    /// private keys at rest.
    pub encryption_key: String,
    pub database_url: String,

    // reserved routes
    pub app_route: String,
    pub login_route: String,
    pub session_timeout_route: String,
    pub invalid_token_route: String,
    pub keyset_route: String,

    pub cookies: CookieOptions,
    pub dev_mode: bool,
    /// Maximum accepted age of an inbound `id_token`, in seconds.
    /// `None` disables the age check.
    pub token_max_age: Option<u64>,
    /// Optional lifetime for minted LTIKs. Off by default: the LTIK is
    /// bounded by the session cookie and the stored launch rows instead.
    pub ltik_max_age: Option<u64>,

    pub https: bool,
    pub ssl_key: Option<PathBuf>,
    pub ssl_cert: Option<PathBuf>,
    pub cors: bool,
    pub static_path: Option<PathBuf>,

    /// Normalized whitelist entries (`path` or `path-method-METHOD`).
    pub whitelist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encryption_key: String::new(),
            database_url: "sqlite:ltiprovider.db?mode=rwc".to_string(),
            app_route: "/".to_string(),
            login_route: "/login".to_string(),
            session_timeout_route: "/sessionTimeout".to_string(),
            invalid_token_route: "/invalidToken".to_string(),
            keyset_route: "/keys".to_string(),
            cookies: CookieOptions::default(),
            dev_mode: false,
            token_max_age: Some(10),
            ltik_max_age: None,
            https: false,
            ssl_key: None,
            ssl_cert: None,
            cors: true,
            static_path: None,
            whitelist: Vec::new(),
        }
    }
}

impl Config {
    pub fn new(encryption_key: impl Into<String>) -> Self {
        Self {
            encryption_key: encryption_key.into(),
            ..Self::default()
        }
    }

    /// Registers routes that bypass steady-state authentication.
    pub fn whitelist(mut self, entries: &[WhitelistEntry]) -> Result<Self, AppError> {
        for entry in entries {
            self.whitelist.push(entry.normalize()?);
        }
        Ok(self)
    }

    pub fn is_whitelisted(&self, path: &str, method: &str) -> bool {
        let with_method = format!("{}-method-{}", path, method.to_uppercase());
        self.whitelist.iter().any(|entry| entry == path || *entry == with_method)
    }

    /// Checked once at provider construction, before anything listens.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.encryption_key.is_empty() {
            return Err(AppError::config("encryption_key is required"));
        }

        if self.https {
            let key = self
                .ssl_key
                .as_ref()
                .ok_or_else(|| AppError::config("https requires ssl_key"))?;
            let cert = self
                .ssl_cert
                .as_ref()
                .ok_or_else(|| AppError::config("https requires ssl_cert"))?;
            for path in [key, cert] {
                if !path.is_file() {
                    return Err(AppError::config(format!(
                        "ssl file not found: {}",
                        path.display()
                    )));
                }
            }
        }

        for route in [
            &self.app_route,
            &self.login_route,
            &self.session_timeout_route,
            &self.invalid_token_route,
            &self.keyset_route,
        ] {
            if !route.starts_with('/') {
                return Err(AppError::config(format!("route must start with '/': {route}")));
            }
        }

        Ok(())
    }
}

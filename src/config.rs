use serde::Deserialize;

pub const DEFAULT_CONSOLE_ADMIN_SCOPE: &str = "stratos.admin";
pub const DEFAULT_CF_ADMIN_IDENTIFIER: &str = "cloud_controller.admin";

/// Upper bound for `SESSION_EXPIRY_SECS`: 30 days.
pub const MAX_SESSION_EXPIRY_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// 64 hex chars (32 bytes). Key-encryption key for tokens at rest.
    pub encryption_key: String,
    pub console: ConsoleConfig,
    pub sso: SsoConfig,
    pub http: HttpClientConfig,
    pub session: SessionConfig,
    /// API URL of the Cloud Foundry endpoint registered automatically at startup.
    /// Disconnecting it keeps a placeholder token instead of deleting the record.
    pub auto_register_cf_url: Option<String>,
    pub cf_admin_identifier: String,
    /// Browser origins allowed to call the API with credentials.
    pub allowed_origins: Vec<String>,
}

/// The console's own identity provider (UAA) settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    pub uaa_endpoint: String,
    pub console_client: String,
    pub console_client_secret: String,
    pub console_admin_scope: String,
    pub skip_ssl_validation: bool,
}

impl ConsoleConfig {
    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.uaa_endpoint.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SsoConfig {
    pub enabled: bool,
    /// Parsed from the comma separated SSO_OPTIONS (e.g. "logout").
    pub options: Vec<String>,
}

impl SsoConfig {
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpClientConfig {
    pub timeout_secs: u64,
    /// 0 means "same as timeout_secs".
    pub mutating_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Transient-failure retries for read (GET/HEAD) calls. 0 disables retrying.
    pub read_retries: u32,
}

impl HttpClientConfig {
    pub fn effective_mutating_timeout_secs(&self) -> u64 {
        if self.mutating_timeout_secs == 0 {
            self.timeout_secs
        } else {
            self.mutating_timeout_secs
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sliding window extended on every successful verification.
    pub expiry_secs: i64,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cleanup_interval_secs: u64,
}

impl SessionConfig {
    /// The session lifetime, rejecting values outside `1..=MAX_SESSION_EXPIRY_SECS`.
    pub fn ttl(&self) -> anyhow::Result<chrono::Duration> {
        if !(1..=MAX_SESSION_EXPIRY_SECS).contains(&self.expiry_secs) {
            anyhow::bail!(
                "SESSION_EXPIRY_SECS must be between 1 and {}, got {}",
                MAX_SESSION_EXPIRY_SECS,
                self.expiry_secs
            );
        }
        chrono::Duration::try_seconds(self.expiry_secs)
            .ok_or_else(|| anyhow::anyhow!("SESSION_EXPIRY_SECS out of range"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5443,
            database_url: "postgres://localhost/jetstream".into(),
            encryption_key: String::new(),
            console: ConsoleConfig::default(),
            sso: SsoConfig::default(),
            http: HttpClientConfig::default(),
            session: SessionConfig::default(),
            auto_register_cf_url: None,
            cf_admin_identifier: DEFAULT_CF_ADMIN_IDENTIFIER.into(),
            allowed_origins: Vec::new(),
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            uaa_endpoint: String::new(),
            console_client: "cf".into(),
            console_client_secret: String::new(),
            console_admin_scope: DEFAULT_CONSOLE_ADMIN_SCOPE.into(),
            skip_ssl_validation: false,
        }
    }
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            mutating_timeout_secs: 120,
            connect_timeout_secs: 10,
            read_retries: 2,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expiry_secs: 20 * 60,
            cookie_domain: None,
            cookie_secure: true,
            cleanup_interval_secs: 300,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let encryption_key = match std::env::var("ENCRYPTION_KEY") {
        Ok(key) => key,
        Err(_) => {
            let env_mode = std::env::var("JETSTREAM_ENV")
                .or_else(|_| std::env::var("RUST_ENV"))
                .unwrap_or_default();
            if env_mode == "production" {
                anyhow::bail!(
                    "ENCRYPTION_KEY is not set. \
                     Set a 64-char hex key before running in production."
                );
            }
            tracing::warn!(
                "ENCRYPTION_KEY is not set; generated an ephemeral key. \
                 Stored tokens will not survive a restart."
            );
            crate::vault::crypto::generate_key_hex()
        }
    };

    let defaults = Config::default();

    let config = Config {
        port: env_parse("JETSTREAM_PORT", defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        encryption_key,
        console: ConsoleConfig {
            uaa_endpoint: std::env::var("UAA_ENDPOINT")
                .unwrap_or_default()
                .trim_end_matches('/')
                .to_string(),
            console_client: std::env::var("CONSOLE_CLIENT")
                .unwrap_or(defaults.console.console_client),
            console_client_secret: std::env::var("CONSOLE_CLIENT_SECRET").unwrap_or_default(),
            console_admin_scope: std::env::var("CONSOLE_ADMIN_SCOPE")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.console.console_admin_scope),
            skip_ssl_validation: env_bool("SKIP_SSL_VALIDATION"),
        },
        sso: SsoConfig {
            enabled: env_bool("SSO_LOGIN"),
            options: parse_sso_options(&std::env::var("SSO_OPTIONS").unwrap_or_default()),
        },
        http: HttpClientConfig {
            timeout_secs: env_parse("HTTP_CLIENT_TIMEOUT_IN_SECS", defaults.http.timeout_secs),
            mutating_timeout_secs: env_parse(
                "HTTP_CLIENT_TIMEOUT_MUTATING_IN_SECS",
                defaults.http.mutating_timeout_secs,
            ),
            connect_timeout_secs: env_parse(
                "HTTP_CONNECTION_TIMEOUT_IN_SECS",
                defaults.http.connect_timeout_secs,
            ),
            read_retries: env_parse("HTTP_CLIENT_READ_RETRIES", defaults.http.read_retries),
        },
        session: SessionConfig {
            expiry_secs: env_parse("SESSION_EXPIRY_SECS", defaults.session.expiry_secs),
            cookie_domain: std::env::var("COOKIE_DOMAIN")
                .ok()
                .filter(|d| !d.is_empty() && d != "-"),
            cookie_secure: std::env::var("COOKIE_SECURE")
                .map(|v| v != "false")
                .unwrap_or(defaults.session.cookie_secure),
            cleanup_interval_secs: env_parse(
                "SESSION_CLEANUP_INTERVAL_SECS",
                defaults.session.cleanup_interval_secs,
            ),
        },
        auto_register_cf_url: std::env::var("AUTO_REG_CF_URL")
            .ok()
            .filter(|s| !s.is_empty()),
        cf_admin_identifier: std::env::var("CF_ADMIN_IDENTIFIER")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.cf_admin_identifier),
        allowed_origins: std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    };
    config.session.ttl()?;
    Ok(config)
}

/// "logout, nosplash" -> ["logout", "nosplash"]. Whitespace anywhere is ignored.
pub fn parse_sso_options(raw: &str) -> Vec<String> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    compact
        .split(',')
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sso_options_ignore_whitespace() {
        let sso = SsoConfig {
            enabled: true,
            options: parse_sso_options(" logout ,  no splash,,"),
        };
        assert!(sso.has_option("logout"));
        assert!(sso.has_option("nosplash"));
        assert!(!sso.has_option("login"));
    }

    #[test]
    fn test_mutating_timeout_falls_back_to_read_timeout() {
        let http = HttpClientConfig {
            timeout_secs: 15,
            mutating_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(http.effective_mutating_timeout_secs(), 15);
    }

    #[test]
    fn test_console_token_url() {
        let console = ConsoleConfig {
            uaa_endpoint: "https://uaa.example.com/".into(),
            ..Default::default()
        };
        assert_eq!(console.token_url(), "https://uaa.example.com/oauth/token");
    }

    #[test]
    fn test_session_ttl_bounds() {
        let mut session = SessionConfig::default();
        assert_eq!(session.ttl().unwrap(), chrono::Duration::seconds(1200));

        for bad in [0, -1, MAX_SESSION_EXPIRY_SECS + 1, i64::MAX, i64::MIN] {
            session.expiry_secs = bad;
            assert!(session.ttl().is_err(), "accepted {}", bad);
        }
        session.expiry_secs = MAX_SESSION_EXPIRY_SECS;
        assert!(session.ttl().is_ok());
    }
}

use axum::http::{header, HeaderMap, HeaderValue};
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::config::SessionConfig;

pub const SESSION_COOKIE_NAME: &str = "jetstream-session";

/// Name and attributes of the session cookie.
pub struct SessionCookie {
    name: String,
    pattern: Regex,
    domain: Option<String>,
    secure: bool,
    max_age: i64,
}

impl SessionCookie {
    pub fn new(cfg: &SessionConfig) -> anyhow::Result<Self> {
        let domain = cfg.cookie_domain.clone().filter(|d| !d.is_empty());
        let name = cookie_name(domain.as_deref());
        let pattern = Regex::new(&format!(r"(?:^|;)\s*{}=([^;]*)", regex::escape(&name)))?;
        Ok(Self {
            name,
            pattern,
            domain,
            secure: cfg.cookie_secure,
            max_age: cfg.expiry_secs,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Session id from the request. Some browsers send an empty cookie alongside
    /// the real one; empty values are skipped.
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|raw| self.pattern.captures_iter(raw))
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .find(|v| !v.is_empty())
            .map(String::from)
    }

    pub fn set(&self, session_id: &str) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.render(session_id, self.max_age)).ok()
    }

    pub fn clear(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(&self.render("", 0)).ok()
    }

    fn render(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Lax",
            self.name, value, max_age
        );
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// With a cookie domain the name carries a short hash of it, so consoles on
/// sibling domains do not overwrite each other's sessions.
pub fn cookie_name(domain: Option<&str>) -> String {
    match domain {
        Some(domain) if !domain.is_empty() => {
            let digest = hex::encode(Sha256::digest(domain.as_bytes()));
            format!("{}-{}", SESSION_COOKIE_NAME, &digest[..10])
        }
        _ => SESSION_COOKIE_NAME.to_string(),
    }
}

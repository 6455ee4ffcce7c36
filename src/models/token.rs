use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// GUID the view layer shows for credentials owned by the system-shared owner.
pub const SYSTEM_SHARED_USER_GUID: &str = "00000000-1111-2222-3333-444444444444";
pub const SYSTEM_SHARED_USER_NAME: &str = "system_shared";

/// Token value written over a disconnected credential that must stay on record.
pub const CLEARED_TOKEN: &str = "cleared_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthType {
    #[serde(rename = "oauth2")]
    OAuth2,
    #[serde(rename = "http-basic")]
    HttpBasic,
    #[serde(rename = "oidc")]
    Oidc,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::OAuth2 => "oauth2",
            AuthType::HttpBasic => "http-basic",
            AuthType::Oidc => "oidc",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "oauth2" | "" => Some(AuthType::OAuth2),
            "http-basic" | "creds" => Some(AuthType::HttpBasic),
            "oidc" => Some(AuthType::Oidc),
            _ => None,
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a credential belongs to. The shared owner is a distinct variant, so it can
/// never collide with a real user GUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenOwner {
    User(String),
    SystemShared,
}

impl TokenOwner {
    pub fn user(guid: impl Into<String>) -> Self {
        TokenOwner::User(guid.into())
    }

    pub fn is_system_shared(&self) -> bool {
        matches!(self, TokenOwner::SystemShared)
    }

    /// GUID as presented to API clients.
    pub fn display_guid(&self) -> &str {
        match self {
            TokenOwner::User(guid) => guid,
            TokenOwner::SystemShared => SYSTEM_SHARED_USER_GUID,
        }
    }
}

impl fmt::Display for TokenOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenOwner::User(guid) => write!(f, "user:{}", guid),
            TokenOwner::SystemShared => f.write_str("system-shared"),
        }
    }
}

/// What a credential grants access to: the console's own identity provider, or a
/// registered endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenKey {
    Console { user_guid: String },
    Endpoint { endpoint_guid: String, owner: TokenOwner },
}

impl TokenKey {
    pub fn console(user_guid: impl Into<String>) -> Self {
        TokenKey::Console {
            user_guid: user_guid.into(),
        }
    }

    pub fn endpoint(endpoint_guid: impl Into<String>, owner: TokenOwner) -> Self {
        TokenKey::Endpoint {
            endpoint_guid: endpoint_guid.into(),
            owner,
        }
    }

    pub fn is_system_shared(&self) -> bool {
        matches!(
            self,
            TokenKey::Endpoint {
                owner: TokenOwner::SystemShared,
                ..
            }
        )
    }
}

impl fmt::Display for TokenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKey::Console { user_guid } => write!(f, "console/{}", user_guid),
            TokenKey::Endpoint {
                endpoint_guid,
                owner,
            } => write!(f, "endpoint/{}/{}", endpoint_guid, owner),
        }
    }
}

/// A credential for one (target, owner) pair, in plaintext form.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub auth_token: String,
    /// Empty for grants that cannot be refreshed. HTTP Basic keeps the username here.
    pub refresh_token: String,
    /// None for credentials that never expire.
    pub token_expiry: Option<DateTime<Utc>>,
    pub auth_type: AuthType,
    pub system_shared: bool,
    pub disconnected: bool,
    /// Console user whose identity this credential was copied from (SSO auto-link).
    pub linked_guid: Option<String>,
}

impl TokenRecord {
    pub fn new(
        auth_type: AuthType,
        auth_token: impl Into<String>,
        refresh_token: impl Into<String>,
        token_expiry: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            auth_token: auth_token.into(),
            refresh_token: refresh_token.into(),
            token_expiry,
            auth_type,
            system_shared: false,
            disconnected: false,
            linked_guid: None,
        }
    }

    /// Placeholder kept for auto-registered endpoints after the user disconnects.
    pub fn cleared(auth_type: AuthType) -> Self {
        Self {
            disconnected: true,
            ..Self::new(auth_type, CLEARED_TOKEN, CLEARED_TOKEN, None)
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.token_expiry, Some(exp) if exp <= now)
    }

    pub fn is_refreshable(&self) -> bool {
        !self.disconnected
            && !self.refresh_token.is_empty()
            && matches!(self.auth_type, AuthType::OAuth2 | AuthType::Oidc)
    }

    pub fn expiry_unix(&self) -> i64 {
        self.token_expiry.map(|t| t.timestamp()).unwrap_or(0)
    }
}

// Tokens stay out of logs.
impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("auth_type", &self.auth_type)
            .field("token_expiry", &self.token_expiry)
            .field("system_shared", &self.system_shared)
            .field("disconnected", &self.disconnected)
            .field("linked_guid", &self.linked_guid)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_cleared_record_is_not_usable() {
        let rec = TokenRecord::cleared(AuthType::OAuth2);
        assert!(rec.disconnected);
        assert_eq!(rec.auth_token, CLEARED_TOKEN);
        assert!(!rec.is_refreshable());
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        let rec = TokenRecord::new(AuthType::OAuth2, "a", "r", Some(now - Duration::seconds(1)));
        assert!(rec.is_expired_at(now));
        let basic = TokenRecord::new(AuthType::HttpBasic, "Basic x", "bob", None);
        assert!(!basic.is_expired_at(now));
        assert!(!basic.is_refreshable());
    }

    #[test]
    fn test_debug_hides_tokens() {
        let rec = TokenRecord::new(AuthType::OAuth2, "secret-access", "secret-refresh", None);
        let dbg = format!("{:?}", rec);
        assert!(!dbg.contains("secret-access"));
        assert!(!dbg.contains("secret-refresh"));
    }

    #[test]
    fn test_auth_type_tags() {
        assert_eq!(AuthType::parse("http-basic"), Some(AuthType::HttpBasic));
        assert_eq!(AuthType::parse(""), Some(AuthType::OAuth2));
        assert_eq!(AuthType::parse("kerberos"), None);
        assert_eq!(TokenOwner::SystemShared.display_guid(), SYSTEM_SHARED_USER_GUID);
    }
}

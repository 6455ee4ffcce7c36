use serde::{Deserialize, Serialize};

use super::token::{SYSTEM_SHARED_USER_GUID, SYSTEM_SHARED_USER_NAME};

/// Identity of the user behind a connection, as reported to the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedUser {
    pub guid: String,
    pub name: String,
    pub admin: bool,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl ConnectedUser {
    /// View of a system-shared connection. Never reveals whose credential it is.
    pub fn sanitized(self) -> Self {
        Self {
            guid: SYSTEM_SHARED_USER_GUID.to_string(),
            name: SYSTEM_SHARED_USER_NAME.to_string(),
            admin: self.admin,
            scopes: Vec::new(),
        }
    }

    /// Reported when a connection succeeded but no identity can be derived from it.
    pub fn unknown() -> Self {
        Self {
            guid: "Unknown".to_string(),
            name: "Unknown".to_string(),
            admin: true,
            scopes: vec!["read".to_string()],
        }
    }
}

/// Body of every successful login, verify and endpoint connect. `user` is the
/// console identity for console logins and the connected identity for endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub account: String,
    pub token_expiry: i64,
    pub api_endpoint: Option<String>,
    pub admin: bool,
    pub user: Option<ConnectedUser>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutResponse {
    #[serde(rename = "isSSO")]
    pub is_sso: bool,
}

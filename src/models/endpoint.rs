use serde::{Deserialize, Serialize};
use url::Url;

/// A registered backend cluster the console can connect users to.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EndpointRecord {
    pub guid: String,
    pub name: String,
    /// Selects the endpoint plugin, e.g. "cf" or "metrics".
    pub cnsi_type: String,
    pub api_endpoint: String,
    pub authorization_endpoint: String,
    /// Falls back to the authorization endpoint when empty.
    #[serde(default)]
    pub token_endpoint: String,
    pub client_id: String,
    #[serde(default, skip_serializing)]
    pub client_secret: String,
    #[serde(default)]
    pub skip_ssl_validation: bool,
    #[serde(default)]
    pub sso_allowed: bool,
}

impl EndpointRecord {
    pub fn token_url(&self) -> String {
        let base = if self.token_endpoint.is_empty() {
            &self.authorization_endpoint
        } else {
            &self.token_endpoint
        };
        format!("{}/oauth/token", base.trim_end_matches('/'))
    }

    pub fn authorize_url(&self) -> String {
        format!(
            "{}/oauth/authorize",
            self.authorization_endpoint.trim_end_matches('/')
        )
    }
}

impl std::fmt::Debug for EndpointRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRecord")
            .field("guid", &self.guid)
            .field("name", &self.name)
            .field("cnsi_type", &self.cnsi_type)
            .field("api_endpoint", &self.api_endpoint)
            .field("authorization_endpoint", &self.authorization_endpoint)
            .field("client_id", &self.client_id)
            .field("skip_ssl_validation", &self.skip_ssl_validation)
            .field("sso_allowed", &self.sso_allowed)
            .finish_non_exhaustive()
    }
}

/// Compares two URLs by scheme, host, effective port and path. Query strings and a
/// trailing slash are ignored. Unparseable input never matches.
pub fn same_url(a: &str, b: &str) -> bool {
    let (Ok(a), Ok(b)) = (Url::parse(a.trim()), Url::parse(b.trim())) else {
        return false;
    };
    a.scheme() == b.scheme()
        && a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
        && a.port_or_known_default() == b.port_or_known_default()
        && a.path().trim_end_matches('/') == b.path().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_url_ignores_default_port_and_slash() {
        assert!(same_url("https://api.cf.example.com", "https://api.cf.example.com:443/"));
        assert!(same_url("https://API.cf.example.com/v2?x=1", "https://api.cf.example.com/v2"));
        assert!(!same_url("https://api.cf.example.com", "http://api.cf.example.com"));
        assert!(!same_url("https://api.cf.example.com:8443", "https://api.cf.example.com"));
        assert!(!same_url("not a url", "not a url"));
    }

    #[test]
    fn test_token_url_falls_back_to_authorization_endpoint() {
        let mut ep = EndpointRecord {
            guid: "e1".into(),
            name: "dev".into(),
            cnsi_type: "cf".into(),
            api_endpoint: "https://api.example.com".into(),
            authorization_endpoint: "https://login.example.com/".into(),
            token_endpoint: String::new(),
            client_id: "cf".into(),
            client_secret: String::new(),
            skip_ssl_validation: false,
            sso_allowed: false,
        };
        assert_eq!(ep.token_url(), "https://login.example.com/oauth/token");
        ep.token_endpoint = "https://uaa.example.com".into();
        assert_eq!(ep.token_url(), "https://uaa.example.com/oauth/token");
    }
}

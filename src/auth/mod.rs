pub mod console;
pub mod grant;
pub mod jwt;
pub mod provider;
pub mod refresh;

pub use console::{ConsoleIdentity, LoginHook};
pub use grant::{ClientCredentials, Grant, TokenAcquirer, UaaResponse};
pub use jwt::JwtUserTokenInfo;
pub use provider::{AuthProvider, AuthProviderRegistry, ResolvedProvider};

/// What a user hands over to log in, to the console or to an endpoint.
pub enum LoginCredentials {
    Password { username: String, password: String },
    /// Code from the SSO redirect; `state` must be the value the flow started with.
    AuthorizationCode { code: String, state: String },
}

impl LoginCredentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        LoginCredentials::Password {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn authorization_code(code: impl Into<String>, state: impl Into<String>) -> Self {
        LoginCredentials::AuthorizationCode {
            code: code.into(),
            state: state.into(),
        }
    }
}

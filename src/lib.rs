//! Jetstream: authentication and credential brokering for the Stratos console.
//!
//! Logs users in against the console UAA, keeps their sessions alive, and connects
//! them to registered endpoints with per-user or shared credentials.

pub mod api;
pub mod auth;
pub mod config;
pub mod endpoint;
pub mod errors;
pub mod http_client;
pub mod jobs;
pub mod models;
pub mod session;
pub mod sso;
pub mod store;
pub mod vault;

use std::sync::Arc;

use api::cookie::SessionCookie;
use auth::{AuthProviderRegistry, ConsoleIdentity, TokenAcquirer};
use config::Config;
use endpoint::{AutoLinkHook, EndpointConnector, PluginRegistry};
use http_client::HttpClientPool;
use session::manager::SessionManager;
use sso::SsoCoordinator;
use store::{EndpointRepository, SessionStore, TokenRepository};
use vault::CredentialStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub config: Config,
    pub console: Arc<ConsoleIdentity>,
    pub sessions: Arc<SessionManager>,
    pub connector: Arc<EndpointConnector>,
    pub sso: SsoCoordinator,
    pub cookie: SessionCookie,
}

impl AppState {
    pub fn new(
        config: Config,
        tokens: Arc<dyn TokenRepository>,
        endpoints: Arc<dyn EndpointRepository>,
        session_store: Arc<dyn SessionStore>,
    ) -> anyhow::Result<Self> {
        let clients = Arc::new(HttpClientPool::new(&config.http)?);
        let acquirer = Arc::new(TokenAcquirer::new(clients));
        let credentials = Arc::new(CredentialStore::new(&config.encryption_key, tokens)?);

        let console = Arc::new(ConsoleIdentity::new(
            config.console.clone(),
            acquirer.clone(),
            credentials.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            session_store,
            console.clone(),
            config.session.ttl()?,
        ));
        let connector = Arc::new(EndpointConnector::new(
            endpoints,
            credentials,
            console.clone(),
            acquirer,
            PluginRegistry::with_builtin(&config.cf_admin_identifier),
            AuthProviderRegistry::with_builtin(),
            config.auto_register_cf_url.clone(),
        ));

        if config.auto_register_cf_url.is_some() {
            console.register_login_hook(Arc::new(AutoLinkHook::new(Arc::downgrade(&connector))));
        }

        let sso = SsoCoordinator::new(
            config.sso.clone(),
            config.console.clone(),
            sessions.clone(),
            connector.clone(),
        );

        let cookie = SessionCookie::new(&config.session)?;

        Ok(Self {
            config,
            console,
            sessions,
            connector,
            sso,
            cookie,
        })
    }
}

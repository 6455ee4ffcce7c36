/// Outbound HTTP clients for identity providers and endpoint APIs.
/// Built once from configuration and shared; callers pick a client by TLS policy
/// and by whether the call mutates state.
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;

use crate::config::HttpClientConfig;

pub struct HttpClientPool {
    read: ClientWithMiddleware,
    read_skip_tls: ClientWithMiddleware,
    mutating: ClientWithMiddleware,
    mutating_skip_tls: ClientWithMiddleware,
}

impl HttpClientPool {
    pub fn new(cfg: &HttpClientConfig) -> anyhow::Result<Self> {
        let read_timeout = Duration::from_secs(cfg.timeout_secs);
        let mutating_timeout = Duration::from_secs(cfg.effective_mutating_timeout_secs());
        let connect_timeout = Duration::from_secs(cfg.connect_timeout_secs);

        Ok(Self {
            read: build(read_timeout, connect_timeout, false, cfg.read_retries)?,
            read_skip_tls: build(read_timeout, connect_timeout, true, cfg.read_retries)?,
            // Mutating clients never retry.
            mutating: build(mutating_timeout, connect_timeout, false, 0)?,
            mutating_skip_tls: build(mutating_timeout, connect_timeout, true, 0)?,
        })
    }

    pub fn client(&self, skip_tls: bool, mutating: bool) -> &ClientWithMiddleware {
        match (skip_tls, mutating) {
            (false, false) => &self.read,
            (true, false) => &self.read_skip_tls,
            (false, true) => &self.mutating,
            (true, true) => &self.mutating_skip_tls,
        }
    }

    /// GET and HEAD use the read class, everything else the mutating class.
    pub fn for_method(&self, method: &Method, skip_tls: bool) -> &ClientWithMiddleware {
        let mutating = !matches!(*method, Method::GET | Method::HEAD);
        self.client(skip_tls, mutating)
    }
}

fn build(
    timeout: Duration,
    connect_timeout: Duration,
    skip_tls: bool,
    retries: u32,
) -> anyhow::Result<ClientWithMiddleware> {
    let reqwest_client = reqwest::Client::builder()
        .use_rustls_tls()
        .danger_accept_invalid_certs(skip_tls)
        .pool_max_idle_per_host(6)
        .timeout(timeout)
        .connect_timeout(connect_timeout)
        .build()?;

    let builder = ClientBuilder::new(reqwest_client);
    let client = if retries > 0 {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(retries);
        builder
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    } else {
        builder.build()
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_selects_client_class() {
        let pool = HttpClientPool::new(&HttpClientConfig::default()).unwrap();
        assert!(std::ptr::eq(pool.for_method(&Method::GET, false), pool.client(false, false)));
        assert!(std::ptr::eq(pool.for_method(&Method::HEAD, true), pool.client(true, false)));
        assert!(std::ptr::eq(pool.for_method(&Method::POST, false), pool.client(false, true)));
        assert!(std::ptr::eq(pool.for_method(&Method::DELETE, true), pool.client(true, true)));
    }
}

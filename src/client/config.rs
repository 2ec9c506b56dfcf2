use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use super::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::{Error, Result};

/// Client configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server URL, e.g. `http://127.0.0.1:50051`.
    pub server_url: String,
    /// CA certificate (PEM) enabling TLS when set.
    pub ca_cert_path: Option<String>,
    /// Name checked against the server certificate.
    pub domain_name: Option<String>,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Deadline for each unary call, in milliseconds.
    pub request_timeout_ms: u64,
    /// Attempts per unary call, including the first.
    pub max_attempts: u32,
    /// Pause between attempts, in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:50051".to_string(),
            ca_cert_path: None,
            domain_name: None,
            username: "vector".to_string(),
            password: "abc123".to_string(),
            request_timeout_ms: 5_000,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from `.env` and `CLIENT_`-prefixed environment
    /// variables over the defaults (e.g. `CLIENT_SERVER_URL`,
    /// `CLIENT_MAX_ATTEMPTS`).
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        use figment::providers::{Env, Serialized};
        use figment::Figment;

        let _ = dotenvy::dotenv();

        Figment::from(Serialized::defaults(ClientConfig::default()))
            .merge(Env::prefixed("CLIENT_"))
            .extract()
    }

    /// Deadline applied to each unary call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Retry policy for unary calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    /// Builds a channel to the server, with TLS when a CA certificate is set.
    ///
    /// The connection is made on the first call, so an unreachable server
    /// shows up as `Unavailable` on that call.
    pub async fn connect(&self) -> Result<Channel> {
        let mut endpoint = Endpoint::from_shared(self.server_url.clone())
            .map_err(|e| Error::Config(format!("Invalid server URL {}: {e}", self.server_url)))?;

        if let Some(ca_path) = &self.ca_cert_path {
            let ca = tokio::fs::read(ca_path).await?;
            let mut tls = ClientTlsConfig::new().ca_certificate(Certificate::from_pem(ca));
            if let Some(domain) = &self.domain_name {
                tls = tls.domain_name(domain.clone());
            }
            endpoint = endpoint.tls_config(tls)?;
        }

        Ok(endpoint.connect_lazy())
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_target_local_server() {
        let config = ClientConfig::default();
        assert_eq!(config.server_url, "http://127.0.0.1:50051");
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert!(config.ca_cert_path.is_none());
    }

    #[test]
    fn env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("CLIENT_SERVER_URL", "https://lookup.internal:443");
            jail.set_env("CLIENT_MAX_ATTEMPTS", "2");

            let config = ClientConfig::from_env()?;
            assert_eq!(config.server_url, "https://lookup.internal:443");
            assert_eq!(config.retry_policy().max_attempts(), 2);
            assert_eq!(config.username, "vector");
            Ok(())
        });
    }

    #[tokio::test]
    async fn invalid_url_is_a_config_error() {
        let config = ClientConfig {
            server_url: "not a url".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(config.connect().await, Err(Error::Config(_))));
    }
}

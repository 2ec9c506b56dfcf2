use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tonic::transport::{Identity, ServerTlsConfig};

use crate::auth::{Credential, CredentialStore, TokenAuthority};
use crate::{Error, Result};

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname or IP address to bind to.
    pub host: String,
    /// Port number to listen on.
    pub port: u16,
    /// CSV file loaded into the record store at startup.
    pub data_file: String,
    /// Token signing and login users.
    pub auth: AuthSettings,
    /// Rate limiting configuration.
    pub rate_limit: RateLimitSettings,
    /// Metrics exporter configuration.
    pub metrics: MetricsSettings,
    /// TLS configuration.
    pub tls: TlsSettings,
}

impl ServerConfig {
    /// Converts host and port into a socket address.
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                Error::Config(format!(
                    "Invalid server address (host: {}, port: {}): {e}",
                    self.host, self.port
                ))
            })
    }
}

/// Token signing and the set of users allowed to log in.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Shared HMAC secret for signing tokens.
    pub secret: String,
    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,
    /// Users allowed to log in.
    pub users: Vec<UserSettings>,
}

/// One login user. Exactly one of `password` or `password_hash` is used;
/// `password_hash` wins when both are set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserSettings {
    /// Login name.
    pub username: String,
    /// Name carried in the token.
    pub display_name: String,
    /// Plaintext password, hashed at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Argon2 PHC string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
}

impl UserSettings {
    fn to_credential(&self) -> Result<Credential> {
        match (&self.password_hash, &self.password) {
            (Some(hash), _) => Credential::from_hash(&self.username, &self.display_name, hash),
            (None, Some(password)) => {
                Credential::new(&self.username, &self.display_name, password)
            }
            (None, None) => Err(Error::Config(format!(
                "User '{}' has neither password nor password_hash",
                self.username
            ))),
        }
    }
}

impl AuthSettings {
    /// Hashes or parses every configured user into a credential store.
    pub fn build_credentials(&self) -> Result<CredentialStore> {
        let credentials = self
            .users
            .iter()
            .map(UserSettings::to_credential)
            .collect::<Result<Vec<_>>>()?;
        CredentialStore::new(credentials)
    }

    /// Creates the token authority for the configured secret and lifetime.
    pub fn build_authority(&self) -> TokenAuthority {
        TokenAuthority::new(self.secret.as_bytes(), self.token_ttl())
    }

    /// Token lifetime.
    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            secret: "a1b2c3d".to_string(),
            token_ttl_secs: crate::auth::DEFAULT_TOKEN_TTL.as_secs(),
            users: vec![UserSettings {
                username: "vector".to_string(),
                display_name: "Vic Vector".to_string(),
                password: Some("abc123".to_string()),
                password_hash: None,
            }],
        }
    }
}

/// Rate limiting settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Sustained requests per minute across all clients.
    pub requests_per_minute: u64,
    /// Burst capacity for short-term spikes.
    pub burst: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 600,
            burst: 50,
        }
    }
}

/// Metrics exporter settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Whether metrics export is enabled.
    pub enabled: bool,
    /// Hostname or IP address for metrics server.
    pub host: String,
    /// Port number for metrics server.
    pub port: u16,
}

impl MetricsSettings {
    /// Converts host and port into a socket address for the metrics server.
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| {
                Error::Config(format!(
                    "Invalid metrics address (host: {}, port: {}): {e}",
                    self.host, self.port
                ))
            })
    }
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

/// TLS configuration settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Whether TLS is enabled.
    pub enabled: bool,
    /// Path to TLS certificate file (PEM format).
    pub cert_path: String,
    /// Path to TLS private key file (PEM format).
    pub key_path: String,
}

impl TlsSettings {
    /// Reads the certificate and key into a tonic TLS config, or `None` when
    /// TLS is disabled.
    pub fn load(&self) -> Result<Option<ServerTlsConfig>> {
        if !self.enabled {
            return Ok(None);
        }
        let cert = std::fs::read(&self.cert_path)?;
        let key = std::fs::read(&self.key_path)?;
        Ok(Some(
            ServerTlsConfig::new().identity(Identity::from_pem(cert, key)),
        ))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50051,
            data_file: "data/currencies.csv".to_string(),
            auth: AuthSettings::default(),
            rate_limit: RateLimitSettings::default(),
            metrics: MetricsSettings::default(),
            tls: TlsSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `.env`, a TOML file and environment variables.
    ///
    /// Priority (highest first):
    /// 1. Environment variables with `SERVER_` prefix; nested keys use `__`
    ///    (e.g. `SERVER_AUTH__SECRET`, `SERVER_RATE_LIMIT__BURST`)
    /// 2. TOML file at `SERVER_CONFIG_PATH`, default `config/server.toml`
    ///    (skipped when missing)
    /// 3. Built-in defaults
    ///
    /// # Environment Variable Examples
    /// ```bash
    /// SERVER_HOST=0.0.0.0
    /// SERVER_PORT=50051
    /// SERVER_DATA_FILE=data/currencies.csv
    /// SERVER_AUTH__SECRET=change-me
    /// SERVER_AUTH__TOKEN_TTL_SECS=3600
    /// SERVER_METRICS__ENABLED=true
    /// SERVER_TLS__ENABLED=true
    /// SERVER_TLS__CERT_PATH=/etc/certs/server.crt
    /// SERVER_TLS__KEY_PATH=/etc/certs/server.key
    /// ```
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> figment::error::Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("SERVER_CONFIG_PATH")
            .unwrap_or_else(|_| "config/server.toml".to_string());

        Self::figment(&config_path).extract()
    }

    /// Layered configuration sources for the given TOML path.
    pub fn figment(config_path: impl AsRef<Path>) -> figment::Figment {
        use figment::providers::{Env, Format, Serialized, Toml};
        use figment::Figment;

        Figment::from(Serialized::defaults(ServerConfig::default()))
            .merge(Toml::file(config_path.as_ref()))
            .merge(Env::prefixed("SERVER_").split("__"))
    }

    /// Validates the configuration before the server starts.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.auth.secret.is_empty() {
            return Err("Auth secret cannot be empty".to_string());
        }

        if self.auth.token_ttl_secs == 0 {
            return Err("Token TTL cannot be zero".to_string());
        }

        if self.auth.users.is_empty() {
            return Err("At least one login user must be configured".to_string());
        }

        for user in &self.auth.users {
            if user.username.is_empty() {
                return Err("Login user with empty username".to_string());
            }
            if user.password.is_none() && user.password_hash.is_none() {
                return Err(format!(
                    "User '{}' has neither password nor password_hash",
                    user.username
                ));
            }
        }

        if self.tls.enabled {
            if self.tls.cert_path.is_empty() {
                return Err("TLS is enabled but cert_path is empty".to_string());
            }
            if self.tls.key_path.is_empty() {
                return Err("TLS is enabled but key_path is empty".to_string());
            }
            if !Path::new(&self.tls.cert_path).exists() {
                return Err(format!(
                    "TLS certificate file does not exist: {}",
                    self.tls.cert_path
                ));
            }
            if !Path::new(&self.tls.key_path).exists() {
                return Err(format!(
                    "TLS key file does not exist: {}",
                    self.tls.key_path
                ));
            }
        }

        if self.rate_limit.requests_per_minute == 0 {
            return Err("Rate limit requests_per_minute cannot be zero".to_string());
        }

        if self.rate_limit.burst == 0 {
            return Err("Rate limit burst cannot be zero".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let config = ServerConfig::default();

        assert_eq!(config.port, 50051);
        assert_eq!(config.auth.secret, "a1b2c3d");
        assert_eq!(config.auth.token_ttl_secs, 15_000);
        assert_eq!(config.auth.users[0].username, "vector");
        assert!(config.validate().is_ok());
        assert_eq!(config.addr().unwrap().port(), 50051);
    }

    #[test]
    fn toml_and_env_layer_over_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "server.toml",
                r#"
                    port = 6000
                    data_file = "fixtures/rates.csv"

                    [auth]
                    secret = "from-file"

                    [[auth.users]]
                    username = "alice"
                    display_name = "Alice"
                    password = "pw"
                "#,
            )?;
            jail.set_env("SERVER_AUTH__SECRET", "from-env");
            jail.set_env("SERVER_RATE_LIMIT__BURST", "7");

            let config: ServerConfig = ServerConfig::figment("server.toml").extract()?;

            assert_eq!(config.port, 6000);
            assert_eq!(config.host, "127.0.0.1");
            assert_eq!(config.data_file, "fixtures/rates.csv");
            assert_eq!(config.auth.secret, "from-env");
            assert_eq!(config.auth.token_ttl_secs, 15_000);
            assert_eq!(config.auth.users.len(), 1);
            assert_eq!(config.auth.users[0].username, "alice");
            assert_eq!(config.rate_limit.burst, 7);
            Ok(())
        });
    }

    #[test]
    fn validate_rejects_empty_secret() {
        let mut config = ServerConfig::default();
        config.auth.secret.clear();
        assert!(config.validate().unwrap_err().contains("secret"));
    }

    #[test]
    fn validate_rejects_missing_tls_files() {
        let mut config = ServerConfig::default();
        config.tls = TlsSettings {
            enabled: true,
            cert_path: "/nonexistent/server.crt".to_string(),
            key_path: "/nonexistent/server.key".to_string(),
        };
        assert!(config.validate().unwrap_err().contains("does not exist"));
    }

    #[test]
    fn validate_rejects_zero_rate() {
        let mut config = ServerConfig::default();
        config.rate_limit.requests_per_minute = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn user_without_password_cannot_build_credentials() {
        let settings = AuthSettings {
            users: vec![UserSettings {
                username: "ghost".to_string(),
                display_name: "Ghost".to_string(),
                password: None,
                password_hash: None,
            }],
            ..AuthSettings::default()
        };
        assert!(matches!(
            settings.build_credentials(),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn default_user_can_log_in() {
        let store = AuthSettings::default().build_credentials().unwrap();
        assert!(store.authenticate("vector", "abc123").is_some());
    }

    #[test]
    fn disabled_tls_loads_nothing() {
        assert!(TlsSettings::default().load().unwrap().is_none());
    }
}

//! Server configuration.
//!
//! Deliberately plain data plus `Default`, separating "what can be
//! configured" from "how it's loaded" -- loading from the environment/CLI
//! is the binary crate's job, not the library's.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::origin::OriginPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub allow_client_publish: bool,
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub ping_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub ping_timeout: Duration,
    pub origins: String,
    pub app_name: String,
    pub path: String,
    pub middleware_emit_warnings: bool,
    /// Whether `#authenticate` is additionally routed through the `emit`
    /// stage before being honored.
    pub gate_authenticate: bool,
    pub auth_default_expiry_secs: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            allow_client_publish: true,
            ack_timeout: Duration::from_millis(10_000),
            ping_interval: Duration::from_millis(8_000),
            ping_timeout: Duration::from_millis(20_000),
            origins: "*:*".to_string(),
            app_name: uuid::Uuid::new_v4().to_string(),
            path: "/socketcluster/".to_string(),
            middleware_emit_warnings: true,
            gate_authenticate: false,
            auth_default_expiry_secs: 86_400,
        }
    }
}

impl ServerConfig {
    pub fn origin_policy(&self) -> OriginPolicy {
        OriginPolicy::parse(&self.origins)
    }
}

/// Symmetric vs. asymmetric signing key material. Mirrors the `authKey` /
/// `authPrivateKey`+`authPublicKey` configuration surface: specifying only
/// one half of an asymmetric pair is a fatal configuration error.
#[derive(Debug, Clone)]
pub enum AuthKeyConfig {
    Symmetric { key: Vec<u8> },
    Asymmetric { private_key: Vec<u8>, public_key: Vec<u8> },
}

impl AuthKeyConfig {
    pub fn symmetric_or_generated(auth_key: Option<Vec<u8>>) -> Self {
        match auth_key {
            Some(key) => AuthKeyConfig::Symmetric { key },
            None => {
                use rand::RngCore;
                let mut key = vec![0u8; 32];
                rand::thread_rng().fill_bytes(&mut key);
                AuthKeyConfig::Symmetric { key }
            }
        }
    }

    pub fn from_parts(
        auth_key: Option<Vec<u8>>,
        private_key: Option<Vec<u8>>,
        public_key: Option<Vec<u8>>,
    ) -> Result<Self, CoreError> {
        match (private_key, public_key) {
            (Some(private_key), Some(public_key)) => {
                Ok(AuthKeyConfig::Asymmetric { private_key, public_key })
            }
            (None, None) => Ok(Self::symmetric_or_generated(auth_key)),
            _ => Err(CoreError::AuthKeyConfigError(
                "authPrivateKey and authPublicKey must both be set, or neither".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = ServerConfig::default();
        assert!(config.allow_client_publish);
        assert_eq!(config.ack_timeout, Duration::from_millis(10_000));
        assert_eq!(config.ping_timeout, Duration::from_millis(20_000));
        assert_eq!(config.path, "/socketcluster/");
        assert!(!config.gate_authenticate);
        assert_eq!(config.auth_default_expiry_secs, 86_400);
    }

    #[test]
    fn lopsided_asymmetric_keys_are_a_config_error() {
        let result = AuthKeyConfig::from_parts(None, Some(vec![1]), None);
        assert!(matches!(result, Err(CoreError::AuthKeyConfigError(_))));
    }

    #[test]
    fn missing_auth_key_is_autogenerated() {
        let config = AuthKeyConfig::symmetric_or_generated(None);
        match config {
            AuthKeyConfig::Symmetric { key } => assert_eq!(key.len(), 32),
            _ => panic!("expected symmetric key"),
        }
    }
}

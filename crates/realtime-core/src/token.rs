//! Token service interface.
//!
//! The core never picks a token format; it only ever inspects `exp`. The
//! default JWT-backed implementation lives in the sibling `realtime-auth`
//! crate and plugs in here through [`TokenVerifier`] / [`TokenSigner`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;

/// A decoded token payload. The core only ever looks at `exp`; everything
/// else travels through as opaque claims for the application layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub claims: Value,
    pub exp: Option<i64>,
}

impl Token {
    pub fn new(claims: Value) -> Self {
        let exp = claims.get("exp").and_then(Value::as_i64);
        Self { claims, exp }
    }

    /// A token is expired iff `exp` is present and `exp * 1000 < now_ms`.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        match self.exp {
            Some(exp) => exp.saturating_mul(1000) < now_ms,
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp_millis())
    }
}

/// Verifies bearer tokens presented during handshake / `#authenticate`.
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    async fn verify_token(&self, signed: &str) -> Result<Token, CoreError>;
}

/// Signs tokens. Not exercised on the inbound hot path, but required for
/// a server that wants to mint tokens for clients (e.g. after a login
/// flow that hands a signed token back over a side channel).
#[async_trait]
pub trait TokenSigner: Send + Sync + 'static {
    async fn sign_token(&self, claims: Value, expiry_secs: Option<i64>) -> Result<String, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expired_token_classified_correctly() {
        let now_ms = 1_700_000_000_000_i64;
        let past = Token::new(json!({ "exp": (now_ms / 1000) - 1 }));
        assert!(past.is_expired_at(now_ms));

        let future = Token::new(json!({ "exp": (now_ms / 1000) + 3600 }));
        assert!(!future.is_expired_at(now_ms));
    }

    #[test]
    fn token_without_exp_never_expires() {
        let token = Token::new(json!({ "sub": "agent-1" }));
        assert!(!token.is_expired_at(i64::MAX));
    }
}

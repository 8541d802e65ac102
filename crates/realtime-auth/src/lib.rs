//! Default JWT-backed implementation of the core's token service.
//!
//! Deliberately narrow next to a full auth stack: no revocation list, no
//! refresh-token rotation, no session store -- the core only needs a
//! verifier that turns a signed string into claims plus an `exp`, and a
//! signer for minting tokens server-side. Expiry is intentionally *not*
//! enforced by `jsonwebtoken` itself; the core classifies expiry from the
//! decoded `exp` claim using its own `exp * 1000 < now_ms` rule so that an
//! expired token still decodes into a deauthenticate rather than a hard
//! decode failure.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;

use realtime_core::config::AuthKeyConfig;
use realtime_core::{CoreError, Token, TokenSigner, TokenVerifier};

pub struct JwtTokenService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    default_expiry_secs: i64,
}

impl JwtTokenService {
    pub fn new(key_config: AuthKeyConfig, default_expiry_secs: i64) -> Result<Self, CoreError> {
        let (algorithm, encoding_key, decoding_key) = match key_config {
            AuthKeyConfig::Symmetric { key } => (
                Algorithm::HS256,
                EncodingKey::from_secret(&key),
                DecodingKey::from_secret(&key),
            ),
            AuthKeyConfig::Asymmetric { private_key, public_key } => (
                Algorithm::RS256,
                EncodingKey::from_rsa_pem(&private_key)
                    .map_err(|e| CoreError::AuthKeyConfigError(format!("bad RSA private key: {e}")))?,
                DecodingKey::from_rsa_pem(&public_key)
                    .map_err(|e| CoreError::AuthKeyConfigError(format!("bad RSA public key: {e}")))?,
            ),
        };

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            default_expiry_secs,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        // The core, not this crate, decides what counts as expired.
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        validation
    }
}

#[async_trait::async_trait]
impl TokenVerifier for JwtTokenService {
    async fn verify_token(&self, signed: &str) -> Result<Token, CoreError> {
        let data = decode::<Value>(signed, &self.decoding_key, &self.validation()).map_err(map_jwt_error)?;
        Ok(Token::new(data.claims))
    }
}

#[async_trait::async_trait]
impl TokenSigner for JwtTokenService {
    async fn sign_token(&self, mut claims: Value, expiry_secs: Option<i64>) -> Result<String, CoreError> {
        let Value::Object(ref mut map) = claims else {
            return Err(CoreError::Internal("token claims must be a JSON object".into()));
        };
        let exp_secs = expiry_secs.unwrap_or(self.default_expiry_secs);
        let exp = chrono::Utc::now().timestamp() + exp_secs;
        map.insert("exp".to_string(), Value::from(exp));

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| CoreError::Internal(format!("failed to sign token: {e}")))
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> CoreError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience => CoreError::AuthTokenInvalid(err.to_string()),
        _ => CoreError::AuthTokenMalformed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service() -> JwtTokenService {
        let key_config = AuthKeyConfig::symmetric_or_generated(Some(b"test-signing-key-01234567".to_vec()));
        JwtTokenService::new(key_config, 86_400).unwrap()
    }

    #[tokio::test]
    async fn round_trips_claims_through_sign_and_verify() {
        let service = service();
        let signed = service.sign_token(json!({ "sub": "agent-1" }), None).await.unwrap();
        let token = service.verify_token(&signed).await.unwrap();
        assert_eq!(token.claims["sub"], "agent-1");
        assert!(!token.is_expired());
    }

    #[tokio::test]
    async fn already_expired_token_still_decodes_for_the_core_to_classify() {
        let service = service();
        let signed = service.sign_token(json!({ "sub": "agent-1" }), Some(-3600)).await.unwrap();
        let token = service.verify_token(&signed).await.unwrap();
        assert!(token.is_expired());
    }

    #[tokio::test]
    async fn tampered_signature_is_rejected() {
        let service = service();
        let mut signed = service.sign_token(json!({ "sub": "agent-1" }), None).await.unwrap();
        signed.push('x');
        let result = service.verify_token(&signed).await;
        assert!(matches!(result, Err(CoreError::AuthTokenInvalid(_)) | Err(CoreError::AuthTokenMalformed(_))));
    }

    #[tokio::test]
    async fn non_object_claims_are_rejected_at_sign_time() {
        let service = service();
        let result = service.sign_token(json!("not an object"), None).await;
        assert!(matches!(result, Err(CoreError::Internal(_))));
    }
}

//! JWT token generation and validation
//! Implements access token + refresh token pattern

use crate::{clock::Clock, config::AppConfig, error::AppError};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Token type carried in the claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Access => f.write_str("access"),
            TokenType::Refresh => f.write_str("refresh"),
        }
    }
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,

    /// User role
    pub role: String,

    /// Token type (access or refresh)
    pub token_type: TokenType,

    /// Issuer
    pub iss: String,

    /// Issued at
    pub iat: i64,

    /// Expiration
    pub exp: i64,

    /// JWT ID (unique token identifier)
    pub jti: String,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, TokenRejection> {
        self.sub.parse().map_err(|_| TokenRejection::Malformed)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Why a token was rejected
///
/// All variants surface as 401 at the HTTP boundary; the distinction is for logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenRejection {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token has expired")]
    Expired,

    #[error("expected {expected} token, got {actual}")]
    WrongType {
        expected: TokenType,
        actual: TokenType,
    },

    #[error("token has been blacklisted")]
    Blacklisted,

    #[error("token blacklist unavailable")]
    StoreUnavailable,
}

impl TokenRejection {
    /// Static label for logs and metrics
    pub fn reason(&self) -> &'static str {
        match self {
            TokenRejection::Malformed => "malformed",
            TokenRejection::InvalidSignature => "invalid_signature",
            TokenRejection::Expired => "expired",
            TokenRejection::WrongType { .. } => "wrong_type",
            TokenRejection::Blacklisted => "blacklisted",
            TokenRejection::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Token pair response
#[derive(Debug, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64, // seconds until access token expires
}

/// JWT service
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_token_exp_secs: u64,
    refresh_token_exp_secs: u64,
    clock: Arc<dyn Clock>,
}

impl JwtService {
    /// Create JWT service from config
    pub fn from_config(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Self, AppError> {
        let secret = config.security.jwt_secret.expose_secret();

        // Ensure secret is at least 32 bytes for HS256
        if secret.len() < 32 {
            return Err(AppError::Config("JWT secret too short (min 32 chars)".to_string()));
        }

        let encoding_key = EncodingKey::from_secret(secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(secret.as_bytes());

        // Expiry is checked against the injected clock, not inside jsonwebtoken
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_issuer(&[config.security.jwt_issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        Ok(Self {
            encoding_key,
            decoding_key,
            validation,
            issuer: config.security.jwt_issuer.clone(),
            access_token_exp_secs: config.security.access_token_exp_secs,
            refresh_token_exp_secs: config.security.refresh_token_exp_secs,
            clock,
        })
    }

    /// Sign a token of the given type, returning the token and its claims
    pub fn issue(
        &self,
        user_id: i64,
        role: &str,
        token_type: TokenType,
    ) -> Result<(String, Claims), AppError> {
        let now = self.clock.now();
        let lifetime = match token_type {
            TokenType::Access => self.access_token_exp_secs,
            TokenType::Refresh => self.refresh_token_exp_secs,
        };
        let expiration = now + Duration::seconds(lifetime as i64);

        let claims = Claims {
            sub: user_id.to_string(),
            role: role.to_string(),
            token_type,
            iss: self.issuer.clone(),
            iat: now.timestamp(),
            exp: expiration.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            tracing::error!("Failed to encode {} token: {:?}", token_type, e);
            AppError::Internal(format!("Failed to encode {} token: {}", token_type, e))
        })?;

        Ok((token, claims))
    }

    /// Generate access token
    pub fn generate_access_token(&self, user_id: i64, role: &str) -> Result<String, AppError> {
        self.issue(user_id, role, TokenType::Access).map(|(token, _)| token)
    }

    /// Generate refresh token
    pub fn generate_refresh_token(&self, user_id: i64, role: &str) -> Result<String, AppError> {
        self.issue(user_id, role, TokenType::Refresh).map(|(token, _)| token)
    }

    /// Generate token pair
    pub fn generate_token_pair(&self, user_id: i64, role: &str) -> Result<TokenPair, AppError> {
        let access_token = self.generate_access_token(user_id, role)?;

        let refresh_token = self.generate_refresh_token(user_id, role)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_token_exp_secs,
        })
    }

    /// Verify signature and issuer only; expiry is not checked
    pub fn decode(&self, token: &str) -> Result<Claims, TokenRejection> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature
                | ErrorKind::InvalidAlgorithm
                | ErrorKind::InvalidIssuer => TokenRejection::InvalidSignature,
                _ => TokenRejection::Malformed,
            })
    }

    /// Validate signature, issuer and expiry
    pub fn validate_token(&self, token: &str) -> Result<Claims, TokenRejection> {
        let claims = self.decode(token)?;

        if claims.exp < self.clock.now().timestamp() {
            return Err(TokenRejection::Expired);
        }

        Ok(claims)
    }

    /// Validate a token and require a specific type
    pub fn validate_typed(&self, token: &str, expected: TokenType) -> Result<Claims, TokenRejection> {
        let claims = self.validate_token(token)?;

        if claims.token_type != expected {
            return Err(TokenRejection::WrongType {
                expected,
                actual: claims.token_type,
            });
        }

        Ok(claims)
    }

    /// Validate access token specifically
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenRejection> {
        self.validate_typed(token, TokenType::Access)
    }

    /// Validate refresh token specifically
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, TokenRejection> {
        self.validate_typed(token, TokenType::Refresh)
    }

    pub fn access_token_exp_secs(&self) -> u64 {
        self.access_token_exp_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::test_config;
    use secrecy::Secret;

    fn service_with_clock() -> (JwtService, ManualClock) {
        let clock = ManualClock::new(Utc::now());
        let service = JwtService::from_config(&test_config(), Arc::new(clock.clone())).unwrap();
        (service, clock)
    }

    #[test]
    fn test_generate_and_validate_access_token() {
        let (service, _clock) = service_with_clock();

        let token = service.generate_access_token(42, "admin").unwrap();

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.token_type, TokenType::Access);
        assert!(claims.is_admin());
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn test_generate_and_validate_refresh_token() {
        let (service, _clock) = service_with_clock();

        let token = service.generate_refresh_token(7, "user").unwrap();

        let claims = service.validate_refresh_token(&token).unwrap();
        assert_eq!(claims.sub, "7");
        assert_eq!(claims.token_type, TokenType::Refresh);
    }

    #[test]
    fn test_token_type_validation() {
        let (service, _clock) = service_with_clock();

        let access_token = service.generate_access_token(1, "user").unwrap();

        // Should fail: trying to validate access token as refresh token
        assert!(matches!(
            service.validate_refresh_token(&access_token),
            Err(TokenRejection::WrongType { .. })
        ));

        let refresh_token = service.generate_refresh_token(1, "user").unwrap();

        // Should fail: trying to validate refresh token as access token
        assert!(service.validate_access_token(&refresh_token).is_err());
    }

    #[test]
    fn test_invalid_token_fails() {
        let (service, _clock) = service_with_clock();
        assert_eq!(
            service.validate_access_token("invalid_token"),
            Err(TokenRejection::Malformed)
        );
    }

    #[test]
    fn test_expired_token_uses_clock() {
        let (service, clock) = service_with_clock();
        let token = service.generate_access_token(1, "user").unwrap();

        clock.advance(Duration::seconds(899));
        assert!(service.validate_access_token(&token).is_ok());

        clock.advance(Duration::seconds(2));
        assert_eq!(service.validate_access_token(&token), Err(TokenRejection::Expired));

        // Signature still verifies without the expiry check
        assert!(service.decode(&token).is_ok());
    }

    #[test]
    fn test_foreign_secret_rejected_as_bad_signature() {
        let (service, _clock) = service_with_clock();

        let mut other_config = test_config();
        other_config.security.jwt_secret =
            Secret::new("another_secret_key_that_is_32_chars!!".to_string());
        let other = JwtService::from_config(&other_config, Arc::new(crate::clock::SystemClock)).unwrap();

        let token = other.generate_access_token(1, "user").unwrap();
        assert_eq!(
            service.validate_access_token(&token),
            Err(TokenRejection::InvalidSignature)
        );
    }

    #[test]
    fn test_short_secret_rejected() {
        let mut config = test_config();
        config.security.jwt_secret = Secret::new("short".to_string());
        assert!(JwtService::from_config(&config, Arc::new(crate::clock::SystemClock)).is_err());
    }
}

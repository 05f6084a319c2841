//! Access token codec.
//!
//! Access tokens are HS256 JWTs carrying `{user_id, role_id, group_id, exp}`.
//! They are stateless: verification needs only the shared secret and the
//! clock.

use std::fmt;

use chrono::{Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, decode_header, encode,
};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::error::{AuthError, AuthResult};
use crate::config::AuthConfig;
use crate::types::RefreshToken;

/// Largest magnitude a float can carry while still representing every integer.
const MAX_SAFE_FLOAT_INT: f64 = 9_007_199_254_740_992.0;

/// Identity claims embedded in an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    #[serde(deserialize_with = "integer_claim")]
    pub user_id: i64,
    #[serde(deserialize_with = "integer_claim")]
    pub role_id: i64,
    #[serde(deserialize_with = "integer_claim")]
    pub group_id: i64,
    /// Expiry, unix seconds
    #[serde(deserialize_with = "integer_claim")]
    pub exp: i64,
}

impl AccessClaims {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }
}

/// Response payload of sign-in and refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: RefreshToken,
}

/// Reads a numeric claim as `i64`.
///
/// Some JWT producers emit every number as a float. Integral floats inside
/// the exactly representable range are accepted; anything else is rejected.
fn integer_claim<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct IntegerClaim;

    impl Visitor<'_> for IntegerClaim {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer claim")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom(format!("claim out of range: {}", v)))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            if v.is_finite() && v.fract() == 0.0 && v.abs() <= MAX_SAFE_FLOAT_INT {
                Ok(v as i64)
            } else {
                Err(E::custom(format!("claim is not an exact integer: {}", v)))
            }
        }
    }

    deserializer.deserialize_any(IntegerClaim)
}

/// Signs and verifies access tokens with a process-wide HMAC secret.
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_lifetime: Duration,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("keys", &"<redacted>")
            .field("access_lifetime", &self.access_lifetime)
            .finish()
    }
}

impl TokenCodec {
    pub fn new(secret: &[u8], access_lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_lifetime,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.jwt_secret.as_bytes(), config.access_lifetime())
    }

    pub fn access_lifetime(&self) -> Duration {
        self.access_lifetime
    }

    /// Mint an access token expiring `access_lifetime` from now.
    pub fn mint(&self, user_id: i64, role_id: i64, group_id: i64) -> AuthResult<String> {
        let exp = (Utc::now() + self.access_lifetime).timestamp();
        self.sign(&AccessClaims {
            user_id,
            role_id,
            group_id,
            exp,
        })
    }

    /// Sign an arbitrary claim set.
    pub fn sign(&self, claims: &AccessClaims) -> AuthResult<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("token signing failed: {}", e)))
    }

    /// Verify signature and expiry.
    ///
    /// Only HS256 is accepted. The header algorithm is checked before any
    /// key is touched, so `none` and asymmetric algorithms are refused
    /// outright. Expiry is checked after the signature so a forged token is
    /// never reported as merely expired.
    pub fn verify(&self, token: &str) -> AuthResult<AccessClaims> {
        let header = decode_header(token).map_err(|e| {
            debug!("Rejecting token with unreadable header: {}", e);
            AuthError::InvalidToken
        })?;
        if header.alg != Algorithm::HS256 {
            debug!("Rejecting token signed with {:?}", header.alg);
            return Err(AuthError::InvalidToken);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp"]);

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            debug!("Token verification failed: {}", e);
            AuthError::InvalidToken
        })?;

        let claims = data.claims;
        if claims.is_expired_at(Utc::now().timestamp()) {
            return Err(AuthError::TokenExpired);
        }
        Ok(claims)
    }
}

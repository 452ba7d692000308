use std::str::FromStr;
use std::time::Duration;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stocksync;
use crate::time::Timestamp;

/// The credential half of an `Authorization` header: whatever follows the
/// scheme word, e.g. `Bearer <token>`.
#[derive(Debug, PartialEq, Eq)]
pub struct BearerToken(String);

impl FromStr for BearerToken {
    type Err = &'static str;

    fn from_str(header: &str) -> Result<Self, Self::Err> {
        let token = header
            .split_whitespace()
            .nth(1)
            .ok_or("no token in auth header")?;

        Ok(Self(token.into()))
    }
}

impl BearerToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Account id
    pub sub: String,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

/// Who a verified token was issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
}

/// Signs and checks session tokens (HS256) under the server secret.
pub struct Tokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl Tokens {
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 30;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    pub fn issue(&self, id: Uuid, username: &str) -> stocksync::Result<String> {
        let now = Timestamp::now().unix();
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);

        self.sign(&Claims {
            sub: id.to_string(),
            username: username.into(),
            iat: now,
            exp: now.saturating_add(ttl),
        })
    }

    pub(crate) fn sign(&self, claims: &Claims) -> stocksync::Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key).map_err(|e| {
            error!("couldn't sign token for {}: {e:?}", claims.username);
            stocksync::Error::Internal(e.to_string())
        })
    }

    /// Returns who the token was issued for. Every failure, bad signature
    /// or expiry included, is just `Unauthorized`.
    pub fn verify(&self, token: &BearerToken) -> stocksync::Result<Identity> {
        let data = decode::<Claims>(token.as_str(), &self.decoding_key, &self.validation)
            .map_err(|e| {
                debug!("rejecting token: {e}");
                stocksync::Error::Unauthorized
            })?;

        let Claims { sub, username, .. } = data.claims;
        let id = Uuid::parse_str(&sub).map_err(|e| {
            debug!("rejecting token with bad subject: {e}");
            stocksync::Error::Unauthorized
        })?;

        Ok(Identity { id, username })
    }
}

pub fn hash_password(password: &str) -> stocksync::Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| {
            error!("password hashing failed: {e}");
            stocksync::Error::Internal(e.to_string())
        })
}

pub fn verify_password(password: &str, pwhash: &str) -> bool {
    let parsed = match PasswordHash::new(pwhash) {
        Ok(parsed) => parsed,
        Err(e) => {
            error!("invalid stored password hash: {e}");
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

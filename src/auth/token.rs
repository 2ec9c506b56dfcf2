use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tonic::Status;

use super::credentials::Credential;
use crate::{Error, Result};

/// Value of the `iss` claim on every issued token.
pub const ISSUER: &str = "authservice";

/// Value of the `aud` claim on every issued token.
pub const AUDIENCE: &str = "user";

/// Default lifetime of an issued token.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(15_000);

const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Header of a token as sent, before the algorithm is known to be supported.
#[derive(Deserialize)]
struct RawHeader {
    alg: String,
}

/// Claims carried by a bearer token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject - the username that logged in.
    pub sub: String,
    /// Issuer - always [`ISSUER`].
    pub iss: String,
    /// Audience - always [`AUDIENCE`].
    pub aud: String,
    /// Expiration time (seconds since epoch).
    pub exp: u64,
    /// Issued at (seconds since epoch).
    pub iat: u64,
    /// Display name of the subject.
    pub name: String,
}

/// Reasons a presented token is refused.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// No token was attached to the call.
    #[error("missing authorization token")]
    Missing,

    /// The header names an algorithm other than HS256.
    #[error("unexpected signing algorithm: {0}")]
    UnexpectedAlgorithm(String),

    /// The `exp` claim is in the past.
    #[error("token expired")]
    Expired,

    /// The signature does not match the shared secret.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Issuer, audience or a required claim is wrong.
    #[error("invalid token claims: {0}")]
    InvalidClaims(String),

    /// The token cannot be decoded at all.
    #[error("malformed token: {0}")]
    Malformed(String),
}

impl From<TokenError> for Status {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::UnexpectedAlgorithm(_) => Status::internal(err.to_string()),
            _ => Status::unauthenticated(err.to_string()),
        }
    }
}

/// Signs and verifies HS256 bearer tokens with one shared secret.
///
/// Holds no per-token state: a token is valid exactly when its signature
/// checks out and it has not expired.
pub struct TokenAuthority {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenAuthority {
    /// Creates an authority for `secret` issuing tokens that live for `ttl`.
    pub fn new(secret: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(&[ISSUER]);
        validation.set_audience(&[AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            ttl,
        }
    }

    /// Lifetime given to newly issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a token for a verified credential.
    pub fn issue(&self, credential: &Credential) -> Result<String> {
        let now = unix_now();
        let claims = Claims {
            sub: credential.username().to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            exp: now.saturating_add(self.ttl.as_secs()),
            iat: now,
            name: credential.display_name().to_string(),
        };
        self.sign(&claims)
    }

    /// Signs arbitrary claims.
    pub fn sign(&self, claims: &Claims) -> Result<String> {
        encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding)
            .map_err(|e| Error::TokenSigning(e.to_string()))
    }

    /// Verifies algorithm, signature, expiry, issuer and audience.
    pub fn verify(&self, token: &str) -> std::result::Result<Claims, TokenError> {
        let alg = header_algorithm(token)?;
        if alg != "HS256" {
            return Err(TokenError::UnexpectedAlgorithm(alg));
        }

        let header = decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(TokenError::UnexpectedAlgorithm(format!("{:?}", header.alg)));
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                ErrorKind::InvalidAlgorithm => {
                    TokenError::UnexpectedAlgorithm(format!("{:?}", header.alg))
                }
                ErrorKind::InvalidIssuer
                | ErrorKind::InvalidAudience
                | ErrorKind::InvalidSubject
                | ErrorKind::ImmatureSignature
                | ErrorKind::MissingRequiredClaim(_) => TokenError::InvalidClaims(e.to_string()),
                _ => TokenError::Malformed(e.to_string()),
            }
        })?;

        Ok(data.claims)
    }
}

/// Reads `alg` from the header segment, including values such as `none`
/// that the typed header cannot represent.
fn header_algorithm(token: &str) -> std::result::Result<String, TokenError> {
    let segment = token
        .split('.')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| TokenError::Malformed("missing header".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| TokenError::Malformed(format!("header is not base64url: {e}")))?;
    let header: RawHeader = serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("header is not JSON: {e}")))?;
    Ok(header.alg)
}

/// Seconds since the UNIX epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| unreachable!("System time is after UNIX_EPOCH"))
        .as_secs()
}

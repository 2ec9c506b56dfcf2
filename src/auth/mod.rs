//! Credentials and bearer tokens.
//!
//! - **credentials**: Argon2-hashed username/password pairs
//! - **token**: HS256 token issuing and verification

/// Password hashing and the login user set.
pub mod credentials;
/// Bearer token claims, signing and verification.
pub mod token;

pub use credentials::{hash_password, Credential, CredentialStore};
pub use token::{Claims, TokenAuthority, TokenError, AUDIENCE, DEFAULT_TOKEN_TTL, ISSUER};

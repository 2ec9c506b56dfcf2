use std::collections::HashMap;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;

use crate::{Error, Result};

/// Hashes `password` with Argon2id and a fresh random salt.
///
/// Returns the PHC string form (`$argon2id$v=19$...`).
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| Error::PasswordHash(format!("Salt encoding failed: {e}")))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::PasswordHash(e.to_string()))?;

    Ok(hash.to_string())
}

/// A username with its display name and password hash.
#[derive(Clone)]
pub struct Credential {
    username: String,
    display_name: String,
    password_hash: String,
}

impl Credential {
    /// Creates a credential by hashing a plaintext password.
    pub fn new(
        username: impl Into<String>,
        display_name: impl Into<String>,
        password: &str,
    ) -> Result<Self> {
        Self::from_hash(username, display_name, hash_password(password)?)
    }

    /// Creates a credential from an existing PHC hash string.
    pub fn from_hash(
        username: impl Into<String>,
        display_name: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Result<Self> {
        let password_hash = password_hash.into();
        PasswordHash::new(&password_hash)
            .map_err(|e| Error::PasswordHash(format!("Unreadable password hash: {e}")))?;

        Ok(Self {
            username: username.into(),
            display_name: display_name.into(),
            password_hash,
        })
    }

    /// Login name, used as the token subject.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Human-readable name, carried in the token's `name` claim.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Checks `password` against the stored hash.
    pub fn verify(&self, password: &str) -> bool {
        match PasswordHash::new(&self.password_hash) {
            Ok(parsed) => Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

/// The set of users allowed to log in.
///
/// Unknown usernames are checked against a decoy hash, so a failed login
/// costs one Argon2 verification whether or not the user exists.
#[derive(Clone, Debug)]
pub struct CredentialStore {
    users: HashMap<String, Credential>,
    decoy: Credential,
}

impl CredentialStore {
    /// Builds a store from the given credentials. Later duplicates replace
    /// earlier ones.
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Result<Self> {
        let users = credentials
            .into_iter()
            .map(|credential| (credential.username.clone(), credential))
            .collect();

        Ok(Self {
            users,
            decoy: Credential::new("", "", "decoy-password")?,
        })
    }

    /// Returns the matching credential if `password` is correct.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<&Credential> {
        match self.users.get(username) {
            Some(credential) => credential.verify(password).then_some(credential),
            None => {
                let _ = self.decoy.verify(password);
                None
            }
        }
    }

    /// Number of known users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Returns true if no user can log in.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

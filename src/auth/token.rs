//! Secret and token construction.
//!
//! A secret is 32 random bytes held by the server. A token is a capability
//! derived from it: 4 bytes of salt followed by the SHA-224 digest of
//! `secret || salt || key`. Tokens are stateless — the server never stores
//! them, it just recomputes the digest at verification time. A token minted
//! for a `/`-terminated key acts as a prefix token for everything below it.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha224};
use thiserror::Error;

use crate::key::key_prefixes;

const SECRET_PREFIX: &str = "s1:";
const TOKEN_PREFIX: &str = "t1:";

/// `s1:`/`t1:` + base64url(no pad) of 32 bytes.
const TEXT_LEN: usize = 46;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error(
        "Please set ARTISTORE_SECRET environment variable.\n\
         You can generate this value using 'artistore secret' command.\n\
         \n\
         $ export ARTISTORE_SECRET=$(artistore secret)"
    )]
    SecretNotSet,

    #[error("Invalid secret.")]
    InvalidSecret,

    #[error("Invalid token.")]
    InvalidToken,

    #[error("Invalid secret: it seems to be a client token.")]
    SeemsToken,

    #[error("Invalid token: it seems to be a server secret.")]
    SeemsSecret,
}

/// Server-side signing secret.
#[derive(Clone)]
pub struct Secret([u8; 32]);

impl Secret {
    /// Generate a fresh secret from the OS CSPRNG.
    pub fn generate() -> Secret {
        Secret(rand::rng().random())
    }

    pub fn parse(raw: &str) -> Result<Secret, AuthError> {
        if raw.starts_with(TOKEN_PREFIX) {
            return Err(AuthError::SeemsToken);
        }
        if raw.len() != TEXT_LEN || !raw.starts_with(SECRET_PREFIX) {
            return Err(AuthError::InvalidSecret);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(&raw[SECRET_PREFIX.len()..])
            .map_err(|_| AuthError::InvalidSecret)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| AuthError::InvalidSecret)?;

        Ok(Secret(bytes))
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SECRET_PREFIX, URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Bearer token: salt (4 bytes) followed by the 28-byte digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token([u8; 32]);

impl Token {
    /// Mint a token for `key` with an explicit salt.
    pub fn with_salt(secret: &Secret, key: &str, salt: [u8; 4]) -> Token {
        let mut hasher = Sha224::new();
        hasher.update(secret.0);
        hasher.update(salt);
        hasher.update(key.as_bytes());

        let mut buf = [0u8; 32];
        buf[..4].copy_from_slice(&salt);
        buf[4..].copy_from_slice(&hasher.finalize());
        Token(buf)
    }

    /// Mint a token for `key` with a random salt.
    pub fn for_key(secret: &Secret, key: &str) -> Token {
        Token::with_salt(secret, key, rand::rng().random())
    }

    pub fn parse(raw: &str) -> Result<Token, AuthError> {
        if raw.starts_with(SECRET_PREFIX) {
            return Err(AuthError::SeemsSecret);
        }
        if raw.len() != TEXT_LEN || !raw.starts_with(TOKEN_PREFIX) {
            return Err(AuthError::InvalidToken);
        }

        let bytes = URL_SAFE_NO_PAD
            .decode(&raw[TOKEN_PREFIX.len()..])
            .map_err(|_| AuthError::InvalidToken)?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| AuthError::InvalidToken)?;

        Ok(Token(bytes))
    }

    fn salt(&self) -> [u8; 4] {
        let mut salt = [0u8; 4];
        salt.copy_from_slice(&self.0[..4]);
        salt
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(self.0))
    }
}

/// Check `token` against `key`: the token must have been minted for the key
/// itself or for one of its `/`-terminated prefixes.
pub fn is_correct_token(secret: &Secret, token: &Token, key: &str) -> bool {
    let salt = token.salt();

    if constant_time_eq(&Token::with_salt(secret, key, salt).0, &token.0) {
        return true;
    }

    key_prefixes(key)
        .iter()
        .any(|prefix| constant_time_eq(&Token::with_salt(secret, prefix, salt).0, &token.0))
}

/// Constant-time byte comparison to avoid timing side-channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

//! Artifact key validation and prefix enumeration.
//!
//! Keys are opaque strings; internal slashes are only meaningful to the
//! token prefix mechanism (a token minted for `a/b/` authorizes any key
//! under that prefix).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid key: can not use empty key.")]
    Empty,

    #[error("Invalid key: slash can not be the first or the last character of key.")]
    EdgeSlash,

    #[error("Invalid key: this key contains invalid character.")]
    InvalidChar,
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-._~!$&'()*+,;=:@%/".contains(c)
}

/// Validate a key for artifact operations.
pub fn verify_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }

    if key.starts_with('/') || key.ends_with('/') {
        return Err(KeyError::EdgeSlash);
    }

    if !key.chars().all(is_key_char) {
        return Err(KeyError::InvalidChar);
    }

    Ok(())
}

/// Validate a key for token minting, where a single trailing slash is
/// allowed and denotes a prefix token.
pub fn verify_token_key(key: &str) -> Result<(), KeyError> {
    match key.strip_suffix('/') {
        Some(rest) => verify_key(rest),
        None => verify_key(key),
    }
}

/// Every `/`-terminated prefix of `key`, longest first.
///
/// `a/b/c/d` yields `["a/b/c/", "a/b/", "a/"]`; a slashless key yields
/// nothing.
pub fn key_prefixes(key: &str) -> Vec<String> {
    if !key.contains('/') {
        return Vec::new();
    }

    let parts: Vec<&str> = key.split('/').collect();
    let mut results = Vec::with_capacity(parts.len() - 1);

    let mut prefix = String::new();
    for part in &parts[..parts.len() - 1] {
        prefix.push_str(part);
        prefix.push('/');
        results.push(prefix.clone());
    }

    results.reverse();
    results
}

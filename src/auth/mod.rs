//! Credentials: server secrets and the bearer tokens minted from them.

mod token;

pub use token::{is_correct_token, AuthError, Secret, Token};

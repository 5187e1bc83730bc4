//! Bearer-token identity.
//!
//! Editing a profile requires a token the operator issued to a known email
//! address. Tokens are compared in constant time.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or missing credentials")]
    Unauthorized,
}

/// Maps a bearer token to the verified email address behind it.
///
/// The reference implementation is a static token table from the config
/// file; an OAuth/OIDC verifier would implement the same trait.
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token to a lowercase email address.
    fn verify(&self, token: &str) -> Result<String, AuthError>;
}

/// Identity provider backed by the `auth.tokens` config table.
pub struct StaticTokenProvider {
    tokens: HashMap<String, String>,
}

impl StaticTokenProvider {
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: entries
                .into_iter()
                .map(|(token, email)| (token, email.to_lowercase()))
                .collect(),
        }
    }
}

impl IdentityProvider for StaticTokenProvider {
    fn verify(&self, token: &str) -> Result<String, AuthError> {
        // walk the whole table even after a hit, so response time doesn't
        // leak which token matched
        let mut found: Option<&str> = None;
        for (expected, email) in &self.tokens {
            if validate_token(token, expected) {
                found = Some(email);
            }
        }

        found.map(String::from).ok_or(AuthError::Unauthorized)
    }
}

/// Constant-time token comparison. Empty tokens are never valid.
pub fn validate_token(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();

    if provided.is_empty() || expected.is_empty() {
        return false;
    }

    let len_match = provided.len() == expected.len();

    // XOR accumulator: non-zero iff any compared byte differs
    let mut diff: u8 = 0;
    for (a, b) in provided.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }

    len_match && diff == 0
}

/// Extract the token from an `Authorization: Bearer <token>` header value.
/// The scheme is matched case-insensitively per RFC 6750.
pub fn extract_bearer_token(header: &str) -> Option<&str> {
    let header = header.trim();

    if header.len() < 7 {
        return None;
    }

    let (prefix, token) = header.split_at(7);
    if prefix.eq_ignore_ascii_case("Bearer ") {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    } else {
        None
    }
}

use axum::http::HeaderValue;
use sha2::{Digest, Sha256};

/// Bearer-token check. Tokens are compared by SHA-256 digest so the
/// comparison does not depend on where the first differing byte is.
#[derive(Clone)]
pub struct BearerAuth {
    expected: Option<[u8; 32]>,
}

impl std::fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuth")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl BearerAuth {
    /// `None` (or a blank token) disables authentication.
    pub fn new(token: Option<&str>) -> Self {
        let expected = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(digest);
        Self { expected }
    }

    pub fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    /// Whether an `Authorization` header value grants access.
    pub fn verify(&self, header: Option<&HeaderValue>) -> bool {
        let Some(expected) = self.expected else {
            return true;
        };
        let Some(presented) = header
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer)
        else {
            return false;
        };

        let presented = digest(presented);
        presented
            .iter()
            .zip(expected.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn parse_bearer(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

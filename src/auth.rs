use hmac::{Hmac, Mac};
use sha1::Sha1;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::AuthError;

type HmacSha1 = Hmac<Sha1>;

const SIGNATURE_PREFIX: &str = "sha1=";

/// Verifies hook signatures against the per-branch secrets loaded at startup
#[derive(Debug, Clone, Default)]
pub struct Authenticator {
    tokens: HashMap<String, String>,
}

impl Authenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    /// Number of branches with a configured secret
    pub fn branch_count(&self) -> usize {
        self.tokens.len()
    }

    /// Check `signature` (the raw `X-Hub-Signature` header) over `body`
    /// using the secret registered for `branch`.
    pub fn authenticate(
        &self,
        branch: &str,
        signature: Option<&str>,
        body: &[u8],
    ) -> Result<(), AuthError> {
        let signature = signature.ok_or(AuthError::SignatureMissing)?;

        let secret = self.tokens.get(branch).ok_or_else(|| {
            warn!("No token configured for branch '{}'", branch);
            AuthError::NoTokenForBranch(branch.to_string())
        })?;

        let provided = decode_signature(signature).ok_or_else(|| {
            debug!("Signature header is not of the form sha1=<hex>");
            AuthError::SignatureMismatch
        })?;

        let mut mac = new_mac(secret);
        mac.update(body);
        // verify_slice compares in constant time
        mac.verify_slice(&provided)
            .map_err(|_| AuthError::SignatureMismatch)
    }
}

/// `sha1=` followed by the lowercase hex HMAC-SHA1 of `body` keyed by `secret`
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(body);
    format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    )
}

fn new_mac(secret: &str) -> HmacSha1 {
    match HmacSha1::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

/// Only the canonical lowercase encoding is accepted, so two different header
/// values never authenticate the same body.
fn decode_signature(header: &str) -> Option<Vec<u8>> {
    let hex_part = header.strip_prefix(SIGNATURE_PREFIX)?;
    let bytes = hex::decode(hex_part).ok()?;
    if hex::encode(&bytes) != hex_part {
        return None;
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"ref":"refs/heads/master","repository":{"name":"test-repo"}}"#;

    fn authenticator() -> Authenticator {
        Authenticator::new(HashMap::from([(
            "master".to_string(),
            "s3cr3t".to_string(),
        )]))
    }

    #[test]
    fn compute_signature_matches_known_vector() {
        // RFC 2202 test case 2
        assert_eq!(
            compute_signature("Jefe", b"what do ya want for nothing?"),
            "sha1=effcdf6ae5eb2fa2d27416d5f184df9c259a7c79"
        );
    }

    #[test]
    fn correct_signature_authenticates() {
        let signature = compute_signature("s3cr3t", BODY);
        assert_eq!(
            authenticator().authenticate("master", Some(&signature), BODY),
            Ok(())
        );
    }

    #[test]
    fn flipping_any_signature_byte_fails() {
        let auth = authenticator();
        let signature = compute_signature("s3cr3t", BODY);
        for i in 0..signature.len() {
            let mut bytes = signature.clone().into_bytes();
            bytes[i] ^= 0x01;
            let tampered = String::from_utf8(bytes).expect("ascii stays ascii");
            assert_eq!(
                auth.authenticate("master", Some(&tampered), BODY),
                Err(AuthError::SignatureMismatch),
                "byte {} flipped",
                i
            );
        }
    }

    #[test]
    fn flipping_any_body_byte_fails() {
        let auth = authenticator();
        let signature = compute_signature("s3cr3t", BODY);
        for i in 0..BODY.len() {
            let mut body = BODY.to_vec();
            body[i] ^= 0x01;
            assert_eq!(
                auth.authenticate("master", Some(&signature), &body),
                Err(AuthError::SignatureMismatch)
            );
        }
    }

    #[test]
    fn wrong_secret_fails() {
        let signature = compute_signature("bogus token", BODY);
        assert_eq!(
            authenticator().authenticate("master", Some(&signature), BODY),
            Err(AuthError::SignatureMismatch)
        );
    }

    #[test]
    fn missing_signature_is_checked_before_lookup() {
        assert_eq!(
            authenticator().authenticate("deploy", None, BODY),
            Err(AuthError::SignatureMissing)
        );
    }

    #[test]
    fn unknown_branch_has_no_token() {
        let signature = compute_signature("s3cr3t", BODY);
        let err = authenticator()
            .authenticate("deploy", Some(&signature), BODY)
            .unwrap_err();
        assert_eq!(err, AuthError::NoTokenForBranch("deploy".to_string()));
        assert_eq!(err.to_string(), "No token configured for deploy");
    }

    #[test]
    fn uppercase_hex_is_rejected() {
        let signature = compute_signature("s3cr3t", BODY).to_uppercase();
        let signature = signature.replacen("SHA1=", "sha1=", 1);
        assert_eq!(
            authenticator().authenticate("master", Some(&signature), BODY),
            Err(AuthError::SignatureMismatch)
        );
    }
}

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Generate a Meta-style webhook signature header value.
///
/// Format: `sha256=<hex(HMAC-SHA256(body, secret))>`
pub fn generate_meta_signature(secret: &str, body: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(body);
    let result = mac.finalize();

    Ok(format!("sha256={}", hex::encode(result.into_bytes())))
}

/// Verify an `x-hub-signature-256` header against the raw request body.
///
/// Constant-time comparison; an absent or malformed header never matches.
pub fn verify_meta_signature(secret: &str, body: &[u8], signature: Option<&str>) -> bool {
    let Some(signature) = signature else {
        return false;
    };

    if secret.is_empty() || !signature.starts_with("sha256=") {
        return false;
    }

    let expected = match generate_meta_signature(secret, body) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return false;
    }

    expected_bytes.ct_eq(signature_bytes).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_generation_and_verification() {
        let secret = "my_app_secret";
        let body = br#"{"entry":[]}"#;

        let signature = generate_meta_signature(secret, body).unwrap();
        assert!(signature.starts_with("sha256="));

        assert!(verify_meta_signature(secret, body, Some(&signature)));
    }

    #[test]
    fn test_missing_signature_rejected() {
        assert!(!verify_meta_signature("my_app_secret", b"{}", None));
    }

    #[test]
    fn test_missing_prefix_rejected() {
        let secret = "my_app_secret";
        let body = br#"{"entry":[]}"#;

        let signature = generate_meta_signature(secret, body).unwrap();
        let without_prefix = signature.trim_start_matches("sha256=");

        assert!(!verify_meta_signature(secret, body, Some(without_prefix)));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = "my_app_secret";
        let body = br#"{"entry":[{"id":"1"}]}"#;

        let signature = generate_meta_signature(secret, body).unwrap();

        assert!(!verify_meta_signature(
            secret,
            br#"{"entry":[{"id":"2"}]}"#,
            Some(&signature)
        ));
    }

    #[test]
    fn test_empty_secret_rejected() {
        let body = br#"{"entry":[]}"#;
        let signature = generate_meta_signature("secret", body).unwrap();

        assert!(!verify_meta_signature("", body, Some(&signature)));
    }
}

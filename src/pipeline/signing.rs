//! HMAC-SHA256 request signing for the insight node.
//!
//! The signed string is `METHOD|url|body|timestamp|nonce`, hex encoded and
//! sent with the nonce and millisecond timestamp it covers.

use hmac::{Hmac, Mac};
use reqwest::RequestBuilder;
use sha2::Sha256;
use time::OffsetDateTime;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const HEADER_NONCE: &str = "X-Client-Nonce";
pub const HEADER_SIGNATURE: &str = "X-Signature";
pub const HEADER_TIMESTAMP: &str = "X-Timestamp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureHeaders {
    pub nonce: String,
    pub signature: String,
    pub timestamp: String,
    pub bearer: Option<String>,
}

#[derive(Clone, Default)]
pub struct RequestSigner {
    secret: Option<String>,
    bearer: Option<String>,
}

pub fn canonical_string(method: &str, url: &str, body: &str, timestamp: i64, nonce: &str) -> String {
    [
        method.to_ascii_uppercase().as_str(),
        url,
        body,
        &timestamp.to_string(),
        nonce,
    ]
    .join("|")
}

/// `<millis>-<uuid v4>`.
pub fn generate_nonce(now_ms: i64) -> String {
    format!("{}-{}", now_ms, Uuid::new_v4())
}

impl RequestSigner {
    pub fn new(secret: Option<String>, bearer: Option<String>) -> Self {
        Self { secret, bearer }
    }

    /// Hex HMAC of `canonical`; empty without a secret.
    pub fn sign(&self, canonical: &str) -> String {
        let Some(secret) = self.secret.as_deref() else {
            return String::new();
        };
        // HMAC accepts keys of any length, so this never fails
        match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mut mac) => {
                mac.update(canonical.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            Err(_) => String::new(),
        }
    }

    pub fn headers_at(&self, method: &str, url: &str, body: &str, now_ms: i64, nonce: String) -> SecureHeaders {
        let signature = self.sign(&canonical_string(method, url, body, now_ms, &nonce));
        SecureHeaders {
            nonce,
            signature,
            timestamp: now_ms.to_string(),
            bearer: self.bearer.clone(),
        }
    }

    pub fn headers(&self, method: &str, url: &str, body: &str) -> SecureHeaders {
        let now_ms = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        self.headers_at(method, url, body, now_ms, generate_nonce(now_ms))
    }

    pub fn apply(&self, req: RequestBuilder, method: &str, url: &str, body: &str) -> RequestBuilder {
        let h = self.headers(method, url, body);
        let req = req
            .header(HEADER_NONCE, h.nonce)
            .header(HEADER_SIGNATURE, h.signature)
            .header(HEADER_TIMESTAMP, h.timestamp);
        match h.bearer {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANONICAL: &str =
        r#"POST|http://insight.test/requeue|{"id":"n1"}|1714557600000|1714557600000-abc"#;

    #[test]
    fn canonical_string_uppercases_method() {
        assert_eq!(
            canonical_string("post", "http://insight.test/requeue", r#"{"id":"n1"}"#, 1714557600000, "1714557600000-abc"),
            CANONICAL
        );
        assert_eq!(canonical_string("GET", "u", "", 1, "n"), "GET|u||1|n");
    }

    #[test]
    fn signs_with_hmac_sha256_hex() {
        let signer = RequestSigner::new(Some("top-secret".into()), None);
        assert_eq!(
            signer.sign(CANONICAL),
            "97ae85b07f227a2b74d337f80d684473bf10d33769b229afbc136c3141528d94"
        );
    }

    #[test]
    fn unsigned_without_secret() {
        let signer = RequestSigner::new(None, Some("jwt".into()));
        let h = signer.headers_at("GET", "u", "", 42, "42-n".into());
        assert_eq!(h.signature, "");
        assert_eq!(h.timestamp, "42");
        assert_eq!(h.nonce, "42-n");
        assert_eq!(h.bearer.as_deref(), Some("jwt"));
    }

    #[test]
    fn nonces_are_unique_and_timestamped() {
        let a = generate_nonce(1000);
        let b = generate_nonce(1000);
        assert!(a.starts_with("1000-"));
        assert_ne!(a, b);
    }
}

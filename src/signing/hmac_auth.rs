//! HMAC request signing (§4.E.2).
//!
//! Direct port of `vault/execution.rs`'s `sign_request`/`auth_headers`:
//! same message concatenation, same URL-safe-then-standard base64
//! fallback decode, same `POLY_*` header set.

use crate::error::TradingError;
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub struct L2Credentials {
    pub address: String,
    pub api_key: String,
    pub secret: String,
    pub passphrase: String,
}

/// `message = timestamp || method || path || body` (body only if
/// non-empty); secret decoded URL-safe base64 first, standard base64 on
/// failure; HMAC-SHA256 over the message, URL-safe base64 output.
pub fn sign_request(
    secret_b64: &str,
    method: &str,
    path: &str,
    body: &str,
    timestamp: i64,
) -> Result<String, TradingError> {
    let message = if body.is_empty() {
        format!("{timestamp}{method}{path}")
    } else {
        format!("{timestamp}{method}{path}{body}")
    };

    let secret_bytes = URL_SAFE
        .decode(secret_b64)
        .or_else(|_| URL_SAFE_NO_PAD.decode(secret_b64))
        .or_else(|_| BASE64.decode(secret_b64))
        .map_err(|e| TradingError::Fatal(format!("failed to decode CLOB secret: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(&secret_bytes)
        .map_err(|e| TradingError::Fatal(format!("HMAC key error: {e}")))?;
    mac.update(message.as_bytes());

    Ok(URL_SAFE.encode(mac.finalize().into_bytes()))
}

/// Emits the L2 `POLY_*` header set (§4.E, §6).
pub fn auth_headers_l2(
    creds: &L2Credentials,
    method: &str,
    path: &str,
    body: &str,
    timestamp: i64,
) -> Result<Vec<(String, String)>, TradingError> {
    let signature = sign_request(&creds.secret, method, path, body, timestamp)?;
    Ok(vec![
        ("POLY_ADDRESS".to_string(), creds.address.clone()),
        ("POLY_API_KEY".to_string(), creds.api_key.clone()),
        ("POLY_SIGNATURE".to_string(), signature),
        ("POLY_TIMESTAMP".to_string(), timestamp.to_string()),
        ("POLY_PASSPHRASE".to_string(), creds.passphrase.clone()),
    ])
}

/// L1 header set for EIP-712-signed requests (§6): `POLY_ADDRESS,
/// POLY_SIGNATURE, POLY_TIMESTAMP, POLY_NONCE`.
pub fn auth_headers_l1(
    address: &str,
    signature_hex: &str,
    timestamp: i64,
    nonce: u64,
) -> Vec<(String, String)> {
    vec![
        ("POLY_ADDRESS".to_string(), address.to_string()),
        ("POLY_SIGNATURE".to_string(), signature_hex.to_string()),
        ("POLY_TIMESTAMP".to_string(), timestamp.to_string()),
        ("POLY_NONCE".to_string(), nonce.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_request_is_deterministic_for_same_inputs() {
        let secret = URL_SAFE.encode(b"super-secret-key-bytes");
        let a = sign_request(&secret, "POST", "/order", "{}", 1_700_000_000).unwrap();
        let b = sign_request(&secret, "POST", "/order", "{}", 1_700_000_000).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sign_request_falls_back_to_standard_base64() {
        // A secret that is valid standard base64 but not URL-safe (contains '+'/'/').
        let secret = BASE64.encode(b"\xff\xfe\xfd\xfc secret bytes with padding");
        let result = sign_request(&secret, "GET", "/balance-allowance", "", 1);
        assert!(result.is_ok());
    }

    #[test]
    fn auth_headers_contain_all_required_fields() {
        let creds = L2Credentials {
            address: "0xabc".into(),
            api_key: "key".into(),
            secret: URL_SAFE.encode(b"secret"),
            passphrase: "pass".into(),
        };
        let headers = auth_headers_l2(&creds, "GET", "/orders", "", 1700000000).unwrap();
        let names: Vec<&str> = headers.iter().map(|(k, _)| k.as_str()).collect();
        for required in ["POLY_ADDRESS", "POLY_API_KEY", "POLY_SIGNATURE", "POLY_TIMESTAMP", "POLY_PASSPHRASE"] {
            assert!(names.contains(&required), "missing header {required}");
        }
    }
}

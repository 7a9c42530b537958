//! HMAC-SHA256 verification for inbound webhooks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header missing")]
    Missing,
    #[error("signature header malformed")]
    Malformed,
    #[error("timestamp outside tolerance")]
    Stale,
    #[error("signature mismatch")]
    Mismatch,
    #[error("signing secret unusable")]
    InvalidKey,
}

fn mac_for(secret: &str, parts: &[&[u8]]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

/// Lower-case hex HMAC of `message`
pub fn hmac_hex(secret: &str, message: &[u8]) -> Result<String, SignatureError> {
    Ok(hex::encode(mac_for(secret, &[message])?.finalize().into_bytes()))
}

fn check_timestamp(timestamp: i64, now: i64, tolerance_secs: i64) -> Result<(), SignatureError> {
    match now.checked_sub(timestamp).map(i64::unsigned_abs) {
        Some(skew) if skew <= tolerance_secs.unsigned_abs() => Ok(()),
        _ => Err(SignatureError::Stale),
    }
}

fn matches_hex(mac: &HmacSha256, candidate: &str) -> bool {
    match hex::decode(candidate) {
        Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
        Err(_) => false,
    }
}

/// Payment processor scheme: header `t=<unix>,v1=<hex>[,v1=<hex>]`, signed payload `"{t}.{body}"`.
pub fn verify_processor_signature(
    header: Option<&str>,
    body: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for item in header.split(',') {
        match item.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    check_timestamp(timestamp, now, tolerance_secs)?;

    let prefix = format!("{}.", timestamp);
    let mac = mac_for(secret, &[prefix.as_bytes(), body])?;
    if candidates.iter().any(|c| matches_hex(&mac, c)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Video provider scheme: `v0=<hex>` over `"v0:{timestamp}:{body}"`.
pub fn verify_video_signature(
    signature: Option<&str>,
    timestamp: Option<&str>,
    body: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let signature = signature.ok_or(SignatureError::Missing)?;
    let raw_timestamp = timestamp.ok_or(SignatureError::Missing)?;
    let parsed = raw_timestamp.trim().parse::<i64>().map_err(|_| SignatureError::Malformed)?;
    let candidate = signature.trim().strip_prefix("v0=").ok_or(SignatureError::Malformed)?;
    check_timestamp(parsed, now, tolerance_secs)?;

    let prefix = format!("v0:{}:", raw_timestamp.trim());
    let mac = mac_for(secret, &[prefix.as_bytes(), body])?;
    if matches_hex(&mac, candidate) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Header value a processor would send for `body` at `timestamp`
pub fn sign_processor_payload(secret: &str, body: &[u8], timestamp: i64) -> Result<String, SignatureError> {
    let prefix = format!("{}.", timestamp);
    let digest = mac_for(secret, &[prefix.as_bytes(), body])?.finalize().into_bytes();
    Ok(format!("t={},v1={}", timestamp, hex::encode(digest)))
}

/// `x-zm-signature` value for `body` at `timestamp`
pub fn sign_video_payload(secret: &str, body: &[u8], timestamp: i64) -> Result<String, SignatureError> {
    let prefix = format!("v0:{}:", timestamp);
    let digest = mac_for(secret, &[prefix.as_bytes(), body])?.finalize().into_bytes();
    Ok(format!("v0={}", hex::encode(digest)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    #[test]
    fn test_processor_signature_roundtrip() {
        let header = sign_processor_payload(SECRET, BODY, 1_700_000_000).unwrap();
        assert_eq!(
            verify_processor_signature(Some(&header), BODY, SECRET, 300, 1_700_000_100),
            Ok(())
        );
    }

    #[test]
    fn test_processor_signature_rejections() {
        let header = sign_processor_payload(SECRET, BODY, 1_700_000_000).unwrap();
        assert_eq!(
            verify_processor_signature(Some(&header), b"{}", SECRET, 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_processor_signature(Some(&header), BODY, SECRET, 300, 1_700_000_301),
            Err(SignatureError::Stale)
        );
        assert_eq!(
            verify_processor_signature(Some(&header), BODY, "other", 300, 1_700_000_000),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_processor_signature(None, BODY, SECRET, 300, 1_700_000_000),
            Err(SignatureError::Missing)
        );
        assert_eq!(
            verify_processor_signature(Some("v1=abc"), BODY, SECRET, 300, 1_700_000_000),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_processor_accepts_any_listed_signature() {
        let valid = sign_processor_payload(SECRET, BODY, 1_700_000_000).unwrap();
        let v1 = valid.split_once(",v1=").unwrap().1;
        let header = format!("t=1700000000,v1=deadbeef,v1={}", v1);
        assert!(verify_processor_signature(Some(&header), BODY, SECRET, 300, 1_700_000_000).is_ok());
    }

    #[test]
    fn test_video_signature() {
        let sig = sign_video_payload(SECRET, BODY, 1_700_000_000).unwrap();
        assert!(verify_video_signature(Some(&sig), Some("1700000000"), BODY, SECRET, 300, 1_700_000_010).is_ok());
        assert_eq!(
            verify_video_signature(Some(&sig), Some("1700000001"), BODY, SECRET, 300, 1_700_000_010),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_video_signature(Some(&sig), None, BODY, SECRET, 300, 1_700_000_010),
            Err(SignatureError::Missing)
        );
    }

    #[test]
    fn test_extreme_timestamps_are_stale() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={},v1=00", t);
            assert_eq!(
                verify_processor_signature(Some(&header), BODY, SECRET, 300, 1_700_000_000),
                Err(SignatureError::Stale)
            );
            assert_eq!(
                verify_video_signature(Some("v0=00"), Some(&t.to_string()), BODY, SECRET, 300, 1_700_000_000),
                Err(SignatureError::Stale)
            );
        }
        assert_eq!(
            verify_processor_signature(Some("t=0,v1=00"), BODY, SECRET, 300, i64::MIN),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn test_hmac_hex_known_vector() {
        // RFC 4231 test case 2
        assert_eq!(
            hmac_hex("Jefe", b"what do ya want for nothing?").unwrap(),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}

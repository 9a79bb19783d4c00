//! Payment provider webhook signatures.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>...]`. The MAC is
//! HMAC-SHA256 over `"<t>.<raw body>"` keyed with the endpoint secret. Several `v1`
//! entries may be present while a secret is being rolled; any match is accepted.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Allowed clock skew for timestamps from the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,
    #[error("malformed signature header: {0}")]
    Malformed(&'static str),
    #[error("no webhook secret configured")]
    NoSecret,
    #[error("signature timestamp outside tolerance")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or(SignatureError::Malformed("expected key=value pairs"))?;
            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| SignatureError::Malformed("invalid timestamp"))?,
                    )
                }
                "v1" => signatures.push(
                    hex::decode(value).map_err(|_| SignatureError::Malformed("invalid v1 hex"))?,
                ),
                // v0 and future schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureError::Malformed("missing timestamp"))?;
        if signatures.is_empty() {
            return Err(SignatureError::Malformed("missing v1 signature"));
        }
        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> HmacSha256 {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

/// Produces a header value for `payload`, as the provider would.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
    let digest = mac_for(secret, timestamp, payload).finalize().into_bytes();
    format!("t={},v1={}", timestamp, hex::encode(digest))
}

#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
    tolerance_secs: i64,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            tolerance_secs: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn verify(&self, payload: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        self.verify_at(payload, header, chrono::Utc::now().timestamp())
    }

    /// Verification against an explicit clock.
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<(), SignatureError> {
        let secret = self.secret.as_deref().ok_or(SignatureError::NoSecret)?;
        let header = SignatureHeader::parse(header.ok_or(SignatureError::MissingHeader)?)?;

        let age = now.saturating_sub(header.timestamp);
        if age > self.tolerance_secs || age < -MAX_CLOCK_SKEW_SECS {
            return Err(SignatureError::Expired);
        }

        let matched = header.signatures.iter().any(|candidate| {
            mac_for(secret, header.timestamp, payload)
                .verify_slice(candidate)
                .is_ok()
        });
        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

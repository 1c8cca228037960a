//! Webhook signature verification.
//!
//! Header format: `t=<unix seconds>,v1=<hex hmac>[,v1=<hex hmac>…]`. The MAC
//! is HMAC-SHA256 keyed with the shared secret over `"<t>.<raw body>"`.
//! Several `v1` entries may be present while a secret is being rotated; any
//! one of them matching is enough.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Name of the HTTP header carrying the signature.
pub const SIGNATURE_HEADER: &str = "billing-signature";

#[derive(Clone)]
pub struct SignatureVerifier {
  secret:    Vec<u8>,
  tolerance: Duration,
}

impl std::fmt::Debug for SignatureVerifier {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SignatureVerifier")
      .field("secret", &"<redacted>")
      .field("tolerance", &self.tolerance)
      .finish()
  }
}

struct ParsedHeader {
  timestamp:  i64,
  signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader> {
  let mut timestamp = None;
  let mut signatures = Vec::new();

  for part in header.split(',') {
    let Some((key, value)) = part.trim().split_once('=') else {
      return Err(Error::MalformedSignature(format!("expected key=value, got {part:?}")));
    };
    match key {
      "t" => {
        timestamp = Some(
          value
            .parse::<i64>()
            .map_err(|_| Error::MalformedSignature(format!("bad timestamp {value:?}")))?,
        );
      }
      // Undecodable entries can never match; skip them like unknown schemes.
      "v1" => signatures.extend(hex::decode(value).ok()),
      _ => {}
    }
  }

  let timestamp = timestamp.ok_or_else(|| Error::MalformedSignature("missing t=".into()))?;
  if signatures.is_empty() {
    return Err(Error::MalformedSignature("no v1 signature".into()));
  }
  Ok(ParsedHeader { timestamp, signatures })
}

impl SignatureVerifier {
  pub fn new(secret: impl Into<Vec<u8>>, tolerance: Duration) -> Self {
    Self { secret: secret.into(), tolerance }
  }

  fn mac(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
      .map_err(|e| Error::InvalidSecret(e.to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
  }

  /// Verify `header` against the raw request body.
  pub fn verify(&self, payload: &[u8], header: Option<&str>, now: DateTime<Utc>) -> Result<()> {
    let header = header.ok_or(Error::MissingSignature)?;
    let parsed = parse_header(header)?;

    let age = now.timestamp().abs_diff(parsed.timestamp);
    if age > self.tolerance.as_secs() {
      return Err(Error::OutsideTolerance {
        timestamp:      parsed.timestamp,
        tolerance_secs: self.tolerance.as_secs(),
      });
    }

    let mac = self.mac(parsed.timestamp, payload)?;
    // `verify_slice` compares in constant time.
    if parsed
      .signatures
      .iter()
      .any(|sig| mac.clone().verify_slice(sig).is_ok())
    {
      Ok(())
    } else {
      Err(Error::SignatureMismatch)
    }
  }

  /// Produce a header value for `payload` signed at `timestamp`.
  pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String> {
    let tag = self.mac(timestamp, payload)?.finalize().into_bytes();
    Ok(format!("t={timestamp},v1={}", hex::encode(tag)))
  }
}

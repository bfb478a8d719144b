//! Keyed integrity tags over metric records.
//!
//! The tag is HMAC-SHA-256 over a canonical text form of the record:
//! `"{id}:counter:{delta}"` or `"{id}:gauge:{value:.6}"`. Agents and the
//! server must agree on the gauge formatting, so it lives here only.

use crate::{MetricError, MetricRecord, MetricValue};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Canonical text that gets signed for a record
pub fn canonical(record: &MetricRecord) -> Result<String, MetricError> {
    Ok(match record.value()? {
        MetricValue::Counter(delta) => format!("{}:counter:{}", record.id, delta),
        MetricValue::Gauge(value) => format!("{}:gauge:{:.6}", record.id, value),
    })
}

/// Lowercase hex HMAC-SHA-256 of `canonical` under `key`
pub fn tag(canonical: &str, key: &str) -> Result<String, MetricError> {
    Ok(hex::encode(mac(canonical, key)?.finalize().into_bytes()))
}

/// Fill in the record's hash. No-op when the key is empty.
pub fn sign(record: &mut MetricRecord, key: &str) -> Result<(), MetricError> {
    if key.is_empty() {
        return Ok(());
    }
    record.hash = Some(tag(&canonical(record)?, key)?);
    Ok(())
}

/// Check the record's hash against `key`.
///
/// Integrity checking is opt-in: an empty key accepts every record.
pub fn verify(record: &MetricRecord, key: &str) -> Result<(), MetricError> {
    if key.is_empty() {
        return Ok(());
    }
    let canonical = canonical(record)?;
    let mismatch = || MetricError::Integrity(record.id.clone());

    let expected = record
        .hash
        .as_deref()
        .filter(|h| !h.is_empty())
        .ok_or_else(mismatch)?;
    let expected = hex::decode(expected).map_err(|_| mismatch())?;

    mac(&canonical, key)?
        .verify_slice(&expected)
        .map_err(|_| mismatch())
}

fn mac(canonical: &str, key: &str) -> Result<HmacSha256, MetricError> {
    let mut mac = HmacSha256::new_from_slice(key.as_bytes())
        .map_err(|e| MetricError::IntegrityKey(e.to_string()))?;
    mac.update(canonical.as_bytes());
    Ok(mac)
}

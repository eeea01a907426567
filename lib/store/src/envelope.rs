//! Versioned, expiring envelope for stored values.
//!
//! Every value written through the state store or the context cache is
//! wrapped in an `Envelope` carrying a format version and an absolute
//! expiry. Reads discard expired envelopes no matter what the backend did
//! with its own TTL, so a stale value can never be served.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// A versioned envelope with an expiry deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// The version of the envelope format.
    pub version: u32,
    /// Instant after which the payload must be treated as absent.
    pub expires_at: DateTime<Utc>,
    /// The wrapped payload.
    pub payload: T,
}

impl<T> Envelope<T> {
    /// Wraps a payload that stays valid for `ttl` from now.
    #[must_use]
    pub fn new(payload: T, ttl: Duration) -> Self {
        Self::at(payload, ttl, Utc::now())
    }

    /// Wraps a payload that stays valid for `ttl` from `now`.
    #[must_use]
    pub fn at(payload: T, ttl: Duration, now: DateTime<Utc>) -> Self {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            version: CURRENT_VERSION,
            expires_at,
            payload,
        }
    }

    /// Returns true if the envelope is past its deadline at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns true if this envelope uses the current version.
    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }

    /// Unwraps the envelope, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Deserializes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Decodes stored bytes and returns the payload only if it is still
    /// fresh and written in the current format.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope of `T`.
    pub fn open(bytes: &[u8], now: DateTime<Utc>) -> Result<Option<T>, serde_json::Error> {
        let envelope = Self::from_json_bytes(bytes)?;
        if !envelope.is_current_version() || envelope.is_expired_at(now) {
            return Ok(None);
        }
        Ok(Some(envelope.into_payload()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_envelope_opens() {
        let now = Utc::now();
        let envelope = Envelope::at("hello".to_string(), Duration::from_secs(60), now);
        let bytes = envelope.to_json_bytes().unwrap();

        let opened = Envelope::<String>::open(&bytes, now).unwrap();
        assert_eq!(opened.as_deref(), Some("hello"));
    }

    #[test]
    fn expired_envelope_is_absent() {
        let now = Utc::now();
        let envelope = Envelope::at(42u32, Duration::from_secs(5), now);
        let bytes = envelope.to_json_bytes().unwrap();

        let later = now + chrono::Duration::seconds(5);
        assert_eq!(Envelope::<u32>::open(&bytes, later).unwrap(), None);
    }

    #[test]
    fn unknown_version_is_absent() {
        let now = Utc::now();
        let mut envelope = Envelope::at(1u8, Duration::from_secs(60), now);
        envelope.version = CURRENT_VERSION + 1;
        let bytes = envelope.to_json_bytes().unwrap();

        assert_eq!(Envelope::<u8>::open(&bytes, now).unwrap(), None);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(Envelope::<u8>::open(b"not json", Utc::now()).is_err());
    }

    #[test]
    fn huge_ttl_saturates() {
        let envelope = Envelope::new((), Duration::MAX);
        assert_eq!(envelope.expires_at, DateTime::<Utc>::MAX_UTC);
        assert!(!envelope.is_expired_at(Utc::now()));
    }
}

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sp_types::DataTypeClass;

use crate::error::CacheError;

pub const ENVELOPE_VERSION: u32 = 1;

/// On-disk wrapper around a cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u32,
    pub class: DataTypeClass,
    pub fingerprint: String,
    pub generation: u64,
    /// Hex SHA-256 of `payload`.
    pub digest: String,
    pub payload: String,
}

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

pub fn encode<T: Serialize>(
    class: DataTypeClass,
    fingerprint: &str,
    generation: u64,
    value: &T,
) -> Result<Vec<u8>, CacheError> {
    let payload = serde_json::to_string(value)?;
    let envelope = Envelope {
        version: ENVELOPE_VERSION,
        class,
        fingerprint: fingerprint.to_owned(),
        generation,
        digest: sha256_hex(payload.as_bytes()),
        payload,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Outcome of reading a persisted artifact.
#[derive(Debug)]
pub enum Decoded<T> {
    Fresh(T),
    /// Intact, but written for a different session fingerprint.
    Stale { found: String },
}

pub fn decode<T: DeserializeOwned>(
    class: DataTypeClass,
    fingerprint: &str,
    bytes: &[u8],
) -> Result<Decoded<T>, CacheError> {
    let corrupt = |reason: String| CacheError::Corruption { class, reason };

    let envelope: Envelope =
        serde_json::from_slice(bytes).map_err(|err| corrupt(format!("unreadable envelope: {err}")))?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(corrupt(format!(
            "format version {} (expected {ENVELOPE_VERSION})",
            envelope.version
        )));
    }
    if envelope.class != class {
        return Err(corrupt(format!("artifact belongs to {}", envelope.class)));
    }
    let observed = sha256_hex(envelope.payload.as_bytes());
    if observed != envelope.digest {
        return Err(corrupt(format!(
            "digest mismatch; expected={} observed={observed}",
            envelope.digest
        )));
    }
    if envelope.fingerprint != fingerprint {
        return Ok(Decoded::Stale {
            found: envelope.fingerprint,
        });
    }
    let value = serde_json::from_str(&envelope.payload)
        .map_err(|err| corrupt(format!("unreadable payload: {err}")))?;
    Ok(Decoded::Fresh(value))
}

#[cfg(test)]
mod tests {
    use sp_types::DataTypeClass;

    use super::{Decoded, Envelope, decode, encode, sha256_hex};
    use crate::error::CacheError;

    #[test]
    fn sha256_hex_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn fingerprint_mismatch_is_stale_not_corrupt() {
        let bytes = encode(DataTypeClass::Raw, "engine-a", 0, &vec![1, 2, 3]).expect("encode");
        let decoded = decode::<Vec<i32>>(DataTypeClass::Raw, "engine-b", &bytes).expect("decode");
        assert!(matches!(decoded, Decoded::Stale { found } if found == "engine-a"));
    }

    #[test]
    fn tampered_payload_fails_digest_check() {
        let bytes = encode(DataTypeClass::Source, "fp", 3, &vec![1, 2, 3]).expect("encode");
        let mut envelope: Envelope = serde_json::from_slice(&bytes).expect("envelope");
        envelope.payload = "[1,2,4]".into();
        let tampered = serde_json::to_vec(&envelope).expect("encode");

        let err = decode::<Vec<i32>>(DataTypeClass::Source, "fp", &tampered).expect_err("tampered");
        assert!(matches!(err, CacheError::Corruption { class: DataTypeClass::Source, .. }));
    }

    #[test]
    fn garbage_and_wrong_class_are_corrupt() {
        assert!(decode::<Vec<i32>>(DataTypeClass::Raw, "fp", b"not json").is_err());
        let bytes = encode(DataTypeClass::Profile, "fp", 0, &0_u8).expect("encode");
        assert!(decode::<u8>(DataTypeClass::Raw, "fp", &bytes).is_err());
    }
}

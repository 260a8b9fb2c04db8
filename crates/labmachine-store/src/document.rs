//! On-disk and on-wire envelope of a lab state descriptor.
//!
//! ```json
//! { "format_version": 1, "checksum": "<blake3 of state>", "state": { ... } }
//! ```

use crate::StoreError;
use labmachine_schema::LabState;
use serde::{Deserialize, Serialize};

/// Current document format version. Incremented on incompatible layout changes.
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    format_version: u32,
    checksum: String,
    state: LabState,
}

#[derive(Debug, Deserialize)]
struct VersionPeek {
    format_version: u32,
    state: StateVersionPeek,
}

#[derive(Debug, Deserialize)]
struct StateVersionPeek {
    #[serde(default)]
    version: u64,
}

fn checksum(state: &LabState) -> Result<String, StoreError> {
    let json = state.canonical_json()?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

fn check_format(found: u32) -> Result<(), StoreError> {
    if found == STATE_FORMAT_VERSION {
        Ok(())
    } else {
        Err(StoreError::VersionMismatch {
            expected: STATE_FORMAT_VERSION,
            found,
        })
    }
}

pub fn encode_state(state: &LabState) -> Result<Vec<u8>, StoreError> {
    let doc = StateDocument {
        format_version: STATE_FORMAT_VERSION,
        checksum: checksum(state)?,
        state: state.clone(),
    };
    Ok(serde_json::to_vec_pretty(&doc)?)
}

/// Parse a document and verify its checksum. `locator` only feeds error messages.
pub fn decode_state(data: &[u8], locator: &str) -> Result<LabState, StoreError> {
    let doc: StateDocument = serde_json::from_slice(data)?;
    check_format(doc.format_version)?;
    let actual = checksum(&doc.state)?;
    if actual != doc.checksum {
        return Err(StoreError::IntegrityFailure {
            locator: locator.to_owned(),
            expected: doc.checksum,
            actual,
        });
    }
    Ok(doc.state)
}

/// Read only the descriptor version, without verifying the checksum.
pub fn peek_version(data: &[u8]) -> Result<u64, StoreError> {
    let peek: VersionPeek = serde_json::from_slice(data)?;
    check_format(peek.format_version)?;
    Ok(peek.state.version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LabState {
        let mut state = LabState::new("demo", "mock", "mock", None, "zone-1");
        state.version = 3;
        state
    }

    #[test]
    fn encode_decode_roundtrip() {
        let state = sample();
        let data = encode_state(&state).unwrap();
        let back = decode_state(&data, "test").unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn peek_reads_version() {
        let data = encode_state(&sample()).unwrap();
        assert_eq!(peek_version(&data).unwrap(), 3);
    }

    #[test]
    fn tampered_state_fails_checksum() {
        let data = encode_state(&sample()).unwrap();
        let text = String::from_utf8(data).unwrap();
        let tampered = text.replace("\"demo\"", "\"evil\"");
        let err = decode_state(tampered.as_bytes(), "state.json").unwrap_err();
        assert!(matches!(err, StoreError::IntegrityFailure { .. }));
        assert!(err.to_string().contains("state.json"));
    }

    #[test]
    fn unknown_format_version_rejected() {
        let data = encode_state(&sample()).unwrap();
        let text = String::from_utf8(data).unwrap();
        let bumped = text.replace("\"format_version\": 1", "\"format_version\": 99");
        assert!(matches!(
            decode_state(bumped.as_bytes(), "x"),
            Err(StoreError::VersionMismatch { found: 99, .. })
        ));
        assert!(peek_version(bumped.as_bytes()).is_err());
    }

    #[test]
    fn garbage_is_a_serialization_error() {
        assert!(matches!(
            decode_state(b"NOT JSON", "x"),
            Err(StoreError::Serialization(_))
        ));
    }
}

//! The external value-serialization contract.
//!
//! Value encoding is delegated to an external collaborator and is opaque to
//! the core: a [`Codec`] provides `encode`/`decode` and a stable file
//! extension. The core requires `decode(encode(v)) == v` for any `v`
//! accepted by an optional base-type constraint (see
//! [`crate::config::StoreConfig::base_class_for_values`]); it does not
//! inspect codec internals.

use crate::error::PersiDictError;
use crate::Bytes;

/// Encodes and decodes values for storage, and names the file extension a
/// [`crate::persidict::PersiDict`] backend appends to rendered keys.
///
/// Implementations own no state that the core depends on; `encode`/`decode`
/// must be pure functions of their argument.
pub trait Codec: Send + Sync {
	/// The canonical file extension for this format, without a leading dot
	/// (e.g. `"json"`).
	fn extension(&self) -> &str;

	/// Serializes `value` to its on-the-wire representation.
	fn encode(&self, value: &[u8]) -> Result<Bytes, PersiDictError>;

	/// Deserializes `bytes` back to a value. Must be the left inverse of
	/// [`Codec::encode`].
	fn decode(&self, bytes: &[u8]) -> Result<Bytes, PersiDictError>;
}

/// The identity codec: values are already opaque bytes, so `encode`/`decode`
/// are no-ops. This is the default codec for every backend in this crate,
/// since value serialization above the byte level is a named non-goal.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawBytesCodec;

impl Codec for RawBytesCodec {
	fn extension(&self) -> &str {
		"bin"
	}

	fn encode(&self, value: &[u8]) -> Result<Bytes, PersiDictError> {
		Ok(Bytes::copy_from_slice(value))
	}

	fn decode(&self, bytes: &[u8]) -> Result<Bytes, PersiDictError> {
		Ok(Bytes::copy_from_slice(bytes))
	}
}

/// A worked example of an external codec: wraps a value already encoded as
/// a JSON document. Unlike [`RawBytesCodec`], this codec validates that its
/// input is well-formed JSON on both `encode` and `decode`, so a caller
/// storing arbitrary non-JSON bytes under a `JsonCodec` learns about it
/// immediately rather than at some later read.
#[cfg(feature = "json-codec")]
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

#[cfg(feature = "json-codec")]
impl Codec for JsonCodec {
	fn extension(&self) -> &str {
		"json"
	}

	fn encode(&self, value: &[u8]) -> Result<Bytes, PersiDictError> {
		let parsed: serde_json::Value = serde_json::from_slice(value)
			.map_err(|e| PersiDictError::InvalidArgument(format!("not valid JSON: {}", e)))?;
		serde_json::to_vec(&parsed)
			.map(Bytes::from)
			.map_err(|e| PersiDictError::InvalidArgument(format!("failed to re-encode JSON: {}", e)))
	}

	fn decode(&self, bytes: &[u8]) -> Result<Bytes, PersiDictError> {
		let parsed: serde_json::Value = serde_json::from_slice(bytes)
			.map_err(|e| PersiDictError::backend_failure("JsonCodec", "decode", e))?;
		serde_json::to_vec(&parsed)
			.map(Bytes::from)
			.map_err(|e| PersiDictError::backend_failure("JsonCodec", "decode", e))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn raw_bytes_codec_round_trips() {
		let codec = RawBytesCodec;
		let original = b"hello world";
		let encoded = codec.encode(original).unwrap();
		let decoded = codec.decode(&encoded).unwrap();
		assert_eq!(&decoded[..], original);
		assert_eq!(codec.extension(), "bin");
	}

	#[cfg(feature = "json-codec")]
	#[test]
	fn json_codec_round_trips_well_formed_input() {
		let codec = JsonCodec;
		let original = br#"{"a":1,"b":[true,null]}"#;
		let encoded = codec.encode(original).unwrap();
		let decoded = codec.decode(&encoded).unwrap();
		let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
		assert_eq!(value["a"], 1);
	}

	#[cfg(feature = "json-codec")]
	#[test]
	fn json_codec_rejects_malformed_input() {
		let codec = JsonCodec;
		assert!(codec.encode(b"not json").is_err());
	}
}

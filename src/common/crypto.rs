// Copyright 2019 The vault713 Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use super::{ErrorKind, Result};
use hmac::{Hmac, Mac};
use md5::Md5;
use ring::constant_time::verify_slices_are_equal;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write;

type HmacSha256 = Hmac<Sha256>;

/// Byte-stable canonical JSON: UTF-8, object keys sorted at every depth,
/// no insignificant whitespace. Signer and verifier must agree on these
/// bytes exactly.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String> {
	let value = serde_json::to_value(value)?;
	let mut out = String::new();
	write_canonical(&value, &mut out)?;
	Ok(out)
}

fn write_canonical(value: &Value, out: &mut String) -> Result<()> {
	match value {
		Value::Object(map) => {
			out.push('{');
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort();
			for (i, key) in keys.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				out.push_str(&serde_json::to_string(key)?);
				out.push(':');
				write_canonical(&map[key.as_str()], out)?;
			}
			out.push('}');
		}
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_canonical(item, out)?;
			}
			out.push(']');
		}
		_ => out.push_str(&serde_json::to_string(value)?),
	}
	Ok(())
}

/// HMAC-SHA-256 over the canonical bytes, lowercase hex.
pub fn sign_payload(secret: &[u8], canonical: &[u8]) -> Result<String> {
	let mut mac = HmacSha256::new_varkey(secret)
		.map_err(|_| ErrorKind::GenericError("invalid hmac key".to_owned()))?;
	mac.input(canonical);
	Ok(to_hex(mac.result().code().to_vec()))
}

/// Timing-safe check of a submitted signature against the expected one.
/// Signatures of a different length are rejected up front, which keeps the
/// constant-time comparison itself on equal-length inputs.
pub fn verify_signature(secret: &[u8], canonical: &[u8], signature: &str) -> bool {
	let expected = match sign_payload(secret, canonical) {
		Ok(s) => s,
		Err(_) => return false,
	};
	let submitted = signature.to_lowercase();
	if expected.len() != submitted.len() {
		return false;
	}
	verify_slices_are_equal(expected.as_bytes(), submitted.as_bytes()).is_ok()
}

/// SHA-256 of the canonical bytes, lowercase hex. Used to dedupe webhook
/// retries without storing the payload itself.
pub fn payload_hash(canonical: &[u8]) -> String {
	let mut hasher = Sha256::new();
	hasher.input(canonical);
	to_hex(hasher.result().to_vec())
}

/// Base64 MD5 over the published body, carried as the transport
/// content-integrity header.
pub fn content_md5(body: &[u8]) -> String {
	let mut hasher = Md5::new();
	hasher.input(body);
	base64::encode(hasher.result().as_slice())
}

/// Encode the provided bytes into a hex string
pub fn to_hex(bytes: Vec<u8>) -> String {
	let mut s = String::new();
	for byte in bytes {
		write!(&mut s, "{:02x}", byte).expect("Unable to write");
	}
	s
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn canonical_json_sorts_keys_at_every_depth() {
		let value = json!({
			"z": 1,
			"a": { "d": true, "b": [1, 2, {"y": null, "x": "s"}] },
		});
		assert_eq!(
			canonical_json(&value).unwrap(),
			r#"{"a":{"b":[1,2,{"x":"s","y":null}],"d":true},"z":1}"#
		);
	}

	#[test]
	fn canonical_json_is_independent_of_field_order() {
		let a: Value = serde_json::from_str(r#"{"txnId":"A","delta":5}"#).unwrap();
		let b: Value = serde_json::from_str(r#"{"delta":5,"txnId":"A"}"#).unwrap();
		assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
	}

	#[test]
	fn signature_round_trip() {
		let canonical = canonical_json(&json!({"txnId": "A", "delta": 10})).unwrap();
		let signature = sign_payload(b"secret", canonical.as_bytes()).unwrap();
		assert!(verify_signature(b"secret", canonical.as_bytes(), &signature));
	}

	#[test]
	fn bit_flip_breaks_signature() {
		let canonical = canonical_json(&json!({"txnId": "A", "delta": 10})).unwrap();
		let signature = sign_payload(b"secret", canonical.as_bytes()).unwrap();
		let tampered = canonical.replace("10", "11");
		assert!(!verify_signature(b"secret", tampered.as_bytes(), &signature));
	}

	#[test]
	fn wrong_secret_breaks_signature() {
		let canonical = canonical_json(&json!({"txnId": "A"})).unwrap();
		let signature = sign_payload(b"secret", canonical.as_bytes()).unwrap();
		assert!(!verify_signature(b"other", canonical.as_bytes(), &signature));
	}

	#[test]
	fn differing_length_signature_is_rejected() {
		let canonical = canonical_json(&json!({"txnId": "A"})).unwrap();
		assert!(!verify_signature(b"secret", canonical.as_bytes(), "deadbeef"));
		assert!(!verify_signature(b"secret", canonical.as_bytes(), ""));
	}

	#[test]
	fn content_md5_known_vector() {
		assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
	}

	#[test]
	fn payload_hash_is_stable_hex() {
		let hash = payload_hash(b"abc");
		assert_eq!(
			hash,
			"ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
		);
	}
}

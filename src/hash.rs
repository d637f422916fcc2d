//! Content digests used for `[contenthash]` substitution and runtime hash folding.

use std::hash::Hasher;

use base64::{Engine as _, engine::general_purpose};
use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

/// Anything that can absorb bytes for hashing.
///
/// Modules and chunk maps fold their contributions through this trait so hosts can
/// plug the extractor into their own hashing pipeline.
pub trait HashSink {
  /// Feed `data` into the running hash.
  fn update(&mut self, data: &[u8]);
}

impl HashSink for blake3::Hasher {
  fn update(&mut self, data: &[u8]) {
    blake3::Hasher::update(self, data);
  }
}

impl HashSink for FxHasher {
  fn update(&mut self, data: &[u8]) {
    self.write(data);
  }
}

/// Hash algorithm used for content digests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashFunction {
  /// 256-bit BLAKE3.
  #[default]
  Blake3,
  /// 64-bit FxHash, fast but not collision resistant.
  Fx,
}

/// Encoding applied to the raw digest bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashDigest {
  /// Lowercase hexadecimal.
  #[default]
  Hex,
  /// URL-safe base64 without padding.
  Base64,
}

/// Digest configuration, mirroring the host's output hashing options.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HashOptions {
  /// Algorithm to hash with.
  pub function: HashFunction,
  /// Encoding of the final digest.
  pub digest: HashDigest,
  /// Number of characters kept from the encoded digest.
  pub digest_length: usize,
}

impl Default for HashOptions {
  fn default() -> Self {
    Self {
      function: HashFunction::Blake3,
      digest: HashDigest::Hex,
      digest_length: 20,
    }
  }
}

/// Running content hash configured from [`HashOptions`].
pub struct ContentHasher {
  state: HasherState,
  digest: HashDigest,
  digest_length: usize,
}

enum HasherState {
  Blake3(Box<blake3::Hasher>),
  Fx(FxHasher),
}

impl ContentHasher {
  /// Start a new hash using the configured algorithm.
  pub fn new(options: &HashOptions) -> Self {
    let state = match options.function {
      HashFunction::Blake3 => HasherState::Blake3(Box::new(blake3::Hasher::new())),
      HashFunction::Fx => HasherState::Fx(FxHasher::default()),
    };
    Self {
      state,
      digest: options.digest,
      digest_length: options.digest_length,
    }
  }

  /// Finish the hash and return the encoded, truncated digest.
  pub fn digest(self) -> String {
    let bytes = match self.state {
      HasherState::Blake3(hasher) => hasher.finalize().as_bytes().to_vec(),
      HasherState::Fx(hasher) => hasher.finish().to_be_bytes().to_vec(),
    };
    let mut encoded = match self.digest {
      HashDigest::Hex => hex::encode(bytes),
      HashDigest::Base64 => general_purpose::URL_SAFE_NO_PAD.encode(bytes),
    };
    encoded.truncate(self.digest_length);
    encoded
  }
}

impl HashSink for ContentHasher {
  fn update(&mut self, data: &[u8]) {
    match &mut self.state {
      HasherState::Blake3(hasher) => {
        hasher.update(data);
      }
      HasherState::Fx(hasher) => hasher.write(data),
    }
  }
}

/// Hash a single byte slice with the given options.
pub fn digest_bytes(options: &HashOptions, data: &[u8]) -> String {
  let mut hasher = ContentHasher::new(options);
  hasher.update(data);
  hasher.digest()
}

/// Truncate a digest to `length` characters, leaving shorter values untouched.
pub fn shorten(digest: &str, length: usize) -> &str {
  digest.get(..length).unwrap_or(digest)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn digest_respects_configured_length() {
    let options = HashOptions {
      digest_length: 8,
      ..HashOptions::default()
    };
    let digest = digest_bytes(&options, b"body{}");
    assert_eq!(digest.len(), 8);
    assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
  }

  #[test]
  fn same_input_same_digest() {
    let options = HashOptions::default();
    assert_eq!(digest_bytes(&options, b"a"), digest_bytes(&options, b"a"));
    assert_ne!(digest_bytes(&options, b"a"), digest_bytes(&options, b"b"));
  }

  #[test]
  fn fx_and_base64_are_supported() {
    let options = HashOptions {
      function: HashFunction::Fx,
      digest: HashDigest::Base64,
      digest_length: 64,
    };
    let digest = digest_bytes(&options, b"content");
    // 8 bytes encode to 11 unpadded base64 characters.
    assert_eq!(digest.len(), 11);
    assert!(!digest.contains('='));
  }

  #[test]
  fn shorten_keeps_short_values() {
    assert_eq!(shorten("abcdef", 4), "abcd");
    assert_eq!(shorten("ab", 4), "ab");
  }

  #[test]
  fn options_deserialize_from_camel_case() {
    let options: HashOptions =
      serde_json::from_str(r#"{"function":"fx","digest":"base64","digestLength":6}"#).unwrap();
    assert_eq!(options.function, HashFunction::Fx);
    assert_eq!(options.digest, HashDigest::Base64);
    assert_eq!(options.digest_length, 6);
  }
}

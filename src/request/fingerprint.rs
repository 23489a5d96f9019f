//! Deterministic request fingerprinting.
//!
//! The fingerprint is the dedup/cache key: identical inputs must always
//! yield identical fingerprints, across processes and sessions. Each field
//! is hashed with a length prefix so field boundaries cannot be confused
//! (e.g., prompt "ab" + param "c" vs prompt "a" + param "bc").

use sha2::{Digest, Sha256};
use std::fmt;

use super::types::GenerationKind;

/// SHA-256 hex digest identifying a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint over a request's identity fields.
    ///
    /// Parameters are hashed in the order given; callers supply them as an
    /// ordered mapping, so two requests with the same options in a
    /// different order are deliberately distinct.
    pub fn compute(
        kind: GenerationKind,
        prompt: &str,
        parameters: &[(String, serde_json::Value)],
        target_asset_id: &str,
        source_image: Option<&[u8]>,
    ) -> Self {
        let mut hasher = Sha256::new();

        hash_field(&mut hasher, kind.as_str().as_bytes());
        hash_field(&mut hasher, prompt.as_bytes());

        hasher.update((parameters.len() as u64).to_le_bytes());
        for (key, value) in parameters {
            hash_field(&mut hasher, key.as_bytes());
            // serde_json renders a given Value identically every time
            hash_field(&mut hasher, value.to_string().as_bytes());
        }

        hash_field(&mut hasher, target_asset_id.as_bytes());
        match source_image {
            Some(bytes) => hash_field(&mut hasher, bytes),
            None => hasher.update(0u64.to_le_bytes()),
        }

        let digest = hasher.finalize();
        Fingerprint(format!("{digest:x}"))
    }

    /// Returns the hex digest string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form for log output.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn hash_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> Vec<(String, serde_json::Value)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_identical_inputs_identical_fingerprint() {
        let p = params(&[("temperature", json!(0.7)), ("size", json!("1024x1024"))]);
        let a = Fingerprint::compute(GenerationKind::Text, "describe a sword", &p, "quest.1", None);
        let b = Fingerprint::compute(GenerationKind::Text, "describe a sword", &p, "quest.1", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_each_field_contributes() {
        let p = params(&[("temperature", json!(0.7))]);
        let base =
            Fingerprint::compute(GenerationKind::Text, "describe a sword", &p, "quest.1", None);

        let kind = Fingerprint::compute(GenerationKind::Image, "describe a sword", &p, "quest.1", None);
        let prompt =
            Fingerprint::compute(GenerationKind::Text, "describe a shield", &p, "quest.1", None);
        let target =
            Fingerprint::compute(GenerationKind::Text, "describe a sword", &p, "quest.2", None);
        let image = Fingerprint::compute(
            GenerationKind::Text,
            "describe a sword",
            &p,
            "quest.1",
            Some(&[1, 2, 3]),
        );

        assert_ne!(base, kind);
        assert_ne!(base, prompt);
        assert_ne!(base, target);
        assert_ne!(base, image);
    }

    #[test]
    fn test_parameter_order_is_significant() {
        let ab = params(&[("a", json!(1)), ("b", json!(2))]);
        let ba = params(&[("b", json!(2)), ("a", json!(1))]);
        let first = Fingerprint::compute(GenerationKind::Text, "p", &ab, "t", None);
        let second = Fingerprint::compute(GenerationKind::Text, "p", &ba, "t", None);
        assert_ne!(first, second);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let joined = params(&[("ab", json!("cd"))]);
        let split = params(&[("abc", json!("d"))]);
        let first = Fingerprint::compute(GenerationKind::Text, "p", &joined, "t", None);
        let second = Fingerprint::compute(GenerationKind::Text, "p", &split, "t", None);
        assert_ne!(first, second);
    }

    #[test]
    fn test_hex_digest_shape() {
        let fp = Fingerprint::compute(GenerationKind::Text, "p", &[], "t", None);
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp.short().len(), 12);
    }
}

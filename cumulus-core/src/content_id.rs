//! Content identifiers for storage-agnostic object identity.
//!
//! Every immutable object in a cumulus store — node envelopes, attribute
//! blobs, root manifests — is addressed by a `ContentId`: a content kind tag
//! plus the SHA-256 digest of the payload bytes. Identical bytes under the
//! same kind always produce the same id, so writes are idempotent and racing
//! writers are harmless.
//!
//! ## String form
//!
//! The canonical string representation is `"{kind}:{hex}"`, e.g.
//! `node:9f86d08…`. This is what appears in JSON envelopes, logs, and APIs.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::str::FromStr;

/// What a blob *is*, so storage can choose its layout and readers can
/// reject category confusion. Closed set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    /// Octree node envelope (JSON).
    Node,
    /// Attribute array blob (binary).
    Attribute,
    /// Root manifest (JSON, stored under a caller-supplied name).
    Manifest,
}

impl ContentKind {
    /// Stable tag used in the string form and in store layouts.
    pub fn tag(&self) -> &'static str {
        match self {
            ContentKind::Node => "node",
            ContentKind::Attribute => "attr",
            ContentKind::Manifest => "manifest",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "node" => Some(ContentKind::Node),
            "attr" => Some(ContentKind::Attribute),
            "manifest" => Some(ContentKind::Manifest),
            _ => None,
        }
    }
}

/// Compute the SHA-256 digest of `bytes` as a lowercase hex string.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(sha2::Sha256::digest(bytes))
}

/// Content identifier: kind tag + SHA-256 digest.
///
/// The canonical identity for all immutable objects in a cumulus store.
/// Ids are opaque to callers; only the store derives layout from them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId {
    kind: ContentKind,
    digest: [u8; 32],
}

impl ContentId {
    /// Id of `bytes` stored under `kind`.
    pub fn new(kind: ContentKind, bytes: &[u8]) -> Self {
        let digest = sha2::Sha256::digest(bytes);
        Self {
            kind,
            digest: digest.into(),
        }
    }

    /// Deterministically derive an id from a sequence of parts.
    ///
    /// Parts are hashed with length prefixes (domain separation), so
    /// `derive(k, ["ab", "c"])` and `derive(k, ["a", "bc"])` differ. Used
    /// for ids that are a pure function of other ids — e.g. the id of a
    /// filtered subnode is derived from `(parent id, filter JSON, octant)`.
    pub fn derive<'a>(kind: ContentKind, parts: impl IntoIterator<Item = &'a [u8]>) -> Self {
        let mut hasher = sha2::Sha256::new();
        for part in parts {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self {
            kind,
            digest: hasher.finalize().into(),
        }
    }

    /// The content kind tag of this id.
    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    /// The raw SHA-256 digest.
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// The hex-encoded digest (without the kind tag).
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Re-hash `bytes` and check the result matches this id's digest.
    ///
    /// Use when accepting objects from untrusted stores.
    pub fn verify(&self, bytes: &[u8]) -> bool {
        sha2::Sha256::digest(bytes).as_slice() == self.digest
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.tag(), self.digest_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Full digests drown log lines; eight hex chars identify a blob
        // within any one store in practice.
        write!(f, "ContentId({}:{}…)", self.kind.tag(), &self.digest_hex()[..8])
    }
}

impl FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (tag, hex_digest) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_address(format!("missing kind tag: {s}")))?;
        let kind = ContentKind::from_tag(tag)
            .ok_or_else(|| Error::invalid_address(format!("unknown content kind: {tag}")))?;
        let bytes = hex::decode(hex_digest)
            .map_err(|e| Error::invalid_address(format!("bad digest hex: {e}")))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::invalid_address(format!("digest must be 32 bytes: {s}")))?;
        Ok(Self { kind, digest })
    }
}

// Serde: always the string form. Envelopes are JSON; a binary form has no
// consumer here.

impl Serialize for ContentId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_verify() {
        let id = ContentId::new(ContentKind::Node, b"hello world");
        assert!(id.verify(b"hello world"));
        assert!(!id.verify(b"wrong data"));
    }

    #[test]
    fn test_same_bytes_different_kinds_differ() {
        let a = ContentId::new(ContentKind::Node, b"payload");
        let b = ContentId::new(ContentKind::Attribute, b"payload");
        assert_ne!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn test_string_roundtrip() {
        let id = ContentId::new(ContentKind::Attribute, b"attr payload");
        let s = id.to_string();
        assert!(s.starts_with("attr:"));
        let parsed: ContentId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("no-tag-here".parse::<ContentId>().is_err());
        assert!("widget:0011".parse::<ContentId>().is_err());
        assert!("node:zz".parse::<ContentId>().is_err());
        assert!("node:00".parse::<ContentId>().is_err());
    }

    #[test]
    fn test_derive_is_deterministic_and_separated() {
        let a = ContentId::derive(ContentKind::Node, [b"ab".as_slice(), b"c".as_slice()]);
        let b = ContentId::derive(ContentKind::Node, [b"ab".as_slice(), b"c".as_slice()]);
        let c = ContentId::derive(ContentKind::Node, [b"a".as_slice(), b"bc".as_slice()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_serde_json_roundtrip() {
        let id = ContentId::new(ContentKind::Manifest, b"json test");
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with('"'));
        let parsed: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}

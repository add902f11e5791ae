//! Content identifiers.
//!
//! A cid is a pure function of a node's content hash: the binary form is a
//! CIDv1 header (version 1, raw codec, sha2-256 multihash of 32 bytes)
//! followed by the digest, and the text form is multibase `u` (unpadded
//! base64url) of the binary form. Because the derivation is reversible, a
//! cid can be recovered from the hash reported by the ledger and vice versa.

use crate::hash::ContentHash;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CIDv1 header: version, raw codec, sha2-256, digest length.
const CID_HEADER: [u8; 4] = [0x01, 0x55, 0x12, 0x20];

/// Multibase prefix for unpadded base64url.
const MULTIBASE_BASE64URL: char = 'u';

const CID_BINARY_LEN: usize = CID_HEADER.len() + 32;

/// A content identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid(ContentHash);

impl Cid {
    /// Derive the cid for a content hash.
    pub fn from_content_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Hash `data` and derive its cid.
    pub fn compute(data: &[u8]) -> Self {
        Self(ContentHash::compute(data))
    }

    /// The content hash this cid was derived from.
    pub fn content_hash(&self) -> &ContentHash {
        &self.0
    }

    /// Binary CIDv1 form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CID_BINARY_LEN);
        out.extend_from_slice(&CID_HEADER);
        out.extend_from_slice(self.0.as_bytes());
        out
    }

    /// Parse the binary CIDv1 form.
    pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        if bytes.len() != CID_BINARY_LEN {
            return Err(crate::Error::InvalidCid(format!(
                "expected {CID_BINARY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[..CID_HEADER.len()] != CID_HEADER {
            return Err(crate::Error::InvalidCid(
                "unsupported cid version, codec or multihash".to_string(),
            ));
        }
        let hash = ContentHash::from_slice(&bytes[CID_HEADER.len()..])
            .map_err(|e| crate::Error::InvalidCid(e.to_string()))?;
        Ok(Self(hash))
    }

    /// Parse the multibase text form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let Some(encoded) = s.strip_prefix(MULTIBASE_BASE64URL) else {
            return Err(crate::Error::InvalidCid(format!(
                "expected multibase prefix '{MULTIBASE_BASE64URL}': {s}"
            )));
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| crate::Error::InvalidCid(format!("{s}: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{MULTIBASE_BASE64URL}{}",
            URL_SAFE_NO_PAD.encode(self.to_bytes())
        )
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl FromStr for Cid {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Cid {
    type Error = crate::Error;

    fn try_from(s: String) -> crate::Result<Self> {
        Self::parse(&s)
    }
}

impl From<Cid> for String {
    fn from(cid: Cid) -> Self {
        cid.to_string()
    }
}

//! Canonical encoding of the leaves the hub appends to its backend log.
//!
//! A hub leaf is three variable-length opaque fields in fixed order:
//! source URL, head data and signature. Each field is written as a 2-byte
//! big-endian length followed by the bytes, the same layout TLS uses for
//! `opaque<0..2^16-1>` vectors. The encoding is deterministic, so the
//! identity hash over it can be used by the backend to deduplicate.

use sha2::{Digest, Sha256};

/// Size in bytes of every hash the hub deals with (SHA-256).
pub const HASH_SIZE: usize = 32;

/// Largest field length representable by the 2-byte length prefix.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

const LENGTH_PREFIX: usize = 2;

/// Error type for leaf encoding and decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeafError {
    /// A field does not fit in its length prefix
    #[error("{field} is {len} bytes, maximum is {MAX_FIELD_LEN}")]
    FieldTooLong {
        /// Name of the offending field
        field: &'static str,
        /// Actual length
        len: usize,
    },
    /// The record ends before all fields were read
    #[error("malformed leaf: {0}")]
    MalformedLeaf(String),
    /// Bytes follow a complete record
    #[error("trailing data after leaf: {0} bytes")]
    TrailingData(usize),
}

/// A gossiped source-log head, as stored in the hub's log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubLeaf {
    /// URL of the source log the head came from
    pub source_url: Vec<u8>,
    /// Opaque head data as signed by the source log
    pub head_data: Vec<u8>,
    /// Source log signature over `head_data`
    pub signature: Vec<u8>,
}

impl HubLeaf {
    /// Creates a leaf from its parts
    pub fn new(source_url: impl Into<Vec<u8>>, head_data: Vec<u8>, signature: Vec<u8>) -> Self {
        Self {
            source_url: source_url.into(),
            head_data,
            signature,
        }
    }

    /// Serializes the leaf into its canonical form.
    ///
    /// # Errors
    ///
    /// Returns `LeafError::FieldTooLong` if any field exceeds [`MAX_FIELD_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, LeafError> {
        let fields = [
            ("source_url", &self.source_url),
            ("head_data", &self.head_data),
            ("signature", &self.signature),
        ];
        let total: usize = fields.iter().map(|(_, f)| LENGTH_PREFIX + f.len()).sum();
        let mut out = Vec::with_capacity(total);
        for (field, data) in fields {
            let len = u16::try_from(data.len()).map_err(|_| LeafError::FieldTooLong {
                field,
                len: data.len(),
            })?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(data);
        }
        Ok(out)
    }

    /// Parses a canonical leaf, rejecting truncated input and trailing bytes.
    ///
    /// # Errors
    ///
    /// - `LeafError::MalformedLeaf`: if the record is structurally incomplete
    /// - `LeafError::TrailingData`: if bytes follow the last field
    pub fn decode(data: &[u8]) -> Result<Self, LeafError> {
        let mut reader = Reader { data, pos: 0 };
        let source_url = reader.opaque("source_url")?;
        let head_data = reader.opaque("head_data")?;
        let signature = reader.opaque("signature")?;
        let rest = reader.remaining();
        if rest > 0 {
            return Err(LeafError::TrailingData(rest));
        }
        Ok(Self {
            source_url,
            head_data,
            signature,
        })
    }

    /// Encodes the leaf and returns it with its identity hash.
    ///
    /// # Errors
    ///
    /// Returns `LeafError::FieldTooLong` if the leaf cannot be encoded.
    pub fn encode_with_identity(&self) -> Result<(Vec<u8>, [u8; HASH_SIZE]), LeafError> {
        let data = self.encode()?;
        let hash = identity_hash(&data);
        Ok((data, hash))
    }
}

/// Content hash of an encoded leaf. Equal encodings give equal identities.
#[must_use]
pub fn identity_hash(leaf_data: &[u8]) -> [u8; HASH_SIZE] {
    Sha256::digest(leaf_data).into()
}

/// RFC 6962 Merkle leaf hash, `SHA-256(0x00 || leaf_data)`.
///
/// This is the hash clients pass to get-proof-by-hash.
#[must_use]
pub fn merkle_leaf_hash(leaf_data: &[u8]) -> [u8; HASH_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update([0u8]);
    hasher.update(leaf_data);
    hasher.finalize().into()
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize, field: &str) -> Result<&[u8], LeafError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                LeafError::MalformedLeaf(format!(
                    "{field} needs {n} bytes at offset {}, only {} left",
                    self.pos,
                    self.remaining()
                ))
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn opaque(&mut self, field: &str) -> Result<Vec<u8>, LeafError> {
        let prefix = self.take(LENGTH_PREFIX, field)?;
        let len = usize::from(u16::from_be_bytes([prefix[0], prefix[1]]));
        Ok(self.take(len, field)?.to_vec())
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let leaf = HubLeaf::new("https://log.example.com", vec![1, 2, 3], vec![9; 64]);
        let data = leaf.encode().expect("Should encode");
        assert_eq!(HubLeaf::decode(&data).expect("Should decode"), leaf);
    }

    #[test]
    fn test_round_trip_empty_fields() {
        let leaf = HubLeaf::new(Vec::new(), Vec::new(), Vec::new());
        let data = leaf.encode().expect("Should encode");
        assert_eq!(data, vec![0; 6], "Empty leaf is three zero length prefixes");
        assert_eq!(HubLeaf::decode(&data).expect("Should decode"), leaf);
    }

    #[test]
    fn test_round_trip_field_lengths() {
        for len in [0, 1, 255, 256, MAX_FIELD_LEN] {
            let long = vec![0x5c; len];
            let leaves = [
                HubLeaf::new(long.clone(), vec![1], vec![2]),
                HubLeaf::new("u", long.clone(), vec![2]),
                HubLeaf::new("u", vec![1], long.clone()),
                HubLeaf::new(long.clone(), long.clone(), long),
            ];
            for leaf in leaves {
                let data = leaf.encode().expect("Should encode");
                let payload = leaf.source_url.len() + leaf.head_data.len() + leaf.signature.len();
                assert_eq!(data.len(), 6 + payload, "len {len}");
                assert_eq!(HubLeaf::decode(&data).expect("Should decode"), leaf, "len {len}");
            }
        }
    }

    #[test]
    fn test_encoding_layout() {
        let leaf = HubLeaf::new("ab", vec![0xff], Vec::new());
        assert_eq!(
            leaf.encode().expect("Should encode"),
            vec![0, 2, b'a', b'b', 0, 1, 0xff, 0, 0]
        );
    }

    #[test]
    fn test_max_length_field() {
        let leaf = HubLeaf::new("u", vec![7; MAX_FIELD_LEN], vec![1]);
        let data = leaf.encode().expect("Field at the limit should encode");
        assert_eq!(HubLeaf::decode(&data).expect("Should decode"), leaf);
    }

    #[test]
    fn test_field_too_long() {
        let leaf = HubLeaf::new("u", vec![0; MAX_FIELD_LEN + 1], Vec::new());
        assert_eq!(
            leaf.encode(),
            Err(LeafError::FieldTooLong {
                field: "head_data",
                len: MAX_FIELD_LEN + 1
            })
        );
    }

    #[test]
    fn test_truncated_record() {
        let data = HubLeaf::new("url", vec![1, 2, 3], vec![4, 5])
            .encode()
            .expect("Should encode");
        for cut in 0..data.len() {
            assert!(
                matches!(HubLeaf::decode(&data[..cut]), Err(LeafError::MalformedLeaf(_))),
                "Truncation at {cut} should be malformed"
            );
        }
    }

    #[test]
    fn test_trailing_data() {
        let mut data = HubLeaf::new("url", vec![1], vec![2])
            .encode()
            .expect("Should encode");
        data.extend_from_slice(&[0, 0]);
        assert_eq!(HubLeaf::decode(&data), Err(LeafError::TrailingData(2)));
    }

    #[test]
    fn test_identity_hash_is_content_hash() {
        let a = HubLeaf::new("url", vec![1], vec![2]);
        let b = a.clone();
        let (data_a, hash_a) = a.encode_with_identity().expect("Should encode");
        let (_, hash_b) = b.encode_with_identity().expect("Should encode");
        assert_eq!(hash_a, hash_b);
        assert_eq!(hash_a, identity_hash(&data_a));

        let (_, other) = HubLeaf::new("url", vec![1], vec![3])
            .encode_with_identity()
            .expect("Should encode");
        assert_ne!(hash_a, other);
    }

    #[test]
    fn test_merkle_leaf_hash_is_domain_separated() {
        let data = b"leaf";
        assert_ne!(merkle_leaf_hash(data), identity_hash(data));
        let mut prefixed = vec![0u8];
        prefixed.extend_from_slice(data);
        assert_eq!(merkle_leaf_hash(data), identity_hash(&prefixed));
    }
}

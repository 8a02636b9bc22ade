use async_trait::async_trait;
use ct_merkle::mem_backed_tree::MemoryBackedTree;
use ct_merkle::HashableLeaf;
use digest::Update;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use parking_lot::RwLock;
use sha2::Sha256;
use std::collections::HashMap;

use super::{
    AppendOutcome, BackendError, Code, ConsistencyProofResponse, InclusionProofResponse,
    LeavesByRangeResponse, LogBackend, LogLeaf, Proof, SignedLogRoot,
};
use crate::leaf::{merkle_leaf_hash, HASH_SIZE};

/// Length of a serialized log root: size, root hash and timestamp.
pub const LOG_ROOT_LEN: usize = 8 + HASH_SIZE + 8;

/// A leaf value as stored in the memory tree.
#[derive(Debug, Clone)]
struct LeafValue(Vec<u8>);

impl HashableLeaf for LeafValue {
    fn hash<H: Update>(&self, hasher: &mut H) {
        hasher.update(&self.0);
    }
}

/// State of one log
struct LogState {
    /// The underlying CT merkle tree implementation
    tree: MemoryBackedTree<Sha256, LeafValue>,
    /// Identity hash of each leaf, by index
    identities: Vec<Vec<u8>>,
    /// Maps identity hash to the leaf index, for deduplication
    identity_to_index: HashMap<Vec<u8>, u64>,
    /// Maps Merkle leaf hash to every index holding that leaf
    leaf_hash_to_index: HashMap<Vec<u8>, Vec<u64>>,
}

impl LogState {
    fn new() -> Self {
        Self {
            tree: MemoryBackedTree::new(),
            identities: Vec::new(),
            identity_to_index: HashMap::new(),
            leaf_hash_to_index: HashMap::new(),
        }
    }

    fn len(&self) -> u64 {
        self.tree.len()
    }

    fn push(&mut self, value: Vec<u8>, identity_hash: Vec<u8>) {
        let idx = self.tree.len();
        self.leaf_hash_to_index
            .entry(merkle_leaf_hash(&value).to_vec())
            .or_default()
            .push(idx);
        self.identity_to_index.insert(identity_hash.clone(), idx);
        self.identities.push(identity_hash);
        self.tree.push(LeafValue(value));
    }

    /// Returns a tree holding the first `size` leaves.
    fn rewind(&self, size: u64) -> Result<MemoryBackedTree<Sha256, LeafValue>, BackendError> {
        let size_usize = usize::try_from(size)
            .map_err(|_| BackendError::status(Code::OutOfRange, "tree size too large"))?;
        let mut historical_tree = MemoryBackedTree::new();
        for leaf in self.tree.items().iter().take(size_usize) {
            historical_tree.push(leaf.clone());
        }
        Ok(historical_tree)
    }

    fn leaf(&self, index: u64) -> Option<LogLeaf> {
        let idx = usize::try_from(index).ok()?;
        let value = self.tree.items().get(idx)?;
        Some(LogLeaf {
            leaf_index: index,
            leaf_value: value.0.clone(),
            leaf_identity_hash: self.identities.get(idx)?.clone(),
            merkle_leaf_hash: merkle_leaf_hash(&value.0).to_vec(),
        })
    }
}

/// Splits concatenated proof bytes into hash nodes.
fn unknown_log(log_id: i64) -> BackendError {
    BackendError::status(Code::NotFound, format!("log {log_id} not found"))
}

fn split_hashes(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes.chunks(HASH_SIZE).map(<[u8]>::to_vec).collect()
}

/// Serializes a log root: tree size (u64 BE), root hash, timestamp in
/// nanoseconds (u64 BE).
#[must_use]
pub fn encode_log_root(tree_size: u64, root_hash: &[u8], timestamp_nanos: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(LOG_ROOT_LEN);
    out.extend_from_slice(&tree_size.to_be_bytes());
    out.extend_from_slice(root_hash);
    out.extend_from_slice(&timestamp_nanos.to_be_bytes());
    out
}

/// Parses a log root produced by [`encode_log_root`] into
/// `(tree_size, root_hash, timestamp_nanos)`.
#[must_use]
pub fn decode_log_root(data: &[u8]) -> Option<(u64, Vec<u8>, u64)> {
    if data.len() != LOG_ROOT_LEN {
        return None;
    }
    let (size, rest) = data.split_at(8);
    let (root, ts) = rest.split_at(HASH_SIZE);
    Some((
        u64::from_be_bytes(size.try_into().ok()?),
        root.to_vec(),
        u64::from_be_bytes(ts.try_into().ok()?),
    ))
}

/// In-process verifiable log backed by an RFC 6962 memory tree.
///
/// Leaves are sequenced as soon as they are appended, so every accepted leaf
/// is visible to the next read. Logs must be created with
/// [`MemoryBackend::create_log`] before use.
pub struct MemoryBackend {
    signing_key: SigningKey,
    logs: RwLock<HashMap<i64, LogState>>,
}

impl MemoryBackend {
    /// Creates a backend that signs log roots with `signing_key`
    #[must_use]
    pub fn new(signing_key: SigningKey) -> Self {
        Self {
            signing_key,
            logs: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a backend with a fresh random signing key
    #[must_use]
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Creates an empty log. Creating an existing log is a no-op.
    pub fn create_log(&self, log_id: i64) {
        self.logs.write().entry(log_id).or_insert_with(LogState::new);
    }

    /// Key that verifies the signed log roots
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    fn sign_root(&self, state: &LogState) -> SignedLogRoot {
        let tree_size = state.len();
        let timestamp = chrono::Utc::now()
            .timestamp_nanos_opt()
            .and_then(|ts| u64::try_from(ts).ok())
            .unwrap_or(0);
        let log_root = encode_log_root(tree_size, state.tree.root().as_bytes(), timestamp);
        let log_root_signature = self.signing_key.sign(&log_root).to_bytes().to_vec();
        SignedLogRoot {
            log_root,
            log_root_signature,
            tree_size,
        }
    }

    fn with_log<T>(
        &self,
        log_id: i64,
        f: impl FnOnce(&LogState) -> Result<T, BackendError>,
    ) -> Result<T, BackendError> {
        let logs = self.logs.read();
        let state = logs
            .get(&log_id)
            .ok_or_else(|| unknown_log(log_id))?;
        f(state)
    }
}

#[async_trait]
impl LogBackend for MemoryBackend {
    async fn append_leaf(
        &self,
        log_id: i64,
        leaf_value: Vec<u8>,
        identity_hash: Vec<u8>,
    ) -> Result<AppendOutcome, BackendError> {
        let mut logs = self.logs.write();
        let state = logs
            .get_mut(&log_id)
            .ok_or_else(|| unknown_log(log_id))?;
        if state.identity_to_index.contains_key(&identity_hash) {
            return Ok(AppendOutcome::Duplicate);
        }
        state.push(leaf_value, identity_hash);
        Ok(AppendOutcome::Accepted)
    }

    async fn get_latest_signed_log_root(
        &self,
        log_id: i64,
    ) -> Result<Option<SignedLogRoot>, BackendError> {
        self.with_log(log_id, |state| Ok(Some(self.sign_root(state))))
    }

    async fn get_consistency_proof(
        &self,
        log_id: i64,
        first: u64,
        second: u64,
    ) -> Result<ConsistencyProofResponse, BackendError> {
        if first == 0 || first > second {
            return Err(BackendError::status(
                Code::InvalidArgument,
                format!("invalid consistency range first={first} second={second}"),
            ));
        }
        self.with_log(log_id, |state| {
            let signed_log_root = Some(self.sign_root(state));
            if second > state.len() {
                // Not grown that far yet: answer with the head only
                return Ok(ConsistencyProofResponse {
                    proof: None,
                    signed_log_root,
                });
            }
            let hashes = if first == second {
                Vec::new()
            } else {
                let num_additions = usize::try_from(second - first)
                    .map_err(|_| BackendError::status(Code::OutOfRange, "range too large"))?;
                let proof = if second == state.len() {
                    state.tree.prove_consistency(num_additions)
                } else {
                    state.rewind(second)?.prove_consistency(num_additions)
                };
                split_hashes(proof.as_bytes())
            };
            Ok(ConsistencyProofResponse {
                proof: Some(Proof {
                    leaf_index: 0,
                    hashes,
                }),
                signed_log_root,
            })
        })
    }

    async fn get_inclusion_proof_by_hash(
        &self,
        log_id: i64,
        leaf_hash: &[u8],
        tree_size: u64,
        _order_by_sequence: bool,
    ) -> Result<InclusionProofResponse, BackendError> {
        if tree_size == 0 {
            return Err(BackendError::status(
                Code::InvalidArgument,
                "tree_size must be positive",
            ));
        }
        self.with_log(log_id, |state| {
            let signed_log_root = Some(self.sign_root(state));
            if tree_size > state.len() {
                return Ok(InclusionProofResponse {
                    proofs: Vec::new(),
                    signed_log_root,
                });
            }
            // Indices are pushed in order, so proofs come out by sequence
            let indices: Vec<u64> = state
                .leaf_hash_to_index
                .get(leaf_hash)
                .map(|idx| idx.iter().copied().filter(|i| *i < tree_size).collect())
                .unwrap_or_default();
            if indices.is_empty() {
                return Ok(InclusionProofResponse {
                    proofs: Vec::new(),
                    signed_log_root,
                });
            }

            let rewound;
            let tree = if tree_size == state.len() {
                &state.tree
            } else {
                rewound = state.rewind(tree_size)?;
                &rewound
            };
            let proofs = indices
                .into_iter()
                .map(|leaf_index| {
                    let idx = usize::try_from(leaf_index).map_err(|_| {
                        BackendError::status(Code::OutOfRange, "leaf index too large")
                    })?;
                    Ok(Proof {
                        leaf_index,
                        hashes: split_hashes(tree.prove_inclusion(idx).as_bytes()),
                    })
                })
                .collect::<Result<Vec<_>, BackendError>>()?;
            Ok(InclusionProofResponse {
                proofs,
                signed_log_root,
            })
        })
    }

    async fn get_leaves_by_range(
        &self,
        log_id: i64,
        start: u64,
        count: u64,
    ) -> Result<LeavesByRangeResponse, BackendError> {
        if count == 0 {
            return Err(BackendError::status(
                Code::InvalidArgument,
                "count must be positive",
            ));
        }
        self.with_log(log_id, |state| {
            let end = start.saturating_add(count).min(state.len());
            Ok(LeavesByRangeResponse {
                leaves: (start..end).map(|i| state.leaf(i)).collect(),
                signed_log_root: Some(self.sign_root(state)),
                revised_tree_size: None,
            })
        })
    }
}

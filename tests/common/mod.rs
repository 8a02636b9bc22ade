#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use ed25519_dalek::{Signer, SigningKey};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use gossip_hub::backend::{
    AppendOutcome, BackendError, ConsistencyProofResponse, InclusionProofResponse,
    LeavesByRangeResponse, LogBackend, LogLeaf, Proof, SignedLogRoot,
};
use gossip_hub::keys::{HashAlgorithm, KeyRegistry, SourceLogKey};
use gossip_hub::leaf::{identity_hash, merkle_leaf_hash, HubLeaf};
use gossip_hub::service::{create_server, Hub, HubMetrics, HubOptions};

pub const LOG_ID: i64 = 7;
pub const SOURCE_URL: &str = "https://source.example.com/log";
pub const P256_SOURCE_URL: &str = "https://p256.example.com/log";

/// Ed25519 signing key of the main source log the test hub knows
pub fn source_key() -> SigningKey {
    SigningKey::from_bytes(&[11; 32])
}

/// ECDSA P-256 signing key of the second known source log
pub fn p256_source_key() -> p256::ecdsa::SigningKey {
    p256::ecdsa::SigningKey::from_slice(&[7; 32]).expect("valid scalar")
}

pub fn p256_source_der() -> Vec<u8> {
    use p256::pkcs8::EncodePublicKey;
    p256_source_key()
        .verifying_key()
        .to_public_key_der()
        .expect("key encodes")
        .as_bytes()
        .to_vec()
}

pub fn registry() -> KeyRegistry {
    let key = source_key();
    let ed25519 = SourceLogKey::new(
        SOURCE_URL,
        key.verifying_key().to_bytes().to_vec(),
        HashAlgorithm::None,
    )
    .expect("valid key");
    let ecdsa = SourceLogKey::new(P256_SOURCE_URL, p256_source_der(), HashAlgorithm::Sha256)
        .expect("valid key");
    KeyRegistry::new([ed25519, ecdsa]).expect("registry")
}

/// Canonical leaf bytes for test leaf `i`
pub fn leaf_value(i: u64) -> Vec<u8> {
    HubLeaf::new(SOURCE_URL, i.to_be_bytes().to_vec(), vec![0xaa; 64])
        .encode()
        .expect("encodes")
}

pub fn log_leaf(i: u64) -> LogLeaf {
    let value = leaf_value(i);
    LogLeaf {
        leaf_index: i,
        leaf_identity_hash: identity_hash(&value).to_vec(),
        merkle_leaf_hash: merkle_leaf_hash(&value).to_vec(),
        leaf_value: value,
    }
}

/// JSON body of an add-log-head request signed by the source key
pub fn signed_head(head_data: &[u8]) -> serde_json::Value {
    let sig = source_key().sign(head_data).to_bytes();
    serde_json::json!({
        "source_url": SOURCE_URL,
        "head_data": b64(head_data),
        "signature": b64(&sig),
    })
}

/// JSON body of an add-log-head request signed by the P-256 source key
pub fn p256_signed_head(head_data: &[u8]) -> serde_json::Value {
    let sig: p256::ecdsa::Signature =
        p256::ecdsa::signature::Signer::sign(&p256_source_key(), head_data);
    serde_json::json!({
        "source_url": P256_SOURCE_URL,
        "head_data": b64(head_data),
        "signature": b64(sig.to_der().as_bytes()),
    })
}

pub fn b64(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Scripted responses of the fake backend
#[derive(Default)]
pub struct Script {
    /// Size reported in every signed log root; `None` means no root at all
    pub tree_size: Option<u64>,
    /// Leaves available for ranged reads
    pub leaves: Vec<LogLeaf>,
    /// Returned by every call when set
    pub error: Option<BackendError>,
    /// Every call sleeps this long before answering
    pub delay: Option<Duration>,
    pub consistency_proof: Option<Proof>,
    pub inclusion_proofs: Vec<Proof>,
    /// Returned verbatim by ranged reads when set
    pub range_override: Option<Vec<Option<LogLeaf>>>,
    /// Revised size attached to successive ranged reads
    pub revisions: VecDeque<Option<u64>>,
    /// Ranged reads starting at or beyond this index return no leaves
    pub empty_from: Option<u64>,
}

/// In-memory backend fake that counts calls and records what it was asked
#[derive(Default)]
pub struct FakeBackend {
    pub script: Mutex<Script>,
    pub calls: AtomicUsize,
    pub appended: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    pub range_requests: Mutex<Vec<(u64, u64)>>,
}

impl FakeBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Self::default()
        })
    }

    /// A backend holding `n` well-formed leaves
    pub fn with_leaves(n: u64) -> Arc<Self> {
        Self::new(Script {
            tree_size: Some(n),
            leaves: (0..n).map(log_leaf).collect(),
            ..Script::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Counts the call, applies the scripted delay, then the scripted error.
    async fn enter(&self) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (delay, error) = {
            let script = self.script.lock();
            (script.delay, script.error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        error.map_or(Ok(()), Err)
    }

    fn root(&self) -> Option<SignedLogRoot> {
        self.script.lock().tree_size.map(|tree_size| SignedLogRoot {
            log_root: tree_size.to_be_bytes().to_vec(),
            log_root_signature: vec![0x5a; 64],
            tree_size,
        })
    }
}

#[async_trait]
impl LogBackend for FakeBackend {
    async fn append_leaf(
        &self,
        _log_id: i64,
        leaf_value: Vec<u8>,
        identity_hash: Vec<u8>,
    ) -> Result<AppendOutcome, BackendError> {
        self.enter().await?;
        let mut appended = self.appended.lock();
        if appended.iter().any(|(_, id)| *id == identity_hash) {
            return Ok(AppendOutcome::Duplicate);
        }
        appended.push((leaf_value, identity_hash));
        Ok(AppendOutcome::Accepted)
    }

    async fn get_latest_signed_log_root(
        &self,
        _log_id: i64,
    ) -> Result<Option<SignedLogRoot>, BackendError> {
        self.enter().await?;
        Ok(self.root())
    }

    async fn get_consistency_proof(
        &self,
        _log_id: i64,
        _first: u64,
        _second: u64,
    ) -> Result<ConsistencyProofResponse, BackendError> {
        self.enter().await?;
        let proof = self.script.lock().consistency_proof.clone();
        Ok(ConsistencyProofResponse {
            proof,
            signed_log_root: self.root(),
        })
    }

    async fn get_inclusion_proof_by_hash(
        &self,
        _log_id: i64,
        _leaf_hash: &[u8],
        _tree_size: u64,
        _order_by_sequence: bool,
    ) -> Result<InclusionProofResponse, BackendError> {
        self.enter().await?;
        let proofs = self.script.lock().inclusion_proofs.clone();
        Ok(InclusionProofResponse {
            proofs,
            signed_log_root: self.root(),
        })
    }

    async fn get_leaves_by_range(
        &self,
        _log_id: i64,
        start: u64,
        count: u64,
    ) -> Result<LeavesByRangeResponse, BackendError> {
        self.enter().await?;
        self.range_requests.lock().push((start, count));
        let signed_log_root = self.root();
        let mut script = self.script.lock();
        let revised_tree_size = script.revisions.pop_front().flatten();
        let leaves = if let Some(leaves) = script.range_override.clone() {
            leaves
        } else if script.empty_from.is_some_and(|from| start >= from) {
            Vec::new()
        } else {
            script
                .leaves
                .iter()
                .skip(usize::try_from(start).unwrap_or(usize::MAX))
                .take(usize::try_from(count).unwrap_or(usize::MAX))
                .cloned()
                .map(Some)
                .collect()
        };
        Ok(LeavesByRangeResponse {
            leaves,
            signed_log_root,
            revised_tree_size,
        })
    }
}

/// Router with one hub under `/hub` over `backend`
pub fn app(backend: Arc<FakeBackend>, options: HubOptions) -> Router {
    let metrics = Arc::new(HubMetrics::new());
    app_with_metrics(backend, options, metrics)
}

pub fn app_with_metrics(
    backend: Arc<FakeBackend>,
    options: HubOptions,
    metrics: Arc<HubMetrics>,
) -> Router {
    let hub = Arc::new(Hub::new(
        LOG_ID,
        "hub",
        backend,
        Arc::new(registry()),
        options,
        &metrics,
    ));
    create_server(vec![("hub".to_string(), hub)], metrics)
}

/// Sends one request through the router and returns status and body text
pub async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<String>,
) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, Body::from))
        .expect("request builds");
    let response = app.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body collects")
        .to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

pub async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    send(app, "GET", uri, None).await
}

pub async fn post(app: Router, uri: &str, body: String) -> (StatusCode, String) {
    send(app, "POST", uri, Some(body)).await
}

use axum::http::Method;
use axum::response::{IntoResponse, Response};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::backend::{BackendError, Code, LogBackend};
use crate::keys::KeyRegistry;
use crate::leaf::HubLeaf;
use crate::service::metrics::{HubInstanceMetrics, HubMetrics};
use crate::service::responses::{
    AddLogHeadRequest, GetEntriesResponse, GetLogKeysResponse, GetProofByHashResponse,
    GetSthConsistencyResponse, GetSthResponse, LeafEntry, LogKey,
};
use crate::service::routes::Endpoint;
use crate::service::status::{to_http_status, ErrorMapper, HubError};
use crate::service::validation::{
    check_hash_sizes, check_leaf_range, parse_consistency_range, parse_entries_range,
    parse_proof_by_hash,
};

/// Page size used when `max_get_entries` is zero.
pub const DEFAULT_MAX_GET_ENTRIES: u64 = 1000;

/// Backend deadline used by [`HubOptions::default`].
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Instance-wide hub options
#[derive(Debug, Clone)]
pub struct HubOptions {
    /// Deadline applied to every backend call
    pub deadline: Duration,
    /// Maximum number of leaves returned by one get-entries call (0 = default)
    pub max_get_entries: u64,
    /// Consulted before the fixed backend error table
    pub error_mapper: Option<ErrorMapper>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            max_get_entries: DEFAULT_MAX_GET_ENTRIES,
            error_mapper: None,
        }
    }
}

/// One hub instance: the protocol handlers bound to a single backend log.
pub struct Hub {
    log_id: i64,
    /// Log label, `"{prefix}{log_id}"`
    label: String,
    backend: Arc<dyn LogBackend>,
    keys: Arc<KeyRegistry>,
    options: HubOptions,
    metrics: Arc<HubInstanceMetrics>,
}

impl Hub {
    /// Creates a hub for `log_id` and marks it as known in `metrics`
    pub fn new(
        log_id: i64,
        prefix: &str,
        backend: Arc<dyn LogBackend>,
        keys: Arc<KeyRegistry>,
        options: HubOptions,
        metrics: &HubMetrics,
    ) -> Self {
        let metrics = metrics.hub(log_id);
        metrics.known.store(true, std::sync::atomic::Ordering::Relaxed);
        Self {
            log_id,
            label: format!("{prefix}{{{log_id}}}"),
            backend,
            keys,
            options,
            metrics,
        }
    }

    #[must_use]
    pub const fn log_id(&self) -> i64 {
        self.log_id
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs one endpoint handler with the common method check, logging and
    /// metrics, and renders the outcome.
    pub async fn serve<T, F>(&self, endpoint: Endpoint, method: &Method, handler: F) -> Response
    where
        F: Future<Output = Result<T, HubError>>,
        T: IntoResponse,
    {
        let metrics = self.metrics.endpoint(endpoint);
        metrics.record_request();
        let start = Instant::now();
        debug!(hub = %self.label, endpoint = endpoint.path(), %method, "request");

        let result = if *method == endpoint.method() {
            handler.await
        } else {
            warn!(hub = %self.label, endpoint = endpoint.path(), %method, "wrong HTTP method");
            Err(HubError::MethodNotAllowed(method.clone()))
        };

        let response = match result {
            Ok(body) => body.into_response(),
            Err(err) => {
                warn!(hub = %self.label, endpoint = endpoint.path(), error = %err, "handler error");
                err.into_response()
            }
        };
        let status = response.status().as_u16();
        debug!(hub = %self.label, endpoint = endpoint.path(), status, "response");
        metrics.record_response(status, start.elapsed());
        response
    }

    /// Issues one backend call under the instance deadline.
    ///
    /// A call that outlives the deadline is dropped and reported as
    /// `DeadlineExceeded`. Failures are mapped to an HTTP status here.
    async fn call<T, F>(&self, op: &'static str, fut: F) -> Result<T, HubError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        debug!(hub = %self.label, "=> backend.{op}");
        let result = match tokio::time::timeout(self.options.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::status(
                Code::DeadlineExceeded,
                format!("deadline of {:?} exceeded", self.options.deadline),
            )),
        };
        debug!(hub = %self.label, error = ?result.as_ref().err(), "<= backend.{op}");
        result.map_err(|source| HubError::Backend {
            op,
            status: to_http_status(self.options.error_mapper.as_ref(), &source),
            source,
        })
    }

    /// Verifies a submitted source log head and appends it to the hub log.
    ///
    /// Whether the backend accepted a new leaf or found a duplicate is not
    /// reported to the caller.
    ///
    /// # Errors
    ///
    /// - `HubError::BadRequest`: malformed body or invalid signature
    /// - `HubError::NotFound`: unknown source log
    /// - `HubError::Backend`: the append failed
    pub async fn add_log_head(&self, body: &[u8]) -> Result<(), HubError> {
        let req: AddLogHeadRequest = serde_json::from_slice(body).map_err(|e| {
            debug!(hub = %self.label, error = %e, "failed to parse request body");
            HubError::BadRequest(format!("failed to parse add-log-head body: {e}"))
        })?;

        let key = self.keys.get(&req.source_url).ok_or_else(|| {
            debug!(hub = %self.label, source_url = %req.source_url, "unknown source log");
            HubError::NotFound(format!("unknown source log {:?}", req.source_url))
        })?;

        key.verify(&req.head_data, &req.signature).map_err(|e| {
            debug!(
                hub = %self.label,
                source_url = %req.source_url,
                error = %e,
                "failed to validate signature"
            );
            HubError::BadRequest(format!("failed to validate signature from {:?}", req.source_url))
        })?;

        let leaf = HubLeaf::new(req.source_url.clone(), req.head_data, req.signature);
        let (leaf_data, identity_hash) = leaf.encode_with_identity().map_err(|e| {
            debug!(
                hub = %self.label,
                source_url = %req.source_url,
                error = %e,
                "failed to encode hub leaf"
            );
            HubError::BadRequest(format!("failed to create hub leaf: {e}"))
        })?;

        let outcome = self
            .call(
                "AppendLeaf",
                self.backend
                    .append_leaf(self.log_id, leaf_data, identity_hash.to_vec()),
            )
            .await?;
        debug!(hub = %self.label, source_url = %req.source_url, ?outcome, "queued hub leaf");
        Ok(())
    }

    /// Fetches the backend's current signed head and forwards it verbatim.
    ///
    /// # Errors
    ///
    /// - `HubError::Backend`: the backend call failed
    /// - `HubError::Internal`: the backend returned no head
    pub async fn get_sth(&self) -> Result<GetSthResponse, HubError> {
        let root = self
            .call(
                "GetLatestSignedLogRoot",
                self.backend.get_latest_signed_log_root(self.log_id),
            )
            .await?
            .ok_or_else(|| HubError::Internal("no log root returned".to_string()))?;

        self.metrics.record_sth(root.tree_size);
        Ok(GetSthResponse {
            head_data: root.log_root,
            signature: root.log_root_signature,
        })
    }

    /// Returns a consistency proof between tree sizes `first` and `second`.
    ///
    /// `first == 0` is answered locally with an empty proof.
    ///
    /// # Errors
    ///
    /// - `HubError::BadRequest`: bad parameters, or the tree is smaller than `second`
    /// - `HubError::Backend`: the backend call failed
    /// - `HubError::Integrity`: the proof is missing or has a malformed node
    pub async fn get_sth_consistency(
        &self,
        first: Option<&str>,
        second: Option<&str>,
    ) -> Result<GetSthConsistencyResponse, HubError> {
        let (first, second) = parse_consistency_range(first, second)
            .map_err(|e| HubError::BadRequest(format!("failed to parse consistency range: {e}")))?;

        if first == 0 {
            debug!(
                hub = %self.label,
                first,
                second,
                "consistency from empty tree, returning empty proof"
            );
            return Ok(GetSthConsistencyResponse {
                consistency: Vec::new(),
            });
        }

        let rsp = self
            .call(
                "GetConsistencyProof",
                self.backend.get_consistency_proof(self.log_id, first, second),
            )
            .await?;

        // The backend may not have grown far enough yet
        if let Some(root) = &rsp.signed_log_root {
            if root.tree_size < second {
                return Err(HubError::BadRequest(format!(
                    "need tree size: {second} for proof but only got: {}",
                    root.tree_size
                )));
            }
        }

        let proof = rsp.proof.ok_or_else(|| {
            HubError::Integrity("backend returned no consistency proof".to_string())
        })?;
        check_hash_sizes(&proof.hashes)
            .map_err(|e| HubError::Integrity(format!("backend returned invalid proof: {e}")))?;

        Ok(GetSthConsistencyResponse {
            consistency: proof.hashes,
        })
    }

    /// Returns an inclusion proof for the leaf with Merkle hash `hash`.
    ///
    /// # Errors
    ///
    /// - `HubError::BadRequest`: bad parameters
    /// - `HubError::NotFound`: the tree is too small, or the leaf is not present
    /// - `HubError::Backend`: the backend call failed
    /// - `HubError::Integrity`: a proof node is malformed
    pub async fn get_proof_by_hash(
        &self,
        hash: Option<&str>,
        tree_size: Option<&str>,
    ) -> Result<GetProofByHashResponse, HubError> {
        let (leaf_hash, tree_size) = parse_proof_by_hash(hash, tree_size)
            .map_err(|e| HubError::BadRequest(format!("get-proof-by-hash: {e}")))?;

        let rsp = self
            .call(
                "GetInclusionProofByHash",
                self.backend
                    .get_inclusion_proof_by_hash(self.log_id, &leaf_hash, tree_size, true),
            )
            .await?;

        if let Some(root) = &rsp.signed_log_root {
            if root.tree_size < tree_size {
                return Err(HubError::NotFound(format!(
                    "log returned tree size: {} but we expected: {tree_size}",
                    root.tree_size
                )));
            }
        }

        // The backend answers with its head even when it has no proof
        let proof = rsp
            .proofs
            .into_iter()
            .next()
            .ok_or_else(|| HubError::NotFound("backend did not return a proof".to_string()))?;
        check_hash_sizes(&proof.hashes)
            .map_err(|e| HubError::Integrity(format!("backend returned invalid proof: {e}")))?;

        Ok(GetProofByHashResponse {
            leaf_index: proof.leaf_index,
            audit_path: proof.hashes,
        })
    }

    /// Returns the stored leaves in `[start, end]`, clamped to the page size.
    ///
    /// # Errors
    ///
    /// - `HubError::BadRequest`: bad range, or `start` is beyond the tree
    /// - `HubError::Backend`: the backend call failed
    /// - `HubError::Integrity`: the backend returned a bad leaf sequence
    pub async fn get_entries(
        &self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<GetEntriesResponse, HubError> {
        let max_range = match self.options.max_get_entries {
            0 => DEFAULT_MAX_GET_ENTRIES,
            n => n,
        };
        let (start, end) = parse_entries_range(start, end, max_range)
            .map_err(|e| HubError::BadRequest(format!("bad range on get-entries request: {e}")))?;
        let count = end - start + 1;

        let rsp = self
            .call(
                "GetLeavesByRange",
                self.backend.get_leaves_by_range(self.log_id, start, count),
            )
            .await?;

        if let Some(root) = &rsp.signed_log_root {
            if root.tree_size <= start {
                return Err(HubError::BadRequest(format!(
                    "need tree size: {} to get leaves but only got: {}",
                    start + 1,
                    root.tree_size
                )));
            }
        }

        let leaves = check_leaf_range(rsp.leaves, start, end)
            .map_err(|e| HubError::Integrity(format!("{}: {e}", self.label)))?;

        Ok(GetEntriesResponse {
            entries: leaves
                .into_iter()
                .map(|leaf_data| LeafEntry { leaf_data })
                .collect(),
        })
    }

    /// Lists every known source log key.
    #[must_use]
    pub fn get_log_keys(&self) -> GetLogKeysResponse {
        GetLogKeysResponse {
            entries: self
                .keys
                .iter()
                .map(|key| LogKey {
                    url: key.url.clone(),
                    pub_key: key.pub_key_data.clone(),
                })
                .collect(),
        }
    }
}

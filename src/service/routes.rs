use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::{Method, StatusCode},
    response::Json,
};
use std::collections::HashMap;
use std::sync::Arc;

use super::hub::Hub;
use super::metrics::HubMetrics;
use super::status::HubError;
use super::validation::{END, FIRST, HASH, SECOND, START, TREE_SIZE};

// HTTP handlers - thin adapters from axum extractors to `Hub` methods.
// All validation, backend calls and integrity checks live in `Hub`.

/// Path segment between the instance prefix and the endpoint name
pub const PATH_PREFIX: &str = "/gossip/v0/";

/// The six hub endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    AddLogHead = 0,
    GetSth = 1,
    GetSthConsistency = 2,
    GetProofByHash = 3,
    GetEntries = 4,
    GetLogKeys = 5,
}

impl Endpoint {
    pub const COUNT: usize = 6;

    pub const ALL: [Endpoint; Self::COUNT] = [
        Endpoint::AddLogHead,
        Endpoint::GetSth,
        Endpoint::GetSthConsistency,
        Endpoint::GetProofByHash,
        Endpoint::GetEntries,
        Endpoint::GetLogKeys,
    ];

    /// Endpoint name, appended to `{prefix}/gossip/v0/`
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Endpoint::AddLogHead => "add-log-head",
            Endpoint::GetSth => "get-sth",
            Endpoint::GetSthConsistency => "get-sth-consistency",
            Endpoint::GetProofByHash => "get-proof-by-hash",
            Endpoint::GetEntries => "get-entries",
            Endpoint::GetLogKeys => "get-log-keys",
        }
    }

    /// The only HTTP method the endpoint accepts
    #[must_use]
    pub fn method(self) -> Method {
        match self {
            Endpoint::AddLogHead => Method::POST,
            _ => Method::GET,
        }
    }

    /// Full request path under an instance prefix
    #[must_use]
    pub fn full_path(self, prefix: &str) -> String {
        format!("{}{PATH_PREFIX}{}", normalize_prefix(prefix), self.path())
    }
}

/// Makes a prefix start with `/` and drops trailing slashes.
#[must_use]
pub fn normalize_prefix(prefix: &str) -> String {
    let prefix = if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{prefix}")
    };
    prefix.trim_end_matches('/').to_string()
}

type HubState = State<Arc<Hub>>;
type QueryParams = Result<Query<HashMap<String, String>>, QueryRejection>;

fn params(query: QueryParams) -> Result<HashMap<String, String>, HubError> {
    query
        .map(|Query(q)| q)
        .map_err(|e| HubError::BadRequest(format!("failed to parse form data: {e}")))
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str)
}

// Handler for POST add-log-head
pub async fn add_log_head(
    State(hub): HubState,
    method: Method,
    body: Bytes,
) -> axum::response::Response {
    hub.serve(Endpoint::AddLogHead, &method, async {
        hub.add_log_head(&body).await.map(|()| StatusCode::OK)
    })
    .await
}

// Handler for GET get-sth
pub async fn get_sth(State(hub): HubState, method: Method) -> axum::response::Response {
    hub.serve(Endpoint::GetSth, &method, async {
        hub.get_sth().await.map(Json)
    })
    .await
}

// Handler for GET get-sth-consistency?first=N&second=M
pub async fn get_sth_consistency(
    State(hub): HubState,
    method: Method,
    query: QueryParams,
) -> axum::response::Response {
    hub.serve(Endpoint::GetSthConsistency, &method, async {
        let q = params(query)?;
        hub.get_sth_consistency(param(&q, FIRST), param(&q, SECOND))
            .await
            .map(Json)
    })
    .await
}

// Handler for GET get-proof-by-hash?hash=B64&tree_size=N
pub async fn get_proof_by_hash(
    State(hub): HubState,
    method: Method,
    query: QueryParams,
) -> axum::response::Response {
    hub.serve(Endpoint::GetProofByHash, &method, async {
        let q = params(query)?;
        hub.get_proof_by_hash(param(&q, HASH), param(&q, TREE_SIZE))
            .await
            .map(Json)
    })
    .await
}

// Handler for GET get-entries?start=N&end=M
pub async fn get_entries(
    State(hub): HubState,
    method: Method,
    query: QueryParams,
) -> axum::response::Response {
    hub.serve(Endpoint::GetEntries, &method, async {
        let q = params(query)?;
        hub.get_entries(param(&q, START), param(&q, END))
            .await
            .map(Json)
    })
    .await
}

// Handler for GET get-log-keys
pub async fn get_log_keys(State(hub): HubState, method: Method) -> axum::response::Response {
    hub.serve(Endpoint::GetLogKeys, &method, async {
        Ok::<_, HubError>(Json(hub.get_log_keys()))
    })
    .await
}

// Handler for GET /metrics
pub async fn metrics(State(metrics): State<Arc<HubMetrics>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "hubs": metrics.snapshot() }))
}

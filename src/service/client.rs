use anyhow::{bail, Result};
use base64::Engine;
use reqwest::{Client as HttpClient, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::service::responses::{
    AddLogHeadRequest, GetEntriesResponse, GetLogKeysResponse, GetProofByHashResponse,
    GetSthConsistencyResponse, GetSthResponse,
};
use crate::service::routes::Endpoint;
use crate::service::validation::{END, FIRST, HASH, SECOND, START, TREE_SIZE};

/// HTTP client for a single hub instance
pub struct HubClient {
    /// HTTP client for making requests to the API
    http_client: HttpClient,
    /// Base URL of the server, without the hub prefix
    api_base_url: String,
    /// Hub instance prefix
    prefix: String,
}

impl HubClient {
    /// Creates a new client for the hub mounted at `prefix` on `api_base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the `HTTPClient` build fails.
    pub fn new(api_base_url: &str, prefix: &str) -> Result<Self> {
        // Set up HTTP client with reasonable timeouts
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            http_client,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
            prefix: prefix.to_string(),
        })
    }

    fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.api_base_url, endpoint.full_path(&self.prefix))
    }

    /// Turns a non-2xx response into an error carrying the status and text body
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        bail!("hub returned {status}: {}", body.trim_end())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: Endpoint,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .http_client
            .get(self.url(endpoint))
            .query(query)
            .send()
            .await?;
        Ok(Self::check(response).await?.json::<T>().await?)
    }

    /// Submits a signed source log head
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the hub rejects the head.
    pub async fn add_log_head(
        &self,
        source_url: &str,
        head_data: Vec<u8>,
        signature: Vec<u8>,
    ) -> Result<()> {
        let req = AddLogHeadRequest {
            source_url: source_url.to_string(),
            head_data,
            signature,
        };
        let response = self
            .http_client
            .post(self.url(Endpoint::AddLogHead))
            .json(&req)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    /// Gets the hub's current signed head
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the response is invalid.
    pub async fn get_sth(&self) -> Result<GetSthResponse> {
        self.get_json(Endpoint::GetSth, &[]).await
    }

    /// Gets a consistency proof between two tree sizes
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the response is invalid.
    pub async fn get_sth_consistency(&self, first: u64, second: u64) -> Result<Vec<Vec<u8>>> {
        let rsp: GetSthConsistencyResponse = self
            .get_json(
                Endpoint::GetSthConsistency,
                &[(FIRST, first.to_string()), (SECOND, second.to_string())],
            )
            .await?;
        Ok(rsp.consistency)
    }

    /// Gets an inclusion proof for a Merkle leaf hash
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the response is invalid.
    pub async fn get_proof_by_hash(
        &self,
        leaf_hash: &[u8],
        tree_size: u64,
    ) -> Result<GetProofByHashResponse> {
        let hash = base64::engine::general_purpose::STANDARD.encode(leaf_hash);
        self.get_json(
            Endpoint::GetProofByHash,
            &[(HASH, hash), (TREE_SIZE, tree_size.to_string())],
        )
        .await
    }

    /// Gets the raw leaves in `[start, end]` (possibly fewer)
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the response is invalid.
    pub async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<Vec<u8>>> {
        let rsp: GetEntriesResponse = self
            .get_json(
                Endpoint::GetEntries,
                &[(START, start.to_string()), (END, end.to_string())],
            )
            .await?;
        Ok(rsp.entries.into_iter().map(|e| e.leaf_data).collect())
    }

    /// Lists the source log keys known to the hub
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP request fails or the response is invalid.
    pub async fn get_log_keys(&self) -> Result<GetLogKeysResponse> {
        self.get_json(Endpoint::GetLogKeys, &[]).await
    }
}

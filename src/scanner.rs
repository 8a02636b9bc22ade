//! Sequential walk over every leaf of a backend log.
//!
//! The scanner reads the log in fixed-size chunks and hands each leaf to a
//! [`LeafConsumer`] in index order. The backend may revise its tree size
//! while the scan runs; a revision moves the stopping point but never
//! invalidates leaves already delivered. Contract violations abort the scan
//! with a [`ScanError`] and there is no checkpointing: a failed scan must be
//! restarted by the caller.

use tracing::{debug, info};

use crate::backend::{BackendError, LogBackend, LogLeaf};

/// Number of leaves requested per backend read.
pub const CHUNK_SIZE: u64 = 10;

/// Fatal scan failure
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("backend {op} failed: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("backend returned no log root")]
    MissingRoot,
    /// The backend returned no leaves for an index below the tree size
    #[error("backend returned no leaves at index {index} (tree size {tree_size})")]
    NoProgress { index: u64, tree_size: u64 },
    #[error("backend returned an empty leaf slot at index {index}")]
    MissingLeaf { index: u64 },
    #[error("consumer failed at index {index}: {source}")]
    Consumer {
        index: u64,
        #[source]
        source: anyhow::Error,
    },
}

/// Receives leaves in index order.
pub trait LeafConsumer {
    /// Handles the leaf at `index`. An error stops the scan.
    ///
    /// # Errors
    ///
    /// Any error is propagated to the caller of [`scan`] unchanged.
    fn consume(&mut self, index: u64, leaf: &LogLeaf) -> anyhow::Result<()>;
}

impl<F> LeafConsumer for F
where
    F: FnMut(u64, &LogLeaf) -> anyhow::Result<()>,
{
    fn consume(&mut self, index: u64, leaf: &LogLeaf) -> anyhow::Result<()> {
        self(index, leaf)
    }
}

/// Walks log `log_id` from index 0 to the end, one chunk at a time.
///
/// Returns the number of leaves delivered.
///
/// # Errors
///
/// - `ScanError::Backend`: a backend call failed
/// - `ScanError::MissingRoot`: the backend has no head to take the size from
/// - `ScanError::NoProgress`: a read below the tree size returned no leaves
/// - `ScanError::MissingLeaf`: a read returned an absent leaf
/// - `ScanError::Consumer`: the consumer rejected a leaf
pub async fn scan<B, C>(backend: &B, log_id: i64, consumer: &mut C) -> Result<u64, ScanError>
where
    B: LogBackend + ?Sized,
    C: LeafConsumer + ?Sized,
{
    let mut tree_size = backend
        .get_latest_signed_log_root(log_id)
        .await
        .map_err(|source| ScanError::Backend {
            op: "GetLatestSignedLogRoot",
            source,
        })?
        .ok_or(ScanError::MissingRoot)?
        .tree_size;
    info!(log_id, tree_size, "starting leaf scan");

    let mut next: u64 = 0;
    while next < tree_size {
        let rsp = backend
            .get_leaves_by_range(log_id, next, CHUNK_SIZE)
            .await
            .map_err(|source| ScanError::Backend {
                op: "GetLeavesByRange",
                source,
            })?;

        if let Some(revised) = rsp.revised_tree_size {
            if revised != tree_size {
                debug!(log_id, from = tree_size, to = revised, "tree size revised");
                tree_size = revised;
            }
        }

        if next < tree_size && rsp.leaves.is_empty() {
            return Err(ScanError::NoProgress {
                index: next,
                tree_size,
            });
        }

        for leaf in &rsp.leaves {
            if next >= tree_size {
                break;
            }
            let leaf = leaf
                .as_ref()
                .ok_or(ScanError::MissingLeaf { index: next })?;
            consumer
                .consume(next, leaf)
                .map_err(|source| ScanError::Consumer {
                    index: next,
                    source,
                })?;
            next += 1;
        }
    }

    info!(log_id, leaves = next, "leaf scan complete");
    Ok(next)
}

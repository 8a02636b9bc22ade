//! Request parameter validation and backend response integrity checks.
//!
//! Parameter failures are the caller's fault and become 4xx responses before
//! the backend is contacted. Integrity failures mean the trusted backend broke
//! its own contract and always become 5xx responses.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::backend::LogLeaf;
use crate::leaf::{HubLeaf, LeafError, HASH_SIZE};

/// Query parameter names
pub const FIRST: &str = "first";
pub const SECOND: &str = "second";
pub const HASH: &str = "hash";
pub const TREE_SIZE: &str = "tree_size";
pub const START: &str = "start";
pub const END: &str = "end";

/// Error type for malformed request parameters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("parameter '{0}' is required")]
    Missing(&'static str),
    #[error("parameter '{0}' is malformed")]
    Malformed(&'static str),
    #[error("{0} and {1} params cannot be <0: {2} {3}")]
    Negative(&'static str, &'static str, i64, i64),
    #[error("invalid {0}, {1} params: {2} {3}")]
    Inverted(&'static str, &'static str, i64, i64),
    #[error("parameter 'tree_size' must be positive: {0}")]
    TreeSizeNotPositive(i64),
    #[error("invalid base64 hash: {0}")]
    BadHash(String),
}

/// Error type for backend responses that violate the backend contract
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("proof[{index}] is length {len}, want {HASH_SIZE}")]
    HashSize { index: usize, len: usize },
    #[error("backend returned too many leaves: {got} vs [{start},{end}]")]
    TooManyLeaves { got: usize, start: u64, end: u64 },
    #[error(
        "backend returned unexpected leaf index: \
         leaves[{position}].leaf_index={got} for range [{start},{end}]"
    )]
    UnexpectedIndex {
        position: usize,
        got: u64,
        start: u64,
        end: u64,
    },
    #[error("backend returned no leaf at position {0}")]
    MissingLeaf(usize),
    #[error("failed to deserialize leaf {index} from backend: {source}")]
    BadLeaf {
        index: u64,
        #[source]
        source: LeafError,
    },
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, ParamError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ParamError::Missing(name)),
    }
}

fn integer(value: Option<&str>, name: &'static str) -> Result<i64, ParamError> {
    required(value, name)?
        .parse::<i64>()
        .map_err(|_| ParamError::Malformed(name))
}

/// Converts a value already checked to be non-negative.
#[allow(clippy::cast_sign_loss)]
const fn unsigned(value: i64) -> u64 {
    value as u64
}

/// Parses the `first` and `second` tree sizes of a consistency request.
///
/// Both are required, non-negative, and `second >= first`.
///
/// # Errors
///
/// Returns a `ParamError` describing the first violated rule.
pub fn parse_consistency_range(
    first: Option<&str>,
    second: Option<&str>,
) -> Result<(u64, u64), ParamError> {
    let first_val = required(first, FIRST)?;
    let second_val = required(second, SECOND)?;
    let first = first_val
        .parse::<i64>()
        .map_err(|_| ParamError::Malformed(FIRST))?;
    let second = second_val
        .parse::<i64>()
        .map_err(|_| ParamError::Malformed(SECOND))?;

    if first < 0 || second < 0 {
        return Err(ParamError::Negative(FIRST, SECOND, first, second));
    }
    if second < first {
        return Err(ParamError::Inverted(FIRST, SECOND, first, second));
    }
    Ok((unsigned(first), unsigned(second)))
}

/// Parses the `start` and `end` of a get-entries request and clamps the range
/// to at most `max_range` leaves anchored at `start`.
///
/// Returns the inclusive `(start, end)` after clamping.
///
/// # Errors
///
/// Returns a `ParamError` if a bound is missing, malformed, negative, or
/// `start > end`.
pub fn parse_entries_range(
    start: Option<&str>,
    end: Option<&str>,
    max_range: u64,
) -> Result<(u64, u64), ParamError> {
    let start = integer(start, START)?;
    let end = integer(end, END)?;

    if start < 0 || end < 0 {
        return Err(ParamError::Negative(START, END, start, end));
    }
    if start > end {
        return Err(ParamError::Inverted(START, END, start, end));
    }

    let (start, mut end) = (unsigned(start), unsigned(end));
    let max_range = max_range.max(1);
    if end - start >= max_range {
        end = start + max_range - 1;
    }
    Ok((start, end))
}

/// Parses the leaf hash and tree size of a get-proof-by-hash request.
///
/// The hash must be non-empty base64; the backend validates it further.
///
/// # Errors
///
/// Returns a `ParamError` if the hash is missing or not base64, or if
/// `tree_size` is missing, malformed or not positive.
pub fn parse_proof_by_hash(
    hash: Option<&str>,
    tree_size: Option<&str>,
) -> Result<(Vec<u8>, u64), ParamError> {
    let hash = required(hash, HASH)?;
    let leaf_hash = BASE64
        .decode(hash.as_bytes())
        .map_err(|e| ParamError::BadHash(e.to_string()))?;
    if leaf_hash.is_empty() {
        return Err(ParamError::Missing(HASH));
    }

    let tree_size = integer(tree_size, TREE_SIZE)?;
    if tree_size < 1 {
        return Err(ParamError::TreeSizeNotPositive(tree_size));
    }
    Ok((leaf_hash, unsigned(tree_size)))
}

/// Checks that every proof node is exactly one digest long.
///
/// # Errors
///
/// Returns `IntegrityError::HashSize` for the first node of the wrong size.
pub fn check_hash_sizes(path: &[Vec<u8>]) -> Result<(), IntegrityError> {
    match path.iter().position(|node| node.len() != HASH_SIZE) {
        Some(index) => Err(IntegrityError::HashSize {
            index,
            len: path[index].len(),
        }),
        None => Ok(()),
    }
}

/// Checks a ranged read for `[start, end]` and returns the raw leaf payloads.
///
/// The leaf count must not exceed the request, indices must run contiguously
/// from `start`, and every payload must decode as a hub leaf with no trailing
/// bytes. The payloads are returned as stored, not re-encoded.
///
/// # Errors
///
/// Returns the first `IntegrityError` found; no partial data is returned.
pub fn check_leaf_range(
    leaves: Vec<Option<LogLeaf>>,
    start: u64,
    end: u64,
) -> Result<Vec<Vec<u8>>, IntegrityError> {
    let count = end - start + 1;
    if u64::try_from(leaves.len()).map_or(true, |n| n > count) {
        return Err(IntegrityError::TooManyLeaves {
            got: leaves.len(),
            start,
            end,
        });
    }

    let mut expected = start;
    let mut out = Vec::with_capacity(leaves.len());
    for (position, leaf) in leaves.into_iter().enumerate() {
        let leaf = leaf.ok_or(IntegrityError::MissingLeaf(position))?;
        if leaf.leaf_index != expected {
            return Err(IntegrityError::UnexpectedIndex {
                position,
                got: leaf.leaf_index,
                start,
                end,
            });
        }
        HubLeaf::decode(&leaf.leaf_value).map_err(|source| IntegrityError::BadLeaf {
            index: leaf.leaf_index,
            source,
        })?;
        out.push(leaf.leaf_value);
        expected += 1;
    }
    Ok(out)
}

use serde::{Deserialize, Serialize};

/// Request body for POST `add-log-head`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLogHeadRequest {
    /// URL of the source log the head belongs to
    pub source_url: String,
    /// Opaque head data, base64 encoded on the wire
    #[serde(with = "bytes_format")]
    pub head_data: Vec<u8>,
    /// Source log signature over `head_data`, base64 encoded on the wire
    #[serde(with = "bytes_format")]
    pub signature: Vec<u8>,
}

/// Response for GET `get-sth`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSthResponse {
    /// The backend's serialized log root
    #[serde(with = "bytes_format")]
    pub head_data: Vec<u8>,
    /// The backend's signature over `head_data`
    #[serde(with = "bytes_format")]
    pub signature: Vec<u8>,
}

/// Response for GET `get-sth-consistency`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetSthConsistencyResponse {
    /// Consistency proof nodes, always a list (possibly empty)
    #[serde(with = "bytes_list_format")]
    pub consistency: Vec<Vec<u8>>,
}

/// Response for GET `get-proof-by-hash`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProofByHashResponse {
    /// Index of the leaf in the hub log
    pub leaf_index: u64,
    /// Audit path nodes, always a list (possibly empty)
    #[serde(with = "bytes_list_format")]
    pub audit_path: Vec<Vec<u8>>,
}

/// One leaf returned by `get-entries`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    /// Canonical hub leaf bytes exactly as stored by the backend
    #[serde(with = "bytes_format")]
    pub leaf_data: Vec<u8>,
}

/// Response for GET `get-entries`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEntriesResponse {
    pub entries: Vec<LeafEntry>,
}

/// A known source log key as returned by `get-log-keys`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogKey {
    pub url: String,
    #[serde(with = "bytes_format")]
    pub pub_key: Vec<u8>,
}

/// Response for GET `get-log-keys`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetLogKeysResponse {
    pub entries: Vec<LogKey>,
}

// Custom serialization for byte arrays to use base64
pub mod bytes_format {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        String::deserialize(deserializer).and_then(|string| {
            BASE64
                .decode(string.as_bytes())
                .map_err(|err| Error::custom(err.to_string()))
        })
    }
}

// Same as `bytes_format`, for lists of hashes
pub mod bytes_list_format {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(list: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(list.len()))?;
        for bytes in list {
            seq.serialize_element(&BASE64.encode(bytes))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use serde::de::Error;
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| BASE64.decode(s.as_bytes()).map_err(|err| Error::custom(err.to_string())))
            .collect()
    }
}

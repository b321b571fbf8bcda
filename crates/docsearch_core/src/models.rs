//! Wire models for the backend's JSON payloads.
//!
//! Only the fields this layer reads are typed; everything else the backend
//! owns (history, analytics, file detail) is passed through as `Value`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClientError, FailureKind, JobState, SourceRef};

/// Common response envelope: `{success, message?, data?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub code: Option<u16>,
}

impl ApiEnvelope {
    /// Recognizes an envelope in an arbitrary JSON payload.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.get("success")?.as_bool()?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// Decodes the `data` member of an envelope (or the bare payload if it is not
/// wrapped) into `T`.
pub fn decode_data<T: DeserializeOwned>(payload: &Value) -> Result<T, ClientError> {
    let data = match payload.get("success") {
        Some(_) => payload.get("data").cloned().unwrap_or(Value::Null),
        None => payload.clone(),
    };
    serde_json::from_value(data).map_err(|err| {
        ClientError::new(
            FailureKind::Decode,
            format!("unexpected response data: {err}"),
        )
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub id: u64,
    pub original_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub upload_status: Option<String>,
    #[serde(default)]
    pub process_status: Option<JobState>,
    #[serde(default)]
    pub process_progress: Option<u8>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileList {
    pub files: Vec<FileSummary>,
    pub pagination: Pagination,
}

impl FileList {
    pub fn contains(&self, file_id: u64) -> bool {
        self.files.iter().any(|file| file.id == file_id)
    }
}

/// Acknowledgement of an accepted upload; `file_id` doubles as the job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub file_id: u64,
    pub filename: String,
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub file_id: u64,
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchDeleteReport {
    pub results: Vec<DeleteResult>,
    pub success_count: u32,
    pub total_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: u64,
    pub session_name: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Non-streamed answer to a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    #[serde(default)]
    pub search_results_count: u32,
    #[serde(default)]
    pub response_time: f64,
    #[serde(default)]
    pub session_id: Option<u64>,
}

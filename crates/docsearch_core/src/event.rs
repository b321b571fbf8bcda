use serde::{Deserialize, Serialize};

/// One decoded event of a streamed answer, as carried on a `data: ` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Start {
        #[serde(default)]
        message: Option<String>,
    },
    Progress {
        message: String,
    },
    Content {
        content: String,
    },
    Sources {
        sources: Vec<SourceRef>,
    },
    Done {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Content { .. } => "content",
            StreamEvent::Sources { .. } => "sources",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// Citation for an answer: which document and which of its pages were used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file_id: u64,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub pages: Vec<u32>,
    #[serde(default)]
    pub page_count: u32,
}

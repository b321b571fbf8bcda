//! Docsearch core: pure decision logic and wire models, free of IO.
mod error;
mod event;
mod framing;
mod job;
mod key;
pub mod models;
mod progress;
mod retry;
mod stream;

pub use error::{ClientError, FailureKind};
pub use event::{SourceRef, StreamEvent};
pub use framing::{Framed, LineFramer};
pub use job::{JobId, JobRecord, JobState, JobStatus, PollOutcome};
pub use key::{OperationKey, OperationKeyBuilder};
pub use progress::UploadProgress;
pub use retry::{RetryDecision, RetryPolicy};
pub use stream::{close, update, FinalAnswer, StreamPhase, StreamState, StreamUpdate};

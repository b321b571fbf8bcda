//! Docsearch client: HTTP execution, caching, de-duplication, streaming and
//! job polling behind one facade.
mod cache;
mod client;
mod executor;
mod inflight;
mod poller;
mod retry;
mod settings;
mod stream;

pub use cache::CacheStore;
pub use client::DocSearchClient;
pub use executor::{ApiRequest, Payload, ProgressSink, RequestBody, RequestExecutor, UploadBody};
pub use inflight::{InFlightRegistry, Pending};
pub use poller::{JobPoller, PollHandle, StatusSource};
pub use retry::run_with_retry;
pub use settings::{CallOptions, ClientSettings, PollSettings, DEFAULT_CACHE_TTL};
pub use stream::{ActiveStreams, StreamSlot, StreamSubscription};

pub use docsearch_core::models;
pub use docsearch_core::{
    ClientError, FailureKind, FinalAnswer, JobId, JobRecord, JobState, JobStatus, OperationKey,
    PollOutcome, RetryPolicy, SourceRef, StreamUpdate,
};

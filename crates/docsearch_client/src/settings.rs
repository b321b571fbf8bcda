use std::time::Duration;

use docsearch_core::RetryPolicy;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Backend origin, e.g. `http://localhost:5000`.
    pub base_url: String,
    /// Owner identifier sent with every call.
    pub user_id: u64,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    /// Longest silence tolerated between two chunks of a streamed answer.
    pub stream_idle_timeout: Duration,
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    /// Also retry uploads, deletes and renames. Only safe when the backend
    /// deduplicates those calls.
    pub retry_mutations: bool,
    pub poll: PollSettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_string(),
            user_id: 1,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(60),
            cache_ttl: DEFAULT_CACHE_TTL,
            retry: RetryPolicy::default(),
            retry_mutations: false,
            poll: PollSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub initial_delay: Duration,
    pub interval: Duration,
    /// Upper bound on a whole watch; `None` polls until a terminal state.
    pub max_duration: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            interval: Duration::from_secs(3),
            max_duration: Some(Duration::from_secs(10 * 60)),
        }
    }
}

/// Per-call overrides; `None` falls back to [`ClientSettings`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cache_ttl: Option<Duration>,
    pub retry: Option<RetryPolicy>,
    /// Skip the cache read (the fresh result is still stored).
    pub bypass_cache: bool,
    pub poll: Option<PollSettings>,
}

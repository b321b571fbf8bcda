use client_logging::client_warn;

use crate::{ClientError, FailureKind, SourceRef, StreamEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamPhase {
    #[default]
    Idle,
    Streaming,
    Terminal,
}

/// The answer being assembled from one stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamState {
    phase: StreamPhase,
    transcript: String,
    sources: Vec<SourceRef>,
}

/// What a subscriber sees, in order. Exactly one of `Finished` or `Failed`
/// ends a stream that was not cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamUpdate {
    Started,
    Progress(String),
    /// Full transcript so far, not just the latest fragment.
    Transcript(String),
    Sources(Vec<SourceRef>),
    Finished(FinalAnswer),
    Failed(ClientError),
}

impl StreamUpdate {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamUpdate::Finished(_) | StreamUpdate::Failed(_))
    }
}

/// A completed answer: the last transcript paired with the last sources seen.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FinalAnswer {
    pub text: String,
    pub sources: Vec<SourceRef>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn sources(&self) -> &[SourceRef] {
        &self.sources
    }

    pub fn is_terminal(&self) -> bool {
        self.phase == StreamPhase::Terminal
    }

    fn fail(&mut self, error: ClientError) -> StreamUpdate {
        self.phase = StreamPhase::Terminal;
        self.transcript.clear();
        self.sources.clear();
        StreamUpdate::Failed(error)
    }
}

/// Pure transition: applies one decoded event and returns the updates to dispatch.
///
/// Events that break the ordering (anything but `start` or `error` while idle,
/// a repeated `start`, anything after a terminal event) are dropped.
pub fn update(mut state: StreamState, event: StreamEvent) -> (StreamState, Vec<StreamUpdate>) {
    let updates = match (state.phase, event) {
        (StreamPhase::Terminal, event) => {
            client_warn!("Dropping '{}' event after stream end", event.name());
            Vec::new()
        }
        (StreamPhase::Idle, StreamEvent::Start { .. }) => {
            state.phase = StreamPhase::Streaming;
            state.transcript.clear();
            state.sources.clear();
            vec![StreamUpdate::Started]
        }
        (_, StreamEvent::Error { message }) => {
            vec![state.fail(ClientError::new(FailureKind::StreamFailed, message))]
        }
        (StreamPhase::Idle, event) => {
            client_warn!("Dropping '{}' event received before 'start'", event.name());
            Vec::new()
        }
        (StreamPhase::Streaming, StreamEvent::Start { .. }) => {
            client_warn!("Dropping repeated 'start' event");
            Vec::new()
        }
        (StreamPhase::Streaming, StreamEvent::Progress { message }) => {
            vec![StreamUpdate::Progress(message)]
        }
        (StreamPhase::Streaming, StreamEvent::Content { content }) => {
            state.transcript.push_str(&content);
            vec![StreamUpdate::Transcript(state.transcript.clone())]
        }
        (StreamPhase::Streaming, StreamEvent::Sources { sources }) => {
            state.sources = sources.clone();
            vec![StreamUpdate::Sources(sources)]
        }
        (StreamPhase::Streaming, StreamEvent::Done { .. }) => {
            state.phase = StreamPhase::Terminal;
            vec![StreamUpdate::Finished(FinalAnswer {
                text: state.transcript.clone(),
                sources: state.sources.clone(),
            })]
        }
    };

    (state, updates)
}

/// The channel ended. Without a prior terminal event this is an implicit error.
pub fn close(mut state: StreamState) -> (StreamState, Option<StreamUpdate>) {
    if state.is_terminal() {
        return (state, None);
    }
    let update = state.fail(ClientError::new(
        FailureKind::StreamClosed,
        "stream ended without a terminal event",
    ));
    (state, Some(update))
}

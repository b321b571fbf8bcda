use std::fmt;

/// Classification of a failed client operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The call did not complete before its deadline.
    Timeout,
    /// Connection-level failure before any response was obtained.
    Transport,
    /// The server answered with a non-2xx status.
    HttpStatus(u16),
    /// The server answered 2xx but the envelope said `success: false`.
    Rejected,
    /// A stream line could not be framed or decoded.
    Protocol,
    /// A stream is already active for the session.
    Busy,
    /// Every retry attempt failed; `last` is the final attempt's failure.
    Exhausted { attempts: u32, last: Box<FailureKind> },
    Cancelled,
    /// The server ended a stream with an `error` event.
    StreamFailed,
    /// The stream body ended before any terminal event arrived.
    StreamClosed,
    InvalidRequest,
    /// The payload did not have the expected shape.
    Decode,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Transport => write!(f, "transport error"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Rejected => write!(f, "rejected by server"),
            FailureKind::Protocol => write!(f, "protocol error"),
            FailureKind::Busy => write!(f, "busy"),
            FailureKind::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempts ({last})")
            }
            FailureKind::Cancelled => write!(f, "cancelled"),
            FailureKind::StreamFailed => write!(f, "stream failed"),
            FailureKind::StreamClosed => write!(f, "stream closed before completion"),
            FailureKind::InvalidRequest => write!(f, "invalid request"),
            FailureKind::Decode => write!(f, "unexpected payload"),
        }
    }
}

/// Error surfaced by every client operation: a kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: FailureKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn busy(session_id: u64) -> Self {
        Self::new(
            FailureKind::Busy,
            format!("session {session_id} already has an active stream"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "operation cancelled")
    }

    /// Wraps the last failure of a retried call.
    pub fn exhausted(attempts: u32, last: ClientError) -> Self {
        Self {
            kind: FailureKind::Exhausted {
                attempts,
                last: Box::new(last.kind),
            },
            message: last.message,
        }
    }

    /// HTTP status carried by this error, looking through `Exhausted`.
    pub fn status(&self) -> Option<u16> {
        match &self.kind {
            FailureKind::HttpStatus(code) => Some(*code),
            FailureKind::Exhausted { last, .. } => match last.as_ref() {
                FailureKind::HttpStatus(code) => Some(*code),
                _ => None,
            },
            _ => None,
        }
    }
}

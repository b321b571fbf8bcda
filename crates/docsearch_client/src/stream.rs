use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use client_logging::{client_debug, client_warn};
use docsearch_core::{
    close, update, ClientError, FailureKind, FinalAnswer, Framed, LineFramer, StreamState,
    StreamUpdate,
};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::executor::map_reqwest_error;
use crate::{ApiRequest, RequestExecutor};

const UPDATE_BUFFER: usize = 64;

/// Sessions that currently have a stream between `start` and its terminal event.
#[derive(Clone, Default)]
pub struct ActiveStreams {
    sessions: Arc<Mutex<HashSet<u64>>>,
}

impl ActiveStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the session's stream slot, or `None` if another stream holds it.
    /// The check and the claim are one step under the lock.
    pub fn try_acquire(&self, session_id: u64) -> Option<StreamSlot> {
        if !self.lock().insert(session_id) {
            return None;
        }
        Some(StreamSlot {
            sessions: self.sessions.clone(),
            session_id,
        })
    }

    pub fn is_active(&self, session_id: u64) -> bool {
        self.lock().contains(&session_id)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the session's stream slot on drop.
pub struct StreamSlot {
    sessions: Arc<Mutex<HashSet<u64>>>,
    session_id: u64,
}

impl Drop for StreamSlot {
    fn drop(&mut self) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

/// Ordered updates of one streamed answer.
///
/// Cancelling (or dropping) the subscription closes the underlying channel;
/// no synthetic `Finished` is produced in that case.
#[derive(Debug)]
pub struct StreamSubscription {
    session_id: u64,
    updates: mpsc::Receiver<StreamUpdate>,
    cancel: CancellationToken,
}

impl StreamSubscription {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Next update, or `None` once the stream has ended or was cancelled.
    pub async fn next(&mut self) -> Option<StreamUpdate> {
        self.updates.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drives the stream to its end, handing every update to `on_update`.
    pub async fn finish(
        mut self,
        mut on_update: impl FnMut(&StreamUpdate),
    ) -> Result<FinalAnswer, ClientError> {
        while let Some(update) = self.next().await {
            on_update(&update);
            match update {
                StreamUpdate::Finished(answer) => return Ok(answer),
                StreamUpdate::Failed(err) => return Err(err),
                _ => {}
            }
        }
        if self.cancel.is_cancelled() {
            Err(ClientError::cancelled())
        } else {
            Err(ClientError::new(
                FailureKind::StreamClosed,
                "stream ended without a terminal event",
            ))
        }
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Opens `request` as a stream on a background task and returns its subscription.
/// `on_finished` runs once if the stream completes with `done`.
pub(crate) fn spawn_stream(
    executor: RequestExecutor,
    request: ApiRequest,
    slot: StreamSlot,
    idle_timeout: Duration,
    on_finished: Box<dyn FnOnce() + Send>,
) -> StreamSubscription {
    let (tx, rx) = mpsc::channel(UPDATE_BUFFER);
    let cancel = CancellationToken::new();
    let session_id = slot.session_id;

    let task = StreamTask {
        session_id,
        tx,
        slot: Some(slot),
        on_finished: Some(on_finished),
        state: StreamState::new(),
    };
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                client_debug!("Stream for session {} cancelled", session_id);
            }
            _ = task.run(executor, request, idle_timeout) => {}
        }
    });

    StreamSubscription {
        session_id,
        updates: rx,
        cancel,
    }
}

struct StreamTask {
    session_id: u64,
    tx: mpsc::Sender<StreamUpdate>,
    slot: Option<StreamSlot>,
    on_finished: Option<Box<dyn FnOnce() + Send>>,
    state: StreamState,
}

impl StreamTask {
    async fn run(mut self, executor: RequestExecutor, request: ApiRequest, idle_timeout: Duration) {
        let response = match executor.open_stream(&request).await {
            Ok(response) => response,
            Err(err) => return self.fail(err).await,
        };

        let mut body = Box::pin(response.bytes_stream());
        let mut framer = LineFramer::new();
        loop {
            let frames = match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(Ok(chunk))) => framer.push(&chunk),
                Ok(Some(Err(err))) => return self.fail(map_reqwest_error(err)).await,
                Ok(None) => {
                    let rest = framer.finish().into_iter().collect();
                    if self.apply(rest).await {
                        self.close().await;
                    }
                    return;
                }
                Err(_) => {
                    let err = ClientError::new(
                        FailureKind::Timeout,
                        format!("no stream data for {idle_timeout:?}"),
                    );
                    return self.fail(err).await;
                }
            };
            if !self.apply(frames).await {
                return;
            }
        }
    }

    /// Dispatches decoded frames. Returns whether the stream is still open.
    async fn apply(&mut self, frames: Vec<Framed>) -> bool {
        for frame in frames {
            let event = match frame {
                Ok(event) => event,
                Err(err) => {
                    client_warn!("Skipping stream line for session {}: {}", self.session_id, err);
                    continue;
                }
            };
            let (state, updates) = update(std::mem::take(&mut self.state), event);
            self.state = state;
            for update in updates {
                if !self.deliver(update).await {
                    return false;
                }
            }
        }
        !self.state.is_terminal()
    }

    async fn fail(mut self, err: ClientError) {
        client_warn!("Stream for session {} failed: {}", self.session_id, err);
        let (state, _) = close(std::mem::take(&mut self.state));
        self.state = state;
        self.deliver(StreamUpdate::Failed(err)).await;
    }

    async fn close(&mut self) {
        let (state, last) = close(std::mem::take(&mut self.state));
        self.state = state;
        if let Some(last) = last {
            client_warn!("Stream for session {} closed early", self.session_id);
            self.deliver(last).await;
        }
    }

    /// Sends one update; `false` once the subscriber is gone.
    async fn deliver(&mut self, update: StreamUpdate) -> bool {
        if update.is_terminal() {
            // Free the session before the subscriber can react to the end.
            self.slot.take();
            if matches!(update, StreamUpdate::Finished(_)) {
                if let Some(on_finished) = self.on_finished.take() {
                    on_finished();
                }
            }
        }
        self.tx.send(update).await.is_ok()
    }
}

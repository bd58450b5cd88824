use super::{
    errors::{HandleError, WorkError},
    work::{WorkEvent, WorkListener},
};
use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
};
use tokio::{
    sync::oneshot,
    time::Duration,
};


pub type WorkOutcome = Result<(), WorkError>;

/// Listener that reports the terminal event of a submission down a oneshot
/// channel and forwards every event to the caller's own listener.
pub(crate) struct CompletionRelay {
    inner: Option<Arc<dyn WorkListener>>,
    sender: Mutex<Option<oneshot::Sender<WorkOutcome>>>,
}

impl CompletionRelay {
    pub(crate) fn new(inner: Option<Arc<dyn WorkListener>>) -> (Arc<Self>, oneshot::Receiver<WorkOutcome>) {
        let (tx, rx) = oneshot::channel();
        let relay = Arc::new(Self {
            inner,
            sender: Mutex::new(Some(tx)),
        });
        (relay, rx)
    }

    fn finish(&self, outcome: WorkOutcome) {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = sender {
            let _ = tx.send(outcome);
        }
    }
}

impl WorkListener for CompletionRelay {
    fn work_accepted(&self, event: &WorkEvent) {
        if let Some(inner) = &self.inner {
            inner.work_accepted(event);
        }
    }

    fn work_started(&self, event: &WorkEvent) {
        if let Some(inner) = &self.inner {
            inner.work_started(event);
        }
    }

    fn work_completed(&self, event: &WorkEvent) {
        self.finish(event.error.clone().map_or(Ok(()), Err));
        if let Some(inner) = &self.inner {
            inner.work_completed(event);
        }
    }

    fn work_rejected(&self, event: &WorkEvent) {
        let error = event.error.clone().unwrap_or_else(WorkError::start_timed_out);
        self.finish(Err(error));
        if let Some(inner) = &self.inner {
            inner.work_rejected(event);
        }
    }
}

/// Completion handle for fire-and-forget work.
///
/// Resolves once the submission completes or is rejected. Dropping the
/// handle does not affect the work.
pub struct WorkHandle {
    work_id: u64,
    receiver: oneshot::Receiver<WorkOutcome>,
}

impl WorkHandle {
    pub(crate) fn new(work_id: u64, receiver: oneshot::Receiver<WorkOutcome>) -> Self {
        Self { work_id, receiver }
    }

    #[inline]
    pub fn work_id(&self) -> u64 {
        self.work_id
    }

    pub async fn await_timeout(self, timeout: Duration) -> Result<(), HandleError> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(Ok(outcome)) => outcome.map_err(HandleError::Failed),
            Ok(Err(_)) => Err(HandleError::ChannelClosed),
            Err(_) => Err(HandleError::Timeout),
        }
    }

    /// Blocks the calling thread until the outcome is known.
    pub fn wait(self) -> Result<(), HandleError> {
        futures::executor::block_on(self)
    }

    /// Non-blocking check. `None` while the work is still pending.
    pub fn try_outcome(&mut self) -> Option<Result<(), HandleError>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome.map_err(HandleError::Failed)),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(HandleError::ChannelClosed)),
        }
    }
}

impl Future for WorkHandle {
    type Output = Result<(), HandleError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome.map_err(HandleError::Failed)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(HandleError::ChannelClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

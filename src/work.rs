use super::errors::{BoxError, WorkError};
use crossbeam::channel::Sender;
use std::{
    fmt,
    sync::Arc,
    time::Duration,
};


/// Unit of work handed to a [`WorkManager`](crate::manager::WorkManager).
///
/// An `Err` from `run`, or a panic, is captured by the coordinator and
/// reported as an execution failure.
pub trait Work: Send + 'static {
    fn run(&mut self) -> Result<(), BoxError>;

    /// Display name. Named work gets its progress logged.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Execution context the work carries itself. Mutually exclusive with a
    /// context supplied at submission.
    fn execution_context(&self) -> Option<ExecutionContext> {
        None
    }
}

/// Closure-backed [`Work`].
pub struct WorkItem<F> {
    body: F,
    name: Option<String>,
    context: Option<ExecutionContext>,
}

impl<F> WorkItem<F>
where
    F: FnMut() -> Result<(), BoxError> + Send + 'static,
{
    pub fn new(body: F) -> Self {
        Self { body, name: None, context: None }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl<F> Work for WorkItem<F>
where
    F: FnMut() -> Result<(), BoxError> + Send + 'static,
{
    fn run(&mut self) -> Result<(), BoxError> {
        (self.body)()
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn execution_context(&self) -> Option<ExecutionContext> {
        self.context.clone()
    }
}

impl<F> fmt::Debug for WorkItem<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("name", &self.name)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Global transaction branch identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    pub format_id: i32,
    pub global_transaction_id: Vec<u8>,
    pub branch_qualifier: Vec<u8>,
}

impl Xid {
    pub fn new(format_id: i32, global_transaction_id: impl Into<Vec<u8>>, branch_qualifier: impl Into<Vec<u8>>) -> Self {
        Self {
            format_id,
            global_transaction_id: global_transaction_id.into(),
            branch_qualifier: branch_qualifier.into(),
        }
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.format_id)?;
        for b in &self.global_transaction_id {
            write!(f, "{b:02x}")?;
        }
        f.write_str(":")?;
        for b in &self.branch_qualifier {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Context the producer asks to have re-established on the worker thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    pub xid: Option<Xid>,
    pub transaction_timeout: Option<Duration>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xid(mut self, xid: Xid) -> Self {
        self.xid = Some(xid);
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkEventKind {
    Accepted,
    Started,
    Completed,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct WorkEvent {
    pub kind: WorkEventKind,
    pub work_id: u64,
    pub work_name: Option<Arc<str>>,
    pub error: Option<WorkError>,
}

/// Lifecycle callbacks for one submission.
///
/// `work_accepted` always comes first. It is followed either by a single
/// `work_rejected`, or by `work_started` and then a single `work_completed`.
pub trait WorkListener: Send + Sync {
    fn work_accepted(&self, _event: &WorkEvent) {}
    fn work_started(&self, _event: &WorkEvent) {}
    fn work_completed(&self, _event: &WorkEvent) {}
    fn work_rejected(&self, _event: &WorkEvent) {}
}

/// Forwards every event down a channel.
impl WorkListener for Sender<WorkEvent> {
    fn work_accepted(&self, event: &WorkEvent) {
        let _ = self.send(event.clone());
    }

    fn work_started(&self, event: &WorkEvent) {
        let _ = self.send(event.clone());
    }

    fn work_completed(&self, event: &WorkEvent) {
        let _ = self.send(event.clone());
    }

    fn work_rejected(&self, event: &WorkEvent) {
        let _ = self.send(event.clone());
    }
}

/// Per-submission options. The default is no start timeout, no execution
/// context and no listener.
#[derive(Clone, Default)]
pub struct SubmitOptions {
    pub start_timeout: Option<Duration>,
    pub context: Option<ExecutionContext>,
    pub listener: Option<Arc<dyn WorkListener>>,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = Some(timeout);
        self
    }

    pub fn context(mut self, context: ExecutionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn WorkListener>) -> Self {
        self.listener = Some(listener);
        self
    }
}

impl fmt::Debug for SubmitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmitOptions")
            .field("start_timeout", &self.start_timeout)
            .field("context", &self.context)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xid_renders_as_hex() {
        let xid = Xid::new(4, vec![0xab, 0x01], vec![0x0f]);
        assert_eq!(xid.to_string(), "4:ab01:0f");
    }

    #[test]
    fn work_item_runs_its_body() {
        let mut calls = 0;
        let mut item = WorkItem::new(move || {
            calls += 1;
            if calls > 1 {
                return Err("second call".into());
            }
            Ok(())
        })
        .named("counter");

        assert_eq!(item.name(), Some("counter"));
        assert!(item.run().is_ok());
        assert!(item.run().is_err());
    }
}

use std::{
    any::Any,
    error::Error as StdError,
    fmt,
    sync::Arc,
};
use thiserror::Error;


pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared cause of a captured failure. Shared so that the same failure can be
/// handed to a listener and re-raised to the submitting thread.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Undefined,
    StartTimedOut,
    TxRecreateFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::StartTimedOut => "start-timed-out",
            Self::TxRecreateFailed => "tx-recreate-failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a submission.
///
/// `Rejected` means the work never ran (the pool refused it, its start timed
/// out, or its context could not be established). `Completed` means the work
/// started and then failed.
#[derive(Debug, Clone, Error)]
pub enum WorkError {
    #[error("work rejected ({code})")]
    Rejected {
        code: ErrorCode,
        #[source]
        cause: Option<Cause>,
    },
    #[error("work completed with failure ({code})")]
    Completed {
        code: ErrorCode,
        #[source]
        cause: Option<Cause>,
    },
}

impl WorkError {
    pub fn rejected<E>(code: ErrorCode, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Rejected { code, cause: Some(Arc::new(cause)) }
    }

    pub fn completed<E>(code: ErrorCode, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Completed { code, cause: Some(Arc::new(cause)) }
    }

    pub fn start_timed_out() -> Self {
        Self::Rejected { code: ErrorCode::StartTimedOut, cause: None }
    }

    #[inline]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Rejected { code, .. } | Self::Completed { code, .. } => *code,
        }
    }

    #[inline]
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Self::Rejected { cause, .. } | Self::Completed { cause, .. } => cause.as_ref(),
        }
    }

    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Rejected { code: ErrorCode::StartTimedOut, .. })
    }

    /// Looks through the cause for an error of type `E`.
    pub fn cause_as<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause().and_then(|c| c.downcast_ref::<E>())
    }

    fn into_rejected(self) -> Self {
        match self {
            Self::Rejected { .. } => self,
            Self::Completed { code, .. } => Self::Rejected { code, cause: Some(Arc::new(self)) },
        }
    }

    fn into_completed(self) -> Self {
        match self {
            Self::Completed { .. } => self,
            Self::Rejected { code, .. } => Self::Completed { code, cause: Some(Arc::new(self)) },
        }
    }

    /// Classifies a raw failure by the phase it happened in. Failures before
    /// the work started become rejections, later ones execution failures. A
    /// `WorkError` keeps its code; anything else is `Undefined`.
    pub(crate) fn classify(failure: BoxError, started: bool) -> Self {
        match failure.downcast::<WorkError>() {
            Ok(work) if started => (*work).into_completed(),
            Ok(work) => (*work).into_rejected(),
            Err(other) => {
                let cause: Cause = Arc::from(other);
                if started {
                    Self::Completed { code: ErrorCode::Undefined, cause: Some(cause) }
                } else {
                    Self::Rejected { code: ErrorCode::Undefined, cause: Some(cause) }
                }
            }
        }
    }
}

/// A work body or callback panicked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("panicked: {0}")]
pub struct PanicError(pub String);

impl PanicError {
    pub(crate) fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self(message)
    }
}

/// The pool dropped the work without running it, typically on shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("work was dropped by the thread pool before it started")]
pub struct Abandoned;

/// The submission carried two execution contexts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("work declares its own execution context and one was also supplied at submission")]
pub struct ConflictingContext;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnqueueError {
    #[error("thread pool '{pool}' is saturated ({pending} pending)")]
    Saturated { pool: String, pending: usize },
    #[error("thread pool '{0}' is shut down")]
    ShutDown(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("transaction import is not supported by this transaction manager")]
    Unsupported,
    #[error("failed to import transaction {xid}: {reason}")]
    Import { xid: String, reason: String },
    #[error("failed to release transaction {xid}: {reason}")]
    Release { xid: String, reason: String },
    #[error("failed to clear thread transaction association: {0}")]
    ClearAssociation(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("thread pool '{pool}' not found for work manager '{owner}'")]
    ThreadPoolNotFound { pool: String, owner: String },
    #[error("no default thread pool available for work manager '{owner}'")]
    NoDefaultThreadPool { owner: String },
    #[error("no process-wide handle registry is installed")]
    RegistryUnavailable,
}

#[derive(Debug, Clone, Error)]
pub enum HandleError {
    #[error("timed out waiting for work completion")]
    Timeout,
    #[error("completion channel closed before the work finished")]
    ChannelClosed,
    #[error(transparent)]
    Failed(#[from] WorkError),
}

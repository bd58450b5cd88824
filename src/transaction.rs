//! Transaction-manager collaborator.
//!
//! The coordinator never manages transactions itself. It only asks a
//! [`TransactionManager`] to attach an imported branch to the worker thread
//! before the body runs and to detach it afterwards.

use super::{
    errors::TxError,
    work::Xid,
};
use std::time::Duration;


/// Association of an imported transaction branch with a worker thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    xid: Xid,
}

impl TxHandle {
    pub fn new(xid: Xid) -> Self {
        Self { xid }
    }

    #[inline]
    pub fn xid(&self) -> &Xid {
        &self.xid
    }
}

pub trait TransactionManager: Send + Sync {
    /// Associates the branch `xid` with the calling thread.
    fn import_transaction(&self, xid: &Xid, timeout: Option<Duration>) -> Result<TxHandle, TxError>;

    /// Detaches a previously imported branch from the calling thread.
    fn release(&self, handle: TxHandle) -> Result<(), TxError>;

    /// Forgets any transaction bookkeeping kept for the calling thread.
    fn clear_thread_association(&self) -> Result<(), TxError>;
}

/// Used when the host has no transaction manager. Work that asks for an
/// imported transaction is rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTransactionManager;

impl TransactionManager for NoTransactionManager {
    fn import_transaction(&self, _xid: &Xid, _timeout: Option<Duration>) -> Result<TxHandle, TxError> {
        Err(TxError::Unsupported)
    }

    fn release(&self, _handle: TxHandle) -> Result<(), TxError> {
        Ok(())
    }

    fn clear_thread_association(&self) -> Result<(), TxError> {
        Ok(())
    }
}

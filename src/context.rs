//! Thread-scoped execution context.
//!
//! Two pieces of ambient state travel with a thread: the context loader (the
//! resource scope a producer wants its work to resolve against) and the
//! security identity the thread acts under. Work submitted from a producer
//! thread carries the producer's loader over to the worker for the duration
//! of the body only.

use std::{
    cell::RefCell,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};


static LOADER_IDS: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_LOADER: RefCell<Option<Arc<ContextLoader>>> = const { RefCell::new(None) };
    static CURRENT_IDENTITY: RefCell<SecurityIdentity> = const { RefCell::new(SecurityIdentity::Unauthenticated) };
}

/// Named resource scope bound to a thread. Identity is the allocation, not
/// the name: two loaders with the same name are still distinct.
pub struct ContextLoader {
    id: u64,
    name: String,
}

impl ContextLoader {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: LOADER_IDS.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
        })
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for ContextLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextLoader")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

pub fn current_loader() -> Option<Arc<ContextLoader>> {
    CURRENT_LOADER.with(|slot| slot.borrow().clone())
}

/// Installs `loader` on the current thread and returns what was there.
pub fn set_current_loader(loader: Option<Arc<ContextLoader>>) -> Option<Arc<ContextLoader>> {
    CURRENT_LOADER.with(|slot| slot.replace(loader))
}

fn same_loader(a: &Option<Arc<ContextLoader>>, b: &Option<Arc<ContextLoader>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Swaps the thread's loader for the lifetime of the guard.
///
/// Restoration happens on drop, so it also runs when the guarded code panics.
#[must_use = "the previous loader is restored when the guard is dropped"]
pub struct LoaderScope {
    previous: Option<Option<Arc<ContextLoader>>>,
}

impl LoaderScope {
    /// Installs `declared` unless it is already the current loader.
    pub fn enter(declared: Option<Arc<ContextLoader>>) -> Self {
        let current = current_loader();
        if same_loader(&current, &declared) {
            return Self { previous: None };
        }
        set_current_loader(declared);
        Self { previous: Some(current) }
    }

    #[inline]
    pub fn swapped(&self) -> bool {
        self.previous.is_some()
    }
}

impl Drop for LoaderScope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            set_current_loader(previous);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SecurityIdentity {
    #[default]
    Unauthenticated,
    Principal(String),
}

pub fn current_identity() -> SecurityIdentity {
    CURRENT_IDENTITY.with(|slot| slot.borrow().clone())
}

pub fn set_identity(identity: SecurityIdentity) -> SecurityIdentity {
    CURRENT_IDENTITY.with(|slot| slot.replace(identity))
}

/// Drops whatever identity the thread carries back to the baseline.
pub fn set_unauthenticated() {
    set_identity(SecurityIdentity::Unauthenticated);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_restores_previous_loader() {
        let outer = ContextLoader::new("outer");
        let inner = ContextLoader::new("inner");
        set_current_loader(Some(outer.clone()));

        {
            let scope = LoaderScope::enter(Some(inner.clone()));
            assert!(scope.swapped());
            assert!(current_loader().is_some_and(|l| Arc::ptr_eq(&l, &inner)));
        }

        assert!(current_loader().is_some_and(|l| Arc::ptr_eq(&l, &outer)));
        set_current_loader(None);
    }

    #[test]
    fn scope_is_a_no_op_for_the_same_loader() {
        let loader = ContextLoader::new("same");
        set_current_loader(Some(loader.clone()));
        let scope = LoaderScope::enter(Some(loader));
        assert!(!scope.swapped());
        drop(scope);
        set_current_loader(None);
    }

    #[test]
    fn scope_restores_after_panic() {
        let inner = ContextLoader::new("inner");
        let result = std::panic::catch_unwind(|| {
            let _scope = LoaderScope::enter(Some(inner));
            panic!("body failed");
        });
        assert!(result.is_err());
        assert!(current_loader().is_none());
    }

    #[test]
    fn loaders_with_equal_names_are_distinct() {
        let a = ContextLoader::new("app");
        let b = ContextLoader::new("app");
        assert_ne!(a.id(), b.id());
        assert!(!same_loader(&Some(a), &Some(b)));
    }

    #[test]
    fn identity_resets_to_unauthenticated() {
        set_identity(SecurityIdentity::Principal("alice".into()));
        set_unauthenticated();
        assert_eq!(current_identity(), SecurityIdentity::Unauthenticated);
    }
}

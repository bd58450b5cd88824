use super::{
    context::{ContextLoader, LoaderScope},
    coordinator::{Admission, WorkCoordinator},
    errors::PanicError,
    pool::Task,
    work::Work,
};
use std::{
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::debug;


/// Adapts one submitted [`Work`] into a pool task.
///
/// Runs on the worker thread with the producer's context loader installed,
/// brackets the body with the coordinator's pre- and post-invoke steps and
/// traps anything the body throws. If the pool drops the task unrun, the
/// submission is rejected instead of being left hanging.
pub(crate) struct ExecutionWrapper {
    work: Box<dyn Work>,
    coordinator: Arc<WorkCoordinator>,
    loader: Option<Arc<ContextLoader>>,
    ran: bool,
}

impl ExecutionWrapper {
    pub(crate) fn new(
        work: Box<dyn Work>,
        coordinator: Arc<WorkCoordinator>,
        loader: Option<Arc<ContextLoader>>,
    ) -> Self {
        Self {
            work,
            coordinator,
            loader,
            ran: false,
        }
    }

    pub(crate) fn into_task(self) -> Task {
        Box::new(move || self.run())
    }

    pub(crate) fn run(mut self) {
        self.ran = true;
        let _loader = LoaderScope::enter(self.loader.clone());

        let id = self.coordinator.id();
        let name = self.work.name().map(str::to_owned);
        if let Some(name) = &name {
            debug!(work = %name, work_id = id, "start");
        }

        if let Admission::Proceed(imported) = self.coordinator.pre_invoke() {
            let work = &mut self.work;
            match panic::catch_unwind(AssertUnwindSafe(|| work.run())) {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => self.coordinator.set_error(failure),
                Err(payload) => self.coordinator.set_error(Box::new(PanicError::from_payload(payload))),
            }
            if let Some(name) = &name {
                debug!(work = %name, work_id = id, "executed");
            }
            self.coordinator.post_invoke(imported);
        }

        if let Some(name) = &name {
            debug!(work = %name, work_id = id, "end");
        }
    }
}

impl Drop for ExecutionWrapper {
    fn drop(&mut self) {
        if !self.ran {
            self.coordinator.abandon();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::{self, ContextLoader},
        coordinator::Submission,
        errors::{Abandoned, BoxError},
        model::{WaitMode, WorkState},
        transaction::NoTransactionManager,
        work::WorkItem,
    };
    use std::sync::Mutex;

    fn coordinator() -> Arc<WorkCoordinator> {
        WorkCoordinator::new(Submission {
            mode: WaitMode::WaitUntilFinish,
            start_timeout: None,
            context: None,
            listener: None,
            work_name: None,
            owner: Arc::from("wrapper-test"),
            probe: None,
            tx_manager: Arc::new(NoTransactionManager),
        })
    }

    #[test]
    fn dropped_task_is_abandoned() {
        let coordinator = coordinator();
        coordinator.accept();
        let task = ExecutionWrapper::new(Box::new(WorkItem::new(|| Ok(()))), coordinator.clone(), None).into_task();
        drop(task);

        assert_eq!(coordinator.state(), WorkState::Rejected);
        assert!(coordinator.error().unwrap().cause_as::<Abandoned>().is_some());
    }

    #[test]
    fn runs_under_declared_loader_and_restores() {
        let coordinator = coordinator();
        coordinator.accept();
        let loader = ContextLoader::new("producer");
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();

        let work = WorkItem::new(move || {
            *slot.lock().unwrap() = context::current_loader();
            Ok::<(), BoxError>(())
        });
        ExecutionWrapper::new(Box::new(work), coordinator.clone(), Some(loader.clone())).run();

        assert!(Arc::ptr_eq(seen.lock().unwrap().as_ref().unwrap(), &loader));
        assert!(context::current_loader().is_none());
        assert_eq!(coordinator.state(), WorkState::Completed);
    }
}

//! Exactly-once destruction of a session's resource after its stream ends.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vmgate_core::{ResourceName, ResourceRuntime, SessionId};

/// Destroys one session's resource, at most once.
///
/// Both relay directions call [`trigger`](Self::trigger) when they stop; only
/// the first call spawns the destroy. The client never waits on it, and a
/// failed destroy is only logged.
pub struct TeardownCoordinator {
    runtime: Arc<dyn ResourceRuntime>,
    session_id: SessionId,
    resource: ResourceName,
    fired: AtomicBool,
}

impl TeardownCoordinator {
    pub fn new(runtime: Arc<dyn ResourceRuntime>, session_id: SessionId) -> Self {
        let resource = session_id.resource_name();
        Self {
            runtime,
            session_id,
            resource,
            fired: AtomicBool::new(false),
        }
    }

    /// Start destroying the resource if no earlier call has.
    ///
    /// Returns the handle of the spawned destroy task to the first caller and
    /// `None` to everyone after.
    pub fn trigger(&self) -> Option<JoinHandle<()>> {
        if self
            .fired
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(session_id = %self.session_id, "teardown already triggered");
            return None;
        }

        let runtime = self.runtime.clone();
        let resource = self.resource.clone();
        let session_id = self.session_id.clone();
        Some(tokio::spawn(async move {
            match runtime.destroy(&resource).await {
                Ok(()) => info!(session_id = %session_id, resource = %resource, "vm removed after stream ended"),
                Err(e) => warn!(session_id = %session_id, resource = %resource, error = %e, "failed to remove vm"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmgate_core::FakeRuntime;

    fn setup() -> (FakeRuntime, Arc<TeardownCoordinator>, ResourceName) {
        let rt = FakeRuntime::new();
        let id = SessionId::parse("t1").unwrap();
        let name = id.resource_name();
        rt.insert(&name, None);
        let coordinator = Arc::new(TeardownCoordinator::new(Arc::new(rt.clone()), id));
        (rt, coordinator, name)
    }

    #[tokio::test]
    async fn test_trigger_destroys_once() {
        let (rt, coordinator, name) = setup();
        let handle = coordinator.trigger().unwrap();
        handle.await.unwrap();
        assert!(coordinator.trigger().is_none());
        assert!(!rt.exists(&name));
        assert_eq!(rt.destroy_count(&name), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_triggers_destroy_once() {
        let (rt, coordinator, name) = setup();
        let mut tasks = Vec::new();
        for _ in 0..16 {
            let c = coordinator.clone();
            tasks.push(tokio::spawn(async move { c.trigger() }));
        }

        let mut winners = 0;
        for task in tasks {
            if let Some(handle) = task.await.unwrap() {
                winners += 1;
                handle.await.unwrap();
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(rt.destroy_count(&name), 1);
    }

    #[tokio::test]
    async fn test_destroy_failure_is_swallowed() {
        let (rt, coordinator, name) = setup();
        rt.fail_destroy("daemon went away");
        coordinator.trigger().unwrap().await.unwrap();
        assert_eq!(rt.destroy_count(&name), 1);
        assert!(rt.exists(&name));
    }
}

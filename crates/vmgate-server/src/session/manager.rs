//! Session lifecycle management.
//!
//! Handles creation, explicit stop, and inspection of VM sessions. Nothing is
//! stored between calls: each operation derives the resource name from the
//! session id and asks the runtime directly.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vmgate_core::{
    ResourceRuntime, ResourceStatus, Session, SessionId, SessionState, VmError, VmResult,
};

/// Creates, stops, and inspects sessions through a resource runtime.
pub struct SessionManager {
    runtime: Arc<dyn ResourceRuntime>,
    /// Pause between create and the running-state check.
    settle: Duration,
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(runtime: Arc<dyn ResourceRuntime>, settle: Duration) -> Self {
        Self { runtime, settle }
    }

    /// Provision a new session.
    ///
    /// Returns `Err(VmError::Provisioning)` only when the create call itself
    /// fails. A resource that was created but is not running after the settle
    /// interval is destroyed, and the returned session is `Failed` with the
    /// resource's log output as diagnostics.
    pub async fn create(&self) -> VmResult<Session> {
        let id = SessionId::generate();
        let resource = id.resource_name();
        debug!(session_id = %id, resource = %resource, state = ?SessionState::Creating, "creating session");

        let container_id = self.runtime.create(&resource).await.map_err(|e| match e {
            VmError::Provisioning { .. } => e,
            other => VmError::Provisioning {
                message: other.to_string(),
                output: String::new(),
            },
        })?;

        tokio::time::sleep(self.settle).await;

        let status = match self.runtime.inspect(&resource).await {
            Ok(status) => status,
            Err(e) => {
                warn!(session_id = %id, error = %e, "inspect after create failed");
                ResourceStatus::default()
            }
        };

        if status.running {
            info!(session_id = %id, container_id = %container_id, address = ?status.address, "session running");
            return Ok(Session {
                id,
                resource,
                container_id,
                state: SessionState::Running,
                address: status.address,
                diagnostics: None,
            });
        }

        let diagnostics = match self.runtime.logs(&resource).await {
            Ok(logs) => logs,
            Err(e) => format!("failed to collect logs: {e}"),
        };
        warn!(session_id = %id, logs = %diagnostics, "session not running, removing resource");
        if let Err(e) = self.runtime.destroy(&resource).await {
            warn!(session_id = %id, error = %e, "failed to remove non-running resource");
        }

        Ok(Session {
            id,
            resource,
            container_id,
            state: SessionState::Failed,
            address: None,
            diagnostics: Some(diagnostics),
        })
    }

    /// Stop and remove a session's resource. Succeeds whether or not it exists.
    pub async fn stop(&self, id: &SessionId) {
        let resource = id.resource_name();
        if let Err(e) = self.runtime.stop(&resource).await {
            debug!(session_id = %id, error = %e, "stop: runtime stop failed");
        }
        match self.runtime.destroy(&resource).await {
            Ok(()) => info!(session_id = %id, "session stopped"),
            Err(e) => debug!(session_id = %id, error = %e, "stop: remove failed"),
        }
    }

    /// Raw runtime metadata for a session, or an empty array if it is gone.
    pub async fn info(&self, id: &SessionId) -> Value {
        let resource = id.resource_name();
        match self.runtime.describe(&resource).await {
            Ok(value) => value,
            Err(e) => {
                debug!(session_id = %id, error = %e, "info: describe failed");
                Value::Array(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmgate_core::{FakeRuntime, RuntimeCall};

    fn manager(rt: &FakeRuntime) -> SessionManager {
        SessionManager::new(Arc::new(rt.clone()), Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_create_running() {
        let rt = FakeRuntime::new();
        let session = manager(&rt).create().await.unwrap();
        assert!(session.is_running());
        assert!(session.diagnostics.is_none());
        assert!(session.resource.as_str().starts_with("vm-"));
        assert_eq!(session.resource, session.id.resource_name());
        assert!(rt.exists(&session.resource));
        assert!(session.address.is_none());
    }

    #[tokio::test]
    async fn test_create_records_address_when_known() {
        let rt = FakeRuntime::new();
        let addr: std::net::IpAddr = "172.18.0.9".parse().unwrap();
        rt.set_default_address(addr);
        let session = manager(&rt).create().await.unwrap();
        assert!(session.is_running());
        assert_eq!(session.address, Some(addr));
    }

    #[tokio::test]
    async fn test_create_not_running_leaves_nothing_behind() {
        let rt = FakeRuntime::new();
        rt.create_stopped();
        rt.set_logs("Xvnc: cannot open display\n");

        let session = manager(&rt).create().await.unwrap();
        assert_eq!(session.state, SessionState::Failed);
        assert_eq!(
            session.diagnostics.as_deref(),
            Some("Xvnc: cannot open display\n")
        );
        assert!(!rt.exists(&session.resource));
        assert_eq!(rt.resource_count(), 0);
        assert_eq!(rt.destroy_count(&session.resource), 1);
    }

    #[tokio::test]
    async fn test_create_inspect_failure_counts_as_not_running() {
        let rt = FakeRuntime::new();
        let mgr = manager(&rt);
        rt.fail_inspects(1);
        let session = mgr.create().await.unwrap();
        assert!(!session.is_running());
        assert_eq!(rt.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_create_failure_is_provisioning_error() {
        let rt = FakeRuntime::new();
        rt.fail_create("Cannot connect to the Docker daemon");
        match manager(&rt).create().await {
            Err(VmError::Provisioning { output, .. }) => {
                assert!(output.contains("Docker daemon"));
            }
            other => panic!("expected provisioning error, got {other:?}"),
        }
        assert_eq!(rt.resource_count(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let rt = FakeRuntime::new();
        let mgr = manager(&rt);
        let id = SessionId::parse("never-existed").unwrap();
        mgr.stop(&id).await;
        mgr.stop(&id).await;

        let session = mgr.create().await.unwrap();
        mgr.stop(&session.id).await;
        assert!(!rt.exists(&session.resource));
        let calls = rt.calls();
        assert!(calls.contains(&RuntimeCall::Stop(session.resource.to_string())));
        assert!(calls.contains(&RuntimeCall::Destroy(session.resource.to_string())));
    }

    #[tokio::test]
    async fn test_info_missing_is_empty_array() {
        let rt = FakeRuntime::new();
        let mgr = manager(&rt);
        let id = SessionId::parse("ghost").unwrap();
        assert_eq!(mgr.info(&id).await, Value::Array(Vec::new()));

        let session = mgr.create().await.unwrap();
        let info = mgr.info(&session.id).await;
        assert_eq!(info.as_array().map(Vec::len), Some(1));
    }
}

//! In-memory resource runtime for deterministic tests.

use crate::error::{VmError, VmResult};
use crate::runtime::{ResourceRuntime, ResourceStatus};
use crate::session::ResourceName;
use futures_util::future::BoxFuture;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Recorded call to [`FakeRuntime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Create(String),
    Inspect(String),
    Describe(String),
    Logs(String),
    Stop(String),
    Destroy(String),
}

/// Fake runtime: records every call and lets tests script inspect answers.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    resources: HashMap<String, FakeResource>,
    calls: Vec<RuntimeCall>,
    next_id: u64,
    create_error: Option<String>,
    destroy_error: Option<String>,
    /// Running state given to newly created resources.
    create_not_running: bool,
    /// Address given to newly created resources.
    default_address: Option<IpAddr>,
    /// Number of upcoming inspect calls that fail as "runtime unreachable".
    inspect_failures: usize,
    logs: String,
}

struct FakeResource {
    container_id: String,
    running: bool,
    address: Option<IpAddr>,
    /// Answers consumed by successive inspects before `address` applies.
    scripted: VecDeque<Option<IpAddr>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make the next creates fail with `output`.
    pub fn fail_create(&self, output: &str) {
        self.state().create_error = Some(output.to_string());
    }

    /// Make destroys fail with `message` (the resource is kept).
    pub fn fail_destroy(&self, message: &str) {
        self.state().destroy_error = Some(message.to_string());
    }

    /// Newly created resources report `running = false`.
    pub fn create_stopped(&self) {
        self.state().create_not_running = true;
    }

    /// Address reported for newly created resources.
    pub fn set_default_address(&self, addr: IpAddr) {
        self.state().default_address = Some(addr);
    }

    /// Log output returned by `logs`.
    pub fn set_logs(&self, logs: &str) {
        self.state().logs = logs.to_string();
    }

    /// Fail the next `n` inspects with a runtime error.
    pub fn fail_inspects(&self, n: usize) {
        self.state().inspect_failures = n;
    }

    /// Insert a running resource directly.
    pub fn insert(&self, name: &ResourceName, address: Option<IpAddr>) {
        let mut state = self.state();
        state.next_id += 1;
        let container_id = format!("fake-{}", state.next_id);
        state.resources.insert(
            name.as_str().to_string(),
            FakeResource {
                container_id,
                running: true,
                address,
                scripted: VecDeque::new(),
            },
        );
    }

    /// Queue inspect answers for `name`; consumed one per inspect.
    pub fn script_addresses(&self, name: &ResourceName, answers: Vec<Option<IpAddr>>) {
        if let Some(resource) = self.state().resources.get_mut(name.as_str()) {
            resource.scripted.extend(answers);
        }
    }

    pub fn exists(&self, name: &ResourceName) -> bool {
        self.state().resources.contains_key(name.as_str())
    }

    pub fn resource_count(&self) -> usize {
        self.state().resources.len()
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state().calls.clone()
    }

    pub fn destroy_count(&self, name: &ResourceName) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Destroy(n) if n == name.as_str()))
            .count()
    }

    pub fn inspect_count(&self, name: &ResourceName) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, RuntimeCall::Inspect(n) if n == name.as_str()))
            .count()
    }

    fn do_create(&self, name: &ResourceName) -> VmResult<String> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Create(name.to_string()));
        if let Some(output) = state.create_error.clone() {
            return Err(VmError::Provisioning {
                message: "create failed".to_string(),
                output,
            });
        }
        if state.resources.contains_key(name.as_str()) {
            return Err(VmError::Provisioning {
                message: "name in use".to_string(),
                output: format!("Conflict. The container name \"/{name}\" is already in use"),
            });
        }
        state.next_id += 1;
        let container_id = format!("fake-{}", state.next_id);
        let resource = FakeResource {
            container_id: container_id.clone(),
            running: !state.create_not_running,
            address: state.default_address,
            scripted: VecDeque::new(),
        };
        state.resources.insert(name.as_str().to_string(), resource);
        Ok(container_id)
    }

    fn do_inspect(&self, name: &ResourceName) -> VmResult<ResourceStatus> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Inspect(name.to_string()));
        if state.inspect_failures > 0 {
            state.inspect_failures -= 1;
            return Err(VmError::Runtime("runtime unreachable".to_string()));
        }
        let resource = state
            .resources
            .get_mut(name.as_str())
            .ok_or_else(|| VmError::ResourceNotFound(name.to_string()))?;
        let address = match resource.scripted.pop_front() {
            Some(answer) => answer,
            None => resource.address,
        };
        Ok(ResourceStatus {
            running: resource.running,
            address,
        })
    }

    fn do_describe(&self, name: &ResourceName) -> VmResult<serde_json::Value> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Describe(name.to_string()));
        let resource = state
            .resources
            .get(name.as_str())
            .ok_or_else(|| VmError::ResourceNotFound(name.to_string()))?;
        Ok(serde_json::json!([{
            "Id": resource.container_id,
            "Name": format!("/{name}"),
            "State": { "Running": resource.running },
        }]))
    }

    fn do_logs(&self, name: &ResourceName) -> VmResult<String> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Logs(name.to_string()));
        if !state.resources.contains_key(name.as_str()) {
            return Err(VmError::ResourceNotFound(name.to_string()));
        }
        Ok(state.logs.clone())
    }

    fn do_stop(&self, name: &ResourceName) -> VmResult<()> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Stop(name.to_string()));
        match state.resources.get_mut(name.as_str()) {
            Some(resource) => {
                resource.running = false;
                Ok(())
            }
            None => Err(VmError::ResourceNotFound(name.to_string())),
        }
    }

    fn do_destroy(&self, name: &ResourceName) -> VmResult<()> {
        let mut state = self.state();
        state.calls.push(RuntimeCall::Destroy(name.to_string()));
        if let Some(message) = state.destroy_error.clone() {
            return Err(VmError::Runtime(message));
        }
        match state.resources.remove(name.as_str()) {
            Some(_) => Ok(()),
            None => Err(VmError::ResourceNotFound(name.to_string())),
        }
    }
}

impl ResourceRuntime for FakeRuntime {
    fn create<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<String>> {
        Box::pin(async move { self.do_create(name) })
    }

    fn inspect<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<ResourceStatus>> {
        Box::pin(async move { self.do_inspect(name) })
    }

    fn describe<'a>(
        &'a self,
        name: &'a ResourceName,
    ) -> BoxFuture<'a, VmResult<serde_json::Value>> {
        Box::pin(async move { self.do_describe(name) })
    }

    fn logs<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<String>> {
        Box::pin(async move { self.do_logs(name) })
    }

    fn stop<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<()>> {
        Box::pin(async move { self.do_stop(name) })
    }

    fn destroy<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<()>> {
        Box::pin(async move { self.do_destroy(name) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;

    #[tokio::test]
    async fn test_scripted_addresses_drain_in_order() {
        let rt = FakeRuntime::new();
        let name = SessionId::parse("s1").unwrap().resource_name();
        let addr: IpAddr = "10.0.0.2".parse().unwrap();
        rt.insert(&name, Some(addr));
        rt.script_addresses(&name, vec![None, None]);

        assert_eq!(rt.inspect(&name).await.unwrap().address, None);
        assert_eq!(rt.inspect(&name).await.unwrap().address, None);
        assert_eq!(rt.inspect(&name).await.unwrap().address, Some(addr));
        assert_eq!(rt.inspect_count(&name), 3);
    }

    #[tokio::test]
    async fn test_destroy_missing_is_not_found() {
        let rt = FakeRuntime::new();
        let name = SessionId::parse("gone").unwrap().resource_name();
        assert!(matches!(
            rt.destroy(&name).await,
            Err(VmError::ResourceNotFound(_))
        ));
        assert_eq!(rt.destroy_count(&name), 1);
    }
}

//! Address resolution via the resource runtime.
//!
//! A thin single-shot wrapper around `inspect` that separates "runtime
//! unreachable", "resource gone", and "no address assigned yet", so the
//! readiness loop in [`super::probe`] can decide what to retry.

use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;
use vmgate_core::{ResourceName, ResourceRuntime, VmError};

/// Why a single resolution attempt produced no address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The runtime could not be queried.
    Runtime(String),
    /// The runtime has no resource with this name.
    NotFound,
    /// The resource exists but has no address on its network yet.
    NoAddress,
}

impl ResolveError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ResolveError::NotFound)
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::Runtime(msg) => write!(f, "runtime unavailable: {msg}"),
            ResolveError::NotFound => f.write_str("vm not found"),
            ResolveError::NoAddress => f.write_str("vm IP not available"),
        }
    }
}

/// Looks up a resource's network address.
#[derive(Clone)]
pub struct AddressResolver {
    runtime: Arc<dyn ResourceRuntime>,
}

impl AddressResolver {
    pub fn new(runtime: Arc<dyn ResourceRuntime>) -> Self {
        Self { runtime }
    }

    /// Ask the runtime once for `resource`'s address.
    pub async fn resolve(&self, resource: &ResourceName) -> Result<IpAddr, ResolveError> {
        match self.runtime.inspect(resource).await {
            Ok(status) => match status.address {
                Some(addr) => {
                    debug!(resource = %resource, addr = %addr, "resolved");
                    Ok(addr)
                }
                None => {
                    debug!(resource = %resource, "no address assigned yet");
                    Err(ResolveError::NoAddress)
                }
            },
            Err(VmError::ResourceNotFound(_)) => Err(ResolveError::NotFound),
            Err(e) => Err(ResolveError::Runtime(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmgate_core::{FakeRuntime, SessionId};

    fn setup() -> (FakeRuntime, AddressResolver, ResourceName) {
        let rt = FakeRuntime::new();
        let resolver = AddressResolver::new(Arc::new(rt.clone()));
        let name = SessionId::parse("r1").unwrap().resource_name();
        (rt, resolver, name)
    }

    #[tokio::test]
    async fn test_resolve_address() {
        let (rt, resolver, name) = setup();
        rt.insert(&name, Some("172.18.0.4".parse().unwrap()));
        assert_eq!(
            resolver.resolve(&name).await,
            Ok("172.18.0.4".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_distinguishes_failures() {
        let (rt, resolver, name) = setup();
        assert_eq!(resolver.resolve(&name).await, Err(ResolveError::NotFound));

        rt.insert(&name, None);
        assert_eq!(resolver.resolve(&name).await, Err(ResolveError::NoAddress));

        rt.fail_inspects(1);
        let err = resolver.resolve(&name).await.unwrap_err();
        assert!(matches!(err, ResolveError::Runtime(_)));
        assert!(err.is_transient());
        assert!(ResolveError::NoAddress.is_transient());
        assert!(!ResolveError::NotFound.is_transient());
    }
}

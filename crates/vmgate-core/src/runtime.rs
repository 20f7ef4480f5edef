//! Capability interface to the external resource runtime.
//!
//! The runtime creates, inspects, and destroys isolated compute resources.
//! Every method addresses a resource by its [`ResourceName`].

use crate::error::VmResult;
use crate::session::ResourceName;
use futures_util::future::BoxFuture;
use std::net::IpAddr;

/// What `inspect` reports about a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceStatus {
    pub running: bool,
    /// Address on the resource's private network, if one is assigned yet.
    pub address: Option<IpAddr>,
}

/// Operations the session core needs from a resource runtime.
///
/// Implementations must report a missing resource as
/// [`VmError::ResourceNotFound`](crate::VmError::ResourceNotFound) and any
/// failure to talk to the runtime as [`VmError::Runtime`](crate::VmError::Runtime).
pub trait ResourceRuntime: Send + Sync {
    /// Create and start a resource. Returns the runtime-assigned id.
    fn create<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<String>>;

    /// Report running state and address.
    fn inspect<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<ResourceStatus>>;

    /// Raw structured metadata, as the runtime reports it.
    fn describe<'a>(&'a self, name: &'a ResourceName)
        -> BoxFuture<'a, VmResult<serde_json::Value>>;

    /// Captured output of the resource.
    fn logs<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<String>>;

    /// Ask the resource to stop gracefully.
    fn stop<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<()>>;

    /// Forcibly remove the resource.
    fn destroy<'a>(&'a self, name: &'a ResourceName) -> BoxFuture<'a, VmResult<()>>;
}

//! vmgate-core: shared types for the vmgate session gateway.
//!
//! Provides the error type, session identity and the resource naming
//! convention, stream phases, the resource-runtime capability trait, and the
//! framed transport traits used by the relay.

pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;
pub mod runtime;
pub mod session;
pub mod transport;

// Re-export commonly used items at crate root.
pub use error::{VmError, VmResult};
pub use runtime::{ResourceRuntime, ResourceStatus};
pub use session::{
    resource_name, FailureKind, ResourceName, Session, SessionId, SessionState, StreamPhase,
    RESOURCE_PREFIX,
};
pub use transport::{Frame, FrameSink, FrameSource};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeRuntime, RuntimeCall};

//! Gateway to a session's service port: address resolution and readiness.
//!
//! - **[`resolver`]**: [`AddressResolver`](resolver::AddressResolver) asks the runtime once for a
//!   resource's address and classifies why none was returned.
//! - **[`probe`]**: [`ReadinessProber`] retries resolution, then retries a
//!   TCP connect to the service port, each with its own deadline, advancing a
//!   [`StreamGate`] as it goes.
//!
//! # Data Flow
//!
//! ```text
//! GET /vm/:id/stream
//!   → ReadinessProber::open
//!       → AddressResolver::resolve   (repeated until address or timeout)
//!       → TcpStream::connect         (repeated until accepted or deadline)
//!   → WebSocket upgrade → relay
//! ```

pub mod probe;
pub mod resolver;

pub use probe::{ReadinessProber, StreamGate};

//! Readiness gate for stream requests.
//!
//! A freshly created resource may not have an address yet, and its service
//! may not be listening yet. [`ReadinessProber::open`] drives a
//! [`StreamGate`] through `Resolving -> Probing -> Ready`, retrying each
//! phase at a fixed interval until its own deadline.

use super::resolver::{AddressResolver, ResolveError};
use crate::config::ReadinessConfig;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vmgate_core::{
    FailureKind, ResourceName, ResourceRuntime, SessionId, StreamPhase, VmError, VmResult,
};

/// Tracks the phase of one stream request.
#[derive(Debug)]
pub struct StreamGate {
    session_id: SessionId,
    phase: StreamPhase,
}

impl StreamGate {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            phase: StreamPhase::Resolving,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn advance(&mut self, next: StreamPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            warn!(session_id = %self.session_id, from = %self.phase, to = %next, "illegal stream transition");
            return false;
        }
        debug!(
            session_id = %self.session_id,
            from = %self.phase,
            to = %next,
            state = ?next.session_state(),
            "stream transition"
        );
        self.phase = next;
        if next.is_terminal() {
            debug!(session_id = %self.session_id, "stream gate closed");
        }
        true
    }
}

/// Resolves a session's address and waits for its service port.
#[derive(Clone)]
pub struct ReadinessProber {
    resolver: AddressResolver,
    config: ReadinessConfig,
}

impl ReadinessProber {
    pub fn new(runtime: Arc<dyn ResourceRuntime>, config: ReadinessConfig) -> Self {
        Self {
            resolver: AddressResolver::new(runtime),
            config,
        }
    }

    /// Run the gate to `Ready` and return the live service connection.
    ///
    /// On failure the gate ends in `Failed(Resolution)` or `Failed(NotReady)`.
    pub async fn open(
        &self,
        gate: &mut StreamGate,
        resource: &ResourceName,
    ) -> VmResult<TcpStream> {
        let ip = match self.wait_for_address(resource).await {
            Ok(ip) => ip,
            Err(e) => {
                gate.advance(StreamPhase::Failed(FailureKind::Resolution));
                return Err(e);
            }
        };
        gate.advance(StreamPhase::Probing);

        let addr = SocketAddr::new(ip, self.config.service_port);
        match self.probe(addr).await {
            Ok(stream) => {
                gate.advance(StreamPhase::Ready);
                info!(session_id = %gate.session_id(), addr = %addr, "vm service ready");
                Ok(stream)
            }
            Err(e) => {
                gate.advance(StreamPhase::Failed(FailureKind::NotReady));
                Err(e)
            }
        }
    }

    /// Resolve `resource` until an address appears or the resolve timeout passes.
    ///
    /// Runtime errors and missing addresses are retried; a missing resource
    /// fails immediately.
    pub async fn wait_for_address(&self, resource: &ResourceName) -> VmResult<IpAddr> {
        let deadline = Instant::now() + self.config.resolve_timeout;
        let mut last = ResolveError::NoAddress;

        loop {
            match tokio::time::timeout_at(deadline, self.resolver.resolve(resource)).await {
                Ok(Ok(ip)) => return Ok(ip),
                Ok(Err(e)) if !e.is_transient() => {
                    return Err(VmError::Resolution(e.to_string()));
                }
                Ok(Err(e)) => {
                    debug!(resource = %resource, error = %e, "address not yet available");
                    last = e;
                }
                Err(_) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(resource = %resource, error = %last, "address resolution timed out");
                return Err(VmError::Resolution(last.to_string()));
            }
            tokio::time::sleep(self.config.resolve_interval.min(deadline - now)).await;
        }
    }

    /// Connect to `addr` until it accepts or the probe deadline passes.
    ///
    /// Each attempt is capped so that the whole phase ends no later than one
    /// probe interval after the deadline.
    pub async fn probe(&self, addr: SocketAddr) -> VmResult<TcpStream> {
        let deadline = Instant::now() + self.config.probe_deadline;
        let mut attempts: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt_timeout = self
                .config
                .connect_timeout
                .min(remaining + self.config.probe_interval);
            attempts += 1;

            let last = match tokio::time::timeout(attempt_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    debug!(addr = %addr, attempts, "service port accepted connection");
                    return Ok(stream);
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("connect timed out after {attempt_timeout:?}"),
            };

            let now = Instant::now();
            if now >= deadline {
                warn!(addr = %addr, attempts, error = %last, "service port never became ready");
                return Err(VmError::NotReady(last));
            }
            tokio::time::sleep(self.config.probe_interval.min(deadline - now)).await;
        }
    }
}

/// Readiness settings with short timings, for tests.
#[cfg(test)]
pub(crate) fn fast_readiness(service_port: u16) -> ReadinessConfig {
    use std::time::Duration;
    ReadinessConfig {
        service_port,
        resolve_timeout: Duration::from_millis(500),
        resolve_interval: Duration::from_millis(20),
        connect_timeout: Duration::from_millis(200),
        probe_interval: Duration::from_millis(20),
        probe_deadline: Duration::from_millis(500),
    }
}

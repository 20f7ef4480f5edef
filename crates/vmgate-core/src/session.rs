//! Session identity, resource naming, and lifecycle states.
//!
//! A session has no stored record: its runtime resource is always named
//! [`RESOURCE_PREFIX`] followed by the session id, so every operation can
//! recompute the name from the id alone.

use crate::error::{VmError, VmResult};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;

/// Prefix prepended to a session id to form its runtime resource name.
pub const RESOURCE_PREFIX: &str = "vm-";

/// Longest id accepted from a client.
pub const MAX_ID_LEN: usize = 128;

/// Client-facing session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a random id (16 bytes, 32 hex chars).
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let bytes: [u8; 16] = rng.gen();
        Self(hex::encode(bytes))
    }

    /// Validate an id received from a client.
    ///
    /// Ids end up as arguments to the resource runtime, so only ASCII
    /// alphanumerics, `-` and `_` are accepted.
    pub fn parse(raw: &str) -> VmResult<Self> {
        if raw.is_empty() {
            return Err(VmError::InvalidId("missing vm id".to_string()));
        }
        if raw.len() > MAX_ID_LEN {
            return Err(VmError::InvalidId(format!(
                "vm id too long ({} > {MAX_ID_LEN})",
                raw.len()
            )));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(VmError::InvalidId(format!("illegal characters in {raw:?}")));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The runtime resource name for this session.
    pub fn resource_name(&self) -> ResourceName {
        resource_name(self)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of the runtime resource backing a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `resource_name = RESOURCE_PREFIX + id`.
pub fn resource_name(id: &SessionId) -> ResourceName {
    ResourceName(format!("{RESOURCE_PREFIX}{}", id.as_str()))
}

/// Coarse lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Creating,
    Running,
    Failed,
    Streaming,
    Terminated,
}

/// Why a stream request never reached `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No address was obtained before the resolve timeout.
    Resolution,
    /// The service port never accepted a connection before the probe deadline.
    NotReady,
}

/// Phases of a single stream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Resolving,
    Probing,
    Ready,
    Streaming,
    Terminated,
    Failed(FailureKind),
}

impl StreamPhase {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: StreamPhase) -> bool {
        use StreamPhase::*;
        matches!(
            (self, next),
            (Resolving, Probing)
                | (Resolving, Failed(FailureKind::Resolution))
                | (Probing, Ready)
                | (Probing, Failed(FailureKind::NotReady))
                | (Ready, Streaming)
                | (Ready, Terminated)
                | (Streaming, Terminated)
                | (Failed(_), Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StreamPhase::Terminated)
    }

    /// Session state a stream in this phase puts its session in.
    pub fn session_state(self) -> SessionState {
        match self {
            StreamPhase::Resolving | StreamPhase::Probing | StreamPhase::Ready => {
                SessionState::Running
            }
            StreamPhase::Streaming => SessionState::Streaming,
            StreamPhase::Terminated => SessionState::Terminated,
            StreamPhase::Failed(_) => SessionState::Failed,
        }
    }
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamPhase::Resolving => f.write_str("resolving"),
            StreamPhase::Probing => f.write_str("probing"),
            StreamPhase::Ready => f.write_str("ready"),
            StreamPhase::Streaming => f.write_str("streaming"),
            StreamPhase::Terminated => f.write_str("terminated"),
            StreamPhase::Failed(FailureKind::Resolution) => f.write_str("failed(resolution)"),
            StreamPhase::Failed(FailureKind::NotReady) => f.write_str("failed(not-ready)"),
        }
    }
}

/// Outcome of creating a session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub resource: ResourceName,
    /// Identifier the runtime assigned to the resource.
    pub container_id: String,
    pub state: SessionState,
    /// Address the runtime reported right after creation, if it had one yet.
    pub address: Option<IpAddr>,
    /// Resource output captured when it failed to reach `Running`.
    pub diagnostics: Option<String>,
}

impl Session {
    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name_convention() {
        let id = SessionId::parse("abc123").unwrap();
        assert_eq!(id.resource_name().as_str(), "vm-abc123");
        assert_eq!(resource_name(&id).to_string(), format!("{RESOURCE_PREFIX}abc123"));
    }

    #[test]
    fn test_generated_ids_are_unique_hex() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert!(SessionId::parse(a.as_str()).is_ok());
    }

    #[test]
    fn test_parse_accepts_uuid_style() {
        assert!(SessionId::parse("3f2b8c1e-9a7d-4e2f-8b1c-0d9e8f7a6b5c").is_ok());
        assert!(SessionId::parse("session_1").is_ok());
    }

    #[test]
    fn test_parse_rejects_bad_ids() {
        assert!(matches!(SessionId::parse(""), Err(VmError::InvalidId(_))));
        assert!(SessionId::parse("a b").is_err());
        assert!(SessionId::parse("--rm;ls").is_err());
        assert!(SessionId::parse("../etc").is_err());
        assert!(SessionId::parse(&"x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_phase_transitions() {
        use StreamPhase::*;
        assert!(Resolving.can_advance_to(Probing));
        assert!(Probing.can_advance_to(Ready));
        assert!(Ready.can_advance_to(Streaming));
        assert!(Streaming.can_advance_to(Terminated));
        assert!(Failed(FailureKind::NotReady).can_advance_to(Terminated));
        assert!(!Resolving.can_advance_to(Streaming));
        assert!(!Terminated.can_advance_to(Streaming));
        assert!(!Probing.can_advance_to(Failed(FailureKind::Resolution)));
        assert!(Terminated.is_terminal());
    }

    #[test]
    fn test_phase_session_state() {
        use StreamPhase::*;
        assert_eq!(Probing.session_state(), SessionState::Running);
        assert_eq!(Streaming.session_state(), SessionState::Streaming);
        assert_eq!(Terminated.session_state(), SessionState::Terminated);
        assert_eq!(
            Failed(FailureKind::Resolution).session_state(),
            SessionState::Failed
        );
    }
}

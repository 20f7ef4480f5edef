//! WebSocket side of a stream: upgrade policy and frame adapters.
//!
//! An accepted axum [`WebSocket`] is split into a [`WsFrameSource`] and a
//! [`WsFrameSink`] so the two relay directions can own one half each.

use crate::config::ServerConfig;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;
use vmgate_core::{Frame, FrameSink, FrameSource, VmError, VmResult};

/// How stream upgrades are accepted. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePolicy {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    /// Allowed `Origin` values. Empty = accept every origin.
    pub allowed_origins: Vec<String>,
}

impl Default for UpgradePolicy {
    fn default() -> Self {
        Self {
            read_buffer_size: 32 * 1024,
            write_buffer_size: 32 * 1024,
            allowed_origins: Vec::new(),
        }
    }
}

impl UpgradePolicy {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            read_buffer_size: config.ws_read_buffer,
            write_buffer_size: config.ws_write_buffer,
            allowed_origins: config.stream_origins.clone(),
        }
    }

    /// Check the request's `Origin` header against the allow list.
    pub fn check_origin(&self, origin: Option<&str>) -> VmResult<()> {
        if self.allowed_origins.is_empty() {
            return Ok(());
        }
        match origin {
            Some(o) if self.allowed_origins.iter().any(|a| a == o) => Ok(()),
            Some(o) => Err(VmError::OriginDenied(o.to_string())),
            None => Err(VmError::OriginDenied("missing origin".to_string())),
        }
    }

    /// Apply buffer sizes to a pending upgrade.
    pub fn apply(&self, upgrade: WebSocketUpgrade) -> WebSocketUpgrade {
        upgrade
            .read_buffer_size(self.read_buffer_size)
            .write_buffer_size(self.write_buffer_size)
    }
}

/// Split an accepted socket into relay halves.
pub fn split(socket: WebSocket) -> (WsFrameSource, WsFrameSink) {
    let (sink, stream) = socket.split();
    (WsFrameSource { stream }, WsFrameSink { sink })
}

/// Receiving half of an accepted WebSocket.
pub struct WsFrameSource {
    stream: SplitStream<WebSocket>,
}

impl FrameSource for WsFrameSource {
    fn recv(&mut self) -> BoxFuture<'_, VmResult<Option<Frame>>> {
        Box::pin(async move {
            match self.stream.next().await {
                Some(Ok(message)) => Ok(frame_from_message(message)),
                Some(Err(e)) => Err(VmError::Transport(format!("WS recv failed: {e}"))),
                None => Ok(None),
            }
        })
    }
}

/// Sending half of an accepted WebSocket.
pub struct WsFrameSink {
    sink: SplitSink<WebSocket, Message>,
}

impl FrameSink for WsFrameSink {
    fn send_binary(&mut self, data: Vec<u8>) -> BoxFuture<'_, VmResult<()>> {
        Box::pin(async move {
            self.sink
                .send(Message::Binary(data.into()))
                .await
                .map_err(|e| VmError::Transport(format!("WS send failed: {e}")))
        })
    }

    fn close(&mut self) -> BoxFuture<'_, VmResult<()>> {
        Box::pin(async move {
            if let Err(e) = self.sink.close().await {
                debug!(error = %e, "WS close on already closed socket");
            }
            Ok(())
        })
    }
}

/// Map a WebSocket message to a relay frame. `None` means the peer closed.
fn frame_from_message(message: Message) -> Option<Frame> {
    match message {
        Message::Binary(data) => Some(Frame::Binary(data.to_vec())),
        Message::Text(text) => Some(Frame::Text(text.as_str().to_owned())),
        Message::Ping(_) | Message::Pong(_) => Some(Frame::Control),
        Message::Close(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_origin_when_unrestricted() {
        let policy = UpgradePolicy::default();
        assert!(policy.check_origin(None).is_ok());
        assert!(policy.check_origin(Some("http://evil.example")).is_ok());
    }

    #[test]
    fn test_origin_allow_list() {
        let policy = UpgradePolicy {
            allowed_origins: vec!["http://localhost:3000".to_string()],
            ..Default::default()
        };
        assert!(policy.check_origin(Some("http://localhost:3000")).is_ok());
        assert!(matches!(
            policy.check_origin(Some("http://evil.example")),
            Err(VmError::OriginDenied(_))
        ));
        assert!(policy.check_origin(None).is_err());
    }

    #[test]
    fn test_policy_from_config() {
        let config = ServerConfig {
            ws_read_buffer: 1024,
            stream_origins: vec!["http://a".to_string()],
            ..Default::default()
        };
        let policy = UpgradePolicy::from_config(&config);
        assert_eq!(policy.read_buffer_size, 1024);
        assert_eq!(policy.write_buffer_size, 32 * 1024);
        assert_eq!(policy.allowed_origins, vec!["http://a".to_string()]);
    }

    #[test]
    fn test_default_config_accepts_any_stream_origin() {
        let policy = UpgradePolicy::from_config(&ServerConfig::default());
        assert!(policy.allowed_origins.is_empty());
        assert!(policy.check_origin(Some("http://desk.example:9000")).is_ok());
    }

    #[test]
    fn test_message_mapping() {
        assert_eq!(
            frame_from_message(Message::Binary(vec![1, 2].into())),
            Some(Frame::Binary(vec![1, 2]))
        );
        assert_eq!(
            frame_from_message(Message::Text("hi".into())),
            Some(Frame::Text("hi".to_string()))
        );
        assert_eq!(
            frame_from_message(Message::Ping(Vec::new().into())),
            Some(Frame::Control)
        );
        assert_eq!(frame_from_message(Message::Close(None)), None);
    }
}

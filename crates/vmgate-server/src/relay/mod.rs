//! Bidirectional relay between a framed client transport and a raw stream.
//!
//! Two tasks copy data, one per direction:
//!
//! - **client → resource**: binary frames are written verbatim to the raw
//!   stream; text and control frames are dropped.
//! - **resource → client**: each read of up to [`RELAY_BUFFER_SIZE`] bytes is
//!   sent as one binary frame.
//!
//! The relay ends as soon as either task stops. The other task is cancelled
//! through a broadcast signal, and each task closes the side it writes to on
//! the way out. Both tasks also trigger the [`TeardownCoordinator`], which
//! destroys the resource exactly once.

pub mod teardown;

pub use teardown::TeardownCoordinator;

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};
use vmgate_core::{Frame, FrameSink, FrameSource, SessionId};

/// Largest chunk read from the raw stream per frame.
pub const RELAY_BUFFER_SIZE: usize = 8192;

/// One copy direction of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToResource,
    ResourceToClient,
}

/// Summary of a finished relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    /// The direction whose stop ended the relay.
    pub first_finished: Direction,
    pub bytes_to_resource: u64,
    pub bytes_to_client: u64,
}

/// Relay for one session stream.
pub struct StreamRelay {
    session_id: SessionId,
    teardown: Arc<TeardownCoordinator>,
}

impl StreamRelay {
    pub fn new(session_id: SessionId, teardown: Arc<TeardownCoordinator>) -> Self {
        Self {
            session_id,
            teardown,
        }
    }

    /// Copy in both directions until either side stops.
    ///
    /// Returns once both tasks have released their halves.
    pub async fn run<R, S, K>(self, raw: R, source: S, sink: K) -> RelayOutcome
    where
        R: AsyncRead + AsyncWrite + Send + 'static,
        S: FrameSource + 'static,
        K: FrameSink + 'static,
    {
        let (raw_read, raw_write) = tokio::io::split(raw);
        let (done_tx, mut done_rx) = mpsc::channel::<Direction>(2);
        let (cancel_tx, _) = broadcast::channel::<()>(1);

        let upstream = tokio::spawn(client_to_resource(
            self.session_id.clone(),
            source,
            raw_write,
            cancel_tx.subscribe(),
            done_tx.clone(),
            self.teardown.clone(),
        ));
        let downstream = tokio::spawn(resource_to_client(
            self.session_id.clone(),
            raw_read,
            sink,
            cancel_tx.subscribe(),
            done_tx,
            self.teardown.clone(),
        ));

        let first_finished = done_rx
            .recv()
            .await
            .unwrap_or(Direction::ClientToResource);
        let _ = cancel_tx.send(());

        let bytes_to_resource = upstream.await.unwrap_or(0);
        let bytes_to_client = downstream.await.unwrap_or(0);

        info!(
            session_id = %self.session_id,
            ?first_finished,
            bytes_to_resource,
            bytes_to_client,
            "relay ended"
        );

        RelayOutcome {
            first_finished,
            bytes_to_resource,
            bytes_to_client,
        }
    }
}

/// Client frames → raw stream. Returns the number of bytes written.
async fn client_to_resource<S, W>(
    session_id: SessionId,
    mut source: S,
    mut raw_write: WriteHalf<W>,
    mut cancel: broadcast::Receiver<()>,
    done: mpsc::Sender<Direction>,
    teardown: Arc<TeardownCoordinator>,
) -> u64
where
    S: FrameSource,
    W: AsyncRead + AsyncWrite,
{
    let mut total = 0u64;

    loop {
        let frame = tokio::select! {
            _ = cancel.recv() => break,
            frame = source.recv() => frame,
        };

        match frame {
            Ok(Some(Frame::Binary(data))) => {
                let written = tokio::select! {
                    _ = cancel.recv() => break,
                    result = raw_write.write_all(&data) => result,
                };
                if let Err(e) = written {
                    debug!(session_id = %session_id, error = %e, "raw write failed");
                    break;
                }
                total += data.len() as u64;
            }
            Ok(Some(_)) => continue,
            Ok(None) => {
                debug!(session_id = %session_id, "client closed stream");
                break;
            }
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "client read failed");
                break;
            }
        }
    }

    let _ = raw_write.shutdown().await;
    let _ = done.send(Direction::ClientToResource).await;
    teardown.trigger();
    total
}

/// Raw stream → client frames. Returns the number of bytes sent.
async fn resource_to_client<R, K>(
    session_id: SessionId,
    mut raw_read: ReadHalf<R>,
    mut sink: K,
    mut cancel: broadcast::Receiver<()>,
    done: mpsc::Sender<Direction>,
    teardown: Arc<TeardownCoordinator>,
) -> u64
where
    R: AsyncRead + AsyncWrite,
    K: FrameSink,
{
    let mut total = 0u64;
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            _ = cancel.recv() => break,
            read = raw_read.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                debug!(session_id = %session_id, "resource closed connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "raw read failed");
                break;
            }
        };

        let sent = tokio::select! {
            _ = cancel.recv() => break,
            result = sink.send_binary(buf[..n].to_vec()) => result,
        };
        if let Err(e) = sent {
            debug!(session_id = %session_id, error = %e, "client send failed");
            break;
        }
        total += n as u64;
    }

    let _ = sink.close().await;
    let _ = done.send(Direction::ResourceToClient).await;
    teardown.trigger();
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use vmgate_core::{FakeRuntime, ResourceName, VmError, VmResult};

    struct ChannelSource(mpsc::Receiver<Frame>);

    impl FrameSource for ChannelSource {
        fn recv(&mut self) -> BoxFuture<'_, VmResult<Option<Frame>>> {
            Box::pin(async move { Ok(self.0.recv().await) })
        }
    }

    struct ChannelSink {
        tx: Option<mpsc::Sender<Vec<u8>>>,
        closed: Arc<AtomicBool>,
    }

    impl FrameSink for ChannelSink {
        fn send_binary(&mut self, data: Vec<u8>) -> BoxFuture<'_, VmResult<()>> {
            Box::pin(async move {
                match &self.tx {
                    Some(tx) => tx
                        .send(data)
                        .await
                        .map_err(|_| VmError::Transport("client gone".to_string())),
                    None => Err(VmError::Transport("closed".to_string())),
                }
            })
        }

        fn close(&mut self) -> BoxFuture<'_, VmResult<()>> {
            Box::pin(async move {
                self.closed.store(true, Ordering::SeqCst);
                self.tx = None;
                Ok(())
            })
        }
    }

    struct Harness {
        rt: FakeRuntime,
        name: ResourceName,
        client_tx: mpsc::Sender<Frame>,
        client_rx: mpsc::Receiver<Vec<u8>>,
        sink_closed: Arc<AtomicBool>,
        resource: DuplexStream,
        relay: tokio::task::JoinHandle<RelayOutcome>,
    }

    fn start() -> Harness {
        let rt = FakeRuntime::new();
        let id = SessionId::parse("relay1").unwrap();
        let name = id.resource_name();
        rt.insert(&name, None);

        let teardown = Arc::new(TeardownCoordinator::new(Arc::new(rt.clone()), id.clone()));
        let (relay_end, resource) = tokio::io::duplex(64 * 1024);
        let (client_tx, frames_rx) = mpsc::channel(16);
        let (frames_tx, client_rx) = mpsc::channel(16);
        let sink_closed = Arc::new(AtomicBool::new(false));
        let source = ChannelSource(frames_rx);
        let sink = ChannelSink {
            tx: Some(frames_tx),
            closed: sink_closed.clone(),
        };

        let relay = tokio::spawn(StreamRelay::new(id, teardown).run(relay_end, source, sink));
        Harness {
            rt,
            name,
            client_tx,
            client_rx,
            sink_closed,
            resource,
            relay,
        }
    }

    async fn wait_for_destroy(rt: &FakeRuntime, name: &ResourceName) {
        for _ in 0..200 {
            if rt.destroy_count(name) > 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_raw_bytes_become_one_binary_frame() {
        let mut h = start();
        h.resource.write_all(&[0x01, 0x02, 0x03]).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(1), h.client_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(frame, vec![0x01, 0x02, 0x03]);

        drop(h.client_tx);
        h.relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_binary_frames_written_verbatim_text_dropped() {
        let mut h = start();
        h.client_tx.send(Frame::Text("hello".to_string())).await.unwrap();
        h.client_tx.send(Frame::Control).await.unwrap();
        h.client_tx.send(Frame::Binary(vec![0xAA, 0xBB])).await.unwrap();
        drop(h.client_tx);

        let mut received = Vec::new();
        tokio::time::timeout(Duration::from_secs(1), h.resource.read_to_end(&mut received))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, vec![0xAA, 0xBB]);

        let outcome = h.relay.await.unwrap();
        assert_eq!(outcome.bytes_to_resource, 2);
        assert_eq!(outcome.first_finished, Direction::ClientToResource);
    }

    #[tokio::test]
    async fn test_text_only_writes_nothing() {
        let mut h = start();
        h.client_tx.send(Frame::Text("ignored".to_string())).await.unwrap();
        drop(h.client_tx);

        let mut received = Vec::new();
        h.resource.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        assert_eq!(h.relay.await.unwrap().bytes_to_resource, 0);
    }

    #[tokio::test]
    async fn test_large_reads_split_at_buffer_size() {
        let mut h = start();
        let payload: Vec<u8> = (0..(RELAY_BUFFER_SIZE * 2 + 100))
            .map(|i| (i % 251) as u8)
            .collect();
        h.resource.write_all(&payload).await.unwrap();

        let mut collected = Vec::new();
        while collected.len() < payload.len() {
            let frame = tokio::time::timeout(Duration::from_secs(1), h.client_rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(frame.len() <= RELAY_BUFFER_SIZE);
            collected.extend(frame);
        }
        assert_eq!(collected, payload);

        drop(h.client_tx);
        h.relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_ends_relay_and_tears_down() {
        let mut h = start();
        drop(h.client_tx);

        let outcome = tokio::time::timeout(Duration::from_secs(1), h.relay)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.first_finished, Direction::ClientToResource);
        assert!(h.sink_closed.load(Ordering::SeqCst));

        let mut rest = Vec::new();
        assert_eq!(h.resource.read_to_end(&mut rest).await.unwrap(), 0);

        wait_for_destroy(&h.rt, &h.name).await;
        assert_eq!(h.rt.destroy_count(&h.name), 1);
    }

    #[tokio::test]
    async fn test_resource_close_ends_relay_and_tears_down() {
        let h = start();
        drop(h.resource);

        let outcome = tokio::time::timeout(Duration::from_secs(1), h.relay)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.first_finished, Direction::ResourceToClient);
        assert!(h.sink_closed.load(Ordering::SeqCst));

        wait_for_destroy(&h.rt, &h.name).await;
        assert_eq!(h.rt.destroy_count(&h.name), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_close_tears_down_once() {
        let h = start();
        drop(h.client_tx);
        drop(h.resource);

        tokio::time::timeout(Duration::from_secs(1), h.relay)
            .await
            .unwrap()
            .unwrap();
        wait_for_destroy(&h.rt, &h.name).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.rt.destroy_count(&h.name), 1);
        assert!(!h.rt.exists(&h.name));
    }
}

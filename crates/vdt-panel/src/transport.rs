//! Transport connectors hand the session a live channel per generation.

use std::path::PathBuf;
use std::sync::atomic::AtomicU64;
#[cfg(unix)]
use std::sync::atomic::Ordering;
use std::sync::Arc;
#[cfg(unix)]
use std::time::Duration;

#[cfg(unix)]
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
#[cfg(unix)]
use vdt_core::bridge_ipc::{Envelope, EnvelopeReader, EventName, DEFAULT_MAX_FRAME_BYTES};

use crate::bridge::Generation;
use crate::session::SessionInput;

const INITIAL_RELOAD_DELAY_MS: u64 = 1_000;
const MAX_RELOAD_DELAY_MS: u64 = 10_000;

/// Host-supplied link factory. `connect` is called once per generation and
/// must eventually report through the link, or never.
pub trait TransportConnector {
    fn connect(&mut self, link: ConnectLink);
}

/// What a connector reports back into the session inbox. Everything it
/// sends is stamped with the generation it was created for.
#[derive(Debug, Clone)]
pub struct ConnectLink {
    generation: Generation,
    inbox: mpsc::UnboundedSender<SessionInput>,
}

impl ConnectLink {
    pub fn new(generation: Generation, inbox: mpsc::UnboundedSender<SessionInput>) -> Self {
        Self { generation, inbox }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Returns false once the session is gone.
    pub fn connected(&self, outbound: mpsc::UnboundedSender<Envelope>) -> bool {
        self.inbox
            .send(SessionInput::Connected {
                generation: self.generation,
                outbound,
            })
            .is_ok()
    }

    pub fn deliver(&self, envelope: Envelope) -> bool {
        self.inbox
            .send(SessionInput::Delivery {
                generation: self.generation,
                envelope,
            })
            .is_ok()
    }

    /// The target's execution context was torn down and replaced.
    pub fn reload(&self) -> bool {
        self.inbox
            .send(SessionInput::Reload {
                generation: Some(self.generation),
            })
            .is_ok()
    }
}

/// Forwards each link to whoever owns the other end of the channel.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    links: mpsc::UnboundedSender<ConnectLink>,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ConnectLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        (Self { links }, rx)
    }
}

impl TransportConnector for MemoryConnector {
    fn connect(&mut self, link: ConnectLink) {
        let generation = link.generation();
        if self.links.send(link).is_err() {
            debug!(event = "memory_connector_closed", generation);
        }
    }
}

/// Connects to a target agent listening on a Unix socket and speaks
/// newline-delimited [`Envelope`] frames.
#[derive(Debug, Clone)]
pub struct UdsConnector {
    socket_path: PathBuf,
    max_frame_bytes: usize,
    reload_delay_ms: Arc<AtomicU64>,
}

impl UdsConnector {
    pub fn new(socket_path: PathBuf, max_frame_bytes: usize) -> Self {
        Self {
            socket_path,
            max_frame_bytes: if max_frame_bytes == 0 {
                DEFAULT_MAX_FRAME_BYTES
            } else {
                max_frame_bytes
            },
            reload_delay_ms: Arc::new(AtomicU64::new(INITIAL_RELOAD_DELAY_MS)),
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }
}

impl TransportConnector for UdsConnector {
    fn connect(&mut self, link: ConnectLink) {
        let connector = self.clone();
        tokio::spawn(async move {
            run_link(connector, link).await;
        });
    }
}

#[cfg(not(unix))]
async fn run_link(connector: UdsConnector, link: ConnectLink) {
    warn!(
        event = "bridge_connect_error",
        generation = link.generation(),
        socket = %connector.socket_path.display(),
        error = "unix sockets unavailable on this platform"
    );
    fail_link(&link);
}

#[cfg(unix)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkEnd {
    PeerClosed,
    Failed,
    Released,
}

#[cfg(unix)]
async fn run_link(connector: UdsConnector, link: ConnectLink) {
    let generation = link.generation();
    let stream = match UnixStream::connect(&connector.socket_path).await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(
                event = "bridge_connect_error",
                generation,
                socket = %connector.socket_path.display(),
                error = %err
            );
            fail_link(&link);
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    if !link.connected(outbound_tx) {
        return;
    }
    connector
        .reload_delay_ms
        .store(INITIAL_RELOAD_DELAY_MS, Ordering::Relaxed);
    info!(
        event = "bridge_connected",
        generation,
        socket = %connector.socket_path.display()
    );

    let (reader_half, mut writer_half) = stream.into_split();
    let mut reader = BufReader::new(reader_half);
    let mut envelopes = EnvelopeReader::new(connector.max_frame_bytes);
    let mut read_buf = [0u8; 8192];

    let end = loop {
        tokio::select! {
            read = reader.read(&mut read_buf) => {
                let read = match read {
                    Ok(0) => break LinkEnd::PeerClosed,
                    Ok(read) => read,
                    Err(err) => {
                        warn!(event = "bridge_read_error", generation, error = %err);
                        break LinkEnd::Failed;
                    }
                };
                let inbound = envelopes.feed(&read_buf[..read]);
                for err in inbound.errors {
                    warn!(event = "bridge_decode_error", generation, error = %err);
                }
                if !deliver_all(&link, inbound.envelopes) {
                    break LinkEnd::Released;
                }
            }
            maybe_envelope = outbound_rx.recv() => {
                let Some(envelope) = maybe_envelope else {
                    break LinkEnd::Released;
                };
                let frame = match envelope.to_line(connector.max_frame_bytes) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(event = "bridge_encode_error", generation, name = %envelope.event, error = %err);
                        continue;
                    }
                };
                if let Err(err) = write_frame(&mut writer_half, &frame).await {
                    warn!(event = "bridge_write_error", generation, error = %err);
                    break LinkEnd::Failed;
                }
            }
        }
    };

    if end == LinkEnd::Released {
        debug!(event = "bridge_released", generation);
        return;
    }

    let rest = envelopes.finish();
    for err in rest.errors {
        warn!(event = "bridge_decode_error", generation, error = %err);
    }
    deliver_all(&link, rest.envelopes);

    let delay_ms = connector.reload_delay_ms.load(Ordering::Relaxed);
    connector
        .reload_delay_ms
        .store(next_reload_delay(delay_ms), Ordering::Relaxed);
    info!(event = "bridge_target_gone", generation, reason = ?end, delay_ms);
    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    link.reload();
}

/// Hands the session a bridge whose outbound side is already closed, so
/// the failure reaches its once-listeners and later sends are dropped.
fn fail_link(link: &ConnectLink) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    drop(outbound_rx);
    if link.connected(outbound_tx) {
        link.deliver(Envelope::bare(EventName::ProxyFail));
    }
}

#[cfg(unix)]
fn deliver_all(link: &ConnectLink, frames: Vec<Envelope>) -> bool {
    frames.into_iter().all(|envelope| link.deliver(envelope))
}

#[cfg(unix)]
async fn write_frame(
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    frame: &[u8],
) -> std::io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(unix)]
fn next_reload_delay(current_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(MAX_RELOAD_DELAY_MS)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::UnixListener;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn next_input(rx: &mut mpsc::UnboundedReceiver<SessionInput>) -> SessionInput {
        timeout(TEST_TIMEOUT, rx.recv())
            .await
            .expect("session input timed out")
            .expect("session inbox open")
    }

    #[test]
    fn reload_delay_doubles_up_to_cap() {
        assert_eq!(next_reload_delay(1_000), 2_000);
        assert_eq!(next_reload_delay(8_000), MAX_RELOAD_DELAY_MS);
        assert_eq!(next_reload_delay(MAX_RELOAD_DELAY_MS), MAX_RELOAD_DELAY_MS);
    }

    #[test]
    fn memory_connector_forwards_links() {
        let (mut connector, mut links) = MemoryConnector::new();
        let (inbox, _rx) = mpsc::unbounded_channel();
        connector.connect(ConnectLink::new(7, inbox));
        assert_eq!(links.try_recv().expect("link").generation(), 7);
    }

    #[tokio::test]
    async fn missing_socket_surfaces_as_proxy_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut connector = UdsConnector::new(dir.path().join("absent.sock"), 0);
        let (inbox, mut rx) = mpsc::unbounded_channel();

        connector.connect(ConnectLink::new(3, inbox));

        match next_input(&mut rx).await {
            SessionInput::Connected {
                generation,
                outbound,
            } => {
                assert_eq!(generation, 3);
                assert!(outbound.is_closed());
            }
            other => panic!("unexpected input: {other:?}"),
        }
        match next_input(&mut rx).await {
            SessionInput::Delivery {
                generation,
                envelope,
            } => {
                assert_eq!(generation, 3);
                assert_eq!(envelope.name(), Some(EventName::ProxyFail));
            }
            other => panic!("unexpected input: {other:?}"),
        }
    }

    #[tokio::test]
    async fn frames_flow_both_ways_over_the_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind");
        let mut connector = UdsConnector::new(socket_path, DEFAULT_MAX_FRAME_BYTES);
        let (inbox, mut rx) = mpsc::unbounded_channel();

        connector.connect(ConnectLink::new(1, inbox));
        let (stream, _addr) = timeout(TEST_TIMEOUT, listener.accept())
            .await
            .expect("accept timed out")
            .expect("accept");
        let (target_read, mut target_write) = stream.into_split();

        let outbound = match next_input(&mut rx).await {
            SessionInput::Connected {
                generation,
                outbound,
            } => {
                assert_eq!(generation, 1);
                outbound
            }
            other => panic!("unexpected input: {other:?}"),
        };

        target_write
            .write_all(b"{\"event\":\"ready\",\"payload\":\"2.6.11\"}\n")
            .await
            .expect("target write");
        match next_input(&mut rx).await {
            SessionInput::Delivery { envelope, .. } => {
                assert_eq!(envelope.name(), Some(EventName::Ready));
                assert_eq!(envelope.payload, json!("2.6.11"));
            }
            other => panic!("unexpected input: {other:?}"),
        }

        outbound
            .send(Envelope::new(EventName::VuexToggleRecording, json!(true)))
            .expect("queue outbound");
        let mut lines = tokio::io::BufReader::new(target_read).lines();
        let line = timeout(TEST_TIMEOUT, lines.next_line())
            .await
            .expect("target read timed out")
            .expect("target read")
            .expect("line");
        let received =
            Envelope::from_line(line.as_bytes(), DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(received.name(), Some(EventName::VuexToggleRecording));
        assert_eq!(received.payload, json!(true));
    }

    #[tokio::test]
    async fn peer_close_signals_reload() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket_path).expect("bind");
        let mut connector = UdsConnector::new(socket_path, DEFAULT_MAX_FRAME_BYTES);
        let (inbox, mut rx) = mpsc::unbounded_channel();

        connector.connect(ConnectLink::new(5, inbox));
        let (stream, _addr) = listener.accept().await.expect("accept");
        let _outbound = match next_input(&mut rx).await {
            SessionInput::Connected { outbound, .. } => outbound,
            other => panic!("unexpected input: {other:?}"),
        };
        drop(stream);

        assert!(matches!(
            next_input(&mut rx).await,
            SessionInput::Reload {
                generation: Some(5)
            }
        ));
    }
}

//! The single long-lived connection to the engine.
//!
//! A [`Session`] owns at most one connection at a time. Each connection is
//! driven by two tasks: a writer that drains the outbound queue and a reader
//! that hands every inbound frame to an [`InboundHandler`]. Connections are
//! numbered by an increasing epoch; a drop is reported exactly once per
//! epoch, and only while that epoch is still the current one.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use hexgate_common::transport::{self, FrameReader, FrameWriter, JsonCodec};
use hexgate_common::{GatewayError, InboundMessage, OutboundMessage, Result};
use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ReconnectConfig};

/// Connectivity of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Receives everything the engine sends.
///
/// Methods are called from the connection's reader task and must not block.
pub trait InboundHandler: Send + Sync + 'static {
    /// A connection with this epoch is about to start delivering frames.
    fn on_connected(&self, epoch: u64);

    /// One decoded frame. Replies go back through `link`.
    fn on_message(&self, message: InboundMessage, link: &Link);

    /// The connection with this epoch is gone.
    fn on_disconnected(&self, epoch: u64, reason: &str);
}

/// Sending side of one connection.
#[derive(Debug, Clone)]
pub struct Link {
    epoch: u64,
    outbound: mpsc::Sender<OutboundMessage>,
}

impl Link {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Queues a frame for the writer task.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::ConnectionLost`] if the connection has closed.
    pub async fn send(&self, message: OutboundMessage) -> Result<()> {
        self.outbound.send(message).await.map_err(|_| {
            GatewayError::ConnectionLost(format!("connection {} is closed", self.epoch))
        })
    }
}

struct Connection {
    link: Link,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    addr: String,
    connect_timeout: Duration,
    outbound_buffer: usize,
    write_timeout: Duration,
    handler: Arc<dyn InboundHandler>,
    state: watch::Sender<SessionState>,
    current: Mutex<Option<Connection>>,
    last_error: Mutex<Option<String>>,
    epochs: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of the engine connection.
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(config: &ClientConfig, handler: Arc<dyn InboundHandler>) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                addr: config.engine_addr.clone(),
                connect_timeout: config.connect_timeout,
                outbound_buffer: config.outbound_buffer,
                write_timeout: config.write_timeout,
                handler,
                state,
                current: Mutex::new(None),
                last_error: Mutex::new(None),
                epochs: AtomicU64::new(0),
                supervisor: Mutex::new(None),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Establishes the connection.
    ///
    /// A no-op when already connected. While another attempt is in flight
    /// this waits for that attempt and returns its outcome instead of
    /// dialing a second time.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Connection`] if the engine is unreachable.
    pub async fn connect(&self) -> Result<()> {
        self.inner.connect().await
    }

    /// Closes the connection on the host's initiative.
    ///
    /// The state becomes `Disconnected`, which the reconnect supervisor
    /// leaves alone. Outstanding executions resolve with `ConnectionLost`.
    pub fn disconnect(&self) {
        self.inner.close(SessionState::Disconnected, "session closed by host");
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// A receiver observing every state transition.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// The live connection, if connected.
    pub fn link(&self) -> Option<Link> {
        lock(&self.inner.current).as_ref().map(|c| c.link.clone())
    }

    /// Message of the most recent failed connection attempt.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    /// Starts the background task that reconnects after failures.
    ///
    /// Replaces a previously started supervisor. Does nothing when
    /// reconnection is disabled.
    pub fn supervise(&self, config: ReconnectConfig) {
        if !config.enabled {
            debug!("Reconnection disabled");
            return;
        }
        let task = tokio::spawn(supervise(
            Arc::downgrade(&self.inner),
            self.inner.state.subscribe(),
            config,
        ));
        if let Some(previous) = lock(&self.inner.supervisor).replace(task) {
            previous.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.inner.supervisor).take() {
            task.abort();
        }
        self.inner.close(SessionState::Disconnected, "session dropped");
    }
}

impl Inner {
    async fn connect(self: &Arc<Self>) -> Result<()> {
        let mut observed = SessionState::Disconnected;
        let mut claimed = false;
        self.state.send_if_modified(|state| {
            observed = *state;
            match state {
                SessionState::Connected | SessionState::Connecting => false,
                _ => {
                    *state = SessionState::Connecting;
                    claimed = true;
                    true
                }
            }
        });

        if claimed {
            return self.establish().await;
        }
        if observed == SessionState::Connected {
            return Ok(());
        }

        let mut rx = self.state.subscribe();
        let outcome = rx
            .wait_for(|state| *state != SessionState::Connecting)
            .await
            .map(|state| *state);
        match outcome {
            Ok(SessionState::Connected) => Ok(()),
            Ok(other) => Err(GatewayError::Connection(
                lock(&self.last_error)
                    .clone()
                    .unwrap_or_else(|| format!("connection attempt to {} ended {}", self.addr, other)),
            )),
            Err(_) => Err(GatewayError::Connection("session closed".to_string())),
        }
    }

    async fn establish(self: &Arc<Self>) -> Result<()> {
        debug!(addr = %self.addr, "Connecting to engine");

        let stream = match transport::connect(&self.addr, self.connect_timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                let message = match &e {
                    GatewayError::Connection(detail) => detail.clone(),
                    other => other.to_string(),
                };
                *lock(&self.last_error) = Some(message.clone());
                self.state.send_if_modified(|state| {
                    if *state == SessionState::Connecting {
                        *state = SessionState::Failed;
                        true
                    } else {
                        false
                    }
                });
                warn!(addr = %self.addr, error = %message, "Failed to connect to engine");
                return Err(GatewayError::Connection(message));
            }
        };

        let epoch = self.epochs.fetch_add(1, Ordering::SeqCst) + 1;
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(self.outbound_buffer);
        let link = Link { epoch, outbound: tx };

        // Holding the slot while spawning keeps a fast drop from racing the
        // installation of this connection.
        let mut current = lock(&self.current);
        if *self.state.borrow() != SessionState::Connecting {
            return Err(GatewayError::Connection(format!(
                "connection attempt to {} was cancelled",
                self.addr
            )));
        }

        self.handler.on_connected(epoch);
        let tasks = vec![
            tokio::spawn(write_loop(
                Arc::downgrade(self),
                FrameWriter::new(write_half),
                rx,
                epoch,
                self.write_timeout,
            )),
            tokio::spawn(read_loop(Arc::downgrade(self), FrameReader::new(read_half), link.clone())),
        ];
        *current = Some(Connection { link, tasks });
        *lock(&self.last_error) = None;
        self.state.send_replace(SessionState::Connected);
        drop(current);

        info!(addr = %self.addr, epoch, "Connected to engine");
        Ok(())
    }

    /// Tears down the live connection, if any, and moves to `next`.
    fn close(&self, next: SessionState, reason: &str) {
        let connection = lock(&self.current).take();
        self.state.send_replace(next);

        if let Some(connection) = connection {
            for task in &connection.tasks {
                task.abort();
            }
            info!(epoch = connection.link.epoch, reason, "Engine session closed");
            self.handler.on_disconnected(connection.link.epoch, reason);
        }
    }

    /// Called by the connection tasks when their connection fails.
    fn connection_lost(&self, epoch: u64, reason: &str) {
        let connection = {
            let mut current = lock(&self.current);
            match current.as_ref() {
                Some(c) if c.link.epoch == epoch => current.take(),
                _ => None,
            }
        };
        let Some(connection) = connection else {
            debug!(epoch, reason, "Ignoring drop of a stale connection");
            return;
        };

        self.state.send_if_modified(|state| {
            if *state == SessionState::Connected {
                *state = SessionState::Failed;
                true
            } else {
                false
            }
        });
        for task in &connection.tasks {
            task.abort();
        }

        warn!(addr = %self.addr, epoch, reason, "Engine connection lost");
        self.handler.on_disconnected(epoch, reason);
    }
}

async fn write_loop(
    session: Weak<Inner>,
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    epoch: u64,
    write_timeout: Duration,
) {
    while let Some(message) = outbound.recv().await {
        let frame = match JsonCodec::encode_outbound(&message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(epoch, error = %e, "Dropping unencodable outbound frame");
                continue;
            }
        };
        // A stalled write counts as a lost connection.
        let reason = match tokio::time::timeout(write_timeout, writer.write_frame(&frame)).await {
            Ok(Ok(())) => continue,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "engine stopped reading (write stalled for {}ms)",
                write_timeout.as_millis()
            ),
        };
        if let Some(session) = session.upgrade() {
            session.connection_lost(epoch, &reason);
        }
        return;
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(session: Weak<Inner>, mut reader: FrameReader<OwnedReadHalf>, link: Link) {
    let reason = loop {
        match reader.read_frame().await {
            Ok(Some(frame)) => {
                let Some(session) = session.upgrade() else {
                    return;
                };
                match JsonCodec::decode_inbound(&frame) {
                    Ok(message) => session.handler.on_message(message, &link),
                    Err(e) => warn!(epoch = link.epoch, error = %e, "Discarding undecodable engine frame"),
                }
            }
            Ok(None) => break "engine closed the connection".to_string(),
            Err(e) => break e.to_string(),
        }
    };

    if let Some(session) = session.upgrade() {
        session.connection_lost(link.epoch, &reason);
    }
}

/// Reconnects with exponential backoff whenever the session enters `Failed`.
async fn supervise(
    session: Weak<Inner>,
    mut state: watch::Receiver<SessionState>,
    config: ReconnectConfig,
) {
    loop {
        if state.wait_for(|s| *s == SessionState::Failed).await.is_err() {
            return;
        }

        let mut attempt = 0u32;
        loop {
            if config.max_attempts.is_some_and(|max| attempt >= max) {
                warn!(attempts = attempt, "Giving up reconnecting to engine");
                // Resume once something else moves the session out of Failed.
                if state.wait_for(|s| *s != SessionState::Failed).await.is_err() {
                    return;
                }
                break;
            }

            let delay = config.backoff_for(attempt);
            info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Reconnecting to engine");
            tokio::time::sleep(delay).await;

            let Some(inner) = session.upgrade() else {
                return;
            };
            if *inner.state.borrow() != SessionState::Failed {
                break;
            }
            match inner.connect().await {
                Ok(()) => {
                    info!(attempt = attempt + 1, "Reconnected to engine");
                    break;
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Reconnect attempt failed");
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexgate_common::testing::MockEngine;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl InboundHandler for Recorder {
        fn on_connected(&self, epoch: u64) {
            self.events.lock().unwrap().push(format!("connected {}", epoch));
        }

        fn on_message(&self, _message: InboundMessage, _link: &Link) {
            self.events.lock().unwrap().push("message".to_string());
        }

        fn on_disconnected(&self, epoch: u64, _reason: &str) {
            self.events.lock().unwrap().push(format!("disconnected {}", epoch));
        }
    }

    fn session_for(addr: &str, recorder: Arc<Recorder>) -> Session {
        let config = ClientConfig::new(addr).with_connect_timeout(Duration::from_secs(2));
        Session::new(&config, recorder)
    }

    async fn wait_for_state(session: &Session, wanted: SessionState) {
        let mut rx = session.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == wanted))
            .await
            .expect("state transition timed out")
            .unwrap();
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let session = session_for("127.0.0.1:1", Arc::new(Recorder::default()));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.link().is_none());
    }

    #[tokio::test]
    async fn test_connect_and_idempotent() {
        let engine = MockEngine::start().await;
        let recorder = Arc::new(Recorder::default());
        let session = session_for(&engine.addr(), recorder.clone());

        session.connect().await.unwrap();
        session.connect().await.unwrap();

        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.link().unwrap().epoch(), 1);
        engine.wait_for_connections(1, Duration::from_secs(2)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.connection_count(), 1);
        assert_eq!(recorder.events(), vec!["connected 1"]);
    }

    #[tokio::test]
    async fn test_concurrent_connects_share_one_attempt() {
        let engine = MockEngine::start().await;
        let session = Arc::new(session_for(&engine.addr(), Arc::new(Recorder::default())));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.connect().await })
            })
            .collect();
        for attempt in attempts {
            attempt.await.unwrap().unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_engine_fails() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let session = session_for(&addr, Arc::new(Recorder::default()));
        let err = session.connect().await.unwrap_err();

        assert!(matches!(err, GatewayError::Connection(_)), "got {:?}", err);
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.last_error().is_some());
    }

    #[tokio::test]
    async fn test_engine_drop_marks_failed_once() {
        let engine = MockEngine::start().await;
        let recorder = Arc::new(Recorder::default());
        let session = session_for(&engine.addr(), recorder.clone());
        session.connect().await.unwrap();
        engine.wait_for_connections(1, Duration::from_secs(2)).await;

        engine.drop_connection();
        wait_for_state(&session, SessionState::Failed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(session.link().is_none());
        assert_eq!(recorder.events(), vec!["connected 1", "disconnected 1"]);
    }

    #[tokio::test]
    async fn test_disconnect_is_not_failure() {
        let engine = MockEngine::start().await;
        let recorder = Arc::new(Recorder::default());
        let session = session_for(&engine.addr(), recorder.clone());
        session.connect().await.unwrap();

        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(recorder.events(), vec!["connected 1", "disconnected 1"]);

        session.connect().await.unwrap();
        assert_eq!(session.link().unwrap().epoch(), 2);
    }

    #[tokio::test]
    async fn test_inbound_frames_reach_handler() {
        let engine = MockEngine::start().await;
        let recorder = Arc::new(Recorder::default());
        let session = session_for(&engine.addr(), recorder.clone());
        session.connect().await.unwrap();
        engine.wait_for_connections(1, Duration::from_secs(2)).await;

        engine.respond(hexgate_common::EngineResponse::success(1, serde_json::json!(1)));
        // Undecodable frames are skipped without dropping the connection.
        engine.send_raw(b"not json".to_vec());
        engine.respond(hexgate_common::EngineResponse::success(2, serde_json::json!(2)));

        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.events().iter().filter(|e| *e == "message").count() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn test_supervisor_reconnects() {
        let engine = MockEngine::start().await;
        let session = session_for(&engine.addr(), Arc::new(Recorder::default()));
        session.supervise(ReconnectConfig {
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            ..ReconnectConfig::default()
        });
        session.connect().await.unwrap();
        engine.wait_for_connections(1, Duration::from_secs(2)).await;

        engine.drop_connection();
        engine.wait_for_connections(2, Duration::from_secs(5)).await;
        wait_for_state(&session, SessionState::Connected).await;
        assert_eq!(session.link().unwrap().epoch(), 2);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Connected.to_string(), "connected");
        assert_eq!(serde_json::to_value(SessionState::Failed).unwrap(), "failed");
    }
}

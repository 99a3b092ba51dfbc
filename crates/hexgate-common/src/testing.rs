//! Scripted engine for tests.
//!
//! [`MockEngine`] listens on a loopback port and speaks the framed session
//! protocol. Each execute request is passed to a responder closure that
//! decides how to answer, so a test can make the engine return values,
//! report script errors, hold requests, invoke host callbacks or drop the
//! connection.
//!
//! # Example
//!
//! ```no_run
//! use hexgate_common::testing::{MockEngine, Reply};
//! use serde_json::json;
//!
//! # async fn demo() {
//! let engine = MockEngine::start().await;
//! engine.set_responder(|req| Reply::Result(json!(req.code.len())));
//! // point a client at engine.addr() ...
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::protocol::{
    CallbackReply, CallbackRequest, EngineResponse, EngineValue, ExecuteRequest, InboundMessage,
    OutboundMessage,
};
use crate::transport::{FrameReader, FrameWriter, JsonCodec};

/// How the engine answers one execute request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `{"id", "result"}`
    Result(EngineValue),
    /// `{"id", "error"}`
    Error(String),
    /// Invoke the host callback `name` first; answer with its result, or
    /// with `callback failed: <error>` if the host rejected the call.
    Callback { name: String, args: Vec<EngineValue> },
    /// Record the request and never answer it.
    Hold,
    /// Close the connection instead of answering.
    Disconnect,
}

type Responder = Box<dyn Fn(&ExecuteRequest) -> Reply + Send + Sync>;

enum Command {
    Frame(Vec<u8>),
    Close,
}

struct Shared {
    responder: Mutex<Responder>,
    received: Mutex<Vec<ExecuteRequest>>,
    callback_replies: Mutex<Vec<CallbackReply>>,
    pending_calls: Mutex<HashMap<String, oneshot::Sender<CallbackReply>>>,
    current: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    connections: AtomicUsize,
    frames: AtomicUsize,
    next_call: AtomicU64,
    activity: Notify,
}

/// A loopback engine driven by a responder closure.
pub struct MockEngine {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockEngine {
    /// Starts an engine on a random loopback port that echoes the submitted
    /// code back as the result.
    pub async fn start() -> Self {
        Self::start_on("127.0.0.1:0").await
    }

    /// Starts an engine bound to `addr`.
    pub async fn start_on(addr: &str) -> Self {
        let listener = TcpListener::bind(addr).await.expect("bind mock engine");
        let addr = listener.local_addr().expect("mock engine local addr");

        let shared = Arc::new(Shared {
            responder: Mutex::new(Box::new(|req: &ExecuteRequest| {
                Reply::Result(EngineValue::String(req.code.clone()))
            })),
            received: Mutex::new(Vec::new()),
            callback_replies: Mutex::new(Vec::new()),
            pending_calls: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            connections: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
            next_call: AtomicU64::new(1),
            activity: Notify::new(),
        });

        let accept_shared = shared.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                let (read_half, write_half) = stream.into_split();

                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                let (close_tx, close_rx) = watch::channel(false);
                *accept_shared.current.lock().unwrap() = Some(cmd_tx.clone());

                tokio::spawn(write_loop(FrameWriter::new(write_half), cmd_rx, close_tx));
                tokio::spawn(read_loop(
                    FrameReader::new(read_half),
                    accept_shared.clone(),
                    cmd_tx,
                    close_rx,
                ));
                accept_shared.activity.notify_waiters();
            }
        });

        Self {
            addr,
            shared,
            accept_task,
        }
    }

    /// The `host:port` the engine listens on.
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Replaces the responder closure.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(&ExecuteRequest) -> Reply + Send + Sync + 'static,
    {
        *self.shared.responder.lock().unwrap() = Box::new(responder);
    }

    /// Number of connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Number of frames of any kind received from the gateway.
    pub fn frame_count(&self) -> usize {
        self.shared.frames.load(Ordering::SeqCst)
    }

    /// Execute requests received so far, in arrival order.
    pub fn received(&self) -> Vec<ExecuteRequest> {
        self.shared.received.lock().unwrap().clone()
    }

    /// Callback replies received so far, in arrival order.
    pub fn callback_replies(&self) -> Vec<CallbackReply> {
        self.shared.callback_replies.lock().unwrap().clone()
    }

    /// Waits until at least `count` execute requests have arrived.
    ///
    /// # Panics
    ///
    /// Panics if they do not arrive within `timeout`.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Vec<ExecuteRequest> {
        self.wait_until(timeout, || self.received().len() >= count)
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "expected {} execute requests, got {}",
                    count,
                    self.received().len()
                )
            });
        self.received()
    }

    /// Waits until at least `count` connections have been accepted.
    ///
    /// # Panics
    ///
    /// Panics if they are not accepted within `timeout`.
    pub async fn wait_for_connections(&self, count: usize, timeout: Duration) {
        self.wait_until(timeout, || self.connection_count() >= count)
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "expected {} connections, got {}",
                    count,
                    self.connection_count()
                )
            });
    }

    async fn wait_until<F: Fn() -> bool>(&self, timeout: Duration, done: F) -> Result<(), ()> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.shared.activity.notified();
                if done() {
                    return;
                }
                // Notify may be missed between the check and the await.
                let _ = tokio::time::timeout(Duration::from_millis(20), notified).await;
            }
        })
        .await
        .map_err(|_| ())
    }

    /// Sends a response frame on the current connection.
    pub fn respond(&self, response: EngineResponse) {
        self.send(&InboundMessage::Response(response));
    }

    /// Sends any inbound message on the current connection.
    pub fn send(&self, message: &InboundMessage) {
        let bytes = JsonCodec::encode_inbound(message).expect("encode inbound");
        self.send_raw(bytes);
    }

    /// Sends raw frame bytes on the current connection.
    pub fn send_raw(&self, bytes: Vec<u8>) {
        if let Some(tx) = self.shared.current.lock().unwrap().as_ref() {
            let _ = tx.send(Command::Frame(bytes));
        }
    }

    /// Invokes a host callback over the current connection and waits for the
    /// host's reply.
    pub async fn call(&self, name: &str, args: Vec<EngineValue>) -> CallbackReply {
        let tx = self
            .shared
            .current
            .lock()
            .unwrap()
            .clone()
            .expect("no gateway connected to the mock engine");
        invoke_callback(&self.shared, &tx, name, args)
            .await
            .expect("connection closed before the callback reply")
    }

    /// Closes the current connection; the listener keeps accepting.
    pub fn drop_connection(&self) {
        if let Some(tx) = self.shared.current.lock().unwrap().take() {
            let _ = tx.send(Command::Close);
        }
    }

    /// Stops accepting connections and closes the current one.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.drop_connection();
    }
}

impl Drop for MockEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn write_loop<W>(
    mut writer: FrameWriter<W>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    close_tx: watch::Sender<bool>,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(command) = commands.recv().await {
        match command {
            Command::Frame(bytes) => {
                if writer.write_frame(&bytes).await.is_err() {
                    break;
                }
            }
            Command::Close => break,
        }
    }
    let _ = writer.shutdown().await;
    let _ = close_tx.send(true);
}

async fn read_loop<R>(
    mut reader: FrameReader<R>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    mut close_rx: watch::Receiver<bool>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    loop {
        let frame = tokio::select! {
            frame = reader.read_frame() => frame,
            _ = close_rx.changed() => return,
        };
        let Ok(Some(frame)) = frame else {
            return;
        };
        shared.frames.fetch_add(1, Ordering::SeqCst);

        match JsonCodec::decode_outbound(&frame) {
            Ok(OutboundMessage::Execute(request)) => {
                shared.received.lock().unwrap().push(request.clone());
                let reply = (shared.responder.lock().unwrap())(&request);
                handle_reply(&shared, &commands, request.id, reply);
            }
            Ok(OutboundMessage::CallbackReply(reply)) => {
                shared.callback_replies.lock().unwrap().push(reply.clone());
                let key = reply.call_id().to_string();
                if let Some(waiter) = shared.pending_calls.lock().unwrap().remove(&key) {
                    let _ = waiter.send(reply);
                }
            }
            Err(_) => {}
        }
        shared.activity.notify_waiters();
    }
}

fn handle_reply(
    shared: &Arc<Shared>,
    commands: &mpsc::UnboundedSender<Command>,
    id: u64,
    reply: Reply,
) {
    let send = |response: EngineResponse| {
        if let Ok(bytes) = JsonCodec::encode_inbound(&InboundMessage::Response(response)) {
            let _ = commands.send(Command::Frame(bytes));
        }
    };

    match reply {
        Reply::Result(value) => send(EngineResponse::success(id, value)),
        Reply::Error(message) => send(EngineResponse::failure(id, message)),
        Reply::Hold => {}
        Reply::Disconnect => {
            let _ = commands.send(Command::Close);
        }
        Reply::Callback { name, args } => {
            let shared = shared.clone();
            let commands = commands.clone();
            tokio::spawn(async move {
                let response = match invoke_callback(&shared, &commands, &name, args).await {
                    Some(CallbackReply::Success { result, .. }) => EngineResponse::success(id, result),
                    Some(CallbackReply::Failure { error, .. }) => {
                        EngineResponse::failure(id, format!("callback failed: {}", error))
                    }
                    None => return,
                };
                if let Ok(bytes) = JsonCodec::encode_inbound(&InboundMessage::Response(response)) {
                    let _ = commands.send(Command::Frame(bytes));
                }
            });
        }
    }
}

async fn invoke_callback(
    shared: &Arc<Shared>,
    commands: &mpsc::UnboundedSender<Command>,
    name: &str,
    args: Vec<EngineValue>,
) -> Option<CallbackReply> {
    let call_id = format!("call-{}", shared.next_call.fetch_add(1, Ordering::SeqCst));
    let (tx, rx) = oneshot::channel();
    let key = EngineValue::String(call_id.clone()).to_string();
    shared.pending_calls.lock().unwrap().insert(key, tx);

    let request = InboundMessage::Callback(CallbackRequest {
        call: name.to_string(),
        args,
        call_id: EngineValue::String(call_id),
    });
    let bytes = JsonCodec::encode_inbound(&request).ok()?;
    commands.send(Command::Frame(bytes)).ok()?;

    rx.await.ok()
}

//! Correlated execution over the shared session.

use std::sync::Arc;
use std::time::Duration;

use hexgate_common::{
    CallbackReply, CallbackRequest, EngineValue, ExecuteRequest, ExecutionResult, GatewayError,
    InboundMessage, Result,
};
use tracing::{debug, error, warn};

use crate::config::ClientConfig;
use crate::pending::{PendingGuard, PendingTable};
use crate::registry::{CallbackError, CallbackRegistry};
use crate::session::{InboundHandler, Link, Session};

/// Issues execute requests and waits for their correlated responses.
///
/// Any number of executions may be outstanding at once; each waits on its
/// own slot in the [`PendingTable`], keyed by a correlation id that is never
/// reused.
pub struct Multiplexer {
    session: Arc<Session>,
    pending: Arc<PendingTable>,
    execute_timeout: Option<Duration>,
    max_pending: usize,
}

impl Multiplexer {
    pub fn new(session: Arc<Session>, pending: Arc<PendingTable>, config: &ClientConfig) -> Self {
        Self {
            session,
            pending,
            execute_timeout: config.execute_timeout,
            max_pending: config.max_pending,
        }
    }

    /// Runs `code` on the engine with the configured timeout.
    ///
    /// Connects first if the session is not connected. A script error comes
    /// back as `Ok(ExecutionResult::Failure(..))`; `Err` is reserved for
    /// failures of the gateway itself.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Connection`] if the session cannot be established
    /// - [`GatewayError::ConnectionLost`] if the session drops before the response
    /// - [`GatewayError::Timeout`] if no response arrives in time
    /// - [`GatewayError::TooManyPending`] if the pending limit is reached
    pub async fn execute(&self, code: impl Into<String>) -> Result<ExecutionResult> {
        self.execute_with_timeout(code, self.execute_timeout).await
    }

    /// Like [`execute`](Self::execute) with a per-call timeout; `None`
    /// waits indefinitely.
    pub async fn execute_with_timeout(
        &self,
        code: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let link = self.ensure_link().await?;

        let request = ExecuteRequest::new(code);
        let id = request.id;
        let slot = self.pending.insert(id, link.epoch(), self.max_pending)?;
        let _guard = PendingGuard::new(&self.pending, id);

        // One deadline covers queueing the request and waiting for the answer.
        let exchange = async {
            link.send(request.into()).await?;
            debug!(id, epoch = link.epoch(), "Execute request sent");
            slot.await.unwrap_or_else(|_| {
                Err(GatewayError::ConnectionLost(
                    "pending request was dropped".to_string(),
                ))
            })
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, exchange).await.unwrap_or_else(|_| {
                debug!(id, timeout_ms = limit.as_millis() as u64, "Execution timed out");
                Err(GatewayError::Timeout(limit.as_millis() as u64))
            }),
            None => exchange.await,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    async fn ensure_link(&self) -> Result<Link> {
        if let Some(link) = self.session.link() {
            return Ok(link);
        }
        self.session.connect().await?;
        self.session.link().ok_or_else(|| {
            GatewayError::Connection(format!(
                "engine session at {} is not connected",
                self.session.addr()
            ))
        })
    }
}

/// Routes inbound engine frames.
///
/// Responses resolve pending executions; callback requests run on the
/// blocking pool and reply over the connection they arrived on.
pub struct Dispatcher {
    pending: Arc<PendingTable>,
    registry: Arc<CallbackRegistry>,
}

impl Dispatcher {
    pub fn new(pending: Arc<PendingTable>, registry: Arc<CallbackRegistry>) -> Self {
        Self { pending, registry }
    }

    fn dispatch_callback(&self, request: CallbackRequest, link: Link) {
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let CallbackRequest { call, args, call_id } = request;
            debug!(callback = %call, epoch = link.epoch(), "Invoking callback");

            let name = call.clone();
            let outcome = tokio::task::spawn_blocking(move || registry.invoke(&name, args)).await;
            let reply = match outcome {
                Ok(Ok(value)) => CallbackReply::success(call_id, value),
                Ok(Err(e)) => {
                    if matches!(e, CallbackError::Panicked { .. }) {
                        error!(callback = %call, error = %e, "Callback panicked");
                    } else {
                        warn!(callback = %call, error = %e, "Callback failed");
                    }
                    CallbackReply::failure(call_id, e.to_string())
                }
                Err(e) => {
                    warn!(callback = %call, error = %e, "Callback task did not complete");
                    CallbackReply::failure(call_id, format!("callback '{}' did not complete: {}", call, e))
                }
            };

            if let Err(e) = link.send(reply.into()).await {
                debug!(callback = %call, error = %e, "Dropping callback reply");
            }
        });
    }

    fn dispatch_unrecognized(&self, raw: EngineValue, link: &Link) {
        if let Some(call_id) = raw.get("callId").filter(|id| !id.is_null()) {
            // A callId means the engine is waiting on a reply.
            warn!(frame = %raw, "Malformed callback request");
            let reply = CallbackReply::failure(
                call_id.clone(),
                format!("malformed callback request: {}", raw),
            );
            let link = link.clone();
            tokio::spawn(async move {
                if let Err(e) = link.send(reply.into()).await {
                    debug!(error = %e, "Dropping callback reply");
                }
            });
            return;
        }

        match raw.get("id").and_then(EngineValue::as_u64) {
            Some(id) => {
                warn!(id, frame = %raw, "Malformed engine response");
                let failure = ExecutionResult::Failure(format!("Malformed engine response: {}", raw));
                self.pending.resolve(id, Ok(failure));
            }
            None => warn!(frame = %raw, "Ignoring unrecognized engine frame"),
        }
    }
}

impl InboundHandler for Dispatcher {
    fn on_connected(&self, epoch: u64) {
        self.pending.open(epoch);
    }

    fn on_message(&self, message: InboundMessage, link: &Link) {
        match message {
            InboundMessage::Response(response) => {
                let id = response.id();
                if !self.pending.resolve(id, Ok(response.into_result())) {
                    debug!(id, "Discarding response with no pending request");
                }
            }
            InboundMessage::Callback(request) => self.dispatch_callback(request, link.clone()),
            InboundMessage::Unrecognized(raw) => self.dispatch_unrecognized(raw, link),
        }
    }

    fn on_disconnected(&self, epoch: u64, reason: &str) {
        let failed = self.pending.fail_all(epoch, reason);
        if failed > 0 {
            warn!(epoch, failed, reason, "Failed outstanding executions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::CallbackHandler;
    use hexgate_common::testing::{MockEngine, Reply};
    use serde_json::json;

    fn build(addr: &str, config: ClientConfig) -> (Multiplexer, Arc<CallbackRegistry>) {
        let config = ClientConfig {
            engine_addr: addr.to_string(),
            ..config
        };
        let pending = Arc::new(PendingTable::new());
        let registry = Arc::new(CallbackRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(pending.clone(), registry.clone()));
        let session = Arc::new(Session::new(&config, dispatcher));
        (Multiplexer::new(session, pending, &config), registry)
    }

    #[tokio::test]
    async fn test_execute_connects_on_demand() {
        let engine = MockEngine::start().await;
        engine.set_responder(|req| Reply::Result(json!(format!("ran {}", req.code))));
        let (mux, _) = build(&engine.addr(), ClientConfig::default());

        let result = mux.execute("1 + 1").await.unwrap();
        assert_eq!(result, ExecutionResult::Success(json!("ran 1 + 1")));
        assert_eq!(mux.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_script_error_is_failure_not_err() {
        let engine = MockEngine::start().await;
        engine.set_responder(|_| Reply::Error("ReferenceError: x is not defined".into()));
        let (mux, _) = build(&engine.addr(), ClientConfig::default());

        let result = mux.execute("x").await.unwrap();
        assert_eq!(
            result,
            ExecutionResult::Failure("ReferenceError: x is not defined".into())
        );
        assert_eq!(mux.session.state(), crate::SessionState::Connected);
    }

    #[tokio::test]
    async fn test_timeout_frees_slot_and_discards_late_response() {
        let engine = MockEngine::start().await;
        engine.set_responder(|_| Reply::Hold);
        let (mux, _) = build(&engine.addr(), ClientConfig::default());

        let err = mux
            .execute_with_timeout("slow()", Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout(50)));
        assert_eq!(err.to_string(), "Execution timed out after 50ms");
        assert_eq!(mux.pending_count(), 0);

        let id = engine.received()[0].id;
        engine.respond(hexgate_common::EngineResponse::success(id, json!("late")));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mux.session.state(), crate::SessionState::Connected);
    }

    #[tokio::test]
    async fn test_unrecognized_response_fails_its_request() {
        let engine = MockEngine::start().await;
        engine.set_responder(|_| Reply::Hold);
        let (mux, _) = build(&engine.addr(), ClientConfig::default());
        let mux = Arc::new(mux);

        let task = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.execute("queued()").await })
        };
        let id = engine.wait_for_requests(1, Duration::from_secs(2)).await[0].id;
        engine.send_raw(serde_json::to_vec(&json!({"id": id, "status": "queued"})).unwrap());

        match task.await.unwrap().unwrap() {
            ExecutionResult::Failure(message) => {
                assert!(message.starts_with("Malformed engine response"), "{}", message)
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_callback_request_gets_failure_reply() {
        let engine = MockEngine::start().await;
        let (mux, _) = build(&engine.addr(), ClientConfig::default());
        mux.session.connect().await.unwrap();
        engine.wait_for_connections(1, Duration::from_secs(2)).await;

        engine.send_raw(
            serde_json::to_vec(&json!({"call": "print", "args": "x", "callId": 3})).unwrap(),
        );

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let replies = loop {
            let replies = engine.callback_replies();
            if !replies.is_empty() || tokio::time::Instant::now() >= deadline {
                break replies;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        match replies.as_slice() {
            [CallbackReply::Failure { call_id, error }] => {
                assert_eq!(call_id, &json!(3));
                assert!(error.starts_with("malformed callback request"), "{}", error);
            }
            other => panic!("expected one failure reply, got {:?}", other),
        }
        assert_eq!(mux.session.state(), crate::SessionState::Connected);
    }

    #[tokio::test]
    async fn test_callback_reply_goes_back_to_engine() {
        let engine = MockEngine::start().await;
        engine.set_responder(|_| Reply::Callback {
            name: "double".into(),
            args: vec![json!(21)],
        });
        let (mux, registry) = build(&engine.addr(), ClientConfig::default());
        registry.register(
            "double",
            CallbackHandler::new(|args| Ok(args.first().and_then(|v| v.as_i64()).map(|n| json!(n * 2)))),
        );

        let result = mux.execute("double(21)").await.unwrap();
        assert_eq!(result, ExecutionResult::Success(json!(42)));
        assert_eq!(engine.callback_replies().len(), 1);
        assert!(engine.callback_replies()[0].is_success());
    }

    #[tokio::test]
    async fn test_too_many_pending() {
        let engine = MockEngine::start().await;
        engine.set_responder(|_| Reply::Hold);
        let (mux, _) = build(&engine.addr(), ClientConfig::default().with_max_pending(1));
        let mux = Arc::new(mux);

        let held = {
            let mux = mux.clone();
            tokio::spawn(async move { mux.execute("hold()").await })
        };
        engine.wait_for_requests(1, Duration::from_secs(2)).await;

        let err = mux.execute("second()").await.unwrap_err();
        assert!(matches!(err, GatewayError::TooManyPending(1)));
        held.abort();
    }
}

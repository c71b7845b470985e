//! JSON-RPC channel over the wallet's write/notify characteristic pair.
//!
//! One request at a time: the request is written in a single transport
//! write, the response arrives as an ordered series of notification
//! fragments, and completion is detected from brace/bracket balance since
//! the wire carries no length framing. Each call resolves exactly once:
//! with the assembled text, with whatever was buffered when the deadline
//! hit, or with a transport error.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::error::BleError;
use crate::infrastructure::bluetooth::log::MessageLog;
use crate::infrastructure::bluetooth::pending::OpSlot;
use crate::infrastructure::bluetooth::protocol::ResponseBuffer;

/// Write path for encoded requests. The session behind it may come and go;
/// a sink with no live session reports `NotConnected`.
#[async_trait]
pub trait RequestSink: Send + Sync {
    async fn write_request(&self, payload: &[u8]) -> Result<(), BleError>;
}

/// How a call ended, short of a transport error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcOutcome {
    /// The fully assembled response text.
    Complete(String),
    /// The deadline hit first; whatever had accumulated, possibly nothing.
    Partial { text: String, bytes_received: usize },
}

pub struct RpcChannel {
    sink: Arc<dyn RequestSink>,
    buffer: Mutex<ResponseBuffer>,
    slot: OpSlot<Result<String, BleError>>,
    call_timeout: Duration,
    max_response_size: usize,
    log: MessageLog,
}

impl RpcChannel {
    pub fn new(
        sink: Arc<dyn RequestSink>,
        call_timeout: Duration,
        max_response_size: usize,
        log: MessageLog,
    ) -> Self {
        Self {
            sink,
            buffer: Mutex::new(ResponseBuffer::new()),
            slot: OpSlot::new(),
            call_timeout,
            max_response_size,
            log,
        }
    }

    /// Issue one request and wait for its response.
    ///
    /// Calls are not queued: a second call while one is outstanding is
    /// rejected with [`BleError::Busy`] and leaves the first call's
    /// outcome untouched.
    pub async fn send(&self, request: &str) -> Result<RpcOutcome, BleError> {
        let pending = self.slot.try_occupy().ok_or(BleError::Busy)?;
        self.buffer.lock().unwrap().clear();

        self.log.publish(format!("Sending RPC command: {request}"));
        if let Err(err) = self.sink.write_request(request.as_bytes()).await {
            self.log.publish(format!("Failed to write command: {err}"));
            self.slot.release();
            self.buffer.lock().unwrap().clear();
            return Err(err);
        }
        self.log
            .publish("Command written successfully, waiting for response...");

        match timeout(self.call_timeout, pending).await {
            Ok(Ok(resolution)) => resolution.map(RpcOutcome::Complete),
            Ok(Err(_)) => {
                // The sender vanished without resolving: session teardown.
                self.slot.release();
                self.buffer.lock().unwrap().clear();
                Err(BleError::LinkFailed("session closed mid-call".into()))
            }
            Err(_) => {
                let mut buffer = self.buffer.lock().unwrap();
                self.slot.release();
                let text = buffer.take();
                drop(buffer);
                self.log.publish(format!(
                    "RPC timed out after {:?}, {} byte(s) of partial response",
                    self.call_timeout,
                    text.len()
                ));
                Ok(RpcOutcome::Partial {
                    bytes_received: text.len(),
                    text,
                })
            }
        }
    }

    /// Feed one notification fragment from the notify endpoint.
    ///
    /// Called by the session's notification router. Fragments arriving with
    /// no call pending are logged and dropped; they can never resolve an
    /// already-settled call.
    pub fn handle_fragment(&self, data: &[u8]) {
        let mut buffer = self.buffer.lock().unwrap();
        if !self.slot.is_occupied() {
            self.log.publish(format!(
                "Discarding {} stray byte(s) received with no call pending",
                data.len()
            ));
            return;
        }

        let chunk = String::from_utf8_lossy(data);
        self.log
            .publish(format!("Notification received: {} byte(s)", data.len()));
        self.log.publish(format!("Raw bytes: {}", hex_dump(data)));

        buffer.push_fragment(&chunk);

        if buffer.len() > self.max_response_size {
            let received = buffer.len();
            buffer.clear();
            self.log.publish(format!(
                "Response exceeded {} byte cap ({received} received), aborting call",
                self.max_response_size
            ));
            self.slot.resolve(Err(BleError::ResponseTooLarge {
                limit: self.max_response_size,
                received,
            }));
        } else if buffer.is_complete() {
            let text = buffer.take();
            self.log.publish(format!(
                "Complete response detected ({} bytes)",
                text.len()
            ));
            self.slot.resolve(Ok(text));
        } else {
            self.log.publish(format!(
                "Buffer now at {} byte(s), waiting for more notifications...",
                buffer.len()
            ));
        }
    }

    /// Fail whatever call is in flight, e.g. on an unsolicited disconnect.
    /// A vacant slot makes this a no-op.
    pub(crate) fn fail_inflight(&self, err: BleError) {
        let mut buffer = self.buffer.lock().unwrap();
        if self.slot.resolve(Err(err)) {
            buffer.clear();
        }
    }
}

fn hex_dump(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MockSink {
        written: Mutex<Vec<Vec<u8>>>,
        fail_with: Mutex<Option<BleError>>,
    }

    #[async_trait]
    impl RequestSink for MockSink {
        async fn write_request(&self, payload: &[u8]) -> Result<(), BleError> {
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            self.written.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    fn channel(timeout_ms: u64, max: usize) -> (Arc<RpcChannel>, Arc<MockSink>) {
        let sink = Arc::new(MockSink::default());
        let rpc = Arc::new(RpcChannel::new(
            sink.clone(),
            Duration::from_millis(timeout_ms),
            max,
            MessageLog::new(64),
        ));
        (rpc, sink)
    }

    #[tokio::test]
    async fn assembles_response_across_fragments() {
        let (rpc, sink) = channel(1_000, 8192);

        let call = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"getStatus"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        rpc.handle_fragment(b"{\"stat");
        rpc.handle_fragment(b"us\":\"ok\"}");

        let outcome = call.await.unwrap().unwrap();
        assert_eq!(outcome, RpcOutcome::Complete("{\"status\":\"ok\"}".into()));
        assert_eq!(
            sink.written.lock().unwrap().as_slice(),
            &[br#"{"method":"getStatus"}"#.to_vec()]
        );
    }

    #[tokio::test]
    async fn overlapping_send_is_rejected_without_disturbing_the_first() {
        let (rpc, _sink) = channel(1_000, 8192);

        let first = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"listMethods"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = rpc.send(r#"{"method":"getStatus"}"#).await;
        assert!(matches!(second, Err(BleError::Busy)));

        rpc.handle_fragment(b"[\"getStatus\"]");
        let outcome = first.await.unwrap().unwrap();
        assert_eq!(outcome, RpcOutcome::Complete("[\"getStatus\"]".into()));
    }

    #[tokio::test]
    async fn timeout_without_notifications_reports_zero_bytes() {
        let (rpc, _sink) = channel(50, 8192);
        let outcome = rpc.send(r#"{"method":"getStatus"}"#).await.unwrap();
        assert_eq!(
            outcome,
            RpcOutcome::Partial {
                text: String::new(),
                bytes_received: 0
            }
        );
    }

    #[tokio::test]
    async fn timeout_surfaces_partial_data_and_resets_for_next_call() {
        let (rpc, _sink) = channel(100, 8192);

        let call = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"getStatus"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rpc.handle_fragment(b"{\"partial\":");

        let outcome = call.await.unwrap().unwrap();
        assert_eq!(
            outcome,
            RpcOutcome::Partial {
                text: "{\"partial\":".into(),
                bytes_received: 11
            }
        );

        // The buffer must start empty for the next call.
        let next = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"getStatus"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rpc.handle_fragment(b"{\"ok\":true}");
        let outcome = next.await.unwrap().unwrap();
        assert_eq!(outcome, RpcOutcome::Complete("{\"ok\":true}".into()));
    }

    #[tokio::test]
    async fn late_fragments_are_discarded_silently() {
        let (rpc, _sink) = channel(50, 8192);
        let outcome = rpc.send(r#"{"method":"getStatus"}"#).await.unwrap();
        assert!(matches!(outcome, RpcOutcome::Partial { bytes_received: 0, .. }));

        // Response shows up after the call already resolved.
        rpc.handle_fragment(b"{\"too\":\"late\"}");

        // A fresh call is unaffected by the stray fragment.
        let next = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"getStatus"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rpc.handle_fragment(b"{\"fresh\":1}");
        let outcome = next.await.unwrap().unwrap();
        assert_eq!(outcome, RpcOutcome::Complete("{\"fresh\":1}".into()));
    }

    #[tokio::test]
    async fn write_failure_resolves_immediately_and_frees_the_channel() {
        let (rpc, sink) = channel(1_000, 8192);
        *sink.fail_with.lock().unwrap() = Some(BleError::WriteFailed("rejected".into()));

        let err = rpc.send(r#"{"method":"getStatus"}"#).await.unwrap_err();
        assert!(matches!(err, BleError::WriteFailed(_)));

        // Slot must be free again.
        let next = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"getStatus"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rpc.handle_fragment(b"{}");
        assert_eq!(
            next.await.unwrap().unwrap(),
            RpcOutcome::Complete("{}".into())
        );
    }

    #[tokio::test]
    async fn oversized_response_aborts_the_call() {
        let (rpc, _sink) = channel(1_000, 16);

        let call = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"dump"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rpc.handle_fragment(b"{\"blob\":\"0123456789abcdef\"");

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            BleError::ResponseTooLarge { limit: 16, .. }
        ));

        // Buffer was cleared; a small follow-up call succeeds.
        let next = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"ping"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rpc.handle_fragment(b"{}");
        assert_eq!(
            next.await.unwrap().unwrap(),
            RpcOutcome::Complete("{}".into())
        );
    }

    #[tokio::test]
    async fn teardown_fails_the_inflight_call() {
        let (rpc, _sink) = channel(1_000, 8192);

        let call = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.send(r#"{"method":"getStatus"}"#).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        rpc.handle_fragment(b"{\"half\":");
        rpc.fail_inflight(BleError::LinkFailed("disconnected".into()));

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, BleError::LinkFailed(_)));
    }
}

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame, Message};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Identifier assigned to every accepted WebSocket connection.
pub type ConnectionId = Uuid;

/// The writer half of a connection has gone away.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection closed")]
pub struct ConnectionClosed;

#[derive(Clone, Debug)]
/// Handle used to push messages to a connected socket through its writer task.
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether the writer task still accepts frames.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Serialize `value` as JSON and queue it on the socket.
    ///
    /// A serialization failure is logged and swallowed since retrying cannot help.
    pub fn send_json<T>(&self, value: &T) -> Result<(), ConnectionClosed>
    where
        T: ?Sized + serde::Serialize + std::fmt::Debug,
    {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "failed to serialize message `{value:?}`");
                return Ok(());
            }
        };

        self.send(Message::Text(payload.into()))
    }

    /// Queue a raw frame.
    pub fn send(&self, message: Message) -> Result<(), ConnectionClosed> {
        self.tx.send(message).map_err(|_| ConnectionClosed)
    }

    /// Queue a protocol-level ping.
    pub fn ping(&self) -> Result<(), ConnectionClosed> {
        self.send(Message::Ping(Default::default()))
    }

    /// Queue a close frame; the writer task shuts the socket once it is flushed.
    pub fn close(&self, code: u16, reason: impl Into<Cow<'static, str>>) {
        let reason: Cow<'static, str> = reason.into();
        let frame = CloseFrame {
            code,
            reason: reason.into_owned().into(),
        };
        let _ = self.tx.send(Message::Close(Some(frame)));
    }
}

#[cfg(test)]
mod tests {
    use axum::extract::ws::close_code;

    use super::*;

    #[test]
    fn send_json_queues_text_frame() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);

        handle.send_json(&serde_json::json!({"type": "WAITING"})).unwrap();

        match rx.try_recv().unwrap() {
            Message::Text(text) => assert_eq!(text.as_str(), r#"{"type":"WAITING"}"#),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn dropped_receiver_closes_handle() {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);
        assert!(handle.is_open());

        drop(rx);
        assert!(!handle.is_open());
        assert_eq!(handle.ping(), Err(ConnectionClosed));
    }

    #[test]
    fn close_carries_code_and_reason() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(tx);

        handle.close(close_code::NORMAL, "Cancelled");

        match rx.try_recv().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(frame.code, close_code::NORMAL);
                assert_eq!(frame.reason.as_str(), "Cancelled");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

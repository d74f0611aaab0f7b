//! Terminal capability: fire-and-forget notices for an embedding UI.
//!
//! `terminal.*` syscalls carry no meaningful reply; the handler publishes
//! a notice on a broadcast channel and acknowledges immediately. An
//! embedder subscribes to render writes, clears, and theme changes.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::errors::{KernelError, KernelResult};
use crate::syscall::CapabilityHandler;

/// One fire-and-forget terminal action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalNotice {
    Write(String),
    Clear,
    SetTheme(String),
}

/// Capability handler serving `terminal.write`, `terminal.clear`, and
/// `terminal.set_theme`.
pub struct TerminalCapability {
    tx: broadcast::Sender<TerminalNotice>,
}

impl TerminalCapability {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Subscribe to the notice stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TerminalNotice> {
        self.tx.subscribe()
    }
}

impl Default for TerminalCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHandler for TerminalCapability {
    fn namespace(&self) -> &str {
        "terminal"
    }

    async fn handle(&self, call: &str, params: Value) -> KernelResult<Value> {
        let notice = match call {
            "write" => TerminalNotice::Write(
                params
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            "clear" => TerminalNotice::Clear,
            "set_theme" => TerminalNotice::SetTheme(
                params
                    .get("theme")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            other => return Err(KernelError::NotFound(format!("terminal.{}", other))),
        };
        // Nobody listening is fine; the call is fire-and-forget.
        let _ = self.tx.send(notice);
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_notices_reach_subscriber() {
        let cap = TerminalCapability::new();
        let mut rx = cap.subscribe();

        cap.handle("write", json!({ "text": "hello" })).await.unwrap();
        cap.handle("clear", json!({})).await.unwrap();
        cap.handle("set_theme", json!({ "theme": "solarized" }))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), TerminalNotice::Write("hello".into()));
        assert_eq!(rx.recv().await.unwrap(), TerminalNotice::Clear);
        assert_eq!(
            rx.recv().await.unwrap(),
            TerminalNotice::SetTheme("solarized".into())
        );
    }

    #[tokio::test]
    async fn test_no_subscriber_is_fine() {
        let cap = TerminalCapability::new();
        assert!(cap.handle("write", json!({ "text": "x" })).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_call() {
        let cap = TerminalCapability::new();
        assert!(cap.handle("resize", json!({})).await.is_err());
    }
}

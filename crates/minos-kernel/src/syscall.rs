//! The syscall bridge — request/response correlation across the isolation
//! boundary.
//!
//! A program inside an execution context never touches kernel state. It
//! calls `SyscallHandle::call(name, params)`, which allocates a call id,
//! records a pending continuation, ships a request to the kernel, and
//! suspends until a correlated reply or the 30-tick deadline.
//!
//! On the kernel side, calls are resolved in a fixed order: process-table
//! syscalls served inline by the kernel itself, then named capability
//! handlers (filesystem, terminal, timer), then a broadcast to external
//! collaborators. A call nothing answers hangs until the timeout.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{trace, warn};

use crate::errors::{KernelError, KernelResult};
use crate::proc::Pid;
use crate::worker::{StateCell, WorkerEvent, WorkerMsg, WorkerState};

/// Pending continuations, keyed by call id. Owned by the issuing context;
/// entries are removed on response, on timeout, or on context teardown,
/// whichever comes first.
pub(crate) type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<KernelResult<Value>>>>>;

/// Per-context handle for issuing syscalls.
///
/// Cloneable so program logic can hold it across awaits; all clones share
/// one call-id counter and one pending map.
#[derive(Clone)]
pub struct SyscallHandle {
    pid: Pid,
    state: StateCell,
    next_id: Arc<AtomicU64>,
    pending: PendingMap,
    events: mpsc::Sender<WorkerEvent>,
    deadline: Duration,
}

impl SyscallHandle {
    pub(crate) fn new(
        pid: Pid,
        state: StateCell,
        pending: PendingMap,
        events: mpsc::Sender<WorkerEvent>,
        deadline: Duration,
    ) -> Self {
        Self {
            pid,
            state,
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
            events,
            deadline,
        }
    }

    /// Issue a named capability request and suspend until it resolves.
    ///
    /// Fails with `PreconditionViolation` before the context is running (no
    /// call id is allocated in that case), `Timeout` after the deadline,
    /// and `ProcessTerminated` if the context is torn down first.
    pub async fn call(&self, name: &str, params: Value) -> KernelResult<Value> {
        match self.state.get() {
            WorkerState::Uninitialized | WorkerState::Initialized => {
                return Err(KernelError::PreconditionViolation(format!(
                    "syscall {} before context initialization",
                    name
                )));
            }
            WorkerState::Exited | WorkerState::Crashed => {
                return Err(KernelError::ProcessTerminated);
            }
            WorkerState::Running => {}
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, tx);
        trace!(pid = %self.pid, id, call = name, "syscall issued");

        let request = WorkerEvent::Syscall {
            pid: self.pid,
            id,
            name: name.to_string(),
            params,
        };
        if self.events.send(request).await.is_err() {
            self.pending().remove(&id);
            return Err(KernelError::ProcessTerminated);
        }

        match tokio::time::timeout(self.deadline, rx).await {
            Ok(Ok(result)) => result,
            // The pending entry was dropped without a reply: teardown.
            Ok(Err(_)) => Err(KernelError::ProcessTerminated),
            Err(_) => {
                self.pending().remove(&id);
                warn!(pid = %self.pid, id, call = name, "syscall timed out");
                Err(KernelError::Timeout {
                    call: name.to_string(),
                })
            }
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<KernelResult<Value>>>> {
        // The mutex is only held for map surgery, never across an await.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Reject every pending syscall with `ProcessTerminated` and clear the map.
/// Called once when a context reaches a terminal state.
pub(crate) fn reject_all_pending(pending: &PendingMap) {
    let mut map = pending.lock().unwrap_or_else(|e| e.into_inner());
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(KernelError::ProcessTerminated));
    }
}

/// A named capability served on the kernel side of the bridge.
///
/// Handlers are invoked on spawned tasks so a slow collaborator never
/// blocks the kernel's own execution path.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Namespace this handler answers for (the part before the first `.` in
    /// a syscall name, e.g. `vfs`).
    fn namespace(&self) -> &str;

    /// Handle one call. `call` is the name with the namespace stripped
    /// (e.g. `readFile` for `vfs.readFile`).
    async fn handle(&self, call: &str, params: Value) -> KernelResult<Value>;
}

/// Timer capability: serves `proc.sleep`.
pub struct TimerCapability;

#[async_trait]
impl CapabilityHandler for TimerCapability {
    fn namespace(&self) -> &str {
        "proc"
    }

    async fn handle(&self, call: &str, params: Value) -> KernelResult<Value> {
        match call {
            "sleep" => {
                let millis = params
                    .get("milliseconds")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| {
                        KernelError::InvalidSpec("proc.sleep: missing milliseconds".to_string())
                    })?;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(Value::Null)
            }
            other => Err(KernelError::NotFound(format!("proc.{}", other))),
        }
    }
}

/// Reply slot for a broadcast external call.
///
/// Cloneable alongside the call itself; the first `resolve` wins, later
/// ones are discarded by the worker as stale.
#[derive(Clone)]
pub struct ExternalReply {
    id: u64,
    tx: mpsc::Sender<WorkerMsg>,
}

impl ExternalReply {
    pub(crate) fn new(id: u64, tx: mpsc::Sender<WorkerMsg>) -> Self {
        Self { id, tx }
    }

    /// Deliver the result back into the issuing context.
    pub fn resolve(self, result: KernelResult<Value>) {
        let id = self.id;
        let tx = self.tx;
        tokio::spawn(async move {
            let _ = tx.send(WorkerMsg::SyscallReply { id, result }).await;
        });
    }
}

/// A syscall no kernel-side handler claimed, broadcast for any external
/// collaborator to answer. If nothing answers, the call times out in the
/// issuing context.
#[derive(Clone)]
pub struct ExternalCall {
    /// Originating PID.
    pub pid: Pid,
    /// Full syscall name.
    pub name: String,
    /// Call parameters.
    pub params: Value,
    /// Where to deliver the answer.
    pub reply: ExternalReply,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_call_before_running_allocates_no_id() {
        let state = StateCell::new();
        let pending: PendingMap = Arc::default();
        let (events, _rx) = mpsc::channel(8);
        let handle = SyscallHandle::new(
            Pid(1),
            state,
            pending.clone(),
            events,
            Duration::from_millis(50),
        );

        let err = handle.call("vfs.stat", json!({})).await.unwrap_err();
        assert!(matches!(err, KernelError::PreconditionViolation(_)));
        assert!(pending.lock().unwrap().is_empty(), "no leaked pending entry");
    }

    #[tokio::test]
    async fn test_unanswered_call_times_out_and_clears_pending() {
        let state = StateCell::new();
        state.set(WorkerState::Running);
        let pending: PendingMap = Arc::default();
        let (events, mut rx) = mpsc::channel(8);
        let handle = SyscallHandle::new(
            Pid(1),
            state,
            pending.clone(),
            events,
            Duration::from_millis(20),
        );

        let err = handle.call("ghost.poke", json!({})).await.unwrap_err();
        assert_eq!(
            err,
            KernelError::Timeout {
                call: "ghost.poke".to_string()
            }
        );
        assert!(pending.lock().unwrap().is_empty());
        // The request itself did go out.
        assert!(matches!(
            rx.recv().await,
            Some(WorkerEvent::Syscall { .. })
        ));
    }

    #[tokio::test]
    async fn test_reply_resolves_call() {
        let state = StateCell::new();
        state.set(WorkerState::Running);
        let pending: PendingMap = Arc::default();
        let (events, mut rx) = mpsc::channel(8);
        let handle = SyscallHandle::new(
            Pid(1),
            state,
            pending.clone(),
            events,
            Duration::from_secs(1),
        );

        let pending_for_reply = pending.clone();
        let replier = tokio::spawn(async move {
            if let Some(WorkerEvent::Syscall { id, .. }) = rx.recv().await {
                let tx = pending_for_reply
                    .lock()
                    .unwrap()
                    .remove(&id)
                    .expect("pending entry");
                let _ = tx.send(Ok(json!("pong")));
            }
        });

        let value = handle.call("ping", json!({})).await.unwrap();
        assert_eq!(value, json!("pong"));
        replier.await.unwrap();
    }

    #[tokio::test]
    async fn test_context_survives_timeout() {
        let state = StateCell::new();
        state.set(WorkerState::Running);
        let pending: PendingMap = Arc::default();
        let (events, mut rx) = mpsc::channel(8);
        let handle = SyscallHandle::new(
            Pid(1),
            state,
            pending.clone(),
            events,
            Duration::from_millis(10),
        );

        assert!(handle.call("ghost.one", json!({})).await.is_err());

        // Second call after a timeout still goes out with a fresh id.
        let pending_for_reply = pending.clone();
        let replier = tokio::spawn(async move {
            let mut last_id = 0;
            while let Some(WorkerEvent::Syscall { id, name, .. }) = rx.recv().await {
                assert!(id > last_id, "call ids are unique per context");
                last_id = id;
                if name == "ghost.two" {
                    if let Some(tx) = pending_for_reply.lock().unwrap().remove(&id) {
                        let _ = tx.send(Ok(Value::Null));
                    }
                    break;
                }
            }
        });

        assert!(handle.call("ghost.two", json!({})).await.is_ok());
        replier.await.unwrap();
    }

    #[tokio::test]
    async fn test_reject_all_pending() {
        let pending: PendingMap = Arc::default();
        let (tx, rx) = oneshot::channel();
        pending.lock().unwrap().insert(1, tx);

        reject_all_pending(&pending);
        assert_eq!(rx.await.unwrap(), Err(KernelError::ProcessTerminated));
        assert!(pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timer_capability_sleep() {
        let timer = TimerCapability;
        let start = std::time::Instant::now();
        timer
            .handle("sleep", json!({ "milliseconds": 30 }))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[tokio::test]
    async fn test_timer_capability_unknown_call() {
        let timer = TimerCapability;
        let err = timer.handle("warp", json!({})).await.unwrap_err();
        assert!(err.is_not_found());
    }
}

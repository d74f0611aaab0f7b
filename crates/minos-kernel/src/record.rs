//! Output records — the stdout channel between programs and the kernel.
//!
//! A program never writes to a terminal directly. It emits `OutputRecord`s
//! through a `RecordSink`; the kernel routes each record to the caller's
//! sink, a pipe buffer, or a file depending on the stage's routing.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::proc::Pid;

/// One line of process output.
///
/// Failures travel through the same channel as normal output, flagged with
/// `is_error` so a presenting layer can distinguish them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// PID of the producing process.
    pub pid: Pid,
    /// Command name of the producing process.
    pub source: String,
    /// The line text, without a trailing newline.
    pub text: String,
    /// True for failure lines.
    pub is_error: bool,
}

impl OutputRecord {
    /// Create a normal output line.
    pub fn line(pid: Pid, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            pid,
            source: source.into(),
            text: text.into(),
            is_error: false,
        }
    }

    /// Create an error line.
    pub fn error(pid: Pid, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            pid,
            source: source.into(),
            text: text.into(),
            is_error: true,
        }
    }
}

/// Write side of a process's stdout, handed to the program logic.
///
/// Records are forwarded to the kernel as they are produced; there is no
/// batching inside the context.
#[derive(Clone)]
pub struct RecordSink {
    pid: Pid,
    source: String,
    tx: mpsc::Sender<OutputRecord>,
}

impl RecordSink {
    /// Create a sink stamping records with the given identity.
    pub fn new(pid: Pid, source: impl Into<String>, tx: mpsc::Sender<OutputRecord>) -> Self {
        Self {
            pid,
            source: source.into(),
            tx,
        }
    }

    /// Emit one normal output line.
    pub async fn line(&self, text: impl Into<String>) {
        let _ = self
            .tx
            .send(OutputRecord::line(self.pid, &self.source, text))
            .await;
    }

    /// Emit one error line.
    pub async fn error(&self, text: impl Into<String>) {
        let _ = self
            .tx
            .send(OutputRecord::error(self.pid, &self.source, text))
            .await;
    }

    /// Emit every line of a multi-line chunk as its own record.
    pub async fn lines(&self, chunk: &str) {
        for line in chunk.lines() {
            self.line(line).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_stamps_identity() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = RecordSink::new(Pid(7), "echo", tx);
        sink.line("hello").await;

        let rec = rx.recv().await.unwrap();
        assert_eq!(rec.pid, Pid(7));
        assert_eq!(rec.source, "echo");
        assert_eq!(rec.text, "hello");
        assert!(!rec.is_error);
    }

    #[tokio::test]
    async fn test_sink_error_flag() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = RecordSink::new(Pid(1), "cat", tx);
        sink.error("cat: /x: not found").await;

        let rec = rx.recv().await.unwrap();
        assert!(rec.is_error);
    }

    #[tokio::test]
    async fn test_sink_splits_lines() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = RecordSink::new(Pid(1), "cat", tx);
        sink.lines("a\nb\nc").await;

        assert_eq!(rx.recv().await.unwrap().text, "a");
        assert_eq!(rx.recv().await.unwrap().text, "b");
        assert_eq!(rx.recv().await.unwrap().text, "c");
    }
}

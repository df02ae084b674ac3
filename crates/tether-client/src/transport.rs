//! Stdio transport: owns the tool-server subprocess and its byte streams.
//!
//! Spawns the server with piped stdin/stdout and moves writes onto a
//! background task fed by a channel. The read half is handed out as a
//! [`FrameReader`] so the dispatcher owns the single receive loop. The
//! subprocess's stderr is inherited; stdio servers log there.

use crate::error::ClientError;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Lifecycle of the subprocess connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Starting,
    Open,
    Closing,
    Closed,
}

/// Write half of the connection, plus ownership of the child process.
///
/// Subprocess exit is not signaled separately: it surfaces as EOF on the
/// [`FrameReader`], which is the event that fails pending calls.
pub struct Transport {
    child: Arc<tokio::sync::Mutex<Child>>,
    write_tx: Mutex<Option<mpsc::Sender<String>>>,
    writer_handle: JoinHandle<()>,
    state: Mutex<ConnectionState>,
}

/// Read half of the connection: yields one frame per line of peer stdout.
pub struct FrameReader {
    lines: Lines<BufReader<ChildStdout>>,
}

impl FrameReader {
    /// Next complete frame, or `None` once the peer's stdout closes.
    /// Blank lines are not frames and are skipped.
    pub async fn next_frame(&mut self) -> std::io::Result<Option<String>> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}

impl Transport {
    /// Spawn the server process and wire up both stream halves.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<(Self, FrameReader), ClientError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ClientError::Spawn {
            command: command.to_string(),
            source,
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");

        // Writer task: drains the channel and writes newline-terminated
        // frames to child stdin. Ends when the channel or the pipe closes.
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(frame) = write_rx.recv().await {
                if stdin.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
                if stdin.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        let reader = FrameReader {
            lines: BufReader::new(stdout).lines(),
        };
        let transport = Self {
            child: Arc::new(tokio::sync::Mutex::new(child)),
            write_tx: Mutex::new(Some(write_tx)),
            writer_handle,
            state: Mutex::new(ConnectionState::Starting),
        };
        *transport.state.lock().unwrap() = ConnectionState::Open;
        Ok((transport, reader))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap()
    }

    /// Queue one frame for the peer.
    pub async fn send(&self, frame: String) -> Result<(), ClientError> {
        let tx = self.write_tx.lock().unwrap().clone();
        match tx {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| ClientError::ConnectionClosed),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Terminate the subprocess and release the streams. Idempotent.
    ///
    /// Closing stdin asks the server to exit on its own; after a bounded
    /// wait the child is killed.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
                return;
            }
            *state = ConnectionState::Closing;
        }

        // Dropping the sender ends the writer task, which closes child stdin.
        self.write_tx.lock().unwrap().take();

        let graceful = tokio::time::timeout(Duration::from_secs(5), async {
            let mut child = self.child.lock().await;
            let _ = child.wait().await;
        })
        .await;

        if graceful.is_err() {
            tracing::debug!("peer did not exit on stdin close, killing");
            let mut child = self.child.lock().await;
            let _ = child.kill().await;
        }

        self.writer_handle.abort();
        *self.state.lock().unwrap() = ConnectionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_opens_the_connection() {
        let (transport, _reader) = Transport::spawn("cat", &[], &HashMap::new()).unwrap();
        assert_eq!(transport.state(), ConnectionState::Open);
        transport.close().await;
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result = Transport::spawn("this_command_does_not_exist_xyz123", &[], &HashMap::new());
        match result {
            Err(ClientError::Spawn { command, .. }) => {
                assert_eq!(command, "this_command_does_not_exist_xyz123");
            }
            Err(other) => panic!("expected Spawn, got: {other:?}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn frames_echo_through_cat() {
        let (transport, mut reader) = Transport::spawn("cat", &[], &HashMap::new()).unwrap();
        transport.send(r#"{"id":1}"#.to_string()).await.unwrap();
        let frame = reader.next_frame().await.unwrap();
        assert_eq!(frame.as_deref(), Some(r#"{"id":1}"#));
        transport.close().await;
    }

    #[tokio::test]
    async fn reader_sees_eof_after_close() {
        let (transport, mut reader) = Transport::spawn("cat", &[], &HashMap::new()).unwrap();
        transport.close().await;
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (transport, _reader) = Transport::spawn("cat", &[], &HashMap::new()).unwrap();
        transport.close().await;
        let result = transport.send("{}".to_string()).await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (transport, _reader) = Transport::spawn("cat", &[], &HashMap::new()).unwrap();
        transport.close().await;
        transport.close().await;
        assert_eq!(transport.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (transport, mut reader) =
            Transport::spawn("printf", &["\n\n{\"id\":1}\n".to_string()], &HashMap::new())
                .unwrap();
        let frame = reader.next_frame().await.unwrap();
        assert_eq!(frame.as_deref(), Some("{\"id\":1}"));
        transport.close().await;
    }
}

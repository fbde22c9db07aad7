//! JSON-RPC transport over a provider subprocess's stdin/stdout

use crate::error::{AcpError, Error, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, trace, warn};

/// Byte-stream seam between the ACP client and whatever carries the
/// provider's newline-delimited JSON. The subprocess transport is the
/// production implementation; tests substitute an in-memory pipe.
#[async_trait]
pub trait AcpTransport: Send + Sync {
    /// Write one frame (a newline is appended by the transport)
    async fn send_line(&self, line: String) -> Result<()>;

    /// Receive the next frame, or `None` once the transport is closed
    async fn recv_line(&self) -> Option<String>;
}

/// Transport over a spawned provider process.
/// Uses channels to avoid lock contention between send and receive.
pub struct ProcessTransport {
    /// Channel to send data to the stdin writer task
    stdin_tx: mpsc::Sender<String>,
    /// Channel to receive data from the stdout reader task
    stdout_rx: Mutex<mpsc::Receiver<String>>,
    /// Background tasks
    _stdin_task: tokio::task::JoinHandle<()>,
    _stdout_task: tokio::task::JoinHandle<()>,
    _stderr_task: tokio::task::JoinHandle<()>,
}

impl ProcessTransport {
    /// Spawn the provider process and wire up its pipes
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &std::collections::HashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<(Self, Child)> {
        debug!("Spawning provider: {} {:?} (cwd: {:?})", command, args, cwd);

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            Error::Acp(AcpError::ConnectionFailed(format!(
                "Failed to spawn provider process: {}",
                e
            )))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            Error::Acp(AcpError::ConnectionFailed(
                "Failed to capture stdin".to_string(),
            ))
        })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            Error::Acp(AcpError::ConnectionFailed(
                "Failed to capture stdout".to_string(),
            ))
        })?;

        let stderr = child.stderr.take().ok_or_else(|| {
            Error::Acp(AcpError::ConnectionFailed(
                "Failed to capture stderr".to_string(),
            ))
        })?;

        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(100);
        let (stdout_tx, stdout_rx) = mpsc::channel::<String>(100);

        let stdin_task = tokio::spawn(Self::write_stdin_task(stdin, stdin_rx));
        let stdout_task = tokio::spawn(Self::read_stdout_task(stdout, stdout_tx));

        // Drain stderr so the provider can't deadlock on a full pipe.
        let stderr_task = tokio::spawn(Self::read_stderr_task(stderr));

        Ok((
            Self {
                stdin_tx,
                stdout_rx: Mutex::new(stdout_rx),
                _stdin_task: stdin_task,
                _stdout_task: stdout_task,
                _stderr_task: stderr_task,
            },
            child,
        ))
    }

    /// Background task to write to stdin
    async fn write_stdin_task(mut stdin: ChildStdin, mut rx: mpsc::Receiver<String>) {
        while let Some(data) = rx.recv().await {
            trace!("Sending to stdin: {}", data);
            if let Err(e) = stdin.write_all(data.as_bytes()).await {
                error!("Failed to write to stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.write_all(b"\n").await {
                error!("Failed to write newline to stdin: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                break;
            }
        }
        debug!("Stdin writer task ended");
    }

    /// Background task to read stdout lines
    async fn read_stdout_task(stdout: ChildStdout, tx: mpsc::Sender<String>) {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("Provider stdout closed");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        trace!("Provider stdout: {}", trimmed);
                        if tx.send(trimmed.to_string()).await.is_err() {
                            warn!("Failed to send stdout line, channel closed");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!("Error reading provider stdout: {}", e);
                    break;
                }
            }
        }
    }

    /// Background task to drain stderr.
    async fn read_stderr_task(stderr: ChildStderr) {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("Provider stderr closed");
                    break;
                }
                Ok(_) => {
                    let trimmed = line.trim();
                    if !trimmed.is_empty() {
                        // Providers often log here; never treat it as fatal.
                        warn!("Provider stderr: {}", trimmed);
                    }
                }
                Err(e) => {
                    error!("Error reading provider stderr: {}", e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl AcpTransport for ProcessTransport {
    async fn send_line(&self, line: String) -> Result<()> {
        self.stdin_tx.send(line).await.map_err(|e| {
            Error::Acp(AcpError::ConnectionFailed(format!("Failed to send: {}", e)))
        })?;
        Ok(())
    }

    async fn recv_line(&self) -> Option<String> {
        let mut rx = self.stdout_rx.lock().await;
        rx.recv().await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_spawn_invalid_command() {
        let result = ProcessTransport::spawn(
            "nonexistent_command_12345",
            &[],
            &std::collections::HashMap::new(),
            None,
        )
        .await;

        assert!(result.is_err());
        if let Err(Error::Acp(AcpError::ConnectionFailed(msg))) = result {
            assert!(msg.contains("Failed to spawn"));
        } else {
            panic!("Expected ConnectionFailed error");
        }
    }

    #[tokio::test]
    async fn test_pipe_transport_round_trip() {
        let (transport, mut handle) = testing::PipeTransport::new();

        assert_ok!(transport.send_line("outgoing".to_string()).await);
        assert_eq!(handle.outbound_rx.recv().await.unwrap(), "outgoing");

        handle.inbound_tx.send("incoming".to_string()).unwrap();
        assert_eq!(transport.recv_line().await.unwrap(), "incoming");
    }
}

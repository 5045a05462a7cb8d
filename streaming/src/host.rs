use crate::error::StreamingError;
use procri_runtime::pty::{PtyMaster, open_pty, set_controlling_tty};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::sync::mpsc;

/// Client window-size update, applied to the PTY via TIOCSWINSZ.
#[derive(Debug, Clone, Copy)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

pub type StreamIn = Box<dyn AsyncRead + Send + Unpin>;
pub type StreamOut = Box<dyn AsyncWrite + Send + Unpin>;

/// Host-side callbacks behind the streaming server: commands run as plain
/// host processes, never inside a guest context.
pub struct HostStreamer;

impl HostStreamer {
    /// Run `cmd`, wiring the client streams through a PTY when `tty` is set
    /// and through plain pipes otherwise.
    pub async fn exec(
        &self,
        cmd: &[String],
        stdin: Option<StreamIn>,
        stdout: Option<StreamOut>,
        stderr: Option<StreamOut>,
        tty: bool,
        resize: mpsc::Receiver<TerminalSize>,
    ) -> Result<(), StreamingError> {
        if cmd.is_empty() {
            return Err(StreamingError::InvalidRequest("empty command".to_string()));
        }

        if tty {
            self.exec_tty(cmd, stdin, stdout, resize).await
        } else {
            self.exec_piped(cmd, stdin, stdout, stderr).await
        }
    }

    async fn exec_tty(
        &self,
        cmd: &[String],
        stdin: Option<StreamIn>,
        stdout: Option<StreamOut>,
        mut resize: mpsc::Receiver<TerminalSize>,
    ) -> Result<(), StreamingError> {
        let pty = open_pty().map_err(|e| StreamingError::Spawn(format!("openpty: {}", e)))?;

        let mut command = Command::new(&cmd[0]);
        command.args(&cmd[1..]);
        let slave_out = pty
            .slave
            .try_clone()
            .map_err(|e| StreamingError::Spawn(e.to_string()))?;
        let slave_err = pty
            .slave
            .try_clone()
            .map_err(|e| StreamingError::Spawn(e.to_string()))?;
        command.stdin(Stdio::from(pty.slave));
        command.stdout(Stdio::from(slave_out));
        command.stderr(Stdio::from(slave_err));
        set_controlling_tty(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| StreamingError::Spawn(e.to_string()))?;

        let master = PtyMaster::new(pty.master)?;

        let resize_handle = {
            let sizer = master.try_clone()?;
            tokio::spawn(async move {
                while let Some(size) = resize.recv().await {
                    if let Err(e) = sizer.resize(size.height, size.width) {
                        tracing::warn!("unable to set terminal size: {}", e);
                    }
                }
            })
        };

        let stdin_handle = stdin.map(|mut stdin| {
            let writer = match master.try_clone() {
                Ok(writer) => writer,
                Err(e) => {
                    tracing::warn!("cloning pty for stdin: {}", e);
                    return tokio::spawn(async {});
                }
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match stdin.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            if writer.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("stdin copy error: {}", e);
                            break;
                        }
                    }
                }
            })
        });

        let output_handle = stdout.map(|mut stdout| {
            let reader = match master.try_clone() {
                Ok(reader) => reader,
                Err(e) => {
                    tracing::warn!("cloning pty for stdout: {}", e);
                    return tokio::spawn(async {});
                }
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                loop {
                    match reader.read(&mut buf).await {
                        // EIO is the master's EOF once the slave side closes.
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stdout.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                let _ = stdout.shutdown().await;
            })
        });

        let status = child
            .wait()
            .await
            .map_err(|e| StreamingError::Spawn(e.to_string()))?;

        // Let the output drain before tearing the tasks down.
        if let Some(handle) = output_handle {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
        if let Some(handle) = stdin_handle {
            handle.abort();
        }
        resize_handle.abort();

        match status.code() {
            Some(0) => Ok(()),
            code => Err(StreamingError::CommandFailed(code.unwrap_or(-1))),
        }
    }

    async fn exec_piped(
        &self,
        cmd: &[String],
        stdin: Option<StreamIn>,
        stdout: Option<StreamOut>,
        stderr: Option<StreamOut>,
    ) -> Result<(), StreamingError> {
        let mut command = Command::new(&cmd[0]);
        command.args(&cmd[1..]);
        command.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(if stdout.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stderr(if stderr.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let mut child = command
            .spawn()
            .map_err(|e| StreamingError::Spawn(e.to_string()))?;

        let stdin_handle = match (stdin, child.stdin.take()) {
            (Some(mut client), Some(mut pipe)) => Some(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut client, &mut pipe).await {
                    tracing::warn!("stdin copy error: {}", e);
                }
            })),
            _ => None,
        };
        let stdout_handle = match (stdout, child.stdout.take()) {
            (Some(mut client), Some(mut pipe)) => Some(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut pipe, &mut client).await {
                    tracing::warn!("stdout copy error: {}", e);
                }
                let _ = client.shutdown().await;
            })),
            _ => None,
        };
        let stderr_handle = match (stderr, child.stderr.take()) {
            (Some(mut client), Some(mut pipe)) => Some(tokio::spawn(async move {
                if let Err(e) = tokio::io::copy(&mut pipe, &mut client).await {
                    tracing::warn!("stderr copy error: {}", e);
                }
                let _ = client.shutdown().await;
            })),
            _ => None,
        };

        let status = child
            .wait()
            .await
            .map_err(|e| StreamingError::Spawn(e.to_string()))?;

        for handle in [stdout_handle, stderr_handle].into_iter().flatten() {
            let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
        }
        if let Some(handle) = stdin_handle {
            handle.abort();
        }

        match status.code() {
            Some(0) => Ok(()),
            code => Err(StreamingError::CommandFailed(code.unwrap_or(-1))),
        }
    }

    /// Attaching to a running container's terminal is not supported; the
    /// runtime does not keep the subprocess files open for clients.
    pub async fn attach(
        &self,
        _container_id: &str,
        _stdin: Option<StreamIn>,
        _stdout: Option<StreamOut>,
        _stderr: Option<StreamOut>,
        _tty: bool,
    ) -> Result<(), StreamingError> {
        Err(StreamingError::AttachUnsupported)
    }

    /// Tunnel bytes between the client stream and `127.0.0.1:<port>` until
    /// one direction closes; the opposite direction gets one second to
    /// flush.
    pub async fn port_forward<S>(
        &self,
        pod_sandbox_id: &str,
        port: i32,
        stream: S,
    ) -> Result<(), StreamingError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let conn = TcpStream::connect(("127.0.0.1", port as u16))
            .await
            .map_err(|e| StreamingError::Dial(port, e))?;

        let (mut client_read, mut client_write) = tokio::io::split(stream);
        let (mut conn_read, mut conn_write) = conn.into_split();

        let (err_tx, mut err_rx) = mpsc::channel::<Option<std::io::Error>>(2);

        let to_client = err_tx.clone();
        tokio::spawn(async move {
            tracing::trace!("copy data from container port {} to client", port);
            let result = tokio::io::copy(&mut conn_read, &mut client_write).await;
            let _ = client_write.shutdown().await;
            let _ = to_client.send(result.err()).await;
        });
        tokio::spawn(async move {
            tracing::trace!("copy data from client to container port {}", port);
            let result = tokio::io::copy(&mut client_read, &mut conn_write).await;
            let _ = conn_write.shutdown().await;
            let _ = err_tx.send(result.err()).await;
        });

        let mut first_error = err_rx.recv().await.flatten();

        // Give the opposite direction a chance to finish gracefully.
        match tokio::time::timeout(Duration::from_secs(1), err_rx.recv()).await {
            Ok(second) => {
                if first_error.is_none() {
                    first_error = second.flatten();
                }
                tracing::trace!("stopped forwarding in both directions");
            }
            Err(_) => {
                tracing::trace!("timed out waiting to close the connection");
            }
        }

        tracing::debug!(
            "finished port forwarding for {} on port {}",
            pod_sandbox_id,
            port
        );

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

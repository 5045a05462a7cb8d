use crate::error::RuntimeError;
use crate::service::RuntimeService;
use procri_core::ExecSyncRequest;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

const DEFAULT_EXEC_SYNC_TIMEOUT_SECONDS: i64 = 120;

/// Outcome of a synchronous command run. The captured bytes survive even
/// when the deadline killed the child.
#[derive(Debug)]
pub struct ExecSyncResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i32,
    pub timed_out: bool,
}

impl RuntimeService {
    /// Runs a command to completion on the host with a deadline and captured
    /// streams. The command is not entered into any container context.
    pub async fn exec_sync(&self, req: ExecSyncRequest) -> Result<ExecSyncResult, RuntimeError> {
        if req.cmd.is_empty() {
            return Err(RuntimeError::InvalidParameter(format!(
                "exec command empty: {:?}",
                req.cmd
            )));
        }

        let timeout = if req.timeout != 0 {
            req.timeout
        } else {
            DEFAULT_EXEC_SYNC_TIMEOUT_SECONDS
        };

        let mut cmd = Command::new(&req.cmd[0]);
        cmd.args(&req.cmd[1..]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::Spawn(format!("exec {:?}: {}", req.cmd, e)))?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            RuntimeError::Spawn(format!("exec {:?}: no stdout pipe", req.cmd))
        })?;
        let mut stderr = child.stderr.take().ok_or_else(|| {
            RuntimeError::Spawn(format!("exec {:?}: no stderr pipe", req.cmd))
        })?;

        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let deadline = Duration::from_secs(timeout.max(0) as u64);
        let (exit_code, timed_out) =
            match tokio::time::timeout(deadline, child.wait()).await {
                Ok(Ok(status)) => (status.code().unwrap_or(-1), false),
                Ok(Err(e)) => {
                    tracing::warn!("waiting for exec {:?}: {}", req.cmd, e);
                    (-1, false)
                }
                Err(_) => {
                    tracing::error!("ExecSync {:?} timed out after {:?}", req.cmd, deadline);
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    (-1, true)
                }
            };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(ExecSyncResult {
            stdout,
            stderr,
            exit_code,
            timed_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::create_test_service;

    fn exec_req(cmd: &[&str], timeout: i64) -> ExecSyncRequest {
        ExecSyncRequest {
            container_id: String::new(),
            cmd: cmd.iter().map(|c| c.to_string()).collect(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_exec_sync_captures_streams() {
        let (service, _dir) = create_test_service().await;

        let result = service
            .exec_sync(exec_req(&["sh", "-c", "echo out; echo err >&2"], 0))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);
        assert_eq!(result.stdout, b"out\n");
        assert_eq!(result.stderr, b"err\n");
    }

    #[tokio::test]
    async fn test_exec_sync_reports_exit_code() {
        let (service, _dir) = create_test_service().await;

        let result = service
            .exec_sync(exec_req(&["sh", "-c", "exit 3"], 0))
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_exec_sync_deadline_kills_child() {
        let (service, _dir) = create_test_service().await;

        let started = std::time::Instant::now();
        let result = service
            .exec_sync(exec_req(&["sh", "-c", "echo partial; exec sleep 30"], 1))
            .await
            .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stdout, b"partial\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_exec_sync_rejects_empty_command() {
        let (service, _dir) = create_test_service().await;

        let err = service.exec_sync(exec_req(&[], 0)).await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidParameter(_)));
    }
}

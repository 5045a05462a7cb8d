use procri_core::{
    AttachRequest, AttachResponse, ExecRequest, ExecResponse, PortForwardRequest,
    PortForwardResponse,
};
use procri_runtime::StreamingServer;
use std::collections::HashMap;
use std::sync::Mutex;
use tonic::Status;
use uuid::Uuid;

/// A validated streaming request parked until the agent redeems its token.
#[derive(Debug, Clone)]
pub enum StreamRequest {
    Exec(ExecRequest),
    Attach(AttachRequest),
    PortForward(PortForwardRequest),
}

/// Registers exec/attach/port-forward requests and hands out the URLs the
/// external streaming HTTP server serves. That server redeems a token with
/// [`StreamingBridge::take`] when the client upgrades.
pub struct StreamingBridge {
    base_url: String,
    pending: Mutex<HashMap<String, StreamRequest>>,
}

impl StreamingBridge {
    /// `addr` is the host:port the streaming server listens on.
    pub fn new(addr: &str) -> Self {
        Self {
            base_url: format!("http://{}", addr),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn register(&self, kind: &str, request: StreamRequest) -> String {
        let token = Uuid::new_v4().simple().to_string();
        {
            let mut pending = self
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.insert(token.clone(), request);
        }
        format!("{}/{}/{}", self.base_url, kind, token)
    }

    /// Redeem a token. Each token is single-use.
    pub fn take(&self, token: &str) -> Option<StreamRequest> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(token)
    }
}

impl StreamingServer for StreamingBridge {
    fn get_exec(&self, req: &ExecRequest) -> Result<ExecResponse, Status> {
        if req.cmd.is_empty() {
            return Err(Status::invalid_argument("missing required cmd"));
        }
        if req.tty && req.stderr {
            return Err(Status::invalid_argument("tty and stderr cannot both be set"));
        }
        if !req.stdin && !req.stdout && !req.stderr {
            return Err(Status::invalid_argument(
                "one of stdin, stdout, stderr must be set",
            ));
        }

        let url = self.register("exec", StreamRequest::Exec(req.clone()));
        Ok(ExecResponse { url })
    }

    fn get_attach(&self, req: &AttachRequest) -> Result<AttachResponse, Status> {
        if req.tty && req.stderr {
            return Err(Status::invalid_argument("tty and stderr cannot both be set"));
        }
        if !req.stdin && !req.stdout && !req.stderr {
            return Err(Status::invalid_argument(
                "one of stdin, stdout, stderr must be set",
            ));
        }

        let url = self.register("attach", StreamRequest::Attach(req.clone()));
        Ok(AttachResponse { url })
    }

    fn get_port_forward(&self, req: &PortForwardRequest) -> Result<PortForwardResponse, Status> {
        if req.port.is_empty() {
            return Err(Status::invalid_argument("missing required port"));
        }
        if req.port.iter().any(|p| *p <= 0 || *p > 65535) {
            return Err(Status::invalid_argument("port out of range"));
        }

        let url = self.register("portforward", StreamRequest::PortForward(req.clone()));
        Ok(PortForwardResponse { url })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exec_req(cmd: &[&str]) -> ExecRequest {
        ExecRequest {
            container_id: "cnt".to_string(),
            cmd: cmd.iter().map(|c| c.to_string()).collect(),
            tty: false,
            stdin: false,
            stdout: true,
            stderr: false,
        }
    }

    #[test]
    fn test_exec_token_roundtrip() {
        let bridge = StreamingBridge::new("192.0.2.1:8099");

        let resp = bridge.get_exec(&exec_req(&["ls", "-l"])).unwrap();
        assert!(resp.url.starts_with("http://192.0.2.1:8099/exec/"));

        let token = resp.url.rsplit('/').next().unwrap();
        let Some(StreamRequest::Exec(parked)) = bridge.take(token) else {
            panic!("expected parked exec request");
        };
        assert_eq!(parked.cmd, vec!["ls", "-l"]);

        // Tokens are single-use.
        assert!(bridge.take(token).is_none());
    }

    #[test]
    fn test_exec_requires_cmd_and_stream() {
        let bridge = StreamingBridge::new("192.0.2.1:8099");

        assert!(bridge.get_exec(&exec_req(&[])).is_err());

        let mut no_streams = exec_req(&["ls"]);
        no_streams.stdout = false;
        assert!(bridge.get_exec(&no_streams).is_err());

        let mut tty_and_stderr = exec_req(&["ls"]);
        tty_and_stderr.tty = true;
        tty_and_stderr.stderr = true;
        assert!(bridge.get_exec(&tty_and_stderr).is_err());
    }

    #[test]
    fn test_port_forward_validation() {
        let bridge = StreamingBridge::new("192.0.2.1:8099");

        let resp = bridge
            .get_port_forward(&PortForwardRequest {
                pod_sandbox_id: "ns_pod".to_string(),
                port: vec![8080],
            })
            .unwrap();
        assert!(resp.url.contains("/portforward/"));

        assert!(
            bridge
                .get_port_forward(&PortForwardRequest {
                    pod_sandbox_id: "ns_pod".to_string(),
                    port: vec![],
                })
                .is_err()
        );
        assert!(
            bridge
                .get_port_forward(&PortForwardRequest {
                    pod_sandbox_id: "ns_pod".to_string(),
                    port: vec![-1],
                })
                .is_err()
        );
    }
}

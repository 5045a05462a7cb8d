use chrono::{Local, SecondsFormat};
use std::io;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Merges a child's stdout and stderr into one timestamped log file.
///
/// Each complete line becomes `<RFC3339-nano> <stream> F <line>`. The two
/// readers run concurrently until both hit EOF; an unterminated trailing
/// fragment is dropped.
pub(crate) struct LogPipe {
    readers: Vec<JoinHandle<()>>,
}

impl LogPipe {
    pub(crate) async fn new(
        stdout: impl AsyncRead + Unpin + Send + 'static,
        stderr: impl AsyncRead + Unpin + Send + 'static,
        log_path: &str,
    ) -> io::Result<Self> {
        let log = Arc::new(Mutex::new(File::create(log_path).await?));

        let readers = vec![
            tokio::spawn(pipe_stream(stdout, "stdout", log.clone())),
            tokio::spawn(pipe_stream(stderr, "stderr", log)),
        ];

        Ok(Self { readers })
    }

    /// Resolves when both streams have drained.
    pub(crate) async fn wait(self) {
        for reader in self.readers {
            let _ = reader.await;
        }
    }
}

async fn pipe_stream(
    stream: impl AsyncRead + Unpin,
    stream_type: &'static str,
    log: Arc<Mutex<File>>,
) {
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => {
                tracing::trace!("EOF while reading {} from process", stream_type);
                break;
            }
            Ok(_) => {
                if !line.ends_with(b"\n") {
                    // Stream ended mid-line.
                    break;
                }
                let timestamp = Local::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
                let mut entry = format!("{} {} F ", timestamp, stream_type).into_bytes();
                entry.extend_from_slice(&line);

                let mut file = log.lock().await;
                if let Err(e) = file.write_all(&entry).await {
                    tracing::error!("writing {} log line: {}", stream_type, e);
                    break;
                }
            }
            Err(e) => {
                tracing::error!("reading {} from process: {}", stream_type, e);
                break;
            }
        }
    }
}

//! JSON-RPC 2.0 client over the stdio of a `deltachat-rpc-server` process.
//!
//! Requests and responses are newline-delimited JSON. Calls are multiplexed:
//! every request gets an id and a oneshot channel that the reader task
//! completes when the matching response arrives.

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    process::Stdio,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::{Child, ChildStdin, ChildStdout, Command},
    sync::{oneshot, Mutex},
};

use tb_core::{errors::Error, Result};

const STDERR_TAIL_MAX_BYTES: usize = 16 * 1024;
const STDERR_TAIL_MAX_LINES: usize = 200;

#[derive(Clone, Debug, Default)]
struct StderrTail {
    lines: VecDeque<String>,
    bytes: usize,
}

impl StderrTail {
    fn push_line(&mut self, line: String) {
        self.bytes = self.bytes.saturating_add(line.len() + 1);
        self.lines.push_back(line);

        while self.lines.len() > STDERR_TAIL_MAX_LINES || self.bytes > STDERR_TAIL_MAX_BYTES {
            let Some(front) = self.lines.pop_front() else {
                break;
            };
            self.bytes = self.bytes.saturating_sub(front.len() + 1);
        }
    }

    fn snapshot(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}

/// Error object of a JSON-RPC response.
#[derive(Clone, Debug, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: Option<u64>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

type Reply = std::result::Result<Value, RpcError>;
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

pub struct RpcClient {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    pending: Pending,
    next_id: AtomicU64,
    stderr_tail: Arc<Mutex<StderrTail>>,
}

impl RpcClient {
    /// Start `program` with its accounts stored under `accounts_dir`.
    pub async fn spawn(program: &Path, accounts_dir: &Path) -> Result<Arc<Self>> {
        tracing::debug!(program = %program.display(), accounts = %accounts_dir.display(), "starting rpc server");
        let mut child = Command::new(program)
            .env("DC_ACCOUNTS_PATH", accounts_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::External(format!("cannot start {}: {e}", program.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::External("rpc server stdin was not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::External("rpc server stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();

        let client = Arc::new(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            stderr_tail: Arc::new(Mutex::new(StderrTail::default())),
        });

        // Drain stderr in background to avoid blocking on a full pipe.
        if let Some(stderr) = stderr {
            let tail = client.stderr_tail.clone();
            tokio::spawn(async move {
                let mut r = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = r.next_line().await {
                    tracing::trace!(target: "tb_rpc::server", "{line}");
                    tail.lock().await.push_line(line);
                }
            });
        }

        tokio::spawn(read_responses(
            stdout,
            client.pending.clone(),
            client.stderr_tail.clone(),
        ));

        Ok(client)
    }

    /// Issue `method` with positional `params` and wait for its result.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut line = serde_json::to_string(&request(id, method, params))?;
        line.push('\n');
        tracing::trace!(id, method, "rpc request");

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().await.remove(&id);
            return Err(Error::Transport(format!("{method}: writing request failed: {e}")));
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Error::Transport(format!(
                "{method} failed ({}): {}",
                err.code, err.message
            ))),
            Err(_) => {
                let stderr = self.stderr_tail.lock().await.snapshot();
                let mut msg = format!("{method}: rpc server closed the connection");
                if !stderr.trim().is_empty() {
                    msg.push_str("\nstderr (tail):\n");
                    msg.push_str(&stderr);
                }
                Err(Error::Transport(msg))
            }
        }
    }

    /// [`call`](Self::call) and deserialize the result.
    pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| Error::Transport(format!("{method}: unexpected result: {e}")))
    }

    /// Kill and reap the server process.
    pub async fn shutdown(&self) -> Result<()> {
        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return Ok(());
        };
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        child.kill().await?;
        Ok(())
    }
}

fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

async fn read_responses(stdout: ChildStdout, pending: Pending, stderr_tail: Arc<Mutex<StderrTail>>) {
    let mut reader = BufReader::new(stdout).lines();
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!("reading rpc server output failed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let (id, reply) = match parse_response(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("ignoring unparsable rpc output: {e}");
                continue;
            }
        };
        match pending.lock().await.remove(&id) {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => tracing::warn!(id, "rpc response for unknown request"),
        }
    }

    let stderr = stderr_tail.lock().await.snapshot();
    if stderr.trim().is_empty() {
        tracing::warn!("rpc server output closed");
    } else {
        tracing::warn!("rpc server output closed; stderr (tail):\n{stderr}");
    }
    // Dropping the senders fails every call still waiting.
    pending.lock().await.clear();
}

fn parse_response(line: &str) -> Result<(u64, Reply)> {
    let resp: Response = serde_json::from_str(line)?;
    let id = resp
        .id
        .ok_or_else(|| Error::Transport("rpc message without id".to_string()))?;
    let reply = match resp.error {
        Some(err) => Err(err),
        None => Ok(resp.result.unwrap_or(Value::Null)),
    };
    Ok((id, reply))
}

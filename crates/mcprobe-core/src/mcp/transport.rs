use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::VerifyError;
use crate::server::{ServerDescriptor, ServerTransport};

use super::jsonrpc::{Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, METHOD_NOT_FOUND};

const STDERR_TAIL_BYTES: usize = 8 * 1024;
const REAP_TIMEOUT: Duration = Duration::from_secs(2);
const SESSION_ID_HEADER: &str = "mcp-session-id";

// ── Stderr capture ───────────────────────────────────────────────────────────

/// Keeps the last `cap` bytes of a child's stderr, line by line.
#[derive(Clone, Default)]
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.push_back(line);
        let mut size: usize = lines.iter().map(|l| l.len() + 1).sum();
        while size > STDERR_TAIL_BYTES && lines.len() > 1 {
            if let Some(dropped) = lines.pop_front() {
                size -= dropped.len() + 1;
            }
        }
    }

    fn text(&self) -> Option<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        let text = lines.iter().cloned().collect::<Vec<_>>().join("\n");
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

// ── Stdio transport ──────────────────────────────────────────────────────────

pub struct StdioTransport {
    command: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr: StderrTail,
    stderr_task: JoinHandle<()>,
    next_id: u64,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self, VerifyError> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| VerifyError::Connection(format!("failed to spawn '{command}': {e}")))?;

        let missing = |what: &str| VerifyError::Connection(format!("no {what} from MCP process"));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr_pipe = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        let stderr = StderrTail::default();
        let sink = stderr.clone();
        let label = command.to_string();
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr_pipe).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("MCP stdio [{}] stderr: {}", label, line);
                sink.push(line);
            }
        });

        debug!("spawned MCP server '{}' (pid {:?})", command, child.id());
        Ok(Self {
            command: command.to_string(),
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            stderr,
            stderr_task,
            next_id: 1,
        })
    }

    async fn send_line<T: Serialize>(&mut self, message: &T) -> Result<(), VerifyError> {
        let mut line = serde_json::to_string(message)
            .map_err(|e| VerifyError::protocol(format!("failed to encode request: {e}")))?;
        line.push('\n');
        debug!("MCP stdio → {}", line.trim());

        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| VerifyError::Closed("stdin already closed".into()))?;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| VerifyError::Closed(format!("failed to write to server stdin: {e}")))
    }

    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, VerifyError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send_line(&JsonRpcRequest::new(id, method, params)).await?;

        loop {
            let mut buf = String::new();
            let n = self
                .stdout
                .read_line(&mut buf)
                .await
                .map_err(|e| VerifyError::Closed(format!("failed to read server stdout: {e}")))?;
            if n == 0 {
                return Err(self.exited_early(method));
            }
            let trimmed = buf.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!("MCP stdio ← {}", trimmed);

            let raw: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(_) => {
                    warn!("MCP server '{}' wrote non-JSON to stdout: {}", self.command, trimmed);
                    continue;
                }
            };

            match Incoming::classify(raw)? {
                Incoming::Response(resp) => return resp.into_result(id),
                Incoming::Request { id: req_id, method } => {
                    let reply = answer_server_request(req_id, &method);
                    self.send_line(&reply).await?;
                }
                Incoming::Notification { method } => {
                    debug!("MCP stdio notification ignored: {}", method);
                }
            }
        }
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), VerifyError> {
        self.send_line(&JsonRpcNotification::new(method, params)).await
    }

    fn exited_early(&mut self, method: &str) -> VerifyError {
        match self.child.try_wait() {
            Ok(Some(status)) => VerifyError::Closed(format!(
                "server process exited ({status}) while waiting for '{method}'"
            )),
            _ => VerifyError::Closed(format!("server closed stdout while waiting for '{method}'")),
        }
    }

    /// Terminate the child and return whatever it wrote to stderr.
    pub async fn close(mut self) -> Option<String> {
        // EOF on stdin is the polite shutdown signal; the kill follows anyway.
        drop(self.stdin.take());
        if let Err(e) = self.child.start_kill() {
            debug!("MCP server '{}' already gone: {}", self.command, e);
        }
        match tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!("MCP server '{}' reaped ({})", self.command, status),
            Ok(Err(e)) => warn!("failed to reap MCP server '{}': {}", self.command, e),
            Err(_) => warn!("MCP server '{}' did not exit after kill", self.command),
        }
        // Once the child is gone its stderr pipe reaches EOF and the reader ends.
        if tokio::time::timeout(REAP_TIMEOUT, &mut self.stderr_task)
            .await
            .is_err()
        {
            self.stderr_task.abort();
        }
        self.stderr.text()
    }
}

fn answer_server_request(id: Value, method: &str) -> JsonRpcResponse {
    if method == "ping" {
        JsonRpcResponse::ok(id, json!({}))
    } else {
        debug!("rejecting server request '{}'", method);
        JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("method not found: {method}"))
    }
}

// ── Streamable HTTP transport ────────────────────────────────────────────────

/// HTTP transport for remote MCP servers.
///
/// Every JSON-RPC message is POSTed to the endpoint URL. The server answers
/// either with a plain JSON body or with an SSE stream (`text/event-stream`)
/// whose `message` events carry JSON-RPC frames. A session id handed out in
/// the `Mcp-Session-Id` header is echoed on every later request.
pub struct StreamedTransport {
    client: Client,
    url: String,
    headers: HeaderMap,
    session_id: Option<String>,
    next_id: u64,
}

impl StreamedTransport {
    pub fn new(url: &str, headers: &BTreeMap<String, String>) -> Result<Self, VerifyError> {
        let mut map = HeaderMap::new();
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| VerifyError::Connection(format!("invalid header name '{key}'")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| VerifyError::Connection(format!("invalid value for header '{key}'")))?;
            map.insert(name, value);
        }
        map.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        map.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client: Client::new(),
            url: url.to_string(),
            headers: map,
            session_id: None,
            next_id: 1,
        })
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Some(value) = self
            .session_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            headers.insert(SESSION_ID_HEADER, value);
        }
        headers
    }

    async fn post<T: Serialize>(&mut self, body: &T) -> Result<Response, VerifyError> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.request_headers())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    VerifyError::Connection(format!("could not connect to {}: {e}", self.url))
                } else {
                    VerifyError::Connection(format!("request to {} failed: {e}", self.url))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerifyError::Connection(format!(
                "HTTP {} from {}",
                status.as_u16(),
                self.url
            )));
        }
        if let Some(id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if self.session_id.as_deref() != Some(id) {
                debug!("captured MCP session id {}", id);
                self.session_id = Some(id.to_string());
            }
        }
        Ok(response)
    }

    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, VerifyError> {
        let id = self.next_id;
        self.next_id += 1;
        debug!("MCP HTTP → POST {} {}", self.url, method);
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if !is_sse {
            let raw: Value = response
                .json()
                .await
                .map_err(|e| VerifyError::protocol(format!("invalid JSON response: {e}")))?;
            debug!("MCP HTTP ← {}", raw);
            return match Incoming::classify(raw)? {
                Incoming::Response(resp) => resp.into_result(id),
                _ => Err(VerifyError::protocol(format!(
                    "expected a response to '{method}', got a server message"
                ))),
            };
        }

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::default();
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| VerifyError::Closed(format!("event stream failed: {e}")))?;

            for block in decoder.push(&bytes)? {
                let Some(data) = sse_message_data(&block) else {
                    continue;
                };
                debug!("MCP SSE ← {}", data);
                let raw: Value = match serde_json::from_str(&data) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("skipping undecodable SSE event: {}", e);
                        continue;
                    }
                };
                match Incoming::classify(raw)? {
                    Incoming::Response(resp) => return resp.into_result(id),
                    Incoming::Request { id: req_id, method } => {
                        let reply = answer_server_request(req_id, &method);
                        self.post(&reply).await?;
                    }
                    Incoming::Notification { method } => {
                        debug!("MCP SSE notification ignored: {}", method);
                    }
                }
            }
        }

        Err(VerifyError::Closed(format!(
            "event stream ended without a response to '{method}' (id={id})"
        )))
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), VerifyError> {
        debug!("MCP HTTP notify → {} {}", self.url, method);
        self.post(&JsonRpcNotification::new(method, params)).await?;
        Ok(())
    }

    /// End the server-side session, if one was opened.
    pub async fn close(self) -> Option<String> {
        if self.session_id.is_some() {
            let result = self
                .client
                .delete(&self.url)
                .headers(self.request_headers())
                .timeout(REAP_TIMEOUT)
                .send()
                .await;
            if let Err(e) = result {
                debug!("MCP session DELETE to {} failed: {}", self.url, e);
            }
        }
        None
    }
}

/// Splits a raw SSE byte stream into event blocks. Bytes are buffered until
/// a blank line ends the event, so UTF-8 sequences and CRLF pairs split
/// across network chunks decode intact.
#[derive(Default)]
struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, VerifyError> {
        self.buf.extend_from_slice(chunk);
        let mut blocks = Vec::new();
        while let Some((end, delimiter)) = event_end(&self.buf) {
            let block: Vec<u8> = self.buf.drain(..end + delimiter).take(end).collect();
            let text = String::from_utf8(block)
                .map_err(|e| VerifyError::protocol(format!("event stream is not UTF-8: {e}")))?;
            blocks.push(text);
        }
        Ok(blocks)
    }
}

const EVENT_DELIMITERS: [&[u8]; 4] = [b"\r\n\r\n", b"\n\r\n", b"\n\n", b"\r\r"];

/// Position and length of the first blank line in `buf`.
fn event_end(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        EVENT_DELIMITERS
            .iter()
            .find(|d| rest.starts_with(d))
            .map(|d| (i, d.len()))
    })
}

/// Join the `data:` lines of one SSE event block. Events with an explicit
/// type other than `message` are dropped.
fn sse_message_data(block: &str) -> Option<String> {
    let mut data: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;
    for line in block.lines() {
        if line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
            None => (line, ""),
        };
        match field {
            "data" => data.push(value),
            "event" => event_type = Some(value),
            _ => {}
        }
    }
    if data.is_empty() || event_type.is_some_and(|t| t != "message") {
        return None;
    }
    Some(data.join("\n"))
}

// ── Unified transport enum ───────────────────────────────────────────────────

pub enum Transport {
    Stdio(Box<StdioTransport>),
    Streamed(StreamedTransport),
}

impl Transport {
    /// Spawn the process or prepare the HTTP client for `descriptor`.
    pub fn open(descriptor: &ServerDescriptor) -> Result<Self, VerifyError> {
        match &descriptor.transport {
            ServerTransport::Stdio { command, args, env } => Ok(Self::Stdio(Box::new(
                StdioTransport::spawn(command, args, env)?,
            ))),
            ServerTransport::Streamed { url, headers } => {
                Ok(Self::Streamed(StreamedTransport::new(url, headers)?))
            }
        }
    }

    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, VerifyError> {
        match self {
            Self::Stdio(t) => t.request(method, params).await,
            Self::Streamed(t) => t.request(method, params).await,
        }
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), VerifyError> {
        match self {
            Self::Stdio(t) => t.notify(method, params).await,
            Self::Streamed(t) => t.notify(method, params).await,
        }
    }

    pub async fn close(self) -> Option<String> {
        match self {
            Self::Stdio(t) => t.close().await,
            Self::Streamed(t) => t.close().await,
        }
    }
}

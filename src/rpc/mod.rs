//! Synchronous JSON-RPC client for an out-of-process language server.
//!
//! Single-threaded and cooperative: every request writes a framed message
//! then blocks reading the reply. No async runtime is used here — this
//! component is a synchronous request/response peer, matching the
//! concurrency model of the rest of the indexer.
//!
//! Grounded in the distilled source's `lsp_client.py`: `Content-Length`
//! framing over subprocess pipes, the `initialize`/`initialized` handshake,
//! and the graceful `shutdown` + `exit` + timeout + kill teardown sequence.

use crate::error::{RpcError, RpcResult};
use crate::model::Location;
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

/// Lifecycle of the RPC client, mirroring the LSP handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Spawned,
    Initializing,
    Ready,
    Stopped,
}

pub struct LanguageServerClient {
    command: String,
    args: Vec<String>,
    probe_timeout: Duration,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    next_id: i64,
    state: ClientState,
    workspace_root: String,
}

impl LanguageServerClient {
    pub fn new(command: impl Into<String>, args: Vec<String>, probe_timeout: Duration, workspace_root: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args,
            probe_timeout,
            child: None,
            stdin: None,
            stdout: None,
            next_id: 0,
            state: ClientState::Stopped,
            workspace_root: workspace_root.into(),
        }
    }

    /// Run a version probe of the configured command with a timeout.
    /// Failure is not an error: it simply means Pass 2 is unavailable.
    pub fn is_available(&self) -> bool {
        let mut command = Command::new(&self.command);
        command.arg("--version").stdout(Stdio::null()).stderr(Stdio::null());

        let Ok(mut child) = command.spawn() else {
            return false;
        };
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return status.success(),
                Ok(None) => {
                    if start.elapsed() > self.probe_timeout {
                        let _ = child.kill();
                        return false;
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(_) => return false,
            }
        }
    }

    /// Spawn the language server and perform the `initialize`/`initialized` handshake.
    pub fn start(&mut self) -> RpcResult<bool> {
        if !self.is_available() {
            return Ok(false);
        }

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RpcError::Spawn {
                command: self.command.clone(),
                source,
            })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        self.state = ClientState::Spawned;

        self.state = ClientState::Initializing;
        let params = json!({
            "processId": std::process::id(),
            "rootUri": format!("file://{}", self.workspace_root),
            "capabilities": {},
        });
        let response = self.request("initialize", params)?;
        if response.is_none() {
            self.state = ClientState::Stopped;
            return Ok(false);
        }

        self.notify("initialized", json!({}))?;
        self.state = ClientState::Ready;
        Ok(true)
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// `textDocument/didOpen` notification, sent once per file URI before
    /// queries against it.
    pub fn did_open(&mut self, uri: &str, text: &str) -> RpcResult<()> {
        if self.state != ClientState::Ready {
            return Ok(());
        }
        self.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": uri,
                    "languageId": "python",
                    "version": 1,
                    "text": text,
                }
            }),
        )
    }

    /// `textDocument/definition`: a result array is reduced to its first element.
    pub fn definition(&mut self, uri: &str, line: u32, character: u32) -> RpcResult<Option<Location>> {
        if self.state != ClientState::Ready {
            return Ok(None);
        }
        let response = self.request(
            "textDocument/definition",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": line, "character": character},
            }),
        )?;
        Ok(response.and_then(|r| r.get("result").cloned()).and_then(parse_location))
    }

    /// `textDocument/hover`: a signature string extracted from `contents`,
    /// regardless of whether it arrives as a bare string, a `{value}`
    /// object, or a list of either.
    pub fn hover(&mut self, uri: &str, line: u32, character: u32) -> RpcResult<Option<String>> {
        if self.state != ClientState::Ready {
            return Ok(None);
        }
        let response = self.request(
            "textDocument/hover",
            json!({
                "textDocument": {"uri": uri},
                "position": {"line": line, "character": character},
            }),
        )?;
        Ok(response
            .and_then(|r| r.get("result").cloned())
            .and_then(parse_hover))
    }

    /// Graceful shutdown: `shutdown` then `exit`, wait up to 5 seconds, then
    /// force-terminate. Always attempted on `Drop` as well.
    pub fn shutdown(&mut self) {
        if self.state == ClientState::Stopped {
            return;
        }
        if self.state == ClientState::Ready {
            let _ = self.request("shutdown", Value::Null);
            let _ = self.notify("exit", Value::Null);
        }

        if let Some(mut child) = self.child.take() {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                match child.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() >= deadline => {
                        let _ = child.kill();
                        break;
                    }
                    Ok(None) => std::thread::sleep(Duration::from_millis(25)),
                    Err(_) => break,
                }
            }
        }
        self.stdin = None;
        self.stdout = None;
        self.state = ClientState::Stopped;
    }

    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn request(&mut self, method: &str, params: Value) -> RpcResult<Option<Value>> {
        let id = self.next_id();
        let message = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        if self.write_message(&message).is_err() {
            self.state = ClientState::Stopped;
            return Ok(None);
        }
        match self.read_message() {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                self.state = ClientState::Stopped;
                Ok(None)
            }
            Err(e) => {
                self.state = ClientState::Stopped;
                Err(e)
            }
        }
    }

    fn notify(&mut self, method: &str, params: Value) -> RpcResult<()> {
        let message = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
        });
        if self.write_message(&message).is_err() {
            self.state = ClientState::Stopped;
        }
        Ok(())
    }

    fn write_message(&mut self, message: &Value) -> std::io::Result<()> {
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(std::io::Error::other("no stdin pipe"));
        };
        let body = serde_json::to_vec(message)?;
        write!(stdin, "Content-Length: {}\r\n\r\n", body.len())?;
        stdin.write_all(&body)?;
        stdin.flush()
    }

    /// Reads one framed message: headers terminated by a blank line, then
    /// exactly `Content-Length` bytes of JSON body. Unrecognized headers are
    /// read and discarded.
    fn read_message(&mut self) -> RpcResult<Option<Value>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };

        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let bytes_read = stdout.read_line(&mut line)?;
            if bytes_read == 0 {
                return Ok(None); // EOF
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            if let Some(value) = trimmed.strip_prefix("Content-Length:") {
                content_length = value
                    .trim()
                    .parse::<usize>()
                    .map(Some)
                    .map_err(|e| RpcError::MalformedResponse(e.to_string()))?;
            }
        }

        let Some(len) = content_length else {
            return Err(RpcError::MalformedResponse("missing Content-Length header".to_string()));
        };

        let mut body = vec![0u8; len];
        stdout.read_exact(&mut body)?;
        let value: Value = serde_json::from_slice(&body)
            .map_err(|e| RpcError::MalformedResponse(e.to_string()))?;
        Ok(Some(value))
    }
}

impl Drop for LanguageServerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parse_location(result: Value) -> Option<Location> {
    let result = match result {
        Value::Array(mut arr) => {
            if arr.is_empty() {
                return None;
            }
            arr.remove(0)
        }
        Value::Null => return None,
        other => other,
    };

    let uri = result.get("uri")?.as_str()?.to_string();
    let start = result.get("range")?.get("start")?;
    let line = start.get("line")?.as_u64()? as u32;
    let character = start.get("character")?.as_u64()? as u32;
    Some(Location { uri, line, character })
}

fn parse_hover(result: Value) -> Option<String> {
    let contents = result.get("contents")?;
    match contents {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("value").and_then(|v| v.as_str()).map(str::to_string),
        Value::Array(items) => items.first().and_then(|first| match first {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("value").and_then(|v| v.as_str()).map(str::to_string),
            _ => None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_location_takes_first_of_array() {
        let result = json!([
            {"uri": "file:///a.py", "range": {"start": {"line": 3, "character": 5}}},
            {"uri": "file:///b.py", "range": {"start": {"line": 0, "character": 0}}}
        ]);
        let loc = parse_location(result).unwrap();
        assert_eq!(loc.uri, "file:///a.py");
        assert_eq!(loc.line, 3);
        assert_eq!(loc.character, 5);
    }

    #[test]
    fn parse_location_on_empty_array_is_none() {
        assert!(parse_location(json!([])).is_none());
    }

    #[test]
    fn parse_hover_handles_bare_string() {
        let result = json!({"contents": "def add(x: int, y: int) -> int"});
        assert_eq!(parse_hover(result).unwrap(), "def add(x: int, y: int) -> int");
    }

    #[test]
    fn parse_hover_handles_value_object() {
        let result = json!({"contents": {"value": "sig"}});
        assert_eq!(parse_hover(result).unwrap(), "sig");
    }

    #[test]
    fn parse_hover_handles_list_of_objects() {
        let result = json!({"contents": [{"value": "sig"}, "ignored"]});
        assert_eq!(parse_hover(result).unwrap(), "sig");
    }

    #[test]
    fn client_rejects_requests_before_ready() {
        let mut client = LanguageServerClient::new("nonexistent-lsp-binary", vec![], Duration::from_millis(50), "/tmp");
        assert_eq!(client.state(), ClientState::Stopped);
        assert!(client.definition("file:///a.py", 0, 0).unwrap().is_none());
        assert!(client.hover("file:///a.py", 0, 0).unwrap().is_none());
    }

    #[test]
    fn is_available_is_false_for_missing_binary() {
        let client = LanguageServerClient::new("definitely-not-a-real-binary-xyz", vec![], Duration::from_millis(200), "/tmp");
        assert!(!client.is_available());
    }
}

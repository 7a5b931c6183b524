//! Newline-delimited JSON over a child process's stdio.
//!
//! One reader thread turns the child's stdout into lines for the
//! receive callback; a second thread drains stderr into tracing so
//! server logs never interleave with protocol JSON. Writes are
//! mutex-serialized and flushed per message.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use drover_core::{Error, ErrorKind, Result};

pub type ReceiveCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Transport seam between the session and the outside world. The stdio
/// implementation below is the production one; tests use an in-process
/// script.
pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<()>;
    fn disconnect(&self);
    fn is_connected(&self) -> bool;
    fn send(&self, message: &str) -> Result<()>;
    fn set_receive_callback(&self, callback: ReceiveCallback);
    fn set_error_callback(&self, callback: ErrorCallback);
}

/// Child-process launch parameters.
#[derive(Debug, Clone, Default)]
pub struct StdioConfig {
    /// Command to execute (e.g. "npx", "python").
    pub command: String,
    pub args: Vec<String>,
    /// When set, replaces the inherited environment entirely.
    pub env: Option<HashMap<String, String>>,
}

pub struct StdioTransport {
    config: StdioConfig,
    connected: Arc<AtomicBool>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    stderr_drain: Mutex<Option<JoinHandle<()>>>,
    receive_callback: Arc<Mutex<Option<ReceiveCallback>>>,
    error_callback: Arc<Mutex<Option<ErrorCallback>>>,
}

impl StdioTransport {
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            connected: Arc::new(AtomicBool::new(false)),
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            reader: Mutex::new(None),
            stderr_drain: Mutex::new(None),
            receive_callback: Arc::new(Mutex::new(None)),
            error_callback: Arc::new(Mutex::new(None)),
        }
    }
}

impl Transport for StdioTransport {
    fn connect(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::McpTransportFailed, "already connected"));
        }

        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(env) = &self.config.env {
            command.env_clear().envs(env);
        }

        let mut child = command.spawn().map_err(|e| {
            Error::new(
                ErrorKind::McpTransportFailed,
                format!("failed to spawn subprocess: {e}"),
            )
            .with_context(self.config.command.clone())
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            Error::new(ErrorKind::McpTransportFailed, "subprocess stdin not available")
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            Error::new(ErrorKind::McpTransportFailed, "subprocess stdout not available")
        })?;
        let stderr = child.stderr.take();

        self.connected.store(true, Ordering::Release);
        *self.stdin.lock().unwrap() = Some(stdin);
        *self.child.lock().unwrap() = Some(child);

        let connected = Arc::clone(&self.connected);
        let receive_callback = Arc::clone(&self.receive_callback);
        let error_callback = Arc::clone(&self.error_callback);
        let reader = std::thread::Builder::new()
            .name("mcp-stdio-reader".into())
            .spawn(move || {
                let mut lines = BufReader::new(stdout);
                let mut line = String::new();
                loop {
                    line.clear();
                    match lines.read_line(&mut line) {
                        Ok(0) | Err(_) => break, // EOF or read error
                        Ok(_) => {
                            let trimmed = line.trim_end_matches(['\n', '\r']);
                            if trimmed.is_empty() {
                                continue;
                            }
                            if let Some(callback) = receive_callback.lock().unwrap().as_ref() {
                                callback(trimmed);
                            }
                        }
                    }
                }
                // A clean disconnect flips the flag first; if it is
                // still set, the process died on us.
                if connected.swap(false, Ordering::AcqRel) {
                    warn!("MCP subprocess exited unexpectedly");
                    if let Some(callback) = error_callback.lock().unwrap().as_ref() {
                        callback("subprocess exited unexpectedly");
                    }
                }
            })
            .map_err(|e| {
                Error::new(ErrorKind::McpTransportFailed, format!("failed to spawn reader: {e}"))
            })?;
        *self.reader.lock().unwrap() = Some(reader);

        if let Some(stderr) = stderr {
            let command = self.config.command.clone();
            let drain = std::thread::Builder::new()
                .name("mcp-stdio-stderr".into())
                .spawn(move || {
                    for line in BufReader::new(stderr).lines() {
                        match line {
                            Ok(line) if !line.is_empty() => {
                                debug!(server = %command, "{line}");
                            }
                            Ok(_) => {}
                            Err(_) => break,
                        }
                    }
                });
            if let Ok(handle) = drain {
                *self.stderr_drain.lock().unwrap() = Some(handle);
            }
        }

        debug!(command = %self.config.command, "MCP transport connected");
        Ok(())
    }

    fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }

        // Dropping stdin closes the pipe, the usual shutdown signal for
        // stdio servers; kill covers the ones that ignore it.
        *self.stdin.lock().unwrap() = None;
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(reader) = self.reader.lock().unwrap().take() {
            let _ = reader.join();
        }
        if let Some(drain) = self.stderr_drain.lock().unwrap().take() {
            let _ = drain.join();
        }
        debug!(command = %self.config.command, "MCP transport disconnected");
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, message: &str) -> Result<()> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::McpTransportFailed, "not connected"));
        }

        let mut stdin = self.stdin.lock().unwrap();
        let Some(stdin) = stdin.as_mut() else {
            return Err(Error::new(
                ErrorKind::McpTransportFailed,
                "subprocess stdin not available",
            ));
        };

        stdin
            .write_all(message.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush())
            .map_err(|e| {
                Error::new(
                    ErrorKind::McpTransportFailed,
                    format!("failed to write to subprocess stdin: {e}"),
                )
            })
    }

    fn set_receive_callback(&self, callback: ReceiveCallback) {
        *self.receive_callback.lock().unwrap() = Some(callback);
    }

    fn set_error_callback(&self, callback: ErrorCallback) {
        *self.error_callback.lock().unwrap() = Some(callback);
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

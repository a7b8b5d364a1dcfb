//! Text-request server over a Unix stream socket.
//!
//! One JSON line per request (`{"prompt": "..."}`), one JSON line reply
//! (`{"response": "..."}` on success, `{"error": "..."}` on failure).
//! Each client is handled on its own thread; the accept loop polls a
//! shutdown flag so SIGINT stops the server cleanly.

use crate::error::{Result, VoxError};
use crate::pipeline::Pipeline;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// A single text request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRequest {
    pub prompt: String,
}

/// Reply line: exactly one of `response` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextReply {
    Ok { response: String },
    Err { error: String },
}

impl TextReply {
    /// Serialize the reply to a JSON line (newline included).
    pub fn to_json_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"error":"internal serialization failure"}"#.to_string()
        });
        line.push('\n');
        line
    }
}

/// Binds the socket, then serves until `shutdown` is set.
///
/// The socket file is unlinked on bind (stale socket) and again on exit;
/// its mode is set to 0660.
pub fn run(
    socket_path: &Path,
    pipeline: Arc<Pipeline>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path).map_err(|e| VoxError::Socket {
            message: format!("failed to remove stale socket: {e}"),
        })?;
    }

    let listener = UnixListener::bind(socket_path).map_err(|e| VoxError::Socket {
        message: format!("failed to bind {}: {e}", socket_path.display()),
    })?;
    listener.set_nonblocking(true).map_err(|e| VoxError::Socket {
        message: format!("failed to set nonblocking: {e}"),
    })?;

    // Group-accessible socket; systemd units usually tighten this further.
    if let Err(e) =
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o660))
    {
        log::warn!("failed to set socket permissions: {e}");
    }

    log::info!("server listening on {}", socket_path.display());

    while !shutdown.load(Ordering::Acquire) && pipeline.is_running() {
        match listener.accept() {
            Ok((stream, _)) => {
                let pipeline = Arc::clone(&pipeline);
                let spawned = thread::Builder::new()
                    .name("client".to_string())
                    .spawn(move || handle_client(stream, &pipeline));
                if let Err(e) = spawned {
                    log::error!("failed to spawn client thread: {e}");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                let _ = std::fs::remove_file(socket_path);
                return Err(VoxError::Socket {
                    message: format!("accept failed: {e}"),
                });
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    log::info!("server stopped");
    Ok(())
}

fn handle_client(mut stream: UnixStream, pipeline: &Pipeline) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(10)));

    let mut line = String::new();
    {
        let mut reader = BufReader::new(&stream);
        if reader.read_line(&mut line).is_err() || line.trim().is_empty() {
            return;
        }
    }

    let reply = match process_request_line(&line, pipeline) {
        Ok(response) => TextReply::Ok { response },
        Err(e) => TextReply::Err {
            error: e.to_string(),
        },
    };

    if stream
        .write_all(reply.to_json_line().as_bytes())
        .and_then(|()| stream.flush())
        .is_err()
    {
        log::warn!("client disconnected before reply");
    }
}

fn process_request_line(line: &str, pipeline: &Pipeline) -> Result<String> {
    let request: TextRequest =
        serde_json::from_str(line.trim()).map_err(|_| VoxError::Socket {
            message: "malformed request".to_string(),
        })?;
    if request.prompt.is_empty() {
        return Err(VoxError::Socket {
            message: "missing prompt".to_string(),
        });
    }
    pipeline.process_text_input(&request.prompt)
}

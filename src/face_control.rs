//! Face-control socket listener.
//!
//! A tiny Unix stream socket endpoint owned by the TTS worker. Each
//! connection carries one command line - `face_show`, `face_hide` or
//! `face_toggle` - which updates the atomic face-display flag that decides
//! whether synthesis emits phoneme timings.

use crate::error::{Result, VoxError};
use std::io::{BufRead, BufReader};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Accept-loop listener updating the shared face-display flag.
pub struct FaceControlListener {
    socket_path: PathBuf,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FaceControlListener {
    /// Binds the socket (removing any stale file) and starts the accept
    /// thread.
    pub fn start(socket_path: impl Into<PathBuf>, flag: Arc<AtomicBool>) -> Result<Self> {
        let socket_path = socket_path.into();

        if socket_path.exists() {
            std::fs::remove_file(&socket_path).map_err(|e| VoxError::Socket {
                message: format!("failed to remove stale socket: {e}"),
            })?;
        }

        let listener = UnixListener::bind(&socket_path).map_err(|e| VoxError::Socket {
            message: format!("failed to bind {}: {e}", socket_path.display()),
        })?;
        listener.set_nonblocking(true).map_err(|e| VoxError::Socket {
            message: format!("failed to set nonblocking: {e}"),
        })?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let accept_shutdown = Arc::clone(&shutdown);

        let thread = thread::Builder::new()
            .name("face-control".to_string())
            .spawn(move || accept_loop(listener, flag, accept_shutdown))
            .map_err(|e| VoxError::Socket {
                message: format!("failed to spawn face-control thread: {e}"),
            })?;

        log::info!("face control listening on {}", socket_path.display());

        Ok(Self {
            socket_path,
            shutdown,
            thread: Some(thread),
        })
    }

    /// Stops the accept thread and removes the socket file. Idempotent.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::Release);
        let _ = thread.join();
        let _ = std::fs::remove_file(&self.socket_path);
    }

    /// The socket path the listener is bound to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for FaceControlListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn accept_loop(listener: UnixListener, flag: Arc<AtomicBool>, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _)) => handle_connection(stream, &flag),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::error!("face control accept failed: {e}");
                thread::sleep(Duration::from_millis(200));
            }
        }
    }
}

fn handle_connection(stream: UnixStream, flag: &AtomicBool) {
    let _ = stream.set_read_timeout(Some(Duration::from_millis(500)));
    let mut line = String::new();
    if BufReader::new(stream).read_line(&mut line).is_err() {
        return;
    }
    apply_command(line.trim(), flag);
}

fn apply_command(command: &str, flag: &AtomicBool) {
    match command {
        "face_show" => {
            flag.store(true, Ordering::Release);
            log::info!("face display enabled");
        }
        "face_hide" => {
            flag.store(false, Ordering::Release);
            log::info!("face display disabled");
        }
        "face_toggle" => {
            let now = !flag.fetch_xor(true, Ordering::AcqRel);
            log::info!("face display toggled to {now}");
        }
        other => {
            log::warn!("unknown face control command: {other:?}");
        }
    }
}

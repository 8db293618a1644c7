//! Control socket
//!
//! A Unix stream socket that accepts a bare effect id per connection, e.g.
//! `echo 3 | socat - UNIX-CONNECT:$XDG_RUNTIME_DIR/mx4hyprland.sock`.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

use crate::config::{runtime_dir, APP_NAME};
use crate::haptic::EffectSink;

/// Largest accepted message
const MAX_MESSAGE_SIZE: usize = 128;

/// Default control socket path
pub fn default_socket_path() -> PathBuf {
    runtime_dir().join(format!("{}.sock", APP_NAME))
}

/// Parse an effect id from the first token of a message
pub fn parse_command(message: &str) -> Option<i32> {
    let token = message
        .split(|c: char| c == ' ' || c == '\r' || c == '\n')
        .next()
        .unwrap_or_default();
    if token.starts_with('+') {
        return None;
    }
    token.parse().ok()
}

/// Bound control socket; the file is removed on drop
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
    sink: Arc<dyn EffectSink>,
}

impl IpcServer {
    /// Remove a stale socket file, bind and restrict to the owner
    pub fn bind(path: impl Into<PathBuf>, sink: Arc<dyn EffectSink>) -> io::Result<Self> {
        let path = path.into();
        if path.exists() {
            fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))?;
        tracing::info!(path = %path.display(), "IPC listening");

        Ok(Self {
            listener,
            path,
            sink,
        })
    }

    /// Filesystem path of the bound socket
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept clients one at a time, forever
    pub async fn run(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => self.handle_client(stream).await,
                Err(e) => tracing::error!(error = %e, "Accept failed"),
            }
        }
    }

    async fn handle_client(&self, mut stream: UnixStream) {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let len = match stream.read(&mut buffer).await {
            Ok(0) => return,
            Ok(len) => len,
            Err(e) => {
                tracing::debug!(error = %e, "IPC read failed");
                return;
            }
        };

        let message = String::from_utf8_lossy(&buffer[..len]);
        match parse_command(&message) {
            Some(effect_id) => {
                tracing::debug!(effect_id, "IPC trigger");
                self.sink.trigger(effect_id);
            }
            None => tracing::debug!(message = %message.trim_end(), "Received unknown IPC command"),
        }
    }

    /// Run on the tokio runtime; dropping the returned server removes the socket
    pub fn spawn(self) -> (Arc<Self>, JoinHandle<()>) {
        let server = Arc::new(self);
        let task = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.run().await })
        };
        (server, task)
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove IPC socket"
                );
            }
        }
    }
}

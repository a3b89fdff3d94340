//! Control-socket wire format: one JSON object per line in each direction.
//!
//! ```text
//! → {"cmd":"sync","mode":"dry_run"}
//! ← {"ok":true,"data":{"commit_id":"…","outcomes":[…]}}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use deploydb_sync::PassMode;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// Attempts `request_status` makes while a starting daemon binds its socket.
const STATUS_ATTEMPTS: u32 = 5;
const STATUS_BACKOFF: Duration = Duration::from_millis(100);

/// A control command, tagged by `cmd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    /// Runtime snapshot ([`crate::DaemonStatus`]).
    Status,
    /// Run a pass now and return its report.
    Sync {
        #[serde(default)]
        mode: PassMode,
    },
    /// Stop the loop once the current pass finishes.
    Stop,
}

/// Reply to one [`DaemonRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// The payload of a successful reply; a daemon-side failure becomes
    /// [`DaemonError::Protocol`].
    pub fn into_data(self) -> Result<Value, DaemonError> {
        if self.ok {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        let message = self
            .error
            .unwrap_or_else(|| "daemon reported a failure without a message".to_string());
        Err(DaemonError::Protocol(message))
    }
}

/// Send `request` to the daemon for `home` and wait for its reply.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    let stream = connect(&socket)?;

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    (&stream)
        .write_all(&line)
        .map_err(|e| io_err(&socket, e))?;

    let reply = BufReader::new(&stream)
        .lines()
        .next()
        .transpose()
        .map_err(|e| io_err(&socket, e))?
        .ok_or_else(|| {
            DaemonError::Protocol("daemon closed the connection without replying".to_string())
        })?;
    Ok(serde_json::from_str(&reply)?)
}

/// Runtime snapshot of the daemon. A daemon that is still binding its
/// socket gets a few short retries before it is reported as not running.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let mut attempt = 1;
    loop {
        match send_request(home, &DaemonRequest::Status) {
            Ok(response) => return response.into_data(),
            Err(DaemonError::DaemonNotRunning { .. }) if attempt < STATUS_ATTEMPTS => {
                attempt += 1;
                sleep(STATUS_BACKOFF);
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    send_request(home, &DaemonRequest::Stop)?.into_data()?;
    Ok(())
}

/// Ask the daemon to run a pass now; returns the pass report.
pub fn request_sync(home: &Path, mode: PassMode) -> Result<Value, DaemonError> {
    send_request(home, &DaemonRequest::Sync { mode })?.into_data()
}

fn connect(socket: &Path) -> Result<UnixStream, DaemonError> {
    let not_running = || DaemonError::DaemonNotRunning {
        socket: socket.to_path_buf(),
    };
    if !socket.exists() {
        return Err(not_running());
    }
    UnixStream::connect(socket).map_err(|err| match err.kind() {
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
            not_running()
        }
        _ => io_err(socket, err),
    })
}

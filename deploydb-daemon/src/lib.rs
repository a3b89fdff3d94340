//! Unattended deployment: a poll loop with a bounded retry budget plus a
//! Unix control socket.

mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{
    request_status, request_stop, request_sync, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{
    init_tracing, run, start_blocking, start_blocking_with_config, DaemonStatus, LoopExit,
    PassRunner, RetryCounter,
};

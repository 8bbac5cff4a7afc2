//! The terminal error taxonomy.
//!
//! Every request ends with exactly one of these status codes; none of them
//! is retried by the core. Scheduler-level failures are not represented
//! here — an error escaping a top-level task aborts the run via
//! `gridsim_kernel::SimAbort`.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Terminal status of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    /// Admission rejected: queue full or instance not accepting.
    ConnectionClosed,
    /// No instance available at the load balancer.
    ConnectionRefused,
    /// Instance died during processing or queue drain.
    ServerDown,
    /// Unhandled endpoint failure.
    ServerError,
    /// The client-side timer won the race.
    Timeout,
    /// Terminal success.
    Succeed,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::ConnectionClosed => "CONNECTION_CLOSED",
            StatusCode::ConnectionRefused => "CONNECTION_REFUSED",
            StatusCode::ServerDown => "SERVER_DOWN",
            StatusCode::ServerError => "SERVER_ERROR",
            StatusCode::Timeout => "TIMEOUT",
            StatusCode::Succeed => "SUCCEED",
        };
        f.write_str(s)
    }
}

/// A simulated-domain failure flowing through promises and request
/// contexts. All variants are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SimFault {
    /// A request-level failure carrying its terminal status.
    #[error("request failed: {0}")]
    Status(StatusCode),
    /// The owning instance's alive signal won a race against the
    /// operation. Surfaces to endpoint handlers, which map it to
    /// [`StatusCode::ServerDown`].
    #[error("instance terminated during processing")]
    InstanceDown,
}

impl SimFault {
    /// The status code this fault reports on a request context.
    pub fn code(&self) -> StatusCode {
        match self {
            SimFault::Status(code) => *code,
            SimFault::InstanceDown => StatusCode::ServerDown,
        }
    }
}

pub type SimResult<T> = Result<T, SimFault>;

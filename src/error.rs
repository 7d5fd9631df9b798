//! Errors that abort an exchange.

use crate::artifact::ArtifactError;
use crate::endpoint::Endpoint;
use crate::readiness::WaitError;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// A blocking step that can time out or be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOp {
    Accept,
    Connect,
    Send,
    Receive,
}

impl fmt::Display for WaitOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitOp::Accept => f.write_str("accept"),
            WaitOp::Connect => f.write_str("connect"),
            WaitOp::Send => f.write_str("send"),
            WaitOp::Receive => f.write_str("receive"),
        }
    }
}

/// Every way an exchange can fail.
///
/// None of these are retried. By the time one is returned the connection
/// and any file handles have already been released.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    #[error("failed to receive payload: {0}")]
    Receive(#[source] io::Error),

    #[error("failed to send payload: {0}")]
    Send(#[source] io::Error),

    #[error("request artifact {0} is unavailable")]
    RequestUnavailable(String),

    #[error("reply artifact {0} is unavailable")]
    ReplyUnavailable(String),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("{0} timed out")]
    Timeout(WaitOp),

    #[error("{0} was cancelled")]
    Cancelled(WaitOp),

    #[error("failed to set up readiness poller: {0}")]
    Poller(#[source] io::Error),

    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    /// The exchange already ran on this listener or connector.
    #[error("exchange already completed; create a new instance")]
    Closed,
}

impl ExchangeError {
    /// Map a failed readiness wait onto the step that was waiting.
    ///
    /// A connect has no io variant of its own here because its failures
    /// carry the endpoint; the connector maps those before calling this.
    pub(crate) fn from_wait(err: WaitError, op: WaitOp) -> Self {
        match err {
            WaitError::TimedOut => ExchangeError::Timeout(op),
            WaitError::Cancelled => ExchangeError::Cancelled(op),
            WaitError::Io(e) => match op {
                WaitOp::Accept => ExchangeError::Accept(e),
                WaitOp::Connect => ExchangeError::Poller(e),
                WaitOp::Send => ExchangeError::Send(e),
                WaitOp::Receive => ExchangeError::Receive(e),
            },
        }
    }
}

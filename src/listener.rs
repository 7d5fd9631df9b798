//! The accepting side of the exchange.
//!
//! A [`Listener`] binds an endpoint, accepts exactly one connection, reads one
//! request, persists it, then answers with one reply loaded from an artifact.
//!
//! ## Lifecycle
//!
//! ```text
//! bind ─▶ Bound ─▶ Accepting ─▶ Connected ─▶ Received ─▶ Replied ─▶ Closed
//!                      │             │            │
//!                      └─────────────┴────────────┴──── any error ─▶ Closed
//! ```
//!
//! The listening socket is released when the listener reaches `Closed`.

use crate::artifact::{ArtifactError, PayloadSink, PayloadSource};
use crate::connection::{Connection, ExchangeReport, DEFAULT_BUFFER_SIZE};
use crate::endpoint::Endpoint;
use crate::error::{ExchangeError, WaitOp};
use crate::net;
use crate::readiness::{CancelHandle, Waiter};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Listen queue length applied when none is configured.
pub const DEFAULT_BACKLOG: u32 = 10;

/// Current phase of a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Socket bound and listening; no exchange started yet.
    Bound,
    /// Waiting for a peer to connect.
    Accepting,
    /// A peer is connected; waiting for its request.
    Connected,
    /// Request read and persisted.
    Received,
    /// Reply sent.
    Replied,
    /// Connection and listening socket released.
    Closed,
}

/// Listener tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    pub backlog: u32,
    /// Set SO_REUSEADDR before binding.
    pub reuse_address: bool,
    /// Upper bound of the single request read.
    pub buffer_size: usize,
    /// `None` blocks until a peer connects.
    pub accept_timeout: Option<Duration>,
    /// `None` blocks until the peer sends or closes.
    pub receive_timeout: Option<Duration>,
}

impl Default for ListenerOptions {
    fn default() -> Self {
        Self {
            backlog: DEFAULT_BACKLOG,
            reuse_address: true,
            buffer_size: DEFAULT_BUFFER_SIZE,
            accept_timeout: None,
            receive_timeout: None,
        }
    }
}

/// Single-connection listener.
pub struct Listener {
    socket: Option<TcpListener>,
    local_addr: SocketAddr,
    options: ListenerOptions,
    waiter: Waiter,
    state: ListenerState,
}

impl Listener {
    /// Bind `endpoint`, trying each resolved address in turn.
    pub fn bind(endpoint: &Endpoint, options: ListenerOptions) -> Result<Self, ExchangeError> {
        if options.buffer_size == 0 {
            return Err(ExchangeError::InvalidOptions("buffer_size must be greater than 0"));
        }

        let addrs = endpoint
            .resolve()
            .map_err(|source| ExchangeError::Resolve {
                endpoint: endpoint.clone(),
                source,
            })?;

        let (socket, addr) = bind_any(endpoint, &addrs, &options)?;

        let local_addr = socket
            .local_addr()
            .map_err(|source| ExchangeError::Bind { addr, source })?;
        let waiter = Waiter::new().map_err(ExchangeError::Poller)?;

        info!(
            addr = %local_addr,
            backlog = options.backlog,
            reuse_address = options.reuse_address,
            "Listener bound"
        );

        Ok(Self {
            socket: Some(socket),
            local_addr,
            options,
            waiter,
            state: ListenerState::Bound,
        })
    }

    /// The address actually bound (resolves port 0 to the assigned port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    /// Handle for aborting the accept, receive or send wait from another
    /// thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.waiter.cancel_handle()
    }

    /// Run the whole exchange: accept one connection, read one request into
    /// `inbound`, answer with the contents of `outbound`.
    ///
    /// The listener is `Closed` afterwards whether or not this succeeds.
    pub fn serve_once(
        &mut self,
        inbound: &dyn PayloadSink,
        outbound: &dyn PayloadSource,
    ) -> Result<ExchangeReport, ExchangeError> {
        if self.state != ListenerState::Bound {
            return Err(ExchangeError::Closed);
        }

        let result = self.exchange(inbound, outbound);
        self.close();
        result
    }

    fn exchange(
        &mut self,
        inbound: &dyn PayloadSink,
        outbound: &dyn PayloadSource,
    ) -> Result<ExchangeReport, ExchangeError> {
        let mut conn = self.accept()?;
        let peer = conn.peer_addr();

        let request = conn.receive_payload(
            &mut self.waiter,
            self.options.buffer_size,
            self.options.receive_timeout,
        )?;
        inbound.persist(&request)?;
        self.transition(ListenerState::Received);
        info!(
            peer = %peer,
            bytes = request.len(),
            inbound = %inbound.location(),
            "Request received"
        );

        let reply = outbound.load().map_err(|e| match e {
            ArtifactError::Missing(location) => ExchangeError::ReplyUnavailable(location),
            other => other.into(),
        })?;

        let sent = conn.send_payload(&mut self.waiter, &reply)?;
        self.transition(ListenerState::Replied);
        info!(peer = %peer, bytes = sent, "Reply sent");

        conn.close();

        Ok(ExchangeReport {
            peer,
            received: request.len(),
            sent,
        })
    }

    fn accept(&mut self) -> Result<Connection, ExchangeError> {
        let fd = self
            .socket
            .as_ref()
            .ok_or(ExchangeError::Closed)?
            .as_raw_fd();

        self.transition(ListenerState::Accepting);
        info!(addr = %self.local_addr, "Waiting for connection");

        let deadline = self.options.accept_timeout.map(|t| Instant::now() + t);
        self.waiter
            .wait_readable(fd, deadline)
            .map_err(|e| ExchangeError::from_wait(e, WaitOp::Accept))?;

        let (stream, peer) = self
            .socket
            .as_ref()
            .ok_or(ExchangeError::Closed)?
            .accept()
            .map_err(ExchangeError::Accept)?;

        self.transition(ListenerState::Connected);
        info!(peer = %peer, "Connection established");

        Ok(Connection::new(stream, peer))
    }

    fn close(&mut self) {
        self.socket = None;
        self.transition(ListenerState::Closed);
    }

    fn transition(&mut self, next: ListenerState) {
        debug!(from = ?self.state, to = ?next, "Listener state");
        self.state = next;
    }
}

/// Bind the first of `addrs` that succeeds, reporting the last failure.
fn bind_any(
    endpoint: &Endpoint,
    addrs: &[SocketAddr],
    options: &ListenerOptions,
) -> Result<(TcpListener, SocketAddr), ExchangeError> {
    let mut last_err = None;

    for &addr in addrs {
        match net::bind_listener(addr, options.backlog, options.reuse_address) {
            Ok(bound) => return Ok((bound, addr)),
            Err(source) => {
                debug!(addr = %addr, error = %source, "Bind attempt failed");
                last_err = Some(ExchangeError::Bind { addr, source });
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ExchangeError::Resolve {
        endpoint: endpoint.clone(),
        source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved"),
    }))
}

//! The connecting side of the exchange.
//!
//! A [`Connector`] loads its request before touching the network, connects
//! once, sends the request in one write, waits for one bounded reply and
//! persists it.
//!
//! ```text
//! Idle ─▶ Connecting ─▶ Connected ─▶ Sent ─▶ Received ─▶ Closed
//!   │          │             │          │
//!   └──────────┴─────────────┴──────────┴──── any error ─▶ Closed
//! ```

use crate::artifact::{ArtifactError, PayloadSink, PayloadSource};
use crate::connection::{Connection, ExchangeReport, DEFAULT_BUFFER_SIZE};
use crate::endpoint::Endpoint;
use crate::error::{ExchangeError, WaitOp};
use crate::net;
use crate::readiness::{CancelHandle, WaitError, Waiter};
use std::time::Duration;
use tracing::{debug, info};

/// Current phase of a connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorState {
    Idle,
    Connecting,
    Connected,
    Sent,
    Received,
    Closed,
}

/// Connector tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorOptions {
    /// Upper bound of the single reply read.
    pub buffer_size: usize,
    /// Per-address connect timeout; `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
    /// `None` blocks until the peer replies or closes.
    pub receive_timeout: Option<Duration>,
}

impl Default for ConnectorOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            connect_timeout: None,
            receive_timeout: None,
        }
    }
}

/// Single-connection client.
pub struct Connector {
    endpoint: Endpoint,
    options: ConnectorOptions,
    waiter: Waiter,
    state: ConnectorState,
}

impl Connector {
    pub fn new(endpoint: Endpoint, options: ConnectorOptions) -> Result<Self, ExchangeError> {
        if options.buffer_size == 0 {
            return Err(ExchangeError::InvalidOptions("buffer_size must be greater than 0"));
        }

        let waiter = Waiter::new().map_err(ExchangeError::Poller)?;

        Ok(Self {
            endpoint,
            options,
            waiter,
            state: ConnectorState::Idle,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    /// Handle for aborting the connect, send or reply wait from another
    /// thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.waiter.cancel_handle()
    }

    /// Run the whole exchange: send the contents of `outbound`, store the
    /// reply in `inbound`.
    ///
    /// `inbound` is overwritten with whatever the single read returns, which
    /// is empty if the peer closed without replying. Nothing is written when
    /// an earlier step fails. The connector is `Closed` afterwards whether or
    /// not this succeeds.
    pub fn request_once(
        &mut self,
        outbound: &dyn PayloadSource,
        inbound: &dyn PayloadSink,
    ) -> Result<ExchangeReport, ExchangeError> {
        if self.state != ConnectorState::Idle {
            return Err(ExchangeError::Closed);
        }

        let result = self.exchange(outbound, inbound);
        self.transition(ConnectorState::Closed);
        result
    }

    fn exchange(
        &mut self,
        outbound: &dyn PayloadSource,
        inbound: &dyn PayloadSink,
    ) -> Result<ExchangeReport, ExchangeError> {
        let request = outbound.load().map_err(|e| match e {
            ArtifactError::Missing(location) => ExchangeError::RequestUnavailable(location),
            other => other.into(),
        })?;
        debug!(
            bytes = request.len(),
            outbound = %outbound.location(),
            "Request loaded"
        );

        let mut conn = self.connect()?;
        let peer = conn.peer_addr();

        let sent = conn.send_payload(&mut self.waiter, &request)?;
        self.transition(ConnectorState::Sent);
        info!(peer = %peer, bytes = sent, "Request sent");

        let reply = conn.receive_payload(
            &mut self.waiter,
            self.options.buffer_size,
            self.options.receive_timeout,
        )?;
        inbound.persist(&reply)?;
        self.transition(ConnectorState::Received);
        info!(
            peer = %peer,
            bytes = reply.len(),
            inbound = %inbound.location(),
            "Reply received"
        );

        conn.close();

        Ok(ExchangeReport {
            peer,
            received: reply.len(),
            sent,
        })
    }

    fn connect(&mut self) -> Result<Connection, ExchangeError> {
        self.transition(ConnectorState::Connecting);
        info!(endpoint = %self.endpoint, "Connecting");

        let addrs = self
            .endpoint
            .resolve()
            .map_err(|source| ExchangeError::Resolve {
                endpoint: self.endpoint.clone(),
                source,
            })?;

        let stream = net::connect_any(&addrs, &mut self.waiter, self.options.connect_timeout)
            .map_err(|e| match e {
                WaitError::Io(source) => ExchangeError::Connect {
                    endpoint: self.endpoint.clone(),
                    source,
                },
                other => ExchangeError::from_wait(other, WaitOp::Connect),
            })?;
        let peer = stream.peer_addr().map_err(|source| ExchangeError::Connect {
            endpoint: self.endpoint.clone(),
            source,
        })?;

        self.transition(ConnectorState::Connected);
        info!(peer = %peer, "Connected");

        Ok(Connection::new(stream, peer))
    }

    fn transition(&mut self, next: ConnectorState) {
        debug!(from = ?self.state, to = ?next, "Connector state");
        self.state = next;
    }
}

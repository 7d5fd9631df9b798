//! tcp-oneshot: a single request/response exchange over one TCP connection.
//!
//! Two sides, composed only at the network boundary:
//! - [`Listener`]: binds an endpoint, accepts one connection, stores the
//!   request it receives and answers with a reply loaded from an artifact
//! - [`Connector`]: connects once, sends a request loaded from an artifact
//!   and stores the reply
//!
//! Payloads are opaque bytes. Each side performs a single bounded read (no
//! framing), so anything beyond the read bound is truncated. Accept and
//! receive can be bounded by a timeout, and every blocking step can be
//! aborted through a [`CancelHandle`]. Unix only.

pub mod artifact;
pub mod config;
mod connection;
pub mod connector;
pub mod endpoint;
pub mod error;
pub mod listener;
mod net;
mod readiness;

pub use artifact::{ArtifactError, FileArtifact, MemoryArtifact, PayloadSink, PayloadSource};
pub use connection::{ExchangeReport, DEFAULT_BUFFER_SIZE};
pub use connector::{Connector, ConnectorOptions, ConnectorState};
pub use endpoint::{Endpoint, EndpointParseError};
pub use error::{ExchangeError, WaitOp};
pub use listener::{Listener, ListenerOptions, ListenerState, DEFAULT_BACKLOG};
pub use readiness::CancelHandle;

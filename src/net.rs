//! Socket construction for both sides of the exchange.

use crate::readiness::{WaitError, Waiter};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};
use tracing::debug;

/// Create a blocking listening socket on `addr`.
///
/// With `reuse_address`, SO_REUSEADDR is set before binding so a restart can
/// bind while connections from a previous instance sit in TIME_WAIT.
pub fn bind_listener(addr: SocketAddr, backlog: u32, reuse_address: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    socket.set_reuse_address(reuse_address)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(socket.into())
}

/// Connect to the first of `addrs` that accepts.
///
/// Each attempt is a non-blocking connect whose completion is awaited through
/// `waiter`, so it honors cancellation. `timeout` bounds each attempt. A
/// cancel stops immediately; any other failure moves on to the next address,
/// and the last one is returned if every address fails. The returned stream
/// is in blocking mode.
pub(crate) fn connect_any(
    addrs: &[SocketAddr],
    waiter: &mut Waiter,
    timeout: Option<Duration>,
) -> Result<TcpStream, WaitError> {
    let mut last_err = None;

    for addr in addrs {
        match connect_one(*addr, waiter, timeout) {
            Ok(stream) => return Ok(stream),
            Err(WaitError::Cancelled) => return Err(WaitError::Cancelled),
            Err(WaitError::TimedOut) => {
                debug!(addr = %addr, "Connect attempt timed out");
                last_err = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
            }
            Err(WaitError::Io(e)) => {
                debug!(addr = %addr, error = %e, "Connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(WaitError::Io(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "no addresses to connect to")
    })))
}

fn connect_one(
    addr: SocketAddr,
    waiter: &mut Waiter,
    timeout: Option<Duration>,
) -> Result<TcpStream, WaitError> {
    let stream = mio::net::TcpStream::connect(addr).map_err(WaitError::Io)?;
    let deadline = timeout.map(|t| Instant::now() + t);

    loop {
        waiter.wait_writable(stream.as_raw_fd(), deadline)?;

        if let Some(e) = stream.take_error().map_err(WaitError::Io)? {
            return Err(WaitError::Io(e));
        }
        match stream.peer_addr() {
            Ok(_) => break,
            // Still in progress.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => continue,
            Err(e) => return Err(WaitError::Io(e)),
        }
    }

    let stream = TcpStream::from(stream);
    stream.set_nonblocking(false).map_err(WaitError::Io)?;
    Ok(stream)
}

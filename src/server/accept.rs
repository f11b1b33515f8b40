//! Accept loop and outgoing connections.

use std::{io, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::BackoffConfig;
use crate::{
    frame::HeaderPolicy,
    peer::PeerRole,
    starter::{SessionHandle, SessionStarter},
    transport::Transport,
};

/// Source of incoming connections consumed by [`accept_loop`].
///
/// Implementations must be cancellation-safe: dropping a pending `accept()`
/// future must not leak resources.
#[async_trait]
pub trait AcceptListener: Send + Sync {
    /// Connection type produced by the listener.
    type Stream: Transport;

    /// Wait for the next connection.
    async fn accept(&self) -> io::Result<(Self::Stream, SocketAddr)>;

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be determined.
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

/// Accept connections until `shutdown` is cancelled, starting a session for
/// each one.
///
/// Sessions started here derive their cancellation from `shutdown`, so
/// cancelling it also stops them; the loop returns once every session it
/// started has been disposed. Accept failures are retried with exponential
/// back-off governed by `backoff` and never end the loop.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
///
/// use peerwire::{
///     handler::HandlerChain,
///     peer::ServerRole,
///     server::{BackoffConfig, accept_loop},
///     starter::SessionStarter,
/// };
/// use tokio::net::TcpListener;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> std::io::Result<()> {
/// let listener = Arc::new(TcpListener::bind("127.0.0.1:0").await?);
/// let starter = SessionStarter::new(HandlerChain::<ServerRole>::default());
/// let shutdown = CancellationToken::new();
/// accept_loop(listener, starter, shutdown, BackoffConfig::default()).await;
/// # Ok(())
/// # }
/// ```
pub async fn accept_loop<L, R, H>(
    listener: Arc<L>,
    starter: SessionStarter<R, H>,
    shutdown: CancellationToken,
    backoff: BackoffConfig,
) where
    L: AcceptListener + 'static,
    R: PeerRole,
    H: HeaderPolicy,
{
    let backoff = backoff.normalized();
    let starter = starter.cancellation(shutdown.clone());
    let tracker = TaskTracker::new();
    let mut delay = backoff.initial_delay;
    while let Some(next_delay) =
        accept_iteration(&listener, &starter, &shutdown, &tracker, &backoff, delay).await
    {
        delay = next_delay;
    }
    tracker.close();
    debug!("accept loop stopped: sessions_remaining={}", tracker.len());
    tracker.wait().await;
}

async fn accept_iteration<L, R, H>(
    listener: &Arc<L>,
    starter: &SessionStarter<R, H>,
    shutdown: &CancellationToken,
    tracker: &TaskTracker,
    backoff: &BackoffConfig,
    delay: Duration,
) -> Option<Duration>
where
    L: AcceptListener + 'static,
    R: PeerRole,
    H: HeaderPolicy,
{
    select! {
        biased;

        () = shutdown.cancelled() => None,
        res = listener.accept() => Some(match res {
            Ok((stream, peer_addr)) => {
                let handle = starter.start(stream, peer_addr.into());
                tracker.spawn(handle.join());
                backoff.initial_delay
            }
            Err(e) => {
                let local_addr = listener.local_addr().ok();
                warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                select! {
                    biased;
                    () = shutdown.cancelled() => return None,
                    () = sleep(delay) => {}
                }
                backoff.next_delay(delay)
            }
        }),
    }
}

/// Open a TCP connection to `addr` and start a session over it.
///
/// # Errors
///
/// Returns an I/O error if the connection cannot be established.
pub async fn connect<A, R, H>(
    addr: A,
    starter: &SessionStarter<R, H>,
) -> io::Result<SessionHandle<R>>
where
    A: ToSocketAddrs,
    R: PeerRole,
    H: HeaderPolicy,
{
    let stream = TcpStream::connect(addr).await?;
    let peer_addr = stream.peer_addr()?;
    Ok(starter.start(stream, peer_addr.into()))
}

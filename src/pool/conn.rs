use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::Sleep;

/// A pooled TCP connection.
///
/// Wraps the underlying stream together with the pool key it was dialed for
/// and its last-activity timestamp. Reads and writes forward to the stream;
/// when a read or write timeout was configured at dial time, an operation
/// that stays pending past the timeout fails with
/// [`io::ErrorKind::TimedOut`].
pub struct PooledConn {
    stream: TcpStream,
    address: String,
    peer_addr: SocketAddr,
    last_active: Instant,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl PooledConn {
    pub(crate) fn new(
        stream: TcpStream,
        address: String,
        peer_addr: SocketAddr,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            stream,
            address,
            peer_addr,
            last_active: Instant::now(),
            read_timeout: none_if_zero(read_timeout),
            write_timeout: none_if_zero(write_timeout),
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Pool key this connection was dialed for ("host:port").
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Remote endpoint of the underlying socket.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Time since the connection was dialed or last handed back to the pool.
    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    pub(crate) fn is_stale(&self, idle_conn_timeout: Duration) -> bool {
        !idle_conn_timeout.is_zero() && self.last_active.elapsed() > idle_conn_timeout
    }

    pub(crate) fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Shut the connection down, surfacing the error if the close fails.
    pub async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("address", &self.address)
            .field("peer_addr", &self.peer_addr)
            .field("last_active", &self.last_active)
            .finish_non_exhaustive()
    }
}

fn none_if_zero(d: Duration) -> Option<Duration> {
    (!d.is_zero()).then_some(d)
}

/// Arm (or keep polling) the deadline for an I/O operation that came up
/// pending. The timer starts at the first pending poll of an operation and is
/// discarded once the operation completes.
fn poll_deadline<T>(
    deadline: &mut Option<Pin<Box<Sleep>>>,
    timeout: Option<Duration>,
    cx: &mut Context<'_>,
    op: &str,
) -> Poll<io::Result<T>> {
    let Some(timeout) = timeout else {
        return Poll::Pending;
    };
    let sleep = deadline.get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
    match sleep.as_mut().poll(cx) {
        Poll::Ready(()) => {
            *deadline = None;
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} timed out", op),
            )))
        }
        Poll::Pending => Poll::Pending,
    }
}

impl AsyncRead for PooledConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_read(cx, buf) {
            Poll::Ready(res) => {
                this.read_deadline = None;
                Poll::Ready(res)
            }
            Poll::Pending => poll_deadline(&mut this.read_deadline, this.read_timeout, cx, "read"),
        }
    }
}

impl AsyncWrite for PooledConn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.stream).poll_write(cx, buf) {
            Poll::Ready(res) => {
                this.write_deadline = None;
                Poll::Ready(res)
            }
            Poll::Pending => {
                poll_deadline(&mut this.write_deadline, this.write_timeout, cx, "write")
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    async fn connected_pair() -> (PooledConn, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (server_side, _) = listener.accept().await.unwrap();
        let stream = connect.await.unwrap().unwrap();
        let conn = PooledConn::new(
            stream,
            addr.to_string(),
            addr,
            Duration::ZERO,
            Duration::ZERO,
        );
        (conn, server_side)
    }

    #[test]
    fn zero_duration_disables_timeouts() {
        assert_eq!(none_if_zero(Duration::ZERO), None);
        assert_eq!(
            none_if_zero(Duration::from_secs(1)),
            Some(Duration::from_secs(1))
        );
    }

    #[tokio::test]
    async fn staleness_follows_idle_timeout() {
        let (conn, _server_side) = connected_pair().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(conn.is_stale(Duration::from_millis(1)));
        assert!(!conn.is_stale(Duration::from_secs(60)));
        // Zero disables staleness entirely.
        assert!(!conn.is_stale(Duration::ZERO));
    }

    #[tokio::test]
    async fn touch_resets_the_idle_clock() {
        let (mut conn, _server_side) = connected_pair().await;

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(conn.is_stale(Duration::from_millis(5)));
        conn.touch();
        assert!(!conn.is_stale(Duration::from_millis(5)));
    }
}

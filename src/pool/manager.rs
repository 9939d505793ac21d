use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::conn::PooledConn;
use super::options::PoolOptions;
use crate::utils::error::{Result, RustPoolError};

/// Acquisition wait used when `conn_timeout` is zero: one year, effectively
/// unbounded.
const UNBOUNDED_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Result of a successful checkout.
#[derive(Debug)]
pub struct Acquired {
    /// The connection, ready for I/O.
    pub conn: PooledConn,
    /// Failed attempts (dial errors and stale evictions) recovered along the
    /// way.
    pub retries: u32,
    /// True when the connection was freshly dialed rather than reused.
    pub newly_dialed: bool,
}

/// Read-only snapshot of one address's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Idle connections parked in the queue.
    pub pooled_conns: usize,
    /// Connections dialed and not yet closed, whether in use or parked.
    pub open_conns: usize,
    /// Remaining dial headroom; `None` when the address is unbounded.
    pub free_conns: Option<usize>,
}

/// Per-address bookkeeping: the open-connection count and the bounded idle
/// queue. The queue is an MPMC channel, so releases and checkouts never take
/// the manager's map mutex.
struct AddressPool {
    open_conns: AtomicUsize,
    idle_tx: Sender<PooledConn>,
    idle_rx: Receiver<PooledConn>,
}

impl AddressPool {
    fn new(pool_size: usize) -> Self {
        let (idle_tx, idle_rx) = async_channel::bounded(pool_size);
        Self {
            open_conns: AtomicUsize::new(0),
            idle_tx,
            idle_rx,
        }
    }

    /// Reserve an open-connection slot ahead of dialing. Check and increment
    /// are a single compare-and-swap, so two concurrent dialers cannot both
    /// observe headroom and overshoot the ceiling.
    fn try_reserve(&self, max_open_conns: usize) -> bool {
        let mut current = self.open_conns.load(Ordering::Relaxed);
        loop {
            if max_open_conns > 0 && current >= max_open_conns {
                return false;
            }
            match self.open_conns.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    fn release_slot(&self) {
        self.open_conns.fetch_sub(1, Ordering::AcqRel);
    }

    fn open_count(&self) -> usize {
        self.open_conns.load(Ordering::Acquire)
    }
}

/// Connection pool handing out reusable TCP connections keyed by destination
/// address.
///
/// Callers [`acquire`](ConnectionPool::acquire) a connection, use it, and
/// hand it back with [`release`](ConnectionPool::release). Connections come
/// either from the per-address idle queue or from a fresh dial when the queue
/// is empty and the address is under its open-connection ceiling. Staleness
/// is checked lazily at checkout; there is no background sweeper.
pub struct ConnectionPool {
    opts: PoolOptions,
    pools: Mutex<HashMap<String, Arc<AddressPool>>>,
}

impl ConnectionPool {
    /// Create a pool from the given options. Sizes of zero are clamped to
    /// their documented defaults.
    pub fn new(opts: PoolOptions) -> Self {
        Self {
            opts: opts.normalized(),
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Options the pool was built with, after normalization.
    pub fn options(&self) -> &PoolOptions {
        &self.opts
    }

    /// Checkout a connection to `address`. Cancellation-free variant of
    /// [`acquire_with_cancel`](ConnectionPool::acquire_with_cancel).
    pub async fn acquire(&self, address: &str) -> Result<Acquired> {
        self.acquire_with_cancel(&CancellationToken::new(), address)
            .await
    }

    /// Checkout a connection to `address`, dialing or reusing as capacity
    /// allows.
    ///
    /// Returns the connection together with the number of recovered failures
    /// and whether it was freshly dialed. `cancel` is honored at every
    /// blocking point; a dial still in flight when the caller cancels is
    /// closed, never leaked into the pool. Dial failures and stale evictions
    /// are retried up to `max_retry`; waiting for an idle connection is
    /// bounded by `conn_timeout` per loop iteration.
    pub async fn acquire_with_cancel(
        &self,
        cancel: &CancellationToken,
        address: &str,
    ) -> Result<Acquired> {
        let mut retries: u32 = 0;

        let wait_timeout = if self.opts.conn_timeout.is_zero() {
            UNBOUNDED_WAIT
        } else {
            self.opts.conn_timeout
        };

        loop {
            if retries > self.opts.max_retry {
                return Err(RustPoolError::RetryExhausted {
                    address: address.to_string(),
                    retries,
                });
            }

            let pool = self.address_pool(address).await;

            // Dial only when nothing is parked and the ceiling leaves room.
            // The slot is reserved before the dial, so the ceiling holds even
            // with concurrent dialers; a failed dial hands the slot back.
            if pool.idle_rx.is_empty() && pool.try_reserve(self.opts.max_open_conns) {
                match self.dial(cancel, address).await {
                    Ok(conn) => {
                        return Ok(Acquired {
                            conn,
                            retries,
                            newly_dialed: true,
                        });
                    }
                    Err(RustPoolError::Cancelled) => {
                        pool.release_slot();
                        return Err(RustPoolError::Cancelled);
                    }
                    Err(err) => {
                        pool.release_slot();
                        debug!("dial attempt for {} failed: {}", address, err);
                        retries += 1;
                        continue;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(RustPoolError::Cancelled);
                }
                _ = tokio::time::sleep(wait_timeout) => {
                    return Err(RustPoolError::AcquireTimeout {
                        address: address.to_string(),
                    });
                }
                recv = pool.idle_rx.recv() => {
                    let idle = recv.expect("idle queue sender lives as long as the pool entry");
                    if idle.is_stale(self.opts.idle_conn_timeout) {
                        pool.release_slot();
                        trace!("discarding stale connection to {}", address);
                        if let Err(err) = idle.close().await {
                            debug!("closing stale connection to {}: {}", address, err);
                        }
                        retries += 1;
                        continue;
                    }
                    return Ok(Acquired {
                        conn: idle,
                        retries,
                        newly_dialed: false,
                    });
                }
            }
        }
    }

    /// Hand a connection back for reuse.
    ///
    /// The connection is parked on its address's idle queue with a fresh
    /// activity timestamp. When the queue is already at capacity the
    /// connection is closed instead and the open count drops; a close
    /// failure surfaces as an error but the bookkeeping is not rolled back.
    /// A connection that was not dialed through this pool is refused with
    /// [`RustPoolError::UnknownAddress`].
    pub async fn release(&self, mut conn: PooledConn) -> Result<()> {
        let address = conn.address().to_string();
        let pool = {
            let pools = self.pools.lock().await;
            pools.get(&address).cloned()
        };
        let Some(pool) = pool else {
            // Dropping the connection closes it; nothing we never dialed is
            // adopted into the pool.
            return Err(RustPoolError::UnknownAddress { address });
        };

        conn.touch();
        match pool.idle_tx.try_send(conn) {
            Ok(()) => {
                trace!("parked connection to {}", address);
                Ok(())
            }
            Err(TrySendError::Full(conn) | TrySendError::Closed(conn)) => {
                // The queue already holds enough idle connections.
                pool.release_slot();
                conn.close().await?;
                Ok(())
            }
        }
    }

    /// Per-address snapshot of pooled, open, and free connection counts.
    ///
    /// The returned map is a plain copy; it holds no references into the
    /// pool and never exposes the idle queue itself.
    pub async fn status(&self) -> HashMap<String, PoolStatus> {
        let pools = self.pools.lock().await;
        pools
            .iter()
            .map(|(address, pool)| {
                let open_conns = pool.open_count();
                let free_conns = if self.opts.max_open_conns == 0 {
                    None
                } else {
                    Some(self.opts.max_open_conns.saturating_sub(open_conns))
                };
                (
                    address.clone(),
                    PoolStatus {
                        pooled_conns: pool.idle_rx.len(),
                        open_conns,
                        free_conns,
                    },
                )
            })
            .collect()
    }

    /// Look up or lazily create the per-address pool. The map mutex is held
    /// for the map access only, never across a dial or a queue wait; creation
    /// is idempotent and the first caller wins.
    async fn address_pool(&self, address: &str) -> Arc<AddressPool> {
        let mut pools = self.pools.lock().await;
        pools
            .entry(address.to_string())
            .or_insert_with(|| Arc::new(AddressPool::new(self.opts.pool_size)))
            .clone()
    }

    async fn dial(&self, cancel: &CancellationToken, address: &str) -> Result<PooledConn> {
        let dial_timeout = if self.opts.conn_timeout.is_zero() {
            UNBOUNDED_WAIT
        } else {
            self.opts.conn_timeout
        };

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(RustPoolError::Cancelled),
            dialed = timeout(dial_timeout, TcpStream::connect(address)) => match dialed {
                Ok(Ok(stream)) => stream,
                Ok(Err(source)) => {
                    return Err(RustPoolError::Dial {
                        address: address.to_string(),
                        source,
                    });
                }
                Err(_) => {
                    return Err(RustPoolError::Dial {
                        address: address.to_string(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "connect timed out",
                        ),
                    });
                }
            },
        };

        if cancel.is_cancelled() {
            // The caller gave up while the dial was in flight; dropping the
            // stream closes it instead of leaking it into the pool.
            return Err(RustPoolError::Cancelled);
        }

        let peer_addr = stream.peer_addr()?;

        if !self.opts.tcp_keepalive.is_zero() {
            let keepalive = TcpKeepalive::new().with_time(self.opts.tcp_keepalive);
            if let Err(err) = SockRef::from(&stream).set_tcp_keepalive(&keepalive) {
                warn!("failed to enable keepalive for {}: {}", address, err);
            }
        }

        trace!("dialed new connection to {} ({})", address, peer_addr);
        Ok(PooledConn::new(
            stream,
            address.to_string(),
            peer_addr,
            self.opts.read_timeout,
            self.opts.write_timeout,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_test::assert_ok;

    async fn spawn_echo() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            loop {
                if let Ok((mut stream, _)) = listener.accept().await {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 64];
                        loop {
                            match stream.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => {
                                    if stream.write_all(&buf[..n]).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    });
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn new_pool_reports_empty_status() {
        let pool = ConnectionPool::new(PoolOptions::default());
        assert!(pool.status().await.is_empty());
    }

    #[tokio::test]
    async fn acquire_release_acquire_reuses() {
        let addr = spawn_echo().await;
        let address = addr.to_string();
        let pool = ConnectionPool::new(PoolOptions::default());

        let first = pool.acquire(&address).await.unwrap();
        assert!(first.newly_dialed);
        assert_eq!(first.retries, 0);
        assert_ok!(pool.release(first.conn).await);

        let second = pool.acquire(&address).await.unwrap();
        assert!(!second.newly_dialed);

        let status = pool.status().await;
        assert_eq!(status[&address].open_conns, 1);
        assert_eq!(status[&address].pooled_conns, 0);
    }

    #[tokio::test]
    async fn try_reserve_honors_ceiling() {
        let pool = AddressPool::new(2);
        assert!(pool.try_reserve(2));
        assert!(pool.try_reserve(2));
        assert!(!pool.try_reserve(2));
        pool.release_slot();
        assert!(pool.try_reserve(2));
        // Zero means unbounded.
        assert!(pool.try_reserve(0));
    }

    #[tokio::test]
    async fn release_of_foreign_connection_is_rejected() {
        let addr = spawn_echo().await;
        let address = addr.to_string();
        let source = ConnectionPool::new(PoolOptions::default());
        let other = ConnectionPool::new(PoolOptions::default());

        let acquired = source.acquire(&address).await.unwrap();
        let err = other.release(acquired.conn).await.unwrap_err();
        assert!(matches!(err, RustPoolError::UnknownAddress { .. }));
    }

    #[tokio::test]
    async fn bounded_status_reports_headroom() {
        let addr = spawn_echo().await;
        let address = addr.to_string();
        let pool = ConnectionPool::new(PoolOptions {
            max_open_conns: 3,
            ..Default::default()
        });

        let acquired = pool.acquire(&address).await.unwrap();
        let status = pool.status().await;
        assert_eq!(status[&address].free_conns, Some(2));
        pool.release(acquired.conn).await.unwrap();
    }
}

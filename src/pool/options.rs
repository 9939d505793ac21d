use std::time::Duration;

/// Tunables for a [`ConnectionPool`](super::ConnectionPool).
///
/// The struct is a plain immutable snapshot: build it once, hand it to the
/// pool, and the pool keeps its own copy. Durations of zero mean "disabled"
/// for the field in question, matching the documented defaults below.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Idle-queue capacity per destination address. Zero is clamped to the
    /// logical CPU count.
    pub pool_size: usize,
    /// How long a parked connection may sit unused before it is considered
    /// stale and discarded at the next checkout. Zero disables staleness.
    /// Default: 1 hour.
    pub idle_conn_timeout: Duration,
    /// Dial deadline for new connections and the per-iteration wait bound
    /// when blocking on the idle queue. Zero waits without bound.
    /// Default: 5 seconds.
    pub conn_timeout: Duration,
    /// Per-address ceiling on concurrently open connections. Zero means
    /// unbounded.
    pub max_open_conns: usize,
    /// Extra attempts permitted after a failed dial or a stale eviction.
    /// Zero means a single attempt with no retry.
    pub max_retry: u32,
    /// Per-operation read timeout applied to newly dialed connections.
    /// Zero disables it.
    pub read_timeout: Duration,
    /// Per-operation write timeout applied to newly dialed connections.
    /// Zero disables it.
    pub write_timeout: Duration,
    /// TCP keepalive idle time set on newly dialed sockets, for dead-peer
    /// detection while connections sit parked. Zero disables it.
    pub tcp_keepalive: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            idle_conn_timeout: Duration::from_secs(60 * 60),
            conn_timeout: Duration::from_secs(5),
            max_open_conns: 0,
            max_retry: 0,
            read_timeout: Duration::ZERO,
            write_timeout: Duration::ZERO,
            tcp_keepalive: Duration::ZERO,
        }
    }
}

impl PoolOptions {
    /// Clamp nonsensical sizes back to their documented defaults.
    pub(crate) fn normalized(mut self) -> Self {
        if self.pool_size == 0 {
            self.pool_size = default_pool_size();
        }
        self
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = PoolOptions::default();
        assert!(opts.pool_size >= 1);
        assert_eq!(opts.idle_conn_timeout, Duration::from_secs(3600));
        assert_eq!(opts.conn_timeout, Duration::from_secs(5));
        assert_eq!(opts.max_open_conns, 0);
        assert_eq!(opts.max_retry, 0);
        assert!(opts.read_timeout.is_zero());
        assert!(opts.write_timeout.is_zero());
        assert!(opts.tcp_keepalive.is_zero());
    }

    #[test]
    fn zero_pool_size_is_clamped() {
        let opts = PoolOptions {
            pool_size: 0,
            ..Default::default()
        }
        .normalized();
        assert!(opts.pool_size >= 1);
    }

    #[test]
    fn nonzero_sizes_survive_normalization() {
        let opts = PoolOptions {
            pool_size: 3,
            max_open_conns: 7,
            ..Default::default()
        }
        .normalized();
        assert_eq!(opts.pool_size, 3);
        assert_eq!(opts.max_open_conns, 7);
    }
}

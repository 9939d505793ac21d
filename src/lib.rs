// RustPool - Bounded TCP connection pooling for tokio

pub mod api;
pub mod config;
pub mod pool;
pub mod utils;

// Re-export commonly used types
pub use pool::{Acquired, ConnectionPool, PoolOptions, PoolStatus, PooledConn};
pub use utils::error::{Result, RustPoolError};

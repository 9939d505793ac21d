pub mod conn;
pub mod manager;
pub mod options;

pub use conn::PooledConn;
pub use manager::{Acquired, ConnectionPool, PoolStatus};
pub use options::PoolOptions;

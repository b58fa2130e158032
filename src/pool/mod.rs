mod connection;
mod retry;

pub use connection::BackendPool;
pub use retry::RetryPolicy;

pub mod admin;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod records;
pub mod runtime;
pub mod status;

pub use config::Config;
pub use error::{DataError, DataResult};
pub use runtime::Runtime;

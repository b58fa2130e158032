mod interceptor;
mod policy;
pub mod synthetic;

pub use interceptor::{InterceptOptions, MockInterceptor};
pub use policy::FallbackPolicy;

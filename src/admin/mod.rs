mod api;
mod server;

pub use api::{AdminApi, AdminResponse};
pub use server::AdminServer;

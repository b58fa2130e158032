mod facade;
mod types;

pub use facade::{DataLayer, Record, Resource};
pub use types::*;

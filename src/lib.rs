pub mod channel;
pub mod config;
pub mod conflict;
pub mod error;
pub mod model;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod store;
pub mod sync;
pub mod test_utils;

pub use error::{OutpostError, Result};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Infrastructure shared by the matrix, the coordinator and the transports

pub mod config;
pub mod errors;

pub use config::{CoordinatorConfig, TransportConfig};
pub use errors::{CompareError, Result};

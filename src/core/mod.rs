pub mod config;
pub mod errors;
pub mod kernel;
pub mod types;

pub use config::{Callbacks, ConfigError, DebugFilter, DxtradeConfig};
pub use errors::DxtradeError;



pub mod config;
pub mod error;

pub use self::config::{AppSettings, GragConfig};
pub use self::error::{ConfigError, GragError, Result};

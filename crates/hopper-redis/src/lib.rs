//! hopper-redis
//!
//! Redis implementation of the hopper-core ports.

pub mod backend;
pub mod config;
mod scripts;

pub use backend::RedisBackend;
pub use config::RedisConfig;

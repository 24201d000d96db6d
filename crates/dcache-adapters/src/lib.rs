//! Store adapters for dcache
//!
//! - [`RedisBackend`]: native commands on a Redis-compatible server
//! - [`SqlBackend`]: emulation on SQLite tables

pub mod config;
pub mod redis;
pub mod sql;

pub use config::{RedisConfig, SqlConfig};
pub use self::redis::RedisBackend;
pub use sql::SqlBackend;

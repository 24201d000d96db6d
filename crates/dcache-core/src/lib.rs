//! dcache core library
//!
//! The backend contract, error taxonomy and shared types used by the store
//! adapters and the typed façade.

pub mod error;
pub mod keys;
pub mod lock;
pub mod ports;
pub mod types;

pub use error::{CacheError, CacheResult};
pub use ports::{CacheBackend, KeyPageFn};
pub use types::*;

//! Port traits (interfaces) implemented by the store adapters

pub mod backend;

pub use backend::{CacheBackend, KeyPageFn};

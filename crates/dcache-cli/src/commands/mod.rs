//! Subcommand implementations

pub mod kv;
pub mod lock;
pub mod map;
pub mod pubsub;

use anyhow::Result;
use colored::Colorize;
use dcache::{CacheError, CacheResult};

/// Print `(nil)` for a missing entry instead of failing the command
fn or_nil<T>(result: CacheResult<T>, print: impl FnOnce(T)) -> Result<()> {
    match result {
        Ok(value) => {
            print(value);
            Ok(())
        }
        Err(CacheError::NotFound) => {
            println!("{}", "(nil)".dimmed());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

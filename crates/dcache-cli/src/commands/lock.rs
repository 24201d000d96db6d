//! Lock commands

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use dcache::{Cache, CacheError};

pub async fn hold(cache: &Cache, name: &str, hold: u64, timeout: u64) -> Result<()> {
    let hold = Duration::from_secs(hold);
    match cache.lock(name, hold, Duration::from_secs(timeout)).await {
        Ok(()) => {}
        Err(CacheError::LockTimeout(_)) => {
            anyhow::bail!("lock {} is held by someone else (waited {}s)", name, timeout)
        }
        Err(e) => return Err(e.into()),
    }

    println!(
        "{} {} for up to {}s, Ctrl-C to release",
        "Holding".green(),
        name.bold(),
        hold.as_secs()
    );
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(hold) => {
            println!("{}", "Hold time elapsed, the lock has lapsed".yellow());
        }
    }

    release(cache, name).await
}

pub async fn release(cache: &Cache, name: &str) -> Result<()> {
    cache.unlock(name).await?;
    println!("{} {}", "Released".green(), name.bold());
    Ok(())
}

//! Scalar, counter and key commands

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use dcache::Cache;

use super::or_nil;

pub async fn get(cache: &Cache, key: &str) -> Result<()> {
    or_nil(cache.get_string(key).await, |value| println!("{}", value))
}

pub async fn set(cache: &Cache, key: &str, value: &str, ttl: Option<u64>, nx: bool) -> Result<()> {
    let ttl = ttl.map(Duration::from_secs);
    if nx {
        if cache.set_if_not_exists(key, &value.to_string(), ttl).await? {
            println!("{}", "OK".green());
        } else {
            println!("{}", "(not set, key exists)".yellow());
        }
        return Ok(());
    }

    cache.store(key, &value.to_string(), ttl).await?;
    println!("{}", "OK".green());
    Ok(())
}

pub async fn del(cache: &Cache, key: &str) -> Result<()> {
    println!("{}", cache.delete(key).await?);
    Ok(())
}

pub async fn exists(cache: &Cache, keys: &[String]) -> Result<()> {
    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
    println!("{}", cache.count(&keys).await?);
    Ok(())
}

pub async fn expire(cache: &Cache, key: &str, seconds: u64) -> Result<()> {
    let present = cache.expire(key, Duration::from_secs(seconds)).await?;
    println!("{}", u8::from(present));
    Ok(())
}

pub async fn incr(cache: &Cache, key: &str) -> Result<()> {
    println!("{}", cache.increase(key).await?);
    Ok(())
}

pub async fn decr(cache: &Cache, key: &str) -> Result<()> {
    or_nil(cache.decrease(key).await, |value| println!("{}", value))
}

pub async fn keys(cache: &Cache, pattern: &str) -> Result<()> {
    let mut total = 0usize;
    cache
        .scan_keys_with(pattern, |page| {
            total += page.len();
            for key in page {
                println!("{}", key);
            }
            Ok(())
        })
        .await?;
    eprintln!("{}", format!("{} key(s)", total).dimmed());
    Ok(())
}

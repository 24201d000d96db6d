//! Map commands

use std::collections::HashMap;

use anyhow::Result;
use colored::Colorize;
use dcache::Cache;

use super::or_nil;

fn print_fields(fields: HashMap<String, String>) {
    let mut fields: Vec<_> = fields.into_iter().collect();
    fields.sort();
    for (field, value) in fields {
        println!("{} {}", field.cyan(), value);
    }
}

pub async fn hget(cache: &Cache, key: &str, field: &str) -> Result<()> {
    or_nil(cache.get_map_field::<String>(key, field).await, |value| {
        println!("{}", value)
    })
}

pub async fn hset(cache: &Cache, key: &str, field: &str, value: &str) -> Result<()> {
    cache.set_map_field(key, field, &value.to_string()).await?;
    println!("{}", "OK".green());
    Ok(())
}

pub async fn hdel(cache: &Cache, key: &str, field: &str) -> Result<()> {
    cache.delete_map_field(key, field).await?;
    println!("{}", "OK".green());
    Ok(())
}

pub async fn hgetall(cache: &Cache, key: &str) -> Result<()> {
    or_nil(cache.get_map::<String>(key).await, print_fields)
}

pub async fn hscan(cache: &Cache, key: &str, pattern: &str) -> Result<()> {
    cache
        .scan_map_with::<String, _>(key, pattern, |page| {
            print_fields(page);
            Ok(())
        })
        .await?;
    Ok(())
}

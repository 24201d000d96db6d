//! Pub/sub commands

use anyhow::Result;
use colored::Colorize;
use dcache::{Cache, Delivery};

pub async fn publish(cache: &Cache, channel: &str, message: &str) -> Result<()> {
    cache.publish(channel, &message.to_string()).await?;
    println!("{}", "OK".green());
    Ok(())
}

pub async fn subscribe(cache: &Cache, channel: &str) -> Result<()> {
    let mut subscription = cache.subscribe::<String>(channel).await?;
    eprintln!("{} {}", "Subscribed to".green(), subscription.channel().bold());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = subscription.recv() => match next {
                Some(Delivery::Message(message)) => println!("{}", message),
                Some(Delivery::Interrupted(reason)) => {
                    eprintln!("{} {}", "Interrupted:".yellow(), reason);
                }
                None => break,
            },
        }
    }

    subscription.cancel();
    Ok(())
}

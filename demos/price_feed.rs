//! Demand-driven feed demo.
//!
//! Serves newline-delimited JSON prices on a local TCP port, then lets a
//! `Feed` follow subscriber demand: the connection opens on the first
//! subscribe and closes on the last unsubscribe.
//!
//! Run: `cargo run --example price_feed`

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

use livecell::{Feed, FeedOptions, TcpLineConnector, Update};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // A tiny price server: one line per tick.
    tokio::spawn(async move {
        loop {
            let Ok((mut peer, _)) = listener.accept().await else {
                return;
            };
            println!("[server] client connected");
            let mut price = 100.0f64;
            while peer.write_all(format!("{price}\n").as_bytes()).await.is_ok() {
                price += 0.25;
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            println!("[server] client gone");
        }
    });

    let feed: Feed<f64> = Feed::new(
        Arc::new(TcpLineConnector),
        FeedOptions::default()
            .with_url(addr.to_string())
            .with_auto_reconnect(),
    );

    println!("no subscribers yet: nothing is connected");
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut off = feed.subscribe(|update| match update {
        Update::Value(price) => println!("[feed] price = {price}"),
        Update::Error(err) => println!("[feed] error: {err}"),
        Update::Null => println!("[feed] no value"),
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    println!("unsubscribing: the connection closes");
    off.call();
    tokio::time::sleep(Duration::from_millis(500)).await;

    feed.destroy().await?;
    Ok(())
}

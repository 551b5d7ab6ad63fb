//! Socket-channel demo: idle sends and periodic re-send.
//!
//! Starts a local echo-ish TCP peer, then drives a `Channel`: a send on the
//! idle channel transparently opens the connection, and `set_repeated`
//! keeps re-sending a heartbeat until cancelled.
//!
//! Run: `cargo run --example control_channel`

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

use livecell::{Channel, ChannelOptions, TcpLineConnector};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Heartbeat {
    seq: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // Peer that prints every inbound line.
    tokio::spawn(async move {
        loop {
            let Ok((peer, _)) = listener.accept().await else {
                return;
            };
            println!("[peer] connected");
            let mut lines = BufReader::new(peer).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                println!("[peer] got: {line}");
            }
            println!("[peer] disconnected");
        }
    });

    let channel: Channel<Heartbeat> = Channel::new(
        Arc::new(TcpLineConnector),
        ChannelOptions::new(addr.to_string())
            .with_label("control")
            .with_reconnect_window(Duration::from_secs(1), Duration::from_secs(3)),
    );

    // The channel is idle; this send opens the connection transparently.
    let done = channel.send(&Heartbeat { seq: 0 })?;
    done.wait().await?;
    println!("one-shot send acknowledged");

    // Keep the connection under demand and heartbeat every second.
    let _off = channel.subscribe(|_| {});
    let seq = Arc::new(std::sync::atomic::AtomicU64::new(1));
    let source = Arc::clone(&seq);
    let heartbeat = channel.set_repeated(Duration::from_secs(1), move || Heartbeat {
        seq: source.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
    })?;

    tokio::time::sleep(Duration::from_secs(5)).await;
    heartbeat.cancel();
    println!("heartbeat cancelled");

    channel.destroy().await?;
    Ok(())
}

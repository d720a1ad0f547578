//! End-to-end throughput benchmark for the relay.
//!
//! Connects a number of WebSocket clients to one room of a running server,
//! has each of them send as fast as it can, and counts received messages.
//! Clients that fall behind are evicted by the server, so the reported
//! throughput is what the room sustains for consumers that keep up.

use futures_util::{SinkExt, StreamExt};
use relay_bench::inbound_payload;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8000/ws/benchmark";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_clients = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);

    println!("Relay end-to-end throughput benchmark");
    println!("Make sure the server is running: cargo run --release --bin relay");
    println!();

    run_room_benchmark(num_clients).await;
}

async fn run_room_benchmark(num_clients: usize) {
    println!("Room benchmark: {} clients", num_clients);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let message_count = Arc::new(AtomicU64::new(0));
    let evicted = Arc::new(AtomicU64::new(0));
    let barrier = Arc::new(Barrier::new(num_clients + 1));

    let mut handles = Vec::new();

    for client_id in 0..num_clients {
        let msg_count = Arc::clone(&message_count);
        let evicted = Arc::clone(&evicted);
        let barrier = Arc::clone(&barrier);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_client(client_id, msg_count, evicted, barrier).await {
                eprintln!("Client {} error: {}", client_id, e);
            }
        });
        handles.push(handle);
    }

    // Wait for all clients to connect
    barrier.wait().await;
    println!("All {} clients connected", num_clients);

    println!("Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    message_count.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let total_messages = message_count.load(Ordering::SeqCst);
    let msgs_per_sec = total_messages as f64 / elapsed.as_secs_f64();

    println!();
    println!("Clients:          {:>10}", num_clients);
    println!("Duration:         {:>10.2}s", elapsed.as_secs_f64());
    println!("Total messages:   {:>10}", total_messages);
    println!("Throughput:       {:>10.0} msg/s", msgs_per_sec);
    println!(
        "Per client:       {:>10.0} msg/s",
        msgs_per_sec / num_clients as f64
    );
    println!("Evicted clients:  {:>10}", evicted.load(Ordering::SeqCst));

    for handle in handles {
        handle.abort();
    }
}

async fn run_client(
    client_id: usize,
    message_count: Arc<AtomicU64>,
    evicted: Arc<AtomicU64>,
    barrier: Arc<Barrier>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let url = format!("{}?username=bench-{}", SERVER_URL, client_id);
    let (ws, _) = connect_async(url).await?;
    let (mut sender, mut receiver) = ws.split();

    barrier.wait().await;

    let payload = inbound_payload(64);
    let publish_msg = Message::Text(String::from_utf8(payload.to_vec())?);

    let recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(_)) => {
                    message_count.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Message::Close(_)) | Err(_) => {
                    evicted.fetch_add(1, Ordering::Relaxed);
                    break;
                }
                Ok(_) => {}
            }
        }
    });

    loop {
        if sender.send(publish_msg.clone()).await.is_err() {
            break;
        }
        // Small yield to not starve the receiver task
        tokio::task::yield_now().await;
    }

    recv_task.abort();
    Ok(())
}

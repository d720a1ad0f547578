//! Client pumps.
//!
//! Each connection runs a read pump and a write pump as separate tasks,
//! plus a one-shot history replay. The pumps talk to the hub and to each
//! other only through channels:
//!
//! - read pump: connection → hub broadcast intake
//! - write pump: outbound queue → connection
//! - history: store → outbound queue
//!
//! When the write pump exits (queue closed by the hub, or a failed write)
//! it severs the read pump, which unregisters the client.

use crate::client::{Client, ClientId};
use crate::hub::HubHandle;
use crate::manager::HubManager;
use crate::store::{recent_with_timeout, MessageStore};
use bytes::Bytes;
use relay_protocol::codec;
use relay_transport::{FrameSink, FrameSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Forward every frame from `source` to the hub's broadcast intake.
///
/// Returns when the connection fails or closes, when `severed` fires, or
/// when the hub stops. The client is unregistered on the way out.
pub async fn read_pump<S: FrameSource>(
    mut source: S,
    client: ClientId,
    hub: HubHandle,
    mut severed: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;

            _ = &mut severed => {
                debug!(client = %client, "Write side closed, stopping reader");
                break;
            }

            frame = source.recv() => match frame {
                Ok(Some(payload)) => {
                    if hub.broadcast(payload).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(client = %client, "Connection closed by peer");
                    break;
                }
                Err(e) => {
                    debug!(client = %client, error = %e, "Read error");
                    break;
                }
            }
        }
    }

    // The hub may already be gone after a teardown.
    let _ = hub.unregister(&client).await;
}

/// Drain the outbound queue into `sink`.
///
/// A closed queue means the hub let go of this client: a close frame is
/// sent and the pump exits. Dropping `sever` on exit stops the read pump.
pub async fn write_pump<K: FrameSink>(
    mut sink: K,
    mut queue: mpsc::Receiver<Bytes>,
    sever: oneshot::Sender<()>,
) {
    loop {
        match queue.recv().await {
            Some(payload) => {
                if let Err(e) = sink.send_text(payload).await {
                    debug!(error = %e, "Write error");
                    break;
                }
            }
            None => break,
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Close failed");
    }
    drop(sever);
}

/// Replay recent room history into a client's outbound queue.
///
/// Returns the number of messages queued. When the queue cannot take the
/// whole window, the oldest entries are skipped so the client still sees
/// the most recent ones. Replay stops early if the hub has closed the
/// queue.
pub async fn fetch_history(
    store: &dyn MessageStore,
    room: &str,
    queue: mpsc::WeakSender<Bytes>,
    limit: usize,
    timeout: Duration,
) -> usize {
    let history = match recent_with_timeout(store, room, limit, timeout).await {
        Ok(history) => history,
        Err(e) => {
            warn!(room = %room, error = %e, "Failed to load history");
            return 0;
        }
    };

    let Some(free) = queue.upgrade().map(|tx| tx.capacity()) else {
        return 0;
    };
    let skipped = history.len().saturating_sub(free);
    if skipped > 0 {
        warn!(room = %room, skipped, "Outbound queue too small, truncating history");
    }

    let mut queued = 0;
    for message in &history[skipped..] {
        let payload = match codec::encode(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(room = %room, error = %e, "Skipping unencodable history entry");
                continue;
            }
        };

        let Some(tx) = queue.upgrade() else {
            break;
        };
        match tx.try_send(payload) {
            Ok(()) => queued += 1,
            Err(TrySendError::Full(_)) => {
                warn!(room = %room, queued, "Outbound queue full, truncating history");
                break;
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }

    debug!(room = %room, queued, "History replayed");
    queued
}

/// Serve one connection in `hub`'s room until it disconnects.
///
/// Registers a new client with the hub, starts the write pump and history
/// replay, and runs the read pump on the current task. `manager` supplies
/// the store and hub configuration.
pub async fn run_session<S, K>(
    manager: &HubManager,
    hub: HubHandle,
    id: ClientId,
    username: &str,
    source: S,
    sink: K,
) where
    S: FrameSource,
    K: FrameSink + 'static,
{
    let config = manager.config();
    let room = hub.room().to_string();

    let (handle, queue) = Client::new(id.clone(), username, config.queue_capacity);
    let history = handle.weak_sender();
    if let Err(e) = hub.register(handle).await {
        warn!(client = %id, error = %e, "Could not join room");
    }

    let (sever, severed) = oneshot::channel();
    let writer = tokio::spawn(write_pump(sink, queue, sever));

    let store = Arc::clone(manager.store());
    let history_room = room.clone();
    let limit = config.history_limit;
    let timeout = config.store_timeout;
    tokio::spawn(async move {
        fetch_history(store.as_ref(), &history_room, history, limit, timeout).await;
    });

    debug!(client = %id, room = %room, user = %username, "Session started");
    read_pump(source, id.clone(), hub, severed).await;

    if let Err(e) = writer.await {
        warn!(client = %id, error = %e, "Write pump panicked");
    }
    debug!(client = %id, room = %room, "Session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::HubConfig;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use relay_protocol::ChatMessage;
    use relay_transport::memory::{self, Peer, PeerEvent};
    use relay_transport::TransportError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Semaphore;
    use tokio::task::JoinHandle;

    fn manager_with(store: Arc<MemoryStore>) -> Arc<HubManager> {
        Arc::new(HubManager::new(store, HubConfig::default()))
    }

    fn connect(manager: &Arc<HubManager>, room: &str, id: &str) -> (Peer, JoinHandle<()>) {
        let (source, sink, peer) = memory::pair();
        let manager = Arc::clone(manager);
        let room = room.to_string();
        let id = ClientId::new(id);
        let task = tokio::spawn(async move {
            let hub = manager.get_or_create(&room).await;
            run_session(&manager, hub, id, "tester", source, sink).await;
        });
        (peer, task)
    }

    async fn wait_for_members(manager: &HubManager, room: &str, expected: usize) {
        let hub = manager.get_or_create(room).await;
        for _ in 0..1000 {
            if hub.member_count().await.unwrap() == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("room {} never reached {} members", room, expected);
    }

    async fn next_message(peer: &mut Peer) -> ChatMessage {
        match peer.recv().await {
            Some(PeerEvent::Text(data)) => serde_json::from_slice(&data).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_frames_are_relayed_between_sessions() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        let (alice, _a) = connect(&manager, "general", "alice");
        let (mut bob, _b) = connect(&manager, "general", "bob");
        wait_for_members(&manager, "general", 2).await;

        alice.send(r#"{"username":"alice","content":"hi bob"}"#);

        let msg = next_message(&mut bob).await;
        assert_eq!(msg.content, "hi bob");
        assert_eq!(msg.room_id, "general");
    }

    #[tokio::test]
    async fn test_read_error_unregisters_client() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        let (mut peer, task) = connect(&manager, "general", "c1");
        wait_for_members(&manager, "general", 1).await;

        peer.fail("connection reset");
        task.await.unwrap();

        let hub = manager.get("general").await.unwrap();
        assert_eq!(hub.member_count().await.unwrap(), 0);
        // The unregister closed the queue, so the writer sent a close frame.
        assert_eq!(peer.until_closed().await, Vec::<Bytes>::new());
    }

    #[tokio::test]
    async fn test_clean_disconnect_ends_session() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        let (mut peer, task) = connect(&manager, "general", "c1");
        wait_for_members(&manager, "general", 1).await;

        peer.disconnect();
        task.await.unwrap();
        wait_for_members(&manager, "general", 0).await;
    }

    #[tokio::test]
    async fn test_history_is_replayed_oldest_first() {
        let store = Arc::new(MemoryStore::new());
        let start = Utc::now() - ChronoDuration::hours(1);
        for i in 0..60 {
            let msg = ChatMessage::new("general", "alice", i.to_string())
                .with_timestamp(start + ChronoDuration::seconds(i));
            store.insert(&msg).await.unwrap();
        }
        store
            .insert(&ChatMessage::new("random", "bob", "elsewhere"))
            .await
            .unwrap();

        let manager = manager_with(store);
        let (mut peer, _task) = connect(&manager, "general", "c1");

        let mut history = Vec::new();
        for _ in 0..50 {
            history.push(next_message(&mut peer).await);
        }

        assert_eq!(history[0].content, "10");
        assert_eq!(history[49].content, "59");
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(history.iter().all(|m| m.room_id == "general"));
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_fetch_history_stops_when_queue_closed() {
        let store = MemoryStore::new();
        store
            .insert(&ChatMessage::new("general", "alice", "old"))
            .await
            .unwrap();

        let (handle, _rx) = Client::new(ClientId::new("c1"), "u", 8);
        let weak = handle.weak_sender();
        drop(handle);

        let queued = fetch_history(&store, "general", weak, 50, Duration::from_secs(1)).await;
        assert_eq!(queued, 0);
    }

    #[tokio::test]
    async fn test_fetch_history_respects_queue_capacity() {
        let store = MemoryStore::new();
        let start = Utc::now() - ChronoDuration::minutes(5);
        for i in 0..10 {
            let msg = ChatMessage::new("general", "alice", i.to_string())
                .with_timestamp(start + ChronoDuration::seconds(i));
            store.insert(&msg).await.unwrap();
        }

        let (handle, mut rx) = Client::new(ClientId::new("c1"), "u", 4);
        let queued = fetch_history(
            &store,
            "general",
            handle.weak_sender(),
            50,
            Duration::from_secs(1),
        )
        .await;
        assert_eq!(queued, 4);

        // The newest entries win when the window does not fit.
        let mut contents = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            contents.push(codec::decode(&payload).unwrap().content);
        }
        assert_eq!(contents, ["6", "7", "8", "9"]);
    }

    #[tokio::test]
    async fn test_write_pump_closes_on_queue_closure() {
        let (_source, sink, mut peer) = memory::pair();
        let (handle, queue) = Client::new(ClientId::new("c1"), "u", 8);
        let (sever, mut severed) = oneshot::channel();

        handle.offer(Bytes::from("last words"));
        drop(handle);
        write_pump(sink, queue, sever).await;

        assert_eq!(peer.until_closed().await, vec![Bytes::from("last words")]);
        assert!(severed.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_force_close_disconnects_every_session() {
        let manager = manager_with(Arc::new(MemoryStore::new()));
        let mut sessions = Vec::new();
        for id in ["a", "b", "c"] {
            sessions.push(connect(&manager, "doomed", id));
        }
        wait_for_members(&manager, "doomed", 3).await;

        assert_eq!(manager.force_close("doomed").await, Some(3));
        assert!(!manager.list_rooms().await.contains(&"doomed".to_string()));

        for (mut peer, task) in sessions {
            peer.until_closed().await;
            task.await.unwrap();
        }
    }

    /// A sink that only writes when the test hands out permits.
    struct GatedSink {
        gate: Arc<Semaphore>,
        sent: Arc<Mutex<Vec<Bytes>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl FrameSink for GatedSink {
        async fn send_text(&mut self, data: Bytes) -> Result<(), TransportError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| TransportError::ConnectionClosed)?;
            permit.forget();
            self.sent.lock().unwrap().push(data);
            Ok(())
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_slow_session_is_evicted_and_closed() {
        let config = HubConfig {
            queue_capacity: 4,
            ..HubConfig::default()
        };
        let manager = Arc::new(HubManager::new(Arc::new(MemoryStore::new()), config));

        let gate = Arc::new(Semaphore::new(0));
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let sink = GatedSink {
            gate: Arc::clone(&gate),
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        };

        let (source, _sink, _peer) = memory::pair();
        let session = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let hub = manager.get_or_create("general").await;
                run_session(&manager, hub, ClientId::new("slow"), "slow", source, sink).await;
            })
        };
        wait_for_members(&manager, "general", 1).await;

        let hub = manager.get_or_create("general").await;
        for i in 0..20 {
            let payload = format!(r#"{{"username":"a","content":"{}"}}"#, i);
            hub.broadcast(payload).await.unwrap();
        }

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.members, 0);
        assert_eq!(stats.evicted, 1);

        // Let the stuck writer drain what it already had, then it must close.
        gate.add_permits(64);
        tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .expect("session did not end after eviction")
            .unwrap();

        assert!(closed.load(Ordering::SeqCst));
        let sent = sent.lock().unwrap();
        assert!(!sent.is_empty() && sent.len() <= 5);
        assert_eq!(codec::decode(&sent[0]).unwrap().content, "0");
    }
}

//! Fan-out hub: per-service WebSocket connections and outgoing webhook
//! delivery.

pub mod delivery;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bridge_db::Database;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{DELIVERY_QUEUE, DELIVERY_WORKERS, WS_SEND_QUEUE};
use crate::types::DownstreamTransport;

use delivery::{DeliveryJob, DeliveryPool};

/// One live downstream WebSocket connection.
///
/// Frames go through a bounded queue; on overflow the oldest frame is
/// dropped and counted, and the connection stays alive.
pub struct WsConn {
    pub id: String,
    pub service_id: String,
    queue: Mutex<VecDeque<String>>,
    notify: Notify,
    closed: AtomicBool,
    dropped_frames: AtomicU64,
}

impl WsConn {
    fn new(service_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            service_id: service_id.to_string(),
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped_frames: AtomicU64::new(0),
        }
    }

    /// Queue a frame for this connection.
    pub fn push(&self, frame: &str) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() >= WS_SEND_QUEUE {
                queue.pop_front();
                let dropped = self.dropped_frames.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    conn_id = %self.id,
                    service_id = %self.service_id,
                    dropped,
                    "Slow fan-out connection, dropped oldest frame"
                );
            }
            queue.push_back(frame.to_string());
        }
        self.notify.notify_one();
    }

    /// Next frame to write, or `None` once the connection is closed and
    /// drained.
    pub async fn next(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
            {
                return Some(frame);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }
}

pub struct FanoutHub {
    connections: Mutex<HashMap<String, Vec<Arc<WsConn>>>>,
    delivery: DeliveryPool,
}

impl FanoutHub {
    pub fn new(db: Database, signing_secret: Option<String>, shutdown: CancellationToken) -> Self {
        let delivery = DeliveryPool::start(
            db,
            signing_secret,
            shutdown,
            DELIVERY_WORKERS,
            DELIVERY_QUEUE,
        );
        Self {
            connections: Mutex::new(HashMap::new()),
            delivery,
        }
    }

    /// Register a new downstream connection for a service.
    pub fn register(&self, service_id: &str) -> Arc<WsConn> {
        let conn = Arc::new(WsConn::new(service_id));
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(service_id.to_string())
            .or_default()
            .push(conn.clone());
        tracing::info!(service_id, conn_id = %conn.id, "Fan-out connection registered");
        conn
    }

    /// Drop a connection from the registry and close its queue.
    pub fn unregister(&self, conn: &WsConn) {
        conn.close();
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = connections.get_mut(&conn.service_id) {
            list.retain(|c| c.id != conn.id);
            if list.is_empty() {
                connections.remove(&conn.service_id);
            }
        }
        tracing::info!(
            service_id = %conn.service_id,
            conn_id = %conn.id,
            "Fan-out connection unregistered"
        );
    }

    /// Deliver one envelope to one interested downstream.
    pub fn deliver(
        &self,
        service_id: &str,
        transport: &DownstreamTransport,
        envelope_json: &str,
        event_type: &str,
        broadcaster_user_id: &str,
    ) {
        match transport {
            DownstreamTransport::Ws => self.send_ws(service_id, envelope_json),
            DownstreamTransport::Webhook { url } => self.delivery.enqueue(DeliveryJob {
                service_id: service_id.to_string(),
                url: url.clone(),
                body: envelope_json.to_string(),
                event_type: event_type.to_string(),
                broadcaster_user_id: broadcaster_user_id.to_string(),
            }),
        }
    }

    /// Write a frame to every live connection of a service.
    pub fn send_ws(&self, service_id: &str, frame: &str) {
        let conns: Vec<Arc<WsConn>> = {
            let connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
            connections.get(service_id).cloned().unwrap_or_default()
        };
        for conn in conns {
            conn.push(frame);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn pending_deliveries(&self) -> usize {
        self.delivery.pending_jobs()
    }

    /// Wait for queued webhook deliveries to drain, up to the deadline.
    pub async fn drain_deliveries(&self, deadline: std::time::Duration) {
        self.delivery.drain(deadline).await;
    }

    /// Close every live connection (server shutdown).
    pub fn close_all(&self) {
        let mut connections = self.connections.lock().unwrap_or_else(|e| e.into_inner());
        for list in connections.values() {
            for conn in list {
                conn.close();
            }
        }
        connections.clear();
    }
}

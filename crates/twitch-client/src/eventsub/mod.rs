//! EventSub WebSocket session.
//!
//! Maintains a single upstream connection, surfaces welcome/notification/
//! revocation frames to the caller, follows `session_reconnect` URLs, and
//! reconnects with jittered exponential backoff. Subscription creation is
//! the caller's job; this module only owns the socket.

mod connection;

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;

use crate::TwitchError;

const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Fallback watchdog before the server advertises its keepalive interval.
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(10);

/// A frame surfaced from the upstream session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// New session established. All WS-bound subscriptions must be
    /// (re)created under this session id.
    Welcome { session_id: String },
    /// An event notification.
    Notification(NotificationFrame),
    /// Twitch revoked a subscription on this session.
    Revocation {
        subscription_id: String,
        event_type: String,
        status: String,
    },
    /// The connection dropped; a reconnect attempt follows. Subscriptions
    /// bound to the old session are dead until the next `Welcome`.
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct NotificationFrame {
    pub message_id: String,
    pub message_timestamp: String,
    pub subscription_id: String,
    pub event_type: String,
    pub event: serde_json::Value,
}

/// EventSub WebSocket session with auto-reconnect.
///
/// Frames are delivered via `mpsc::Receiver<SessionEvent>`; the returned
/// sender stops the loop.
pub struct EventSubSession;

enum ConnectOutcome {
    /// Server asked us to move to a new URL.
    Reconnect(String),
    /// Shutdown signal received; the loop should end.
    Shutdown,
    /// Connection dropped. `welcomed` reports whether a welcome was seen,
    /// which resets the backoff counter.
    Dropped { welcomed: bool },
}

impl EventSubSession {
    /// Start the session loop against the given URL.
    pub fn start(ws_url: String) -> (mpsc::Receiver<SessionEvent>, mpsc::Sender<()>) {
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(256);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(Self::run_loop(ws_url, event_tx, shutdown_rx));
        (event_rx, shutdown_tx)
    }

    async fn run_loop(
        home_url: String,
        event_tx: mpsc::Sender<SessionEvent>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let mut failures: u32 = 0;
        let mut ws_url = home_url.clone();
        loop {
            if shutdown_rx.try_recv().is_ok() {
                tracing::info!("EventSub session shutdown requested");
                return;
            }
            match Self::connect_once(&ws_url, &event_tx, &mut shutdown_rx).await {
                Ok(ConnectOutcome::Reconnect(next_url)) => {
                    failures = 0;
                    ws_url = next_url;
                    tracing::info!(ws_url = %ws_url, "EventSub reconnect URL accepted");
                }
                Ok(ConnectOutcome::Shutdown) => {
                    tracing::info!("EventSub session closed cleanly");
                    return;
                }
                Ok(ConnectOutcome::Dropped { welcomed }) => {
                    if welcomed {
                        failures = 0;
                        let _ = event_tx.send(SessionEvent::Disconnected).await;
                    }
                    failures += 1;
                    ws_url = home_url.clone();
                    let backoff = Self::backoff_duration(failures);
                    tracing::warn!(
                        attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "EventSub connection dropped, will reconnect"
                    );
                    if Self::sleep_or_shutdown(&mut shutdown_rx, backoff).await {
                        return;
                    }
                }
                Err(e) => {
                    failures += 1;
                    if ws_url != home_url {
                        tracing::warn!("EventSub reconnect URL failed, falling back to home URL");
                        ws_url = home_url.clone();
                    }
                    let backoff = Self::backoff_duration(failures);
                    tracing::warn!(
                        error = %e, attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "EventSub connection failed, will reconnect"
                    );
                    if Self::sleep_or_shutdown(&mut shutdown_rx, backoff).await {
                        return;
                    }
                }
            }
        }
    }

    async fn sleep_or_shutdown(shutdown_rx: &mut mpsc::Receiver<()>, dur: Duration) -> bool {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("EventSub shutdown requested during reconnect backoff");
                true
            }
            _ = tokio::time::sleep(dur) => false,
        }
    }

    fn backoff_duration(failures: u32) -> Duration {
        let base = BASE_BACKOFF * 2u32.saturating_pow(failures.saturating_sub(1));
        let capped = base.min(MAX_BACKOFF);
        let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 4);
        (capped + Duration::from_millis(jitter_ms)).min(MAX_BACKOFF)
    }
}

//! Drives the upstream EventSub WebSocket session.
//!
//! The session socket lives in twitch-client; this loop translates its
//! frames into subscription-manager calls and dedupes message ids against
//! the shared window (rotation can replay in-flight notifications).

use twitch_client::eventsub::{EventSubSession, SessionEvent};

use crate::app::Core;
use crate::dedupe::Seen;
use crate::submgr::RoutedNotification;
use crate::types::UpstreamTransport;

pub async fn run(core: Core) {
    let shutdown = core.shutdown_token().clone();
    let (mut events, stop_tx) = EventSubSession::start(core.config().eventsub_ws_url.clone());
    core.set_session_stop(stop_tx).await;

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                core.manager().on_session_lost();
                tracing::info!("Upstream session loop stopped (shutdown)");
                return;
            }
            event = events.recv() => event,
        };
        let Some(event) = event else {
            core.manager().on_session_lost();
            tracing::info!("Upstream session loop ended");
            return;
        };

        match event {
            SessionEvent::Welcome { session_id } => {
                core.manager().on_session_welcome(&session_id).await;
            }
            SessionEvent::Disconnected => {
                core.manager().on_session_lost();
            }
            SessionEvent::Notification(frame) => {
                if core.seen_message(&frame.message_id) == Seen::Duplicate {
                    tracing::debug!(message_id = %frame.message_id, "Duplicate WS notification dropped");
                    continue;
                }
                let notification = RoutedNotification {
                    message_id: frame.message_id,
                    message_timestamp: frame.message_timestamp,
                    subscription_id: frame.subscription_id,
                    event_type: frame.event_type,
                    event: frame.event,
                    upstream_transport: UpstreamTransport::Ws,
                };
                if let Err(e) = core.manager().route(notification).await {
                    tracing::warn!(error = %e, "Notification routing failed");
                }
            }
            SessionEvent::Revocation {
                subscription_id,
                status,
                ..
            } => {
                core.manager().on_revocation(&subscription_id, &status).await;
            }
        }
    }
}

use std::sync::Arc;

use bridge_db::Database;
use bridge_db::accounts::ServiceAccount;
use bridge_db::subscriptions::SubscriptionRow;
use tokio_util::sync::CancellationToken;
use twitch_client::api::TwitchApiClient;
use twitch_client::auth::TwitchAuth;

use crate::broadcaster::BroadcasterResolver;
use crate::registry::UpsertRequest;

use super::*;

struct Fixture {
    manager: Arc<SubscriptionManager>,
    registry: Arc<InterestRegistry>,
    fanout: Arc<FanoutHub>,
    db: Database,
}

fn fixture() -> Fixture {
    let db = Database::open_in_memory().expect("Failed to create test DB");
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO bot_accounts (id, twitch_user_id, login, access_token, refresh_token, scope, expires_at, enabled)
             VALUES ('bot1', '42', 'botlogin', 'tok', 'ref', 'user:read:chat', 9999999999, true)",
            [],
        )?;
        Ok(())
    })
    .unwrap();

    let config = Arc::new(BridgeConfig {
        client_id: "cid".into(),
        client_secret: "secret".into(),
        eventsub_ws_url: "wss://example".into(),
        webhook_callback_url: None,
        webhook_secret: None,
        service_signing_secret: None,
        server_port: 8900,
        db_path: ":memory:".into(),
    });
    let api = Arc::new(TwitchApiClient::new("cid".into()));
    let auth = Arc::new(TwitchAuth::new("cid".into(), "secret".into()));
    let locks = Arc::new(KeyLocks::new());
    let resolver = Arc::new(BroadcasterResolver::new(api.clone(), auth.clone()));
    let registry = Arc::new(InterestRegistry::new(
        db.clone(),
        resolver,
        locks.clone(),
    ));
    let fanout = Arc::new(FanoutHub::new(db.clone(), None, CancellationToken::new()));
    let enricher = Enricher::new("cid".into(), auth.clone());
    let manager = Arc::new(SubscriptionManager::new(
        db.clone(),
        config,
        api,
        auth,
        registry.clone(),
        fanout.clone(),
        enricher,
        locks,
    ));

    Fixture {
        manager,
        registry,
        fanout,
        db,
    }
}

fn service(id: &str) -> ServiceAccount {
    ServiceAccount {
        id: id.into(),
        display_name: id.into(),
        secret_hash: String::new(),
        bot_allowlist: None,
    }
}

async fn add_interest(fx: &Fixture, svc: &str, event_type: &str) -> InterestKey {
    let outcome = fx
        .registry
        .upsert(
            &service(svc),
            UpsertRequest {
                bot_account_id: "bot1".into(),
                event_type: event_type.into(),
                broadcaster: "12345".into(),
                transport: DownstreamTransport::Ws,
            },
        )
        .await
        .unwrap();
    InterestKey::of(&outcome.interest)
}

fn seed_subscription(db: &Database, id: &str, event_type: &str) {
    db.insert_subscription(&SubscriptionRow {
        id: id.into(),
        bot_account_id: "bot1".into(),
        event_type: event_type.into(),
        broadcaster_user_id: "12345".into(),
        transport: "ws".into(),
        status: "enabled".into(),
        session_id: Some("sess1".into()),
        cost: 0,
        created_at: 100,
        updated_at: 100,
    })
    .unwrap();
}

fn follow_notification(message_id: &str, subscription_id: &str) -> RoutedNotification {
    RoutedNotification {
        message_id: message_id.into(),
        message_timestamp: "2025-06-01T12:00:00Z".into(),
        subscription_id: subscription_id.into(),
        event_type: "channel.follow".into(),
        event: serde_json::json!({
            "broadcaster_user_id": "12345",
            "user_id": "777",
            "user_login": "follower"
        }),
        upstream_transport: UpstreamTransport::Ws,
    }
}

#[tokio::test]
async fn ensure_without_session_parks_ws_keys() {
    let fx = fixture();
    let key = add_interest(&fx, "svcA", "channel.follow").await;

    // No WS session yet: ensure succeeds and the key waits in Pending.
    fx.manager.ensure(&key).await.unwrap();
    assert_eq!(fx.manager.state_counts().get("pending"), Some(&1));
    assert!(fx.db.list_ws_subscriptions().unwrap().is_empty());
}

#[tokio::test]
async fn ensure_reuses_existing_live_row() {
    let fx = fixture();
    let key = add_interest(&fx, "svcA", "channel.follow").await;
    seed_subscription(&fx.db, "sub-1", "channel.follow");

    fx.manager.ensure(&key).await.unwrap();
    assert_eq!(fx.manager.state_counts().get("enabled"), Some(&1));
    // Still exactly one live row.
    assert_eq!(fx.db.list_ws_subscriptions().unwrap().len(), 1);
}

#[tokio::test]
async fn route_delivers_to_interested_service() {
    let fx = fixture();
    add_interest(&fx, "svcA", "channel.follow").await;
    seed_subscription(&fx.db, "sub-1", "channel.follow");

    let conn = fx.fanout.register("svcA");
    fx.manager
        .route(follow_notification("m1", "sub-1"))
        .await
        .unwrap();

    let frame = conn.next().await.unwrap();
    let env: serde_json::Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(env["id"], "m1");
    assert_eq!(env["provider"], "twitch");
    assert_eq!(env["type"], "channel.follow");
    assert_eq!(env["event"]["user_login"], "follower");
}

#[tokio::test]
async fn route_skips_uninterested_services() {
    let fx = fixture();
    add_interest(&fx, "svcA", "channel.follow").await;
    seed_subscription(&fx.db, "sub-1", "channel.follow");

    let other = fx.fanout.register("svcB");
    fx.manager
        .route(follow_notification("m1", "sub-1"))
        .await
        .unwrap();
    other.close();
    assert_eq!(other.next().await, None);
}

#[tokio::test]
async fn route_unknown_subscription_is_dropped() {
    let fx = fixture();
    let conn = fx.fanout.register("svcA");
    fx.manager
        .route(follow_notification("m1", "sub-unknown"))
        .await
        .unwrap();
    conn.close();
    assert_eq!(conn.next().await, None);
}

#[tokio::test]
async fn route_falls_back_to_type_and_broadcaster() {
    let fx = fixture();
    add_interest(&fx, "svcA", "channel.follow").await;
    seed_subscription(&fx.db, "sub-legacy", "channel.follow");

    let conn = fx.fanout.register("svcA");
    // The notification carries a subscription id we never recorded.
    fx.manager
        .route(follow_notification("m1", "sub-new-id"))
        .await
        .unwrap();

    let frame = conn.next().await.unwrap();
    assert!(frame.contains("\"id\":\"m1\""));
}

#[tokio::test]
async fn stream_events_update_channel_state() {
    let fx = fixture();
    add_interest(&fx, "svcA", "stream.online").await;
    seed_subscription(&fx.db, "sub-on", "stream.online");

    let mut n = follow_notification("m1", "sub-on");
    n.event_type = "stream.online".into();
    fx.manager.route(n).await.unwrap();

    let state = fx.db.get_channel_state("bot1", "12345").unwrap().unwrap();
    assert!(state.is_live);

    seed_subscription(&fx.db, "sub-off", "stream.offline");
    add_interest(&fx, "svcA", "stream.offline").await;
    let mut n = follow_notification("m2", "sub-off");
    n.event_type = "stream.offline".into();
    fx.manager.route(n).await.unwrap();

    let state = fx.db.get_channel_state("bot1", "12345").unwrap().unwrap();
    assert!(!state.is_live);
}

#[tokio::test]
async fn subscription_error_reaches_every_interested_service_once() {
    let fx = fixture();
    let key = add_interest(&fx, "svcA", "channel.follow").await;
    add_interest(&fx, "svcB", "channel.follow").await;

    let a = fx.fanout.register("svcA");
    let b = fx.fanout.register("svcB");

    fx.manager.emit_subscription_error(
        &key,
        "insufficient_permissions",
        "broadcaster has not authorized this bot",
        UpstreamTransport::Ws,
    );
    // Identical failure right after: throttled for both services.
    fx.manager.emit_subscription_error(
        &key,
        "insufficient_permissions",
        "broadcaster has not authorized this bot",
        UpstreamTransport::Ws,
    );

    for conn in [&a, &b] {
        let frame = conn.next().await.unwrap();
        let env: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(env["type"], "subscription.error");
        assert_eq!(env["event"]["error_code"], "insufficient_permissions");
        assert_eq!(env["event"]["event_type"], "channel.follow");
        assert_eq!(env["event"]["bot_account_id"], "bot1");
        conn.close();
        assert_eq!(conn.next().await, None, "second envelope was not throttled");
    }
}

#[tokio::test]
async fn different_error_codes_are_throttled_independently() {
    let fx = fixture();
    let key = add_interest(&fx, "svcA", "channel.follow").await;
    let conn = fx.fanout.register("svcA");

    fx.manager
        .emit_subscription_error(&key, "insufficient_permissions", "no auth", UpstreamTransport::Ws);
    fx.manager
        .emit_subscription_error(&key, "unauthorized", "token rejected", UpstreamTransport::Ws);

    let first: serde_json::Value =
        serde_json::from_str(&conn.next().await.unwrap()).unwrap();
    let second: serde_json::Value =
        serde_json::from_str(&conn.next().await.unwrap()).unwrap();
    assert_ne!(first["event"]["error_code"], second["event"]["error_code"]);
}

#[tokio::test]
async fn release_keeps_subscription_while_interests_remain() {
    let fx = fixture();
    let key = add_interest(&fx, "svcA", "channel.follow").await;
    seed_subscription(&fx.db, "sub-1", "channel.follow");

    fx.manager.release(&key).await.unwrap();
    assert!(fx.db.get_subscription("sub-1").unwrap().is_some());
}

#[tokio::test]
async fn welcome_tracks_session_and_is_idempotent() {
    let fx = fixture();
    assert_eq!(fx.manager.current_session_id(), None);

    fx.manager.on_session_welcome("sess-1").await;
    assert_eq!(fx.manager.current_session_id().as_deref(), Some("sess-1"));

    // Same session id again is a no-op.
    fx.manager.on_session_welcome("sess-1").await;
    assert_eq!(fx.manager.current_session_id().as_deref(), Some("sess-1"));

    fx.manager.on_session_lost();
    assert_eq!(fx.manager.current_session_id(), None);
}

#[tokio::test]
async fn welcome_invalidates_ws_rows() {
    let fx = fixture();
    seed_subscription(&fx.db, "sub-old", "channel.follow");

    fx.manager.on_session_welcome("sess-2").await;
    assert!(
        fx.db.get_subscription("sub-old").unwrap().is_none(),
        "rows bound to the dead session must be dropped"
    );
}

#[tokio::test]
async fn webhook_verification_enables_row() {
    let fx = fixture();
    fx.db
        .insert_subscription(&SubscriptionRow {
            id: "sub-wh".into(),
            bot_account_id: "bot1".into(),
            event_type: "channel.follow".into(),
            broadcaster_user_id: "12345".into(),
            transport: "webhook".into(),
            status: "pending".into(),
            session_id: None,
            cost: 1,
            created_at: 100,
            updated_at: 100,
        })
        .unwrap();

    fx.manager.on_webhook_verified("sub-wh");
    let row = fx.db.get_subscription("sub-wh").unwrap().unwrap();
    assert_eq!(row.status, "enabled");
}

#[test]
fn upstream_status_mapping() {
    assert_eq!(map_upstream_status("enabled"), "enabled");
    assert_eq!(
        map_upstream_status("webhook_callback_verification_pending"),
        "pending"
    );
    assert_eq!(
        map_upstream_status("webhook_callback_verification_failed"),
        "failed"
    );
}

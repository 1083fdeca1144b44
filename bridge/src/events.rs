//! Static catalog of supported EventSub event types.
//!
//! Each entry records the subscription version, the condition shape, the
//! user scope required for creation, and which upstream transports Twitch
//! accepts for it.

use serde_json::json;

pub const EVENT_CHAT_MESSAGE: &str = "channel.chat.message";
pub const EVENT_CHAT_NOTIFICATION: &str = "channel.chat.notification";
pub const EVENT_CHANNEL_FOLLOW: &str = "channel.follow";
pub const EVENT_CHANNEL_SUBSCRIBE: &str = "channel.subscribe";
pub const EVENT_CHANNEL_CHEER: &str = "channel.cheer";
pub const EVENT_CHANNEL_RAID: &str = "channel.raid";
pub const EVENT_CHANNEL_UPDATE: &str = "channel.update";
pub const EVENT_STREAM_ONLINE: &str = "stream.online";
pub const EVENT_STREAM_OFFLINE: &str = "stream.offline";
pub const EVENT_REWARD_REDEMPTION: &str = "channel.channel_points_custom_reward_redemption.add";
pub const EVENT_SUBSCRIPTION_GIFT: &str = "channel.subscription.gift";
pub const EVENT_SUBSCRIPTION_MESSAGE: &str = "channel.subscription.message";
pub const EVENT_SHOUTOUT_RECEIVE: &str = "channel.shoutout.receive";

pub const EVENT_DROP_ENTITLEMENT_GRANT: &str = "drop.entitlement.grant";
pub const EVENT_EXTENSION_BITS_TRANSACTION: &str = "extension.bits_transaction.create";
pub const EVENT_USER_AUTH_GRANT: &str = "user.authorization.grant";
pub const EVENT_USER_AUTH_REVOKE: &str = "user.authorization.revoke";

/// Shape of the condition object Twitch expects for an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConditionShape {
    /// `{ broadcaster_user_id }`
    Broadcaster,
    /// `{ broadcaster_user_id, moderator_user_id: <bot> }`
    BroadcasterWithModerator,
    /// `{ broadcaster_user_id, user_id: <bot> }`
    BroadcasterWithUser,
    /// `{ to_broadcaster_user_id }`
    RaidTarget,
    /// `{ client_id }`
    ClientId,
}

#[derive(Debug, Clone, Copy)]
pub struct EventTypeInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub ws_capable: bool,
    pub webhook_capable: bool,
    /// Twitch only delivers this type over webhook.
    pub webhook_only: bool,
    /// User scope the creating token must carry, when any.
    pub required_scope: Option<&'static str>,
    shape: ConditionShape,
}

const CATALOG: &[EventTypeInfo] = &[
    EventTypeInfo {
        name: EVENT_CHAT_MESSAGE,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("user:read:chat"),
        shape: ConditionShape::BroadcasterWithUser,
    },
    EventTypeInfo {
        name: EVENT_CHAT_NOTIFICATION,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("user:read:chat"),
        shape: ConditionShape::BroadcasterWithUser,
    },
    EventTypeInfo {
        name: EVENT_CHANNEL_FOLLOW,
        version: "2",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("moderator:read:followers"),
        shape: ConditionShape::BroadcasterWithModerator,
    },
    EventTypeInfo {
        name: EVENT_CHANNEL_SUBSCRIBE,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("channel:read:subscriptions"),
        shape: ConditionShape::Broadcaster,
    },
    EventTypeInfo {
        name: EVENT_CHANNEL_CHEER,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("bits:read"),
        shape: ConditionShape::Broadcaster,
    },
    EventTypeInfo {
        name: EVENT_CHANNEL_RAID,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: None,
        shape: ConditionShape::RaidTarget,
    },
    EventTypeInfo {
        name: EVENT_CHANNEL_UPDATE,
        version: "2",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: None,
        shape: ConditionShape::Broadcaster,
    },
    EventTypeInfo {
        name: EVENT_STREAM_ONLINE,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: None,
        shape: ConditionShape::Broadcaster,
    },
    EventTypeInfo {
        name: EVENT_STREAM_OFFLINE,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: None,
        shape: ConditionShape::Broadcaster,
    },
    EventTypeInfo {
        name: EVENT_REWARD_REDEMPTION,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("channel:read:redemptions"),
        shape: ConditionShape::Broadcaster,
    },
    EventTypeInfo {
        name: EVENT_SUBSCRIPTION_GIFT,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("channel:read:subscriptions"),
        shape: ConditionShape::Broadcaster,
    },
    EventTypeInfo {
        name: EVENT_SUBSCRIPTION_MESSAGE,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("channel:read:subscriptions"),
        shape: ConditionShape::Broadcaster,
    },
    EventTypeInfo {
        name: EVENT_SHOUTOUT_RECEIVE,
        version: "1",
        ws_capable: true,
        webhook_capable: true,
        webhook_only: false,
        required_scope: Some("moderator:read:shoutouts"),
        shape: ConditionShape::BroadcasterWithModerator,
    },
    EventTypeInfo {
        name: EVENT_DROP_ENTITLEMENT_GRANT,
        version: "1",
        ws_capable: false,
        webhook_capable: true,
        webhook_only: true,
        required_scope: None,
        shape: ConditionShape::ClientId,
    },
    EventTypeInfo {
        name: EVENT_EXTENSION_BITS_TRANSACTION,
        version: "1",
        ws_capable: false,
        webhook_capable: true,
        webhook_only: true,
        required_scope: None,
        shape: ConditionShape::ClientId,
    },
    EventTypeInfo {
        name: EVENT_USER_AUTH_GRANT,
        version: "1",
        ws_capable: false,
        webhook_capable: true,
        webhook_only: true,
        required_scope: None,
        shape: ConditionShape::ClientId,
    },
    EventTypeInfo {
        name: EVENT_USER_AUTH_REVOKE,
        version: "1",
        ws_capable: false,
        webhook_capable: true,
        webhook_only: true,
        required_scope: None,
        shape: ConditionShape::ClientId,
    },
];

/// System subscriptions kept alive regardless of interests. Startup
/// reconciliation never deletes these upstream.
pub const PERMANENT_SYSTEM_TYPES: &[&str] = &[EVENT_USER_AUTH_REVOKE];

pub fn lookup(event_type: &str) -> Option<&'static EventTypeInfo> {
    CATALOG.iter().find(|e| e.name == event_type)
}

pub fn is_webhook_only(event_type: &str) -> bool {
    lookup(event_type).is_some_and(|e| e.webhook_only)
}

/// Build the condition object for a subscription.
///
/// `bot_user_id` fills the moderator/user slots for shapes that bind the
/// subscription to the observing account; `client_id` fills client-scoped
/// conditions.
pub fn condition(
    info: &EventTypeInfo,
    broadcaster_user_id: &str,
    bot_user_id: &str,
    client_id: &str,
) -> serde_json::Value {
    match info.shape {
        ConditionShape::Broadcaster => json!({
            "broadcaster_user_id": broadcaster_user_id,
        }),
        ConditionShape::BroadcasterWithModerator => json!({
            "broadcaster_user_id": broadcaster_user_id,
            "moderator_user_id": bot_user_id,
        }),
        ConditionShape::BroadcasterWithUser => json!({
            "broadcaster_user_id": broadcaster_user_id,
            "user_id": bot_user_id,
        }),
        ConditionShape::RaidTarget => json!({
            "to_broadcaster_user_id": broadcaster_user_id,
        }),
        ConditionShape::ClientId => json!({
            "client_id": client_id,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_type_is_absent() {
        assert!(lookup("channel.made_up").is_none());
        assert!(lookup(EVENT_CHAT_MESSAGE).is_some());
    }

    #[test]
    fn webhook_only_set() {
        for t in [
            EVENT_DROP_ENTITLEMENT_GRANT,
            EVENT_EXTENSION_BITS_TRANSACTION,
            EVENT_USER_AUTH_GRANT,
            EVENT_USER_AUTH_REVOKE,
        ] {
            assert!(is_webhook_only(t), "{t} should be webhook-only");
            assert!(!lookup(t).unwrap().ws_capable);
        }
        assert!(!is_webhook_only(EVENT_CHAT_MESSAGE));
    }

    #[test]
    fn follow_is_version_2_with_moderator_condition() {
        let info = lookup(EVENT_CHANNEL_FOLLOW).unwrap();
        assert_eq!(info.version, "2");
        let c = condition(info, "12345", "99", "cid");
        assert_eq!(c["broadcaster_user_id"], "12345");
        assert_eq!(c["moderator_user_id"], "99");
    }

    #[test]
    fn chat_condition_binds_bot_user() {
        let info = lookup(EVENT_CHAT_MESSAGE).unwrap();
        let c = condition(info, "12345", "99", "cid");
        assert_eq!(c["user_id"], "99");
    }

    #[test]
    fn raid_condition_targets_broadcaster() {
        let info = lookup(EVENT_CHANNEL_RAID).unwrap();
        let c = condition(info, "12345", "99", "cid");
        assert_eq!(c["to_broadcaster_user_id"], "12345");
        assert!(c.get("broadcaster_user_id").is_none());
    }

    #[test]
    fn client_scoped_condition() {
        let info = lookup(EVENT_USER_AUTH_REVOKE).unwrap();
        let c = condition(info, "12345", "99", "cid");
        assert_eq!(c["client_id"], "cid");
    }
}

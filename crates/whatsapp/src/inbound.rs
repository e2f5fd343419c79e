//! Translation of bridge events into channel events.

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    herald_channels::{ChannelEvent, InboundMessage, MembershipChange},
    herald_common::{Backend, MediaPayload},
    tracing::warn,
};

use crate::bridge::{BridgeEvent, BridgeMessage, ParticipantAction};

const USER_SUFFIX: &str = "@s.whatsapp.net";
const GROUP_SUFFIX: &str = "@g.us";

pub fn is_group(jid: &str) -> bool {
    jid.ends_with(GROUP_SUFFIX)
}

/// `5511999999999:12@s.whatsapp.net` → `5511999999999@s.whatsapp.net`.
pub fn normalize_jid(jid: &str) -> String {
    let (user, server) = jid.split_once('@').unwrap_or((jid, "s.whatsapp.net"));
    let user = user.split(':').next().unwrap_or(user);
    format!("{user}@{server}")
}

/// Phone-number identity used by the admin list.
pub fn sender_id(jid: &str) -> String {
    let jid = normalize_jid(jid);
    jid.strip_suffix(USER_SUFFIX).unwrap_or(&jid).to_string()
}

/// Channel events for one bridge event. Connection events are handled by the
/// poller itself and yield nothing here.
pub fn translate(event: BridgeEvent, own_jid: Option<&str>) -> Vec<ChannelEvent> {
    match event {
        BridgeEvent::Message(msg) => vec![ChannelEvent::Inbound(inbound(msg))],
        BridgeEvent::GroupsUpsert { groups } => groups
            .into_iter()
            .map(|g| membership(MembershipChange::Joined {
                id: g.id,
                title: g.subject,
            }))
            .collect(),
        BridgeEvent::ParticipantsUpdate {
            id,
            action: ParticipantAction::Remove,
            participants,
        } => {
            let Some(own) = own_jid.map(normalize_jid) else {
                return Vec::new();
            };
            if participants.iter().any(|p| normalize_jid(p) == own) {
                vec![membership(MembershipChange::Left { id })]
            } else {
                Vec::new()
            }
        },
        BridgeEvent::ParticipantsUpdate { .. }
        | BridgeEvent::Connection(_)
        | BridgeEvent::Unknown => Vec::new(),
    }
}

fn membership(change: MembershipChange) -> ChannelEvent {
    ChannelEvent::Membership {
        backend: Backend::WhatsApp,
        change,
    }
}

fn inbound(msg: BridgeMessage) -> InboundMessage {
    let is_direct = !is_group(&msg.chat);
    let sender = msg.sender.as_deref().unwrap_or(&msg.chat);
    let media = msg.media.and_then(|m| match STANDARD.decode(m.data.as_bytes()) {
        Ok(bytes) => Some(MediaPayload::new(bytes, m.mimetype)),
        Err(e) => {
            warn!(chat = %msg.chat, error = %e, "dropping undecodable media");
            None
        },
    });

    InboundMessage {
        backend: Backend::WhatsApp,
        sender_id: sender_id(sender),
        chat_id: msg.chat,
        is_direct,
        from_self: msg.from_me,
        text: msg.text.or(msg.caption),
        media,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::bridge::{BridgeMedia, GroupInfo},
    };

    fn message(chat: &str) -> BridgeMessage {
        BridgeMessage {
            chat: chat.into(),
            sender: None,
            from_me: false,
            text: Some("status".into()),
            caption: None,
            media: None,
        }
    }

    #[test]
    fn jids_normalize() {
        assert_eq!(
            normalize_jid("5511999999999:12@s.whatsapp.net"),
            "5511999999999@s.whatsapp.net"
        );
        assert_eq!(sender_id("5511999999999:3@s.whatsapp.net"), "5511999999999");
        assert_eq!(sender_id("120363@g.us"), "120363@g.us");
        assert!(is_group("120363@g.us"));
        assert!(!is_group("5511@s.whatsapp.net"));
    }

    #[test]
    fn direct_message_becomes_inbound() {
        let events = translate(
            BridgeEvent::Message(message("5511999999999@s.whatsapp.net")),
            None,
        );
        match &events[..] {
            [ChannelEvent::Inbound(m)] => {
                assert!(m.is_direct);
                assert!(!m.from_self);
                assert_eq!(m.sender_id, "5511999999999");
                assert_eq!(m.chat_id, "5511999999999@s.whatsapp.net");
                assert_eq!(m.text(), "status");
            },
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn group_message_uses_participant_as_sender() {
        let mut msg = message("120363@g.us");
        msg.sender = Some("5511888888888@s.whatsapp.net".into());
        let events = translate(BridgeEvent::Message(msg), None);
        match &events[..] {
            [ChannelEvent::Inbound(m)] => {
                assert!(!m.is_direct);
                assert_eq!(m.sender_id, "5511888888888");
            },
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn media_is_decoded_with_caption() {
        let mut msg = message("5511@s.whatsapp.net");
        msg.text = None;
        msg.caption = Some("promo".into());
        msg.media = Some(BridgeMedia {
            mimetype: "image/jpeg".into(),
            data: "AQID".into(),
        });
        let events = translate(BridgeEvent::Message(msg), None);
        let ChannelEvent::Inbound(m) = &events[0] else {
            panic!("expected inbound");
        };
        assert_eq!(m.text(), "promo");
        let media = m.media.as_ref().unwrap();
        assert_eq!(&media.bytes[..], &[1, 2, 3]);
        assert_eq!(media.mime_type, "image/jpeg");
    }

    #[test]
    fn bad_media_is_dropped() {
        let mut msg = message("5511@s.whatsapp.net");
        msg.media = Some(BridgeMedia {
            mimetype: "image/jpeg".into(),
            data: "%%%".into(),
        });
        let events = translate(BridgeEvent::Message(msg), None);
        let ChannelEvent::Inbound(m) = &events[0] else {
            panic!("expected inbound");
        };
        assert!(m.media.is_none());
        assert_eq!(m.text(), "status");
    }

    #[test]
    fn groups_upsert_joins_each_group() {
        let events = translate(
            BridgeEvent::GroupsUpsert {
                groups: vec![
                    GroupInfo {
                        id: "1@g.us".into(),
                        subject: Some("One".into()),
                    },
                    GroupInfo {
                        id: "2@g.us".into(),
                        subject: None,
                    },
                ],
            },
            None,
        );
        assert_eq!(events.len(), 2);
        assert!(matches!(
            &events[1],
            ChannelEvent::Membership {
                change: MembershipChange::Joined { id, title: None },
                ..
            } if id == "2@g.us"
        ));
    }

    #[test]
    fn removal_of_own_account_leaves_group() {
        let removed = |participants: Vec<&str>| BridgeEvent::ParticipantsUpdate {
            id: "1@g.us".into(),
            action: ParticipantAction::Remove,
            participants: participants.into_iter().map(str::to_string).collect(),
        };
        let own = Some("5511:4@s.whatsapp.net");

        let events = translate(removed(vec!["5511@s.whatsapp.net"]), own);
        assert!(matches!(
            &events[..],
            [ChannelEvent::Membership {
                change: MembershipChange::Left { id },
                ..
            }] if id == "1@g.us"
        ));

        assert!(translate(removed(vec!["5522@s.whatsapp.net"]), own).is_empty());
        assert!(translate(removed(vec!["5511@s.whatsapp.net"]), None).is_empty());
    }

    #[test]
    fn other_participant_actions_are_ignored() {
        let event = BridgeEvent::ParticipantsUpdate {
            id: "1@g.us".into(),
            action: ParticipantAction::Add,
            participants: vec!["5511@s.whatsapp.net".into()],
        };
        assert!(translate(event, Some("5511@s.whatsapp.net")).is_empty());
    }
}

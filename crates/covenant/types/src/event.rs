//! Events the gatekeeper reacts to
//!
//! Live events come from the chat platform; `UnacknowledgedMemberFound` is
//! synthesised by the reconciliation sweep. All of them are plain serde values
//! so they can be replayed from JSON lines.

use crate::ids::{MemberId, MessageId, MessageRef, SpaceId};
use crate::record::DisplayMetadata;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A member as seen in an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub id: MemberId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default)]
    pub is_bot: bool,
}

impl MemberRef {
    pub fn new(id: i64) -> Self {
        Self {
            id: MemberId::new(id),
            username: None,
            display_name: None,
            is_bot: false,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn bot(mut self) -> Self {
        self.is_bot = true;
        self
    }
}

/// Kind of chat a space is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpaceKind {
    Private,
    #[default]
    Group,
    Supergroup,
    Channel,
}

impl SpaceKind {
    /// Group-like spaces are the only ones where enforcement applies
    pub fn is_group(self) -> bool {
        matches!(self, SpaceKind::Group | SpaceKind::Supergroup)
    }
}

/// A space as seen in an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpaceRef {
    pub id: SpaceId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default)]
    pub kind: SpaceKind,
}

impl SpaceRef {
    pub fn group(id: i64) -> Self {
        Self {
            id: SpaceId::new(id),
            title: None,
            kind: SpaceKind::Group,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_kind(mut self, kind: SpaceKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Membership status of a member inside a space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    #[serde(alias = "kicked")]
    Banned,
}

impl MemberStatus {
    /// Whether the status means the member is outside the space
    pub fn is_outside(self) -> bool {
        matches!(self, MemberStatus::Left | MemberStatus::Banned)
    }

    /// A transition from outside to an ordinary seat is a (re-)join
    pub fn is_join(old: MemberStatus, new: MemberStatus) -> bool {
        old.is_outside() && matches!(new, MemberStatus::Member | MemberStatus::Restricted)
    }
}

/// Coarse classification of events, used for logging and decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Join,
    Acknowledgement,
    Message,
    Sweep,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Join => "join",
            EventKind::Acknowledgement => "acknowledgement",
            EventKind::Message => "message",
            EventKind::Sweep => "sweep",
        };
        f.write_str(s)
    }
}

/// Everything the gatekeeper engine handles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateEvent {
    /// Member status changed inside a space
    MembershipChanged {
        member: MemberRef,
        space: SpaceRef,
        old_status: MemberStatus,
        new_status: MemberStatus,
    },

    /// Member pressed the acknowledgement action; `token` is the raw payload
    AcknowledgementRequested { member: MemberRef, token: String },

    /// An ordinary message was posted
    MessageObserved {
        member: MemberRef,
        space: SpaceRef,
        message_id: MessageId,
    },

    /// Reconciliation found a known member without a current acknowledgement
    UnacknowledgedMemberFound {
        member_id: MemberId,
        space_id: SpaceId,
    },
}

impl GateEvent {
    pub fn joined(member: MemberRef, space: SpaceRef) -> Self {
        GateEvent::MembershipChanged {
            member,
            space,
            old_status: MemberStatus::Left,
            new_status: MemberStatus::Member,
        }
    }

    pub fn acknowledged(member: MemberRef, token: impl Into<String>) -> Self {
        GateEvent::AcknowledgementRequested {
            member,
            token: token.into(),
        }
    }

    pub fn message(member: MemberRef, space: SpaceRef, message_id: i64) -> Self {
        GateEvent::MessageObserved {
            member,
            space,
            message_id: MessageId::new(message_id),
        }
    }

    pub fn unacknowledged(member_id: MemberId, space_id: SpaceId) -> Self {
        GateEvent::UnacknowledgedMemberFound {
            member_id,
            space_id,
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            GateEvent::MembershipChanged { .. } => EventKind::Join,
            GateEvent::AcknowledgementRequested { .. } => EventKind::Acknowledgement,
            GateEvent::MessageObserved { .. } => EventKind::Message,
            GateEvent::UnacknowledgedMemberFound { .. } => EventKind::Sweep,
        }
    }

    pub fn member_id(&self) -> MemberId {
        match self {
            GateEvent::MembershipChanged { member, .. }
            | GateEvent::AcknowledgementRequested { member, .. }
            | GateEvent::MessageObserved { member, .. } => member.id,
            GateEvent::UnacknowledgedMemberFound { member_id, .. } => *member_id,
        }
    }

    /// Whether the acting member is a bot account
    pub fn from_bot(&self) -> bool {
        match self {
            GateEvent::MembershipChanged { member, .. }
            | GateEvent::AcknowledgementRequested { member, .. }
            | GateEvent::MessageObserved { member, .. } => member.is_bot,
            GateEvent::UnacknowledgedMemberFound { .. } => false,
        }
    }

    /// Message reference for message events
    pub fn message_ref(&self) -> Option<MessageRef> {
        match self {
            GateEvent::MessageObserved {
                space, message_id, ..
            } => Some(MessageRef::new(space.id, *message_id)),
            _ => None,
        }
    }

    /// Reporting metadata carried by the event, if any
    pub fn metadata(&self) -> DisplayMetadata {
        let (member, space) = match self {
            GateEvent::MembershipChanged { member, space, .. }
            | GateEvent::MessageObserved { member, space, .. } => (Some(member), Some(space)),
            GateEvent::AcknowledgementRequested { member, .. } => (Some(member), None),
            GateEvent::UnacknowledgedMemberFound { .. } => (None, None),
        };

        let mut metadata = DisplayMetadata::new();
        if let Some(member) = member {
            if let Some(username) = &member.username {
                metadata = metadata.with_username(username.clone());
            }
            if let Some(display_name) = &member.display_name {
                metadata = metadata.with_display_name(display_name.clone());
            }
        }
        if let Some(title) = space.and_then(|s| s.title.as_ref()) {
            metadata = metadata.with_space_name(title.clone());
        }
        metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_transitions() {
        assert!(MemberStatus::is_join(MemberStatus::Left, MemberStatus::Member));
        assert!(MemberStatus::is_join(MemberStatus::Banned, MemberStatus::Restricted));
        assert!(!MemberStatus::is_join(MemberStatus::Member, MemberStatus::Restricted));
        assert!(!MemberStatus::is_join(MemberStatus::Left, MemberStatus::Administrator));
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{
            "kind": "membership_changed",
            "member": {"id": 100, "username": "newbie"},
            "space": {"id": -1001, "title": "Test Group", "kind": "supergroup"},
            "old_status": "kicked",
            "new_status": "member"
        }"#;

        let event: GateEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), EventKind::Join);
        assert_eq!(event.member_id(), MemberId::new(100));
        match event {
            GateEvent::MembershipChanged { old_status, .. } => {
                assert_eq!(old_status, MemberStatus::Banned)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_metadata_from_message_event() {
        let event = GateEvent::message(
            MemberRef::new(400).with_display_name("Quiet One"),
            SpaceRef::group(-1004).with_title("Gatekeeper Test Group"),
            9,
        );

        let metadata = event.metadata();
        assert_eq!(metadata.display_name.as_deref(), Some("Quiet One"));
        assert_eq!(metadata.space_name.as_deref(), Some("Gatekeeper Test Group"));
        assert_eq!(
            event.message_ref(),
            Some(MessageRef::new(SpaceId::new(-1004), MessageId::new(9)))
        );
    }

    #[test]
    fn test_space_kind_group_check() {
        assert!(SpaceKind::Supergroup.is_group());
        assert!(!SpaceKind::Private.is_group());
        assert!(!SpaceKind::Channel.is_group());
    }
}

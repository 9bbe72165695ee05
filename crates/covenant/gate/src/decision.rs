//! Gate decisions
//!
//! `decide` is a pure function of the event kind and a snapshot of what is
//! known about the member. Policy questions (exemption, enforced spaces) are
//! answered once while the snapshot is taken. The result is the ordered list
//! of actions the engine executes. Nothing here performs I/O.

use crate::actuator::Presence;
use crate::error::{GateError, GateResult};
use crate::policy::NoticeKind;
use covenant_types::{
    AckToken, DisplayMetadata, EventKind, GateEvent, MemberId, MemberStatus, MessageRef, SpaceId,
};
use serde::{Deserialize, Serialize};

/// The (member, space) pair an event is about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub kind: EventKind,
    pub member: MemberId,
    pub space: SpaceId,
    pub message: Option<MessageRef>,
    pub metadata: DisplayMetadata,
}

/// Outcome of interpreting a raw event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Event concerns the gate
    Handle(Subject),

    /// Event is irrelevant to the gate
    Ignore {
        member: MemberId,
        space: Option<SpaceId>,
        reason: &'static str,
    },
}

impl Resolution {
    /// Interpret an event. Only an unreadable acknowledgement token is an
    /// error; everything else either concerns the gate or is ignored.
    pub fn of(event: &GateEvent) -> GateResult<Self> {
        let member = event.member_id();

        if event.from_bot() {
            return Ok(Self::ignore(event, "bot account"));
        }

        let subject = match event {
            GateEvent::MembershipChanged {
                space,
                old_status,
                new_status,
                ..
            } => {
                if !MemberStatus::is_join(*old_status, *new_status) {
                    return Ok(Self::ignore(event, "not a join transition"));
                }
                if !space.kind.is_group() {
                    return Ok(Self::ignore(event, "not a group space"));
                }
                Subject {
                    kind: EventKind::Join,
                    member,
                    space: space.id,
                    message: None,
                    metadata: event.metadata(),
                }
            }

            GateEvent::AcknowledgementRequested { token, .. } => {
                if !AckToken::is_candidate(token) {
                    return Err(GateError::MalformedEvent(format!(
                        "not an acknowledgement token: {:?}",
                        token
                    )));
                }
                let token: AckToken = token
                    .parse()
                    .map_err(|e| GateError::MalformedEvent(format!("{}", e)))?;
                Subject {
                    kind: EventKind::Acknowledgement,
                    member,
                    space: token.space_id,
                    message: None,
                    metadata: event.metadata(),
                }
            }

            GateEvent::MessageObserved { space, .. } => {
                if !space.kind.is_group() {
                    return Ok(Self::ignore(event, "not a group space"));
                }
                Subject {
                    kind: EventKind::Message,
                    member,
                    space: space.id,
                    message: event.message_ref(),
                    metadata: event.metadata(),
                }
            }

            GateEvent::UnacknowledgedMemberFound { space_id, .. } => Subject {
                kind: EventKind::Sweep,
                member,
                space: *space_id,
                message: None,
                metadata: DisplayMetadata::new(),
            },
        };

        Ok(Self::Handle(subject))
    }

    fn ignore(event: &GateEvent, reason: &'static str) -> Self {
        let space = match event {
            GateEvent::MembershipChanged { space, .. } | GateEvent::MessageObserved { space, .. } => {
                Some(space.id)
            }
            GateEvent::UnacknowledgedMemberFound { space_id, .. } => Some(*space_id),
            GateEvent::AcknowledgementRequested { .. } => None,
        };
        Self::Ignore {
            member: event.member_id(),
            space,
            reason,
        }
    }
}

/// What is known about the subject when deciding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    /// Ledger holds a record for the current version. Read failures are
    /// recorded as `false`.
    pub acknowledged: bool,

    /// Result of `GatePolicy::is_exempt`
    pub exempt: bool,

    /// Result of `GatePolicy::enforces`
    pub enforced: bool,

    /// Presence in the space; only looked up for sweep subjects
    pub presence: Option<Presence>,
}

/// One step the engine performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// Insert a sentinel row if the member is unknown in the space
    Discover,

    /// Upsert the acknowledgement of the current version
    RecordAcknowledgement,

    Restrict,

    /// Grant the configured restoration set
    Unrestrict,

    DeleteMessage,

    /// Message the member; with `fallback`, post into the space when the
    /// member cannot be messaged
    DirectNotice { notice: NoticeKind, fallback: bool },
}

/// Classification of a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Member must be restricted
    Restrict,

    /// Member acknowledges the current version now
    Acknowledge,

    /// Member already acknowledged the current version
    AlreadyAcknowledged,

    /// Member is exempt from enforcement
    Exempt,

    /// Member is only recorded as present
    Observe,

    /// Swept member is no longer inside the space
    Absent,

    /// Event does not concern the gate
    Ignored,
}

/// A verdict and the ordered actions implementing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub actions: Vec<Action>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn new(verdict: Verdict, actions: Vec<Action>) -> Self {
        Self {
            verdict,
            actions,
            reason: None,
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Ignored,
            actions: Vec::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn is_enforcement(&self) -> bool {
        matches!(self.verdict, Verdict::Restrict)
    }

    pub fn contains(&self, action: &Action) -> bool {
        self.actions.contains(action)
    }

    /// Whether any action would take participation rights away
    pub fn restricts(&self) -> bool {
        self.actions
            .iter()
            .any(|a| matches!(a, Action::Restrict | Action::DeleteMessage))
    }
}

/// Decide what to do for an event kind given a snapshot
pub fn decide(kind: EventKind, snapshot: &Snapshot) -> Decision {
    match kind {
        EventKind::Join => {
            if snapshot.acknowledged {
                Decision::new(Verdict::AlreadyAcknowledged, Vec::new())
            } else if snapshot.exempt {
                Decision::new(Verdict::Exempt, vec![Action::Discover])
            } else if !snapshot.enforced {
                Decision::new(Verdict::Observe, vec![Action::Discover])
                    .with_reason("space not enforced")
            } else {
                Decision::new(
                    Verdict::Restrict,
                    vec![
                        Action::Discover,
                        Action::Restrict,
                        Action::DirectNotice {
                            notice: NoticeKind::Welcome,
                            fallback: true,
                        },
                    ],
                )
            }
        }

        EventKind::Acknowledgement => {
            if snapshot.acknowledged {
                Decision::new(Verdict::AlreadyAcknowledged, Vec::new())
            } else {
                Decision::new(
                    Verdict::Acknowledge,
                    vec![Action::RecordAcknowledgement, Action::Unrestrict],
                )
            }
        }

        EventKind::Message => {
            if snapshot.acknowledged {
                Decision::new(Verdict::AlreadyAcknowledged, vec![Action::Discover])
            } else if snapshot.exempt {
                Decision::new(Verdict::Exempt, vec![Action::Discover])
            } else if !snapshot.enforced {
                Decision::new(Verdict::Observe, vec![Action::Discover])
                    .with_reason("space not enforced")
            } else {
                Decision::new(
                    Verdict::Restrict,
                    vec![
                        Action::DeleteMessage,
                        Action::Restrict,
                        Action::Discover,
                        Action::DirectNotice {
                            notice: NoticeKind::MessageRemoved,
                            fallback: false,
                        },
                    ],
                )
            }
        }

        EventKind::Sweep => {
            if snapshot.acknowledged {
                Decision::new(Verdict::AlreadyAcknowledged, Vec::new())
            } else if snapshot.exempt {
                Decision::new(Verdict::Exempt, Vec::new())
            } else if !snapshot.enforced {
                Decision::new(Verdict::Observe, Vec::new()).with_reason("space not enforced")
            } else if snapshot.presence == Some(Presence::Absent) {
                Decision::new(Verdict::Absent, Vec::new())
            } else {
                Decision::new(
                    Verdict::Restrict,
                    vec![
                        Action::Restrict,
                        Action::DirectNotice {
                            notice: NoticeKind::SweepReminder,
                            fallback: true,
                        },
                    ],
                )
            }
        }
    }
}

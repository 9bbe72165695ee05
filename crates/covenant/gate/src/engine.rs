//! Gatekeeper engine
//!
//! `handle` runs one event end to end: resolve the subject, take a snapshot
//! (ledger, exemption, presence), decide, then execute the actions in order.
//! Acknowledgements name their space in a token, so that space is looked up
//! on the platform before anything is written.
//! Every action is attempted at most once and its outcome is recorded; no
//! failure aborts the process or rolls back a ledger write.

use crate::actuator::{PermissionActuator, Presence};
use crate::decision::{decide, Action, Decision, Resolution, Snapshot, Subject, Verdict};
use crate::error::{GateError, GateResult, PlatformError};
use crate::policy::{GatePolicy, NoticeKind};
use chrono::Utc;
use covenant_ledger::Ledger;
use covenant_types::{AcknowledgementRecord, EventKind, GateEvent, MemberId, SpaceId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// Side effect kinds as they appear in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Discover,
    RecordAcknowledgement,
    Restrict,
    Unrestrict,
    DeleteMessage,
    DirectNotice,
    SpaceNotice,
}

/// How one side effect ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum EffectStatus {
    /// Performed
    Applied,

    /// Performed, but nothing needed to change (e.g. member already known)
    Unchanged,

    /// Restriction dropped because the member acknowledged meanwhile
    Superseded,

    /// Not attempted because an earlier step made it moot
    Skipped,

    Failed(String),
}

impl EffectStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, EffectStatus::Failed(_))
    }
}

/// Outcome of one side effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectRecord {
    pub effect: Effect,
    pub status: EffectStatus,
}

impl EffectRecord {
    fn new(effect: Effect, status: EffectStatus) -> Self {
        Self { effect, status }
    }
}

/// Answer shown to a member who pressed the acknowledgement action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Acknowledged,
    AlreadyAcknowledged,
    /// Ledger write succeeded, permission update did not
    RecordedWithoutPermissions,
    /// Ledger write failed; nothing changed
    StorageFailure,
}

impl AckStatus {
    /// Reply text for the member
    pub fn message(self, policy: &GatePolicy) -> &str {
        let texts = policy.texts();
        match self {
            AckStatus::Acknowledged => &texts.acknowledged,
            AckStatus::AlreadyAcknowledged => &texts.already_acknowledged,
            AckStatus::RecordedWithoutPermissions => &texts.recorded_without_permissions,
            AckStatus::StorageFailure => &texts.storage_failure,
        }
    }
}

/// Everything that happened while handling one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    pub event_id: Uuid,
    pub kind: EventKind,
    pub member: MemberId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<SpaceId>,

    pub decision: Decision,
    pub effects: Vec<EffectRecord>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<AckStatus>,
}

impl GateReport {
    /// Status of the first record for `effect`
    pub fn status(&self, effect: Effect) -> Option<&EffectStatus> {
        self.effects
            .iter()
            .find(|r| r.effect == effect)
            .map(|r| &r.status)
    }

    pub fn applied(&self, effect: Effect) -> bool {
        matches!(self.status(effect), Some(EffectStatus::Applied))
    }

    pub fn failures(&self) -> impl Iterator<Item = &EffectRecord> {
        self.effects.iter().filter(|r| r.status.is_failure())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Reconciles acknowledgement facts with platform permissions
pub struct GatekeeperEngine {
    ledger: Arc<dyn Ledger>,
    actuator: Arc<dyn PermissionActuator>,
    policy: GatePolicy,
}

impl GatekeeperEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        actuator: Arc<dyn PermissionActuator>,
        policy: GatePolicy,
    ) -> Self {
        Self {
            ledger,
            actuator,
            policy,
        }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    /// Handle one event.
    ///
    /// Only a malformed event is an error. Storage and platform failures are
    /// recorded in the report.
    pub async fn handle(&self, event: GateEvent) -> GateResult<GateReport> {
        let event_id = Uuid::new_v4();
        let kind = event.kind();
        let span = tracing::info_span!(
            "gate_event",
            event_id = %event_id,
            kind = %kind,
            member = %event.member_id()
        );

        async move {
            let mut subject = match Resolution::of(&event) {
                Ok(Resolution::Handle(subject)) => subject,
                Ok(Resolution::Ignore {
                    member,
                    space,
                    reason,
                }) => {
                    tracing::debug!(reason, "Ignoring event");
                    return Ok(GateReport {
                        event_id,
                        kind,
                        member,
                        space,
                        decision: Decision::ignored(reason),
                        effects: Vec::new(),
                        reply: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Rejecting event");
                    return Err(e);
                }
            };

            if subject.kind == EventKind::Acknowledgement {
                if let Err(e) = self.verify_space(&mut subject).await {
                    tracing::warn!(error = %e, "Rejecting event");
                    return Err(e);
                }
            }

            let snapshot = self.snapshot(&subject).await;
            let decision = decide(subject.kind, &snapshot);
            tracing::debug!(
                space = %subject.space,
                verdict = ?decision.verdict,
                actions = decision.actions.len(),
                "Decided"
            );

            let (effects, reply) = self.execute(&subject, &decision).await;
            let report = GateReport {
                event_id,
                kind,
                member: subject.member,
                space: Some(subject.space),
                decision,
                effects,
                reply,
            };

            if report.has_failures() {
                tracing::warn!(
                    space = %subject.space,
                    failures = report.failures().count(),
                    "Event handled with failed effects"
                );
            } else {
                tracing::info!(
                    space = %subject.space,
                    verdict = ?report.decision.verdict,
                    "Event handled"
                );
            }
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Check that an acknowledged space exists and is a group, and pick up
    /// its title for the record. A failed lookup accepts the space unnamed.
    async fn verify_space(&self, subject: &mut Subject) -> GateResult<()> {
        match self.actuator.lookup_space(subject.space).await {
            Ok(Some(space)) if space.kind.is_group() => {
                if let Some(title) = space.title {
                    subject.metadata = subject.metadata.clone().with_space_name(title);
                }
                Ok(())
            }
            Ok(Some(space)) => Err(GateError::MalformedEvent(format!(
                "acknowledgement for {:?} space {}",
                space.kind, subject.space
            ))),
            Ok(None) => Err(GateError::MalformedEvent(format!(
                "acknowledgement for unknown space {}",
                subject.space
            ))),
            Err(e) => {
                tracing::warn!(
                    space = %subject.space,
                    error = %e,
                    "Space lookup failed; accepting acknowledgement without space name"
                );
                Ok(())
            }
        }
    }

    /// Whether the member holds a record for the current version.
    /// A failed read counts as not acknowledged.
    async fn acknowledged(&self, member: MemberId, space: SpaceId) -> bool {
        match self
            .ledger
            .has_acknowledged(member, space, self.policy.version())
            .await
        {
            Ok(acknowledged) => acknowledged,
            Err(e) => {
                tracing::error!(
                    member = %member,
                    space = %space,
                    error = %e,
                    "Ledger read failed; treating member as not acknowledged"
                );
                false
            }
        }
    }

    async fn snapshot(&self, subject: &Subject) -> Snapshot {
        let acknowledged = self.acknowledged(subject.member, subject.space).await;
        let exempt = self.policy.is_exempt(subject.member);
        let enforced = self.policy.enforces(subject.space);

        let presence = if subject.kind == EventKind::Sweep && !acknowledged && !exempt && enforced {
            match self
                .actuator
                .member_presence(subject.member, subject.space)
                .await
            {
                Ok(presence) => Some(presence),
                Err(e) => {
                    tracing::warn!(
                        member = %subject.member,
                        space = %subject.space,
                        error = %e,
                        "Presence lookup failed; assuming member is present"
                    );
                    Some(Presence::Present)
                }
            }
        } else {
            None
        };

        Snapshot {
            acknowledged,
            exempt,
            enforced,
            presence,
        }
    }

    async fn execute(
        &self,
        subject: &Subject,
        decision: &Decision,
    ) -> (Vec<EffectRecord>, Option<AckStatus>) {
        let mut effects = Vec::with_capacity(decision.actions.len() + 1);
        let mut reply = match decision.verdict {
            Verdict::AlreadyAcknowledged if subject.kind == EventKind::Acknowledgement => {
                Some(AckStatus::AlreadyAcknowledged)
            }
            _ => None,
        };
        let mut recorded = true;
        let mut superseded = false;

        for action in &decision.actions {
            match action {
                Action::Discover => {
                    effects.push(self.discover(subject).await);
                }

                Action::RecordAcknowledgement => {
                    let record = self.record_acknowledgement(subject).await;
                    recorded = !record.status.is_failure();
                    reply = Some(if recorded {
                        AckStatus::Acknowledged
                    } else {
                        AckStatus::StorageFailure
                    });
                    effects.push(record);
                }

                Action::Unrestrict => {
                    if !recorded {
                        effects.push(EffectRecord::new(Effect::Unrestrict, EffectStatus::Skipped));
                        continue;
                    }
                    let record = self.unrestrict(subject).await;
                    if record.status.is_failure() {
                        reply = Some(AckStatus::RecordedWithoutPermissions);
                    }
                    effects.push(record);
                }

                Action::Restrict => {
                    let record = self.restrict(subject).await;
                    superseded = record.status == EffectStatus::Superseded;
                    effects.push(record);
                }

                Action::DeleteMessage => {
                    effects.push(self.delete_message(subject).await);
                }

                Action::DirectNotice { notice, fallback } => {
                    if superseded {
                        effects.push(EffectRecord::new(Effect::DirectNotice, EffectStatus::Skipped));
                        continue;
                    }
                    self.notify(subject, *notice, *fallback, &mut effects).await;
                }
            }
        }

        (effects, reply)
    }

    async fn discover(&self, subject: &Subject) -> EffectRecord {
        let result = self
            .ledger
            .discover(
                subject.member,
                subject.space,
                subject.metadata.clone(),
                Utc::now(),
            )
            .await;

        let status = match result {
            Ok(true) => {
                tracing::debug!(member = %subject.member, space = %subject.space, "Discovered member");
                EffectStatus::Applied
            }
            Ok(false) => EffectStatus::Unchanged,
            Err(e) => {
                tracing::error!(
                    member = %subject.member,
                    space = %subject.space,
                    error = %e,
                    "Failed to record discovered member"
                );
                EffectStatus::Failed(e.to_string())
            }
        };
        EffectRecord::new(Effect::Discover, status)
    }

    async fn record_acknowledgement(&self, subject: &Subject) -> EffectRecord {
        let record = AcknowledgementRecord::acknowledgement(
            subject.member,
            subject.space,
            self.policy.version().clone(),
            subject.metadata.clone(),
            Utc::now(),
        );

        let status = match self.ledger.upsert(record).await {
            Ok(()) => {
                tracing::info!(
                    member = %subject.member,
                    space = %subject.space,
                    version = %self.policy.version(),
                    "Recorded acknowledgement"
                );
                EffectStatus::Applied
            }
            Err(e) => {
                tracing::error!(
                    member = %subject.member,
                    space = %subject.space,
                    error = %e,
                    "Failed to record acknowledgement"
                );
                EffectStatus::Failed(e.to_string())
            }
        };
        EffectRecord::new(Effect::RecordAcknowledgement, status)
    }

    async fn unrestrict(&self, subject: &Subject) -> EffectRecord {
        let result = self
            .actuator
            .unrestrict(subject.member, subject.space, self.policy.restoration_set())
            .await;
        EffectRecord::new(
            Effect::Unrestrict,
            self.platform_status("unrestrict", subject, result),
        )
    }

    async fn restrict(&self, subject: &Subject) -> EffectRecord {
        // Re-read right before the call so a concurrent acknowledgement wins.
        if self.acknowledged(subject.member, subject.space).await {
            tracing::info!(
                member = %subject.member,
                space = %subject.space,
                "Member acknowledged meanwhile; not restricting"
            );
            return EffectRecord::new(Effect::Restrict, EffectStatus::Superseded);
        }

        let result = self.actuator.restrict(subject.member, subject.space).await;
        EffectRecord::new(
            Effect::Restrict,
            self.platform_status("restrict", subject, result),
        )
    }

    async fn delete_message(&self, subject: &Subject) -> EffectRecord {
        let status = match &subject.message {
            Some(message) => {
                let result = self.actuator.delete_message(message).await;
                self.platform_status("delete_message", subject, result)
            }
            None => EffectStatus::Skipped,
        };
        EffectRecord::new(Effect::DeleteMessage, status)
    }

    async fn notify(
        &self,
        subject: &Subject,
        kind: NoticeKind,
        fallback: bool,
        effects: &mut Vec<EffectRecord>,
    ) {
        let notice = self.policy.notice(kind);
        let result = self
            .actuator
            .send_direct_notice(subject.member, &notice)
            .await;
        let unreachable = matches!(result, Err(PlatformError::Unreachable(_)));
        effects.push(EffectRecord::new(
            Effect::DirectNotice,
            self.platform_status("send_direct_notice", subject, result),
        ));

        if unreachable && fallback {
            let notice = self.policy.fallback_notice();
            let result = self.actuator.send_space_notice(subject.space, &notice).await;
            effects.push(EffectRecord::new(
                Effect::SpaceNotice,
                self.platform_status("send_space_notice", subject, result),
            ));
        }
    }

    fn platform_status(
        &self,
        call: &'static str,
        subject: &Subject,
        result: Result<(), PlatformError>,
    ) -> EffectStatus {
        match result {
            Ok(()) => {
                tracing::debug!(call, member = %subject.member, space = %subject.space, "Applied");
                EffectStatus::Applied
            }
            Err(e @ PlatformError::Unreachable(_)) => {
                tracing::info!(
                    call,
                    member = %subject.member,
                    space = %subject.space,
                    error = %e,
                    "Member cannot be messaged directly"
                );
                EffectStatus::Failed(e.to_string())
            }
            Err(e) => {
                tracing::error!(
                    call,
                    member = %subject.member,
                    space = %subject.space,
                    error = %e,
                    "Platform call failed"
                );
                EffectStatus::Failed(e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for GatekeeperEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatekeeperEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ActuatorCall, ActuatorOp, RecordingActuator};
    use covenant_ledger::InMemoryLedger;
    use covenant_types::{MemberRef, PolicyVersion, SpaceRef};

    fn engine(actuator: &RecordingActuator) -> (GatekeeperEngine, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let policy = GatePolicy::new(PolicyVersion::new("1.0").unwrap());
        let engine = GatekeeperEngine::new(ledger.clone(), Arc::new(actuator.clone()), policy);
        (engine, ledger)
    }

    #[tokio::test]
    async fn test_ignored_event_has_no_effects() {
        let actuator = RecordingActuator::new();
        let (engine, ledger) = engine(&actuator);

        let report = engine
            .handle(GateEvent::joined(MemberRef::new(9).bot(), SpaceRef::group(-1)))
            .await
            .unwrap();

        assert_eq!(report.decision.verdict, Verdict::Ignored);
        assert!(report.effects.is_empty());
        assert!(actuator.calls().is_empty());
        assert!(ledger.is_empty().await);
    }

    #[tokio::test]
    async fn test_restrict_superseded_skips_notice() {
        let actuator = RecordingActuator::new();
        let (engine, ledger) = engine(&actuator);
        let member = MemberId::new(100);
        let space = SpaceId::new(-1001);

        ledger
            .upsert(AcknowledgementRecord::acknowledgement(
                member,
                space,
                PolicyVersion::new("1.0").unwrap(),
                Default::default(),
                Utc::now(),
            ))
            .await
            .unwrap();

        // Decision made on a stale snapshot; execution still re-checks.
        let subject = Subject {
            kind: EventKind::Sweep,
            member,
            space,
            message: None,
            metadata: Default::default(),
        };
        let stale = Snapshot {
            acknowledged: false,
            exempt: false,
            enforced: true,
            presence: Some(Presence::Present),
        };
        let decision = decide(EventKind::Sweep, &stale);
        let (effects, _) = engine.execute(&subject, &decision).await;

        assert_eq!(
            effects,
            vec![
                EffectRecord::new(Effect::Restrict, EffectStatus::Superseded),
                EffectRecord::new(Effect::DirectNotice, EffectStatus::Skipped),
            ]
        );
        assert_eq!(actuator.count(ActuatorOp::Restrict), 0);
    }

    #[tokio::test]
    async fn test_unrestrict_uses_restoration_set() {
        let actuator = RecordingActuator::new();
        let (engine, _) = engine(&actuator);

        engine
            .handle(GateEvent::acknowledged(MemberRef::new(100), "agree_-1001"))
            .await
            .unwrap();

        assert_eq!(
            actuator.calls(),
            vec![ActuatorCall::Unrestrict {
                member: MemberId::new(100),
                space: SpaceId::new(-1001),
                capabilities: engine.policy().restoration_set().clone(),
            }]
        );
    }

    #[test]
    fn test_ack_status_messages_come_from_policy() {
        let policy = GatePolicy::new(PolicyVersion::new("1.0").unwrap());
        assert!(AckStatus::RecordedWithoutPermissions
            .message(&policy)
            .contains("contact an admin"));
    }
}

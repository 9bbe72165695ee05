//! Recording actuator for tests
//!
//! Records every call in order and can be scripted to fail individual
//! operations, report members as absent or spaces as unknown, or respond
//! slowly. Space lookups are answered from the script and not recorded.

use crate::actuator::{Notice, PermissionActuator, PlatformResult, Presence};
use crate::error::PlatformError;
use async_trait::async_trait;
use covenant_types::{CapabilitySet, MemberId, MessageRef, SpaceId, SpaceRef};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Operation names, used to script failures and count calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActuatorOp {
    Restrict,
    Unrestrict,
    DeleteMessage,
    DirectNotice,
    SpaceNotice,
    Presence,
    SpaceLookup,
}

/// One recorded call with its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorCall {
    Restrict {
        member: MemberId,
        space: SpaceId,
    },
    Unrestrict {
        member: MemberId,
        space: SpaceId,
        capabilities: CapabilitySet,
    },
    DeleteMessage(MessageRef),
    DirectNotice {
        member: MemberId,
        notice: Notice,
    },
    SpaceNotice {
        space: SpaceId,
        notice: Notice,
    },
    Presence {
        member: MemberId,
        space: SpaceId,
    },
}

impl ActuatorCall {
    pub fn op(&self) -> ActuatorOp {
        match self {
            ActuatorCall::Restrict { .. } => ActuatorOp::Restrict,
            ActuatorCall::Unrestrict { .. } => ActuatorOp::Unrestrict,
            ActuatorCall::DeleteMessage(_) => ActuatorOp::DeleteMessage,
            ActuatorCall::DirectNotice { .. } => ActuatorOp::DirectNotice,
            ActuatorCall::SpaceNotice { .. } => ActuatorOp::SpaceNotice,
            ActuatorCall::Presence { .. } => ActuatorOp::Presence,
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    calls: Vec<ActuatorCall>,
    failures: HashMap<ActuatorOp, PlatformError>,
    absent: HashSet<(MemberId, SpaceId)>,
    spaces: HashMap<SpaceId, Option<SpaceRef>>,
}

/// Actuator that records calls instead of reaching a platform
///
/// Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingActuator {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every call of `op` fail with `error`
    pub fn fail(&self, op: ActuatorOp, error: PlatformError) {
        self.lock().failures.insert(op, error);
    }

    /// Stop failing `op`
    pub fn recover(&self, op: ActuatorOp) {
        self.lock().failures.remove(&op);
    }

    /// Report `member` as no longer inside `space`
    pub fn mark_absent(&self, member: MemberId, space: SpaceId) {
        self.lock().absent.insert((member, space));
    }

    /// Answer lookups of `space.id` with `space`. Unscripted spaces are
    /// untitled groups.
    pub fn describe_space(&self, space: SpaceRef) {
        self.lock().spaces.insert(space.id, Some(space));
    }

    /// Report `space` as unknown to the platform
    pub fn forget_space(&self, space: SpaceId) {
        self.lock().spaces.insert(space, None);
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.lock().calls.clone()
    }

    pub fn count(&self, op: ActuatorOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op() == op).count()
    }

    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn record(&self, call: ActuatorCall) -> PlatformResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.lock();
        let op = call.op();
        script.calls.push(call);
        match script.failures.get(&op) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PermissionActuator for RecordingActuator {
    async fn restrict(&self, member: MemberId, space: SpaceId) -> PlatformResult<()> {
        self.record(ActuatorCall::Restrict { member, space }).await
    }

    async fn unrestrict(
        &self,
        member: MemberId,
        space: SpaceId,
        capabilities: &CapabilitySet,
    ) -> PlatformResult<()> {
        self.record(ActuatorCall::Unrestrict {
            member,
            space,
            capabilities: capabilities.clone(),
        })
        .await
    }

    async fn delete_message(&self, message: &MessageRef) -> PlatformResult<()> {
        self.record(ActuatorCall::DeleteMessage(*message)).await
    }

    async fn send_direct_notice(&self, member: MemberId, notice: &Notice) -> PlatformResult<()> {
        self.record(ActuatorCall::DirectNotice {
            member,
            notice: notice.clone(),
        })
        .await
    }

    async fn send_space_notice(&self, space: SpaceId, notice: &Notice) -> PlatformResult<()> {
        self.record(ActuatorCall::SpaceNotice {
            space,
            notice: notice.clone(),
        })
        .await
    }

    async fn member_presence(&self, member: MemberId, space: SpaceId) -> PlatformResult<Presence> {
        self.record(ActuatorCall::Presence { member, space }).await?;
        if self.lock().absent.contains(&(member, space)) {
            Ok(Presence::Absent)
        } else {
            Ok(Presence::Present)
        }
    }

    async fn lookup_space(&self, space: SpaceId) -> PlatformResult<Option<SpaceRef>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let script = self.lock();
        if let Some(error) = script.failures.get(&ActuatorOp::SpaceLookup) {
            return Err(error.clone());
        }
        Ok(match script.spaces.get(&space) {
            Some(known) => known.clone(),
            None => Some(SpaceRef::group(space.get())),
        })
    }
}

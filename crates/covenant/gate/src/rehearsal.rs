//! Rehearsal mode
//!
//! In rehearsal every permission effect is logged with its exact parameters
//! instead of being performed. Decisions and ledger writes are unchanged, so
//! a rehearsal run shows precisely what a live run would do.
//!
//! Without platform credentials a rehearsal can still run against
//! [`OfflineActuator`], which answers lookups without reaching anything.

use crate::actuator::{Notice, PermissionActuator, PlatformResult, Presence};
use async_trait::async_trait;
use covenant_types::{CapabilitySet, MemberId, MessageRef, SpaceId, SpaceRef};
use serde::{Deserialize, Serialize};

/// Whether side effects reach the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Live,
    Rehearsal,
}

impl ExecutionMode {
    pub fn is_rehearsal(self) -> bool {
        matches!(self, ExecutionMode::Rehearsal)
    }
}

/// Actuator wrapper that suppresses effects in rehearsal mode
#[derive(Debug, Clone)]
pub struct RehearsalActuator<A> {
    inner: A,
    mode: ExecutionMode,
}

impl<A: PermissionActuator> RehearsalActuator<A> {
    pub fn new(inner: A, mode: ExecutionMode) -> Self {
        Self { inner, mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }
}

#[async_trait]
impl<A: PermissionActuator> PermissionActuator for RehearsalActuator<A> {
    async fn restrict(&self, member: MemberId, space: SpaceId) -> PlatformResult<()> {
        if self.mode.is_rehearsal() {
            tracing::info!(
                target: "covenant::rehearsal",
                member = %member,
                space = %space,
                "Would restrict member"
            );
            return Ok(());
        }
        self.inner.restrict(member, space).await
    }

    async fn unrestrict(
        &self,
        member: MemberId,
        space: SpaceId,
        capabilities: &CapabilitySet,
    ) -> PlatformResult<()> {
        if self.mode.is_rehearsal() {
            let granted: Vec<&str> = capabilities.iter().map(|c| c.as_str()).collect();
            tracing::info!(
                target: "covenant::rehearsal",
                member = %member,
                space = %space,
                capabilities = ?granted,
                "Would unrestrict member"
            );
            return Ok(());
        }
        self.inner.unrestrict(member, space, capabilities).await
    }

    async fn delete_message(&self, message: &MessageRef) -> PlatformResult<()> {
        if self.mode.is_rehearsal() {
            tracing::info!(
                target: "covenant::rehearsal",
                space = %message.space_id,
                message = %message.message_id,
                "Would delete message"
            );
            return Ok(());
        }
        self.inner.delete_message(message).await
    }

    async fn send_direct_notice(&self, member: MemberId, notice: &Notice) -> PlatformResult<()> {
        if self.mode.is_rehearsal() {
            tracing::info!(
                target: "covenant::rehearsal",
                member = %member,
                text = %notice.text,
                link = ?notice.link,
                "Would send direct notice"
            );
            return Ok(());
        }
        self.inner.send_direct_notice(member, notice).await
    }

    async fn send_space_notice(&self, space: SpaceId, notice: &Notice) -> PlatformResult<()> {
        if self.mode.is_rehearsal() {
            tracing::info!(
                target: "covenant::rehearsal",
                space = %space,
                text = %notice.text,
                link = ?notice.link,
                "Would send space notice"
            );
            return Ok(());
        }
        self.inner.send_space_notice(space, notice).await
    }

    async fn member_presence(&self, member: MemberId, space: SpaceId) -> PlatformResult<Presence> {
        self.inner.member_presence(member, space).await
    }

    async fn lookup_space(&self, space: SpaceId) -> PlatformResult<Option<SpaceRef>> {
        self.inner.lookup_space(space).await
    }
}

/// Actuator for rehearsals with no platform connection
///
/// Effects succeed without doing anything, every member is present and every
/// space is an untitled group. Keeps no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineActuator;

#[async_trait]
impl PermissionActuator for OfflineActuator {
    async fn restrict(&self, _member: MemberId, _space: SpaceId) -> PlatformResult<()> {
        Ok(())
    }

    async fn unrestrict(
        &self,
        _member: MemberId,
        _space: SpaceId,
        _capabilities: &CapabilitySet,
    ) -> PlatformResult<()> {
        Ok(())
    }

    async fn delete_message(&self, _message: &MessageRef) -> PlatformResult<()> {
        Ok(())
    }

    async fn send_direct_notice(&self, _member: MemberId, _notice: &Notice) -> PlatformResult<()> {
        Ok(())
    }

    async fn send_space_notice(&self, _space: SpaceId, _notice: &Notice) -> PlatformResult<()> {
        Ok(())
    }

    async fn member_presence(&self, _member: MemberId, _space: SpaceId) -> PlatformResult<Presence> {
        Ok(Presence::Present)
    }

    async fn lookup_space(&self, space: SpaceId) -> PlatformResult<Option<SpaceRef>> {
        Ok(Some(SpaceRef::group(space.get())))
    }
}

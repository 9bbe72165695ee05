//! Permission actuator boundary
//!
//! The actuator is the only way the engine touches the chat platform. It
//! speaks in capability sets and notices, never in platform permission
//! fields, so decision logic cannot drift with the platform API.

use crate::error::PlatformError;
use async_trait::async_trait;
use covenant_types::{CapabilitySet, MemberId, MessageRef, SpaceId, SpaceRef};
use serde::{Deserialize, Serialize};

/// Result type for actuator calls
pub type PlatformResult<T> = Result<T, PlatformError>;

/// A message sent to a member or a space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub text: String,

    /// Policy document link, rendered as a button where the platform allows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl Notice {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            link: None,
        }
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.link = link;
        self
    }
}

/// Whether a member is currently inside a space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Present,
    /// Left or was removed
    Absent,
}

/// Side effects against the external permission system
#[async_trait]
pub trait PermissionActuator: Send + Sync {
    /// Remove every participation capability
    async fn restrict(&self, member: MemberId, space: SpaceId) -> PlatformResult<()>;

    /// Grant exactly `capabilities`
    async fn unrestrict(
        &self,
        member: MemberId,
        space: SpaceId,
        capabilities: &CapabilitySet,
    ) -> PlatformResult<()>;

    async fn delete_message(&self, message: &MessageRef) -> PlatformResult<()>;

    /// Fails with [`PlatformError::Unreachable`] when the member cannot be
    /// messaged directly
    async fn send_direct_notice(&self, member: MemberId, notice: &Notice) -> PlatformResult<()>;

    async fn send_space_notice(&self, space: SpaceId, notice: &Notice) -> PlatformResult<()>;

    /// Read-only presence lookup
    async fn member_presence(&self, member: MemberId, space: SpaceId) -> PlatformResult<Presence>;

    /// Read-only space lookup. `None` when the platform does not know the
    /// space or the gate cannot see it.
    async fn lookup_space(&self, space: SpaceId) -> PlatformResult<Option<SpaceRef>>;
}

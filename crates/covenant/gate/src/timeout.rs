//! Per-call time bound for actuator calls

use crate::actuator::{Notice, PermissionActuator, PlatformResult, Presence};
use crate::error::PlatformError;
use async_trait::async_trait;
use covenant_types::{CapabilitySet, MemberId, MessageRef, SpaceId, SpaceRef};
use std::future::Future;
use std::time::Duration;

/// Default bound for a single platform call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps an actuator so no call can hang the engine
#[derive(Debug, Clone)]
pub struct TimeoutActuator<A> {
    inner: A,
    limit: Duration,
}

impl<A: PermissionActuator> TimeoutActuator<A> {
    pub fn new(inner: A) -> Self {
        Self::with_limit(inner, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_limit(inner: A, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn limit(&self) -> Duration {
        self.limit
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }

    async fn bounded<T>(
        &self,
        call: &'static str,
        fut: impl Future<Output = PlatformResult<T>> + Send,
    ) -> PlatformResult<T> {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(call, limit_ms = self.limit.as_millis() as u64, "Platform call timed out");
                Err(PlatformError::Timeout(self.limit))
            }
        }
    }
}

#[async_trait]
impl<A: PermissionActuator> PermissionActuator for TimeoutActuator<A> {
    async fn restrict(&self, member: MemberId, space: SpaceId) -> PlatformResult<()> {
        self.bounded("restrict", self.inner.restrict(member, space)).await
    }

    async fn unrestrict(
        &self,
        member: MemberId,
        space: SpaceId,
        capabilities: &CapabilitySet,
    ) -> PlatformResult<()> {
        self.bounded("unrestrict", self.inner.unrestrict(member, space, capabilities))
            .await
    }

    async fn delete_message(&self, message: &MessageRef) -> PlatformResult<()> {
        self.bounded("delete_message", self.inner.delete_message(message))
            .await
    }

    async fn send_direct_notice(&self, member: MemberId, notice: &Notice) -> PlatformResult<()> {
        self.bounded("send_direct_notice", self.inner.send_direct_notice(member, notice))
            .await
    }

    async fn send_space_notice(&self, space: SpaceId, notice: &Notice) -> PlatformResult<()> {
        self.bounded("send_space_notice", self.inner.send_space_notice(space, notice))
            .await
    }

    async fn member_presence(&self, member: MemberId, space: SpaceId) -> PlatformResult<Presence> {
        self.bounded("member_presence", self.inner.member_presence(member, space))
            .await
    }

    async fn lookup_space(&self, space: SpaceId) -> PlatformResult<Option<SpaceRef>> {
        self.bounded("lookup_space", self.inner.lookup_space(space)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{ActuatorOp, RecordingActuator};

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let inner = RecordingActuator::new().with_delay(Duration::from_secs(30));
        let actuator = TimeoutActuator::with_limit(inner.clone(), Duration::from_secs(5));

        let result = actuator.restrict(MemberId::new(1), SpaceId::new(-1)).await;
        assert_eq!(result, Err(PlatformError::Timeout(Duration::from_secs(5))));
    }

    #[tokio::test]
    async fn test_fast_call_passes_through() {
        let inner = RecordingActuator::new();
        inner.fail(ActuatorOp::DeleteMessage, PlatformError::Rejected("gone".into()));
        let actuator = TimeoutActuator::new(inner.clone());

        assert!(actuator.restrict(MemberId::new(1), SpaceId::new(-1)).await.is_ok());
        let message = MessageRef::new(SpaceId::new(-1), covenant_types::MessageId::new(3));
        assert_eq!(
            actuator.delete_message(&message).await,
            Err(PlatformError::Rejected("gone".into()))
        );
        assert_eq!(inner.count(ActuatorOp::Restrict), 1);
    }
}

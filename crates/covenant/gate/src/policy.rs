//! Gate policy: which version is current, who is exempt, what gets restored

use crate::actuator::Notice;
use covenant_types::{CapabilitySet, MemberId, PolicyVersion, RestorationScope, SpaceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Texts the gate sends; defaults match the stock code-of-conduct wording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoticeTexts {
    /// Direct notice after a join
    pub welcome: String,

    /// Fallback posted into the space when the member cannot be messaged
    pub space_reminder: String,

    /// Direct notice after a message was removed
    pub message_removed: String,

    /// Direct notice for members found by reconciliation
    pub sweep_reminder: String,

    /// Pinned space message carrying the acknowledgement button
    pub onboarding: String,

    pub acknowledged: String,
    pub already_acknowledged: String,
    pub recorded_without_permissions: String,
    pub storage_failure: String,
}

impl Default for NoticeTexts {
    fn default() -> Self {
        Self {
            welcome: "Welcome! Please find the pinned message in the group to agree to the \
                      Code of Conduct and start chatting."
                .to_string(),
            space_reminder: "New members: please agree to the Code of Conduct using the pinned \
                             message to start chatting."
                .to_string(),
            message_removed: "Your message was removed because you have not yet agreed to the \
                              Code of Conduct. Please find the pinned message in the group to \
                              agree and restore your chat permissions."
                .to_string(),
            sweep_reminder: "You have not yet agreed to the current Code of Conduct. Please find \
                             the pinned message in the group to agree and restore your chat \
                             permissions."
                .to_string(),
            onboarding: "Action required: to participate in this group, all members must agree \
                         to our Code of Conduct. Please use the button below to view it and \
                         agree to its terms."
                .to_string(),
            acknowledged: "Thank you for agreeing to the Code of Conduct! You can now \
                           participate in the group."
                .to_string(),
            already_acknowledged: "You have already agreed to the Code of Conduct!".to_string(),
            recorded_without_permissions: "Agreement recorded, but failed to update \
                                           permissions. Please contact an admin."
                .to_string(),
            storage_failure: "Error: Could not record your agreement. Please try again."
                .to_string(),
        }
    }
}

/// Which notice a branch sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Welcome,
    MessageRemoved,
    SweepReminder,
}

/// Everything the engine needs to know about the current policy
#[derive(Debug, Clone)]
pub struct GatePolicy {
    version: PolicyVersion,
    link: Option<String>,
    restoration: RestorationScope,
    restoration_set: CapabilitySet,
    exempt: BTreeSet<MemberId>,
    enforced_spaces: BTreeSet<SpaceId>,
    texts: NoticeTexts,
}

impl GatePolicy {
    pub fn new(version: PolicyVersion) -> Self {
        let restoration = RestorationScope::default();
        Self {
            version,
            link: None,
            restoration,
            restoration_set: restoration.capabilities(),
            exempt: BTreeSet::new(),
            enforced_spaces: BTreeSet::new(),
            texts: NoticeTexts::default(),
        }
    }

    /// Link to the policy document, attached to every notice
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        let link = link.into();
        self.link = if link.trim().is_empty() { None } else { Some(link) };
        self
    }

    pub fn with_restoration(mut self, restoration: RestorationScope) -> Self {
        self.restoration = restoration;
        self.restoration_set = restoration.capabilities();
        self
    }

    pub fn with_exempt(mut self, members: impl IntoIterator<Item = MemberId>) -> Self {
        self.exempt.extend(members);
        self
    }

    /// Limit enforcement to these spaces; empty means every group space
    pub fn with_enforced_spaces(mut self, spaces: impl IntoIterator<Item = SpaceId>) -> Self {
        self.enforced_spaces.extend(spaces);
        self
    }

    pub fn with_texts(mut self, texts: NoticeTexts) -> Self {
        self.texts = texts;
        self
    }

    pub fn version(&self) -> &PolicyVersion {
        &self.version
    }

    pub fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }

    pub fn restoration(&self) -> RestorationScope {
        self.restoration
    }

    /// Capabilities granted on acknowledgement
    pub fn restoration_set(&self) -> &CapabilitySet {
        &self.restoration_set
    }

    pub fn texts(&self) -> &NoticeTexts {
        &self.texts
    }

    /// The single exemption predicate
    pub fn is_exempt(&self, member: MemberId) -> bool {
        self.exempt.contains(&member)
    }

    pub fn enforces(&self, space: SpaceId) -> bool {
        self.enforced_spaces.is_empty() || self.enforced_spaces.contains(&space)
    }

    /// Direct notice for a branch
    pub fn notice(&self, kind: NoticeKind) -> Notice {
        let text = match kind {
            NoticeKind::Welcome => &self.texts.welcome,
            NoticeKind::MessageRemoved => &self.texts.message_removed,
            NoticeKind::SweepReminder => &self.texts.sweep_reminder,
        };
        Notice::new(text.clone()).with_link(self.link.clone())
    }

    /// Space notice posted when the direct notice cannot be delivered
    pub fn fallback_notice(&self) -> Notice {
        Notice::new(self.texts.space_reminder.clone()).with_link(self.link.clone())
    }

    pub fn onboarding_notice(&self) -> Notice {
        Notice::new(self.texts.onboarding.clone()).with_link(self.link.clone())
    }
}

//! Participation capabilities
//!
//! Restricting and unrestricting a member both apply a `CapabilitySet`, so the
//! decision logic never deals with individual platform permission fields.

use crate::error::TypeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A single participation right in a space
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    SendMessages,
    SendAudios,
    SendDocuments,
    SendPhotos,
    SendVideos,
    SendVideoNotes,
    SendVoiceNotes,
    SendPolls,
    SendOtherMessages,
    AddWebPagePreviews,
    ChangeInfo,
    InviteUsers,
    PinMessages,
    ManageTopics,
}

impl Capability {
    pub const ALL: [Capability; 14] = [
        Capability::SendMessages,
        Capability::SendAudios,
        Capability::SendDocuments,
        Capability::SendPhotos,
        Capability::SendVideos,
        Capability::SendVideoNotes,
        Capability::SendVoiceNotes,
        Capability::SendPolls,
        Capability::SendOtherMessages,
        Capability::AddWebPagePreviews,
        Capability::ChangeInfo,
        Capability::InviteUsers,
        Capability::PinMessages,
        Capability::ManageTopics,
    ];

    /// Capabilities that alter the space itself rather than post into it
    pub fn is_administrative(self) -> bool {
        matches!(
            self,
            Capability::ChangeInfo | Capability::PinMessages | Capability::ManageTopics
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::SendMessages => "send_messages",
            Capability::SendAudios => "send_audios",
            Capability::SendDocuments => "send_documents",
            Capability::SendPhotos => "send_photos",
            Capability::SendVideos => "send_videos",
            Capability::SendVideoNotes => "send_video_notes",
            Capability::SendVoiceNotes => "send_voice_notes",
            Capability::SendPolls => "send_polls",
            Capability::SendOtherMessages => "send_other_messages",
            Capability::AddWebPagePreviews => "add_web_page_previews",
            Capability::ChangeInfo => "change_info",
            Capability::InviteUsers => "invite_users",
            Capability::PinMessages => "pin_messages",
            Capability::ManageTopics => "manage_topics",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| TypeError::UnknownCapability(s.to_string()))
    }
}

/// An ordered set of capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// No rights at all; what a restricted member gets
    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    /// Every known capability
    pub fn full() -> Self {
        Capability::ALL.into_iter().collect()
    }

    /// Everything except administrative capabilities
    pub fn participation() -> Self {
        Capability::ALL
            .into_iter()
            .filter(|c| !c.is_administrative())
            .collect()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.0.remove(&capability);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// Whether a member holding this set can post ordinary messages
    pub fn can_post(&self) -> bool {
        self.contains(Capability::SendMessages)
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which capabilities are restored when a member acknowledges the policy
///
/// Deployments disagree on whether acknowledgement should also hand back
/// administrative rights, so this is a configuration choice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestorationScope {
    /// Every capability, administrative ones included
    Full,

    /// Participation capabilities only
    #[default]
    Participation,
}

impl RestorationScope {
    pub fn capabilities(self) -> CapabilitySet {
        match self {
            RestorationScope::Full => CapabilitySet::full(),
            RestorationScope::Participation => CapabilitySet::participation(),
        }
    }
}

//! Covenant Types - Core types for policy acknowledgement gating
//!
//! Covenant keeps members of a group space muted until they have acknowledged
//! the current policy version. This crate holds the vocabulary shared by the
//! ledger, the gatekeeper engine and the daemon.
//!
//! ## Key Concepts
//!
//! - **PolicyVersion**: A real, acknowledgeable policy version
//! - **RecordVersion**: A policy version or the `discovered` sentinel
//! - **AcknowledgementRecord**: The durable fact "member M acknowledged V in G at T"
//! - **CapabilitySet**: Platform participation rights applied on restrict/unrestrict
//! - **GateEvent**: Everything the engine reacts to, live or synthesised
//! - **AckToken**: The `agree_<space>` reference carried by acknowledgement actions

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod capability;
pub mod error;
pub mod event;
pub mod ids;
pub mod record;
pub mod token;
pub mod version;

pub use capability::{Capability, CapabilitySet, RestorationScope};
pub use error::TypeError;
pub use event::{EventKind, GateEvent, MemberRef, MemberStatus, SpaceKind, SpaceRef};
pub use ids::{MemberId, MessageId, MessageRef, SpaceId};
pub use record::{AcknowledgementRecord, DisplayMetadata, LedgerStats};
pub use token::AckToken;
pub use version::{PolicyVersion, RecordVersion, DISCOVERED_MARKER};

//! Covenant Gate - Acknowledgement gatekeeper engine
//!
//! The gate keeps two independent systems consistent: the ledger of
//! acknowledgements and the chat platform's participation rights. Events
//! (joins, acknowledgement actions, messages, reconciliation findings) go
//! through a pure decision step and are then executed against a
//! [`PermissionActuator`].
//!
//! ## Architecture
//!
//! ```text
//!   GateEvent ──► Resolution ──► Snapshot ──► decide() ──► execute ──► GateReport
//!                                   │                        │
//!                               Ledger (read)         Ledger (write) + Actuator
//! ```
//!
//! Actuators compose: a platform actuator is normally wrapped in
//! [`TimeoutActuator`] and then [`RehearsalActuator`].

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod actuator;
pub mod decision;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod mocks;
pub mod policy;
pub mod reconciler;
pub mod rehearsal;
pub mod timeout;

pub use actuator::{Notice, PermissionActuator, PlatformResult, Presence};
pub use decision::{decide, Action, Decision, Resolution, Snapshot, Subject, Verdict};
pub use dispatcher::EventDispatcher;
pub use engine::{AckStatus, Effect, EffectRecord, EffectStatus, GateReport, GatekeeperEngine};
pub use error::{GateError, GateResult, PlatformError};
pub use mocks::{ActuatorCall, ActuatorOp, RecordingActuator};
pub use policy::{GatePolicy, NoticeKind, NoticeTexts};
pub use reconciler::{ReconciliationScheduler, SweepReport};
pub use rehearsal::{ExecutionMode, OfflineActuator, RehearsalActuator};
pub use timeout::{TimeoutActuator, DEFAULT_CALL_TIMEOUT};

//! Covenant Ledger - Durable acknowledgement facts
//!
//! The ledger answers one question for the gatekeeper: has member M
//! acknowledged policy version V in space G? It also keeps weak "member
//! exists" sentinel rows so reconciliation can find members who never
//! acknowledged anything.
//!
//! ## Backends
//!
//! - [`InMemoryLedger`]: process-local, for development and tests
//! - [`SqliteLedger`]: sqlx over a single SQLite file
//! - [`SheetsLedger`]: a Google Sheets worksheet through the values API
//!
//! The engine only ever sees `Arc<dyn Ledger>`.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod memory;
pub mod records;
pub mod sheets;
pub mod sqlite;
pub mod traits;

pub use error::{LedgerResult, StorageError};
pub use memory::InMemoryLedger;
pub use sheets::{SheetsLedger, SheetsOptions, SHEET_HEADER};
pub use sqlite::SqliteLedger;
pub use traits::Ledger;

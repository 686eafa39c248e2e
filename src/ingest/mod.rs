//! Ingestion core
//!
//! This module contains everything a fetch cycle needs:
//! - Credential rotation on quota exhaustion
//! - Per-query continuation cursors
//! - The dedup ledger over stored items
//! - The upstream search client and response classification
//! - Item parsing
//! - The fetch cycle itself

pub mod client;
pub mod credentials;
pub mod cursor;
pub mod cycle;
pub mod item;
pub mod ledger;

pub use client::{SearchClient, SearchOutcome, SearchPage, PAGE_SIZE};
pub use credentials::{ApiKey, CredentialRotator, ResolvedCredential};
pub use cursor::CursorStore;
pub use cycle::{CycleOutcome, CycleReport, CycleSettings, FetchCycle, QueryLocks};
pub use ledger::{DedupLedger, InsertReport};

//! Aurum Findings Vault
//!
//! Tamper-evident encrypted storage for scan findings:
//!
//! 1. **SecurityContext**: master-key derivation, field-level encryption and
//!    the `PLAIN:`/`ENC:` token codec
//! 2. **VaultHandle**: append-only findings log, session bookkeeping,
//!    periodic summaries and export
//!
//! This crate is the leaf of the system - it knows nothing about solvers,
//! strategies or terminals.

pub mod error;
pub mod security;
pub mod types;
pub mod vault;

pub use error::{Result, VaultError};
pub use security::{SecurityContext, SENSITIVE_FIELDS};
pub use types::{SessionMeta, VaultSummary};
pub use vault::VaultHandle;

/// Version of the vault crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

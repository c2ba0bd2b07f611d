//! # handshake_core
//!
//! Two-party, fee-gated handshake escrow and attestation workflow: a
//! finite-state coordination protocol that ties an off-chain record to
//! on-chain actions (fee transfers and non-transferable badge mints),
//! across two independent user sessions that may act in any order.
//!
//! The [`Coordinator`] owns the state machine
//! (`Pending → Matched → Minted`, `Pending → Expired`) and exposes four
//! mutating operations — `initiate`, `claim`, `confirm_payment`, `mint` —
//! plus the `list_pending_for` inbox query. External collaborators are
//! expressed as traits: a [`store::RecordStore`] for durable records, a
//! [`ledger::LedgerGateway`] for the chain, and a
//! [`directory::IdentityResolver`] for the user/identity directory.

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod memory;
pub mod record;
pub mod store;

pub use config::CoordinatorConfig;
pub use coordinator::{expire_overdue, Coordinator};
pub use error::HandshakeError;
pub use record::{HandshakeRecord, HandshakeStatus, PaymentSide, PointsLedgerEntry};

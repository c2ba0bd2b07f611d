//! Coordinator configuration.
//!
//! The fee and the TTL are config constants, not protocol invariants; the
//! fee in force at initiation is captured into each record so in-flight
//! handshakes are immune to schedule changes.

use serde::{Deserialize, Serialize};

/// Default mint fee per side: 0.001 SOL.
pub const DEFAULT_MINT_FEE_LAMPORTS: u64 = 1_000_000;

/// Default TTL for unclaimed handshakes: 72 hours.
pub const DEFAULT_TTL_SECS: i64 = 72 * 60 * 60;

/// Fixed per-party reward written at mint.
pub const DEFAULT_POINTS_PER_HANDSHAKE: u32 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Fee each side pays to the protocol treasury (lamports).
    pub mint_fee_lamports: u64,
    /// How long a pending handshake stays claimable (seconds).
    pub ttl_secs: i64,
    /// Points awarded to each party when a handshake mints.
    pub points_per_handshake: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            mint_fee_lamports: DEFAULT_MINT_FEE_LAMPORTS,
            ttl_secs: DEFAULT_TTL_SECS,
            points_per_handshake: DEFAULT_POINTS_PER_HANDSHAKE,
        }
    }
}

//! Hardcoded constants for the attestation-badge program.
//!
//! These MUST NOT be configurable at runtime.

use solana_sdk::pubkey::Pubkey;

/// Attestation-badge program ID — same on mainnet-beta and devnet.
pub const ATTEST_PROGRAM_ID: Pubkey =
    solana_sdk::pubkey!("oZRyyaiTsoqrF1NSvQPQCkYikQLxbJdBG9WpFzRmhmv");

/// Seed for badge PDA derivation.
pub const BADGE_SEED: &[u8] = b"badge";

/// The only instruction the coordinator is allowed to build.
pub const ALLOWED_ATTEST_INSTRUCTIONS: &[&str] = &["mint_badge"];

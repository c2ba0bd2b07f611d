//! # attest_cpi
//!
//! Pinned attestation-badge program constants, PDA derivations, and
//! instruction builders for the handshake coordinator. All targets are
//! hardcoded — no user-supplied program IDs or arbitrary instruction
//! forwarding.

pub mod constants;
pub mod instructions;

pub use constants::*;
pub use instructions::{build_mint_badge_ix, derive_badge_pda, MintBadgeArgs};

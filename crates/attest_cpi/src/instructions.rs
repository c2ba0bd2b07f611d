//! Attestation-badge instruction builders.
//!
//! The badge program is Anchor-based; instruction data is the 8-byte
//! global discriminator followed by Borsh-serialized args. Badges are
//! soulbound: the program rejects any transfer of a minted badge, so the
//! builder only ever targets the owner's address.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use crate::constants::{ATTEST_PROGRAM_ID, BADGE_SEED};

/// Anchor global instruction discriminator: first 8 bytes of
/// SHA-256("global:<name>").
pub fn anchor_discriminator(ix_name: &str) -> [u8; 8] {
    let mut h = Sha256::new();
    h.update(b"global:");
    h.update(ix_name.as_bytes());
    let out = h.finalize();
    out[..8].try_into().expect("slice length is 8")
}

/// Args for `mint_badge`, mirroring the on-chain IDL.
#[derive(BorshSerialize, BorshDeserialize, Debug, Clone, PartialEq, Eq)]
pub struct MintBadgeArgs {
    /// Handshake record id (uuid bytes); part of the badge PDA seeds, so
    /// each handshake mints at most one badge per owner.
    pub handshake_id: [u8; 16],
    pub event_title: Option<String>,
    pub event_datetime: Option<String>,
}

/// Badge PDA: `["badge", owner, handshake_id]`.
pub fn derive_badge_pda(owner: &Pubkey, handshake_id: &[u8; 16]) -> (Pubkey, u8) {
    Pubkey::find_program_address(
        &[BADGE_SEED, owner.as_ref(), handshake_id],
        &ATTEST_PROGRAM_ID,
    )
}

/// Build the `mint_badge` instruction. `payer` is the service keypair
/// funding the badge account; `owner` is the wallet the badge is bound to.
pub fn build_mint_badge_ix(
    payer: &Pubkey,
    owner: &Pubkey,
    args: &MintBadgeArgs,
) -> Result<Instruction, String> {
    let (badge, _) = derive_badge_pda(owner, &args.handshake_id);

    let serialized =
        borsh::to_vec(args).map_err(|_| "borsh serialize mint_badge args".to_string())?;
    let mut data = Vec::with_capacity(8 + serialized.len());
    data.extend_from_slice(&anchor_discriminator("mint_badge"));
    data.extend_from_slice(&serialized);

    Ok(Instruction {
        program_id: ATTEST_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(badge, false),
            AccountMeta::new_readonly(*owner, false),
            AccountMeta::new(*payer, true),
            AccountMeta::new_readonly(system_program::id(), false),
        ],
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_args() -> MintBadgeArgs {
        MintBadgeArgs {
            handshake_id: [7u8; 16],
            event_title: Some("Rust Meetup".to_string()),
            event_datetime: None,
        }
    }

    #[test]
    fn test_discriminator_is_stable() {
        let d1 = anchor_discriminator("mint_badge");
        let d2 = anchor_discriminator("mint_badge");
        assert_eq!(d1, d2);
        assert_ne!(d1, anchor_discriminator("burn_badge"));
    }

    #[test]
    fn test_badge_pda_is_deterministic_per_owner() {
        let owner_a = Pubkey::new_unique();
        let owner_b = Pubkey::new_unique();
        let id = [1u8; 16];

        let (pda_a1, bump_a1) = derive_badge_pda(&owner_a, &id);
        let (pda_a2, bump_a2) = derive_badge_pda(&owner_a, &id);
        assert_eq!(pda_a1, pda_a2);
        assert_eq!(bump_a1, bump_a2);

        let (pda_b, _) = derive_badge_pda(&owner_b, &id);
        assert_ne!(pda_a1, pda_b);
    }

    #[test]
    fn test_mint_badge_ix_shape() {
        let payer = Pubkey::new_unique();
        let owner = Pubkey::new_unique();
        let args = sample_args();

        let ix = build_mint_badge_ix(&payer, &owner, &args).unwrap();
        assert_eq!(ix.program_id, ATTEST_PROGRAM_ID);
        assert_eq!(&ix.data[..8], &anchor_discriminator("mint_badge"));

        // badge (writable), owner (readonly), payer (writable signer), system program
        assert_eq!(ix.accounts.len(), 4);
        let (badge, _) = derive_badge_pda(&owner, &args.handshake_id);
        assert_eq!(ix.accounts[0].pubkey, badge);
        assert!(ix.accounts[0].is_writable);
        assert_eq!(ix.accounts[1].pubkey, owner);
        assert!(ix.accounts[2].is_signer);
        assert_eq!(ix.accounts[3].pubkey, system_program::id());

        // Args round-trip behind the discriminator.
        let decoded = MintBadgeArgs::try_from_slice(&ix.data[8..]).unwrap();
        assert_eq!(decoded, args);
    }
}

//! Per-segment cipher-key derivation.
//!
//! Each segment carries four key banks. A bank never stores the cipher key
//! itself: it stores a header value and a blinded key fragment from which the
//! key is re-derived with the account id. Decryption only reads the banks;
//! encryption overwrites them with fresh material.

use crate::error::LimeError;
use crate::keys::{KEY_TYPE_EXPONENT, PRIVATE_BASE, PRIVATE_MODULUS};
use crate::wideint::WideInt;
use rand::RngCore;

/// Key banks per segment.
pub const BANKS_PER_SEGMENT: usize = 4;

/// Words per bank slot. The header occupies 4 significant words, the
/// fragment 5; both are stored padded to 8-word slots.
pub const BANK_WORDS: usize = 8;

/// Per-segment key bank record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyBank {
    pub header: [u64; BANK_WORDS],
    pub fragment: [u64; BANK_WORDS],
}

/// Cipher key material for one segment: four bank slices, 32 bytes.
pub type SegmentKey = [u8; 32];

/// One bank's 64-bit key slice for a candidate account id.
fn bank_slice(account_id: u32, bank: &KeyBank) -> Result<u64, LimeError> {
    // The scheme mixes the complement of the account id, never the id itself.
    let exponent = WideInt::from_u32(!account_id);
    let header = WideInt::from_low_words(&bank.header);
    let header_pow = header.mod_exp(&exponent, &PRIVATE_MODULUS)?;
    let fragment = WideInt::from_low_words(&bank.fragment);
    let hashed = header_pow.mul(&fragment)?.rem(&PRIVATE_MODULUS)?;
    Ok(hashed.low_u64())
}

/// Assembles the 256-bit keystream seed for a segment: one 64-bit slice per
/// bank, in bank order. The first half keys the block cipher schedule, the
/// second half becomes the keystream's initial state.
pub fn derive_segment_key(
    account_id: u32,
    banks: &[KeyBank; BANKS_PER_SEGMENT],
) -> Result<SegmentKey, LimeError> {
    let mut key = [0u8; 32];
    for (i, bank) in banks.iter().enumerate() {
        let slice = bank_slice(account_id, bank)?;
        key[i * 8..(i + 1) * 8].copy_from_slice(&slice.to_le_bytes());
    }
    Ok(key)
}

/// Overwrites a segment's banks with fresh key material for `account_id`.
/// Only the encryption path calls this; each bank gets its own random 64-bit
/// blinding multiplier so the four slices differ.
pub fn populate_banks(
    account_id: u32,
    banks: &mut [KeyBank; BANKS_PER_SEGMENT],
    rng: &mut dyn RngCore,
) -> Result<(), LimeError> {
    let type_exponent = WideInt::from_u64(KEY_TYPE_EXPONENT);
    let header = PRIVATE_BASE.mod_exp(&type_exponent, &PRIVATE_MODULUS)?;
    let seed = PRIVATE_BASE
        .mod_exp(&WideInt::from_u32(!account_id), &PRIVATE_MODULUS)?
        .mod_exp(&type_exponent, &PRIVATE_MODULUS)?;
    for bank in banks.iter_mut() {
        let blind = loop {
            let b = rng.next_u64();
            if b != 0 {
                break b;
            }
        };
        let fragment = seed.mul(&WideInt::from_u64(blind))?;
        bank.header = header.low_words();
        bank.fragment = fragment.low_words();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn fresh_banks(account_id: u32, rng_seed: u64) -> [KeyBank; BANKS_PER_SEGMENT] {
        let mut banks = [KeyBank::default(); BANKS_PER_SEGMENT];
        let mut rng = StdRng::seed_from_u64(rng_seed);
        populate_banks(account_id, &mut banks, &mut rng).unwrap();
        banks
    }

    #[test]
    fn test_derive_is_deterministic() {
        let banks = fresh_banks(12345, 7);
        let k1 = derive_segment_key(12345, &banks).unwrap();
        let k2 = derive_segment_key(12345, &banks).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_account_id_changes_key() {
        let banks = fresh_banks(12345, 7);
        let k1 = derive_segment_key(12345, &banks).unwrap();
        let k2 = derive_segment_key(12346, &banks).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_banks_differ_within_segment() {
        let banks = fresh_banks(1, 99);
        assert_ne!(banks[0].fragment, banks[1].fragment);
        let key = derive_segment_key(1, &banks).unwrap();
        assert_ne!(key[0..8], key[8..16]);
    }

    #[test]
    fn test_bank_slots_stay_padded() {
        // Header carries 4 significant words, the fragment 5; the slot
        // padding must stay zero so the stored record round-trips.
        let banks = fresh_banks(0xDEAD_BEEF, 3);
        for bank in &banks {
            assert_eq!(&bank.header[4..], &[0u64; 4]);
            assert_eq!(&bank.fragment[5..], &[0u64; 3]);
        }
    }

    #[test]
    fn test_all_ones_account_id() {
        // ~0xFFFFFFFF == 0, which drives the exponent to zero; derivation
        // must still produce a usable key.
        let banks = fresh_banks(u32::MAX, 11);
        let key = derive_segment_key(u32::MAX, &banks).unwrap();
        assert_ne!(key, [0u8; 32]);
    }
}

//! Embedded Lime key material.
//!
//! The two private constants parameterize every key derivation; they were
//! recovered from the game binary and are read-only for the lifetime of the
//! process. Both fit in four words of the fixed-width container.

use crate::wideint::WideInt;

/// Private modulus ("private key 1"): every derivation reduces against it.
pub static PRIVATE_MODULUS: WideInt = WideInt::from_low_words(&[
    0xD6A5_1B3C_9E2F_80C5,
    0x44E9_07AA_31D8_F26B,
    0x9C01_5E76_BB42_8DD1,
    0x6F23_A8C4_1790_EB52,
]);

/// Private base ("private key 2"): the value raised during derivation.
pub static PRIVATE_BASE: WideInt = WideInt::from_low_words(&[
    0x82C4_F1E0_553A_9D47,
    0x1BDE_6630_C87F_A4F9,
    0xE009_2B51_7D64_38AC,
    0x35A7_D99E_40C6_12E8,
]);

/// Exponent tied to the Lime key type tag.
pub const KEY_TYPE_EXPONENT: u64 = 0x10;

//! Segment checksum sponge.
//!
//! A 25-lane (1600-bit) permutation absorbs the payload in 17-word chunks
//! and emits a 4-word tag. The tag doubles as the decryption-correctness
//! oracle: brute force re-derives it per candidate account id and compares
//! against the stored value.

/// Lanes in the permutation state.
pub const STATE_LANES: usize = 25;

/// Lanes absorbed per chunk (136 bytes).
pub const RATE_LANES: usize = 17;

/// Lanes emitted as the checksum.
pub const CHECKSUM_LANES: usize = 4;

/// Permutation rounds, one constant per round.
const ROUND_KEYS: [u64; 17] = [
    0x0000000000000001,
    0x0000000000008082,
    0x800000000000808A,
    0x8000000080008000,
    0x000000000000808B,
    0x0000000080000001,
    0x8000000080008081,
    0x8000000000008009,
    0x000000000000008A,
    0x0000000000000088,
    0x0000000080008009,
    0x000000008000000A,
    0x000000008000808B,
    0x800000000000008B,
    0x8000000000008089,
    0x8000000000008003,
    0x8000000000008002,
];

/// Per-lane rotation amounts for the diffusion step.
const LANE_ROTATION: [u32; STATE_LANES] = [
    0, 1, 62, 28, 27, 36, 44, 6, 55, 20, 3, 10, 43, 25, 39, 41, 45, 15, 21, 8, 18, 2, 61, 56, 14,
];

/// Destination lane for each source lane in the permutation step.
const LANE_TARGET: [usize; STATE_LANES] = [
    0, 10, 20, 5, 15, 16, 1, 11, 21, 6, 7, 17, 2, 12, 22, 23, 8, 18, 3, 13, 14, 24, 9, 19, 4,
];

/// One full state permutation.
pub fn permute(state: &mut [u64; STATE_LANES]) {
    for &round_key in ROUND_KEYS.iter() {
        // Column-parity mixing.
        let mut parity = [0u64; 5];
        for x in 0..5 {
            parity[x] = state[x] ^ state[x + 5] ^ state[x + 10] ^ state[x + 15] ^ state[x + 20];
        }
        for x in 0..5 {
            let d = parity[(x + 4) % 5] ^ parity[(x + 1) % 5].rotate_left(1);
            for y in 0..5 {
                state[x + 5 * y] ^= d;
            }
        }

        // Table-driven rotate and relocate.
        let mut moved = [0u64; STATE_LANES];
        for i in 0..STATE_LANES {
            moved[LANE_TARGET[i]] = state[i].rotate_left(LANE_ROTATION[i]);
        }

        // Non-linear row step: lane[i] ^= lane[i+2] & !lane[i+1], per row.
        for y in 0..5 {
            for x in 0..5 {
                state[x + 5 * y] =
                    moved[x + 5 * y] ^ (moved[(x + 2) % 5 + 5 * y] & !moved[(x + 1) % 5 + 5 * y]);
            }
        }

        state[0] ^= round_key;
    }
}

/// Computes the 4-word checksum of `data`; the length must be a multiple of
/// eight bytes (segment payloads are 4096 bytes).
pub fn checksum(data: &[u8]) -> [u64; CHECKSUM_LANES] {
    debug_assert!(data.len() % 8 == 0);
    let word_at = |i: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&data[i * 8..i * 8 + 8]);
        u64::from_le_bytes(b)
    };
    let total_words = data.len() / 8;

    let mut state = [0u64; STATE_LANES];
    let mut absorbed = 0;
    while total_words - absorbed >= RATE_LANES {
        for k in 0..RATE_LANES {
            state[k] ^= word_at(absorbed + k);
        }
        permute(&mut state);
        absorbed += RATE_LANES;
    }

    // Finalization: trailing words land in the low lanes, then the
    // domain-separation byte and the closing rate bit.
    let tail = total_words - absorbed;
    for k in 0..tail {
        state[k] ^= word_at(absorbed + k);
    }
    state[tail] ^= 0x06;
    state[RATE_LANES - 1] ^= 1 << 63;
    permute(&mut state);

    [state[0], state[1], state[2], state[3]]
}

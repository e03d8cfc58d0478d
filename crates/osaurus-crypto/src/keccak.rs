//! Keccak-256.
//!
//! The original Keccak submission, as used for Ethereum addresses and signed
//! message envelopes, *not* FIPS-202 SHA3-256 (the padding differs).
//!
//! Sponge parameters: rate 136 bytes, capacity 64 bytes, 24 rounds of
//! Keccak-f[1600]. Padding appends `0x01`, zero-fills to a rate boundary,
//! and ORs `0x80` into the final byte. The permutation runs in place over a
//! fixed 25-lane state; no heap allocation anywhere in the hash path.

/// Rate in bytes for the 256-bit parameterisation (1600 - 2*256 bits).
const RATE: usize = 136;

/// Round constants for the iota step.
const ROUND_CONSTANTS: [u64; 24] = [
    0x0000_0000_0000_0001,
    0x0000_0000_0000_8082,
    0x8000_0000_0000_808a,
    0x8000_0000_8000_8000,
    0x0000_0000_0000_808b,
    0x0000_0000_8000_0001,
    0x8000_0000_8000_8081,
    0x8000_0000_0000_8009,
    0x0000_0000_0000_008a,
    0x0000_0000_0000_0088,
    0x0000_0000_8000_8009,
    0x0000_0000_8000_000a,
    0x0000_0000_8000_808b,
    0x8000_0000_0000_008b,
    0x8000_0000_0000_8089,
    0x8000_0000_0000_8003,
    0x8000_0000_0000_8002,
    0x8000_0000_0000_0080,
    0x0000_0000_0000_800a,
    0x8000_0000_8000_000a,
    0x8000_0000_8000_8081,
    0x8000_0000_0000_8080,
    0x0000_0000_8000_0001,
    0x8000_0000_8000_8008,
];

/// Rotation offsets for the rho step, indexed `[x][y]` over the 5x5 lane
/// grid (lane `(x, y)` lives at linear index `x + 5y`).
const ROTATIONS: [[u32; 5]; 5] = [
    [0, 36, 3, 41, 18],
    [1, 44, 10, 45, 2],
    [62, 6, 43, 15, 61],
    [28, 55, 25, 21, 56],
    [27, 20, 39, 8, 14],
];

/// The Keccak-f[1600] permutation: 24 rounds of theta, rho, pi, chi, iota.
fn keccak_f1600(state: &mut [u64; 25]) {
    for &round_constant in &ROUND_CONSTANTS {
        // Theta: column parities folded back into every lane.
        let mut parity = [0u64; 5];
        for x in 0..5 {
            parity[x] =
                state[x] ^ state[x + 5] ^ state[x + 10] ^ state[x + 15] ^ state[x + 20];
        }
        for x in 0..5 {
            let d = parity[(x + 4) % 5] ^ parity[(x + 1) % 5].rotate_left(1);
            for y in 0..5 {
                state[x + 5 * y] ^= d;
            }
        }

        // Rho + pi: rotate each lane and scatter to (y, 2x + 3y).
        let mut scattered = [0u64; 25];
        for x in 0..5 {
            for y in 0..5 {
                scattered[y + 5 * ((2 * x + 3 * y) % 5)] =
                    state[x + 5 * y].rotate_left(ROTATIONS[x][y]);
            }
        }

        // Chi: nonlinear row mixing.
        for y in 0..5 {
            for x in 0..5 {
                state[x + 5 * y] = scattered[x + 5 * y]
                    ^ (!scattered[(x + 1) % 5 + 5 * y] & scattered[(x + 2) % 5 + 5 * y]);
            }
        }

        // Iota.
        state[0] ^= round_constant;
    }
}

/// XOR one full rate-sized block into the state and permute.
fn absorb_block(state: &mut [u64; 25], block: &[u8]) {
    debug_assert_eq!(block.len(), RATE);
    for (lane, bytes) in state[..RATE / 8].iter_mut().zip(block.chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        *lane ^= u64::from_le_bytes(word);
    }
    keccak_f1600(state);
}

/// Compute the Keccak-256 digest of `data`.
///
/// Pure function of the input bytes: 32-byte output, deterministic on every
/// platform, no side effects.
#[must_use]
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut state = [0u64; 25];

    let mut blocks = data.chunks_exact(RATE);
    for block in &mut blocks {
        absorb_block(&mut state, block);
    }

    // Final partial block with multi-rate padding (0x01 .. 0x80).
    let remainder = blocks.remainder();
    let mut last = [0u8; RATE];
    last[..remainder.len()].copy_from_slice(remainder);
    last[remainder.len()] ^= 0x01;
    last[RATE - 1] ^= 0x80;
    absorb_block(&mut state, &last);

    let mut digest = [0u8; 32];
    for (bytes, lane) in digest.chunks_exact_mut(8).zip(state.iter()) {
        bytes.copy_from_slice(&lane.to_le_bytes());
    }
    digest
}

// SPDX-License-Identifier: MIT OR Apache-2.0

//! One-way hash ratchet over four sub-ratchets advanced at staggered cadences.
//!
//! The 128 byte ratchet value is split into four parts R(0)..R(3). Part `i` is rotated whenever
//! byte `i` of the big-endian counter changes, by keyed-hashing the slowest part that changed and
//! re-seeding every faster part from it. Any forward jump through the 32 bit counter space
//! therefore costs at most 1021 hash operations instead of one per step.
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::kdf::hmac_sha256;

/// Number of sub-ratchets.
const RATCHET_PARTS: usize = 4;

/// Size of one sub-ratchet in bytes.
const RATCHET_PART_SIZE: usize = 32;

/// Size of the full ratchet value in bytes.
pub const RATCHET_SIZE: usize = RATCHET_PARTS * RATCHET_PART_SIZE;

/// Domain-separation constants for rotating each sub-ratchet.
const HASH_KEY_SEEDS: [[u8; 1]; RATCHET_PARTS] = [[0x00], [0x01], [0x02], [0x03]];

/// Hash ratchet for group messages, advanced once per encrypted message.
///
/// The ratchet can be advanced to any future counter but never backwards; holders of a ratchet
/// value cannot recover earlier values.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub(crate) struct Megolm {
    data: [u8; RATCHET_SIZE],
    counter: u32,
}

impl std::fmt::Debug for Megolm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Megolm")
            .field("counter", &self.counter)
            .field("data", &"***")
            .finish()
    }
}

impl Megolm {
    pub fn new(seed: &[u8; RATCHET_SIZE], counter: u32) -> Self {
        Self {
            data: *seed,
            counter,
        }
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// The full ratchet value, used as the input key of the group message cipher.
    pub fn data(&self) -> &[u8; RATCHET_SIZE] {
        &self.data
    }

    /// Replaces part `to` with the keyed hash of part `from`.
    fn rehash_part(&mut self, from: usize, to: usize) {
        let mut hash = hmac_sha256(
            &self.data[from * RATCHET_PART_SIZE..(from + 1) * RATCHET_PART_SIZE],
            &HASH_KEY_SEEDS[to],
        );
        self.data[to * RATCHET_PART_SIZE..(to + 1) * RATCHET_PART_SIZE].copy_from_slice(&hash);
        hash.zeroize();
    }

    /// Advances the ratchet by a single step.
    pub fn advance(&mut self) {
        self.counter = self.counter.wrapping_add(1);

        // Find the slowest part whose counter byte rolled over; it and every faster part rotate.
        let mut mask: u32 = 0x00ff_ffff;
        let mut slowest = 0;
        while slowest < RATCHET_PARTS {
            if self.counter & mask == 0 {
                break;
            }
            slowest += 1;
            mask >>= 8;
        }

        for part in (slowest..RATCHET_PARTS).rev() {
            self.rehash_part(slowest, part);
        }
    }

    /// Advances the ratchet to the given counter with the minimum number of hash operations.
    ///
    /// The target may not lie behind the current counter (in wrap-aware terms, more than half
    /// the counter space ahead counts as behind).
    pub fn advance_to(&mut self, advance_to: u32) -> Result<(), MegolmError> {
        if advance_to.wrapping_sub(self.counter) >= 1 << 31 {
            return Err(MegolmError::AlreadyAdvanced(self.counter));
        }

        // Starting with the slowest part, rotate each part once per change of it's counter byte.
        for part in 0..RATCHET_PARTS {
            let shift = ((RATCHET_PARTS - part - 1) * 8) as u32;
            let steps = ((advance_to >> shift).wrapping_sub(self.counter >> shift)) & 0xff;
            if steps == 0 {
                continue;
            }

            // All but the last rotation only concern this part.
            for _ in 1..steps {
                self.rehash_part(part, part);
            }

            // The last rotation also re-seeds every faster part from the new value.
            for faster in (part..RATCHET_PARTS).rev() {
                self.rehash_part(part, faster);
            }

            self.counter = advance_to & !((1u32 << shift) - 1);
        }

        self.counter = advance_to;
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MegolmError {
    #[error("ratchet was already advanced past the requested counter (currently at {0})")]
    AlreadyAdvanced(u32),
}

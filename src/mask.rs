use std::fmt;
use std::iter::FromIterator;
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

use crate::MAX_BURST;

/// Active mask of a burst. Bit `i` set means slot `i` of the packet slice takes part in the
/// burst. Clearing a bit never releases the packet in that slot.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Mask(u64);

impl Mask {
    pub const EMPTY: Mask = Mask(0);
    pub const FULL: Mask = Mask(u64::MAX);

    pub const fn from_bits(bits: u64) -> Mask {
        Mask(bits)
    }

    /// The mask selecting slots `0..n`.
    pub fn first(n: usize) -> Mask {
        if n >= MAX_BURST {
            Mask::FULL
        } else {
            Mask((1u64 << n) - 1)
        }
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of active slots.
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    pub fn contains(self, slot: usize) -> bool {
        slot < MAX_BURST && self.0 & (1 << slot) != 0
    }

    pub fn insert(&mut self, slot: usize) {
        debug_assert!(slot < MAX_BURST);
        self.0 |= 1 << slot;
    }

    pub fn remove(&mut self, slot: usize) {
        debug_assert!(slot < MAX_BURST);
        self.0 &= !(1 << slot);
    }

    /// Number of slots up to and including the highest active one.
    pub fn span(self) -> usize {
        MAX_BURST - self.0.leading_zeros() as usize
    }

    /// True when no active slot lies at or beyond `len`.
    pub fn fits(self, len: usize) -> bool {
        self.0 & !Mask::first(len).0 == 0
    }

    /// Active slot indexes, lowest first.
    pub fn iter(self) -> Iter {
        Iter(self.0)
    }
}

pub struct Iter(u64);

impl Iterator for Iter {
    type Item = usize;

    #[inline]
    fn next(&mut self) -> Option<usize> {
        if self.0 == 0 {
            return None;
        }
        let slot = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(slot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Iter {}

impl IntoIterator for Mask {
    type Item = usize;
    type IntoIter = Iter;

    fn into_iter(self) -> Iter {
        self.iter()
    }
}

impl FromIterator<usize> for Mask {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Mask {
        let mut mask = Mask::EMPTY;
        for slot in iter {
            mask.insert(slot);
        }
        mask
    }
}

impl BitOr for Mask {
    type Output = Mask;

    fn bitor(self, rhs: Mask) -> Mask {
        Mask(self.0 | rhs.0)
    }
}

impl BitOrAssign for Mask {
    fn bitor_assign(&mut self, rhs: Mask) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Mask {
    type Output = Mask;

    fn bitand(self, rhs: Mask) -> Mask {
        Mask(self.0 & rhs.0)
    }
}

impl BitAndAssign for Mask {
    fn bitand_assign(&mut self, rhs: Mask) {
        self.0 &= rhs.0;
    }
}

impl Not for Mask {
    type Output = Mask;

    fn not(self) -> Mask {
        Mask(!self.0)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Mask({:#018x})", self.0)
    }
}

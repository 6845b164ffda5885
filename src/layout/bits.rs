//! Shift/mask descriptors for packed hardware words.
//!
//! Bit 0 is the least significant bit of the little-endian word. Every packed
//! field in [`crate::layout`] is described by one `BitField` constant next to
//! the struct that owns the word.

/// A `width`-bit field starting at bit `shift`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    pub shift: u32,
    pub width: u32,
}

impl BitField {
    pub const fn new(shift: u32, width: u32) -> Self {
        Self { shift, width }
    }

    /// Unshifted mask, `width` ones.
    #[inline]
    pub const fn mask(self) -> u64 {
        if self.width >= 64 {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// Largest value the field can hold.
    #[inline]
    pub const fn max_value(self) -> u64 {
        self.mask()
    }

    #[inline]
    pub const fn get64(self, word: u64) -> u64 {
        (word >> self.shift) & self.mask()
    }

    /// Store `value`, truncated to the field width.
    #[inline]
    pub const fn set64(self, word: u64, value: u64) -> u64 {
        let m = self.mask() << self.shift;
        (word & !m) | ((value << self.shift) & m)
    }

    /// Read the field as a two's complement number.
    #[inline]
    pub const fn get64_signed(self, word: u64) -> i64 {
        let raw = self.get64(word);
        let unused = 64 - self.width;
        ((raw << unused) as i64) >> unused
    }

    #[inline]
    pub const fn set64_signed(self, word: u64, value: i64) -> u64 {
        self.set64(word, value as u64)
    }

    #[inline]
    pub const fn get32(self, word: u32) -> u32 {
        self.get64(word as u64) as u32
    }

    #[inline]
    pub const fn set32(self, word: u32, value: u32) -> u32 {
        self.set64(word as u64, value as u64) as u32
    }

    /// True if `value` fits without truncation.
    #[inline]
    pub const fn fits(self, value: u64) -> bool {
        value <= self.mask()
    }
}

/// Multiple of 64 bytes that fits in a block-pointer field, from a byte address.
#[inline]
pub const fn to_blocks64(addr: u64) -> u64 {
    addr / 64
}

/// Byte address from a 64-byte block count.
#[inline]
pub const fn from_blocks64(blocks: u64) -> u64 {
    blocks.wrapping_mul(64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set() {
        let f = BitField::new(16, 3);
        assert_eq!(f.mask(), 0b111);
        let w = f.set32(0xFFFF_FFFF, 0b010);
        assert_eq!(f.get32(w), 0b010);
        assert_eq!(w, 0xFFFA_FFFF);
    }

    #[test]
    fn test_truncates_to_width() {
        let f = BitField::new(0, 4);
        assert_eq!(f.set32(0, 0x1F), 0xF);
        assert!(f.fits(15));
        assert!(!f.fits(16));
    }

    #[test]
    fn test_signed() {
        let f = BitField::new(0, 42);
        let w = f.set64_signed(0, -3);
        assert_eq!(f.get64_signed(w), -3);
        assert_eq!(w >> 42, 0);

        let g = BitField::new(6, 58);
        let w = g.set64_signed(0x3F, -1);
        assert_eq!(g.get64_signed(w), -1);
        assert_eq!(w & 0x3F, 0x3F);
    }

    #[test]
    fn test_full_width() {
        let f = BitField::new(0, 64);
        assert_eq!(f.set64(0, u64::MAX), u64::MAX);
        assert_eq!(f.get64(0x1234), 0x1234);
    }

    #[test]
    fn test_blocks() {
        assert_eq!(to_blocks64(0x1000), 0x40);
        assert_eq!(from_blocks64(0x40), 0x1000);
    }
}

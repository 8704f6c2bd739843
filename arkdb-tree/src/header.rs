//! The 8-byte node header shared by every array node, described in the file
//! format section: bit 63 is the interior flag, bits 62-60 encode the
//! element width, bit 59 is has-refs, bit 58 is context, bits 57-32 are the
//! element count (26 bits), and bits 31-0 are the byte capacity (including
//! the header) divided by 8.

use crate::Error;

const WIDTHS: [u8; 8] = [0, 1, 2, 4, 8, 16, 32, 64];

/// The bit width of a single packed element. `0` is the degenerate case of an
/// array whose every element is zero, so no payload bytes are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Width(u8);

impl Width {
    pub const W0: Width = Width(0);
    pub const W64: Width = Width(64);

    pub fn bits(self) -> u32 {
        self.0 as u32
    }

    fn code(self) -> u64 {
        WIDTHS.iter().position(|&w| w == self.0).expect("valid width") as u64
    }

    fn from_code(code: u64) -> Result<Width, Error> {
        WIDTHS
            .get(code as usize)
            .map(|&w| Width(w))
            .ok_or(Error::CorruptHeader)
    }

    /// The smallest width able to hold `v` as a sign-extended two's
    /// complement value.
    pub fn smallest_for_signed(v: i64) -> Width {
        for &w in &WIDTHS {
            if w == 64 {
                return Width(64);
            }
            if w == 0 {
                if v == 0 {
                    return Width(0);
                }
                continue;
            }
            let lo = -(1i64 << (w - 1));
            let hi = (1i64 << (w - 1)) - 1;
            if v >= lo && v <= hi {
                return Width(w);
            }
        }
        Width(64)
    }

    /// The smallest width able to hold `v` as an unsigned value (used for
    /// has-refs arrays, where elements are never negative).
    pub fn smallest_for_unsigned(v: u64) -> Width {
        if v == 0 {
            return Width(0);
        }
        for &w in &WIDTHS {
            if w == 64 {
                return Width(64);
            }
            if w == 0 {
                continue;
            }
            if v <= (u64::MAX >> (64 - w)) {
                return Width(w);
            }
        }
        Width(64)
    }

    /// Number of whole bytes needed to hold `count` elements of this width.
    pub fn payload_bytes(self, count: usize) -> usize {
        let bits = self.bits() as usize;
        (count * bits).div_ceil(8)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NodeHeader {
    pub is_interior: bool,
    pub width: Width,
    pub has_refs: bool,
    pub context: bool,
    pub count: u32,
    /// Total allocation size in bytes, header included.
    pub capacity: u32,
}

const COUNT_MAX: u32 = (1 << 26) - 1;
const CAPACITY_DIV8_MAX: u32 = u32::MAX;

impl NodeHeader {
    pub const SIZE: usize = 8;

    pub fn encode(self) -> Result<[u8; 8], Error> {
        if self.count > COUNT_MAX {
            return Err(Error::CorruptHeader);
        }
        if self.capacity % 8 != 0 {
            return Err(Error::CorruptHeader);
        }
        let capacity_div8 = self.capacity / 8;
        if capacity_div8 > CAPACITY_DIV8_MAX {
            return Err(Error::CorruptHeader);
        }
        let mut word: u64 = 0;
        word |= (self.is_interior as u64) << 63;
        word |= self.width.code() << 60;
        word |= (self.has_refs as u64) << 59;
        word |= (self.context as u64) << 58;
        word |= (self.count as u64) << 32;
        word |= capacity_div8 as u64;
        Ok(word.to_le_bytes())
    }

    pub fn decode(bytes: &[u8]) -> Result<NodeHeader, Error> {
        let raw: [u8; 8] = bytes.get(..8).ok_or(Error::CorruptHeader)?.try_into().unwrap();
        let word = u64::from_le_bytes(raw);
        let is_interior = (word >> 63) & 1 == 1;
        let width_code = (word >> 60) & 0x7;
        let has_refs = (word >> 59) & 1 == 1;
        let context = (word >> 58) & 1 == 1;
        let count = ((word >> 32) & 0x3FF_FFFF) as u32;
        let capacity_div8 = (word & 0xFFFF_FFFF) as u32;
        let width = Width::from_code(width_code)?;
        let capacity = capacity_div8
            .checked_mul(8)
            .ok_or(Error::CorruptHeader)?;
        if (capacity as usize) < Self::SIZE + width.payload_bytes(count as usize) {
            return Err(Error::CorruptHeader);
        }
        Ok(NodeHeader {
            is_interior,
            width,
            has_refs,
            context,
            count,
            capacity,
        })
    }
}
